// SPDX-License-Identifier: MPL-2.0

//! Per-task user-interrupt state.

use crate::{chip::taic::LqId, csr::UintrFrame};

/// The user-interrupt record of one task.
///
/// Created all-zero with the task and mutated at every trap boundary of the
/// task; the shadow registers and the queue binding are meaningful only
/// while the task is enabled. The record disappears with the task.
#[derive(Clone, Copy, Debug, Default)]
pub struct UintrState {
    enabled: bool,
    lq: LqId,
    frame: UintrFrame,
    pending: usize,
}

impl UintrState {
    /// Creates the state of a task that has not opted into user interrupts.
    pub const fn new() -> Self {
        Self {
            enabled: false,
            lq: LqId::new(0),
            frame: UintrFrame {
                uie: 0,
                uepc: 0,
                utvec: 0,
                uscratch: 0,
            },
            pending: 0,
        }
    }

    /// Opts the task into user interrupts, binding it to `lq`.
    ///
    /// The binding is immutable for the lifetime of the enablement: enabling
    /// an already-enabled task returns without rebinding.
    pub fn enable(&mut self, lq: LqId) {
        if self.enabled {
            return;
        }
        self.lq = lq;
        self.enabled = true;
        log::debug!("task bound to user-interrupt queue {:?}", lq);
    }

    /// Returns whether the task receives user interrupts.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// The bound local queue. Meaningful only while the task is enabled.
    pub fn queue(&self) -> LqId {
        self.lq
    }

    /// The shadow of the U-mode interrupt registers.
    pub fn frame(&self) -> &UintrFrame {
        &self.frame
    }

    /// The mutable shadow of the U-mode interrupt registers.
    pub fn frame_mut(&mut self) -> &mut UintrFrame {
        &mut self.frame
    }

    /// The shadow pending bits.
    pub fn pending(&self) -> usize {
        self.pending
    }

    /// Replaces the shadow pending bits.
    pub fn set_pending(&mut self, pending: usize) {
        self.pending = pending;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn new_tasks_are_disabled() {
        let state = UintrState::new();
        assert!(!state.is_enabled());
        assert_eq!(state.queue(), LqId::new(0));
        assert_eq!(state.pending(), 0);
        assert_eq!(*state.frame(), UintrFrame::default());
    }

    #[test]
    fn enable_is_idempotent() {
        let mut state = UintrState::new();

        state.enable(LqId::new(0x0000_0002_0000_0005));
        assert!(state.is_enabled());
        assert_eq!(state.queue(), LqId::new(0x0000_0002_0000_0005));

        // A second enable must not rebind the queue.
        state.enable(LqId::new(0x0000_0001_0000_0001));
        assert_eq!(state.queue(), LqId::new(0x0000_0002_0000_0005));
    }
}
