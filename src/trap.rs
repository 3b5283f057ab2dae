// SPDX-License-Identifier: MPL-2.0

//! Trap-boundary synchronization of user-interrupt state.
//!
//! Every time a receiver task traps, the scheduler may migrate it to
//! another hart before it next runs, so the CPU-local `uie`, `uepc`,
//! `utvec` and `uscratch` registers are shadowed in the task's
//! [`UintrState`] and the controller's owner record is retargeted at both
//! boundaries: [`save_on`] withdraws the hart's delivery claim when the
//! task leaves user mode, and [`restore_on`] claims the resuming hart when
//! it returns.
//!
//! The trap dispatcher must call the two operations on the hart currently
//! handling the task and never concurrently for the same task; `save` on
//! one hart always happens-before the next `restore` on any hart.

use crate::{
    chip::{taic::INVALID_HART, TaicChip},
    cpu::CpuId,
    csr::UintrCsrs,
    task::UintrState,
};

/// Synchronizes receiver status to the controller and loads the task's
/// U-mode interrupt registers before `cpu` returns to user mode.
///
/// The user-soft line is delegated to U-mode unconditionally. For a task
/// that never enabled user interrupts, the hart's user-soft enable and
/// pending bits are cleared instead, since a previous task on this hart may
/// have left its own bits behind, and the controller is not touched.
///
/// A routing failure leaves the task schedulable with delivery unavailable
/// on this hart until a later restore succeeds; the shadow registers are
/// loaded regardless.
pub fn restore_on(chip: &TaicChip, csrs: &mut impl UintrCsrs, state: &UintrState, cpu: CpuId) {
    csrs.delegate_user_soft();

    if !state.is_enabled() {
        csrs.clear_user_soft();
        return;
    }

    let lq = state.queue();
    if let Err(err) = chip.route_lq(cpu, lq, cpu.as_usize() as u64) {
        log::warn!(
            "cpu {}: user-interrupt queue {:?} left unrouted: {:?}",
            cpu.as_usize(),
            lq,
            err
        );
    }

    csrs.write_frame(state.frame());

    // A pending bit latched while the task was off this hart must not be
    // lost when the shadow mask is written back.
    let latched = csrs.read_pending();
    csrs.write_pending(latched | state.pending());
}

/// Withdraws the hart's delivery claim and captures the live U-mode
/// interrupt registers into the task's shadow when `cpu` leaves the task's
/// user context.
///
/// The owner record is invalidated before anything else reads interrupt
/// hardware state: the task may next run on a different hart, and an
/// interrupt arriving mid-switch must not be delivered to this one.
pub fn save_on(chip: &TaicChip, csrs: &mut impl UintrCsrs, state: &mut UintrState, cpu: CpuId) {
    if !state.is_enabled() {
        return;
    }

    // A hart without a user-mode controller never claimed the queue, so a
    // failed unroute leaves nothing stale behind.
    let _ = chip.route_lq(cpu, state.queue(), INVALID_HART);

    *state.frame_mut() = csrs.read_frame();
    state.set_pending(csrs.read_pending());
}

cfg_if::cfg_if! {
    if #[cfg(target_arch = "riscv64")] {
        use crate::{chip::TAIC_CHIP, csr::HwUintrCsrs};

        /// [`restore_on`] against the published controller table and the
        /// current hart's CSR file.
        ///
        /// The trap dispatcher calls this on every transition into
        /// user-mode execution of the task.
        pub fn return_to_user(state: &UintrState, cpu: CpuId) {
            restore_on(TAIC_CHIP.get().unwrap(), &mut HwUintrCsrs, state, cpu);
        }

        /// [`save_on`] against the published controller table and the
        /// current hart's CSR file.
        ///
        /// The trap dispatcher calls this on every transition out of
        /// user-mode execution of the task.
        pub fn enter_from_user(state: &mut UintrState, cpu: CpuId) {
            save_on(TAIC_CHIP.get().unwrap(), &mut HwUintrCsrs, state, cpu);
        }
    }
}
