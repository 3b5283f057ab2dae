// SPDX-License-Identifier: MPL-2.0

//! The register model of one TAIC instance.
//!
//! The controller keeps a table of local queues, one per receiver endpoint.
//! Each queue occupies a fixed-size register page whose owner-hart field
//! names the hart currently allowed to receive the queue's interrupts; a
//! separate release register hands a queue back to the controller.

use core::fmt;

use bit_field::BitField;
use spin::Mutex;

use super::IrqMode;
use crate::{
    cpu::{CpuId, CpuSet},
    io::MmioRegion,
};

pub(crate) const DEFAULT_GQ_NUM: u8 = 4;
pub(crate) const DEFAULT_LQ_NUM: u8 = 8;

const LQ_OFFSET: usize = 0x1000;
const LQ_SIZE: usize = 0x1000;
/// Offset of the owner-hart field within a local queue's register page.
const LQ_OWNER_OFFSET: usize = 0x38;
/// Register that returns a local queue to the controller's free pool.
const LQ_FREE_OFFSET: usize = 0x8;

/// Owner value meaning "no hart currently receives on this queue".
pub const INVALID_HART: u64 = !0;

/// The identity of a local queue: the group-table index in the high half and
/// the slot within that group in the low half.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct LqId(u64);

impl LqId {
    /// Creates a queue identity from its raw 64-bit value.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw 64-bit value, as written to the release register.
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// The group-table index.
    pub fn group(self) -> usize {
        self.0.get_bits(32..64) as usize
    }

    /// The slot within the group.
    pub fn slot(self) -> usize {
        self.0.get_bits(0..32) as usize
    }
}

impl fmt::Debug for LqId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LqId({}:{})", self.group(), self.slot())
    }
}

/// One TAIC instance.
///
/// Created from a topology node at discovery time and alive for the rest of
/// the system's lifetime. The queue-shape fields are fixed after creation;
/// the hart masks are mutated only under the instance lock while discovery
/// registers the instance's interrupt-parent links.
pub struct Taic {
    regs: MmioRegion,
    base: usize,
    gq_num: u8,
    lq_num: u8,
    masks: Mutex<HartMasks>,
}

#[derive(Default)]
struct HartMasks {
    smask: CpuSet,
    umask: CpuSet,
}

impl Taic {
    pub(crate) fn new(regs: MmioRegion, base: usize, gq_num: u8, lq_num: u8) -> Self {
        Self {
            regs,
            base,
            gq_num,
            lq_num,
            masks: Mutex::new(HartMasks::default()),
        }
    }

    /// The physical base address of the register window.
    pub fn base_paddr(&self) -> usize {
        self.base
    }

    /// The number of group queues.
    pub fn gq_num(&self) -> u8 {
        self.gq_num
    }

    /// The number of local queues per group.
    pub fn lq_num(&self) -> u8 {
        self.lq_num
    }

    /// Byte offset of the owner-hart register of `lq` within the window.
    pub fn lq_owner_offset(&self, lq: LqId) -> usize {
        LQ_OFFSET + (lq.group() * self.lq_num as usize + lq.slot()) * LQ_SIZE + LQ_OWNER_OFFSET
    }

    /// Records `hart` as the current owner of `lq`.
    ///
    /// A single 64-bit store, never a read-modify-write: only the hart
    /// running the queue's task legitimately writes this field, and a torn
    /// value would misdirect delivery. [`INVALID_HART`] withdraws ownership.
    pub(crate) fn write_lq_owner(&self, lq: LqId, hart: u64) {
        self.regs.write_once(self.lq_owner_offset(lq), hart);
    }

    /// Hands the table entry of `lq` back to the controller.
    pub(crate) fn free_lq(&self, lq: LqId) {
        self.regs.write_once(LQ_FREE_OFFSET, lq.raw());
    }

    pub(crate) fn mark_served(&self, cpu: CpuId, mode: IrqMode) {
        let mut masks = self.masks.lock();
        match mode {
            IrqMode::Supervisor => masks.smask.add(cpu),
            IrqMode::User => masks.umask.add(cpu),
        }
    }

    /// The CPUs whose `mode` interrupts this instance services.
    pub fn served_cpus(&self, mode: IrqMode) -> CpuSet {
        let masks = self.masks.lock();
        match mode {
            IrqMode::Supervisor => masks.smask.clone(),
            IrqMode::User => masks.umask.clone(),
        }
    }

    #[cfg(test)]
    pub(crate) fn lq_owner(&self, lq: LqId) -> u64 {
        self.regs.read_once(self.lq_owner_offset(lq))
    }

    #[cfg(test)]
    pub(crate) fn released_lq(&self) -> u64 {
        self.regs.read_once(LQ_FREE_OFFSET)
    }
}

/// Backs an instance with a plain buffer so tests can spy on its registers.
#[cfg(test)]
pub(crate) fn leaked_fake(gq_num: u8, lq_num: u8, window: usize) -> &'static Taic {
    use alloc::{boxed::Box, vec};

    // Word-sized storage keeps the backing buffer aligned for the owner
    // stores.
    let words = Box::leak(vec![0u64; window / 8].into_boxed_slice());
    // SAFETY: The leaked buffer lives forever and is only accessed through
    // the region.
    let regs = unsafe { MmioRegion::new(words.as_mut_ptr().cast(), window) };
    Box::leak(Box::new(Taic::new(regs, 0x100_0000, gq_num, lq_num)))
}
