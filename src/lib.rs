// SPDX-License-Identifier: MPL-2.0

//! User-level interrupt delivery for multi-hart RISC-V.
//!
//! A task opts into user interrupts by binding a local queue of the
//! task-aware interrupt controller (TAIC), a per-task receiver endpoint.
//! The controller records, per queue, which hart is currently allowed to
//! receive the queue's interrupts; since the scheduler may migrate the task
//! between harts, the trap-boundary engine retargets that record at every
//! trap entry and exit while shadowing the task's U-mode interrupt CSRs in
//! its [`UintrState`].
//!
//! The embedding kernel calls [`init`] once during boot with the platform
//! device tree, keeps a [`UintrState`] per task, and invokes
//! `trap::enter_from_user` / `trap::return_to_user` at its trap boundaries.

#![no_std]
#![warn(missing_docs)]

extern crate alloc;

pub mod chip;
pub mod cpu;
pub mod csr;
mod error;
pub mod io;
pub mod task;
pub mod trap;

use fdt::Fdt;

pub use self::{
    chip::taic::{LqId, INVALID_HART},
    error::{Error, Result},
    task::UintrState,
};

/// Initializes user-interrupt delivery from the platform device tree.
///
/// Walks every TAIC node, maps its register window and populates the
/// per-CPU handler table for `num_cpus` CPUs. Nodes that fail to come up
/// are logged and skipped; the remaining instances proceed.
///
/// # Safety
///
/// Must be called exactly once on the boot hart, before any task enables
/// user interrupts, with a device tree that describes the running machine.
pub unsafe fn init(fdt: &Fdt, num_cpus: usize) {
    // SAFETY: The caller's obligations are forwarded unchanged.
    unsafe { chip::init(fdt, num_cpus) }
}
