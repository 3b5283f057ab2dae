// SPDX-License-Identifier: MPL-2.0

//! Access to the U-mode interrupt CSRs.
//!
//! The registers involved belong to the user-interrupt (N) extension, which
//! the `riscv` crate does not model, so the hardware path encodes the CSR
//! numbers directly. The [`UintrCsrs`] trait is the seam that lets the
//! trap-boundary engine run against an in-memory register file in tests.

bitflags::bitflags! {
    /// Interrupt-line bits shared by the `uie`, `uip` and `sideleg` CSRs.
    pub struct UintrBits: usize {
        /// The user-soft interrupt line, which carries user interrupts.
        const USOFT = 1 << 0;
    }
}

/// A shadow copy of the four U-mode CPU-local interrupt registers.
///
/// These registers belong to whichever hart last ran the task, so they are
/// captured into the task's state at trap entry and written back at trap
/// exit, possibly on a different hart.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UintrFrame {
    /// User interrupt-enable mask (`uie`).
    pub uie: usize,
    /// Resume address of the interrupted user context (`uepc`).
    pub uepc: usize,
    /// User trap-vector base (`utvec`).
    pub utvec: usize,
    /// User scratch value (`uscratch`).
    pub uscratch: usize,
}

/// The live user-mode interrupt registers of one hart.
///
/// `HwUintrCsrs` is the hardware implementation on riscv64; tests
/// substitute a plain struct of fields.
pub trait UintrCsrs {
    /// Delegates the user-soft interrupt line to U-mode.
    fn delegate_user_soft(&mut self);

    /// Clears the user-soft enable and pending bits.
    fn clear_user_soft(&mut self);

    /// Reads the four shadowable registers.
    fn read_frame(&self) -> UintrFrame;

    /// Writes the four shadowable registers.
    fn write_frame(&mut self, frame: &UintrFrame);

    /// Reads the pending mask (`uip`).
    fn read_pending(&self) -> usize;

    /// Writes the pending mask (`uip`).
    fn write_pending(&mut self, pending: usize);
}

cfg_if::cfg_if! {
    if #[cfg(target_arch = "riscv64")] {
        // N-extension CSR numbers.
        macro_rules! csr_read {
            ($csr:literal) => {{
                let value: usize;
                // SAFETY: Reading an interrupt CSR has no memory side effects.
                unsafe {
                    core::arch::asm!(concat!("csrr {0}, ", stringify!($csr)), out(reg) value)
                };
                value
            }};
        }

        macro_rules! csr_write {
            ($csr:literal, $value:expr) => {
                // SAFETY: The written values are architecturally-defined
                // interrupt register contents.
                unsafe {
                    core::arch::asm!(concat!("csrw ", stringify!($csr), ", {0}"), in(reg) $value)
                }
            };
        }

        macro_rules! csr_set {
            ($csr:literal, $bits:expr) => {
                // SAFETY: Same as `csr_write`.
                unsafe {
                    core::arch::asm!(concat!("csrrs x0, ", stringify!($csr), ", {0}"), in(reg) $bits)
                }
            };
        }

        macro_rules! csr_clear {
            ($csr:literal, $bits:expr) => {
                // SAFETY: Same as `csr_write`.
                unsafe {
                    core::arch::asm!(concat!("csrrc x0, ", stringify!($csr), ", {0}"), in(reg) $bits)
                }
            };
        }

        /// The hardware CSR file of the hart the caller runs on.
        pub struct HwUintrCsrs;

        impl UintrCsrs for HwUintrCsrs {
            fn delegate_user_soft(&mut self) {
                // sideleg
                csr_set!(0x103, UintrBits::USOFT.bits());
            }

            fn clear_user_soft(&mut self) {
                // uie, uip
                csr_clear!(0x004, UintrBits::USOFT.bits());
                csr_clear!(0x044, UintrBits::USOFT.bits());
            }

            fn read_frame(&self) -> UintrFrame {
                UintrFrame {
                    uie: csr_read!(0x004),
                    uepc: csr_read!(0x041),
                    utvec: csr_read!(0x005),
                    uscratch: csr_read!(0x040),
                }
            }

            fn write_frame(&mut self, frame: &UintrFrame) {
                csr_write!(0x004, frame.uie);
                csr_write!(0x041, frame.uepc);
                csr_write!(0x005, frame.utvec);
                csr_write!(0x040, frame.uscratch);
            }

            fn read_pending(&self) -> usize {
                csr_read!(0x044)
            }

            fn write_pending(&mut self, pending: usize) {
                csr_write!(0x044, pending);
            }
        }
    }
}
