// SPDX-License-Identifier: MPL-2.0

//! The TAIC interrupt-controller chip and its per-CPU handler table.
//!
//! Discovery walks the platform device tree once during boot, brings up
//! every controller instance and records, per CPU and privilege mode, which
//! instance services it. The table is published in [`TAIC_CHIP`] and is
//! immutable afterwards, so the hot routing path reads it without locking.

pub mod taic;

use alloc::{boxed::Box, vec, vec::Vec};

use fdt::{node::FdtNode, Fdt};
use spin::Once;

use self::taic::{LqId, Taic, DEFAULT_GQ_NUM, DEFAULT_LQ_NUM};
use crate::{
    cpu::CpuId,
    error::{Error, Result},
    io,
};

/// Compatible string of the controller's topology node.
const COMPATIBLE: &str = "riscv,taic0";

// Interrupt cause numbers of the RISC-V soft-interrupt lines.
const IRQ_U_SOFT: u32 = 0;
const IRQ_S_SOFT: u32 = 1;

/// The privilege mode in which a controller context delivers interrupts.
///
/// A CPU may be served by two different instances, one per mode; the claims
/// are independent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IrqMode {
    /// The supervisor-soft interrupt line.
    Supervisor,
    /// The user-soft interrupt line.
    User,
}

impl IrqMode {
    fn from_cause(cause: u32) -> Option<Self> {
        match cause {
            IRQ_S_SOFT => Some(Self::Supervisor),
            IRQ_U_SOFT => Some(Self::User),
            _ => None,
        }
    }
}

/// The [`TaicChip`] singleton, published once discovery completes.
pub static TAIC_CHIP: Once<TaicChip> = Once::new();

/// The binding of one CPU to the instance serving it in one mode.
#[derive(Clone, Copy)]
struct TaicHandler {
    taic: &'static Taic,
}

/// The per-CPU handler table of all TAIC instances.
///
/// One slot per CPU and privilege mode; an empty slot means no controller
/// serves that CPU in that mode and every routing operation against it
/// fails with [`Error::NoController`]. Slots are written only during
/// single-threaded discovery and read-only afterwards.
pub struct TaicChip {
    shandlers: Box<[Option<TaicHandler>]>,
    uhandlers: Box<[Option<TaicHandler>]>,
}

impl TaicChip {
    /// Creates an empty table for `num_cpus` CPUs.
    pub fn new(num_cpus: usize) -> Self {
        Self {
            shandlers: vec![None; num_cpus].into_boxed_slice(),
            uhandlers: vec![None; num_cpus].into_boxed_slice(),
        }
    }

    /// The number of CPU slots in the table.
    pub fn num_cpus(&self) -> usize {
        self.uhandlers.len()
    }

    fn handler(&self, cpu: CpuId, mode: IrqMode) -> Option<&TaicHandler> {
        let handlers = match mode {
            IrqMode::Supervisor => &self.shandlers,
            IrqMode::User => &self.uhandlers,
        };
        handlers.get(cpu.as_usize()).and_then(|slot| slot.as_ref())
    }

    /// Returns whether a controller is present for `cpu` in `mode`.
    pub fn is_present(&self, cpu: CpuId, mode: IrqMode) -> bool {
        self.handler(cpu, mode).is_some()
    }

    /// Binds `taic` as the `mode` controller of `cpu` and adds the CPU to
    /// the instance's mode mask.
    ///
    /// The first claim wins: returns `false`, leaving the existing binding
    /// untouched, if the slot is already taken or out of range.
    pub(crate) fn bind(&mut self, cpu: CpuId, mode: IrqMode, taic: &'static Taic) -> bool {
        let handlers = match mode {
            IrqMode::Supervisor => &mut self.shandlers,
            IrqMode::User => &mut self.uhandlers,
        };
        let Some(slot) = handlers.get_mut(cpu.as_usize()) else {
            return false;
        };
        if slot.is_some() {
            return false;
        }
        *slot = Some(TaicHandler { taic });
        taic.mark_served(cpu, mode);
        true
    }

    /// Records `owner` as the owner hart of `lq` on the instance serving
    /// `cpu`'s user-mode interrupts.
    ///
    /// This is self-routing: `cpu` is the hart the caller runs on, claiming
    /// (or, with [`taic::INVALID_HART`], withdrawing) delivery for itself.
    /// It is not a way to program another hart's queue ownership remotely.
    pub fn route_lq(&self, cpu: CpuId, lq: LqId, owner: u64) -> Result<()> {
        let handler = self.handler(cpu, IrqMode::User).ok_or(Error::NoController)?;
        handler.taic.write_lq_owner(lq, owner);
        Ok(())
    }

    /// Releases `lq` on the instance serving `cpu`'s user-mode interrupts,
    /// dropping the queue's table entry.
    ///
    /// The queue's owner field is invalid afterwards, until the controller
    /// reassigns the queue.
    pub fn free_lq(&self, cpu: CpuId, lq: LqId) -> Result<()> {
        let handler = self.handler(cpu, IrqMode::User).ok_or(Error::NoController)?;
        handler.taic.free_lq(lq);
        Ok(())
    }
}

/// [`TaicChip::route_lq`] on the published singleton.
pub fn route_lq(cpu: CpuId, lq: LqId, owner: u64) -> Result<()> {
    TAIC_CHIP
        .get()
        .ok_or(Error::NoController)?
        .route_lq(cpu, lq, owner)
}

/// [`TaicChip::free_lq`] on the published singleton.
pub fn free_lq(cpu: CpuId, lq: LqId) -> Result<()> {
    TAIC_CHIP
        .get()
        .ok_or(Error::NoController)?
        .free_lq(cpu, lq)
}

/// Initializes every TAIC described by the device tree and publishes the
/// handler table for `num_cpus` CPUs.
///
/// A node that fails to come up is logged and skipped; the remaining
/// instances proceed.
///
/// # Safety
///
/// Must be called once on the boot hart, before any CPU routes user
/// interrupts, with a device tree describing the running machine.
pub(crate) unsafe fn init(fdt: &Fdt, num_cpus: usize) {
    let mut chip = TaicChip::new(num_cpus);
    for node in fdt.all_nodes() {
        let is_taic = node
            .compatible()
            .is_some_and(|compat| compat.all().any(|name| name == COMPATIBLE));
        if !is_taic {
            continue;
        }
        // SAFETY: The caller vouches for the device tree, so the node's
        // register window is real device memory.
        match unsafe { bring_up(fdt, &node, &mut chip) } {
            Ok(taic) => log::info!(
                "{}: {} gq_num {} lq_num available",
                node.name,
                taic.gq_num(),
                taic.lq_num()
            ),
            Err(err) => log::error!("failed to initialize {}: {:?}", node.name, err),
        }
    }
    TAIC_CHIP.call_once(|| chip);
}

/// One interrupt-parent link of a controller node.
#[derive(Clone, Copy, Debug)]
struct TaicContext {
    cause: u32,
    hartid: Option<usize>,
}

/// Brings up the controller described by `node` and registers its contexts
/// in `chip`.
///
/// # Safety
///
/// The node's `reg` window must be the device's register block.
unsafe fn bring_up(fdt: &Fdt, node: &FdtNode, chip: &mut TaicChip) -> Result<&'static Taic> {
    let region = node
        .reg()
        .and_then(|mut regs| regs.next())
        .ok_or(Error::IoError)?;
    let size = region.size.ok_or(Error::IoError)?;
    let base = region.starting_address as usize;

    let gq_num = queue_count(node.property("gq-num").map(|p| p.value), "gq-num", DEFAULT_GQ_NUM);
    let lq_num = queue_count(node.property("lq-num").map(|p| p.value), "lq-num", DEFAULT_LQ_NUM);

    let contexts = parse_contexts(fdt, node);
    let bindings = plan_contexts(&contexts, chip.num_cpus())?;

    // SAFETY: The caller vouches that `base..base + size` is the device's
    // register window.
    let regs = unsafe { io::map_device(base, size) };
    let taic: &'static Taic = Box::leak(Box::new(Taic::new(regs, base, gq_num, lq_num)));

    for (index, mode, cpu) in bindings {
        if !chip.bind(cpu, mode, taic) {
            log::warn!("handler already present for context {}.", index);
        }
    }
    log::debug!(
        "taic at {:#x} serves {} supervisor and {} user context(s)",
        taic.base_paddr(),
        taic.served_cpus(IrqMode::Supervisor).count(),
        taic.served_cpus(IrqMode::User).count(),
    );
    Ok(taic)
}

/// Parses an optional queue-count property, falling back to the documented
/// default when it is absent or malformed.
fn queue_count(prop: Option<&[u8]>, name: &str, default: u8) -> u8 {
    match prop {
        Some([value]) => *value,
        Some(value) if value.len() == 4 => {
            u32::from_be_bytes(value.try_into().unwrap()) as u8
        }
        _ => {
            log::warn!("failed to parse {}, using default value {}", name, default);
            default
        }
    }
}

/// Walks the node's `interrupts-extended` links, resolving each phandle to
/// the hart whose cpu-intc it names.
fn parse_contexts(fdt: &Fdt, node: &FdtNode) -> Vec<TaicContext> {
    let Some(prop) = node.property("interrupts-extended") else {
        return Vec::new();
    };
    let mut cells = prop
        .value
        .chunks_exact(4)
        .map(|b| u32::from_be_bytes(b.try_into().unwrap()));

    let mut contexts = Vec::new();
    while let Some(phandle) = cells.next() {
        if phandle == 0 {
            continue;
        }
        match find_cpu_with_intc_phandle(fdt, phandle) {
            Some((cpu, intc)) => {
                let cell_count = intc.interrupt_cells().unwrap_or(1);
                let Some(cause) = cells.next() else { break };
                // Consume the remaining specifier cells.
                for _ in 1..cell_count {
                    let _ = cells.next();
                }
                let hartid = cpu.property("reg").and_then(|p| p.as_usize());
                contexts.push(TaicContext { cause, hartid });
            }
            None => {
                // A `riscv,cpu-intc` parent uses a single specifier cell.
                let Some(cause) = cells.next() else { break };
                contexts.push(TaicContext {
                    cause,
                    hartid: None,
                });
            }
        }
    }
    contexts
}

fn find_cpu_with_intc_phandle<'b, 'a: 'b>(
    fdt: &'b Fdt<'a>,
    phandle: u32,
) -> Option<(FdtNode<'b, 'a>, FdtNode<'b, 'a>)> {
    for cpu in fdt.find_all_nodes("/cpus/cpu") {
        let intc = cpu.children().find(|node| {
            node.compatible()
                .is_some_and(|compat| compat.all().any(|c| c == "riscv,cpu-intc"))
        });
        let Some(intc) = intc else { continue };
        if intc
            .property("phandle")
            .is_some_and(|p| p.as_usize() == Some(phandle as usize))
        {
            return Some((cpu, intc));
        }
    }
    None
}

/// Decides which contexts become handler bindings.
///
/// Links with an unrecognized cause are ignored; a link whose hart cannot be
/// resolved, or whose hart lies outside the CPU table, is skipped with a
/// warning. Fails only when no link carries a recognized soft-interrupt
/// cause at all, in which case no slot may be marked present for the node.
fn plan_contexts(
    contexts: &[TaicContext],
    num_cpus: usize,
) -> Result<Vec<(usize, IrqMode, CpuId)>> {
    let mut bindings = Vec::new();
    let mut recognized = false;
    for (index, context) in contexts.iter().enumerate() {
        let Some(mode) = IrqMode::from_cause(context.cause) else {
            continue;
        };
        recognized = true;
        let Some(hartid) = context.hartid else {
            log::warn!("failed to parse hart ID for context {}.", index);
            continue;
        };
        if hartid >= num_cpus {
            log::warn!("invalid cpuid for context {}.", index);
            continue;
        }
        bindings.push((index, mode, CpuId::new(hartid as u32)));
    }
    if recognized {
        Ok(bindings)
    } else {
        Err(Error::InvalidConfig)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const WINDOW: usize = 0x20000;

    fn ctx(cause: u32, hartid: Option<usize>) -> TaicContext {
        TaicContext { cause, hartid }
    }

    #[test]
    fn plan_rejects_nodes_without_recognized_links() {
        assert_eq!(plan_contexts(&[], 4), Err(Error::InvalidConfig));

        // External interrupts (cause 9) are not soft-interrupt links.
        let contexts = [ctx(9, Some(0)), ctx(9, Some(1))];
        assert_eq!(plan_contexts(&contexts, 4), Err(Error::InvalidConfig));
    }

    #[test]
    fn plan_skips_unresolvable_and_out_of_range_harts() {
        let contexts = [
            ctx(IRQ_U_SOFT, None),
            ctx(IRQ_U_SOFT, Some(9)),
            ctx(IRQ_S_SOFT, Some(1)),
        ];
        let bindings = plan_contexts(&contexts, 4).unwrap();
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0], (2, IrqMode::Supervisor, CpuId::new(1)));
    }

    #[test]
    fn plan_classifies_both_soft_lines() {
        let contexts = [ctx(IRQ_S_SOFT, Some(0)), ctx(IRQ_U_SOFT, Some(0))];
        let bindings = plan_contexts(&contexts, 1).unwrap();
        assert_eq!(
            bindings,
            [
                (0, IrqMode::Supervisor, CpuId::new(0)),
                (1, IrqMode::User, CpuId::new(0)),
            ]
            .to_vec()
        );
    }

    #[test]
    fn first_claim_wins_on_duplicate_binding() {
        let first = taic::leaked_fake(4, 8, WINDOW);
        let second = taic::leaked_fake(4, 8, WINDOW);
        let mut chip = TaicChip::new(2);
        let cpu = CpuId::new(1);

        assert!(chip.bind(cpu, IrqMode::User, first));
        assert!(!chip.bind(cpu, IrqMode::User, second));

        // Routing still goes through the first instance.
        let lq = LqId::new(3);
        chip.route_lq(cpu, lq, 1).unwrap();
        assert_eq!(first.lq_owner(lq), 1);
        assert_eq!(second.lq_owner(lq), 0);
        assert!(!second.served_cpus(IrqMode::User).contains(cpu));
    }

    #[test]
    fn mode_claims_are_independent() {
        let taic = taic::leaked_fake(4, 8, WINDOW);
        let mut chip = TaicChip::new(2);
        let cpu = CpuId::new(0);

        assert!(chip.bind(cpu, IrqMode::Supervisor, taic));
        assert!(chip.bind(cpu, IrqMode::User, taic));
        assert!(chip.is_present(cpu, IrqMode::Supervisor));
        assert!(chip.is_present(cpu, IrqMode::User));
    }

    #[test]
    fn routing_requires_a_user_mode_controller() {
        let taic = taic::leaked_fake(4, 8, WINDOW);
        let mut chip = TaicChip::new(2);
        let cpu = CpuId::new(0);

        // A supervisor-only claim does not make the CPU routable.
        assert!(chip.bind(cpu, IrqMode::Supervisor, taic));
        assert_eq!(
            chip.route_lq(cpu, LqId::new(0), 0),
            Err(Error::NoController)
        );
        assert_eq!(chip.free_lq(cpu, LqId::new(0)), Err(Error::NoController));

        // Out-of-range CPUs fail the same way.
        assert_eq!(
            chip.route_lq(CpuId::new(7), LqId::new(0), 7),
            Err(Error::NoController)
        );
    }

    #[test]
    fn release_goes_through_the_free_register() {
        let taic = taic::leaked_fake(4, 8, WINDOW);
        let mut chip = TaicChip::new(1);
        let cpu = CpuId::new(0);
        assert!(chip.bind(cpu, IrqMode::User, taic));

        let lq = LqId::new(0x0000_0001_0000_0002);
        chip.free_lq(cpu, lq).unwrap();
        assert_eq!(taic.released_lq(), lq.raw());
    }

    #[test]
    fn queue_counts_fall_back_to_documented_defaults() {
        assert_eq!(queue_count(None, "gq-num", DEFAULT_GQ_NUM), 4);
        assert_eq!(queue_count(None, "lq-num", DEFAULT_LQ_NUM), 8);
        assert_eq!(
            queue_count(Some([16u8].as_slice()), "lq-num", DEFAULT_LQ_NUM),
            16
        );
        assert_eq!(
            queue_count(Some([0u8, 0, 0, 32].as_slice()), "lq-num", DEFAULT_LQ_NUM),
            32
        );
        assert_eq!(
            queue_count(Some([0u8, 0].as_slice()), "lq-num", DEFAULT_LQ_NUM),
            DEFAULT_LQ_NUM
        );
    }

    #[test]
    fn unpublished_singleton_reports_no_controller() {
        // Discovery never runs in the test binary, so the module-level
        // entry points must fail cleanly.
        assert_eq!(
            route_lq(CpuId::bsp(), LqId::new(0), 0),
            Err(Error::NoController)
        );
        assert_eq!(free_lq(CpuId::bsp(), LqId::new(0)), Err(Error::NoController));
    }
}
