//! Virtual-to-physical address translation.
//!
//! Translation proceeds in three stages:
//! 1. **PAL identity:** in PAL mode the physical address equals the
//!    virtual address.
//! 2. **Superpages:** in kernel mode, three windows selected by signatures
//!    in the high VA bits map directly to physical addresses, bypassing
//!    the translation buffer entirely.
//! 3. **Translation buffer:** otherwise the TB is scanned; a hit checks the
//!    per-mode access enables, a miss raises the single- or double-miss
//!    fault depending on whether one is already outstanding.

use crate::common::addr::{
    PhysAddr, SPE0_VA_MASK, SPE0_VA_SIG, SPE1_PA_43_41, SPE1_VA_MASK, SPE1_VA_SIG, SPE2_VA_MASK,
    SPE2_VA_SIG, VirtAddr,
};
use crate::common::fault::Fault;
use crate::common::mode::{AccessKind, ProcessorMode};
use crate::common::pc::VirtPc;

use super::tlb::{TbEntry, TransBuffer};

/// SPE control bit enabling the SPE2 window.
pub const SPE2_BIT: u8 = 0b100;
/// SPE control bit enabling the SPE1 window.
pub const SPE1_BIT: u8 = 0b010;
/// SPE control bit enabling the SPE0 window.
pub const SPE0_BIT: u8 = 0b001;

/// Result of one translation attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Translation {
    /// Translated; `asm` reports the address-space-match flag of the TB
    /// entry used (false for identity and superpage mappings).
    Address {
        /// The physical address.
        pa: PhysAddr,
        /// Whether the mapping is global across address spaces.
        asm: bool,
    },
    /// Translation failed; divert to the PAL handler for `fault`.
    Fault(Fault),
}

/// Mutable translation context shared by both streams.
///
/// Holds the fault bookkeeping that survives across translations: the
/// outstanding-miss flag that distinguishes single from double misses, and
/// the captured excepting PC and VA for PAL dispatch.
#[derive(Clone, Copy, Debug, Default)]
pub struct TranslateCtx {
    /// Set while a TB miss is being serviced; a nested miss is a double.
    pub tb_miss_outstanding: bool,
    /// Whether 4-level (48-bit) addressing selects the double-miss flavor.
    pub va_48: bool,
    /// The PC captured at the most recent fault.
    pub exc_addr: Option<VirtPc>,
    /// The VA captured at the most recent fault.
    pub fault_va: Option<u64>,
}

/// Checks the requested access against the per-mode enables of a TB entry.
///
/// Execute checks the read enables (there is no execute bit); modify
/// requires both the read and write sides to pass, fault-on flags
/// included.
pub fn check_access(entry: &TbEntry, mode: ProcessorMode, access: AccessKind) -> bool {
    if !entry.valid {
        return false;
    }
    let (re, we) = match mode {
        ProcessorMode::Kernel => (entry.kre, entry.kwe),
        ProcessorMode::Executive => (entry.ere, entry.ewe),
        ProcessorMode::Supervisor => (entry.sre, entry.swe),
        ProcessorMode::User => (entry.ure, entry.uwe),
    };
    match access {
        AccessKind::None => false,
        AccessKind::Read => re && entry.fault_on_read,
        AccessKind::Write => we && entry.fault_on_write,
        AccessKind::Execute => re && entry.fault_on_execute,
        AccessKind::Modify => re && we && entry.fault_on_read && entry.fault_on_write,
    }
}

/// Attempts the kernel superpage windows, in SPE2 → SPE1 → SPE0 order.
fn superpage(va: VirtAddr, spe: u8) -> Option<PhysAddr> {
    if spe & SPE2_BIT != 0 && va.spe2_sig() == SPE2_VA_SIG {
        return Some(PhysAddr::new(va.val() & SPE2_VA_MASK));
    }
    if spe & SPE1_BIT != 0 && va.spe1_sig() == SPE1_VA_SIG {
        let high = if va.bit_40() { SPE1_PA_43_41 } else { 0 };
        return Some(PhysAddr::new((va.val() & SPE1_VA_MASK) | high));
    }
    if spe & SPE0_BIT != 0 && va.spe0_sig() == SPE0_VA_SIG {
        return Some(PhysAddr::new(va.val() & SPE0_VA_MASK));
    }
    None
}

/// Translates `va` through `tb`, updating the fault bookkeeping in `ctx`.
///
/// `pc` supplies the PAL-mode flag and is captured as the excepting PC on
/// a fault; `is_data` selects the data- versus instruction-stream fault
/// ordinals. The result is a pure function of `(mode, asn, spe, ctx, tb,
/// va)` — repeated translation of the same VA against unchanged state
/// yields the same physical address.
pub fn translate(
    ctx: &mut TranslateCtx,
    tb: &TransBuffer,
    mode: ProcessorMode,
    asn: u8,
    spe: u8,
    va: VirtAddr,
    pc: VirtPc,
    is_data: bool,
    access: AccessKind,
) -> Translation {
    if pc.pal() {
        return Translation::Address {
            pa: PhysAddr::new(va.val()),
            asm: false,
        };
    }

    if spe != 0 && mode == ProcessorMode::Kernel {
        if let Some(pa) = superpage(va, spe) {
            return Translation::Address { pa, asm: false };
        }
    }

    let Some(entry) = tb.find(va.val(), asn) else {
        ctx.exc_addr = Some(pc);
        ctx.fault_va = Some(va.val());
        let fault = if ctx.tb_miss_outstanding {
            if ctx.va_48 {
                Fault::DtbmDouble4
            } else {
                Fault::DtbmDouble3
            }
        } else {
            ctx.tb_miss_outstanding = true;
            if is_data {
                Fault::DtbmSingle
            } else {
                Fault::ItbMiss
            }
        };
        tracing::debug!(va = va.val(), ?fault, "translation miss");
        return Translation::Fault(fault);
    };

    ctx.tb_miss_outstanding = false;
    if !check_access(entry, mode, access) {
        ctx.exc_addr = Some(pc);
        ctx.fault_va = Some(va.val());
        let fault = if is_data { Fault::Dfault } else { Fault::Iacv };
        tracing::debug!(va = va.val(), ?mode, ?access, ?fault, "access denied");
        return Translation::Fault(fault);
    }

    Translation::Address {
        pa: PhysAddr::new(entry.physical_addr | (va.val() & entry.keep_mask)),
        asm: entry.asm,
    }
}
