//! Architectural fault definitions.
//!
//! This module defines the faults the core can raise during translation and
//! decode. It provides:
//! 1. **Fault Ordinals:** One variant per architectural fault, each carrying
//!    its fixed PAL entry-point offset.
//! 2. **PAL Dispatch:** The offset added to the PAL base when the fetch stage
//!    diverts the VPC into the handler.
//! 3. **Error Integration:** `Display`/`Error` impls for diagnostics; faults
//!    are ordinary values and never propagate out of the emulation loops.

use std::fmt;

/// An architectural fault, named by its PAL entry point.
///
/// The discriminants are the 21264 PAL entry-point offsets; dispatch adds
/// them to the PAL base register and sets the PAL bit of the VPC.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u64)]
pub enum Fault {
    /// Nested data-stream TB miss with 3-level page tables (`va_48` clear).
    DtbmDouble3 = 0x100,
    /// Nested data-stream TB miss with 4-level page tables (`va_48` set).
    DtbmDouble4 = 0x180,
    /// First data-stream TB miss.
    DtbmSingle = 0x300,
    /// Data access violation (TB hit, mode denied the access).
    Dfault = 0x380,
    /// Reserved or privileged opcode decoded outside PAL mode.
    OpcDec = 0x400,
    /// Instruction access violation (ITB hit, mode denied the fetch).
    Iacv = 0x480,
    /// Instruction-stream TB miss.
    ItbMiss = 0x580,
}

impl Fault {
    /// The PAL entry-point offset for this fault.
    #[inline]
    pub fn pal_offset(self) -> u64 {
        self as u64
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Fault::DtbmDouble3 => "DTBM_DOUBLE_3",
            Fault::DtbmDouble4 => "DTBM_DOUBLE_4",
            Fault::DtbmSingle => "DTBM_SINGLE",
            Fault::Dfault => "DFAULT",
            Fault::OpcDec => "OPCDEC",
            Fault::Iacv => "IACV",
            Fault::ItbMiss => "ITB_MISS",
        };
        write!(f, "{name}({:#x})", self.pal_offset())
    }
}

impl std::error::Error for Fault {}
