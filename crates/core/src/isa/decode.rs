//! Decode dispatch tables and classification.
//!
//! One table entry per major opcode drives four classifications:
//! 1. **Format** — which instruction encoding the word uses.
//! 2. **Operation type** — the coarse kind (load, store, branch, ...), with
//!    a function-code refinement for the opcodes that mix kinds.
//! 3. **Register roles** — which of Ra/Rb/Rc (or their FP twins) act as
//!    destination, source 1, and source 2; six opcodes resolve their roles
//!    from function-code bits instead of a fixed mask.
//! 4. **Queue** — whether the instruction issues from the integer or the
//!    floating-point queue; the integer↔FP transfer opcodes route on the
//!    function code.

use super::instruction::InstructionBits;
use super::opcodes::*;

/// Instruction format, refined where the opcode alone is ambiguous.
///
/// `Cond` only appears inside the dispatch table: opcode 0x1C holds both
/// integer operates and FP transfers, so [`classify_format`] resolves it to
/// `Fp` or `Opr` before the tag escapes the decoder.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum InstrFormat {
    /// Integer conditional/unconditional branch.
    Bra,
    /// Floating-point conditional branch.
    FpBra,
    /// Floating-point operate.
    Fp,
    /// Memory (load/store/load-address).
    Mem,
    /// Memory-format branch (JMP/JSR/RET, BSR).
    Mbr,
    /// Memory-format with function code (barriers, RPCC).
    Mfc,
    /// Integer operate.
    Opr,
    /// PALcode call (CALL_PAL).
    Pcd,
    /// PALcode-reserved hardware format (HW_LD/HW_ST/HW_RET/HW_MxPR).
    Pal,
    /// Format depends on the function code (opcode 0x1C only).
    Cond,
    /// Reserved opcode.
    #[default]
    Res,
}

/// Coarse operation type used for quick dispatch at issue.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OperationType {
    /// Memory load (and load-like IPR reads).
    Load,
    /// Memory store (and store-like IPR writes).
    Store,
    /// Control transfer.
    Branch,
    /// Bitwise/compare logic.
    Logic,
    /// Arithmetic.
    Arith,
    /// Operate without a better class (AMASK, IMPLVER).
    Oper,
    /// Needs a function-code refinement, or reserved.
    #[default]
    Other,
}

/// Which issue queue an instruction routes to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum QueueSelect {
    /// Integer issue queue.
    Iq,
    /// Floating-point issue queue.
    Fq,
    /// Routed on function code (integer↔FP transfers).
    Cond,
    /// Not queued (reserved opcodes).
    #[default]
    None,
}

/// A register slot name within the instruction word.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegName {
    /// Integer register in the Ra field.
    Ra,
    /// Integer register in the Rb field.
    Rb,
    /// Integer register in the Rc field.
    Rc,
    /// FP register in the Ra field.
    Fa,
    /// FP register in the Rb field.
    Fb,
    /// FP register in the Rc field.
    Fc,
}

impl RegName {
    /// Whether this slot names a floating-point register.
    #[inline]
    pub fn is_float(self) -> bool {
        matches!(self, RegName::Fa | RegName::Fb | RegName::Fc)
    }

    /// The architectural register number this slot selects in `word`.
    #[inline]
    pub fn arch_of(self, word: u32) -> u8 {
        match self {
            RegName::Ra | RegName::Fa => word.ra(),
            RegName::Rb | RegName::Fb => word.rb(),
            RegName::Rc | RegName::Fc => word.rc(),
        }
    }
}

/// Resolved destination/source roles for one instruction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RegRoles {
    /// Destination slot, if the instruction writes a register.
    pub dest: Option<RegName>,
    /// First source slot.
    pub src1: Option<RegName>,
    /// Second source slot.
    pub src2: Option<RegName>,
}

impl RegRoles {
    const fn new(dest: Option<RegName>, src1: Option<RegName>, src2: Option<RegName>) -> Self {
        Self { dest, src1, src2 }
    }
}

/// How an opcode's register roles are found.
enum RoleTable {
    /// Fixed mask, independent of the function code.
    Fixed(RegRoles),
    /// Resolved by inspecting function-code bits of the word.
    ByFunction(fn(u32) -> RegRoles),
}

/// One dispatch-table row.
struct OpcodeEntry {
    format: InstrFormat,
    op_type: OperationType,
    roles: RoleTable,
    queue: QueueSelect,
}

const N: Option<RegName> = None;
const RA: Option<RegName> = Some(RegName::Ra);
const RB: Option<RegName> = Some(RegName::Rb);
const FA: Option<RegName> = Some(RegName::Fa);
const RC: Option<RegName> = Some(RegName::Rc);

const fn entry(
    format: InstrFormat,
    op_type: OperationType,
    roles: RegRoles,
    queue: QueueSelect,
) -> OpcodeEntry {
    OpcodeEntry {
        format,
        op_type,
        roles: RoleTable::Fixed(roles),
        queue,
    }
}

const fn entry_fn(
    format: InstrFormat,
    op_type: OperationType,
    roles: fn(u32) -> RegRoles,
    queue: QueueSelect,
) -> OpcodeEntry {
    OpcodeEntry {
        format,
        op_type,
        roles: RoleTable::ByFunction(roles),
        queue,
    }
}

const fn reserved() -> OpcodeEntry {
    entry(
        InstrFormat::Res,
        OperationType::Other,
        RegRoles::new(N, N, N),
        QueueSelect::None,
    )
}

/// The decode dispatch table, indexed by major opcode.
#[rustfmt::skip]
static DECODE_TABLE: [OpcodeEntry; 64] = {
    use InstrFormat::{Bra, Fp, FpBra, Mbr, Mem, Mfc, Opr, Pal, Pcd};
    use OperationType::{Arith, Branch, Load, Logic, Oper, Other, Store};
    use QueueSelect::{Fq, Iq};
    [
        /* 00 CALL_PAL */ entry(Pcd, Branch, RegRoles::new(N, N, N), Iq),
        /* 01..07 reserved */
        reserved(), reserved(), reserved(), reserved(),
        reserved(), reserved(), reserved(),
        /* 08 LDA    */ entry(Mem, Load, RegRoles::new(RA, RB, N), Iq),
        /* 09 LDAH   */ entry(Mem, Load, RegRoles::new(RA, RB, N), Iq),
        /* 0A LDBU   */ entry(Mem, Load, RegRoles::new(RA, RB, N), Iq),
        /* 0B LDQ_U  */ entry(Mem, Load, RegRoles::new(RA, RB, N), Iq),
        /* 0C LDWU   */ entry(Mem, Load, RegRoles::new(RA, RB, N), Iq),
        /* 0D STW    */ entry(Mem, Store, RegRoles::new(N, RA, RB), Iq),
        /* 0E STB    */ entry(Mem, Store, RegRoles::new(N, RA, RB), Iq),
        /* 0F STQ_U  */ entry(Mem, Store, RegRoles::new(N, RA, RB), Iq),
        /* 10 INTA   */ entry(Opr, Other, RegRoles::new(RC, RA, RB), Iq),
        /* 11 INTL   */ entry_fn(Opr, Other, roles_opcode_11, Iq),
        /* 12 INTS   */ entry(Opr, Logic, RegRoles::new(RC, RA, RB), Iq),
        /* 13 INTM   */ entry(Opr, Oper, RegRoles::new(RC, RA, RB), Iq),
        /* 14 ITFP   */ entry_fn(Fp, Arith, roles_opcode_14, QueueSelect::Cond),
        /* 15 FLTV   */ entry_fn(Fp, Other, roles_opcode_15_16, Fq),
        /* 16 FLTI   */ entry_fn(Fp, Other, roles_opcode_15_16, Fq),
        /* 17 FLTL   */ entry_fn(Fp, Other, roles_opcode_17, Fq),
        /* 18 MISC   */ entry_fn(Mfc, Other, roles_opcode_18, Iq),
        /* 19 HW_MFPR */ entry(Pal, Load, RegRoles::new(RA, N, N), Iq),
        /* 1A JMP    */ entry(Mbr, Branch, RegRoles::new(RA, RB, N), Iq),
        /* 1B HW_LD  */ entry(Pal, Load, RegRoles::new(RA, RB, N), Iq),
        /* 1C FPTI   */ entry_fn(InstrFormat::Cond, Arith, roles_opcode_1c, QueueSelect::Cond),
        /* 1D HW_MTPR */ entry(Pal, Store, RegRoles::new(N, RB, N), Iq),
        /* 1E HW_RET */ entry(Pal, Branch, RegRoles::new(N, RB, N), Iq),
        /* 1F HW_ST  */ entry(Pal, Store, RegRoles::new(N, RA, RB), Iq),
        /* 20 LDF    */ entry(Mem, Load, RegRoles::new(FA, RB, N), Iq),
        /* 21 LDG    */ entry(Mem, Load, RegRoles::new(FA, RB, N), Iq),
        /* 22 LDS    */ entry(Mem, Load, RegRoles::new(FA, RB, N), Iq),
        /* 23 LDT    */ entry(Mem, Load, RegRoles::new(FA, RB, N), Iq),
        /* 24 STF    */ entry(Mem, Store, RegRoles::new(N, FA, RB), Fq),
        /* 25 STG    */ entry(Mem, Store, RegRoles::new(N, FA, RB), Fq),
        /* 26 STS    */ entry(Mem, Store, RegRoles::new(N, FA, RB), Fq),
        /* 27 STT    */ entry(Mem, Store, RegRoles::new(N, FA, RB), Fq),
        /* 28 LDL    */ entry(Mem, Load, RegRoles::new(RA, RB, N), Iq),
        /* 29 LDQ    */ entry(Mem, Load, RegRoles::new(RA, RB, N), Iq),
        /* 2A LDL_L  */ entry(Mem, Load, RegRoles::new(RA, RB, N), Iq),
        /* 2B LDQ_L  */ entry(Mem, Load, RegRoles::new(RA, RB, N), Iq),
        /* 2C STL    */ entry(Mem, Store, RegRoles::new(N, RA, RB), Iq),
        /* 2D STQ    */ entry(Mem, Store, RegRoles::new(N, RA, RB), Iq),
        /* 2E STL_C  */ entry(Mem, Store, RegRoles::new(N, RA, RB), Iq),
        /* 2F STQ_C  */ entry(Mem, Store, RegRoles::new(N, RA, RB), Iq),
        /* 30 BR     */ entry(Bra, Branch, RegRoles::new(RA, N, N), Iq),
        /* 31 FBEQ   */ entry(FpBra, Branch, RegRoles::new(N, FA, N), Fq),
        /* 32 FBLT   */ entry(FpBra, Branch, RegRoles::new(N, FA, N), Fq),
        /* 33 FBLE   */ entry(FpBra, Branch, RegRoles::new(N, FA, N), Fq),
        /* 34 BSR    */ entry(Mbr, Branch, RegRoles::new(RA, N, N), Iq),
        /* 35 FBNE   */ entry(FpBra, Branch, RegRoles::new(N, FA, N), Fq),
        /* 36 FBGE   */ entry(FpBra, Branch, RegRoles::new(N, FA, N), Fq),
        /* 37 FBGT   */ entry(FpBra, Branch, RegRoles::new(N, FA, N), Fq),
        /* 38 BLBC   */ entry(Bra, Branch, RegRoles::new(N, RA, N), Iq),
        /* 39 BEQ    */ entry(Bra, Branch, RegRoles::new(N, RA, N), Iq),
        /* 3A BLT    */ entry(Bra, Branch, RegRoles::new(N, RA, N), Iq),
        /* 3B BLE    */ entry(Bra, Branch, RegRoles::new(N, RA, N), Iq),
        /* 3C BLBS   */ entry(Bra, Branch, RegRoles::new(N, RA, N), Iq),
        /* 3D BNE    */ entry(Bra, Branch, RegRoles::new(N, RA, N), Iq),
        /* 3E BGE    */ entry(Bra, Branch, RegRoles::new(N, RA, N), Iq),
        /* 3F BGT    */ entry(Bra, Branch, RegRoles::new(N, RA, N), Iq),
    ]
};

/// Classifies the instruction format of a raw word.
///
/// Opcode 0x1C carries two formats: functions 0x70/0x78 (the FP→integer
/// transfers) are FP-format, everything else is an integer operate.
pub fn classify_format(word: u32) -> InstrFormat {
    let format = DECODE_TABLE[word.opcode() as usize].format;
    if format == InstrFormat::Cond {
        if word.oper_func() == FN_FTOIT || word.oper_func() == FN_FTOIS {
            InstrFormat::Fp
        } else {
            InstrFormat::Opr
        }
    } else {
        format
    }
}

/// The operation type for an opcode/function pair.
///
/// Starts from the table entry; `Other` entries are refined from the
/// function code for the mixed-kind opcodes.
pub fn operation_type(opcode: u8, function: u32) -> OperationType {
    let ty = DECODE_TABLE[(opcode & 0x3F) as usize].op_type;
    if ty != OperationType::Other {
        return ty;
    }
    match opcode {
        OP_INTA => {
            if function == FN_CMPBGE {
                OperationType::Logic
            } else {
                OperationType::Arith
            }
        }
        OP_INTL => {
            if function == FN_AMASK || function == FN_IMPLVER {
                OperationType::Oper
            } else {
                OperationType::Logic
            }
        }
        OP_FLTV => match function {
            FN_CMPGEQ | FN_CMPGLT | FN_CMPGLE | FN_CMPGEQ_S | FN_CMPGLT_S | FN_CMPGLE_S => {
                OperationType::Logic
            }
            _ => OperationType::Arith,
        },
        OP_FLTI => match function {
            FN_CMPTUN | FN_CMPTEQ | FN_CMPTLT | FN_CMPTLE | FN_CMPTUN_SU | FN_CMPTEQ_SU
            | FN_CMPTLT_SU | FN_CMPTLE_SU => OperationType::Logic,
            _ => OperationType::Arith,
        },
        OP_FLTL => match function {
            FN_MT_FPCR => OperationType::Load,
            FN_MF_FPCR => OperationType::Store,
            _ => OperationType::Arith,
        },
        OP_MISC => match function {
            FN_RPCC | FN_RC | FN_RS => OperationType::Load,
            _ => OperationType::Store,
        },
        _ => OperationType::Other,
    }
}

/// The register roles for a raw instruction word.
pub fn register_roles(word: u32) -> RegRoles {
    match &DECODE_TABLE[word.opcode() as usize].roles {
        RoleTable::Fixed(roles) => *roles,
        RoleTable::ByFunction(f) => f(word),
    }
}

/// The issue queue for an opcode/function pair.
///
/// Resolves the conditional transfers: an INT→FP move reads an integer
/// source and issues from the IQ; an FP→INT move reads an FP source and
/// issues from the FQ.
pub fn queue_for(opcode: u8, function: u32) -> QueueSelect {
    match DECODE_TABLE[(opcode & 0x3F) as usize].queue {
        QueueSelect::Cond => {
            if opcode == OP_ITFP {
                match function {
                    FN_ITOFS | FN_ITOFF | FN_ITOFT => QueueSelect::Iq,
                    _ => QueueSelect::Fq,
                }
            } else {
                // FPTI
                match function {
                    FN_FTOIT | FN_FTOIS => QueueSelect::Fq,
                    _ => QueueSelect::Iq,
                }
            }
        }
        other => other,
    }
}

/// Format-dependent scalar fields of a decoded instruction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InstrFields {
    /// Function code (operate/FP/memory-function/PAL formats).
    pub function: u32,
    /// Branch or memory displacement, sign-extended.
    pub displacement: i64,
    /// HW_LD type, HW_RET hint, or HW_MxPR IPR index.
    pub type_hint_index: u16,
    /// HW_LD length or HW_RET stall bit.
    pub len_stall: u8,
    /// HW_MxPR scoreboard mask.
    pub scbd_mask: u8,
}

/// Extracts the format-dependent fields of a raw word.
pub fn instr_fields(word: u32, format: InstrFormat) -> InstrFields {
    let mut fields = InstrFields::default();
    match format {
        InstrFormat::Bra | InstrFormat::FpBra => {
            fields.displacement = word.branch_disp();
        }
        InstrFormat::Fp => {
            fields.function = word.fp_func();
        }
        InstrFormat::Mem | InstrFormat::Mbr => {
            fields.displacement = word.mem_disp();
        }
        InstrFormat::Mfc => {
            fields.function = word.mem_func();
        }
        InstrFormat::Opr => {
            fields.function = word.oper_func();
        }
        InstrFormat::Pcd => {
            fields.function = word.pal_func();
        }
        InstrFormat::Pal => match word.opcode() {
            OP_HW_LD | OP_HW_ST => {
                fields.displacement = word.hw_disp();
                fields.type_hint_index = word.hw_type();
                fields.len_stall = word.hw_len();
            }
            OP_HW_RET => {
                fields.displacement = word.hw_disp();
                fields.type_hint_index = word.hw_hint();
                fields.len_stall = word.hw_stall();
            }
            OP_HW_MFPR | OP_HW_MTPR => {
                fields.type_hint_index = word.hw_index();
                fields.scbd_mask = word.hw_scbd_mask();
            }
            _ => {}
        },
        InstrFormat::Cond | InstrFormat::Res => {}
    }
    fields
}

fn roles_opcode_11(word: u32) -> RegRoles {
    match word.oper_func() {
        FN_AMASK => RegRoles::new(RC, RB, N),
        FN_IMPLVER => RegRoles::new(RC, N, N),
        _ => RegRoles::new(RC, RA, RB),
    }
}

fn roles_opcode_14(word: u32) -> RegRoles {
    // ITOF* carries an integer source in the Rb slot; the square roots
    // read an FP source there.
    if (word.fp_func() & 0x00F) == 0x004 {
        RegRoles::new(Some(RegName::Fc), RB, N)
    } else {
        RegRoles::new(Some(RegName::Fc), Some(RegName::Fb), N)
    }
}

fn roles_opcode_15_16(word: u32) -> RegRoles {
    // Converts (function bit 3 set) are single-source.
    if (word.fp_func() & 0x008) == 0 {
        RegRoles::new(Some(RegName::Fc), FA, Some(RegName::Fb))
    } else {
        RegRoles::new(Some(RegName::Fc), Some(RegName::Fb), N)
    }
}

fn roles_opcode_17(word: u32) -> RegRoles {
    match word.fp_func() {
        FN_CVTLQ | FN_CVTQL | FN_CVTQL_V | FN_CVTQL_SV => {
            RegRoles::new(Some(RegName::Fc), Some(RegName::Fb), N)
        }
        FN_MT_FPCR => RegRoles::new(FA, N, N),
        FN_MF_FPCR => RegRoles::new(N, FA, N),
        _ => RegRoles::new(Some(RegName::Fc), FA, Some(RegName::Fb)),
    }
}

fn roles_opcode_18(word: u32) -> RegRoles {
    let func = word.mem_func();
    if func & 0x8000 != 0 {
        if func == FN_RPCC || func == FN_RC || func == FN_RS {
            RegRoles::new(RA, N, N)
        } else {
            RegRoles::new(N, RB, N)
        }
    } else {
        RegRoles::new(N, N, N)
    }
}

fn roles_opcode_1c(word: u32) -> RegRoles {
    match word.oper_func() {
        0x31 | 0x37 | 0x38..=0x3F => RegRoles::new(RC, RA, RB),
        FN_FTOIT | FN_FTOIS => RegRoles::new(RC, FA, N),
        _ => RegRoles::new(RC, RB, N),
    }
}
