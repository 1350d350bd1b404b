//! Alpha AXP opcode and function-code constants.
//!
//! Defines the major opcodes (bits 31:26) and the function codes the decode
//! tables key on. Only the function codes that change an instruction's
//! operation type, register roles, or queue routing are named here; the
//! executor owns the full per-function semantics.

/// CALL_PAL — trap to PALcode.
pub const OP_CALL_PAL: u8 = 0x00;
/// Integer arithmetic operate group (ADDL..CMPBGE).
pub const OP_INTA: u8 = 0x10;
/// Integer logical operate group (AND..IMPLVER).
pub const OP_INTL: u8 = 0x11;
/// Integer shift/byte-manipulation group.
pub const OP_INTS: u8 = 0x12;
/// Integer multiply group.
pub const OP_INTM: u8 = 0x13;
/// Integer-to-FP transfer and FP square-root group.
pub const OP_ITFP: u8 = 0x14;
/// VAX floating-point operate group.
pub const OP_FLTV: u8 = 0x15;
/// IEEE floating-point operate group.
pub const OP_FLTI: u8 = 0x16;
/// FP data-movement group (CVTLQ, FPCR moves).
pub const OP_FLTL: u8 = 0x17;
/// Miscellaneous group (barriers, RPCC, prefetches).
pub const OP_MISC: u8 = 0x18;
/// HW_MFPR — move from internal processor register (PALcode reserved).
pub const OP_HW_MFPR: u8 = 0x19;
/// JMP/JSR/RET/JSR_COROUTINE.
pub const OP_JSR: u8 = 0x1A;
/// HW_LD — physical/lock load (PALcode reserved).
pub const OP_HW_LD: u8 = 0x1B;
/// FP-to-integer transfer and sign-extend/multimedia group.
pub const OP_FPTI: u8 = 0x1C;
/// HW_MTPR — move to internal processor register (PALcode reserved).
pub const OP_HW_MTPR: u8 = 0x1D;
/// HW_RET — return from PALcode.
pub const OP_HW_RET: u8 = 0x1E;
/// HW_ST — physical/conditional store (PALcode reserved).
pub const OP_HW_ST: u8 = 0x1F;
/// BR — unconditional branch.
pub const OP_BR: u8 = 0x30;
/// BSR — branch to subroutine.
pub const OP_BSR: u8 = 0x34;

/// INTA function: CMPBGE (the only compare-byte, typed as logic).
pub const FN_CMPBGE: u32 = 0x0F;

/// INTL function: AMASK.
pub const FN_AMASK: u32 = 0x61;
/// INTL function: IMPLVER.
pub const FN_IMPLVER: u32 = 0x6C;

/// ITFP function: ITOFS — integer to S_floating move.
pub const FN_ITOFS: u32 = 0x004;
/// ITFP function: ITOFF — integer to F_floating move.
pub const FN_ITOFF: u32 = 0x014;
/// ITFP function: ITOFT — integer to T_floating move.
pub const FN_ITOFT: u32 = 0x024;

/// FLTV function: CMPGEQ.
pub const FN_CMPGEQ: u32 = 0x0A5;
/// FLTV function: CMPGLT.
pub const FN_CMPGLT: u32 = 0x0A6;
/// FLTV function: CMPGLE.
pub const FN_CMPGLE: u32 = 0x0A7;
/// FLTV function: CMPGEQ/S.
pub const FN_CMPGEQ_S: u32 = 0x5A5;
/// FLTV function: CMPGLT/S.
pub const FN_CMPGLT_S: u32 = 0x5A6;
/// FLTV function: CMPGLE/S.
pub const FN_CMPGLE_S: u32 = 0x5A7;

/// FLTI function: CMPTUN.
pub const FN_CMPTUN: u32 = 0x0A4;
/// FLTI function: CMPTEQ.
pub const FN_CMPTEQ: u32 = 0x0A5;
/// FLTI function: CMPTLT.
pub const FN_CMPTLT: u32 = 0x0A6;
/// FLTI function: CMPTLE.
pub const FN_CMPTLE: u32 = 0x0A7;
/// FLTI function: CMPTUN/SU.
pub const FN_CMPTUN_SU: u32 = 0x5A4;
/// FLTI function: CMPTEQ/SU.
pub const FN_CMPTEQ_SU: u32 = 0x5A5;
/// FLTI function: CMPTLT/SU.
pub const FN_CMPTLT_SU: u32 = 0x5A6;
/// FLTI function: CMPTLE/SU.
pub const FN_CMPTLE_SU: u32 = 0x5A7;

/// FLTL function: CVTLQ.
pub const FN_CVTLQ: u32 = 0x010;
/// FLTL function: CVTQL.
pub const FN_CVTQL: u32 = 0x030;
/// FLTL function: CVTQL/V.
pub const FN_CVTQL_V: u32 = 0x130;
/// FLTL function: CVTQL/SV.
pub const FN_CVTQL_SV: u32 = 0x530;
/// FLTL function: MT_FPCR — move to FP control register.
pub const FN_MT_FPCR: u32 = 0x024;
/// FLTL function: MF_FPCR — move from FP control register.
pub const FN_MF_FPCR: u32 = 0x025;

/// MISC function: RPCC — read process cycle counter.
pub const FN_RPCC: u32 = 0xC000;
/// MISC function: RC — read and clear intr flag (VAX compatibility).
pub const FN_RC: u32 = 0xE000;
/// MISC function: RS — read and set intr flag (VAX compatibility).
pub const FN_RS: u32 = 0xF000;

/// FPTI function: FTOIT — T_floating to integer move.
pub const FN_FTOIT: u32 = 0x70;
/// FPTI function: FTOIS — S_floating to integer move.
pub const FN_FTOIS: u32 = 0x78;
