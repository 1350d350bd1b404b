//! Translation decision-tree tests.

use axp_core::common::addr::VirtAddr;
use axp_core::common::fault::Fault;
use axp_core::common::mode::{AccessKind, ProcessorMode};
use axp_core::common::pc::VirtPc;
use axp_core::core::mem::tlb::{TbPte, TransBuffer};
use axp_core::core::mem::translate::{
    SPE0_BIT, SPE1_BIT, SPE2_BIT, TranslateCtx, Translation, translate,
};
use pretty_assertions::assert_eq;
use rstest::rstest;

fn data_pte(asn: u8) -> TbPte {
    TbPte {
        gh: 0,
        asn,
        kre: true,
        kwe: true,
        fault_on_read: true,
        fault_on_write: true,
        ..TbPte::default()
    }
}

fn pa_of(t: Translation) -> u64 {
    match t {
        Translation::Address { pa, .. } => pa.val(),
        Translation::Fault(f) => panic!("unexpected fault {f}"),
    }
}

#[test]
fn pal_mode_maps_by_identity() {
    let mut ctx = TranslateCtx::default();
    let tb = TransBuffer::new(8, 8192);
    let pc = VirtPc::from_va(0x7000, true);
    let t = translate(
        &mut ctx,
        &tb,
        ProcessorMode::Kernel,
        0,
        0,
        VirtAddr::new(0xDEAD_F000),
        pc,
        true,
        AccessKind::Read,
    );
    assert_eq!(pa_of(t), 0xDEAD_F000);
}

#[test]
fn spe2_window_ignores_the_tb() {
    let mut ctx = TranslateCtx::default();
    // A conflicting TB entry must not be consulted.
    let mut tb = TransBuffer::new(8, 8192);
    let va = (0b10_u64 << 46) | 0x12_3456_8000;
    let _ = tb.insert(va, 0x7777_0000, &data_pte(0));

    let pc = VirtPc::from_va(0x1000, false);
    let t = translate(
        &mut ctx,
        &tb,
        ProcessorMode::Kernel,
        0,
        SPE2_BIT,
        VirtAddr::new(va),
        pc,
        true,
        AccessKind::Read,
    );
    match t {
        Translation::Address { pa, asm } => {
            assert_eq!(pa.val(), va & 0x0000_0FFF_FFFF_FFFF);
            assert!(!asm);
        }
        Translation::Fault(f) => panic!("unexpected fault {f}"),
    }
}

#[test]
fn spe1_window_replicates_va_bit_40() {
    let mut ctx = TranslateCtx::default();
    let tb = TransBuffer::new(8, 8192);
    let pc = VirtPc::from_va(0x1000, false);

    let low = (0b111_1110_u64 << 41) | 0x1234_2000;
    let t = translate(
        &mut ctx,
        &tb,
        ProcessorMode::Kernel,
        0,
        SPE1_BIT,
        VirtAddr::new(low),
        pc,
        true,
        AccessKind::Read,
    );
    assert_eq!(pa_of(t), 0x1234_2000);

    let high = (0b111_1110_u64 << 41) | (1 << 40) | 0x1234_2000;
    let t = translate(
        &mut ctx,
        &tb,
        ProcessorMode::Kernel,
        0,
        SPE1_BIT,
        VirtAddr::new(high),
        pc,
        true,
        AccessKind::Read,
    );
    assert_eq!(pa_of(t), 0x0000_0E00_0000_0000 | (1 << 40) | 0x1234_2000);
}

#[test]
fn spe0_window_keeps_the_low_30_bits() {
    let mut ctx = TranslateCtx::default();
    let tb = TransBuffer::new(8, 8192);
    let pc = VirtPc::from_va(0x1000, false);
    let va = (0x3_FFFE_u64 << 30) | 0x2BCD_E000;
    let t = translate(
        &mut ctx,
        &tb,
        ProcessorMode::Kernel,
        0,
        SPE0_BIT,
        VirtAddr::new(va),
        pc,
        true,
        AccessKind::Read,
    );
    assert_eq!(pa_of(t), 0x2BCD_E000);
}

#[test]
fn superpages_require_kernel_mode() {
    let mut ctx = TranslateCtx::default();
    let tb = TransBuffer::new(8, 8192);
    let pc = VirtPc::from_va(0x1000, false);
    let va = (0b10_u64 << 46) | 0x8000;
    let t = translate(
        &mut ctx,
        &tb,
        ProcessorMode::User,
        0,
        SPE2_BIT,
        VirtAddr::new(va),
        pc,
        true,
        AccessKind::Read,
    );
    // Falls through to the (empty) TB and misses.
    assert_eq!(t, Translation::Fault(Fault::DtbmSingle));
}

#[test]
fn tb_hit_composes_base_and_kept_offset() {
    let mut ctx = TranslateCtx::default();
    let mut tb = TransBuffer::new(8, 8192);
    let _ = tb.insert(0x4000, 0x9_C000, &data_pte(3));
    let pc = VirtPc::from_va(0x1000, false);
    let t = translate(
        &mut ctx,
        &tb,
        ProcessorMode::Kernel,
        3,
        0,
        VirtAddr::new(0x4123),
        pc,
        true,
        AccessKind::Read,
    );
    assert_eq!(pa_of(t), 0x9_C123);
}

#[test]
fn translation_is_a_function_of_state() {
    let mut ctx = TranslateCtx::default();
    let mut tb = TransBuffer::new(8, 8192);
    let _ = tb.insert(0x4000, 0x9_C000, &data_pte(0));
    let pc = VirtPc::from_va(0x1000, false);
    let once = pa_of(translate(
        &mut ctx,
        &tb,
        ProcessorMode::Kernel,
        0,
        0,
        VirtAddr::new(0x4440),
        pc,
        true,
        AccessKind::Read,
    ));
    let twice = pa_of(translate(
        &mut ctx,
        &tb,
        ProcessorMode::Kernel,
        0,
        0,
        VirtAddr::new(0x4440),
        pc,
        true,
        AccessKind::Read,
    ));
    assert_eq!(once, twice);
}

#[test]
fn nested_data_misses_escalate_to_double() {
    let mut ctx = TranslateCtx::default();
    let tb = TransBuffer::new(8, 8192);
    let pc = VirtPc::from_va(0x1000, false);

    let first = translate(
        &mut ctx,
        &tb,
        ProcessorMode::Kernel,
        0,
        0,
        VirtAddr::new(0x6000),
        pc,
        true,
        AccessKind::Read,
    );
    assert_eq!(first, Translation::Fault(Fault::DtbmSingle));
    assert!(ctx.tb_miss_outstanding);

    let second = translate(
        &mut ctx,
        &tb,
        ProcessorMode::Kernel,
        0,
        0,
        VirtAddr::new(0x8000),
        pc,
        true,
        AccessKind::Read,
    );
    assert_eq!(second, Translation::Fault(Fault::DtbmDouble3));
}

#[test]
fn va_48_selects_the_four_level_double_miss() {
    let mut ctx = TranslateCtx {
        va_48: true,
        tb_miss_outstanding: true,
        ..TranslateCtx::default()
    };
    let tb = TransBuffer::new(8, 8192);
    let pc = VirtPc::from_va(0x1000, false);
    let t = translate(
        &mut ctx,
        &tb,
        ProcessorMode::Kernel,
        0,
        0,
        VirtAddr::new(0x6000),
        pc,
        true,
        AccessKind::Read,
    );
    assert_eq!(t, Translation::Fault(Fault::DtbmDouble4));
}

#[test]
fn successful_lookup_clears_the_outstanding_miss() {
    let mut ctx = TranslateCtx::default();
    let mut tb = TransBuffer::new(8, 8192);
    let _ = tb.insert(0x4000, 0xC000, &data_pte(0));
    let pc = VirtPc::from_va(0x1000, false);

    let miss = translate(
        &mut ctx,
        &tb,
        ProcessorMode::Kernel,
        0,
        0,
        VirtAddr::new(0x2000),
        pc,
        true,
        AccessKind::Read,
    );
    assert_eq!(miss, Translation::Fault(Fault::DtbmSingle));

    let _ = pa_of(translate(
        &mut ctx,
        &tb,
        ProcessorMode::Kernel,
        0,
        0,
        VirtAddr::new(0x4000),
        pc,
        true,
        AccessKind::Read,
    ));
    assert!(!ctx.tb_miss_outstanding);
}

#[test]
fn instruction_stream_miss_raises_itb_miss() {
    let mut ctx = TranslateCtx::default();
    let tb = TransBuffer::new(8, 8192);
    let pc = VirtPc::from_va(0x2000, false);
    let t = translate(
        &mut ctx,
        &tb,
        ProcessorMode::Kernel,
        0,
        0,
        VirtAddr::new(0x2000),
        pc,
        false,
        AccessKind::Execute,
    );
    assert_eq!(t, Translation::Fault(Fault::ItbMiss));
    assert_eq!(ctx.exc_addr, Some(pc));
}

#[rstest]
#[case(ProcessorMode::Kernel, AccessKind::Read, true)]
#[case(ProcessorMode::Kernel, AccessKind::Write, true)]
#[case(ProcessorMode::Kernel, AccessKind::Modify, true)]
#[case(ProcessorMode::User, AccessKind::Read, false)]
#[case(ProcessorMode::User, AccessKind::Write, false)]
#[case(ProcessorMode::Supervisor, AccessKind::Read, false)]
fn kernel_only_page_access_matrix(
    #[case] mode: ProcessorMode,
    #[case] access: AccessKind,
    #[case] allowed: bool,
) {
    let mut ctx = TranslateCtx::default();
    let mut tb = TransBuffer::new(8, 8192);
    let _ = tb.insert(0x4000, 0xC000, &data_pte(0));
    let pc = VirtPc::from_va(0x1000, false);
    let t = translate(
        &mut ctx,
        &tb,
        mode,
        0,
        0,
        VirtAddr::new(0x4000),
        pc,
        true,
        access,
    );
    if allowed {
        assert_eq!(pa_of(t), 0xC000);
    } else {
        assert_eq!(t, Translation::Fault(Fault::Dfault));
    }
}

#[test]
fn instruction_access_violation_raises_iacv() {
    let mut ctx = TranslateCtx::default();
    let mut tb = TransBuffer::new(8, 8192);
    // Kernel-executable only.
    let pte = TbPte::instruction(0, 0, false, true, false, false, false);
    let _ = tb.insert(0x4000, 0xC000, &pte);
    let pc = VirtPc::from_va(0x4000, false);
    let t = translate(
        &mut ctx,
        &tb,
        ProcessorMode::User,
        0,
        0,
        VirtAddr::new(0x4000),
        pc,
        false,
        AccessKind::Execute,
    );
    assert_eq!(t, Translation::Fault(Fault::Iacv));
}
