//! Icache tests: lookup classification, line/set prediction, fills,
//! and span invalidation.

use axp_core::common::constants::ICACHE_LINE_INS;
use axp_core::common::pc::VirtPc;
use axp_core::core::frontend::icache::{CacheStatus, ICache, IFetchOutcome};
use axp_core::core::mem::tlb::{TbPte, TransBuffer};
use pretty_assertions::assert_eq;

fn mapped_itb(va: u64, gh: u8) -> TransBuffer {
    let mut itb = TransBuffer::new(8, 8192);
    let pte = TbPte::instruction(gh, 0, false, true, true, true, true);
    let _ = itb.insert(va, va, &pte);
    itb
}

fn block_of(words: [u32; 4]) -> [u32; ICACHE_LINE_INS] {
    let mut block = [0u32; ICACHE_LINE_INS];
    block[..4].copy_from_slice(&words);
    block
}

#[test]
fn cold_cache_with_mapping_is_a_miss() {
    let icache = ICache::new(0b11);
    let itb = mapped_itb(0x1000, 0);
    let (status, _, _) = icache.is_valid(VirtPc::from_va(0x1000, false), &itb);
    assert_eq!(status, CacheStatus::Miss);
}

#[test]
fn cold_cache_without_mapping_is_a_way_miss() {
    let icache = ICache::new(0b11);
    let itb = TransBuffer::new(8, 8192);
    let (status, _, _) = icache.is_valid(VirtPc::from_va(0x1000, false), &itb);
    assert_eq!(status, CacheStatus::WayMiss);
}

#[test]
fn granularity_hint_widens_the_mapped_span() {
    let icache = ICache::new(0b11);
    // gh=1 maps eight contiguous pages from the base.
    let itb = mapped_itb(0x0000, 1);
    let inside = VirtPc::from_va(7 * 8192, false);
    let outside = VirtPc::from_va(8 * 8192, false);
    assert_eq!(icache.is_valid(inside, &itb).0, CacheStatus::Miss);
    assert_eq!(icache.is_valid(outside, &itb).0, CacheStatus::WayMiss);
}

#[test]
fn fill_then_fetch_hits_with_classified_formats() {
    let mut icache = ICache::new(0b11);
    let itb = mapped_itb(0x1000, 0);
    let pc = VirtPc::from_va(0x1000, false);

    // ADDQ r1, r2, r3 in every slot.
    let addq = (0x10u32 << 26) | (1 << 21) | (2 << 16) | (0x20 << 5) | 3;
    let entry = *itb.find(0x1000, 0).unwrap();
    icache.add(pc, &block_of([addq; 4]), &entry);

    match icache.fetch(pc, &itb) {
        IFetchOutcome::Hit(bundle) => {
            assert_eq!(bundle.words, [addq; 4]);
            assert_eq!(bundle.pcs[1], pc.incr());
            assert!(
                bundle
                    .formats
                    .iter()
                    .all(|f| *f == axp_core::isa::decode::InstrFormat::Opr)
            );
        }
        other => panic!("expected a hit, got {other:?}"),
    }
}

#[test]
fn mid_line_fetch_predicts_same_line_same_set() {
    let mut icache = ICache::new(0b11);
    let itb = mapped_itb(0x1000, 0);
    let pc = VirtPc::from_va(0x1000, false);
    let entry = *itb.find(0x1000, 0).unwrap();
    icache.add(pc, &block_of([0x4000_0000; 4]), &entry);

    let IFetchOutcome::Hit(bundle) = icache.fetch(pc, &itb) else {
        panic!("expected a hit");
    };
    // Offset 0 of a 16-instruction line: twelve instructions remain.
    assert_eq!(bundle.line_prediction, (pc.slot() >> 4) as u32 & 0x1FF);
    assert_eq!(bundle.set_prediction, (pc.slot() >> 13) as u32 & 1);
}

#[test]
fn line_end_fetch_steps_to_the_other_set() {
    let mut icache = ICache::new(0b11);
    // Slot 12 of the line: this fetch exhausts it.
    let pc = VirtPc::new(12, false);
    let itb = mapped_itb(0, 0);
    let entry = *itb.find(0, 0).unwrap();
    icache.add(pc, &[0x4000_0000; ICACHE_LINE_INS], &entry);

    let IFetchOutcome::Hit(bundle) = icache.fetch(pc, &itb) else {
        panic!("expected a hit");
    };
    // Both sets enabled, currently in set 0: predict same line, set 1.
    assert_eq!(bundle.line_prediction, 0);
    assert_eq!(bundle.set_prediction, 1);
}

#[test]
fn single_set_operation_steps_to_the_next_line() {
    let mut icache = ICache::new(0b01); // set 0 only
    let pc = VirtPc::new(12, false);
    let itb = mapped_itb(0, 0);
    let entry = *itb.find(0, 0).unwrap();
    icache.add(pc, &[0x4000_0000; ICACHE_LINE_INS], &entry);

    let IFetchOutcome::Hit(bundle) = icache.fetch(pc, &itb) else {
        panic!("expected a hit");
    };
    assert_eq!(bundle.line_prediction, 1);
    assert_eq!(bundle.set_prediction, 0);
}

#[test]
fn fill_copies_protection_and_pal_state() {
    let mut icache = ICache::new(0b11);
    let itb = mapped_itb(0x2000, 0);
    let pal_pc = VirtPc::from_va(0x2000, true);
    let entry = *itb.find(0x2000, 0).unwrap();
    icache.add(pal_pc, &block_of([0; 4]), &entry);
    // The PAL-tagged PC and the plain PC share the line; the contains
    // check only keys on tag and validity.
    assert!(icache.contains(pal_pc));
}

#[test]
fn span_invalidation_removes_exactly_the_mapped_lines() {
    let mut icache = ICache::new(0b11);
    let itb = mapped_itb(0x0000, 0);
    let entry = *itb.find(0, 0).unwrap();

    let inside = VirtPc::from_va(0x0000, false);
    let outside = VirtPc::from_va(0x4000, false);
    icache.add(inside, &block_of([1; 4]), &entry);
    icache.add(outside, &block_of([2; 4]), &entry);

    // Invalidate the one mapped page.
    icache.invalidate_span(0x0000, 8192);
    assert!(!icache.contains(inside));
    assert!(icache.contains(outside));
}

#[test]
fn flush_empties_every_line() {
    let mut icache = ICache::new(0b11);
    let itb = mapped_itb(0x1000, 0);
    let pc = VirtPc::from_va(0x1000, false);
    let entry = *itb.find(0x1000, 0).unwrap();
    icache.add(pc, &block_of([1; 4]), &entry);
    icache.flush();
    assert!(!icache.contains(pc));
}
