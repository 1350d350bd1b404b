//! End-to-end pipeline scenarios.
//!
//! These tests drive the real `Cpu` through its single-step entry points
//! (`fetch_step`, `mem_step`), pre-delivering memory-system replies so
//! each scenario runs deterministically on the test thread. A final smoke
//! test exercises the threaded stage model against the mock memory
//! system.

use std::time::Duration;

use axp_core::Config;
use axp_core::common::constants::ICACHE_LINE_INS;
use axp_core::common::fault::Fault;
use axp_core::common::pc::VirtPc;
use axp_core::core::frontend::fetch::{FetchStep, fetch_step};
use axp_core::core::frontend::icache::IFetchOutcome;
use axp_core::core::mem::tlb::TbPte;
use axp_core::core::mem::{MemOp, MemStep, mem_step};
use axp_core::core::{Cpu, CpuState};
use axp_core::sys::SysReply;
use pretty_assertions::assert_eq;

use crate::common::mocks::memory::MockMemorySystem;

fn addq(ra: u32, rb: u32, rc: u32) -> u32 {
    (0x10 << 26) | (ra << 21) | (rb << 16) | (0x20 << 5) | rc
}

fn bne(ra: u32, disp: u32) -> u32 {
    (0x3D << 26) | (ra << 21) | (disp & 0x1F_FFFF)
}

fn instruction_pte() -> TbPte {
    TbPte::instruction(0, 0, false, true, true, true, true)
}

fn data_pte() -> TbPte {
    TbPte {
        gh: 0,
        asn: 0,
        kre: true,
        kwe: true,
        fault_on_read: true,
        fault_on_write: true,
        ..TbPte::default()
    }
}

fn block_of(words: [u32; 4]) -> [u32; ICACHE_LINE_INS] {
    let mut block = [0u32; ICACHE_LINE_INS];
    block[..4].copy_from_slice(&words);
    block
}

/// ITB warm path: a mapped but uncached PC classifies as
/// `Miss`; after the fill the second fetch hits, decodes four
/// instructions, and predicts the same line and set.
#[test]
fn itb_warm_path_miss_then_hit() {
    let cpu = Cpu::new(Config::default());
    cpu.run();
    let _ = cpu.lock_itb().insert(0x1000, 0x1000, &instruction_pte());
    let pc = cpu.set_vpc(0x1000, false);

    // Cold Icache, warm ITB: a Miss, not a WayMiss.
    {
        let fetch = cpu.lock_fetch();
        let itb = cpu.lock_itb();
        assert!(matches!(fetch.icache.fetch(pc, &itb), IFetchOutcome::Miss));
    }

    // Pre-deliver the instruction fill the fetch stage will wait for.
    cpu.sys.deliver(SysReply::IstreamFill {
        entry: 0,
        pa: 0x1000,
        block: block_of([addq(1, 2, 3); 4]),
    });
    assert_eq!(fetch_step(&cpu), FetchStep::Filled);
    assert_eq!(fetch_step(&cpu), FetchStep::Decoded(4));

    let fetch = cpu.lock_fetch();
    assert_eq!(fetch.rob.len(), 4);
    // Four instructions out of a sixteen-instruction line: the next fetch
    // is predicted on the same line and set.
    assert_eq!(fetch.line_prediction, (pc.slot() >> 4) as u32 & 0x1FF);
    assert_eq!(fetch.set_prediction, (pc.slot() >> 13) as u32 & 1);
    drop(fetch);
    assert_eq!(cpu.iq.len(), 4);
}

/// An unmapped PC diverts the VPC to the ITB-miss PAL entry, recording
/// the excepting PC.
#[test]
fn way_miss_diverts_to_pal() {
    let config = Config {
        pal_base: 0x8000,
        ..Config::default()
    };
    let cpu = Cpu::new(config);
    cpu.run();
    let pc = cpu.set_vpc(0x3000, false);

    assert_eq!(fetch_step(&cpu), FetchStep::Diverted(Fault::ItbMiss));

    let vpc = cpu.lock_fetch().vpc.current();
    assert_eq!(vpc, VirtPc::from_va(0x8000 + 0x580, true));
    assert_eq!(cpu.lock_ctl().translate.exc_addr, Some(pc));
}

/// A reserved opcode in a fetched bundle raises OPCDEC.
#[test]
fn reserved_opcode_raises_opcdec() {
    let cpu = Cpu::new(Config::default());
    cpu.run();
    let _ = cpu.lock_itb().insert(0x1000, 0x1000, &instruction_pte());
    let pc = cpu.set_vpc(0x1000, false);
    {
        let entry = *cpu.lock_itb().find(0x1000, 0).unwrap();
        let mut fetch = cpu.lock_fetch();
        fetch
            .icache
            .add(pc, &block_of([addq(1, 2, 3), 0x01 << 26, 0, 0]), &entry);
    }

    assert_eq!(fetch_step(&cpu), FetchStep::Diverted(Fault::OpcDec));
    // The instruction ahead of the reserved one still decoded.
    assert_eq!(cpu.lock_fetch().rob.len(), 1);
}

/// Retirement is in order, updates the predictor for branches, and frees
/// queue entries; fault recovery unwinds rename state newest-first.
#[test]
fn retire_in_order_and_recover_after_fault() {
    let cpu = Cpu::new(Config::default());
    cpu.run();
    let _ = cpu.lock_itb().insert(0x1000, 0x1000, &instruction_pte());
    let pc = cpu.set_vpc(0x1000, false);
    {
        let entry = *cpu.lock_itb().find(0x1000, 0).unwrap();
        let mut fetch = cpu.lock_fetch();
        fetch.icache.add(
            pc,
            &block_of([addq(1, 2, 3), bne(3, 0x10), addq(3, 4, 5), addq(5, 6, 7)]),
            &entry,
        );
    }

    let (p5_before, p7_before) = {
        let fetch = cpu.lock_fetch();
        (fetch.rename.int.lookup(5), fetch.rename.int.lookup(7))
    };

    assert_eq!(fetch_step(&cpu), FetchStep::Decoded(4));
    let ids: Vec<u8> = {
        let fetch = cpu.lock_fetch();
        (0..4).map(|i| fetch.rob.get(i).id).collect()
    };

    // Nothing retires before execution completes.
    assert!(cpu.retire().is_none());

    assert!(cpu.mark_executed(ids[0]));
    let retired = cpu.retire().expect("head retires once executed");
    assert_eq!(retired.id, ids[0]);

    // The branch retires with its recorded outcome.
    assert!(cpu.set_branch_outcome(ids[1], false));
    assert!(cpu.mark_executed(ids[1]));
    let branch = cpu.retire().expect("branch retires");
    assert!(branch.prediction.is_some());

    // The branch was mispredicted: squash everything younger.
    let squashed = cpu.recover(ids[1]);
    assert_eq!(squashed, 2);
    let fetch = cpu.lock_fetch();
    assert_eq!(fetch.rename.int.lookup(5), p5_before);
    assert_eq!(fetch.rename.int.lookup(7), p7_before);
    drop(fetch);
    // Retirement released two entries and recovery removed the squashed
    // two: the queue pool is whole again.
    assert_eq!(cpu.iq.len(), 0);

    // The executor then steers fetch down the taken path.
    let current = cpu.lock_fetch().vpc.current();
    let target = cpu.displace_vpc(0x10);
    assert_eq!(target.slot(), current.slot() + 1 + 0x10);
    assert_eq!(cpu.lock_fetch().vpc.current(), target);
}

/// Loads and stores flow through DTB translation and the
/// Dcache, with the fill delivered by the memory system.
#[test]
fn load_then_store_through_the_dcache() {
    let cpu = Cpu::new(Config::default());
    cpu.run();
    let _ = cpu.lock_dtb().insert(0x6000, 0x5_0000, &data_pte());
    let pc = VirtPc::from_va(0x1000, false);

    let mut fill = [0u8; 64];
    for (i, byte) in fill.iter_mut().enumerate() {
        *byte = i as u8;
    }
    cpu.sys.deliver(SysReply::DataFill {
        entry: 9,
        pa: 0x5_0000,
        data: fill,
        shared: false,
    });

    cpu.issue_load(MemOp::load(9, pc, 0x6008, 8)).unwrap();
    assert_eq!(mem_step(&cpu), MemStep::Completed);
    {
        let completions = cpu.completions.lock().unwrap();
        assert_eq!(completions.len(), 1);
        assert_eq!(completions[0].data, [8, 9, 10, 11, 12, 13, 14, 15]);
    }

    // The block is resident now: the store needs no further fill.
    cpu.issue_store(MemOp::store(10, pc, 0x6008, 8, 0x0102_0304_0506_0708))
        .unwrap();
    assert_eq!(mem_step(&cpu), MemStep::Completed);

    let writebacks = cpu.lock_dcache().flush();
    assert_eq!(writebacks.len(), 1);
    assert_eq!(writebacks[0].pa, 0x5_0000);
    assert_eq!(writebacks[0].data[8..16], 0x0102_0304_0506_0708_u64.to_le_bytes());
}

/// Displacing an ITB entry invalidates every Icache line it mapped.
#[test]
fn itb_displacement_evicts_the_mapped_icache_lines() {
    let config = Config {
        tb: axp_core::config::TbConfig {
            entries: 1,
            ..axp_core::config::TbConfig::default()
        },
        ..Config::default()
    };
    let cpu = Cpu::new(config);
    cpu.run();

    cpu.itb_insert(0x1000, 0x1000, &instruction_pte());
    let pc = VirtPc::from_va(0x1000, false);
    {
        let entry = *cpu.lock_itb().find(0x1000, 0).unwrap();
        cpu.lock_fetch()
            .icache
            .add(pc, &block_of([addq(1, 2, 3); 4]), &entry);
    }
    assert!(cpu.lock_fetch().icache.contains(pc));

    // The one-entry ITB displaces the old mapping; its lines go with it.
    cpu.itb_insert(0x1_0000, 0x1_0000, &instruction_pte());
    assert!(!cpu.lock_fetch().icache.contains(pc));
}

/// Invalidate-all on the instruction side clears the ITB and the Icache.
#[test]
fn tbia_clears_itb_and_icache() {
    let cpu = Cpu::new(Config::default());
    cpu.run();
    cpu.itb_insert(0x1000, 0x1000, &instruction_pte());
    let pc = VirtPc::from_va(0x1000, false);
    {
        let entry = *cpu.lock_itb().find(0x1000, 0).unwrap();
        cpu.lock_fetch()
            .icache
            .add(pc, &block_of([addq(1, 2, 3); 4]), &entry);
    }

    cpu.tbia(false);
    assert_eq!(cpu.lock_itb().valid_count(), 0);
    assert!(!cpu.lock_fetch().icache.contains(pc));

    // Re-adding after the purge restores the mapping (tbia → add → find).
    cpu.itb_insert(0x1000, 0x1000, &instruction_pte());
    assert!(cpu.lock_itb().find(0x1000, 0).is_some());

    // tbis removes exactly one mapping in the current address space.
    cpu.dtb_insert(0x6000, 0x6000, &data_pte());
    cpu.tbis(0x6000, true);
    assert!(cpu.lock_dtb().find(0x6000, 0).is_none());
}

/// Kernel-mode loads inside an enabled superpage window bypass the DTB
/// entirely.
#[test]
fn kernel_superpage_load_bypasses_the_dtb() {
    let cpu = Cpu::new(Config::default());
    cpu.run();
    cpu.set_mode(axp_core::common::mode::ProcessorMode::Kernel);
    cpu.set_spe(0, 0b100); // SPE2 for the data stream

    let va = (0b10_u64 << 46) | 0x9_0040;
    let pa_block = 0x9_0040_u64 & !0x3F;
    let mut fill = [0u8; 64];
    fill[0] = 0x42;
    cpu.sys.deliver(SysReply::DataFill {
        entry: 3,
        pa: pa_block,
        data: fill,
        shared: false,
    });

    let pc = VirtPc::from_va(0x1000, false);
    cpu.issue_load(MemOp::load(3, pc, va, 4)).unwrap();
    assert_eq!(mem_step(&cpu), MemStep::Completed);
    let completions = cpu.completions.lock().unwrap();
    assert_eq!(completions[0].data[0], 0x42);
}

/// Back-to-back DTB misses raise the single- then the
/// double-miss fault, and the VPC lands on the PAL handler.
#[test]
fn nested_dtb_misses_escalate() {
    let cpu = Cpu::new(Config::default());
    cpu.run();
    let pc = VirtPc::from_va(0x1000, false);

    cpu.issue_load(MemOp::load(1, pc, 0x6000, 8)).unwrap();
    cpu.issue_load(MemOp::load(2, pc, 0x8000, 8)).unwrap();

    assert_eq!(mem_step(&cpu), MemStep::Faulted(Fault::DtbmSingle));
    assert_eq!(
        cpu.lock_fetch().vpc.current(),
        VirtPc::from_va(Fault::DtbmSingle.pal_offset(), true)
    );
    assert_eq!(mem_step(&cpu), MemStep::Faulted(Fault::DtbmDouble3));
}

/// The threaded stage model makes forward progress against the mock
/// memory system and tears down cleanly.
#[test]
fn threaded_stages_run_and_halt() {
    let mut mock = MockMemorySystem::new();
    // Leave the istream unseeded: zero blocks decode as CALL_PAL, which
    // is enough to fill the pipeline.
    mock.load_istream(0x580 & !0x3F, [0; ICACHE_LINE_INS]);
    let log = mock.log();

    let cpu = Cpu::new(Config::default());
    let threads = cpu.start(Box::new(mock)).expect("stages spawn");

    // Wait for the frontend to decode something.
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while cpu.iq.len() < 4 && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(cpu.iq.len() >= 4, "frontend made no progress");
    assert!(!log.lock().unwrap().commands.is_empty());

    cpu.halt();
    threads.join();
    assert_eq!(cpu.state(), CpuState::Halt);
}
