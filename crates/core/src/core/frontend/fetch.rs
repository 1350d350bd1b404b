//! The fetch stage: VPC advance, Icache lookup, decode, rename, queue.
//!
//! Each step fetches the bundle at the current VPC and classifies the
//! result:
//! - **Hit** — decode, rename, predict, and queue up to four instructions.
//! - **Miss** — the ITB maps the PC but the Icache does not hold it:
//!   translate the instruction address, ask the memory system for a fill,
//!   and install the returned block.
//! - **WayMiss** — nothing maps the PC: record the faulting PC and divert
//!   the VPC to the ITB-miss PAL handler. PAL-mode PCs translate by
//!   identity, so an unmapped PAL PC goes down the fill path instead.
//!
//! The stage task releases every lock before sleeping: Icache fills wait
//! on the system reply buffer, and back-pressure from full issue queues
//! waits on the control condition variable.

use std::time::Duration;

use crate::common::constants::{FETCH_WIDTH, ICACHE_LINE_INS};
use crate::common::fault::Fault;
use crate::common::mode::{AccessKind, ProcessorMode};
use crate::common::pc::VirtPc;
use crate::core::frontend::icache::IFetchOutcome;
use crate::core::mem::translate::{self, Translation};
use crate::core::{Cpu, CpuState};
use crate::sys::{SysCommand, SysError, SysReply, SysRequest};

/// Outcome of one fetch step.
#[derive(Debug, PartialEq, Eq)]
pub enum FetchStep {
    /// Instructions decoded and queued.
    Decoded(usize),
    /// An Icache line was filled from the memory system.
    Filled,
    /// The VPC was diverted into a PAL handler.
    Diverted(Fault),
    /// No forward progress (queues full or CPU not running).
    Idle,
    /// The CPU dropped to `Stall` (memory-system timeout).
    Stalled,
    /// The CPU is halting.
    Halted,
}

/// Runs one iteration of the fetch stage.
pub fn fetch_step(cpu: &Cpu) -> FetchStep {
    let (mode, asn) = {
        let ctl = cpu.lock_ctl();
        match ctl.state {
            CpuState::Run => {}
            CpuState::Halt => return FetchStep::Halted,
            CpuState::Init | CpuState::Stall => return FetchStep::Idle,
        }
        (ctl.mode, ctl.asn)
    };

    // Hold back while either queue cannot take a whole bundle.
    if queue_space(cpu) < FETCH_WIDTH {
        return FetchStep::Idle;
    }

    let (pc, outcome) = {
        let mut fetch = cpu.lock_fetch();
        let itb = cpu.lock_itb();
        let pc = fetch.vpc.current();
        match fetch.icache.fetch(pc, &itb) {
            IFetchOutcome::Hit(bundle) => {
                let result = fetch.process_bundle(&bundle, &itb, &cpu.iq, &cpu.fq);
                drop(itb);
                drop(fetch);
                return match result {
                    Ok(outcome) => match outcome.fault {
                        Some((fault, fault_pc)) => {
                            let _ = cpu.divert_to_pal(fault, fault_pc);
                            FetchStep::Diverted(fault)
                        }
                        None => FetchStep::Decoded(outcome.decoded),
                    },
                    Err(err) => {
                        debug_assert!(false, "frontend invariant violated: {err:?}");
                        tracing::error!(?err, "frontend invariant violated; halting");
                        cpu.halt();
                        FetchStep::Halted
                    }
                };
            }
            IFetchOutcome::Miss => (pc, IFetchOutcome::Miss),
            IFetchOutcome::WayMiss => {
                if pc.pal() {
                    // PAL-mode fetches translate by identity; fillable.
                    (pc, IFetchOutcome::Miss)
                } else {
                    (pc, IFetchOutcome::WayMiss)
                }
            }
        }
    };

    match outcome {
        IFetchOutcome::WayMiss => {
            let _ = cpu.divert_to_pal(Fault::ItbMiss, pc);
            FetchStep::Diverted(Fault::ItbMiss)
        }
        _ => fill_line(cpu, pc, mode, asn),
    }
}

/// Services an Icache miss: translate the PC, request an instruction-
/// stream fill, and install the returned block.
fn fill_line(cpu: &Cpu, pc: VirtPc, mode: ProcessorMode, asn: u8) -> FetchStep {
    let translation = {
        let mut ctl = cpu.lock_ctl();
        let itb = cpu.lock_itb();
        let i_spe = ctl.i_spe;
        translate::translate(
            &mut ctl.translate,
            &itb,
            mode,
            asn,
            i_spe,
            pc.va(),
            pc,
            false,
            AccessKind::Execute,
        )
    };

    let pa = match translation {
        Translation::Fault(fault) => {
            let _ = cpu.divert_to_pal(fault, pc);
            return FetchStep::Diverted(fault);
        }
        Translation::Address { pa, .. } => pa.val(),
    };

    let entry = cpu.lock_fetch().next_maf();
    let block_pa = pa & !(4 * ICACHE_LINE_INS as u64 - 1);
    if let Err(err) = cpu
        .sys
        .submit(SysRequest::new(SysCommand::ReadBlkInstr, entry, block_pa))
    {
        return fill_failed(cpu, err);
    }

    let reply = cpu
        .sys
        .wait_reply(|r| matches!(r, SysReply::IstreamFill { entry: e, .. } if *e == entry));
    let block: [u32; ICACHE_LINE_INS] = match reply {
        Ok(SysReply::IstreamFill { block, .. }) => block,
        Ok(_) => return FetchStep::Idle,
        Err(err) => return fill_failed(cpu, err),
    };

    // Re-read the ITB: the mapping may have been displaced while the fill
    // was in flight, in which case the fill is dropped and the next fetch
    // reclassifies the PC.
    let tb_entry = {
        let itb = cpu.lock_itb();
        itb.find(pc.va().val(), asn).copied()
    };
    match tb_entry {
        Some(tb_entry) => {
            cpu.lock_fetch().icache.add(pc, &block, &tb_entry);
            tracing::trace!(pc = pc.slot(), pa = block_pa, "icache fill");
            FetchStep::Filled
        }
        None if pc.pal() => {
            // Identity-mapped PAL fill: synthesize the permissive entry
            // the PAL handler executes under.
            let pte = crate::core::mem::tlb::TbPte::instruction(0, asn, true, true, true, true, true);
            let mut itb = cpu.lock_itb();
            let _ = itb.insert(pc.va().val(), block_pa, &pte);
            let tb_entry = itb.find(pc.va().val(), asn).copied();
            drop(itb);
            if let Some(tb_entry) = tb_entry {
                cpu.lock_fetch().icache.add(pc, &block, &tb_entry);
            }
            FetchStep::Filled
        }
        None => FetchStep::Idle,
    }
}

fn fill_failed(cpu: &Cpu, err: SysError) -> FetchStep {
    match err {
        SysError::Closed => FetchStep::Halted,
        SysError::RequestTimeout | SysError::ResponseTimeout => {
            tracing::warn!(%err, "memory system unresponsive; stalling");
            cpu.stall();
            FetchStep::Stalled
        }
    }
}

fn queue_space(cpu: &Cpu) -> usize {
    let iq_space = cpu.iq.capacity() - cpu.iq.len();
    let fq_space = cpu.fq.capacity() - cpu.fq.len();
    iq_space.min(fq_space)
}

/// The fetch stage task: steps until the CPU halts, sleeping on the
/// control condition variable whenever no forward progress is possible.
pub fn fetch_loop(cpu: &Cpu) {
    const IDLE_WAIT: Duration = Duration::from_millis(5);
    loop {
        match fetch_step(cpu) {
            FetchStep::Halted => break,
            FetchStep::Idle | FetchStep::Stalled => {
                if cpu.state() == CpuState::Halt {
                    break;
                }
                cpu.wait_state_change(IDLE_WAIT);
            }
            FetchStep::Decoded(_) | FetchStep::Filled | FetchStep::Diverted(_) => {}
        }
    }
    tracing::debug!("fetch stage exiting");
}
