//! The memory pipeline: data translation, Dcache access, writebacks.
//!
//! Loads and stores issued from the queues land in the load/store queues;
//! the memory stage task drains them (loads first, FIFO within each
//! queue), translates through the DTB, and services the Dcache. A miss
//! asks the memory system for the block, installs it on arrival, and
//! dispatches any displaced modified victim back out — the writeback is
//! submitted before the fill is treated as complete.

/// Data cache.
pub mod dcache;
/// Translation buffers (shared structure for ITB and DTB).
pub mod tlb;
/// Virtual-to-physical translation.
pub mod translate;

use std::collections::VecDeque;
use std::time::Duration;

use crate::common::addr::VirtAddr;
use crate::common::constants::DCACHE_BLOCK;
use crate::common::fault::Fault;
use crate::common::mode::AccessKind;
use crate::common::pc::VirtPc;
use crate::core::queue::QueueFull;
use crate::core::{Cpu, CpuState, MemCompletion};
use crate::sys::{SysCommand, SysError, SysReply, SysRequest};

use self::translate::Translation;

/// Load/store queue depth.
pub const MEM_QUEUE_LEN: usize = 32;

/// One load or store handed to the memory pipeline.
#[derive(Clone, Copy, Debug)]
pub struct MemOp {
    /// Id of the issuing instruction.
    pub instr_id: u8,
    /// PC of the issuing instruction (carries the PAL-mode flag).
    pub pc: VirtPc,
    /// Virtual address of the access.
    pub va: u64,
    /// `Read` for loads, `Write` for stores, `Modify` for locked updates.
    pub access: AccessKind,
    /// Access size in bytes (1, 2, 4, or 8).
    pub size: u8,
    /// Store payload (low `size` bytes).
    pub data: [u8; 8],
}

impl MemOp {
    /// A load of `size` bytes at `va`.
    pub fn load(instr_id: u8, pc: VirtPc, va: u64, size: u8) -> Self {
        Self {
            instr_id,
            pc,
            va,
            access: AccessKind::Read,
            size,
            data: [0; 8],
        }
    }

    /// A store of the low `size` bytes of `data` at `va`.
    pub fn store(instr_id: u8, pc: VirtPc, va: u64, size: u8, data: u64) -> Self {
        Self {
            instr_id,
            pc,
            va,
            access: AccessKind::Write,
            size,
            data: data.to_le_bytes(),
        }
    }
}

/// A bounded FIFO of pending memory operations.
#[derive(Debug, Default)]
pub struct MemQueue {
    ops: VecDeque<MemOp>,
}

impl MemQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an operation; fails at the queue bound.
    pub fn push(&mut self, op: MemOp) -> Result<(), QueueFull> {
        if self.ops.len() == MEM_QUEUE_LEN {
            return Err(QueueFull);
        }
        self.ops.push_back(op);
        Ok(())
    }

    /// Takes the oldest operation.
    pub fn pop(&mut self) -> Option<MemOp> {
        self.ops.pop_front()
    }

    /// Pending operations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether the queue is drained.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Outcome of one memory-pipeline step.
#[derive(Debug, PartialEq, Eq)]
pub enum MemStep {
    /// An operation completed against the Dcache.
    Completed,
    /// Translation faulted; the VPC was diverted to PAL dispatch.
    Faulted(Fault),
    /// Both queues were empty.
    Idle,
    /// The CPU dropped to `Stall` (memory-system timeout).
    Stalled,
    /// The CPU is halting.
    Halted,
}

/// Runs one iteration of the memory pipeline: drains one load, else one
/// store.
pub fn mem_step(cpu: &Cpu) -> MemStep {
    match cpu.state() {
        CpuState::Run => {}
        CpuState::Halt => return MemStep::Halted,
        CpuState::Init | CpuState::Stall => return MemStep::Idle,
    }

    let op = {
        let mut lq = lock(&cpu.lq);
        lq.pop()
    }
    .or_else(|| lock(&cpu.sq).pop());
    let Some(op) = op else {
        return MemStep::Idle;
    };

    service(cpu, &op)
}

/// Translates and services one memory operation.
fn service(cpu: &Cpu, op: &MemOp) -> MemStep {
    let translation = {
        let mut ctl = cpu.lock_ctl();
        let dtb = cpu.lock_dtb();
        let (mode, asn, d_spe) = (ctl.mode, ctl.asn, ctl.d_spe);
        translate::translate(
            &mut ctl.translate,
            &dtb,
            mode,
            asn,
            d_spe,
            VirtAddr::new(op.va),
            op.pc,
            true,
            op.access,
        )
    };

    let pa = match translation {
        Translation::Fault(fault) => {
            let _ = cpu.divert_to_pal(fault, op.pc);
            return MemStep::Faulted(fault);
        }
        Translation::Address { pa, .. } => pa.val(),
    };

    let va = VirtAddr::new(op.va);
    let cached = {
        let dcache = cpu.lock_dcache();
        dcache.fetch(va, pa).is_some()
    };

    if !cached {
        match fill_block(cpu, op, va, pa) {
            Ok(()) => {}
            Err(step) => return step,
        }
    }

    complete(cpu, op, va, pa)
}

/// Requests the block for `(va, pa)` from the memory system and installs
/// it, dispatching any displaced modified victim first.
fn fill_block(cpu: &Cpu, op: &MemOp, va: VirtAddr, pa: u64) -> Result<(), MemStep> {
    let block_pa = pa & !(DCACHE_BLOCK as u64 - 1);
    let command = match op.access {
        AccessKind::Write | AccessKind::Modify => SysCommand::ReadBlkMod,
        _ => SysCommand::ReadBlk,
    };
    if let Err(err) = cpu
        .sys
        .submit(SysRequest::new(command, op.instr_id, block_pa))
    {
        return Err(fill_failed(cpu, err));
    }

    let reply = cpu.sys.wait_reply(
        |r| matches!(r, SysReply::DataFill { entry, .. } if *entry == op.instr_id),
    );
    let (data, shared) = match reply {
        Ok(SysReply::DataFill { data, shared, .. }) => (data, shared),
        Ok(_) => return Err(MemStep::Idle),
        Err(err) => return Err(fill_failed(cpu, err)),
    };

    let writeback = {
        let mut dcache = cpu.lock_dcache();
        let writeback = dcache.add(va, block_pa, &data);
        if shared {
            dcache.mark_shared(block_pa);
        }
        writeback
    };
    if let Some(victim) = writeback {
        tracing::trace!(pa = victim.pa, "victim writeback");
        let request =
            SysRequest::new(SysCommand::WrVictimBlk, op.instr_id, victim.pa).with_data(victim.data);
        if let Err(err) = cpu.sys.submit(request) {
            return Err(fill_failed(cpu, err));
        }
    }
    Ok(())
}

/// Applies the operation against the (now present) block and records the
/// completion.
fn complete(cpu: &Cpu, op: &MemOp, va: VirtAddr, pa: u64) -> MemStep {
    let mut completion = MemCompletion {
        instr_id: op.instr_id,
        va: op.va,
        data: [0; 8],
    };

    match op.access {
        AccessKind::Write | AccessKind::Modify => {
            let stored = {
                let mut dcache = cpu.lock_dcache();
                dcache.store(va, pa, &op.data[..op.size as usize])
            };
            if !stored {
                // The block vanished between fill and store (probe); retry
                // by re-queueing would reorder, so treat as a completion
                // failure and halt loudly.
                debug_assert!(stored, "store lost its filled block");
                tracing::error!(va = op.va, "store lost its filled block; halting");
                cpu.halt();
                return MemStep::Halted;
            }
        }
        _ => {
            let dcache = cpu.lock_dcache();
            if let Some(block) = dcache.fetch(va, pa) {
                let offset = va.dc_offset();
                let end = (offset + op.size as usize).min(DCACHE_BLOCK);
                completion.data[..end - offset].copy_from_slice(&block[offset..end]);
            }
        }
    }

    let _ = cpu.mark_executed(op.instr_id);
    lock(&cpu.completions).push(completion);
    tracing::trace!(id = op.instr_id, va = op.va, access = ?op.access, "memory op complete");
    MemStep::Completed
}

fn fill_failed(cpu: &Cpu, err: SysError) -> MemStep {
    match err {
        SysError::Closed => MemStep::Halted,
        SysError::RequestTimeout | SysError::ResponseTimeout => {
            tracing::warn!(%err, "memory system unresponsive; stalling");
            cpu.stall();
            MemStep::Stalled
        }
    }
}

fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// The memory stage task: steps until the CPU halts, sleeping on the
/// memory condition variable while both queues are drained.
pub fn mem_loop(cpu: &Cpu) {
    const IDLE_WAIT: Duration = Duration::from_millis(5);
    loop {
        match mem_step(cpu) {
            MemStep::Halted => break,
            MemStep::Idle | MemStep::Stalled => {
                if cpu.state() == CpuState::Halt {
                    break;
                }
                let lq = lock(&cpu.lq);
                let _ = cpu
                    .mem_cond
                    .wait_timeout(lq, IDLE_WAIT)
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
            }
            MemStep::Completed | MemStep::Faulted(_) => {}
        }
    }
    tracing::debug!("memory stage exiting");
}
