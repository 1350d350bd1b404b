//! CPU composition: per-subsystem records, locks, stage tasks.
//!
//! The CPU is a composition of independently locked records rather than one
//! guarded blob:
//! 1. **Control** — state machine, mode/ASN, PAL base, superpage enables,
//!    and the translation fault bookkeeping (the CPU-wide lock).
//! 2. **Fetch** — VPC ring, Icache, predictor, rename maps, ROB (the fetch
//!    lock), with the ITB under its own lock because it is re-read on
//!    every miss.
//! 3. **Issue queues** — each internally locked and counted.
//! 4. **Memory** — Dcache, DTB, load queue, and store queue locks.
//! 5. **System interface** — the bounded request/reply buffers.
//!
//! Lock order, outermost first: control → stage (fetch/memory) → cache →
//! translation buffer → system interface. A stage waiting on a condition
//! variable holds no other lock.
//!
//! Three long-lived tasks drive the pipeline: the fetch stage, the memory
//! pipeline, and the system-request handler. Setting the state to `Halt`
//! fails every loop predicate at its next check; teardown closes the
//! queues and the system interface so no task waits unbounded.

/// Fetch-side pipeline state and the fetch stage task.
pub mod frontend;
/// Data-side pipeline state and the memory stage task.
pub mod mem;
/// Counted issue queues.
pub mod queue;
/// The reorder buffer.
pub mod rob;

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use thiserror::Error;

use crate::common::fault::Fault;
use crate::common::mode::ProcessorMode;
use crate::common::pc::VirtPc;
use crate::config::Config;
use crate::core::frontend::FetchUnit;
use crate::core::mem::dcache::DataCache;
use crate::core::mem::tlb::{TbPte, TransBuffer};
use crate::core::mem::translate::TranslateCtx;
use crate::core::mem::{MemOp, MemQueue};
use crate::core::queue::{CountedQueue, QueueFull};
use crate::core::rob::{DecodedInstr, InstrState};
use crate::sys::{MemorySystem, SysInterface};

/// Coarse CPU execution state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CpuState {
    /// Constructed, stages not yet running.
    #[default]
    Init,
    /// Stages running.
    Run,
    /// Paused (memory-system timeout or explicit pause).
    Stall,
    /// Tearing down; every stage exits at its next loop check.
    Halt,
}

/// The CPU-wide control record.
#[derive(Debug)]
pub struct CpuCtl {
    /// Execution state; transitions wake every stage.
    pub state: CpuState,
    /// Current processor mode.
    pub mode: ProcessorMode,
    /// Current address-space number.
    pub asn: u8,
    /// PAL base address; fault handlers sit at fixed offsets above it.
    pub pal_base: u64,
    /// Instruction-stream superpage enables.
    pub i_spe: u8,
    /// Data-stream superpage enables.
    pub d_spe: u8,
    /// Translation fault bookkeeping shared by both streams.
    pub translate: TranslateCtx,
}

/// Errors raised while constructing or starting a CPU.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A stage task could not be spawned.
    #[error("failed to spawn {stage} stage")]
    Spawn {
        /// The stage that failed.
        stage: &'static str,
        /// The underlying spawn error.
        #[source]
        source: std::io::Error,
    },
}

/// A completed load or store, recorded for the embedder.
#[derive(Clone, Copy, Debug)]
pub struct MemCompletion {
    /// The instruction the operation belonged to.
    pub instr_id: u8,
    /// The virtual address accessed.
    pub va: u64,
    /// Loaded bytes (zero for stores).
    pub data: [u8; 8],
}

/// One emulated CPU.
#[derive(Debug)]
pub struct Cpu {
    config: Config,
    /// CPU-wide control record.
    pub ctl: Mutex<CpuCtl>,
    /// Signalled on every state transition.
    pub ctl_cond: Condvar,
    /// Fetch-side state (VPC, Icache, predictor, rename, ROB).
    pub fetch: Mutex<FetchUnit>,
    /// Instruction translation buffer.
    pub itb: Mutex<TransBuffer>,
    /// Integer issue queue.
    pub iq: CountedQueue,
    /// Floating-point issue queue.
    pub fq: CountedQueue,
    /// Data cache.
    pub dcache: Mutex<DataCache>,
    /// Data translation buffer.
    pub dtb: Mutex<TransBuffer>,
    /// Load queue.
    pub lq: Mutex<MemQueue>,
    /// Store queue.
    pub sq: Mutex<MemQueue>,
    /// Signalled when memory work arrives; pairs with the load-queue lock.
    pub mem_cond: Condvar,
    /// The external system interface.
    pub sys: SysInterface,
    /// Completed memory operations, for the embedder.
    pub completions: Mutex<Vec<MemCompletion>>,
}

/// Join handles for the stage tasks of a started CPU.
#[derive(Debug)]
pub struct CpuThreads {
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl CpuThreads {
    /// Joins every stage task.
    pub fn join(self) {
        for (stage, handle) in self.handles {
            if handle.join().is_err() {
                tracing::error!(stage, "stage task panicked");
            }
        }
    }
}

fn relock<'a, T>(
    result: Result<MutexGuard<'a, T>, PoisonError<MutexGuard<'a, T>>>,
) -> MutexGuard<'a, T> {
    result.unwrap_or_else(PoisonError::into_inner)
}

impl Cpu {
    /// Builds a CPU from `config`, in the `Init` state.
    pub fn new(config: Config) -> Arc<Self> {
        Arc::new(Self {
            ctl: Mutex::new(CpuCtl {
                state: CpuState::Init,
                mode: ProcessorMode::Kernel,
                asn: 0,
                pal_base: config.pal_base,
                i_spe: config.tb.i_spe,
                d_spe: config.tb.d_spe,
                translate: TranslateCtx {
                    va_48: config.tb.va_48,
                    ..TranslateCtx::default()
                },
            }),
            ctl_cond: Condvar::new(),
            fetch: Mutex::new(FetchUnit::new(
                config.inflight,
                config.fetch.ic_en,
                config.fetch.bp_mode,
                config.regs.int_phys,
                config.regs.fp_phys,
            )),
            itb: Mutex::new(TransBuffer::new(config.tb.entries, config.tb.page_size)),
            iq: CountedQueue::new(config.queues.iq),
            fq: CountedQueue::new(config.queues.fq),
            dcache: Mutex::new(DataCache::new()),
            dtb: Mutex::new(TransBuffer::new(config.tb.entries, config.tb.page_size)),
            lq: Mutex::new(MemQueue::new()),
            sq: Mutex::new(MemQueue::new()),
            mem_cond: Condvar::new(),
            sys: SysInterface::new(
                config.sys.requests,
                Duration::from_millis(config.sys.timeout_ms),
            ),
            completions: Mutex::new(Vec::new()),
            config,
        })
    }

    /// The configuration this CPU was built from.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Locks the control record.
    pub fn lock_ctl(&self) -> MutexGuard<'_, CpuCtl> {
        relock(self.ctl.lock())
    }

    /// Locks the fetch-side state.
    pub fn lock_fetch(&self) -> MutexGuard<'_, FetchUnit> {
        relock(self.fetch.lock())
    }

    /// Locks the ITB.
    pub fn lock_itb(&self) -> MutexGuard<'_, TransBuffer> {
        relock(self.itb.lock())
    }

    /// Locks the DTB.
    pub fn lock_dtb(&self) -> MutexGuard<'_, TransBuffer> {
        relock(self.dtb.lock())
    }

    /// Locks the Dcache.
    pub fn lock_dcache(&self) -> MutexGuard<'_, DataCache> {
        relock(self.dcache.lock())
    }

    /// The current execution state.
    pub fn state(&self) -> CpuState {
        self.lock_ctl().state
    }

    /// Transitions the execution state, waking every stage.
    pub fn set_state(&self, state: CpuState) {
        {
            let mut ctl = self.lock_ctl();
            if ctl.state == CpuState::Halt && state != CpuState::Halt {
                return; // Halt is terminal
            }
            ctl.state = state;
        }
        self.ctl_cond.notify_all();
        self.mem_cond.notify_all();
    }

    /// Starts (or resumes) execution.
    pub fn run(&self) {
        self.set_state(CpuState::Run);
    }

    /// Drops to the stalled state (diagnostic pause).
    pub fn stall(&self) {
        self.set_state(CpuState::Stall);
    }

    /// Halts the CPU: every stage exits at its next loop check, the issue
    /// queues and system interface wake their sleepers, and nothing waits
    /// unbounded.
    pub fn halt(&self) {
        self.set_state(CpuState::Halt);
        self.iq.close();
        self.fq.close();
        self.sys.close();
    }

    /// Blocks until the state changes or `timeout` elapses.
    pub fn wait_state_change(&self, timeout: Duration) {
        let ctl = self.lock_ctl();
        let _ = self
            .ctl_cond
            .wait_timeout(ctl, timeout)
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Sets the processor mode.
    pub fn set_mode(&self, mode: ProcessorMode) {
        self.lock_ctl().mode = mode;
    }

    /// Sets the address-space number.
    pub fn set_asn(&self, asn: u8) {
        self.lock_ctl().asn = asn;
    }

    /// Sets the superpage enables for both streams.
    pub fn set_spe(&self, i_spe: u8, d_spe: u8) {
        let mut ctl = self.lock_ctl();
        ctl.i_spe = i_spe;
        ctl.d_spe = d_spe;
    }

    /// Pushes a new VPC (a redirect from the executor).
    pub fn set_vpc(&self, va: u64, pal: bool) -> VirtPc {
        let vpc = VirtPc::from_va(va, pal);
        self.lock_fetch().vpc.push(vpc);
        vpc
    }

    /// Advances the VPC by one instruction slot and returns it.
    pub fn incr_vpc(&self) -> VirtPc {
        self.lock_fetch().vpc.push_incr()
    }

    /// Pushes the current VPC displaced by a branch offset (one slot
    /// forward plus the displacement) and returns it.
    pub fn displace_vpc(&self, displacement: i64) -> VirtPc {
        self.lock_fetch().vpc.push_displaced(displacement)
    }

    /// Pushes the PAL-dispatch VPC for `fault` and returns it.
    pub fn set_pal_vpc(&self, fault: Fault) -> VirtPc {
        let pal_base = self.lock_ctl().pal_base;
        let vpc = VirtPc::from_va(pal_base + fault.pal_offset(), true);
        self.lock_fetch().vpc.push(vpc);
        vpc
    }

    /// Diverts the VPC into the PAL handler for `fault`, recording the
    /// excepting PC.
    pub fn divert_to_pal(&self, fault: Fault, pc: VirtPc) -> VirtPc {
        {
            let mut ctl = self.lock_ctl();
            ctl.translate.exc_addr = Some(pc);
        }
        tracing::debug!(%fault, pc = pc.slot(), "diverting to PAL");
        self.set_pal_vpc(fault)
    }

    /// Installs an ITB mapping.
    ///
    /// When the round-robin cursor displaces a valid entry, every Icache
    /// line that entry mapped is invalidated before the new mapping takes
    /// effect.
    pub fn itb_insert(&self, va: u64, pa: u64, pte: &TbPte) {
        let displaced = self.lock_itb().insert(va, pa, pte);
        if let Some(old) = displaced {
            self.lock_fetch()
                .icache
                .invalidate_span(old.virtual_addr, old.span_bytes());
        }
    }

    /// Installs a DTB mapping.
    pub fn dtb_insert(&self, va: u64, pa: u64, pte: &TbPte) {
        let _ = self.lock_dtb().insert(va, pa, pte);
    }

    /// Invalidates every entry of the chosen translation buffer; on the
    /// instruction side the Icache (whose lines were derived from those
    /// mappings) is flushed with it.
    pub fn tbia(&self, dstream: bool) {
        if dstream {
            self.lock_dtb().invalidate_all();
        } else {
            self.lock_itb().invalidate_all();
            self.lock_fetch().icache.flush();
        }
    }

    /// Invalidates the process-private entries (those without the
    /// address-space-match flag) of the chosen translation buffer.
    pub fn tbiap(&self, dstream: bool) {
        if dstream {
            self.lock_dtb().invalidate_process();
        } else {
            self.lock_itb().invalidate_process();
        }
    }

    /// Invalidates the single entry mapping `va` in the current address
    /// space.
    pub fn tbis(&self, va: u64, dstream: bool) {
        let asn = self.lock_ctl().asn;
        if dstream {
            self.lock_dtb().invalidate_single(va, asn);
        } else {
            self.lock_itb().invalidate_single(va, asn);
        }
    }

    /// Marks instruction `id` executed and its destination register ready
    /// to retire. Called by the external executor (and the memory
    /// pipeline for loads/stores).
    pub fn mark_executed(&self, id: u8) -> bool {
        let mut fetch = self.lock_fetch();
        let Some(slot) = fetch.rob.find(id) else {
            return false;
        };
        fetch.rob.get_mut(slot).state = InstrState::Executed;
        let entry = fetch.rob.get(slot);
        if let Some(arch) = entry.dest_arch {
            let float = entry.dest_float;
            fetch
                .rename
                .bank_mut(float)
                .set_state(arch, frontend::rename::RegState::WaitingRetire);
        }
        true
    }

    /// Records the actual outcome of branch `id` for the retire-time
    /// predictor update.
    pub fn set_branch_outcome(&self, id: u8, taken: bool) -> bool {
        let mut fetch = self.lock_fetch();
        let Some(slot) = fetch.rob.find(id) else {
            return false;
        };
        fetch.rob.get_mut(slot).taken = Some(taken);
        true
    }

    /// Retires the oldest executed instruction.
    ///
    /// Retirement is the commit point: the predictor tables are updated
    /// for branches, the destination register state becomes `Retired`,
    /// and the issue-queue entry returns to its pool.
    pub fn retire(&self) -> Option<DecodedInstr> {
        let retired = {
            let mut fetch = self.lock_fetch();
            let retired = fetch.rob.retire()?;
            if let (Some(prediction), Some(taken)) = (retired.prediction, retired.taken) {
                fetch.predictor.update(retired.pc, taken, prediction);
            }
            if let Some(arch) = retired.dest_arch {
                fetch.rename.bank_mut(retired.dest_float).retire(arch);
            }
            retired
        };
        if let Some(slot) = retired.queue_slot {
            match retired.queue {
                crate::isa::decode::QueueSelect::Fq => self.fq.release(slot),
                _ => self.iq.release(slot),
            }
        }
        tracing::trace!(id = retired.id, pc = retired.pc.slot(), "retired");
        Some(retired)
    }

    /// Squashes every instruction newer than `faulting_id`, restoring the
    /// rename maps from the undo records (newest first) and returning the
    /// squashed entries' count. The faulting instruction itself is kept.
    pub fn recover(&self, faulting_id: u8) -> usize {
        let squashed = {
            let mut fetch = self.lock_fetch();
            let squashed = fetch.rob.squash_newer_than(faulting_id);
            for instr in &squashed {
                if let Some(undo) = &instr.undo {
                    fetch.rename.rollback(undo);
                }
            }
            squashed
        };
        for instr in &squashed {
            if let Some(slot) = instr.queue_slot {
                match instr.queue {
                    crate::isa::decode::QueueSelect::Fq => self.fq.remove(slot),
                    _ => self.iq.remove(slot),
                }
            }
        }
        tracing::debug!(count = squashed.len(), "squashed after fault");
        squashed.len()
    }

    /// Queues a load for the memory pipeline.
    pub fn issue_load(&self, op: MemOp) -> Result<(), QueueFull> {
        relock(self.lq.lock()).push(op)?;
        self.mem_cond.notify_all();
        Ok(())
    }

    /// Queues a store for the memory pipeline.
    pub fn issue_store(&self, op: MemOp) -> Result<(), QueueFull> {
        relock(self.sq.lock()).push(op)?;
        self.mem_cond.notify_all();
        Ok(())
    }

    /// Starts the stage tasks: fetch, memory pipeline, and the
    /// system-request handler driving `memory_system`.
    ///
    /// On a spawn failure everything already started is halted and joined
    /// before the error is returned.
    pub fn start(
        self: &Arc<Self>,
        memory_system: Box<dyn MemorySystem>,
    ) -> Result<CpuThreads, CoreError> {
        self.run();
        let mut handles = Vec::new();

        let spawn = |stage: &'static str,
                     f: Box<dyn FnOnce() + Send>|
         -> Result<(&'static str, JoinHandle<()>), CoreError> {
            std::thread::Builder::new()
                .name(stage.to_string())
                .spawn(f)
                .map(|h| (stage, h))
                .map_err(|source| CoreError::Spawn { stage, source })
        };

        let cpu = Arc::clone(self);
        match spawn("fetch", Box::new(move || frontend::fetch::fetch_loop(&cpu))) {
            Ok(h) => handles.push(h),
            Err(e) => {
                self.halt();
                return Err(e);
            }
        }

        let cpu = Arc::clone(self);
        match spawn("memory", Box::new(move || mem::mem_loop(&cpu))) {
            Ok(h) => handles.push(h),
            Err(e) => {
                self.halt();
                for (_, h) in handles {
                    let _ = h.join();
                }
                return Err(e);
            }
        }

        let cpu = Arc::clone(self);
        match spawn(
            "system",
            Box::new(move || sys_handler_loop(&cpu, memory_system)),
        ) {
            Ok(h) => handles.push(h),
            Err(e) => {
                self.halt();
                for (_, h) in handles {
                    let _ = h.join();
                }
                return Err(e);
            }
        }

        Ok(CpuThreads { handles })
    }
}

/// The system-request handler task: drains the request buffer in FIFO
/// order into the injected memory system and routes replies back.
fn sys_handler_loop(cpu: &Arc<Cpu>, mut memory_system: Box<dyn MemorySystem>) {
    const TICK: Duration = Duration::from_millis(50);
    loop {
        if cpu.state() == CpuState::Halt {
            break;
        }
        let Some(request) = cpu.sys.next_request(TICK) else {
            continue;
        };
        tracing::trace!(id = request.id, command = ?request.command, pa = request.pa, "system request");
        if let Some(reply) = memory_system.handle(&request) {
            cpu.sys.deliver(reply);
        }
    }
}
