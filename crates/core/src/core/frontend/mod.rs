//! Fetch-side pipeline state: VPC ring, Icache, branch predictor, rename
//! maps, and the reorder buffer, all guarded together by the fetch lock.
//!
//! [`FetchUnit`] owns everything the fetch/decode/rename path touches per
//! cycle; [`fetch::fetch_loop`] is the stage task driving it.

/// The fetch stage loop and its single-step body.
pub mod fetch;
/// Instruction cache with line/set prediction.
pub mod icache;
/// Tournament branch predictor.
pub mod predictor;
/// Architectural-to-physical register renaming.
pub mod rename;

use crate::common::constants::ZERO_REG;
use crate::common::fault::Fault;
use crate::common::pc::{VirtPc, VpcList};
use crate::core::queue::{CountedQueue, QueueFull};
use crate::core::rob::{DecodedInstr, InstrState, Rob};
use crate::isa::decode::{
    self, InstrFormat, OperationType, QueueSelect,
};
use crate::isa::instruction::InstructionBits;

use self::icache::{FetchedBundle, ICache};
use self::predictor::TournamentPredictor;
use self::rename::RegisterMapper;

use crate::core::mem::tlb::TransBuffer;

/// Error raised when a rename finds the free list empty.
///
/// The free lists are sized so this cannot happen under the in-flight
/// bound; seeing it means the emulator's bookkeeping is broken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeListEmpty;

/// Invariant violations the fetch stage can surface.
///
/// Both variants are programming errors in the emulator: the caller
/// panics in debug builds and halts the CPU in release builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrontendError {
    /// An issue queue refused an entry.
    QueueFull,
    /// A rename found its free list empty.
    FreeListEmpty,
}

impl From<QueueFull> for FrontendError {
    fn from(_: QueueFull) -> Self {
        FrontendError::QueueFull
    }
}

/// Outcome of decoding one fetched bundle.
#[derive(Debug, Default)]
pub struct BundleOutcome {
    /// Instructions decoded and queued.
    pub decoded: usize,
    /// A decode-time fault (reserved opcode), with its PC.
    pub fault: Option<(Fault, VirtPc)>,
}

/// All fetch-side state, guarded by the fetch lock.
#[derive(Debug)]
pub struct FetchUnit {
    /// The in-flight VPC ring.
    pub vpc: VpcList,
    /// The instruction cache.
    pub icache: ICache,
    /// The tournament branch predictor.
    pub predictor: TournamentPredictor,
    /// Integer and floating-point rename state.
    pub rename: RegisterMapper,
    /// The reorder buffer.
    pub rob: Rob,
    /// Line (index) the next fetch is predicted to read.
    pub line_prediction: u32,
    /// Set the next fetch is predicted to read.
    pub set_prediction: u32,
    /// Miss-address-file entry counter for instruction fills.
    maf: u8,
}

impl FetchUnit {
    /// Creates the fetch-side state from the configured capacities.
    pub fn new(
        inflight: usize,
        ic_en: u8,
        bp_mode: u8,
        int_phys: usize,
        fp_phys: usize,
    ) -> Self {
        Self {
            vpc: VpcList::new(inflight),
            icache: ICache::new(ic_en),
            predictor: TournamentPredictor::new(bp_mode),
            rename: RegisterMapper::new(int_phys, fp_phys),
            rob: Rob::new(inflight),
            line_prediction: 0,
            set_prediction: 0,
            maf: 0,
        }
    }

    /// Takes the next miss-address-file entry id for an instruction fill.
    pub fn next_maf(&mut self) -> u8 {
        let entry = self.maf;
        self.maf = self.maf.wrapping_add(1);
        entry
    }

    /// Decodes one instruction word and renames its registers.
    ///
    /// Sources are mapped before the destination is renamed, so an
    /// instruction reading its own destination register sees the previous
    /// mapping. Register 31 destinations are not renamed; they resolve to
    /// the permanently mapped zero register.
    pub fn decode_rename(&mut self, word: u32, pc: VirtPc) -> Result<DecodedInstr, FreeListEmpty> {
        let format = decode::classify_format(word);
        let opcode = word.opcode();
        let fields = decode::instr_fields(word, format);
        let op_type = decode::operation_type(opcode, fields.function);
        let roles = decode::register_roles(word);

        let src1 = roles
            .src1
            .map(|r| self.rename.bank(r.is_float()).lookup(r.arch_of(word)));
        let src2 = roles
            .src2
            .map(|r| self.rename.bank(r.is_float()).lookup(r.arch_of(word)));

        let (dest, dest_arch, dest_float, undo) = match roles.dest {
            Some(slot) => {
                let arch = slot.arch_of(word);
                let float = slot.is_float();
                if arch == ZERO_REG {
                    // Writes to the sink register are discarded; keep the
                    // permanent mapping so the executor has a target.
                    (Some(self.rename.bank(float).lookup(arch)), None, float, None)
                } else {
                    let Some((phys, undo)) = self.rename.bank_mut(float).rename(arch, float)
                    else {
                        return Err(FreeListEmpty);
                    };
                    (Some(phys), Some(arch), float, Some(undo))
                }
            }
            None => (None, None, false, None),
        };

        Ok(DecodedInstr {
            id: 0, // assigned at ROB insertion
            pc,
            word,
            format,
            opcode,
            op_type,
            fields,
            dest,
            src1,
            src2,
            dest_arch,
            dest_float,
            queue: decode::queue_for(opcode, fields.function),
            queue_slot: None,
            prediction: None,
            taken: None,
            state: InstrState::Decoded,
            undo,
        })
    }

    /// Decodes, renames, predicts, and queues one fetched bundle.
    ///
    /// Each instruction enters the ROB and its issue queue in program
    /// order, advancing the VPC ring as it goes. A branch is predicted
    /// with the tables as of its own PC; a predicted-taken branch probes
    /// the Icache at its target to steer the line/set predictors. A
    /// reserved opcode stops the bundle and reports `OPCDEC`.
    pub fn process_bundle(
        &mut self,
        bundle: &FetchedBundle,
        itb: &TransBuffer,
        iq: &CountedQueue,
        fq: &CountedQueue,
    ) -> Result<BundleOutcome, FrontendError> {
        let mut outcome = BundleOutcome::default();
        self.line_prediction = bundle.line_prediction;
        self.set_prediction = bundle.set_prediction;

        for ii in 0..bundle.words.len() {
            let pc = bundle.pcs[ii];
            if bundle.formats[ii] == InstrFormat::Res {
                outcome.fault = Some((Fault::OpcDec, pc));
                return Ok(outcome);
            }

            let mut instr = match self.decode_rename(bundle.words[ii], pc) {
                Ok(instr) => instr,
                Err(FreeListEmpty) => return Err(FrontendError::FreeListEmpty),
            };

            if instr.op_type == OperationType::Branch {
                let prediction = self.predictor.predict(pc);
                if prediction.taken {
                    let target = pc.displace(instr.fields.displacement);
                    let (_, line, set) = self.icache.is_valid(target, itb);
                    self.line_prediction = line;
                    self.set_prediction = set;
                }
                instr.prediction = Some(prediction);
            }

            let queue = instr.queue;
            let slot = self.rob.push(instr);
            let id = self.rob.get(slot).id;

            let queue_slot = match queue {
                QueueSelect::Iq => Some(iq.enqueue(slot, id)?),
                QueueSelect::Fq => Some(fq.enqueue(slot, id)?),
                QueueSelect::Cond | QueueSelect::None => None,
            };
            let entry = self.rob.get_mut(slot);
            entry.queue_slot = queue_slot;
            if queue_slot.is_some() {
                entry.state = InstrState::Queued;
            }

            outcome.decoded += 1;
            let _ = self.vpc.push_incr();
        }
        Ok(outcome)
    }
}
