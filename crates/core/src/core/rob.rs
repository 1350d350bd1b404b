//! Reorder buffer: the ring of in-flight decoded instructions.
//!
//! The ROB tracks every instruction from decode through retirement in
//! program order. It provides:
//! 1. **Allocation:** Each pushed instruction receives a unique wrapping id.
//! 2. **In-order Retirement:** Only the oldest entry retires, and only once
//!    it has executed.
//! 3. **Squash:** On a fault, every entry newer than the faulting one is
//!    removed (newest first) so rename state can be unwound.
//!
//! The ring shares its Start/End wrap rules with the VPC list: pushing into
//! a full ring drops the oldest entry.

use crate::common::pc::VirtPc;
use crate::core::frontend::predictor::BranchPrediction;
use crate::core::frontend::rename::RenameUndo;
use crate::isa::decode::{InstrFields, InstrFormat, OperationType, QueueSelect};

/// Lifecycle state of an in-flight instruction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum InstrState {
    /// Decoded and renamed, not yet placed in an issue queue.
    #[default]
    Decoded,
    /// Sitting in the integer or floating-point queue.
    Queued,
    /// Execution finished (marked by the external executor).
    Executed,
    /// Retired in program order.
    Retired,
    /// Removed by fault recovery.
    Squashed,
}

/// One decoded, renamed, in-flight instruction.
#[derive(Clone, Debug, Default)]
pub struct DecodedInstr {
    /// Unique wrapping id, assigned in program order.
    pub id: u8,
    /// The PC this instruction was fetched from.
    pub pc: VirtPc,
    /// The raw instruction word.
    pub word: u32,
    /// Classified (refined) instruction format.
    pub format: InstrFormat,
    /// Major opcode.
    pub opcode: u8,
    /// Coarse operation type for issue dispatch.
    pub op_type: OperationType,
    /// Format-dependent scalar fields.
    pub fields: InstrFields,
    /// Physical destination register, if any.
    pub dest: Option<u16>,
    /// First physical source register, if any.
    pub src1: Option<u16>,
    /// Second physical source register, if any.
    pub src2: Option<u16>,
    /// Architectural destination register, if any (never 31).
    pub dest_arch: Option<u8>,
    /// Whether the destination is floating-point.
    pub dest_float: bool,
    /// The issue queue this instruction was routed to.
    pub queue: QueueSelect,
    /// Index of the queue entry holding this instruction, until retired.
    pub queue_slot: Option<usize>,
    /// Branch prediction made at fetch, for branch-typed instructions.
    pub prediction: Option<BranchPrediction>,
    /// Actual branch outcome, set by the executor before retirement.
    pub taken: Option<bool>,
    /// Lifecycle state.
    pub state: InstrState,
    /// Rename undo record, consumed by fault recovery.
    pub undo: Option<RenameUndo>,
}

/// The reorder buffer.
#[derive(Debug)]
pub struct Rob {
    entries: Vec<DecodedInstr>,
    start: usize,
    end: usize,
    next_id: u8,
}

impl Rob {
    /// Creates a ROB with `slots` storage slots.
    pub fn new(slots: usize) -> Self {
        debug_assert!(slots >= 2);
        let mut entries = Vec::with_capacity(slots);
        entries.resize_with(slots, DecodedInstr::default);
        Self {
            entries,
            start: 0,
            end: 0,
            next_id: 0,
        }
    }

    /// Number of entries between Start and End.
    #[inline]
    pub fn len(&self) -> usize {
        (self.end + self.entries.len() - self.start) % self.entries.len()
    }

    /// Whether the ROB holds no in-flight instructions.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Index of the oldest entry.
    #[inline]
    pub fn start(&self) -> usize {
        self.start
    }

    /// Index the next push writes.
    #[inline]
    pub fn end(&self) -> usize {
        self.end
    }

    /// Pushes a decoded instruction, assigning it the next unique id.
    ///
    /// Returns the slot index it landed in. A full ring drops its oldest
    /// entry, mirroring the VPC list.
    pub fn push(&mut self, mut instr: DecodedInstr) -> usize {
        instr.id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);

        let slot = self.end;
        self.entries[slot] = instr;
        self.end = (self.end + 1) % self.entries.len();
        if self.end == self.start {
            self.start = (self.start + 1) % self.entries.len();
        }
        slot
    }

    /// The entry in `slot`.
    #[inline]
    pub fn get(&self, slot: usize) -> &DecodedInstr {
        &self.entries[slot]
    }

    /// Mutable access to the entry in `slot`.
    #[inline]
    pub fn get_mut(&mut self, slot: usize) -> &mut DecodedInstr {
        &mut self.entries[slot]
    }

    /// The oldest in-flight entry, if any.
    pub fn head(&self) -> Option<&DecodedInstr> {
        if self.is_empty() {
            None
        } else {
            Some(&self.entries[self.start])
        }
    }

    /// Retires the oldest entry if it has executed.
    ///
    /// Retirement is strictly in program order: Start only ever advances.
    pub fn retire(&mut self) -> Option<DecodedInstr> {
        if self.is_empty() || self.entries[self.start].state != InstrState::Executed {
            return None;
        }
        self.entries[self.start].state = InstrState::Retired;
        let retired = self.entries[self.start].clone();
        self.start = (self.start + 1) % self.entries.len();
        Some(retired)
    }

    /// Squashes every entry newer than `id`, newest first.
    ///
    /// The entry with `id` itself is kept. Returns the squashed entries in
    /// unwind order (newest first) so the caller can roll back rename state
    /// and release queue slots.
    pub fn squash_newer_than(&mut self, id: u8) -> Vec<DecodedInstr> {
        let mut squashed = Vec::new();
        while !self.is_empty() {
            let newest = if self.end == 0 {
                self.entries.len() - 1
            } else {
                self.end - 1
            };
            if self.entries[newest].id == id {
                break;
            }
            self.entries[newest].state = InstrState::Squashed;
            squashed.push(self.entries[newest].clone());
            self.end = newest;
        }
        squashed
    }

    /// Finds the slot holding the entry with `id`, scanning old to new.
    pub fn find(&self, id: u8) -> Option<usize> {
        let mut idx = self.start;
        while idx != self.end {
            if self.entries[idx].id == id {
                return Some(idx);
            }
            idx = (idx + 1) % self.entries.len();
        }
        None
    }
}
