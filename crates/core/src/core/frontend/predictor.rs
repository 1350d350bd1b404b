//! Tournament branch predictor.
//!
//! A hybrid predictor that employs a choice table to select between a
//! global predictor (indexed by the path history of recent outcomes) and a
//! local predictor (indexed by each branch's own history pattern). The
//! `BP_MODE` control field can force fall-through prediction or disable the
//! global side entirely.
//!
//! Prediction happens at fetch; the tables are only written back when a
//! branch retires, using the per-table predictions captured at fetch time.

use crate::common::pc::VirtPc;

/// Entries in the local history table (indexed by low PC bits).
const LOCAL_HISTORY_SIZE: usize = 1024;
/// Bits of history kept per branch.
const LOCAL_HISTORY_BITS: u32 = 10;
/// Entries in the local predictor table (indexed by a history pattern).
const LOCAL_PRED_SIZE: usize = 1 << LOCAL_HISTORY_BITS;
/// Bits of global path history.
const GLOBAL_PATH_BITS: u32 = 12;
/// Entries in the global and choice predictor tables.
const GLOBAL_PRED_SIZE: usize = 1 << GLOBAL_PATH_BITS;

/// `BP_MODE` bit forcing every branch to predict fall-through.
pub const BP_MODE_FALL: u8 = 0b10;
/// `BP_MODE` bit disabling the chooser (local-only prediction).
pub const BP_MODE_LOCAL_ONLY: u8 = 0b01;

/// What the predictor said about one branch, captured for the retire-time
/// table update.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BranchPrediction {
    /// The arbitrated direction.
    pub taken: bool,
    /// What the local predictor said.
    pub local_taken: bool,
    /// What the global predictor said.
    pub global_taken: bool,
    /// Whether the chooser selected the global predictor.
    pub choice: bool,
}

/// Tournament predictor state.
#[derive(Debug)]
pub struct TournamentPredictor {
    /// Per-branch outcome shift registers.
    local_history: Vec<u16>,
    /// 3-bit saturating counters indexed by local history patterns.
    local_pred: Vec<u8>,
    /// Path history of recent branch outcomes.
    global_path: u16,
    /// 2-bit saturating counters indexed by the path history.
    global_pred: Vec<u8>,
    /// 2-bit chooser counters; high half selects the global predictor.
    choice_pred: Vec<u8>,
    /// The `BP_MODE` control field.
    bp_mode: u8,
}

impl TournamentPredictor {
    /// Creates a predictor with the given `BP_MODE` control value.
    pub fn new(bp_mode: u8) -> Self {
        Self {
            local_history: vec![0; LOCAL_HISTORY_SIZE],
            local_pred: vec![0; LOCAL_PRED_SIZE],
            global_path: 0,
            global_pred: vec![0; GLOBAL_PRED_SIZE],
            choice_pred: vec![0; GLOBAL_PRED_SIZE],
            bp_mode,
        }
    }

    /// Replaces the `BP_MODE` control value.
    pub fn set_bp_mode(&mut self, bp_mode: u8) {
        self.bp_mode = bp_mode;
    }

    /// The current global path history (for diagnostics).
    #[inline]
    pub fn global_path(&self) -> u16 {
        self.global_path
    }

    fn local_index(pc: VirtPc) -> usize {
        (pc.slot() as usize) & (LOCAL_HISTORY_SIZE - 1)
    }

    /// Predicts the direction of the branch at `pc`.
    ///
    /// With the fall-through mode bit set, every branch predicts not-taken.
    /// Otherwise the local and global predictions are read and, when they
    /// disagree, the chooser arbitrates; with the chooser disabled the
    /// global side is forced to not-taken so the local prediction wins.
    pub fn predict(&self, pc: VirtPc) -> BranchPrediction {
        if self.bp_mode & BP_MODE_FALL != 0 {
            return BranchPrediction::default();
        }

        let pattern = self.local_history[Self::local_index(pc)] as usize;
        let local_taken = self.local_pred[pattern] >= 4;

        let (global_taken, choice) = if self.bp_mode & BP_MODE_LOCAL_ONLY == 0 {
            let path = self.global_path as usize;
            (self.global_pred[path] >= 2, self.choice_pred[path] >= 2)
        } else {
            (false, false)
        };

        let taken = if local_taken == global_taken {
            local_taken
        } else if choice {
            global_taken
        } else {
            local_taken
        };

        BranchPrediction {
            taken,
            local_taken,
            global_taken,
            choice,
        }
    }

    /// Applies the retire-time update for the branch at `pc`.
    ///
    /// `taken` is the actual outcome; `predicted` is the prediction captured
    /// at fetch. When exactly one predictor was right the chooser counter is
    /// nudged toward it; both direction tables then train toward the
    /// outcome, and the outcome is shifted into the local history entry and
    /// the global path.
    pub fn update(&mut self, pc: VirtPc, taken: bool, predicted: BranchPrediction) {
        let lh_idx = Self::local_index(pc);
        let pattern = self.local_history[lh_idx] as usize;
        let path = self.global_path as usize;

        if taken == predicted.local_taken && taken != predicted.global_taken {
            let c = &mut self.choice_pred[path];
            *c = c.saturating_sub(1);
        } else if taken != predicted.local_taken && taken == predicted.global_taken {
            let c = &mut self.choice_pred[path];
            if *c < 3 {
                *c += 1;
            }
        }

        if taken {
            let lp = &mut self.local_pred[pattern];
            if *lp < 7 {
                *lp += 1;
            }
            let gp = &mut self.global_pred[path];
            if *gp < 3 {
                *gp += 1;
            }
        } else {
            let lp = &mut self.local_pred[pattern];
            *lp = lp.saturating_sub(1);
            let gp = &mut self.global_pred[path];
            *gp = gp.saturating_sub(1);
        }

        self.local_history[lh_idx] =
            ((self.local_history[lh_idx] << 1) | u16::from(taken)) & ((1 << LOCAL_HISTORY_BITS) - 1);
        self.global_path =
            ((self.global_path << 1) | u16::from(taken)) & ((1 << GLOBAL_PATH_BITS) - 1);
    }
}
