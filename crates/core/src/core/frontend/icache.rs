//! Instruction cache with line/set prediction.
//!
//! Two-way set-associative, indexed and tagged by the slot-granular PC.
//! Each line carries the protection bits of the ITB entry that mapped it,
//! the PAL-mode flag, and a block of sixteen instructions. A fetch returns
//! four instructions (pre-classified by format) plus the predicted line and
//! set of the next fetch.
//!
//! A lookup that misses the cache is classified against the ITB: if some
//! ITB entry maps the PC the result is `Miss` (ask the memory system to
//! fill); otherwise it is `WayMiss` and the fetch stage must divert to the
//! ITB-miss PAL handler.

use crate::common::constants::{FETCH_WIDTH, ICACHE_LINES, ICACHE_LINE_INS, ICACHE_WAYS};
use crate::common::pc::VirtPc;
use crate::core::mem::tlb::{TbEntry, TransBuffer};
use crate::isa::decode::{self, InstrFormat};

/// Result class of an Icache lookup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheStatus {
    /// Tag matched a valid line.
    Hit,
    /// Not cached, but an ITB entry maps the PC: a fill will succeed.
    Miss,
    /// Not cached and unmapped: divert to the ITB-miss handler.
    WayMiss,
}

/// A fetched bundle of four instructions with the next-fetch prediction.
#[derive(Clone, Copy, Debug)]
pub struct FetchedBundle {
    /// The raw instruction words.
    pub words: [u32; FETCH_WIDTH],
    /// Format classification of each word.
    pub formats: [InstrFormat; FETCH_WIDTH],
    /// The PC of each slot.
    pub pcs: [VirtPc; FETCH_WIDTH],
    /// Predicted line (index) of the next fetch.
    pub line_prediction: u32,
    /// Predicted set of the next fetch.
    pub set_prediction: u32,
}

/// Outcome of [`ICache::fetch`].
#[derive(Clone, Copy, Debug)]
pub enum IFetchOutcome {
    /// Four instructions and the next-line/next-set prediction.
    Hit(FetchedBundle),
    /// Mapped but not cached; request a fill.
    Miss,
    /// Unmapped; raise `ITB_MISS`.
    WayMiss,
}

/// One Icache line.
#[derive(Clone, Copy, Debug)]
struct ICacheLine {
    tag: u64,
    valid: bool,
    kre: bool,
    ere: bool,
    sre: bool,
    ure: bool,
    asm: bool,
    asn: u8,
    pal: bool,
    instrs: [u32; ICACHE_LINE_INS],
}

impl ICacheLine {
    const fn empty() -> Self {
        Self {
            tag: 0,
            valid: false,
            kre: false,
            ere: false,
            sre: false,
            ure: false,
            asm: false,
            asn: 0,
            pal: false,
            instrs: [0; ICACHE_LINE_INS],
        }
    }
}

/// The instruction cache.
#[derive(Debug)]
pub struct ICache {
    lines: Vec<ICacheLine>,
    ic_en: u8,
}

const OFFSET_BITS: u32 = 4; // 16 instructions per line
const INDEX_BITS: u32 = 9; // 512 lines
const SET_SHIFT: u32 = OFFSET_BITS + INDEX_BITS;
const TAG_SHIFT: u32 = SET_SHIFT + 1;

fn split_pc(pc: VirtPc) -> (usize, u32, u64, usize) {
    let slot = pc.slot();
    // Bundles are naturally aligned octawords.
    let offset = (slot as usize & (ICACHE_LINE_INS - 1)) & !(FETCH_WIDTH - 1);
    let index = ((slot >> OFFSET_BITS) as usize) & (ICACHE_LINES - 1);
    let set = ((slot >> SET_SHIFT) & 1) as u32;
    let tag = slot >> TAG_SHIFT;
    (index, set, tag, offset)
}

impl ICache {
    /// Creates an empty cache with the given set-enable control.
    pub fn new(ic_en: u8) -> Self {
        Self {
            lines: vec![ICacheLine::empty(); ICACHE_LINES * ICACHE_WAYS],
            ic_en,
        }
    }

    /// Replaces the set-enable control (1 = set 0 only, 2 = set 1 only,
    /// 0/3 = both).
    pub fn set_enables(&mut self, ic_en: u8) {
        self.ic_en = ic_en;
    }

    fn resolve_set(&self, addr_set: u32) -> u32 {
        match self.ic_en {
            1 => 0,
            2 => 1,
            _ => addr_set,
        }
    }

    #[inline]
    fn line(&self, index: usize, set: u32) -> &ICacheLine {
        &self.lines[index * ICACHE_WAYS + set as usize]
    }

    #[inline]
    fn line_mut(&mut self, index: usize, set: u32) -> &mut ICacheLine {
        &mut self.lines[index * ICACHE_WAYS + set as usize]
    }

    /// Fetches the four-instruction bundle at `pc`.
    ///
    /// On a hit the bundle is returned together with the line/set
    /// prediction for the next fetch: a fetch that leaves instructions in
    /// the line predicts the same line and set; one that exhausts it steps
    /// to the next line (single-set operation), to the other set on the
    /// same line (from set 0), or to the next line's set 0 (from set 1).
    pub fn fetch(&self, pc: VirtPc, itb: &TransBuffer) -> IFetchOutcome {
        let (index, addr_set, tag, offset) = split_pc(pc);
        let set = self.resolve_set(addr_set);

        let line = self.line(index, set);
        if line.valid && line.tag == tag {
            let mut words = [0u32; FETCH_WIDTH];
            let mut formats = [InstrFormat::Res; FETCH_WIDTH];
            let mut pcs = [pc; FETCH_WIDTH];
            let mut slot_pc = pc;
            for ii in 0..FETCH_WIDTH {
                words[ii] = line.instrs[offset + ii];
                formats[ii] = decode::classify_format(words[ii]);
                pcs[ii] = slot_pc;
                slot_pc = slot_pc.incr();
            }

            let (line_prediction, set_prediction) =
                if offset + FETCH_WIDTH + 1 < ICACHE_LINE_INS {
                    (index as u32, set)
                } else if self.ic_en == 1 || self.ic_en == 2 {
                    (index as u32 + 1, set)
                } else if set == 0 {
                    (index as u32, 1)
                } else {
                    (index as u32 + 1, 0)
                };

            return IFetchOutcome::Hit(FetchedBundle {
                words,
                formats,
                pcs,
                line_prediction,
                set_prediction,
            });
        }

        if itb.maps_va(pc.va().val()) {
            IFetchOutcome::Miss
        } else {
            IFetchOutcome::WayMiss
        }
    }

    /// Classifies `pc` without extracting instructions.
    ///
    /// Returns the status plus the index and set the PC resolves to, for
    /// steering the line/set predictors at a predicted branch target.
    pub fn is_valid(&self, pc: VirtPc, itb: &TransBuffer) -> (CacheStatus, u32, u32) {
        let (index, addr_set, tag, _) = split_pc(pc);
        let set = self.resolve_set(addr_set);

        let line = self.line(index, set);
        if line.valid && line.tag == tag {
            return (CacheStatus::Hit, index as u32, set);
        }
        let status = if itb.maps_va(pc.va().val()) {
            CacheStatus::Miss
        } else {
            CacheStatus::WayMiss
        };
        (status, index as u32, set)
    }

    /// Fills the line covering `pc` with `block`, copying the protection
    /// bits, address-space fields, and PAL flag from the mapping ITB entry.
    ///
    /// Icache lines are never dirty, so an occupied line is evicted
    /// silently.
    pub fn add(&mut self, pc: VirtPc, block: &[u32; ICACHE_LINE_INS], entry: &TbEntry) {
        let (index, addr_set, tag, _) = split_pc(pc);
        let set = self.resolve_set(addr_set);
        let pal = pc.pal();

        let line = self.line_mut(index, set);
        line.kre = entry.kre;
        line.ere = entry.ere;
        line.sre = entry.sre;
        line.ure = entry.ure;
        line.asm = entry.asm;
        line.asn = entry.asn;
        line.pal = pal;
        line.tag = tag;
        line.instrs = *block;
        line.valid = true;
    }

    /// Invalidates every line whose instructions fall inside the virtual
    /// span `[va, va + bytes)`. Called when the mapping ITB entry is
    /// displaced.
    pub fn invalidate_span(&mut self, va: u64, bytes: u64) {
        let (set_start, set_end) = match self.ic_en {
            1 => (0u64, 1u64),
            2 => (1, 2),
            _ => (0, 2),
        };
        for index in 0..ICACHE_LINES as u64 {
            for set in set_start..set_end {
                let line = &mut self.lines[(index as usize) * ICACHE_WAYS + set as usize];
                if !line.valid {
                    continue;
                }
                let slot_base = (line.tag << TAG_SHIFT) | (set << SET_SHIFT) | (index << OFFSET_BITS);
                let line_va = slot_base << 2;
                let line_bytes = (ICACHE_LINE_INS as u64) * 4;
                if line_va < va + bytes && va < line_va + line_bytes {
                    line.valid = false;
                }
            }
        }
    }

    /// Invalidates every line.
    pub fn flush(&mut self) {
        for line in &mut self.lines {
            line.valid = false;
        }
    }

    /// Whether the line holding `pc` is valid (test/diagnostic aid).
    pub fn contains(&self, pc: VirtPc) -> bool {
        let (index, addr_set, tag, _) = split_pc(pc);
        let set = self.resolve_set(addr_set);
        let line = self.line(index, set);
        line.valid && line.tag == tag
    }
}
