//! Data cache.
//!
//! Two-way set-associative, virtually indexed and physically tagged, with
//! 64-byte lines and writeback on eviction. The virtual index carries two
//! bits (the index counter) that sit above the page-offset boundary, so a
//! physically-present line may live under any of four index values; every
//! lookup checks the nominal index first and then the three alternates.
//!
//! Line state machine: `Invalid → Valid-Clean → Valid-Modified →
//! (probe/eviction) Invalid`. The shared flag is orthogonal, set from
//! coherence responses delivered by the external memory system.

use crate::common::addr::VirtAddr;
use crate::common::constants::{DCACHE_BLOCK, DCACHE_ENTRIES, DCACHE_WAYS};

/// A dirty victim to hand to the external memory system.
#[derive(Clone, Copy, Debug)]
pub struct Writeback {
    /// Physical address of the evicted block.
    pub pa: u64,
    /// The block contents.
    pub data: [u8; DCACHE_BLOCK],
}

#[derive(Clone, Copy, Debug)]
struct DCacheLine {
    phys_tag: u64,
    valid: bool,
    dirty: bool,
    modified: bool,
    shared: bool,
    data: [u8; DCACHE_BLOCK],
}

impl DCacheLine {
    const fn empty() -> Self {
        Self {
            phys_tag: 0,
            valid: false,
            dirty: false,
            modified: false,
            shared: false,
            data: [0; DCACHE_BLOCK],
        }
    }

    fn reset(&mut self) {
        *self = Self::empty();
    }
}

/// The data cache.
#[derive(Debug)]
pub struct DataCache {
    lines: Vec<DCacheLine>,
    /// Per-index pseudo-LRU selector: set when way 0 was filled last.
    set_lru: Vec<bool>,
}

#[inline]
fn block_tag(pa: u64) -> u64 {
    pa & !(DCACHE_BLOCK as u64 - 1)
}

impl DataCache {
    /// Creates an empty data cache.
    pub fn new() -> Self {
        Self {
            lines: vec![DCacheLine::empty(); DCACHE_ENTRIES * DCACHE_WAYS],
            set_lru: vec![false; DCACHE_ENTRIES],
        }
    }

    #[inline]
    fn slot(index: usize, way: usize) -> usize {
        index * DCACHE_WAYS + way
    }

    /// Searches the nominal index and the three index-counter alternates
    /// for a valid line tagged `pa`.
    fn locate(&self, va: VirtAddr, pa: u64) -> Option<(usize, usize)> {
        let tag = block_tag(pa);
        let nominal = va.dc_counter();

        let index = va.dc_index();
        for way in 0..DCACHE_WAYS {
            let line = &self.lines[Self::slot(index, way)];
            if line.valid && line.phys_tag == tag {
                return Some((index, way));
            }
        }

        for counter in 0..4 {
            if counter == nominal {
                continue;
            }
            let index = va.with_dc_counter(counter).dc_index();
            for way in 0..DCACHE_WAYS {
                let line = &self.lines[Self::slot(index, way)];
                if line.valid && line.phys_tag == tag {
                    return Some((index, way));
                }
            }
        }
        None
    }

    /// Installs the block for `(va, pa)`.
    ///
    /// Adding an already-present block is a no-op, so the operation is
    /// idempotent. Otherwise the nominal index takes the block: an invalid
    /// way if one exists, else the pseudo-LRU victim. A modified victim is
    /// returned for writeback — the caller must dispatch it to the memory
    /// system before treating the fill as complete.
    pub fn add(&mut self, va: VirtAddr, pa: u64, data: &[u8; DCACHE_BLOCK]) -> Option<Writeback> {
        if self.locate(va, pa).is_some() {
            return None;
        }

        let index = va.dc_index();
        let mut writeback = None;

        let way = if !self.lines[Self::slot(index, 0)].valid {
            self.set_lru[index] = true;
            0
        } else if !self.lines[Self::slot(index, 1)].valid {
            self.set_lru[index] = false;
            1
        } else {
            let way = if self.set_lru[index] { 1 } else { 0 };
            self.set_lru[index] = way == 0;
            let victim = &mut self.lines[Self::slot(index, way)];
            if victim.modified {
                writeback = Some(Writeback {
                    pa: victim.phys_tag,
                    data: victim.data,
                });
                victim.modified = false;
            }
            way
        };

        let line = &mut self.lines[Self::slot(index, way)];
        line.data = *data;
        line.phys_tag = block_tag(pa);
        line.dirty = false;
        line.modified = false;
        line.shared = false;
        line.valid = true;

        writeback
    }

    /// Looks up the block for `(va, pa)` without inserting.
    pub fn fetch(&self, va: VirtAddr, pa: u64) -> Option<&[u8; DCACHE_BLOCK]> {
        self.locate(va, pa)
            .map(|(index, way)| &self.lines[Self::slot(index, way)].data)
    }

    /// Writes `bytes` into a present block at the VA's line offset,
    /// marking it dirty and modified. Returns false on a miss.
    pub fn store(&mut self, va: VirtAddr, pa: u64, bytes: &[u8]) -> bool {
        let Some((index, way)) = self.locate(va, pa) else {
            return false;
        };
        let offset = va.dc_offset();
        debug_assert!(offset + bytes.len() <= DCACHE_BLOCK);
        let line = &mut self.lines[Self::slot(index, way)];
        line.data[offset..offset + bytes.len()].copy_from_slice(bytes);
        line.dirty = true;
        line.modified = true;
        true
    }

    /// Invalidates every line, returning the modified ones for writeback.
    pub fn flush(&mut self) -> Vec<Writeback> {
        let mut writebacks = Vec::new();
        for line in &mut self.lines {
            if line.valid && line.modified {
                writebacks.push(Writeback {
                    pa: line.phys_tag,
                    data: line.data,
                });
            }
            line.reset();
        }
        for bit in &mut self.set_lru {
            *bit = false;
        }
        writebacks
    }

    /// System probe: invalidates the block tagged `pa` wherever it sits,
    /// returning its contents for writeback if it was modified.
    pub fn probe_invalidate(&mut self, pa: u64) -> Option<Writeback> {
        let tag = block_tag(pa);
        for line in &mut self.lines {
            if line.valid && line.phys_tag == tag {
                let writeback = line.modified.then(|| Writeback {
                    pa: line.phys_tag,
                    data: line.data,
                });
                line.reset();
                return writeback;
            }
        }
        None
    }

    /// Marks the block tagged `pa` shared (from a coherence response).
    pub fn mark_shared(&mut self, pa: u64) {
        let tag = block_tag(pa);
        for line in &mut self.lines {
            if line.valid && line.phys_tag == tag {
                line.shared = true;
            }
        }
    }

    /// Snapshot of a line's flags, for tests and diagnostics:
    /// `(valid, dirty, modified, shared)`.
    pub fn line_flags(&self, index: usize, way: usize) -> (bool, bool, bool, bool) {
        let line = &self.lines[Self::slot(index, way)];
        (line.valid, line.dirty, line.modified, line.shared)
    }

    /// The physical tag of a line, for tests and diagnostics.
    pub fn line_tag(&self, index: usize, way: usize) -> u64 {
        self.lines[Self::slot(index, way)].phys_tag
    }
}

impl Default for DataCache {
    fn default() -> Self {
        Self::new()
    }
}
