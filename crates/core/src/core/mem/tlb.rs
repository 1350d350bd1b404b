//! Translation buffers (the software-managed TLBs).
//!
//! One structure serves both the instruction and data sides: an array of
//! entries scanned on lookup, filled round-robin on insertion. Each entry
//! maps 1, 8, 64, or 512 contiguous base pages according to its
//! granularity hint, recorded as derived match/keep masks so lookups never
//! recompute page spans.
//!
//! At most one valid entry exists per `(va & match_mask, asn)` pair:
//! insertion updates a matching entry in place rather than allocating a
//! second one.

/// Per-mode protection and fault bits supplied with a fill.
///
/// The instruction side hard-wires its fault bits (readable, executable,
/// never writable); the data side carries the full set from the PTE.
#[derive(Clone, Copy, Debug, Default)]
pub struct TbPte {
    /// Granularity hint (0..=3); the entry spans `8^gh` base pages.
    pub gh: u8,
    /// Address-space number of the owning process.
    pub asn: u8,
    /// Address-space-match: when set the entry is global across ASNs.
    pub asm: bool,
    /// Kernel/executive/supervisor/user read enables.
    pub kre: bool,
    /// Executive read enable.
    pub ere: bool,
    /// Supervisor read enable.
    pub sre: bool,
    /// User read enable.
    pub ure: bool,
    /// Kernel write enable.
    pub kwe: bool,
    /// Executive write enable.
    pub ewe: bool,
    /// Supervisor write enable.
    pub swe: bool,
    /// User write enable.
    pub uwe: bool,
    /// Fault-on-read.
    pub fault_on_read: bool,
    /// Fault-on-write.
    pub fault_on_write: bool,
    /// Fault-on-execute.
    pub fault_on_execute: bool,
}

impl TbPte {
    /// A PTE for the instruction stream: readable per the four enables,
    /// executable, never writable.
    pub fn instruction(gh: u8, asn: u8, asm: bool, kre: bool, ere: bool, sre: bool, ure: bool) -> Self {
        Self {
            gh,
            asn,
            asm,
            kre,
            ere,
            sre,
            ure,
            kwe: false,
            ewe: false,
            swe: false,
            uwe: false,
            fault_on_read: true,
            fault_on_write: false,
            fault_on_execute: true,
        }
    }
}

/// One translation buffer entry.
#[derive(Clone, Copy, Debug, Default)]
pub struct TbEntry {
    /// Whether the entry is in use.
    pub valid: bool,
    /// Owning address-space number.
    pub asn: u8,
    /// Global across ASNs when set.
    pub asm: bool,
    /// Mask selecting the bits of a VA that must equal `virtual_addr`.
    pub match_mask: u64,
    /// Mask selecting the VA bits kept (the offset within the span).
    pub keep_mask: u64,
    /// Base virtual address of the span (pre-masked by `match_mask`).
    pub virtual_addr: u64,
    /// Base physical address of the span (pre-masked).
    pub physical_addr: u64,
    /// Granularity hint the masks were derived from.
    pub gh: u8,
    /// Kernel read enable.
    pub kre: bool,
    /// Executive read enable.
    pub ere: bool,
    /// Supervisor read enable.
    pub sre: bool,
    /// User read enable.
    pub ure: bool,
    /// Kernel write enable.
    pub kwe: bool,
    /// Executive write enable.
    pub ewe: bool,
    /// Supervisor write enable.
    pub swe: bool,
    /// User write enable.
    pub uwe: bool,
    /// Fault-on-read.
    pub fault_on_read: bool,
    /// Fault-on-write.
    pub fault_on_write: bool,
    /// Fault-on-execute.
    pub fault_on_execute: bool,
}

impl TbEntry {
    /// Whether this entry maps `va` (ASN not considered).
    #[inline]
    pub fn maps(&self, va: u64) -> bool {
        self.valid && (va & self.match_mask) == self.virtual_addr
    }

    /// Bytes spanned by this entry.
    #[inline]
    pub fn span_bytes(&self) -> u64 {
        self.keep_mask + 1
    }

    /// Contiguous base pages spanned (`8^gh`).
    #[inline]
    pub fn pages(&self) -> u64 {
        1 << (3 * u32::from(self.gh))
    }
}

/// A translation buffer.
#[derive(Debug)]
pub struct TransBuffer {
    entries: Vec<TbEntry>,
    start: usize,
    end: usize,
    page_size: u64,
}

impl TransBuffer {
    /// Creates a buffer with `entries` slots over `page_size`-byte pages.
    pub fn new(entries: usize, page_size: u64) -> Self {
        debug_assert!(page_size.is_power_of_two());
        Self {
            entries: vec![TbEntry::default(); entries],
            start: 0,
            end: 0,
            page_size,
        }
    }

    /// The configured base page size.
    #[inline]
    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    fn keep_mask(&self, gh: u8) -> u64 {
        self.page_size * (1 << (3 * u32::from(gh))) - 1
    }

    /// Finds the entry mapping `(va, asn)`.
    ///
    /// An entry with the address-space-match flag set matches any ASN.
    pub fn find(&self, va: u64, asn: u8) -> Option<&TbEntry> {
        self.entries
            .iter()
            .find(|e| e.maps(va) && (e.asm || e.asn == asn))
    }

    fn find_mut(&mut self, va: u64, asn: u8) -> Option<&mut TbEntry> {
        self.entries
            .iter_mut()
            .find(|e| e.maps(va) && (e.asm || e.asn == asn))
    }

    /// Whether any valid entry maps `va`, regardless of ASN.
    ///
    /// This is the instruction-stream span check used to distinguish a
    /// cache miss (mapped, fillable) from a translation miss.
    pub fn maps_va(&self, va: u64) -> bool {
        self.entries.iter().any(|e| e.maps(va))
    }

    /// Valid entries currently held.
    pub fn valid_count(&self) -> usize {
        self.entries.iter().filter(|e| e.valid).count()
    }

    /// Inserts a mapping, deriving the masks from the granularity hint.
    ///
    /// If an entry for `(va, pte.asn)` already exists it is updated in
    /// place. Otherwise the round-robin cursor allocates a slot, preferring
    /// an invalid one (scanning cursor→end then 0→cursor); the displaced
    /// valid entry, if any, is returned so the caller can purge whatever
    /// was derived from it (Icache lines on the instruction side).
    pub fn insert(&mut self, va: u64, pa: u64, pte: &TbPte) -> Option<TbEntry> {
        let keep = self.keep_mask(pte.gh);
        let fresh = TbEntry {
            valid: true,
            asn: pte.asn,
            asm: pte.asm,
            match_mask: !keep,
            keep_mask: keep,
            virtual_addr: va & !keep,
            physical_addr: pa & !keep,
            gh: pte.gh,
            kre: pte.kre,
            ere: pte.ere,
            sre: pte.sre,
            ure: pte.ure,
            kwe: pte.kwe,
            ewe: pte.ewe,
            swe: pte.swe,
            uwe: pte.uwe,
            fault_on_read: pte.fault_on_read,
            fault_on_write: pte.fault_on_write,
            fault_on_execute: pte.fault_on_execute,
        };

        if let Some(existing) = self.find_mut(va, pte.asn) {
            *existing = fresh;
            return None;
        }

        let slot = self.end;
        let displaced = self.entries[slot].valid.then(|| self.entries[slot]);
        self.entries[slot] = fresh;

        // Advance the cursor, preferring a free slot: scan from the new
        // cursor position to the end of the array, then from the front
        // back up to it.
        self.end = (self.end + 1) % self.entries.len();
        if self.entries[self.end].valid {
            let len = self.entries.len();
            let found = (self.end..len)
                .chain(0..self.end)
                .find(|&i| !self.entries[i].valid);
            match found {
                Some(free) => self.end = free,
                None => {
                    if self.end == self.start {
                        self.start = (self.start + 1) % len;
                    }
                }
            }
        }

        displaced
    }

    /// Invalidates every entry and resets the allocation cursors.
    pub fn invalidate_all(&mut self) {
        for e in &mut self.entries {
            e.valid = false;
        }
        self.start = 0;
        self.end = 0;
    }

    /// Invalidates the process-private entries (those without the
    /// address-space-match flag).
    pub fn invalidate_process(&mut self) {
        for e in &mut self.entries {
            if !e.asm {
                e.valid = false;
            }
        }
    }

    /// Invalidates the single entry mapping `(va, asn)`, if present.
    pub fn invalidate_single(&mut self, va: u64, asn: u8) {
        if let Some(e) = self.find_mut(va, asn) {
            e.valid = false;
        }
    }
}
