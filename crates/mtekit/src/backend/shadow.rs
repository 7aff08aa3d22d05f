//! Software shadow of allocation-tag storage.
//!
//! Emulates the MTE instructions on any host: allocation tags live in a
//! granule-indexed map, payload effects (zeroing, STGP data) are applied to
//! the real memory behind the pointer with its tag stripped, and every
//! store is optionally recorded as a [`TagOp`] so callers can assert which
//! instructions a region operation emitted.
//!
//! Faults are modelled, not delivered: a misaligned STZG/STZ2G/STGP panics
//! with an "alignment fault" message, and [`ShadowTagMemory::check_access`]
//! reports the tag mismatch a real access would fault on.
//!
//! Thread-safe via `parking_lot::Mutex`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use mtekit_core::{
    DGRANULE_SIZE, ExcludeMask, GRANULE_ALIGN_MASK, GRANULE_SIZE, MteError, TaggedAddr, get_tag,
    insert_tag, strip_tag,
};

use super::TagBackend;

/// A tag store recorded by the shadow backend.
///
/// Addresses are untagged and refer to the first byte the instruction
/// covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagOp {
    Stg { addr: usize, tag: u8 },
    St2g { addr: usize, tag: u8 },
    Stzg { addr: usize, tag: u8 },
    Stz2g { addr: usize, tag: u8 },
    Stgp { addr: usize, tag: u8 },
}

impl TagOp {
    /// Bytes of tag storage the instruction covers.
    #[must_use]
    pub const fn span(self) -> usize {
        match self {
            Self::St2g { .. } | Self::Stz2g { .. } => DGRANULE_SIZE,
            Self::Stg { .. } | Self::Stzg { .. } | Self::Stgp { .. } => GRANULE_SIZE,
        }
    }

    #[must_use]
    pub const fn is_double_granule(self) -> bool {
        self.span() == DGRANULE_SIZE
    }
}

#[derive(Default)]
struct ShadowState {
    /// Granule index (address / 16) to allocation tag. Absent means 0.
    tags: HashMap<usize, u8>,
    trace: Vec<TagOp>,
}

/// Emulated MTE tag storage.
pub struct ShadowTagMemory {
    state: Mutex<ShadowState>,
    rng: AtomicU64,
    process_exclude: ExcludeMask,
    record_trace: bool,
}

impl ShadowTagMemory {
    /// Empty tag storage with a fixed random seed and no trace.
    #[must_use]
    pub fn new() -> Self {
        Self::with_seed(0x9E37_79B9_7F4A_7C15)
    }

    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self {
            state: Mutex::new(ShadowState::default()),
            rng: AtomicU64::new(seed),
            process_exclude: ExcludeMask::EMPTY,
            record_trace: false,
        }
    }

    /// Exclude `mask` from every random draw, as the kernel does through
    /// GCR_EL1 for tags outside the process include mask.
    #[must_use]
    pub fn with_process_exclude(mut self, mask: ExcludeMask) -> Self {
        self.process_exclude = mask;
        self
    }

    /// Record every tag store in the trace.
    #[must_use]
    pub fn with_trace(mut self) -> Self {
        self.record_trace = true;
        self
    }

    #[must_use]
    pub fn process_exclude(&self) -> ExcludeMask {
        self.process_exclude
    }

    /// Allocation tag of the granule containing `addr` (tag bits ignored).
    #[must_use]
    pub fn tag_at<P: TaggedAddr>(&self, addr: P) -> u8 {
        let granule = granule_index(addr.addr_bits());
        self.state.lock().tags.get(&granule).copied().unwrap_or(0)
    }

    /// Allocation tags of every granule overlapping `[addr, addr + len)`.
    #[must_use]
    pub fn tags_in<P: TaggedAddr>(&self, addr: P, len: usize) -> Vec<u8> {
        if len == 0 {
            return Vec::new();
        }
        let start = strip_tag(addr.addr_bits());
        let first = granule_index(start);
        let last = granule_index(start + len - 1);
        let state = self.state.lock();
        (first..=last)
            .map(|g| state.tags.get(&g).copied().unwrap_or(0))
            .collect()
    }

    /// Number of granules holding a non-default tag entry.
    #[must_use]
    pub fn granule_count(&self) -> usize {
        self.state.lock().tags.len()
    }

    /// Recorded stores, oldest first.
    #[must_use]
    pub fn trace(&self) -> Vec<TagOp> {
        self.state.lock().trace.clone()
    }

    /// Drain the recorded stores.
    pub fn take_trace(&self) -> Vec<TagOp> {
        std::mem::take(&mut self.state.lock().trace)
    }

    /// Forget all tags and the trace.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.tags.clear();
        state.trace.clear();
    }

    /// Check an access of `len` bytes through `ptr` the way hardware would:
    /// every touched granule must carry the pointer's tag.
    pub fn check_access<P: TaggedAddr>(&self, ptr: P, len: usize) -> Result<(), MteError> {
        if len == 0 {
            return Ok(());
        }
        let pointer_tag = get_tag(ptr);
        let start = strip_tag(ptr.addr_bits());
        let first = granule_index(start);
        let last = granule_index(start + len - 1);
        let state = self.state.lock();
        for granule in first..=last {
            let memory_tag = state.tags.get(&granule).copied().unwrap_or(0);
            if memory_tag != pointer_tag {
                return Err(MteError::TagMismatch {
                    addr: (granule * GRANULE_SIZE).max(start),
                    pointer_tag,
                    memory_tag,
                });
            }
        }
        Ok(())
    }

    fn next_random(&self) -> u64 {
        let mut state = self.rng.fetch_add(0x9E37_79B9_7F4A_7C15, Ordering::Relaxed);
        splitmix64_next(&mut state)
    }

    fn write_tags(&self, addr: usize, granules: usize, tag: u8, op: TagOp) {
        let first = granule_index(addr);
        let mut state = self.state.lock();
        for granule in first..first + granules {
            if tag == 0 {
                state.tags.remove(&granule);
            } else {
                state.tags.insert(granule, tag);
            }
        }
        if self.record_trace {
            state.trace.push(op);
        }
    }
}

impl Default for ShadowTagMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ShadowTagMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ShadowTagMemory")
            .field("granules", &state.tags.len())
            .field("trace_len", &state.trace.len())
            .field("process_exclude", &self.process_exclude)
            .finish()
    }
}

fn granule_index(addr: usize) -> usize {
    strip_tag(addr) / GRANULE_SIZE
}

#[track_caller]
fn require_granule_aligned(op: &str, ptr: *const u8) {
    if ptr.addr() & GRANULE_ALIGN_MASK != 0 {
        panic!("{op}: alignment fault at {:#x}", ptr.addr());
    }
}

fn splitmix64_next(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

unsafe impl TagBackend for ShadowTagMemory {
    const NAME: &'static str = "shadow";
    const DOUBLE_GRANULE: bool = true;

    fn random_tag(&self, addr: usize, exclude: ExcludeMask) -> usize {
        let effective = exclude | self.process_exclude;
        let allowed = effective.allowed_count();
        if allowed == 0 {
            // Architected IRG result with every tag excluded.
            return insert_tag(addr, 0);
        }
        let pick = (self.next_random() % u64::from(allowed)) as usize;
        insert_tag(addr, effective.nth_allowed(pick).unwrap_or(0))
    }

    fn exclude_ptr_tag(&self, mask: ExcludeMask, addr: usize) -> ExcludeMask {
        mask.add_ptr_tag(addr)
    }

    unsafe fn store_tag(&self, ptr: *mut u8) {
        let aligned = strip_tag(ptr.addr()) & !GRANULE_ALIGN_MASK;
        let tag = get_tag(ptr);
        self.write_tags(aligned, 1, tag, TagOp::Stg { addr: aligned, tag });
    }

    unsafe fn store_tag_pair(&self, ptr: *mut u8) {
        let aligned = strip_tag(ptr.addr()) & !GRANULE_ALIGN_MASK;
        let tag = get_tag(ptr);
        self.write_tags(aligned, 2, tag, TagOp::St2g { addr: aligned, tag });
    }

    unsafe fn store_zero_tag(&self, ptr: *mut u8) {
        require_granule_aligned("STZG", ptr);
        let tag = get_tag(ptr);
        let raw = strip_tag(ptr);
        self.write_tags(raw.addr(), 1, tag, TagOp::Stzg { addr: raw.addr(), tag });
        // SAFETY: caller guarantees 16 writable bytes.
        unsafe { raw.write_bytes(0, GRANULE_SIZE) };
    }

    unsafe fn store_zero_tag_pair(&self, ptr: *mut u8) {
        require_granule_aligned("STZ2G", ptr);
        let tag = get_tag(ptr);
        let raw = strip_tag(ptr);
        self.write_tags(raw.addr(), 2, tag, TagOp::Stz2g { addr: raw.addr(), tag });
        // SAFETY: caller guarantees 32 writable bytes.
        unsafe { raw.write_bytes(0, DGRANULE_SIZE) };
    }

    unsafe fn store_tag_with_data(&self, ptr: *mut u8, lo: u64, hi: u64) {
        require_granule_aligned("STGP", ptr);
        let tag = get_tag(ptr);
        let raw = strip_tag(ptr);
        self.write_tags(raw.addr(), 1, tag, TagOp::Stgp { addr: raw.addr(), tag });
        // SAFETY: granule aligned (checked above) and 16 writable bytes per
        // the caller's contract, so both words are aligned and in bounds.
        unsafe {
            raw.cast::<u64>().write(lo);
            raw.cast::<u64>().add(1).write(hi);
        }
    }

    unsafe fn load_pair(&self, src: *const u8) -> (u64, u64) {
        let raw = strip_tag(src);
        // SAFETY: caller guarantees 16 readable bytes at `src`.
        unsafe {
            let lo = raw.cast::<u64>().read_unaligned();
            let hi = raw.add(8).cast::<u64>().read_unaligned();
            (lo, hi)
        }
    }

    unsafe fn load_tag(&self, ptr: *const u8) -> u8 {
        self.tag_at(ptr)
    }
}
