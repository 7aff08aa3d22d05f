//! Region tagging and random tag generation over any [`TagBackend`].
//!
//! A [`Tagger`] pairs a backend with the [`MteConfig`] captured at
//! construction. Every operation is stateless: nothing is retained between
//! calls and no heap memory is allocated.
//!
//! Region operations walk `[ptr, ptr + size)` one granule at a time, or,
//! when the double-granule path is in effect, peel one leading granule if
//! the size is an odd number of granules and then store two granules per
//! instruction. Iteration is bounded by the end address, so after the peel
//! the remaining span is always a whole number of double granules.

use mtekit_core::contract::enforce_region;
use mtekit_core::{
    Criticality, DGRANULE_ALIGN_MASK, DGRANULE_SIZE, ExcludeMask, GRANULE_ALIGN_MASK,
    GRANULE_SIZE, MteConfig, TaggedAddr, get_tag, insert_tag, set_tag_with,
};

use crate::backend::TagBackend;

#[derive(Clone, Copy)]
enum Fill {
    Tag,
    TagAndZero,
}

/// MTE operations bound to one backend and one configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct Tagger<B> {
    backend: B,
    config: MteConfig,
}

impl<B: TagBackend> Tagger<B> {
    /// Bind `backend` under [`MteConfig::BUILD`].
    #[must_use]
    pub const fn new(backend: B) -> Self {
        Self::with_config(backend, MteConfig::BUILD)
    }

    #[must_use]
    pub const fn with_config(backend: B, config: MteConfig) -> Self {
        Self { backend, config }
    }

    #[must_use]
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    #[must_use]
    pub fn into_backend(self) -> B {
        self.backend
    }

    #[must_use]
    pub const fn config(&self) -> MteConfig {
        self.config
    }

    /// Whether region operations use the double-granule instructions.
    #[must_use]
    pub const fn uses_double_granule(&self) -> bool {
        self.config.double_granule && B::DOUBLE_GRANULE
    }

    /// Replace the tag of `ptr`, checked under this tagger's configuration.
    #[must_use]
    #[track_caller]
    pub fn set_tag<P: TaggedAddr>(&self, ptr: P, tag: u8) -> P {
        set_tag_with(self.config, ptr, tag)
    }

    #[must_use]
    pub fn get_tag<P: TaggedAddr>(&self, ptr: P) -> u8 {
        get_tag(ptr)
    }

    #[must_use]
    #[track_caller]
    pub fn exclude_add_tag(&self, mask: ExcludeMask, tag: u8) -> ExcludeMask {
        mask.add_tag_with(self.config, tag)
    }

    #[must_use]
    #[track_caller]
    pub fn exclude_remove_tag(&self, mask: ExcludeMask, tag: u8) -> ExcludeMask {
        mask.remove_tag_with(self.config, tag)
    }

    /// Exclude the tag currently embedded in `ptr` (GMI).
    #[must_use]
    pub fn exclude_add_ptr_tag<P: TaggedAddr>(&self, mask: ExcludeMask, ptr: P) -> ExcludeMask {
        self.backend.exclude_ptr_tag(mask, ptr.addr_bits())
    }

    /// `ptr` with a random tag whose bit is clear in `exclude` (IRG).
    ///
    /// With every tag excluded the result carries tag 0; the backend is not
    /// consulted.
    #[must_use]
    pub fn set_random_tag<P: TaggedAddr>(&self, ptr: P, exclude: ExcludeMask) -> P {
        if exclude.is_full() {
            return insert_tag(ptr, 0);
        }
        ptr.with_addr_bits(self.backend.random_tag(ptr.addr_bits(), exclude))
    }

    /// Allocation tag of the granule containing `ptr` (LDG).
    ///
    /// # Safety
    ///
    /// The granule must be mapped with tagging enabled.
    #[must_use]
    pub unsafe fn load_tag<T>(&self, ptr: *const T) -> u8 {
        // SAFETY: forwarded contract.
        unsafe { self.backend.load_tag(ptr.cast()) }
    }

    /// Tag every granule of `[ptr, ptr + size)` with `ptr`'s tag.
    ///
    /// `ptr` and `size` should be granule aligned; with full alignment
    /// checks a violation aborts before any store. When the check is skipped
    /// (relaxed or off) the region is widened to whole granules,
    /// `[align_down(ptr), align_up(ptr + size))`, so more than `size` bytes
    /// get tagged but none of the requested bytes is missed. Payload bytes
    /// are untouched. A region whose end does not fit in an address aborts
    /// at every check level.
    ///
    /// # Safety
    ///
    /// Every granule overlapping the region must be mapped with tagging
    /// enabled, and no other thread may access it through a pointer whose
    /// tag is about to change.
    #[track_caller]
    pub unsafe fn tag_region<T>(&self, ptr: *mut T, size: usize) {
        let ptr = ptr.cast::<u8>();
        let end = enforce_region(self.config.alignment, Criticality::Advisory, ptr.addr(), size);
        if size == 0 {
            return;
        }
        let start = ptr.addr() & !GRANULE_ALIGN_MASK;
        // SAFETY: caller guarantees the widened region is tag-mapped.
        unsafe { self.fill(ptr.with_addr(start), end - start, Fill::Tag) }
    }

    /// Tag `[ptr, ptr + size)` with `ptr`'s tag and zero its payload, one
    /// instruction per granule or double granule.
    ///
    /// `ptr` and `size` must be granule aligned. The check is critical: it
    /// runs under full and relaxed alignment checks, because the zeroing
    /// instructions fault on a misaligned pointer.
    ///
    /// # Safety
    ///
    /// The region must be writable and mapped with tagging enabled. With
    /// alignment checks off, misaligned input is the caller's risk.
    #[track_caller]
    pub unsafe fn tag_and_zero_region<T>(&self, ptr: *mut T, size: usize) {
        let ptr = ptr.cast::<u8>();
        enforce_region(self.config.alignment, Criticality::Critical, ptr.addr(), size);
        // SAFETY: caller guarantees the region is writable and tag-mapped.
        unsafe { self.fill(ptr, size, Fill::TagAndZero) }
    }

    /// Copy `size` bytes from `src` to `dst`, tagging `dst`'s granules with
    /// `dst`'s tag. One granule per step: there is no double-granule form
    /// of the combined store.
    ///
    /// `dst` and `size` must be granule aligned (critical check, as for
    /// [`Self::tag_and_zero_region`]). `src` may have any alignment and is
    /// only read.
    ///
    /// # Safety
    ///
    /// `src` must be readable and `dst` writable and tag-mapped for `size`
    /// bytes, and the two ranges must not overlap. With alignment checks
    /// off, misaligned input is the caller's risk.
    #[track_caller]
    pub unsafe fn tag_and_copy_region<T, U>(&self, dst: *mut T, src: *const U, size: usize) {
        let mut dst = dst.cast::<u8>();
        let mut src = src.cast::<u8>();
        enforce_region(self.config.alignment, Criticality::Critical, dst.addr(), size);
        // Cannot overflow: `enforce_region` checked the rounded end.
        let end = dst.addr() + size;
        while dst.addr() < end {
            // SAFETY: both cursors stay inside the caller's ranges.
            unsafe {
                let (lo, hi) = self.backend.load_pair(src);
                self.backend.store_tag_with_data(dst, lo, hi);
            }
            dst = dst.wrapping_add(GRANULE_SIZE);
            src = src.wrapping_add(GRANULE_SIZE);
        }
    }

    /// # Safety
    ///
    /// `[ptr, ptr + len)` must satisfy the contract of the stores `fill`
    /// selects.
    unsafe fn fill(&self, ptr: *mut u8, len: usize, fill: Fill) {
        let end = ptr.addr() + len;
        let mut cur = ptr;
        // SAFETY (all blocks below): `cur` never passes `end`, and each store
        // covers at most `end - cur` bytes, the last one rounding up only
        // when the caller skipped the size check.
        if self.uses_double_granule() {
            if len & DGRANULE_ALIGN_MASK != 0 {
                unsafe { self.store_single(cur, fill) };
                cur = cur.wrapping_add(GRANULE_SIZE);
            }
            while cur.addr() < end {
                unsafe { self.store_double(cur, fill) };
                cur = cur.wrapping_add(DGRANULE_SIZE);
            }
        } else {
            while cur.addr() < end {
                unsafe { self.store_single(cur, fill) };
                cur = cur.wrapping_add(GRANULE_SIZE);
            }
        }
    }

    #[inline]
    unsafe fn store_single(&self, ptr: *mut u8, fill: Fill) {
        // SAFETY: forwarded from `fill`.
        unsafe {
            match fill {
                Fill::Tag => self.backend.store_tag(ptr),
                Fill::TagAndZero => self.backend.store_zero_tag(ptr),
            }
        }
    }

    #[inline]
    unsafe fn store_double(&self, ptr: *mut u8, fill: Fill) {
        // SAFETY: forwarded from `fill`.
        unsafe {
            match fill {
                Fill::Tag => self.backend.store_tag_pair(ptr),
                Fill::TagAndZero => self.backend.store_zero_tag_pair(ptr),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::shadow::{ShadowTagMemory, TagOp};
    use mtekit_core::AlignmentChecks;

    #[repr(C, align(32))]
    struct Granules([u8; 128]);

    fn shadow_tagger(config: MteConfig) -> Tagger<ShadowTagMemory> {
        Tagger::with_config(ShadowTagMemory::new().with_trace(), config)
    }

    #[test]
    fn odd_granule_count_peels_one_single_store() {
        let mut buf = Granules([0; 128]);
        let tagger = shadow_tagger(MteConfig::strict());
        let base = buf.0.as_mut_ptr();
        let ptr = tagger.set_tag(base, 4);
        // SAFETY: shadow backend; buffer is 128 bytes.
        unsafe { tagger.tag_region(ptr, 48) };

        let addr = base.addr();
        assert_eq!(
            tagger.backend().trace(),
            vec![
                TagOp::Stg { addr, tag: 4 },
                TagOp::St2g { addr: addr + 16, tag: 4 },
            ]
        );
    }

    #[test]
    fn single_granule_path_when_fast_path_disabled() {
        let mut buf = Granules([0; 128]);
        let tagger = shadow_tagger(MteConfig::strict().with_double_granule(false));
        assert!(!tagger.uses_double_granule());
        let base = buf.0.as_mut_ptr();
        // SAFETY: shadow backend; buffer is 128 bytes.
        unsafe { tagger.tag_region(tagger.set_tag(base, 4), 48) };

        let ops = tagger.backend().trace();
        assert_eq!(ops.len(), 3);
        assert!(ops.iter().all(|op| matches!(op, TagOp::Stg { tag: 4, .. })));
    }

    #[test]
    fn even_granule_count_uses_only_double_stores() {
        let mut buf = Granules([0; 128]);
        let tagger = shadow_tagger(MteConfig::strict());
        // SAFETY: shadow backend; buffer is 128 bytes.
        unsafe { tagger.tag_region(tagger.set_tag(buf.0.as_mut_ptr(), 1), 128) };
        let ops = tagger.backend().trace();
        assert_eq!(ops.len(), 4);
        assert!(ops.iter().all(|op| op.is_double_granule()));
    }

    #[test]
    fn zero_size_emits_nothing() {
        let mut buf = Granules([0xAA; 128]);
        let tagger = shadow_tagger(MteConfig::strict());
        let base = buf.0.as_mut_ptr();
        let src = [0x55_u8; 16];
        // SAFETY: zero-length operations touch nothing.
        unsafe {
            tagger.tag_region(tagger.set_tag(base, 2), 0);
            tagger.tag_and_zero_region(tagger.set_tag(base, 2), 0);
            tagger.tag_and_copy_region(tagger.set_tag(base, 2), src.as_ptr(), 0);
        }
        assert!(tagger.backend().trace().is_empty());
        assert!(buf.0.iter().all(|&b| b == 0xAA));
    }

    #[test]
    fn misaligned_region_is_widened_when_advisory_checks_are_off() {
        let mut buf = Granules([0; 128]);
        let tagger = shadow_tagger(MteConfig::strict().with_alignment(AlignmentChecks::Relaxed));
        let base = buf.0.as_mut_ptr();
        // Bytes [8, 40) straddle granules 0, 1 and 2.
        // SAFETY: shadow backend; widened region stays inside the buffer.
        unsafe { tagger.tag_region(tagger.set_tag(base.wrapping_add(8), 6), 32) };
        assert_eq!(tagger.backend().tags_in(base, 64), vec![6, 6, 6, 0]);
    }

    #[test]
    #[should_panic(expected = "misaligned pointer")]
    fn misaligned_region_aborts_under_full_checks() {
        let mut buf = Granules([0; 128]);
        let tagger = shadow_tagger(MteConfig::strict());
        // SAFETY: aborts before any store.
        unsafe { tagger.tag_region(buf.0.as_mut_ptr().wrapping_add(8), 32) };
    }

    #[test]
    fn random_tag_with_full_mask_is_zero() {
        let tagger = shadow_tagger(MteConfig::strict());
        let ptr = tagger.set_tag(0x7000_usize, 9);
        assert_eq!(tagger.set_random_tag(ptr, ExcludeMask::ALL), 0x7000);
    }

    #[test]
    fn hardware_ptr_tag_exclusion_matches_software() {
        let tagger = shadow_tagger(MteConfig::strict());
        for tag in 0..16 {
            let ptr = tagger.set_tag(0x7000_usize, tag);
            assert_eq!(
                tagger.exclude_add_ptr_tag(ExcludeMask::EMPTY, ptr),
                ExcludeMask::EMPTY.add_ptr_tag(ptr)
            );
        }
    }
}
