//! Tag storage strategies.
//!
//! A [`TagBackend`] exposes the MTE instructions one at a time. The region
//! operations in [`crate::Tagger`] are written once against this trait, so
//! the choice between inline instruction sequences, compiler intrinsics, or
//! the software shadow is made by picking a type, never by branching inside
//! an operation.

#[cfg(all(target_arch = "aarch64", feature = "asm"))]
pub mod asm;
#[cfg(all(target_arch = "aarch64", feature = "intrinsics"))]
pub mod intrinsics;
pub mod shadow;

use mtekit_core::ExcludeMask;

/// One granule-level tagging instruction.
///
/// # Safety
///
/// Implementations must give every method the architectural effect it
/// documents: the tag written for a granule is the tag carried by the
/// pointer argument, zeroing and data stores cover exactly the named
/// granules, and nothing else in memory changes.
pub unsafe trait TagBackend {
    /// Short name for logs and reports.
    const NAME: &'static str;
    /// Whether [`Self::store_tag_pair`] and [`Self::store_zero_tag_pair`]
    /// are single instructions rather than two single-granule stores.
    const DOUBLE_GRANULE: bool;

    /// IRG: `addr` with a random tag whose bit is clear in `exclude`.
    fn random_tag(&self, addr: usize, exclude: ExcludeMask) -> usize;

    /// GMI: `mask` plus the tag embedded in `addr`.
    fn exclude_ptr_tag(&self, mask: ExcludeMask, addr: usize) -> ExcludeMask;

    /// STG: tag the granule containing `ptr` with `ptr`'s tag.
    ///
    /// # Safety
    ///
    /// The granule must be mapped with tagging enabled.
    unsafe fn store_tag(&self, ptr: *mut u8);

    /// ST2G: tag the two granules starting at `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must be granule aligned and both granules mapped with tagging.
    unsafe fn store_tag_pair(&self, ptr: *mut u8);

    /// STZG: tag and zero the granule at `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must be granule aligned (hardware faults otherwise) and valid
    /// for 16 bytes of writes.
    unsafe fn store_zero_tag(&self, ptr: *mut u8);

    /// STZ2G: tag and zero the two granules at `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must be granule aligned and valid for 32 bytes of writes.
    unsafe fn store_zero_tag_pair(&self, ptr: *mut u8);

    /// STGP: tag the granule at `ptr` and store `lo`, `hi` as its payload.
    ///
    /// # Safety
    ///
    /// `ptr` must be granule aligned and valid for 16 bytes of writes.
    unsafe fn store_tag_with_data(&self, ptr: *mut u8, lo: u64, hi: u64);

    /// LDP: load one granule's worth of payload from `src`.
    ///
    /// # Safety
    ///
    /// `src` must be valid for 16 bytes of reads. No alignment is required.
    unsafe fn load_pair(&self, src: *const u8) -> (u64, u64) {
        // SAFETY: caller guarantees 16 readable bytes at `src`.
        unsafe {
            let lo = src.cast::<u64>().read_unaligned();
            let hi = src.add(8).cast::<u64>().read_unaligned();
            (lo, hi)
        }
    }

    /// LDG: the allocation tag stored for the granule containing `ptr`.
    ///
    /// # Safety
    ///
    /// The granule must be mapped with tagging enabled.
    unsafe fn load_tag(&self, ptr: *const u8) -> u8;
}

unsafe impl<B: TagBackend> TagBackend for &B {
    const NAME: &'static str = B::NAME;
    const DOUBLE_GRANULE: bool = B::DOUBLE_GRANULE;

    fn random_tag(&self, addr: usize, exclude: ExcludeMask) -> usize {
        (**self).random_tag(addr, exclude)
    }

    fn exclude_ptr_tag(&self, mask: ExcludeMask, addr: usize) -> ExcludeMask {
        (**self).exclude_ptr_tag(mask, addr)
    }

    unsafe fn store_tag(&self, ptr: *mut u8) {
        // SAFETY: forwarded contract.
        unsafe { (**self).store_tag(ptr) }
    }

    unsafe fn store_tag_pair(&self, ptr: *mut u8) {
        // SAFETY: forwarded contract.
        unsafe { (**self).store_tag_pair(ptr) }
    }

    unsafe fn store_zero_tag(&self, ptr: *mut u8) {
        // SAFETY: forwarded contract.
        unsafe { (**self).store_zero_tag(ptr) }
    }

    unsafe fn store_zero_tag_pair(&self, ptr: *mut u8) {
        // SAFETY: forwarded contract.
        unsafe { (**self).store_zero_tag_pair(ptr) }
    }

    unsafe fn store_tag_with_data(&self, ptr: *mut u8, lo: u64, hi: u64) {
        // SAFETY: forwarded contract.
        unsafe { (**self).store_tag_with_data(ptr, lo, hi) }
    }

    unsafe fn load_pair(&self, src: *const u8) -> (u64, u64) {
        // SAFETY: forwarded contract.
        unsafe { (**self).load_pair(src) }
    }

    unsafe fn load_tag(&self, ptr: *const u8) -> u8 {
        // SAFETY: forwarded contract.
        unsafe { (**self).load_tag(ptr) }
    }
}
