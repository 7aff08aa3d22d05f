//! Compiler intrinsic strategy (nightly, `stdarch_aarch64_mte`).
//!
//! ACLE only exposes single-granule STG, so zeroing and payload stores are
//! a tag store followed by an ordinary store through the freshly tagged
//! pointer, and there is no double-granule fast path.

use core::arch::aarch64::{
    __arm_mte_create_random_tag, __arm_mte_exclude_tag, __arm_mte_get_tag, __arm_mte_set_tag,
};

use mtekit_core::{ExcludeMask, GRANULE_SIZE, get_tag};

use super::TagBackend;

/// MTE through `core::arch::aarch64` intrinsics.
#[derive(Debug, Default, Clone, Copy)]
pub struct Intrinsics;

unsafe impl TagBackend for Intrinsics {
    const NAME: &'static str = "intrinsics";
    const DOUBLE_GRANULE: bool = false;

    #[inline]
    fn random_tag(&self, addr: usize, exclude: ExcludeMask) -> usize {
        let src = core::ptr::without_provenance::<u8>(addr);
        // SAFETY: IRG never dereferences its operand.
        unsafe { __arm_mte_create_random_tag(src, exclude.bits()) }.addr()
    }

    #[inline]
    fn exclude_ptr_tag(&self, mask: ExcludeMask, addr: usize) -> ExcludeMask {
        let src = core::ptr::without_provenance::<u8>(addr);
        // SAFETY: GMI never dereferences its operand.
        ExcludeMask::from_bits(unsafe { __arm_mte_exclude_tag(src, mask.bits()) })
    }

    #[inline]
    unsafe fn store_tag(&self, ptr: *mut u8) {
        // SAFETY: caller upholds the STG contract.
        unsafe { __arm_mte_set_tag(ptr.cast_const()) }
    }

    #[inline]
    unsafe fn store_tag_pair(&self, ptr: *mut u8) {
        // SAFETY: caller guarantees both granules.
        unsafe {
            __arm_mte_set_tag(ptr.cast_const());
            __arm_mte_set_tag(ptr.wrapping_add(GRANULE_SIZE).cast_const());
        }
    }

    #[inline]
    unsafe fn store_zero_tag(&self, ptr: *mut u8) {
        // SAFETY: tag first so the zeroing store passes the tag check.
        unsafe {
            __arm_mte_set_tag(ptr.cast_const());
            ptr.write_bytes(0, GRANULE_SIZE);
        }
    }

    #[inline]
    unsafe fn store_zero_tag_pair(&self, ptr: *mut u8) {
        // SAFETY: forwarded contract, one granule at a time.
        unsafe {
            self.store_zero_tag(ptr);
            self.store_zero_tag(ptr.wrapping_add(GRANULE_SIZE));
        }
    }

    #[inline]
    unsafe fn store_tag_with_data(&self, ptr: *mut u8, lo: u64, hi: u64) {
        // SAFETY: granule aligned per contract, so both words are aligned.
        unsafe {
            __arm_mte_set_tag(ptr.cast_const());
            ptr.cast::<u64>().write(lo);
            ptr.cast::<u64>().add(1).write(hi);
        }
    }

    #[inline]
    unsafe fn load_tag(&self, ptr: *const u8) -> u8 {
        // SAFETY: caller guarantees the granule is tag-mapped.
        get_tag(unsafe { __arm_mte_get_tag(ptr) })
    }
}
