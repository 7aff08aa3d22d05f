//! C ABI for the tagging primitives.
//!
//! Pointer and mask values cross the boundary as plain machine words.
//! Contract violations panic, and a panic cannot unwind out of an
//! `extern "C"` function, so they abort the process.

use std::ffi::c_void;

use mtekit_core::{ExcludeMask, MteConfig, get_tag, set_tag_with};

/// Narrow a C tag argument to `u8`, keeping the low nibble and staying out
/// of range when the value does not fit.
fn abi_tag(tag: u64) -> u8 {
    u8::try_from(tag).unwrap_or(0xF0 | (tag & 0xF) as u8)
}

/// Return `ptr` with its tag field replaced by `tag`.
#[unsafe(no_mangle)]
pub extern "C" fn mtekit_pointer_set_tag(ptr: *mut c_void, tag: u64) -> *mut c_void {
    set_tag_with(MteConfig::BUILD, ptr, abi_tag(tag))
}

/// Return the tag embedded in `ptr`.
#[unsafe(no_mangle)]
pub extern "C" fn mtekit_pointer_get_tag(ptr: *const c_void) -> u64 {
    u64::from(get_tag(ptr))
}

#[unsafe(no_mangle)]
pub extern "C" fn mtekit_exclude_mask_add_tag(mask: u64, tag: u64) -> u64 {
    ExcludeMask::from_bits(mask)
        .add_tag_with(MteConfig::BUILD, abi_tag(tag))
        .bits()
}

#[unsafe(no_mangle)]
pub extern "C" fn mtekit_exclude_mask_remove_tag(mask: u64, tag: u64) -> u64 {
    ExcludeMask::from_bits(mask)
        .remove_tag_with(MteConfig::BUILD, abi_tag(tag))
        .bits()
}

#[cfg(target_arch = "aarch64")]
pub use self::hardware::*;

#[cfg(target_arch = "aarch64")]
mod hardware {
    use std::ffi::c_void;

    use mtekit_core::ExcludeMask;

    use crate::hw;

    #[unsafe(no_mangle)]
    pub extern "C" fn mtekit_exclude_mask_add_ptr_tag(mask: u64, ptr: *const c_void) -> u64 {
        hw::exclude_mask_add_ptr_tag(ExcludeMask::from_bits(mask), ptr).bits()
    }

    #[unsafe(no_mangle)]
    pub extern "C" fn mtekit_pointer_set_random_tag(ptr: *mut c_void, excluded: u64) -> *mut c_void {
        hw::set_random_tag(ptr, ExcludeMask::from_bits(excluded))
    }

    /// # Safety
    ///
    /// See [`crate::Tagger::tag_region`].
    #[unsafe(no_mangle)]
    pub unsafe extern "C" fn mtekit_memory_tag(ptr: *mut c_void, size: usize) {
        // SAFETY: forwarded contract.
        unsafe { hw::tag_region(ptr, size) }
    }

    /// # Safety
    ///
    /// See [`crate::Tagger::tag_and_zero_region`].
    #[unsafe(no_mangle)]
    pub unsafe extern "C" fn mtekit_memory_tag_and_zero(ptr: *mut c_void, size: usize) {
        // SAFETY: forwarded contract.
        unsafe { hw::tag_and_zero_region(ptr, size) }
    }

    /// # Safety
    ///
    /// See [`crate::Tagger::tag_and_copy_region`].
    #[unsafe(no_mangle)]
    pub unsafe extern "C" fn mtekit_memory_tag_and_copy(
        dst: *mut c_void,
        src: *const c_void,
        size: usize,
    ) {
        // SAFETY: forwarded contract.
        unsafe { hw::tag_and_copy_region(dst, src, size) }
    }
}
