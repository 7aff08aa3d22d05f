//! Hardware entry points for aarch64.
//!
//! Thin wrappers over a [`Tagger`] bound to the build's hardware strategy
//! and [`MteConfig::BUILD`]. Callers must have enabled tagging for the
//! process and mapped the regions they tag with `PROT_MTE`.

#[cfg(all(feature = "asm", feature = "intrinsics"))]
compile_error!("features `asm` and `intrinsics` are mutually exclusive");
#[cfg(not(any(feature = "asm", feature = "intrinsics")))]
compile_error!("one of the features `asm` or `intrinsics` must be enabled");

use mtekit_core::{ExcludeMask, MteConfig, TaggedAddr};

use crate::tagger::Tagger;

#[cfg(feature = "asm")]
pub use crate::backend::asm::InstructionSequence as HardwareBackend;
#[cfg(all(feature = "intrinsics", not(feature = "asm")))]
pub use crate::backend::intrinsics::Intrinsics as HardwareBackend;

/// The hardware strategy under the build configuration.
pub const HARDWARE: Tagger<HardwareBackend> = Tagger::with_config(HardwareBackend, MteConfig::BUILD);

/// `ptr` with a random tag not in `exclude`. See [`Tagger::set_random_tag`].
#[must_use]
pub fn set_random_tag<P: TaggedAddr>(ptr: P, exclude: ExcludeMask) -> P {
    HARDWARE.set_random_tag(ptr, exclude)
}

/// `mask` plus the tag embedded in `ptr`, via GMI.
#[must_use]
pub fn exclude_mask_add_ptr_tag<P: TaggedAddr>(mask: ExcludeMask, ptr: P) -> ExcludeMask {
    HARDWARE.exclude_add_ptr_tag(mask, ptr)
}

/// See [`Tagger::tag_region`].
///
/// # Safety
///
/// As for [`Tagger::tag_region`].
#[track_caller]
pub unsafe fn tag_region<T>(ptr: *mut T, size: usize) {
    // SAFETY: forwarded contract.
    unsafe { HARDWARE.tag_region(ptr, size) }
}

/// See [`Tagger::tag_and_zero_region`].
///
/// # Safety
///
/// As for [`Tagger::tag_and_zero_region`].
#[track_caller]
pub unsafe fn tag_and_zero_region<T>(ptr: *mut T, size: usize) {
    // SAFETY: forwarded contract.
    unsafe { HARDWARE.tag_and_zero_region(ptr, size) }
}

/// See [`Tagger::tag_and_copy_region`].
///
/// # Safety
///
/// As for [`Tagger::tag_and_copy_region`].
#[track_caller]
pub unsafe fn tag_and_copy_region<T, U>(dst: *mut T, src: *const U, size: usize) {
    // SAFETY: forwarded contract.
    unsafe { HARDWARE.tag_and_copy_region(dst, src, size) }
}
