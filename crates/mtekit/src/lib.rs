//! # mtekit
//!
//! ARM Memory Tagging Extension primitives.
//!
//! - Pointer tag codec and exclude-mask algebra (re-exported from
//!   `mtekit-core`).
//! - Random tag generation through the exclude mask (IRG).
//! - Region tagging: tag only, tag and zero, tag and copy, each with a
//!   granule alignment contract and a double-granule fast path where the
//!   hardware has one.
//!
//! The operations are implemented once in [`Tagger`] over a [`TagBackend`].
//! On aarch64 the hardware backend is picked at build time (`asm` or
//! `intrinsics` feature) and the free functions in [`hw`] use it. The
//! [`ShadowTagMemory`] backend emulates tag storage on any host.
//!
//! Enabling tagging for the address space, mapping tag-capable memory
//! (`PROT_MTE`) and handling tag-check faults belong to the platform, not
//! to this crate.

#![cfg_attr(
    all(target_arch = "aarch64", feature = "intrinsics"),
    feature(stdarch_aarch64_mte)
)]

pub mod abi;
pub mod backend;
#[cfg(target_arch = "aarch64")]
pub mod hw;
pub mod tagger;

pub use backend::TagBackend;
pub use backend::shadow::{ShadowTagMemory, TagOp};
pub use mtekit_core::{
    AlignmentChecks, Criticality, DGRANULE_SIZE, ExcludeMask, GRANULE_SIZE, MAX_TAG, MteConfig,
    MteError, TAG_SHIFT, TaggedAddr, contract, get_tag, set_tag, set_tag_with, strip_tag,
};
pub use tagger::Tagger;

#[cfg(target_arch = "aarch64")]
pub use hw::{
    HARDWARE, HardwareBackend, exclude_mask_add_ptr_tag, set_random_tag, tag_and_copy_region,
    tag_and_zero_region, tag_region,
};

/// Whether the running CPU implements FEAT_MTE.
///
/// Says nothing about whether the kernel has enabled tag checking for this
/// process or whether a given mapping is tag-capable.
#[must_use]
pub fn hardware_available() -> bool {
    #[cfg(target_arch = "aarch64")]
    {
        std::arch::is_aarch64_feature_detected!("mte")
    }
    #[cfg(not(target_arch = "aarch64"))]
    {
        false
    }
}
