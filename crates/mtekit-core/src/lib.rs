//! # mtekit-core
//!
//! Pure tag algebra for the ARM Memory Tagging Extension.
//!
//! This crate owns everything about MTE that can be expressed without
//! touching hardware: the pointer tag codec, the exclude-mask algebra, the
//! build configuration, and the precondition contracts enforced by the
//! memory-tagging operations in `mtekit`. No `unsafe` code is permitted at
//! the crate level.

#![deny(unsafe_code)]

pub mod config;
pub mod contract;
pub mod error;
pub mod exclude;
pub mod tag;

pub use config::{AlignmentChecks, MteConfig};
pub use contract::Criticality;
pub use error::MteError;
pub use exclude::ExcludeMask;
pub use tag::{
    DGRANULE_ALIGN_MASK, DGRANULE_SIZE, GRANULE_ALIGN_MASK, GRANULE_SIZE, MAX_TAG, TAG_COUNT,
    TAG_FIELD_MASK, TAG_SHIFT, TaggedAddr, get_tag, insert_tag, set_tag, set_tag_with, strip_tag,
};
