//! Error type shared by contract checks and the emulated fault model.

use thiserror::Error;

/// A memory tagging contract violation or (emulated) tag fault.
///
/// The public tagging operations never return this; they turn it into a
/// panic through [`crate::contract::enforce`]. It is exposed so tooling can
/// run the same checks without aborting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MteError {
    #[error("invalid tag {tag} (valid tags are 0..=15)")]
    InvalidTag { tag: u8 },
    #[error("misaligned pointer {addr:#x} (requires {align}-byte alignment)")]
    MisalignedPointer { addr: usize, align: usize },
    #[error("misaligned size {size:#x} (requires a multiple of {align} bytes)")]
    MisalignedSize { size: usize, align: usize },
    #[error("region of {size:#x} bytes at {addr:#x} overflows the address space")]
    RegionOverflow { addr: usize, size: usize },
    #[error("tag mismatch at {addr:#x}: pointer tag {pointer_tag}, memory tag {memory_tag}")]
    TagMismatch {
        addr: usize,
        pointer_tag: u8,
        memory_tag: u8,
    },
}

impl MteError {
    /// Returns true for errors raised by precondition checks (as opposed to
    /// tag faults observed at access time).
    #[must_use]
    pub const fn is_contract_violation(&self) -> bool {
        !matches!(self, Self::TagMismatch { .. })
    }
}
