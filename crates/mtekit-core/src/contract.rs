//! Precondition contracts for tags and granule alignment.
//!
//! `check_*` functions are pure and return [`MteError`]. The `enforce*`
//! family turns a violation into a panic that reports the caller's location,
//! which is how every public tagging operation surfaces programmer errors.

use crate::config::{AlignmentChecks, MteConfig};
use crate::error::MteError;
use crate::tag::{GRANULE_ALIGN_MASK, GRANULE_SIZE, MAX_TAG};

/// How severe an alignment violation would be if it reached hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Criticality {
    /// Misalignment only widens the tagged range.
    Advisory,
    /// The underlying instruction raises an alignment fault.
    Critical,
}

/// Check that `tag` fits the 4-bit tag field.
pub const fn check_tag(tag: u8) -> Result<u8, MteError> {
    if tag > MAX_TAG {
        Err(MteError::InvalidTag { tag })
    } else {
        Ok(tag)
    }
}

/// Check that `addr` is a multiple of `align` (a power of two).
pub const fn check_pointer_alignment(addr: usize, align: usize) -> Result<(), MteError> {
    if addr & (align - 1) != 0 {
        Err(MteError::MisalignedPointer { addr, align })
    } else {
        Ok(())
    }
}

/// Check that `size` is a multiple of `align` (a power of two).
pub const fn check_size_alignment(size: usize, align: usize) -> Result<(), MteError> {
    if size & (align - 1) != 0 {
        Err(MteError::MisalignedSize { size, align })
    } else {
        Ok(())
    }
}

/// Check a region against the granule contract: pointer first, then size.
pub const fn check_region(addr: usize, size: usize) -> Result<(), MteError> {
    match check_pointer_alignment(addr, GRANULE_SIZE) {
        Ok(()) => check_size_alignment(size, GRANULE_SIZE),
        Err(e) => Err(e),
    }
}

/// End of `[addr, addr + size)` rounded up to a whole granule, or
/// `RegionOverflow` if that end does not fit in an address. `addr` may carry
/// tag bits.
pub const fn check_region_end(addr: usize, size: usize) -> Result<usize, MteError> {
    match addr.checked_add(size) {
        Some(end) => match end.checked_add(GRANULE_ALIGN_MASK) {
            Some(rounded) => Ok(rounded & !GRANULE_ALIGN_MASK),
            None => Err(MteError::RegionOverflow { addr, size }),
        },
        None => Err(MteError::RegionOverflow { addr, size }),
    }
}

/// Abort on a contract violation, reporting the caller's location.
#[track_caller]
#[inline]
pub fn enforce<T>(result: Result<T, MteError>) -> T {
    match result {
        Ok(v) => v,
        Err(e) => violation(e),
    }
}

#[cold]
#[inline(never)]
#[track_caller]
fn violation(e: MteError) -> ! {
    panic!("MTE contract violation: {e}")
}

/// Resolve a caller-supplied tag under `config`.
///
/// With tag checks on, a tag above 15 aborts. With them off, the low 4 bits
/// are used, so 16 behaves as 0.
#[track_caller]
#[inline]
pub fn resolve_tag(config: MteConfig, tag: u8) -> u8 {
    if config.tag_checks {
        enforce(check_tag(tag))
    } else {
        tag & MAX_TAG
    }
}

/// Enforce the granule contract for `[addr, addr + size)` if `level` checks
/// contracts of this `criticality`, and return the granule-rounded end.
///
/// The overflow check runs at every level: an end that wraps would make the
/// region loops store nothing or run off the address space.
#[track_caller]
#[inline]
pub fn enforce_region(
    level: AlignmentChecks,
    criticality: Criticality,
    addr: usize,
    size: usize,
) -> usize {
    if level.enforces(criticality) {
        enforce(check_region(addr, size));
    }
    enforce(check_region_end(addr, size))
}
