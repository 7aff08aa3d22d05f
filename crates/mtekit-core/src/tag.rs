//! Pointer tag codec.
//!
//! A tagged pointer carries its logical tag in bits [59:56]. Bits outside
//! that window are the address proper and pass through every operation here
//! unchanged. The codec never dereferences anything.

use crate::config::MteConfig;
use crate::contract::resolve_tag;

#[cfg(not(target_pointer_width = "64"))]
compile_error!("memory tagging needs 64-bit addresses");

/// Largest tag value.
pub const MAX_TAG: u8 = 0xF;
/// Number of distinct tags.
pub const TAG_COUNT: usize = MAX_TAG as usize + 1;
/// Bit offset of the tag field in an address.
pub const TAG_SHIFT: u32 = 56;
/// The tag field, in place.
pub const TAG_FIELD_MASK: usize = (MAX_TAG as usize) << TAG_SHIFT;

const LOG2_GRANULE_SIZE: u32 = 4;
const LOG2_DGRANULE_SIZE: u32 = 5;

/// Bytes covered by one allocation tag.
pub const GRANULE_SIZE: usize = 1 << LOG2_GRANULE_SIZE;
pub const GRANULE_ALIGN_MASK: usize = GRANULE_SIZE - 1;
/// Bytes covered by one double-granule store.
pub const DGRANULE_SIZE: usize = 1 << LOG2_DGRANULE_SIZE;
pub const DGRANULE_ALIGN_MASK: usize = DGRANULE_SIZE - 1;

const _: () = assert!(GRANULE_SIZE == 16, "bad granule size");
const _: () = assert!(DGRANULE_SIZE == 32, "bad double-granule size");
const _: () = assert!(GRANULE_ALIGN_MASK == 0xF, "bad granule alignment");
const _: () = assert!(DGRANULE_ALIGN_MASK == 0x1F, "bad double-granule alignment");
const _: () = assert!(TAG_FIELD_MASK == 0x0F00_0000_0000_0000, "bad tag field");

/// A value that carries an address and may carry a tag in its top byte.
///
/// Implemented for raw pointers (through strict-provenance `addr` /
/// `with_addr`, so provenance survives retagging) and for plain `usize`
/// addresses.
pub trait TaggedAddr: Copy {
    /// The full 64-bit address value, tag included.
    fn addr_bits(self) -> usize;
    /// `self` with its address value replaced by `bits`.
    #[must_use]
    fn with_addr_bits(self, bits: usize) -> Self;
}

impl<T: ?Sized> TaggedAddr for *const T {
    #[inline]
    fn addr_bits(self) -> usize {
        self.addr()
    }

    #[inline]
    fn with_addr_bits(self, bits: usize) -> Self {
        self.with_addr(bits)
    }
}

impl<T: ?Sized> TaggedAddr for *mut T {
    #[inline]
    fn addr_bits(self) -> usize {
        self.addr()
    }

    #[inline]
    fn with_addr_bits(self, bits: usize) -> Self {
        self.with_addr(bits)
    }
}

impl TaggedAddr for usize {
    #[inline]
    fn addr_bits(self) -> usize {
        self
    }

    #[inline]
    fn with_addr_bits(self, bits: usize) -> Self {
        bits
    }
}

/// Replace the tag field of `ptr` with the low 4 bits of `tag`. No checks.
#[inline]
#[must_use]
pub fn insert_tag<P: TaggedAddr>(ptr: P, tag: u8) -> P {
    let bits = (ptr.addr_bits() & !TAG_FIELD_MASK) | (usize::from(tag & MAX_TAG) << TAG_SHIFT);
    ptr.with_addr_bits(bits)
}

/// Replace the tag of `ptr` with `tag`, checked per [`MteConfig::BUILD`].
///
/// Aborts on `tag > 15` when tag checks are built in.
#[inline]
#[must_use]
#[track_caller]
pub fn set_tag<P: TaggedAddr>(ptr: P, tag: u8) -> P {
    set_tag_with(MteConfig::BUILD, ptr, tag)
}

/// [`set_tag`] under an explicit configuration.
#[inline]
#[must_use]
#[track_caller]
pub fn set_tag_with<P: TaggedAddr>(config: MteConfig, ptr: P, tag: u8) -> P {
    insert_tag(ptr, resolve_tag(config, tag))
}

/// Extract the tag of `ptr`, in `0..=15`.
#[inline]
#[must_use]
pub fn get_tag<P: TaggedAddr>(ptr: P) -> u8 {
    // Masked to 4 bits, so the narrowing is lossless.
    ((ptr.addr_bits() & TAG_FIELD_MASK) >> TAG_SHIFT) as u8
}

/// Clear the tag field of `ptr`.
#[inline]
#[must_use]
pub fn strip_tag<P: TaggedAddr>(ptr: P) -> P {
    ptr.with_addr_bits(ptr.addr_bits() & !TAG_FIELD_MASK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_every_tag() {
        let addr = 0x0000_7FFF_DEAD_BEE0_usize;
        for tag in 0..=MAX_TAG {
            let tagged = set_tag(addr, tag);
            assert_eq!(get_tag(tagged), tag);
            assert_eq!(tagged & !TAG_FIELD_MASK, addr);
        }
    }

    #[test]
    fn bits_outside_field_survive_retag() {
        // Bits 63:60 and 55:0 are all set; only the tag field may move.
        let addr = !TAG_FIELD_MASK;
        let tagged = set_tag(addr, 0xA);
        assert_eq!(tagged, addr | (0xA << TAG_SHIFT));
        assert_eq!(set_tag(tagged, 0), addr);
    }

    #[test]
    fn pointer_keeps_provenance_through_retag() {
        let value = 0x55_u8;
        let ptr: *const u8 = &value;
        let tagged = set_tag(ptr, 9);
        assert_eq!(get_tag(tagged), 9);
        assert_eq!(strip_tag(tagged), ptr);
    }

    #[test]
    fn get_tag_is_total() {
        assert_eq!(get_tag(usize::MAX), MAX_TAG);
        assert_eq!(get_tag(0_usize), 0);
    }

    #[test]
    fn unchecked_set_tag_masks_to_low_nibble() {
        let cfg = MteConfig::unchecked();
        let tagged = set_tag_with(cfg, 0x1000_usize, 16);
        assert_eq!(get_tag(tagged), 0);
        assert_eq!(tagged, 0x1000);
        assert_eq!(get_tag(set_tag_with(cfg, 0x1000_usize, 0x13)), 3);
    }

    #[test]
    #[should_panic(expected = "invalid tag 16")]
    fn checked_set_tag_aborts_on_16() {
        let _ = set_tag_with(MteConfig::strict(), 0x1000_usize, 16);
    }
}
