//! Exclude-mask algebra for random tag generation.
//!
//! Bit `i` of an [`ExcludeMask`] set means tag `i` must not be drawn. Only
//! the low 16 bits are significant and no operation here ever sets a bit
//! above position 15, so masks compose with plain OR.

use core::ops::BitOr;

use crate::config::MteConfig;
use crate::contract::resolve_tag;
use crate::tag::{MAX_TAG, TAG_COUNT, TaggedAddr, get_tag};

const SIGNIFICANT_BITS: u64 = (1 << TAG_COUNT) - 1;

/// Set of tags forbidden for the next random draw.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct ExcludeMask(u64);

impl ExcludeMask {
    /// Nothing excluded.
    pub const EMPTY: Self = Self(0);
    /// Every tag excluded.
    pub const ALL: Self = Self(SIGNIFICANT_BITS);

    /// Build from raw bits, dropping everything above bit 15.
    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits & SIGNIFICANT_BITS)
    }

    #[must_use]
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Whether `tag` is excluded. Tags above 15 are never in a mask.
    #[must_use]
    pub const fn contains(self, tag: u8) -> bool {
        tag <= MAX_TAG && self.0 & (1 << tag) != 0
    }

    #[must_use]
    pub const fn is_full(self) -> bool {
        self.0 == SIGNIFICANT_BITS
    }

    /// Number of tags still available to a draw.
    #[must_use]
    pub const fn allowed_count(self) -> u32 {
        TAG_COUNT as u32 - self.0.count_ones()
    }

    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Exclude `tag`, checked per [`MteConfig::BUILD`].
    #[must_use]
    #[track_caller]
    pub fn add_tag(self, tag: u8) -> Self {
        self.add_tag_with(MteConfig::BUILD, tag)
    }

    #[must_use]
    #[track_caller]
    pub fn add_tag_with(self, config: MteConfig, tag: u8) -> Self {
        Self(self.0 | (1 << resolve_tag(config, tag)))
    }

    /// Allow `tag` again, checked per [`MteConfig::BUILD`].
    #[must_use]
    #[track_caller]
    pub fn remove_tag(self, tag: u8) -> Self {
        self.remove_tag_with(MteConfig::BUILD, tag)
    }

    #[must_use]
    #[track_caller]
    pub fn remove_tag_with(self, config: MteConfig, tag: u8) -> Self {
        Self(self.0 & !(1 << resolve_tag(config, tag)))
    }

    /// Exclude the tag currently embedded in `ptr`.
    ///
    /// Software form of the GMI instruction. Backends without hardware
    /// support use this directly.
    #[must_use]
    pub fn add_ptr_tag<P: TaggedAddr>(self, ptr: P) -> Self {
        Self(self.0 | (1 << get_tag(ptr)))
    }

    /// Tags not excluded, ascending.
    pub fn allowed_tags(self) -> impl Iterator<Item = u8> {
        (0..=MAX_TAG).filter(move |&tag| !self.contains(tag))
    }

    /// The `n`-th allowed tag (ascending), if there are more than `n`.
    #[must_use]
    pub fn nth_allowed(self, n: usize) -> Option<u8> {
        self.allowed_tags().nth(n)
    }
}

impl BitOr for ExcludeMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl From<ExcludeMask> for u64 {
    fn from(mask: ExcludeMask) -> Self {
        mask.bits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tag::set_tag;

    #[test]
    fn add_then_remove_restores_mask() {
        let base = ExcludeMask::from_bits(0b1010_0000_0000_0101);
        for tag in 0..=MAX_TAG {
            let added = base.add_tag(tag);
            assert!(added.contains(tag));
            if !base.contains(tag) {
                assert_eq!(added.remove_tag(tag), base);
            }
        }
    }

    #[test]
    fn ptr_tag_sets_exactly_one_bit() {
        for tag in 0..=MAX_TAG {
            let ptr = set_tag(0x4000_usize, tag);
            let mask = ExcludeMask::EMPTY.add_ptr_tag(ptr);
            assert_eq!(mask.bits(), 1 << tag);
        }
    }

    #[test]
    fn from_bits_drops_high_bits() {
        let mask = ExcludeMask::from_bits(u64::MAX);
        assert_eq!(mask, ExcludeMask::ALL);
        assert!(mask.is_full());
        assert_eq!(mask.allowed_count(), 0);
        assert_eq!(mask.allowed_tags().count(), 0);
    }

    #[test]
    fn unchecked_add_never_escapes_sixteen_bits() {
        let cfg = MteConfig::unchecked();
        let mask = ExcludeMask::EMPTY.add_tag_with(cfg, 16).add_tag_with(cfg, 0xFF);
        assert_eq!(mask.bits(), 0b1000_0000_0000_0001);
        assert_eq!(mask.bits() >> 16, 0);
    }

    #[test]
    #[should_panic(expected = "invalid tag 16")]
    fn checked_remove_aborts_on_16() {
        let _ = ExcludeMask::ALL.remove_tag_with(MteConfig::strict(), 16);
    }

    #[test]
    fn allowed_tags_skip_excluded() {
        let mask = ExcludeMask::EMPTY.add_tag(0).add_tag(5).add_tag(15);
        let allowed: Vec<u8> = mask.allowed_tags().collect();
        assert_eq!(allowed.len(), 13);
        assert!(!allowed.contains(&0));
        assert!(!allowed.contains(&5));
        assert!(!allowed.contains(&15));
        assert_eq!(mask.nth_allowed(0), Some(1));
        assert_eq!(mask.nth_allowed(12), Some(14));
        assert_eq!(mask.nth_allowed(13), None);
    }

    #[test]
    fn union_is_bitor() {
        let a = ExcludeMask::EMPTY.add_tag(1);
        let b = ExcludeMask::EMPTY.add_tag(2);
        assert_eq!((a | b).bits(), 0b110);
        assert_eq!(u64::from(a.union(b)), 0b110);
    }
}
