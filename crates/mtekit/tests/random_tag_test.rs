//! Random tag generation through exclude masks.
//!
//! Run: cargo test -p mtekit --test random_tag_test

use mtekit::{ExcludeMask, MAX_TAG, MteConfig, ShadowTagMemory, Tagger, get_tag, set_tag};

const ITERATIONS: usize = 4_000;

#[test]
fn single_excluded_tag_is_never_drawn() {
    for excluded in 0..=MAX_TAG {
        let t = Tagger::with_config(
            ShadowTagMemory::with_seed(u64::from(excluded) + 1),
            MteConfig::strict(),
        );
        let mask = ExcludeMask::EMPTY.add_tag(excluded);
        for _ in 0..ITERATIONS {
            let tagged = t.set_random_tag(0x10_0000_usize, mask);
            assert_ne!(get_tag(tagged), excluded);
            assert_eq!(tagged & 0x00FF_FFFF_FFFF_FFFF, 0x10_0000);
        }
    }
}

#[test]
fn every_allowed_tag_is_eventually_drawn() {
    let t = Tagger::new(ShadowTagMemory::with_seed(99));
    let mask = ExcludeMask::EMPTY.add_tag(0).add_tag(15);
    let mut seen = [0_usize; 16];
    for _ in 0..ITERATIONS {
        seen[usize::from(get_tag(t.set_random_tag(0x2000_usize, mask)))] += 1;
    }
    assert_eq!(seen[0], 0);
    assert_eq!(seen[15], 0);
    for (tag, count) in seen.iter().enumerate().take(15).skip(1) {
        assert!(*count > 0, "tag {tag} never drawn in {ITERATIONS} draws");
    }
}

#[test]
fn only_one_allowed_tag_is_deterministic() {
    let t = Tagger::new(ShadowTagMemory::new());
    let mask = ExcludeMask::ALL.remove_tag(11);
    for _ in 0..64 {
        assert_eq!(get_tag(t.set_random_tag(0x2000_usize, mask)), 11);
    }
}

#[test]
fn all_excluded_policy_returns_tag_zero() {
    let t = Tagger::new(ShadowTagMemory::new());
    let ptr = set_tag(0x2000_usize, 4);
    assert_eq!(t.set_random_tag(ptr, ExcludeMask::ALL), 0x2000);
}

#[test]
fn random_tag_keeps_pointer_provenance() {
    let value = [0x42_u8; 16];
    let t = Tagger::new(ShadowTagMemory::new());
    let tagged = t.set_random_tag(value.as_ptr(), ExcludeMask::EMPTY);
    let back = mtekit::strip_tag(tagged);
    assert_eq!(back, value.as_ptr());
    // SAFETY: `back` is the original untagged pointer into `value`.
    assert_eq!(unsafe { *back }, 0x42);
}

#[test]
fn draw_after_excluding_current_tag_always_changes_it() {
    let t = Tagger::new(ShadowTagMemory::with_seed(5));
    let mut ptr = t.set_random_tag(0x8000_usize, ExcludeMask::EMPTY);
    for _ in 0..1_000 {
        let exclude = t.exclude_add_ptr_tag(ExcludeMask::EMPTY, ptr);
        let next = t.set_random_tag(ptr, exclude);
        assert_ne!(get_tag(next), get_tag(ptr));
        ptr = next;
    }
}
