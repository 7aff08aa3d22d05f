use mtekit_core::{
    ExcludeMask, MAX_TAG, MteConfig, TAG_FIELD_MASK, get_tag, set_tag, set_tag_with, strip_tag,
};

#[derive(Clone, Copy, Debug)]
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        // xorshift64*
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    fn next_tag(&mut self) -> u8 {
        (self.next_u64() % 16) as u8
    }
}

#[test]
fn deterministic_codec_sequences_preserve_address_bits() {
    const SEEDS: [u64; 4] = [1, 2, 3, 4];
    const STEPS: usize = 4_000;

    for seed in SEEDS {
        let mut rng = XorShift64::new(seed);
        for step in 0..STEPS {
            let addr = rng.next_u64() as usize;
            let tag = rng.next_tag();
            let tagged = set_tag(addr, tag);
            assert_eq!(get_tag(tagged), tag, "seed={seed} step={step}");
            assert_eq!(
                tagged & !TAG_FIELD_MASK,
                addr & !TAG_FIELD_MASK,
                "seed={seed} step={step}: bits outside the tag field moved"
            );
            assert_eq!(strip_tag(tagged), addr & !TAG_FIELD_MASK);
        }
    }
}

#[test]
fn deterministic_mask_sequences_stay_within_sixteen_bits() {
    const SEEDS: [u64; 3] = [7, 11, 13];
    const STEPS: usize = 2_000;

    for seed in SEEDS {
        let mut rng = XorShift64::new(seed);
        let mut mask = ExcludeMask::EMPTY;
        let mut model = [false; 16];

        for step in 0..STEPS {
            let tag = rng.next_tag();
            match rng.next_u64() % 3 {
                0 => {
                    let before = mask;
                    mask = mask.add_tag(tag);
                    assert!(mask.contains(tag));
                    if !model[usize::from(tag)] {
                        assert_eq!(mask.remove_tag(tag), before, "seed={seed} step={step}");
                    }
                    model[usize::from(tag)] = true;
                }
                1 => {
                    mask = mask.remove_tag(tag);
                    model[usize::from(tag)] = false;
                }
                _ => {
                    let ptr = set_tag(0x1000_usize, tag);
                    mask = mask.add_ptr_tag(ptr);
                    model[usize::from(tag)] = true;
                }
            }

            assert_eq!(mask.bits() >> 16, 0, "seed={seed} step={step}");
            for t in 0..=MAX_TAG {
                assert_eq!(mask.contains(t), model[usize::from(t)], "seed={seed} step={step}");
            }
            let expected_allowed = model.iter().filter(|&&excluded| !excluded).count();
            assert_eq!(mask.allowed_count() as usize, expected_allowed);
        }
    }
}

#[test]
fn masking_fallback_matches_low_nibble_for_every_byte() {
    let cfg = MteConfig::unchecked();
    for raw in 0..=u8::MAX {
        let tagged = set_tag_with(cfg, 0x8000_usize, raw);
        assert_eq!(get_tag(tagged), raw & 0xF);
        let mask = ExcludeMask::EMPTY.add_tag_with(cfg, raw);
        assert_eq!(mask.bits(), 1 << (raw & 0xF));
    }
}
