//! Hardware MTE round trips. Compiled on aarch64 Linux only; each test
//! skips itself when the CPU or kernel lacks FEAT_MTE.
//!
//! Run: cargo test -p mtekit --test hardware_test

#![cfg(all(target_arch = "aarch64", target_os = "linux"))]

use std::ffi::c_void;

use mtekit::{ExcludeMask, HARDWARE, get_tag, hw};

const PR_SET_TAGGED_ADDR_CTRL: libc::c_int = 55;
const PR_TAGGED_ADDR_ENABLE: libc::c_ulong = 1 << 0;
const PR_MTE_TCF_SYNC: libc::c_ulong = 1 << 1;
const PR_MTE_TAG_SHIFT: u32 = 3;
const PROT_MTE: libc::c_int = 0x20;
const HWCAP2_MTE: libc::c_ulong = 1 << 18;

const MAP_LEN: usize = 0x1000;

/// Tag-capable anonymous mapping, unmapped on drop.
struct TaggedMapping {
    base: *mut u8,
}

impl TaggedMapping {
    fn new() -> Option<Self> {
        // SAFETY: plain libc queries and an anonymous mapping.
        unsafe {
            if libc::getauxval(libc::AT_HWCAP2) & HWCAP2_MTE == 0 {
                eprintln!("skipping: FEAT_MTE not reported by the kernel");
                return None;
            }
            // Include every tag except 15 for hardware random generation.
            let include = 0xFFFF_u64 & !(1 << 15);
            let ctrl = PR_TAGGED_ADDR_ENABLE
                | PR_MTE_TCF_SYNC
                | ((include as libc::c_ulong) << PR_MTE_TAG_SHIFT);
            if libc::prctl(PR_SET_TAGGED_ADDR_CTRL, ctrl, 0, 0, 0) < 0 {
                eprintln!("skipping: PR_SET_TAGGED_ADDR_CTRL rejected");
                return None;
            }
            let base = libc::mmap(
                std::ptr::null_mut(),
                MAP_LEN,
                PROT_MTE | libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            );
            if base == libc::MAP_FAILED {
                eprintln!("skipping: PROT_MTE mapping failed");
                return None;
            }
            Some(Self { base: base.cast() })
        }
    }
}

impl Drop for TaggedMapping {
    fn drop(&mut self) {
        // SAFETY: `base` came from mmap with MAP_LEN.
        unsafe {
            libc::munmap(self.base.cast::<c_void>(), MAP_LEN);
        }
    }
}

#[test]
fn hardware_detection_matches_auxv() {
    // SAFETY: getauxval has no preconditions.
    let auxv = unsafe { libc::getauxval(libc::AT_HWCAP2) } & HWCAP2_MTE != 0;
    assert_eq!(mtekit::hardware_available(), auxv);
}

#[test]
fn tag_region_then_access_through_tagged_pointer() {
    let Some(map) = TaggedMapping::new() else {
        return;
    };
    let ptr = hw::set_random_tag(map.base, ExcludeMask::EMPTY.add_tag(0));
    assert_ne!(get_tag(ptr), 0);
    // SAFETY: the mapping is tag-capable and MAP_LEN bytes long.
    unsafe {
        hw::tag_region(ptr, MAP_LEN);
        ptr.cast::<u64>().write(2);
        assert_eq!(ptr.cast::<u64>().read(), 2);
        assert_eq!(HARDWARE.load_tag(ptr.wrapping_add(MAP_LEN - 16)), get_tag(ptr));
    }
}

#[test]
fn tag_and_zero_reads_back_zero() {
    let Some(map) = TaggedMapping::new() else {
        return;
    };
    // SAFETY: the mapping is tag-capable; writes go through a pointer whose
    // tag matches the freshly stored allocation tags.
    unsafe {
        let first = hw::set_random_tag(map.base, ExcludeMask::EMPTY);
        hw::tag_region(first, MAP_LEN);
        first.write_bytes(0xA5, MAP_LEN);

        let exclude = hw::exclude_mask_add_ptr_tag(ExcludeMask::EMPTY, first);
        let second = hw::set_random_tag(map.base, exclude);
        assert_ne!(get_tag(second), get_tag(first));
        hw::tag_and_zero_region(second, 48);
        let bytes = std::slice::from_raw_parts(second, 48);
        assert!(bytes.iter().all(|&b| b == 0));
        assert_eq!(HARDWARE.load_tag(second.wrapping_add(32)), get_tag(second));
    }
}

#[test]
fn tag_and_copy_matches_source() {
    let Some(map) = TaggedMapping::new() else {
        return;
    };
    let src: Vec<u8> = (0..256).map(|i| i as u8).collect();
    // SAFETY: the mapping is tag-capable and disjoint from `src`.
    unsafe {
        let dst = hw::set_random_tag(map.base, ExcludeMask::EMPTY);
        hw::tag_and_copy_region(dst, src.as_ptr(), src.len());
        let copied = std::slice::from_raw_parts(dst, src.len());
        assert_eq!(copied, &src[..]);
    }
}
