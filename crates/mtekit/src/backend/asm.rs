//! Inline instruction-sequence strategy.
//!
//! Each method is one MTE instruction. The `.arch_extension memtag`
//! directive lets the assembler accept the mnemonics without enabling the
//! `mte` target feature crate-wide.

use core::arch::asm;

use mtekit_core::{ExcludeMask, get_tag};

use super::TagBackend;

/// MTE through inline assembly. Provides the double-granule stores.
#[derive(Debug, Default, Clone, Copy)]
pub struct InstructionSequence;

unsafe impl TagBackend for InstructionSequence {
    const NAME: &'static str = "asm";
    const DOUBLE_GRANULE: bool = true;

    #[inline]
    fn random_tag(&self, addr: usize, exclude: ExcludeMask) -> usize {
        let tagged: usize;
        // SAFETY: IRG computes a value from registers; no memory access.
        unsafe {
            asm!(
                ".arch_extension memtag",
                "irg {out}, {src}, {mask}",
                out = lateout(reg) tagged,
                src = in(reg) addr,
                mask = in(reg) exclude.bits(),
                options(nomem, nostack, preserves_flags),
            );
        }
        tagged
    }

    #[inline]
    fn exclude_ptr_tag(&self, mask: ExcludeMask, addr: usize) -> ExcludeMask {
        let bits: u64;
        // SAFETY: GMI is a pure register operation.
        unsafe {
            asm!(
                ".arch_extension memtag",
                "gmi {out}, {src}, {mask}",
                out = lateout(reg) bits,
                src = in(reg) addr,
                mask = in(reg) mask.bits(),
                options(pure, nomem, nostack, preserves_flags),
            );
        }
        ExcludeMask::from_bits(bits)
    }

    #[inline]
    unsafe fn store_tag(&self, ptr: *mut u8) {
        // SAFETY: caller upholds the STG contract.
        unsafe {
            asm!(
                ".arch_extension memtag",
                "stg {p}, [{p}]",
                p = in(reg) ptr,
                options(nostack, preserves_flags),
            );
        }
    }

    #[inline]
    unsafe fn store_tag_pair(&self, ptr: *mut u8) {
        // SAFETY: caller upholds the ST2G contract.
        unsafe {
            asm!(
                ".arch_extension memtag",
                "st2g {p}, [{p}]",
                p = in(reg) ptr,
                options(nostack, preserves_flags),
            );
        }
    }

    #[inline]
    unsafe fn store_zero_tag(&self, ptr: *mut u8) {
        // SAFETY: caller upholds the STZG contract.
        unsafe {
            asm!(
                ".arch_extension memtag",
                "stzg {p}, [{p}]",
                p = in(reg) ptr,
                options(nostack, preserves_flags),
            );
        }
    }

    #[inline]
    unsafe fn store_zero_tag_pair(&self, ptr: *mut u8) {
        // SAFETY: caller upholds the STZ2G contract.
        unsafe {
            asm!(
                ".arch_extension memtag",
                "stz2g {p}, [{p}]",
                p = in(reg) ptr,
                options(nostack, preserves_flags),
            );
        }
    }

    #[inline]
    unsafe fn store_tag_with_data(&self, ptr: *mut u8, lo: u64, hi: u64) {
        // SAFETY: caller upholds the STGP contract.
        unsafe {
            asm!(
                ".arch_extension memtag",
                "stgp {lo}, {hi}, [{p}]",
                p = in(reg) ptr,
                lo = in(reg) lo,
                hi = in(reg) hi,
                options(nostack, preserves_flags),
            );
        }
    }

    #[inline]
    unsafe fn load_tag(&self, ptr: *const u8) -> u8 {
        let mut bits = ptr.addr();
        // SAFETY: caller guarantees the granule is tag-mapped. LDG only
        // replaces the tag field of its operand.
        unsafe {
            asm!(
                ".arch_extension memtag",
                "ldg {x}, [{x}]",
                x = inout(reg) bits,
                options(readonly, nostack, preserves_flags),
            );
        }
        get_tag(bits)
    }
}
