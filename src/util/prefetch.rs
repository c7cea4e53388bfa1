//! Cache prefetch hints. These never fault and may be no-ops on some targets.

use crate::util::Address;

/// Prefetch the cache line at `addr + offset` for reading.
#[inline(always)]
pub fn read(addr: Address, offset: usize) {
    prefetch(addr + offset);
}

/// Prefetch the cache line at `addr + offset` in anticipation of a write.
#[inline(always)]
pub fn write(addr: Address, offset: usize) {
    // x86 has no separate write hint below PREFETCHW; a T0 read prefetch brings the line into L1.
    prefetch(addr + offset);
}

#[inline(always)]
fn prefetch(_addr: Address) {
    cfg_if::cfg_if! {
        if #[cfg(target_arch = "x86_64")] {
            unsafe {
                std::arch::x86_64::_mm_prefetch::<{ std::arch::x86_64::_MM_HINT_T0 }>(
                    _addr.to_ptr::<i8>(),
                )
            }
        } else if #[cfg(target_arch = "x86")] {
            unsafe {
                std::arch::x86::_mm_prefetch::<{ std::arch::x86::_MM_HINT_T0 }>(
                    _addr.to_ptr::<i8>(),
                )
            }
        }
    }
}
