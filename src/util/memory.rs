use crate::util::Address;
use std::io::{Error, Result};

/// Demand-zero mmap of `size` bytes at an address chosen by the OS, aligned to `align`.
///
/// We over-reserve by `align` bytes and unmap the unaligned head and tail, so the returned
/// range is exactly `size` bytes.
pub fn dzmmap_aligned(size: usize, align: usize) -> Result<Address> {
    debug_assert!(align.is_power_of_two());
    let prot = libc::PROT_READ | libc::PROT_WRITE;
    let flags = libc::MAP_ANON | libc::MAP_PRIVATE | libc::MAP_NORESERVE;
    let reserve = size + align;
    let ptr = unsafe { libc::mmap(std::ptr::null_mut(), reserve, prot, flags, -1, 0) };
    if ptr == libc::MAP_FAILED {
        return Err(Error::last_os_error());
    }
    let raw = Address::from_mut_ptr(ptr);
    let start = raw.align_up(align);
    let head = start - raw;
    if head > 0 {
        munmap(raw, head)?;
    }
    let tail = reserve - head - size;
    if tail > 0 {
        munmap(start + size, tail)?;
    }
    Ok(start)
}

/// Unmap a range previously returned by [`dzmmap_aligned`].
pub fn munmap(start: Address, size: usize) -> Result<()> {
    wrap_libc_call(&|| unsafe { libc::munmap(start.to_mut_ptr(), size) }, 0)
}

/// Zero `len` bytes starting at `start`.
pub fn zero(start: Address, len: usize) {
    unsafe { std::ptr::write_bytes(start.to_mut_ptr::<u8>(), 0, len) }
}

/// Copy `len` bytes from `src` to `dst`. The two ranges must not overlap.
pub fn copy_nonoverlapping(src: Address, dst: Address, len: usize) {
    unsafe { std::ptr::copy_nonoverlapping(src.to_ptr::<u8>(), dst.to_mut_ptr::<u8>(), len) }
}

fn wrap_libc_call<T: PartialEq>(f: &dyn Fn() -> T, expect: T) -> Result<()> {
    let ret = f();
    if ret == expect {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}
