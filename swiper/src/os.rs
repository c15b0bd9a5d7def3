use std::sync::atomic::{AtomicUsize, Ordering};

use crate::gc::Address;

#[derive(Copy, Clone, PartialEq, Eq)]
pub enum MemoryPermission {
    None,
    ReadWrite,
}

/// A reserved but not necessarily committed range of address space.
/// Unmapped again when dropped.
pub struct Reservation {
    start: Address,
    size: usize,

    unaligned_start: Address,
    unaligned_size: usize,
}

impl Reservation {
    pub fn start(&self) -> Address {
        self.start
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        free(self.unaligned_start, self.unaligned_size);
    }
}

static PAGE_SIZE: AtomicUsize = AtomicUsize::new(0);

pub fn page_size() -> usize {
    let cached = PAGE_SIZE.load(Ordering::Relaxed);

    if cached != 0 {
        return cached;
    }

    let size = determine_page_size();
    assert!(size.is_power_of_two());
    PAGE_SIZE.store(size, Ordering::Relaxed);

    size
}

#[cfg(target_family = "unix")]
fn determine_page_size() -> usize {
    let val = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };

    if val <= 0 {
        panic!("could not determine page size.");
    }

    val as usize
}

#[cfg(target_family = "windows")]
fn determine_page_size() -> usize {
    use std::mem::MaybeUninit;
    use windows_sys::Win32::System::SystemInformation::{GetSystemInfo, SYSTEM_INFO};

    unsafe {
        let mut system_info = MaybeUninit::<SYSTEM_INFO>::zeroed();
        GetSystemInfo(system_info.as_mut_ptr());

        (*system_info.as_ptr()).dwPageSize as usize
    }
}

/// Reserve address space such that the usable range starts at a multiple
/// of `align`. The range is inaccessible until committed.
pub fn reserve_align(size: usize, align: usize) -> Reservation {
    debug_assert!(align.is_power_of_two());
    debug_assert!(crate::mem::is_os_page_aligned(size));
    debug_assert!(crate::mem::is_os_page_aligned(align));

    let unaligned_size = size + align;
    let unaligned_start = reserve(unaligned_size);

    let aligned = crate::mem::align_usize_up(unaligned_start.to_usize(), align);

    Reservation {
        start: aligned.into(),
        size,

        unaligned_start,
        unaligned_size,
    }
}

#[cfg(target_family = "unix")]
fn reserve(size: usize) -> Address {
    debug_assert!(crate::mem::is_os_page_aligned(size));

    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            size,
            libc::PROT_NONE,
            libc::MAP_PRIVATE | libc::MAP_ANON | libc::MAP_NORESERVE,
            -1,
            0,
        )
    };

    if ptr == libc::MAP_FAILED {
        panic!("reserving memory with mmap() failed");
    }

    Address::from_ptr(ptr)
}

#[cfg(target_family = "windows")]
fn reserve(size: usize) -> Address {
    use windows_sys::Win32::System::Memory::{VirtualAlloc, MEM_RESERVE, PAGE_NOACCESS};

    debug_assert!(crate::mem::is_os_page_aligned(size));

    let ptr = unsafe { VirtualAlloc(std::ptr::null(), size, MEM_RESERVE, PAGE_NOACCESS) };

    if ptr.is_null() {
        panic!("reserving memory with VirtualAlloc() failed");
    }

    Address::from_ptr(ptr)
}

/// Commit the range [start; start+size) with the given permission.
#[cfg(target_family = "unix")]
pub fn commit_at(start: Address, size: usize, permission: MemoryPermission) {
    debug_assert!(start.is_os_page_aligned());
    debug_assert!(crate::mem::is_os_page_aligned(size));

    let result = unsafe {
        libc::mprotect(
            start.to_mut_ptr(),
            size,
            prot_from_permission(permission),
        )
    };

    if result != 0 {
        panic!("committing memory with mprotect() failed");
    }
}

#[cfg(target_family = "windows")]
pub fn commit_at(start: Address, size: usize, permission: MemoryPermission) {
    use windows_sys::Win32::System::Memory::{
        VirtualAlloc, MEM_COMMIT, PAGE_NOACCESS, PAGE_READWRITE,
    };

    debug_assert!(start.is_os_page_aligned());
    debug_assert!(crate::mem::is_os_page_aligned(size));

    let protection = match permission {
        MemoryPermission::None => PAGE_NOACCESS,
        MemoryPermission::ReadWrite => PAGE_READWRITE,
    };

    let ptr = unsafe { VirtualAlloc(start.to_mut_ptr(), size, MEM_COMMIT, protection) };

    if ptr.is_null() {
        panic!("committing memory with VirtualAlloc() failed");
    }
}

/// Change the permission of an already committed range.
#[cfg(target_family = "unix")]
pub fn protect(start: Address, size: usize, permission: MemoryPermission) {
    debug_assert!(start.is_os_page_aligned());
    debug_assert!(crate::mem::is_os_page_aligned(size));

    let result = unsafe {
        libc::mprotect(
            start.to_mut_ptr(),
            size,
            prot_from_permission(permission),
        )
    };

    if result != 0 {
        panic!("changing memory permission with mprotect() failed");
    }
}

#[cfg(target_family = "windows")]
pub fn protect(start: Address, size: usize, permission: MemoryPermission) {
    use windows_sys::Win32::System::Memory::{
        VirtualProtect, PAGE_NOACCESS, PAGE_READWRITE,
    };

    debug_assert!(start.is_os_page_aligned());
    debug_assert!(crate::mem::is_os_page_aligned(size));

    let protection = match permission {
        MemoryPermission::None => PAGE_NOACCESS,
        MemoryPermission::ReadWrite => PAGE_READWRITE,
    };

    let mut old_protection = 0;
    let result = unsafe {
        VirtualProtect(start.to_mut_ptr(), size, protection, &mut old_protection)
    };

    if result == 0 {
        panic!("changing memory permission with VirtualProtect() failed");
    }
}

/// Give pages back to the OS but keep the address range reserved.
#[cfg(target_family = "unix")]
pub fn discard(start: Address, size: usize) {
    debug_assert!(start.is_os_page_aligned());
    debug_assert!(crate::mem::is_os_page_aligned(size));

    let result = unsafe { libc::madvise(start.to_mut_ptr(), size, libc::MADV_DONTNEED) };

    if result != 0 {
        panic!("discarding memory with madvise() failed");
    }

    let result = unsafe { libc::mprotect(start.to_mut_ptr(), size, libc::PROT_NONE) };

    if result != 0 {
        panic!("discarding memory with mprotect() failed");
    }
}

#[cfg(target_family = "windows")]
pub fn discard(start: Address, size: usize) {
    use windows_sys::Win32::System::Memory::{VirtualFree, MEM_DECOMMIT};

    debug_assert!(start.is_os_page_aligned());
    debug_assert!(crate::mem::is_os_page_aligned(size));

    let result = unsafe { VirtualFree(start.to_mut_ptr(), size, MEM_DECOMMIT) };

    if result == 0 {
        panic!("decommitting memory with VirtualFree() failed");
    }
}

#[cfg(target_family = "unix")]
fn free(start: Address, size: usize) {
    let result = unsafe { libc::munmap(start.to_mut_ptr(), size) };

    if result != 0 {
        panic!("unmapping memory with munmap() failed");
    }
}

#[cfg(target_family = "windows")]
fn free(start: Address, _size: usize) {
    use windows_sys::Win32::System::Memory::{VirtualFree, MEM_RELEASE};

    let result = unsafe { VirtualFree(start.to_mut_ptr(), 0, MEM_RELEASE) };

    if result == 0 {
        panic!("releasing memory with VirtualFree() failed");
    }
}

#[cfg(target_family = "unix")]
fn prot_from_permission(permission: MemoryPermission) -> libc::c_int {
    match permission {
        MemoryPermission::None => libc::PROT_NONE,
        MemoryPermission::ReadWrite => libc::PROT_READ | libc::PROT_WRITE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_is_power_of_two() {
        let size = page_size();
        assert!(size.is_power_of_two());
        assert_eq!(size, page_size());
    }

    #[test]
    fn reserve_commit_and_drop() {
        let reservation = reserve_align(4 * page_size(), page_size());
        assert!(reservation.start().to_usize() % page_size() == 0);

        commit_at(reservation.start(), page_size(), MemoryPermission::ReadWrite);

        unsafe {
            *reservation.start().to_mut_ptr::<usize>() = 0x1337;
            assert_eq!(*reservation.start().to_ptr::<usize>(), 0x1337);
        }
    }
}
