//! Host page size / allocation granularity, queried once and cached.

use std::sync::OnceLock;

static PAGE_SIZE: OnceLock<u64> = OnceLock::new();

#[cfg(unix)]
fn query_page_size() -> u64 {
    // SAFETY: sysconf with a valid name has no preconditions.
    let ret = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if ret <= 0 { 4096 } else { ret as u64 }
}

#[cfg(windows)]
fn query_page_size() -> u64 {
    use windows_sys::Win32::System::SystemInformation::{GetSystemInfo, SYSTEM_INFO};

    let mut info: SYSTEM_INFO = unsafe { std::mem::zeroed() };
    // SAFETY: `info` is valid for writes of its own size.
    unsafe { GetSystemInfo(&mut info) };
    info.dwAllocationGranularity as u64
}

/// The granularity `PT_LOAD` alignment is checked against: the page size on
/// Unix, the allocation granularity on Windows (since `MapViewOfFileEx`
/// requires placement on that boundary, a coarser one than the page size).
pub fn page_size() -> u64 {
    *PAGE_SIZE.get_or_init(query_page_size)
}
