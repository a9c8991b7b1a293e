//! Windows mapping dialect: the NT kernel refuses overlapping views, so
//! instead of one reservation overlaid in place, a probe reservation is
//! taken and released purely to learn a free base address, then each
//! segment gets its own file-mapping view (or committed anonymous range)
//! placed at that base.

use std::fs::File;
use std::os::windows::io::AsRawHandle;
use std::ptr;

use windows_sys::Win32::Foundation::{CloseHandle, HANDLE};
use windows_sys::Win32::System::Memory::{
    CreateFileMappingW, MapViewOfFileEx, UnmapViewOfFile, VirtualAlloc, VirtualFree, VirtualProtect,
    FILE_MAP_COPY, FILE_MAP_EXECUTE, FILE_MAP_READ, MEM_COMMIT, MEM_RELEASE, MEM_RESERVE,
    PAGE_EXECUTE_READ, PAGE_EXECUTE_READWRITE, PAGE_EXECUTE_WRITECOPY, PAGE_NOACCESS,
    PAGE_READONLY, PAGE_READWRITE, PAGE_WRITECOPY,
};

use crate::error::{LoaderError, Result};
use crate::model::{ElfImage, LoadedImage, ProtFlags};

fn last_error_result(what: &str) -> LoaderError {
    LoaderError::MappingFailed(format!("{what}: {}", std::io::Error::last_os_error()))
}

fn view_protection(flags: ProtFlags) -> u32 {
    if !flags.contains(ProtFlags::READ) {
        return 0;
    }
    match (
        flags.contains(ProtFlags::WRITE),
        flags.contains(ProtFlags::EXEC),
    ) {
        (false, false) => FILE_MAP_READ,
        (true, false) => FILE_MAP_COPY,
        (false, true) => FILE_MAP_READ | FILE_MAP_EXECUTE,
        (true, true) => FILE_MAP_COPY | FILE_MAP_EXECUTE,
    }
}

fn page_protection(flags: ProtFlags) -> u32 {
    match (
        flags.contains(ProtFlags::READ),
        flags.contains(ProtFlags::WRITE),
        flags.contains(ProtFlags::EXEC),
    ) {
        (false, _, false) => PAGE_NOACCESS,
        (_, false, false) => PAGE_READONLY,
        (_, true, false) => PAGE_READWRITE,
        (_, false, true) => PAGE_EXECUTE_READ,
        (_, true, true) => PAGE_EXECUTE_READWRITE,
    }
}

fn mapping_page_protection(flags: ProtFlags) -> u32 {
    if !flags.contains(ProtFlags::READ) {
        return PAGE_NOACCESS;
    }
    match (flags.contains(ProtFlags::WRITE), flags.contains(ProtFlags::EXEC)) {
        (false, false) => PAGE_READONLY,
        (true, false) => PAGE_WRITECOPY,
        (false, true) => PAGE_EXECUTE_READ,
        (true, true) => PAGE_EXECUTE_WRITECOPY,
    }
}

/// Reserves `size` bytes of address space purely to learn a free base, then
/// immediately releases it. The window between release and reuse is racy in
/// principle; this mirrors the reference behavior, which accepts the same
/// race on this platform.
fn probe_free_region(size: usize) -> Result<*mut u8> {
    // SAFETY: a bare reservation with no backing object.
    let base = unsafe { VirtualAlloc(ptr::null(), size, MEM_RESERVE, PAGE_NOACCESS) };
    if base.is_null() {
        return Err(last_error_result("reserving probe region"));
    }
    // SAFETY: releasing exactly what was just reserved.
    let ok = unsafe { VirtualFree(base, 0, MEM_RELEASE) };
    if ok == 0 {
        return Err(last_error_result("releasing probe region"));
    }
    Ok(base as *mut u8)
}

pub fn load(file: &File, image: &ElfImage) -> Result<LoadedImage> {
    if image.segments.is_empty() {
        return Ok(LoadedImage::new(ptr::null_mut(), 0, 0));
    }

    let base = probe_free_region(image.total_memory_size as usize)?;

    let mut views: Vec<*mut std::ffi::c_void> = Vec::new();
    let mut commits: Vec<(*mut std::ffi::c_void, usize)> = Vec::new();

    let result = (|| -> Result<()> {
        for seg in &image.segments {
            if !seg.file_chunk.is_empty() {
                let page_prot = mapping_page_protection(seg.prot);
                // SAFETY: the file handle outlives this call; size bounds are
                // passed explicitly.
                let mapping: HANDLE = unsafe {
                    CreateFileMappingW(
                        file.as_raw_handle() as HANDLE,
                        ptr::null(),
                        page_prot,
                        0,
                        0,
                        ptr::null(),
                    )
                };
                if mapping.is_null() {
                    return Err(last_error_result("creating file mapping"));
                }

                let view_prot = view_protection(seg.prot);
                let target = unsafe { base.add(seg.relative_offset as usize) };
                // SAFETY: `target` lies within the just-released probe
                // region; no other view has claimed it yet.
                let view = unsafe {
                    MapViewOfFileEx(
                        mapping,
                        view_prot,
                        (seg.file_chunk.offset >> 32) as u32,
                        (seg.file_chunk.offset & 0xffff_ffff) as u32,
                        seg.file_chunk.size as usize,
                        target as *const std::ffi::c_void,
                    )
                };
                // SAFETY: `mapping` is a valid handle owned by this call.
                unsafe { CloseHandle(mapping) };
                if view.is_null() {
                    return Err(last_error_result("mapping view of file"));
                }
                views.push(view);
            }

            if !seg.pad_chunk.is_empty() {
                let addr = seg.relative_offset + seg.pad_chunk.offset;
                let target = unsafe { base.add(addr as usize) };
                let page_prot = page_protection(seg.prot);
                // SAFETY: `target` lies within the reserved range and has
                // not yet been committed.
                let committed = unsafe {
                    VirtualAlloc(
                        target as *const std::ffi::c_void,
                        seg.pad_chunk.size as usize,
                        MEM_COMMIT,
                        page_prot,
                    )
                };
                if committed.is_null() {
                    return Err(last_error_result("committing pad range"));
                }
                commits.push((committed, seg.pad_chunk.size as usize));
            }
        }
        Ok(())
    })();

    if let Err(e) = result {
        for view in views {
            // SAFETY: each `view` was returned by a successful
            // `MapViewOfFileEx` above and not yet unmapped.
            unsafe {
                UnmapViewOfFile(view);
            }
        }
        for (addr, _) in commits {
            // SAFETY: each `addr` was returned by a successful `VirtualAlloc`
            // commit above and not yet freed.
            unsafe {
                VirtualFree(addr, 0, MEM_RELEASE);
            }
        }
        return Err(e);
    }

    let mut loaded = LoadedImage::new(base, image.total_memory_size, image.entry_offset);
    loaded.windows_views = views;
    loaded.windows_commits = commits;
    Ok(loaded)
}

pub fn unload(loaded: &mut LoadedImage) {
    if !loaded.is_loaded() {
        return;
    }
    for view in loaded.windows_views.drain(..) {
        // SAFETY: each `view` was returned by a successful
        // `MapViewOfFileEx` in `load` and not yet unmapped.
        unsafe {
            UnmapViewOfFile(view);
        }
    }
    for (addr, _) in loaded.windows_commits.drain(..) {
        // SAFETY: each `addr` was returned by a successful `VirtualAlloc`
        // commit in `load` and not yet freed.
        unsafe {
            VirtualFree(addr, 0, MEM_RELEASE);
        }
    }
    loaded.mark_unloaded();
}

pub fn freeze_readonly(loaded: &LoadedImage, range_offset: u64, range_size: u64) -> Result<()> {
    let mut old_protect = 0u32;
    // SAFETY: `range_offset`/`range_size` are validated by the caller to lie
    // within `loaded`'s mapped range.
    let ok = unsafe {
        VirtualProtect(
            loaded.base_address().add(range_offset as usize) as *const std::ffi::c_void,
            range_size as usize,
            PAGE_READONLY,
            &mut old_protect,
        )
    };
    if ok == 0 {
        return Err(last_error_result("freezing RELRO range"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ProtFlags::empty(), PAGE_NOACCESS)]
    #[case(ProtFlags::WRITE, PAGE_NOACCESS)]
    #[case(ProtFlags::READ, PAGE_READONLY)]
    #[case(ProtFlags::READ | ProtFlags::WRITE, PAGE_READWRITE)]
    #[case(ProtFlags::READ | ProtFlags::EXEC, PAGE_EXECUTE_READ)]
    #[case(ProtFlags::READ | ProtFlags::WRITE | ProtFlags::EXEC, PAGE_EXECUTE_READWRITE)]
    fn page_protection_matches_flags_subset_table(#[case] flags: ProtFlags, #[case] expected: u32) {
        assert_eq!(page_protection(flags), expected);
    }

    #[rstest]
    #[case(ProtFlags::empty(), PAGE_NOACCESS)]
    #[case(ProtFlags::WRITE, PAGE_NOACCESS)]
    #[case(ProtFlags::EXEC, PAGE_NOACCESS)]
    #[case(ProtFlags::READ, PAGE_READONLY)]
    #[case(ProtFlags::READ | ProtFlags::WRITE, PAGE_WRITECOPY)]
    #[case(ProtFlags::READ | ProtFlags::EXEC, PAGE_EXECUTE_READ)]
    #[case(ProtFlags::READ | ProtFlags::WRITE | ProtFlags::EXEC, PAGE_EXECUTE_WRITECOPY)]
    fn mapping_page_protection_matches_flags_subset_table(#[case] flags: ProtFlags, #[case] expected: u32) {
        assert_eq!(mapping_page_protection(flags), expected);
    }

    #[rstest]
    #[case(ProtFlags::empty(), 0)]
    #[case(ProtFlags::WRITE, 0)]
    #[case(ProtFlags::EXEC, 0)]
    #[case(ProtFlags::READ, FILE_MAP_READ)]
    #[case(ProtFlags::READ | ProtFlags::WRITE, FILE_MAP_COPY)]
    #[case(ProtFlags::READ | ProtFlags::EXEC, FILE_MAP_READ | FILE_MAP_EXECUTE)]
    #[case(ProtFlags::READ | ProtFlags::WRITE | ProtFlags::EXEC, FILE_MAP_COPY | FILE_MAP_EXECUTE)]
    fn view_protection_matches_flags_subset_table(#[case] flags: ProtFlags, #[case] expected: u32) {
        assert_eq!(view_protection(flags), expected);
    }
}
