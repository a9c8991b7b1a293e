//! Unix mapping dialect: one `PROT_NONE` reservation, then `MAP_FIXED`
//! overlays for each segment's file-backed and padded ranges.

use std::fs::File;
use std::os::unix::io::AsRawFd;
use std::ptr;

use crate::error::{LoaderError, Result};
use crate::model::{ElfImage, LoadedImage, ProtFlags};

fn conv_prot(flags: ProtFlags) -> libc::c_int {
    if !flags.contains(ProtFlags::READ) {
        return libc::PROT_NONE;
    }
    let mut prot = libc::PROT_READ;
    if flags.contains(ProtFlags::WRITE) {
        prot |= libc::PROT_WRITE;
    }
    if flags.contains(ProtFlags::EXEC) {
        prot |= libc::PROT_EXEC;
    }
    prot
}

pub fn load(file: &File, image: &ElfImage) -> Result<LoadedImage> {
    if image.segments.is_empty() {
        return Ok(LoadedImage::new(ptr::null_mut(), 0, 0));
    }

    // SAFETY: a private anonymous reservation with no backing file.
    let base = unsafe {
        libc::mmap(
            ptr::null_mut(),
            image.total_memory_size as usize,
            libc::PROT_NONE,
            libc::MAP_PRIVATE | libc::MAP_ANON,
            -1,
            0,
        )
    };
    if base == libc::MAP_FAILED {
        return Err(LoaderError::MappingFailed(
            std::io::Error::last_os_error().to_string(),
        ));
    }
    let base = base as *mut u8;

    let result = (|| -> Result<()> {
        debug_assert_eq!(image.segments[0].relative_offset, 0);

        for seg in &image.segments {
            let prot = conv_prot(seg.prot);

            if !seg.file_chunk.is_empty() {
                // SAFETY: `base + seg.relative_offset` lies within the
                // reservation above; `MAP_FIXED` overlays it in place.
                let ptr = unsafe {
                    libc::mmap(
                        base.add(seg.relative_offset as usize) as *mut libc::c_void,
                        seg.file_chunk.size as usize,
                        prot,
                        libc::MAP_FIXED | libc::MAP_PRIVATE,
                        file.as_raw_fd(),
                        seg.file_chunk.offset as libc::off_t,
                    )
                };
                if ptr == libc::MAP_FAILED {
                    return Err(LoaderError::MappingFailed(
                        std::io::Error::last_os_error().to_string(),
                    ));
                }
            }

            if !seg.pad_chunk.is_empty() {
                let addr = seg.relative_offset + seg.pad_chunk.offset;
                // SAFETY: same reservation, disjoint from the file-backed
                // range above.
                let ptr = unsafe {
                    libc::mmap(
                        base.add(addr as usize) as *mut libc::c_void,
                        seg.pad_chunk.size as usize,
                        prot,
                        libc::MAP_FIXED | libc::MAP_PRIVATE | libc::MAP_ANON,
                        -1,
                        0,
                    )
                };
                if ptr == libc::MAP_FAILED {
                    return Err(LoaderError::MappingFailed(
                        std::io::Error::last_os_error().to_string(),
                    ));
                }
            }
        }
        Ok(())
    })();

    if let Err(e) = result {
        // SAFETY: `base`/`total_memory_size` describe exactly the
        // reservation made above.
        unsafe {
            libc::munmap(base as *mut libc::c_void, image.total_memory_size as usize);
        }
        return Err(e);
    }

    Ok(LoadedImage::new(
        base,
        image.total_memory_size,
        image.entry_offset,
    ))
}

pub fn unload(loaded: &mut LoadedImage) {
    if !loaded.is_loaded() {
        return;
    }
    // SAFETY: `base`/`size` are exactly what `load` reserved.
    unsafe {
        libc::munmap(loaded.base_address() as *mut libc::c_void, loaded.size() as usize);
    }
    loaded.mark_unloaded();
}

pub fn freeze_readonly(loaded: &LoadedImage, range_offset: u64, range_size: u64) -> Result<()> {
    // SAFETY: `range_offset`/`range_size` are validated by the caller to lie
    // within `loaded`'s mapped range.
    let ret = unsafe {
        libc::mprotect(
            loaded.base_address().add(range_offset as usize) as *mut libc::c_void,
            range_size as usize,
            libc::PROT_READ,
        )
    };
    if ret != 0 {
        return Err(LoaderError::MappingFailed(
            std::io::Error::last_os_error().to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ProtFlags::empty(), libc::PROT_NONE)]
    #[case(ProtFlags::WRITE, libc::PROT_NONE)]
    #[case(ProtFlags::EXEC, libc::PROT_NONE)]
    #[case(ProtFlags::WRITE | ProtFlags::EXEC, libc::PROT_NONE)]
    #[case(ProtFlags::READ, libc::PROT_READ)]
    #[case(ProtFlags::READ | ProtFlags::WRITE, libc::PROT_READ | libc::PROT_WRITE)]
    #[case(ProtFlags::READ | ProtFlags::EXEC, libc::PROT_READ | libc::PROT_EXEC)]
    #[case(
        ProtFlags::READ | ProtFlags::WRITE | ProtFlags::EXEC,
        libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC
    )]
    fn conv_prot_matches_flags_subset_table(#[case] flags: ProtFlags, #[case] expected: libc::c_int) {
        assert_eq!(conv_prot(flags), expected);
    }
}
