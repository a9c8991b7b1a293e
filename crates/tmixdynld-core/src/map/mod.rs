//! Reserving address space and materialising loadable segments.
//!
//! Two OS dialects share one contract: reserve `total_memory_size` bytes,
//! then map each segment's file-backed and zero-padded portions at their
//! `relative_offset` within the reservation, with the right protection.
//! Unix can re-map over its own reservation (`MAP_FIXED`); Windows cannot
//! overlap a view over an existing mapping, so it probes for a free region,
//! releases it, and immediately re-claims it piece by piece.

#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

#[cfg(unix)]
use unix as imp;
#[cfg(windows)]
use windows as imp;

use std::fs::File;

use crate::error::{LoaderError, Result};
use crate::model::{ElfImage, LoadedImage};

/// Maps every loadable segment of `image` from `file` into `loaded`, which
/// must be in its default (unloaded) state. Fails with
/// [`LoaderError::AlreadyLoaded`] if called again without an intervening
/// [`unload`].
pub fn load(loaded: &mut LoadedImage, file: &File, image: &ElfImage) -> Result<()> {
    if loaded.is_loaded() {
        return Err(LoaderError::AlreadyLoaded);
    }
    *loaded = imp::load(file, image)?;
    Ok(())
}

/// Reverses [`load`]: unmaps the reservation. Idempotent against a
/// not-currently-loaded image.
pub fn unload(loaded: &mut LoadedImage) {
    imp::unload(loaded)
}

/// Changes the protection of `range` (relative to `loaded`'s base) to
/// read-only. Used once per RELRO range after all relocations are applied.
pub fn freeze_readonly(loaded: &LoadedImage, range_offset: u64, range_size: u64) -> Result<()> {
    imp::freeze_readonly(loaded, range_offset, range_size)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::model::{Chunk, ProtFlags, Segment};
    use std::io::Write;

    fn single_page_image(page: u64) -> ElfImage {
        let mut image = ElfImage::default();
        image.total_memory_size = page;
        image.segments.push(Segment {
            relative_offset: 0,
            file_chunk: Chunk { offset: 0, size: page },
            pad_chunk: Chunk::EMPTY,
            prot: ProtFlags::READ,
        });
        image
    }

    #[test]
    fn second_load_without_unload_is_already_loaded() {
        let page = crate::platform::page_size();
        let mut file = tempfile::tempfile().expect("tempfile");
        file.write_all(&vec![0u8; page as usize]).unwrap();

        let image = single_page_image(page);
        let mut loaded = LoadedImage::default();

        load(&mut loaded, &file, &image).expect("first load succeeds");
        let err = load(&mut loaded, &file, &image).unwrap_err();
        assert!(matches!(err, LoaderError::AlreadyLoaded));

        unload(&mut loaded);
        assert!(!loaded.is_loaded());
    }

    #[test]
    fn load_after_unload_succeeds_again() {
        let page = crate::platform::page_size();
        let mut file = tempfile::tempfile().expect("tempfile");
        file.write_all(&vec![0u8; page as usize]).unwrap();

        let image = single_page_image(page);
        let mut loaded = LoadedImage::default();

        load(&mut loaded, &file, &image).expect("first load succeeds");
        unload(&mut loaded);
        load(&mut loaded, &file, &image).expect("reload after unload succeeds");
        unload(&mut loaded);
    }
}
