//! Parses a position-independent ELF shared object, maps it into the
//! current process, links it against a caller-supplied symbol resolver, and
//! hands back a ready-to-enter [`LoadedImage`].
//!
//! The crate is split along the pipeline a load goes through:
//! [`inspect::inspect`] builds an [`ElfImage`] from a file, [`map::load`]
//! materialises it in memory, and [`reloc::relocate_and_freeze`] links it
//! and protects its RELRO ranges. Entering the image is the caller's job —
//! see [`entry::EntryFn`] for the calling convention it must use.

pub mod elf;
pub mod entry;
pub mod error;
pub mod inspect;
pub mod map;
pub mod model;
mod platform;
pub mod reloc;

pub use error::{LoaderError, Result};
pub use model::{Chunk, ElfImage, LoadedImage, ProtFlags, Relocation, Segment, Symbol, SymbolKind};
pub use reloc::SymbolResolver;

use std::fs::File;

/// Loads and links `image` from `file` against `resolver` into `loaded`,
/// which must be in its default (unloaded) state. A mapping failure unmaps
/// the reservation made so far before returning — nothing is left
/// half-mapped. A relocation failure is the one exception: `loaded` is left
/// mapped and partially linked, for the caller to unmap or otherwise dispose
/// of, matching the contract `reloc::relocate_and_freeze` documents.
pub fn load_and_link(
    loaded: &mut LoadedImage,
    file: &File,
    image: &ElfImage,
    resolver: &dyn SymbolResolver,
) -> Result<()> {
    map::load(loaded, file, image)?;
    reloc::relocate_and_freeze(loaded, image, resolver)
}
