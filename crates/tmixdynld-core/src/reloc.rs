//! Relocation application and RELRO freezing.

use crate::error::{LoaderError, Result};
use crate::map;
use crate::model::{ElfImage, LoadedImage};

/// Anything capable of resolving a symbol name to an address in the host
/// library's address space. Kept as a trait so the core never depends on
/// how the resolver actually opens or searches a library.
pub trait SymbolResolver {
    fn resolve(&self, name: &str) -> Option<usize>;
}

#[cfg(target_pointer_width = "64")]
type NativeWord = u64;
#[cfg(target_pointer_width = "32")]
type NativeWord = u32;

/// Applies every relocation in `image` against `loaded`, then freezes each
/// RELRO range read-only. On a missing symbol the image is left
/// partially linked, matching the source: there is no rollback path at this
/// level.
pub fn relocate_and_freeze(
    loaded: &LoadedImage,
    image: &ElfImage,
    resolver: &dyn SymbolResolver,
) -> Result<()> {
    for reloc in &image.relocations {
        let symbol = &image.symbols[reloc.symbol_index];

        let target = if symbol.imported {
            resolver
                .resolve(&symbol.name)
                .ok_or_else(|| LoaderError::MissingSymbol(symbol.name.clone()))?
        } else {
            loaded.base_address() as usize + symbol.value_offset as usize
        };

        // SAFETY: `patch_offset` was validated against the segment layout
        // during inspection, and mapping has already completed by the time
        // this function is called.
        unsafe {
            let patch_site = loaded.base_address().add(reloc.patch_offset as usize) as *mut NativeWord;
            patch_site.write_unaligned(target as NativeWord);
        }
    }

    for relro in &image.relro_ranges {
        map::freeze_readonly(loaded, relro.offset, relro.size)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Relocation, Symbol, SymbolKind};
    use std::collections::HashMap;

    struct FakeResolver(HashMap<&'static str, usize>);

    impl SymbolResolver for FakeResolver {
        fn resolve(&self, name: &str) -> Option<usize> {
            self.0.get(name).copied()
        }
    }

    #[test]
    fn missing_symbol_is_reported_by_name() {
        let mut image = ElfImage::default();
        image.symbols.push(Symbol {
            name: "printf".into(),
            kind: SymbolKind::Func,
            imported: true,
            value_offset: 0,
        });
        image.relocations.push(Relocation {
            symbol_index: 0,
            patch_offset: 0,
        });

        let loaded = LoadedImage::new(std::ptr::null_mut(), 0, 0);
        let resolver = FakeResolver(HashMap::new());

        let err = relocate_and_freeze(&loaded, &image, &resolver).unwrap_err();
        assert!(matches!(err, LoaderError::MissingSymbol(ref name) if name == "printf"));
    }
}
