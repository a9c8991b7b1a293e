use bitflags::bitflags;
use std::fmt;

bitflags! {
    /// Memory protection a segment or RELRO range must end up with.
    ///
    /// `EXEC` without `READ` is not representable by construction: the
    /// parser rejects such segments before a `ProtFlags` is ever built.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ProtFlags: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXEC = 1 << 2;
    }
}

impl fmt::Display for ProtFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.contains(ProtFlags::READ) {
            write!(f, "R")?;
        }
        if self.contains(ProtFlags::WRITE) {
            write!(f, "W")?;
        }
        if self.contains(ProtFlags::EXEC) {
            write!(f, "X")?;
        }
        if self.is_empty() {
            write!(f, "-")?;
        }
        Ok(())
    }
}

/// A byte range, either within the source file or within the mapped image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Chunk {
    pub offset: u64,
    pub size: u64,
}

impl Chunk {
    pub const EMPTY: Chunk = Chunk { offset: 0, size: 0 };

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// One `PT_LOAD` segment, already alignment-resolved by the parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Offset from the base of the first loadable segment. Zero for that
    /// first segment.
    pub relative_offset: u64,
    /// File-backed portion, aligned down to `p_align`. Empty if `filesz == 0`.
    pub file_chunk: Chunk,
    /// Anonymous zero-initialised tail beyond `file_chunk`. Empty if none is
    /// needed.
    pub pad_chunk: Chunk,
    pub prot: ProtFlags,
}

impl Segment {
    /// Total span of this segment within the image, `file_chunk` and
    /// `pad_chunk` combined.
    pub fn memsz_rounded(&self) -> u64 {
        self.pad_chunk.end().max(self.file_chunk.size)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Data,
    Func,
}

/// A symbol referenced (imported) or defined (local) by a relocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub imported: bool,
    /// Offset relative to the first loadable segment. Unused when
    /// `imported` is true.
    pub value_offset: u64,
}

/// One absolute-address relocation: overwrite the word at `patch_offset`
/// (relative to the first loadable segment) with the resolved address of
/// `symbols[symbol_index]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relocation {
    pub symbol_index: usize,
    pub patch_offset: u64,
}

/// The result of inspecting an ELF file: everything needed to map the
/// image and link it, with the file itself no longer required.
#[derive(Debug, Clone, Default)]
pub struct ElfImage {
    /// Zero means "no entrypoint".
    pub entry_offset: u64,
    pub segments: Vec<Segment>,
    pub total_memory_size: u64,
    pub symbols: Vec<Symbol>,
    pub relocations: Vec<Relocation>,
    pub relro_ranges: Vec<Chunk>,
    pub needed_libraries: Vec<String>,
    pub exec_stack: bool,
}

impl fmt::Display for ElfImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.entry_offset != 0 {
            writeln!(f, "entrypoint offset (relative): {:#x}", self.entry_offset)?;
        }
        writeln!(
            f,
            "total size in memory when loaded: {:#x}",
            self.total_memory_size
        )?;
        writeln!(
            f,
            "stack executable: {}",
            if self.exec_stack { "yes" } else { "no" }
        )?;
        writeln!(f, "loadable segment count: {}", self.segments.len())?;
        writeln!(f, "post-reloc RO segment count: {}", self.relro_ranges.len())?;
        writeln!(f, "relocation count: {}", self.relocations.len())?;

        for (i, relro) in self.relro_ranges.iter().enumerate() {
            writeln!(
                f,
                "relro range #{i}: {:#x} to {:#x}",
                relro.offset,
                relro.end()
            )?;
        }

        for (i, seg) in self.segments.iter().enumerate() {
            writeln!(f, "loadable segment #{i}:")?;
            writeln!(f, "  relative offset: {:#x}", seg.relative_offset)?;
            if !seg.file_chunk.is_empty() {
                writeln!(
                    f,
                    "  file data size: {:#x} (at file offset {:#x})",
                    seg.file_chunk.size, seg.file_chunk.offset
                )?;
            }
            if !seg.pad_chunk.is_empty() {
                writeln!(
                    f,
                    "  zero padding size: {:#x} (relative offset {:#x})",
                    seg.pad_chunk.size, seg.pad_chunk.offset
                )?;
            }
            writeln!(f, "  flags: {}", seg.prot)?;
        }

        if !self.relocations.is_empty() {
            writeln!(f, "relocations:")?;
            for reloc in &self.relocations {
                let sym = &self.symbols[reloc.symbol_index];
                writeln!(
                    f,
                    "  {:#x} {} ({})",
                    reloc.patch_offset,
                    sym.name,
                    match sym.kind {
                        SymbolKind::Data => "data",
                        SymbolKind::Func => "function",
                    }
                )?;
            }
        }

        if !self.needed_libraries.is_empty() {
            writeln!(f, "required libraries:")?;
            for (i, lib) in self.needed_libraries.iter().enumerate() {
                writeln!(f, "  {i}: {lib}")?;
            }
        }

        Ok(())
    }
}

/// An ELF image mapped into the process, ready to be linked and entered.
pub struct LoadedImage {
    pub(crate) base: *mut u8,
    pub(crate) size: u64,
    pub(crate) entry_offset: u64,
    /// Windows-only: the per-segment views and committed ranges `load`
    /// created, needed because a single `VirtualFree` cannot tear down a
    /// region containing mapped views the way `munmap` can on Unix.
    #[cfg(windows)]
    pub(crate) windows_views: Vec<*mut std::ffi::c_void>,
    #[cfg(windows)]
    pub(crate) windows_commits: Vec<(*mut std::ffi::c_void, usize)>,
}

impl Default for LoadedImage {
    /// An unloaded handle, ready to be passed to [`crate::map::load`].
    fn default() -> Self {
        LoadedImage {
            base: std::ptr::null_mut(),
            size: 0,
            entry_offset: 0,
            #[cfg(windows)]
            windows_views: Vec::new(),
            #[cfg(windows)]
            windows_commits: Vec::new(),
        }
    }
}

impl LoadedImage {
    pub(crate) fn new(base: *mut u8, size: u64, entry_offset: u64) -> Self {
        LoadedImage {
            base,
            size,
            entry_offset,
            #[cfg(windows)]
            windows_views: Vec::new(),
            #[cfg(windows)]
            windows_commits: Vec::new(),
        }
    }

    pub(crate) fn mark_unloaded(&mut self) {
        self.base = std::ptr::null_mut();
    }

    pub fn base_address(&self) -> *mut u8 {
        self.base
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_loaded(&self) -> bool {
        !self.base.is_null()
    }

    /// The entrypoint as a raw pointer, or `None` if the descriptor had
    /// `entry_offset == 0`.
    ///
    /// # Safety
    /// Only valid to call once relocation and RELRO freezing have
    /// completed. The caller is responsible for invoking it through the
    /// calling convention demanded by the target platform (see
    /// [`crate::entry::EntryFn`]).
    pub unsafe fn entry_ptr(&self) -> Option<*const ()> {
        if self.entry_offset == 0 {
            None
        } else {
            Some(unsafe { self.base.add(self.entry_offset as usize) } as *const ())
        }
    }
}

// SAFETY: `LoadedImage` is just an owned mapping and a couple of integers;
// nothing about it is thread-affine. The single-threaded control flow in
// `§5` never shares it across threads regardless, but the bound keeps
// callers from hitting friction built by `Send`-by-default assumptions.
unsafe impl Send for LoadedImage {}
