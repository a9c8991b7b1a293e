//! Program header table walk: loadable segments, RELRO ranges, the
//! executable-stack flag, and delegation into the dynamic parser.

use std::io::{Read, Seek, SeekFrom};

use super::dynamic;
use super::raw;
use crate::error::{LoaderError, Result};
use crate::model::{Chunk, ElfImage, Segment};
use crate::platform::page_size;

fn conv_flags(p_flags: u32) -> crate::model::ProtFlags {
    use crate::model::ProtFlags;
    let mut flags = ProtFlags::empty();
    if p_flags & raw::PF_R != 0 {
        flags |= ProtFlags::READ;
    }
    if p_flags & raw::PF_W != 0 {
        flags |= ProtFlags::WRITE;
    }
    if p_flags & raw::PF_X != 0 {
        flags |= ProtFlags::EXEC;
    }
    flags
}

/// Walks every program header, populating `image` in place. `file` must be
/// positioned arbitrarily on entry; its position is left undefined.
pub fn parse<R: Read + Seek>(
    file: &mut R,
    e_phoff: u64,
    e_phnum: u16,
    e_entry: u64,
    image: &mut ElfImage,
) -> Result<()> {
    let page = page_size();
    file.seek(SeekFrom::Start(e_phoff))?;
    let mut buf = vec![0u8; raw::PHDR_SIZE];
    let mut phdrs = Vec::with_capacity(e_phnum as usize);
    for _ in 0..e_phnum {
        file.read_exact(&mut buf)?;
        phdrs.push(raw::parse_phdr(&buf)?);
    }

    let mut first_aligned_vaddr: Option<u64> = None;
    let mut saw_exec_stack = false;
    let mut first_load_vaddr_for_dyn: Option<u64> = None;

    for phdr in &phdrs {
        match phdr.p_type {
            raw::PT_LOAD if phdr.p_memsz == 0 => continue,
            raw::PT_LOAD => {
                if phdr.p_align == 0
                    || phdr.p_align % page != 0
                    || phdr.p_vaddr.wrapping_sub(phdr.p_offset) % phdr.p_align != 0
                {
                    return Err(LoaderError::Malformed(
                        "PT_LOAD alignment invariant violated".into(),
                    ));
                }

                let remainder = phdr.p_vaddr % phdr.p_align;
                let aligned_vaddr = phdr.p_vaddr - remainder;

                let base = *first_aligned_vaddr.get_or_insert(aligned_vaddr);
                first_load_vaddr_for_dyn.get_or_insert(aligned_vaddr);
                let relative_offset = aligned_vaddr - base;

                let filesize = phdr.p_filesz + remainder;
                let memsize = phdr.p_memsz + remainder;

                let (file_chunk, pad_chunk) = if phdr.p_filesz != 0 {
                    let file_chunk = Chunk {
                        offset: phdr.p_offset - remainder,
                        size: filesize,
                    };
                    let pad_chunk = if phdr.p_memsz > phdr.p_filesz {
                        let file_pages = filesize.div_ceil(phdr.p_align);
                        let real_size = file_pages * phdr.p_align;
                        if real_size < memsize {
                            Chunk {
                                offset: real_size,
                                size: memsize - real_size,
                            }
                        } else {
                            Chunk::EMPTY
                        }
                    } else {
                        Chunk::EMPTY
                    };
                    (file_chunk, pad_chunk)
                } else {
                    (
                        Chunk::EMPTY,
                        Chunk {
                            offset: 0,
                            size: memsize,
                        },
                    )
                };

                let prot = conv_flags(phdr.p_flags);
                if prot.contains(crate::model::ProtFlags::EXEC)
                    && !prot.contains(crate::model::ProtFlags::READ)
                {
                    return Err(LoaderError::Malformed(
                        "segment is executable but not readable".into(),
                    ));
                }

                image.segments.push(Segment {
                    relative_offset,
                    file_chunk,
                    pad_chunk,
                    prot,
                });

                let end = relative_offset + memsize;
                image.total_memory_size = image.total_memory_size.max(end);
            }
            raw::PT_DYNAMIC => {
                let first_vaddr = first_load_vaddr_for_dyn.ok_or_else(|| {
                    LoaderError::Malformed("PT_DYNAMIC precedes any PT_LOAD".into())
                })?;
                let info = dynamic::parse(file, phdr.p_offset, first_vaddr)?;
                image.needed_libraries = info.needed_libraries;
                image.symbols = info.symbols;
                image.relocations = info.relocations;
            }
            raw::PT_GNU_RELRO => {
                let base = first_aligned_vaddr.ok_or_else(|| {
                    LoaderError::Malformed("PT_GNU_RELRO precedes any PT_LOAD".into())
                })?;
                let remainder = phdr.p_vaddr % page;
                image.relro_ranges.push(Chunk {
                    offset: phdr.p_vaddr - remainder - base,
                    size: phdr.p_memsz + remainder,
                });
            }
            raw::PT_GNU_STACK => {
                if saw_exec_stack {
                    return Err(LoaderError::Malformed(
                        "multiple PT_GNU_STACK entries".into(),
                    ));
                }
                saw_exec_stack = true;
                image.exec_stack = conv_flags(phdr.p_flags).contains(crate::model::ProtFlags::EXEC);
            }
            raw::PT_PHDR | raw::PT_INTERP | raw::PT_NOTE => {}
            other => log::warn!("unhandled segment type {:#x}", other),
        }
    }

    if image.segments.is_empty() {
        return Err(LoaderError::Malformed("no loadable segments".into()));
    }

    if e_entry != 0 {
        let base = first_aligned_vaddr.expect("at least one PT_LOAD was accepted above");
        image.entry_offset = e_entry - base;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn phdr_bytes(
        p_type: u32,
        p_flags: u32,
        p_offset: u64,
        p_vaddr: u64,
        p_filesz: u64,
        p_memsz: u64,
        p_align: u64,
    ) -> Vec<u8> {
        let mut buf = vec![0u8; raw::PHDR_SIZE];
        #[cfg(target_pointer_width = "64")]
        {
            buf[0..4].copy_from_slice(&p_type.to_ne_bytes());
            buf[4..8].copy_from_slice(&p_flags.to_ne_bytes());
            buf[8..16].copy_from_slice(&p_offset.to_ne_bytes());
            buf[16..24].copy_from_slice(&p_vaddr.to_ne_bytes());
            buf[32..40].copy_from_slice(&p_filesz.to_ne_bytes());
            buf[40..48].copy_from_slice(&p_memsz.to_ne_bytes());
            buf[48..56].copy_from_slice(&p_align.to_ne_bytes());
        }
        buf
    }

    #[test]
    fn single_page_aligned_segment() {
        let page = page_size();
        let bytes = phdr_bytes(raw::PT_LOAD, raw::PF_R | raw::PF_X, 0, 0, 0x100, 0x100, page);
        let mut cursor = Cursor::new(bytes);
        let mut image = ElfImage::default();
        parse(&mut cursor, 0, 1, 0, &mut image).expect("parses");
        assert_eq!(image.segments.len(), 1);
        assert_eq!(image.segments[0].relative_offset, 0);
        assert_eq!(image.segments[0].file_chunk.size, 0x100);
    }

    #[test]
    fn rejects_exec_without_read() {
        let page = page_size();
        let bytes = phdr_bytes(raw::PT_LOAD, raw::PF_X, 0, 0, 0x100, 0x100, page);
        let mut cursor = Cursor::new(bytes);
        let mut image = ElfImage::default();
        assert!(parse(&mut cursor, 0, 1, 0, &mut image).is_err());
    }

    #[test]
    fn rejects_misaligned_segment() {
        let bytes = phdr_bytes(raw::PT_LOAD, raw::PF_R, 0, 1, 0x100, 0x100, page_size());
        let mut cursor = Cursor::new(bytes);
        let mut image = ElfImage::default();
        assert!(parse(&mut cursor, 0, 1, 0, &mut image).is_err());
    }

    #[test]
    fn write_without_read_is_permitted() {
        let page = page_size();
        let bytes = phdr_bytes(raw::PT_LOAD, raw::PF_W, 0, 0, 0x100, 0x100, page);
        let mut cursor = Cursor::new(bytes);
        let mut image = ElfImage::default();
        parse(&mut cursor, 0, 1, 0, &mut image).expect("W without R is not rejected");
        assert!(!image.segments[0].prot.contains(crate::model::ProtFlags::READ));
    }
}
