//! `PT_DYNAMIC` parsing: string/symbol/relocation tables, needed-library
//! names, and the relocation set.

use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom};

use super::raw::{self, RawDyn};
use crate::error::{LoaderError, Result};
use crate::model::{Relocation, Symbol, SymbolKind};

#[derive(Debug, Default)]
struct DynLayout {
    strtab_off: u64,
    strtab_size: u64,
    symtab_off: u64,
    rel_off: u64,
    rel_size: u64,
    rela: bool,
    needed_count: usize,
}

pub struct DynamicInfo {
    pub needed_libraries: Vec<String>,
    pub symbols: Vec<Symbol>,
    pub relocations: Vec<Relocation>,
}

/// Reads every `Elf_Dyn` entry starting at `p_offset` until `DT_NULL`.
fn read_dyn_table<R: Read + Seek>(file: &mut R, p_offset: u64) -> Result<Vec<RawDyn>> {
    file.seek(SeekFrom::Start(p_offset))?;
    let mut entries = Vec::new();
    let mut buf = vec![0u8; raw::DYN_SIZE];
    loop {
        file.read_exact(&mut buf)?;
        let dyn_entry = raw::parse_dyn(&buf)?;
        let done = dyn_entry.d_tag == raw::DT_NULL;
        entries.push(dyn_entry);
        if done {
            break;
        }
    }
    Ok(entries)
}

/// First pass: record table pointers/sizes and count `DT_NEEDED` entries.
/// Does not reproduce the source bug where a `DT_SYMTAB` entry was written
/// into the string-table offset; the two tags are kept fully distinct here.
fn first_pass(entries: &[RawDyn]) -> Result<DynLayout> {
    let mut layout = DynLayout::default();

    for dyn_entry in entries {
        match dyn_entry.d_tag {
            raw::DT_NULL => break,
            raw::DT_NEEDED => layout.needed_count += 1,
            raw::DT_RUNPATH | raw::DT_GNU_HASH | raw::DT_PLTGOT | raw::DT_DEBUG => {}
            raw::DT_STRTAB => layout.strtab_off = dyn_entry.d_un,
            raw::DT_STRSZ => layout.strtab_size = dyn_entry.d_un,
            raw::DT_SYMENT => {
                if dyn_entry.d_un as usize != raw::SYM_SIZE {
                    return Err(LoaderError::Malformed(
                        "symbol table entry size does not match architecture".into(),
                    ));
                }
            }
            raw::DT_SYMTAB => layout.symtab_off = dyn_entry.d_un,
            raw::DT_PLTRELSZ => layout.rel_size = dyn_entry.d_un,
            raw::DT_PLTREL => layout.rela = dyn_entry.d_un as i64 == raw::DT_RELA_TAG,
            raw::DT_JMPREL => layout.rel_off = dyn_entry.d_un,
            raw::DT_FLAGS_1 => {
                if dyn_entry.d_un != raw::DF_1_PIE {
                    log::warn!("unhandled state flag {:#x}", dyn_entry.d_un);
                }
            }
            other => log::warn!("unhandled dynamic tag {:#x}", other),
        }
    }

    Ok(layout)
}

/// Reads the full string table into an owned buffer, since later seeks (the
/// symbol table, the relocation table) would otherwise invalidate any
/// borrow into the file's read position.
fn read_strtab<R: Read + Seek>(file: &mut R, layout: &DynLayout) -> Result<Vec<u8>> {
    if layout.strtab_size == 0 {
        return Ok(Vec::new());
    }
    file.seek(SeekFrom::Start(layout.strtab_off))?;
    let mut buf = vec![0u8; layout.strtab_size as usize];
    file.read_exact(&mut buf)?;
    Ok(buf)
}

fn str_at(strtab: &[u8], offset: u64) -> Result<String> {
    let start = offset as usize;
    let bytes = strtab
        .get(start..)
        .ok_or_else(|| LoaderError::Malformed("string table offset out of range".into()))?;
    let end = bytes
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| LoaderError::Malformed("unterminated string".into()))?;
    Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
}

/// Second pass: needed-library names, then the relocation table and the
/// symbols it actually references (the dense ELF symbol table itself is
/// never fully mirrored).
pub fn parse<R: Read + Seek>(
    file: &mut R,
    p_offset: u64,
    first_load_vaddr: u64,
) -> Result<DynamicInfo> {
    let entries = read_dyn_table(file, p_offset)?;
    let layout = first_pass(&entries)?;
    let strtab = read_strtab(file, &layout)?;

    let mut needed_libraries = Vec::with_capacity(layout.needed_count);
    for dyn_entry in &entries {
        if dyn_entry.d_tag == raw::DT_NEEDED {
            needed_libraries.push(str_at(&strtab, dyn_entry.d_un)?);
        }
    }

    let mut symbols = Vec::new();
    let mut relocations = Vec::new();

    if layout.rel_size > 0 {
        let entry_size = raw::rel_entry_size(layout.rela);
        if layout.rel_size as usize % entry_size != 0 {
            return Err(LoaderError::Malformed(
                "relocation table size is not a multiple of the entry size".into(),
            ));
        }
        let count = layout.rel_size as usize / entry_size;

        file.seek(SeekFrom::Start(layout.rel_off))?;
        let mut buf = vec![0u8; entry_size];
        let mut symbol_index_by_name: HashMap<u32, usize> = HashMap::new();

        for _ in 0..count {
            file.read_exact(&mut buf)?;
            let rel = raw::parse_rel(&buf, layout.rela)?;

            if !raw::is_absolute_reloc_type(rel.r_type) {
                return Err(LoaderError::Malformed(format!(
                    "unsupported relocation type {:#x}",
                    rel.r_type
                )));
            }

            let symbol_index = match symbol_index_by_name.get(&rel.r_sym) {
                Some(&idx) => idx,
                None => {
                    let sym = read_symbol(file, layout.symtab_off, rel.r_sym, &strtab)?;
                    let idx = symbols.len();
                    symbols.push(sym);
                    symbol_index_by_name.insert(rel.r_sym, idx);
                    idx
                }
            };

            if rel.r_offset < first_load_vaddr {
                return Err(LoaderError::Malformed(
                    "relocation offset precedes first loadable segment".into(),
                ));
            }

            relocations.push(Relocation {
                symbol_index,
                patch_offset: rel.r_offset - first_load_vaddr,
            });
        }
    }

    Ok(DynamicInfo {
        needed_libraries,
        symbols,
        relocations,
    })
}

fn read_symbol<R: Read + Seek>(
    file: &mut R,
    symtab_off: u64,
    sym_index: u32,
    strtab: &[u8],
) -> Result<Symbol> {
    let offset = symtab_off + sym_index as u64 * raw::SYM_SIZE as u64;
    file.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; raw::SYM_SIZE];
    file.read_exact(&mut buf)?;
    let raw_sym = raw::parse_sym(&buf)?;

    Ok(Symbol {
        name: str_at(strtab, raw_sym.st_name as u64)?,
        kind: match raw_sym.kind() {
            SymbolKind::Func => SymbolKind::Func,
            SymbolKind::Data => SymbolKind::Data,
        },
        imported: true,
        value_offset: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_strtab_offset_lookup_fails() {
        let strtab: Vec<u8> = Vec::new();
        assert!(str_at(&strtab, 0).is_err());
    }

    #[test]
    fn reads_terminated_string() {
        let strtab = b"foo\0bar\0".to_vec();
        assert_eq!(str_at(&strtab, 0).unwrap(), "foo");
        assert_eq!(str_at(&strtab, 4).unwrap(), "bar");
    }
}
