//! On-disk ELF record layouts and constants, resolved to the host's native
//! word size and endianness at build time. Only the native combination is
//! ever parsed — cross-architecture loading is out of scope (see
//! `spec.md` §1, Non-goals).

use crate::error::{LoaderError, Result};

pub const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];
pub const EI_NIDENT: usize = 16;

pub const EI_CLASS: usize = 4;
pub const EI_DATA: usize = 5;
pub const EI_VERSION: usize = 6;
pub const EI_OSABI: usize = 7;
pub const EI_ABIVERSION: usize = 8;

pub const ELFCLASS32: u8 = 1;
pub const ELFCLASS64: u8 = 2;

pub const ELFDATA2LSB: u8 = 1;
pub const ELFDATA2MSB: u8 = 2;

pub const EV_CURRENT: u8 = 1;

pub const ELFOSABI_SYSV: u8 = 0;
pub const ELFOSABI_GNU: u8 = 3;

pub const ET_DYN: u16 = 3;

pub const EM_386: u16 = 3;
pub const EM_ARM: u16 = 40;
pub const EM_X86_64: u16 = 62;
pub const EM_AARCH64: u16 = 183;

pub const PT_LOAD: u32 = 1;
pub const PT_DYNAMIC: u32 = 2;
pub const PT_INTERP: u32 = 3;
pub const PT_NOTE: u32 = 4;
pub const PT_PHDR: u32 = 6;
pub const PT_GNU_STACK: u32 = 0x6474e551;
pub const PT_GNU_RELRO: u32 = 0x6474e552;

pub const PF_X: u32 = 1 << 0;
pub const PF_W: u32 = 1 << 1;
pub const PF_R: u32 = 1 << 2;

pub const DT_NULL: i64 = 0;
pub const DT_NEEDED: i64 = 1;
pub const DT_PLTRELSZ: i64 = 2;
pub const DT_PLTGOT: i64 = 3;
pub const DT_STRTAB: i64 = 5;
pub const DT_SYMTAB: i64 = 6;
pub const DT_STRSZ: i64 = 10;
pub const DT_SYMENT: i64 = 11;
pub const DT_PLTREL: i64 = 20;
pub const DT_DEBUG: i64 = 21;
pub const DT_JMPREL: i64 = 23;
pub const DT_RUNPATH: i64 = 29;
pub const DT_GNU_HASH: i64 = 0x6ffffef5;
pub const DT_FLAGS_1: i64 = 0x6ffffffb;

pub const DT_REL_TAG: i64 = 17;
pub const DT_RELA_TAG: i64 = 7;

pub const DF_1_PIE: u64 = 0x8000000;

pub const STT_FUNC: u8 = 2;

#[cfg(target_pointer_width = "64")]
pub const NATIVE_CLASS: u8 = ELFCLASS64;
#[cfg(target_pointer_width = "32")]
pub const NATIVE_CLASS: u8 = ELFCLASS32;

#[cfg(target_endian = "little")]
pub const NATIVE_DATA: u8 = ELFDATA2LSB;
#[cfg(target_endian = "big")]
pub const NATIVE_DATA: u8 = ELFDATA2MSB;

#[cfg(target_arch = "x86_64")]
pub const NATIVE_MACHINE: u16 = EM_X86_64;
#[cfg(target_arch = "aarch64")]
pub const NATIVE_MACHINE: u16 = EM_AARCH64;
#[cfg(target_arch = "x86")]
pub const NATIVE_MACHINE: u16 = EM_386;
#[cfg(target_arch = "arm")]
pub const NATIVE_MACHINE: u16 = EM_ARM;

/// Returns whether an `R_*` relocation type is one of the absolute-address
/// kinds this loader is willing to apply (`GLOB_DAT`/`JUMP_SLOT`-shaped: a
/// plain write of a resolved symbol address, no addend arithmetic, no
/// PC-relative component).
#[cfg(target_arch = "x86_64")]
pub fn is_absolute_reloc_type(r_type: u32) -> bool {
    matches!(r_type, 6 | 7) // R_X86_64_GLOB_DAT, R_X86_64_JUMP_SLOT
}
#[cfg(target_arch = "aarch64")]
pub fn is_absolute_reloc_type(r_type: u32) -> bool {
    matches!(r_type, 1025 | 1026) // R_AARCH64_GLOB_DAT, R_AARCH64_JUMP_SLOT
}
#[cfg(target_arch = "x86")]
pub fn is_absolute_reloc_type(r_type: u32) -> bool {
    matches!(r_type, 6 | 7) // R_386_GLOB_DAT, R_386_JMP_SLOT
}
#[cfg(target_arch = "arm")]
pub fn is_absolute_reloc_type(r_type: u32) -> bool {
    matches!(r_type, 21 | 22) // R_ARM_GLOB_DAT, R_ARM_JUMP_SLOT
}

fn u16_at(buf: &[u8], off: usize) -> Result<u16> {
    let bytes: [u8; 2] = buf
        .get(off..off + 2)
        .ok_or_else(|| LoaderError::Malformed("truncated record".into()))?
        .try_into()
        .unwrap();
    Ok(u16::from_ne_bytes(bytes))
}

fn u32_at(buf: &[u8], off: usize) -> Result<u32> {
    let bytes: [u8; 4] = buf
        .get(off..off + 4)
        .ok_or_else(|| LoaderError::Malformed("truncated record".into()))?
        .try_into()
        .unwrap();
    Ok(u32::from_ne_bytes(bytes))
}

fn u64_at(buf: &[u8], off: usize) -> Result<u64> {
    let bytes: [u8; 8] = buf
        .get(off..off + 8)
        .ok_or_else(|| LoaderError::Malformed("truncated record".into()))?
        .try_into()
        .unwrap();
    Ok(u64::from_ne_bytes(bytes))
}

#[cfg(target_pointer_width = "64")]
fn word_at(buf: &[u8], off: usize) -> Result<u64> {
    u64_at(buf, off)
}
#[cfg(target_pointer_width = "32")]
fn word_at(buf: &[u8], off: usize) -> Result<u64> {
    u32_at(buf, off).map(|v| v as u64)
}

#[cfg(target_pointer_width = "64")]
pub const WORD_SIZE: usize = 8;
#[cfg(target_pointer_width = "32")]
pub const WORD_SIZE: usize = 4;

/// A parsed ELF header. Every field is widened to its largest native
/// counterpart regardless of class, since downstream code never needs to
/// round-trip it back to bytes.
#[derive(Debug, Clone, Copy)]
pub struct RawEhdr {
    pub e_type: u16,
    pub e_machine: u16,
    pub e_version: u32,
    pub e_entry: u64,
    pub e_phoff: u64,
    pub e_flags: u32,
    pub e_ehsize: u16,
    pub e_phentsize: u16,
    pub e_phnum: u16,
}

/// Size in bytes of the on-disk header for the native class.
#[cfg(target_pointer_width = "64")]
pub const EHDR_SIZE: usize = EI_NIDENT + 2 + 2 + 4 + 8 + 8 + 8 + 4 + 2 + 2 + 2 + 2 + 2 + 2;
#[cfg(target_pointer_width = "32")]
pub const EHDR_SIZE: usize = EI_NIDENT + 2 + 2 + 4 + 4 + 4 + 4 + 4 + 2 + 2 + 2 + 2 + 2 + 2;

pub fn parse_ehdr(buf: &[u8]) -> Result<([u8; EI_NIDENT], RawEhdr)> {
    if buf.len() < EHDR_SIZE {
        return Err(LoaderError::Malformed("ELF header truncated".into()));
    }
    let mut ident = [0u8; EI_NIDENT];
    ident.copy_from_slice(&buf[..EI_NIDENT]);

    let mut off = EI_NIDENT;
    let e_type = u16_at(buf, off)?;
    off += 2;
    let e_machine = u16_at(buf, off)?;
    off += 2;
    let e_version = u32_at(buf, off)?;
    off += 4;
    let e_entry = word_at(buf, off)?;
    off += WORD_SIZE;
    let e_phoff = word_at(buf, off)?;
    off += WORD_SIZE;
    // e_shoff, unused, skipped
    off += WORD_SIZE;
    let e_flags = u32_at(buf, off)?;
    off += 4;
    let e_ehsize = u16_at(buf, off)?;
    off += 2;
    let e_phentsize = u16_at(buf, off)?;
    off += 2;
    let e_phnum = u16_at(buf, off)?;
    off += 2;
    // e_shentsize, e_shnum, e_shstrndx: unused, not read

    let _ = off;
    Ok((
        ident,
        RawEhdr {
            e_type,
            e_machine,
            e_version,
            e_entry,
            e_phoff,
            e_flags,
            e_ehsize,
            e_phentsize,
            e_phnum,
        },
    ))
}

#[derive(Debug, Clone, Copy)]
pub struct RawPhdr {
    pub p_type: u32,
    pub p_flags: u32,
    pub p_offset: u64,
    pub p_vaddr: u64,
    pub p_filesz: u64,
    pub p_memsz: u64,
    pub p_align: u64,
}

#[cfg(target_pointer_width = "64")]
pub const PHDR_SIZE: usize = 4 + 4 + 8 + 8 + 8 + 8 + 8 + 8;
#[cfg(target_pointer_width = "32")]
pub const PHDR_SIZE: usize = 4 + 4 + 4 + 4 + 4 + 4 + 4 + 4;

#[cfg(target_pointer_width = "64")]
pub fn parse_phdr(buf: &[u8]) -> Result<RawPhdr> {
    if buf.len() < PHDR_SIZE {
        return Err(LoaderError::Malformed("program header truncated".into()));
    }
    Ok(RawPhdr {
        p_type: u32_at(buf, 0)?,
        p_flags: u32_at(buf, 4)?,
        p_offset: u64_at(buf, 8)?,
        p_vaddr: u64_at(buf, 16)?,
        // p_paddr at 24, unused
        p_filesz: u64_at(buf, 32)?,
        p_memsz: u64_at(buf, 40)?,
        p_align: u64_at(buf, 48)?,
    })
}

#[cfg(target_pointer_width = "32")]
pub fn parse_phdr(buf: &[u8]) -> Result<RawPhdr> {
    if buf.len() < PHDR_SIZE {
        return Err(LoaderError::Malformed("program header truncated".into()));
    }
    Ok(RawPhdr {
        p_type: u32_at(buf, 0)?,
        p_offset: u32_at(buf, 4)? as u64,
        p_vaddr: u32_at(buf, 8)? as u64,
        // p_paddr at 12, unused
        p_filesz: u32_at(buf, 16)? as u64,
        p_memsz: u32_at(buf, 20)? as u64,
        p_flags: u32_at(buf, 24)?,
        p_align: u32_at(buf, 28)? as u64,
    })
}

#[derive(Debug, Clone, Copy)]
pub struct RawDyn {
    pub d_tag: i64,
    /// The `d_val`/`d_ptr` union, collapsed: callers interpret it according
    /// to `d_tag` the same way the C union did.
    pub d_un: u64,
}

#[cfg(target_pointer_width = "64")]
pub const DYN_SIZE: usize = 8 + 8;
#[cfg(target_pointer_width = "32")]
pub const DYN_SIZE: usize = 4 + 4;

#[cfg(target_pointer_width = "64")]
pub fn parse_dyn(buf: &[u8]) -> Result<RawDyn> {
    if buf.len() < DYN_SIZE {
        return Err(LoaderError::Malformed("dynamic entry truncated".into()));
    }
    Ok(RawDyn {
        d_tag: u64_at(buf, 0)? as i64,
        d_un: u64_at(buf, 8)?,
    })
}

#[cfg(target_pointer_width = "32")]
pub fn parse_dyn(buf: &[u8]) -> Result<RawDyn> {
    if buf.len() < DYN_SIZE {
        return Err(LoaderError::Malformed("dynamic entry truncated".into()));
    }
    Ok(RawDyn {
        d_tag: u32_at(buf, 0)? as i32 as i64,
        d_un: u32_at(buf, 4)? as u64,
    })
}

#[derive(Debug, Clone, Copy)]
pub struct RawSym {
    pub st_name: u32,
    pub st_info: u8,
    pub st_value: u64,
}

impl RawSym {
    pub fn kind(&self) -> crate::model::SymbolKind {
        if self.st_info & 0xf == STT_FUNC {
            crate::model::SymbolKind::Func
        } else {
            crate::model::SymbolKind::Data
        }
    }
}

#[cfg(target_pointer_width = "64")]
pub const SYM_SIZE: usize = 4 + 1 + 1 + 2 + 8 + 8;
#[cfg(target_pointer_width = "32")]
pub const SYM_SIZE: usize = 4 + 4 + 4 + 1 + 1 + 2;

#[cfg(target_pointer_width = "64")]
pub fn parse_sym(buf: &[u8]) -> Result<RawSym> {
    if buf.len() < SYM_SIZE {
        return Err(LoaderError::Malformed("symbol table entry truncated".into()));
    }
    Ok(RawSym {
        st_name: u32_at(buf, 0)?,
        st_info: buf[4],
        // st_other at 5, st_shndx at 6..8, unused
        st_value: u64_at(buf, 8)?,
    })
}

#[cfg(target_pointer_width = "32")]
pub fn parse_sym(buf: &[u8]) -> Result<RawSym> {
    if buf.len() < SYM_SIZE {
        return Err(LoaderError::Malformed("symbol table entry truncated".into()));
    }
    Ok(RawSym {
        st_name: u32_at(buf, 0)?,
        st_value: u32_at(buf, 4)? as u64,
        // st_size at 8..12, unused
        st_info: buf[12],
        // st_other at 13, st_shndx at 14..16, unused
    })
}

/// A relocation entry, `Rel` or `Rela` normalised to a common shape (the
/// addend is unused: only absolute `GLOB_DAT`/`JUMP_SLOT`-shaped
/// relocations are supported, and those never carry one).
#[derive(Debug, Clone, Copy)]
pub struct RawRel {
    pub r_offset: u64,
    pub r_sym: u32,
    pub r_type: u32,
}

#[cfg(target_pointer_width = "64")]
pub fn rel_entry_size(rela: bool) -> usize {
    if rela { 24 } else { 16 }
}
#[cfg(target_pointer_width = "32")]
pub fn rel_entry_size(rela: bool) -> usize {
    if rela { 12 } else { 8 }
}

#[cfg(target_pointer_width = "64")]
pub fn parse_rel(buf: &[u8], rela: bool) -> Result<RawRel> {
    let needed = rel_entry_size(rela);
    if buf.len() < needed {
        return Err(LoaderError::Malformed("relocation entry truncated".into()));
    }
    let r_offset = u64_at(buf, 0)?;
    let r_info = u64_at(buf, 8)?;
    Ok(RawRel {
        r_offset,
        r_sym: (r_info >> 32) as u32,
        r_type: (r_info & 0xffff_ffff) as u32,
    })
}

#[cfg(target_pointer_width = "32")]
pub fn parse_rel(buf: &[u8], rela: bool) -> Result<RawRel> {
    let needed = rel_entry_size(rela);
    if buf.len() < needed {
        return Err(LoaderError::Malformed("relocation entry truncated".into()));
    }
    let r_offset = u32_at(buf, 0)? as u64;
    let r_info = u32_at(buf, 4)?;
    Ok(RawRel {
        r_offset,
        r_sym: r_info >> 8,
        r_type: r_info & 0xff,
    })
}
