//! ELF header validation.

use super::raw::{self, RawEhdr};
use crate::error::{LoaderError, Result};

/// Validates the ident bytes and header fields against what this loader is
/// willing to run: native class, native endianness, `ET_DYN`, a known OS/ABI,
/// and a machine matching the host.
pub fn validate(buf: &[u8]) -> Result<RawEhdr> {
    let (ident, ehdr) = raw::parse_ehdr(buf)?;

    if ident[..4] != raw::ELF_MAGIC {
        return Err(LoaderError::Malformed("not an ELF file".into()));
    }
    if ident[raw::EI_CLASS] != raw::NATIVE_CLASS {
        return Err(LoaderError::Malformed(format!(
            "unsupported ELF class {:#x}",
            ident[raw::EI_CLASS]
        )));
    }
    if ident[raw::EI_DATA] != raw::NATIVE_DATA {
        return Err(LoaderError::Malformed(format!(
            "unsupported byte order {:#x}",
            ident[raw::EI_DATA]
        )));
    }
    if ident[raw::EI_VERSION] != raw::EV_CURRENT {
        return Err(LoaderError::Malformed("unsupported ELF ident version".into()));
    }
    if !matches!(ident[raw::EI_OSABI], raw::ELFOSABI_SYSV | raw::ELFOSABI_GNU) {
        return Err(LoaderError::Malformed(format!(
            "unsupported OS/ABI {:#x}",
            ident[raw::EI_OSABI]
        )));
    }
    if ident[raw::EI_ABIVERSION] != 0 {
        return Err(LoaderError::Malformed(format!(
            "unsupported ABI version {:#x}",
            ident[raw::EI_ABIVERSION]
        )));
    }

    if ehdr.e_version != raw::EV_CURRENT as u32 {
        return Err(LoaderError::Malformed("unsupported ELF version".into()));
    }
    if ehdr.e_type != raw::ET_DYN {
        return Err(LoaderError::Malformed(
            "not a position-independent shared object".into(),
        ));
    }
    if ehdr.e_machine != raw::NATIVE_MACHINE {
        return Err(LoaderError::Malformed(format!(
            "machine {:#x} does not match host",
            ehdr.e_machine
        )));
    }
    if ehdr.e_ehsize as usize != raw::EHDR_SIZE {
        return Err(LoaderError::Malformed("unexpected header size".into()));
    }
    if ehdr.e_phentsize as usize != raw::PHDR_SIZE {
        return Err(LoaderError::Malformed(
            "unexpected program header entry size".into(),
        ));
    }
    if ehdr.e_phnum == 0 {
        return Err(LoaderError::Malformed("no program headers".into()));
    }

    Ok(ehdr)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_valid_header() -> Vec<u8> {
        let mut buf = vec![0u8; raw::EHDR_SIZE];
        buf[0..4].copy_from_slice(&raw::ELF_MAGIC);
        buf[raw::EI_CLASS] = raw::NATIVE_CLASS;
        buf[raw::EI_DATA] = raw::NATIVE_DATA;
        buf[raw::EI_VERSION] = raw::EV_CURRENT;
        buf[raw::EI_OSABI] = raw::ELFOSABI_SYSV;

        let mut off = raw::EI_NIDENT;
        buf[off..off + 2].copy_from_slice(&raw::ET_DYN.to_ne_bytes());
        off += 2;
        buf[off..off + 2].copy_from_slice(&raw::NATIVE_MACHINE.to_ne_bytes());
        off += 2;
        buf[off..off + 4].copy_from_slice(&1u32.to_ne_bytes());
        off += 4;
        off += raw::WORD_SIZE; // e_entry
        off += raw::WORD_SIZE; // e_phoff
        off += raw::WORD_SIZE; // e_shoff
        off += 4; // e_flags
        buf[off..off + 2].copy_from_slice(&(raw::EHDR_SIZE as u16).to_ne_bytes());
        off += 2;
        buf[off..off + 2].copy_from_slice(&(raw::PHDR_SIZE as u16).to_ne_bytes());
        off += 2;
        buf[off..off + 2].copy_from_slice(&1u16.to_ne_bytes());

        buf
    }

    #[test]
    fn rejects_bad_magic() {
        let mut buf = minimal_valid_header();
        buf[0] = 0;
        assert!(validate(&buf).is_err());
    }

    #[test]
    fn rejects_wrong_type() {
        let mut buf = minimal_valid_header();
        let off = raw::EI_NIDENT;
        buf[off..off + 2].copy_from_slice(&2u16.to_ne_bytes()); // ET_EXEC
        assert!(validate(&buf).is_err());
    }

    #[test]
    fn accepts_minimal_header() {
        let buf = minimal_valid_header();
        let ehdr = validate(&buf).expect("valid header");
        assert_eq!(ehdr.e_phnum, 1);
    }

    #[test]
    fn rejects_nonzero_abiversion() {
        let mut buf = minimal_valid_header();
        buf[raw::EI_ABIVERSION] = 1;
        assert!(validate(&buf).is_err());
    }
}
