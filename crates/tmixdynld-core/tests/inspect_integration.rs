//! End-to-end inspector tests against hand-built minimal ELF byte buffers.
//! No `object`/`goblin`: these buffers are assembled by hand, the same way
//! the inspector itself reads them.

use std::io::Cursor;

use tmixdynld_core::elf::raw;
use tmixdynld_core::inspect::inspect;

struct ElfBuilder {
    buf: Vec<u8>,
    phdrs: Vec<u8>,
    phnum: u16,
    entry: u64,
}

impl ElfBuilder {
    fn new() -> Self {
        ElfBuilder {
            buf: vec![0u8; raw::EHDR_SIZE],
            phdrs: Vec::new(),
            phnum: 0,
            entry: 0,
        }
    }

    fn with_entry(mut self, entry: u64) -> Self {
        self.entry = entry;
        self
    }

    fn add_load_segment(mut self, offset: u64, vaddr: u64, filesz: u64, memsz: u64, flags: u32, align: u64) -> Self {
        self.phdrs.extend(phdr_bytes(raw::PT_LOAD, flags, offset, vaddr, filesz, memsz, align));
        self.phnum += 1;
        self
    }

    fn add_relro(mut self, vaddr: u64, memsz: u64) -> Self {
        self.phdrs.extend(phdr_bytes(raw::PT_GNU_RELRO, raw::PF_R, 0, vaddr, 0, memsz, 1));
        self.phnum += 1;
        self
    }

    fn build(mut self) -> Vec<u8> {
        self.buf[0..4].copy_from_slice(&raw::ELF_MAGIC);
        self.buf[raw::EI_CLASS] = raw::NATIVE_CLASS;
        self.buf[raw::EI_DATA] = raw::NATIVE_DATA;
        self.buf[raw::EI_VERSION] = raw::EV_CURRENT;
        self.buf[raw::EI_OSABI] = raw::ELFOSABI_SYSV;

        let mut off = raw::EI_NIDENT;
        self.buf[off..off + 2].copy_from_slice(&raw::ET_DYN.to_ne_bytes());
        off += 2;
        self.buf[off..off + 2].copy_from_slice(&raw::NATIVE_MACHINE.to_ne_bytes());
        off += 2;
        self.buf[off..off + 4].copy_from_slice(&1u32.to_ne_bytes());
        off += 4;
        write_word(&mut self.buf, off, self.entry);
        off += raw::WORD_SIZE;
        write_word(&mut self.buf, off, raw::EHDR_SIZE as u64); // e_phoff
        off += raw::WORD_SIZE;
        off += raw::WORD_SIZE; // e_shoff
        off += 4; // e_flags
        self.buf[off..off + 2].copy_from_slice(&(raw::EHDR_SIZE as u16).to_ne_bytes());
        off += 2;
        self.buf[off..off + 2].copy_from_slice(&(raw::PHDR_SIZE as u16).to_ne_bytes());
        off += 2;
        self.buf[off..off + 2].copy_from_slice(&self.phnum.to_ne_bytes());

        self.buf.extend(self.phdrs);
        self.buf
    }
}

fn write_word(buf: &mut [u8], off: usize, val: u64) {
    #[cfg(target_pointer_width = "64")]
    buf[off..off + 8].copy_from_slice(&val.to_ne_bytes());
    #[cfg(target_pointer_width = "32")]
    buf[off..off + 4].copy_from_slice(&(val as u32).to_ne_bytes());
}

fn phdr_bytes(p_type: u32, p_flags: u32, p_offset: u64, p_vaddr: u64, p_filesz: u64, p_memsz: u64, p_align: u64) -> Vec<u8> {
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

fn page() -> u64 {
    4096
}

#[test]
fn minimal_single_segment_image() {
    let bytes = ElfBuilder::new()
        .with_entry(page())
        .add_load_segment(0, page(), 0x40, 0x40, raw::PF_R | raw::PF_X, page())
        .build();

    let mut cursor = Cursor::new(bytes);
    let image = inspect(&mut cursor).expect("valid minimal image parses");

    assert_eq!(image.segments.len(), 1);
    assert_eq!(image.segments[0].relative_offset, 0);
    assert_eq!(image.total_memory_size, 0x40);
    assert_eq!(image.entry_offset, 0);
}

#[test]
fn relro_range_is_contained_in_its_segment() {
    let bytes = ElfBuilder::new()
        .add_load_segment(0, 0, 0x2000, 0x2000, raw::PF_R | raw::PF_W, page())
        .add_relro(0x1000, 0x1000)
        .build();

    let mut cursor = Cursor::new(bytes);
    let image = inspect(&mut cursor).expect("valid image parses");

    let seg = &image.segments[0];
    let relro = &image.relro_ranges[0];
    assert!(seg.relative_offset <= relro.offset);
    assert!(relro.offset + relro.size <= seg.relative_offset + seg.memsz_rounded());
}

#[test]
fn relro_offset_is_relative_to_the_image_base_not_the_absolute_vaddr() {
    let base_vaddr = 0x10000;
    let bytes = ElfBuilder::new()
        .add_load_segment(0, base_vaddr, 0x2000, 0x2000, raw::PF_R | raw::PF_W, page())
        .add_relro(base_vaddr + 0x1000, 0x1000)
        .build();

    let mut cursor = Cursor::new(bytes);
    let image = inspect(&mut cursor).expect("valid image parses");

    assert_eq!(image.segments[0].relative_offset, 0);
    assert_eq!(image.relro_ranges[0].offset, 0x1000);
}

#[test]
fn truncated_program_header_table_is_io_error() {
    let mut bytes = ElfBuilder::new()
        .add_load_segment(0, 0, 0x40, 0x40, raw::PF_R, page())
        .build();
    bytes.truncate(bytes.len() - 4); // cut into the single program header

    let mut cursor = Cursor::new(bytes);
    let err = inspect(&mut cursor).unwrap_err();
    assert!(matches!(err, tmixdynld_core::LoaderError::Io(_)));
}

#[test]
fn non_native_machine_is_malformed() {
    let mut bytes = ElfBuilder::new()
        .add_load_segment(0, 0, 0x40, 0x40, raw::PF_R, page())
        .build();
    let off = raw::EI_NIDENT + 2;
    let bogus_machine: u16 = if raw::NATIVE_MACHINE != 0 { 0 } else { 1 };
    bytes[off..off + 2].copy_from_slice(&bogus_machine.to_ne_bytes());

    let mut cursor = Cursor::new(bytes);
    let err = inspect(&mut cursor).unwrap_err();
    assert!(matches!(err, tmixdynld_core::LoaderError::Malformed(_)));
}
