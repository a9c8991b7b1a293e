//! The inspector façade: validates a file and turns it into a fresh
//! [`ElfImage`], touching nothing of the caller's state on failure.

use std::io::{Read, Seek};

use crate::elf::{header, raw, segments};
use crate::error::Result;
use crate::model::ElfImage;

/// Parses `file` into a descriptor. `file`'s position is left undefined
/// afterward; callers that need to reuse the handle should seek back to the
/// start themselves.
pub fn inspect<R: Read + Seek>(file: &mut R) -> Result<ElfImage> {
    file.rewind()?;
    let mut header_buf = vec![0u8; raw::EHDR_SIZE];
    file.read_exact(&mut header_buf)?;
    let ehdr = header::validate(&header_buf)?;

    let mut image = ElfImage::default();
    segments::parse(file, ehdr.e_phoff, ehdr.e_phnum, ehdr.e_entry, &mut image)?;

    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn rejects_truncated_file() {
        let mut cursor = Cursor::new(vec![0u8; 4]);
        assert!(inspect(&mut cursor).is_err());
    }
}
