use crate::archive::Archive;
use crate::*;
use binwrite::BinWrite;
use std::convert::TryFrom;
use std::io::Write;
use thiserror::Error;
use tracing::{debug, trace};

type Result<T> = core::result::Result<T, SarcWriteError>;

#[derive(Debug, Error)]
/// An enum representing all possible errors when writing a SARC archive
pub enum SarcWriteError {
    #[error("{0} files do not fit in a SARC index table")]
    TooManyFiles(usize),
    #[error("Name table of {0} bytes is too large to address")]
    NameTableTooLarge(usize),
    #[error("Archive of {0} bytes is too large")]
    ArchiveTooLarge(usize),
    #[error(transparent)]
    IOError(#[from] std::io::Error),
}

/// Picks the data start offset. A requested offset only wins when it lies
/// past the end of the name table; otherwise the minimum is pushed out to a
/// 0x200 boundary, which texture payloads need.
fn data_offset_for(header_end: usize, requested: usize) -> usize {
    let minimum = align(header_end, 0x10);
    let requested = align(requested, 0x10);
    if requested > minimum {
        requested
    } else {
        align(minimum, 0x200)
    }
}

/// Payload alignment: the largest power of two dividing the data offset,
/// at least 0x10.
fn alignment_for(data_offset: usize) -> usize {
    (data_offset & data_offset.wrapping_neg()).max(0x10)
}

impl Archive {
    /// Serializes the archive. Payloads start at `data_offset` when it lies
    /// past the headers; pass 0 to use the smallest valid offset.
    pub fn to_bytes(&self, data_offset: u32) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.write(&mut buf, data_offset)?;
        Ok(buf)
    }

    pub fn write<W: Write>(&self, writer: &mut W, data_offset: u32) -> Result<()> {
        let mut opts = binwrite::WriterOption::default();
        opts.endian = self.endian.into();

        let files = self.sorted_files();
        let num_files = u16::try_from(files.len())
            .map_err(|_| SarcWriteError::TooManyFiles(files.len()))?;

        let mut name_table: Vec<u8> = Vec::new();
        let mut name_offsets: Vec<u32> = Vec::with_capacity(files.len());
        for (path, _) in &files {
            if name_table.len() / 4 > 0x00FF_FFFF {
                return Err(SarcWriteError::NameTableTooLarge(name_table.len()));
            }
            name_offsets.push((name_table.len() / 4) as u32);
            name_table.extend_from_slice(path.as_bytes());
            name_table.resize(align(name_table.len() + 1, 4), 0);
        }

        let header_end = SFAT_ENTRIES_OFFSET
            + SFAT_ENTRY_SIZE * files.len()
            + SFNT_HEADER_SIZE as usize
            + name_table.len();
        let data_offset = data_offset_for(header_end, data_offset as usize);
        let alignment = alignment_for(data_offset);

        let mut data_table: Vec<u8> = Vec::new();
        let mut data_ranges: Vec<(usize, usize)> = Vec::with_capacity(files.len());
        for (index, (_, file)) in files.iter().enumerate() {
            if index > 0 {
                data_table.resize(align(data_table.len(), alignment), 0);
            }
            let begin = data_table.len();
            data_table.extend_from_slice(&file.data);
            data_ranges.push((begin, data_table.len()));
        }

        let file_size = data_offset + data_table.len();
        let file_size =
            u32::try_from(file_size).map_err(|_| SarcWriteError::ArchiveTooLarge(file_size))?;
        debug!(
            "Writing SARC: {} files, {}, data at {:#x}, alignment {:#x}, {} bytes",
            files.len(),
            self.endian,
            data_offset,
            alignment,
            file_size
        );

        ResHeader {
            magic: SARC_MAGIC,
            header_size: SARC_HEADER_SIZE,
            bom: self.endian.bom(),
            file_size,
            data_offset: data_offset as u32,
            version: SARC_VERSION,
            reserved: 0,
        }
        .write_options(writer, &opts)?;

        ResFatHeader {
            magic: SFAT_MAGIC,
            header_size: SFAT_HEADER_SIZE,
            num_files,
            hash_multiplier: self.hash_multiplier,
        }
        .write_options(writer, &opts)?;

        for (((path, file), name_offset), (begin, end)) in
            files.iter().zip(&name_offsets).zip(&data_ranges)
        {
            let name_hash = hash_name(self.hash_multiplier, path);
            trace!("{} (hash {:#010x}, data {:#x}..{:#x})", path, name_hash, begin, end);
            ResFatEntry {
                name_hash,
                name_field: ((file.flag as u32) << 24) | name_offset,
                data_begin: *begin as u32,
                data_end: *end as u32,
            }
            .write_options(writer, &opts)?;
        }

        ResFntHeader {
            magic: SFNT_MAGIC,
            header_size: SFNT_HEADER_SIZE,
            reserved: 0,
        }
        .write_options(writer, &opts)?;
        writer.write_all(&name_table)?;
        writer.write_all(&vec![0u8; data_offset - header_end])?;
        writer.write_all(&data_table)?;
        Ok(())
    }
}
