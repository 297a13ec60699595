use crate::archive::Archive;
use crate::tree::{File, Folder, Node, PathError};
use crate::*;
use binread::{BinRead, BinReaderExt};
use derivative::*;
use std::io::Cursor;
use thiserror::Error;
use tracing::{debug, trace, warn};

#[derive(Error, Debug)]
/// An enum representing all possible errors when reading a SARC archive
pub enum SarcError {
    #[error("Invalid SARC magic: {0:02X?}")]
    InvalidMagic(Vec<u8>),
    #[error("Unrecognized byte order mark: {0:02X?}")]
    InvalidByteOrderMark(Vec<u8>),
    #[error("Invalid SARC header size: {0:#x}")]
    InvalidHeaderSize(u16),
    #[error("SARC header gives a file size of {expected} bytes but the buffer holds {actual}")]
    FileSizeMismatch { expected: u32, actual: usize },
    #[error("Invalid SFAT magic: {0:02X?}")]
    InvalidFatMagic(Vec<u8>),
    #[error("Invalid SFAT header size: {0:#x}")]
    InvalidFatHeaderSize(u16),
    #[error("Invalid SFNT magic: {0:02X?}")]
    InvalidFntMagic(Vec<u8>),
    #[error("Invalid SFNT header size: {0:#x}")]
    InvalidFntHeaderSize(u16),
    #[error("File index {0} out of range")]
    OutOfRange(usize),
    #[error("Name of file {index} at {offset:#x} lies outside the archive")]
    NameOutOfBounds { index: usize, offset: usize },
    #[error("Data of \"{name}\" at {begin:#x}..{end:#x} lies outside the archive")]
    DataOutOfBounds {
        name: String,
        begin: usize,
        end: usize,
    },
    #[error("Invalid UTF file name")]
    InvalidFileName(#[from] std::str::Utf8Error),
    #[error(transparent)]
    Path(#[from] PathError),
    #[error(transparent)]
    ParseError(#[from] binread::Error),
}

pub type Result<T> = core::result::Result<T, SarcError>;

/// Up to `len` bytes at `offset`, fewer if the buffer ends first.
fn bytes_at(data: &[u8], offset: usize, len: usize) -> Vec<u8> {
    data.iter().skip(offset).take(len).copied().collect()
}

/// A name runs to the first null byte, or to the end of the buffer.
fn until_null(data: &[u8]) -> &[u8] {
    match data.iter().position(|b| *b == 0) {
        Some(end) => &data[..end],
        None => data,
    }
}

fn read<T: BinRead>(endian: Endian, reader: &mut Cursor<&[u8]>) -> Result<T> {
    Ok(match endian {
        Endian::Big => reader.read_be()?,
        Endian::Little => reader.read_le()?,
    })
}

#[derive(Derivative, Clone, PartialEq, Eq)]
#[derivative(Debug)]
/// One index record resolved against the name and data tables
pub struct SarcEntry<'a> {
    pub hash: u32,
    pub flag: u8,
    pub name: &'a str,
    #[derivative(Debug = "ignore")]
    pub data: &'a [u8],
}

#[derive(Derivative)]
#[derivative(Debug)]
/// A validated, zero-copy view over SARC archive bytes
pub struct SarcReader<'a> {
    num_files: u16,
    hash_multiplier: u32,
    data_offset: u32,
    names_offset: u32,
    endian: Endian,
    #[derivative(Debug = "ignore")]
    data: &'a [u8],
}

impl PartialEq for SarcReader<'_> {
    /// Returns true if and only if the raw archive data is identical
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

impl<'a> SarcReader<'a> {
    /// Validates the SARC, SFAT and SFNT headers. Checks run in file order
    /// and the first failing one is reported.
    pub fn new(data: &'a [u8]) -> Result<SarcReader<'a>> {
        let magic = bytes_at(data, 0, 4);
        if magic != SARC_MAGIC {
            return Err(SarcError::InvalidMagic(magic));
        }

        let bom = bytes_at(data, 6, 2);
        let endian = match *bom.as_slice() {
            [first, second] => Endian::from_bom([first, second]),
            _ => None,
        };
        let endian = match endian {
            Some(endian) => endian,
            None => return Err(SarcError::InvalidByteOrderMark(bom)),
        };

        // Header fields are checked one at a time so a truncated buffer still
        // reports the first bad field.
        let mut reader = Cursor::new(data);
        reader.set_position(4);
        let header_size: u16 = read(endian, &mut reader)?;
        if header_size != SARC_HEADER_SIZE {
            return Err(SarcError::InvalidHeaderSize(header_size));
        }
        reader.set_position(8);
        let file_size: u32 = read(endian, &mut reader)?;
        if file_size as usize != data.len() {
            return Err(SarcError::FileSizeMismatch {
                expected: file_size,
                actual: data.len(),
            });
        }
        reader.set_position(0);
        let header: ResHeader = read(endian, &mut reader)?;

        let fat_magic = bytes_at(data, SARC_HEADER_SIZE as usize, 4);
        if fat_magic != SFAT_MAGIC {
            return Err(SarcError::InvalidFatMagic(fat_magic));
        }
        let fat_header: ResFatHeader = read(endian, &mut reader)?;
        if fat_header.header_size != SFAT_HEADER_SIZE {
            return Err(SarcError::InvalidFatHeaderSize(fat_header.header_size));
        }

        let num_files = fat_header.num_files;
        let fnt_header_offset = SFAT_ENTRIES_OFFSET + SFAT_ENTRY_SIZE * num_files as usize;
        let fnt_magic = bytes_at(data, fnt_header_offset, 4);
        if fnt_magic != SFNT_MAGIC {
            return Err(SarcError::InvalidFntMagic(fnt_magic));
        }
        reader.set_position(fnt_header_offset as u64);
        let fnt_header: ResFntHeader = read(endian, &mut reader)?;
        if fnt_header.header_size != SFNT_HEADER_SIZE {
            return Err(SarcError::InvalidFntHeaderSize(fnt_header.header_size));
        }

        let reader = SarcReader {
            num_files,
            hash_multiplier: fat_header.hash_multiplier,
            data_offset: header.data_offset,
            names_offset: reader.position() as u32,
            endian,
            data,
        };
        debug!(
            "Opened SARC: {} files, {}, data at {:#x}",
            reader.num_files, reader.endian, reader.data_offset
        );
        Ok(reader)
    }

    /// Get the number of files that are stored in the archive
    pub fn file_count(&self) -> usize {
        self.num_files as usize
    }

    /// Get the absolute offset to the beginning of file data
    pub fn data_offset(&self) -> usize {
        self.data_offset as usize
    }

    /// Get the archive endianness
    pub fn endian(&self) -> Endian {
        self.endian
    }

    pub fn hash_multiplier(&self) -> u32 {
        self.hash_multiplier
    }

    fn entry_at(&self, index: usize) -> Result<ResFatEntry> {
        if index >= self.num_files as usize {
            return Err(SarcError::OutOfRange(index));
        }
        let mut reader = Cursor::new(self.data);
        reader.set_position((SFAT_ENTRIES_OFFSET + SFAT_ENTRY_SIZE * index) as u64);
        read(self.endian, &mut reader)
    }

    /// Get a file by index. Returns error if index >= file count.
    pub fn file_at(&self, index: usize) -> Result<SarcEntry<'a>> {
        let entry = self.entry_at(index)?;

        let name_offset = self.names_offset as usize + entry.name_offset();
        let name = match self.data.get(name_offset..) {
            Some(rest) => std::str::from_utf8(until_null(rest))?,
            None => {
                return Err(SarcError::NameOutOfBounds {
                    index,
                    offset: name_offset,
                })
            }
        };

        let begin = self.data_offset as usize + entry.data_begin as usize;
        let end = self.data_offset as usize + entry.data_end as usize;
        let data = self
            .data
            .get(begin..end)
            .ok_or_else(|| SarcError::DataOutOfBounds {
                name: name.to_owned(),
                begin,
                end,
            })?;

        Ok(SarcEntry {
            hash: entry.name_hash,
            flag: entry.flag(),
            name,
            data,
        })
    }

    /// Returns an iterator over the contained files, in index table order
    pub fn files(&self) -> impl Iterator<Item = Result<SarcEntry<'a>>> + '_ {
        (0..self.file_count()).map(move |i| self.file_at(i))
    }

    /// Get a file by name, binary searching the hash-sorted index table
    pub fn get_file(&self, name: &str) -> Result<Option<SarcEntry<'a>>> {
        let needle = hash_name(self.hash_multiplier, name);
        let mut lo = 0;
        let mut hi = self.file_count();
        while lo < hi {
            let mid = (lo + hi) / 2;
            if self.entry_at(mid)?.name_hash < needle {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        // Hashes can collide, so check names across the run of equal hashes.
        for index in lo..self.file_count() {
            if self.entry_at(index)?.name_hash != needle {
                break;
            }
            let entry = self.file_at(index)?;
            if entry.name == name {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    /// Returns true if the index table hashes are in non-decreasing order,
    /// which lookups in the engine rely on.
    pub fn is_sorted(&self) -> Result<bool> {
        let mut previous = 0;
        for index in 0..self.file_count() {
            let hash = self.entry_at(index)?.name_hash;
            if hash < previous {
                return Ok(false);
            }
            previous = hash;
        }
        Ok(true)
    }

    /// Guess the minimum data alignment for files that are stored in the archive
    pub fn guess_min_alignment(&self) -> Result<usize> {
        const MIN_ALIGNMENT: usize = 4;
        let mut gcd: u32 = 0;
        for index in 0..self.file_count() {
            let entry = self.entry_at(index)?;
            gcd = num::integer::gcd(gcd, self.data_offset.wrapping_add(entry.data_begin));
        }
        let alignment = (gcd & gcd.wrapping_neg()) as usize;
        Ok(alignment.max(MIN_ALIGNMENT))
    }
}

impl Archive {
    /// Parses a SARC archive from binary data
    pub fn from_bytes(data: &[u8]) -> Result<Archive> {
        let mut archive = Archive::default();
        archive.load(data)?;
        Ok(archive)
    }

    /// Replaces the contents, endianness and hash multiplier of this archive
    /// with those parsed from `data`. On error the archive is left as it was.
    ///
    /// A file path that occurs twice keeps its last entry. A file and a
    /// folder sharing one path is an error, whichever comes first.
    pub fn load(&mut self, data: &[u8]) -> Result<()> {
        let reader = SarcReader::new(data)?;

        let mut root = Folder::default();
        for entry in reader.files() {
            let entry = entry?;
            trace!(
                "{} ({} bytes, hash {:#010x}, flag {:#04x})",
                entry.name,
                entry.data.len(),
                entry.hash,
                entry.flag
            );
            let segments: Vec<&str> = entry.name.split('/').collect();
            if let Some(Node::Folder(_)) = root.lookup(&segments) {
                return Err(PathError::NotAFolder(entry.name.to_owned()).into());
            }
            let file = File {
                name: String::new(),
                data: entry.data.to_vec(),
                flag: entry.flag,
            };
            if root.place(&segments, Node::File(file))?.is_some() {
                warn!("Duplicate path \"{}\" in SARC, keeping the last entry", entry.name);
            }
        }
        if !reader.is_sorted()? {
            warn!("SARC index table is not sorted by hash, lookups by the engine may fail");
        }

        self.root = root;
        self.endian = reader.endian();
        self.hash_multiplier = reader.hash_multiplier();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Big endian, one file "a" holding "hi"
    fn single_be() -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(b"SARC\x00\x14\xFE\xFF\x00\x00\x00\x42\x00\x00\x00\x40\x01\x00\x00\x00");
        data.extend_from_slice(b"SFAT\x00\x0C\x00\x01\x00\x00\x00\x65");
        data.extend_from_slice(b"\x00\x00\x00\x61\x01\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x02");
        data.extend_from_slice(b"SFNT\x00\x08\x00\x00");
        data.extend_from_slice(b"a\x00\x00\x00");
        data.extend_from_slice(&[0; 4]);
        data.extend_from_slice(b"hi");
        assert_eq!(data.len(), 0x42);
        data
    }

    /// Little endian, "a" holding "x" and "bc" holding "yz" with flag 2
    fn double_le() -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(b"SARC\x14\x00\xFF\xFE\x56\x00\x00\x00\x50\x00\x00\x00\x00\x01\x00\x00");
        data.extend_from_slice(b"SFAT\x0C\x00\x02\x00\x65\x00\x00\x00");
        data.extend_from_slice(b"\x61\x00\x00\x00\x00\x00\x00\x01\x00\x00\x00\x00\x01\x00\x00\x00");
        data.extend_from_slice(b"\x0D\x27\x00\x00\x01\x00\x00\x02\x04\x00\x00\x00\x06\x00\x00\x00");
        data.extend_from_slice(b"SFNT\x08\x00\x00\x00");
        data.extend_from_slice(b"a\x00\x00\x00bc\x00\x00");
        data.extend_from_slice(b"x\x00\x00\x00yz");
        assert_eq!(data.len(), 0x56);
        data
    }

    #[test]
    fn parse_big_endian() {
        let data = single_be();
        let sarc = SarcReader::new(&data).unwrap();
        assert_eq!(sarc.endian(), Endian::Big);
        assert_eq!(sarc.file_count(), 1);
        assert_eq!(sarc.data_offset(), 0x40);
        assert_eq!(sarc.hash_multiplier(), 0x65);

        let entry = sarc.file_at(0).unwrap();
        assert_eq!(entry.name, "a");
        assert_eq!(entry.data, b"hi");
        assert_eq!(entry.flag, 1);
        assert_eq!(entry.hash, 0x61);
        assert!(matches!(sarc.file_at(1), Err(SarcError::OutOfRange(1))));
    }

    #[test]
    fn parse_little_endian() {
        let data = double_le();
        let sarc = SarcReader::new(&data).unwrap();
        assert_eq!(sarc.endian(), Endian::Little);

        let entries: Vec<SarcEntry> = sarc.files().map(|e| e.unwrap()).collect();
        assert_eq!(entries.len(), 2);
        assert_eq!((entries[0].name, entries[0].data, entries[0].flag), ("a", &b"x"[..], 1));
        assert_eq!((entries[1].name, entries[1].data, entries[1].flag), ("bc", &b"yz"[..], 2));
        assert_eq!(entries[1].hash, hash_name(0x65, "bc"));
        assert!(sarc.is_sorted().unwrap());
        assert_eq!(sarc.guess_min_alignment().unwrap(), 4);
    }

    #[test]
    fn lookup_by_name() {
        let data = double_le();
        let sarc = SarcReader::new(&data).unwrap();
        assert_eq!(sarc.get_file("bc").unwrap().unwrap().data, b"yz");
        assert_eq!(sarc.get_file("a").unwrap().unwrap().data, b"x");
        assert!(sarc.get_file("zz").unwrap().is_none());
    }

    #[test]
    fn unterminated_name_runs_to_end() {
        let mut data = Vec::new();
        data.extend_from_slice(b"SARC\x00\x14\xFE\xFF\x00\x00\x00\x3A\x00\x00\x00\x3A\x01\x00\x00\x00");
        data.extend_from_slice(b"SFAT\x00\x0C\x00\x01\x00\x00\x00\x65");
        data.extend_from_slice(b"\x00\x00\x27\x0D\x01\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00");
        data.extend_from_slice(b"SFNT\x00\x08\x00\x00");
        data.extend_from_slice(b"ab");
        let archive = Archive::from_bytes(&data).unwrap();
        assert!(archive.get_file("ab").unwrap().data.is_empty());
    }

    #[test]
    fn load_builds_tree() {
        let archive = Archive::from_bytes(&double_le()).unwrap();
        assert_eq!(archive.endian(), Endian::Little);
        assert_eq!(archive.get_file("bc").unwrap().flag, 2);
        assert_eq!(archive.to_string(), "a\nbc");

        let mut archive = Archive::default();
        archive.set("stale/file", File::new("", b"old".to_vec())).unwrap();
        archive.load(&single_be()).unwrap();
        assert_eq!(archive.to_string(), "a");
        assert_eq!(archive.get_file("a").unwrap().data, b"hi");
    }

    #[test]
    fn failed_load_keeps_archive() {
        let mut archive = Archive::new(Endian::Little);
        archive.set("keep", File::new("", b"1".to_vec())).unwrap();
        let before = archive.clone();
        let mut data = single_be();
        data[0] = b'X';
        assert!(archive.load(&data).is_err());
        assert_eq!(archive, before);
    }

    #[test]
    fn bad_magic_first() {
        let mut data = single_be();
        data[0] = b'X';
        data[6] = 0;
        data[0x14] = b'X';
        assert!(matches!(SarcReader::new(&data), Err(SarcError::InvalidMagic(_))));
        assert!(matches!(SarcReader::new(&[]), Err(SarcError::InvalidMagic(_))));
    }

    #[test]
    fn bad_bom() {
        let mut data = single_be();
        data[6] = 0xFF;
        data[7] = 0xFF;
        data[5] = 0x15;
        assert!(matches!(
            SarcReader::new(&data),
            Err(SarcError::InvalidByteOrderMark(ref bom)) if bom == &[0xFF, 0xFF]
        ));
        // A little endian BOM makes every header field read wrong.
        data[5] = 0x14;
        data[6] = 0xFF;
        data[7] = 0xFE;
        assert!(matches!(SarcReader::new(&data), Err(SarcError::InvalidHeaderSize(0x1400))));
    }

    #[test]
    fn bad_header_size() {
        let mut data = single_be();
        data[5] = 0x15;
        data.push(0);
        assert!(matches!(SarcReader::new(&data), Err(SarcError::InvalidHeaderSize(0x15))));
    }

    #[test]
    fn truncated_header_reports_first_bad_field() {
        let mut data = single_be();
        data[5] = 0x15;
        data.truncate(10);
        assert!(matches!(SarcReader::new(&data), Err(SarcError::InvalidHeaderSize(0x15))));

        let mut data = single_be();
        data.truncate(0x10);
        assert!(matches!(
            SarcReader::new(&data),
            Err(SarcError::FileSizeMismatch {
                expected: 0x42,
                actual: 0x10
            })
        ));
    }

    #[test]
    fn bad_file_size() {
        let mut data = single_be();
        data[0x14] = b'X';
        data.push(0);
        assert!(matches!(
            SarcReader::new(&data),
            Err(SarcError::FileSizeMismatch {
                expected: 0x42,
                actual: 0x43
            })
        ));
    }

    #[test]
    fn bad_fat_magic() {
        let mut data = single_be();
        data[0x14] = b'X';
        data[0x19] = 0x0D;
        assert!(matches!(SarcReader::new(&data), Err(SarcError::InvalidFatMagic(_))));
    }

    #[test]
    fn bad_fat_header_size() {
        let mut data = single_be();
        data[0x19] = 0x0D;
        data[0x30] = b'X';
        assert!(matches!(SarcReader::new(&data), Err(SarcError::InvalidFatHeaderSize(0x0D))));
    }

    #[test]
    fn bad_fnt_magic() {
        let mut data = single_be();
        data[0x30] = b'X';
        data[0x35] = 0x09;
        assert!(matches!(SarcReader::new(&data), Err(SarcError::InvalidFntMagic(_))));
    }

    #[test]
    fn bad_fnt_header_size() {
        let mut data = single_be();
        data[0x35] = 0x09;
        assert!(matches!(SarcReader::new(&data), Err(SarcError::InvalidFntHeaderSize(9))));
    }

    #[test]
    fn payload_out_of_bounds() {
        let mut data = single_be();
        data[0x2F] = 0x10;
        assert!(matches!(
            Archive::from_bytes(&data),
            Err(SarcError::DataOutOfBounds { .. })
        ));
    }

    #[test]
    fn path_through_file_is_rejected() {
        let mut data = double_le();
        // Rename "bc" to "a/c", putting it under the file "a".
        data[0x4C..0x50].copy_from_slice(b"a/c\x00");
        assert!(matches!(
            Archive::from_bytes(&data),
            Err(SarcError::Path(PathError::NotAFolder(_)))
        ));
    }

    #[test]
    fn file_and_folder_on_one_path_is_rejected() {
        // "z/a" then "z", and "z" then "z/a"
        for names in &[b"z/a\x00z\x00\x00\x00", b"z\x00\x00\x00z/a\x00"] {
            let mut data = double_le();
            data[0x48..0x50].copy_from_slice(&names[..]);
            assert!(matches!(
                Archive::from_bytes(&data),
                Err(SarcError::Path(PathError::NotAFolder(_)))
            ));
        }
    }

    #[test]
    fn duplicate_file_keeps_last() {
        let mut data = double_le();
        data[0x4C..0x50].copy_from_slice(b"a\x00\x00\x00");
        let archive = Archive::from_bytes(&data).unwrap();
        assert_eq!(archive.files().len(), 1);
        assert_eq!(archive.get_file("a").unwrap().data, b"yz");
    }

    #[test]
    fn detects_sarc() {
        assert!(is_sarc(&single_be()));
        assert!(!is_sarc(b"Yaz0"));
    }
}
