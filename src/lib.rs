//! Read and write Nintendo SARC archives.
//!
//! A SARC packs a directory tree of named files into one blob, with an index
//! table sorted by a hash of each file's full path. [`Archive`] holds the
//! tree in memory, [`SarcReader`] is a zero-copy validated view over raw
//! archive bytes.
//!
//! ```no_run
//! use sarc_archive::{Archive, Endian, File};
//!
//! let mut archive = Archive::new(Endian::Little);
//! archive.set("Actor/Pack/Link.bactorpack", File::new("", vec![1u8, 2, 3])).unwrap();
//! let bytes = archive.to_bytes(0).unwrap();
//!
//! let loaded = Archive::from_bytes(&bytes).unwrap();
//! assert_eq!(loaded.get_file("Actor/Pack/Link.bactorpack").unwrap().data, [1, 2, 3]);
//! ```
use binread::BinRead;
use binwrite::BinWrite;
use std::fmt;

mod archive;
mod parse;
mod tree;
mod writer;
pub use archive::Archive;
pub use parse::{SarcEntry, SarcError, SarcReader};
pub use tree::{File, Folder, Node, PathError};
pub use writer::SarcWriteError;

const SARC_MAGIC: [u8; 4] = *b"SARC";
const SFAT_MAGIC: [u8; 4] = *b"SFAT";
const SFNT_MAGIC: [u8; 4] = *b"SFNT";

const SARC_HEADER_SIZE: u16 = 0x14;
const SFAT_HEADER_SIZE: u16 = 0x0C;
const SFNT_HEADER_SIZE: u16 = 0x08;
const SFAT_ENTRY_SIZE: usize = 0x10;
const SFAT_ENTRIES_OFFSET: usize = 0x20;
const SARC_VERSION: u16 = 0x0100;

/// Hash multiplier used by every first-party archive.
pub const DEFAULT_HASH_MULTIPLIER: u32 = 0x65;

/// Hash of an archive path, the sort key of the SFAT index table.
///
/// Must match the engine's own lookup hash bit for bit.
pub fn hash_name(multiplier: u32, name: &str) -> u32 {
    name.chars()
        .fold(0, |hash: u32, c| hash.wrapping_mul(multiplier).wrapping_add(c as u32))
}

/// Returns true if `data` starts with the SARC magic.
pub fn is_sarc(data: &[u8]) -> bool {
    data.len() >= SFAT_ENTRIES_OFFSET && data[0..4] == SARC_MAGIC
}

/// Byte order of an archive, selected by the BOM at offset 6.
#[derive(Debug, Eq, PartialEq, Copy, Clone, Hash)]
#[repr(u16)]
pub enum Endian {
    Big = 0xFEFF,
    Little = 0xFFFE,
}

impl Endian {
    /// The BOM as it appears in the file.
    pub fn bom(self) -> [u8; 2] {
        match self {
            Endian::Big => [0xFE, 0xFF],
            Endian::Little => [0xFF, 0xFE],
        }
    }

    pub fn from_bom(bom: [u8; 2]) -> Option<Endian> {
        match bom {
            [0xFE, 0xFF] => Some(Endian::Big),
            [0xFF, 0xFE] => Some(Endian::Little),
            _ => None,
        }
    }
}

impl Default for Endian {
    fn default() -> Self {
        Endian::Big
    }
}

impl fmt::Display for Endian {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endian::Big => f.write_str("big endian"),
            Endian::Little => f.write_str("little endian"),
        }
    }
}

impl From<Endian> for binread::Endian {
    fn from(endian: Endian) -> Self {
        match endian {
            Endian::Big => binread::Endian::Big,
            Endian::Little => binread::Endian::Little,
        }
    }
}

impl From<Endian> for binwrite::Endian {
    fn from(endian: Endian) -> Self {
        match endian {
            Endian::Big => binwrite::Endian::Big,
            Endian::Little => binwrite::Endian::Little,
        }
    }
}

/// Size = 0x14
#[derive(Debug, Eq, PartialEq, Copy, Clone, BinRead, BinWrite)]
struct ResHeader {
    magic: [u8; 4],
    header_size: u16,
    bom: [u8; 2],
    file_size: u32,
    data_offset: u32,
    version: u16,
    reserved: u16,
}

/// Size = 0x0C
#[derive(Debug, Copy, Clone, Eq, PartialEq, BinRead, BinWrite)]
struct ResFatHeader {
    magic: [u8; 4],
    header_size: u16,
    num_files: u16,
    hash_multiplier: u32,
}

/// Size = 0x10
///
/// `name_field` packs the flag byte above a 24-bit name table word offset.
/// Read as an integer in the archive's byte order, the flag is always the
/// top byte, which puts it at record offset 4 in big endian files and at
/// record offset 7 in little endian ones.
#[derive(Debug, PartialEq, Eq, Copy, Clone, BinRead, BinWrite)]
struct ResFatEntry {
    name_hash: u32,
    name_field: u32,
    data_begin: u32,
    data_end: u32,
}

impl ResFatEntry {
    fn flag(&self) -> u8 {
        (self.name_field >> 24) as u8
    }

    fn name_offset(&self) -> usize {
        (self.name_field & 0x00FF_FFFF) as usize * 4
    }
}

/// Size = 0x8
#[derive(Debug, PartialEq, Eq, Copy, Clone, BinRead, BinWrite)]
struct ResFntHeader {
    magic: [u8; 4],
    header_size: u16,
    reserved: u16,
}

fn align(pos: usize, alignment: usize) -> usize {
    debug_assert!(is_valid_alignment(alignment));
    (pos + alignment - 1) & !(alignment - 1)
}

fn is_valid_alignment(alignment: usize) -> bool {
    alignment != 0 && (alignment & (alignment - 1)) == 0
}
