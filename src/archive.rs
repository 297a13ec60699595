use crate::tree::{File, Folder, Node, Result};
use crate::{hash_name, Endian, DEFAULT_HASH_MULTIPLIER};
use std::fmt;

/// An editable SARC archive: a nameless root folder plus the archive-wide
/// byte order and hash multiplier.
///
/// Paths are `/` (or `\`) delimited and relative to the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Archive {
    pub(crate) root: Folder,
    pub(crate) endian: Endian,
    pub(crate) hash_multiplier: u32,
}

impl Default for Archive {
    fn default() -> Self {
        Archive::new(Endian::Big)
    }
}

impl Archive {
    /// Creates an empty archive using the default hash multiplier
    pub fn new(endian: Endian) -> Archive {
        Archive {
            root: Folder::default(),
            endian,
            hash_multiplier: DEFAULT_HASH_MULTIPLIER,
        }
    }

    pub fn with_hash_multiplier(mut self, hash_multiplier: u32) -> Archive {
        self.hash_multiplier = hash_multiplier;
        self
    }

    pub fn endian(&self) -> Endian {
        self.endian
    }

    pub fn set_endian(&mut self, endian: Endian) {
        self.endian = endian;
    }

    pub fn hash_multiplier(&self) -> u32 {
        self.hash_multiplier
    }

    pub fn set_hash_multiplier(&mut self, hash_multiplier: u32) {
        self.hash_multiplier = hash_multiplier;
    }

    /// Hash of `path` under this archive's multiplier
    pub fn hash_path(&self, path: &str) -> u32 {
        hash_name(self.hash_multiplier, path)
    }

    pub fn root(&self) -> &Folder {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut Folder {
        &mut self.root
    }

    /// Drops every file and folder
    pub fn clear(&mut self) {
        self.root.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    pub fn add<T: Into<Node>>(&mut self, entry: T) -> Result<()> {
        self.root.add(entry)
    }

    pub fn remove(&mut self, entry: &Node) -> Result<Node> {
        self.root.remove(entry)
    }

    pub fn get(&self, path: &str) -> Result<&Node> {
        self.root.get(path)
    }

    pub fn get_mut(&mut self, path: &str) -> Result<&mut Node> {
        self.root.get_mut(path)
    }

    pub fn get_file(&self, path: &str) -> Result<&File> {
        self.root.get_file(path)
    }

    pub fn get_folder(&self, path: &str) -> Result<&Folder> {
        self.root.get_folder(path)
    }

    /// See [`Folder::set`]
    pub fn set<T: Into<Node>>(&mut self, path: &str, entry: T) -> Result<Option<Node>> {
        self.root.set(path, entry)
    }

    pub fn delete(&mut self, path: &str) -> Result<Node> {
        self.root.delete(path)
    }

    /// Every file with its full path, in tree order
    pub fn files(&self) -> Vec<(String, &File)> {
        let mut files = Vec::new();
        self.root.collect_files("", &mut files);
        files
    }

    /// Every file with its full path, in index table order
    pub fn sorted_files(&self) -> Vec<(String, &File)> {
        let mut files = self.files();
        let multiplier = self.hash_multiplier;
        files.sort_by_key(|(path, _)| hash_name(multiplier, path));
        files
    }

    pub fn file_count(&self) -> usize {
        self.files().len()
    }
}

impl fmt::Display for Archive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.root, f)
    }
}
