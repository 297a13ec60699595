use derivative::Derivative;
use indexmap::IndexMap;
use std::fmt;
use thiserror::Error;

/// Flag byte written above the name offset of every index record.
pub(crate) const DEFAULT_FILE_FLAG: u8 = 1;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
/// An enum representing all possible errors when resolving an archive path
pub enum PathError {
    #[error("No file or folder at \"{0}\"")]
    NotFound(String),
    #[error("\"{0}\" is a file, not a folder")]
    NotAFolder(String),
    #[error("\"{0}\" is a folder, not a file")]
    NotAFile(String),
    #[error("An entry named \"{0}\" already exists")]
    AlreadyExists(String),
    #[error("Invalid archive path \"{0}\"")]
    InvalidPath(String),
}

pub type Result<T> = core::result::Result<T, PathError>;

/// Splits a `/` or `\` delimited path into its segments.
fn split_path(path: &str) -> Result<Vec<String>> {
    let normalized = path.replace('\\', "/");
    let segments: Vec<String> = normalized.split('/').map(str::to_owned).collect();
    if segments.iter().any(String::is_empty) {
        return Err(PathError::InvalidPath(path.to_owned()));
    }
    Ok(segments)
}

/// An entry name is a single, non-empty path segment.
fn check_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains(&['/', '\\'][..]) {
        return Err(PathError::InvalidPath(name.to_owned()));
    }
    Ok(())
}

#[derive(Derivative, Clone, PartialEq, Eq)]
#[derivative(Debug)]
/// A file leaf. Its name is the last segment of its path.
pub struct File {
    pub(crate) name: String,
    #[derivative(Debug = "ignore")]
    pub data: Vec<u8>,
    /// Raw flag byte of the file's index record. Its meaning is unknown; it
    /// is only carried so that decoding and re-encoding preserves it.
    pub flag: u8,
}

impl File {
    pub fn new<N: Into<String>, D: Into<Vec<u8>>>(name: N, data: D) -> File {
        File {
            name: name.into(),
            data: data.into(),
            flag: DEFAULT_FILE_FLAG,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
/// A folder. Entry names are unique within one folder.
pub struct Folder {
    pub(crate) name: String,
    contents: IndexMap<String, Node>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    File(File),
    Folder(Folder),
}

impl From<File> for Node {
    fn from(file: File) -> Self {
        Node::File(file)
    }
}

impl From<Folder> for Node {
    fn from(folder: Folder) -> Self {
        Node::Folder(folder)
    }
}

impl Node {
    pub fn name(&self) -> &str {
        match self {
            Node::File(file) => &file.name,
            Node::Folder(folder) => &folder.name,
        }
    }

    fn set_name(&mut self, name: &str) {
        match self {
            Node::File(file) => name.clone_into(&mut file.name),
            Node::Folder(folder) => name.clone_into(&mut folder.name),
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self, Node::File(_))
    }

    pub fn as_file(&self) -> Option<&File> {
        match self {
            Node::File(file) => Some(file),
            Node::Folder(_) => None,
        }
    }

    pub fn as_folder(&self) -> Option<&Folder> {
        match self {
            Node::Folder(folder) => Some(folder),
            Node::File(_) => None,
        }
    }
}

impl Folder {
    pub fn new<N: Into<String>>(name: N) -> Folder {
        Folder {
            name: name.into(),
            contents: IndexMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of direct children
    pub fn len(&self) -> usize {
        self.contents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }

    /// Iterates over direct children in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.contents.values()
    }

    /// Drops every child
    pub fn clear(&mut self) {
        self.contents.clear();
    }

    /// Inserts a direct child under its own name, refusing to shadow an
    /// entry of the same name. The name must be a single path segment.
    pub fn add<T: Into<Node>>(&mut self, entry: T) -> Result<()> {
        let entry = entry.into();
        check_name(entry.name())?;
        if self.contents.contains_key(entry.name()) {
            return Err(PathError::AlreadyExists(entry.name().to_owned()));
        }
        self.contents.insert(entry.name().to_owned(), entry);
        Ok(())
    }

    /// Removes a direct child equal to `entry`.
    pub fn remove(&mut self, entry: &Node) -> Result<Node> {
        match self.contents.get(entry.name()) {
            Some(existing) if existing == entry => {}
            _ => return Err(PathError::NotFound(entry.name().to_owned())),
        }
        self.contents
            .shift_remove(entry.name())
            .ok_or_else(|| PathError::NotFound(entry.name().to_owned()))
    }

    /// Looks up a file or folder by path relative to this folder.
    pub fn get(&self, path: &str) -> Result<&Node> {
        let segments = split_path(path)?;
        let not_found = || PathError::NotFound(path.to_owned());
        let (last, parents) = segments.split_last().ok_or_else(not_found)?;
        let mut folder = self;
        for segment in parents {
            match folder.contents.get(segment.as_str()) {
                Some(Node::Folder(child)) => folder = child,
                _ => return Err(not_found()),
            }
        }
        folder.contents.get(last.as_str()).ok_or_else(not_found)
    }

    pub fn get_mut(&mut self, path: &str) -> Result<&mut Node> {
        let segments = split_path(path)?;
        let not_found = || PathError::NotFound(path.to_owned());
        let (last, parents) = segments.split_last().ok_or_else(not_found)?;
        let folder = self.parent_mut(parents).ok_or_else(not_found)?;
        folder.contents.get_mut(last.as_str()).ok_or_else(not_found)
    }

    pub fn get_file(&self, path: &str) -> Result<&File> {
        match self.get(path)? {
            Node::File(file) => Ok(file),
            Node::Folder(_) => Err(PathError::NotAFile(path.to_owned())),
        }
    }

    pub fn get_folder(&self, path: &str) -> Result<&Folder> {
        match self.get(path)? {
            Node::Folder(folder) => Ok(folder),
            Node::File(_) => Err(PathError::NotAFolder(path.to_owned())),
        }
    }

    /// Stores `entry` at `path`, creating missing folders on the way and
    /// replacing whatever sat at the final segment. The entry is renamed to
    /// the final segment. Returns the replaced entry, if any.
    ///
    /// Nothing is modified when an error is returned.
    pub fn set<T: Into<Node>>(&mut self, path: &str, entry: T) -> Result<Option<Node>> {
        let segments = split_path(path)?;
        let segments: Vec<&str> = segments.iter().map(String::as_str).collect();
        self.place(&segments, entry.into())
    }

    /// Removes the entry at `path`. Emptied folders are left in place.
    pub fn delete(&mut self, path: &str) -> Result<Node> {
        let segments = split_path(path)?;
        let not_found = || PathError::NotFound(path.to_owned());
        let (last, parents) = segments.split_last().ok_or_else(not_found)?;
        let folder = self.parent_mut(parents).ok_or_else(not_found)?;
        folder.contents.shift_remove(last.as_str()).ok_or_else(not_found)
    }

    fn parent_mut(&mut self, parents: &[String]) -> Option<&mut Folder> {
        let mut folder = self;
        for segment in parents {
            match folder.contents.get_mut(segment.as_str()) {
                Some(Node::Folder(child)) => folder = child,
                _ => return None,
            }
        }
        Some(folder)
    }

    /// Finds the entry at already split `segments`, without normalizing.
    pub(crate) fn lookup(&self, segments: &[&str]) -> Option<&Node> {
        let (last, parents) = segments.split_last()?;
        let mut folder = self;
        for segment in parents {
            folder = folder.contents.get(*segment)?.as_folder()?;
        }
        folder.contents.get(*last)
    }

    pub(crate) fn place(&mut self, segments: &[&str], mut entry: Node) -> Result<Option<Node>> {
        let (last, parents) = match segments.split_last() {
            Some(split) if segments.iter().all(|s| !s.is_empty()) => split,
            _ => return Err(PathError::InvalidPath(segments.join("/"))),
        };

        // Check the existing prefix first so a failure leaves no new folders behind.
        let mut folder: &Folder = self;
        for (depth, segment) in parents.iter().enumerate() {
            match folder.contents.get(*segment) {
                Some(Node::Folder(child)) => folder = child,
                Some(Node::File(_)) => {
                    return Err(PathError::NotAFolder(segments[..=depth].join("/")))
                }
                None => break,
            }
        }

        let mut folder = self;
        for (depth, segment) in parents.iter().enumerate() {
            let child = folder
                .contents
                .entry((*segment).to_owned())
                .or_insert_with(|| Node::Folder(Folder::new(*segment)));
            folder = match child {
                Node::Folder(child) => child,
                Node::File(_) => return Err(PathError::NotAFolder(segments[..=depth].join("/"))),
            };
        }

        entry.set_name(last);
        Ok(folder.contents.insert((*last).to_owned(), entry))
    }

    /// Collects every file below this folder with its full path, pre-order.
    pub(crate) fn collect_files<'a>(&'a self, prefix: &str, out: &mut Vec<(String, &'a File)>) {
        for (name, node) in &self.contents {
            let path = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{}/{}", prefix, name)
            };
            match node {
                Node::File(file) => out.push((path, file)),
                Node::Folder(folder) => folder.collect_files(&path, out),
            }
        }
    }

    fn render(&self, indent: usize, lines: &mut Vec<String>) {
        let mut folders: Vec<(&String, &Folder)> = self
            .contents
            .iter()
            .filter_map(|(name, node)| node.as_folder().map(|folder| (name, folder)))
            .collect();
        let mut files: Vec<&String> = self
            .contents
            .iter()
            .filter(|(_, node)| node.is_file())
            .map(|(name, _)| name)
            .collect();
        folders.sort_by(|a, b| a.0.cmp(b.0));
        files.sort();
        for (name, folder) in folders {
            lines.push(format!("{}{}/", " ".repeat(indent), name));
            folder.render(indent + 2, lines);
        }
        for name in files {
            lines.push(format!("{}{}", " ".repeat(indent), name));
        }
    }
}

impl fmt::Display for Folder {
    /// Indented listing of the contents, folders before files, each sorted by name.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut lines = Vec::new();
        self.render(0, &mut lines);
        f.write_str(&lines.join("\n"))
    }
}
