use serde::{Deserialize, Serialize};

use super::Location;

/// A File or Directory value, as passed between the orchestrator and a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "class")]
pub enum FsObject {
    File(File),
    Directory(Directory),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct File {
    pub location: Location,
    pub basename: String,
    pub nameroot: String,
    pub nameext: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Only set for in-memory files, whose location is a literal marker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contents: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secondary_files: Vec<FsObject>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directory {
    pub location: Location,
    pub basename: String,
    /// `None` until the directory has been enumerated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    listing: Option<Vec<FsObject>>,
}

impl File {
    /// Create a new `File`, deriving `nameroot` and `nameext` from `basename`.
    pub fn new(location: Location, basename: impl Into<String>) -> Self {
        let basename = basename.into();
        let (nameroot, nameext) = split_basename(&basename);
        Self {
            location,
            nameroot: nameroot.to_owned(),
            nameext: nameext.to_owned(),
            basename,
            checksum: None,
            size: None,
            contents: None,
            secondary_files: Vec::with_capacity(0),
        }
    }

    /// Create an in-memory file. `marker` is forced into literal form.
    pub fn literal(marker: &str, basename: impl Into<String>, contents: impl Into<String>) -> Self {
        let marker = if marker.starts_with(crate::LITERAL_PREFIX) {
            marker.to_owned()
        } else {
            format!("{}{marker}", crate::LITERAL_PREFIX)
        };
        let mut file = Self::new(Location::Literal(marker), basename);
        file.contents = Some(contents.into());
        file
    }

    pub fn is_literal(&self) -> bool {
        self.location.is_literal()
    }
}

impl Directory {
    pub fn new(location: Location, basename: impl Into<String>) -> Self {
        Self {
            location,
            basename: basename.into(),
            listing: None,
        }
    }

    /// Create a directory whose listing is already known.
    pub fn with_listing(location: Location, basename: impl Into<String>, listing: Vec<FsObject>) -> Self {
        let mut dir = Self::new(location, basename);
        dir.listing = Some(listing);
        dir
    }

    pub fn listing(&self) -> Option<&[FsObject]> {
        self.listing.as_deref()
    }

    pub fn is_expanded(&self) -> bool {
        self.listing.is_some()
    }

    /// Replace the whole listing. Listings are never appended to.
    pub fn set_listing(&mut self, listing: Vec<FsObject>) {
        self.listing = Some(listing);
    }
}

impl FsObject {
    pub fn is_file(&self) -> bool {
        matches!(self, Self::File(_))
    }

    pub fn is_directory(&self) -> bool {
        matches!(self, Self::Directory(_))
    }

    pub fn as_file(&self) -> Option<&File> {
        match self {
            Self::File(f) => Some(f),
            Self::Directory(_) => None,
        }
    }

    pub fn as_directory(&self) -> Option<&Directory> {
        match self {
            Self::Directory(d) => Some(d),
            Self::File(_) => None,
        }
    }

    pub fn as_directory_mut(&mut self) -> Option<&mut Directory> {
        match self {
            Self::Directory(d) => Some(d),
            Self::File(_) => None,
        }
    }

    pub fn location(&self) -> &Location {
        match self {
            Self::File(f) => &f.location,
            Self::Directory(d) => &d.location,
        }
    }

    pub fn basename(&self) -> &str {
        match self {
            Self::File(f) => &f.basename,
            Self::Directory(d) => &d.basename,
        }
    }

    /// Directory listing; always `None` for files.
    pub fn listing(&self) -> Option<&[FsObject]> {
        self.as_directory().and_then(Directory::listing)
    }

    /// Visit this node and everything under it (listings and secondary files).
    /// Children are visited before their parent.
    pub fn visit<F: FnMut(&FsObject)>(&self, f: &mut F) {
        match self {
            Self::File(file) => file.secondary_files.iter().for_each(|c| c.visit(f)),
            Self::Directory(dir) => {
                if let Some(listing) = &dir.listing {
                    listing.iter().for_each(|c| c.visit(f));
                }
            }
        }
        f(self);
    }

    /// Mutable counterpart of [`visit`](Self::visit); stops at the first error.
    /// Since children go first, anything `f` adds to a node is not itself visited.
    pub fn visit_mut<F, E>(&mut self, f: &mut F) -> Result<(), E>
    where
        F: FnMut(&mut FsObject) -> Result<(), E>,
    {
        match self {
            Self::File(file) => {
                for child in &mut file.secondary_files {
                    child.visit_mut(f)?;
                }
            }
            Self::Directory(dir) => {
                if let Some(listing) = &mut dir.listing {
                    for child in listing {
                        child.visit_mut(f)?;
                    }
                }
            }
        }
        f(self)
    }
}

impl From<File> for FsObject {
    fn from(f: File) -> Self {
        Self::File(f)
    }
}

impl From<Directory> for FsObject {
    fn from(d: Directory) -> Self {
        Self::Directory(d)
    }
}

/// Split a basename into root and extension the way CWL does:
/// the extension keeps its dot, and a leading dot doesn't start an extension.
pub fn split_basename(basename: &str) -> (&str, &str) {
    match basename.rfind('.') {
        Some(idx) if basename[..idx].trim_start_matches('.').is_empty() => (basename, ""),
        Some(idx) => basename.split_at(idx),
        None => (basename, ""),
    }
}
