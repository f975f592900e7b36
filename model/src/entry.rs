use std::borrow::Cow;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::Location;

/// What a staging entry is, and so how it has to be made visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryKind {
    /// Read-only reference to an existing file.
    #[serde(rename = "File")]
    PlainFile,
    /// Read-only reference to an existing directory.
    #[serde(rename = "Directory")]
    PlainDirectory,
    /// File synthesized from literal contents; read-only once written.
    CreateFile,
    /// File synthesized from literal contents that the task may modify.
    CreateWritableFile,
    /// Private, mutable copy of an existing file.
    WritableFile,
    /// Private, mutable copy of an existing directory (or a new empty one).
    WritableDirectory,
}

impl EntryKind {
    pub fn is_directory(self) -> bool {
        matches!(self, Self::PlainDirectory | Self::WritableDirectory)
    }

    pub fn is_writable(self) -> bool {
        matches!(
            self,
            Self::CreateWritableFile | Self::WritableFile | Self::WritableDirectory
        )
    }

    /// True if content is written at stage time rather than copied from a source.
    pub fn is_created(self) -> bool {
        matches!(self, Self::CreateFile | Self::CreateWritableFile)
    }
}

/// One unit of staging work: make `resolved` visible at `target`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagingEntry {
    pub resolved: Location,
    pub target: PathBuf,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    /// If false, the entry is only referenced (e.g. it sits inside a staged directory).
    #[serde(default = "default_staged")]
    pub staged: bool,
    /// Consumer may read this as a stream; content is still fully materialized.
    #[serde(default)]
    pub streamable: bool,
    /// Literal bytes for `Create*` entries and in-memory plain files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contents: Option<String>,
}

fn default_staged() -> bool {
    true
}

impl StagingEntry {
    pub fn new(resolved: Location, target: impl Into<PathBuf>, kind: EntryKind) -> Self {
        Self {
            resolved,
            target: target.into(),
            kind,
            staged: true,
            streamable: false,
            contents: None,
        }
    }

    /// A `CreateFile` (or `CreateWritableFile`) entry holding `contents`.
    pub fn create_file(
        marker: &str,
        target: impl Into<PathBuf>,
        contents: impl Into<String>,
        writable: bool,
    ) -> Self {
        let kind = if writable {
            EntryKind::CreateWritableFile
        } else {
            EntryKind::CreateFile
        };
        let mut entry = Self::new(Location::Literal(marker.to_owned()), target, kind);
        entry.contents = Some(contents.into());
        entry
    }

    pub fn unstaged(mut self) -> Self {
        self.staged = false;
        self
    }

    pub fn streamable(mut self) -> Self {
        self.streamable = true;
        self
    }

    /// Identity of the source, used to decide whether two entries are "the same thing".
    /// Literal sources include their contents, so two different literals that happen to
    /// share a marker are never merged.
    pub fn source_id(&self) -> Cow<'_, str> {
        match (&self.resolved, &self.contents) {
            (Location::Literal(marker), Some(contents)) => {
                Cow::Owned(format!("{marker}\0{contents}"))
            }
            (Location::Literal(marker), None) => Cow::Borrowed(marker),
            (loc, _) => Cow::Owned(loc.to_string()),
        }
    }
}
