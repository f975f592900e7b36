use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use super::Error;

/// Prefix marking content that exists only in memory, e.g. "_:0f6a...".
pub const LITERAL_PREFIX: &str = "_:";

/// Where the data behind a File, Directory, or staging entry actually lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Location {
    /// Absolute, normalized path on the local host.
    Host(PathBuf),
    /// Something a downloader has to fetch first.
    Remote(Url),
    /// In-memory content that has never been written anywhere.
    /// Holds the full marker string, prefix included.
    Literal(String),
}

impl Location {
    /// Resolve a location string.
    ///
    /// Literal markers are kept as-is, `file://` urls with an empty or `localhost`
    /// authority become host paths, bare absolute paths pass through (normalized),
    /// and any other hierarchical url is treated as remote.
    pub fn resolve(location: &str) -> Result<Self, Error> {
        if location.starts_with(LITERAL_PREFIX) {
            return Ok(Self::Literal(location.to_owned()));
        }
        if location.is_empty() {
            return Err(Error::InvalidLocation(location.to_owned(), "empty location"));
        }

        let path = Path::new(location);
        if path.is_absolute() {
            return Ok(Self::Host(normalize_path(path)));
        }

        let url = Url::parse(location).map_err(|_| {
            Error::InvalidLocation(location.to_owned(), "neither an absolute path nor a url")
        })?;

        if url.scheme() == "file" {
            // to_file_path() rejects any authority other than "" or "localhost":
            let path = url.to_file_path().map_err(|_| {
                Error::InvalidLocation(location.to_owned(), "file url is not local to this host")
            })?;
            Ok(Self::Host(normalize_path(&path)))
        } else if url.cannot_be_a_base() {
            Err(Error::InvalidLocation(location.to_owned(), "unsupported url scheme"))
        } else {
            log::trace!("{location} is remote ({} scheme)", url.scheme());
            Ok(Self::Remote(url))
        }
    }

    /// Host location for an absolute path.
    pub fn host<T: AsRef<Path>>(path: T) -> Result<Self, Error> {
        let path = path.as_ref();
        if path.is_absolute() {
            Ok(Self::Host(normalize_path(path)))
        } else {
            Err(Error::RelativePath(path.display().to_string()))
        }
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, Self::Literal(_))
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_))
    }

    /// The host path, if this location has one.
    pub fn as_host(&self) -> Option<&Path> {
        match self {
            Self::Host(path) => Some(path),
            _ => None,
        }
    }

    /// Last path segment, if there is one. Literal markers have no name.
    pub fn basename(&self) -> Option<String> {
        match self {
            Self::Host(path) => path.file_name().map(|n| n.to_string_lossy().into_owned()),
            Self::Remote(url) => url
                .path_segments()
                .and_then(|segments| segments.last())
                .filter(|s| !s.is_empty())
                .map(str::to_owned),
            Self::Literal(_) => None,
        }
    }

    /// Canonical url form, used when serializing (host paths become `file://` urls).
    pub fn to_uri(&self) -> String {
        match self {
            Self::Host(path) => Url::from_file_path(path)
                .map(String::from)
                .unwrap_or_else(|_| path.display().to_string()),
            Self::Remote(url) => url.to_string(),
            Self::Literal(marker) => marker.clone(),
        }
    }
}

/// Plain path for host locations; this is also the identity used when deduplicating sources.
impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host(path) => write!(f, "{}", path.display()),
            Self::Remote(url) => write!(f, "{url}"),
            Self::Literal(marker) => f.write_str(marker),
        }
    }
}

impl TryFrom<String> for Location {
    type Error = Error;
    fn try_from(location: String) -> Result<Self, Self::Error> {
        Self::resolve(&location)
    }
}

impl From<Location> for String {
    fn from(location: Location) -> Self {
        location.to_uri()
    }
}

/// Lexically normalize a path: drop `.` segments and trailing slashes, resolve `..`.
/// Does not touch the filesystem, so symlinks are not followed.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::with_capacity(path.as_os_str().len());
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                // ".." above the root stays at the root:
                if !normalized.pop() && !normalized.has_root() {
                    normalized.push(component);
                }
            }
            other => normalized.push(other),
        }
    }
    normalized
}
