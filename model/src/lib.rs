/// Parsing location strings into host paths, remote urls, or literal markers
mod location;
pub use location::{normalize_path, Location, LITERAL_PREFIX};

/// Typed File/Directory tree
mod object;
pub use object::{split_basename, Directory, File, FsObject};

/// Individual units of staging work
mod entry;
pub use entry::{EntryKind, StagingEntry};

/// Full staging requests and output bindings
mod request;
pub use request::{ExecutionMode, LoadListing, OutputBinding, StagingRequest};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Invalid location \"{0}\": {1}")]
    InvalidLocation(String, &'static str),
    #[error("Path must be absolute: {0}")]
    RelativePath(String),
    #[error("Contained execution requires a container work dir")]
    MissingContainerWorkDir,
    #[error("Container work dir must not be the container root")]
    ContainerRootWorkDir,
}
