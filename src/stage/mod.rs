use std::path::{Path, PathBuf};

use serde::Serialize;

use model::{ExecutionMode, StagingEntry, StagingRequest};

use crate::fs::{self, Fs};

/// One-to-one destination => source bookkeeping for a single staging pass
mod registry;
pub use registry::{Claim, DestinationRegistry};

/// Bind mount declarations
mod mount;
pub use mount::{Mount, MountTable};

/// Interface to the external downloader
mod fetch;
pub use fetch::{CommandFetcher, FetchError, Fetcher, NoRemote};

/// Staging for tasks that run directly on the host
mod direct;
pub use direct::DirectStager;

/// Staging for tasks that run inside a container
mod container;
pub use container::{ContainerLayout, ContainerStager};

/// Broad classes of staging failure. None of them are retried here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The plan itself is malformed; nothing was touched.
    InvalidLocation,
    /// A source could not be read or fetched.
    SourceUnavailable,
    /// Two things want the same destination.
    DestinationConflict,
    /// A filesystem operation failed.
    IoFailure,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid staging request")]
    InvalidRequest(#[from] model::Error),
    #[error("Source {0} does not exist")]
    SourceMissing(String),
    #[error("Literal source {0} has no contents")]
    MissingContents(String),
    #[error("Destination {target:?} is already occupied (wanted by {source_id})")]
    DestinationConflict { target: PathBuf, source_id: String },
    #[error("No staging dir configured; can't stage {0:?} outside the work dir")]
    NoStagingDir(PathBuf),
    #[error(transparent)]
    Fs(#[from] fs::Error),
}

impl Error {
    /// Which part of the failure taxonomy this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidRequest(_) => ErrorKind::InvalidLocation,
            Self::SourceMissing(_) | Self::MissingContents(_) => ErrorKind::SourceUnavailable,
            Self::Fs(fs::Error::Fetch { .. }) => ErrorKind::SourceUnavailable,
            Self::DestinationConflict { .. } => ErrorKind::DestinationConflict,
            Self::Fs(fs::Error::ThroughSymlink { .. }) => ErrorKind::DestinationConflict,
            Self::NoStagingDir(_) | Self::Fs(_) => ErrorKind::IoFailure,
        }
    }
}

/// Where a single entry ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Placement {
    /// Final target: `entry.target`, or a suffixed variant of it after a collision.
    pub target: PathBuf,
    /// Host path holding the content the task will see at `target`, if any.
    pub host_path: Option<PathBuf>,
    /// False if nothing was done for this entry (unstaged, or already staged).
    pub materialized: bool,
}

impl Placement {
    fn skipped(target: PathBuf) -> Self {
        Self {
            target,
            host_path: None,
            materialized: false,
        }
    }

    fn done(target: PathBuf, host_path: PathBuf) -> Self {
        Self {
            target,
            host_path: Some(host_path),
            materialized: true,
        }
    }
}

/// Everything a staging pass produced.
#[derive(Debug, Default)]
pub struct StagingReport {
    /// One per entry, in entry order.
    pub placements: Vec<Placement>,
    /// Contained execution only: bind mounts to pass to the container runtime.
    pub mounts: Vec<Mount>,
}

impl StagingReport {
    /// Mount declarations as container runtime arguments, in order.
    pub fn mount_args(&self) -> Vec<String> {
        self.mounts.iter().map(ToString::to_string).collect()
    }

    /// Number of entries that actually touched the filesystem.
    pub fn materialized(&self) -> usize {
        self.placements.iter().filter(|p| p.materialized).count()
    }
}

/// Stage all entries of `request`, using `fs` for every change on disk.
///
/// The request is validated before anything is touched. Staging stops at the
/// first error; whatever was already staged stays where it is, and the caller
/// is expected to throw the work dir away.
pub fn stage<F: Fetcher + ?Sized>(
    request: &StagingRequest,
    fs: &Fs,
    fetcher: &F,
) -> Result<StagingReport, Error> {
    request.validate()?;
    let mut registry = DestinationRegistry::with_capacity(request.entries.len());

    match request.mode {
        ExecutionMode::Direct => {
            let stager = DirectStager::new(fs, fetcher, request.inplace_update);
            let placements = stager.stage(&request.entries, &mut registry)?;
            Ok(StagingReport {
                placements,
                mounts: Vec::with_capacity(0),
            })
        }
        ExecutionMode::Contained => {
            let layout = ContainerLayout::from_request(request)?;
            let mut stager = ContainerStager::new(fs, fetcher, layout)
                .inplace_update(request.inplace_update)
                .link_host_view(request.link_host_view);
            let (placements, mounts) = stager.stage(&request.entries, &mut registry)?;
            Ok(StagingReport { placements, mounts })
        }
    }
}

// helpers shared by both stagers //////////////

/// Fail with `SourceMissing` unless the host source exists.
fn require_source(fs: &Fs, src: &Path) -> Result<(), Error> {
    if fs.exists(src) {
        Ok(())
    } else {
        Err(Error::SourceMissing(src.display().to_string()))
    }
}

/// Fail with `DestinationConflict` if something unknown already sits at `target`.
fn require_vacant(fs: &Fs, target: &Path, entry: &StagingEntry) -> Result<(), Error> {
    if fs.exists(target) {
        Err(Error::DestinationConflict {
            target: target.to_path_buf(),
            source_id: entry.resolved.to_string(),
        })
    } else {
        Ok(())
    }
}

/// Symlink `link` => `src`. A link that already points at `src` is left as-is,
/// so restaging into an existing work dir is harmless.
fn link_source(fs: &Fs, src: &Path, link: &Path, entry: &StagingEntry) -> Result<(), Error> {
    if fs.read_link(link).as_deref() == Some(src) {
        log::debug!("{link:?} already links to {src:?}");
        return Ok(());
    }
    require_vacant(fs, link, entry)?;
    fs.symlink(src, link)?;
    Ok(())
}

/// Contents of a literal entry, or `MissingContents`.
fn literal_contents(entry: &StagingEntry) -> Result<&str, Error> {
    entry
        .contents
        .as_deref()
        .ok_or_else(|| Error::MissingContents(entry.resolved.to_string()))
}

/// Write a literal entry's contents to `dest` with the right permissions.
fn write_literal(fs: &Fs, dest: &Path, entry: &StagingEntry, writable: bool) -> Result<(), Error> {
    let contents = literal_contents(entry)?;
    require_vacant(fs, dest, entry)?;
    fs.write_file(dest, contents.as_bytes())?;
    if writable {
        fs.set_writable(dest, false)?;
    } else {
        fs.set_read_only(dest)?;
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;
    use model::{EntryKind, Location};

    #[test]
    fn test_error_kinds() {
        let entry = StagingEntry::create_file("_:", "/w/x", "x", false);
        let conflict = require_vacant(&Fs::new(["/"], true), Path::new("/"), &entry).unwrap_err();
        assert_eq!(conflict.kind(), ErrorKind::DestinationConflict);

        let missing = StagingEntry::new(Location::Literal("_:".into()), "/w/x", EntryKind::CreateFile);
        assert_eq!(
            literal_contents(&missing).unwrap_err().kind(),
            ErrorKind::SourceUnavailable
        );

        let invalid: Error = model::Error::MissingContainerWorkDir.into();
        assert_eq!(invalid.kind(), ErrorKind::InvalidLocation);

        let io: Error = fs::Error::NotWhitelisted("/etc".into()).into();
        assert_eq!(io.kind(), ErrorKind::IoFailure);

        let linked: Error = fs::Error::ThroughSymlink {
            path: "/w/ref/x".into(),
            link: "/w/ref".into(),
        }
        .into();
        assert_eq!(linked.kind(), ErrorKind::DestinationConflict);
    }

    #[test]
    fn test_contained_always_mounts_tmp() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let work = dir.path().join("work");
        let request = StagingRequest::contained(&work, "/var/task");
        let fs = Fs::new([&work], false);

        let report = stage(&request, &fs, &NoRemote)?;

        assert_eq!(
            report.mounts,
            [
                Mount::new(&work, "/var/task", true),
                Mount::new(dir.path().join("work.tmp"), "/tmp", true),
            ]
        );
        Ok(())
    }

    #[test]
    fn test_invalid_request_touches_nothing() {
        let mut request = StagingRequest::direct("relative/work");
        request.entries.push(StagingEntry::create_file("_:", "/w/x", "x", false));
        let fs = Fs::new(["/nonexistent-root"], false);
        let err = stage(&request, &fs, &NoRemote).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidLocation);
        assert!(!Path::new("/w/x").exists());
    }
}
