use std::io;
use std::path::{Path, PathBuf};

use url::Url;

use crate::stage::{FetchError, Fetcher};

/// Copy, symlink, and permission helpers
mod ops;

/// Defines fns for creating common paths under the staging roots
mod paths;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Path is neither file nor dir: {0}")]
    UnknownPathType(String),
    #[error("Specified directory \"{0}\" is not a directory")]
    NotDirectory(String),
    #[error("Can't perform IO operation: \"{0}\" is not whitelisted")]
    NotWhitelisted(String),
    #[error("Can't write {path:?}: {link:?} is a symlink")]
    ThroughSymlink { path: PathBuf, link: PathBuf },
    #[error("{op} {path:?} failed")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("fetching {url} into {path:?} failed")]
    Fetch {
        url: String,
        path: PathBuf,
        #[source]
        source: FetchError,
    },
}

type Result<T> = std::result::Result<T, Error>;

fn io_err<'a>(op: &'static str, path: &'a Path) -> impl FnOnce(io::Error) -> Error + 'a {
    move |source| Error::Io {
        op,
        path: path.to_path_buf(),
        source,
    }
}

/// All file operations done while staging go through this struct.
///
/// Destructive operations check that the path in question is under one of the
/// whitelisted roots (the task work dir, staging dir, tmp dir), otherwise they
/// will not be performed. Sources are only ever read.
#[derive(Debug)]
pub struct Fs {
    /// The directories we are allowed to modify
    roots: Vec<PathBuf>,
    /// if true, destructive operations are logged instead of performed
    dry_run: bool,
}

impl Fs {
    /// Create a new `Fs` that may modify anything under `roots`.
    pub fn new<I, P>(roots: I, dry_run: bool) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            roots: roots.into_iter().map(Into::into).collect(),
            dry_run,
        }
    }

    /// Whitelist another root directory.
    pub fn add_root<T: Into<PathBuf>>(&mut self, root: T) {
        self.roots.push(root.into());
    }

    /// Check whether `dir` exists, and create it if not.
    pub fn ensure_dir_exists<T: AsRef<Path>>(&self, dir: T) -> Result<()> {
        let dir = dir.as_ref();
        if !self.exists(dir) {
            if self.dry_run {
                log::info!("Dry run. Not creating directory {dir:?}");
            } else {
                log::info!("Directory {dir:?} doesn't exist. Creating.");
                self.create_dir(dir)?;
            }
        } else if !self.is_dir(dir) {
            return Err(Error::NotDirectory(dir.display().to_string()));
        } else {
            log::debug!("Directory {dir:?} already exists. Not creating.");
        }
        Ok(())
    }

    /// Check if path exists on disk (dangling symlinks count).
    pub fn exists<T: AsRef<Path>>(&self, path: T) -> bool {
        let path = path.as_ref();
        path.exists() || path.is_symlink()
    }

    /// Check if path exists and is a directory (following symlinks).
    pub fn is_dir<T: AsRef<Path>>(&self, path: T) -> bool {
        path.as_ref().is_dir()
    }

    /// Target of the symlink at `path`, or `None` if it isn't a symlink.
    pub fn read_link<T: AsRef<Path>>(&self, path: T) -> Option<PathBuf> {
        std::fs::read_link(path).ok()
    }

    /// Create a directory (uses `std::fs::create_dir_all`, so an entire tree of dirs can be created).
    pub fn create_dir<T: AsRef<Path>>(&self, path: T) -> Result<()> {
        let path = path.as_ref();
        self.check_whitelist(path)?;
        if self.skip("create dir", path) {
            return Ok(());
        }
        std::fs::create_dir_all(path).map_err(io_err("creating dir", path))
    }

    /// Create parent directory of a given path.
    pub fn create_parent_dir<T: AsRef<Path>>(&self, path: T) -> Result<()> {
        match path.as_ref().parent() {
            Some(parent) if !parent.as_os_str().is_empty() => self.create_dir(parent),
            _ => Ok(()),
        }
    }

    /// Write `contents` to a new file.
    pub fn write_file<T: AsRef<Path>>(&self, path: T, contents: &[u8]) -> Result<()> {
        let path = path.as_ref();
        self.check_whitelist(path)?;
        if self.skip("write file", path) {
            return Ok(());
        }
        std::fs::write(path, contents).map_err(io_err("writing file", path))
    }

    /// Symlink `symlink` to `tgt`.
    pub fn symlink<T: AsRef<Path>, U: AsRef<Path>>(&self, tgt: T, symlink: U) -> Result<()> {
        let (tgt, symlink) = (tgt.as_ref(), symlink.as_ref());
        self.check_whitelist(symlink)?;
        if self.skip("symlink", symlink) {
            return Ok(());
        }
        log::trace!("symlinking {symlink:?} to {tgt:?}");
        ops::symlink(tgt, symlink).map_err(io_err("symlinking", symlink))
    }

    /// Copy `src` to `tgt`, recursively if `src` is a directory.
    pub fn copy<T: AsRef<Path>, U: AsRef<Path>>(&self, src: T, tgt: U) -> Result<()> {
        let (src, tgt) = (src.as_ref(), tgt.as_ref());
        self.check_whitelist(tgt)?;
        if self.skip("copy", tgt) {
            return Ok(());
        }
        log::trace!("copying {src:?} to {tgt:?}");
        ops::copy(src, tgt).map_err(|e| match e {
            ops::CopyError::UnknownPathType(p) => Error::UnknownPathType(p.display().to_string()),
            ops::CopyError::Io(source) => Error::Io {
                op: "copying",
                path: src.to_path_buf(),
                source,
            },
        })
    }

    /// Give the owner write access to `path` (and everything under it, if `recursive`).
    pub fn set_writable<T: AsRef<Path>>(&self, path: T, recursive: bool) -> Result<()> {
        let path = path.as_ref();
        self.check_whitelist(path)?;
        if self.skip("make writable", path) {
            return Ok(());
        }
        ops::set_writable(path, true, recursive).map_err(io_err("making writable", path))
    }

    /// Remove write access from `path`.
    pub fn set_read_only<T: AsRef<Path>>(&self, path: T) -> Result<()> {
        let path = path.as_ref();
        self.check_whitelist(path)?;
        if self.skip("make read-only", path) {
            return Ok(());
        }
        ops::set_writable(path, false, false).map_err(io_err("making read-only", path))
    }

    /// Have `fetcher` download `url` into `tgt`.
    pub fn fetch<F, T>(&self, fetcher: &F, url: &Url, tgt: T) -> Result<()>
    where
        F: Fetcher + ?Sized,
        T: AsRef<Path>,
    {
        let tgt = tgt.as_ref();
        self.check_whitelist(tgt)?;
        if self.skip("fetch", tgt) {
            return Ok(());
        }
        log::debug!("fetching {url} into {tgt:?}");
        fetcher.fetch(url, tgt).map_err(|source| Error::Fetch {
            url: url.to_string(),
            path: tgt.to_path_buf(),
            source,
        })
    }

    fn skip(&self, op: &str, path: &Path) -> bool {
        if self.dry_run {
            log::info!("Dry run. Not performing {op} on {path:?}");
        }
        self.dry_run
    }

    /// `path` must be under a root, and nothing between the root and `path`
    /// may be a symlink, so writes can't land in a linked source.
    fn check_whitelist(&self, path: &Path) -> Result<()> {
        let root = self
            .roots
            .iter()
            .find(|root| path.starts_with(root))
            .ok_or_else(|| Error::NotWhitelisted(path.display().to_string()))?;
        let below_root = path
            .ancestors()
            .skip(1)
            .take_while(|a| a.starts_with(root) && *a != root.as_path());
        for ancestor in below_root {
            if ancestor.is_symlink() {
                return Err(Error::ThroughSymlink {
                    path: path.to_path_buf(),
                    link: ancestor.to_path_buf(),
                });
            }
        }
        Ok(())
    }
}
