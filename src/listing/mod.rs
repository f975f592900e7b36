use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use model::{Directory, File, FsObject, LoadListing, Location};

/// Content hashes for file descriptors
mod checksum;
pub use checksum::{checksum_file, CHECKSUM_PREFIX};

/// Picking up declared outputs after a task has run
mod collect;
pub use collect::{collect_outputs, CollectedOutput};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Can't enumerate {0}: only host directories can be listed")]
    NotOnHost(String),
    #[error("Unable to read {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Output glob {0:?} must be relative to the work dir")]
    AbsoluteGlob(String),
    #[error("Invalid output glob {0:?}")]
    Pattern(String, #[source] glob::PatternError),
    #[error(transparent)]
    Model(#[from] model::Error),
    #[error(transparent)]
    Encoding(#[from] util::PathEncodingError),
}

impl Error {
    fn io(path: &Path) -> impl FnOnce(io::Error) -> Self + '_ {
        move |source| Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Fills in directory listings (and file sizes and checksums) from the host filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListingExpander {
    depth: LoadListing,
    checksums: bool,
}

impl ListingExpander {
    pub fn new(depth: LoadListing) -> Self {
        Self {
            depth,
            checksums: false,
        }
    }

    /// Also compute a checksum for every file described.
    pub fn checksums(mut self, checksums: bool) -> Self {
        self.checksums = checksums;
        self
    }

    /// Enumerate `dir` and replace its listing.
    ///
    /// Does nothing if the listing is already there, so expanding twice gives
    /// the same result as expanding once. Entries are sorted by name. With
    /// `DeepListing` subdirectories are expanded too; with `ShallowListing`
    /// they are left unexpanded.
    pub fn expand(&self, dir: &mut Directory) -> Result<(), Error> {
        if dir.is_expanded() || self.depth == LoadListing::NoListing {
            return Ok(());
        }
        let listing = match &dir.location {
            Location::Host(path) => self.read_listing(path)?,
            // literal dirs are created empty
            Location::Literal(_) => Vec::with_capacity(0),
            Location::Remote(url) => return Err(Error::NotOnHost(url.to_string())),
        };
        dir.set_listing(listing);
        Ok(())
    }

    /// Expand every directory in `objects`, including nested ones and secondary files.
    /// Host files missing a size (or a checksum, if enabled) get one filled in.
    pub fn expand_all(&self, objects: &mut [FsObject]) -> Result<(), Error> {
        for obj in objects {
            obj.visit_mut(&mut |node: &mut FsObject| match node {
                FsObject::Directory(dir) => self.expand(dir),
                FsObject::File(file) => self.fill_in(file),
            })?;
        }
        Ok(())
    }

    /// Describe whatever is at `path`. A directory is expanded unless
    /// the depth is `NoListing`.
    pub fn describe(&self, path: &Path) -> Result<FsObject, Error> {
        let meta = fs::metadata(path).map_err(Error::io(path))?;
        if meta.is_dir() {
            let mut dir = Directory::new(Location::host(path)?, basename(path)?);
            self.expand(&mut dir)?;
            Ok(dir.into())
        } else {
            Ok(self.describe_file(path, meta.len())?.into())
        }
    }

    /// File descriptor for a regular file of `size` bytes at `path`.
    pub fn describe_file(&self, path: &Path, size: u64) -> Result<File, Error> {
        let mut file = File::new(Location::host(path)?, basename(path)?);
        file.size = Some(size);
        if self.checksums {
            file.checksum = Some(checksum_file(path).map_err(Error::io(path))?);
        }
        Ok(file)
    }

    fn read_listing(&self, path: &Path) -> Result<Vec<FsObject>, Error> {
        let mut children = fs::read_dir(path)
            .and_then(|entries| entries.map(|e| e.map(|e| e.path())).collect::<io::Result<Vec<_>>>())
            .map_err(Error::io(path))?;
        children.sort();
        log::trace!("{} entries in {path:?}", children.len());

        let mut listing = Vec::with_capacity(children.len());
        for child in children {
            let meta = match fs::metadata(&child) {
                Ok(meta) => meta,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    log::warn!("Skipping dangling symlink {child:?}");
                    continue;
                }
                Err(e) => return Err(Error::io(&child)(e)),
            };
            if meta.is_dir() {
                let mut dir = Directory::new(Location::host(&child)?, basename(&child)?);
                if self.depth == LoadListing::DeepListing {
                    self.expand(&mut dir)?;
                }
                listing.push(dir.into());
            } else {
                listing.push(self.describe_file(&child, meta.len())?.into());
            }
        }
        Ok(listing)
    }

    fn fill_in(&self, file: &mut File) -> Result<(), Error> {
        let Location::Host(path) = &file.location else {
            return Ok(());
        };
        if file.size.is_none() {
            file.size = Some(fs::metadata(path).map_err(Error::io(path))?.len());
        }
        if self.checksums && file.checksum.is_none() {
            file.checksum = Some(checksum_file(path).map_err(Error::io(path))?);
        }
        Ok(())
    }
}

fn basename(path: &Path) -> Result<String, Error> {
    let name = path.file_name().map(Path::new).unwrap_or(path);
    Ok(util::path_str(name)?.to_owned())
}
