use std::fmt;
use std::path::{Path, PathBuf};

use util::{HashSet, Hasher};

/// A bind mount making a host path visible inside the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub source: PathBuf,
    pub target: PathBuf,
    pub writable: bool,
}

impl Mount {
    pub fn new<S: Into<PathBuf>, T: Into<PathBuf>>(source: S, target: T, writable: bool) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            writable,
        }
    }
}

/// Renders as a container runtime argument, e.g.
/// `--mount=type=bind,source=/host/w,target=/var/task,readonly`.
/// Options containing commas or quotes are CSV-quoted.
impl fmt::Display for Mount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("--mount=type=bind,")?;
        write_option(f, "source=", &self.source)?;
        f.write_str(",")?;
        write_option(f, "target=", &self.target)?;
        if !self.writable {
            f.write_str(",readonly")?;
        }
        Ok(())
    }
}

fn write_option(f: &mut fmt::Formatter<'_>, key: &str, path: &Path) -> fmt::Result {
    let option = format!("{key}{}", path.display());
    if option.contains([',', '"']) {
        write!(f, "\"{}\"", option.replace('"', "\"\""))
    } else {
        f.write_str(&option)
    }
}

/// Mounts in first-encounter order, at most one per container target.
#[derive(Debug)]
pub struct MountTable {
    mounts: Vec<Mount>,
    targets: HashSet<PathBuf>,
}

impl MountTable {
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            mounts: Vec::with_capacity(cap),
            targets: HashSet::with_capacity_and_hasher(cap, Hasher::default()),
        }
    }

    /// Add `mount` unless its target is already mounted. Returns true if it was added.
    pub fn push(&mut self, mount: Mount) -> bool {
        if self.targets.contains(&mount.target) {
            log::debug!("{:?} is already mounted; skipping", mount.target);
            return false;
        }
        log::trace!("mounting {:?} at {:?}", mount.source, mount.target);
        self.targets.insert(mount.target.clone());
        self.mounts.push(mount);
        true
    }

    pub fn is_mounted(&self, target: &Path) -> bool {
        self.targets.contains(target)
    }

    pub fn len(&self) -> usize {
        self.mounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mounts.is_empty()
    }

    pub fn into_inner(self) -> Vec<Mount> {
        self.mounts
    }
}
