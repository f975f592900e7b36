use std::path::{Path, PathBuf};

use model::normalize_path;
use util::{HashMap, Hasher};

/// Result of asking the registry for a destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    /// False if this source already sits at `target`; nothing more to do.
    pub needs_materialization: bool,
    /// Where the source should end up.
    pub target: PathBuf,
}

/// Keeps track of which source owns each destination during one staging pass.
///
/// A destination is never reassigned: if a different source asks for a
/// destination that is already taken, it gets the first free `desired_1`,
/// `desired_2`, ... instead.
#[derive(Debug)]
pub struct DestinationRegistry {
    /// destination => id of the source staged there
    claims: HashMap<PathBuf, String>,
}

impl DestinationRegistry {
    /// Create a new `DestinationRegistry` sized for `cap` entries.
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            claims: HashMap::with_capacity_and_hasher(cap, Hasher::default()),
        }
    }

    /// Claim `desired` (or a suffixed variant of it) for `source`.
    pub fn claim(&mut self, source: &str, desired: &Path) -> Claim {
        let desired = normalize_path(desired);
        let mut candidate = desired.clone();
        let mut suffix = 0usize;
        loop {
            match self.claims.get(&candidate) {
                None => {
                    if suffix > 0 {
                        log::debug!("{desired:?} already taken; staging {source} at {candidate:?}");
                    }
                    self.claims.insert(candidate.clone(), source.to_owned());
                    return Claim {
                        needs_materialization: true,
                        target: candidate,
                    };
                }
                Some(owner) if owner == source => {
                    log::trace!("{source} already staged at {candidate:?}");
                    return Claim {
                        needs_materialization: false,
                        target: candidate,
                    };
                }
                Some(_) => {
                    suffix += 1;
                    candidate = suffixed(&desired, suffix);
                }
            }
        }
    }

    /// Id of the source that currently owns `target`.
    pub fn owner(&self, target: &Path) -> Option<&str> {
        self.claims.get(target).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.claims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }
}

/// "/a/report.txt" + 2 => "/a/report.txt_2"
fn suffixed(path: &Path, suffix: usize) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(format!("_{suffix}"));
    PathBuf::from(s)
}
