use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use super::Fs;

/// Name used for a staged item whose target has no file name of its own.
const FALLBACK_NAME: &str = "staged";

/// Utility fns for making common types of paths.
impl Fs {
    /// $STAGING/slot{n}/basename
    ///
    /// Each slot is a fresh directory, so two items with the same basename never clash.
    pub fn staging_slot<'a>(
        &self,
        staging_dir: &Path,
        slot: usize,
        basename: Option<&OsStr>,
        buf: &'a mut PathBuf,
    ) -> &'a Path {
        buf.clear();
        buf.push(staging_dir);
        buf.push(format!("slot{slot}"));
        buf.push(basename.unwrap_or_else(|| OsStr::new(FALLBACK_NAME)));
        &*buf
    }

    /// Rewrite `path` from under `from_root` to under `to_root`.
    ///
    /// Returns `None` unless `path` is strictly inside `from_root`
    /// (the root itself does not count).
    pub fn rebase<'a>(
        &self,
        path: &Path,
        from_root: &Path,
        to_root: &Path,
        buf: &'a mut PathBuf,
    ) -> Option<&'a Path> {
        let rel = path.strip_prefix(from_root).ok()?;
        if rel.as_os_str().is_empty() {
            return None;
        }
        buf.clear();
        buf.push(to_root);
        buf.push(rel);
        Some(&*buf)
    }
}
