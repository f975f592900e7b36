use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub enum CopyError {
    UnknownPathType(PathBuf),
    Io(io::Error),
}

impl From<io::Error> for CopyError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

/// Copy `src` to `tgt`, recursively if needed.
/// A symlink at the top level is followed, so the copy holds real data.
pub fn copy(src: &Path, tgt: &Path) -> Result<(), CopyError> {
    if src.is_file() {
        fs::copy(src, tgt)?;
    } else if src.is_dir() {
        cp_dir(src, tgt, src, tgt)?;
    } else if !src.exists() {
        return Err(io::Error::new(io::ErrorKind::NotFound, "copy source does not exist").into());
    } else {
        return Err(CopyError::UnknownPathType(src.to_path_buf()));
    }
    Ok(())
}

fn cp_dir(src_root: &Path, tgt_root: &Path, src: &Path, tgt: &Path) -> Result<(), CopyError> {
    fs::create_dir_all(tgt)?;
    let mut entries = fs::read_dir(src)?.collect::<Result<Vec<_>, _>>()?;
    entries.sort_by_key(|e| e.file_name());
    for entry in entries {
        let ty = entry.file_type()?;
        let src_entry = entry.path();
        let tgt_entry = tgt.join(entry.file_name());
        if ty.is_symlink() {
            let orig_link_tgt = fs::read_link(&src_entry)?;
            let new_link_tgt = resolve_new_link_tgt(src_root, tgt_root, orig_link_tgt);
            symlink(&new_link_tgt, &tgt_entry)?;
        } else if ty.is_dir() {
            cp_dir(src_root, tgt_root, &src_entry, &tgt_entry)?;
        } else if ty.is_file() {
            fs::copy(&src_entry, &tgt_entry)?;
        } else {
            return Err(CopyError::UnknownPathType(src_entry));
        }
    }
    Ok(())
}

/// If link is internal to `src_root`, create a new internal link in `tgt_root`.
/// O/w, just link to the same external target.
fn resolve_new_link_tgt(src_root: &Path, tgt_root: &Path, orig_link_tgt: PathBuf) -> PathBuf {
    match orig_link_tgt.strip_prefix(src_root) {
        Ok(rel) => tgt_root.join(rel),
        Err(_) => orig_link_tgt,
    }
}

/// Symlink the given `link` to `tgt`; works for unix and windows.
pub fn symlink(tgt: &Path, link: &Path) -> io::Result<()> {
    #[cfg(unix)]
    std::os::unix::fs::symlink(tgt, link)?;

    #[cfg(windows)]
    if tgt.is_dir() {
        std::os::windows::fs::symlink_dir(tgt, link)?;
    } else {
        std::os::windows::fs::symlink_file(tgt, link)?;
    }
    Ok(())
}

/// Add or remove owner write permission. Symlinks inside a tree are left alone.
pub fn set_writable(path: &Path, writable: bool, recursive: bool) -> io::Result<()> {
    let meta = fs::symlink_metadata(path)?;
    if meta.file_type().is_symlink() {
        return Ok(());
    }
    fs::set_permissions(path, with_write_bit(meta.permissions(), writable))?;

    if recursive && meta.is_dir() {
        for entry in fs::read_dir(path)? {
            set_writable(&entry?.path(), writable, true)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn with_write_bit(mut perms: fs::Permissions, writable: bool) -> fs::Permissions {
    use std::os::unix::fs::PermissionsExt;
    let mode = perms.mode();
    // only the owner bit is granted; removal strips it for everyone
    perms.set_mode(if writable { mode | 0o200 } else { mode & !0o222 });
    perms
}

#[cfg(not(unix))]
fn with_write_bit(mut perms: fs::Permissions, writable: bool) -> fs::Permissions {
    perms.set_readonly(!writable);
    perms
}
