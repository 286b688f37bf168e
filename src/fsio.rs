//! Low-level file primitives shared by the guard.
//!
//! Every write to a guarded file goes through [`atomic_write`], so a crash
//! mid-write leaves either the old or the new content, never a mix.

use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use xxhash_rust::xxh3::xxh3_64;

/// Derive the default backup location: `<original><suffix>`.
///
/// The suffix is appended to the full file name, so `usb_desc.h` becomes
/// `usb_desc.h.bak` rather than replacing the extension.
pub fn backup_path_for(original: &Path, suffix: &str) -> PathBuf {
    let mut name = original.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// Resolve `..` and `.` components without touching the filesystem.
///
/// Two spellings of the same target (`./usb_desc.h`, `cores/../usb_desc.h`)
/// normalize to the same path. Leading `..` of a relative path are kept.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match normalized.components().next_back() {
                Some(Component::Normal(_)) => {
                    normalized.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => normalized.push(".."),
            },
            other => normalized.push(other),
        }
    }
    if normalized.as_os_str().is_empty() {
        normalized.push(".");
    }
    normalized
}

/// Follow `path` if it is a symlink, so the link is written through
/// instead of being replaced by the rename.
fn write_target(path: &Path) -> io::Result<PathBuf> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_symlink() => fs::canonicalize(path),
        _ => Ok(path.to_path_buf()),
    }
}

/// Atomic file write: tempfile + fsync + rename.
///
/// Permissions of an existing target are carried over to the new file.
/// A symlinked target stays a symlink; the file it points to is replaced.
pub fn atomic_write(path: &Path, content: &[u8]) -> io::Result<()> {
    let target = write_target(path)?;
    let path = target.as_path();

    // Create tempfile in same directory to ensure same filesystem
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;

    if let Ok(meta) = fs::metadata(path) {
        fs::set_permissions(temp.path(), meta.permissions())?;
    }

    temp.persist(path).map_err(|e| e.error)?;

    Ok(())
}

/// Copy `from` over `to` atomically and bump the mtime of `to`.
///
/// `fs::copy` preserves the source's timestamps on some platforms; the
/// explicit touch makes sure incremental builds see the file as changed.
pub fn replace_with_copy(from: &Path, to: &Path) -> io::Result<()> {
    let content = fs::read(from)?;
    atomic_write(to, &content)?;
    touch(to)
}

/// Set the mtime of `path` to now.
pub fn touch(path: &Path) -> io::Result<()> {
    filetime::set_file_mtime(path, filetime::FileTime::now())
}

/// xxh3 fingerprint of a file's bytes.
pub fn fingerprint(path: &Path) -> io::Result<u64> {
    Ok(xxh3_64(&fs::read(path)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backup_path_appends_suffix() {
        let path = backup_path_for(Path::new("/pkg/cores/teensy4/usb_desc.h"), ".bak");
        assert_eq!(path, PathBuf::from("/pkg/cores/teensy4/usb_desc.h.bak"));
    }

    #[test]
    fn test_backup_path_custom_suffix() {
        let path = backup_path_for(Path::new("config.h"), ".orig");
        assert_eq!(path, PathBuf::from("config.h.orig"));
    }

    #[test]
    fn test_atomic_write_replaces_content() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file = temp_dir.path().join("header.h");
        fs::write(&file, b"old").unwrap();

        atomic_write(&file, b"new content").unwrap();

        assert_eq!(fs::read_to_string(&file).unwrap(), "new content");
        // No stray temp files left behind
        assert_eq!(fs::read_dir(temp_dir.path()).unwrap().count(), 1);
    }

    #[test]
    #[cfg(unix)]
    fn test_atomic_write_keeps_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = tempfile::tempdir().unwrap();
        let file = temp_dir.path().join("header.h");
        fs::write(&file, b"old").unwrap();
        fs::set_permissions(&file, fs::Permissions::from_mode(0o640)).unwrap();

        atomic_write(&file, b"new").unwrap();

        let mode = fs::metadata(&file).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o640);
    }

    #[test]
    #[cfg(unix)]
    fn test_atomic_write_follows_symlink() {
        let temp_dir = tempfile::tempdir().unwrap();
        let real = temp_dir.path().join("real.h");
        let link = temp_dir.path().join("link.h");
        fs::write(&real, b"old").unwrap();
        std::os::unix::fs::symlink(&real, &link).unwrap();

        atomic_write(&link, b"new").unwrap();

        assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        assert_eq!(fs::read(&real).unwrap(), b"new");
    }

    #[test]
    fn test_normalize_lexically() {
        assert_eq!(
            normalize_lexically(Path::new("/work/./include/../usb_desc.h")),
            PathBuf::from("/work/usb_desc.h")
        );
        assert_eq!(
            normalize_lexically(Path::new("./usb_desc.h")),
            PathBuf::from("usb_desc.h")
        );
        assert_eq!(
            normalize_lexically(Path::new("../vendor/a.h")),
            PathBuf::from("../vendor/a.h")
        );
        assert_eq!(normalize_lexically(Path::new("/..")), PathBuf::from("/"));
    }

    #[test]
    fn test_replace_with_copy() {
        let temp_dir = tempfile::tempdir().unwrap();
        let from = temp_dir.path().join("a.bak");
        let to = temp_dir.path().join("a");
        fs::write(&from, b"pristine").unwrap();
        fs::write(&to, b"patched").unwrap();

        replace_with_copy(&from, &to).unwrap();

        assert_eq!(fs::read(&to).unwrap(), b"pristine");
        assert!(from.exists());
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let temp_dir = tempfile::tempdir().unwrap();
        let a = temp_dir.path().join("a");
        let b = temp_dir.path().join("b");
        fs::write(&a, b"same").unwrap();
        fs::write(&b, b"same").unwrap();
        assert_eq!(fingerprint(&a).unwrap(), fingerprint(&b).unwrap());

        fs::write(&b, b"different").unwrap();
        assert_ne!(fingerprint(&a).unwrap(), fingerprint(&b).unwrap());
    }
}
