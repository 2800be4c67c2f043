//! File identity and link-or-copy placement

use std::io;
use std::path::{Path, PathBuf};

/// Identity of a file independent of the path used to reach it
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum FileIdentity {
    /// Device and inode number
    #[cfg(unix)]
    Inode { dev: u64, ino: u64 },
    /// Fully resolved path
    #[cfg(not(unix))]
    Canonical(PathBuf),
}

pub(crate) fn identity(path: &Path) -> io::Result<FileIdentity> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        let meta = std::fs::metadata(path)?;
        Ok(FileIdentity::Inode {
            dev: meta.dev(),
            ino: meta.ino(),
        })
    }
    #[cfg(not(unix))]
    {
        Ok(FileIdentity::Canonical(std::fs::canonicalize(path)?))
    }
}

/// Whether both paths name the same file; false if either cannot be inspected
pub(crate) fn same_file(a: &Path, b: &Path) -> bool {
    match (identity(a), identity(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// `output_dir/<file name of source>`
pub(crate) fn destination_for(source: &Path, output_dir: &Path) -> Option<PathBuf> {
    source.file_name().map(|name| output_dir.join(name))
}

/// Hard-link `source` to `dest`
///
/// Succeeds without doing anything if `dest` already is `source`. Fails across filesystems and
/// on filesystems without hard links.
pub(crate) fn link(source: &Path, dest: &Path) -> io::Result<()> {
    if same_file(source, dest) {
        return Ok(());
    }
    std::fs::hard_link(source, dest)
}

/// Copy `source` over `dest`
pub(crate) fn copy(source: &Path, dest: &Path) -> io::Result<u64> {
    if same_file(source, dest) {
        return Ok(0);
    }
    std::fs::copy(source, dest)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_follows_hard_links() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.jar");
        let b = dir.path().join("b.jar");
        let c = dir.path().join("c.jar");
        std::fs::write(&a, b"same").unwrap();
        std::fs::write(&c, b"same").unwrap();

        link(&a, &b).unwrap();
        assert!(same_file(&a, &b));
        assert!(!same_file(&a, &c), "equal content is not identity");
        assert!(!same_file(&a, &dir.path().join("missing.jar")));
    }

    #[test]
    fn link_and_copy_onto_self_are_noops() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.jar");
        std::fs::write(&a, b"content").unwrap();

        link(&a, &a).unwrap();
        assert_eq!(copy(&a, &a).unwrap(), 0);
        assert_eq!(std::fs::read(&a).unwrap(), b"content");
    }

    #[test]
    fn copy_replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.jar");
        let b = dir.path().join("b.jar");
        std::fs::write(&a, b"new").unwrap();
        std::fs::write(&b, b"old contents").unwrap();

        assert!(link(&a, &b).is_err());
        copy(&a, &b).unwrap();
        assert_eq!(std::fs::read(&b).unwrap(), b"new");
        assert!(!same_file(&a, &b));
    }

    #[test]
    fn destination_keeps_file_name() {
        assert_eq!(
            destination_for(Path::new("/mods/jei.jar"), Path::new("/out")),
            Some(PathBuf::from("/out/jei.jar"))
        );
        assert_eq!(destination_for(Path::new("/"), Path::new("/out")), None);
    }
}
