//! Canonical source identities.
//!
//! Both cache tiers are keyed by the absolute, lexically normalized path of
//! the source file. Normalization is purely textual: `.` components are
//! dropped, `..` pops the previous component, and repeated separators
//! collapse. Symlinks are **not** resolved, so two different links to the
//! same file are two different keys.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::path::{Component, Path, PathBuf};

/// Identity of a source image in both cache tiers.
///
/// Two keys are equal if and only if their canonical paths are equal.
///
/// # Examples
///
/// ```
/// use loupe_storage::ThumbnailKey;
/// use std::path::Path;
///
/// let a = ThumbnailKey::new("/photos/2024/../2025/./DSC0001.ARW").unwrap();
/// let b = ThumbnailKey::new("/photos//2025/DSC0001.ARW").unwrap();
/// assert_eq!(a, b);
/// assert_eq!(a.path(), Path::new("/photos/2025/DSC0001.ARW"));
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThumbnailKey(PathBuf);

impl ThumbnailKey {
    /// Canonicalize `path` into a key.
    ///
    /// Relative paths are resolved against the current working directory.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.is_absolute() {
            return Ok(Self(normalize(path)?));
        }
        let cwd = std::env::current_dir().or_raise(|| ErrorKind::InvalidPath(path.to_path_buf()))?;
        Ok(Self(normalize(&cwd.join(path))?))
    }

    pub fn path(&self) -> &Path {
        &self.0
    }

    pub fn into_path(self) -> PathBuf {
        self.0
    }

    /// Stable hex digest of the canonical path, used as the on-disk filename.
    pub fn digest(&self) -> String {
        blake3::hash(self.0.as_os_str().as_encoded_bytes()).to_string()
    }
}
impl AsRef<Path> for ThumbnailKey {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}
impl Display for ThumbnailKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.0.display())
    }
}

fn normalize(path: &Path) -> Result<PathBuf> {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(prefix) => normalized.push(prefix.as_os_str()),
            Component::RootDir => normalized.push(Component::RootDir.as_os_str()),
            Component::CurDir => {},
            // `/..` is `/`, so popping at the root is a no-op.
            Component::ParentDir => {
                if matches!(normalized.components().next_back(), Some(Component::Normal(_))) {
                    normalized.pop();
                }
            },
            Component::Normal(s) => {
                // Null bytes pass through Path::components() on Unix but cause
                // truncation in C-based syscalls.
                if s.as_encoded_bytes().contains(&0) {
                    exn::bail!(ErrorKind::InvalidPath(path.to_path_buf()));
                }
                normalized.push(s);
            },
        }
    }
    if !normalized.is_absolute() {
        exn::bail!(ErrorKind::InvalidPath(path.to_path_buf()));
    }
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("/photos/DSC0001.ARW", "/photos/DSC0001.ARW")]
    #[case("/photos//shoot///DSC0001.ARW", "/photos/shoot/DSC0001.ARW")]
    #[case("/photos/./shoot/./DSC0001.ARW", "/photos/shoot/DSC0001.ARW")]
    #[case("/photos/other/../shoot/DSC0001.ARW", "/photos/shoot/DSC0001.ARW")]
    #[case("/../photos/DSC0001.ARW", "/photos/DSC0001.ARW")]
    #[case("/photos/shoot/", "/photos/shoot")]
    fn test_normalization(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(ThumbnailKey::new(input).unwrap().path(), Path::new(expected));
    }

    #[test]
    fn test_relative_paths_resolve_against_cwd() {
        let cwd = std::env::current_dir().unwrap();
        let key = ThumbnailKey::new("shoot/../DSC0001.ARW").unwrap();
        assert_eq!(key.path(), cwd.join("DSC0001.ARW"));
        assert!(key.path().is_absolute());
    }

    #[test]
    fn test_null_bytes_rejected() {
        let err = ThumbnailKey::new("/photos/a\0b.arw").unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidPath(_)));
    }

    #[test]
    fn test_equal_paths_share_digest() {
        let a = ThumbnailKey::new("/photos/a/../DSC0001.ARW").unwrap();
        let b = ThumbnailKey::new("/photos/DSC0001.ARW").unwrap();
        let c = ThumbnailKey::new("/photos/DSC0002.ARW").unwrap();
        assert_eq!(a.digest(), b.digest());
        assert_ne!(a.digest(), c.digest());
        assert_eq!(a.digest().len(), 64);
        assert!(a.digest().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_digest_is_case_sensitive() {
        let upper = ThumbnailKey::new("/photos/DSC0001.ARW").unwrap();
        let lower = ThumbnailKey::new("/photos/dsc0001.arw").unwrap();
        assert_ne!(upper, lower);
        assert_ne!(upper.digest(), lower.digest());
    }
}
