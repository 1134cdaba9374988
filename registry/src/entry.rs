use serde::{Deserialize, Serialize};
use std::fs::Metadata;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

/// Device/inode pair identifying a file independently of the path used to reach it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileIdentity {
    pub device: u64,
    pub inode: u64,
}

impl FileIdentity {
    pub fn from_metadata(metadata: &Metadata) -> Self {
        Self {
            device: metadata.dev(),
            inode: metadata.ino(),
        }
    }

    /// Stat `path`, following symlinks, and return the identity of its target.
    pub fn of(path: &Path) -> io::Result<Self> {
        std::fs::metadata(path).map(|metadata| Self::from_metadata(&metadata))
    }
}

/// One discovered ptest
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestEntry {
    /// Test identifier (the package directory name)
    pub name: String,
    /// Path to the `run-ptest` entry point
    pub runner_path: PathBuf,
    /// Identity of `runner_path` at the time the entry was created
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub identity: Option<FileIdentity>,
}

impl TestEntry {
    /// Create an entry, resolving the runner's identity if the file exists.
    pub fn new(name: impl Into<String>, runner_path: impl Into<PathBuf>) -> Self {
        let runner_path = runner_path.into();
        let identity = FileIdentity::of(&runner_path).ok();
        Self {
            name: name.into(),
            runner_path,
            identity,
        }
    }

    /// Create an entry with an already-known identity (saves a second stat).
    pub fn with_identity(
        name: impl Into<String>,
        runner_path: impl Into<PathBuf>,
        identity: FileIdentity,
    ) -> Self {
        Self {
            name: name.into(),
            runner_path: runner_path.into(),
            identity: Some(identity),
        }
    }

    /// Directory holding the runner; the test executes with this as its cwd.
    pub fn ptest_dir(&self) -> &Path {
        self.runner_path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ptest_dir() {
        let entry = TestEntry::new("glibc", "/usr/lib/glibc/ptest/run-ptest");
        assert_eq!(entry.ptest_dir(), Path::new("/usr/lib/glibc/ptest"));

        let bare = TestEntry::new("bare", "run-ptest");
        assert_eq!(bare.ptest_dir(), Path::new("."));
    }

    #[test]
    fn test_missing_runner_has_no_identity() {
        let entry = TestEntry::new("ghost", "/nonexistent/ghost/ptest/run-ptest");
        assert!(entry.identity.is_none());
    }

    #[test]
    fn test_identity_follows_symlinks() {
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("run-ptest");
        std::fs::write(&real, "#!/bin/sh\n").unwrap();
        let alias = dir.path().join("alias");
        std::os::unix::fs::symlink(&real, &alias).unwrap();

        assert_eq!(
            FileIdentity::of(&real).unwrap(),
            FileIdentity::of(&alias).unwrap()
        );
    }
}
