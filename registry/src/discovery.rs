//! Discovery of installed ptests.
//!
//! A package ships a ptest when `<root>/<package>/ptest/run-ptest` exists and is
//! a regular file. Children of the root are scanned in lexicographic order,
//! which fixes execution and report order downstream.

use crate::entry::{FileIdentity, TestEntry};
use crate::list::{Registry, RegistryError};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Directory below each package holding the runner
pub const PTEST_SUBDIR: &str = "ptest";
/// File name of the runner
pub const RUNNER_NAME: &str = "run-ptest";

/// Errors raised while scanning a ptest root
#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// The root could not be resolved to a canonical path
    #[error("Directory '{path}' not found: {source}")]
    RootNotFound {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The root exists but is not a directory
    #[error("'{path}' is not a directory")]
    NotADirectory { path: PathBuf },

    /// Listing the root failed part-way through
    #[error("Failed to scan '{path}': {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Inserting a candidate failed
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

/// Expected runner location for a package directory below `root`.
pub fn runner_path(root: &Path, package: &str) -> PathBuf {
    root.join(package).join(PTEST_SUBDIR).join(RUNNER_NAME)
}

/// Discover the ptests installed below `root`.
pub fn discover(root: impl AsRef<Path>) -> DiscoveryResult<Registry> {
    let mut registry = Registry::new();
    discover_into(&mut registry, root.as_ref())?;
    Ok(registry)
}

/// Discover several roots into one registry.
///
/// Identity deduplication spans all roots. A package name already found under
/// an earlier root is skipped. Any failing root fails the whole call.
pub fn discover_all<P: AsRef<Path>>(roots: &[P]) -> DiscoveryResult<Registry> {
    let mut registry = Registry::new();
    for root in roots {
        discover_into(&mut registry, root.as_ref())?;
    }
    Ok(registry)
}

/// Scan `root` and append its ptests to `registry`; returns how many were added.
///
/// On error `registry` may hold entries from this root; callers that must not
/// observe partial state should scan into a fresh registry, as
/// [`discover`] and [`discover_all`] do.
pub fn discover_into(registry: &mut Registry, root: &Path) -> DiscoveryResult<usize> {
    let root = fs::canonicalize(root).map_err(|source| DiscoveryError::RootNotFound {
        path: root.to_path_buf(),
        source,
    })?;

    let metadata = fs::metadata(&root).map_err(|source| DiscoveryError::RootNotFound {
        path: root.clone(),
        source,
    })?;
    if !metadata.is_dir() {
        return Err(DiscoveryError::NotADirectory { path: root });
    }

    let mut added = 0;
    for package in sorted_children(&root)? {
        let candidate = runner_path(&root, &package);

        let metadata = match fs::metadata(&candidate) {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => {
                debug!("Skipping {}: runner is not a regular file", package);
                continue;
            }
            Err(_) => continue,
        };

        let identity = FileIdentity::from_metadata(&metadata);
        if let Some(existing) = registry.search_by_identity(identity) {
            debug!(
                "Skipping {}: {} is the same file as ptest {}",
                package,
                candidate.display(),
                existing.name
            );
            continue;
        }

        if registry.contains(&package) {
            warn!(
                "Skipping {}: a ptest with this name was already discovered",
                candidate.display()
            );
            continue;
        }

        registry.insert(TestEntry::with_identity(package, candidate, identity))?;
        added += 1;
    }

    debug!("Discovered {} ptests in {}", added, root.display());
    Ok(added)
}

fn sorted_children(root: &Path) -> DiscoveryResult<Vec<String>> {
    let scan_error = |source| DiscoveryError::Scan {
        path: root.to_path_buf(),
        source,
    };

    let mut children = Vec::new();
    for dirent in fs::read_dir(root).map_err(scan_error)? {
        let dirent = dirent.map_err(scan_error)?;
        match dirent.file_name().into_string() {
            Ok(name) if name != "." && name != ".." => children.push(name),
            Ok(_) => {}
            Err(raw) => warn!("Skipping non UTF-8 directory entry {:?}", raw),
        }
    }
    children.sort();
    Ok(children)
}
