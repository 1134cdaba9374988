use ptest_list::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn install(root: &Path, name: &str) {
    let dir = root.join(name).join(PTEST_SUBDIR);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(RUNNER_NAME), "#!/bin/sh\n").unwrap();
}

#[test]
fn test_discover_filter_exclude() {
    let usr_lib = TempDir::new().unwrap();
    let usr_lib64 = TempDir::new().unwrap();
    for name in ["bash", "glibc", "zlib"] {
        install(usr_lib.path(), name);
    }
    for name in ["openssl", "zlib"] {
        install(usr_lib64.path(), name);
    }

    let registry = discover_all(&[usr_lib.path(), usr_lib64.path()]).unwrap();
    let names: Vec<&str> = registry.names().collect();
    assert_eq!(names, vec!["bash", "glibc", "zlib", "openssl"]);
    assert!(registry
        .search("zlib")
        .unwrap()
        .runner_path
        .starts_with(fs::canonicalize(usr_lib.path()).unwrap()));

    let mut selected = filter(&registry, &["openssl", "bash", "glibc"]).unwrap();
    assert_eq!(selected.len(), 3);
    assert_eq!(registry.len(), 4);

    let removed = selected.remove("glibc").unwrap();
    assert_eq!(removed.name, "glibc");
    let names: Vec<&str> = selected.names().collect();
    assert_eq!(names, vec!["openssl", "bash"]);
    let backwards: Vec<&str> = selected.iter().rev().map(|e| e.name.as_str()).collect();
    assert_eq!(backwards, vec!["bash", "openssl"]);

    assert_eq!(
        filter(&registry, &["bash", "perl"]).unwrap_err(),
        RegistryError::NotFound {
            name: "perl".to_string()
        }
    );
    assert_eq!(registry.len(), 4);
}

#[test]
fn test_ptest_dir_is_runner_parent() {
    let root = TempDir::new().unwrap();
    install(root.path(), "zlib");
    let registry = discover(root.path()).unwrap();
    let entry = registry.first().unwrap();

    assert_eq!(
        entry.ptest_dir(),
        fs::canonicalize(root.path()).unwrap().join("zlib").join("ptest")
    );
}
