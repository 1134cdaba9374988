use crate::list::{Registry, RegistryError, RegistryResult};

/// Project the named entries of `registry` into a new, independently owned
/// registry, in the order the names are given.
///
/// Every name must be present; a single miss fails the whole call and nothing
/// is returned. Repeated names are kept once. `registry` is never modified.
pub fn filter<S: AsRef<str>>(registry: &Registry, names: &[S]) -> RegistryResult<Registry> {
    if names.is_empty() {
        return Err(RegistryError::InvalidArgument {
            reason: "at least one ptest name is required".to_string(),
        });
    }

    let mut selected = Registry::new();
    for name in names {
        let name = name.as_ref();
        if name.is_empty() {
            return Err(RegistryError::InvalidArgument {
                reason: "ptest name must not be empty".to_string(),
            });
        }
        if selected.contains(name) {
            continue;
        }

        let entry = registry
            .search(name)
            .ok_or_else(|| RegistryError::NotFound {
                name: name.to_string(),
            })?;
        selected.insert(entry.clone())?;
    }

    Ok(selected)
}
