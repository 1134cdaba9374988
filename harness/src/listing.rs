use ptest_list::{Registry, TestEntry};
use std::io::{self, Write};

pub const NO_PTESTS_FOUND: &str = "No ptests found.";

/// Print `Available ptests:` and one `name<TAB>runner` line per entry.
pub fn print_ptests<W: Write>(registry: &Registry, out: &mut W) -> io::Result<()> {
    if registry.is_empty() {
        return writeln!(out, "{}", NO_PTESTS_FOUND);
    }
    writeln!(out, "Available ptests:")?;
    for entry in registry {
        writeln!(out, "{}\t{}", entry.name, entry.runner_path.display())?;
    }
    Ok(())
}

/// Print the registry as a JSON array, in registry order.
pub fn print_ptests_json<W: Write>(registry: &Registry, out: &mut W) -> serde_json::Result<()> {
    let entries: Vec<&TestEntry> = registry.iter().collect();
    serde_json::to_writer_pretty(&mut *out, &entries)?;
    writeln!(out).map_err(serde_json::Error::io)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Registry {
        let mut registry = Registry::new();
        registry
            .add("bash", "/usr/lib/bash/ptest/run-ptest")
            .unwrap();
        registry
            .add("zlib", "/usr/lib/zlib/ptest/run-ptest")
            .unwrap();
        registry
    }

    #[test]
    fn test_print_ptests() {
        let mut out = Vec::new();
        print_ptests(&sample(), &mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Available ptests:\n\
             bash\t/usr/lib/bash/ptest/run-ptest\n\
             zlib\t/usr/lib/zlib/ptest/run-ptest\n"
        );
    }

    #[test]
    fn test_print_empty() {
        let mut out = Vec::new();
        print_ptests(&Registry::new(), &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "No ptests found.\n");
    }

    #[test]
    fn test_print_json() {
        let mut out = Vec::new();
        print_ptests_json(&sample(), &mut out).unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&out).unwrap();
        let names: Vec<&str> = parsed
            .as_array()
            .unwrap()
            .iter()
            .map(|entry| entry["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["bash", "zlib"]);
        assert_eq!(parsed[1]["runner_path"], "/usr/lib/zlib/ptest/run-ptest");
    }
}
