use clap::Parser;
use harness::{print_ptests, print_ptests_json, Engine, RunnerConfig, StreamPolicy, NO_PTESTS_FOUND};
use ptest_list::{discover_all, filter, RegistryError};
use ptest_report::XmlReport;
use std::io::{self, Write};
use std::path::PathBuf;
use tracing::debug;

#[derive(Parser)]
#[command(name = "ptest-runner")]
#[command(about = "Run the package tests (ptests) installed on this system")]
#[command(version)]
struct Cli {
    /// Directory to search for ptests (repeatable, default /usr/lib)
    #[arg(short, long = "directory", value_name = "DIR")]
    directories: Vec<PathBuf>,
    /// List the available ptests and exit
    #[arg(short, long)]
    list: bool,
    /// Print the list as JSON
    #[arg(long, requires = "list")]
    json: bool,
    /// Seconds without output before a ptest is killed (0 or less waits forever)
    #[arg(short, long, value_name = "SECS", allow_negative_numbers = true)]
    timeout: Option<i64>,
    /// Write a JUnit-style XML report to FILE
    #[arg(short = 'x', long = "xml", value_name = "FILE")]
    xml: Option<PathBuf>,
    /// Skip the named ptest (repeatable)
    #[arg(short, long, value_name = "PTEST")]
    exclude: Vec<String>,
    /// Read settings from a TOML file; flags take precedence
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Whether runner stderr is merged into stdout or kept separate
    #[arg(long = "stderr", value_enum, value_name = "POLICY")]
    stream_policy: Option<StreamPolicy>,
    /// Command run after a timeout to collect system data
    #[arg(long, value_name = "CMD", conflicts_with = "no_diagnostics")]
    diagnostics: Option<PathBuf>,
    /// Do not collect system data after a timeout
    #[arg(long)]
    no_diagnostics: bool,
    /// ptests to run (default: all)
    #[arg(value_name = "PTEST")]
    ptests: Vec<String>,
}

impl Cli {
    fn into_config(self) -> Result<(RunnerConfig, Options), Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => RunnerConfig::load(path)?,
            None => RunnerConfig::default(),
        };

        if !self.directories.is_empty() {
            config = config.with_directories(self.directories);
        }
        if let Some(timeout) = self.timeout {
            config = config.with_timeout_secs(timeout);
        }
        if let Some(xml) = self.xml {
            config = config.with_xml_path(xml);
        }
        if let Some(policy) = self.stream_policy {
            config = config.with_stream_policy(policy);
        }
        if self.no_diagnostics {
            config = config.with_diagnostics_command(None);
        } else if let Some(command) = self.diagnostics {
            config = config.with_diagnostics_command(Some(command));
        }
        config.exclude.extend(self.exclude);
        config.validate()?;

        let options = Options {
            list: self.list,
            json: self.json,
            ptests: self.ptests,
        };
        Ok((config, options))
    }
}

/// Flags that pick what to do rather than how to run
struct Options {
    list: bool,
    json: bool,
    ptests: Vec<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let status = match run(cli).await {
        Ok(status) => status,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            1
        }
    };

    let _ = io::stdout().flush();
    std::process::exit(exit_code(status));
}

/// Fold a run status into the 0..=255 range the OS keeps. Failure counts
/// saturate at 254 so a multiple of 256 never reads as success, and 255 is
/// left for engine failures.
fn exit_code(status: i32) -> i32 {
    if status < 0 {
        255
    } else {
        status.min(254)
    }
}

async fn run(cli: Cli) -> Result<i32, Box<dyn std::error::Error>> {
    let (config, options) = cli.into_config()?;

    let registry = match discover_all(&config.directories) {
        Ok(registry) => registry,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            eprintln!("{}", NO_PTESTS_FOUND);
            return Ok(1);
        }
    };
    if registry.is_empty() {
        eprintln!("{}", NO_PTESTS_FOUND);
        return Ok(1);
    }

    if options.list {
        let mut stdout = io::stdout();
        if options.json {
            print_ptests_json(&registry, &mut stdout)?;
        } else {
            print_ptests(&registry, &mut stdout)?;
        }
        return Ok(0);
    }

    let mut selected = if options.ptests.is_empty() {
        registry
    } else {
        match filter(&registry, &options.ptests) {
            Ok(selected) => selected,
            Err(e @ RegistryError::NotFound { .. }) => {
                eprintln!("{}", e);
                return Ok(1);
            }
            Err(e) => return Err(e.into()),
        }
    };

    for name in &config.exclude {
        if selected.remove(name).is_none() {
            debug!("Excluded ptest {} is not in the run", name);
        }
    }

    let report = match &config.xml_path {
        Some(path) => Some(XmlReport::create(selected.len(), path)?),
        None => None,
    };

    let engine = Engine::from_config(&config);
    let mut stdout = io::stdout();
    let mut stderr = io::stderr();
    let status = match engine.run(&selected, &mut stdout, &mut stderr, report).await {
        Ok(summary) => summary.status(),
        Err(e) => e.status(),
    };
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use harness::ENGINE_FAILURE_STATUS;

    #[test]
    fn test_exit_code() {
        assert_eq!(exit_code(0), 0);
        assert_eq!(exit_code(3), 3);
        assert_eq!(exit_code(254), 254);
        assert_eq!(exit_code(256), 254);
        assert_eq!(exit_code(512), 254);
        assert_eq!(exit_code(ENGINE_FAILURE_STATUS), 255);
    }
}
