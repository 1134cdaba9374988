use async_trait::async_trait;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

/// How long a collector may run before it is abandoned.
pub const DIAGNOSTICS_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Error, Debug)]
pub enum DiagnosticsError {
    #[error("Unable to run {program}: {source}")]
    Launch {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The collector ran but did not succeed; whatever it printed is kept
    #[error("{program} exited with {status}")]
    Failed {
        program: PathBuf,
        status: ExitStatus,
        output: Vec<u8>,
    },

    #[error("{program} did not finish within {timeout}s")]
    TimedOut { program: PathBuf, timeout: u64 },
}

impl DiagnosticsError {
    /// Output captured before the failure, if any.
    pub fn partial_output(&self) -> &[u8] {
        match self {
            DiagnosticsError::Failed { output, .. } => output,
            _ => &[],
        }
    }
}

pub type DiagnosticsResult<T> = Result<T, DiagnosticsError>;

/// Captures system state after a ptest times out
#[async_trait]
pub trait DiagnosticsCollector: Send + Sync {
    /// Run the collection and return its raw output.
    async fn collect(&self) -> DiagnosticsResult<Vec<u8>>;
    fn name(&self) -> &str;
}

/// Collector backed by an external command, run with no arguments
#[derive(Debug, Clone)]
pub struct CommandCollector {
    program: PathBuf,
    name: String,
    limit: Duration,
}

impl CommandCollector {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        let program = program.into();
        let name = program.display().to_string();
        Self {
            program,
            name,
            limit: DIAGNOSTICS_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, limit: Duration) -> Self {
        self.limit = limit;
        self
    }
}

#[async_trait]
impl DiagnosticsCollector for CommandCollector {
    async fn collect(&self) -> DiagnosticsResult<Vec<u8>> {
        debug!("Collecting system data with {}", self.name);
        let run = Command::new(&self.program)
            .stdin(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .output();

        let output = timeout(self.limit, run)
            .await
            .map_err(|_| DiagnosticsError::TimedOut {
                program: self.program.clone(),
                timeout: self.limit.as_secs(),
            })?
            .map_err(|source| DiagnosticsError::Launch {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(DiagnosticsError::Failed {
                program: self.program.clone(),
                status: output.status,
                output: output.stdout,
            });
        }
        Ok(output.stdout)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
