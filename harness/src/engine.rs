//! Sequential ptest execution.
//!
//! For every registry entry the engine spawns the runner in its own session,
//! forwards its output as it arrives, kills its process group after a period
//! of silence, and records the outcome on the progress stream and in the XML
//! report. One runner is alive at a time; report order is registry order.
//!
//! Progress stream for one passing and one timed-out ptest:
//!
//! ```text
//! START: ptest-runner
//! 2024-05-01T10:00
//! BEGIN: /usr/lib/zlib/ptest
//! ...runner output...
//! DURATION: 3
//! END: /usr/lib/zlib/ptest
//! 2024-05-01T10:00
//! 2024-05-01T10:00
//! BEGIN: /usr/lib/bash/ptest
//! ...runner output...
//! DURATION: 300
//! ERROR: Exited from signal SIGKILL (9)
//! TIMEOUT: /usr/lib/bash/ptest
//! ...collector output...
//! END: /usr/lib/bash/ptest
//! 2024-05-01T10:05
//! STOP: ptest-runner
//! ```

use crate::config::RunnerConfig;
use crate::diagnostics::{CommandCollector, DiagnosticsCollector};
use crate::process::{classify, OutputStreams, ProcessError, ProcessSpec, StreamPolicy, TestProcess};
use crate::pty;
use ptest_list::{Registry, TestEntry};
use ptest_report::{ExecutionResult, ExitClassification, ReportError, XmlReport};
use serde::Serialize;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

/// Status returned for engine-level failures, distinct from any failure count.
pub const ENGINE_FAILURE_STATUS: i32 = -1;
/// Exit code recorded for a runner that could not be executed.
pub const EXEC_FAILURE_STATUS: i32 = 1;

const READ_BUFFER_SIZE: usize = 4096;
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M";

/// Failures that stop the run before the registry is exhausted
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("Failed to write progress output: {0}")]
    Output(#[source] io::Error),

    #[error("Failed to write report: {0}")]
    Report(#[from] ReportError),
}

impl EngineError {
    pub fn status(&self) -> i32 {
        ENGINE_FAILURE_STATUS
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Per-run engine settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    /// Inactivity window; `None` waits indefinitely
    pub timeout: Option<Duration>,
    /// Name printed with the START/STOP markers
    pub label: String,
    pub stream_policy: StreamPolicy,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self::from(&RunnerConfig::default())
    }
}

impl From<&RunnerConfig> for EngineOptions {
    fn from(config: &RunnerConfig) -> Self {
        Self {
            timeout: config.timeout(),
            label: config.label.clone(),
            stream_policy: config.stream_policy,
        }
    }
}

/// Counts gathered over one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub failed: usize,
    pub timed_out: usize,
}

impl RunSummary {
    fn record(&mut self, result: &ExecutionResult) {
        self.total += 1;
        if result.is_failure() {
            self.failed += 1;
        }
        if result.timed_out {
            self.timed_out += 1;
        }
    }

    /// Process status for the run: the number of failing ptests.
    pub fn status(&self) -> i32 {
        i32::try_from(self.failed).unwrap_or(i32::MAX)
    }
}

pub struct Engine {
    options: EngineOptions,
    diagnostics: Option<Box<dyn DiagnosticsCollector>>,
}

impl Engine {
    pub fn new(options: EngineOptions) -> Self {
        Self {
            options,
            diagnostics: None,
        }
    }

    /// Engine configured from `config`, including its diagnostics command.
    pub fn from_config(config: &RunnerConfig) -> Self {
        let engine = Self::new(EngineOptions::from(config));
        match &config.diagnostics_command {
            Some(command) => engine.with_diagnostics(Box::new(CommandCollector::new(command))),
            None => engine,
        }
    }

    pub fn with_diagnostics(mut self, collector: Box<dyn DiagnosticsCollector>) -> Self {
        self.diagnostics = Some(collector);
        self
    }

    /// Run every ptest in `registry` in order.
    ///
    /// The report, when given, is always finished, including when the run
    /// stops early. Engine errors are also written to `err`.
    pub async fn run<O, E, R>(
        &self,
        registry: &Registry,
        out: &mut O,
        err: &mut E,
        mut report: Option<XmlReport<R>>,
    ) -> EngineResult<RunSummary>
    where
        O: Write,
        E: Write,
        R: Write,
    {
        let outcome = self.run_all(registry, out, err, report.as_mut()).await;
        let finished = match report {
            Some(report) => report.finish().map(drop).map_err(EngineError::from),
            None => Ok(()),
        };

        let result = outcome.and_then(|summary| finished.map(|_| summary));
        match &result {
            Ok(summary) => info!(
                "Ran {} ptests: {} failed, {} timed out",
                summary.total, summary.failed, summary.timed_out
            ),
            Err(e) => {
                let _ = writeln!(err, "ERROR: {}", e);
                let _ = err.flush();
            }
        }
        result
    }

    async fn run_all<O, E, R>(
        &self,
        registry: &Registry,
        out: &mut O,
        err: &mut E,
        mut report: Option<&mut XmlReport<R>>,
    ) -> EngineResult<RunSummary>
    where
        O: Write,
        E: Write,
        R: Write,
    {
        emit(out, format_args!("START: {}", self.options.label))?;
        pty::detach_controlling_terminal();

        let mut summary = RunSummary::default();
        let mut outcome = Ok(());
        for entry in registry {
            let result = match self.run_entry(entry, out, err).await {
                Ok(result) => result,
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            };
            summary.record(&result);
            if let Some(report) = report.as_mut() {
                let classname = entry.ptest_dir().display().to_string();
                if let Err(e) = report.add_case(&classname, &result) {
                    outcome = Err(e.into());
                    break;
                }
            }
        }

        emit(out, format_args!("STOP: {}", self.options.label))?;
        outcome.map(|_| summary)
    }

    async fn run_entry<O: Write, E: Write>(
        &self,
        entry: &TestEntry,
        out: &mut O,
        err: &mut E,
    ) -> EngineResult<ExecutionResult> {
        let ptest_dir = entry.ptest_dir();
        let program = absolute(&entry.runner_path);
        debug!("Starting {} ({})", entry.name, program.display());

        let spec = ProcessSpec {
            program: &program,
            working_dir: ptest_dir,
            stream_policy: self.options.stream_policy,
            terminal: pty::open_or_warn(&entry.name),
        };

        let start = Instant::now();
        let spawned = match TestProcess::spawn(spec) {
            Err(e) if e.is_resource_exhaustion() => return Err(e.into()),
            spawned => spawned,
        };

        emit(out, format_args!("{}", timestamp()))?;
        emit(out, format_args!("BEGIN: {}", ptest_dir.display()))?;

        let (exit, timed_out) = match spawned {
            Ok((mut process, streams)) => {
                let drained = self.drain(&process, streams, out, err).await;
                process.terminate_tree();
                let status = process.wait().await?;
                (classify(status), drained?)
            }
            Err(ProcessError::Spawn { path, source }) => {
                warn!("Could not execute {}: {}", path.display(), source);
                emit(
                    out,
                    format_args!("ERROR: Unable to execute {}: {}", path.display(), source),
                )?;
                (ExitClassification::Exited(EXEC_FAILURE_STATUS), false)
            }
            Err(e) => return Err(e.into()),
        };

        let result = ExecutionResult::new(exit, start.elapsed(), timed_out);
        self.finish_entry(ptest_dir, &result, out).await?;
        Ok(result)
    }

    /// Forward both pipes until they close, killing the group after a
    /// silent window. Returns whether the kill happened.
    async fn drain<O: Write, E: Write>(
        &self,
        process: &TestProcess,
        streams: OutputStreams,
        out: &mut O,
        err: &mut E,
    ) -> EngineResult<bool> {
        let OutputStreams {
            mut stdout,
            mut stderr,
        } = streams;
        let mut stdout_buf = [0u8; READ_BUFFER_SIZE];
        let mut stderr_buf = [0u8; READ_BUFFER_SIZE];
        let mut stdout_open = true;
        let mut stderr_open = true;
        let mut timed_out = false;

        while stdout_open || stderr_open {
            tokio::select! {
                read = stdout.read(&mut stdout_buf), if stdout_open => {
                    stdout_open = forward(read, &stdout_buf, out, "stdout")?;
                }
                read = stderr.read(&mut stderr_buf), if stderr_open => {
                    stderr_open = forward(read, &stderr_buf, err, "stderr")?;
                }
                _ = idle(self.options.timeout, timed_out) => {
                    debug!("No output; killing process group {}", process.id());
                    process.terminate_tree();
                    timed_out = true;
                }
            }
        }
        Ok(timed_out)
    }

    async fn finish_entry<O: Write>(
        &self,
        ptest_dir: &Path,
        result: &ExecutionResult,
        out: &mut O,
    ) -> EngineResult<()> {
        emit(out, format_args!("DURATION: {}", result.duration_secs()))?;

        match &result.exit {
            ExitClassification::Exited(0) => {}
            ExitClassification::Exited(code) => {
                emit(out, format_args!("ERROR: Exit status is {}", code))?
            }
            ExitClassification::Signaled { number, name } => {
                emit(out, format_args!("ERROR: Exited from signal {} ({})", name, number))?
            }
            ExitClassification::Unknown => emit(out, format_args!("ERROR: Unknown exit status"))?,
        }

        if result.timed_out {
            emit(out, format_args!("TIMEOUT: {}", ptest_dir.display()))?;
            self.collect_diagnostics(out).await?;
        }

        emit(out, format_args!("END: {}", ptest_dir.display()))?;
        emit(out, format_args!("{}", timestamp()))
    }

    async fn collect_diagnostics<O: Write>(&self, out: &mut O) -> EngineResult<()> {
        let Some(collector) = &self.diagnostics else {
            return Ok(());
        };
        match collector.collect().await {
            Ok(output) => out.write_all(&output).map_err(EngineError::Output),
            Err(e) => {
                warn!("System data collection by {} failed: {}", collector.name(), e);
                out.write_all(e.partial_output())
                    .map_err(EngineError::Output)?;
                emit(out, format_args!("ERROR: {}", e))
            }
        }
    }
}

/// Resolves after `window` of silence, or never when there is no window or
/// the group has already been killed.
async fn idle(window: Option<Duration>, expired: bool) {
    match window {
        Some(window) if !expired => tokio::time::sleep(window).await,
        _ => std::future::pending().await,
    }
}

/// Copy one read's worth of bytes to `sink`. Returns whether the pipe is
/// still open.
fn forward<W: Write>(
    read: io::Result<usize>,
    buf: &[u8],
    sink: &mut W,
    stream: &str,
) -> EngineResult<bool> {
    match read {
        Ok(0) => Ok(false),
        Ok(n) => {
            sink.write_all(&buf[..n])
                .and_then(|_| sink.flush())
                .map_err(EngineError::Output)?;
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(true),
        Err(e) => {
            warn!("Reading runner {} failed: {}", stream, e);
            Ok(false)
        }
    }
}

fn emit<W: Write>(out: &mut W, line: std::fmt::Arguments<'_>) -> EngineResult<()> {
    writeln!(out, "{}", line)
        .and_then(|_| out.flush())
        .map_err(EngineError::Output)
}

fn timestamp() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Runners are started from their own directory, so a relative path has to
/// be anchored to ours first.
fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(exit: ExitClassification, timed_out: bool) -> ExecutionResult {
        ExecutionResult::new(exit, Duration::from_secs(1), timed_out)
    }

    #[test]
    fn test_summary_counts_each_failure_once() {
        let mut summary = RunSummary::default();
        summary.record(&result(ExitClassification::Exited(0), false));
        summary.record(&result(ExitClassification::Exited(2), false));
        summary.record(&result(
            ExitClassification::Signaled {
                number: 9,
                name: "SIGKILL".to_string(),
            },
            true,
        ));
        summary.record(&result(ExitClassification::Unknown, false));

        assert_eq!(
            summary,
            RunSummary {
                total: 4,
                failed: 3,
                timed_out: 1,
            }
        );
        assert_eq!(summary.status(), 3);
    }

    #[test]
    fn test_engine_error_status_is_sentinel() {
        let error = EngineError::Output(io::Error::new(io::ErrorKind::BrokenPipe, "closed"));
        assert_eq!(error.status(), -1);
        assert!(error.to_string().contains("progress output"));
    }

    #[test]
    fn test_options_from_config() {
        let config = RunnerConfig::default()
            .with_timeout_secs(-1)
            .with_label("nightly")
            .with_stream_policy(StreamPolicy::Separate);
        let options = EngineOptions::from(&config);
        assert_eq!(options.timeout, None);
        assert_eq!(options.label, "nightly");
        assert_eq!(options.stream_policy, StreamPolicy::Separate);
    }

    #[test]
    fn test_forward_end_of_stream() {
        let mut sink = Vec::new();
        assert!(!forward(Ok(0), b"", &mut sink, "stdout").unwrap());
        assert!(forward(Ok(3), b"abcdef", &mut sink, "stdout").unwrap());
        assert_eq!(sink, b"abc");
    }

    #[test]
    fn test_absolute_anchors_relative_paths() {
        let path = absolute(Path::new("zlib/ptest/run-ptest"));
        assert!(path.is_absolute());
        assert!(path.ends_with("zlib/ptest/run-ptest"));
        assert_eq!(
            absolute(Path::new("/usr/lib/zlib/ptest/run-ptest")),
            PathBuf::from("/usr/lib/zlib/ptest/run-ptest")
        );
    }

    #[tokio::test]
    async fn test_empty_registry_emits_start_and_stop() {
        let engine = Engine::new(EngineOptions::default());
        let mut out = Vec::new();
        let mut err = Vec::new();
        let summary = engine
            .run(&Registry::new(), &mut out, &mut err, None::<XmlReport<Vec<u8>>>)
            .await
            .unwrap();

        assert_eq!(summary, RunSummary::default());
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "START: ptest-runner\nSTOP: ptest-runner\n"
        );
        assert!(err.is_empty());
    }

    #[tokio::test]
    async fn test_idle_without_window_never_fires() {
        let fired = tokio::time::timeout(Duration::from_millis(50), idle(None, false)).await;
        assert!(fired.is_err());
        let fired = tokio::time::timeout(
            Duration::from_millis(50),
            idle(Some(Duration::from_millis(1)), true),
        )
        .await;
        assert!(fired.is_err());
    }
}
