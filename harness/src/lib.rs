pub mod config;
pub mod diagnostics;
pub mod engine;
pub mod listing;
pub mod process;
pub mod pty;

pub use config::{
    timeout_from_secs, ConfigError, ConfigResult, RunnerConfig, DEFAULT_DIAGNOSTICS_COMMAND,
    DEFAULT_DIRECTORY, DEFAULT_LABEL, DEFAULT_TIMEOUT_SECS,
};
pub use diagnostics::{
    CommandCollector, DiagnosticsCollector, DiagnosticsError, DiagnosticsResult,
    DIAGNOSTICS_TIMEOUT,
};
pub use engine::{
    Engine, EngineError, EngineOptions, EngineResult, RunSummary, ENGINE_FAILURE_STATUS,
    EXEC_FAILURE_STATUS,
};
pub use listing::{print_ptests, print_ptests_json, NO_PTESTS_FOUND};
pub use process::{classify, OutputStreams, ProcessError, ProcessSpec, StreamPolicy, TestProcess};
pub use pty::{detach_controlling_terminal, Pty, PtyError};
