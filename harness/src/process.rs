//! Child-process abstraction for ptest runners.
//!
//! A runner is spawned as the leader of a fresh session (and therefore of a
//! fresh process group) so that [`TestProcess::terminate_tree`] reaches every
//! descendant it starts. The session setup runs in a `pre_exec` hook; that
//! code executes between `fork` and `exec` and only makes async-signal-safe
//! calls.

use crate::pty::{self, Pty};
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::{getpgrp, setpgid, setsid, Pid};
use ptest_report::ExitClassification;
use serde::{Deserialize, Serialize};
use std::io;
use std::os::fd::{OwnedFd, RawFd};
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use thiserror::Error;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tracing::warn;

/// Upper bound on the descriptor numbers swept before `exec`.
const FD_SWEEP_CEILING: libc::c_long = 65_536;
/// Sweep bound used when the open-file limit cannot be queried.
const FD_SWEEP_FALLBACK: RawFd = 1_024;

/// What happens to a runner's stderr
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum StreamPolicy {
    /// stderr is written into the stdout pipe, keeping one ordered stream
    #[default]
    Merged,
    /// stderr has its own pipe and is forwarded to the error sink
    Separate,
}

/// Process management errors
#[derive(Error, Debug)]
pub enum ProcessError {
    /// Creating pipes, forking or executing the runner failed
    #[error("Failed to spawn '{path}': {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A piped stream was not handed back by the runtime
    #[error("Failed to capture {stream} of '{path}'")]
    MissingPipe { path: PathBuf, stream: &'static str },

    /// Reaping the runner failed
    #[error("Failed to wait for '{path}': {source}")]
    Wait {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ProcessError {
    /// True when the failure is the system running out of processes,
    /// descriptors or memory, as opposed to this runner being unusable.
    pub fn is_resource_exhaustion(&self) -> bool {
        match self {
            ProcessError::Spawn { source, .. } => matches!(
                source.raw_os_error().map(Errno::from_raw),
                Some(Errno::EMFILE | Errno::ENFILE | Errno::EAGAIN | Errno::ENOMEM)
            ),
            ProcessError::MissingPipe { .. } | ProcessError::Wait { .. } => true,
        }
    }
}

/// How to launch one runner
#[derive(Debug)]
pub struct ProcessSpec<'a> {
    pub program: &'a Path,
    pub working_dir: &'a Path,
    pub stream_policy: StreamPolicy,
    /// Terminal to attach as the runner's controlling tty
    pub terminal: Option<Pty>,
}

/// Read ends of the runner's output pipes
#[derive(Debug)]
pub struct OutputStreams {
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
}

/// A running ptest and the resources that must live as long as it does
#[derive(Debug)]
pub struct TestProcess {
    child: Child,
    group: Pid,
    path: PathBuf,
    _terminal: Option<OwnedFd>,
}

impl TestProcess {
    /// Start `spec.program` with no arguments beyond argv[0].
    pub fn spawn(spec: ProcessSpec<'_>) -> Result<(Self, OutputStreams), ProcessError> {
        let path = spec.program.to_path_buf();
        let mut command = Command::new(spec.program);
        command
            .current_dir(spec.working_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let master = match spec.terminal {
            Some(terminal) => {
                let (master, slave) = terminal.into_parts();
                command.stdin(Stdio::from(slave));
                Some(master)
            }
            None => {
                command.stdin(Stdio::null());
                None
            }
        };

        let parent_group = getpgrp();
        let has_terminal = master.is_some();
        let merge_stderr = spec.stream_policy == StreamPolicy::Merged;
        let sweep_limit = fd_sweep_limit();
        // SAFETY: the hook only issues raw syscalls on values captured by copy.
        unsafe {
            command.pre_exec(move || {
                enter_session(parent_group, has_terminal, merge_stderr, sweep_limit)
            });
        }

        let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
            path: path.clone(),
            source,
        })?;

        let group = child
            .id()
            .and_then(|id| i32::try_from(id).ok())
            .map(Pid::from_raw)
            .ok_or_else(|| ProcessError::Spawn {
                path: path.clone(),
                source: io::Error::new(io::ErrorKind::Other, "runner exited before it was tracked"),
            })?;
        let stdout = child.stdout.take().ok_or_else(|| ProcessError::MissingPipe {
            path: path.clone(),
            stream: "stdout",
        })?;
        let stderr = child.stderr.take().ok_or_else(|| ProcessError::MissingPipe {
            path: path.clone(),
            stream: "stderr",
        })?;

        Ok((
            Self {
                child,
                group,
                path,
                _terminal: master,
            },
            OutputStreams { stdout, stderr },
        ))
    }

    /// Process id of the runner, which is also its process-group id.
    pub fn id(&self) -> Pid {
        self.group
    }

    /// SIGKILL the runner's whole process group.
    ///
    /// Returns false when the group no longer exists or could not be signalled.
    pub fn terminate_tree(&self) -> bool {
        match killpg(self.group, Signal::SIGKILL) {
            Ok(()) => true,
            Err(Errno::ESRCH) => false,
            Err(e) => {
                warn!(
                    "Failed to kill process group {} of {}: {}",
                    self.group,
                    self.path.display(),
                    e
                );
                false
            }
        }
    }

    /// Block until the runner itself exits and return its status.
    pub async fn wait(&mut self) -> Result<ExitStatus, ProcessError> {
        self.child.wait().await.map_err(|source| ProcessError::Wait {
            path: self.path.clone(),
            source,
        })
    }
}

/// Classify a reaped runner's status.
pub fn classify(status: ExitStatus) -> ExitClassification {
    if let Some(code) = status.code() {
        ExitClassification::Exited(code)
    } else if let Some(number) = status.signal() {
        ExitClassification::Signaled {
            number,
            name: signal_name(number),
        }
    } else {
        ExitClassification::Unknown
    }
}

fn signal_name(number: i32) -> String {
    Signal::try_from(number)
        .map(|signal| signal.as_str().to_string())
        .unwrap_or_else(|_| format!("SIG{}", number))
}

/// Child side of [`TestProcess::spawn`], run after stdio and cwd are set up.
fn enter_session(
    parent_group: Pid,
    has_terminal: bool,
    merge_stderr: bool,
    sweep_limit: RawFd,
) -> io::Result<()> {
    // Already true after fork; a failure here is harmless.
    let _ = setpgid(Pid::from_raw(0), parent_group);
    setsid()?;

    if has_terminal {
        let _ = pty::acquire_controlling_terminal();
    }

    if merge_stderr && unsafe { libc::dup2(libc::STDOUT_FILENO, libc::STDERR_FILENO) } == -1 {
        return Err(io::Error::last_os_error());
    }

    mark_inherited_fds_cloexec(sweep_limit);
    Ok(())
}

/// Flag every descriptor above stderr close-on-exec.
///
/// Marking rather than closing keeps the runtime's own exec-status pipe
/// working, so exec failures are still reported to the parent.
fn mark_inherited_fds_cloexec(limit: RawFd) {
    for fd in (libc::STDERR_FILENO + 1)..limit {
        unsafe {
            let flags = libc::fcntl(fd, libc::F_GETFD);
            if flags >= 0 && flags & libc::FD_CLOEXEC == 0 {
                libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC);
            }
        }
    }
}

fn fd_sweep_limit() -> RawFd {
    let max = unsafe { libc::sysconf(libc::_SC_OPEN_MAX) };
    if max <= 0 {
        FD_SWEEP_FALLBACK
    } else {
        RawFd::try_from(max.min(FD_SWEEP_CEILING)).unwrap_or(FD_SWEEP_FALLBACK)
    }
}
