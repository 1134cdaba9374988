//! Pseudo-terminal and controlling-terminal plumbing.
//!
//! Everything terminal-specific the engine needs lives here: allocating a
//! pty pair for a runner, detaching the harness from its own terminal, and
//! the child-side ioctl that adopts the slave as controlling terminal.

use nix::pty::{openpty, OpenptyResult, Winsize};
use nix::sys::termios::{tcgetsid, Termios};
use nix::unistd::{getpid, getsid, getuid};
use std::fs::{File, Permissions};
use std::io::{self, IsTerminal};
use std::os::fd::OwnedFd;
use std::os::unix::fs::PermissionsExt;
use thiserror::Error;
use tracing::{debug, warn};

/// Mode applied to the slave side: owner read/write, group write.
const SLAVE_MODE: u32 = 0o620;

/// Pseudo-terminal setup errors; never fatal to a run
#[derive(Error, Debug)]
pub enum PtyError {
    #[error("Failed to allocate pseudo-terminal: {0}")]
    Allocate(#[source] nix::Error),

    #[error("Failed to set pseudo-terminal ownership: {0}")]
    Ownership(#[source] io::Error),
}

/// An allocated master/slave pair
#[derive(Debug)]
pub struct Pty {
    master: OwnedFd,
    slave: OwnedFd,
}

impl Pty {
    /// Allocate a pair whose slave is owned by the invoking user.
    pub fn open() -> Result<Self, PtyError> {
        let OpenptyResult { master, slave } =
            openpty(None::<&Winsize>, None::<&Termios>).map_err(PtyError::Allocate)?;

        std::os::unix::fs::fchown(&slave, Some(getuid().as_raw()), None)
            .map_err(PtyError::Ownership)?;
        let slave = File::from(slave);
        slave
            .set_permissions(Permissions::from_mode(SLAVE_MODE))
            .map_err(PtyError::Ownership)?;

        Ok(Self {
            master,
            slave: OwnedFd::from(slave),
        })
    }

    /// Split into (master, slave). The master must outlive the child.
    pub fn into_parts(self) -> (OwnedFd, OwnedFd) {
        (self.master, self.slave)
    }
}

/// Give up the harness's controlling terminal, if stdin is it.
///
/// Skipped when the harness leads its own session, where the ioctl would
/// hang up the whole foreground group, and when the terminal on stdin
/// belongs to another session or was already given up.
pub fn detach_controlling_terminal() {
    let stdin = io::stdin();
    let is_tty = stdin.is_terminal();
    let own_sid = getsid(None).ok();
    let session_leader = own_sid == Some(getpid());
    let owns_terminal = is_tty && own_sid.is_some() && tcgetsid(&stdin).ok() == own_sid;

    if !should_detach(is_tty, session_leader, owns_terminal) {
        debug!(
            "Keeping terminal state (tty: {}, session leader: {}, owns terminal: {})",
            is_tty, session_leader, owns_terminal
        );
        return;
    }
    if unsafe { libc::ioctl(libc::STDIN_FILENO, libc::TIOCNOTTY) } == -1 {
        warn!(
            "Failed to detach controlling terminal: {}",
            io::Error::last_os_error()
        );
    }
}

fn should_detach(is_tty: bool, session_leader: bool, owns_terminal: bool) -> bool {
    is_tty && !session_leader && owns_terminal
}

/// Adopt the terminal on stdin as the caller's controlling terminal.
///
/// Runs in the forked child between `setsid` and `exec`, so it must stay
/// async-signal-safe: no allocation, no locks.
pub(crate) fn acquire_controlling_terminal() -> io::Result<()> {
    if unsafe { libc::ioctl(libc::STDIN_FILENO, libc::TIOCSCTTY, 0) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Allocate a pty for a runner, logging and returning `None` on failure.
pub fn open_or_warn(ptest: &str) -> Option<Pty> {
    match Pty::open() {
        Ok(pty) => Some(pty),
        Err(e) => {
            warn!("Running {} without a terminal: {}", ptest, e);
            None
        }
    }
}
