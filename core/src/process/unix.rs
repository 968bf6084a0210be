//! Unix process management with safe spawn/kill using process groups
//!
//! Every supervised child is placed in its own process group via `setsid()`
//! so that termination signals reach the command and anything it forked.
//! The child also has its signal mask cleared before `exec`, so the
//! executed program starts with default signal handling and is unaffected
//! by the supervisor's own signal setup.
//!
//! ## Signalling
//!
//! - SIGTERM to the group for graceful termination
//! - SIGKILL to the group for forced termination
//! - `ESRCH` and `EPERM` are treated as "already exited" rather than errors,
//!   since a group may disappear between the registry lookup and the signal

// Process management requires raw libc calls in pre_exec
#![allow(unsafe_code)]

use crate::command::CommandGroup;
use crate::{CoreError, Result};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tracing::{debug, error};

/// A child process running in its own process group
#[derive(Debug)]
pub struct ChildProcess {
    /// The process ID of the spawned process
    pid: Pid,
    /// The underlying Child handle for waiting
    child: Child,
}

impl ChildProcess {
    /// Get the process ID
    pub fn pid(&self) -> u32 {
        self.pid.as_raw() as u32
    }

    /// Get the process group ID (same as PID for session leaders)
    pub fn pgid(&self) -> u32 {
        self.pid.as_raw() as u32
    }

    /// Wait for the process to exit and return its exit status (async)
    pub async fn wait(&mut self) -> Result<std::process::ExitStatus> {
        self.child.wait().await.map_err(|e| {
            CoreError::Supervision(format!("Failed to wait for process {}: {}", self.pid, e))
        })
    }

}

/// Spawn a command group in its own process group.
///
/// The child inherits the supervisor's environment and standard streams
/// (the supervisor does no log capture), runs `setsid()` to become a
/// session and process-group leader, and clears its signal mask so the
/// executed program starts with default dispositions.
///
/// An exec-class failure (missing or unrunnable executable) is returned as
/// a [`CoreError::ProcessSpawn`] for which [`CoreError::is_exec_failure`]
/// is true; callers treat it as an ordinary child death. Any other spawn
/// failure means the process-creation primitive itself failed and is fatal
/// to the supervisor.
pub fn spawn(group: &CommandGroup) -> Result<ChildProcess> {
    debug!("Spawning process: {}", group);

    let mut command = Command::new(group.program());
    command.args(group.args());

    // setsid() and sigprocmask() are async-signal-safe, as required in
    // pre_exec.
    #[deny(unsafe_op_in_unsafe_fn)]
    unsafe {
        command.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            let mut mask: libc::sigset_t = std::mem::zeroed();
            libc::sigemptyset(&mut mask);
            if libc::sigprocmask(libc::SIG_SETMASK, &mask, std::ptr::null_mut()) == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }

    let child = command.spawn().map_err(|e| CoreError::ProcessSpawn {
        command: group.program().to_string(),
        source: e,
    })?;

    // tokio::process::Child::id() may return Option on some platforms
    let raw_pid = child.id().ok_or_else(|| CoreError::Supervision(
        "Spawned child did not have a PID".to_string(),
    ))?;
    let pid = Pid::from_raw(raw_pid as i32);
    debug!("Successfully spawned process {} in new process group", pid);

    Ok(ChildProcess { pid, child })
}

/// Send SIGTERM to a process group for graceful termination
///
/// `ESRCH` (no such process group) and `EPERM` (group already exited and
/// its id was reused by another user's process) are treated as success:
/// in both cases the group we launched is gone.
pub fn signal_term_group(pid: u32) -> Result<()> {
    signal_group(pid, Signal::SIGTERM)
}

/// Send SIGKILL to a process group for forced termination
///
/// SIGKILL cannot be caught or ignored, so a group that receives it will
/// be reaped shortly afterwards. `ESRCH` and `EPERM` are treated as
/// success, as in [`signal_term_group`].
pub fn signal_kill_group(pid: u32) -> Result<()> {
    signal_group(pid, Signal::SIGKILL)
}

fn signal_group(pid: u32, signal: Signal) -> Result<()> {
    let pgid = Pid::from_raw(pid as i32);
    debug!("Sending {} to process group {}", signal, pgid);

    match killpg(pgid, signal) {
        Ok(()) => Ok(()),
        Err(nix::errno::Errno::ESRCH) => {
            debug!("Process group {} already exited", pgid);
            Ok(())
        }
        Err(nix::errno::Errno::EPERM) => {
            debug!(
                "Permission denied signaling process group {} (likely already exited)",
                pgid
            );
            Ok(())
        }
        Err(e) => {
            error!("Failed to send {} to process group {}: {}", signal, pgid, e);
            Err(CoreError::ProcessSignal(format!(
                "Failed to send {} to process group {}: {}",
                signal, pgid, e
            )))
        }
    }
}
