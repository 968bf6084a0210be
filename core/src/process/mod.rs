//! Process management for the herder supervisor
//!
//! Children are spawned into their own process groups so that graceful and
//! forced termination reach the whole process tree a command may have
//! created. The [`ProcessAdapter`] trait abstracts spawning and signalling
//! so the supervision logic can be exercised against a mock in tests.

pub mod adapters;

#[cfg(unix)]
pub mod unix;

pub use adapters::{ManagedProcess, ProcessAdapter};

#[cfg(unix)]
pub use adapters::UnixProcessAdapter;

pub use adapters::MockProcessAdapter;

/// Exit details of a reaped child process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessExit {
    /// Process id of the child that exited
    pub pid: u32,
    /// Exit code, if the child exited normally
    pub code: Option<i32>,
    /// Terminating signal number, if the child was killed by a signal
    pub signal: Option<i32>,
}

impl std::fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "pid {} exited with code {}", self.pid, code),
            (None, Some(sig)) => write!(f, "pid {} killed by signal {}", self.pid, sig),
            (None, None) => write!(f, "pid {} exited", self.pid),
        }
    }
}
