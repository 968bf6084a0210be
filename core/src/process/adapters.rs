//! Process adapters for abstracting process management
//!
//! The supervision loop never talks to the OS directly; it spawns through a
//! [`ProcessAdapter`] and signals by process id. This keeps the registry
//! and shutdown logic testable against [`MockProcessAdapter`], whose
//! children exit only when a test says so.

use crate::command::CommandGroup;
use crate::process::ProcessExit;
use crate::{CoreError, Result};
use async_trait::async_trait;
use tracing::debug;

/// Trait for spawning and signalling supervised processes
#[async_trait]
pub trait ProcessAdapter: Send + Sync {
    /// Spawn a new managed process for the given command group
    async fn spawn(&self, group: &CommandGroup) -> Result<Box<dyn ManagedProcess>>;

    /// Send a graceful-termination signal to the process (group) with the
    /// given id. An id that no longer exists is not an error.
    fn terminate(&self, pid: u32) -> Result<()>;

    /// Send a forced, non-ignorable termination signal to the process
    /// (group) with the given id. An id that no longer exists is not an
    /// error.
    fn kill(&self, pid: u32) -> Result<()>;
}

/// A spawned process that can be waited on exactly once
#[async_trait]
pub trait ManagedProcess: Send + Sync {
    /// Get the process ID
    fn pid(&self) -> u32;

    /// Wait for the process to exit
    async fn wait(&mut self) -> Result<ProcessExit>;
}

/// Unix process adapter backed by process groups
#[cfg(unix)]
#[derive(Copy, Clone, Debug, Default)]
pub struct UnixProcessAdapter;

#[cfg(unix)]
impl UnixProcessAdapter {
    /// Create a new Unix process adapter
    pub fn new() -> Self {
        Self
    }
}

#[cfg(unix)]
#[async_trait]
impl ProcessAdapter for UnixProcessAdapter {
    async fn spawn(&self, group: &CommandGroup) -> Result<Box<dyn ManagedProcess>> {
        use crate::process::unix;

        let child = unix::spawn(group)?;
        Ok(Box::new(UnixManagedProcess { child }))
    }

    fn terminate(&self, pid: u32) -> Result<()> {
        crate::process::unix::signal_term_group(pid)
    }

    fn kill(&self, pid: u32) -> Result<()> {
        crate::process::unix::signal_kill_group(pid)
    }
}

/// Unix managed process implementation
#[cfg(unix)]
struct UnixManagedProcess {
    child: crate::process::unix::ChildProcess,
}

#[cfg(unix)]
#[async_trait]
impl ManagedProcess for UnixManagedProcess {
    fn pid(&self) -> u32 {
        self.child.pid()
    }

    async fn wait(&mut self) -> Result<ProcessExit> {
        let exit_status = self.child.wait().await?;

        let (code, signal) = if let Some(code) = exit_status.code() {
            (Some(code), None)
        } else {
            use std::os::unix::process::ExitStatusExt;
            (None, exit_status.signal())
        };

        Ok(ProcessExit {
            pid: self.pid(),
            code,
            signal,
        })
    }
}

/// Mock process adapter for testing
///
/// Spawned mock processes stay alive until the adapter is told otherwise:
/// [`MockProcessAdapter::exit`] simulates a natural death, `terminate`
/// delivers a SIGTERM-like exit unless the adapter was built with
/// [`MockProcessAdapter::ignoring_term`], and `kill` always works.
#[derive(Debug, Clone, Default)]
pub struct MockProcessAdapter {
    state: std::sync::Arc<std::sync::Mutex<MockState>>,
}

#[derive(Debug)]
struct MockState {
    next_pid: u32,
    /// pid -> exit trigger for processes that have not exited yet
    pending: std::collections::HashMap<u32, tokio::sync::oneshot::Sender<ProcessExit>>,
    /// every spawn in order: (pid, argv)
    spawned: Vec<(u32, Vec<String>)>,
    /// scripted error kinds for upcoming spawns, consumed front-first
    fail_next: std::collections::VecDeque<std::io::ErrorKind>,
    /// whether mock processes ignore graceful termination
    ignore_term: bool,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            next_pid: 1000,
            pending: Default::default(),
            spawned: Vec::new(),
            fail_next: Default::default(),
            ignore_term: false,
        }
    }
}

impl MockProcessAdapter {
    /// Create a new mock adapter whose processes respond to signals
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock adapter whose processes ignore graceful termination,
    /// forcing the shutdown coordinator to escalate.
    pub fn ignoring_term() -> Self {
        let adapter = Self::default();
        adapter.state.lock().unwrap().ignore_term = true;
        adapter
    }

    /// Script the next spawn to fail with the given error kind
    pub fn fail_next_spawn(&self, kind: std::io::ErrorKind) {
        self.state.lock().unwrap().fail_next.push_back(kind);
    }

    /// Simulate a natural exit of the given pid with an exit code.
    /// Returns false if the pid is not an alive mock process.
    pub fn exit(&self, pid: u32, code: i32) -> bool {
        let sender = self.state.lock().unwrap().pending.remove(&pid);
        match sender {
            Some(tx) => tx
                .send(ProcessExit {
                    pid,
                    code: Some(code),
                    signal: None,
                })
                .is_ok(),
            None => false,
        }
    }

    /// Number of spawns performed so far (including relaunches)
    pub fn spawn_count(&self) -> usize {
        self.state.lock().unwrap().spawned.len()
    }

    /// All spawned pids in spawn order
    pub fn spawned_pids(&self) -> Vec<u32> {
        self.state
            .lock()
            .unwrap()
            .spawned
            .iter()
            .map(|(pid, _)| *pid)
            .collect()
    }

    /// Argv of the spawn with the given pid, if any
    pub fn argv_of(&self, pid: u32) -> Option<Vec<String>> {
        self.state
            .lock()
            .unwrap()
            .spawned
            .iter()
            .find(|(p, _)| *p == pid)
            .map(|(_, argv)| argv.clone())
    }

    /// Pids of mock processes that have not exited yet
    pub fn alive_pids(&self) -> Vec<u32> {
        let mut pids: Vec<u32> = self.state.lock().unwrap().pending.keys().copied().collect();
        pids.sort_unstable();
        pids
    }

    fn exit_with_signal(&self, pid: u32, signal: i32) {
        if let Some(tx) = self.state.lock().unwrap().pending.remove(&pid) {
            let _ = tx.send(ProcessExit {
                pid,
                code: None,
                signal: Some(signal),
            });
        }
    }
}

#[async_trait]
impl ProcessAdapter for MockProcessAdapter {
    async fn spawn(&self, group: &CommandGroup) -> Result<Box<dyn ManagedProcess>> {
        debug!("Spawning mock process for: {}", group);

        let mut state = self.state.lock().unwrap();

        if let Some(kind) = state.fail_next.pop_front() {
            return Err(CoreError::ProcessSpawn {
                command: group.program().to_string(),
                source: std::io::Error::new(kind, "scripted spawn failure"),
            });
        }

        let pid = state.next_pid;
        state.next_pid += 1;

        let (tx, rx) = tokio::sync::oneshot::channel();
        state.pending.insert(pid, tx);
        state.spawned.push((pid, group.argv().to_vec()));

        Ok(Box::new(MockManagedProcess { pid, rx: Some(rx) }))
    }

    fn terminate(&self, pid: u32) -> Result<()> {
        let ignore = self.state.lock().unwrap().ignore_term;
        if ignore {
            debug!("Mock process {} ignoring SIGTERM", pid);
        } else {
            self.exit_with_signal(pid, 15);
        }
        Ok(())
    }

    fn kill(&self, pid: u32) -> Result<()> {
        self.exit_with_signal(pid, 9);
        Ok(())
    }
}

/// Mock managed process: waits until the adapter triggers its exit
struct MockManagedProcess {
    pid: u32,
    rx: Option<tokio::sync::oneshot::Receiver<ProcessExit>>,
}

#[async_trait]
impl ManagedProcess for MockManagedProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    async fn wait(&mut self) -> Result<ProcessExit> {
        // Poll through the &mut so a cancelled wait keeps the receiver
        let Some(rx) = self.rx.as_mut() else {
            return Err(CoreError::Supervision(format!(
                "mock process {} already waited on",
                self.pid
            )));
        };
        let exit = match rx.await {
            Ok(exit) => exit,
            // Adapter dropped: report a plain exit so watchers unwind
            Err(_) => ProcessExit {
                pid: self.pid,
                code: None,
                signal: None,
            },
        };
        self.rx = None;
        Ok(exit)
    }
}
