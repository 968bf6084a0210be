//! Supervision registry: the authoritative slot table
//!
//! One [`Slot`] exists per command group and records which OS process is
//! currently believed to run it, plus the two flags driving the
//! supervision state machine:
//!
//! - `killed`: a deliberate mass-termination has been initiated for the
//!   slot; only a fresh launch resets it.
//! - `dead`: the slot's process was reaped while `killed` was set.
//!
//! The registry is owned exclusively by the supervisor dispatch loop, so
//! its lookup-and-relaunch sequence is atomic with respect to every other
//! registry operation without any locking: mutual exclusion is the
//! single-owner dispatch loop itself.
//!
//! The invariants the registry upholds:
//!
//! - at most one process is associated with a slot at any instant
//! - `dead` becomes true only while `killed` is true; a natural death with
//!   `killed` unset is always answered with a relaunch
//! - the slot array is sized once and only ever rewritten wholesale by
//!   [`Registry::populate`], never element-by-element

use crate::command::CommandTable;
use crate::events::ControlEvent;
use crate::process::{ProcessAdapter, ProcessExit};
use crate::Result;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Per-command-group bookkeeping record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    /// Process id currently associated with this slot, or `None` before
    /// the first successful launch and after a failed one
    pub pid: Option<u32>,
    /// Back-reference into the command table; never changes
    pub command_index: usize,
    /// A mass-termination has been initiated for this slot
    pub killed: bool,
    /// The slot's process was reaped while `killed` was set
    pub dead: bool,
}

/// Launches slot processes and wires their exits back into the event queue
///
/// On a successful spawn a watcher task takes ownership of the process
/// handle, waits for it to exit, and enqueues [`ControlEvent::ChildExited`].
/// On an exec-class failure a [`ControlEvent::LaunchFailed`] is enqueued
/// instead, so an unlaunchable command flows through the same relaunch
/// path as a crashed one. Any other spawn failure is returned as a fatal
/// error.
pub(crate) struct Launcher {
    adapter: Arc<dyn ProcessAdapter>,
    event_tx: mpsc::UnboundedSender<ControlEvent>,
}

impl Launcher {
    pub(crate) fn new(
        adapter: Arc<dyn ProcessAdapter>,
        event_tx: mpsc::UnboundedSender<ControlEvent>,
    ) -> Self {
        Self { adapter, event_tx }
    }

    /// Launch the command group for `slot`, returning the new pid, or
    /// `None` if the command is unlaunchable (a retry event was queued).
    async fn launch(
        &self,
        slot: usize,
        generation: u64,
        table: &CommandTable,
        command_index: usize,
    ) -> Result<Option<u32>> {
        let group = table.group(command_index);
        match self.adapter.spawn(group).await {
            Ok(mut process) => {
                let pid = process.pid();
                info!("Launched '{}' as pid {}", group, pid);

                let event_tx = self.event_tx.clone();
                tokio::spawn(async move {
                    let exit = match process.wait().await {
                        Ok(exit) => exit,
                        Err(e) => {
                            warn!("Failed to wait for pid {}: {}", pid, e);
                            ProcessExit {
                                pid,
                                code: None,
                                signal: None,
                            }
                        }
                    };
                    debug!("Reaped child: {}", exit);
                    // The supervisor may already be gone; nothing to do then
                    let _ = event_tx.send(ControlEvent::ChildExited { exit });
                });

                Ok(Some(pid))
            }
            Err(e) if e.is_exec_failure() => {
                warn!("Cannot launch '{}': {}; will retry", group, e);
                let _ = self
                    .event_tx
                    .send(ControlEvent::LaunchFailed { slot, generation });
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

/// The authoritative mapping from command slots to process state
#[derive(Debug, Default)]
pub struct Registry {
    slots: Vec<Slot>,
    generation: u64,
}

impl Registry {
    /// Create an empty registry; slots are allocated by the first
    /// [`Registry::populate`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Launch one process per command group and record identity + flags.
    ///
    /// On the first call this allocates the slot array (one slot per
    /// group, `command_index` equal to its position); later calls reuse
    /// the existing slots, resetting pid and both flags. Each populate
    /// starts a new generation, which invalidates launch-failure events
    /// queued against earlier generations.
    pub(crate) async fn populate(
        &mut self,
        table: &CommandTable,
        launcher: &Launcher,
    ) -> Result<()> {
        self.generation += 1;

        if self.slots.is_empty() {
            self.slots = (0..table.len())
                .map(|i| Slot {
                    pid: None,
                    command_index: i,
                    killed: false,
                    dead: false,
                })
                .collect();
        }

        for i in 0..self.slots.len() {
            let command_index = self.slots[i].command_index;
            let pid = self
                .launch_into(i, table, command_index, launcher)
                .await?;
            let slot = &mut self.slots[i];
            slot.pid = pid;
            slot.killed = false;
            slot.dead = false;
        }

        Ok(())
    }

    /// Look up a reaped child and either mark it dead or relaunch it.
    ///
    /// - no slot holds the pid: the exit belongs to a previous generation
    ///   or was already superseded; no-op
    /// - the slot is `killed`: mark it `dead` and stop
    /// - otherwise: launch a replacement for the same command and store
    ///   the new pid
    pub(crate) async fn reap(
        &mut self,
        exit: &ProcessExit,
        table: &CommandTable,
        launcher: &Launcher,
    ) -> Result<()> {
        let Some(i) = self.slots.iter().position(|s| s.pid == Some(exit.pid)) else {
            debug!("No slot for reaped pid {}, ignoring", exit.pid);
            return Ok(());
        };

        if self.slots[i].killed {
            debug!("Slot {} confirmed dead ({})", i, exit);
            self.slots[i].dead = true;
            return Ok(());
        }

        info!("Slot {} died ({}), relaunching", i, exit);
        let command_index = self.slots[i].command_index;
        let pid = self.launch_into(i, table, command_index, launcher).await?;
        self.slots[i].pid = pid;
        Ok(())
    }

    /// Retry a slot whose previous launch failed with an exec-class error.
    ///
    /// A stale generation means the registry was repopulated since the
    /// failure was queued, so the event no longer describes this slot.
    /// A `killed` slot is marked dead instead of retried, exactly like a
    /// reaped child.
    pub(crate) async fn relaunch_failed(
        &mut self,
        slot: usize,
        generation: u64,
        table: &CommandTable,
        launcher: &Launcher,
    ) -> Result<()> {
        if generation != self.generation || slot >= self.slots.len() {
            debug!("Stale launch failure for slot {}, ignoring", slot);
            return Ok(());
        }

        if self.slots[slot].killed {
            debug!("Slot {} was never launched, confirming dead", slot);
            self.slots[slot].dead = true;
            return Ok(());
        }

        let command_index = self.slots[slot].command_index;
        let pid = self
            .launch_into(slot, table, command_index, launcher)
            .await?;
        self.slots[slot].pid = pid;
        Ok(())
    }

    async fn launch_into(
        &self,
        slot: usize,
        table: &CommandTable,
        command_index: usize,
        launcher: &Launcher,
    ) -> Result<Option<u32>> {
        launcher
            .launch(slot, self.generation, table, command_index)
            .await
    }

    /// Whether every slot has been confirmed dead
    pub fn all_dead(&self) -> bool {
        self.slots.iter().all(|s| s.dead)
    }

    /// Number of slots (equal to the number of command groups)
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the registry has been populated yet
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// All slots, in command-table order
    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// Mutable access for the shutdown coordinator
    pub(crate) fn slot_mut(&mut self, index: usize) -> &mut Slot {
        &mut self.slots[index]
    }

    /// The current populate generation
    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }
}
