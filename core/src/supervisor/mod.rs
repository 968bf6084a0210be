//! The supervision state machine
//!
//! One dispatch loop owns the [`Registry`] and consumes every
//! [`ControlEvent`] (signal-derived restart/shutdown requests, child
//! exits, and synthetic launch failures) in a single serialized handler.
//!
//! ## States
//!
//! ```text
//! Running ⇄ Restarting → Running
//! Running → Terminating (terminal, loop returns)
//! ```
//!
//! ## The reap-vs-shutdown race
//!
//! The one correctness-critical discipline of this module: while the
//! shutdown coordinator flags and signals the slots, no event is drained,
//! so a child reaped during mass-termination can never race the `killed`
//! flag and be wrongly relaunched. During the grace wait only child-exit
//! and launch-failure events are drained; restart/shutdown requests
//! arriving mid-sequence are coalesced into a single pending event and
//! handled after the sequence completes, mirroring how a blocked POSIX
//! signal stays pending until unmasked. Deferred events are queued, never
//! lost: the channel is unbounded.

use crate::command::CommandTable;
use crate::config::SupervisorConfig;
use crate::events::ControlEvent;
use crate::process::{ProcessAdapter, ProcessExit};
use crate::registry::{Launcher, Registry};
use crate::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[cfg(test)]
mod integration_tests;

/// Whether the dispatch loop keeps running after handling an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Exit,
}

/// The supervisor: owns the registry, the process adapter, and both ends
/// of the control-event queue.
pub struct Supervisor {
    table: CommandTable,
    registry: Registry,
    adapter: Arc<dyn ProcessAdapter>,
    launcher: Launcher,
    cfg: SupervisorConfig,
    event_tx: mpsc::UnboundedSender<ControlEvent>,
    event_rx: mpsc::UnboundedReceiver<ControlEvent>,
    /// A restart/shutdown request deferred during a critical section.
    /// At most one is kept pending; a duplicate of the same class is
    /// dropped like a blocked-and-already-pending signal, and a shutdown
    /// request supersedes a pending restart (never the other way round),
    /// so a terminate request is never lost behind a restart.
    pending: Option<ControlEvent>,
}

impl Supervisor {
    /// Create a supervisor for the given command table.
    ///
    /// Fails if the configuration is invalid. Nothing is launched until
    /// [`Supervisor::run`].
    pub fn new(
        table: CommandTable,
        adapter: Arc<dyn ProcessAdapter>,
        cfg: SupervisorConfig,
    ) -> Result<Self> {
        cfg.validate()?;
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let launcher = Launcher::new(Arc::clone(&adapter), event_tx.clone());
        Ok(Self {
            table,
            registry: Registry::new(),
            adapter,
            launcher,
            cfg,
            event_tx,
            event_rx,
            pending: None,
        })
    }

    /// A sender for injecting control events (used by the signal listener)
    pub fn event_sender(&self) -> mpsc::UnboundedSender<ControlEvent> {
        self.event_tx.clone()
    }

    /// Launch every command group and serve events until a shutdown
    /// request completes. Returns `Ok(())` on graceful termination; the
    /// caller maps that to exit code 0.
    pub async fn run(mut self) -> Result<()> {
        self.registry.populate(&self.table, &self.launcher).await?;
        info!("Supervising {} command group(s)", self.registry.len());

        loop {
            let event = match self.pending.take() {
                Some(event) => event,
                None => match self.event_rx.recv().await {
                    Some(event) => event,
                    // Unreachable while we hold event_tx, but not worth a panic
                    None => return Ok(()),
                },
            };

            if self.handle_event(event).await? == Flow::Exit {
                info!("All children terminated, exiting");
                return Ok(());
            }
        }
    }

    /// Dispatch a single control event
    async fn handle_event(&mut self, event: ControlEvent) -> Result<Flow> {
        debug!("Dispatching {:?}", event);
        match event {
            ControlEvent::ChildExited { exit } => {
                self.reap_exited(exit).await?;
                Ok(Flow::Continue)
            }
            ControlEvent::LaunchFailed { slot, generation } => {
                self.registry
                    .relaunch_failed(slot, generation, &self.table, &self.launcher)
                    .await?;
                Ok(Flow::Continue)
            }
            ControlEvent::Restart => {
                self.restart_all().await?;
                Ok(Flow::Continue)
            }
            ControlEvent::Shutdown => {
                self.shutdown_all().await?;
                Ok(Flow::Exit)
            }
        }
    }

    /// The exit reaper: resolve one reaped child, then drain every
    /// further death already queued, so that near-simultaneous deaths are
    /// each individually resolved in one invocation. The first
    /// restart/shutdown request encountered is stashed for the main loop;
    /// this never blocks waiting for a child that has not exited.
    async fn reap_exited(&mut self, first: ProcessExit) -> Result<()> {
        self.registry
            .reap(&first, &self.table, &self.launcher)
            .await?;

        loop {
            match self.event_rx.try_recv() {
                Ok(ControlEvent::ChildExited { exit }) => {
                    self.registry
                        .reap(&exit, &self.table, &self.launcher)
                        .await?;
                }
                Ok(ControlEvent::LaunchFailed { slot, generation }) => {
                    self.registry
                        .relaunch_failed(slot, generation, &self.table, &self.launcher)
                        .await?;
                }
                Ok(other) => {
                    self.defer(other);
                    break;
                }
                Err(_) => break,
            }
        }
        Ok(())
    }

    /// Restarting state: terminate every child, then repopulate the
    /// registry with a fresh generation and return to Running.
    async fn restart_all(&mut self) -> Result<()> {
        info!("Restart requested, terminating all children");
        self.shutdown_all().await?;
        self.registry.populate(&self.table, &self.launcher).await?;
        info!("Restarted {} command group(s)", self.registry.len());
        Ok(())
    }

    /// The shutdown coordinator: flag, signal, wait, escalate.
    ///
    /// Flagging and signalling form the critical section — the event
    /// queue is not drained while `killed` flags are being set, which is
    /// what makes a concurrent natural death land on the marked-dead path
    /// instead of being relaunched. Whether the process exits afterwards
    /// is the caller's decision (restart repopulates instead).
    async fn shutdown_all(&mut self) -> Result<()> {
        for i in 0..self.registry.len() {
            let slot = self.registry.slot_mut(i);
            slot.killed = true;
            match slot.pid {
                None => {
                    warn!("Slot {} has no live process, marking dead", i);
                    slot.dead = true;
                }
                Some(pid) => {
                    if let Err(e) = self.adapter.terminate(pid) {
                        warn!("Failed to terminate pid {}: {}", pid, e);
                    }
                }
            }
        }

        self.drain_until_dead(self.cfg.grace).await?;

        if !self.registry.all_dead() {
            let stragglers: Vec<(usize, u32)> = self
                .registry
                .slots()
                .iter()
                .enumerate()
                .filter(|(_, s)| !s.dead)
                .filter_map(|(i, s)| s.pid.map(|pid| (i, pid)))
                .collect();
            for (i, pid) in stragglers {
                warn!("Slot {} (pid {}) ignored SIGTERM, killing", i, pid);
                if let Err(e) = self.adapter.kill(pid) {
                    warn!("Failed to kill pid {}: {}", pid, e);
                }
            }
            self.drain_until_dead(self.cfg.kill_grace).await?;
        }

        if !self.registry.all_dead() {
            // SIGKILL was sent, so this indicates a pid the OS no longer
            // reports on (or an unkillable process); there is nothing
            // further to escalate to.
            warn!("Not all children were confirmed dead within the kill grace period");
        }

        Ok(())
    }

    /// Grace wait: consume child-exit and launch-failure events until
    /// every slot is dead or the budget elapses. Every slot is `killed`
    /// here, so reaping can only mark slots dead, never relaunch.
    /// Restart/shutdown requests are deferred.
    async fn drain_until_dead(&mut self, budget: Duration) -> Result<()> {
        let deadline = Instant::now() + budget;
        while !self.registry.all_dead() {
            let event = tokio::select! {
                _ = tokio::time::sleep_until(deadline) => break,
                event = self.event_rx.recv() => event,
            };
            match event {
                Some(ControlEvent::ChildExited { exit }) => {
                    self.registry
                        .reap(&exit, &self.table, &self.launcher)
                        .await?;
                }
                Some(ControlEvent::LaunchFailed { slot, generation }) => {
                    self.registry
                        .relaunch_failed(slot, generation, &self.table, &self.launcher)
                        .await?;
                }
                Some(other) => self.defer(other),
                None => break,
            }
        }
        Ok(())
    }

    /// Defer a restart/shutdown request that arrived inside a critical
    /// section. A duplicate of the pending class is dropped, but a
    /// shutdown request displaces a pending restart: each class stays
    /// pending like a blocked signal, and since handling a shutdown makes
    /// any restart moot, only the shutdown needs to survive.
    fn defer(&mut self, event: ControlEvent) {
        match (&self.pending, &event) {
            (None, _) => {
                debug!("Deferring {:?} until the current transition completes", event);
                self.pending = Some(event);
            }
            (Some(ControlEvent::Restart), ControlEvent::Shutdown) => {
                debug!("Pending restart superseded by a shutdown request");
                self.pending = Some(event);
            }
            _ => {
                debug!("Dropping {:?}, a stronger or equal event is already pending", event);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn registry(&self) -> &Registry {
        &self.registry
    }
}
