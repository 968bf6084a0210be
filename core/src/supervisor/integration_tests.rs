//! Integration tests for the supervision state machine
//!
//! These drive the supervisor's dispatch logic directly (the tests live
//! inside the module, so they can pull events off the queue and hand them
//! to `handle_event` deterministically), against the mock adapter and,
//! for the end-to-end scenario, against real processes.

use super::*;
use crate::command::CommandTable;
use crate::process::MockProcessAdapter;
use tokio::time::timeout;

fn table(line: &str) -> CommandTable {
    let tokens: Vec<String> = line.split_whitespace().map(|t| t.to_string()).collect();
    CommandTable::parse(&tokens).unwrap()
}

fn test_config() -> SupervisorConfig {
    SupervisorConfig {
        grace: Duration::from_millis(100),
        kill_grace: Duration::from_millis(100),
    }
}

async fn populated(adapter: &MockProcessAdapter, line: &str) -> Supervisor {
    let mut sup = Supervisor::new(
        table(line),
        Arc::new(adapter.clone()),
        test_config(),
    )
    .unwrap();
    sup.registry.populate(&sup.table, &sup.launcher).await.unwrap();
    sup
}

fn slot_pids(sup: &Supervisor) -> Vec<Option<u32>> {
    sup.registry.slots().iter().map(|s| s.pid).collect()
}

async fn next_event(sup: &mut Supervisor) -> ControlEvent {
    timeout(Duration::from_secs(5), sup.event_rx.recv())
        .await
        .expect("timed out waiting for a control event")
        .expect("event channel closed")
}

/// A slot whose process dies on its own is relaunched with a new pid for
/// the same command, leaving every other slot untouched.
#[tokio::test]
async fn test_restart_on_death() {
    let adapter = MockProcessAdapter::new();
    let mut sup = populated(&adapter, "sleep 100 --- sleep 100 --- false").await;

    let before = slot_pids(&sup);
    let dying = before[2].unwrap();
    assert!(adapter.exit(dying, 1));

    let event = next_event(&mut sup).await;
    assert_eq!(sup.handle_event(event).await.unwrap(), Flow::Continue);

    let after = slot_pids(&sup);
    assert_eq!(after[0], before[0]);
    assert_eq!(after[1], before[1]);
    assert_ne!(after[2], before[2]);
    assert_eq!(sup.registry.slots()[2].command_index, 2);
    assert_eq!(adapter.argv_of(after[2].unwrap()).unwrap(), vec!["false"]);
    assert!(!sup.registry.slots()[2].killed);
    assert!(!sup.registry.slots()[2].dead);
}

/// Multiple near-simultaneous deaths queued before dispatch are each
/// individually resolved in one reaper invocation.
#[tokio::test]
async fn test_reaper_drains_all_queued_deaths() {
    let adapter = MockProcessAdapter::new();
    let mut sup = populated(&adapter, "a --- b --- c").await;

    let before = slot_pids(&sup);
    assert!(adapter.exit(before[0].unwrap(), 1));
    assert!(adapter.exit(before[2].unwrap(), 1));

    // Wait until both watcher events are queued, then dispatch once
    let first = next_event(&mut sup).await;
    while sup.event_rx.is_empty() {
        tokio::task::yield_now().await;
    }
    sup.handle_event(first).await.unwrap();

    let after = slot_pids(&sup);
    assert_ne!(after[0], before[0]);
    assert_eq!(after[1], before[1]);
    assert_ne!(after[2], before[2]);
    assert_eq!(adapter.spawn_count(), 5);
}

/// Graceful shutdown: every child receives SIGTERM, every slot is
/// confirmed dead, and no replacement is ever launched.
#[tokio::test]
async fn test_shutdown_marks_all_dead_without_relaunch() {
    let adapter = MockProcessAdapter::new();
    let mut sup = populated(&adapter, "sleep 100 --- sleep 100").await;

    let flow = sup.handle_event(ControlEvent::Shutdown).await.unwrap();
    assert_eq!(flow, Flow::Exit);
    assert!(sup.registry.all_dead());
    assert_eq!(adapter.spawn_count(), 2);
    assert!(adapter.alive_pids().is_empty());
}

/// A child that ignores SIGTERM is killed after the grace period and
/// still ends up confirmed dead.
#[tokio::test]
async fn test_shutdown_escalates_to_kill() {
    let adapter = MockProcessAdapter::ignoring_term();
    let mut sup = populated(&adapter, "stubborn --- stubborn").await;

    let flow = sup.handle_event(ControlEvent::Shutdown).await.unwrap();
    assert_eq!(flow, Flow::Exit);
    assert!(sup.registry.all_dead());
    assert_eq!(adapter.spawn_count(), 2);
    assert!(adapter.alive_pids().is_empty());
}

/// A slot killed before its exit is reaped is marked dead exactly once
/// and never resurrected, even when the death was concurrent with the
/// start of the shutdown.
#[tokio::test]
async fn test_no_resurrection_when_death_races_shutdown() {
    let adapter = MockProcessAdapter::new();
    let mut sup = populated(&adapter, "racy --- sleep 100").await;

    // The child exits naturally in the same instant shutdown begins: its
    // exit event is queued but not yet dispatched.
    let racy_pid = slot_pids(&sup)[0].unwrap();
    assert!(adapter.exit(racy_pid, 0));

    let flow = sup.handle_event(ControlEvent::Shutdown).await.unwrap();
    assert_eq!(flow, Flow::Exit);
    assert!(sup.registry.slots()[0].dead);
    assert!(sup.registry.all_dead());
    // No relaunch happened for the raced slot
    assert_eq!(adapter.spawn_count(), 2);
}

/// Restart-all produces a full fresh generation: as many new pids as
/// command groups, all distinct from the previous generation, all flags
/// cleared.
#[tokio::test]
async fn test_restart_all_is_idempotent() {
    let adapter = MockProcessAdapter::new();
    let mut sup = populated(&adapter, "sleep 100 --- sleep 100 --- sleep 100").await;

    let before: Vec<u32> = slot_pids(&sup).into_iter().flatten().collect();
    let flow = sup.handle_event(ControlEvent::Restart).await.unwrap();
    assert_eq!(flow, Flow::Continue);

    let after: Vec<u32> = slot_pids(&sup).into_iter().flatten().collect();
    assert_eq!(after.len(), 3);
    for pid in &after {
        assert!(!before.contains(pid));
    }
    for slot in sup.registry.slots() {
        assert!(!slot.killed);
        assert!(!slot.dead);
    }
    assert_eq!(adapter.spawn_count(), 6);
}

/// An unlaunchable command is retried indefinitely through the launch
/// failure path instead of crashing the supervisor. Scripted failures
/// are consumed by spawn order, so a single-group table keeps them all
/// on the one slot.
#[tokio::test]
async fn test_unlaunchable_command_is_retried() {
    let adapter = MockProcessAdapter::new();
    adapter.fail_next_spawn(std::io::ErrorKind::NotFound);
    adapter.fail_next_spawn(std::io::ErrorKind::NotFound);

    // The populate-time spawn consumes the first scripted failure
    let mut sup = populated(&adapter, "ghost").await;
    assert_eq!(sup.registry.slots()[0].pid, None);

    // First retry consumes the second failure and requeues itself
    let event = next_event(&mut sup).await;
    sup.handle_event(event).await.unwrap();
    assert_eq!(sup.registry.slots()[0].pid, None);

    // Second retry succeeds
    let event = next_event(&mut sup).await;
    sup.handle_event(event).await.unwrap();
    assert!(sup.registry.slots()[0].pid.is_some());
    assert!(!sup.registry.slots()[0].dead);
}

/// A slot that never launched is marked dead with a warning at shutdown
/// instead of being signalled.
#[tokio::test]
async fn test_shutdown_with_unlaunched_slot() {
    let adapter = MockProcessAdapter::new();
    adapter.fail_next_spawn(std::io::ErrorKind::NotFound);
    let mut sup = populated(&adapter, "ghost --- sleep 100").await;
    assert_eq!(sup.registry.slots()[0].pid, None);

    let flow = sup.handle_event(ControlEvent::Shutdown).await.unwrap();
    assert_eq!(flow, Flow::Exit);
    assert!(sup.registry.all_dead());
}

/// A shutdown request arriving during a restart transition is deferred
/// until the restart completes; a second one is dropped, not queued.
#[tokio::test]
async fn test_control_events_deferred_during_transition() {
    let adapter = MockProcessAdapter::ignoring_term();
    let mut sup = populated(&adapter, "stubborn").await;

    // Both requests are already queued when the restart begins, so the
    // coordinator's grace wait encounters them mid-sequence.
    sup.event_tx.send(ControlEvent::Shutdown).unwrap();
    sup.event_tx.send(ControlEvent::Shutdown).unwrap();

    let flow = sup.handle_event(ControlEvent::Restart).await.unwrap();
    assert_eq!(flow, Flow::Continue);

    // The restart completed with a fresh generation
    assert!(sup.registry.slots()[0].pid.is_some());
    assert!(!sup.registry.slots()[0].killed);

    // Exactly one shutdown is pending, the duplicate was dropped
    assert_eq!(sup.pending, Some(ControlEvent::Shutdown));
    assert!(sup.event_rx.is_empty());

    let deferred = sup.pending.take().unwrap();
    assert_eq!(sup.handle_event(deferred).await.unwrap(), Flow::Exit);
    assert!(sup.registry.all_dead());
}

/// A shutdown request arriving while a duplicate restart is already
/// pending displaces the restart: the terminate request survives the
/// transition and is honored afterwards.
#[tokio::test]
async fn test_shutdown_supersedes_pending_restart() {
    let adapter = MockProcessAdapter::ignoring_term();
    let mut sup = populated(&adapter, "stubborn").await;

    // A duplicate restart is queued first, then a shutdown, both landing
    // inside the restart transition's grace wait.
    sup.event_tx.send(ControlEvent::Restart).unwrap();
    sup.event_tx.send(ControlEvent::Shutdown).unwrap();

    let flow = sup.handle_event(ControlEvent::Restart).await.unwrap();
    assert_eq!(flow, Flow::Continue);

    // The shutdown displaced the pending restart rather than being dropped
    assert_eq!(sup.pending, Some(ControlEvent::Shutdown));

    let deferred = sup.pending.take().unwrap();
    assert_eq!(sup.handle_event(deferred).await.unwrap(), Flow::Exit);
    assert!(sup.registry.all_dead());
}

/// A restart request arriving after a shutdown is already pending is
/// dropped: the pending terminate request is never displaced.
#[tokio::test]
async fn test_restart_never_displaces_pending_shutdown() {
    let adapter = MockProcessAdapter::ignoring_term();
    let mut sup = populated(&adapter, "stubborn").await;

    sup.event_tx.send(ControlEvent::Shutdown).unwrap();
    sup.event_tx.send(ControlEvent::Restart).unwrap();

    let flow = sup.handle_event(ControlEvent::Restart).await.unwrap();
    assert_eq!(flow, Flow::Continue);
    assert_eq!(sup.pending, Some(ControlEvent::Shutdown));
}

/// Full dispatch loop: run() serves events until a shutdown request and
/// then returns Ok, with no mock children left alive.
#[tokio::test]
async fn test_run_loop_exits_on_shutdown() {
    let adapter = MockProcessAdapter::new();
    let sup = Supervisor::new(
        table("sleep 100 --- sleep 100"),
        Arc::new(adapter.clone()),
        test_config(),
    )
    .unwrap();
    let control = sup.event_sender();

    let handle = tokio::spawn(sup.run());

    // Let populate finish before requesting shutdown
    while adapter.spawn_count() < 2 {
        tokio::task::yield_now().await;
    }
    control.send(ControlEvent::Shutdown).unwrap();

    let result = timeout(Duration::from_secs(5), handle).await.unwrap();
    assert!(result.unwrap().is_ok());
    assert!(adapter.alive_pids().is_empty());
}

/// A fatal spawn failure at populate time aborts run() with an error.
#[tokio::test]
async fn test_run_fails_on_fatal_spawn_error() {
    let adapter = MockProcessAdapter::new();
    adapter.fail_next_spawn(std::io::ErrorKind::Other);
    let sup = Supervisor::new(table("whatever"), Arc::new(adapter), test_config()).unwrap();

    let err = sup.run().await.unwrap_err();
    assert!(!err.is_exec_failure());
}

/// End to end against real processes: three groups where the third exits
/// immediately. The dead group is relaunched with the same command index
/// while the sleepers are untouched; a subsequent shutdown brings all
/// three slots to dead within the grace period.
#[cfg(unix)]
#[tokio::test]
async fn test_real_processes_end_to_end() {
    use crate::process::UnixProcessAdapter;

    let adapter: Arc<dyn ProcessAdapter> = Arc::new(UnixProcessAdapter::new());
    let mut sup = Supervisor::new(
        table("sleep 100 --- sleep 100 --- false"),
        adapter,
        SupervisorConfig::default(),
    )
    .unwrap();
    sup.registry.populate(&sup.table, &sup.launcher).await.unwrap();

    let before = slot_pids(&sup);

    // `false` exits immediately; within one reap cycle slot 3 holds a new
    // pid for the same command index.
    let event = next_event(&mut sup).await;
    sup.handle_event(event).await.unwrap();

    let after = slot_pids(&sup);
    assert_eq!(after[0], before[0]);
    assert_eq!(after[1], before[1]);
    assert_ne!(after[2], before[2]);
    assert_eq!(sup.registry.slots()[2].command_index, 2);

    // Terminate-and-exit: every slot reaches dead within grace + escalation
    let flow = sup.handle_event(ControlEvent::Shutdown).await.unwrap();
    assert_eq!(flow, Flow::Exit);
    assert!(sup.registry.all_dead());
}
