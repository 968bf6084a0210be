//! Control events for the supervision loop
//!
//! Raw OS signals and asynchronous child-exit notifications are both
//! represented as values of one closed event set, delivered over an
//! unbounded channel and consumed by a single owner (the supervisor
//! dispatch loop). During a critical section the owner simply stops
//! draining the queue, so notifications are deferred rather than lost;
//! there is no handler reentrancy to guard against.

use crate::process::ProcessExit;

/// The closed set of events the supervisor dispatch loop consumes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEvent {
    /// Restart every supervised command (SIGHUP)
    Restart,

    /// Terminate every supervised command and exit (SIGTERM, SIGINT)
    Shutdown,

    /// A supervised child has exited and been reaped
    ChildExited {
        /// Exit details of the reaped child
        exit: ProcessExit,
    },

    /// A slot's launch failed with an exec-class error (unlaunchable
    /// command); a synthetic stand-in for a child death.
    LaunchFailed {
        /// Index of the slot whose launch failed
        slot: usize,
        /// Registry generation the launch belonged to; a stale
        /// generation makes the event a no-op.
        generation: u64,
    },
}
