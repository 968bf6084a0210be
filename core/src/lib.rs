//! Core functionality for the herder process supervisor
//!
//! herder runs a flat list of command groups, restarts any child that
//! exits on its own, and propagates restart/shutdown requests down to
//! every child. This crate contains the whole supervision engine; the
//! `herder` binary is a thin CLI layer on top of it.
//!
//! ## Architecture
//!
//! ```text
//! SIGHUP / SIGTERM / SIGINT          child exits
//!         │                               │
//!         ▼                               ▼
//!   signals::spawn_listener        watcher tasks
//!         │                               │
//!         └────────► ControlEvent queue ◄─┘
//!                          │
//!                          ▼
//!              Supervisor dispatch loop
//!              (sole owner of the Registry)
//!                          │
//!                          ▼
//!          ProcessAdapter (spawn / SIGTERM / SIGKILL)
//! ```
//!
//! All registry mutation happens on the dispatch loop, so the race between
//! asynchronous child-exit notification and deliberate mass-termination is
//! resolved by construction: events are deferred on the queue while a
//! shutdown or restart transition is in its critical section.

pub mod command;
pub mod config;
pub mod error;
pub mod events;
pub mod process;
pub mod registry;
pub mod signals;
pub mod supervisor;

pub use command::{CommandGroup, CommandTable, GROUP_SEPARATOR};
pub use config::SupervisorConfig;
pub use error::{CoreError, Result};
pub use events::ControlEvent;
pub use process::{ManagedProcess, MockProcessAdapter, ProcessAdapter, ProcessExit};
pub use registry::{Registry, Slot};
pub use supervisor::Supervisor;

#[cfg(unix)]
pub use process::UnixProcessAdapter;
