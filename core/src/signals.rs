//! OS signal handling for the supervisor
//!
//! Raw signals are translated into [`ControlEvent`]s on the supervisor's
//! event queue and handled there, in one serialized dispatch loop; no
//! logic runs in signal context.
//!
//! - **SIGHUP**: restart every supervised command
//! - **SIGTERM**, **SIGINT**: terminate every command and exit

use crate::events::ControlEvent;
use crate::{CoreError, Result};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tracing::debug;

/// Install signal handlers and forward signals as control events.
///
/// Stream installation happens before this returns, so an installation
/// failure is reported synchronously as a fatal
/// [`CoreError::SignalInstall`]. The returned task runs until the supervisor (the
/// receiving end of `event_tx`) goes away.
pub fn spawn_listener(
    event_tx: mpsc::UnboundedSender<ControlEvent>,
) -> Result<tokio::task::JoinHandle<()>> {
    let mut hangup = signal(SignalKind::hangup()).map_err(CoreError::SignalInstall)?;
    let mut terminate = signal(SignalKind::terminate()).map_err(CoreError::SignalInstall)?;
    let mut interrupt = signal(SignalKind::interrupt()).map_err(CoreError::SignalInstall)?;

    Ok(tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = hangup.recv() => ControlEvent::Restart,
                _ = terminate.recv() => ControlEvent::Shutdown,
                _ = interrupt.recv() => ControlEvent::Shutdown,
            };
            debug!("Forwarding signal as {:?}", event);
            if event_tx.send(event).is_err() {
                break;
            }
        }
    }))
}
