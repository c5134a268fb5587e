use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::notifier::DoorbellNotifier;

const DRAIN_WAIT: Duration = Duration::from_millis(200);

/// Event delivered by the device collaborator's feed, already mapped out of
/// the wire representation by the adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// The intercom's call button was pressed.
    ButtonPressed,
    /// The device reports its channel state may be unreliable.
    TamperDetected,
    /// Anything the bridge has no use for; kept for the log.
    Other(String),
}

/// Raised by the event pump, consumed-and-cleared once per capture-loop
/// iteration. A lost wakeup merely delays the restart, so a single atomic
/// word is all the synchronization this needs.
#[derive(Clone, Debug, Default)]
pub struct TamperFlag(Arc<AtomicBool>);

impl TamperFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Consume-and-clear in one step.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Drains the bounded inbound event queue on its own thread: button presses
/// ring the doorbell, tamper reports raise the flag for the capture loop.
pub struct EventPump {
    events: Receiver<DeviceEvent>,
    tamper: TamperFlag,
    notifier: DoorbellNotifier,
}

impl EventPump {
    pub fn new(events: Receiver<DeviceEvent>, tamper: TamperFlag, notifier: DoorbellNotifier) -> Self {
        Self {
            events,
            tamper,
            notifier,
        }
    }

    pub fn spawn(self, running: Arc<AtomicBool>) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("device-events".to_string())
            .spawn(move || {
                while running.load(Ordering::SeqCst) {
                    match self.events.recv_timeout(DRAIN_WAIT) {
                        Ok(event) => self.handle(event),
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => {
                            tracing::info!("device event feed closed");
                            break;
                        }
                    }
                }
            })
    }

    pub fn handle(&self, event: DeviceEvent) {
        match event {
            DeviceEvent::ButtonPressed => {
                tracing::info!("call button pressed; ringing the doorbell service");
                self.notifier.ring();
            }
            DeviceEvent::TamperDetected => {
                tracing::warn!("device reported tamper");
                self.tamper.raise();
            }
            DeviceEvent::Other(kind) => {
                tracing::debug!("ignoring device event: {}", kind);
            }
        }
    }
}
