use parking_lot::RwLock;
use porter_foundation::clock::SharedClock;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;

/// Liveness timestamp, fed once per capture-loop iteration and read only by
/// the watchdog.
pub struct Heartbeat {
    last_beat: RwLock<Instant>,
    clock: SharedClock,
}

impl Heartbeat {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            last_beat: RwLock::new(clock.now()),
            clock,
        }
    }

    pub fn beat(&self) {
        *self.last_beat.write() = self.clock.now();
    }

    pub fn since_last(&self) -> Duration {
        self.clock.now().duration_since(*self.last_beat.read())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WatchdogConfig {
    /// How often the watchdog wakes up to look at the heartbeat.
    pub check_interval: Duration,
    /// How stale the heartbeat may grow before the capture loop counts as
    /// dead. Configurable separately from the check cadence.
    pub stale_after: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(10),
            stale_after: Duration::from_secs(10),
        }
    }
}

/// Emitted to the supervisor when the capture loop has stopped beating.
#[derive(Debug)]
pub struct WatchdogAlarm {
    pub stalled_for: Duration,
}

/// The sole supervision mechanism for a stalled or crashed capture loop.
/// It never intervenes in-process: a stale heartbeat raises an alarm and the
/// supervisor performs fatal shutdown.
pub struct WatchdogMonitor {
    heartbeat: Arc<Heartbeat>,
    config: WatchdogConfig,
    clock: SharedClock,
    alarm_tx: UnboundedSender<WatchdogAlarm>,
}

impl WatchdogMonitor {
    pub fn new(
        heartbeat: Arc<Heartbeat>,
        config: WatchdogConfig,
        clock: SharedClock,
        alarm_tx: UnboundedSender<WatchdogAlarm>,
    ) -> Self {
        Self {
            heartbeat,
            config,
            clock,
            alarm_tx,
        }
    }

    /// One staleness decision, separated from the thread loop so tests can
    /// drive it with a virtual clock.
    pub fn check_once(&self) -> Option<WatchdogAlarm> {
        let stalled_for = self.heartbeat.since_last();
        (stalled_for > self.config.stale_after).then_some(WatchdogAlarm { stalled_for })
    }

    pub fn spawn(self, running: Arc<AtomicBool>) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("watchdog".to_string())
            .spawn(move || {
                while running.load(Ordering::SeqCst) {
                    self.clock.sleep(self.config.check_interval);
                    if !running.load(Ordering::SeqCst) {
                        break;
                    }
                    if let Some(alarm) = self.check_once() {
                        tracing::error!(
                            "capture loop stalled: no heartbeat for {:?} (threshold {:?})",
                            alarm.stalled_for,
                            self.config.stale_after
                        );
                        let _ = self.alarm_tx.send(alarm);
                        return;
                    }
                }
            })
    }
}
