//! Watchdog tests
//!
//! The staleness decision is exercised deterministically through TestClock;
//! one end-to-end test runs the real thread with tight real-time intervals.

use porter_audio::{Heartbeat, WatchdogConfig, WatchdogMonitor};
use porter_foundation::clock::{real_clock, SharedClock, TestClock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn monitor_with_clock(
    clock: SharedClock,
    config: WatchdogConfig,
) -> (
    Arc<Heartbeat>,
    WatchdogMonitor,
    tokio::sync::mpsc::UnboundedReceiver<porter_audio::WatchdogAlarm>,
) {
    let heartbeat = Arc::new(Heartbeat::new(Arc::clone(&clock)));
    let (alarm_tx, alarm_rx) = tokio::sync::mpsc::unbounded_channel();
    let monitor = WatchdogMonitor::new(Arc::clone(&heartbeat), config, clock, alarm_tx);
    (heartbeat, monitor, alarm_rx)
}

#[test]
fn fresh_heartbeat_is_not_stale() {
    let clock = Arc::new(TestClock::new());
    let (_hb, monitor, _rx) = monitor_with_clock(clock, WatchdogConfig::default());
    assert!(monitor.check_once().is_none());
}

#[test]
fn heartbeat_within_threshold_is_not_stale() {
    let clock = Arc::new(TestClock::new());
    let (_hb, monitor, _rx) = monitor_with_clock(clock.clone(), WatchdogConfig::default());
    clock.advance(Duration::from_secs(9));
    assert!(monitor.check_once().is_none());
}

#[test]
fn starved_heartbeat_raises_an_alarm() {
    let clock = Arc::new(TestClock::new());
    let (_hb, monitor, _rx) = monitor_with_clock(clock.clone(), WatchdogConfig::default());
    clock.advance(Duration::from_secs(11));
    let alarm = monitor.check_once().expect("11s stall must trip a 10s threshold");
    assert_eq!(alarm.stalled_for, Duration::from_secs(11));
}

#[test]
fn beat_resets_staleness() {
    let clock = Arc::new(TestClock::new());
    let (heartbeat, monitor, _rx) = monitor_with_clock(clock.clone(), WatchdogConfig::default());
    clock.advance(Duration::from_secs(9));
    heartbeat.beat();
    clock.advance(Duration::from_secs(9));
    assert!(monitor.check_once().is_none());
}

#[test]
fn staleness_threshold_is_independent_of_check_interval() {
    let clock = Arc::new(TestClock::new());
    let config = WatchdogConfig {
        check_interval: Duration::from_secs(1),
        stale_after: Duration::from_secs(30),
    };
    let (_hb, monitor, _rx) = monitor_with_clock(clock.clone(), config);
    clock.advance(Duration::from_secs(10));
    assert!(monitor.check_once().is_none());
    clock.advance(Duration::from_secs(21));
    assert!(monitor.check_once().is_some());
}

#[test]
fn watchdog_thread_alarms_on_a_real_stall() {
    let config = WatchdogConfig {
        check_interval: Duration::from_millis(20),
        stale_after: Duration::from_millis(50),
    };
    let clock = real_clock();
    let (_heartbeat, monitor, mut alarm_rx) = monitor_with_clock(clock, config);

    let running = Arc::new(AtomicBool::new(true));
    let handle = monitor.spawn(Arc::clone(&running)).unwrap();

    let alarm = alarm_rx.blocking_recv().expect("a stall must raise an alarm");
    assert!(alarm.stalled_for >= Duration::from_millis(50));

    running.store(false, Ordering::SeqCst);
    let _ = handle.join();
}

#[test]
fn watchdog_thread_stays_quiet_while_fed() {
    let config = WatchdogConfig {
        check_interval: Duration::from_millis(10),
        stale_after: Duration::from_millis(80),
    };
    let clock = real_clock();
    let (heartbeat, monitor, mut alarm_rx) = monitor_with_clock(clock, config);

    let running = Arc::new(AtomicBool::new(true));
    let handle = monitor.spawn(Arc::clone(&running)).unwrap();

    for _ in 0..10 {
        heartbeat.beat();
        std::thread::sleep(Duration::from_millis(20));
    }
    assert!(alarm_rx.try_recv().is_err(), "fed heartbeat must not alarm");

    running.store(false, Ordering::SeqCst);
    let _ = handle.join();
}
