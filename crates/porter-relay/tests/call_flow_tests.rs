//! End-to-end call flow scenarios, driven by a scripted capture device and
//! a recording fake session over virtual time.

use parking_lot::Mutex;
use porter_audio::constants::{FRAME_BYTES, SILENCE_BYTE};
use porter_audio::{AudioFrame, CaptureDevice, FrameMailbox};
use porter_foundation::clock::{SharedClock, TestClock};
use porter_foundation::{CaptureError, SessionError};
use porter_relay::{
    RelayConfig, RelayEngine, RelayError, TamperFlag, VoiceChannelConsumer, VoiceSession,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const FRAME_PERIOD: Duration = Duration::from_millis(20);

// ─── Fakes ──────────────────────────────────────────────────────────

#[derive(Default)]
struct FakeSession {
    log: Mutex<Vec<&'static str>>,
    open_attempts: AtomicU32,
    opens_to_fail: AtomicU32,
    fail_sends: AtomicBool,
}

impl FakeSession {
    fn channel_log(&self) -> Vec<&'static str> {
        self.log
            .lock()
            .iter()
            .copied()
            .filter(|entry| *entry != "send")
            .collect()
    }

    fn sends(&self) -> usize {
        self.log.lock().iter().filter(|entry| **entry == "send").count()
    }
}

impl VoiceSession for FakeSession {
    type Channel = u32;

    fn open_voice_channel(&self) -> Result<u32, SessionError> {
        let attempt = self.open_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let failures_left = self.opens_to_fail.load(Ordering::SeqCst);
        if failures_left > 0 {
            self.opens_to_fail.store(failures_left - 1, Ordering::SeqCst);
            return Err(SessionError::Open("scripted refusal".to_string()));
        }
        self.log.lock().push("open");
        Ok(attempt)
    }

    fn close_voice_channel(&self, _channel: u32) -> Result<(), SessionError> {
        self.log.lock().push("close");
        Ok(())
    }

    fn send_audio(&self, _channel: &u32, _frame: &AudioFrame) -> Result<(), SessionError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(SessionError::Send("scripted send failure".to_string()));
        }
        self.log.lock().push("send");
        Ok(())
    }
}

#[derive(Clone, Copy)]
enum Step {
    Voiced,
    Silent,
    Tamper,
    Overrun,
    Die,
}

/// Capture device that replays a script, advancing the virtual clock by one
/// frame period per delivered frame and stopping the loop when the script
/// runs out.
struct ScriptedDevice {
    steps: VecDeque<Step>,
    clock: Arc<TestClock>,
    tamper: TamperFlag,
    running: Arc<AtomicBool>,
    recoveries: Arc<AtomicU32>,
    fail_recovery: bool,
}

impl ScriptedDevice {
    fn new(
        steps: impl IntoIterator<Item = Step>,
        clock: Arc<TestClock>,
        tamper: TamperFlag,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            steps: steps.into_iter().collect(),
            clock,
            tamper,
            running,
            recoveries: Arc::new(AtomicU32::new(0)),
            fail_recovery: false,
        }
    }
}

impl CaptureDevice for ScriptedDevice {
    fn read_frame(&mut self, frame: &mut [u8; FRAME_BYTES]) -> Result<(), CaptureError> {
        loop {
            let Some(step) = self.steps.pop_front() else {
                self.running.store(false, Ordering::SeqCst);
                frame.fill(SILENCE_BYTE);
                return Ok(());
            };
            match step {
                Step::Voiced => {
                    frame.fill(0x2A);
                    self.clock.advance(FRAME_PERIOD);
                    return Ok(());
                }
                Step::Silent => {
                    frame.fill(SILENCE_BYTE);
                    self.clock.advance(FRAME_PERIOD);
                    return Ok(());
                }
                Step::Tamper => {
                    self.tamper.raise();
                }
                Step::Overrun => return Err(CaptureError::Overrun),
                Step::Die => {
                    return Err(CaptureError::Fatal("scripted device failure".to_string()))
                }
            }
        }
    }

    fn recover_overrun(&mut self) -> Result<(), CaptureError> {
        self.recoveries.fetch_add(1, Ordering::SeqCst);
        if self.fail_recovery {
            return Err(CaptureError::Fatal("scripted recovery failure".to_string()));
        }
        Ok(())
    }
}

struct Harness {
    session: Arc<FakeSession>,
    engine: RelayEngine<ScriptedDevice, FakeSession>,
    running: Arc<AtomicBool>,
    consumer_side: porter_audio::FrameConsumer,
    recoveries: Arc<AtomicU32>,
}

fn harness(steps: Vec<Step>) -> Harness {
    harness_with(steps, FakeSession::default(), false)
}

fn harness_with(steps: Vec<Step>, session: FakeSession, fail_recovery: bool) -> Harness {
    let clock = Arc::new(TestClock::new());
    let tamper = TamperFlag::new();
    let running = Arc::new(AtomicBool::new(true));
    let mut device =
        ScriptedDevice::new(steps, clock.clone(), tamper.clone(), Arc::clone(&running));
    device.fail_recovery = fail_recovery;
    let recoveries = Arc::clone(&device.recoveries);

    let (producer, consumer_side) = FrameMailbox::new();
    let session = Arc::new(session);
    let engine = RelayEngine::new(
        device,
        Arc::clone(&session),
        producer,
        tamper,
        clock as SharedClock,
        RelayConfig::default(),
    );
    Harness {
        session,
        engine,
        running,
        consumer_side,
        recoveries,
    }
}

// ─── Scenarios ──────────────────────────────────────────────────────

#[test]
fn voiced_burst_then_sustained_silence_opens_and_closes_once() {
    // 30 voiced frames then ~6.4s of silence: one open, then one close.
    let mut steps = vec![Step::Voiced; 30];
    steps.extend(vec![Step::Silent; 320]);
    let h = harness(steps);

    h.engine.run(h.running).expect("relay should end cleanly");

    assert_eq!(h.session.channel_log(), vec!["open", "close"]);
    assert!(
        !h.consumer_side.relay_enabled(),
        "relay must be disabled after hang-up"
    );
}

#[test]
fn exhausted_channel_open_is_fatal() {
    let session = FakeSession {
        opens_to_fail: AtomicU32::new(u32::MAX),
        ..Default::default()
    };
    let h = harness_with(vec![Step::Voiced; 3], session, false);

    let err = h.engine.run(h.running).unwrap_err();
    match err {
        RelayError::ChannelOpen { attempts, .. } => assert_eq!(attempts, 4),
        other => panic!("expected ChannelOpen, got {}", other),
    }
    assert_eq!(
        h.session.open_attempts.load(Ordering::SeqCst),
        4,
        "exactly four attempts per start request"
    );
}

#[test]
fn open_succeeding_within_the_budget_is_not_fatal() {
    let session = FakeSession {
        opens_to_fail: AtomicU32::new(3),
        ..Default::default()
    };
    let h = harness_with(vec![Step::Voiced; 5], session, false);

    h.engine.run(h.running).expect("fourth attempt succeeds");
    assert_eq!(h.session.open_attempts.load(Ordering::SeqCst), 4);
    assert_eq!(h.session.channel_log(), vec!["open"]);
}

#[test]
fn tamper_mid_call_restarts_the_channel_and_stays_live() {
    let mut steps = vec![Step::Voiced; 10];
    steps.push(Step::Tamper);
    steps.extend(vec![Step::Voiced; 10]);
    let h = harness(steps);

    let stats = h.engine.stats();
    h.engine.run(h.running).expect("relay should end cleanly");

    assert_eq!(h.session.channel_log(), vec!["open", "close", "open"]);
    assert_eq!(stats.channel_restarts.load(Ordering::Relaxed), 1);
    assert_eq!(
        stats.calls_ended.load(Ordering::Relaxed),
        0,
        "a restart is not a hang-up"
    );
    assert!(
        h.consumer_side.relay_enabled(),
        "the call stays live through a restart"
    );
}

#[test]
fn overrun_runs_recovery_and_continues() {
    let mut steps = vec![Step::Voiced; 5];
    steps.push(Step::Overrun);
    steps.extend(vec![Step::Voiced; 5]);
    let h = harness(steps);

    let stats = h.engine.stats();
    h.engine.run(h.running).expect("overrun is recoverable");

    assert_eq!(h.recoveries.load(Ordering::SeqCst), 1);
    assert_eq!(stats.overruns.load(Ordering::Relaxed), 1);
    assert!(stats.frames_captured.load(Ordering::Relaxed) >= 10);
}

#[test]
fn failed_overrun_recovery_is_fatal() {
    let h = harness_with(vec![Step::Voiced, Step::Overrun], FakeSession::default(), true);
    let err = h.engine.run(h.running).unwrap_err();
    assert!(matches!(err, RelayError::Recovery(_)));
}

#[test]
fn non_overrun_read_error_is_immediately_fatal() {
    let h = harness(vec![Step::Die]);
    let err = h.engine.run(h.running).unwrap_err();
    assert!(matches!(err, RelayError::Capture(CaptureError::Fatal(_))));
}

// ─── Consumer pump ──────────────────────────────────────────────────

fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
    let started = Instant::now();
    while started.elapsed() < deadline {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    done()
}

#[test]
fn consumer_forwards_staged_frames() {
    let (producer, frames) = FrameMailbox::new();
    let session = Arc::new(FakeSession::default());
    let channel = porter_relay::shared_channel::<FakeSession>();
    *channel.lock() = Some(1);
    let stats = Arc::new(porter_relay::RelayStats::default());

    let running = Arc::new(AtomicBool::new(true));
    let consumer = VoiceChannelConsumer::new(
        frames,
        Arc::clone(&session),
        channel,
        Arc::clone(&stats),
    );
    let handle = consumer.spawn(Arc::clone(&running)).unwrap();

    producer.set_relay_enabled(true);
    let delivered = wait_until(Duration::from_secs(2), || {
        producer.publish(AudioFrame::new([0x2A; FRAME_BYTES], Instant::now()));
        session.sends() >= 3
    });
    assert!(delivered, "consumer should forward staged frames");

    running.store(false, Ordering::SeqCst);
    let _ = handle.join();
}

#[test]
fn failed_sends_are_tolerated() {
    let (producer, frames) = FrameMailbox::new();
    let session = Arc::new(FakeSession {
        fail_sends: AtomicBool::new(true),
        ..Default::default()
    });
    let channel = porter_relay::shared_channel::<FakeSession>();
    *channel.lock() = Some(1);
    let stats = Arc::new(porter_relay::RelayStats::default());

    let running = Arc::new(AtomicBool::new(true));
    let consumer = VoiceChannelConsumer::new(
        frames,
        Arc::clone(&session),
        channel,
        Arc::clone(&stats),
    );
    let handle = consumer.spawn(Arc::clone(&running)).unwrap();

    producer.set_relay_enabled(true);
    let kept_running = wait_until(Duration::from_secs(2), || {
        producer.publish(AudioFrame::new([0x2A; FRAME_BYTES], Instant::now()));
        stats.sends_failed.load(Ordering::Relaxed) >= 2
    });
    assert!(kept_running, "the pump must survive failing sends");
    assert_eq!(stats.sends_ok.load(Ordering::Relaxed), 0);

    running.store(false, Ordering::SeqCst);
    let _ = handle.join();
}
