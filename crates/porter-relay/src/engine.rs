use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;

use porter_audio::constants::FRAME_BYTES;
use porter_audio::{AudioFrame, CaptureDevice, FrameProducer, Heartbeat};
use porter_foundation::clock::SharedClock;
use porter_foundation::{retry, CaptureError, SessionError};

use crate::events::TamperFlag;
use crate::session::{shared_channel, SharedChannel, VoiceSession};
use crate::state::{CallCommand, CallStateMachine};

#[derive(Debug, Clone, Copy)]
pub struct RelayConfig {
    /// Unbroken silence that ends a call.
    pub hangup_after: Duration,
    /// Total attempts when establishing a voice channel.
    pub open_attempts: u32,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            hangup_after: Duration::from_millis(5000),
            open_attempts: 4,
        }
    }
}

/// Fatal conditions that end the capture loop. Everything here terminates
/// the process; tolerated failures (sends, notifications) never surface as
/// a `RelayError`.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("voice channel open failed after {attempts} attempts: {source}")]
    ChannelOpen {
        attempts: u32,
        #[source]
        source: SessionError,
    },

    #[error("voice channel close failed: {0}")]
    ChannelClose(SessionError),

    #[error("capture read failed: {0}")]
    Capture(#[from] CaptureError),

    #[error("overrun recovery failed: {0}")]
    Recovery(CaptureError),
}

#[derive(Debug, Default)]
pub struct RelayStats {
    pub frames_captured: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub silent_frames: AtomicU64,
    pub voiced_frames: AtomicU64,
    pub overruns: AtomicU64,
    pub sends_ok: AtomicU64,
    pub sends_failed: AtomicU64,
    pub calls_started: AtomicU64,
    pub calls_ended: AtomicU64,
    pub channel_restarts: AtomicU64,
}

/// The capture loop: reads one frame at a time from the soundcard, feeds
/// the heartbeat, classifies, stages the frame for the outbound consumer,
/// and runs the call state machine. Owns the voice channel lifecycle; the
/// consumer pump only ever borrows the handle for sends.
pub struct RelayEngine<D: CaptureDevice, S: VoiceSession> {
    device: D,
    session: Arc<S>,
    machine: CallStateMachine,
    producer: FrameProducer,
    channel: SharedChannel<S>,
    tamper: TamperFlag,
    heartbeat: Arc<Heartbeat>,
    stats: Arc<RelayStats>,
    clock: SharedClock,
    config: RelayConfig,
}

impl<D, S> RelayEngine<D, S>
where
    D: CaptureDevice + 'static,
    S: VoiceSession,
{
    pub fn new(
        device: D,
        session: Arc<S>,
        producer: FrameProducer,
        tamper: TamperFlag,
        clock: SharedClock,
        config: RelayConfig,
    ) -> Self {
        Self {
            device,
            session,
            machine: CallStateMachine::new(config.hangup_after, Arc::clone(&clock)),
            producer,
            channel: shared_channel::<S>(),
            tamper,
            heartbeat: Arc::new(Heartbeat::new(Arc::clone(&clock))),
            stats: Arc::new(RelayStats::default()),
            clock,
            config,
        }
    }

    /// Liveness timestamp for the watchdog.
    pub fn heartbeat(&self) -> Arc<Heartbeat> {
        Arc::clone(&self.heartbeat)
    }

    /// The channel handle slot shared with the consumer pump.
    pub fn shared_channel(&self) -> SharedChannel<S> {
        Arc::clone(&self.channel)
    }

    pub fn stats(&self) -> Arc<RelayStats> {
        Arc::clone(&self.stats)
    }

    pub fn spawn(self, running: Arc<AtomicBool>) -> io::Result<JoinHandle<Result<(), RelayError>>> {
        thread::Builder::new()
            .name("relay-capture".to_string())
            .spawn(move || self.run(running))
    }

    pub fn run(mut self, running: Arc<AtomicBool>) -> Result<(), RelayError> {
        tracing::info!("capture loop running");
        let mut buf = [0u8; FRAME_BYTES];
        while running.load(Ordering::SeqCst) {
            match self.device.read_frame(&mut buf) {
                Ok(()) => {}
                Err(CaptureError::Overrun) => {
                    self.stats.overruns.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!("capture overrun; running device recovery");
                    self.device.recover_overrun().map_err(RelayError::Recovery)?;
                    continue;
                }
                Err(err) => return Err(err.into()),
            }

            self.heartbeat.beat();
            let frame = AudioFrame::new(buf, self.clock.now());

            // Classification strictly precedes the state machine, which
            // strictly precedes any side effect derived from this frame.
            let silent = frame.is_silent();
            if silent {
                self.stats.silent_frames.fetch_add(1, Ordering::Relaxed);
            } else {
                self.stats.voiced_frames.fetch_add(1, Ordering::Relaxed);
            }
            self.stats.frames_captured.fetch_add(1, Ordering::Relaxed);

            let displaced = self.producer.publish(frame);
            if displaced {
                self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
            }

            let tamper = self.tamper.take();
            if let Some(command) = self.machine.on_frame(silent, tamper) {
                self.execute(command)?;
            }
        }
        tracing::info!("capture loop stopped");
        Ok(())
    }

    fn execute(&mut self, command: CallCommand) -> Result<(), RelayError> {
        match command {
            CallCommand::OpenChannel => {
                let channel = self.open_with_retry()?;
                *self.channel.lock() = Some(channel);
                self.producer.set_relay_enabled(true);
                self.machine.channel_opened();
                self.stats.calls_started.fetch_add(1, Ordering::Relaxed);
                tracing::info!("voice channel open; relay live");
            }
            CallCommand::CloseChannel => {
                self.producer.set_relay_enabled(false);
                let channel = self.channel.lock().take();
                if let Some(channel) = channel {
                    self.session
                        .close_voice_channel(channel)
                        .map_err(RelayError::ChannelClose)?;
                }
                self.machine.channel_closed();
                self.stats.calls_ended.fetch_add(1, Ordering::Relaxed);
                tracing::info!("voice channel closed; relay idle");
            }
            CallCommand::RestartChannel => {
                // The relay stays enabled: the call is still live from the
                // outside, and a send racing the swap is tolerated like any
                // other send failure.
                let stale = self.channel.lock().take();
                if let Some(channel) = stale {
                    self.session
                        .close_voice_channel(channel)
                        .map_err(RelayError::ChannelClose)?;
                }
                let fresh = self.open_with_retry()?;
                *self.channel.lock() = Some(fresh);
                self.stats.channel_restarts.fetch_add(1, Ordering::Relaxed);
                tracing::info!("voice channel restarted after tamper");
            }
        }
        Ok(())
    }

    fn open_with_retry(&self) -> Result<S::Channel, RelayError> {
        let attempts = self.config.open_attempts;
        retry::with_attempts("voice channel open", attempts, || {
            self.session.open_voice_channel()
        })
        .map_err(|source| RelayError::ChannelOpen { attempts, source })
    }
}
