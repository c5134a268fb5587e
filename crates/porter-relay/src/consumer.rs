use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use porter_audio::FrameConsumer;

use crate::engine::RelayStats;
use crate::session::{SharedChannel, VoiceSession};

/// How long one take waits for the next frame while the relay is live.
const FRAME_WAIT: Duration = Duration::from_millis(500);
/// Pacing between no-op takes while the relay is disabled.
const IDLE_WAIT: Duration = Duration::from_millis(20);

/// Outbound pump: pulls the newest staged frame from the mailbox and hands
/// it to the session's send primitive. Runs on its own thread, asynchronous
/// to the capture loop. A failed send is logged and tolerated; nothing on
/// this path is ever fatal.
pub struct VoiceChannelConsumer<S: VoiceSession> {
    frames: FrameConsumer,
    session: Arc<S>,
    channel: SharedChannel<S>,
    stats: Arc<RelayStats>,
}

impl<S: VoiceSession> VoiceChannelConsumer<S> {
    pub fn new(
        frames: FrameConsumer,
        session: Arc<S>,
        channel: SharedChannel<S>,
        stats: Arc<RelayStats>,
    ) -> Self {
        Self {
            frames,
            session,
            channel,
            stats,
        }
    }

    pub fn spawn(self, running: Arc<AtomicBool>) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("voice-consumer".to_string())
            .spawn(move || self.run(running))
    }

    fn run(self, running: Arc<AtomicBool>) {
        while running.load(Ordering::SeqCst) {
            let Some(frame) = self.frames.take(FRAME_WAIT) else {
                if !self.frames.relay_enabled() {
                    thread::sleep(IDLE_WAIT);
                }
                continue;
            };

            // Clone the handle out and drop the lock before the send.
            let channel = self.channel.lock().clone();
            let Some(channel) = channel else { continue };

            match self.session.send_audio(&channel, &frame) {
                Ok(()) => {
                    self.stats.sends_ok.fetch_add(1, Ordering::Relaxed);
                    tracing::trace!("forwarded one frame to the intercom");
                }
                Err(err) => {
                    self.stats.sends_failed.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!("audio send failed (tolerated): {}", err);
                }
            }
        }
    }
}
