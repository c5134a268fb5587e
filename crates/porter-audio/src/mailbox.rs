use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::frame::AudioFrame;

/// Single-slot handoff between the capture loop and the outbound voice
/// consumer, built on a bounded capacity-1 channel.
///
/// The contract is explicitly best-effort, newest-frame-wins: the producer
/// never waits for the consumer, and a frame still staged from the previous
/// iteration is dropped in favor of the new one. For a live relay only the
/// most recent sample matters.
pub struct FrameMailbox;

impl FrameMailbox {
    pub fn new() -> (FrameProducer, FrameConsumer) {
        let (tx, rx) = bounded(1);
        let relay_enabled = Arc::new(AtomicBool::new(false));
        (
            FrameProducer {
                tx,
                drain: rx.clone(),
                relay_enabled: Arc::clone(&relay_enabled),
            },
            FrameConsumer { rx, relay_enabled },
        )
    }
}

/// Capture-loop half of the mailbox.
pub struct FrameProducer {
    tx: Sender<AudioFrame>,
    drain: Receiver<AudioFrame>,
    relay_enabled: Arc<AtomicBool>,
}

impl FrameProducer {
    /// Stage a frame without blocking. Returns true when a previously staged
    /// frame had to be dropped to make room.
    pub fn publish(&self, frame: AudioFrame) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => false,
            Err(TrySendError::Full(frame)) => {
                let _ = self.drain.try_recv();
                tracing::trace!("outbound consumer lagging; dropped one staged frame");
                let _ = self.tx.try_send(frame);
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Gate for the consumer's fast no-op path. Disabling also clears any
    /// staged frame so the next call never starts with stale audio.
    pub fn set_relay_enabled(&self, enabled: bool) {
        self.relay_enabled.store(enabled, Ordering::SeqCst);
        if !enabled {
            let _ = self.drain.try_recv();
        }
    }

    pub fn relay_enabled(&self) -> bool {
        self.relay_enabled.load(Ordering::SeqCst)
    }
}

/// Voice-consumer half of the mailbox.
pub struct FrameConsumer {
    rx: Receiver<AudioFrame>,
    relay_enabled: Arc<AtomicBool>,
}

impl FrameConsumer {
    /// Returns `None` immediately while the relay is disabled so a consumer
    /// invoked with no live call never waits. While enabled, blocks up to
    /// `timeout` for the next frame; a timeout is recoverable and simply
    /// yields `None`.
    pub fn take(&self, timeout: Duration) -> Option<AudioFrame> {
        if !self.relay_enabled.load(Ordering::SeqCst) {
            return None;
        }
        self.rx.recv_timeout(timeout).ok()
    }

    pub fn relay_enabled(&self) -> bool {
        self.relay_enabled.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::FRAME_BYTES;
    use std::time::Instant;

    fn frame(tag: u8) -> AudioFrame {
        AudioFrame::new([tag; FRAME_BYTES], Instant::now())
    }

    #[test]
    fn delivers_a_published_frame() {
        let (producer, consumer) = FrameMailbox::new();
        producer.set_relay_enabled(true);
        assert!(!producer.publish(frame(1)));
        let got = consumer.take(Duration::from_millis(100)).unwrap();
        assert_eq!(got.bytes[0], 1);
    }

    #[test]
    fn newest_frame_wins_when_consumer_lags() {
        let (producer, consumer) = FrameMailbox::new();
        producer.set_relay_enabled(true);
        assert!(!producer.publish(frame(1)));
        assert!(producer.publish(frame(2)), "stale frame should be displaced");
        let got = consumer.take(Duration::from_millis(100)).unwrap();
        assert_eq!(got.bytes[0], 2);
        assert!(consumer.take(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn take_is_a_no_op_while_relay_disabled() {
        let (producer, consumer) = FrameMailbox::new();
        producer.publish(frame(1));
        let started = Instant::now();
        assert!(consumer.take(Duration::from_secs(5)).is_none());
        // The disabled path must not have waited out the timeout.
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn disabling_relay_clears_the_staged_frame() {
        let (producer, consumer) = FrameMailbox::new();
        producer.set_relay_enabled(true);
        producer.publish(frame(1));
        producer.set_relay_enabled(false);
        producer.set_relay_enabled(true);
        assert!(consumer.take(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn take_times_out_recoverably() {
        let (producer, consumer) = FrameMailbox::new();
        producer.set_relay_enabled(true);
        assert!(consumer.take(Duration::from_millis(20)).is_none());
        // The mailbox still works afterwards.
        producer.publish(frame(3));
        assert_eq!(consumer.take(Duration::from_millis(100)).unwrap().bytes[0], 3);
    }
}
