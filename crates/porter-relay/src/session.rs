use parking_lot::Mutex;
use std::sync::Arc;

use porter_audio::AudioFrame;
use porter_foundation::SessionError;

/// Port over the intercom's voice-channel surface. The binary implements
/// this against the device's actual transport; tests use recording fakes.
pub trait VoiceSession: Send + Sync + 'static {
    /// Handle for one open outbound channel. Cloned out briefly by the
    /// consumer for sends, so it must be cheap to copy.
    type Channel: Clone + Send + 'static;

    fn open_voice_channel(&self) -> Result<Self::Channel, SessionError>;

    fn close_voice_channel(&self, channel: Self::Channel) -> Result<(), SessionError>;

    fn send_audio(&self, channel: &Self::Channel, frame: &AudioFrame) -> Result<(), SessionError>;
}

/// The open channel handle, shared between the relay engine (sole writer)
/// and the consumer pump (reader). Guarded by its own lock, distinct from
/// the frame mailbox; neither is held across a blocking device call.
pub type SharedChannel<S> = Arc<Mutex<Option<<S as VoiceSession>::Channel>>>;

pub fn shared_channel<S: VoiceSession>() -> SharedChannel<S> {
    Arc::new(Mutex::new(None))
}
