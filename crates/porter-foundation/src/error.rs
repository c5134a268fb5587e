use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("capture subsystem error: {0}")]
    Capture(#[from] CaptureError),

    #[error("device session error: {0}")]
    Session(#[from] SessionError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("shutdown requested")]
    ShutdownRequested,

    #[error("fatal error, cannot recover: {0}")]
    Fatal(String),
}

/// Errors raised by the soundcard read path.
///
/// An overrun is the one recoverable failure class: the device keeps running
/// and a recovery sequence re-arms it. Everything else ends the process.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("capture overrun, device read fell behind")]
    Overrun,

    #[error("short read from capture device: {got}/{want} frames")]
    ShortRead { got: usize, want: usize },

    #[error("ALSA error: {0}")]
    Alsa(#[from] alsa::Error),

    #[error("capture device unrecoverable: {0}")]
    Fatal(String),
}

/// Errors raised by the intercom's voice-channel surface.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("voice channel open refused: {0}")]
    Open(String),

    #[error("voice channel close failed: {0}")]
    Close(String),

    #[error("audio send failed: {0}")]
    Send(String),

    #[error("device protocol error: {0}")]
    Protocol(String),
}

/// Errors raised when ringing the doorbell endpoint.
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("doorbell endpoint answered HTTP {0}")]
    Status(u16),

    #[error("doorbell request failed: {0}")]
    Transport(String),
}
