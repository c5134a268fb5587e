/// Bytes per captured frame: 20 ms of mono 8-bit mu-law at 8 kHz.
pub const FRAME_BYTES: usize = 160;

/// Mu-law encodes digital silence as 0xFF.
pub const SILENCE_BYTE: u8 = 0xFF;

/// Sample rate the intercom's voice channel speaks.
pub const SAMPLE_RATE_HZ: u32 = 8000;

pub const CHANNELS: u32 = 1;

/// Capture latency requested from the soundcard, in microseconds. Bounds
/// how long a single blocking read can take.
pub const LATENCY_US: u32 = 500_000;
