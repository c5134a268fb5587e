pub mod constants;
pub mod device;
pub mod frame;
pub mod mailbox;
pub mod watchdog;

// Public API
pub use device::{AlsaCapture, CaptureDevice};
pub use frame::AudioFrame;
pub use mailbox::{FrameConsumer, FrameMailbox, FrameProducer};
pub use watchdog::{Heartbeat, WatchdogAlarm, WatchdogConfig, WatchdogMonitor};
