pub mod consumer;
pub mod engine;
pub mod events;
pub mod notifier;
pub mod session;
pub mod state;

// Public API
pub use consumer::VoiceChannelConsumer;
pub use engine::{RelayConfig, RelayEngine, RelayError, RelayStats};
pub use events::{DeviceEvent, EventPump, TamperFlag};
pub use notifier::{DoorbellConfig, DoorbellNotifier};
pub use session::{shared_channel, SharedChannel, VoiceSession};
pub use state::{CallCommand, CallState, CallStateMachine};
