use porter_foundation::clock::SharedClock;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    /// No voice channel open.
    Idle,
    /// Voice channel open, audio relaying.
    Active,
}

/// Side effect the capture loop must perform after evaluating a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallCommand {
    OpenChannel,
    CloseChannel,
    /// Close the current channel and open a fresh one without leaving the
    /// Active state.
    RestartChannel,
}

/// Call lifecycle driven once per captured frame.
///
/// The machine only decides; the engine performs the command and confirms
/// the outcome through `channel_opened` / `channel_closed`, so the state
/// never runs ahead of the device.
pub struct CallStateMachine {
    state: CallState,
    silence_started: Option<Instant>,
    hangup_after: Duration,
    clock: SharedClock,
}

impl CallStateMachine {
    pub fn new(hangup_after: Duration, clock: SharedClock) -> Self {
        Self {
            state: CallState::Idle,
            silence_started: None,
            hangup_after,
            clock,
        }
    }

    /// Evaluate one captured frame. `tamper` is the consumed-and-cleared
    /// tamper flag for this iteration; it outranks the silence bookkeeping
    /// because the device's channel state is unreliable after tamper.
    pub fn on_frame(&mut self, silent: bool, tamper: bool) -> Option<CallCommand> {
        if tamper && self.state == CallState::Active {
            tracing::warn!("tamper reported mid-call; forcing a voice channel restart");
            return Some(CallCommand::RestartChannel);
        }

        match self.state {
            CallState::Idle => {
                if !silent {
                    tracing::info!("heard audio while idle; starting relay to the intercom");
                    Some(CallCommand::OpenChannel)
                } else {
                    None
                }
            }
            CallState::Active => {
                if silent {
                    match self.silence_started {
                        None => {
                            tracing::info!(
                                "silence onset; hanging up after {:?} without voice",
                                self.hangup_after
                            );
                            self.silence_started = Some(self.clock.now());
                            None
                        }
                        Some(started)
                            if self.clock.now().duration_since(started) > self.hangup_after =>
                        {
                            tracing::info!(
                                "observed {:?} of unbroken silence; hanging up",
                                self.hangup_after
                            );
                            Some(CallCommand::CloseChannel)
                        }
                        Some(_) => None,
                    }
                } else {
                    if self.silence_started.take().is_some() {
                        tracing::debug!("heard audio again; hang-up postponed");
                    }
                    None
                }
            }
        }
    }

    /// Confirmation that an open command succeeded.
    pub fn channel_opened(&mut self) {
        self.state = CallState::Active;
        self.silence_started = None;
    }

    /// Confirmation that a close command succeeded.
    pub fn channel_closed(&mut self) {
        self.state = CallState::Idle;
        self.silence_started = None;
    }

    pub fn state(&self) -> CallState {
        self.state
    }
}
