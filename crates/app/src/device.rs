//! HTTP adapter for the intercom device. Implements the relay core's
//! `VoiceSession` port and feeds the bounded device-event queue from the
//! device's alert stream. The vendor's own SDK is deliberately not linked;
//! everything the bridge needs is reachable over the device's HTTP surface.

use anyhow::{bail, Context, Result};
use crossbeam_channel::{Sender, TrySendError};
use reqwest::blocking::Client;
use std::io::{BufRead, BufReader};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use porter_audio::AudioFrame;
use porter_foundation::SessionError;
use porter_relay::{DeviceEvent, VoiceSession};

use crate::config::DeviceSettings;

const CONTROL_TIMEOUT: Duration = Duration::from_secs(5);
const EVENT_RETRY_WAIT: Duration = Duration::from_secs(3);

/// Audio compression settings pushed to the device at startup: G.711 mu-law
/// at 8 kHz, matching what the soundcard delivers.
const AUDIO_CONFIG_BODY: &str = "<TwoWayAudioChannel>\
<id>1</id>\
<enabled>true</enabled>\
<audioCompressionType>G.711ulaw</audioCompressionType>\
<audioInputType>MicIn</audioInputType>\
</TwoWayAudioChannel>";

pub struct IntercomClient {
    /// Bounded-timeout client for control calls and audio sends.
    control: Client,
    /// Timeout-free client for the long-lived alert stream.
    stream: Client,
    base: String,
    username: String,
    password: String,
    next_handle: AtomicU32,
}

impl IntercomClient {
    /// Establish the session: build the clients and probe the device so a
    /// bad address or credentials fail at startup, not mid-call.
    pub fn connect(settings: &DeviceSettings) -> Result<Arc<Self>> {
        let control = Client::builder()
            .timeout(CONTROL_TIMEOUT)
            .build()
            .context("building device control client")?;
        let stream = Client::builder()
            .build()
            .context("building device stream client")?;

        let client = Arc::new(Self {
            control,
            stream,
            base: format!("http://{}:{}", settings.host, settings.port),
            username: settings.username.clone(),
            password: settings.password.clone(),
            next_handle: AtomicU32::new(1),
        });

        let info = client
            .get_text("/ISAPI/System/deviceInfo")
            .context("device refused the session probe")?;
        let model = extract_tag(&info, "model").unwrap_or_else(|| "unknown model".to_string());
        tracing::info!("connected to intercom ({}) at {}", model, client.base);
        Ok(client)
    }

    /// Push the voice-channel audio format to the device.
    pub fn configure_audio(&self) -> Result<()> {
        let response = self
            .control
            .put(self.url("/ISAPI/System/TwoWayAudio/channels/1"))
            .basic_auth(&self.username, Some(&self.password))
            .header("Content-Type", "application/xml")
            .body(AUDIO_CONFIG_BODY)
            .send()
            .context("sending audio configuration")?;
        if !response.status().is_success() {
            bail!("device rejected audio configuration: HTTP {}", response.status());
        }
        tracing::info!("intercom audio configured for G.711 mu-law, 8 kHz");
        Ok(())
    }

    /// Subscribe to the device's alert stream on a dedicated thread, mapping
    /// wire events into the bounded inbound queue. Stream errors reconnect
    /// after a short pause; a full queue drops the event with a warning.
    pub fn subscribe_events(
        self: &Arc<Self>,
        events: Sender<DeviceEvent>,
        running: Arc<AtomicBool>,
    ) -> std::io::Result<JoinHandle<()>> {
        let client = Arc::clone(self);
        thread::Builder::new()
            .name("device-event-feed".to_string())
            .spawn(move || {
                while running.load(Ordering::SeqCst) {
                    match client.stream_events(&events, &running) {
                        Ok(()) => {
                            tracing::warn!("device alert stream ended; reconnecting");
                        }
                        Err(err) => {
                            tracing::warn!("device alert stream failed: {}; reconnecting", err);
                        }
                    }
                    thread::sleep(EVENT_RETRY_WAIT);
                }
            })
    }

    fn stream_events(
        &self,
        events: &Sender<DeviceEvent>,
        running: &Arc<AtomicBool>,
    ) -> Result<()> {
        let response = self
            .stream
            .get(self.url("/ISAPI/Event/notification/alertStream"))
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .context("opening alert stream")?;
        if !response.status().is_success() {
            bail!("alert stream refused: HTTP {}", response.status());
        }
        tracing::info!("subscribed to device events");

        let mut reader = BufReader::new(response);
        let mut line = String::new();
        while running.load(Ordering::SeqCst) {
            line.clear();
            if reader.read_line(&mut line).context("reading alert stream")? == 0 {
                return Ok(());
            }
            let Some(kind) = extract_tag(&line, "eventType") else {
                continue;
            };
            let event = map_event(&kind);
            match events.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(event)) => {
                    tracing::warn!("device event queue full; dropping {:?}", event);
                }
                Err(TrySendError::Disconnected(_)) => return Ok(()),
            }
        }
        Ok(())
    }

    fn get_text(&self, path: &str) -> Result<String> {
        let response = self
            .control
            .get(self.url(path))
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .with_context(|| format!("GET {}", path))?;
        if !response.status().is_success() {
            bail!("GET {} answered HTTP {}", path, response.status());
        }
        response.text().context("reading response body")
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    fn voice_call(&self, path: &str) -> Result<(), String> {
        let response = self
            .control
            .put(self.url(path))
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .map_err(|err| err.to_string())?;
        if !response.status().is_success() {
            return Err(format!("device answered HTTP {}", response.status()));
        }
        Ok(())
    }
}

/// Opaque handle for one open two-way audio session. The id is local,
/// purely for correlating log lines.
#[derive(Clone, Debug)]
pub struct VoiceChannel {
    pub id: u32,
}

impl VoiceSession for IntercomClient {
    type Channel = VoiceChannel;

    fn open_voice_channel(&self) -> std::result::Result<VoiceChannel, SessionError> {
        self.voice_call("/ISAPI/System/TwoWayAudio/channels/1/open")
            .map_err(SessionError::Open)?;
        let id = self.next_handle.fetch_add(1, Ordering::Relaxed);
        tracing::info!("two-way audio open (handle {})", id);
        Ok(VoiceChannel { id })
    }

    fn close_voice_channel(&self, channel: VoiceChannel) -> std::result::Result<(), SessionError> {
        self.voice_call("/ISAPI/System/TwoWayAudio/channels/1/close")
            .map_err(SessionError::Close)?;
        tracing::info!("two-way audio closed (handle {})", channel.id);
        Ok(())
    }

    fn send_audio(
        &self,
        _channel: &VoiceChannel,
        frame: &AudioFrame,
    ) -> std::result::Result<(), SessionError> {
        let response = self
            .control
            .put(self.url("/ISAPI/System/TwoWayAudio/channels/1/audioData"))
            .basic_auth(&self.username, Some(&self.password))
            .header("Content-Type", "application/octet-stream")
            .body(frame.bytes.to_vec())
            .send()
            .map_err(|err| SessionError::Send(err.to_string()))?;
        if !response.status().is_success() {
            return Err(SessionError::Send(format!(
                "device answered HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }
}

fn map_event(kind: &str) -> DeviceEvent {
    match kind {
        "callButton" | "videoIntercom" => DeviceEvent::ButtonPressed,
        "shelterAlarm" | "tamperDetection" => DeviceEvent::TamperDetected,
        other => DeviceEvent::Other(other.to_string()),
    }
}

/// Pull the text content of the first `<tag>...</tag>` pair out of a chunk
/// of device XML. The alert stream emits one element per line, so a full
/// XML parser buys nothing here.
fn extract_tag(haystack: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = haystack.find(&open)? + open.len();
    let end = haystack[start..].find(&close)? + start;
    Some(haystack[start..end].trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_a_tag_from_a_stream_line() {
        let line = "  <eventType>callButton</eventType>\r\n";
        assert_eq!(extract_tag(line, "eventType").as_deref(), Some("callButton"));
    }

    #[test]
    fn missing_tag_yields_none() {
        assert_eq!(extract_tag("<eventState>active</eventState>", "eventType"), None);
    }

    #[test]
    fn maps_wire_event_kinds() {
        assert_eq!(map_event("callButton"), DeviceEvent::ButtonPressed);
        assert_eq!(map_event("videoIntercom"), DeviceEvent::ButtonPressed);
        assert_eq!(map_event("shelterAlarm"), DeviceEvent::TamperDetected);
        assert_eq!(map_event("tamperDetection"), DeviceEvent::TamperDetected);
        assert_eq!(
            map_event("motionDetection"),
            DeviceEvent::Other("motionDetection".to_string())
        );
    }
}
