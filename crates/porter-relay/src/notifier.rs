use std::time::Duration;

use porter_foundation::{retry, NotifyError};

/// Total attempts per button press.
const NOTIFY_ATTEMPTS: u32 = 4;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct DoorbellConfig {
    pub host: String,
    pub port: u16,
    pub path: String,
}

/// Thin GET caller for the doorbell endpoint. Failures never escalate past
/// an error log; a missed ring must not take the bridge down.
pub struct DoorbellNotifier {
    http: reqwest::blocking::Client,
    url: String,
}

impl DoorbellNotifier {
    pub fn new(config: &DoorbellConfig) -> Result<Self, NotifyError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| NotifyError::Transport(err.to_string()))?;

        let path = if config.path.starts_with('/') {
            config.path.clone()
        } else {
            format!("/{}", config.path)
        };
        Ok(Self {
            http,
            url: format!("http://{}:{}{}", config.host, config.port, path),
        })
    }

    /// Ring the doorbell endpoint, retrying immediately up to the attempt
    /// budget. Returns whether any attempt got through.
    pub fn ring(&self) -> bool {
        match retry::with_attempts("doorbell notification", NOTIFY_ATTEMPTS, || self.attempt()) {
            Ok(()) => {
                tracing::info!("doorbell service notified");
                true
            }
            Err(err) => {
                tracing::error!(
                    "doorbell notification abandoned after {} attempts: {}",
                    NOTIFY_ATTEMPTS,
                    err
                );
                false
            }
        }
    }

    fn attempt(&self) -> Result<(), NotifyError> {
        let response = self
            .http
            .get(&self.url)
            .send()
            .map_err(|err| NotifyError::Transport(err.to_string()))?;
        let status = response.status().as_u16();
        if status >= 300 {
            return Err(NotifyError::Status(status));
        }
        Ok(())
    }
}
