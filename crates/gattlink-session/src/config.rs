use std::path::Path;
use std::time::Duration;

use gattlink_frame::{
    FragmentLimit, FrameConfig, FramingPolicy, DEFAULT_MAX_FRAGMENT_BYTES,
    DEFAULT_MAX_MESSAGE_BYTES,
};
use gattlink_transport::Characteristic;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SessionError};

/// Reference busy window: how long a command may wait for its response.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

/// Nordic UART service, the common serial-over-GATT layout.
pub const DEFAULT_SERVICE: &str = "6e400001-b5a3-f393-e0a9-e50e24dcca9e";
/// Characteristic the central writes commands to.
pub const DEFAULT_TX_CHARACTERISTIC: &str = "6e400002-b5a3-f393-e0a9-e50e24dcca9e";
/// Characteristic the peripheral notifies responses on.
pub const DEFAULT_RX_CHARACTERISTIC: &str = "6e400003-b5a3-f393-e0a9-e50e24dcca9e";

/// What `maxFragmentBytes` counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitMode {
    /// Base64 characters per write.
    #[default]
    Encoded,
    /// Raw bytes per write before base64 (legacy links).
    Raw,
}

/// Receive-side message boundary detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Framing {
    #[default]
    SentinelScan,
    StreamingScan,
}

/// Link configuration, loadable from a camelCase JSON object.
///
/// ```json
/// { "maxFragmentBytes": 180, "interFragmentDelayMs": 200, "busyTimeoutMs": 5000 }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct LinkConfig {
    pub max_fragment_bytes: usize,
    pub fragment_limit: LimitMode,
    pub inter_fragment_delay_ms: u64,
    pub busy_timeout_ms: u64,
    pub framing: Framing,
    pub max_message_bytes: usize,
    pub write_with_response: bool,
    pub service: String,
    pub tx_characteristic: String,
    pub rx_characteristic: String,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            max_fragment_bytes: DEFAULT_MAX_FRAGMENT_BYTES,
            fragment_limit: LimitMode::Encoded,
            inter_fragment_delay_ms: 200,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT.as_millis() as u64,
            framing: Framing::SentinelScan,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            write_with_response: false,
            service: DEFAULT_SERVICE.to_string(),
            tx_characteristic: DEFAULT_TX_CHARACTERISTIC.to_string(),
            rx_characteristic: DEFAULT_RX_CHARACTERISTIC.to_string(),
        }
    }
}

impl LinkConfig {
    /// Parse and validate a JSON config document.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)
            .map_err(|err| SessionError::Config(format!("parse failed: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|err| {
            SessionError::Config(format!("failed reading {}: {err}", path.display()))
        })?;
        Self::from_json(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.busy_timeout_ms == 0 {
            return Err(SessionError::Config(
                "busyTimeoutMs must be greater than zero".to_string(),
            ));
        }
        if self.service.is_empty()
            || self.tx_characteristic.is_empty()
            || self.rx_characteristic.is_empty()
        {
            return Err(SessionError::Config(
                "service and characteristic identifiers must not be empty".to_string(),
            ));
        }
        self.frame_config()
            .validate()
            .map_err(|err| SessionError::Config(err.to_string()))
    }

    pub fn frame_config(&self) -> FrameConfig {
        FrameConfig {
            fragment_limit: match self.fragment_limit {
                LimitMode::Encoded => FragmentLimit::Encoded(self.max_fragment_bytes),
                LimitMode::Raw => FragmentLimit::Raw(self.max_fragment_bytes),
            },
            inter_fragment_delay: Duration::from_millis(self.inter_fragment_delay_ms),
            policy: match self.framing {
                Framing::SentinelScan => FramingPolicy::SentinelScan,
                Framing::StreamingScan => FramingPolicy::StreamingScan,
            },
            max_message_bytes: self.max_message_bytes,
            write_with_response: self.write_with_response,
        }
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Characteristic commands are written to.
    pub fn tx(&self) -> Characteristic {
        Characteristic::new(&self.service, &self.tx_characteristic)
    }

    /// Characteristic responses are notified on.
    pub fn rx(&self) -> Characteristic {
        Characteristic::new(&self.service, &self.rx_characteristic)
    }
}
