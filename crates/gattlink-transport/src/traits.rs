use std::fmt;
use std::future::Future;

use tokio::sync::mpsc;

use crate::error::Result;

/// Stream of base64-encoded notification values, in arrival order.
pub type Notifications = mpsc::UnboundedReceiver<String>;

/// Address of a characteristic on the peripheral.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Characteristic {
    /// Service identifier (usually a UUID string).
    pub service: String,
    /// Characteristic identifier within the service.
    pub characteristic: String,
}

impl Characteristic {
    pub fn new(service: impl Into<String>, characteristic: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            characteristic: characteristic.into(),
        }
    }
}

impl fmt::Display for Characteristic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.service, self.characteristic)
    }
}

/// A connected link to one peripheral.
///
/// Values crossing this boundary are base64 strings; the transport never
/// looks inside them. Encoding and decoding happen in the framing layer.
pub trait LinkTransport: Send + Sync + 'static {
    /// Whether the link is currently usable.
    fn is_connected(&self) -> bool;

    /// Write one value to a characteristic.
    ///
    /// Resolves once the transport accepted the value (or the peripheral
    /// acknowledged it, when `with_response` is set).
    fn write(
        &self,
        characteristic: &Characteristic,
        data: &str,
        with_response: bool,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Subscribe to value notifications on a characteristic.
    ///
    /// Notifications are delivered one at a time in the order they arrived.
    /// The stream ends when the link drops.
    fn subscribe(&self, characteristic: &Characteristic) -> Result<Notifications>;
}

impl<T: LinkTransport> LinkTransport for std::sync::Arc<T> {
    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn write(
        &self,
        characteristic: &Characteristic,
        data: &str,
        with_response: bool,
    ) -> impl Future<Output = Result<()>> + Send {
        (**self).write(characteristic, data, with_response)
    }

    fn subscribe(&self, characteristic: &Characteristic) -> Result<Notifications> {
        (**self).subscribe(characteristic)
    }
}
