use gattlink_transport::{Characteristic, LinkTransport};
use tracing::debug;

use crate::codec::{chunk, encode_fragment, FrameConfig};
use crate::error::{FrameError, Result};

/// Writes sentinel-framed messages to a characteristic, one paced fragment
/// at a time.
///
/// Fragments go out strictly in order. The configured delay separates
/// consecutive writes; nothing is written concurrently.
pub struct FragmentWriter<T> {
    transport: T,
    characteristic: Characteristic,
    config: FrameConfig,
}

impl<T: LinkTransport> FragmentWriter<T> {
    /// Create a writer with default configuration.
    pub fn new(transport: T, characteristic: Characteristic) -> Self {
        Self {
            transport,
            characteristic,
            config: FrameConfig::default(),
        }
    }

    /// Create a writer with explicit configuration.
    pub fn with_config(
        transport: T,
        characteristic: Characteristic,
        config: FrameConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            transport,
            characteristic,
            config,
        })
    }

    /// Frame, chunk and write one message. Returns the number of fragments written.
    ///
    /// On a failed write the remaining fragments are abandoned and
    /// [`FrameError::WriteFailed`] names the failing fragment (1-based).
    pub async fn send(&self, payload: &[u8]) -> Result<usize> {
        let fragments = chunk(payload, self.config.fragment_limit.raw_capacity())?;
        let total = fragments.len();

        for (index, fragment) in fragments.iter().enumerate() {
            if index > 0 && !self.config.inter_fragment_delay.is_zero() {
                tokio::time::sleep(self.config.inter_fragment_delay).await;
            }

            let value = encode_fragment(fragment);
            self.transport
                .write(&self.characteristic, &value, self.config.write_with_response)
                .await
                .map_err(|source| FrameError::WriteFailed {
                    fragment: index + 1,
                    total,
                    source,
                })?;
            debug!(
                fragment = index + 1,
                total,
                len = fragment.len(),
                characteristic = %self.characteristic,
                "fragment written"
            );
        }

        Ok(total)
    }

    /// Borrow the underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Characteristic this writer targets.
    pub fn characteristic(&self) -> &Characteristic {
        &self.characteristic
    }

    /// Current writer configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}
