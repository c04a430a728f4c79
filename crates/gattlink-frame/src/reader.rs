use bytes::{Bytes, BytesMut};
use tracing::{debug, warn};

use crate::codec::{decode_fragment, split_message, FrameConfig, FramingPolicy, SENTINEL};
use crate::error::Result;

const INITIAL_BUFFER_CAPACITY: usize = 1024;

/// Rebuilds complete messages from inbound fragments.
///
/// Fragments carry no header; message ends are found by the sentinel only.
/// Completed messages never include the sentinel.
#[derive(Debug)]
pub struct Reassembler {
    buf: BytesMut,
    policy: FramingPolicy,
    max_message_bytes: usize,
}

impl Reassembler {
    /// Create a reassembler with default configuration.
    pub fn new() -> Self {
        Self::with_config(&FrameConfig::default())
    }

    /// Create a reassembler using the policy and size cap from `config`.
    pub fn with_config(config: &FrameConfig) -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            policy: config.policy,
            max_message_bytes: config.max_message_bytes,
        }
    }

    /// Feed one raw fragment; returns every message it completed, in order.
    pub fn push(&mut self, fragment: &[u8]) -> Vec<Bytes> {
        let messages = match self.policy {
            FramingPolicy::SentinelScan => self.push_sentinel_scan(fragment),
            FramingPolicy::StreamingScan => self.push_streaming_scan(fragment),
        };

        if self.buf.len() > self.max_message_bytes {
            warn!(
                buffered = self.buf.len(),
                max = self.max_message_bytes,
                policy = self.policy.as_str(),
                "no sentinel within message size limit; dropping buffer"
            );
            self.buf.clear();
        }

        messages
    }

    /// Feed one base64 notification value.
    pub fn push_encoded(&mut self, value: &str) -> Result<Vec<Bytes>> {
        let fragment = decode_fragment(value)?;
        Ok(self.push(&fragment))
    }

    fn push_sentinel_scan(&mut self, fragment: &[u8]) -> Vec<Bytes> {
        self.buf.extend_from_slice(fragment);
        let mut messages = Vec::new();
        while let Some(message) = split_message(&mut self.buf) {
            debug!(len = message.len(), retained = self.buf.len(), "message complete");
            messages.push(message);
        }
        messages
    }

    fn push_streaming_scan(&mut self, fragment: &[u8]) -> Vec<Bytes> {
        if fragment == [SENTINEL] {
            let message = self.buf.split().freeze();
            debug!(len = message.len(), "message complete");
            return vec![message];
        }

        if let Err(err) = std::str::from_utf8(fragment) {
            warn!(
                error = %err,
                discarded = self.buf.len() + fragment.len(),
                "fragment is not text; discarding partial message"
            );
            self.buf.clear();
            return Vec::new();
        }

        self.buf.extend_from_slice(fragment);
        Vec::new()
    }

    /// Bytes buffered toward the next message.
    pub fn buffered(&self) -> &[u8] {
        &self.buf
    }

    /// Drop any partially received message.
    pub fn reset(&mut self) {
        self.buf.clear();
    }

    /// Active framing policy.
    pub fn policy(&self) -> FramingPolicy {
        self.policy
    }
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new()
    }
}
