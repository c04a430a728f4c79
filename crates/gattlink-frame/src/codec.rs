use std::time::Duration;

use base64::Engine as _;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{FrameError, Result};

/// Byte marking the end of a message.
pub const SENTINEL: u8 = 0x00;

/// Reference fragment limit of the observed link, counted in base64 characters.
pub const DEFAULT_MAX_FRAGMENT_BYTES: usize = 180;

/// Legacy fragment limit, counted in raw bytes before base64.
pub const LEGACY_MAX_FRAGMENT_BYTES: usize = 20;

/// Reference pause between consecutive fragment writes.
pub const DEFAULT_INTER_FRAGMENT_DELAY: Duration = Duration::from_millis(200);

/// Default cap on bytes buffered while waiting for a sentinel: 64 KiB.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 64 * 1024;

/// How the per-fragment size limit is measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentLimit {
    /// Limit applies to the base64 text handed to the transport.
    Encoded(usize),
    /// Limit applies to raw bytes before base64 (legacy links).
    Raw(usize),
}

impl FragmentLimit {
    /// Raw bytes that fit in one fragment under this limit.
    pub fn raw_capacity(self) -> usize {
        match self {
            // Every 3 raw bytes become 4 base64 characters (padded).
            FragmentLimit::Encoded(chars) => chars / 4 * 3,
            FragmentLimit::Raw(bytes) => bytes,
        }
    }

    fn validate(self) -> Result<()> {
        match self {
            FragmentLimit::Encoded(chars) if chars < 4 => Err(FrameError::InvalidConfig(format!(
                "encoded fragment limit must be at least 4 characters, got {chars}"
            ))),
            FragmentLimit::Raw(0) => Err(FrameError::InvalidConfig(
                "raw fragment limit must be greater than zero".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

/// How inbound fragments are scanned for message boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FramingPolicy {
    /// Byte accumulator split at the first sentinel anywhere in the buffer.
    #[default]
    SentinelScan,
    /// Each fragment is a text unit; only a fragment that is exactly the
    /// sentinel ends a message.
    StreamingScan,
}

impl FramingPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            FramingPolicy::SentinelScan => "sentinel-scan",
            FramingPolicy::StreamingScan => "streaming-scan",
        }
    }
}

/// Configuration for chunking and reassembly.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Per-fragment size limit. Default: 180 base64 characters.
    pub fragment_limit: FragmentLimit,
    /// Pause between consecutive fragment writes. Default: 200 ms.
    pub inter_fragment_delay: Duration,
    /// Receive-side boundary detection. Default: sentinel scan.
    pub policy: FramingPolicy,
    /// Bytes buffered without a sentinel before the buffer is dropped. Default: 64 KiB.
    pub max_message_bytes: usize,
    /// Ask the transport for acknowledged writes.
    pub write_with_response: bool,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            fragment_limit: FragmentLimit::Encoded(DEFAULT_MAX_FRAGMENT_BYTES),
            inter_fragment_delay: DEFAULT_INTER_FRAGMENT_DELAY,
            policy: FramingPolicy::SentinelScan,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            write_with_response: false,
        }
    }
}

impl FrameConfig {
    /// Check that the configuration can produce and accept messages.
    pub fn validate(&self) -> Result<()> {
        self.fragment_limit.validate()?;
        if self.max_message_bytes == 0 {
            return Err(FrameError::InvalidConfig(
                "max message size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Append the sentinel to `payload`.
///
/// The payload is neither escaped nor length-prefixed, so a payload that
/// already contains the sentinel is refused rather than mis-framed.
pub fn frame_message(payload: &[u8]) -> Result<Bytes> {
    if let Some(offset) = payload.iter().position(|&b| b == SENTINEL) {
        return Err(FrameError::EmbeddedSentinel { offset });
    }
    let mut framed = BytesMut::with_capacity(payload.len() + 1);
    framed.put_slice(payload);
    framed.put_u8(SENTINEL);
    Ok(framed.freeze())
}

/// Frame `payload` and split it into fragments of at most `max_fragment_size` bytes.
///
/// The sentinel rides in the last fragment when it fits, otherwise it is a
/// fragment of its own. An empty payload yields the single fragment `[0x00]`.
pub fn chunk(payload: &[u8], max_fragment_size: usize) -> Result<Vec<Bytes>> {
    if max_fragment_size == 0 {
        return Err(FrameError::InvalidConfig(
            "fragment size must be greater than zero".to_string(),
        ));
    }
    let framed = frame_message(payload)?;
    let mut fragments = Vec::with_capacity(framed.len().div_ceil(max_fragment_size));
    let mut start = 0;
    while start < framed.len() {
        let end = (start + max_fragment_size).min(framed.len());
        fragments.push(framed.slice(start..end));
        start = end;
    }
    Ok(fragments)
}

/// Split the first complete message off the front of `buf`.
///
/// Bytes after the sentinel stay in `buf`. Returns `None` when no sentinel
/// has arrived yet.
pub fn split_message(buf: &mut BytesMut) -> Option<Bytes> {
    let pos = buf.iter().position(|&b| b == SENTINEL)?;
    let message = buf.split_to(pos).freeze();
    buf.advance(1);
    Some(message)
}

/// Base64-encode a fragment for the transport.
pub fn encode_fragment(fragment: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(fragment)
}

/// Decode a base64 notification value into raw bytes.
pub fn decode_fragment(value: &str) -> Result<Vec<u8>> {
    Ok(base64::engine::general_purpose::STANDARD.decode(value)?)
}

/// Sentinel-delimited codec for raw byte streams.
///
/// Used where the bytes of a link arrive as a plain stream (the socket
/// emulator's peripheral side) rather than as notifications.
#[derive(Debug, Clone)]
pub struct SentinelCodec {
    max_message_bytes: usize,
}

impl SentinelCodec {
    pub fn new(max_message_bytes: usize) -> Self {
        Self { max_message_bytes }
    }
}

impl Default for SentinelCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_BYTES)
    }
}

impl Decoder for SentinelCodec {
    type Item = Bytes;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        if let Some(message) = split_message(src) {
            return Ok(Some(message));
        }
        if src.len() > self.max_message_bytes {
            let size = src.len();
            src.clear();
            return Err(FrameError::MessageTooLarge {
                size,
                max: self.max_message_bytes,
            });
        }
        Ok(None)
    }
}

impl Encoder<&[u8]> for SentinelCodec {
    type Error = FrameError;

    fn encode(&mut self, item: &[u8], dst: &mut BytesMut) -> Result<()> {
        let framed = frame_message(item)?;
        dst.extend_from_slice(&framed);
        Ok(())
    }
}
