//! Sentinel-delimited message framing for packet-size-limited links.
//!
//! Every message is framed by appending a single `0x00` sentinel. The framed
//! bytes are cut into link-sized fragments with no per-fragment header:
//! - [`FragmentWriter`] chunks, base64-encodes and paces outbound fragments
//! - [`Reassembler`] accumulates inbound fragments and splits at sentinels
//! - [`SentinelCodec`] does the same for plain byte streams
//!
//! Payloads are not escaped. A payload containing `0x00` is refused with
//! [`FrameError::EmbeddedSentinel`].

pub mod codec;
pub mod error;
pub mod reader;
pub mod writer;

pub use codec::{
    chunk, decode_fragment, encode_fragment, frame_message, split_message, FragmentLimit,
    FrameConfig, FramingPolicy, SentinelCodec, DEFAULT_INTER_FRAGMENT_DELAY,
    DEFAULT_MAX_FRAGMENT_BYTES, DEFAULT_MAX_MESSAGE_BYTES, LEGACY_MAX_FRAGMENT_BYTES, SENTINEL,
};
pub use error::{FrameError, Result};
pub use reader::Reassembler;
pub use writer::FragmentWriter;
