//! Framed JSON command/response sessions over characteristic write/notify links.
//!
//! gattlink lets a host exchange JSON commands and events with a small
//! peripheral over a packet-size-limited link that offers no message
//! boundaries of its own.
//!
//! # Crate Structure
//!
//! - [`transport`]: characteristic write/notify abstraction, in-memory and socket links
//! - [`frame`]: sentinel framing, paced fragment writes and reassembly
//! - [`session`]: single-flight command gate, response correlation and device state

/// Re-export transport types.
pub mod transport {
    pub use gattlink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use gattlink_frame::*;
}

/// Re-export session types.
pub mod session {
    pub use gattlink_session::*;
}

pub use gattlink_session::{LinkConfig, Session, SessionError};
