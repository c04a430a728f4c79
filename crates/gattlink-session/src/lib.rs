//! Single-flight command/response sessions.
//!
//! A [`Session`] sends JSON commands `{event, cmd, args}` over a framed link
//! and resolves each with the inbound message carrying the same `event` key.
//! - [`Gate`] keeps at most one command in flight, with a busy-window timeout
//! - [`Correlator`] maps keys to waiting callers
//! - [`StateCategory`] reads one section of the device configuration
//!
//! Messages that match no pending command are published as unsolicited
//! events.

pub mod config;
pub mod correlator;
pub mod error;
pub mod gate;
pub mod message;
pub mod session;
pub mod state;

pub use config::{
    Framing, LimitMode, LinkConfig, DEFAULT_BUSY_TIMEOUT, DEFAULT_RX_CHARACTERISTIC,
    DEFAULT_SERVICE, DEFAULT_TX_CHARACTERISTIC,
};
pub use correlator::{Correlator, Waiter};
pub use error::{Result, SessionError};
pub use gate::{Gate, GateState, GateTicket};
pub use message::{CommandMessage, CorrelationKey, InboundMessage, KeyGenerator, KEY_PREFIX};
pub use session::Session;
pub use state::{CategorySpec, StateCategory, GET_CONFIG};
