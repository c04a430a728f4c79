//! Characteristic write/notify transport abstraction.
//!
//! This is the lowest layer of gattlink. A link exposes two primitives over
//! a peripheral's characteristics:
//! - `write(characteristic, base64 value, with_response)`
//! - `subscribe(characteristic)` yielding base64 notification values
//!
//! Real radios plug in by implementing [`LinkTransport`]. The crate ships an
//! in-memory link for tests and a Unix domain socket emulator for local runs.

pub mod error;
pub mod memory;
pub mod traits;

#[cfg(unix)]
pub mod uds;

pub use error::{Result, TransportError};
pub use memory::{MemoryLink, Written};
pub use traits::{Characteristic, LinkTransport, Notifications};

#[cfg(unix)]
pub use uds::{UdsLink, UdsListener};
