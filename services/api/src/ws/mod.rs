//! WebSocket Transports
//!
//! Three endpoints expose the same conversation service with different
//! delivery styles:
//!
//! - `protocol`: endpoint paths, names, and how a reply is framed per style.
//! - `session`: connection lifecycle, from upgrade to close.

pub mod protocol;
pub mod session;

pub use protocol::TransportStyle;
pub use session::{non_reactive_handler, reactive_multi_handler, reactive_uni_handler};
