//! Types shared by the herald store and server: identifiers, message
//! direction, broadcast status and the live-session wire protocol.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::ProtocolError;
pub use types::*;
