//! Wire protocol for the stakeroom wagering room.
//!
//! Every frame on the room socket is a JSON object carrying a `type`
//! discriminator. Inbound frames decode into [`ClientMessage`], outbound
//! frames are produced from [`ServerMessage`]. Both are closed enums, so a new
//! message type is a compile-checked change on both sides.
//!
//! ```
//! use stakeroom_protocol::{decode_client_message, ClientMessage, UserId};
//!
//! let message = decode_client_message(r#"{"type":"join","userId":"alice"}"#).unwrap();
//! assert_eq!(message, ClientMessage::Join { user_id: UserId::from("alice") });
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

mod amount;
pub use amount::AmountInput;
mod messages;
pub use messages::{decode_client_message, ClientMessage, ProtocolError, ServerMessage};

/// Opaque user identity issued by the bootstrap endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for UserId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Identifier the server assigns to a socket when it is accepted.
///
/// Connections are tracked by this id rather than by the transport object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}
