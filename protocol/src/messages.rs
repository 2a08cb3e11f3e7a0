use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::{AmountInput, UserId};

/// Message types a client may send.
const CLIENT_MESSAGE_TYPES: [&str; 2] = ["join", "place-bet"];

/// Errors produced while decoding an inbound frame.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Payload is not JSON at all.
    #[error("malformed payload: {0}")]
    Malformed(String),

    /// Payload is JSON but its `type` is missing or not one we handle.
    #[error("unknown message type: {0:?}")]
    UnknownType(Option<String>),

    /// Known `type` with missing or ill-typed fields.
    #[error("invalid {kind} message: {reason}")]
    InvalidFields { kind: String, reason: String },
}

/// Client to server messages.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    Join {
        #[serde(rename = "userId")]
        user_id: UserId,
    },
    PlaceBet {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        amount: Option<AmountInput>,
    },
}

impl ClientMessage {
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Server to client messages.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    Welcome {
        message: String,
    },
    Joined {
        #[serde(rename = "userId")]
        user_id: UserId,
    },
    Timer {
        #[serde(rename = "timeLeft")]
        time_left: u32,
    },
    NewBet {
        #[serde(rename = "userId")]
        user_id: UserId,
        amount: u64,
    },
    RoundResult {
        winner: UserId,
        total: u64,
    },
    RoundCancelled,
    BalanceUpdate {
        balance: u64,
    },
    Error {
        message: String,
    },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Decode one inbound frame.
///
/// Unparseable payloads and unknown types are told apart so the caller can
/// report them differently.
pub fn decode_client_message(raw: &str) -> Result<ClientMessage, ProtocolError> {
    let value: Value =
        serde_json::from_str(raw).map_err(|err| ProtocolError::Malformed(err.to_string()))?;

    let kind = match value.get("type").and_then(Value::as_str) {
        Some(kind) if CLIENT_MESSAGE_TYPES.contains(&kind) => kind.to_string(),
        Some(kind) => return Err(ProtocolError::UnknownType(Some(kind.to_string()))),
        None => return Err(ProtocolError::UnknownType(None)),
    };

    serde_json::from_value(value).map_err(|err| ProtocolError::InvalidFields {
        kind,
        reason: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_join() {
        let message = decode_client_message(r#"{"type":"join","userId":"u-1"}"#).unwrap();
        assert_eq!(
            message,
            ClientMessage::Join {
                user_id: UserId::from("u-1")
            }
        );
    }

    #[test]
    fn test_decode_place_bet_variants() {
        let message = decode_client_message(r#"{"type":"place-bet","amount":40}"#).unwrap();
        assert_eq!(
            message,
            ClientMessage::PlaceBet {
                amount: Some(AmountInput::Number(40.0))
            }
        );

        let message = decode_client_message(r#"{"type":"place-bet","amount":"15"}"#).unwrap();
        let ClientMessage::PlaceBet { amount: Some(amount) } = message else {
            panic!("expected place-bet with amount");
        };
        assert_eq!(amount.positive(), Some(15));

        // A missing amount is left for the room to reject as an invalid bet.
        let message = decode_client_message(r#"{"type":"place-bet"}"#).unwrap();
        assert_eq!(message, ClientMessage::PlaceBet { amount: None });
    }

    #[test]
    fn test_decode_malformed() {
        let err = decode_client_message("{not json").unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));
    }

    #[test]
    fn test_decode_unknown_type() {
        assert_eq!(
            decode_client_message(r#"{"type":"cash-out"}"#).unwrap_err(),
            ProtocolError::UnknownType(Some("cash-out".to_string()))
        );
        assert_eq!(
            decode_client_message(r#"{"userId":"u-1"}"#).unwrap_err(),
            ProtocolError::UnknownType(None)
        );
        assert_eq!(
            decode_client_message("42").unwrap_err(),
            ProtocolError::UnknownType(None)
        );
    }

    #[test]
    fn test_decode_known_type_with_bad_fields() {
        let err = decode_client_message(r#"{"type":"join"}"#).unwrap_err();
        match err {
            ProtocolError::InvalidFields { kind, .. } => assert_eq!(kind, "join"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_server_message_shapes() {
        let cases = vec![
            (
                ServerMessage::Welcome {
                    message: "hi".to_string(),
                },
                json!({"type": "welcome", "message": "hi"}),
            ),
            (
                ServerMessage::Joined {
                    user_id: UserId::from("u-1"),
                },
                json!({"type": "joined", "userId": "u-1"}),
            ),
            (
                ServerMessage::Timer { time_left: 29 },
                json!({"type": "timer", "timeLeft": 29}),
            ),
            (
                ServerMessage::NewBet {
                    user_id: UserId::from("u-1"),
                    amount: 40,
                },
                json!({"type": "new-bet", "userId": "u-1", "amount": 40}),
            ),
            (
                ServerMessage::RoundResult {
                    winner: UserId::from("u-2"),
                    total: 100,
                },
                json!({"type": "round-result", "winner": "u-2", "total": 100}),
            ),
            (
                ServerMessage::RoundCancelled,
                json!({"type": "round-cancelled"}),
            ),
            (
                ServerMessage::BalanceUpdate { balance: 60 },
                json!({"type": "balance-update", "balance": 60}),
            ),
            (
                ServerMessage::error("Invalid bet"),
                json!({"type": "error", "message": "Invalid bet"}),
            ),
        ];

        for (message, expected) in cases {
            assert_eq!(serde_json::to_value(&message).unwrap(), expected);
        }
    }

    #[test]
    fn test_client_encode_is_decodable() {
        let message = ClientMessage::PlaceBet {
            amount: Some(AmountInput::from(12)),
        };
        let encoded = message.encode().unwrap();
        assert_eq!(decode_client_message(&encoded).unwrap(), message);
    }
}
