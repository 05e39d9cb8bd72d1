//! Gateway error taxonomy.
//!
//! Every variant is caught at the gateway boundary and turned into a
//! structured `error` message for the originating client. None of them close
//! the connection.

use sb_session::SessionError;
use thiserror::Error;

use crate::protocol::ServerMessage;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// The frame was not a JSON object with a string `type`.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// No handler is registered for the message type.
    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    /// The envelope parsed but its fields did not match the message type.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error(transparent)]
    Session(#[from] SessionError),

    /// A directive was recognised but its arguments were not usable.
    #[error("{0}")]
    Directive(String),
}

impl GatewayError {
    /// Stable machine-readable code sent alongside the message.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::MalformedMessage(_) => "malformed_message",
            GatewayError::UnknownMessageType(_) => "unknown_message_type",
            GatewayError::InvalidPayload(_) => "invalid_payload",
            GatewayError::Session(e) => match e {
                SessionError::CapacityExceeded { .. } => "capacity_exceeded",
                SessionError::NotFound(_) => "not_found",
                SessionError::Spawn(_) => "spawn_failed",
                SessionError::Process(_) => "process_error",
                SessionError::InvalidId(_) => "invalid_id",
            },
            GatewayError::Directive(_) => "directive_error",
        }
    }

    pub fn to_message(&self, request_type: Option<&str>) -> ServerMessage {
        ServerMessage::Error {
            success: false,
            code: self.code().to_string(),
            error: self.to_string(),
            request_type: request_type.map(str::to_string),
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(
            GatewayError::MalformedMessage("x".into()).code(),
            "malformed_message"
        );
        assert_eq!(
            GatewayError::Session(SessionError::NotFound("w".into())).code(),
            "not_found"
        );
        assert_eq!(
            GatewayError::Session(SessionError::CapacityExceeded { max: 1 }).code(),
            "capacity_exceeded"
        );
    }

    #[test]
    fn error_message_carries_request_type() {
        let msg = GatewayError::UnknownMessageType("bogus".into()).to_message(Some("bogus"));
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["success"], false);
        assert_eq!(json["code"], "unknown_message_type");
        assert_eq!(json["requestType"], "bogus");
        assert!(json["error"].as_str().unwrap().contains("bogus"));
    }
}
