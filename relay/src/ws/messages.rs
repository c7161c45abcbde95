//! WebSocket message types.
//!
//! Defines the inbound wire format and the payloads queued for delivery.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::rooms::Room;

/// Message sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Join a room.
    #[serde(rename = "SUBSCRIBE")]
    Subscribe {
        /// Room name.
        room: String,
    },

    /// Leave a room.
    #[serde(rename = "UNSUBSCRIBE")]
    Unsubscribe {
        /// Room name.
        room: String,
    },

    /// Broadcast a message to every subscriber of a room.
    #[serde(rename = "sendMessage")]
    SendMessage {
        /// Target room name.
        #[serde(rename = "roomId")]
        room_id: String,
        /// Opaque content forwarded to subscribers.
        message: Value,
    },
}

/// Errors raised while decoding an inbound frame.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    /// The frame is not valid JSON or does not match any message type.
    #[error("invalid message: {0}")]
    Decode(#[from] serde_json::Error),

    /// A binary frame that is not UTF-8 text.
    #[error("binary frame is not valid UTF-8")]
    NotUtf8,

    /// The room name failed validation.
    #[error("invalid room: {0:?}")]
    InvalidRoom(String),
}

/// A decoded and validated client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Join a room.
    Subscribe(Room),
    /// Leave a room.
    Unsubscribe(Room),
    /// Publish a payload into a room.
    Publish {
        /// Target room.
        room: Room,
        /// Payload to forward.
        payload: Payload,
    },
}

impl Request {
    /// Decodes a text frame into a request.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is malformed or names an invalid room.
    pub fn decode(text: &str) -> Result<Self, MessageError> {
        let msg: ClientMessage = serde_json::from_str(text)?;
        Self::try_from(msg)
    }

    /// Decodes a binary frame carrying UTF-8 JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not UTF-8 or the frame is malformed.
    pub fn decode_bytes(bytes: &[u8]) -> Result<Self, MessageError> {
        let text = std::str::from_utf8(bytes).map_err(|_| MessageError::NotUtf8)?;
        Self::decode(text)
    }
}

impl TryFrom<ClientMessage> for Request {
    type Error = MessageError;

    fn try_from(msg: ClientMessage) -> Result<Self, Self::Error> {
        let room = |name: String| Room::parse(&name).ok_or(MessageError::InvalidRoom(name));

        Ok(match msg {
            ClientMessage::Subscribe { room: name } => Self::Subscribe(room(name)?),
            ClientMessage::Unsubscribe { room: name } => Self::Unsubscribe(room(name)?),
            ClientMessage::SendMessage { room_id, message } => Self::Publish {
                room: room(room_id)?,
                payload: Payload::from_value(message),
            },
        })
    }
}

/// Opaque content delivered to subscribers as a single text frame.
///
/// Shared by reference across every subscriber of one dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload(Arc<str>);

impl Payload {
    /// Builds a payload from a JSON value.
    ///
    /// A JSON string is forwarded as its raw contents; anything else is
    /// forwarded as compact JSON.
    #[must_use]
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::String(text) => Self(Arc::from(text)),
            other => Self(Arc::from(other.to_string())),
        }
    }

    /// Returns the text that will be sent.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the payload size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self(Arc::from(text))
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self(Arc::from(text))
    }
}
