//! Relay wire protocol.
//!
//! One bincode-encoded [`RelayFrame`] per WebSocket binary message:
//! ```text
//! client ── Set / Remove / Subscribe / Unsubscribe / OnDisconnectRemove / Ping ──► relay
//! client ◄──────────────────────── Event{sub_id} / Pong ─────────────────────────── relay
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::channel::{ChannelEvent, ChannelPath, EphemeralValue};

/// Client-chosen subscription handle, unique per connection.
pub type SubscriptionId = u64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RelayFrame {
    Set {
        path: ChannelPath,
        value: EphemeralValue,
    },
    Remove {
        path: ChannelPath,
    },
    Subscribe {
        sub_id: SubscriptionId,
        prefix: ChannelPath,
    },
    Unsubscribe {
        sub_id: SubscriptionId,
    },
    OnDisconnectRemove {
        path: ChannelPath,
    },
    /// Relay → client: an event matching subscription `sub_id`.
    Event {
        sub_id: SubscriptionId,
        event: ChannelEvent,
    },
    Ping,
    Pong,
}

impl RelayFrame {
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (frame, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
        Ok(frame)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Connection closed")]
    ConnectionClosed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{PresenceRecord, StreamKind};
    use easel_core::Point;

    #[test]
    fn test_event_frame_roundtrip() {
        let path = ChannelPath::stream(&"b1".into(), StreamKind::Presence, &"u1".into());
        let frame = RelayFrame::Event {
            sub_id: 9,
            event: ChannelEvent::Set {
                path,
                value: EphemeralValue::Presence(PresenceRecord {
                    display_name: Some("Ada".into()),
                    updated_at: 1_700_000_000_000,
                    cursor: Some(Point::new(4.0, 5.5)),
                }),
            },
        };
        let decoded = RelayFrame::decode(&frame.encode().unwrap()).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_control_frames_are_small() {
        let ping = RelayFrame::Ping.encode().unwrap();
        assert!(ping.len() <= 2);
        let unsub = RelayFrame::Unsubscribe { sub_id: 3 }.encode().unwrap();
        assert!(unsub.len() <= 4);
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(matches!(
            RelayFrame::decode(&[0xEE, 0x01, 0x02]),
            Err(ProtocolError::Deserialization(_))
        ));
    }
}
