use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a chat contact (and of its chat session).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ContactId(pub String);

impl ContactId {
    pub fn generate() -> Self {
        Self(format!("peer-{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn short(&self) -> &str {
        let end = self.0.len().min(13);
        self.0.get(..end).unwrap_or(&self.0)
    }
}

impl fmt::Display for ContactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContactId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Which side of the manual handshake this device played.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Generated the offer.
    Initiator,
    /// Pasted the offer and produced the answer.
    Receiver,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Initiator => "initiator",
            Role::Receiver => "receiver",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "initiator" => Some(Role::Initiator),
            "receiver" => Some(Role::Receiver),
            _ => None,
        }
    }
}

/// Who wrote a chat message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Author {
    Me,
    Peer,
}

impl Author {
    pub fn as_str(&self) -> &'static str {
        match self {
            Author::Me => "me",
            Author::Peer => "peer",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "me" => Some(Author::Me),
            "peer" => Some(Author::Peer),
            _ => None,
        }
    }
}

/// Observable state of the peer connection.
///
/// Always derived from the transport's ICE state and the data channel state,
/// never stored on its own.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Voice call state, driven by signals on the data channel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CallState {
    #[default]
    Idle,
    Calling,
    Ringing,
    Active,
    Ended,
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CallState::Idle => "idle",
            CallState::Calling => "calling",
            CallState::Ringing => "ringing",
            CallState::Active => "active",
            CallState::Ended => "ended",
        };
        f.write_str(s)
    }
}

/// Kind of binary attachment carried inside a chat message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Image,
    Video,
}

impl MediaKind {
    /// Classify an image or video MIME type. Audio is never inferred here:
    /// voice clips travel as their own message type.
    pub fn from_mime(mime: &str) -> Option<Self> {
        let lower = mime.trim().to_ascii_lowercase();
        if lower.starts_with("image/") {
            Some(MediaKind::Image)
        } else if lower.starts_with("video/") {
            Some(MediaKind::Video)
        } else {
            None
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MediaKind::Audio => "audio",
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contact_id_is_unique() {
        let a = ContactId::generate();
        let b = ContactId::generate();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("peer-"));
        assert_eq!(a.short().len(), 13);
    }

    #[test]
    fn test_media_kind_from_mime() {
        assert_eq!(MediaKind::from_mime("image/png"), Some(MediaKind::Image));
        assert_eq!(MediaKind::from_mime("VIDEO/mp4"), Some(MediaKind::Video));
        assert_eq!(MediaKind::from_mime("audio/webm"), None);
        assert_eq!(MediaKind::from_mime("application/pdf"), None);
    }

    #[test]
    fn test_state_serialization_is_lowercase() {
        assert_eq!(
            serde_json::to_string(&ConnectionState::Connected).unwrap(),
            "\"connected\""
        );
        assert_eq!(serde_json::to_string(&CallState::Ringing).unwrap(), "\"ringing\"");
        assert_eq!(serde_json::to_string(&Role::Receiver).unwrap(), "\"receiver\"");
    }
}
