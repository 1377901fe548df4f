//! Domain model structs persisted in the local database.
//!
//! Every struct derives `Serialize` and `Deserialize` with camelCase field
//! names, which is also the shape of the JSON backup document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use pairchat_shared::types::{Author, ContactId, MediaKind, Role};

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Type-specific part of a [`Message`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MessageContent {
    Text,
    #[serde(rename_all = "camelCase")]
    Audio {
        /// base64 data URL
        audio_data: String,
        /// seconds
        duration: f64,
    },
    #[serde(rename_all = "camelCase")]
    Image {
        media_data: String,
        media_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        media_width: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        media_height: Option<u32>,
    },
    #[serde(rename_all = "camelCase")]
    Video {
        media_data: String,
        media_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        media_width: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        media_height: Option<u32>,
    },
}

impl MessageContent {
    /// Value of the `kind` column.
    pub fn kind_str(&self) -> &'static str {
        match self {
            MessageContent::Text => "text",
            MessageContent::Audio { .. } => "audio",
            MessageContent::Image { .. } => "image",
            MessageContent::Video { .. } => "video",
        }
    }
}

/// A single chat message. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    /// Message body, or a short label for audio/media messages.
    pub text: String,
    pub sender: Author,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    /// Set once at creation. There is no delivery receipt protocol.
    pub delivered: bool,
    #[serde(flatten)]
    pub content: MessageContent,
}

impl Message {
    fn build(sender: Author, text: String, content: MessageContent) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            text,
            sender,
            timestamp: Utc::now(),
            delivered: true,
            content,
        }
    }

    pub fn text(sender: Author, text: impl Into<String>) -> Self {
        Self::build(sender, text.into(), MessageContent::Text)
    }

    pub fn audio(sender: Author, audio_data: String, duration: f64) -> Self {
        Self::build(
            sender,
            "[voice message]".to_string(),
            MessageContent::Audio {
                audio_data,
                duration,
            },
        )
    }

    /// Image or video message. `kind` must not be [`MediaKind::Audio`]; an
    /// audio kind is stored as a voice clip with zero duration.
    pub fn media(
        sender: Author,
        kind: MediaKind,
        media_data: String,
        media_type: String,
        width: Option<u32>,
        height: Option<u32>,
    ) -> Self {
        let (label, content) = match kind {
            MediaKind::Image => (
                "[image]",
                MessageContent::Image {
                    media_data,
                    media_type,
                    media_width: width,
                    media_height: height,
                },
            ),
            MediaKind::Video => (
                "[video]",
                MessageContent::Video {
                    media_data,
                    media_type,
                    media_width: width,
                    media_height: height,
                },
            ),
            MediaKind::Audio => (
                "[voice message]",
                MessageContent::Audio {
                    audio_data: media_data,
                    duration: 0.0,
                },
            ),
        };
        Self::build(sender, label.to_string(), content)
    }
}

// ---------------------------------------------------------------------------
// Chat session
// ---------------------------------------------------------------------------

/// Conversation history with one contact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    pub contact_id: ContactId,
    pub contact_name: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl ChatSession {
    pub fn new(contact_id: ContactId, contact_name: impl Into<String>) -> Self {
        Self {
            contact_id,
            contact_name: contact_name.into(),
            messages: Vec::new(),
            created_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Contact (presence summary)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: ContactId,
    pub name: String,
    pub is_online: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_milliseconds_option"
    )]
    pub last_message_time: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Saved contact
// ---------------------------------------------------------------------------

/// A contact whose manual connection codes were kept so a reconnection can be
/// attempted later. `my_role` is fixed at creation and selects the
/// reconnection procedure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SavedContact {
    pub id: ContactId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offer_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer_code: Option<String>,
    pub my_role: Role,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_milliseconds_option"
    )]
    pub last_connected: Option<DateTime<Utc>>,
}

impl SavedContact {
    /// Record the code this side needs to reconnect: the answer it received
    /// as initiator, or the offer it received as receiver.
    pub fn new(id: ContactId, name: impl Into<String>, my_role: Role, code: String) -> Self {
        let (offer_code, answer_code) = match my_role {
            Role::Initiator => (None, Some(code)),
            Role::Receiver => (Some(code), None),
        };
        Self {
            id,
            name: name.into(),
            offer_code,
            answer_code,
            my_role,
            created_at: Utc::now(),
            last_connected: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_json_shape() {
        let msg = Message::text(Author::Me, "hello");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "text");
        assert_eq!(value["sender"], "me");
        assert_eq!(value["delivered"], true);
        assert!(value["timestamp"].is_i64());

        let back: Message = serde_json::from_value(value).unwrap();
        assert_eq!(back.id, msg.id);
        assert_eq!(back.content, MessageContent::Text);
    }

    #[test]
    fn test_media_message_kinds() {
        let img = Message::media(
            Author::Peer,
            MediaKind::Image,
            "data:image/png;base64,AA==".into(),
            "image/png".into(),
            Some(10),
            Some(20),
        );
        assert_eq!(img.content.kind_str(), "image");
        let value = serde_json::to_value(&img).unwrap();
        assert_eq!(value["mediaWidth"], 10);
        assert_eq!(value["mediaType"], "image/png");
    }

    #[test]
    fn test_saved_contact_keeps_one_code_per_role() {
        let init = SavedContact::new("peer-a".into(), "A", Role::Initiator, "ans".into());
        assert_eq!(init.answer_code.as_deref(), Some("ans"));
        assert!(init.offer_code.is_none());

        let recv = SavedContact::new("peer-b".into(), "B", Role::Receiver, "off".into());
        assert_eq!(recv.offer_code.as_deref(), Some("off"));
        assert!(recv.answer_code.is_none());
    }
}
