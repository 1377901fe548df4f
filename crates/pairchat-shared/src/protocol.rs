use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Every payload exchanged over the chat data channel.
///
/// Encoded as a JSON object tagged by `type`, e.g.
/// `{"type":"message","text":"hi"}` or `{"type":"call-end"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PeerMessage {
    /// Plain text chat message
    Message { text: String },

    /// Recorded voice clip as a base64 data URL
    #[serde(rename_all = "camelCase")]
    AudioMessage {
        audio_data: String,
        /// Clip length in seconds
        duration: f64,
    },

    /// Image or video as a base64 data URL
    #[serde(rename_all = "camelCase")]
    MediaMessage {
        media_data: String,
        /// MIME type of the attachment (`image/png`, `video/mp4`, ...)
        media_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        media_width: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        media_height: Option<u32>,
    },

    /// Typing indicator
    #[serde(rename_all = "camelCase")]
    Typing { is_typing: bool },

    CallRequest,
    CallAccept,
    CallReject,
    CallEnd,
}

/// The voice-call subset of [`PeerMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallSignal {
    Request,
    Accept,
    Reject,
    End,
}

impl CallSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallSignal::Request => "call-request",
            CallSignal::Accept => "call-accept",
            CallSignal::Reject => "call-reject",
            CallSignal::End => "call-end",
        }
    }
}

impl From<CallSignal> for PeerMessage {
    fn from(signal: CallSignal) -> Self {
        match signal {
            CallSignal::Request => PeerMessage::CallRequest,
            CallSignal::Accept => PeerMessage::CallAccept,
            CallSignal::Reject => PeerMessage::CallReject,
            CallSignal::End => PeerMessage::CallEnd,
        }
    }
}

impl PeerMessage {
    /// Serialize to the JSON text frame sent on the data channel.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a text frame received from the data channel.
    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Returns the call signal carried by this message, if any.
    pub fn call_signal(&self) -> Option<CallSignal> {
        match self {
            PeerMessage::CallRequest => Some(CallSignal::Request),
            PeerMessage::CallAccept => Some(CallSignal::Accept),
            PeerMessage::CallReject => Some(CallSignal::Reject),
            PeerMessage::CallEnd => Some(CallSignal::End),
            _ => None,
        }
    }

    /// Short label for logs. Never includes message content.
    pub fn type_name(&self) -> &'static str {
        match self {
            PeerMessage::Message { .. } => "message",
            PeerMessage::AudioMessage { .. } => "audio-message",
            PeerMessage::MediaMessage { .. } => "media-message",
            PeerMessage::Typing { .. } => "typing",
            PeerMessage::CallRequest => "call-request",
            PeerMessage::CallAccept => "call-accept",
            PeerMessage::CallReject => "call-reject",
            PeerMessage::CallEnd => "call-end",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_message_wire_shape() {
        let json = PeerMessage::Message {
            text: "hi".into(),
        }
        .to_json()
        .unwrap();
        assert_eq!(json, r#"{"type":"message","text":"hi"}"#);
    }

    #[test]
    fn test_call_signals_carry_only_type() {
        let json = PeerMessage::from(CallSignal::Request).to_json().unwrap();
        assert_eq!(json, r#"{"type":"call-request"}"#);

        let parsed = PeerMessage::from_json(r#"{"type":"call-end"}"#).unwrap();
        assert_eq!(parsed.call_signal(), Some(CallSignal::End));
    }

    #[test]
    fn test_camel_case_fields() {
        let parsed = PeerMessage::from_json(
            r#"{"type":"audio-message","audioData":"data:audio/webm;base64,AAAA","duration":2.5}"#,
        )
        .unwrap();
        assert_eq!(
            parsed,
            PeerMessage::AudioMessage {
                audio_data: "data:audio/webm;base64,AAAA".into(),
                duration: 2.5,
            }
        );

        let typing = PeerMessage::from_json(r#"{"type":"typing","isTyping":true}"#).unwrap();
        assert_eq!(typing, PeerMessage::Typing { is_typing: true });
    }

    #[test]
    fn test_media_dimensions_are_optional() {
        let parsed = PeerMessage::from_json(
            r#"{"type":"media-message","mediaData":"data:image/png;base64,AA==","mediaType":"image/png"}"#,
        )
        .unwrap();
        match parsed {
            PeerMessage::MediaMessage {
                media_width,
                media_height,
                ..
            } => {
                assert_eq!(media_width, None);
                assert_eq!(media_height, None);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_and_malformed_payloads_fail() {
        assert!(PeerMessage::from_json(r#"{"type":"file-offer"}"#).is_err());
        assert!(PeerMessage::from_json(r#"{"type":"message"}"#).is_err());
        assert!(PeerMessage::from_json("not json").is_err());
    }
}
