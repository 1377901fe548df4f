//! Connection codes exchanged by hand (copy/paste or QR).
//!
//! A code is the JSON form of a session description,
//! `{"type":"offer","sdp":"v=0\r\n..."}`, with every gathered candidate
//! already inlined in the SDP.

use serde::{Deserialize, Serialize};

use crate::error::SignalError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Offer,
    Answer,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Offer => "offer",
            SignalKind::Answer => "answer",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionSignal {
    #[serde(rename = "type")]
    pub kind: SignalKind,
    pub sdp: String,
}

impl SessionSignal {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SignalKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SignalKind::Answer,
            sdp: sdp.into(),
        }
    }

    /// Encode as the text the user copies.
    pub fn encode(&self) -> String {
        // A struct of two strings cannot fail to serialize.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Decode a pasted code. Surrounding whitespace is ignored.
    pub fn decode(code: &str) -> Result<Self, SignalError> {
        let code = code.trim();
        if code.is_empty() {
            return Err(SignalError::Empty);
        }
        Ok(serde_json::from_str(code)?)
    }

    /// Decode and require a specific kind.
    pub fn decode_expecting(code: &str, expected: SignalKind) -> Result<Self, SignalError> {
        let signal = Self::decode(code)?;
        if signal.kind != expected {
            return Err(SignalError::UnexpectedKind {
                expected: expected.as_str(),
                found: signal.kind.as_str(),
            });
        }
        Ok(signal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SDP: &str = "v=0\r\no=- 123 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n\
                       a=candidate:1 1 udp 2130706431 192.168.1.4 50000 typ host\r\n";

    #[test]
    fn test_signal_roundtrip() {
        for signal in [SessionSignal::offer(SDP), SessionSignal::answer(SDP)] {
            let decoded = SessionSignal::decode(&signal.encode()).unwrap();
            assert_eq!(decoded, signal);
        }
    }

    #[test]
    fn test_wire_shape_matches_session_description() {
        let code = SessionSignal::offer("v=0\r\n").encode();
        assert_eq!(code, r#"{"type":"offer","sdp":"v=0\r\n"}"#);
    }

    #[test]
    fn test_pasted_whitespace_is_ignored() {
        let code = format!("\n  {}  \n", SessionSignal::answer(SDP).encode());
        assert_eq!(SessionSignal::decode(&code).unwrap().kind, SignalKind::Answer);
    }

    #[test]
    fn test_malformed_codes() {
        assert!(matches!(SessionSignal::decode("   "), Err(SignalError::Empty)));
        assert!(matches!(
            SessionSignal::decode("{\"type\":\"pranswer\",\"sdp\":\"\"}"),
            Err(SignalError::Malformed(_))
        ));
        assert!(matches!(
            SessionSignal::decode("hello"),
            Err(SignalError::Malformed(_))
        ));
    }

    #[test]
    fn test_decode_expecting_rejects_wrong_kind() {
        let code = SessionSignal::answer(SDP).encode();
        let err = SessionSignal::decode_expecting(&code, SignalKind::Offer).unwrap_err();
        assert!(matches!(
            err,
            SignalError::UnexpectedKind {
                expected: "offer",
                found: "answer"
            }
        ));
    }
}
