use thiserror::Error;

use crate::types::MediaKind;

#[derive(Error, Debug)]
pub enum SignalError {
    #[error("Malformed connection code: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Empty connection code")]
    Empty,

    #[error("Expected {expected} signal, got {found}")]
    UnexpectedKind {
        expected: &'static str,
        found: &'static str,
    },
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid peer message: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Binary frames are not part of the chat protocol")]
    BinaryFrame,
}

#[derive(Error, Debug)]
pub enum AttachmentError {
    #[error("{kind} attachment too large: {size} bytes (max {max})")]
    TooLarge {
        kind: MediaKind,
        size: usize,
        max: usize,
    },

    #[error("Voice clip too long: {duration:.1}s (max {max:.0}s)")]
    TooLong { duration: f64, max: f64 },

    #[error("Invalid voice clip duration: {0}")]
    InvalidDuration(f64),

    #[error("Unsupported media type: {0}")]
    UnsupportedMime(String),

    #[error("Invalid data URL")]
    InvalidDataUrl,

    #[error("Base64 decode error")]
    Base64Decode,
}
