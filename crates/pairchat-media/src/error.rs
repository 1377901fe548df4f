use thiserror::Error;

use pairchat_shared::error::SignalError;
use pairchat_shared::protocol::CallSignal;
use pairchat_shared::types::CallState;

/// Errors raised while setting up or negotiating a peer connection.
#[derive(Error, Debug)]
pub enum PeerError {
    #[error("Peer connection is not initialized")]
    NotInitialized,

    #[error("Negotiation already started on this connection")]
    AlreadyNegotiating,

    #[error("Invalid connection code: {0}")]
    Signal(#[from] SignalError),

    #[error("WebRTC error: {0}")]
    WebRtc(#[from] webrtc::Error),

    #[error("No local description after candidate gathering")]
    MissingLocalDescription,
}

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("No input device available")]
    NoInputDevice,

    #[error("No output device available")]
    NoOutputDevice,

    #[error("Audio device error: {0}")]
    DeviceError(String),

    #[error("Audio stream error: {0}")]
    StreamError(String),

    #[error("Audio codec error: {0}")]
    CodecError(String),
}

#[derive(Error, Debug)]
pub enum CallError {
    #[error("A call is already in progress ({0})")]
    Busy(CallState),

    #[error("Call is {actual}, expected {expected}")]
    InvalidState { expected: CallState, actual: CallState },

    #[error("Could not send {} over the data channel", .0.as_str())]
    SignalNotSent(CallSignal),

    #[error(transparent)]
    Audio(#[from] AudioError),

    #[error(transparent)]
    Peer(#[from] PeerError),
}
