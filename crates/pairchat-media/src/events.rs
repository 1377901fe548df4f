use std::fmt;
use std::sync::Arc;

use webrtc::track::track_remote::TrackRemote;

use pairchat_shared::protocol::{CallSignal, PeerMessage};
use pairchat_shared::types::ConnectionState;

/// Events published by a [`PeerSession`](crate::PeerSession).
///
/// Every subscriber receives every event once, in order, with nothing
/// dropped for slow readers.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// The fused connection state changed.
    StateChanged(ConnectionState),
    Message(String),
    AudioMessage {
        audio_data: String,
        duration: f64,
    },
    MediaMessage {
        media_data: String,
        media_type: String,
        width: Option<u32>,
        height: Option<u32>,
    },
    Typing(bool),
    CallSignal(CallSignal),
    /// Remote audio started arriving on the pre-negotiated transceiver.
    RemoteStream(RemoteStream),
}

impl From<PeerMessage> for PeerEvent {
    fn from(msg: PeerMessage) -> Self {
        match msg {
            PeerMessage::Message { text } => PeerEvent::Message(text),
            PeerMessage::AudioMessage {
                audio_data,
                duration,
            } => PeerEvent::AudioMessage {
                audio_data,
                duration,
            },
            PeerMessage::MediaMessage {
                media_data,
                media_type,
                media_width,
                media_height,
            } => PeerEvent::MediaMessage {
                media_data,
                media_type,
                width: media_width,
                height: media_height,
            },
            PeerMessage::Typing { is_typing } => PeerEvent::Typing(is_typing),
            PeerMessage::CallRequest => PeerEvent::CallSignal(CallSignal::Request),
            PeerMessage::CallAccept => PeerEvent::CallSignal(CallSignal::Accept),
            PeerMessage::CallReject => PeerEvent::CallSignal(CallSignal::Reject),
            PeerMessage::CallEnd => PeerEvent::CallSignal(CallSignal::End),
        }
    }
}

/// Handle to an inbound media track.
#[derive(Clone)]
pub struct RemoteStream {
    pub track_id: String,
    pub stream_id: String,
    track: Option<Arc<TrackRemote>>,
}

impl RemoteStream {
    pub fn new(track: Arc<TrackRemote>) -> Self {
        Self {
            track_id: track.id(),
            stream_id: track.stream_id(),
            track: Some(track),
        }
    }

    /// A stream description with no RTP source behind it.
    pub fn detached(track_id: impl Into<String>, stream_id: impl Into<String>) -> Self {
        Self {
            track_id: track_id.into(),
            stream_id: stream_id.into(),
            track: None,
        }
    }

    pub fn track(&self) -> Option<&Arc<TrackRemote>> {
        self.track.as_ref()
    }
}

impl fmt::Debug for RemoteStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteStream")
            .field("track_id", &self.track_id)
            .field("stream_id", &self.stream_id)
            .field("attached", &self.track.is_some())
            .finish()
    }
}
