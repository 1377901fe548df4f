//! Peer connection, voice call and audio plumbing for pairchat.

pub mod audio;
pub mod call;
pub mod codec;
pub mod config;
pub mod error;
pub mod events;
pub mod gathering;
pub mod peer;
pub mod slot;
pub mod state;

pub use audio::{
    AudioCapture, AudioSink, DeviceCapture, DevicePlayback, LocalAudio, PlaybackHandle,
};
pub use call::{CallController, CallTransport};
pub use config::PeerConfig;
pub use error::{AudioError, CallError, PeerError};
pub use events::{PeerEvent, RemoteStream};
pub use gathering::{wait_for_gathering, GatherOutcome};
pub use peer::PeerSession;
pub use slot::ConnectionSlot;
pub use state::fuse_state;
