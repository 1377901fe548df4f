// Types and wire formats shared by the store, media and client crates.

pub mod attachment;
pub mod constants;
pub mod error;
pub mod protocol;
pub mod signal;
pub mod types;

pub use error::{AttachmentError, ProtocolError, SignalError};
pub use protocol::{CallSignal, PeerMessage};
pub use signal::{SessionSignal, SignalKind};
pub use types::{Author, CallState, ConnectionState, ContactId, MediaKind, Role};
