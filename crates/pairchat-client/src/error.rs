use thiserror::Error;

use pairchat_media::{CallError, PeerError};
use pairchat_shared::error::AttachmentError;
use pairchat_store::StoreError;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("No active chat session")]
    NoSession,

    #[error("No saved contact with id {0}")]
    UnknownContact(String),

    #[error("Saved contact {0} has no code to reconnect with")]
    NoReconnectCode(String),

    #[error("Contact can only be saved after a handshake completed")]
    NoHandshake,

    #[error(transparent)]
    Attachment(#[from] AttachmentError),

    #[error(transparent)]
    Peer(#[from] PeerError),

    #[error(transparent)]
    Call(#[from] CallError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ClientError>;
