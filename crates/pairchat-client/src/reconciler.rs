//! Keeps the persisted chat state in step with the live connection.
//!
//! The reconciler owns the in-memory view of the current conversation. It
//! loads history when a session starts, records every message that actually
//! crossed the wire, mirrors the connection state into the contact's online
//! flag, and keeps the connection codes needed for a later reconnection
//! attempt.

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use pairchat_media::{PeerError, PeerEvent, PeerSession};
use pairchat_shared::attachment::{AudioClip, MediaAttachment};
use pairchat_shared::constants::DEFAULT_CONTACT_NAME;
use pairchat_shared::types::{Author, ConnectionState, ContactId, MediaKind, Role};
use pairchat_store::{ChatStore, Message, SavedContact};

use crate::error::{ClientError, Result};

/// The connection operations the reconciler drives.
#[async_trait]
pub trait PeerLink: Send + Sync {
    async fn create_offer(&self) -> std::result::Result<String, PeerError>;
    async fn accept_offer(&self, offer: &str) -> std::result::Result<String, PeerError>;
    async fn accept_answer(&self, answer: &str) -> std::result::Result<(), PeerError>;
    async fn send_message(&self, text: &str) -> bool;
    async fn send_typing_indicator(&self, is_typing: bool);
    async fn send_audio_message(&self, clip: &AudioClip) -> bool;
    async fn send_media_message(&self, media: &MediaAttachment) -> bool;
    fn connection_state(&self) -> ConnectionState;
    async fn disconnect(&self);
}

#[async_trait]
impl PeerLink for PeerSession {
    async fn create_offer(&self) -> std::result::Result<String, PeerError> {
        PeerSession::create_offer(self).await
    }

    async fn accept_offer(&self, offer: &str) -> std::result::Result<String, PeerError> {
        PeerSession::accept_offer(self, offer).await
    }

    async fn accept_answer(&self, answer: &str) -> std::result::Result<(), PeerError> {
        PeerSession::accept_answer(self, answer).await
    }

    async fn send_message(&self, text: &str) -> bool {
        PeerSession::send_message(self, text).await
    }

    async fn send_typing_indicator(&self, is_typing: bool) {
        PeerSession::send_typing_indicator(self, is_typing).await
    }

    async fn send_audio_message(&self, clip: &AudioClip) -> bool {
        PeerSession::send_audio_message(self, clip).await
    }

    async fn send_media_message(&self, media: &MediaAttachment) -> bool {
        PeerSession::send_media_message(self, media).await
    }

    fn connection_state(&self) -> ConnectionState {
        PeerSession::connection_state(self)
    }

    async fn disconnect(&self) {
        PeerSession::disconnect(self).await
    }
}

/// Outcome of a reconnection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconnection {
    /// The stored answer was applied to the current session.
    AnswerApplied,
    /// A fresh answer was produced and stored. It must reach the peer again.
    NewAnswer(String),
}

/// The code this side kept from the handshake that opened the session.
#[derive(Debug, Clone)]
struct Handshake {
    role: Role,
    code: String,
}

pub struct SessionReconciler<S: ChatStore> {
    store: S,
    contact_id: Option<ContactId>,
    contact_name: String,
    messages: Vec<Message>,
    state: ConnectionState,
    peer_typing: bool,
    handshake: Option<Handshake>,
}

impl<S: ChatStore> SessionReconciler<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            contact_id: None,
            contact_name: DEFAULT_CONTACT_NAME.to_string(),
            messages: Vec::new(),
            state: ConnectionState::Disconnected,
            peer_typing: false,
            handshake: None,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn contact_id(&self) -> Option<&ContactId> {
        self.contact_id.as_ref()
    }

    pub fn contact_name(&self) -> &str {
        &self.contact_name
    }

    /// History of the current session, oldest first.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn peer_typing(&self) -> bool {
        self.peer_typing
    }

    // ------------------------------------------------------------------
    // Session lifecycle
    // ------------------------------------------------------------------

    /// Make `contact_id` the current session and load its history.
    ///
    /// The in-memory history is replaced, never merged, so starting the same
    /// session twice does not duplicate messages.
    pub fn start_session(&mut self, contact_id: ContactId) -> Result<()> {
        let session = self
            .store
            .ensure_chat_session(&contact_id, DEFAULT_CONTACT_NAME)?;
        self.messages = self.store.get_messages(&contact_id)?;
        self.store.set_current_session(&contact_id)?;

        info!(
            contact = %contact_id,
            messages = self.messages.len(),
            "Session started"
        );
        self.contact_name = session.contact_name;
        self.contact_id = Some(contact_id);
        self.peer_typing = false;
        Ok(())
    }

    /// Reopen the session the store marks as current, if any.
    pub fn resume_current_session(&mut self) -> Result<Option<ContactId>> {
        let Some(contact_id) = self.store.get_current_session()? else {
            return Ok(None);
        };
        self.start_session(contact_id.clone())?;
        Ok(Some(contact_id))
    }

    /// Disconnect and forget the current session. History stays stored.
    pub async fn end_session(&mut self, link: &dyn PeerLink) -> Result<()> {
        link.disconnect().await;
        self.state = ConnectionState::Disconnected;

        if let Some(contact_id) = self.contact_id.take() {
            self.store
                .update_contact_status(&contact_id, &self.contact_name, false)?;
            info!(contact = %contact_id, "Session ended");
        }
        self.store.clear_current_session()?;

        self.contact_name = DEFAULT_CONTACT_NAME.to_string();
        self.messages.clear();
        self.peer_typing = false;
        self.handshake = None;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Manual handshake
    // ------------------------------------------------------------------

    pub async fn create_offer(&mut self, link: &dyn PeerLink) -> Result<String> {
        let offer = link.create_offer().await?;
        debug!("Offer ready to share");
        Ok(offer)
    }

    /// Receiver side: answer a pasted offer and open a new session for it.
    pub async fn accept_offer(&mut self, link: &dyn PeerLink, offer: &str) -> Result<String> {
        let answer = link.accept_offer(offer).await?;
        self.start_session(ContactId::generate())?;
        self.handshake = Some(Handshake {
            role: Role::Receiver,
            code: offer.to_string(),
        });
        Ok(answer)
    }

    /// Initiator side: apply a pasted answer and open a new session for it.
    pub async fn accept_answer(&mut self, link: &dyn PeerLink, answer: &str) -> Result<()> {
        link.accept_answer(answer).await?;
        self.start_session(ContactId::generate())?;
        self.handshake = Some(Handshake {
            role: Role::Initiator,
            code: answer.to_string(),
        });
        Ok(())
    }

    /// Best-effort reconnection with a saved contact's stored codes.
    ///
    /// As initiator the stored answer is applied to `link`. As receiver the
    /// stored offer is answered again on `link`, which must be a fresh
    /// session, and the new answer replaces the stored one. Either way the
    /// connection only comes up if the peer retries at the same time.
    pub async fn reconnect(
        &mut self,
        link: &dyn PeerLink,
        contact_id: &ContactId,
    ) -> Result<Reconnection> {
        let saved = self
            .store
            .get_saved_contact(contact_id)?
            .ok_or_else(|| ClientError::UnknownContact(contact_id.to_string()))?;

        let (outcome, code) = match saved.my_role {
            Role::Initiator => {
                let answer = saved
                    .answer_code
                    .ok_or_else(|| ClientError::NoReconnectCode(contact_id.to_string()))?;
                link.accept_answer(&answer).await?;
                (Reconnection::AnswerApplied, answer)
            }
            Role::Receiver => {
                let offer = saved
                    .offer_code
                    .ok_or_else(|| ClientError::NoReconnectCode(contact_id.to_string()))?;
                let answer = link.accept_offer(&offer).await?;
                self.store.set_answer_code(contact_id, &answer)?;
                (Reconnection::NewAnswer(answer), offer)
            }
        };

        info!(contact = %contact_id, role = saved.my_role.as_str(), "Reconnection attempted");
        self.start_session(contact_id.clone())?;
        self.handshake = Some(Handshake {
            role: saved.my_role,
            code,
        });
        Ok(outcome)
    }

    // ------------------------------------------------------------------
    // Contacts
    // ------------------------------------------------------------------

    /// Save the current peer under `name`, keeping the handshake code for a
    /// later reconnection. An already saved contact is only renamed.
    pub fn save_contact(&mut self, name: &str) -> Result<SavedContact> {
        let contact_id = self.contact_id.clone().ok_or(ClientError::NoSession)?;

        let saved = match self.store.get_saved_contact(&contact_id)? {
            Some(mut existing) => {
                self.store.rename_saved_contact(&contact_id, name)?;
                existing.name = name.to_string();
                existing
            }
            None => {
                let handshake = self.handshake.as_ref().ok_or(ClientError::NoHandshake)?;
                let saved = SavedContact::new(
                    contact_id.clone(),
                    name,
                    handshake.role,
                    handshake.code.clone(),
                );
                self.store.save_saved_contact(&saved)?;
                saved
            }
        };

        self.apply_name(&contact_id, name)?;
        info!(contact = %contact_id, name, "Contact saved");
        Ok(saved)
    }

    /// Rename the current session and its saved contact, if there is one.
    pub fn rename_contact(&mut self, name: &str) -> Result<()> {
        let contact_id = self.contact_id.clone().ok_or(ClientError::NoSession)?;
        self.store.rename_saved_contact(&contact_id, name)?;
        self.apply_name(&contact_id, name)?;
        info!(contact = %contact_id, name, "Contact renamed");
        Ok(())
    }

    /// Forget a saved contact together with its history.
    pub fn delete_contact(&mut self, contact_id: &ContactId) -> Result<bool> {
        let removed = self.store.delete_saved_contact(contact_id)?;
        if self.contact_id.as_ref() == Some(contact_id) {
            self.store.clear_current_session()?;
            self.contact_id = None;
            self.contact_name = DEFAULT_CONTACT_NAME.to_string();
            self.messages.clear();
            self.handshake = None;
        }
        Ok(removed)
    }

    fn apply_name(&mut self, contact_id: &ContactId, name: &str) -> Result<()> {
        self.store.rename_chat_session(contact_id, name)?;
        self.store
            .update_contact_status(contact_id, name, self.is_connected())?;
        self.contact_name = name.to_string();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------

    /// Send a chat message. Only a message the connection accepted is
    /// recorded; `Ok(false)` means nothing was sent and nothing stored.
    pub async fn send_message(&mut self, link: &dyn PeerLink, text: &str) -> Result<bool> {
        self.require_session()?;
        if !link.send_message(text).await {
            return Ok(false);
        }
        self.record(Message::text(Author::Me, text))?;
        Ok(true)
    }

    pub async fn send_typing_indicator(&mut self, link: &dyn PeerLink, is_typing: bool) {
        link.send_typing_indicator(is_typing).await;
    }

    /// Send a voice clip after checking its size and length.
    pub async fn send_audio_message(
        &mut self,
        link: &dyn PeerLink,
        clip: &AudioClip,
    ) -> Result<bool> {
        self.require_session()?;
        clip.validate()?;
        if !link.send_audio_message(clip).await {
            return Ok(false);
        }
        self.record(Message::audio(Author::Me, clip.to_data_url(), clip.duration))?;
        Ok(true)
    }

    /// Send an image or video after checking its type and size.
    pub async fn send_media_message(
        &mut self,
        link: &dyn PeerLink,
        media: &MediaAttachment,
    ) -> Result<bool> {
        self.require_session()?;
        let kind = media.validate()?;
        if !link.send_media_message(media).await {
            return Ok(false);
        }
        self.record(Message::media(
            Author::Me,
            kind,
            media.to_data_url(),
            media.mime_type.clone(),
            media.width,
            media.height,
        ))?;
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------

    /// Apply a connection state. Repeating the same state is harmless.
    pub fn handle_state(&mut self, state: ConnectionState) {
        self.state = state;
        if state != ConnectionState::Connected {
            self.peer_typing = false;
        }

        let Some(contact_id) = self.contact_id.clone() else {
            return;
        };
        let online = state == ConnectionState::Connected;
        if let Err(e) = self
            .store
            .update_contact_status(&contact_id, &self.contact_name, online)
        {
            warn!(contact = %contact_id, error = %e, "Failed to persist online status");
        }
        if online {
            match self.store.touch_last_connected(&contact_id, Utc::now()) {
                Ok(true) => debug!(contact = %contact_id, "Saved contact reconnected"),
                Ok(false) => {}
                Err(e) => warn!(contact = %contact_id, error = %e, "Failed to stamp last connection"),
            }
        }
    }

    /// Apply a connection event. Returns the message it recorded, if any.
    ///
    /// Call signals and remote streams belong to the call controller and are
    /// ignored here.
    pub fn handle_event(&mut self, event: PeerEvent) -> Option<Message> {
        let message = match event {
            PeerEvent::StateChanged(state) => {
                self.handle_state(state);
                return None;
            }
            PeerEvent::Typing(is_typing) => {
                self.peer_typing = is_typing;
                return None;
            }
            PeerEvent::Message(text) => Message::text(Author::Peer, text),
            PeerEvent::AudioMessage {
                audio_data,
                duration,
            } => Message::audio(Author::Peer, audio_data, duration),
            PeerEvent::MediaMessage {
                media_data,
                media_type,
                width,
                height,
            } => match MediaKind::from_mime(&media_type) {
                Some(kind) => {
                    Message::media(Author::Peer, kind, media_data, media_type, width, height)
                }
                None => {
                    warn!(media_type = %media_type, "Dropping media message of unsupported type");
                    return None;
                }
            },
            PeerEvent::CallSignal(_) | PeerEvent::RemoteStream(_) => return None,
        };

        if self.contact_id.is_none() {
            warn!("Inbound message without an active session, dropped");
            return None;
        }
        self.peer_typing = false;
        if let Err(e) = self.record(message.clone()) {
            warn!(error = %e, "Failed to persist inbound message");
        }
        Some(message)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn require_session(&self) -> Result<&ContactId> {
        self.contact_id.as_ref().ok_or(ClientError::NoSession)
    }

    /// Append to the in-memory history, then persist.
    fn record(&mut self, message: Message) -> Result<()> {
        let contact_id = self.contact_id.clone().ok_or(ClientError::NoSession)?;
        debug!(
            contact = %contact_id,
            sender = message.sender.as_str(),
            kind = message.content.kind_str(),
            "Recording message"
        );
        self.messages.push(message);
        if let Some(stored) = self.messages.last() {
            self.store.add_message(&contact_id, stored)?;
        }
        Ok(())
    }
}
