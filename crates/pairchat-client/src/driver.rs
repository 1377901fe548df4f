//! The event loop tying the connection, the reconciler and the call
//! controller together.
//!
//! UI commands arrive on an mpsc channel; connection events arrive on the
//! current session's unbounded event queue. Everything runs on one task, so the store and
//! the call state are only ever touched from here.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use pairchat_media::{
    AudioCapture, AudioSink, CallController, ConnectionSlot, PeerConfig, PeerEvent, PeerSession,
};
use pairchat_shared::attachment::{AudioClip, MediaAttachment};
use pairchat_shared::types::{CallState, ConnectionState, ContactId, Role};
use pairchat_store::{ChatStore, ImportStats, Message, SavedContact};

use crate::error::{ClientError, Result};
use crate::reconciler::{Reconnection, SessionReconciler};

/// Requests from the user interface.
#[derive(Debug)]
pub enum Command {
    CreateOffer,
    AcceptOffer(String),
    AcceptAnswer(String),
    SendMessage(String),
    Typing(bool),
    SendAudio(AudioClip),
    SendMedia(MediaAttachment),
    StartCall,
    AcceptCall,
    RejectCall,
    EndCall,
    ToggleMute,
    SaveContact(String),
    RenameContact(String),
    ListContacts,
    Reconnect(ContactId),
    Disconnect,
    Export(PathBuf),
    Import(PathBuf),
    ClearAll,
    Quit,
}

impl Command {
    /// Short name for logs. Never includes payloads.
    pub fn label(&self) -> &'static str {
        match self {
            Command::CreateOffer => "create-offer",
            Command::AcceptOffer(_) => "accept-offer",
            Command::AcceptAnswer(_) => "accept-answer",
            Command::SendMessage(_) => "send-message",
            Command::Typing(_) => "typing",
            Command::SendAudio(_) => "send-audio",
            Command::SendMedia(_) => "send-media",
            Command::StartCall => "start-call",
            Command::AcceptCall => "accept-call",
            Command::RejectCall => "reject-call",
            Command::EndCall => "end-call",
            Command::ToggleMute => "toggle-mute",
            Command::SaveContact(_) => "save-contact",
            Command::RenameContact(_) => "rename-contact",
            Command::ListContacts => "list-contacts",
            Command::Reconnect(_) => "reconnect",
            Command::Disconnect => "disconnect",
            Command::Export(_) => "export",
            Command::Import(_) => "import",
            Command::ClearAll => "clear-all",
            Command::Quit => "quit",
        }
    }
}

/// What the user interface should show.
#[derive(Debug, Clone)]
pub enum Notice {
    Offer(String),
    Answer(String),
    SessionStarted { contact_id: ContactId, name: String, history: Vec<Message> },
    Connection(ConnectionState),
    Message(Message),
    NotSent,
    PeerTyping(bool),
    Call(CallState),
    Muted(bool),
    ContactSaved(SavedContact),
    Contacts(Vec<SavedContact>),
    Reconnect(Reconnection),
    Exported(PathBuf),
    Imported(ImportStats),
    Cleared,
    Error(String),
}

enum Flow {
    Continue,
    Quit,
}

pub struct Driver<S: ChatStore> {
    reconciler: SessionReconciler<S>,
    slot: ConnectionSlot,
    capture: Arc<dyn AudioCapture>,
    sink: Arc<dyn AudioSink>,
    call: Option<CallController<PeerSession>>,
    events: Option<mpsc::UnboundedReceiver<PeerEvent>>,
    call_states: Option<broadcast::Receiver<CallState>>,
    notices: mpsc::Sender<Notice>,
}

impl<S: ChatStore> Driver<S> {
    pub fn new(
        store: S,
        peer: PeerConfig,
        capture: Arc<dyn AudioCapture>,
        sink: Arc<dyn AudioSink>,
        notices: mpsc::Sender<Notice>,
    ) -> Self {
        Self {
            reconciler: SessionReconciler::new(store),
            slot: ConnectionSlot::new(peer),
            capture,
            sink,
            call: None,
            events: None,
            call_states: None,
            notices,
        }
    }

    /// Process commands and connection events until `Quit` or until the
    /// command channel closes. The connection is torn down on the way out.
    pub async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        info!("Client driver started");

        if let Err(e) = self.resume().await {
            warn!(error = %e, "Could not reopen the previous session");
        }

        loop {
            tokio::select! {
                cmd = commands.recv() => {
                    let Some(cmd) = cmd else { break };
                    debug!(command = cmd.label(), "Command");
                    match self.handle_command(cmd).await {
                        Ok(Flow::Continue) => {}
                        Ok(Flow::Quit) => break,
                        Err(e) => {
                            warn!(error = %e, "Command failed");
                            self.notify(Notice::Error(e.to_string())).await;
                        }
                    }
                }
                event = next_event(&mut self.events) => match event {
                    Some(event) => self.handle_peer_event(event).await,
                    None => self.events = None,
                },
                state = recv_from(&mut self.call_states) => match state {
                    Ok(state) => self.notify(Notice::Call(state)).await,
                    Err(RecvError::Lagged(n)) => warn!(skipped = n, "Call transitions lagged"),
                    Err(RecvError::Closed) => self.call_states = None,
                },
            }
        }

        self.shutdown().await;
        info!("Client driver stopped");
    }

    /// Show the session the store still marks as current, without connecting.
    async fn resume(&mut self) -> Result<()> {
        if self.reconciler.resume_current_session()?.is_some() {
            self.notify_session().await;
        }
        Ok(())
    }

    async fn handle_command(&mut self, cmd: Command) -> Result<Flow> {
        match cmd {
            Command::CreateOffer => {
                let session = self.fresh_session().await?;
                let offer = self.reconciler.create_offer(&session).await?;
                self.notify(Notice::Offer(offer)).await;
            }

            Command::AcceptOffer(code) => {
                let session = self.fresh_session().await?;
                let answer = self.reconciler.accept_offer(&session, &code).await?;
                self.notify(Notice::Answer(answer)).await;
                self.notify_session().await;
            }

            Command::AcceptAnswer(code) => {
                let session = self.slot.current().await.ok_or(ClientError::NoSession)?;
                self.reconciler.accept_answer(&session, &code).await?;
                self.notify_session().await;
            }

            Command::SendMessage(text) => {
                let session = self.session().await?;
                if self.reconciler.send_message(&session, &text).await? {
                    self.notify_last_message().await;
                } else {
                    self.notify(Notice::NotSent).await;
                }
            }

            Command::Typing(is_typing) => {
                if let Some(session) = self.slot.current().await {
                    self.reconciler
                        .send_typing_indicator(&session, is_typing)
                        .await;
                }
            }

            Command::SendAudio(clip) => {
                let session = self.session().await?;
                if self.reconciler.send_audio_message(&session, &clip).await? {
                    self.notify_last_message().await;
                } else {
                    self.notify(Notice::NotSent).await;
                }
            }

            Command::SendMedia(media) => {
                let session = self.session().await?;
                if self.reconciler.send_media_message(&session, &media).await? {
                    self.notify_last_message().await;
                } else {
                    self.notify(Notice::NotSent).await;
                }
            }

            Command::StartCall => self.call_mut()?.start_voice_call().await?,
            Command::AcceptCall => self.call_mut()?.accept_voice_call().await?,
            Command::RejectCall => self.call_mut()?.reject_voice_call().await?,
            Command::EndCall => self.call_mut()?.end_voice_call().await,

            Command::ToggleMute => {
                let muted = self.call_mut()?.toggle_mute();
                self.notify(Notice::Muted(muted)).await;
            }

            Command::SaveContact(name) => {
                let saved = self.reconciler.save_contact(&name)?;
                self.notify(Notice::ContactSaved(saved)).await;
            }

            Command::RenameContact(name) => {
                self.reconciler.rename_contact(&name)?;
                self.notify_session().await;
            }

            Command::ListContacts => {
                let contacts = self.reconciler.store().list_saved_contacts()?;
                self.notify(Notice::Contacts(contacts)).await;
            }

            Command::Reconnect(contact_id) => self.reconnect(contact_id).await?,

            Command::Disconnect => self.teardown().await,

            Command::Export(path) => {
                let json = self.reconciler.store().export_data()?;
                tokio::fs::write(&path, json).await?;
                info!(path = %path.display(), "Data exported");
                self.notify(Notice::Exported(path)).await;
            }

            Command::Import(path) => {
                let json = tokio::fs::read_to_string(&path).await?;
                let stats = self.reconciler.store().import_data(&json)?;
                self.notify(Notice::Imported(stats)).await;
            }

            Command::ClearAll => {
                self.teardown().await;
                self.reconciler.store().clear_all_data()?;
                self.notify(Notice::Cleared).await;
            }

            Command::Quit => return Ok(Flow::Quit),
        }
        Ok(Flow::Continue)
    }

    async fn handle_peer_event(&mut self, event: PeerEvent) {
        match event {
            PeerEvent::CallSignal(signal) => {
                if let Some(call) = self.call.as_mut() {
                    call.handle_signal(signal).await;
                }
            }
            PeerEvent::RemoteStream(stream) => {
                if let Some(call) = self.call.as_mut() {
                    call.handle_remote_stream(stream).await;
                }
            }
            PeerEvent::StateChanged(state) => {
                if let Some(call) = self.call.as_mut() {
                    call.handle_connection_state(state).await;
                }
                self.reconciler.handle_state(state);
                self.notify(Notice::Connection(state)).await;
            }
            PeerEvent::Typing(is_typing) => {
                self.reconciler.handle_event(PeerEvent::Typing(is_typing));
                self.notify(Notice::PeerTyping(is_typing)).await;
            }
            other => {
                if let Some(message) = self.reconciler.handle_event(other) {
                    self.notify(Notice::Message(message)).await;
                }
            }
        }
    }

    async fn reconnect(&mut self, contact_id: ContactId) -> Result<()> {
        let saved = self
            .reconciler
            .store()
            .get_saved_contact(&contact_id)?
            .ok_or_else(|| ClientError::UnknownContact(contact_id.to_string()))?;

        // A receiver answers the stored offer again, which needs a connection
        // that has not negotiated yet.
        let session = match saved.my_role {
            Role::Receiver => self.fresh_session().await?,
            Role::Initiator => match self.slot.current().await {
                Some(session) => session,
                None => self.fresh_session().await?,
            },
        };

        let outcome = self.reconciler.reconnect(&session, &contact_id).await?;
        self.notify_session().await;
        self.notify(Notice::Reconnect(outcome)).await;
        Ok(())
    }

    /// Replace the current connection with a new one and start listening to it.
    async fn fresh_session(&mut self) -> Result<PeerSession> {
        if let Some(call) = self.call.as_mut() {
            call.end_voice_call().await;
        }
        let session = self.slot.replace().await?;

        let call = CallController::new(
            Arc::new(session.clone()),
            self.capture.clone(),
            self.sink.clone(),
        );
        self.events = Some(session.subscribe());
        self.call_states = Some(call.subscribe());
        self.call = Some(call);
        Ok(session)
    }

    async fn session(&self) -> Result<PeerSession> {
        self.slot.current().await.ok_or(ClientError::NoSession)
    }

    fn call_mut(&mut self) -> Result<&mut CallController<PeerSession>> {
        self.call.as_mut().ok_or(ClientError::NoSession)
    }

    async fn teardown(&mut self) {
        if let Some(call) = self.call.as_mut() {
            call.end_voice_call().await;
        }
        match self.slot.current().await {
            Some(session) => {
                if let Err(e) = self.reconciler.end_session(&session).await {
                    warn!(error = %e, "Failed to close the session cleanly");
                }
            }
            None => {
                if let Err(e) = self.reconciler.store().clear_current_session() {
                    warn!(error = %e, "Failed to clear the current session");
                }
            }
        }
        self.slot.reset().await;
        self.call = None;
        self.events = None;
        self.call_states = None;
        self.notify(Notice::Connection(ConnectionState::Disconnected))
            .await;
    }

    /// Close the connection but keep the current-session pointer, so the
    /// next start reopens the same conversation.
    async fn shutdown(&mut self) {
        if let Some(call) = self.call.as_mut() {
            call.end_voice_call().await;
        }
        if let Some(session) = self.slot.current().await {
            session.disconnect().await;
        }
        self.reconciler.handle_state(ConnectionState::Disconnected);
        self.slot.reset().await;
        self.call = None;
    }

    async fn notify_session(&self) {
        if let Some(contact_id) = self.reconciler.contact_id() {
            let notice = Notice::SessionStarted {
                contact_id: contact_id.clone(),
                name: self.reconciler.contact_name().to_string(),
                history: self.reconciler.messages().to_vec(),
            };
            self.notify(notice).await;
        }
    }

    async fn notify_last_message(&self) {
        if let Some(message) = self.reconciler.messages().last() {
            self.notify(Notice::Message(message.clone())).await;
        }
    }

    async fn notify(&self, notice: Notice) {
        if self.notices.send(notice).await.is_err() {
            debug!("Notice dropped, no interface attached");
        }
    }
}

async fn next_event(rx: &mut Option<mpsc::UnboundedReceiver<PeerEvent>>) -> Option<PeerEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn recv_from<T: Clone>(rx: &mut Option<broadcast::Receiver<T>>) -> std::result::Result<T, RecvError> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
