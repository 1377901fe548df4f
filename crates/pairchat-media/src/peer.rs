//! The connection core: one peer connection, one chat data channel and one
//! pre-negotiated audio transceiver.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use pairchat_shared::attachment::{AudioClip, MediaAttachment};
use pairchat_shared::error::ProtocolError;
use pairchat_shared::protocol::{CallSignal, PeerMessage};
use pairchat_shared::signal::{SessionSignal, SignalKind};
use pairchat_shared::types::ConnectionState;

use crate::call::CallTransport;
use crate::config::PeerConfig;
use crate::error::PeerError;
use crate::events::{PeerEvent, RemoteStream};
use crate::gathering::{wait_for_gathering, GatherOutcome};
use crate::state::fuse_state;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle to a single peer connection.
///
/// Cloning is cheap and every clone refers to the same connection. Once
/// [`disconnect`](Self::disconnect) has run the handle stays torn down; build
/// a new session to connect again.
#[derive(Clone)]
pub struct PeerSession {
    inner: Arc<Inner>,
}

struct Inner {
    config: PeerConfig,
    pc: Mutex<Option<Arc<RTCPeerConnection>>>,
    channel: Mutex<Option<Arc<RTCDataChannel>>>,
    audio_sender: Mutex<Option<Arc<RTCRtpSender>>>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<PeerEvent>>>,
    state_tx: watch::Sender<ConnectionState>,
}

impl PeerSession {
    /// Create the peer connection and its audio transceiver. No network
    /// traffic happens until an offer or answer is produced.
    pub async fn new(config: PeerConfig) -> Result<Self, PeerError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;

        let mut setting_engine = SettingEngine::default();
        if config.include_loopback {
            setting_engine.set_include_loopback_candidate(true);
        }

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .with_setting_engine(setting_engine)
            .build();

        let pc = Arc::new(api.new_peer_connection(config.rtc_configuration()).await?);

        // Voice calls swap a track into this sender, so no renegotiation is
        // needed once the chat is up.
        let transceiver = pc
            .add_transceiver_from_kind(
                RTPCodecType::Audio,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Sendrecv,
                    send_encodings: vec![],
                }),
            )
            .await?;
        let audio_sender = transceiver.sender().await;

        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);

        let inner = Arc::new(Inner {
            config,
            pc: Mutex::new(Some(pc.clone())),
            channel: Mutex::new(None),
            audio_sender: Mutex::new(Some(audio_sender)),
            subscribers: Mutex::new(Vec::new()),
            state_tx,
        });
        Inner::install_handlers(&inner, &pc);
        inner.publish_state();

        debug!("Peer connection created");
        Ok(Self { inner })
    }

    /// Whether two handles refer to the same connection.
    pub fn same(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    // ------------------------------------------------------------------
    // Negotiation
    // ------------------------------------------------------------------

    /// Initiator side: create the chat channel and return the offer code.
    pub async fn create_offer(&self) -> Result<String, PeerError> {
        let pc = self.inner.peer()?;
        if pc.local_description().await.is_some() {
            return Err(PeerError::AlreadyNegotiating);
        }

        let dc = pc
            .create_data_channel(&self.inner.config.channel_label, None)
            .await?;
        Inner::attach_channel(&self.inner, dc);

        let offer = pc.create_offer(None).await?;
        let local = self.inner.set_local_and_gather(&pc, offer).await?;

        info!("Offer created");
        Ok(SessionSignal::offer(local.sdp).encode())
    }

    /// Receiver side: apply the pasted offer and return the answer code.
    ///
    /// The chat channel arrives later through the remote-channel event.
    pub async fn accept_offer(&self, code: &str) -> Result<String, PeerError> {
        let signal = SessionSignal::decode_expecting(code, SignalKind::Offer)?;
        let pc = self.inner.peer()?;
        if pc.local_description().await.is_some() {
            return Err(PeerError::AlreadyNegotiating);
        }

        pc.set_remote_description(RTCSessionDescription::offer(signal.sdp)?)
            .await?;
        let answer = pc.create_answer(None).await?;
        let local = self.inner.set_local_and_gather(&pc, answer).await?;

        info!("Answer created");
        Ok(SessionSignal::answer(local.sdp).encode())
    }

    /// Initiator side: apply the pasted answer. The connection then comes up
    /// on its own.
    pub async fn accept_answer(&self, code: &str) -> Result<(), PeerError> {
        let signal = SessionSignal::decode_expecting(code, SignalKind::Answer)?;
        let pc = self.inner.peer()?;

        pc.set_remote_description(RTCSessionDescription::answer(signal.sdp)?)
            .await?;

        info!("Answer applied, waiting for connection");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Sending
    // ------------------------------------------------------------------

    /// Send a chat message. Returns `false` when the channel is not open or
    /// the transport refused the frame.
    pub async fn send_message(&self, text: &str) -> bool {
        self.send(PeerMessage::Message {
            text: text.to_string(),
        })
        .await
    }

    pub async fn send_typing_indicator(&self, is_typing: bool) {
        self.send(PeerMessage::Typing { is_typing }).await;
    }

    /// Send a voice clip as one frame. Size limits are the caller's concern.
    pub async fn send_audio_message(&self, clip: &AudioClip) -> bool {
        self.send(PeerMessage::AudioMessage {
            audio_data: clip.to_data_url(),
            duration: clip.duration,
        })
        .await
    }

    /// Send an image or video as one frame. Size limits are the caller's
    /// concern.
    pub async fn send_media_message(&self, media: &MediaAttachment) -> bool {
        self.send(PeerMessage::MediaMessage {
            media_data: media.to_data_url(),
            media_type: media.mime_type.clone(),
            media_width: media.width,
            media_height: media.height,
        })
        .await
    }

    pub async fn send_call_signal(&self, signal: CallSignal) -> bool {
        self.send(signal.into()).await
    }

    async fn send(&self, msg: PeerMessage) -> bool {
        let Some(dc) = self.inner.open_channel() else {
            warn!(kind = msg.type_name(), "Data channel not open, payload dropped");
            return false;
        };

        let frame = match msg.to_json() {
            Ok(frame) => frame,
            Err(e) => {
                warn!(kind = msg.type_name(), error = %e, "Failed to encode payload");
                return false;
            }
        };

        match dc.send_text(frame).await {
            Ok(_) => true,
            Err(e) => {
                warn!(kind = msg.type_name(), error = %e, "Data channel send failed");
                false
            }
        }
    }

    // ------------------------------------------------------------------
    // State
    // ------------------------------------------------------------------

    /// Current fused state, computed from the live transport.
    pub fn connection_state(&self) -> ConnectionState {
        self.inner.current_state()
    }

    /// Whether the chat channel is open.
    pub fn is_connected(&self) -> bool {
        self.inner.open_channel().is_some()
    }

    /// Subscribe to every event published from now on.
    ///
    /// The queue is unbounded: a slow consumer delays events but never
    /// loses them. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<PeerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.inner.subscribers).push(tx);
        rx
    }

    /// Latest-value view of the connection state.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Close the channel, then the transport. Safe to call repeatedly.
    pub async fn disconnect(&self) {
        let channel = lock(&self.inner.channel).take();
        let pc = lock(&self.inner.pc).take();
        lock(&self.inner.audio_sender).take();

        if let Some(dc) = channel {
            if let Err(e) = dc.close().await {
                debug!(error = %e, "Data channel close failed");
            }
        }
        if let Some(pc) = pc {
            if let Err(e) = pc.close().await {
                warn!(error = %e, "Peer connection close failed");
            }
            info!("Peer connection closed");
        }

        self.inner.publish_state();
    }

    // ------------------------------------------------------------------
    // Call media
    // ------------------------------------------------------------------

    /// Start sending `track` on the audio transceiver.
    pub async fn attach_local_audio(
        &self,
        track: Arc<TrackLocalStaticSample>,
    ) -> Result<(), PeerError> {
        let sender = self.inner.sender()?;
        let track: Arc<dyn TrackLocal + Send + Sync> = track;
        sender.replace_track(Some(track)).await?;
        debug!("Local audio attached");
        Ok(())
    }

    /// Stop sending local audio.
    pub async fn detach_local_audio(&self) -> Result<(), PeerError> {
        let sender = self.inner.sender()?;
        sender.replace_track(None).await?;
        debug!("Local audio detached");
        Ok(())
    }
}

#[async_trait]
impl CallTransport for PeerSession {
    async fn send_call_signal(&self, signal: CallSignal) -> bool {
        PeerSession::send_call_signal(self, signal).await
    }

    async fn attach_local_audio(&self, track: Arc<TrackLocalStaticSample>) -> Result<(), PeerError> {
        PeerSession::attach_local_audio(self, track).await
    }

    async fn detach_local_audio(&self) -> Result<(), PeerError> {
        PeerSession::detach_local_audio(self).await
    }
}

impl Inner {
    fn peer(&self) -> Result<Arc<RTCPeerConnection>, PeerError> {
        lock(&self.pc).clone().ok_or(PeerError::NotInitialized)
    }

    fn sender(&self) -> Result<Arc<RTCRtpSender>, PeerError> {
        lock(&self.audio_sender)
            .clone()
            .ok_or(PeerError::NotInitialized)
    }

    fn open_channel(&self) -> Option<Arc<RTCDataChannel>> {
        lock(&self.channel)
            .clone()
            .filter(|dc| dc.ready_state() == RTCDataChannelState::Open)
    }

    fn current_state(&self) -> ConnectionState {
        let ice = lock(&self.pc).as_ref().map(|pc| pc.ice_connection_state());
        let channel = lock(&self.channel).as_ref().map(|dc| dc.ready_state());
        fuse_state(ice, channel)
    }

    /// Recompute the fused state and publish it if it changed.
    fn publish_state(&self) {
        let state = self.current_state();
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        if changed {
            info!(%state, "Connection state changed");
            self.emit(PeerEvent::StateChanged(state));
        }
    }

    fn emit(&self, event: PeerEvent) {
        // Held across the whole fan-out so every subscriber sees one order.
        lock(&self.subscribers).retain(|tx| tx.send(event.clone()).is_ok());
    }

    async fn set_local_and_gather(
        &self,
        pc: &Arc<RTCPeerConnection>,
        description: RTCSessionDescription,
    ) -> Result<RTCSessionDescription, PeerError> {
        let mut gathered = pc.gathering_complete_promise().await;
        pc.set_local_description(description).await?;

        let outcome = wait_for_gathering(
            async move {
                let _ = gathered.recv().await;
            },
            self.config.gather_timeout,
        )
        .await;
        if outcome == GatherOutcome::TimedOut {
            warn!(
                timeout_ms = self.config.gather_timeout.as_millis() as u64,
                "Candidate gathering timed out, using candidates found so far"
            );
        }

        pc.local_description()
            .await
            .ok_or(PeerError::MissingLocalDescription)
    }

    fn install_handlers(inner: &Arc<Inner>, pc: &Arc<RTCPeerConnection>) {
        let weak = Arc::downgrade(inner);
        pc.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
            let weak = weak.clone();
            Box::pin(async move {
                debug!(?state, "ICE connection state");
                if let Some(inner) = weak.upgrade() {
                    inner.publish_state();
                }
            })
        }));

        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            Box::pin(async move {
                debug!(?state, "Peer connection state");
            })
        }));

        let weak = Arc::downgrade(inner);
        pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
            let weak = weak.clone();
            Box::pin(async move {
                if let Some(inner) = weak.upgrade() {
                    debug!(label = dc.label(), "Remote data channel offered");
                    Inner::attach_channel(&inner, dc);
                }
            })
        }));

        let weak = Arc::downgrade(inner);
        pc.on_track(Box::new(move |track: Arc<TrackRemote>, _, _| {
            let weak = weak.clone();
            Box::pin(async move {
                if let Some(inner) = weak.upgrade() {
                    let stream = RemoteStream::new(track);
                    info!(track = %stream.track_id, "Remote audio track received");
                    inner.emit(PeerEvent::RemoteStream(stream));
                }
            })
        }));
    }

    fn attach_channel(inner: &Arc<Inner>, dc: Arc<RTCDataChannel>) {
        if dc.label() != inner.config.channel_label {
            warn!(label = dc.label(), "Ignoring unexpected data channel");
            return;
        }

        let weak = Arc::downgrade(inner);
        dc.on_open(Box::new(move || {
            let weak = weak.clone();
            Box::pin(async move {
                debug!("Data channel open");
                if let Some(inner) = weak.upgrade() {
                    inner.publish_state();
                }
            })
        }));

        let weak = Arc::downgrade(inner);
        dc.on_close(Box::new(move || {
            let weak = weak.clone();
            Box::pin(async move {
                debug!("Data channel closed");
                if let Some(inner) = weak.upgrade() {
                    inner.publish_state();
                }
            })
        }));

        dc.on_error(Box::new(move |err: webrtc::Error| {
            Box::pin(async move {
                warn!(error = %err, "Data channel error");
            })
        }));

        let weak: Weak<Inner> = Arc::downgrade(inner);
        dc.on_message(Box::new(move |msg: DataChannelMessage| {
            let weak = weak.clone();
            Box::pin(async move {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_frame(msg);
                }
            })
        }));

        *lock(&inner.channel) = Some(dc);
        inner.publish_state();
    }

    /// Decode one inbound frame. Malformed or unknown payloads are logged and
    /// dropped.
    fn handle_frame(&self, msg: DataChannelMessage) {
        match decode_frame(&msg) {
            Ok(message) => {
                debug!(kind = message.type_name(), "Inbound payload");
                self.emit(message.into());
            }
            Err(e) => warn!(error = %e, "Dropping inbound payload"),
        }
    }
}

fn decode_frame(msg: &DataChannelMessage) -> Result<PeerMessage, ProtocolError> {
    if !msg.is_string {
        return Err(ProtocolError::BinaryFrame);
    }
    let text = String::from_utf8_lossy(&msg.data);
    PeerMessage::from_json(&text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::time::Duration;

    fn text_frame(s: &str) -> DataChannelMessage {
        DataChannelMessage {
            is_string: true,
            data: Bytes::from(s.to_string()),
        }
    }

    #[test]
    fn decode_frame_accepts_known_payloads() {
        let msg = decode_frame(&text_frame(r#"{"type":"message","text":"hi"}"#)).unwrap();
        assert_eq!(msg, PeerMessage::Message { text: "hi".into() });
    }

    #[test]
    fn decode_frame_rejects_garbage() {
        assert!(decode_frame(&text_frame("not json")).is_err());
        assert!(decode_frame(&text_frame(r#"{"type":"file-transfer"}"#)).is_err());
        let binary = DataChannelMessage {
            is_string: false,
            data: Bytes::from_static(b"\x00\x01"),
        };
        assert!(matches!(decode_frame(&binary), Err(ProtocolError::BinaryFrame)));
    }

    #[tokio::test]
    async fn fresh_session_is_connecting_and_refuses_sends() {
        let session = PeerSession::new(PeerConfig::local_only()).await.unwrap();
        assert_eq!(session.connection_state(), ConnectionState::Connecting);
        assert!(!session.is_connected());
        assert!(!session.send_message("too early").await);
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let session = PeerSession::new(PeerConfig::local_only()).await.unwrap();
        session.disconnect().await;
        assert_eq!(session.connection_state(), ConnectionState::Disconnected);
        session.disconnect().await;
        assert_eq!(session.connection_state(), ConnectionState::Disconnected);

        assert!(matches!(
            session.create_offer().await,
            Err(PeerError::NotInitialized)
        ));
    }

    #[tokio::test]
    async fn second_offer_is_rejected() {
        let session = PeerSession::new(PeerConfig::local_only()).await.unwrap();
        let offer = session.create_offer().await.unwrap();
        assert!(offer.contains(r#""type":"offer""#));
        assert!(matches!(
            session.create_offer().await,
            Err(PeerError::AlreadyNegotiating)
        ));
        session.disconnect().await;
    }

    #[tokio::test]
    async fn accept_offer_rejects_wrong_kind() {
        let session = PeerSession::new(PeerConfig::local_only()).await.unwrap();
        let bogus = SessionSignal::answer("v=0").encode();
        assert!(matches!(
            session.accept_offer(&bogus).await,
            Err(PeerError::Signal(_))
        ));
        assert!(matches!(
            session.accept_offer("{not json").await,
            Err(PeerError::Signal(_))
        ));
        session.disconnect().await;
    }

    #[tokio::test]
    async fn burst_of_inbound_payloads_reaches_a_slow_subscriber() {
        let session = PeerSession::new(PeerConfig::local_only()).await.unwrap();
        let mut events = session.subscribe();
        let dropped = session.subscribe();
        drop(dropped);

        for i in 0..1000 {
            let frame = format!(r#"{{"type":"message","text":"m{i}"}}"#);
            session.inner.handle_frame(text_frame(&frame));
        }

        let mut texts = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let PeerEvent::Message(text) = event {
                texts.push(text);
            }
        }
        assert_eq!(texts.len(), 1000);
        assert_eq!(texts[0], "m0");
        assert_eq!(texts[999], "m999");
        assert_eq!(lock(&session.inner.subscribers).len(), 1);
        session.disconnect().await;
    }

    async fn wait_connected(session: &PeerSession) -> bool {
        for _ in 0..300 {
            if session.is_connected() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn loopback_offer_answer_and_chat() {
        let alice = PeerSession::new(PeerConfig::local_only()).await.unwrap();
        let bob = PeerSession::new(PeerConfig::local_only()).await.unwrap();
        let mut bob_events = bob.subscribe();

        let offer = alice.create_offer().await.unwrap();
        let answer = bob.accept_offer(&offer).await.unwrap();
        alice.accept_answer(&answer).await.unwrap();

        assert!(wait_connected(&alice).await, "alice never connected");
        assert!(wait_connected(&bob).await, "bob never connected");
        assert_eq!(alice.connection_state(), ConnectionState::Connected);
        assert_eq!(bob.connection_state(), ConnectionState::Connected);

        assert!(alice.send_message("hi").await);

        let received = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match bob_events.recv().await {
                    Some(PeerEvent::Message(text)) => return text,
                    Some(_) => continue,
                    None => panic!("event stream closed"),
                }
            }
        })
        .await
        .expect("message not delivered");
        assert_eq!(received, "hi");

        // Exactly once.
        let extra = tokio::time::timeout(Duration::from_millis(300), async {
            loop {
                match bob_events.recv().await {
                    Some(PeerEvent::Message(text)) => return Some(text),
                    Some(_) => continue,
                    None => return None,
                }
            }
        })
        .await;
        assert!(!matches!(extra, Ok(Some(_))));

        alice.disconnect().await;
        bob.disconnect().await;
    }
}
