//! Voice call state machine.
//!
//! Calls ride on an already connected session: signalling goes over the chat
//! data channel and audio over the pre-negotiated transceiver.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use pairchat_shared::constants::EVENT_CHANNEL_CAPACITY;
use pairchat_shared::protocol::CallSignal;
use pairchat_shared::types::{CallState, ConnectionState};

use crate::audio::{AudioCapture, AudioSink, LocalAudio, PlaybackHandle};
use crate::error::{CallError, PeerError};
use crate::events::RemoteStream;

/// What the call controller needs from a connection.
#[async_trait]
pub trait CallTransport: Send + Sync {
    /// Send a call signal over the chat channel. `false` if it was not sent.
    async fn send_call_signal(&self, signal: CallSignal) -> bool;

    async fn attach_local_audio(&self, track: Arc<TrackLocalStaticSample>) -> Result<(), PeerError>;

    async fn detach_local_audio(&self) -> Result<(), PeerError>;
}

pub struct CallController<T: CallTransport + ?Sized> {
    transport: Arc<T>,
    capture: Arc<dyn AudioCapture>,
    sink: Arc<dyn AudioSink>,
    state: CallState,
    local: Option<LocalAudio>,
    remote: Option<RemoteStream>,
    playback: Option<PlaybackHandle>,
    transitions: broadcast::Sender<CallState>,
}

impl<T: CallTransport + ?Sized> CallController<T> {
    pub fn new(transport: Arc<T>, capture: Arc<dyn AudioCapture>, sink: Arc<dyn AudioSink>) -> Self {
        let (transitions, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            transport,
            capture,
            sink,
            state: CallState::Idle,
            local: None,
            remote: None,
            playback: None,
            transitions,
        }
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    /// Every state the call passes through, including the transient `Ended`.
    pub fn subscribe(&self) -> broadcast::Receiver<CallState> {
        self.transitions.subscribe()
    }

    pub fn remote_stream(&self) -> Option<&RemoteStream> {
        self.remote.as_ref()
    }

    pub fn is_playing(&self) -> bool {
        self.playback.as_ref().is_some_and(PlaybackHandle::is_active)
    }

    // ------------------------------------------------------------------
    // Local actions
    // ------------------------------------------------------------------

    /// Open the microphone and ring the peer.
    pub async fn start_voice_call(&mut self) -> Result<(), CallError> {
        if self.state != CallState::Idle {
            return Err(CallError::Busy(self.state));
        }

        self.acquire_audio().await?;

        if !self.transport.send_call_signal(CallSignal::Request).await {
            self.release().await;
            return Err(CallError::SignalNotSent(CallSignal::Request));
        }

        self.set_state(CallState::Calling);
        Ok(())
    }

    /// Pick up a ringing call.
    pub async fn accept_voice_call(&mut self) -> Result<(), CallError> {
        self.expect_state(CallState::Ringing)?;

        self.acquire_audio().await?;

        if !self.transport.send_call_signal(CallSignal::Accept).await {
            self.release().await;
            return Err(CallError::SignalNotSent(CallSignal::Accept));
        }

        self.set_state(CallState::Active);
        self.start_playback().await;
        Ok(())
    }

    /// Decline a ringing call.
    pub async fn reject_voice_call(&mut self) -> Result<(), CallError> {
        self.expect_state(CallState::Ringing)?;

        if !self.transport.send_call_signal(CallSignal::Reject).await {
            warn!("Call reject could not be delivered");
        }
        self.finish().await;
        Ok(())
    }

    /// Hang up. Does nothing when no call is in progress.
    pub async fn end_voice_call(&mut self) {
        if self.state == CallState::Idle {
            return;
        }
        if !self.transport.send_call_signal(CallSignal::End).await {
            warn!("Call end could not be delivered");
        }
        self.finish().await;
    }

    /// Flip the microphone mute switch. Returns whether it is now muted;
    /// `false` when there is no local track.
    pub fn toggle_mute(&mut self) -> bool {
        match self.local.as_ref() {
            Some(local) => {
                let muted = local.is_enabled();
                local.set_enabled(!muted);
                info!(muted, "Microphone toggled");
                muted
            }
            None => false,
        }
    }

    pub fn is_muted(&self) -> bool {
        self.local.as_ref().is_some_and(|l| !l.is_enabled())
    }

    // ------------------------------------------------------------------
    // Remote input
    // ------------------------------------------------------------------

    /// Apply a call signal received from the peer.
    pub async fn handle_signal(&mut self, signal: CallSignal) {
        debug!(signal = signal.as_str(), state = %self.state, "Call signal received");
        match signal {
            CallSignal::Request => {
                if self.state == CallState::Idle {
                    self.set_state(CallState::Ringing);
                } else {
                    warn!(state = %self.state, "Ignoring call request while busy");
                }
            }
            CallSignal::Accept => {
                if self.state == CallState::Calling {
                    self.set_state(CallState::Active);
                    self.start_playback().await;
                } else {
                    warn!(state = %self.state, "Ignoring unexpected call accept");
                }
            }
            CallSignal::Reject => {
                if self.state == CallState::Calling {
                    info!("Call rejected by peer");
                    self.finish().await;
                } else {
                    warn!(state = %self.state, "Ignoring unexpected call reject");
                }
            }
            CallSignal::End => {
                if self.state != CallState::Idle {
                    info!("Call ended by peer");
                    self.finish().await;
                }
            }
        }
    }

    /// A lost connection ends any call in progress.
    pub async fn handle_connection_state(&mut self, state: ConnectionState) {
        if matches!(state, ConnectionState::Disconnected | ConnectionState::Failed)
            && self.state != CallState::Idle
        {
            info!(connection = %state, "Connection lost, ending call");
            self.finish().await;
        }
    }

    /// Remember the remote audio stream. It outlives individual calls.
    pub async fn handle_remote_stream(&mut self, stream: RemoteStream) {
        self.remote = Some(stream);
        if self.state == CallState::Active && self.playback.is_none() {
            self.start_playback().await;
        }
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn expect_state(&self, expected: CallState) -> Result<(), CallError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(CallError::InvalidState {
                expected,
                actual: self.state,
            })
        }
    }

    fn set_state(&mut self, state: CallState) {
        if self.state == state {
            return;
        }
        info!(from = %self.state, to = %state, "Call state");
        self.state = state;
        let _ = self.transitions.send(state);
    }

    async fn acquire_audio(&mut self) -> Result<(), CallError> {
        let local = self.capture.open().await?;
        if let Err(e) = self.transport.attach_local_audio(local.track()).await {
            local.stop();
            return Err(e.into());
        }
        self.local = Some(local);
        Ok(())
    }

    async fn start_playback(&mut self) {
        let Some(stream) = self.remote.as_ref() else {
            debug!("No remote audio yet, playback deferred");
            return;
        };
        match self.sink.play(stream).await {
            Ok(handle) => self.playback = Some(handle),
            Err(e) => warn!(error = %e, "Remote audio playback failed"),
        }
    }

    async fn release(&mut self) {
        if let Some(mut playback) = self.playback.take() {
            playback.stop();
        }
        if let Some(local) = self.local.take() {
            local.stop();
            if let Err(e) = self.transport.detach_local_audio().await {
                debug!(error = %e, "Detaching local audio failed");
            }
        }
    }

    async fn finish(&mut self) {
        self.release().await;
        self.set_state(CallState::Ended);
        self.set_state(CallState::Idle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use crate::audio::voice_track;
    use crate::error::AudioError;

    #[derive(Default)]
    struct FakeTransport {
        sent: Mutex<Vec<CallSignal>>,
        offline: AtomicBool,
        attached: AtomicBool,
    }

    impl FakeTransport {
        fn offline() -> Self {
            let t = Self::default();
            t.offline.store(true, Ordering::SeqCst);
            t
        }

        fn sent(&self) -> Vec<CallSignal> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CallTransport for FakeTransport {
        async fn send_call_signal(&self, signal: CallSignal) -> bool {
            if self.offline.load(Ordering::SeqCst) {
                return false;
            }
            self.sent.lock().unwrap().push(signal);
            true
        }

        async fn attach_local_audio(&self, _: Arc<TrackLocalStaticSample>) -> Result<(), PeerError> {
            self.attached.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn detach_local_audio(&self) -> Result<(), PeerError> {
            self.attached.store(false, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FakeCapture;

    #[async_trait]
    impl AudioCapture for FakeCapture {
        async fn open(&self) -> Result<LocalAudio, AudioError> {
            Ok(LocalAudio::new(voice_track()))
        }
    }

    struct DeniedCapture;

    #[async_trait]
    impl AudioCapture for DeniedCapture {
        async fn open(&self) -> Result<LocalAudio, AudioError> {
            Err(AudioError::NoInputDevice)
        }
    }

    struct NullSink;

    #[async_trait]
    impl AudioSink for NullSink {
        async fn play(&self, _: &RemoteStream) -> Result<PlaybackHandle, AudioError> {
            Ok(PlaybackHandle::channel().0)
        }
    }

    fn controller(transport: Arc<FakeTransport>) -> CallController<FakeTransport> {
        CallController::new(transport, Arc::new(FakeCapture), Arc::new(NullSink))
    }

    #[tokio::test]
    async fn outgoing_call_accepted_then_ended() {
        let transport = Arc::new(FakeTransport::default());
        let mut call = controller(transport.clone());
        let mut transitions = call.subscribe();

        call.start_voice_call().await.unwrap();
        assert_eq!(call.state(), CallState::Calling);
        assert!(transport.attached.load(Ordering::SeqCst));

        call.handle_signal(CallSignal::Accept).await;
        assert_eq!(call.state(), CallState::Active);

        call.end_voice_call().await;
        assert_eq!(call.state(), CallState::Idle);
        assert!(!transport.attached.load(Ordering::SeqCst));
        assert_eq!(transport.sent(), vec![CallSignal::Request, CallSignal::End]);

        let mut seen = Vec::new();
        while let Ok(s) = transitions.try_recv() {
            seen.push(s);
        }
        assert_eq!(
            seen,
            vec![
                CallState::Calling,
                CallState::Active,
                CallState::Ended,
                CallState::Idle
            ]
        );
    }

    #[tokio::test]
    async fn second_call_is_busy() {
        let transport = Arc::new(FakeTransport::default());
        let mut call = controller(transport);
        call.start_voice_call().await.unwrap();
        assert!(matches!(
            call.start_voice_call().await,
            Err(CallError::Busy(CallState::Calling))
        ));
    }

    #[tokio::test]
    async fn incoming_call_reject_sends_exactly_once() {
        let transport = Arc::new(FakeTransport::default());
        let mut call = controller(transport.clone());

        call.handle_signal(CallSignal::Request).await;
        assert_eq!(call.state(), CallState::Ringing);

        call.reject_voice_call().await.unwrap();
        assert_eq!(call.state(), CallState::Idle);
        assert_eq!(transport.sent(), vec![CallSignal::Reject]);

        assert!(matches!(
            call.reject_voice_call().await,
            Err(CallError::InvalidState { .. })
        ));
        assert_eq!(transport.sent(), vec![CallSignal::Reject]);
    }

    #[tokio::test]
    async fn incoming_call_accept_starts_playback_when_stream_known() {
        let transport = Arc::new(FakeTransport::default());
        let mut call = controller(transport.clone());

        call.handle_remote_stream(RemoteStream::detached("t", "s")).await;
        assert!(!call.is_playing());

        call.handle_signal(CallSignal::Request).await;
        call.accept_voice_call().await.unwrap();
        assert_eq!(call.state(), CallState::Active);
        assert!(call.is_playing());
        assert_eq!(transport.sent(), vec![CallSignal::Accept]);

        call.handle_signal(CallSignal::End).await;
        assert_eq!(call.state(), CallState::Idle);
        assert!(!call.is_playing());
        // The stream stays known for the next call.
        assert!(call.remote_stream().is_some());
    }

    #[tokio::test]
    async fn stream_arriving_after_pickup_starts_playback() {
        let transport = Arc::new(FakeTransport::default());
        let mut call = controller(transport.clone());

        call.handle_signal(CallSignal::Request).await;
        call.accept_voice_call().await.unwrap();
        assert_eq!(call.state(), CallState::Active);
        assert!(!call.is_playing());

        call.handle_remote_stream(RemoteStream::detached("t", "s")).await;
        assert!(call.is_playing());
        assert_eq!(transport.sent(), vec![CallSignal::Accept]);
    }

    #[tokio::test]
    async fn stream_arriving_after_remote_accept_starts_playback() {
        let transport = Arc::new(FakeTransport::default());
        let mut call = controller(transport.clone());

        call.start_voice_call().await.unwrap();
        call.handle_signal(CallSignal::Accept).await;
        assert_eq!(call.state(), CallState::Active);
        assert!(!call.is_playing());

        call.handle_remote_stream(RemoteStream::detached("t", "s")).await;
        assert!(call.is_playing());
    }

    #[tokio::test]
    async fn stream_while_ringing_waits_for_pickup() {
        let transport = Arc::new(FakeTransport::default());
        let mut call = controller(transport);

        call.handle_signal(CallSignal::Request).await;
        call.handle_remote_stream(RemoteStream::detached("t", "s")).await;
        assert!(!call.is_playing());
    }

    #[tokio::test]
    async fn request_while_busy_is_ignored() {
        let transport = Arc::new(FakeTransport::default());
        let mut call = controller(transport);
        call.start_voice_call().await.unwrap();
        call.handle_signal(CallSignal::Request).await;
        assert_eq!(call.state(), CallState::Calling);
    }

    #[tokio::test]
    async fn peer_reject_returns_to_idle() {
        let transport = Arc::new(FakeTransport::default());
        let mut call = controller(transport.clone());
        call.start_voice_call().await.unwrap();
        call.handle_signal(CallSignal::Reject).await;
        assert_eq!(call.state(), CallState::Idle);
        assert!(!transport.attached.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn capture_failure_leaves_state_untouched() {
        let transport = Arc::new(FakeTransport::default());
        let mut call = CallController::new(
            transport.clone(),
            Arc::new(DeniedCapture),
            Arc::new(NullSink),
        );

        assert!(matches!(
            call.start_voice_call().await,
            Err(CallError::Audio(AudioError::NoInputDevice))
        ));
        assert_eq!(call.state(), CallState::Idle);
        assert!(transport.sent().is_empty());

        call.handle_signal(CallSignal::Request).await;
        assert!(call.accept_voice_call().await.is_err());
        assert_eq!(call.state(), CallState::Ringing);
    }

    #[tokio::test]
    async fn unsent_request_stays_idle() {
        let transport = Arc::new(FakeTransport::offline());
        let mut call = controller(transport.clone());
        assert!(matches!(
            call.start_voice_call().await,
            Err(CallError::SignalNotSent(CallSignal::Request))
        ));
        assert_eq!(call.state(), CallState::Idle);
        assert!(!transport.attached.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn mute_toggles_only_with_a_local_track() {
        let transport = Arc::new(FakeTransport::default());
        let mut call = controller(transport);
        assert!(!call.toggle_mute());

        call.start_voice_call().await.unwrap();
        assert!(call.toggle_mute());
        assert!(call.is_muted());
        assert!(!call.toggle_mute());
        assert!(!call.is_muted());
    }

    #[tokio::test]
    async fn connection_loss_ends_the_call() {
        let transport = Arc::new(FakeTransport::default());
        let mut call = controller(transport.clone());
        call.start_voice_call().await.unwrap();
        call.handle_signal(CallSignal::Accept).await;

        call.handle_connection_state(ConnectionState::Connecting).await;
        assert_eq!(call.state(), CallState::Active);

        call.handle_connection_state(ConnectionState::Failed).await;
        assert_eq!(call.state(), CallState::Idle);
        // No signal goes out on a dead connection.
        assert_eq!(transport.sent(), vec![CallSignal::Request]);
    }

    #[tokio::test]
    async fn end_when_idle_is_a_no_op() {
        let transport = Arc::new(FakeTransport::default());
        let mut call = controller(transport.clone());
        call.end_voice_call().await;
        assert!(transport.sent().is_empty());
        assert_eq!(call.state(), CallState::Idle);
    }
}
