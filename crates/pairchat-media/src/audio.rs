use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use webrtc::api::media_engine::MIME_TYPE_OPUS;
use webrtc::media::Sample as MediaSample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

use crate::codec::{downmix, VoiceDecoder, VoiceEncoder, OPUS_CLOCK_RATE};
use crate::error::AudioError;
use crate::events::RemoteStream;

/// Duration of one Opus packet written to the outbound track.
pub const FRAME_DURATION: Duration = Duration::from_millis(20);

/// Frames buffered between the device callback and the encoder task.
const FRAME_QUEUE: usize = 64;

/// Fresh outbound Opus track for one call.
pub fn voice_track() -> Arc<TrackLocalStaticSample> {
    Arc::new(TrackLocalStaticSample::new(
        RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_owned(),
            clock_rate: OPUS_CLOCK_RATE,
            channels: 2,
            sdp_fmtp_line: "minptime=10;useinbandfec=1".to_owned(),
            ..Default::default()
        },
        "voice".to_owned(),
        "pairchat-call".to_owned(),
    ))
}

// ---------------------------------------------------------------------------
// Local capture
// ---------------------------------------------------------------------------

/// The local microphone track of an active call.
///
/// `enabled` is the mute switch: a disabled track keeps sending silence so
/// the remote side stays in sync. Dropping the value stops capture.
pub struct LocalAudio {
    track: Arc<TrackLocalStaticSample>,
    enabled: Arc<AtomicBool>,
    active: Arc<AtomicBool>,
}

impl LocalAudio {
    pub fn new(track: Arc<TrackLocalStaticSample>) -> Self {
        Self {
            track,
            enabled: Arc::new(AtomicBool::new(true)),
            active: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn track(&self) -> Arc<TrackLocalStaticSample> {
        self.track.clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
        debug!(enabled, "Local audio track toggled");
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Stop feeding the track and release the input device.
    pub fn stop(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    fn enabled_flag(&self) -> Arc<AtomicBool> {
        self.enabled.clone()
    }

    fn active_flag(&self) -> Arc<AtomicBool> {
        self.active.clone()
    }
}

impl Drop for LocalAudio {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Source of local call audio.
#[async_trait]
pub trait AudioCapture: Send + Sync {
    /// Acquire the input device and start feeding a new track.
    async fn open(&self) -> Result<LocalAudio, AudioError>;
}

/// Captures the default input device with `cpal`.
///
/// The `cpal` stream lives on its own thread for as long as the returned
/// [`LocalAudio`] is active.
#[derive(Debug, Default, Clone)]
pub struct DeviceCapture;

#[async_trait]
impl AudioCapture for DeviceCapture {
    async fn open(&self) -> Result<LocalAudio, AudioError> {
        let local = LocalAudio::new(voice_track());
        let (frame_tx, frame_rx) = mpsc::channel::<Vec<f32>>(FRAME_QUEUE);
        let (ready_tx, ready_rx) = oneshot::channel();

        let enabled = local.enabled_flag();
        let active = local.active_flag();
        std::thread::Builder::new()
            .name("pairchat-capture".into())
            .spawn(move || run_capture(frame_tx, enabled, active, ready_tx))
            .map_err(|e| AudioError::DeviceError(e.to_string()))?;

        let sample_rate = ready_rx
            .await
            .map_err(|_| AudioError::StreamError("capture thread exited".into()))??;

        tokio::spawn(pump_capture(
            frame_rx,
            sample_rate,
            local.track(),
            local.active_flag(),
        ));

        debug!(sample_rate, "Audio capture started");
        Ok(local)
    }
}

fn run_capture(
    frame_tx: mpsc::Sender<Vec<f32>>,
    enabled: Arc<AtomicBool>,
    active: Arc<AtomicBool>,
    ready: oneshot::Sender<Result<u32, AudioError>>,
) {
    let (stream, sample_rate) = match open_input_stream(frame_tx, enabled, active.clone()) {
        Ok(opened) => opened,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    if ready.send(Ok(sample_rate)).is_err() {
        return;
    }

    while active.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(50));
    }
    drop(stream);
    debug!("Audio capture stopped");
}

fn open_input_stream(
    frame_tx: mpsc::Sender<Vec<f32>>,
    enabled: Arc<AtomicBool>,
    active: Arc<AtomicBool>,
) -> Result<(cpal::Stream, u32), AudioError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or(AudioError::NoInputDevice)?;

    info!(device = ?device.name(), "Using input device");

    let supported = device
        .default_input_config()
        .map_err(|e| AudioError::DeviceError(e.to_string()))?;
    let sample_rate = supported.sample_rate().0;
    let channels = supported.channels() as usize;
    let config: cpal::StreamConfig = supported.config();

    let stream = match supported.sample_format() {
        SampleFormat::F32 => {
            build_input::<f32>(&device, &config, channels, frame_tx, enabled, active)
        }
        SampleFormat::I16 => {
            build_input::<i16>(&device, &config, channels, frame_tx, enabled, active)
        }
        SampleFormat::U16 => {
            build_input::<u16>(&device, &config, channels, frame_tx, enabled, active)
        }
        other => {
            return Err(AudioError::DeviceError(format!(
                "unsupported input sample format {other:?}"
            )))
        }
    }?;

    stream
        .play()
        .map_err(|e| AudioError::StreamError(e.to_string()))?;

    Ok((stream, sample_rate))
}

fn build_input<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    channels: usize,
    frame_tx: mpsc::Sender<Vec<f32>>,
    enabled: Arc<AtomicBool>,
    active: Arc<AtomicBool>,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    device
        .build_input_stream(
            config,
            move |data: &[T], _info: &cpal::InputCallbackInfo| {
                if !active.load(Ordering::Relaxed) {
                    return;
                }
                let frame = if enabled.load(Ordering::Relaxed) {
                    let samples: Vec<f32> = data.iter().map(|s| f32::from_sample(*s)).collect();
                    downmix(&samples, channels)
                } else {
                    // Silence while muted
                    vec![0.0; data.len() / channels.max(1)]
                };
                if frame_tx.try_send(frame).is_err() {
                    warn!("Audio frame channel full, dropping frame");
                }
            },
            move |err| {
                error!("Audio input error: {err}");
            },
            None,
        )
        .map_err(|e| AudioError::StreamError(e.to_string()))
}

async fn pump_capture(
    mut frame_rx: mpsc::Receiver<Vec<f32>>,
    sample_rate: u32,
    track: Arc<TrackLocalStaticSample>,
    active: Arc<AtomicBool>,
) {
    let mut encoder = match VoiceEncoder::new(sample_rate) {
        Ok(encoder) => encoder,
        Err(e) => {
            error!(error = %e, "Cannot encode call audio");
            active.store(false, Ordering::SeqCst);
            return;
        }
    };
    while let Some(frame) = frame_rx.recv().await {
        if !active.load(Ordering::Relaxed) {
            break;
        }
        let packets = match encoder.push(&frame) {
            Ok(packets) => packets,
            Err(e) => {
                warn!(error = %e, "Dropping captured audio");
                continue;
            }
        };
        for data in packets {
            let sample = MediaSample {
                data,
                duration: FRAME_DURATION,
                ..Default::default()
            };
            if let Err(e) = track.write_sample(&sample).await {
                debug!(error = %e, "Dropping voice frame");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Remote playback
// ---------------------------------------------------------------------------

/// Stops playback when dropped.
pub struct PlaybackHandle {
    active: Arc<AtomicBool>,
    stop: Option<oneshot::Sender<()>>,
}

impl PlaybackHandle {
    pub fn channel() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                active: Arc::new(AtomicBool::new(true)),
                stop: Some(tx),
            },
            rx,
        )
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn stop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
        if let Some(tx) = self.stop.take() {
            let _ = tx.send(());
        }
    }

    fn active_flag(&self) -> Arc<AtomicBool> {
        self.active.clone()
    }
}

impl Drop for PlaybackHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Destination for remote call audio.
#[async_trait]
pub trait AudioSink: Send + Sync {
    async fn play(&self, stream: &RemoteStream) -> Result<PlaybackHandle, AudioError>;
}

/// Plays Opus from a remote track on the default output device.
#[derive(Debug, Default, Clone)]
pub struct DevicePlayback;

#[async_trait]
impl AudioSink for DevicePlayback {
    async fn play(&self, stream: &RemoteStream) -> Result<PlaybackHandle, AudioError> {
        let track = stream
            .track()
            .cloned()
            .ok_or_else(|| AudioError::StreamError("remote stream has no track".into()))?;

        let mime = track.codec().capability.mime_type;
        if !mime.eq_ignore_ascii_case(MIME_TYPE_OPUS) {
            return Err(AudioError::CodecError(format!(
                "unsupported remote codec {mime}"
            )));
        }

        let (mut handle, stop_rx) = PlaybackHandle::channel();
        let (sample_tx, sample_rx) = std::sync::mpsc::channel::<Vec<f32>>();
        let (ready_tx, ready_rx) = oneshot::channel();

        let active = handle.active_flag();
        std::thread::Builder::new()
            .name("pairchat-playback".into())
            .spawn(move || run_playback(sample_rx, active, ready_tx))
            .map_err(|e| AudioError::DeviceError(e.to_string()))?;

        let output_rate = match ready_rx.await {
            Ok(Ok(rate)) => rate,
            Ok(Err(e)) => {
                handle.stop();
                return Err(e);
            }
            Err(_) => {
                handle.stop();
                return Err(AudioError::StreamError("playback thread exited".into()));
            }
        };

        let decoder = match VoiceDecoder::new(output_rate) {
            Ok(decoder) => decoder,
            Err(e) => {
                handle.stop();
                return Err(e);
            }
        };

        tokio::spawn(pump_playback(track, decoder, sample_tx, stop_rx));
        debug!(track = %stream.track_id, output_rate, "Remote audio playback started");
        Ok(handle)
    }
}

async fn pump_playback(
    track: Arc<TrackRemote>,
    mut decoder: VoiceDecoder,
    sample_tx: std::sync::mpsc::Sender<Vec<f32>>,
    mut stop_rx: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut stop_rx => break,
            read = track.read_rtp() => {
                let packet = match read {
                    Ok((packet, _)) => packet,
                    Err(e) => {
                        debug!(error = %e, "Remote audio track ended");
                        break;
                    }
                };
                let out = match decoder.decode(&packet.payload) {
                    Ok(out) => out,
                    Err(e) => {
                        debug!(error = %e, "Skipping undecodable voice packet");
                        continue;
                    }
                };
                if sample_tx.send(out).is_err() {
                    break;
                }
            }
        }
    }
}

fn run_playback(
    sample_rx: std::sync::mpsc::Receiver<Vec<f32>>,
    active: Arc<AtomicBool>,
    ready: oneshot::Sender<Result<u32, AudioError>>,
) {
    let (stream, sample_rate) = match open_output_stream(sample_rx) {
        Ok(opened) => opened,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    if ready.send(Ok(sample_rate)).is_err() {
        return;
    }

    while active.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(50));
    }
    drop(stream);
    debug!("Audio playback stopped");
}

fn open_output_stream(
    sample_rx: std::sync::mpsc::Receiver<Vec<f32>>,
) -> Result<(cpal::Stream, u32), AudioError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or(AudioError::NoOutputDevice)?;

    info!(device = ?device.name(), "Using output device");

    let supported = device
        .default_output_config()
        .map_err(|e| AudioError::DeviceError(e.to_string()))?;
    let sample_rate = supported.sample_rate().0;
    let channels = supported.channels() as usize;
    let config: cpal::StreamConfig = supported.config();

    let stream = match supported.sample_format() {
        SampleFormat::F32 => build_output::<f32>(&device, &config, channels, sample_rx),
        SampleFormat::I16 => build_output::<i16>(&device, &config, channels, sample_rx),
        SampleFormat::U16 => build_output::<u16>(&device, &config, channels, sample_rx),
        other => {
            return Err(AudioError::DeviceError(format!(
                "unsupported output sample format {other:?}"
            )))
        }
    }?;

    stream
        .play()
        .map_err(|e| AudioError::StreamError(e.to_string()))?;

    Ok((stream, sample_rate))
}

fn build_output<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    channels: usize,
    sample_rx: std::sync::mpsc::Receiver<Vec<f32>>,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = channels.max(1);
    let mut play_buffer: std::collections::VecDeque<f32> = std::collections::VecDeque::new();

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _info: &cpal::OutputCallbackInfo| {
                while let Ok(block) = sample_rx.try_recv() {
                    play_buffer.extend(block);
                }
                for frame in data.chunks_mut(channels) {
                    let value = T::from_sample(play_buffer.pop_front().unwrap_or(0.0));
                    for out in frame.iter_mut() {
                        *out = value;
                    }
                }
            },
            move |err| {
                error!("Audio output error: {err}");
            },
            None,
        )
        .map_err(|e| AudioError::StreamError(e.to_string()))
}
