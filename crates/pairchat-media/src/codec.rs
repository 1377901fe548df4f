//! Opus framing and resampling for call audio.
//!
//! Calls carry 48 kHz mono Opus in 20 ms packets. Device audio is resampled
//! to and from the codec rate with `rubato`.

use audiopus::coder::{Decoder as OpusDecoder, Encoder as OpusEncoder};
use audiopus::packet::Packet;
use audiopus::{Application, Channels, MutSignals, SampleRate};
use bytes::Bytes;
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use crate::error::AudioError;

pub const OPUS_CLOCK_RATE: u32 = 48_000;

/// Samples in one 20 ms Opus frame at 48 kHz.
pub const OPUS_FRAME_SAMPLES: usize = 960;

/// Upper bound for one encoded packet.
const MAX_PACKET: usize = 4_000;

const RESAMPLER_PARAMETERS: SincInterpolationParameters = SincInterpolationParameters {
    sinc_len: 256,
    f_cutoff: 0.95,
    interpolation: SincInterpolationType::Linear,
    oversampling_factor: 256,
    window: WindowFunction::BlackmanHarris2,
};

/// Average interleaved channels down to mono.
pub fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    let channels = channels.max(1);
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

fn codec_error(e: impl std::fmt::Display) -> AudioError {
    AudioError::CodecError(e.to_string())
}

/// Mono resampler that accepts blocks of any size.
///
/// Input is buffered until `rubato` has a full chunk; equal rates pass
/// straight through.
pub struct StreamResampler {
    inner: Option<SincFixedIn<f32>>,
    pending: Vec<f32>,
}

impl StreamResampler {
    pub fn new(from_rate: u32, to_rate: u32, chunk: usize) -> Result<Self, AudioError> {
        let inner = if from_rate == to_rate {
            None
        } else {
            Some(
                SincFixedIn::<f32>::new(
                    to_rate as f64 / from_rate.max(1) as f64,
                    2.0,
                    RESAMPLER_PARAMETERS,
                    chunk.max(1),
                    1,
                )
                .map_err(codec_error)?,
            )
        };
        Ok(Self {
            inner,
            pending: Vec::new(),
        })
    }

    /// Resample `input` and append every completed chunk to `out`.
    pub fn process(&mut self, input: &[f32], out: &mut Vec<f32>) -> Result<(), AudioError> {
        let Some(resampler) = self.inner.as_mut() else {
            out.extend_from_slice(input);
            return Ok(());
        };

        self.pending.extend_from_slice(input);
        loop {
            let needed = resampler.input_frames_next();
            if self.pending.len() < needed {
                return Ok(());
            }
            let chunk: Vec<f32> = self.pending.drain(..needed).collect();
            let processed = resampler.process(&[chunk], None).map_err(codec_error)?;
            if let Some(channel) = processed.first() {
                out.extend_from_slice(channel);
            }
        }
    }
}

/// Turns captured mono audio at the device rate into 20 ms Opus packets.
pub struct VoiceEncoder {
    encoder: OpusEncoder,
    resampler: StreamResampler,
    pending: Vec<f32>,
    packet: Vec<u8>,
}

impl VoiceEncoder {
    pub fn new(input_rate: u32) -> Result<Self, AudioError> {
        let encoder = OpusEncoder::new(SampleRate::Hz48000, Channels::Mono, Application::Voip)
            .map_err(codec_error)?;
        Ok(Self {
            encoder,
            resampler: StreamResampler::new(input_rate, OPUS_CLOCK_RATE, OPUS_FRAME_SAMPLES)?,
            pending: Vec::with_capacity(OPUS_FRAME_SAMPLES * 2),
            packet: vec![0; MAX_PACKET],
        })
    }

    /// Feed captured samples; returns every complete packet now available.
    pub fn push(&mut self, samples: &[f32]) -> Result<Vec<Bytes>, AudioError> {
        self.resampler.process(samples, &mut self.pending)?;

        let mut packets = Vec::new();
        while self.pending.len() >= OPUS_FRAME_SAMPLES {
            let frame: Vec<f32> = self.pending.drain(..OPUS_FRAME_SAMPLES).collect();
            let len = self
                .encoder
                .encode_float(&frame, &mut self.packet)
                .map_err(codec_error)?;
            packets.push(Bytes::copy_from_slice(&self.packet[..len]));
        }
        Ok(packets)
    }
}

/// Decodes remote Opus packets to mono samples at the output device rate.
pub struct VoiceDecoder {
    decoder: OpusDecoder,
    resampler: StreamResampler,
    frame: Vec<f32>,
}

impl VoiceDecoder {
    pub fn new(output_rate: u32) -> Result<Self, AudioError> {
        let decoder =
            OpusDecoder::new(SampleRate::Hz48000, Channels::Mono).map_err(codec_error)?;
        Ok(Self {
            decoder,
            resampler: StreamResampler::new(OPUS_CLOCK_RATE, output_rate, OPUS_FRAME_SAMPLES)?,
            // Room for the longest Opus frame (120 ms).
            frame: vec![0.0; OPUS_FRAME_SAMPLES * 6],
        })
    }

    /// Decode one RTP payload. An empty payload runs loss concealment.
    pub fn decode(&mut self, payload: &[u8]) -> Result<Vec<f32>, AudioError> {
        let decoded = if payload.is_empty() {
            let output = MutSignals::try_from(&mut self.frame[..OPUS_FRAME_SAMPLES])
                .map_err(codec_error)?;
            self.decoder.decode_float(None, output, false)
        } else {
            let packet = Packet::try_from(payload).map_err(codec_error)?;
            let output = MutSignals::try_from(&mut self.frame[..]).map_err(codec_error)?;
            self.decoder.decode_float(Some(packet), output, false)
        }
        .map_err(codec_error)?;

        let mut out = Vec::with_capacity(decoded);
        self.resampler.process(&self.frame[..decoded], &mut out)?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downmix_averages_channels() {
        assert_eq!(downmix(&[1.0, 0.0, 0.5, 0.5], 2), vec![0.5, 0.5]);
        assert_eq!(downmix(&[0.1, 0.2], 1), vec![0.1, 0.2]);
    }

    #[test]
    fn equal_rates_pass_through() {
        let mut resampler = StreamResampler::new(48_000, 48_000, 480).unwrap();
        let mut out = Vec::new();
        resampler.process(&[0.25; 100], &mut out).unwrap();
        assert_eq!(out, vec![0.25; 100]);
    }

    #[test]
    fn resampler_buffers_until_a_full_chunk() {
        let mut resampler = StreamResampler::new(48_000, 8_000, 480).unwrap();
        let mut out = Vec::new();
        resampler.process(&[0.0; 300], &mut out).unwrap();
        assert!(out.is_empty());

        for _ in 0..10 {
            resampler.process(&[0.0; 450], &mut out).unwrap();
        }
        // 4800 input samples make ten full chunks at a 1:6 ratio.
        assert!((790..=810).contains(&out.len()), "got {}", out.len());
    }

    #[test]
    fn encoder_emits_20ms_packets() {
        let mut encoder = VoiceEncoder::new(48_000).unwrap();
        let packets = encoder.push(&[0.0; 1920]).unwrap();
        assert_eq!(packets.len(), 2);
        assert!(packets.iter().all(|p| !p.is_empty() && p.len() <= MAX_PACKET));

        // Partial frames are held back.
        assert!(encoder.push(&[0.0; 100]).unwrap().is_empty());
    }

    #[test]
    fn decoder_restores_one_frame() {
        let mut encoder = VoiceEncoder::new(48_000).unwrap();
        let mut decoder = VoiceDecoder::new(48_000).unwrap();

        let packets = encoder.push(&[0.1; OPUS_FRAME_SAMPLES]).unwrap();
        assert_eq!(packets.len(), 1);
        let samples = decoder.decode(&packets[0]).unwrap();
        assert_eq!(samples.len(), OPUS_FRAME_SAMPLES);

        // Concealment also yields a full frame.
        assert_eq!(decoder.decode(&[]).unwrap().len(), OPUS_FRAME_SAMPLES);
    }
}
