//! Voice clips and image/video attachments.
//!
//! Attachments travel inside a single data-channel frame as base64 data URLs.
//! Nothing is chunked, so the size caps below are the only guard against
//! exceeding the transport's per-message limit.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::constants::{MAX_AUDIO_SIZE, MAX_IMAGE_SIZE, MAX_VIDEO_SIZE, MAX_VOICE_DURATION_SECS};
use crate::error::AttachmentError;
use crate::types::MediaKind;

/// A recorded voice message.
#[derive(Debug, Clone)]
pub struct AudioClip {
    pub data: Vec<u8>,
    pub mime_type: String,
    /// Length in seconds
    pub duration: f64,
}

impl AudioClip {
    pub fn new(data: Vec<u8>, mime_type: impl Into<String>, duration: f64) -> Self {
        Self {
            data,
            mime_type: mime_type.into(),
            duration,
        }
    }

    pub fn validate(&self) -> Result<(), AttachmentError> {
        if self.data.len() > MAX_AUDIO_SIZE {
            return Err(AttachmentError::TooLarge {
                kind: MediaKind::Audio,
                size: self.data.len(),
                max: MAX_AUDIO_SIZE,
            });
        }
        if !self.duration.is_finite() || self.duration < 0.0 {
            return Err(AttachmentError::InvalidDuration(self.duration));
        }
        if self.duration > MAX_VOICE_DURATION_SECS {
            return Err(AttachmentError::TooLong {
                duration: self.duration,
                max: MAX_VOICE_DURATION_SECS,
            });
        }
        Ok(())
    }

    pub fn to_data_url(&self) -> String {
        encode_data_url(&self.mime_type, &self.data)
    }
}

/// An image or video picked by the user.
#[derive(Debug, Clone)]
pub struct MediaAttachment {
    pub data: Vec<u8>,
    pub mime_type: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl MediaAttachment {
    pub fn new(data: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            data,
            mime_type: mime_type.into(),
            width: None,
            height: None,
        }
    }

    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    pub fn kind(&self) -> Result<MediaKind, AttachmentError> {
        MediaKind::from_mime(&self.mime_type)
            .ok_or_else(|| AttachmentError::UnsupportedMime(self.mime_type.clone()))
    }

    /// Checks the MIME type and the per-kind size cap.
    pub fn validate(&self) -> Result<MediaKind, AttachmentError> {
        let kind = self.kind()?;
        let max = max_size(kind);
        if self.data.len() > max {
            return Err(AttachmentError::TooLarge {
                kind,
                size: self.data.len(),
                max,
            });
        }
        Ok(kind)
    }

    pub fn to_data_url(&self) -> String {
        encode_data_url(&self.mime_type, &self.data)
    }
}

pub fn max_size(kind: MediaKind) -> usize {
    match kind {
        MediaKind::Audio => MAX_AUDIO_SIZE,
        MediaKind::Image => MAX_IMAGE_SIZE,
        MediaKind::Video => MAX_VIDEO_SIZE,
    }
}

/// `data:<mime>;base64,<payload>`
pub fn encode_data_url(mime_type: &str, data: &[u8]) -> String {
    format!("data:{};base64,{}", mime_type, STANDARD.encode(data))
}

/// Split a base64 data URL into its MIME type and decoded bytes.
pub fn decode_data_url(url: &str) -> Result<(String, Vec<u8>), AttachmentError> {
    let rest = url
        .trim()
        .strip_prefix("data:")
        .ok_or(AttachmentError::InvalidDataUrl)?;
    let (header, payload) = rest.split_once(',').ok_or(AttachmentError::InvalidDataUrl)?;
    let mime_type = header
        .strip_suffix(";base64")
        .ok_or(AttachmentError::InvalidDataUrl)?;
    let data = STANDARD
        .decode(payload)
        .map_err(|_| AttachmentError::Base64Decode)?;
    Ok((mime_type.to_string(), data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_url_roundtrip() {
        let url = encode_data_url("audio/webm", &[1, 2, 3, 4]);
        assert_eq!(url, "data:audio/webm;base64,AQIDBA==");
        let (mime, bytes) = decode_data_url(&url).unwrap();
        assert_eq!(mime, "audio/webm");
        assert_eq!(bytes, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_decode_rejects_non_base64_urls() {
        assert!(decode_data_url("https://example.com/a.png").is_err());
        assert!(decode_data_url("data:text/plain,hello").is_err());
        assert!(matches!(
            decode_data_url("data:image/png;base64,@@@"),
            Err(AttachmentError::Base64Decode)
        ));
    }

    #[test]
    fn test_image_size_cap() {
        let ok = MediaAttachment::new(vec![0; 1024], "image/jpeg").with_dimensions(640, 480);
        assert_eq!(ok.validate().unwrap(), MediaKind::Image);

        let big = MediaAttachment::new(vec![0; MAX_IMAGE_SIZE + 1], "image/jpeg");
        assert!(matches!(
            big.validate(),
            Err(AttachmentError::TooLarge {
                kind: MediaKind::Image,
                ..
            })
        ));
    }

    #[test]
    fn test_video_allows_larger_payloads() {
        let clip = MediaAttachment::new(vec![0; MAX_IMAGE_SIZE + 1], "video/mp4");
        assert_eq!(clip.validate().unwrap(), MediaKind::Video);
    }

    #[test]
    fn test_unsupported_mime() {
        let doc = MediaAttachment::new(vec![1], "application/pdf");
        assert!(matches!(
            doc.validate(),
            Err(AttachmentError::UnsupportedMime(_))
        ));
    }

    #[test]
    fn test_voice_clip_limits() {
        assert!(AudioClip::new(vec![0; 10], "audio/webm", 3.0).validate().is_ok());
        assert!(matches!(
            AudioClip::new(vec![0; 10], "audio/webm", 121.0).validate(),
            Err(AttachmentError::TooLong { .. })
        ));
        assert!(matches!(
            AudioClip::new(vec![0; MAX_AUDIO_SIZE + 1], "audio/webm", 1.0).validate(),
            Err(AttachmentError::TooLarge { .. })
        ));
    }

    #[test]
    fn test_voice_clip_duration_must_be_a_real_length() {
        assert!(AudioClip::new(vec![0; 10], "audio/webm", 0.0).validate().is_ok());
        for bad in [-0.5, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                AudioClip::new(vec![0; 10], "audio/webm", bad).validate(),
                Err(AttachmentError::InvalidDuration(_))
            ));
        }
    }
}
