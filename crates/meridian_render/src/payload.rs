//! Payload validation and re-encoding.

use image::ImageFormat;
use meridian_error::{MeridianResult, RenderError, RenderErrorKind};
use meridian_storage::MediaType;
use std::io::Cursor;

const JPEG_QUALITY: u8 = 90;

/// Whether the bytes start an ISO-BMFF file (MP4, MOV, M4A, HEIF).
pub fn is_iso_bmff(bytes: &[u8]) -> bool {
    bytes.len() >= 12 && &bytes[4..8] == b"ftyp"
}

/// Whether the bytes start a Matroska / WebM file.
pub fn is_webm(bytes: &[u8]) -> bool {
    bytes.starts_with(&[0x1A, 0x45, 0xDF, 0xA3])
}

fn is_audio(bytes: &[u8]) -> bool {
    bytes.starts_with(b"ID3")
        || bytes.starts_with(b"OggS")
        || bytes.starts_with(b"fLaC")
        || (bytes.len() >= 2 && bytes[0] == 0xFF && bytes[1] & 0xE0 == 0xE0)
        || is_iso_bmff(bytes)
}

fn mime_of(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Png => "image/png",
        ImageFormat::Gif => "image/gif",
        ImageFormat::WebP => "image/webp",
        _ => "image/jpeg",
    }
}

/// A payload that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checked {
    /// Mime type to index the artifact under
    pub mime: String,
    /// Whether the bytes must be re-encoded to JPEG to match the filename
    pub needs_jpeg: bool,
}

/// Check that `bytes` really are media of `kind` for `filename`.
pub fn check_payload(bytes: &[u8], kind: MediaType, filename: &str) -> MeridianResult<Checked> {
    let invalid = || RenderError::new(RenderErrorKind::InvalidPayload(filename.to_string()));
    if bytes.is_empty() {
        return Err(invalid().into());
    }

    match kind {
        MediaType::Image => {
            let format = image::guess_format(bytes).map_err(|_| invalid())?;
            let wants_jpeg = filename.ends_with(".jpg");
            let needs_jpeg = wants_jpeg && format != ImageFormat::Jpeg;
            let mime = if wants_jpeg { "image/jpeg" } else { mime_of(format) };
            Ok(Checked {
                mime: mime.to_string(),
                needs_jpeg,
            })
        }
        MediaType::Video => {
            if is_iso_bmff(bytes) {
                Ok(Checked {
                    mime: "video/mp4".into(),
                    needs_jpeg: false,
                })
            } else if is_webm(bytes) {
                Ok(Checked {
                    mime: "video/webm".into(),
                    needs_jpeg: false,
                })
            } else {
                Err(invalid().into())
            }
        }
        MediaType::Audio => {
            if is_audio(bytes) {
                Ok(Checked {
                    mime: meridian_storage::mime_for_filename(filename),
                    needs_jpeg: false,
                })
            } else {
                Err(invalid().into())
            }
        }
    }
}

/// Decode any supported image and encode it as JPEG, on the blocking pool.
pub async fn reencode_jpeg(bytes: Vec<u8>) -> MeridianResult<Vec<u8>> {
    let out = tokio::task::spawn_blocking(move || -> Result<Vec<u8>, String> {
        let decoded = image::load_from_memory(&bytes).map_err(|e| e.to_string())?;
        let rgb = decoded.to_rgb8();
        let mut out = Cursor::new(Vec::new());
        let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY);
        rgb.write_with_encoder(encoder).map_err(|e| e.to_string())?;
        Ok(out.into_inner())
    })
    .await
    .map_err(|e| RenderError::new(RenderErrorKind::Transcode(e.to_string())))?
    .map_err(|e| RenderError::new(RenderErrorKind::Transcode(e)))?;
    Ok(out)
}
