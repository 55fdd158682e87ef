use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use reqwest::Client;
use thiserror::Error;
use tokio::time::timeout;

use crate::models::{AuthConfig, CameraConfig, EndpointKind};

const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];
const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];
/// MJPEG streams are read until one full JPEG frame is seen; this caps how much
/// we'll buffer before giving up even if the timeout hasn't elapsed yet.
const MJPEG_MAX_BUFFER_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum CameraError {
    #[error("camera request timed out")]
    Timeout,
    #[error("camera returned HTTP status {code}")]
    HttpStatus { code: u16 },
    #[error("camera response was not a valid JPEG image")]
    InvalidImage,
    #[error("network error talking to camera: {0}")]
    NetworkError(String),
}

/// A captured still frame, already rotated if the meter's camera config asked
/// for it. Image bytes are treated as opaque downstream except for hashing
/// (spec.md §4.2).
#[derive(Debug, Clone)]
pub struct CapturedImage {
    pub bytes: Vec<u8>,
}

#[derive(Clone)]
pub struct CameraClient {
    http: Client,
}

impl CameraClient {
    pub fn new(http: Client) -> Self {
        Self { http }
    }

    pub async fn fetch(&self, camera: &CameraConfig) -> Result<CapturedImage, CameraError> {
        let timeout_duration = Duration::from_millis(camera.timeout_ms);
        let raw = match camera.endpoint_kind {
            EndpointKind::Still => {
                timeout(timeout_duration, self.fetch_still(camera))
                    .await
                    .map_err(|_| CameraError::Timeout)??
            }
            EndpointKind::Mjpeg => {
                timeout(timeout_duration, self.fetch_mjpeg_frame(camera))
                    .await
                    .map_err(|_| CameraError::Timeout)??
            }
        };

        if !is_jpeg(&raw) {
            return Err(CameraError::InvalidImage);
        }

        let rotated = rotate_if_needed(raw, camera.rotation_deg)?;
        Ok(CapturedImage { bytes: rotated })
    }

    async fn fetch_still(&self, camera: &CameraConfig) -> Result<Vec<u8>, CameraError> {
        let mut request = self.http.get(&camera.endpoint_url);
        request = apply_auth(request, &camera.auth);

        let response = request
            .send()
            .await
            .map_err(|err| map_reqwest_error(&err))?;

        if !response.status().is_success() {
            return Err(CameraError::HttpStatus {
                code: response.status().as_u16(),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|err| map_reqwest_error(&err))?;
        Ok(bytes.to_vec())
    }

    async fn fetch_mjpeg_frame(&self, camera: &CameraConfig) -> Result<Vec<u8>, CameraError> {
        let mut request = self.http.get(&camera.endpoint_url);
        request = apply_auth(request, &camera.auth);

        let response = request
            .send()
            .await
            .map_err(|err| map_reqwest_error(&err))?;

        if !response.status().is_success() {
            return Err(CameraError::HttpStatus {
                code: response.status().as_u16(),
            });
        }

        let mut buffer: Vec<u8> = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk: Bytes = chunk.map_err(|err| map_reqwest_error(&err))?;
            buffer.extend_from_slice(&chunk);
            if buffer.len() > MJPEG_MAX_BUFFER_BYTES {
                return Err(CameraError::InvalidImage);
            }
            if let Some(frame) = extract_first_jpeg_frame(&buffer) {
                return Ok(frame);
            }
        }

        Err(CameraError::InvalidImage)
    }
}

fn apply_auth(request: reqwest::RequestBuilder, auth: &AuthConfig) -> reqwest::RequestBuilder {
    match auth {
        AuthConfig::None => request,
        AuthConfig::Basic { user, pass } => request.basic_auth(user, Some(pass)),
    }
}

fn map_reqwest_error(err: &reqwest::Error) -> CameraError {
    if err.is_timeout() {
        CameraError::Timeout
    } else {
        CameraError::NetworkError(err.to_string())
    }
}

fn is_jpeg(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0..2] == JPEG_SOI
}

/// Scans a growing MJPEG byte buffer for the first complete `FFD8 ... FFD9`
/// frame (spec.md §4.2).
fn extract_first_jpeg_frame(buffer: &[u8]) -> Option<Vec<u8>> {
    let start = find_subsequence(buffer, &JPEG_SOI)?;
    let end = find_subsequence(&buffer[start + 2..], &JPEG_EOI)? + start + 2;
    Some(buffer[start..=end + 1].to_vec())
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn rotate_if_needed(bytes: Vec<u8>, rotation_deg: u16) -> Result<Vec<u8>, CameraError> {
    if rotation_deg == 0 {
        return Ok(bytes);
    }

    let image = image::load_from_memory_with_format(&bytes, image::ImageFormat::Jpeg)
        .map_err(|_| CameraError::InvalidImage)?;
    let rotated = match rotation_deg {
        90 => image.rotate90(),
        180 => image.rotate180(),
        270 => image.rotate270(),
        _ => return Err(CameraError::InvalidImage),
    };

    let mut out = Vec::new();
    rotated
        .write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Jpeg)
        .map_err(|_| CameraError::InvalidImage)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_jpeg_magic_bytes() {
        assert!(is_jpeg(&[0xFF, 0xD8, 0xFF, 0xE0]));
        assert!(!is_jpeg(&[0x89, 0x50, 0x4E, 0x47]));
        assert!(!is_jpeg(&[0xFF]));
    }

    #[test]
    fn extracts_first_complete_frame_from_mjpeg_stream() {
        let mut buffer = vec![0x00, 0x01];
        buffer.extend_from_slice(&JPEG_SOI);
        buffer.extend_from_slice(b"frame-one-bytes");
        buffer.extend_from_slice(&JPEG_EOI);
        buffer.extend_from_slice(&JPEG_SOI);
        buffer.extend_from_slice(b"frame-two");
        buffer.extend_from_slice(&JPEG_EOI);

        let frame = extract_first_jpeg_frame(&buffer).expect("frame");
        assert_eq!(&frame[0..2], &JPEG_SOI);
        assert_eq!(&frame[frame.len() - 2..], &JPEG_EOI);
        assert!(!frame.windows(9).any(|w| w == b"frame-two"));
    }

    #[test]
    fn returns_none_when_no_complete_frame_yet() {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(&JPEG_SOI);
        buffer.extend_from_slice(b"partial");
        assert!(extract_first_jpeg_frame(&buffer).is_none());
    }
}
