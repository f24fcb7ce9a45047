//! Raster handles, data URI encoding, and background rehydration.
//!
//! Image elements travel as `data:` URIs. A receiver turns the URI back into
//! decoded pixels ("rehydration") on a worker thread; results are handed back
//! to the event loop through a channel and applied there, so the document is
//! never touched off-thread.

use crate::element::{ElementId, ImageFormat};
use base64::{Engine, engine::general_purpose::STANDARD};
use image::RgbaImage;
use std::fmt;
use std::io::Cursor;
use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvTimeoutError, SendError, Sender, channel};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Raster errors.
#[derive(Debug, Error)]
pub enum RasterError {
    #[error("Not a base64 image data URI")]
    NotDataUri,
    #[error("Unsupported image type: {0}")]
    UnsupportedFormat(String),
    #[error("Invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("Image codec error: {0}")]
    Codec(#[from] image::ImageError),
    #[error("Pixel buffer does not match {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },
}

/// Decoded RGBA pixels.
///
/// Cloning shares the pixel buffer. Equality compares content, not identity.
#[derive(Clone)]
pub struct Raster {
    image: Arc<RgbaImage>,
}

impl Raster {
    /// Wrap raw RGBA8 pixels.
    pub fn from_rgba(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self, RasterError> {
        RgbaImage::from_raw(width, height, pixels)
            .map(Self::from)
            .ok_or(RasterError::InvalidDimensions { width, height })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Raw RGBA8 bytes, row-major.
    pub fn pixels(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    /// Encode as a self-contained PNG data URI.
    pub fn to_data_uri(&self) -> Result<String, RasterError> {
        let mut bytes = Vec::new();
        self.image
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)?;
        Ok(encode_data_uri(ImageFormat::Png, &bytes))
    }
}

impl From<RgbaImage> for Raster {
    fn from(image: RgbaImage) -> Self {
        Self {
            image: Arc::new(image),
        }
    }
}

impl PartialEq for Raster {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.image, &other.image)
            || (self.image.dimensions() == other.image.dimensions()
                && self.image.as_raw() == other.image.as_raw())
    }
}

impl fmt::Debug for Raster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Raster")
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}

/// Decode progress of an image element's pixels.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum RasterState {
    /// Only the encoded `src` is known.
    #[default]
    Pending,
    /// Decoded and renderable.
    Ready(Raster),
    /// `src` could not be decoded.
    Failed,
}

/// Build a `data:<mime>;base64,<payload>` URI.
pub fn encode_data_uri(format: ImageFormat, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", format.mime_type(), STANDARD.encode(bytes))
}

/// Split a data URI into its declared format and base64 payload.
fn split_data_uri(uri: &str) -> Result<(ImageFormat, &str), RasterError> {
    let rest = uri.strip_prefix("data:").ok_or(RasterError::NotDataUri)?;
    let (header, payload) = rest.split_once(',').ok_or(RasterError::NotDataUri)?;
    let mime = header
        .strip_suffix(";base64")
        .ok_or(RasterError::NotDataUri)?;
    let format = ImageFormat::from_mime_type(mime)
        .ok_or_else(|| RasterError::UnsupportedFormat(mime.to_string()))?;
    Ok((format, payload))
}

/// Validate the header of a data URI and return its declared format.
pub fn data_uri_format(uri: &str) -> Result<ImageFormat, RasterError> {
    split_data_uri(uri).map(|(format, _)| format)
}

/// Decode a data URI into raw encoded bytes.
pub fn data_uri_bytes(uri: &str) -> Result<(ImageFormat, Vec<u8>), RasterError> {
    let (format, payload) = split_data_uri(uri)?;
    Ok((format, STANDARD.decode(payload)?))
}

/// Fully decode a data URI into pixels.
pub fn decode_data_uri(uri: &str) -> Result<Raster, RasterError> {
    let (format, bytes) = data_uri_bytes(uri)?;
    let decoded = image::load_from_memory_with_format(&bytes, format.codec())?;
    Ok(Raster::from(decoded.to_rgba8()))
}

/// A finished rehydration job.
#[derive(Debug)]
pub struct Rehydrated {
    pub id: ElementId,
    /// The `src` that was decoded; lets the caller ignore stale results.
    pub src: String,
    pub result: Result<Raster, RasterError>,
}

struct Job {
    id: ElementId,
    src: String,
}

/// Decodes image data URIs on a worker thread.
///
/// Results are collected with `poll()` (non-blocking) or `wait()`.
pub struct Rehydrator {
    job_tx: Option<Sender<Job>>,
    done_tx: Sender<Rehydrated>,
    done_rx: Receiver<Rehydrated>,
    in_flight: usize,
    _worker: Option<JoinHandle<()>>,
}

impl Rehydrator {
    pub fn new() -> Self {
        let (done_tx, done_rx) = channel();
        Self {
            job_tx: None,
            done_tx,
            done_rx,
            in_flight: 0,
            _worker: None,
        }
    }

    /// Number of submitted jobs whose results have not been collected.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Queue `src` for decoding on behalf of element `id`.
    pub fn submit(&mut self, id: ElementId, src: String) {
        self.in_flight += 1;
        let job = Job { id, src };
        let sent = match self.worker() {
            Some(tx) => tx.send(job),
            None => Err(SendError(job)),
        };
        let SendError(job) = match sent {
            Ok(()) => return,
            Err(err) => err,
        };
        // Worker unavailable: decode on the caller's thread.
        self.job_tx = None;
        let result = decode_data_uri(&job.src);
        let _ = self.done_tx.send(Rehydrated {
            id: job.id,
            src: job.src,
            result,
        });
    }

    /// Collect finished jobs without blocking.
    pub fn poll(&mut self) -> Vec<Rehydrated> {
        let done: Vec<Rehydrated> = self.done_rx.try_iter().collect();
        self.in_flight = self.in_flight.saturating_sub(done.len());
        done
    }

    /// Block until every submitted job finished or `timeout` elapsed.
    pub fn wait(&mut self, timeout: Duration) -> Vec<Rehydrated> {
        let deadline = Instant::now() + timeout;
        let mut done = Vec::new();
        while self.in_flight > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.done_rx.recv_timeout(remaining) {
                Ok(item) => {
                    self.in_flight -= 1;
                    done.push(item);
                }
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => {
                    self.in_flight = 0;
                    break;
                }
            }
        }
        done
    }

    /// Lazily start the worker thread.
    fn worker(&mut self) -> Option<&Sender<Job>> {
        if self.job_tx.is_none() {
            let (job_tx, job_rx) = channel::<Job>();
            let done_tx = self.done_tx.clone();
            let spawned = thread::Builder::new()
                .name("peerboard-rehydrate".to_string())
                .spawn(move || {
                    for job in job_rx {
                        let result = decode_data_uri(&job.src);
                        if let Err(ref e) = result {
                            log::warn!("Failed to rehydrate image {}: {}", job.id, e);
                        }
                        if done_tx
                            .send(Rehydrated {
                                id: job.id,
                                src: job.src,
                                result,
                            })
                            .is_err()
                        {
                            break;
                        }
                    }
                });
            match spawned {
                Ok(handle) => {
                    self.job_tx = Some(job_tx);
                    self._worker = Some(handle);
                }
                Err(e) => {
                    log::error!("Could not start rehydration worker: {}", e);
                    return None;
                }
            }
        }
        self.job_tx.as_ref()
    }
}

impl Default for Rehydrator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn checker() -> Raster {
        let mut pixels = Vec::new();
        for i in 0..4u8 {
            pixels.extend_from_slice(&[i * 60, 255 - i * 60, 0, 255]);
        }
        Raster::from_rgba(2, 2, pixels).unwrap()
    }

    #[test]
    fn test_data_uri_roundtrip_preserves_pixels() {
        let raster = checker();
        let uri = raster.to_data_uri().unwrap();
        assert!(uri.starts_with("data:image/png;base64,"));
        let decoded = decode_data_uri(&uri).unwrap();
        assert_eq!(decoded, raster);
    }

    #[test]
    fn test_data_uri_header_validation() {
        assert!(matches!(data_uri_format("data:image/png,abc"), Err(RasterError::NotDataUri)));
        assert!(matches!(
            data_uri_format("data:image/gif;base64,R0lG"),
            Err(RasterError::UnsupportedFormat(_))
        ));
        assert_eq!(data_uri_format("data:image/webp;base64,").unwrap(), ImageFormat::WebP);
    }

    #[test]
    fn test_decode_garbage_fails() {
        let uri = encode_data_uri(ImageFormat::Png, b"not a png");
        assert!(matches!(decode_data_uri(&uri), Err(RasterError::Codec(_))));
    }

    #[test]
    fn test_from_rgba_checks_length() {
        let result = Raster::from_rgba(2, 2, vec![0; 3]);
        assert!(matches!(result, Err(RasterError::InvalidDimensions { width: 2, height: 2 })));
    }

    #[test]
    fn test_rehydrator_decodes_in_background() {
        let mut rehydrator = Rehydrator::new();
        let id = Uuid::new_v4();
        let uri = checker().to_data_uri().unwrap();
        rehydrator.submit(id, uri.clone());
        rehydrator.submit(Uuid::new_v4(), "data:image/png;base64,!!".to_string());
        assert_eq!(rehydrator.in_flight(), 2);

        let done = rehydrator.wait(Duration::from_secs(5));
        assert_eq!(done.len(), 2);
        assert_eq!(rehydrator.in_flight(), 0);

        let ok = done.iter().find(|r| r.id == id).unwrap();
        assert_eq!(ok.src, uri);
        assert_eq!(ok.result.as_ref().unwrap(), &checker());
        assert!(done.iter().any(|r| r.result.is_err()));
    }
}
