//! Local media stream handles.
//!
//! Capture devices are opened by the embedding application; the core only
//! sees track handles through [`MediaTrack`]. A [`LocalStream`] owns its
//! tracks and stops them when released or dropped, so every exit path of a
//! session gives the devices back.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Media errors.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Media device unavailable: {0}")]
    DeviceUnavailable(String),
}

/// Kind of a capture track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

/// A live capture track owned by the platform.
pub trait MediaTrack {
    fn kind(&self) -> TrackKind;

    /// Mute/unmute without releasing the device.
    fn set_enabled(&mut self, enabled: bool);

    fn is_enabled(&self) -> bool;

    /// Release the device. Called at most once per track.
    fn stop(&mut self);
}

/// What a call leg advertises about a stream to the remote peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub id: String,
    pub audio: bool,
    pub video: bool,
}

/// An acquired audio/video capture stream.
pub struct LocalStream {
    id: String,
    tracks: Vec<Box<dyn MediaTrack>>,
    released: bool,
}

impl LocalStream {
    pub fn new(tracks: Vec<Box<dyn MediaTrack>>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tracks,
            released: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    fn has(&self, kind: TrackKind) -> bool {
        !self.released && self.tracks.iter().any(|t| t.kind() == kind)
    }

    pub fn has_audio(&self) -> bool {
        self.has(TrackKind::Audio)
    }

    pub fn has_video(&self) -> bool {
        self.has(TrackKind::Video)
    }

    fn set_enabled(&mut self, kind: TrackKind, enabled: bool) {
        for track in self.tracks.iter_mut().filter(|t| t.kind() == kind) {
            track.set_enabled(enabled);
        }
    }

    /// Mute or unmute the microphone.
    pub fn set_audio_enabled(&mut self, enabled: bool) {
        self.set_enabled(TrackKind::Audio, enabled);
    }

    /// Turn the camera on or off.
    pub fn set_video_enabled(&mut self, enabled: bool) {
        self.set_enabled(TrackKind::Video, enabled);
    }

    pub fn is_audio_enabled(&self) -> bool {
        self.tracks
            .iter()
            .any(|t| t.kind() == TrackKind::Audio && t.is_enabled())
    }

    pub fn is_video_enabled(&self) -> bool {
        self.tracks
            .iter()
            .any(|t| t.kind() == TrackKind::Video && t.is_enabled())
    }

    pub fn descriptor(&self) -> StreamDescriptor {
        StreamDescriptor {
            id: self.id.clone(),
            audio: self.has_audio(),
            video: self.has_video(),
        }
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Stop every track. Idempotent.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        for track in &mut self.tracks {
            track.stop();
        }
        self.released = true;
        log::debug!("Released local stream {}", self.id);
    }
}

impl Drop for LocalStream {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for LocalStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStream")
            .field("id", &self.id)
            .field("tracks", &self.tracks.len())
            .field("released", &self.released)
            .finish()
    }
}

/// Platform access to capture devices.
pub trait MediaDevices {
    /// Open tracks for the requested kinds.
    fn open(&mut self, audio: bool, video: bool) -> Result<Vec<Box<dyn MediaTrack>>, MediaError>;
}

/// Result of [`acquire_local_stream`].
#[derive(Debug)]
pub struct Acquisition {
    pub stream: LocalStream,
    /// False when only the camera could be opened.
    pub audio_available: bool,
}

/// Open audio+video, falling back to video only.
pub fn acquire_local_stream(devices: &mut dyn MediaDevices) -> Result<Acquisition, MediaError> {
    match devices.open(true, true) {
        Ok(tracks) => {
            return Ok(Acquisition {
                stream: LocalStream::new(tracks),
                audio_available: true,
            });
        }
        Err(e) => log::warn!("Audio+video capture failed: {}", e),
    }

    let tracks = devices.open(false, true).map_err(|e| {
        log::error!("Video capture failed: {}", e);
        e
    })?;
    let mut stream = LocalStream::new(tracks);
    stream.set_audio_enabled(false);
    Ok(Acquisition {
        stream,
        audio_available: false,
    })
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    struct Devices {
        microphone: bool,
        camera: bool,
        attempts: Vec<(bool, bool)>,
    }

    impl MediaDevices for Devices {
        fn open(&mut self, audio: bool, video: bool) -> Result<Vec<Box<dyn MediaTrack>>, MediaError> {
            self.attempts.push((audio, video));
            if (audio && !self.microphone) || (video && !self.camera) {
                return Err(MediaError::DeviceUnavailable("busy".to_string()));
            }
            let mut tracks: Vec<Box<dyn MediaTrack>> = Vec::new();
            for (wanted, kind) in [(audio, TrackKind::Audio), (video, TrackKind::Video)] {
                if wanted {
                    tracks.push(Box::new(FakeTrack {
                        kind,
                        enabled: Rc::new(Cell::new(true)),
                        stopped: Rc::new(Cell::new(0)),
                    }));
                }
            }
            Ok(tracks)
        }
    }

    #[test]
    fn test_toggle_tracks() {
        let (mut stream, _) = fake_stream();
        stream.set_audio_enabled(false);
        assert!(!stream.is_audio_enabled());
        assert!(stream.is_video_enabled());
        stream.set_video_enabled(false);
        assert!(!stream.is_video_enabled());
    }

    #[test]
    fn test_release_is_idempotent_and_runs_on_drop() {
        let (mut stream, stopped) = fake_stream();
        stream.release();
        stream.release();
        assert_eq!(stopped.get(), 2);
        drop(stream);
        assert_eq!(stopped.get(), 2);

        let (stream, stopped) = fake_stream();
        drop(stream);
        assert_eq!(stopped.get(), 2);
    }

    #[test]
    fn test_acquire_prefers_audio_and_video() {
        let mut devices = Devices { microphone: true, camera: true, attempts: vec![] };
        let acquired = acquire_local_stream(&mut devices).unwrap();
        assert!(acquired.audio_available);
        assert!(acquired.stream.has_audio() && acquired.stream.has_video());
        assert_eq!(devices.attempts, vec![(true, true)]);
    }

    #[test]
    fn test_acquire_falls_back_to_video_only() {
        let mut devices = Devices { microphone: false, camera: true, attempts: vec![] };
        let acquired = acquire_local_stream(&mut devices).unwrap();
        assert!(!acquired.audio_available);
        assert!(!acquired.stream.has_audio());
        assert!(acquired.stream.has_video());
        assert_eq!(devices.attempts, vec![(true, true), (false, true)]);
    }

    #[test]
    fn test_acquire_fails_without_camera() {
        let mut devices = Devices { microphone: true, camera: false, attempts: vec![] };
        assert!(acquire_local_stream(&mut devices).is_err());
        assert_eq!(devices.attempts.len(), 2);
    }

    #[test]
    fn test_descriptor_reflects_tracks() {
        let (stream, _) = fake_stream();
        let descriptor = stream.descriptor();
        assert_eq!(descriptor.id, stream.id());
        assert!(descriptor.audio && descriptor.video);
    }
}
