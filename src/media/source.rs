//! Media acquisition contract and the live handle it yields

use uuid::Uuid;

pub type MediaId = Uuid;

/// Failure to obtain camera/microphone access.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CapabilityError {
    #[error("Camera/microphone access was denied. Check the permission settings and try again.")]
    PermissionDenied,
    #[error("No {0} device was found")]
    NoDevice(String),
    #[error("The {0} device is busy in another application")]
    DeviceBusy(String),
    #[error("Could not access camera/microphone: {0}")]
    Other(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Video,
    Audio,
}

impl TrackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackKind::Video => "video",
            TrackKind::Audio => "audio",
        }
    }
}

/// One hardware capture stream inside a handle.
pub trait CaptureTrack: Send {
    fn kind(&self) -> TrackKind;
    /// Data captured since the previous call. Empty when nothing new arrived.
    fn read_chunk(&mut self) -> Vec<u8>;
    /// Stop the underlying stream. Must tolerate repeated calls.
    fn stop(&mut self);
}

/// Acquires camera + microphone.
///
/// Only call in response to an explicit user action: on real hardware this
/// shows a permission prompt and blocks until the candidate answers it.
pub trait MediaSource: Send + Sync + 'static {
    fn acquire(&self) -> Result<MediaHandle, CapabilityError>;
}

/// Live capture handle bound to one video and one audio track.
///
/// Holds hardware resources until `release()` is called or the handle is
/// dropped.
pub struct MediaHandle {
    id: MediaId,
    tracks: Vec<Box<dyn CaptureTrack>>,
    released: bool,
}

impl MediaHandle {
    /// Build a handle from its tracks. Both a video and an audio track are
    /// required; otherwise every given track is stopped and the missing kind
    /// is reported.
    pub fn new(mut tracks: Vec<Box<dyn CaptureTrack>>) -> Result<Self, CapabilityError> {
        for kind in [TrackKind::Video, TrackKind::Audio] {
            if !tracks.iter().any(|t| t.kind() == kind) {
                for track in tracks.iter_mut() {
                    track.stop();
                }
                return Err(CapabilityError::NoDevice(kind.as_str().to_string()));
            }
        }

        Ok(Self {
            id: Uuid::new_v4(),
            tracks,
            released: false,
        })
    }

    pub fn id(&self) -> MediaId {
        self.id
    }

    pub fn is_live(&self) -> bool {
        !self.released
    }

    pub fn track_kinds(&self) -> Vec<TrackKind> {
        self.tracks.iter().map(|t| t.kind()).collect()
    }

    /// Pull the next chunk from every track, muxed in track order.
    pub fn read_chunk(&mut self) -> Vec<u8> {
        if self.released {
            return Vec::new();
        }
        let mut chunk = Vec::new();
        for track in self.tracks.iter_mut() {
            chunk.extend(track.read_chunk());
        }
        chunk
    }

    /// Stop all tracks. Returns `true` only for the call that released them.
    pub fn release(&mut self) -> bool {
        if self.released {
            log::debug!("Media handle {} already released", self.id);
            return false;
        }
        for track in self.tracks.iter_mut() {
            track.stop();
        }
        self.released = true;
        log::info!("Media handle {} released ({} tracks stopped)", self.id, self.tracks.len());
        true
    }
}

impl Drop for MediaHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for MediaHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaHandle")
            .field("id", &self.id)
            .field("tracks", &self.track_kinds())
            .field("released", &self.released)
            .finish()
    }
}
