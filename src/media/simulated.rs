//! Simulated camera/microphone for the demo binary and tests

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use super::source::{CapabilityError, CaptureTrack, MediaHandle, MediaSource, TrackKind};

/// Media source producing synthetic frames.
///
/// Can be scripted to fail the first N acquisitions, which is how a denied
/// permission prompt followed by a successful retry is exercised.
pub struct SimulatedMediaSource {
    failures_remaining: AtomicU32,
    failure: CapabilityError,
    acquisitions: AtomicUsize,
    stopped_tracks: Arc<AtomicUsize>,
}

impl SimulatedMediaSource {
    pub fn new() -> Self {
        Self::failing(0, CapabilityError::PermissionDenied)
    }

    /// Fail the next `times` acquisitions with `error`, then succeed.
    pub fn failing(times: u32, error: CapabilityError) -> Self {
        Self {
            failures_remaining: AtomicU32::new(times),
            failure: error,
            acquisitions: AtomicUsize::new(0),
            stopped_tracks: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of successful acquisitions so far.
    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }

    /// Number of tracks stopped so far (two per released handle).
    pub fn stopped_tracks(&self) -> usize {
        self.stopped_tracks.load(Ordering::SeqCst)
    }
}

impl Default for SimulatedMediaSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaSource for SimulatedMediaSource {
    fn acquire(&self) -> Result<MediaHandle, CapabilityError> {
        let failed = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            log::info!("Simulated media: acquisition refused ({})", self.failure);
            return Err(self.failure.clone());
        }

        let tracks: Vec<Box<dyn CaptureTrack>> = vec![
            Box::new(SimulatedTrack::new(TrackKind::Video, self.stopped_tracks.clone())),
            Box::new(SimulatedTrack::new(TrackKind::Audio, self.stopped_tracks.clone())),
        ];
        let handle = MediaHandle::new(tracks)?;
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        log::info!("Simulated media: handle {} acquired", handle.id());
        Ok(handle)
    }
}

struct SimulatedTrack {
    kind: TrackKind,
    frame: u64,
    stopped: bool,
    stopped_tracks: Arc<AtomicUsize>,
}

impl SimulatedTrack {
    fn new(kind: TrackKind, stopped_tracks: Arc<AtomicUsize>) -> Self {
        Self {
            kind,
            frame: 0,
            stopped: false,
            stopped_tracks,
        }
    }
}

impl CaptureTrack for SimulatedTrack {
    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn read_chunk(&mut self) -> Vec<u8> {
        if self.stopped {
            return Vec::new();
        }
        self.frame += 1;
        format!("{}:{};", self.kind.as_str(), self.frame).into_bytes()
    }

    fn stop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.stopped_tracks.fetch_add(1, Ordering::SeqCst);
        }
    }
}
