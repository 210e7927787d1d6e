//! Camera and microphone capture for the interview session
//!
//! `MediaSource` acquires a live `MediaHandle` (one video and one audio
//! track); `Recorder` turns the chunks captured from that handle into a
//! finalized `Recording` per question.

pub mod recorder;
mod simulated;
mod source;

pub use recorder::{Recorder, RecorderError, RecorderState};
pub use simulated::SimulatedMediaSource;
pub use source::{CapabilityError, CaptureTrack, MediaHandle, MediaId, MediaSource, TrackKind};
