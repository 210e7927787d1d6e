//! Answer recorder
//!
//! The Recorder accumulates chunks captured from a live media handle while a
//! question is being answered and finalizes them into one `Recording`.
//! Recording is controlled via start() and stop() methods.

use std::sync::Arc;
use uuid::Uuid;

use super::source::MediaHandle;
use crate::flow::Recording;

const RECORDING_MIME_TYPE: &str = "video/webm";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecorderError {
    #[error("No active media source to record from")]
    NoMediaSource,
    #[error("Recorder is already capturing question {0}")]
    AlreadyActive(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecorderState {
    Idle,
    Active { question_id: String },
    Stopped,
}

pub struct Recorder {
    state: RecorderState,
    chunks: Vec<Vec<u8>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self {
            state: RecorderState::Idle,
            chunks: Vec::new(),
        }
    }

    pub fn state(&self) -> &RecorderState {
        &self.state
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, RecorderState::Active { .. })
    }

    /// Begin capturing an answer for `question_id` from `handle`.
    pub fn start(
        &mut self,
        handle: Option<&MediaHandle>,
        question_id: &str,
    ) -> Result<(), RecorderError> {
        let handle = handle
            .filter(|h| h.is_live())
            .ok_or(RecorderError::NoMediaSource)?;

        if let RecorderState::Active { question_id } = &self.state {
            return Err(RecorderError::AlreadyActive(question_id.clone()));
        }

        self.chunks.clear();
        self.state = RecorderState::Active {
            question_id: question_id.to_string(),
        };
        log::info!(
            "Recorder started for question {} on media {}",
            question_id,
            handle.id()
        );
        Ok(())
    }

    /// Accept a captured chunk. Ignored unless active; empty chunks are dropped.
    pub fn push_chunk(&mut self, chunk: Vec<u8>) {
        if !self.is_active() || chunk.is_empty() {
            return;
        }
        self.chunks.push(chunk);
    }

    /// Pull the next chunk from `handle` into the active capture.
    pub fn capture(&mut self, handle: &mut MediaHandle) {
        if self.is_active() {
            let chunk = handle.read_chunk();
            self.push_chunk(chunk);
        }
    }

    /// Stop capturing and finalize the answer.
    ///
    /// Returns `None` when not active, so a manual stop racing the
    /// max-answer expiry only finalizes once.
    pub fn stop(&mut self) -> Option<Recording> {
        let question_id = match std::mem::replace(&mut self.state, RecorderState::Stopped) {
            RecorderState::Active { question_id } => question_id,
            previous => {
                self.state = previous;
                log::debug!("Recorder stop ignored (state: {:?})", self.state);
                return None;
            }
        };

        let artifact: Arc<[u8]> = self.chunks.drain(..).flatten().collect::<Vec<u8>>().into();
        let recording = Recording {
            question_id,
            artifact,
            mime_type: RECORDING_MIME_TYPE.to_string(),
            playback_ref: format!("blob:{}", Uuid::new_v4()),
        };
        log::info!(
            "Recorder stopped, question {} finalized ({} bytes, {})",
            recording.question_id,
            recording.size_bytes(),
            recording.playback_ref
        );
        Some(recording)
    }

    /// Drop an in-progress capture without producing a recording.
    pub fn discard(&mut self) {
        if let RecorderState::Active { question_id } = &self.state {
            log::info!("Recorder discarded capture for question {}", question_id);
        }
        self.chunks.clear();
        self.state = RecorderState::Idle;
    }
}

impl Default for Recorder {
    fn default() -> Self {
        Self::new()
    }
}
