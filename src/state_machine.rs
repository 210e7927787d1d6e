//! State machine for the candidate interview session
//!
//! This module implements the session core using a single-writer pattern.
//! All state transitions go through the `reduce()` function, which returns
//! the next session and a list of effects to execute. Timers, the recorder,
//! media acquisition and uploads report back as `Event`s.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::flow::{InterviewFlow, Question, Recording};
use crate::identity::{self, IdentityPolicy, ValidationError};
use crate::media::{CapabilityError, MediaId, RecorderError};

pub type TimerId = Uuid;
pub type UploadId = Uuid;

/// Problems that keep the candidate in the device check.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    #[error(transparent)]
    Capability(#[from] CapabilityError),
    #[error(transparent)]
    Recorder(#[from] RecorderError),
}

/// Entry and transition policies that differ between product variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionPolicy {
    /// Start with the year-of-birth check.
    pub requires_identity_gate: bool,
    /// Ask for a PDF CV after the identity check.
    pub requires_cv_upload: bool,
    /// Leave the question intro automatically when the prompt video ends.
    pub auto_advance_on_video_end: bool,
    pub identity: IdentityPolicy,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            requires_identity_gate: false,
            requires_cv_upload: false,
            auto_advance_on_video_end: false,
            identity: IdentityPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerPurpose {
    Prep,
    Answer,
}

/// Current step of the session.
/// Each variant carries only the data meaningful in that step.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Identity {
        error: Option<ValidationError>,
    },
    CvUpload {
        error: Option<ValidationError>,
    },
    DeviceCheck {
        acquiring: bool,
        error: Option<DeviceError>,
    },
    Instructions,
    QuestionIntro {
        question_index: usize,
    },
    Prep {
        question_index: usize,
        seconds_remaining: u32,
        timer: TimerId,
    },
    Recording {
        question_index: usize,
        seconds_remaining: u32,
        timer: TimerId,
    },
    /// Recorder stop requested, waiting for the finalized clip.
    Finalizing {
        question_index: usize,
    },
    Upload {
        question_index: usize,
        progress: f32,
        upload: UploadId,
    },
    Finished {
        reference_code: String,
    },
    Abandoned,
}

impl Step {
    fn device_check() -> Self {
        Step::DeviceCheck {
            acquiring: false,
            error: None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Step::Identity { .. } => "identity",
            Step::CvUpload { .. } => "cv-upload",
            Step::DeviceCheck { .. } => "device-check",
            Step::Instructions => "instructions",
            Step::QuestionIntro { .. } => "question-intro",
            Step::Prep { .. } => "prep",
            Step::Recording { .. } => "recording",
            Step::Finalizing { .. } => "finalizing",
            Step::Upload { .. } => "upload",
            Step::Finished { .. } => "finished",
            Step::Abandoned => "abandoned",
        }
    }

    pub fn question_index(&self) -> Option<usize> {
        match self {
            Step::QuestionIntro { question_index }
            | Step::Prep { question_index, .. }
            | Step::Recording { question_index, .. }
            | Step::Finalizing { question_index }
            | Step::Upload { question_index, .. } => Some(*question_index),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Step::Finished { .. } | Step::Abandoned)
    }
}

/// One candidate's live run through a flow.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub flow: Arc<InterviewFlow>,
    pub policy: SessionPolicy,
    pub step: Step,
    /// Finalized answers, in question order.
    pub recordings: Vec<Recording>,
    /// Live media handle, present only while camera/mic are held.
    pub media: Option<MediaId>,
    pub started_at: DateTime<Utc>,
}

impl Session {
    pub fn new(flow: Arc<InterviewFlow>, policy: SessionPolicy, started_at: DateTime<Utc>) -> Self {
        let step = if policy.requires_identity_gate {
            Step::Identity { error: None }
        } else {
            Step::device_check()
        };
        Self {
            id: Uuid::new_v4(),
            flow,
            policy,
            step,
            recordings: Vec::new(),
            media: None,
            started_at,
        }
    }

    pub fn current_question(&self) -> Option<&Question> {
        self.step
            .question_index()
            .and_then(|index| self.flow.question(index))
    }

    /// Short code the candidate can quote to support.
    pub fn reference_code(&self) -> String {
        to_base36(self.started_at.timestamp_millis().max(0) as u64)
    }
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    let mut out = Vec::new();
    loop {
        out.push(DIGITS[(n % 36) as usize] as char);
        n /= 36;
        if n == 0 {
            break;
        }
    }
    out.iter().rev().collect()
}

/// Events that can trigger state transitions.
/// These come from the candidate's actions and from the effect runner.
#[derive(Debug, Clone)]
pub enum Event {
    // Candidate actions
    SubmitBirthYear {
        input: String,
        current_year: i32,
    },
    SubmitCv {
        file_name: String,
        content_type: Option<String>,
    },
    /// Explicit request for camera/microphone access (also used for retry)
    RequestDevices,
    ContinueToInstructions,
    BackToDeviceCheck,
    ConfirmInstructions,
    StartPrep,
    PromptVideoEnded {
        question_index: usize,
    },
    AnswerNow,
    FinishAnswer,
    /// Leave the interview; idempotent teardown
    Abandon,

    // Media events
    MediaAcquired {
        media: MediaId,
    },
    MediaAcquireFailed {
        err: CapabilityError,
    },

    // Timer events (include id to prevent stale ticks)
    TimerTick {
        timer: TimerId,
        remaining: u32,
    },
    TimerExpired {
        timer: TimerId,
    },

    // Recorder events
    RecorderFailed {
        question_index: usize,
        err: RecorderError,
    },
    RecordingFinalized {
        question_index: usize,
        recording: Recording,
    },

    // Upload events
    UploadProgress {
        upload: UploadId,
        progress: f32,
    },
    UploadComplete {
        upload: UploadId,
    },
}

/// Effects to be executed after a state transition.
/// The effect runner handles these and reports back with events.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    AcquireMedia,
    ReleaseMedia {
        media: MediaId,
    },
    StartTimer {
        timer: TimerId,
        purpose: TimerPurpose,
        seconds: u32,
    },
    CancelTimer {
        timer: TimerId,
    },
    StartRecorder {
        question_index: usize,
        question_id: String,
    },
    StopRecorder {
        question_index: usize,
    },
    DiscardRecorder,
    StartUpload {
        upload: UploadId,
        question_id: String,
    },
    CancelUpload {
        upload: UploadId,
    },
    /// Signal to publish a UI snapshot
    EmitUi,
}

/// Reducer function: (session, event) -> (next_session, effects)
///
/// Key rules:
/// - Never mutate the session directly
/// - Ignore timer/upload/recorder events that do not belong to the current step
/// - Cancel a step's timer on every exit from that step
/// - Always emit EmitUi after step changes
pub fn reduce(session: &Session, event: Event) -> (Session, Vec<Effect>) {
    use Effect::*;
    use Event::*;

    let mut next = session.clone();
    let mut effects = Vec::new();

    match (&session.step, event) {
        (_, Abandon) => return teardown(session),

        // -----------------
        // Identity gate
        // -----------------
        (
            Step::Identity { .. },
            SubmitBirthYear {
                input,
                current_year,
            },
        ) => {
            match identity::verify_birth_year(&input, current_year, &session.policy.identity) {
                Ok(age) => {
                    log::info!("Identity check passed (age {})", age);
                    next.step = if session.policy.requires_cv_upload {
                        Step::CvUpload { error: None }
                    } else {
                        Step::device_check()
                    };
                }
                Err(err) => {
                    log::info!("Identity check rejected: {}", err);
                    next.step = Step::Identity { error: Some(err) };
                }
            }
            effects.push(EmitUi);
        }
        (
            Step::CvUpload { .. },
            SubmitCv {
                file_name,
                content_type,
            },
        ) => {
            match identity::verify_cv(&file_name, content_type.as_deref()) {
                Ok(()) => {
                    log::info!("CV accepted: {}", file_name);
                    next.step = Step::device_check();
                }
                Err(err) => next.step = Step::CvUpload { error: Some(err) },
            }
            effects.push(EmitUi);
        }

        // -----------------
        // Device check
        // -----------------
        (Step::DeviceCheck { acquiring: false, .. }, RequestDevices) => {
            if session.media.is_some() {
                log::debug!("Devices already acquired, ignoring request");
                return (next, vec![]);
            }
            next.step = Step::DeviceCheck {
                acquiring: true,
                error: None,
            };
            effects.extend([AcquireMedia, EmitUi]);
        }
        (Step::DeviceCheck { acquiring: true, .. }, MediaAcquired { media })
            if session.media.is_none() =>
        {
            log::info!("Camera and microphone ready (media {})", media);
            next.media = Some(media);
            next.step = Step::device_check();
            effects.push(EmitUi);
        }
        (Step::DeviceCheck { acquiring: true, .. }, MediaAcquireFailed { err }) => {
            log::warn!("Device check failed: {}", err);
            next.step = Step::DeviceCheck {
                acquiring: false,
                error: Some(err.into()),
            };
            effects.push(EmitUi);
        }
        // A handle nobody is waiting for must not keep the camera on
        (_, MediaAcquired { media }) if session.media != Some(media) => {
            log::warn!(
                "Releasing unexpected media {} acquired during step {}",
                media,
                session.step.name()
            );
            return (next, vec![ReleaseMedia { media }]);
        }
        (Step::DeviceCheck { acquiring: false, .. }, ContinueToInstructions)
            if session.media.is_some() =>
        {
            next.step = Step::Instructions;
            effects.push(EmitUi);
        }

        // -----------------
        // Instructions
        // -----------------
        (Step::Instructions, BackToDeviceCheck) => {
            next.step = Step::device_check();
            effects.push(EmitUi);
        }
        (Step::Instructions, ConfirmInstructions) => {
            // Resume at the first unanswered question after a device fallback
            let index = session.recordings.len();
            enter_question_intro(&mut next, &mut effects, index);
        }

        // -----------------
        // Question intro
        // -----------------
        (Step::QuestionIntro { question_index }, StartPrep) => {
            enter_prep(&mut next, &mut effects, *question_index);
        }
        (
            Step::QuestionIntro { question_index },
            PromptVideoEnded {
                question_index: ended,
            },
        ) if *question_index == ended
            && session.policy.auto_advance_on_video_end
            && session
                .flow
                .question(ended)
                .is_some_and(Question::has_prompt_video) =>
        {
            log::debug!("Prompt video for question {} ended", ended);
            enter_prep(&mut next, &mut effects, *question_index);
        }

        // -----------------
        // Prep
        // -----------------
        (
            Step::Prep {
                question_index,
                timer,
                ..
            },
            TimerTick {
                timer: id,
                remaining,
            },
        ) if *timer == id => {
            next.step = Step::Prep {
                question_index: *question_index,
                seconds_remaining: remaining,
                timer: *timer,
            };
            effects.push(EmitUi);
        }
        (
            Step::Prep {
                question_index,
                timer,
                ..
            },
            TimerExpired { timer: id },
        ) if *timer == id => {
            log::info!("Prep time for question {} elapsed", question_index);
            enter_recording(&mut next, &mut effects, *question_index);
        }
        (
            Step::Prep {
                question_index,
                timer,
                ..
            },
            AnswerNow,
        ) => {
            // Cancel first so a queued expiry cannot start a second recording
            effects.push(CancelTimer { timer: *timer });
            enter_recording(&mut next, &mut effects, *question_index);
        }

        // -----------------
        // Recording
        // -----------------
        (
            Step::Recording {
                question_index,
                timer,
                ..
            },
            TimerTick {
                timer: id,
                remaining,
            },
        ) if *timer == id => {
            next.step = Step::Recording {
                question_index: *question_index,
                seconds_remaining: remaining,
                timer: *timer,
            };
            effects.push(EmitUi);
        }
        (
            Step::Recording {
                question_index,
                timer,
                ..
            },
            FinishAnswer,
        ) => {
            log::info!("Answer to question {} finished by candidate", question_index);
            next.step = Step::Finalizing {
                question_index: *question_index,
            };
            effects.extend([
                CancelTimer { timer: *timer },
                StopRecorder {
                    question_index: *question_index,
                },
                EmitUi,
            ]);
        }
        (
            Step::Recording {
                question_index,
                timer,
                ..
            },
            TimerExpired { timer: id },
        ) if *timer == id => {
            log::info!(
                "Answer to question {} auto-stopped (max duration reached)",
                question_index
            );
            next.step = Step::Finalizing {
                question_index: *question_index,
            };
            effects.extend([
                StopRecorder {
                    question_index: *question_index,
                },
                EmitUi,
            ]);
        }
        (
            Step::Recording {
                question_index,
                timer,
                ..
            },
            RecorderFailed {
                question_index: failed,
                err,
            },
        ) if *question_index == failed => {
            log::error!("Recorder failed for question {}: {}", failed, err);
            effects.push(CancelTimer { timer: *timer });
            fall_back_to_device_check(&mut next, &mut effects, err.into());
        }

        // -----------------
        // Finalizing
        // -----------------
        (
            Step::Finalizing { question_index },
            RecordingFinalized {
                question_index: done,
                recording,
            },
        ) if *question_index == done
            && session
                .flow
                .question(done)
                .is_some_and(|q| q.id == recording.question_id) =>
        {
            let upload = Uuid::new_v4();
            effects.extend([
                StartUpload {
                    upload,
                    question_id: recording.question_id.clone(),
                },
                EmitUi,
            ]);
            next.recordings.push(recording);
            next.step = Step::Upload {
                question_index: *question_index,
                progress: 0.0,
                upload,
            };
        }
        (
            Step::Finalizing { question_index },
            RecorderFailed {
                question_index: failed,
                err,
            },
        ) if *question_index == failed => {
            log::error!("Recorder produced no clip for question {}: {}", failed, err);
            fall_back_to_device_check(&mut next, &mut effects, err.into());
        }

        // -----------------
        // Upload
        // -----------------
        (
            Step::Upload {
                question_index,
                upload,
                ..
            },
            UploadProgress {
                upload: id,
                progress,
            },
        ) if *upload == id => {
            next.step = Step::Upload {
                question_index: *question_index,
                progress: progress.clamp(0.0, 100.0),
                upload: *upload,
            };
            effects.push(EmitUi);
        }
        (
            Step::Upload {
                question_index,
                upload,
                ..
            },
            UploadComplete { upload: id },
        ) if *upload == id => {
            log::info!("Answer to question {} uploaded", question_index);
            enter_question_intro(&mut next, &mut effects, question_index + 1);
        }

        // -----------------
        // Stale or unhandled: no transition
        // -----------------
        (step, event) => {
            log::debug!("Ignoring {:?} in step {}", event, step.name());
            return (next, vec![]);
        }
    }

    (next, effects)
}

fn enter_question_intro(next: &mut Session, effects: &mut Vec<Effect>, index: usize) {
    if index >= next.flow.questions.len() {
        finish(next, effects);
        return;
    }
    next.step = Step::QuestionIntro {
        question_index: index,
    };
    effects.push(Effect::EmitUi);
}

fn enter_prep(next: &mut Session, effects: &mut Vec<Effect>, index: usize) {
    let flow = next.flow.clone();
    let Some(question) = flow.question(index) else {
        finish(next, effects);
        return;
    };
    let timer = Uuid::new_v4();
    next.step = Step::Prep {
        question_index: index,
        seconds_remaining: question.prep_seconds,
        timer,
    };
    effects.extend([
        Effect::StartTimer {
            timer,
            purpose: TimerPurpose::Prep,
            seconds: question.prep_seconds,
        },
        Effect::EmitUi,
    ]);
}

fn enter_recording(next: &mut Session, effects: &mut Vec<Effect>, index: usize) {
    let flow = next.flow.clone();
    let Some(question) = flow.question(index) else {
        finish(next, effects);
        return;
    };
    if next.media.is_none() {
        log::error!("Cannot record question {}: no media source", index);
        fall_back_to_device_check(next, effects, RecorderError::NoMediaSource.into());
        return;
    }

    let timer = Uuid::new_v4();
    next.step = Step::Recording {
        question_index: index,
        seconds_remaining: question.max_answer_seconds,
        timer,
    };
    effects.extend([
        Effect::StartRecorder {
            question_index: index,
            question_id: question.id.clone(),
        },
        Effect::StartTimer {
            timer,
            purpose: TimerPurpose::Answer,
            seconds: question.max_answer_seconds,
        },
        Effect::EmitUi,
    ]);
}

fn fall_back_to_device_check(next: &mut Session, effects: &mut Vec<Effect>, error: DeviceError) {
    effects.push(Effect::DiscardRecorder);
    if let Some(media) = next.media.take() {
        effects.push(Effect::ReleaseMedia { media });
    }
    next.step = Step::DeviceCheck {
        acquiring: false,
        error: Some(error),
    };
    effects.push(Effect::EmitUi);
}

fn finish(next: &mut Session, effects: &mut Vec<Effect>) {
    // No further capture is needed
    if let Some(media) = next.media.take() {
        effects.push(Effect::ReleaseMedia { media });
    }
    next.step = Step::Finished {
        reference_code: next.reference_code(),
    };
    log::info!(
        "Session {} finished with {} recordings",
        next.id,
        next.recordings.len()
    );
    effects.push(Effect::EmitUi);
}

/// Single teardown path for every exit before completion.
fn teardown(session: &Session) -> (Session, Vec<Effect>) {
    let mut next = session.clone();
    let mut effects = Vec::new();

    match &session.step {
        Step::Abandoned => return (next, effects),
        Step::Prep { timer, .. } => effects.push(Effect::CancelTimer { timer: *timer }),
        Step::Recording { timer, .. } => {
            effects.push(Effect::CancelTimer { timer: *timer });
            effects.push(Effect::DiscardRecorder);
        }
        Step::Finalizing { .. } => effects.push(Effect::DiscardRecorder),
        Step::Upload { upload, .. } => effects.push(Effect::CancelUpload { upload: *upload }),
        _ => {}
    }

    if let Some(media) = next.media.take() {
        effects.push(Effect::ReleaseMedia { media });
    }

    if !matches!(session.step, Step::Finished { .. }) {
        log::info!(
            "Session {} abandoned during step {}",
            session.id,
            session.step.name()
        );
        next.step = Step::Abandoned;
    }
    if !effects.is_empty() || next.step != session.step {
        effects.push(Effect::EmitUi);
    }
    (next, effects)
}
