pub mod effects;
pub mod flow;
pub mod generation;
pub mod identity;
pub mod media;
pub mod settings;
pub mod state_machine;
pub mod timer;
pub mod upload;

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use effects::EffectRunner;
use state_machine::{reduce, Effect, Event, Session, Step};

/// UI snapshot published after every visible change.
/// Uses tagged union format: { "step": "prep", "questionIndex": 0, "secondsRemaining": 12, ... }
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "step", rename_all = "camelCase")]
pub enum UiState {
    Identity {
        error: Option<String>,
    },
    CvUpload {
        error: Option<String>,
    },
    DeviceCheck {
        acquiring: bool,
        #[serde(rename = "mediaLive")]
        media_live: bool,
        error: Option<String>,
    },
    Instructions {
        #[serde(rename = "questionCount")]
        question_count: usize,
        #[serde(rename = "estimatedMinutes")]
        estimated_minutes: u64,
    },
    QuestionIntro {
        #[serde(rename = "questionIndex")]
        question_index: usize,
        #[serde(rename = "questionCount")]
        question_count: usize,
        text: String,
        #[serde(rename = "videoUrl")]
        video_url: Option<String>,
    },
    Prep {
        #[serde(rename = "questionIndex")]
        question_index: usize,
        #[serde(rename = "questionCount")]
        question_count: usize,
        text: String,
        #[serde(rename = "secondsRemaining")]
        seconds_remaining: u32,
    },
    Recording {
        #[serde(rename = "questionIndex")]
        question_index: usize,
        #[serde(rename = "questionCount")]
        question_count: usize,
        text: String,
        #[serde(rename = "secondsRemaining")]
        seconds_remaining: u32,
    },
    Finalizing {
        #[serde(rename = "questionIndex")]
        question_index: usize,
    },
    Upload {
        #[serde(rename = "questionIndex")]
        question_index: usize,
        #[serde(rename = "questionCount")]
        question_count: usize,
        progress: f32,
    },
    Finished {
        #[serde(rename = "referenceCode")]
        reference_code: String,
        recordings: usize,
    },
    Abandoned {
        recordings: usize,
    },
}

/// Convert the internal session to a UiState for the frontend
pub fn state_to_ui(session: &Session) -> UiState {
    let question_count = session.flow.questions.len();
    let text = |index: usize| {
        session
            .flow
            .question(index)
            .map(|q| q.text.clone())
            .unwrap_or_default()
    };

    match &session.step {
        Step::Identity { error } => UiState::Identity {
            error: error.as_ref().map(ToString::to_string),
        },
        Step::CvUpload { error } => UiState::CvUpload {
            error: error.as_ref().map(ToString::to_string),
        },
        Step::DeviceCheck { acquiring, error } => UiState::DeviceCheck {
            acquiring: *acquiring,
            media_live: session.media.is_some(),
            error: error.as_ref().map(ToString::to_string),
        },
        Step::Instructions => UiState::Instructions {
            question_count,
            estimated_minutes: session.flow.estimated_minutes(),
        },
        Step::QuestionIntro { question_index } => UiState::QuestionIntro {
            question_index: *question_index,
            question_count,
            text: text(*question_index),
            video_url: session
                .flow
                .question(*question_index)
                .filter(|q| q.has_prompt_video())
                .and_then(|q| q.video_url.clone()),
        },
        Step::Prep {
            question_index,
            seconds_remaining,
            ..
        } => UiState::Prep {
            question_index: *question_index,
            question_count,
            text: text(*question_index),
            seconds_remaining: *seconds_remaining,
        },
        Step::Recording {
            question_index,
            seconds_remaining,
            ..
        } => UiState::Recording {
            question_index: *question_index,
            question_count,
            text: text(*question_index),
            seconds_remaining: *seconds_remaining,
        },
        Step::Finalizing { question_index } => UiState::Finalizing {
            question_index: *question_index,
        },
        Step::Upload {
            question_index,
            progress,
            ..
        } => UiState::Upload {
            question_index: *question_index,
            question_count,
            progress: *progress,
        },
        Step::Finished { reference_code } => UiState::Finished {
            reference_code: reference_code.clone(),
            recordings: session.recordings.len(),
        },
        Step::Abandoned => UiState::Abandoned {
            recordings: session.recordings.len(),
        },
    }
}

/// Publish a UI snapshot to every subscriber
fn emit_ui_state(ui: &watch::Sender<UiState>, session: &Session) {
    let ui_state = state_to_ui(session);
    match serde_json::to_string(&ui_state) {
        Ok(json) => log::debug!("Emitting UI state: {}", json),
        Err(e) => log::warn!("Failed to serialize UI state {:?}: {}", ui_state, e),
    }
    ui.send_replace(ui_state);
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session has already ended")]
    Closed,
    #[error("Session task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Run the session loop until the session reaches a terminal step.
///
/// This is the only place a `Session` is written. Returns the final session.
pub async fn run_session_loop(
    mut session: Session,
    mut rx: mpsc::UnboundedReceiver<Event>,
    tx: mpsc::UnboundedSender<Event>,
    effect_runner: Arc<dyn EffectRunner>,
    ui: watch::Sender<UiState>,
) -> Session {
    emit_ui_state(&ui, &session);
    log::info!(
        "Session {} started: '{}' ({} questions)",
        session.id,
        session.flow.title,
        session.flow.questions.len()
    );

    while let Some(event) = rx.recv().await {
        log::debug!("Received event: {:?}", event);

        let (next, effects) = reduce(&session, event);

        if std::mem::discriminant(&session.step) != std::mem::discriminant(&next.step)
            || session.step.question_index() != next.step.question_index()
        {
            log::info!(
                "Step transition: {} -> {} (question {:?})",
                session.step.name(),
                next.step.name(),
                next.step.question_index()
            );
        }

        session = next;

        for eff in effects {
            match eff {
                Effect::EmitUi => emit_ui_state(&ui, &session),
                other => effect_runner.spawn(other, tx.clone()),
            }
        }

        if session.step.is_terminal() {
            break;
        }
    }

    effect_runner.shutdown();
    log::info!(
        "Session loop ended in step {} with {} recordings",
        session.step.name(),
        session.recordings.len()
    );
    session
}

/// Owner-side handle to a running session loop.
///
/// Dropping the handle while the loop runs abandons the session, so camera,
/// timers and uploads are torn down with it.
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<Event>,
    ui: watch::Receiver<UiState>,
    task: Option<JoinHandle<Session>>,
}

impl SessionHandle {
    /// Spawn the session loop on the current tokio runtime.
    pub fn spawn(session: Session, effect_runner: Arc<dyn EffectRunner>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel::<Event>();
        let (ui_tx, ui_rx) = watch::channel(state_to_ui(&session));

        let tx_for_loop = tx.clone();
        let task = tokio::spawn(run_session_loop(
            session,
            rx,
            tx_for_loop,
            effect_runner,
            ui_tx,
        ));

        Self {
            tx,
            ui: ui_rx,
            task: Some(task),
        }
    }

    /// Send an event to the state machine
    pub fn send(&self, event: Event) -> Result<(), SessionError> {
        self.tx.send(event).map_err(|_| SessionError::Closed)
    }

    /// Leave the interview. Safe to call any number of times.
    pub fn abandon(&self) {
        if self.tx.send(Event::Abandon).is_err() {
            log::debug!("Abandon after session loop ended");
        }
    }

    pub fn sender(&self) -> mpsc::UnboundedSender<Event> {
        self.tx.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<UiState> {
        self.ui.clone()
    }

    /// Latest published snapshot.
    pub fn ui(&self) -> UiState {
        self.ui.borrow().clone()
    }

    /// Wait for the loop to end and return the final session.
    pub async fn join(mut self) -> Result<Session, SessionError> {
        match self.task.take() {
            Some(task) => Ok(task.await?),
            None => Err(SessionError::Closed),
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if self.task.as_ref().is_some_and(|task| !task.is_finished()) {
            log::info!("Session handle dropped, abandoning session");
            let _ = self.tx.send(Event::Abandon);
        }
    }
}
