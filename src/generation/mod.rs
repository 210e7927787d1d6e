//! Interview question generation
//!
//! Suggests questions for a job role while a flow is being authored. It never
//! runs inside a session: callers start it with `spawn_generation` and poll
//! the returned `GenerationTask` to drive a loading indicator.

mod gemini;

pub use gemini::{is_api_key_configured, GeminiQuestionGenerator};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::flow::Question;

/// Answer time used when a suggestion comes back without a usable one.
const DEFAULT_MAX_ANSWER_SECONDS: u32 = 120;

/// Errors that can occur while generating questions
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    #[error("A job role and a question count above zero are required")]
    EmptyInput,
    #[error("Network error: {0}")]
    Network(String),
    #[error("Gemini API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("Failed to parse generated questions: {0}")]
    Parse(String),
}

/// A suggested question before it is given an id in a flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedQuestion {
    pub text: String,
    #[serde(rename = "prepTimeSeconds")]
    pub prep_seconds: u32,
    #[serde(rename = "maxAnswerTimeSeconds")]
    pub max_answer_seconds: u32,
}

#[async_trait]
pub trait QuestionGenerator: Send + Sync + 'static {
    async fn generate(
        &self,
        role: &str,
        count: u32,
    ) -> Result<Vec<GeneratedQuestion>, GenerationError>;
}

pub(crate) fn check_input(role: &str, count: u32) -> Result<(), GenerationError> {
    if role.trim().is_empty() || count == 0 {
        return Err(GenerationError::EmptyInput);
    }
    Ok(())
}

/// Canned suggestions used when no API key is configured.
pub fn fallback_questions(role: &str) -> Vec<GeneratedQuestion> {
    vec![
        GeneratedQuestion {
            text: format!("Why do you want to work as a {}?", role.trim()),
            prep_seconds: 30,
            max_answer_seconds: 120,
        },
        GeneratedQuestion {
            text: "Describe a challenging situation you overcame.".to_string(),
            prep_seconds: 45,
            max_answer_seconds: 180,
        },
    ]
}

/// Turn suggestions into flow questions with ids `ai-<millis>-<index>`.
pub fn to_flow_questions(generated: Vec<GeneratedQuestion>, millis: i64) -> Vec<Question> {
    generated
        .into_iter()
        .enumerate()
        .map(|(i, q)| Question {
            id: format!("ai-{}-{}", millis, i),
            text: q.text,
            video_url: None,
            prep_seconds: q.prep_seconds,
            max_answer_seconds: if q.max_answer_seconds == 0 {
                DEFAULT_MAX_ANSWER_SECONDS
            } else {
                q.max_answer_seconds
            },
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub enum GenerationStatus {
    Loading,
    Ready(Vec<Question>),
    Failed(String),
}

/// Background generation started by `spawn_generation`.
pub struct GenerationTask {
    status: watch::Receiver<GenerationStatus>,
    task: JoinHandle<()>,
}

impl GenerationTask {
    pub fn status(&self) -> GenerationStatus {
        self.status.borrow().clone()
    }

    pub fn is_loading(&self) -> bool {
        matches!(*self.status.borrow(), GenerationStatus::Loading)
    }

    /// Wait until generation settles.
    pub async fn wait(mut self) -> GenerationStatus {
        let settled = self
            .status
            .wait_for(|s| !matches!(s, GenerationStatus::Loading))
            .await
            .map(|s| s.clone());
        settled.unwrap_or_else(|_| GenerationStatus::Failed("Generation task ended".to_string()))
    }

    pub fn abort(self) {
        self.task.abort();
    }
}

/// Start generating `count` questions for `role` without blocking the caller.
pub fn spawn_generation(
    generator: Arc<dyn QuestionGenerator>,
    role: String,
    count: u32,
) -> GenerationTask {
    let (tx, rx) = watch::channel(GenerationStatus::Loading);

    let task = tokio::spawn(async move {
        log::info!("Generating {} questions for role '{}'", count, role);
        let status = match generator.generate(&role, count).await {
            Ok(generated) => {
                let questions = to_flow_questions(generated, Utc::now().timestamp_millis());
                log::info!("Generated {} questions", questions.len());
                GenerationStatus::Ready(questions)
            }
            Err(e) => {
                log::warn!("Question generation failed: {}", e);
                GenerationStatus::Failed(e.to_string())
            }
        };
        tx.send_replace(status);
    });

    GenerationTask { status: rx, task }
}
