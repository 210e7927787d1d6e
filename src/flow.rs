//! Interview flow model
//!
//! A flow is the read-only template a candidate steps through: title, target
//! role and an ordered list of questions. The session core never mutates it.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

/// Errors raised when a flow cannot be used to run a session.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("Failed to read flow file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse flow: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Flow has no questions")]
    NoQuestions,
    #[error("Duplicate question id: {0}")]
    DuplicateQuestionId(String),
    #[error("Question {0} must allow more than 0 seconds to answer")]
    ZeroAnswerTime(String),
}

/// One prompt with its timing parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: String,
    pub text: String,
    /// Prompt video played before the candidate prepares.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(rename = "prepTimeSeconds")]
    pub prep_seconds: u32,
    #[serde(rename = "maxAnswerTimeSeconds")]
    pub max_answer_seconds: u32,
}

impl Question {
    pub fn has_prompt_video(&self) -> bool {
        self.video_url.as_deref().is_some_and(|url| !url.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterviewFlow {
    pub id: String,
    pub title: String,
    pub job_role: String,
    pub questions: Vec<Question>,
}

impl InterviewFlow {
    /// Check the invariants a session relies on.
    pub fn validate(&self) -> Result<(), FlowError> {
        if self.questions.is_empty() {
            return Err(FlowError::NoQuestions);
        }

        let mut seen = HashSet::new();
        for q in &self.questions {
            if !seen.insert(q.id.as_str()) {
                return Err(FlowError::DuplicateQuestionId(q.id.clone()));
            }
            if q.max_answer_seconds == 0 {
                return Err(FlowError::ZeroAnswerTime(q.id.clone()));
            }
        }
        Ok(())
    }

    /// Load a flow from a JSON file and validate it.
    pub fn load(path: &Path) -> Result<Self, FlowError> {
        let contents = std::fs::read_to_string(path)?;
        let flow: InterviewFlow = serde_json::from_str(&contents)?;
        flow.validate()?;
        log::info!(
            "Loaded flow '{}' ({} questions) from {:?}",
            flow.title,
            flow.questions.len(),
            path
        );
        Ok(flow)
    }

    /// The flow seeded for new installs.
    pub fn sample() -> Self {
        Self {
            id: "flow-1".to_string(),
            title: "Frontend Developer Screening".to_string(),
            job_role: "Frontend Developer".to_string(),
            questions: vec![
                Question {
                    id: "1".to_string(),
                    text: "Please introduce yourself and your background.".to_string(),
                    video_url: Some(
                        "https://commondatastorage.googleapis.com/gtv-videos-bucket/sample/BigBuckBunny.mp4"
                            .to_string(),
                    ),
                    prep_seconds: 30,
                    max_answer_seconds: 120,
                },
                Question {
                    id: "2".to_string(),
                    text: "Describe a challenging project you worked on.".to_string(),
                    video_url: None,
                    prep_seconds: 45,
                    max_answer_seconds: 180,
                },
                Question {
                    id: "3".to_string(),
                    text: "How do you handle state management in large applications?"
                        .to_string(),
                    video_url: None,
                    prep_seconds: 60,
                    max_answer_seconds: 180,
                },
            ],
        }
    }

    pub fn question(&self, index: usize) -> Option<&Question> {
        self.questions.get(index)
    }

    pub fn is_last(&self, index: usize) -> bool {
        index + 1 >= self.questions.len()
    }

    /// Rough session length shown before the devices are checked: all prep
    /// and answer time rounded to the nearest minute, plus five minutes.
    pub fn estimated_minutes(&self) -> u64 {
        let total: u64 = self
            .questions
            .iter()
            .map(|q| u64::from(q.prep_seconds) + u64::from(q.max_answer_seconds))
            .sum();
        (total + 30) / 60 + 5
    }
}

/// Finalized answer for one question.
///
/// Created only by the recorder; never mutated afterwards.
#[derive(Clone, PartialEq, Eq)]
pub struct Recording {
    pub question_id: String,
    pub artifact: Arc<[u8]>,
    pub mime_type: String,
    /// Locally resolvable playback reference (`blob:<uuid>`).
    pub playback_ref: String,
}

impl Recording {
    pub fn size_bytes(&self) -> usize {
        self.artifact.len()
    }
}

impl std::fmt::Debug for Recording {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recording")
            .field("question_id", &self.question_id)
            .field("size_bytes", &self.size_bytes())
            .field("mime_type", &self.mime_type)
            .field("playback_ref", &self.playback_ref)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn question(id: &str, max_answer: u32) -> Question {
        Question {
            id: id.to_string(),
            text: format!("Question {}", id),
            video_url: None,
            prep_seconds: 5,
            max_answer_seconds: max_answer,
        }
    }

    #[test]
    fn sample_flow_is_valid() {
        assert!(InterviewFlow::sample().validate().is_ok());
    }

    #[test]
    fn estimate_rounds_timed_phases_and_adds_buffer() {
        assert_eq!(InterviewFlow::sample().estimated_minutes(), 15);

        let mut flow = InterviewFlow::sample();
        flow.questions = vec![Question {
            prep_seconds: 30,
            max_answer_seconds: 60,
            ..question("a", 60)
        }];
        assert_eq!(flow.estimated_minutes(), 7);
    }

    #[test]
    fn empty_flow_is_rejected() {
        let mut flow = InterviewFlow::sample();
        flow.questions.clear();
        assert!(matches!(flow.validate(), Err(FlowError::NoQuestions)));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut flow = InterviewFlow::sample();
        flow.questions = vec![question("a", 10), question("a", 10)];
        assert!(matches!(
            flow.validate(),
            Err(FlowError::DuplicateQuestionId(id)) if id == "a"
        ));
    }

    #[test]
    fn zero_answer_time_is_rejected() {
        let mut flow = InterviewFlow::sample();
        flow.questions = vec![question("a", 10), question("b", 0)];
        assert!(matches!(
            flow.validate(),
            Err(FlowError::ZeroAnswerTime(id)) if id == "b"
        ));
    }

    #[test]
    fn load_reads_camel_case_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "id": "f",
                "title": "T",
                "jobRole": "Tester",
                "questions": [
                    {{"id": "q1", "text": "Hi", "prepTimeSeconds": 3, "maxAnswerTimeSeconds": 10}},
                    {{"id": "q2", "text": "Bye", "videoUrl": "https://x/v.mp4", "prepTimeSeconds": 0, "maxAnswerTimeSeconds": 5}}
                ]
            }}"#
        )
        .unwrap();

        let flow = InterviewFlow::load(file.path()).unwrap();
        assert_eq!(flow.job_role, "Tester");
        assert_eq!(flow.questions[0].prep_seconds, 3);
        assert!(!flow.questions[0].has_prompt_video());
        assert!(flow.questions[1].has_prompt_video());
        assert!(flow.is_last(1));
    }

    #[test]
    fn load_rejects_invalid_flow() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"id": "f", "title": "T", "jobRole": "R", "questions": []}}"#
        )
        .unwrap();
        assert!(matches!(
            InterviewFlow::load(file.path()),
            Err(FlowError::NoQuestions)
        ));
    }
}
