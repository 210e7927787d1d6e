//! End-to-end tests for the interview session
//!
//! These drive a real session loop with the simulated camera/microphone.
//! Time is paused, so countdowns and uploads complete instantly.
//!
//! ## Running Tests
//! ```bash
//! cargo test --test session_flow
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;

use interview_session::effects::{EffectRunner, SessionEffectRunner};
use interview_session::flow::{InterviewFlow, Question};
use interview_session::media::{CapabilityError, SimulatedMediaSource};
use interview_session::state_machine::{Event, Session, SessionPolicy, Step};
use interview_session::upload::UploadConfig;
use interview_session::{SessionHandle, UiState};

fn question(id: &str, prep: u32, max_answer: u32) -> Question {
    Question {
        id: id.to_string(),
        text: format!("Question {}", id),
        video_url: None,
        prep_seconds: prep,
        max_answer_seconds: max_answer,
    }
}

fn flow(questions: Vec<Question>) -> Arc<InterviewFlow> {
    Arc::new(InterviewFlow {
        id: "flow".to_string(),
        title: "Integration".to_string(),
        job_role: "Tester".to_string(),
        questions,
    })
}

struct Harness {
    source: Arc<SimulatedMediaSource>,
    runner: Arc<SessionEffectRunner>,
    handle: SessionHandle,
    ui: watch::Receiver<UiState>,
}

impl Harness {
    fn start(flow: Arc<InterviewFlow>, policy: SessionPolicy, source: SimulatedMediaSource) -> Self {
        let source = Arc::new(source);
        let runner = Arc::new(
            SessionEffectRunner::new(source.clone()).with_upload(UploadConfig::default(), Some(42)),
        );
        let session = Session::new(flow, policy, Utc::now());
        let handle = SessionHandle::spawn(session, runner.clone() as Arc<dyn EffectRunner>);
        let ui = handle.subscribe();
        Self {
            source,
            runner,
            handle,
            ui,
        }
    }

    fn send(&self, event: Event) {
        self.handle.send(event).expect("session loop ended early");
    }

    async fn wait_for(&mut self, mut what: impl FnMut(&UiState) -> bool) -> UiState {
        self.ui
            .wait_for(|s| what(s))
            .await
            .expect("session loop ended early")
            .clone()
    }

    async fn to_instructions(&mut self) {
        self.send(Event::RequestDevices);
        self.wait_for(|s| {
            matches!(
                s,
                UiState::DeviceCheck {
                    acquiring: false,
                    media_live: true,
                    ..
                }
            )
        })
        .await;
        self.send(Event::ContinueToInstructions);
        self.wait_for(|s| matches!(s, UiState::Instructions { .. }))
            .await;
    }

    async fn at_intro(&mut self, index: usize) {
        self.wait_for(
            |s| matches!(s, UiState::QuestionIntro { question_index, .. } if *question_index == index),
        )
        .await;
    }
}

#[tokio::test(start_paused = true)]
async fn timer_driven_interview_records_every_answer_in_order() {
    let mut h = Harness::start(
        flow(vec![question("q1", 5, 10), question("q2", 3, 10)]),
        SessionPolicy::default(),
        SimulatedMediaSource::new(),
    );

    h.to_instructions().await;
    h.send(Event::ConfirmInstructions);

    h.at_intro(0).await;
    h.send(Event::StartPrep);
    h.at_intro(1).await;
    h.send(Event::StartPrep);

    let done = h.wait_for(|s| matches!(s, UiState::Finished { .. })).await;
    assert!(matches!(done, UiState::Finished { recordings: 2, .. }));

    let runner = h.runner.clone();
    let source = h.source.clone();
    let session = h.handle.join().await.unwrap();

    let ids: Vec<_> = session
        .recordings
        .iter()
        .map(|r| r.question_id.as_str())
        .collect();
    assert_eq!(ids, vec!["q1", "q2"]);
    for recording in &session.recordings {
        assert_eq!(recording.mime_type, "video/webm");
        assert!(recording.playback_ref.starts_with("blob:"));
        assert!(recording.size_bytes() > 0);
    }

    assert!(matches!(session.step, Step::Finished { .. }));
    assert!(session.media.is_none());
    assert!(!runner.holds_media());
    assert_eq!(source.acquisitions(), 1);
    assert_eq!(source.stopped_tracks(), 2);
}

#[tokio::test(start_paused = true)]
async fn prep_countdown_is_visible_then_recording_starts() {
    let mut h = Harness::start(
        flow(vec![question("q1", 3, 5)]),
        SessionPolicy::default(),
        SimulatedMediaSource::new(),
    );
    h.to_instructions().await;
    h.send(Event::ConfirmInstructions);
    h.at_intro(0).await;

    h.send(Event::StartPrep);
    let prep = h.wait_for(|s| matches!(s, UiState::Prep { .. })).await;
    assert!(matches!(prep, UiState::Prep { seconds_remaining: 3, .. }));

    let recording = h.wait_for(|s| matches!(s, UiState::Recording { .. })).await;
    assert!(matches!(
        recording,
        UiState::Recording {
            seconds_remaining: 5,
            ..
        }
    ));
    h.wait_for(|s| matches!(s, UiState::Finished { .. })).await;
}

#[tokio::test(start_paused = true)]
async fn manual_finish_cancels_answer_timer() {
    let mut h = Harness::start(
        flow(vec![question("q1", 0, 30), question("q2", 0, 30)]),
        SessionPolicy::default(),
        SimulatedMediaSource::new(),
    );
    h.to_instructions().await;
    h.send(Event::ConfirmInstructions);
    h.at_intro(0).await;
    h.send(Event::StartPrep);

    let started = tokio::time::Instant::now();
    h.wait_for(|s| {
        matches!(s, UiState::Recording { seconds_remaining, .. } if *seconds_remaining <= 26)
    })
    .await;
    assert!(started.elapsed() >= Duration::from_secs(4));
    assert!(h.runner.has_pending_timer());

    h.send(Event::FinishAnswer);
    h.at_intro(1).await;
    assert!(!h.runner.has_pending_timer());

    // The cancelled answer timer must not start anything later
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(matches!(
        *h.ui.borrow(),
        UiState::QuestionIntro {
            question_index: 1,
            ..
        }
    ));

    h.handle.abandon();
    let session = h.handle.join().await.unwrap();
    assert_eq!(session.recordings.len(), 1);
    assert_eq!(session.recordings[0].question_id, "q1");
}

#[tokio::test(start_paused = true)]
async fn answer_now_skips_remaining_prep() {
    let mut h = Harness::start(
        flow(vec![question("q1", 60, 10)]),
        SessionPolicy::default(),
        SimulatedMediaSource::new(),
    );
    h.to_instructions().await;
    h.send(Event::ConfirmInstructions);
    h.at_intro(0).await;
    h.send(Event::StartPrep);
    h.wait_for(|s| matches!(s, UiState::Prep { .. })).await;

    let started = tokio::time::Instant::now();
    h.send(Event::AnswerNow);
    h.wait_for(|s| matches!(s, UiState::Recording { .. })).await;
    assert!(started.elapsed() < Duration::from_secs(1));

    let session = {
        h.wait_for(|s| matches!(s, UiState::Finished { .. })).await;
        h.handle.join().await.unwrap()
    };
    assert_eq!(session.recordings.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn denied_devices_can_be_retried() {
    let mut h = Harness::start(
        flow(vec![question("q1", 1, 2)]),
        SessionPolicy::default(),
        SimulatedMediaSource::failing(1, CapabilityError::PermissionDenied),
    );

    h.send(Event::RequestDevices);
    let denied = h
        .wait_for(|s| matches!(s, UiState::DeviceCheck { error: Some(_), .. }))
        .await;
    match denied {
        UiState::DeviceCheck {
            acquiring,
            media_live,
            error,
        } => {
            assert!(!acquiring);
            assert!(!media_live);
            assert!(error.unwrap().contains("denied"));
        }
        other => panic!("unexpected {:?}", other),
    }

    // Continue is refused while no media is live
    h.send(Event::ContinueToInstructions);

    h.send(Event::RequestDevices);
    let ready = h
        .wait_for(|s| matches!(s, UiState::DeviceCheck { media_live: true, .. }))
        .await;
    assert!(matches!(ready, UiState::DeviceCheck { error: None, .. }));

    h.send(Event::ContinueToInstructions);
    h.wait_for(|s| matches!(s, UiState::Instructions { .. }))
        .await;
    assert_eq!(h.source.acquisitions(), 1);
}

#[tokio::test(start_paused = true)]
async fn identity_gate_rejects_then_accepts() {
    let policy = SessionPolicy {
        requires_identity_gate: true,
        ..SessionPolicy::default()
    };
    let mut h = Harness::start(
        flow(vec![question("q1", 1, 2)]),
        policy,
        SimulatedMediaSource::new(),
    );
    assert!(matches!(h.handle.ui(), UiState::Identity { error: None }));

    h.send(Event::SubmitBirthYear {
        input: "abc".to_string(),
        current_year: 2025,
    });
    let invalid = h
        .wait_for(|s| matches!(s, UiState::Identity { error: Some(_) }))
        .await;

    h.send(Event::SubmitBirthYear {
        input: "1950".to_string(),
        current_year: 2025,
    });
    let too_old = h
        .wait_for(|s| matches!(s, UiState::Identity { error: Some(_) }) && *s != invalid)
        .await;
    assert_ne!(invalid, too_old);

    h.send(Event::SubmitBirthYear {
        input: "2000".to_string(),
        current_year: 2025,
    });
    h.wait_for(|s| matches!(s, UiState::DeviceCheck { .. }))
        .await;
}

#[tokio::test(start_paused = true)]
async fn prompt_video_end_starts_prep_when_enabled() {
    let mut with_video = question("q1", 2, 3);
    with_video.video_url = Some("https://example.com/intro.mp4".to_string());
    let policy = SessionPolicy {
        auto_advance_on_video_end: true,
        ..SessionPolicy::default()
    };
    let mut h = Harness::start(flow(vec![with_video]), policy, SimulatedMediaSource::new());

    h.to_instructions().await;
    h.send(Event::ConfirmInstructions);
    let intro = h
        .wait_for(|s| matches!(s, UiState::QuestionIntro { .. }))
        .await;
    assert!(matches!(
        intro,
        UiState::QuestionIntro {
            video_url: Some(_),
            ..
        }
    ));

    h.send(Event::PromptVideoEnded { question_index: 0 });
    h.wait_for(|s| matches!(s, UiState::Prep { .. })).await;
}

#[tokio::test(start_paused = true)]
async fn abandon_mid_recording_releases_once() {
    let mut h = Harness::start(
        flow(vec![question("q1", 0, 30)]),
        SessionPolicy::default(),
        SimulatedMediaSource::new(),
    );
    h.to_instructions().await;
    h.send(Event::ConfirmInstructions);
    h.at_intro(0).await;
    h.send(Event::StartPrep);
    h.wait_for(|s| matches!(s, UiState::Recording { .. })).await;

    h.handle.abandon();
    h.handle.abandon();
    h.wait_for(|s| matches!(s, UiState::Abandoned { .. })).await;

    let runner = h.runner.clone();
    let source = h.source.clone();
    let session = h.handle.join().await.unwrap();

    assert_eq!(session.step, Step::Abandoned);
    assert!(session.recordings.is_empty());
    assert!(session.media.is_none());
    assert!(!runner.holds_media());
    assert!(!runner.has_pending_timer());
    assert_eq!(source.stopped_tracks(), 2);
}

#[tokio::test(start_paused = true)]
async fn abandon_during_upload_cancels_it() {
    let mut h = Harness::start(
        flow(vec![question("q1", 0, 1), question("q2", 0, 1)]),
        SessionPolicy::default(),
        SimulatedMediaSource::new(),
    );
    h.to_instructions().await;
    h.send(Event::ConfirmInstructions);
    h.at_intro(0).await;
    h.send(Event::StartPrep);
    h.wait_for(|s| matches!(s, UiState::Upload { .. })).await;

    h.handle.abandon();
    let runner = h.runner.clone();
    let session = h.handle.join().await.unwrap();

    assert_eq!(session.step, Step::Abandoned);
    assert_eq!(session.recordings.len(), 1);
    assert!(!runner.has_pending_upload());
}

#[tokio::test(start_paused = true)]
async fn dropping_handle_tears_session_down() {
    let mut h = Harness::start(
        flow(vec![question("q1", 30, 30)]),
        SessionPolicy::default(),
        SimulatedMediaSource::new(),
    );
    h.to_instructions().await;
    h.send(Event::ConfirmInstructions);
    h.at_intro(0).await;
    h.send(Event::StartPrep);
    h.wait_for(|s| matches!(s, UiState::Prep { .. })).await;

    let Harness {
        source,
        runner,
        handle,
        mut ui,
    } = h;
    drop(handle);

    ui.wait_for(|s| matches!(s, UiState::Abandoned { .. }))
        .await
        .unwrap();
    // Let the loop finish its shutdown
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert!(!runner.holds_media());
    assert!(!runner.has_pending_timer());
    assert_eq!(source.stopped_tracks(), 2);
}
