use anyhow::{bail, Context, Result};
use chrono::{Datelike, Utc};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use interview_session::effects::SessionEffectRunner;
use interview_session::flow::InterviewFlow;
use interview_session::generation::{spawn_generation, GeminiQuestionGenerator, GenerationStatus};
use interview_session::media::{CapabilityError, SimulatedMediaSource};
use interview_session::settings::{load_settings, SessionSettings};
use interview_session::state_machine::{Event, Session};
use interview_session::{SessionHandle, UiState};

/// Speed-up applied to countdowns and uploads by `--fast`.
const FAST_FACTOR: u64 = 20;

#[derive(Parser, Debug)]
#[command(author, version, about = "Run a simulated candidate interview session")]
struct Args {
    /// Interview flow JSON file (defaults to the configured flow, then the sample flow)
    #[arg(short, long)]
    flow: Option<PathBuf>,

    /// Generate the questions for this job role instead of loading a flow
    #[arg(short, long, conflicts_with = "flow")]
    generate: Option<String>,

    /// Number of questions to generate
    #[arg(long, default_value_t = 3)]
    count: u32,

    /// Skip the year-of-birth check
    #[arg(long)]
    skip_identity: bool,

    /// Refuse camera/microphone access this many times before granting it
    #[arg(long, default_value_t = 0)]
    deny_devices: u32,

    /// Run countdowns and uploads faster than real time
    #[arg(long)]
    fast: bool,
}

async fn load_flow(args: &Args, settings: &SessionSettings) -> Result<InterviewFlow> {
    if let Some(role) = &args.generate {
        let generator = Arc::new(GeminiQuestionGenerator::from_env());
        let task = spawn_generation(generator, role.clone(), args.count);
        println!("Generating {} questions for '{}'...", args.count, role);

        let questions = match task.wait().await {
            GenerationStatus::Ready(questions) => questions,
            GenerationStatus::Failed(message) => bail!("Question generation failed: {}", message),
            GenerationStatus::Loading => bail!("Question generation did not finish"),
        };
        let flow = InterviewFlow {
            id: format!("flow-{}", Utc::now().timestamp_millis()),
            title: format!("{} Screening", role),
            job_role: role.clone(),
            questions,
        };
        flow.validate()
            .context("Generated questions do not form a usable flow")?;
        return Ok(flow);
    }

    match args.flow.as_ref().or(settings.flow_path.as_ref()) {
        Some(path) => InterviewFlow::load(path)
            .with_context(|| format!("Failed to load flow from {}", path.display())),
        None => Ok(InterviewFlow::sample()),
    }
}

/// What the scripted candidate does on each screen.
fn candidate_action(state: &UiState, flow: &InterviewFlow) -> Option<Event> {
    match state {
        UiState::Identity { error: None } => Some(Event::SubmitBirthYear {
            input: (Utc::now().year() - 25).to_string(),
            current_year: Utc::now().year(),
        }),
        UiState::CvUpload { error: None } => Some(Event::SubmitCv {
            file_name: "cv.pdf".to_string(),
            content_type: Some("application/pdf".to_string()),
        }),
        UiState::DeviceCheck {
            acquiring: false,
            media_live: false,
            ..
        } => Some(Event::RequestDevices),
        UiState::DeviceCheck {
            acquiring: false,
            media_live: true,
            ..
        } => Some(Event::ContinueToInstructions),
        UiState::Instructions { .. } => Some(Event::ConfirmInstructions),
        UiState::QuestionIntro { .. } => Some(Event::StartPrep),
        // Even-numbered questions are finished early, the rest run to the limit
        UiState::Recording {
            question_index,
            seconds_remaining,
            ..
        } if question_index % 2 == 1 => {
            let max = flow.question(*question_index)?.max_answer_seconds;
            (*seconds_remaining <= max / 2).then_some(Event::FinishAnswer)
        }
        _ => None,
    }
}

fn describe(state: &UiState) -> String {
    match state {
        UiState::Identity { error } => format!("Identity check {}", error.as_deref().unwrap_or("")),
        UiState::CvUpload { error } => format!("CV upload {}", error.as_deref().unwrap_or("")),
        UiState::DeviceCheck {
            acquiring,
            media_live,
            error,
        } => format!(
            "Device check (acquiring: {}, ready: {}) {}",
            acquiring,
            media_live,
            error.as_deref().unwrap_or("")
        ),
        UiState::Instructions {
            question_count,
            estimated_minutes,
        } => format!(
            "Instructions: {} questions ahead, about {} minutes",
            question_count, estimated_minutes
        ),
        UiState::QuestionIntro {
            question_index,
            question_count,
            text,
            video_url,
        } => format!(
            "Question {}/{}: {}{}",
            question_index + 1,
            question_count,
            text,
            if video_url.is_some() { " [video]" } else { "" }
        ),
        UiState::Prep {
            seconds_remaining, ..
        } => format!("  preparing... {}s", seconds_remaining),
        UiState::Recording {
            seconds_remaining, ..
        } => format!("  recording... {}s left", seconds_remaining),
        UiState::Finalizing { .. } => "  saving answer".to_string(),
        UiState::Upload { progress, .. } => format!("  uploading {:.0}%", progress),
        UiState::Finished {
            reference_code,
            recordings,
        } => format!(
            "Finished: {} answers submitted, reference {}",
            recordings, reference_code
        ),
        UiState::Abandoned { recordings } => {
            format!("Interview abandoned after {} answers", recordings)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (API keys for question generation)
    let _ = dotenvy::dotenv();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut settings = load_settings();
    if args.skip_identity {
        settings.requires_identity_gate = false;
    }
    if args.fast {
        settings.tick_ms = (settings.tick_ms / FAST_FACTOR).max(1);
        settings.upload.tick_ms = (settings.upload.tick_ms / FAST_FACTOR).max(1);
    }

    let flow = Arc::new(load_flow(&args, &settings).await?);
    println!("{} ({})", flow.title, flow.job_role);

    let source = Arc::new(SimulatedMediaSource::failing(
        args.deny_devices,
        CapabilityError::PermissionDenied,
    ));
    let runner = Arc::new(
        SessionEffectRunner::new(source.clone())
            .with_timer_period(settings.tick_period())
            .with_upload(settings.upload.clone(), None),
    );

    let session = Session::new(flow.clone(), settings.policy(), Utc::now());
    let handle = SessionHandle::spawn(session, runner);
    let mut ui = handle.subscribe();

    loop {
        let state = ui.borrow_and_update().clone();
        println!("{}", describe(&state));

        if matches!(state, UiState::Finished { .. } | UiState::Abandoned { .. }) {
            break;
        }
        if let Some(event) = candidate_action(&state, &flow) {
            handle.send(event)?;
        }
        if ui.changed().await.is_err() {
            break;
        }
    }

    let session = handle.join().await?;
    for recording in &session.recordings {
        println!(
            "  {} -> {} ({} bytes, {})",
            recording.question_id,
            recording.playback_ref,
            recording.size_bytes(),
            recording.mime_type
        );
    }
    log::info!(
        "Camera released: {} of {} tracks stopped",
        source.stopped_tracks(),
        source.acquisitions() * 2
    );
    Ok(())
}
