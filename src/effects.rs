//! Effect runner for the interview session
//!
//! This module executes effects produced by the state machine: media
//! acquisition, countdown timers, the answer recorder and simulated uploads.
//! Completion is reported back to the session loop as `Event`s.
//!
//! Timer and upload callbacks only post events. They never touch the runner
//! state, so cancelling under the runner lock cannot wait on a callback that
//! wants the same lock.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::media::{CapabilityError, MediaHandle, MediaSource, Recorder, RecorderError};
use crate::state_machine::{Effect, Event, TimerId, UploadId};
use crate::timer::{CountdownTimer, DEFAULT_TICK_PERIOD};
use crate::upload::{UploadConfig, UploadSimulator};

/// Trait for running effects asynchronously.
/// Completion events are sent back via the provided channel.
pub trait EffectRunner: Send + Sync + 'static {
    fn spawn(&self, effect: Effect, tx: mpsc::UnboundedSender<Event>);

    /// Stop everything still running. Called once when the session loop ends.
    fn shutdown(&self) {}
}

#[derive(Default)]
struct RunnerInner {
    media: Option<MediaHandle>,
    recorder: Recorder,
    timer: Option<(TimerId, CountdownTimer)>,
    upload: Option<(UploadId, UploadSimulator)>,
    capture: Option<CancellationToken>,
    /// Set by shutdown; late acquisitions are released immediately.
    closed: bool,
}

fn lock(inner: &Mutex<RunnerInner>) -> MutexGuard<'_, RunnerInner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Effect runner backed by a `MediaSource`.
pub struct SessionEffectRunner {
    source: Arc<dyn MediaSource>,
    inner: Arc<Mutex<RunnerInner>>,
    timer_period: Duration,
    upload_config: UploadConfig,
    upload_seed: Option<u64>,
}

impl SessionEffectRunner {
    pub fn new(source: Arc<dyn MediaSource>) -> Self {
        Self {
            source,
            inner: Arc::new(Mutex::new(RunnerInner::default())),
            timer_period: DEFAULT_TICK_PERIOD,
            upload_config: UploadConfig::default(),
            upload_seed: None,
        }
    }

    /// Length of one countdown "second". Shortened by the demo's fast mode.
    pub fn with_timer_period(mut self, period: Duration) -> Self {
        self.timer_period = period;
        self
    }

    pub fn with_upload(mut self, config: UploadConfig, seed: Option<u64>) -> Self {
        self.upload_config = config;
        self.upload_seed = seed;
        self
    }

    pub fn holds_media(&self) -> bool {
        lock(&self.inner).media.as_ref().is_some_and(MediaHandle::is_live)
    }

    pub fn has_pending_timer(&self) -> bool {
        lock(&self.inner)
            .timer
            .as_ref()
            .is_some_and(|(_, timer)| timer.is_running())
    }

    pub fn has_pending_upload(&self) -> bool {
        lock(&self.inner)
            .upload
            .as_ref()
            .is_some_and(|(_, upload)| upload.is_running())
    }

    fn capture_interval(&self) -> Duration {
        (self.timer_period / 4).max(Duration::from_millis(1))
    }
}

impl EffectRunner for SessionEffectRunner {
    fn spawn(&self, effect: Effect, tx: mpsc::UnboundedSender<Event>) {
        match effect {
            Effect::AcquireMedia => {
                let source = self.source.clone();
                let inner = self.inner.clone();

                tokio::spawn(async move {
                    // On real hardware this waits on the permission prompt
                    let result = tokio::task::spawn_blocking(move || source.acquire()).await;

                    let event = match result {
                        Ok(Ok(handle)) => {
                            let media = handle.id();
                            let mut guard = lock(&inner);
                            if guard.closed {
                                drop(guard);
                                log::info!(
                                    "Session closed during acquisition, releasing media {}",
                                    media
                                );
                                drop(handle);
                                return;
                            }
                            if let Some(mut previous) = guard.media.replace(handle) {
                                log::warn!("Replacing media {} still held", previous.id());
                                previous.release();
                            }
                            Event::MediaAcquired { media }
                        }
                        Ok(Err(err)) => {
                            log::warn!("Media acquisition failed: {}", err);
                            Event::MediaAcquireFailed { err }
                        }
                        Err(e) => {
                            log::error!("Media acquisition task failed: {}", e);
                            Event::MediaAcquireFailed {
                                err: CapabilityError::Other(e.to_string()),
                            }
                        }
                    };
                    let _ = tx.send(event);
                });
            }

            Effect::ReleaseMedia { media } => {
                let mut guard = lock(&self.inner);
                if !guard.media.as_ref().is_some_and(|h| h.id() == media) {
                    log::debug!("ReleaseMedia: media {} is not held", media);
                    return;
                }
                if let Some(token) = guard.capture.take() {
                    token.cancel();
                }
                if let Some(mut handle) = guard.media.take() {
                    handle.release();
                }
            }

            Effect::StartTimer {
                timer,
                purpose,
                seconds,
            } => {
                let mut countdown = CountdownTimer::with_period(self.timer_period);
                let tick_tx = tx.clone();
                countdown.start(
                    seconds,
                    move |remaining| {
                        let _ = tick_tx.send(Event::TimerTick { timer, remaining });
                    },
                    move || {
                        let _ = tx.send(Event::TimerExpired { timer });
                    },
                );
                log::debug!("{:?} timer {} started ({}s)", purpose, timer, seconds);

                let mut guard = lock(&self.inner);
                if let Some((previous, mut old)) = guard.timer.replace((timer, countdown)) {
                    if old.cancel() {
                        log::debug!("Timer {} superseded by {}", previous, timer);
                    }
                }
            }

            Effect::CancelTimer { timer } => {
                let mut guard = lock(&self.inner);
                match guard.timer.take() {
                    Some((id, mut countdown)) if id == timer => {
                        if countdown.cancel() {
                            log::debug!("Timer {} cancelled", timer);
                        }
                    }
                    other => guard.timer = other,
                }
            }

            Effect::StartRecorder {
                question_index,
                question_id,
            } => {
                let mut guard = lock(&self.inner);
                let RunnerInner {
                    media, recorder, ..
                } = &mut *guard;

                match recorder.start(media.as_ref(), &question_id) {
                    Ok(()) => {
                        let token = CancellationToken::new();
                        spawn_capture(self.inner.clone(), token.clone(), self.capture_interval());
                        if let Some(previous) = guard.capture.replace(token) {
                            previous.cancel();
                        }
                    }
                    Err(err) => {
                        drop(guard);
                        log::error!("Failed to start recorder for question {}: {}", question_id, err);
                        let _ = tx.send(Event::RecorderFailed {
                            question_index,
                            err,
                        });
                    }
                }
            }

            Effect::StopRecorder { question_index } => {
                let event = {
                    let mut guard = lock(&self.inner);
                    if let Some(token) = guard.capture.take() {
                        token.cancel();
                    }
                    let RunnerInner {
                        media, recorder, ..
                    } = &mut *guard;
                    if let Some(handle) = media.as_mut() {
                        recorder.capture(handle);
                    }
                    match recorder.stop() {
                        Some(recording) => Event::RecordingFinalized {
                            question_index,
                            recording,
                        },
                        None => Event::RecorderFailed {
                            question_index,
                            err: RecorderError::NoMediaSource,
                        },
                    }
                };
                let _ = tx.send(event);
            }

            Effect::DiscardRecorder => {
                let mut guard = lock(&self.inner);
                if let Some(token) = guard.capture.take() {
                    token.cancel();
                }
                guard.recorder.discard();
            }

            Effect::StartUpload {
                upload,
                question_id,
            } => {
                let mut simulator = match self.upload_seed {
                    Some(seed) => UploadSimulator::seeded(self.upload_config.clone(), seed),
                    None => UploadSimulator::new(self.upload_config.clone()),
                };
                let progress_tx = tx.clone();
                simulator.start(
                    move |progress| {
                        let _ = progress_tx.send(Event::UploadProgress { upload, progress });
                    },
                    move || {
                        let _ = tx.send(Event::UploadComplete { upload });
                    },
                );
                log::info!("Uploading answer to question {}", question_id);

                let mut guard = lock(&self.inner);
                if let Some((previous, mut old)) = guard.upload.replace((upload, simulator)) {
                    if old.cancel() {
                        log::warn!("Upload {} superseded by {}", previous, upload);
                    }
                }
            }

            Effect::CancelUpload { upload } => {
                let mut guard = lock(&self.inner);
                match guard.upload.take() {
                    Some((id, mut simulator)) if id == upload => {
                        if simulator.cancel() {
                            log::info!("Upload {} cancelled", upload);
                        }
                    }
                    other => guard.upload = other,
                }
            }

            Effect::EmitUi => {
                // Handled in the session loop, not here
                log::warn!("EmitUi reached the effect runner and was dropped");
            }
        }
    }

    fn shutdown(&self) {
        let mut guard = lock(&self.inner);
        guard.closed = true;
        if let Some(token) = guard.capture.take() {
            token.cancel();
        }
        if let Some((_, mut countdown)) = guard.timer.take() {
            countdown.cancel();
        }
        if let Some((_, mut simulator)) = guard.upload.take() {
            simulator.cancel();
        }
        guard.recorder.discard();
        if let Some(mut handle) = guard.media.take() {
            handle.release();
        }
        log::debug!("Effect runner shut down");
    }
}

/// Pull chunks from the live handle into the recorder until cancelled.
fn spawn_capture(inner: Arc<Mutex<RunnerInner>>, cancel: CancellationToken, every: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                _ = interval.tick() => {}
            }

            let captured = {
                let mut guard = lock(&inner);
                let RunnerInner {
                    media, recorder, ..
                } = &mut *guard;
                match media.as_mut() {
                    Some(handle) if recorder.is_active() => {
                        recorder.capture(handle);
                        true
                    }
                    _ => false,
                }
            };
            if !captured {
                log::trace!("Capture ticker stopping, recorder inactive");
                break;
            }
        }
    });
}
