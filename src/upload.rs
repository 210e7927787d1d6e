//! Simulated answer upload
//!
//! Real uploads are not part of the session core. The simulator reproduces
//! the progress behaviour the candidate sees: randomized increments at a
//! fixed interval until exactly 100%.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::timer::ScheduledRun;

pub const COMPLETE: f32 = 100.0;

/// Smallest accepted increment. Well above the float spacing near 100, so
/// every step moves the value.
const MIN_INCREMENT: f32 = 0.1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Interval between progress updates, in milliseconds.
    pub tick_ms: u64,
    /// Smallest increment per tick (percent). Raised to 0.1 if lower.
    pub min_increment: f32,
    /// Exclusive upper bound of the increment per tick (percent).
    pub max_increment: f32,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            tick_ms: 200,
            min_increment: 2.0,
            max_increment: 10.0,
        }
    }
}

impl UploadConfig {
    /// Clamp nonsensical bounds so progress always terminates.
    fn normalized(&self) -> Self {
        let min_increment = if self.min_increment > 0.0 {
            self.min_increment.clamp(MIN_INCREMENT, COMPLETE)
        } else {
            UploadConfig::default().min_increment
        };
        let max_increment = self.max_increment.clamp(min_increment, COMPLETE);
        Self {
            tick_ms: self.tick_ms.max(1),
            min_increment,
            max_increment,
        }
    }

    /// Upper bound on the number of steps before reaching 100%.
    /// One extra step covers float rounding in the running sum.
    pub fn max_steps(&self) -> u32 {
        (COMPLETE / self.normalized().min_increment).ceil() as u32 + 1
    }
}

/// Pure progress stepper: strictly increasing, ends at exactly 100.
pub struct UploadProgress {
    value: f32,
    config: UploadConfig,
    rng: StdRng,
}

impl UploadProgress {
    pub fn new(config: &UploadConfig, rng: StdRng) -> Self {
        Self {
            value: 0.0,
            config: config.normalized(),
            rng,
        }
    }

    pub fn value(&self) -> f32 {
        self.value
    }

    pub fn is_complete(&self) -> bool {
        self.value >= COMPLETE
    }

    /// Next progress value, or `None` once complete.
    pub fn step(&mut self) -> Option<f32> {
        if self.is_complete() {
            return None;
        }
        let increment = if self.config.max_increment > self.config.min_increment {
            self.rng
                .gen_range(self.config.min_increment..self.config.max_increment)
        } else {
            self.config.min_increment
        };
        let next = (self.value + increment).max(self.value + MIN_INCREMENT);
        self.value = if next >= COMPLETE { COMPLETE } else { next };
        Some(self.value)
    }
}

/// Drives an `UploadProgress` from a tokio task.
pub struct UploadSimulator {
    config: UploadConfig,
    seed: Option<u64>,
    run: Option<ScheduledRun>,
}

impl UploadSimulator {
    pub fn new(config: UploadConfig) -> Self {
        Self {
            config,
            seed: None,
            run: None,
        }
    }

    /// Use a fixed RNG seed (tests, reproducible demos).
    pub fn seeded(config: UploadConfig, seed: u64) -> Self {
        Self {
            config,
            seed: Some(seed),
            run: None,
        }
    }

    /// Start a simulated upload.
    ///
    /// `on_progress` receives each new value (the last one is 100);
    /// `on_complete` fires once afterwards. A running upload is cancelled
    /// first.
    pub fn start<P, C>(&mut self, mut on_progress: P, on_complete: C)
    where
        P: FnMut(f32) + Send + 'static,
        C: FnOnce() + Send + 'static,
    {
        self.cancel();

        let rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut progress = UploadProgress::new(&self.config, rng);
        let period = Duration::from_millis(self.config.normalized().tick_ms);

        self.run = Some(ScheduledRun::spawn(move |cancel, gate| async move {
            let mut interval =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => {
                        log::debug!("Upload cancelled at {:.0}%", progress.value());
                        return;
                    }

                    _ = interval.tick() => {}
                }

                let Some(value) = progress.step() else {
                    return;
                };
                if value >= COMPLETE {
                    gate.run_last(|| {
                        on_progress(value);
                        on_complete();
                    });
                    log::debug!("Upload complete");
                    return;
                }
                if !gate.run(|| on_progress(value)) {
                    return;
                }
            }
        }));
    }

    pub fn cancel(&mut self) -> bool {
        match self.run.take() {
            Some(run) => {
                let was_running = !run.is_finished();
                run.stop();
                was_running
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.run.as_ref().is_some_and(|run| !run.is_finished())
    }
}

impl Drop for UploadSimulator {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[test]
    fn progress_is_strictly_increasing_and_ends_at_100() {
        for seed in 0..20 {
            let config = UploadConfig::default();
            let mut progress = UploadProgress::new(&config, StdRng::seed_from_u64(seed));
            let mut values = Vec::new();
            while let Some(v) = progress.step() {
                values.push(v);
            }

            assert!(values.windows(2).all(|w| w[0] < w[1]), "seed {}", seed);
            assert_eq!(values.last().copied(), Some(COMPLETE));
            assert!(values.len() as u32 <= config.max_steps());
            assert!(progress.step().is_none());
        }
    }

    #[test]
    fn degenerate_bounds_still_terminate() {
        let config = UploadConfig {
            tick_ms: 0,
            min_increment: 0.0,
            max_increment: 0.0,
        };
        let mut progress = UploadProgress::new(&config, StdRng::seed_from_u64(1));
        let mut steps = 0;
        while progress.step().is_some() {
            steps += 1;
            assert!(steps <= config.max_steps());
        }
        assert!(progress.is_complete());
    }

    #[test]
    fn tiny_increments_still_reach_complete() {
        let config = UploadConfig {
            tick_ms: 1,
            min_increment: 1e-6,
            max_increment: 1e-6,
        };
        assert!(config.max_steps() <= 1001);

        let mut progress = UploadProgress::new(&config, StdRng::seed_from_u64(1));
        let mut previous = progress.value();
        let mut steps = 0;
        while let Some(value) = progress.step() {
            assert!(value > previous, "stalled at {}", previous);
            previous = value;
            steps += 1;
            assert!(steps <= config.max_steps());
        }
        assert_eq!(progress.value(), COMPLETE);
    }

    #[test]
    fn unbounded_max_increment_is_clamped() {
        let config = UploadConfig {
            tick_ms: 1,
            min_increment: 5.0,
            max_increment: f32::INFINITY,
        };
        let mut progress = UploadProgress::new(&config, StdRng::seed_from_u64(3));
        let mut steps = 0;
        while progress.step().is_some() {
            steps += 1;
            assert!(steps <= config.max_steps());
        }
        assert_eq!(progress.value(), COMPLETE);
    }

    #[tokio::test(start_paused = true)]
    async fn completes_exactly_once() {
        let values = Arc::new(Mutex::new(Vec::new()));
        let completions = Arc::new(AtomicUsize::new(0));
        let mut upload = UploadSimulator::seeded(UploadConfig::default(), 7);

        let v = values.clone();
        let c = completions.clone();
        upload.start(
            move |p| v.lock().unwrap().push(p),
            move || {
                c.fetch_add(1, Ordering::SeqCst);
            },
        );

        tokio::time::sleep(Duration::from_secs(30)).await;

        let values = values.lock().unwrap().clone();
        assert_eq!(values.last().copied(), Some(COMPLETE));
        assert!(values.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(completions.load(Ordering::SeqCst), 1);
        assert!(!upload.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_upload_never_completes() {
        let completions = Arc::new(AtomicUsize::new(0));
        let mut upload = UploadSimulator::seeded(UploadConfig::default(), 3);

        let c = completions.clone();
        upload.start(
            |_| {},
            move || {
                c.fetch_add(1, Ordering::SeqCst);
            },
        );
        tokio::time::sleep(Duration::from_millis(450)).await;
        assert!(upload.cancel());
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(completions.load(Ordering::SeqCst), 0);
    }
}
