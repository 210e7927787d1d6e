//! One-second countdown timers for the prep and max-answer phases
//!
//! `Countdown` is the pure counter; `CountdownTimer` drives it from a tokio
//! task and reports through callbacks. The session effect runner turns those
//! callbacks into `Event::TimerTick` / `Event::TimerExpired`.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_TICK_PERIOD: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownStep {
    Tick(u32),
    Expired,
}

/// Pure seconds counter. Yields `Expired` exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Countdown {
    remaining: u32,
    expired: bool,
}

impl Countdown {
    pub fn new(seconds: u32) -> Self {
        Self {
            remaining: seconds,
            expired: false,
        }
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn is_expired(&self) -> bool {
        self.expired
    }

    /// Advance by one tick. `None` once expired.
    pub fn tick(&mut self) -> Option<CountdownStep> {
        if self.expired {
            return None;
        }
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            self.expired = true;
            Some(CountdownStep::Expired)
        } else {
            Some(CountdownStep::Tick(self.remaining))
        }
    }
}

/// Serializes callbacks against `close()`: once `close()` returns, no
/// callback guarded by this gate runs again.
#[derive(Clone)]
pub(crate) struct CallbackGate(Arc<Mutex<bool>>);

impl CallbackGate {
    pub(crate) fn new() -> Self {
        Self(Arc::new(Mutex::new(true)))
    }

    /// Run `f` if the gate is still open. Returns whether it ran.
    pub(crate) fn run(&self, f: impl FnOnce()) -> bool {
        let open = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if *open {
            f();
        }
        *open
    }

    /// Run `f` and close the gate in the same critical section.
    pub(crate) fn run_last(&self, f: impl FnOnce()) -> bool {
        let mut open = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if !*open {
            return false;
        }
        f();
        *open = false;
        true
    }

    pub(crate) fn close(&self) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = false;
    }
}

/// A spawned, cancellable callback task (countdown or upload ticker).
pub(crate) struct ScheduledRun {
    cancel: CancellationToken,
    gate: CallbackGate,
    task: JoinHandle<()>,
}

impl ScheduledRun {
    pub(crate) fn spawn<F, Fut>(body: F) -> Self
    where
        F: FnOnce(CancellationToken, CallbackGate) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let gate = CallbackGate::new();
        let task = tokio::spawn(body(cancel.clone(), gate.clone()));
        Self { cancel, gate, task }
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub(crate) fn stop(self) {
        self.cancel.cancel();
        self.gate.close();
    }
}

/// Countdown that ticks once per period and expires when it reaches zero.
///
/// Callbacks run on a tokio task and must not call back into this timer.
pub struct CountdownTimer {
    period: Duration,
    run: Option<ScheduledRun>,
}

impl CountdownTimer {
    pub fn new() -> Self {
        Self::with_period(DEFAULT_TICK_PERIOD)
    }

    pub fn with_period(period: Duration) -> Self {
        Self { period, run: None }
    }

    /// Start counting down from `seconds`.
    ///
    /// `on_tick(remaining)` fires after every period, including the final
    /// `0`; `on_expire()` fires once right after it. A running countdown is
    /// cancelled first. With `seconds == 0` the timer expires immediately
    /// without ticking.
    pub fn start<T, E>(&mut self, seconds: u32, on_tick: T, on_expire: E)
    where
        T: FnMut(u32) + Send + 'static,
        E: FnOnce() + Send + 'static,
    {
        if self.cancel() {
            log::debug!("Countdown restarted, previous run cancelled");
        }
        let period = self.period;
        self.run = Some(ScheduledRun::spawn(move |cancel, gate| {
            run_countdown(seconds, period, cancel, gate, on_tick, on_expire)
        }));
    }

    /// Cancel a pending countdown. Returns whether one was running.
    ///
    /// After this returns `on_tick`/`on_expire` are never invoked for the
    /// cancelled run.
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

impl Default for CountdownTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CountdownTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn run_countdown<T, E>(
    seconds: u32,
    period: Duration,
    cancel: CancellationToken,
    gate: CallbackGate,
    mut on_tick: T,
    on_expire: E,
) where
    T: FnMut(u32) + Send + 'static,
    E: FnOnce() + Send + 'static,
{
    let mut countdown = Countdown::new(seconds);

    if seconds > 0 {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    log::trace!("Countdown cancelled at {}s", countdown.remaining());
                    return;
                }

                _ = interval.tick() => {}
            }

            match countdown.tick() {
                Some(CountdownStep::Tick(remaining)) => {
                    if !gate.run(|| on_tick(remaining)) {
                        return;
                    }
                }
                Some(CountdownStep::Expired) | None => break,
            }
        }
    }

    let fired = gate.run_last(|| {
        if seconds > 0 {
            on_tick(0);
        }
        on_expire();
    });
    if fired {
        log::debug!("Countdown of {}s expired", seconds);
    }
}
