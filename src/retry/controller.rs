//! Countdown-based auto-retry around a fallible async action.
//!
//! A failed attempt is classified by [`RetryPolicy::classify`]; retryable
//! failures below the ceiling start a countdown that ticks once per second
//! and re-invokes the action when it reaches zero. The controller keeps at
//! most one countdown alive, and `is_counting_down` in the published
//! [`RetryState`] is true exactly while that countdown exists.

use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::policy::{FailureKind, RetryPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryPhase {
    #[default]
    Idle,
    /// An attempt is in flight.
    Running,
    CountingDown,
    Succeeded,
    /// The retry ceiling was reached; needs a manual `run` or `cancel`.
    Exhausted,
    /// The last failure was classified as not retryable.
    Terminal,
}

/// Observable retry status for one call site.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RetryState {
    /// Automatic retries performed since the last manual run.
    pub attempt: u32,
    pub countdown_remaining: u32,
    pub is_counting_down: bool,
    pub last_error: Option<String>,
    pub phase: RetryPhase,
}

impl RetryState {
    pub fn max_attempts_reached(&self) -> bool {
        self.phase == RetryPhase::Exhausted
    }
}

type Action<I, T> = Box<dyn Fn(I) -> BoxFuture<'static, Result<T, String>> + Send + Sync>;

struct Countdown {
    token: CancellationToken,
    _task: JoinHandle<()>,
}

impl Drop for Countdown {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

struct Inner<I> {
    input: I,
    countdown: Option<Countdown>,
    // Bumped by run/cancel/dispose; attempt results from older values are dropped.
    generation: u64,
    disposed: bool,
}

struct Shared<I, T> {
    policy: RetryPolicy,
    action: Action<I, T>,
    state: watch::Sender<RetryState>,
    output: watch::Sender<Option<T>>,
    inner: Mutex<Inner<I>>,
}

pub struct RetryController<I, T> {
    shared: Arc<Shared<I, T>>,
}

impl<I, T> Clone for RetryController<I, T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<I, T> RetryController<I, T>
where
    I: Clone + Send + 'static,
    T: Clone + Send + Sync + 'static,
{
    /// `action` receives a clone of the current input on every attempt, so
    /// retries always use the latest value passed to [`set_input`](Self::set_input).
    pub fn new<F, Fut, E>(policy: RetryPolicy, input: I, action: F) -> Self
    where
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Display + 'static,
    {
        let action: Action<I, T> = Box::new(move |input| {
            let fut = action(input);
            async move { fut.await.map_err(|e| e.to_string()) }.boxed()
        });
        let (state, _) = watch::channel(RetryState::default());
        let (output, _) = watch::channel(None);

        Self {
            shared: Arc::new(Shared {
                policy,
                action,
                state,
                output,
                inner: Mutex::new(Inner {
                    input,
                    countdown: None,
                    generation: 0,
                    disposed: false,
                }),
            }),
        }
    }

    /// User-initiated attempt. Clears any countdown and resets the attempt
    /// counter before invoking the action.
    pub async fn run(&self) {
        let generation = {
            let mut inner = self.shared.lock();
            if inner.disposed {
                warn!("run called on a disposed retry controller");
                return;
            }
            inner.countdown = None;
            inner.generation += 1;
            self.shared.state.send_replace(RetryState {
                phase: RetryPhase::Running,
                ..RetryState::default()
            });
            inner.generation
        };
        self.shared.attempt(generation).await;
    }

    /// Replace the action's input. An active countdown is cancelled and the
    /// displayed error cleared, since the user is correcting the input.
    pub fn set_input(&self, input: I) {
        let mut inner = self.shared.lock();
        inner.input = input;
        if inner.countdown.take().is_some() {
            debug!("input changed during countdown, retry cancelled");
            self.shared.state.send_modify(|s| {
                s.is_counting_down = false;
                s.countdown_remaining = 0;
                s.last_error = None;
                s.phase = RetryPhase::Idle;
            });
        }
    }

    /// Return to the ground state: no timer, attempt 0, no error.
    pub fn cancel(&self) {
        let mut inner = self.shared.lock();
        inner.countdown = None;
        inner.generation += 1;
        self.shared.state.send_replace(RetryState::default());
    }

    /// Tear down. Any live countdown is stopped and later calls are ignored.
    pub fn dispose(&self) {
        let mut inner = self.shared.lock();
        inner.countdown = None;
        inner.generation += 1;
        inner.disposed = true;
        self.shared.state.send_modify(|s| {
            s.is_counting_down = false;
            s.countdown_remaining = 0;
        });
    }

    pub fn state(&self) -> RetryState {
        self.shared.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<RetryState> {
        self.shared.state.subscribe()
    }

    /// Latest successful output, replaced on every success.
    pub fn outputs(&self) -> watch::Receiver<Option<T>> {
        self.shared.output.subscribe()
    }

    pub fn input(&self) -> I {
        self.shared.lock().input.clone()
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.shared.policy
    }
}

impl<I, T> Shared<I, T>
where
    I: Clone + Send + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn lock(&self) -> MutexGuard<'_, Inner<I>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn attempt(self: &Arc<Self>, generation: u64) {
        let input = {
            let inner = self.lock();
            if inner.generation != generation {
                return;
            }
            inner.input.clone()
        };
        let attempt = self.state.borrow().attempt;
        debug!(attempt, "invoking action");

        let result = (self.action)(input).await;

        let mut inner = self.lock();
        if inner.generation != generation || inner.disposed {
            debug!(attempt, "discarding result of a superseded attempt");
            return;
        }

        match result {
            Ok(value) => {
                info!(attempt, "action succeeded");
                self.state.send_modify(|s| {
                    s.phase = RetryPhase::Succeeded;
                    s.last_error = None;
                });
                self.output.send_replace(Some(value));
            }
            Err(detail) => match self.policy.classify(&detail) {
                FailureKind::Terminal => {
                    warn!(attempt, error = %detail, "non-retryable failure");
                    self.state.send_modify(|s| {
                        s.phase = RetryPhase::Terminal;
                        s.last_error = Some(detail);
                    });
                }
                FailureKind::Retryable if self.policy.allows_retry(attempt) => {
                    info!(
                        attempt,
                        secs = self.policy.countdown_secs,
                        error = %detail,
                        "retrying after countdown"
                    );
                    self.state.send_modify(|s| s.last_error = Some(detail));
                    self.start_countdown(&mut inner, generation);
                }
                FailureKind::Retryable => {
                    warn!(attempt, error = %detail, "max attempts reached");
                    self.state.send_modify(|s| {
                        s.phase = RetryPhase::Exhausted;
                        s.last_error = Some(detail);
                    });
                }
            },
        }
    }

    fn start_countdown(self: &Arc<Self>, inner: &mut Inner<I>, generation: u64) {
        inner.countdown = None;

        let secs = self.policy.countdown_secs;
        self.state.send_modify(|s| {
            s.phase = RetryPhase::CountingDown;
            s.is_counting_down = true;
            s.countdown_remaining = secs;
        });

        let token = CancellationToken::new();
        let first_tick = Instant::now() + RetryPolicy::TICK;
        let task = tokio::spawn(countdown(
            Arc::downgrade(self),
            token.clone(),
            generation,
            first_tick,
        ));
        inner.countdown = Some(Countdown { token, _task: task });
    }
}

async fn countdown<I, T>(
    shared: Weak<Shared<I, T>>,
    token: CancellationToken,
    generation: u64,
    first_tick: Instant,
) where
    I: Clone + Send + 'static,
    T: Clone + Send + Sync + 'static,
{
    let mut ticker = interval_at(first_tick, RetryPolicy::TICK);
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let Some(strong) = shared.upgrade() else {
            return;
        };

        let expired = {
            let mut inner = strong.lock();
            if token.is_cancelled() || inner.generation != generation {
                return;
            }
            let mut expired = false;
            strong.state.send_modify(|s| {
                s.countdown_remaining = s.countdown_remaining.saturating_sub(1);
                if s.countdown_remaining == 0 {
                    expired = true;
                    s.is_counting_down = false;
                    s.attempt += 1;
                    s.phase = RetryPhase::Running;
                }
            });
            if expired {
                inner.countdown = None;
            }
            expired
        };

        if expired {
            strong.attempt(generation).await;
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use tokio::time::sleep;

    use super::*;

    const RETRYABLE: &str = "API error (status 500): upstream timeout";

    fn failing(calls: Arc<AtomicU32>, detail: &'static str) -> RetryController<String, String> {
        RetryController::new(
            RetryPolicy::default(),
            "sk-first".to_string(),
            move |_input: String| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<String, String>(detail.to_string())
                }
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn retryable_failure_counts_down_each_second_then_reinvokes() {
        let calls = Arc::new(AtomicU32::new(0));
        let ctl = failing(calls.clone(), RETRYABLE);

        ctl.run().await;
        let s = ctl.state();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(s.phase, RetryPhase::CountingDown);
        assert!(s.is_counting_down);
        assert_eq!(s.countdown_remaining, 10);
        assert_eq!(s.attempt, 0);
        assert_eq!(s.last_error.as_deref(), Some(RETRYABLE));

        sleep(Duration::from_millis(500)).await;
        for expected in (1..10).rev() {
            sleep(Duration::from_secs(1)).await;
            assert_eq!(ctl.state().countdown_remaining, expected);
            assert_eq!(calls.load(Ordering::SeqCst), 1);
        }

        sleep(Duration::from_secs(1)).await;
        let s = ctl.state();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(s.attempt, 1);
        assert!(s.is_counting_down);
        assert_eq!(s.countdown_remaining, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_after_ceiling() {
        let calls = Arc::new(AtomicU32::new(0));
        let ctl = failing(calls.clone(), RETRYABLE);

        ctl.run().await;
        sleep(Duration::from_secs(60)).await;

        let s = ctl.state();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(s.attempt, 2);
        assert!(!s.is_counting_down);
        assert!(s.max_attempts_reached());
        assert_eq!(s.last_error.as_deref(), Some(RETRYABLE));

        sleep(Duration::from_secs(60)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn ceiling_follows_two_full_countdowns() {
        let calls = Arc::new(AtomicU32::new(0));
        let ctl = failing(calls.clone(), RETRYABLE);
        let mut rx = ctl.subscribe();

        // (attempt, remaining) for every countdown state published.
        let observer = tokio::spawn(async move {
            let mut seen: Vec<(u32, u32)> = Vec::new();
            loop {
                let s = rx.borrow_and_update().clone();
                let tick = (s.attempt, s.countdown_remaining);
                if s.phase == RetryPhase::CountingDown && seen.last() != Some(&tick) {
                    seen.push(tick);
                }
                if s.phase == RetryPhase::Exhausted || rx.changed().await.is_err() {
                    return seen;
                }
            }
        });

        ctl.run().await;
        let seen = observer.await.unwrap();

        let starts = seen.iter().filter(|(_, remaining)| *remaining == 10).count();
        assert_eq!(starts, 2);
        let full: Vec<u32> = (1..=10).rev().collect();
        for attempt in 0..2 {
            let ticks: Vec<u32> = seen
                .iter()
                .filter(|(a, _)| *a == attempt)
                .map(|(_, remaining)| *remaining)
                .collect();
            assert_eq!(ticks, full);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(ctl.state().max_attempts_reached());
    }

    #[tokio::test(start_paused = true)]
    async fn manual_run_after_exhaustion_starts_over() {
        let calls = Arc::new(AtomicU32::new(0));
        let ctl = failing(calls.clone(), RETRYABLE);

        ctl.run().await;
        sleep(Duration::from_secs(60)).await;
        assert!(ctl.state().max_attempts_reached());

        ctl.run().await;
        let s = ctl.state();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(s.attempt, 0);
        assert!(s.is_counting_down);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_failure_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let ctl = failing(
            calls.clone(),
            "Backend server not reachable: connection refused",
        );

        ctl.run().await;
        let s = ctl.state();
        assert_eq!(s.phase, RetryPhase::Terminal);
        assert!(!s.is_counting_down);

        sleep(Duration::from_secs(30)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn input_edit_cancels_countdown_and_clears_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let ctl = failing(calls.clone(), RETRYABLE);

        ctl.run().await;
        sleep(Duration::from_millis(3500)).await;
        assert_eq!(ctl.state().countdown_remaining, 7);

        ctl.set_input("sk-corrected".to_string());
        let s = ctl.state();
        assert!(!s.is_counting_down);
        assert_eq!(s.countdown_remaining, 0);
        assert!(s.last_error.is_none());
        assert_eq!(ctl.input(), "sk-corrected");

        sleep(Duration::from_secs(30)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn input_edit_without_countdown_keeps_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let ctl = failing(calls.clone(), "Backend server not reachable");

        ctl.run().await;
        ctl.set_input("sk-other".to_string());
        assert_eq!(
            ctl.state().last_error.as_deref(),
            Some("Backend server not reachable")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_returns_to_ground_state() {
        let calls = Arc::new(AtomicU32::new(0));
        let ctl = failing(calls.clone(), RETRYABLE);

        ctl.run().await;
        sleep(Duration::from_millis(2500)).await;
        ctl.cancel();
        assert_eq!(ctl.state(), RetryState::default());

        sleep(Duration::from_secs(30)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dispose_clears_live_timer() {
        let calls = Arc::new(AtomicU32::new(0));
        let ctl = failing(calls.clone(), RETRYABLE);

        ctl.run().await;
        ctl.dispose();
        assert!(!ctl.state().is_counting_down);

        sleep(Duration::from_secs(30)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        ctl.run().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn second_run_replaces_countdown() {
        let calls = Arc::new(AtomicU32::new(0));
        let ctl = failing(calls.clone(), RETRYABLE);

        ctl.run().await;
        sleep(Duration::from_millis(4500)).await;
        ctl.run().await;
        assert_eq!(ctl.state().countdown_remaining, 10);

        // Only the second countdown fires.
        sleep(Duration::from_millis(10_500)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn success_after_retry_publishes_output() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let ctl = RetryController::new(
            RetryPolicy::default(),
            "sk-key".to_string(),
            move |input: String| {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(RETRYABLE.to_string())
                    } else {
                        Ok(format!("saved {input}"))
                    }
                }
            },
        );
        let outputs = ctl.outputs();

        ctl.run().await;
        assert!(outputs.borrow().is_none());

        sleep(Duration::from_millis(10_500)).await;
        let s = ctl.state();
        assert_eq!(s.phase, RetryPhase::Succeeded);
        assert_eq!(s.attempt, 1);
        assert!(s.last_error.is_none());
        assert_eq!(outputs.borrow().as_deref(), Some("saved sk-key"));
    }
}
