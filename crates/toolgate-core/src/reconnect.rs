//! Reconnection controller (SPEC_FULL.md §4.A) — component A.
//!
//! A pure scheduler: it never performs I/O itself. Callers hand it a
//! `connect_fn` future factory and it decides *when* to invoke it, tracking
//! the state machine and retry counter along the way. Grounded on the
//! `InstanceState` shape in `mcpmux-gateway/src/pool/instance.rs` (which is
//! missing the `Reconnecting` state this spec requires) and the
//! `ConnectionEvent` broadcast-observer pattern from
//! `other_examples/.../reconnect/mod.rs`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::connection::{ConnectionState, StateTransition};

/// Backoff/retry configuration (SPEC_FULL.md §4.A, §4.F).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub max_attempts: u32,
    /// Additive jitter fraction in `[0, 1]`.
    pub jitter: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            max_attempts: 5,
            jitter: 0.1,
        }
    }
}

impl ReconnectConfig {
    /// `delay = min(initialDelay * multiplier^(attempt-1), maxDelay)`, attempt
    /// is 1-based (the first scheduled retry is attempt 1).
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exp = self.backoff_multiplier.powi((attempt.max(1) - 1) as i32);
        let millis = (self.initial_delay.as_millis() as f64) * exp;
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }

    /// Applies additive jitter uniform in `±jitter*delay`, clamped to >= 0.
    pub fn jittered_delay(&self, attempt: u32, rng: &mut impl Rng) -> Duration {
        let base = self.base_delay(attempt);
        if self.jitter <= 0.0 {
            return base;
        }
        let base_millis = base.as_millis() as f64;
        let span = base_millis * self.jitter;
        let offset = rng.gen_range(-span..=span);
        let jittered = (base_millis + offset).max(0.0);
        Duration::from_millis(jittered as u64)
    }
}

/// Observer callback invoked on every state transition.
pub type ReconnectObserver = Arc<dyn Fn(&StateTransition) + Send + Sync>;

type ConnectFn = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

struct Inner {
    state: ConnectionState,
    retry_count: u32,
    scheduled: Option<JoinHandle<()>>,
}

/// Per-upstream reconnection state machine. One instance per upstream
/// session; owns no transport, no socket — only the timer and counters.
pub struct ReconnectController {
    config: ReconnectConfig,
    inner: Mutex<Inner>,
    observers: Mutex<Vec<ReconnectObserver>>,
}

impl ReconnectController {
    pub fn new(config: ReconnectConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            inner: Mutex::new(Inner {
                state: ConnectionState::Disconnected,
                retry_count: 0,
                scheduled: None,
            }),
            observers: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &ReconnectConfig {
        &self.config
    }

    pub async fn state(&self) -> ConnectionState {
        self.inner.lock().await.state
    }

    pub async fn retry_count(&self) -> u32 {
        self.inner.lock().await.retry_count
    }

    pub async fn subscribe(&self, observer: ReconnectObserver) {
        self.observers.lock().await.push(observer);
    }

    async fn publish(&self, transition: StateTransition) {
        for observer in self.observers.lock().await.iter() {
            observer(&transition);
        }
    }

    /// Cancels any scheduled retry; transitions to `Connecting` (first
    /// attempt) or `Reconnecting` if a retry was already in flight.
    pub async fn on_connecting(self: &Arc<Self>) {
        let (from, to, retry_count) = {
            let mut guard = self.inner.lock().await;
            if let Some(handle) = guard.scheduled.take() {
                handle.abort();
            }
            let from = guard.state;
            let to = if guard.retry_count == 0 {
                ConnectionState::Connecting
            } else {
                ConnectionState::Reconnecting
            };
            guard.state = to;
            (from, to, guard.retry_count)
        };
        self.publish(StateTransition::new(from, to, retry_count)).await;
    }

    /// Resets the retry counter to 0 and transitions to `Connected`.
    pub async fn on_connected(self: &Arc<Self>) {
        let (from, retry_count) = {
            let mut guard = self.inner.lock().await;
            let from = guard.state;
            guard.state = ConnectionState::Connected;
            guard.retry_count = 0;
            (from, 0)
        };
        self.publish(StateTransition::new(from, ConnectionState::Connected, retry_count))
            .await;
    }

    /// Transitions to `Disconnected` unless the controller is already
    /// `Failed` (terminal until an explicit `reconnect`).
    pub async fn on_disconnected(self: &Arc<Self>, error: Option<String>) {
        let (from, to, retry_count) = {
            let mut guard = self.inner.lock().await;
            let from = guard.state;
            if from == ConnectionState::Failed {
                return;
            }
            guard.state = ConnectionState::Disconnected;
            (from, ConnectionState::Disconnected, guard.retry_count)
        };
        let mut transition = StateTransition::new(from, to, retry_count);
        if let Some(err) = error {
            transition = transition.with_error(err);
        }
        self.publish(transition).await;
    }

    /// Schedules `connect_fn` after a computed backoff delay. If retries are
    /// exhausted, transitions to `Failed` and does not schedule anything. If
    /// `connect_fn` itself errors, the caller is responsible for invoking
    /// `on_disconnected` again to trigger a further `schedule`.
    pub async fn schedule(self: &Arc<Self>, connect_fn: ConnectFn) {
        let (from, next_attempt) = {
            let guard = self.inner.lock().await;
            (guard.state, guard.retry_count + 1)
        };

        if next_attempt > self.config.max_attempts {
            let mut guard = self.inner.lock().await;
            guard.state = ConnectionState::Failed;
            drop(guard);
            self.publish(StateTransition::new(from, ConnectionState::Failed, next_attempt - 1))
                .await;
            return;
        }

        let mut rng = rand::thread_rng();
        let delay = self.config.jittered_delay(next_attempt, &mut rng);

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            connect_fn().await;
            let mut guard = this.inner.lock().await;
            guard.scheduled = None;
        });

        let mut guard = self.inner.lock().await;
        if let Some(old) = guard.scheduled.replace(handle) {
            old.abort();
        }
        guard.state = ConnectionState::Reconnecting;
        guard.retry_count = next_attempt;
        drop(guard);

        self.publish(
            StateTransition::new(from, ConnectionState::Reconnecting, next_attempt)
                .with_delay(delay),
        )
        .await;
    }

    /// Idempotent: cancels any scheduled retry without changing state.
    pub async fn cancel(self: &Arc<Self>) {
        let mut guard = self.inner.lock().await;
        if let Some(handle) = guard.scheduled.take() {
            handle.abort();
        }
    }

    /// Idempotent: cancels any scheduled retry and resets the retry counter.
    pub async fn reset(self: &Arc<Self>) {
        self.cancel().await;
        let mut guard = self.inner.lock().await;
        guard.retry_count = 0;
    }

    /// Idempotent: cancels any scheduled retry and drops all observers.
    pub async fn destroy(self: &Arc<Self>) {
        self.cancel().await;
        self.observers.lock().await.clear();
    }
}

/// Builds a boxed, `Send` future-returning closure suitable for `schedule`.
pub fn connect_fn<F, Fut>(f: F) -> ConnectFn
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move || Box::pin(f()) as Pin<Box<dyn Future<Output = ()> + Send>>)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn base_delay_follows_exponential_backoff() {
        let config = ReconnectConfig {
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            backoff_multiplier: 2.0,
            max_attempts: 5,
            jitter: 0.0,
        };
        assert_eq!(config.base_delay(1), Duration::from_millis(1000));
        assert_eq!(config.base_delay(2), Duration::from_millis(2000));
        assert_eq!(config.base_delay(3), Duration::from_millis(4000));
    }

    #[test]
    fn base_delay_caps_at_max_delay() {
        let config = ReconnectConfig {
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(3000),
            backoff_multiplier: 2.0,
            max_attempts: 10,
            jitter: 0.0,
        };
        assert_eq!(config.base_delay(5), Duration::from_millis(3000));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let config = ReconnectConfig {
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            backoff_multiplier: 2.0,
            max_attempts: 5,
            jitter: 0.2,
        };
        let base = config.base_delay(2).as_millis() as f64;
        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            let d = config.jittered_delay(2, &mut rng).as_millis() as f64;
            assert!(d >= base * 0.8 - 1.0);
            assert!(d <= base * 1.2 + 1.0);
        }
    }

    #[tokio::test]
    async fn on_connected_resets_retry_count() {
        let controller = ReconnectController::new(ReconnectConfig::default());
        controller.on_connecting().await;
        {
            let mut guard = controller.inner.lock().await;
            guard.retry_count = 3;
        }
        controller.on_connected().await;
        assert_eq!(controller.retry_count().await, 0);
        assert_eq!(controller.state().await, ConnectionState::Connected);
    }

    #[tokio::test]
    async fn schedule_transitions_to_failed_after_max_attempts() {
        let config = ReconnectConfig {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
            max_attempts: 2,
            jitter: 0.0,
        };
        let controller = ReconnectController::new(config);
        let calls = Arc::new(AtomicU32::new(0));

        for _ in 0..2 {
            let calls = Arc::clone(&calls);
            controller
                .schedule(connect_fn(move || {
                    let calls = Arc::clone(&calls);
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                    }
                }))
                .await;
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(controller.state().await, ConnectionState::Reconnecting);

        // third attempt exceeds max_attempts = 2
        controller
            .schedule(connect_fn(|| async {}))
            .await;
        assert_eq!(controller.state().await, ConnectionState::Failed);
    }

    #[tokio::test]
    async fn disconnected_is_noop_once_failed() {
        let config = ReconnectConfig {
            max_attempts: 0,
            ..ReconnectConfig::default()
        };
        let controller = ReconnectController::new(config);
        controller.schedule(connect_fn(|| async {})).await;
        assert_eq!(controller.state().await, ConnectionState::Failed);
        controller.on_disconnected(Some("boom".into())).await;
        assert_eq!(controller.state().await, ConnectionState::Failed);
    }

    #[tokio::test]
    async fn cancel_and_reset_are_idempotent() {
        let controller = ReconnectController::new(ReconnectConfig::default());
        controller.cancel().await;
        controller.cancel().await;
        controller.reset().await;
        controller.reset().await;
        controller.destroy().await;
        controller.destroy().await;
    }
}
