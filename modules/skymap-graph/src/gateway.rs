use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, warn};

use skymap_common::{Result, SkymapError};

/// Throttle and retry tunables. Defaults are conservative enough for the
/// public AppView's documented limits.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Requests allowed inside one sliding window.
    pub max_requests: usize,
    /// Sliding window length.
    pub window: Duration,
    /// Forced minimum delay between requests on the same gateway.
    pub min_delay: Duration,
    /// Absolute minimum spacing between dispatched calls. Second, coarser
    /// safety layer, independent of the window throttle.
    pub min_spacing: Duration,
    /// Max calls in flight at once.
    pub max_concurrency: usize,
    /// Rate-limit retries before the error surfaces.
    pub max_retries: u32,
    /// Backoff base for provider throttling.
    pub min_wait: Duration,
    pub backoff_factor: f64,
    pub max_backoff: Duration,
    /// Upper bound on random jitter added to every sleep. Zero disables
    /// jitter (used by deterministic tests).
    pub jitter_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_requests: 40,
            window: Duration::from_secs(60),
            min_delay: Duration::from_millis(200),
            min_spacing: Duration::from_millis(100),
            max_concurrency: 2,
            max_retries: 3,
            min_wait: Duration::from_secs(1),
            backoff_factor: 2.0,
            max_backoff: Duration::from_secs(60),
            jitter_ms: 250,
        }
    }
}

/// Serializes and throttles all outbound calls to the graph data provider.
/// Every provider call in the system funnels through one shared gateway;
/// it is safe for concurrent callers.
pub struct FetchGateway {
    config: GatewayConfig,
    permits: Semaphore,
    /// Dispatch timestamps inside the sliding window, oldest first.
    window: Mutex<VecDeque<Instant>>,
    last_dispatch: Mutex<Option<Instant>>,
    consecutive_errors: AtomicU32,
}

impl FetchGateway {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            permits: Semaphore::new(config.max_concurrency.max(1)),
            window: Mutex::new(VecDeque::new()),
            last_dispatch: Mutex::new(None),
            consecutive_errors: AtomicU32::new(0),
            config,
        }
    }

    /// Run one provider call under the gateway's throttle and retry policy.
    /// The closure is re-invoked on provider throttling, up to
    /// `max_retries` times; any other error surfaces immediately.
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: Fn() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
        T: Send,
    {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| SkymapError::Transport("fetch gateway closed".to_string()))?;

        let mut attempt = 0u32;
        loop {
            self.throttle().await;

            match op().await {
                Ok(value) => {
                    self.consecutive_errors.store(0, Ordering::Relaxed);
                    return Ok(value);
                }
                Err(err) if err.is_rate_limited() => {
                    let consecutive =
                        self.consecutive_errors.fetch_add(1, Ordering::Relaxed);
                    attempt += 1;
                    if attempt > self.config.max_retries {
                        warn!(attempts = attempt, "Provider throttling persisted, giving up");
                        return Err(err);
                    }
                    let delay = self.rate_limit_backoff(consecutive, err.retry_after());
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Provider rate limited, retrying after backoff"
                    );
                    tokio::time::sleep(delay + self.jitter()).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Block until the sliding window and spacing rules admit a request,
    /// then record the dispatch.
    async fn throttle(&self) {
        loop {
            let wait = {
                let now = Instant::now();
                let mut window = self.window.lock().expect("gateway window lock poisoned");
                while let Some(front) = window.front() {
                    if now.duration_since(*front) >= self.config.window {
                        window.pop_front();
                    } else {
                        break;
                    }
                }

                let window_backoff = if window.len() >= self.config.max_requests {
                    window
                        .front()
                        .map(|front| self.config.window.saturating_sub(now.duration_since(*front)))
                        .unwrap_or(Duration::ZERO)
                } else {
                    Duration::ZERO
                };

                let mut last = self
                    .last_dispatch
                    .lock()
                    .expect("gateway dispatch lock poisoned");
                let spacing = self.config.min_delay.max(self.config.min_spacing);
                let spacing_remaining = match *last {
                    Some(prev) => spacing.saturating_sub(now.duration_since(prev)),
                    None => Duration::ZERO,
                };

                if window_backoff.is_zero() && spacing_remaining.is_zero() {
                    window.push_back(now);
                    *last = Some(now);
                    None
                } else {
                    // Sleep max(windowBackoff, minDelay), then re-check.
                    Some(
                        window_backoff
                            .max(self.config.min_delay)
                            .max(spacing_remaining),
                    )
                }
            };

            match wait {
                None => return,
                Some(wait) => {
                    debug!(wait_ms = wait.as_millis() as u64, "Gateway throttling request");
                    tokio::time::sleep(wait + self.jitter()).await;
                }
            }
        }
    }

    /// Backoff after a provider "too many requests" signal. A
    /// provider-supplied retry-after hint overrides the computed delay.
    fn rate_limit_backoff(&self, consecutive_errors: u32, hint: Option<Duration>) -> Duration {
        if let Some(hint) = hint {
            return hint.min(self.config.max_backoff);
        }
        let factor = self.config.backoff_factor.powi(consecutive_errors as i32);
        let computed = self.config.min_wait.mul_f64(factor);
        computed.min(self.config.max_backoff)
    }

    fn jitter(&self) -> Duration {
        if self.config.jitter_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..self.config.jitter_ms))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    use super::*;

    fn quiet_config() -> GatewayConfig {
        GatewayConfig {
            max_requests: 100,
            window: Duration::from_secs(60),
            min_delay: Duration::ZERO,
            min_spacing: Duration::ZERO,
            max_concurrency: 2,
            max_retries: 3,
            min_wait: Duration::from_secs(1),
            backoff_factor: 2.0,
            max_backoff: Duration::from_secs(60),
            jitter_ms: 0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn window_throttles_after_max_requests() {
        let config = GatewayConfig {
            max_requests: 2,
            window: Duration::from_secs(1),
            ..quiet_config()
        };
        let gateway = FetchGateway::new(config);
        let start = Instant::now();

        for _ in 0..3 {
            gateway.execute(|| async { Ok::<_, SkymapError>(()) }).await.unwrap();
        }

        // Third call must wait for the oldest window entry to expire.
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn under_threshold_calls_are_not_delayed() {
        let gateway = FetchGateway::new(quiet_config());
        let start = Instant::now();

        for _ in 0..5 {
            gateway.execute(|| async { Ok::<_, SkymapError>(()) }).await.unwrap();
        }

        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_hint_overrides_computed_backoff() {
        let gateway = FetchGateway::new(quiet_config());
        let calls = Arc::new(AtomicUsize::new(0));
        let start = Instant::now();

        let calls_in_op = Arc::clone(&calls);
        let result = gateway
            .execute(move || {
                let calls = Arc::clone(&calls_in_op);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(SkymapError::RateLimitExceeded {
                            retry_after: Some(Duration::from_secs(5)),
                        })
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_grows_until_retries_exhaust() {
        let config = GatewayConfig {
            max_retries: 2,
            ..quiet_config()
        };
        let gateway = FetchGateway::new(config);
        let calls = Arc::new(AtomicUsize::new(0));
        let start = Instant::now();

        let calls_in_op = Arc::clone(&calls);
        let result: Result<()> = gateway
            .execute(move || {
                let calls = Arc::clone(&calls_in_op);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(SkymapError::RateLimitExceeded { retry_after: None })
                }
            })
            .await;

        assert!(result.unwrap_err().is_rate_limited());
        // Initial call plus two retries, backed off 1s then 2s.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn non_throttling_errors_surface_immediately() {
        let gateway = FetchGateway::new(quiet_config());
        let calls = Arc::new(AtomicUsize::new(0));

        let calls_in_op = Arc::clone(&calls);
        let result: Result<()> = gateway
            .execute(move || {
                let calls = Arc::clone(&calls_in_op);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(SkymapError::Authentication("bad token".to_string()))
                }
            })
            .await;

        assert!(matches!(result, Err(SkymapError::Authentication(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_cap_serializes_excess_calls() {
        let config = GatewayConfig {
            max_concurrency: 1,
            ..quiet_config()
        };
        let gateway = Arc::new(FetchGateway::new(config));
        let start = Instant::now();

        let slow = |gateway: Arc<FetchGateway>| async move {
            gateway
                .execute(|| async {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    Ok::<_, SkymapError>(())
                })
                .await
        };

        let (a, b) = tokio::join!(slow(Arc::clone(&gateway)), slow(Arc::clone(&gateway)));
        a.unwrap();
        b.unwrap();

        // With a single permit the two 1s calls cannot overlap.
        assert!(start.elapsed() >= Duration::from_secs(2));
    }
}
