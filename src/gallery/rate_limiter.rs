use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

/// Spaces requests to the site out, backing off while the site is slow or
/// failing and drifting back towards the configured gap once it recovers.
#[derive(Debug, Clone)]
pub(crate) struct PoliteRateLimiter {
    config: RateLimiterConfig,
    state: Arc<RwLock<RateLimiterState>>,
}

#[derive(Debug, Clone)]
pub(crate) struct RateLimiterConfig {
    /// Minimum gap between two requests when the site is healthy.
    pub(crate) base_delay: Duration,
    /// Upper bound for the gap after repeated backoff.
    pub(crate) max_delay: Duration,
    /// Response time from which a request counts as slow.
    pub(crate) slow_request_threshold: Duration,
    pub(crate) backoff_multiplier: f64,
    pub(crate) recovery_multiplier: f64,
    /// Consecutive slow responses before the gap grows.
    pub(crate) slow_request_tolerance: u32,
    /// Consecutive fast responses before the gap shrinks.
    pub(crate) fast_request_tolerance: u32,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            slow_request_threshold: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            recovery_multiplier: 0.8,
            slow_request_tolerance: 2,
            fast_request_tolerance: 3,
        }
    }
}

impl RateLimiterConfig {
    pub(crate) fn with_base_delay(base_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay: Duration::from_secs(30).max(base_delay),
            ..Self::default()
        }
    }
}

#[derive(Debug)]
struct RateLimiterState {
    current_delay: Duration,
    consecutive_slow_requests: u32,
    consecutive_fast_requests: u32,
    last_request_time: Option<Instant>,
}

impl PoliteRateLimiter {
    pub(crate) fn with_config(config: RateLimiterConfig) -> Self {
        let state = RateLimiterState {
            current_delay: config.base_delay,
            consecutive_slow_requests: 0,
            consecutive_fast_requests: 0,
            last_request_time: None,
        };
        Self {
            config,
            state: Arc::new(RwLock::new(state)),
        }
    }

    /// Blocks until the current gap since the previous request has passed.
    /// Returns how long it slept.
    pub(crate) fn wait_for_request(&self) -> Duration {
        let remaining = {
            let state = self.state.read();
            match state.last_request_time {
                Some(last) => state.current_delay.saturating_sub(last.elapsed()),
                None => Duration::ZERO,
            }
        };

        if !remaining.is_zero() {
            trace!("Rate limiter sleeping for {remaining:?}");
            thread::sleep(remaining);
        }

        self.state.write().last_request_time = Some(Instant::now());
        remaining
    }

    /// Feeds the duration of a completed request back into the limiter.
    pub(crate) fn record_response_time(&self, response_time: Duration) {
        let mut state = self.state.write();

        if response_time >= self.config.slow_request_threshold {
            state.consecutive_slow_requests += 1;
            state.consecutive_fast_requests = 0;
            debug!("Slow response from site: {response_time:?}");
        } else if response_time < self.config.slow_request_threshold / 2 {
            state.consecutive_fast_requests += 1;
            state.consecutive_slow_requests = 0;
        } else {
            state.consecutive_slow_requests = 0;
            state.consecutive_fast_requests = 0;
        }

        if state.consecutive_slow_requests >= self.config.slow_request_tolerance {
            self.back_off(&mut state);
        } else if state.consecutive_fast_requests >= self.config.fast_request_tolerance {
            let old_delay = state.current_delay;
            state.current_delay = Duration::from_secs_f64(
                state.current_delay.as_secs_f64() * self.config.recovery_multiplier,
            )
            .max(self.config.base_delay);
            state.consecutive_fast_requests = 0;
            if old_delay != state.current_delay {
                debug!("Site responsive again, delay {old_delay:?} -> {:?}", state.current_delay);
            }
        }
    }

    /// A request failed in a way that suggests the site is overloaded.
    pub(crate) fn record_failure(&self) {
        let mut state = self.state.write();
        state.consecutive_fast_requests = 0;
        self.back_off(&mut state);
    }

    #[cfg(test)]
    pub(crate) fn current_delay(&self) -> Duration {
        self.state.read().current_delay
    }

    fn back_off(&self, state: &mut RateLimiterState) {
        let old_delay = state.current_delay;
        state.current_delay = Duration::from_secs_f64(
            state.current_delay.as_secs_f64() * self.config.backoff_multiplier,
        )
        .min(self.config.max_delay);
        state.consecutive_slow_requests = 0;
        info!(
            "Site struggling, increasing delay between requests from {:?} to {:?}",
            old_delay, state.current_delay
        );
    }
}
