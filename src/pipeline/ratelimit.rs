//! Sliding-window request gate in front of every LLM call.
//!
//! At most `max_requests` calls may start within any `window`. The limiter
//! is shared by all concurrent page tasks: timestamps live in a
//! `parking_lot::Mutex`, and the lock is released before sleeping so
//! waiting callers never block each other's bookkeeping. Callers are not
//! fair-queued; whichever task wakes first takes a freed slot.
//!
//! Time comes from `tokio::time`, so tests can drive the window with a
//! paused clock.

use crate::config::RateLimitConfig;
use crate::error::TranslateError;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::info;

pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    started: Mutex<VecDeque<Instant>>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("max_requests", &self.max_requests)
            .field("window", &self.window)
            .finish()
    }
}

impl RateLimiter {
    /// A zero limit would wait forever and is rejected here.
    pub fn new(config: &RateLimitConfig) -> Result<Self, TranslateError> {
        if config.max_requests == 0 || config.window_secs == 0 {
            return Err(TranslateError::InvalidConfig(format!(
                "Rate limit must allow ≥ 1 request per ≥ 1 s window, got {}/{}s",
                config.max_requests, config.window_secs
            )));
        }
        Ok(Self {
            max_requests: config.max_requests,
            window: Duration::from_secs(config.window_secs),
            started: Mutex::new(VecDeque::with_capacity(config.max_requests)),
        })
    }

    /// Wait until a slot is free, then claim it. Returns the time spent waiting.
    pub async fn acquire(&self) -> Duration {
        let entered = Instant::now();
        loop {
            let wait = {
                let mut started = self.started.lock();
                let now = Instant::now();
                while started
                    .front()
                    .is_some_and(|&t| now.duration_since(t) >= self.window)
                {
                    started.pop_front();
                }
                if started.len() < self.max_requests {
                    started.push_back(now);
                    return now.duration_since(entered);
                }
                match started.front() {
                    Some(&oldest) => self.window.saturating_sub(now.duration_since(oldest)),
                    None => Duration::ZERO,
                }
            };
            info!(
                "Rate limit of {} requests per {:?} reached, waiting {:?}",
                self.max_requests, self.window, wait
            );
            sleep(wait).await;
        }
    }

    /// Slots still free in the current window.
    pub fn available(&self) -> usize {
        let started = self.started.lock();
        let now = Instant::now();
        let live = started
            .iter()
            .filter(|&&t| now.duration_since(t) < self.window)
            .count();
        self.max_requests.saturating_sub(live)
    }
}
