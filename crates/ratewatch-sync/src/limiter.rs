//! Outbound request limiter: a concurrency cap plus a calls-per-window cap.

use std::time::Duration;

use tokio::sync::{Mutex, Semaphore, SemaphorePermit};
use tokio::time::Instant;
use tracing::debug;

use crate::config::LimiterConfig;

struct Window {
    started: Instant,
    used: u32,
}

/// Gates every request to the quoting API.
///
/// `acquire` blocks until both a concurrency slot and a window slot are
/// available. The concurrency slot is released when the returned permit is
/// dropped; the window slot is consumed for the rest of the window.
pub struct FetchLimiter {
    semaphore: Semaphore,
    window: Mutex<Window>,
    max_per_window: u32,
    window_len: Duration,
}

pub struct FetchPermit<'a> {
    _permit: SemaphorePermit<'a>,
}

impl FetchLimiter {
    pub fn new(config: LimiterConfig) -> Self {
        Self {
            semaphore: Semaphore::new(config.max_in_flight),
            window: Mutex::new(Window {
                started: Instant::now(),
                used: 0,
            }),
            max_per_window: config.max_per_window,
            window_len: config.window,
        }
    }

    pub async fn acquire(&self) -> FetchPermit<'_> {
        // The semaphore is owned by this limiter and never closed.
        let permit = self
            .semaphore
            .acquire()
            .await
            .expect("limiter semaphore closed");
        loop {
            let wait = {
                let mut window = self.window.lock().await;
                let elapsed = window.started.elapsed();
                if elapsed >= self.window_len {
                    window.started = Instant::now();
                    window.used = 0;
                }
                if window.used < self.max_per_window {
                    window.used += 1;
                    None
                } else {
                    Some(self.window_len.saturating_sub(elapsed))
                }
            };
            match wait {
                None => return FetchPermit { _permit: permit },
                Some(wait) => {
                    debug!(wait_ms = wait.as_millis() as u64, "rate window full, waiting");
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }
}
