//! Shared server state and the per-client request budget.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use rewind_engine::{BackendRouter, SessionController};
use tokio::sync::Mutex;

/// Length of one rate-limit window.
pub(crate) const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);

/// Above this many tracked clients, expired windows are dropped.
const PRUNE_THRESHOLD: usize = 4096;

struct Window {
    opened: Instant,
    used: u64,
}

/// Fixed-window request budget per client IP.
pub(crate) struct RateLimiter {
    windows: Mutex<HashMap<IpAddr, Window>>,
    budget: u64,
    window: Duration,
}

impl RateLimiter {
    pub(crate) fn new(budget: u64, window: Duration) -> Self {
        RateLimiter {
            windows: Mutex::new(HashMap::new()),
            budget,
            window,
        }
    }

    /// Count one request from `ip`. `Err` carries the seconds until its
    /// window reopens, at least 1.
    pub(crate) async fn admit(&self, ip: IpAddr) -> Result<(), u64> {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;
        if windows.len() >= PRUNE_THRESHOLD {
            windows.retain(|_, w| now.duration_since(w.opened) < self.window);
        }

        let current = windows.entry(ip).or_insert(Window {
            opened: now,
            used: 0,
        });
        if now.duration_since(current.opened) >= self.window {
            *current = Window {
                opened: now,
                used: 0,
            };
        }
        if current.used >= self.budget {
            let left = self.window.saturating_sub(now.duration_since(current.opened));
            return Err(left.as_secs().max(1));
        }
        current.used += 1;
        Ok(())
    }
}

/// Shared across request handlers.
pub struct AppState {
    pub(crate) router: BackendRouter,
    pub(crate) sessions: SessionController,
    pub(crate) rate_limiter: RateLimiter,
    /// None = no auth required.
    pub(crate) api_key: Option<String>,
}

impl AppState {
    pub fn new(
        router: BackendRouter,
        sessions: SessionController,
        rate_limit: u64,
        api_key: Option<String>,
    ) -> Self {
        AppState {
            router,
            sessions,
            rate_limiter: RateLimiter::new(rate_limit, RATE_LIMIT_WINDOW),
            api_key,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const A: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
    const B: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));

    #[tokio::test]
    async fn budget_is_per_client() {
        let limiter = RateLimiter::new(2, RATE_LIMIT_WINDOW);
        assert!(limiter.admit(A).await.is_ok());
        assert!(limiter.admit(A).await.is_ok());
        let retry_after = limiter.admit(A).await.unwrap_err();
        assert!((1..=RATE_LIMIT_WINDOW.as_secs()).contains(&retry_after));
        assert!(limiter.admit(B).await.is_ok());
    }

    #[tokio::test]
    async fn window_reopens() {
        let limiter = RateLimiter::new(1, Duration::from_millis(30));
        assert!(limiter.admit(A).await.is_ok());
        assert_eq!(limiter.admit(A).await, Err(1));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(limiter.admit(A).await.is_ok());
    }
}
