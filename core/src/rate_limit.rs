//! Per-source-IP fixed-window request counter for webhook entry points.

use crate::{
    config::WebhookConfig,
    error::{LedgerError, LedgerResult},
};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

const MAX_WINDOW_SECS: u64 = 86_400;

#[derive(Debug)]
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    windows: Mutex<HashMap<String, Window>>,
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started_at: DateTime<Utc>,
    count: u32,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &WebhookConfig) -> Self {
        let secs = config.window_secs.min(MAX_WINDOW_SECS) as i64;
        Self::new(config.max_requests_per_window, Duration::seconds(secs))
    }

    /// Count one request from `source_ip` at `now`.
    pub fn check(&self, source_ip: &str, now: DateTime<Utc>) -> LedgerResult<()> {
        let mut windows = self.windows.lock().unwrap_or_else(|p| p.into_inner());

        // Drop expired windows so the map stays bounded by active sources.
        let window = self.window;
        windows.retain(|_, w| now - w.started_at < window);

        let entry = windows.entry(source_ip.to_string()).or_insert(Window {
            started_at: now,
            count: 0,
        });
        if entry.count >= self.max_requests {
            log::warn!("rate limit: {source_ip} exceeded {} requests", self.max_requests);
            return Err(LedgerError::RateLimited {
                source_ip: source_ip.to_string(),
            });
        }
        entry.count += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn limits_per_source_and_resets_after_window() {
        let limiter = RateLimiter::new(2, Duration::seconds(60));
        let t0 = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();

        limiter.check("10.0.0.1", t0).unwrap();
        limiter.check("10.0.0.1", t0).unwrap();
        assert!(limiter.check("10.0.0.1", t0).is_err());
        limiter.check("10.0.0.2", t0).unwrap();

        limiter.check("10.0.0.1", t0 + Duration::seconds(60)).unwrap();
    }
}
