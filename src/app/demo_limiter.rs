//! Sliding-window attempt counter keyed by client IP, for the
//! unauthenticated extraction demo. State lives in memory only.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
    time::{Duration, Instant},
};

use tokio_util::sync::CancellationToken;

type Attempts = Arc<Mutex<HashMap<String, Vec<Instant>>>>;

pub struct DemoLimiter {
    attempts: Attempts,
    limit: usize,
    window: Duration,
    stop: CancellationToken,
}

fn lock(attempts: &Attempts) -> MutexGuard<'_, HashMap<String, Vec<Instant>>> {
    // the map stays consistent even if a holder panicked
    attempts.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn prune(entries: &mut Vec<Instant>, now: Instant, window: Duration) {
    entries.retain(|at| now.saturating_duration_since(*at) < window);
}

impl DemoLimiter {
    /// Must be called inside a tokio runtime; spawns the cleanup ticker.
    pub fn new(limit: usize, window: Duration, cleanup_every: Duration) -> Self {
        let attempts: Attempts = Arc::default();
        let stop = CancellationToken::new();

        tokio::spawn({
            let attempts = attempts.clone();
            let stop = stop.clone();
            async move {
                let mut ticker = tokio::time::interval(cleanup_every);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = stop.cancelled() => break,
                        _ = ticker.tick() => {
                            let now = Instant::now();
                            let mut map = lock(&attempts);
                            map.retain(|_, entries| {
                                prune(entries, now, window);
                                !entries.is_empty()
                            });
                            log::debug!("demo limiter tracking {} addresses", map.len());
                        }
                    }
                }
                log::debug!("demo limiter cleanup stopped");
            }
        });

        Self {
            attempts,
            limit,
            window,
            stop,
        }
    }

    /// Record an attempt from `ip` and report whether it is within the limit.
    /// Denied attempts are recorded too.
    pub fn allow(&self, ip: &str) -> bool {
        let now = Instant::now();
        let mut map = lock(&self.attempts);
        let entries = map.entry(ip.to_string()).or_default();
        prune(entries, now, self.window);
        entries.push(now);
        entries.len() - 1 < self.limit
    }

    /// Attempts from `ip` inside the current window.
    pub fn attempt_count(&self, ip: &str) -> usize {
        let now = Instant::now();
        lock(&self.attempts)
            .get(ip)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|at| now.saturating_duration_since(**at) < self.window)
                    .count()
            })
            .unwrap_or(0)
    }

    pub fn stop(&self) {
        self.stop.cancel();
    }
}

impl Drop for DemoLimiter {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_allows_up_to_limit_per_ip() {
        let limiter = DemoLimiter::new(3, Duration::from_secs(900), Duration::from_secs(60));

        assert!(limiter.allow("10.0.0.1"));
        assert!(limiter.allow("10.0.0.1"));
        assert!(limiter.allow("10.0.0.1"));
        assert!(!limiter.allow("10.0.0.1"));
        assert_eq!(limiter.attempt_count("10.0.0.1"), 4);

        assert!(limiter.allow("10.0.0.2"));
        assert_eq!(limiter.attempt_count("10.0.0.2"), 1);
        assert_eq!(limiter.attempt_count("10.0.0.3"), 0);
    }

    #[tokio::test]
    async fn test_window_expiry() {
        let limiter = DemoLimiter::new(1, Duration::from_millis(50), Duration::from_secs(60));

        assert!(limiter.allow("ip"));
        assert!(!limiter.allow("ip"));
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(limiter.attempt_count("ip"), 0);
        assert!(limiter.allow("ip"));
    }

    #[tokio::test]
    async fn test_cleanup_drops_idle_addresses() {
        let limiter = DemoLimiter::new(3, Duration::from_millis(10), Duration::from_millis(20));
        limiter.allow("ip");
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(lock(&limiter.attempts).is_empty());

        limiter.stop();
        assert!(limiter.stop.is_cancelled());
    }
}
