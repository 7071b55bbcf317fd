//! Login attempt rate limiting.
//!
//! Tracks failed logins per (ip, user-agent) identifier: 5 failures inside a
//! 5 minute window blocks the identifier for 15 minutes. Successful logins
//! reset the counter.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct Attempt {
    count: u32,
    first_try: Instant,
    blocked_at: Option<Instant>,
}

#[derive(Debug)]
pub struct LoginRateLimiter {
    attempts: RwLock<HashMap<String, Attempt>>,
    max_attempts: u32,
    window: Duration,
    block: Duration,
}

/// Build the rate-limit identifier for a request.
pub fn identifier(ip: &str, user_agent: &str) -> String {
    format!("{}|{}", ip, user_agent)
}

impl Default for LoginRateLimiter {
    fn default() -> Self {
        // 5 attempts per 5 minutes, block for 15 minutes.
        Self::new(5, Duration::from_secs(5 * 60), Duration::from_secs(15 * 60))
    }
}

impl LoginRateLimiter {
    pub fn new(max_attempts: u32, window: Duration, block: Duration) -> Self {
        Self {
            attempts: RwLock::new(HashMap::new()),
            max_attempts,
            window,
            block,
        }
    }

    /// Record a failed login attempt.
    pub async fn record_failure(&self, identifier: &str) {
        let mut attempts = self.attempts.write().await;
        let now = Instant::now();

        let attempt = attempts.entry(identifier.to_string()).or_insert(Attempt {
            count: 0,
            first_try: now,
            blocked_at: None,
        });

        // A stale window restarts the count.
        if now.duration_since(attempt.first_try) > self.window && attempt.blocked_at.is_none() {
            attempt.count = 0;
            attempt.first_try = now;
        }

        attempt.count += 1;
        if attempt.count >= self.max_attempts && attempt.blocked_at.is_none() {
            attempt.blocked_at = Some(now);
            tracing::warn!(identifier = %identifier, "Login identifier blocked");
        }
    }

    /// Remaining block time, if the identifier is currently blocked.
    pub async fn blocked_for(&self, identifier: &str) -> Option<Duration> {
        let mut attempts = self.attempts.write().await;
        let attempt = attempts.get(identifier)?;
        let blocked_at = attempt.blocked_at?;

        let elapsed = blocked_at.elapsed();
        if elapsed < self.block {
            Some(self.block - elapsed)
        } else {
            // Block expired; forget the identifier.
            attempts.remove(identifier);
            None
        }
    }

    /// Reset after a successful login.
    pub async fn reset(&self, identifier: &str) {
        self.attempts.write().await.remove(identifier);
    }

    pub async fn attempt_count(&self, identifier: &str) -> u32 {
        self.attempts
            .read()
            .await
            .get(identifier)
            .map(|a| a.count)
            .unwrap_or(0)
    }
}
