use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::trace;

#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_refill: Instant::now(),
        }
    }

    /// Take one token, or report how long until one is available.
    fn try_consume(&mut self, rate: f64, capacity: f64) -> Result<(), Duration> {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.last_refill = now;

        self.tokens = (self.tokens + elapsed * rate).min(capacity);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            Err(Duration::from_secs_f64((1.0 - self.tokens) / rate))
        }
    }
}

/// Token bucket shared by every outbound call to one bot. Callers wait for a
/// token instead of being rejected.
#[derive(Clone)]
pub struct Throttle {
    bucket: Arc<Mutex<TokenBucket>>,
    rate: f64,
    capacity: f64,
}

impl Throttle {
    pub fn new(rate: f64, capacity: f64) -> Self {
        let rate = if rate > 0.0 { rate } else { 1.0 };
        let capacity = capacity.max(1.0);
        Self {
            bucket: Arc::new(Mutex::new(TokenBucket::new(capacity))),
            rate,
            capacity,
        }
    }

    #[cfg(test)]
    pub async fn try_acquire(&self) -> bool {
        let mut bucket = self.bucket.lock().await;
        bucket.try_consume(self.rate, self.capacity).is_ok()
    }

    /// Wait until a token is available. Never fails.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                match bucket.try_consume(self.rate, self.capacity) {
                    Ok(()) => return,
                    Err(wait) => wait,
                }
            };
            trace!(wait_ms = wait.as_millis() as u64, "Outbound throttle engaged");
            tokio::time::sleep(wait).await;
        }
    }
}

impl Default for Throttle {
    fn default() -> Self {
        Self::new(25.0, 30.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_throttle_allows_burst() {
        let throttle = Throttle::new(1.0, 5.0);

        for _ in 0..5 {
            assert!(throttle.try_acquire().await);
        }

        assert!(!throttle.try_acquire().await);
    }

    #[tokio::test]
    async fn test_acquire_waits_for_refill() {
        let throttle = Throttle::new(200.0, 1.0);
        throttle.acquire().await;

        let started = Instant::now();
        tokio::time::timeout(Duration::from_secs(2), throttle.acquire())
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(1));
    }

    #[tokio::test]
    async fn test_clones_share_bucket() {
        let throttle = Throttle::new(0.001, 2.0);
        let other = throttle.clone();

        assert!(throttle.try_acquire().await);
        assert!(other.try_acquire().await);
        assert!(!throttle.try_acquire().await);
    }
}
