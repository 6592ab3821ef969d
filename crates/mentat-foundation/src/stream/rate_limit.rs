//! 流速率限制
//! Stream rate limiting

use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use mentat_kernel::agent::error::{AgentError, AgentResult};
use std::time::Duration;
use tokio::time::{Interval, MissedTickBehavior};

/// 速率限制器
/// Leaky-bucket limiter emitting at most `per_second` items per second.
///
/// The first item passes immediately; every later item waits for the next
/// tick. Ticks missed while the source was idle are not replayed as a burst.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiter {
    per_second: u32,
}

impl RateLimiter {
    pub fn new(per_second: u32) -> AgentResult<Self> {
        if per_second == 0 {
            return Err(AgentError::ConfigInvalid(
                "rate limiter: per_second must be at least 1".into(),
            ));
        }
        Ok(Self { per_second })
    }

    pub fn per_second(&self) -> u32 {
        self.per_second
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(1) / self.per_second
    }

    fn ticker(&self) -> Interval {
        let mut ticker = tokio::time::interval(self.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }

    /// Pace `source` through this limiter.
    pub fn limit<S>(&self, source: S) -> BoxStream<'static, S::Item>
    where
        S: Stream + Send + 'static,
        S::Item: Send,
    {
        futures::stream::unfold(
            (source.boxed(), self.ticker()),
            |(mut source, mut ticker)| async move {
                let item = source.next().await?;
                ticker.tick().await;
                Some((item, (source, ticker)))
            },
        )
        .boxed()
    }
}

/// `Stream` 扩展
/// Adapter method for any sendable stream
pub trait RateLimitExt: Stream + Sized + Send + 'static {
    fn rate_limited(self, limiter: &RateLimiter) -> BoxStream<'static, Self::Item>
    where
        Self::Item: Send,
    {
        limiter.limit(self)
    }
}

impl<S> RateLimitExt for S where S: Stream + Send + 'static {}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use tokio::time::Instant;

    #[test]
    fn test_zero_rate_rejected() {
        assert!(RateLimiter::new(0).is_err());
        assert_eq!(RateLimiter::new(4).unwrap().interval(), Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_paces_items() {
        let limiter = RateLimiter::new(10).unwrap();
        let started = Instant::now();
        let items: Vec<u32> = stream::iter(1..=5).rate_limited(&limiter).collect().await;
        assert_eq!(items, vec![1, 2, 3, 4, 5]);
        // first item immediate, four more at 100ms spacing
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(400) && elapsed < Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_source_does_not_burst() {
        let limiter = RateLimiter::new(10).unwrap();
        let source = stream::iter(vec![0u64, 1_000, 0, 0]).then(|pause| async move {
            tokio::time::sleep(Duration::from_millis(pause)).await;
            Instant::now()
        });
        let stamps: Vec<Instant> = limiter.limit(source).map(|_| Instant::now()).collect().await;
        assert_eq!(stamps.len(), 4);
        for pair in stamps.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(100));
        }
    }
}
