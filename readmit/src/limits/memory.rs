//! In-process sliding-window logs.

use std::collections::VecDeque;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use super::{Decision, LimiterError, RateLimitBackend};

/// One timestamp log per client key. The `DashMap` shard lock held by `entry` makes each
/// prune-count-record step atomic for its key.
#[derive(Default)]
pub struct MemoryBackend {
    logs: DashMap<String, VecDeque<Instant>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tracked_keys(&self) -> usize {
        self.logs.len()
    }
}

fn prune(log: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(&oldest) = log.front() {
        if now.duration_since(oldest) >= window {
            log.pop_front();
        } else {
            break;
        }
    }
}

#[async_trait::async_trait]
impl RateLimitBackend for MemoryBackend {
    async fn hit(&self, key: &str, max_requests: u32, window: Duration) -> Result<Decision, LimiterError> {
        let now = Instant::now();
        let mut log = self.logs.entry(key.to_string()).or_default();
        prune(&mut log, now, window);

        let count = log.len() as u32;
        if count < max_requests {
            log.push_back(now);
            return Ok(Decision::admitted(max_requests, max_requests - count - 1));
        }

        let retry_after = log
            .front()
            .map(|&oldest| window.saturating_sub(now.duration_since(oldest)))
            .unwrap_or(window);
        Ok(Decision::rejected(max_requests, retry_after))
    }

    async fn evict_idle(&self, window: Duration) -> usize {
        let now = Instant::now();
        let before = self.logs.len();
        self.logs
            .retain(|_, log| log.back().is_some_and(|&newest| now.duration_since(newest) < window));
        before.saturating_sub(self.logs.len())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(60);

    #[tokio::test(start_paused = true)]
    async fn test_remaining_counts_down() {
        let backend = MemoryBackend::new();
        let mut remaining = Vec::new();
        for _ in 0..3 {
            remaining.push(backend.hit("k", 3, WINDOW).await.unwrap().remaining);
        }
        assert_eq!(remaining, vec![2, 1, 0]);
        assert!(!backend.hit("k", 3, WINDOW).await.unwrap().allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_hits_are_not_recorded() {
        let backend = MemoryBackend::new();
        backend.hit("k", 1, WINDOW).await.unwrap();
        for _ in 0..5 {
            tokio::time::advance(Duration::from_secs(10)).await;
            assert!(!backend.hit("k", 1, WINDOW).await.unwrap().allowed);
        }
        // Only the first hit counts, so the key recovers a full window after it
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(backend.hit("k", 1, WINDOW).await.unwrap().allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_idle_drops_only_stale_keys() {
        let backend = MemoryBackend::new();
        backend.hit("old", 5, WINDOW).await.unwrap();
        tokio::time::advance(Duration::from_secs(45)).await;
        backend.hit("recent", 5, WINDOW).await.unwrap();
        tokio::time::advance(Duration::from_secs(20)).await;

        assert_eq!(backend.evict_idle(WINDOW).await, 1);
        assert_eq!(backend.tracked_keys(), 1);
        assert!(backend.logs.contains_key("recent"));
    }
}
