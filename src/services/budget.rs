use std::time::Duration;
use tokio::time::Instant;

/// Wall-clock allowance for one worker invocation, checked before each unit of work
#[derive(Debug, Clone, Copy)]
pub struct TimeBudget {
    started: Instant,
    limit: Option<Duration>,
}

impl TimeBudget {
    pub fn new(limit: Duration) -> Self {
        Self {
            started: Instant::now(),
            limit: Some(limit),
        }
    }

    pub fn unbounded() -> Self {
        Self {
            started: Instant::now(),
            limit: None,
        }
    }

    /// An explicit per-request limit wins over the worker default
    pub fn from_request(seconds: Option<u64>, default: Option<Duration>) -> Self {
        match seconds.map(Duration::from_secs).or(default) {
            Some(limit) => Self::new(limit),
            None => Self::unbounded(),
        }
    }

    pub fn exhausted(&self) -> bool {
        self.limit
            .map(|limit| self.started.elapsed() >= limit)
            .unwrap_or(false)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn elapsed_seconds(&self) -> i32 {
        i32::try_from(self.elapsed().as_secs()).unwrap_or(i32::MAX)
    }

    pub fn limit(&self) -> Option<Duration> {
        self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_budget_exhausts_after_limit() {
        let budget = TimeBudget::new(Duration::from_secs(55));
        assert!(!budget.exhausted());

        tokio::time::advance(Duration::from_secs(54)).await;
        assert!(!budget.exhausted());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(budget.exhausted());
        assert_eq!(budget.elapsed_seconds(), 55);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_never_exhausts() {
        let budget = TimeBudget::from_request(None, None);
        tokio::time::advance(Duration::from_secs(3600)).await;
        assert!(!budget.exhausted());
        assert!(budget.limit().is_none());
    }

    #[test]
    fn test_request_overrides_default() {
        let budget = TimeBudget::from_request(Some(5), Some(Duration::from_secs(90)));
        assert_eq!(budget.limit(), Some(Duration::from_secs(5)));
    }
}
