use std::collections::VecDeque;
use std::time::{Duration, Instant};

pub const SEND_LIMIT: u32 = 5;
pub const SEND_WINDOW: Duration = Duration::from_secs(10);

/// Rolling-window counter owned by one subscriber connection.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    hits: VecDeque<Instant>,
    limit: u32,
    window: Duration,
}

impl Default for SlidingWindow {
    fn default() -> Self {
        Self::new(SEND_LIMIT, SEND_WINDOW)
    }
}

impl SlidingWindow {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            hits: VecDeque::with_capacity(limit as usize),
            limit,
            window,
        }
    }

    /// Records a hit if under the limit. Rejected hits are not recorded.
    pub fn allow(&mut self) -> bool {
        self.allow_at(Instant::now())
    }

    pub fn allow_at(&mut self, now: Instant) -> bool {
        while self
            .hits
            .front()
            .is_some_and(|oldest| now.duration_since(*oldest) >= self.window)
        {
            self.hits.pop_front();
        }

        if self.hits.len() >= self.limit as usize {
            return false;
        }

        self.hits.push_back(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sixth_send_in_window_rejected() {
        let mut limiter = SlidingWindow::default();
        let now = Instant::now();
        for i in 0..5 {
            assert!(limiter.allow_at(now + Duration::from_secs(i)), "send {i}");
        }
        assert!(!limiter.allow_at(now + Duration::from_secs(9)));
    }

    #[test]
    fn test_window_rolls() {
        let mut limiter = SlidingWindow::default();
        let now = Instant::now();
        for _ in 0..5 {
            assert!(limiter.allow_at(now));
        }
        assert!(!limiter.allow_at(now + Duration::from_secs(5)));
        assert!(limiter.allow_at(now + SEND_WINDOW));
    }

    #[test]
    fn test_rejection_not_counted() {
        let mut limiter = SlidingWindow::new(1, Duration::from_secs(1));
        let now = Instant::now();
        assert!(limiter.allow_at(now));
        assert!(!limiter.allow_at(now + Duration::from_millis(500)));
        assert!(limiter.allow_at(now + Duration::from_millis(1000)));
    }
}
