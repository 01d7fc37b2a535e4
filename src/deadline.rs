use std::time::Duration;

use tokio::time::Instant;

// roughly 30 years, far enough to never be reached
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// An absolute point in time on the monotonic clock.
///
/// Batches are polled against one deadline, each broker call gets whatever
/// time is left until it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Deadline {
    when: Instant,
}

impl Deadline {
    /// Budgets too large for the clock yield a deadline that is never reached.
    pub fn after(duration: Duration) -> Self {
        let now = Instant::now();
        let when = now
            .checked_add(duration.min(FAR_FUTURE))
            .unwrap_or(now);
        Self { when }
    }

    pub fn at(when: Instant) -> Self {
        Self { when }
    }

    /// A deadline that is already reached.
    pub fn passed() -> Self {
        Self {
            when: Instant::now(),
        }
    }

    pub fn instant(&self) -> Instant {
        self.when
    }

    pub fn is_reached(&self) -> bool {
        Instant::now() >= self.when
    }

    pub fn time_left(&self) -> Duration {
        self.when.saturating_duration_since(Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::Deadline;

    #[tokio::test(start_paused = true)]
    async fn time_left_shrinks() {
        let deadline = Deadline::after(Duration::from_secs(2));
        assert!(!deadline.is_reached());
        assert_eq!(deadline.time_left(), Duration::from_secs(2));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(deadline.time_left(), Duration::from_millis(500));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(deadline.is_reached());
        assert_eq!(deadline.time_left(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn unbounded_budget_saturates() {
        let deadline = Deadline::after(Duration::MAX);
        assert!(!deadline.is_reached());
        assert!(deadline.time_left() >= Duration::from_secs(86400 * 365));

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert!(!deadline.is_reached());
    }

    #[tokio::test(start_paused = true)]
    async fn passed_deadline() {
        let deadline = Deadline::passed();
        assert!(deadline.is_reached());
        assert_eq!(deadline.time_left(), Duration::ZERO);
    }
}
