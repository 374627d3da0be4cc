//! Resettable idle deadline owned by a session.

use std::pin::Pin;
use std::time::Duration;
use tokio::time::{sleep, Instant, Sleep};

/// Default quiet period after which the peer is assumed to be done.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_millis(500);

/// Single deadline that can be armed, cancelled and re-armed in place.
#[derive(Debug)]
pub struct IdleTimer {
    threshold: Duration,
    sleep: Pin<Box<Sleep>>,
    armed: bool,
}

impl IdleTimer {
    /// Create a disarmed timer.
    pub fn new(threshold: Duration) -> Self {
        IdleTimer {
            threshold,
            sleep: Box::pin(sleep(threshold)),
            armed: false,
        }
    }

    /// (Re)start the countdown from now.
    pub fn arm(&mut self) {
        self.sleep.as_mut().reset(Instant::now() + self.threshold);
        self.armed = true;
    }

    pub fn cancel(&mut self) {
        self.armed = false;
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Resolve once the armed deadline passes; never resolves while disarmed.
    pub async fn expired(&mut self) {
        if !self.armed {
            std::future::pending::<()>().await;
        }
        self.sleep.as_mut().await;
        self.armed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready, task};

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_threshold() {
        let mut timer = IdleTimer::new(Duration::from_millis(500));
        timer.arm();
        let start = Instant::now();
        timer.expired().await;
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(500));
        assert!(elapsed < Duration::from_millis(502));
        assert!(!timer.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disarmed_never_fires() {
        let mut timer = IdleTimer::new(Duration::from_millis(10));
        let mut fut = task::spawn(timer.expired());
        assert_pending!(fut.poll());
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_pending!(fut.poll());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_pushes_deadline() {
        let mut timer = IdleTimer::new(Duration::from_millis(100));
        timer.arm();
        tokio::time::advance(Duration::from_millis(80)).await;
        timer.arm();
        assert!(timer.is_armed());

        tokio::time::advance(Duration::from_millis(80)).await;
        {
            let mut fut = task::spawn(timer.expired());
            assert_pending!(fut.poll());
        }
        tokio::time::advance(Duration::from_millis(25)).await;
        let mut fut = task::spawn(timer.expired());
        assert_ready!(fut.poll());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_disarms() {
        let mut timer = IdleTimer::new(Duration::from_millis(100));
        timer.arm();
        timer.cancel();
        assert!(!timer.is_armed());
        let mut fut = task::spawn(timer.expired());
        tokio::time::advance(Duration::from_millis(200)).await;
        assert_pending!(fut.poll());
    }
}
