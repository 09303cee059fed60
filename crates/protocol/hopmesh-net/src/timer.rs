//! Optional timers usable as `tokio::select!` branches.

use std::future::pending;
use tokio::time::{sleep_until, Instant, Interval};

/// Resolve at `deadline`, or never if there is none.
pub(crate) async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending::<()>().await,
    }
}

/// Resolve at the next tick of `timer`, or never if it is not running.
pub(crate) async fn tick_opt(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_missing_deadline_never_fires() {
        let fired = tokio::time::timeout(Duration::from_secs(60), sleep_until_opt(None)).await;
        assert!(fired.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_fires() {
        let deadline = Instant::now() + Duration::from_millis(10);
        let fired = tokio::time::timeout(Duration::from_secs(1), sleep_until_opt(Some(deadline))).await;
        assert!(fired.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_timer_never_ticks() {
        let mut timer = None;
        let ticked = tokio::time::timeout(Duration::from_secs(60), tick_opt(&mut timer)).await;
        assert!(ticked.is_err());
    }
}
