//! Injectable wall-clock capability.
//!
//! Time is a capability passed through the context rather than a global so
//! tests can observe backoff sleeps without waiting them out.

use std::time::{Duration, Instant};

use opflow_core::BoxFuture;

/// Clock capability: current instant and cooperative sleeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    /// Sleep for the given duration. Dropping the returned future cancels
    /// the sleep.
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// Default clock backed by `tokio::time`.
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tokio_clock_sleeps() {
        let clock = TokioClock;
        let before = clock.now();
        clock.sleep(Duration::from_millis(10)).await;
        assert!(clock.now().duration_since(before) >= Duration::from_millis(10));
    }
}
