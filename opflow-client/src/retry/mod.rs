//! Retry orchestration at the Finalize → transport boundary.
//!
//! [`RetryMiddleware`] wraps everything downstream of the Finalize step: per
//! attempt it snapshots the request builder, executes the downstream chain,
//! classifies failures through an [`ErrorClassifier`], and charges retries to
//! the request's partition budget (see [`PartitionPool`]). Backoff sleeps go
//! through the context's injected clock.
//!
//! Cancellation: dropping the operation future cancels the in-flight
//! attempt; the pool is only touched between completed awaits, so no token
//! is acquired or refreshed after cancellation is observed.

mod policy;
mod token;

pub use policy::{defaults, ExponentialBackoff, RetryPolicy};
pub use token::{
    PartitionPool, RetryToken, INITIAL_BUCKET_CAPACITY, RETRY_COST, SUCCESS_INCREMENT,
    TIMEOUT_RETRY_COST,
};

use std::sync::Arc;

use opflow_core::{BoxFuture, ErrorClass, OperationError};

use crate::context::{keys, OperationContext};
use crate::middleware::{Handler, Middleware};
use crate::request::RequestBuilder;

/// Id under which the retry middleware registers in the Finalize step.
pub const RETRY_MIDDLEWARE_ID: &str = "retry";

/// Maps a failed attempt's error to its retry classification.
pub trait ErrorClassifier: Send + Sync {
    fn classify(&self, error: &OperationError) -> ErrorClass;
}

/// Default classifier: the error's own classification.
pub struct DefaultClassifier;

impl ErrorClassifier for DefaultClassifier {
    fn classify(&self, error: &OperationError) -> ErrorClass {
        error.class()
    }
}

/// Middleware that retries the downstream chain per its policy.
///
/// Partition identity comes from the explicit context override when present,
/// else from the request host. A request with neither is a configuration
/// error and fails before any token or transport activity.
pub struct RetryMiddleware {
    policy: RetryPolicy,
    pool: Arc<PartitionPool>,
    classifier: Arc<dyn ErrorClassifier>,
}

impl RetryMiddleware {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            pool: Arc::new(PartitionPool::new()),
            classifier: Arc::new(DefaultClassifier),
        }
    }

    /// Share a partition pool with other clients.
    pub fn with_pool(mut self, pool: Arc<PartitionPool>) -> Self {
        self.pool = pool;
        self
    }

    /// Replace the error classifier.
    pub fn with_classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    async fn run<Out: Send + 'static>(
        &self,
        ctx: OperationContext,
        builder: RequestBuilder,
        next: &dyn Handler<RequestBuilder, Out>,
    ) -> Result<Out, OperationError> {
        self.policy
            .validate()
            .map_err(OperationError::config)?;

        let partition = resolve_partition(&ctx, &builder)?;
        let mut token = self.pool.acquire_initial(&partition);
        let mut backoff = self.policy.backoff();

        loop {
            // Each attempt gets a fresh snapshot of the builder; nothing an
            // attempt wrote into its built request leaks into the next.
            match next.call(ctx.clone(), builder.clone()).await {
                Ok(out) => {
                    self.pool.record_success(token);
                    return Ok(out);
                }
                Err(err) => {
                    let class = self.classifier.classify(&err);
                    if !class.is_retryable() {
                        return Err(err);
                    }
                    if !backoff.can_attempt_again() {
                        return Err(OperationError::RetriesExhausted {
                            attempts: token.attempts(),
                            source: Box::new(err),
                        });
                    }

                    let attempts = token.attempts();
                    token = match self.pool.refresh(token, class) {
                        Some(token) => token,
                        None => {
                            return Err(OperationError::RetriesExhausted {
                                attempts,
                                source: Box::new(err),
                            });
                        }
                    };

                    let delay = backoff.next_delay();
                    #[cfg(feature = "tracing")]
                    tracing::debug!(
                        error = %err,
                        partition = %partition,
                        attempt = token.attempts(),
                        delay_ms = delay.as_millis(),
                        "retrying after transient error"
                    );
                    ctx.clock().sleep(delay).await;
                }
            }
        }
    }
}

impl<Out: Send + 'static> Middleware<RequestBuilder, Out> for RetryMiddleware {
    fn id(&self) -> &str {
        RETRY_MIDDLEWARE_ID
    }

    fn handle<'a>(
        &'a self,
        ctx: OperationContext,
        builder: RequestBuilder,
        next: &'a dyn Handler<RequestBuilder, Out>,
    ) -> BoxFuture<'a, Result<Out, OperationError>> {
        Box::pin(self.run(ctx, builder, next))
    }
}

fn resolve_partition(
    ctx: &OperationContext,
    builder: &RequestBuilder,
) -> Result<String, OperationError> {
    if let Some(partition) = ctx.get(&keys::RETRY_PARTITION) {
        if !partition.is_empty() {
            return Ok(partition);
        }
    }
    match builder.host() {
        Some(host) if !host.is_empty() => Ok(host.to_string()),
        _ => Err(OperationError::config(
            "unable to resolve retry partition: no explicit partition and request host is empty",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use crate::middleware::{handler_fn, SharedHandler};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    /// Clock that records requested sleeps and returns immediately.
    struct ManualClock {
        sleeps: Mutex<Vec<Duration>>,
    }

    impl ManualClock {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                sleeps: Mutex::new(Vec::new()),
            })
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            Instant::now()
        }

        fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
            self.sleeps.lock().unwrap().push(duration);
            Box::pin(async {})
        }
    }

    fn ctx_with_clock(clock: Arc<ManualClock>) -> OperationContext {
        OperationContext::builder("TestOp").clock(clock).build()
    }

    fn builder_with_host() -> RequestBuilder {
        let mut builder = RequestBuilder::new();
        builder.set_host("svc.example.com");
        builder
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new()
            .max_attempts(3)
            .base_delay(Duration::from_millis(10))
            .jitter(0.0)
    }

    /// Downstream handler that fails with the scripted errors, then
    /// succeeds.
    fn scripted_handler(
        errors: Vec<OperationError>,
        calls: Arc<AtomicU32>,
    ) -> SharedHandler<RequestBuilder, u32> {
        let errors = Arc::new(Mutex::new(errors));
        Arc::new(handler_fn(move |_ctx, _builder: RequestBuilder| {
            let errors = errors.clone();
            let calls = calls.clone();
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                let next_error = errors.lock().unwrap().pop();
                match next_error {
                    Some(err) => Err(err),
                    None => Ok(99),
                }
            })
        }))
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let clock = ManualClock::new();
        let calls = Arc::new(AtomicU32::new(0));
        let middleware = RetryMiddleware::new(fast_policy());
        let next = scripted_handler(vec![], calls.clone());

        let out = middleware
            .run(ctx_with_clock(clock.clone()), builder_with_host(), next.as_ref())
            .await
            .unwrap();

        assert_eq!(out, 99);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(clock.sleeps.lock().unwrap().is_empty());
        // Success was recorded: budget back at full capacity.
        assert_eq!(
            middleware.pool.capacity("svc.example.com"),
            INITIAL_BUCKET_CAPACITY
        );
    }

    #[tokio::test]
    async fn test_throttled_then_success_records_one_success() {
        let clock = ManualClock::new();
        let calls = Arc::new(AtomicU32::new(0));
        let middleware = RetryMiddleware::new(fast_policy());
        let next = scripted_handler(vec![OperationError::throttled("busy")], calls.clone());

        let out = middleware
            .run(ctx_with_clock(clock.clone()), builder_with_host(), next.as_ref())
            .await
            .unwrap();

        assert_eq!(out, 99);
        // Attempt 1 throttled, attempt 2 succeeded: downstream ran twice,
        // exactly one backoff sleep happened.
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(clock.sleeps.lock().unwrap().len(), 1);
        // record_success refunded the throttling retry cost.
        assert_eq!(
            middleware.pool.capacity("svc.example.com"),
            INITIAL_BUCKET_CAPACITY
        );
    }

    #[tokio::test]
    async fn test_non_retryable_error_propagates_immediately() {
        let clock = ManualClock::new();
        let calls = Arc::new(AtomicU32::new(0));
        let middleware = RetryMiddleware::new(fast_policy());
        let next = scripted_handler(
            vec![OperationError::serialize("broken body")],
            calls.clone(),
        );

        let err = middleware
            .run(ctx_with_clock(clock.clone()), builder_with_host(), next.as_ref())
            .await
            .unwrap_err();

        assert!(matches!(err, OperationError::Serialize(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(clock.sleeps.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_attempts_exhausted_wraps_last_error() {
        let clock = ManualClock::new();
        let calls = Arc::new(AtomicU32::new(0));
        let middleware = RetryMiddleware::new(fast_policy());
        let next = scripted_handler(
            vec![
                OperationError::transport("reset 3"),
                OperationError::transport("reset 2"),
                OperationError::transport("reset 1"),
            ],
            calls.clone(),
        );

        let err = middleware
            .run(ctx_with_clock(clock.clone()), builder_with_host(), next.as_ref())
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match err {
            OperationError::RetriesExhausted { attempts, source } => {
                assert_eq!(attempts, 3);
                assert!(source.to_string().contains("reset 3"));
            }
            other => panic!("expected RetriesExhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_budget_exhausted_stops_retrying() {
        let clock = ManualClock::new();
        let calls = Arc::new(AtomicU32::new(0));
        let pool = Arc::new(PartitionPool::with_capacity(RETRY_COST));
        let middleware = RetryMiddleware::new(
            RetryPolicy::new()
                .max_attempts(10)
                .base_delay(Duration::from_millis(1))
                .jitter(0.0),
        )
        .with_pool(pool);
        let next = scripted_handler(
            (0..10)
                .map(|i| OperationError::transport(format!("reset {i}")))
                .collect(),
            calls.clone(),
        );

        let err = middleware
            .run(ctx_with_clock(clock.clone()), builder_with_host(), next.as_ref())
            .await
            .unwrap_err();

        // One initial attempt plus the single retry the budget could pay.
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(matches!(err, OperationError::RetriesExhausted { .. }));
    }

    #[tokio::test]
    async fn test_unresolvable_partition_fails_before_any_call() {
        let clock = ManualClock::new();
        let calls = Arc::new(AtomicU32::new(0));
        let middleware = RetryMiddleware::new(fast_policy());
        let next = scripted_handler(vec![], calls.clone());

        // No host, no partition override.
        let err = middleware
            .run(
                ctx_with_clock(clock.clone()),
                RequestBuilder::new(),
                next.as_ref(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, OperationError::Config(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_partition_override_beats_host() {
        let clock = ManualClock::new();
        let ctx = OperationContext::builder("TestOp")
            .clock(clock)
            .attribute(&keys::RETRY_PARTITION, "override-partition".to_string())
            .build();

        let calls = Arc::new(AtomicU32::new(0));
        let middleware = RetryMiddleware::new(fast_policy());
        let next = scripted_handler(vec![OperationError::transport("reset")], calls.clone());

        middleware
            .run(ctx, builder_with_host(), next.as_ref())
            .await
            .unwrap();

        // The retry charged (and success refunded) the override partition,
        // not the host partition.
        assert_eq!(
            middleware.pool.capacity("override-partition"),
            INITIAL_BUCKET_CAPACITY
        );
    }

    #[tokio::test]
    async fn test_backoff_delays_grow() {
        let clock = ManualClock::new();
        let calls = Arc::new(AtomicU32::new(0));
        let middleware = RetryMiddleware::new(
            RetryPolicy::new()
                .max_attempts(3)
                .base_delay(Duration::from_millis(10))
                .multiplier(2.0)
                .jitter(0.0),
        );
        let next = scripted_handler(
            vec![
                OperationError::transport("reset 2"),
                OperationError::transport("reset 1"),
            ],
            calls.clone(),
        );

        middleware
            .run(ctx_with_clock(clock.clone()), builder_with_host(), next.as_ref())
            .await
            .unwrap();

        assert_eq!(
            *clock.sleeps.lock().unwrap(),
            vec![Duration::from_millis(10), Duration::from_millis(20)]
        );
    }
}
