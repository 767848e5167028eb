//! Partitioned retry-token budget.
//!
//! Every request charges retries against the token bucket of its partition
//! (normally the request host). Partitions never share a bucket, so a single
//! hot endpoint cannot starve the retry budget of unrelated hosts. Buckets
//! are mutex-guarded; concurrent acquire/refresh/record-success calls against
//! one partition serialize on its lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use opflow_core::ErrorClass;

/// Initial and maximum capacity of a partition's bucket.
pub const INITIAL_BUCKET_CAPACITY: u32 = 500;

/// Capacity cost of retrying after a transient failure.
pub const RETRY_COST: u32 = 5;

/// Capacity cost of retrying after a timeout or throttling failure.
pub const TIMEOUT_RETRY_COST: u32 = 10;

/// Capacity returned to the bucket on success, beyond refunding held costs.
pub const SUCCESS_INCREMENT: u32 = 1;

/// Opaque state representing one request's place in a partition's budget.
///
/// Acquired before the first attempt, replaced on every retry, and released
/// by recording success. Never shared across partitions.
#[derive(Debug)]
pub struct RetryToken {
    partition: String,
    attempts: u32,
    /// Capacity charged so far; refunded when success is recorded.
    held: u32,
}

impl RetryToken {
    pub fn partition(&self) -> &str {
        &self.partition
    }

    /// Attempts made under this token, including the initial one.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn held(&self) -> u32 {
        self.held
    }
}

#[derive(Debug)]
struct TokenBucket {
    capacity: u32,
    max_capacity: u32,
}

impl TokenBucket {
    fn new(max_capacity: u32) -> Self {
        Self {
            capacity: max_capacity,
            max_capacity,
        }
    }

    fn try_acquire(&mut self, cost: u32) -> bool {
        if self.capacity < cost {
            return false;
        }
        self.capacity -= cost;
        true
    }

    fn refund(&mut self, amount: u32) {
        self.capacity = (self.capacity + amount).min(self.max_capacity);
    }
}

/// Lazily-created token buckets keyed by partition.
#[derive(Debug)]
pub struct PartitionPool {
    buckets: Mutex<HashMap<String, Arc<Mutex<TokenBucket>>>>,
    max_capacity: u32,
}

impl PartitionPool {
    pub fn new() -> Self {
        Self::with_capacity(INITIAL_BUCKET_CAPACITY)
    }

    pub fn with_capacity(max_capacity: u32) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            max_capacity,
        }
    }

    fn bucket(&self, partition: &str) -> Arc<Mutex<TokenBucket>> {
        let mut buckets = self.buckets.lock().unwrap();
        buckets
            .entry(partition.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(TokenBucket::new(self.max_capacity))))
            .clone()
    }

    /// Remaining capacity of a partition's bucket.
    pub fn capacity(&self, partition: &str) -> u32 {
        self.bucket(partition).lock().unwrap().capacity
    }

    /// Acquire the token for a request's first attempt.
    ///
    /// The initial attempt is free; only retries charge the bucket.
    pub fn acquire_initial(&self, partition: &str) -> RetryToken {
        // Materialize the bucket so the partition exists for the lifetime of
        // the request.
        let _ = self.bucket(partition);
        RetryToken {
            partition: partition.to_string(),
            attempts: 1,
            held: 0,
        }
    }

    /// Replace a token for one more attempt after a retryable failure.
    ///
    /// Returns `None` when the partition's budget cannot pay for another
    /// attempt; the request then terminates with its last error.
    pub fn refresh(&self, token: RetryToken, class: ErrorClass) -> Option<RetryToken> {
        let cost = match class {
            ErrorClass::Throttling | ErrorClass::Timeout => TIMEOUT_RETRY_COST,
            _ => RETRY_COST,
        };

        let bucket = self.bucket(&token.partition);
        let mut bucket = bucket.lock().unwrap();
        if !bucket.try_acquire(cost) {
            return None;
        }

        Some(RetryToken {
            partition: token.partition,
            attempts: token.attempts + 1,
            held: token.held + cost,
        })
    }

    /// Record final success, refunding the token's held capacity plus a
    /// small increment. Consumes the token: success is recorded exactly
    /// once.
    pub fn record_success(&self, token: RetryToken) {
        let bucket = self.bucket(&token.partition);
        bucket
            .lock()
            .unwrap()
            .refund(token.held + SUCCESS_INCREMENT);
    }
}

impl Default for PartitionPool {
    fn default() -> Self {
        Self::new()
    }
}
