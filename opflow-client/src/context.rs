//! Per-operation context: a type-keyed attribute bag threaded through every
//! pipeline stage.
//!
//! The context is created once per operation invocation by
//! [`ContextBuilder`], cloned as a cheap handle into every stage, and read or
//! augmented between stages. Stage execution is strictly sequential, so a
//! value set by an earlier stage is always visible to later ones.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::clock::{Clock, TokioClock};

/// A typed attribute key.
///
/// The key carries its value type at the type level; lookups through a key
/// are type-checked and absence returns `None`. Keys are declared as
/// statics:
///
/// ```
/// use opflow_client::context::AttributeKey;
///
/// static REQUEST_TAG: AttributeKey<String> = AttributeKey::new("example.request_tag");
/// ```
pub struct AttributeKey<T> {
    name: &'static str,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T> AttributeKey<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: std::marker::PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Type-keyed heterogeneous map backing [`OperationContext`].
#[derive(Default)]
pub struct Attributes {
    values: HashMap<(TypeId, &'static str), Box<dyn Any + Send + Sync>>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set<T: Send + Sync + 'static>(&mut self, key: &AttributeKey<T>, value: T) {
        self.values
            .insert((TypeId::of::<T>(), key.name), Box::new(value));
    }

    pub fn get<T: Clone + Send + Sync + 'static>(&self, key: &AttributeKey<T>) -> Option<T> {
        self.values
            .get(&(TypeId::of::<T>(), key.name))
            .and_then(|value| value.downcast_ref::<T>())
            .cloned()
    }

    pub fn contains<T: Send + Sync + 'static>(&self, key: &AttributeKey<T>) -> bool {
        self.values.contains_key(&(TypeId::of::<T>(), key.name))
    }

    pub fn remove<T: Send + Sync + 'static>(&mut self, key: &AttributeKey<T>) {
        self.values.remove(&(TypeId::of::<T>(), key.name));
    }
}

struct ContextInner {
    operation: String,
    attributes: Mutex<Attributes>,
    clock: Arc<dyn Clock>,
}

/// Handle to the per-operation context.
///
/// Cloning produces another handle to the same context. Attribute access is
/// internally synchronized, but the pipeline never mutates the context from
/// two stages concurrently; stages run strictly in sequence.
#[derive(Clone)]
pub struct OperationContext {
    inner: Arc<ContextInner>,
}

impl OperationContext {
    /// Start building a context for the named operation.
    pub fn builder(operation: impl Into<String>) -> ContextBuilder {
        ContextBuilder {
            operation: operation.into(),
            attributes: Attributes::new(),
            clock: None,
        }
    }

    /// The operation name this context was built for.
    pub fn operation(&self) -> &str {
        &self.inner.operation
    }

    /// The injected clock.
    pub fn clock(&self) -> Arc<dyn Clock> {
        self.inner.clock.clone()
    }

    /// Look up an attribute; returns a clone of the stored value.
    pub fn get<T: Clone + Send + Sync + 'static>(&self, key: &AttributeKey<T>) -> Option<T> {
        self.inner.attributes.lock().unwrap().get(key)
    }

    /// Set an attribute, replacing any previous value under the same key.
    pub fn set<T: Send + Sync + 'static>(&self, key: &AttributeKey<T>, value: T) {
        self.inner.attributes.lock().unwrap().set(key, value);
    }

    pub fn contains<T: Send + Sync + 'static>(&self, key: &AttributeKey<T>) -> bool {
        self.inner.attributes.lock().unwrap().contains(key)
    }
}

impl std::fmt::Debug for OperationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationContext")
            .field("operation", &self.inner.operation)
            .finish_non_exhaustive()
    }
}

/// Builder for [`OperationContext`].
pub struct ContextBuilder {
    operation: String,
    attributes: Attributes,
    clock: Option<Arc<dyn Clock>>,
}

impl ContextBuilder {
    /// Seed an attribute before the context is handed to the pipeline.
    pub fn attribute<T: Send + Sync + 'static>(mut self, key: &AttributeKey<T>, value: T) -> Self {
        self.attributes.set(key, value);
        self
    }

    /// Inject a clock. Defaults to [`TokioClock`].
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> OperationContext {
        OperationContext {
            inner: Arc::new(ContextInner {
                operation: self.operation,
                attributes: Mutex::new(self.attributes),
                clock: self.clock.unwrap_or_else(|| Arc::new(TokioClock)),
            }),
        }
    }
}

/// Well-known attribute keys used by the pipeline itself.
pub mod keys {
    use super::AttributeKey;
    use crate::chunked::ChecksumCacheSlot;

    /// Explicit retry partition override. When absent the retry layer derives
    /// the partition from the request host.
    pub static RETRY_PARTITION: AttributeKey<String> =
        AttributeKey::new("opflow.retry.partition");

    /// Host override applied when the request builder is snapshotted.
    pub static HOST_OVERRIDE: AttributeKey<String> = AttributeKey::new("opflow.host.override");

    /// Cached trailing-checksum slot shared between chunked-upload attempts.
    pub static CACHED_TRAILER_CHECKSUM: AttributeKey<ChecksumCacheSlot> =
        AttributeKey::new("opflow.chunked.cached_trailer_checksum");
}
