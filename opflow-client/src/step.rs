//! Ordered middleware groups with position-addressed insertion.
//!
//! Each pipeline step owns an ordered group of middleware keyed by string
//! id. Insertion positions are resolved against existing ids; referencing an
//! unknown id is a configuration error, never a silent append: step
//! ordering is safety-critical (a signing middleware must run after body
//! finalization).

use std::sync::Arc;

use opflow_core::OperationError;

use crate::middleware::{compose, Middleware, SharedHandler};

/// Insertion position within a step.
#[derive(Clone, Copy, Debug)]
pub enum Position<'a> {
    First,
    Last,
    /// Immediately before the middleware with the given id.
    Before(&'a str),
    /// Immediately after the middleware with the given id.
    After(&'a str),
}

struct Entry<In, Out> {
    id: String,
    middleware: Arc<dyn Middleware<In, Out>>,
}

/// An ordered, id-addressed middleware group.
///
/// A step with zero middleware degenerates to a direct call into its
/// terminal handler.
pub struct Step<In, Out> {
    name: &'static str,
    entries: Vec<Entry<In, Out>>,
}

impl<In, Out> Step<In, Out>
where
    In: Send + 'static,
    Out: Send + 'static,
{
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: Vec::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The current middleware order, by id.
    pub fn order(&self) -> Vec<&str> {
        self.entries.iter().map(|entry| entry.id.as_str()).collect()
    }

    /// Insert a middleware at the given position.
    ///
    /// Fails with a configuration error when the middleware's id is already
    /// present or when `Before`/`After` reference an id that does not exist.
    pub fn insert(
        &mut self,
        middleware: Arc<dyn Middleware<In, Out>>,
        position: Position<'_>,
    ) -> Result<(), OperationError> {
        let id = middleware.id().to_string();
        if self.entries.iter().any(|entry| entry.id == id) {
            return Err(OperationError::config(format!(
                "duplicate middleware id `{id}` in step `{}`",
                self.name
            )));
        }

        let index = match position {
            Position::First => 0,
            Position::Last => self.entries.len(),
            Position::Before(reference) => self.index_of(reference)?,
            Position::After(reference) => self.index_of(reference)? + 1,
        };

        self.entries.insert(index, Entry { id, middleware });
        Ok(())
    }

    /// Append a middleware (shorthand for [`Position::Last`]).
    pub fn push(&mut self, middleware: Arc<dyn Middleware<In, Out>>) -> Result<(), OperationError> {
        self.insert(middleware, Position::Last)
    }

    fn index_of(&self, id: &str) -> Result<usize, OperationError> {
        self.entries
            .iter()
            .position(|entry| entry.id == id)
            .ok_or_else(|| {
                OperationError::config(format!(
                    "unknown middleware id `{id}` in step `{}`",
                    self.name
                ))
            })
    }

    /// Compile this step's middleware into one handler over `terminal`.
    pub(crate) fn compose_onto(&self, terminal: SharedHandler<In, Out>) -> SharedHandler<In, Out> {
        let middlewares = self
            .entries
            .iter()
            .map(|entry| entry.middleware.clone())
            .collect();
        compose(middlewares, terminal)
    }
}
