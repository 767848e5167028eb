//! Handler and middleware composition primitives.
//!
//! A [`Handler`] is a unary async function `(context, input) -> output` with
//! an explicit error channel. A [`Middleware`] wraps a handler: it receives
//! the input on the way in, decides whether to call `next`, and observes the
//! output on the way out. [`compose`] folds a declared middleware order
//! `[m1, m2, m3]` around a terminal handler `H` as `m1(m2(m3(H)))`, so `m1`
//! sees the request first and the response last.

use std::sync::Arc;

use opflow_core::{BoxFuture, OperationError};

use crate::context::OperationContext;

/// A unary async handler.
///
/// Implementations receive an owned context handle and input and produce the
/// output or propagate a failure.
pub trait Handler<In, Out>: Send + Sync {
    fn call<'a>(
        &'a self,
        ctx: OperationContext,
        input: In,
    ) -> BoxFuture<'a, Result<Out, OperationError>>;
}

/// A shared, type-erased handler.
pub type SharedHandler<In, Out> = Arc<dyn Handler<In, Out>>;

/// A middleware in a handler chain.
///
/// `handle` must either produce an output by calling `next` (optionally
/// after mutating the input or context) or short-circuit by returning its
/// own result without calling `next`. Failures from `next` propagate up the
/// chain unless the middleware is specifically designed to catch them (the
/// retry layer is).
pub trait Middleware<In, Out>: Send + Sync {
    /// Stable identity used for ordered insertion into a step.
    fn id(&self) -> &str;

    fn handle<'a>(
        &'a self,
        ctx: OperationContext,
        input: In,
        next: &'a dyn Handler<In, Out>,
    ) -> BoxFuture<'a, Result<Out, OperationError>>;
}

struct Wrapped<In, Out> {
    middleware: Arc<dyn Middleware<In, Out>>,
    next: SharedHandler<In, Out>,
}

impl<In, Out> Handler<In, Out> for Wrapped<In, Out>
where
    In: Send + 'static,
    Out: Send + 'static,
{
    fn call<'a>(
        &'a self,
        ctx: OperationContext,
        input: In,
    ) -> BoxFuture<'a, Result<Out, OperationError>> {
        self.middleware.handle(ctx, input, self.next.as_ref())
    }
}

/// Compose middlewares around a terminal handler in declared order.
///
/// The first middleware in `middlewares` becomes the outermost layer.
pub fn compose<In, Out>(
    middlewares: Vec<Arc<dyn Middleware<In, Out>>>,
    terminal: SharedHandler<In, Out>,
) -> SharedHandler<In, Out>
where
    In: Send + 'static,
    Out: Send + 'static,
{
    let mut wrapped = terminal;
    for middleware in middlewares.into_iter().rev() {
        wrapped = Arc::new(Wrapped {
            middleware,
            next: wrapped,
        });
    }
    wrapped
}

/// A handler built from a function.
pub struct FnHandler<F> {
    f: F,
}

/// Wrap a function as a [`Handler`].
///
/// ```
/// use opflow_client::middleware::{handler_fn, Handler};
/// use opflow_client::context::OperationContext;
///
/// let h = handler_fn(|_ctx: OperationContext, input: u32| {
///     Box::pin(async move { Ok(input + 1) })
/// });
/// ```
pub fn handler_fn<In, Out, F>(f: F) -> FnHandler<F>
where
    F: Fn(OperationContext, In) -> BoxFuture<'static, Result<Out, OperationError>> + Send + Sync,
{
    FnHandler { f }
}

impl<In, Out, F> Handler<In, Out> for FnHandler<F>
where
    In: Send + 'static,
    Out: Send + 'static,
    F: Fn(OperationContext, In) -> BoxFuture<'static, Result<Out, OperationError>> + Send + Sync,
{
    fn call<'a>(
        &'a self,
        ctx: OperationContext,
        input: In,
    ) -> BoxFuture<'a, Result<Out, OperationError>> {
        (self.f)(ctx, input)
    }
}
