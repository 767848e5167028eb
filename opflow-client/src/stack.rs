//! The operation stack: five fixed steps composed into one end-to-end
//! handler from typed input to typed output.
//!
//! Data flow: typed input → Initialize (context-only derivation) → Serialize
//! (typed input → request builder, via the injected [`Serializer`]) → Build
//! (headers/query/body framing) → Finalize (sign, retry-wrap, snapshot the
//! builder) → Deserialize (wire response → typed output, via the injected
//! [`Deserializer`]) → typed output.
//!
//! The stack is built mutably, then wired once per [`OperationStack::execute`]
//! call; the wiring is immutable while execution runs.

use std::sync::Arc;

use opflow_core::{BoxFuture, OperationError};

use crate::context::OperationContext;
use crate::middleware::{Handler, SharedHandler};
use crate::request::{BuiltRequest, RequestBuilder};
use crate::response::WireResponse;
use crate::step::Step;
use crate::transport::Transport;

/// Applies a typed input to the request builder.
///
/// May be composed: several serializers can each contribute part of one
/// request (path, query, body).
pub trait Serializer<I>: Send + Sync {
    fn apply(
        &self,
        input: &I,
        builder: &mut RequestBuilder,
        ctx: &OperationContext,
    ) -> Result<(), OperationError>;
}

/// Turns a complete wire response into typed output or a typed error.
pub trait Deserializer<O>: Send + Sync {
    fn deserialize<'a>(
        &'a self,
        response: WireResponse,
        ctx: OperationContext,
    ) -> BoxFuture<'a, Result<O, OperationError>>;
}

/// The value flowing back through the chain: the raw response while it is
/// still undeserialized, then the typed output.
#[derive(Debug)]
pub struct OperationOutput<O> {
    /// Raw response; present between transport execution and
    /// deserialization.
    pub response: Option<WireResponse>,
    /// Typed output, set by the response deserializer.
    pub output: Option<O>,
}

/// Input to the Serialize step: the typed input paired with the builder it
/// serializes into.
#[derive(Debug)]
pub struct SerializeInput<I> {
    pub input: I,
    pub builder: RequestBuilder,
}

/// The five-step operation orchestrator.
///
/// Step order is fixed; within a step, middleware order is controlled by
/// id-addressed insertion (see [`Step`]).
pub struct OperationStack<I, O> {
    pub initialize: Step<I, OperationOutput<O>>,
    pub serialize: Step<SerializeInput<I>, OperationOutput<O>>,
    pub build: Step<RequestBuilder, OperationOutput<O>>,
    pub finalize: Step<RequestBuilder, OperationOutput<O>>,
    pub deserialize: Step<BuiltRequest, OperationOutput<O>>,
}

impl<I, O> OperationStack<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    pub fn new() -> Self {
        Self {
            initialize: Step::new("initialize"),
            serialize: Step::new("serialize"),
            build: Step::new("build"),
            finalize: Step::new("finalize"),
            deserialize: Step::new("deserialize"),
        }
    }

    /// Execute the operation end to end.
    ///
    /// Wires the steps inside-out (the transport is the terminal handler of
    /// the Deserialize step, the injected deserializer sits directly above
    /// it), then runs the composed chain. A chain that completes without
    /// producing typed output indicates a pipeline bug and fails with an
    /// invariant error rather than returning nothing.
    pub async fn execute(
        &self,
        ctx: OperationContext,
        input: I,
        serializer: Arc<dyn Serializer<I>>,
        deserializer: Arc<dyn Deserializer<O>>,
        transport: Arc<dyn Transport>,
    ) -> Result<O, OperationError> {
        let transport_terminal: SharedHandler<BuiltRequest, OperationOutput<O>> =
            Arc::new(TransportTerminal { transport });

        let deserialize_chain = self.deserialize.compose_onto(Arc::new(DeserializeResponse {
            deserializer,
            next: transport_terminal,
        }));

        let finalize_chain = self.finalize.compose_onto(Arc::new(SnapshotBuilder {
            next: deserialize_chain,
        }));

        // Build and Finalize share the builder as their value type; the
        // build chain feeds the finalize chain directly.
        let build_chain = self.build.compose_onto(finalize_chain);

        let serialize_chain = self.serialize.compose_onto(Arc::new(ApplySerializer {
            serializer,
            next: build_chain,
        }));

        let initialize_chain = self.initialize.compose_onto(Arc::new(StartSerialize {
            next: serialize_chain,
        }));

        let result = initialize_chain.call(ctx, input).await?;
        result
            .output
            .ok_or_else(|| OperationError::invariant("operation completed without typed output"))
    }
}

impl<I, O> Default for OperationStack<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Adapter: entry of the Serialize step. Pairs the typed input with a fresh
/// request builder.
struct StartSerialize<I, O> {
    next: SharedHandler<SerializeInput<I>, OperationOutput<O>>,
}

impl<I, O> Handler<I, OperationOutput<O>> for StartSerialize<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    fn call<'a>(
        &'a self,
        ctx: OperationContext,
        input: I,
    ) -> BoxFuture<'a, Result<OperationOutput<O>, OperationError>> {
        Box::pin(async move {
            let serialize_input = SerializeInput {
                input,
                builder: RequestBuilder::new(),
            };
            self.next.call(ctx, serialize_input).await
        })
    }
}

/// Adapter: terminal of the Serialize step. Applies the injected serializer
/// to the builder, then hands the builder to the Build step.
struct ApplySerializer<I, O> {
    serializer: Arc<dyn Serializer<I>>,
    next: SharedHandler<RequestBuilder, OperationOutput<O>>,
}

impl<I, O> Handler<SerializeInput<I>, OperationOutput<O>> for ApplySerializer<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    fn call<'a>(
        &'a self,
        ctx: OperationContext,
        mut input: SerializeInput<I>,
    ) -> BoxFuture<'a, Result<OperationOutput<O>, OperationError>> {
        Box::pin(async move {
            self.serializer
                .apply(&input.input, &mut input.builder, &ctx)?;
            self.next.call(ctx, input.builder).await
        })
    }
}

/// Adapter: terminal of the Finalize step. Snapshots the builder into the
/// built request for this attempt.
struct SnapshotBuilder<O> {
    next: SharedHandler<BuiltRequest, OperationOutput<O>>,
}

impl<O> Handler<RequestBuilder, OperationOutput<O>> for SnapshotBuilder<O>
where
    O: Send + 'static,
{
    fn call<'a>(
        &'a self,
        ctx: OperationContext,
        builder: RequestBuilder,
    ) -> BoxFuture<'a, Result<OperationOutput<O>, OperationError>> {
        Box::pin(async move {
            let built = builder.build(&ctx)?;
            self.next.call(ctx, built).await
        })
    }
}

/// The injected deserializer, sitting directly above the transport terminal.
struct DeserializeResponse<O> {
    deserializer: Arc<dyn Deserializer<O>>,
    next: SharedHandler<BuiltRequest, OperationOutput<O>>,
}

impl<O> Handler<BuiltRequest, OperationOutput<O>> for DeserializeResponse<O>
where
    O: Send + 'static,
{
    fn call<'a>(
        &'a self,
        ctx: OperationContext,
        request: BuiltRequest,
    ) -> BoxFuture<'a, Result<OperationOutput<O>, OperationError>> {
        Box::pin(async move {
            let mut out = self.next.call(ctx.clone(), request).await?;
            let response = out.response.take().ok_or_else(|| {
                OperationError::invariant("transport completed without a response")
            })?;
            out.output = Some(self.deserializer.deserialize(response, ctx).await?);
            Ok(out)
        })
    }
}

/// Terminal handler: one transport round trip.
struct TransportTerminal {
    transport: Arc<dyn Transport>,
}

impl<O> Handler<BuiltRequest, OperationOutput<O>> for TransportTerminal
where
    O: Send + 'static,
{
    fn call<'a>(
        &'a self,
        _ctx: OperationContext,
        request: BuiltRequest,
    ) -> BoxFuture<'a, Result<OperationOutput<O>, OperationError>> {
        Box::pin(async move {
            let response = self.transport.send(request).await?;
            Ok(OperationOutput {
                response: Some(response),
                output: None,
            })
        })
    }
}
