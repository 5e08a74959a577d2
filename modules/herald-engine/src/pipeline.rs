//! Per-dispatch middleware pipeline.
//!
//! A [`Pipeline`] is assembled fresh for every dispatch, mutated by
//! configuration callbacks, then consumed by [`Pipeline::build`] into a
//! [`PipelineRunner`]. The first middleware added is the outermost wrapper:
//! `use(A); use(B)` runs A, then B, then the terminal action.

use std::any::{Any, TypeId};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use herald_context::Context;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{ConfigurationError, DispatchResult};
use crate::services::ServiceScope;
use crate::signal::{SignalTypeInfo, SignalView};
use crate::transport::TransportType;

pub type BoxDispatchFuture = BoxFuture<'static, DispatchResult>;

/// Continuation into the rest of the chain.
pub type Next<S> = Arc<dyn Fn(Arc<S>, CancellationToken) -> BoxDispatchFuture + Send + Sync>;

/// Everything a middleware sees for one invocation.
pub struct MiddlewareContext<S: ?Sized> {
    signal: Arc<S>,
    signal_type: Arc<SignalTypeInfo>,
    next: Next<S>,
    services: ServiceScope,
    context: Context,
    transport: TransportType,
    cancel: CancellationToken,
}

impl<S: ?Sized + SignalView> MiddlewareContext<S> {
    pub fn signal(&self) -> &Arc<S> {
        &self.signal
    }

    /// Runtime type of the published value, which may be more specific than `S`.
    pub fn signal_type(&self) -> &SignalTypeInfo {
        &self.signal_type
    }

    pub fn services(&self) -> &ServiceScope {
        &self.services
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn transport_type(&self) -> &TransportType {
        &self.transport
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Continue with a possibly replaced signal and token.
    pub fn next(&self, signal: Arc<S>, cancel: CancellationToken) -> BoxDispatchFuture {
        (self.next)(signal, cancel)
    }

    /// Continue with the current signal and token.
    pub fn proceed(&self) -> BoxDispatchFuture {
        self.next(Arc::clone(&self.signal), self.cancel.clone())
    }
}

#[async_trait]
pub trait SignalMiddleware<S: ?Sized + SignalView>: Send + Sync + 'static {
    async fn execute(&self, ctx: MiddlewareContext<S>) -> DispatchResult;
}

/// Closure middleware added through [`Pipeline::use_fn`].
pub struct FnMiddleware<F, Fut> {
    f: F,
    _future: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnMiddleware<F, Fut> {
    pub fn new(f: F) -> Self {
        Self {
            f,
            _future: PhantomData,
        }
    }
}

#[async_trait]
impl<S, F, Fut> SignalMiddleware<S> for FnMiddleware<F, Fut>
where
    S: ?Sized + SignalView,
    F: Fn(MiddlewareContext<S>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = DispatchResult> + Send + 'static,
{
    async fn execute(&self, ctx: MiddlewareContext<S>) -> DispatchResult {
        (self.f)(ctx).await
    }
}

trait PipelineEntry<S: ?Sized + SignalView>: Send + Sync {
    fn middleware_type(&self) -> TypeId;
    fn name(&self) -> &'static str;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn into_middleware(self: Box<Self>) -> Arc<dyn SignalMiddleware<S>>;
}

impl<S, M> PipelineEntry<S> for M
where
    S: ?Sized + SignalView,
    M: SignalMiddleware<S>,
{
    fn middleware_type(&self) -> TypeId {
        TypeId::of::<M>()
    }

    fn name(&self) -> &'static str {
        std::any::type_name::<M>()
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_middleware(self: Box<Self>) -> Arc<dyn SignalMiddleware<S>> {
        Arc::new(*self)
    }
}

/// Ordered, mutable middleware list bound to one dispatch.
pub struct Pipeline<S: ?Sized + SignalView> {
    entries: Vec<Box<dyn PipelineEntry<S>>>,
    signal_type: Arc<SignalTypeInfo>,
    services: ServiceScope,
    context: Context,
    transport: TransportType,
}

impl<S: ?Sized + SignalView> Pipeline<S> {
    pub fn new(
        signal_type: Arc<SignalTypeInfo>,
        services: ServiceScope,
        context: Context,
        transport: TransportType,
    ) -> Self {
        Self {
            entries: Vec::new(),
            signal_type,
            services,
            context,
            transport,
        }
    }

    pub fn use_middleware<M: SignalMiddleware<S>>(&mut self, middleware: M) -> &mut Self {
        self.entries.push(Box::new(middleware));
        self
    }

    pub fn use_fn<F, Fut>(&mut self, f: F) -> &mut Self
    where
        F: Fn(MiddlewareContext<S>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DispatchResult> + Send + 'static,
    {
        self.use_middleware(FnMiddleware::new(f))
    }

    /// Remove every instance of `M`. No-op if absent.
    pub fn without<M: Any>(&mut self) -> &mut Self {
        let id = TypeId::of::<M>();
        self.entries.retain(|entry| (**entry).middleware_type() != id);
        self
    }

    /// Mutate every instance of `M` in place.
    pub fn configure<M: Any>(
        &mut self,
        mut configure: impl FnMut(&mut M),
    ) -> Result<&mut Self, ConfigurationError> {
        let mut found = false;
        for entry in &mut self.entries {
            if let Some(middleware) = (**entry).as_any_mut().downcast_mut::<M>() {
                configure(middleware);
                found = true;
            }
        }

        if !found {
            return Err(ConfigurationError::MiddlewareNotInPipeline {
                middleware: std::any::type_name::<M>(),
            });
        }
        Ok(self)
    }

    pub fn contains<M: Any>(&self) -> bool {
        let id = TypeId::of::<M>();
        self.entries.iter().any(|entry| (**entry).middleware_type() == id)
    }

    pub fn middleware_names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|entry| (**entry).name()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn signal_type(&self) -> &SignalTypeInfo {
        &self.signal_type
    }

    pub fn services(&self) -> &ServiceScope {
        &self.services
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn transport_type(&self) -> &TransportType {
        &self.transport
    }

    /// Compose the chain around `terminal`.
    pub fn build(self, terminal: Next<S>) -> PipelineRunner<S> {
        let Pipeline {
            entries,
            signal_type,
            services,
            context,
            transport,
        } = self;

        debug!(
            signal = signal_type.concrete().name(),
            transport = %transport,
            middlewares = entries.len(),
            "building pipeline"
        );

        let len = entries.len();
        let mut next = terminal;
        for entry in entries.into_iter().rev() {
            let middleware = entry.into_middleware();
            let inner = next;
            let signal_type = Arc::clone(&signal_type);
            let services = services.clone();
            let context = context.clone();
            let transport = transport.clone();

            let wrapped: Next<S> = Arc::new(
                move |signal: Arc<S>, cancel: CancellationToken| -> BoxDispatchFuture {
                    let ctx = MiddlewareContext {
                        signal,
                        signal_type: Arc::clone(&signal_type),
                        next: Arc::clone(&inner),
                        services: services.clone(),
                        context: context.clone(),
                        transport: transport.clone(),
                        cancel,
                    };
                    let middleware = Arc::clone(&middleware);
                    Box::pin(async move { middleware.execute(ctx).await })
                },
            );
            next = wrapped;
        }

        PipelineRunner { entry: next, len }
    }
}

/// The composed, immutable chain.
pub struct PipelineRunner<S: ?Sized> {
    entry: Next<S>,
    len: usize,
}

impl<S: ?Sized + SignalView> PipelineRunner<S> {
    pub fn run(&self, signal: Arc<S>, cancel: CancellationToken) -> BoxDispatchFuture {
        (self.entry)(signal, cancel)
    }

    /// Number of middlewares wrapped around the terminal action.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
