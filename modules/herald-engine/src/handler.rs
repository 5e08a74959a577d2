//! Handlers and the invokers that call them through a receiver pipeline.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{self, BoxFuture};
use herald_context::Context;
use tokio_util::sync::CancellationToken;

use crate::dispatcher::{Engine, SignalDispatcher};
use crate::error::{ConfigurationError, DispatchError};
use crate::pipeline::{BoxDispatchFuture, Next, Pipeline};
use crate::services::ServiceScope;
use crate::signal::{view_of, AnySignal, Signal, SignalType, SignalTypeInfo, SignalView};
use crate::transport::TransportType;

/// Receives signals of type `S` (a concrete signal or a family view).
#[async_trait]
pub trait SignalHandler<S: ?Sized + SignalView>: Send + Sync + 'static {
    async fn handle(&self, signal: Arc<S>, ctx: &HandlerContext) -> anyhow::Result<()>;

    /// Receiver-side pipeline wrapped around every call to [`handle`](Self::handle).
    fn configure_pipeline(pipeline: &mut Pipeline<S>) -> Result<(), ConfigurationError>
    where
        Self: Sized,
    {
        let _ = pipeline;
        Ok(())
    }

    /// Whether the in-process transport delivers to this handler.
    fn in_process_receiver() -> bool
    where
        Self: Sized,
    {
        true
    }
}

/// What a handler sees for one invocation.
#[derive(Clone)]
pub struct HandlerContext {
    engine: Engine,
    services: ServiceScope,
    context: Context,
    transport: TransportType,
    signal_type: Arc<SignalTypeInfo>,
    cancel: CancellationToken,
}

impl HandlerContext {
    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn services(&self) -> &ServiceScope {
        &self.services
    }

    pub fn transport_type(&self) -> &TransportType {
        &self.transport
    }

    pub fn signal_type(&self) -> &SignalTypeInfo {
        &self.signal_type
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Publish a nested signal as part of this invocation.
    pub fn publisher<T: Signal>(&self) -> SignalDispatcher<T> {
        self.engine
            .publisher::<T>(self.services.clone())
            .within(self.context.clone())
    }
}

/// Arguments for one handler invocation.
pub struct InvocationScope {
    pub engine: Engine,
    pub services: ServiceScope,
    pub context: Context,
    pub transport: TransportType,
    pub signal_type: Arc<SignalTypeInfo>,
    pub cancel: CancellationToken,
}

impl InvocationScope {
    fn handler_context(&self, cancel: CancellationToken) -> HandlerContext {
        HandlerContext {
            engine: self.engine.clone(),
            services: self.services.clone(),
            context: self.context.clone(),
            transport: self.transport.clone(),
            signal_type: Arc::clone(&self.signal_type),
            cancel,
        }
    }

    fn pipeline<V: ?Sized + SignalView>(&self) -> Pipeline<V> {
        Pipeline::new(
            Arc::clone(&self.signal_type),
            self.services.clone(),
            self.context.clone(),
            self.transport.clone(),
        )
    }
}

/// Calls one registered handler for a type-erased signal.
pub trait HandlerInvoker: Send + Sync + 'static {
    fn invoke(&self, signal: Arc<dyn AnySignal>, scope: InvocationScope) -> BoxDispatchFuture;
}

fn view<V: ?Sized + 'static>(signal: &Arc<dyn AnySignal>) -> Result<Arc<V>, DispatchError> {
    view_of::<V>(signal).ok_or_else(|| {
        ConfigurationError::SignalNotAssignable {
            signal: signal.type_info().concrete().name(),
            target: SignalType::of::<V>().name(),
        }
        .into()
    })
}

pub(crate) type HandlerFactory<H> = Arc<dyn Fn(&ServiceScope) -> H + Send + Sync>;

pub(crate) enum HandlerSource<H> {
    /// A fresh handler per invocation.
    Factory(HandlerFactory<H>),
    /// One shared handler for every invocation.
    Instance(Arc<H>),
}

pub(crate) struct TypedInvoker<V: ?Sized, H> {
    source: HandlerSource<H>,
    _view: PhantomData<fn(Arc<V>)>,
}

impl<V: ?Sized, H> TypedInvoker<V, H> {
    pub(crate) fn new(source: HandlerSource<H>) -> Self {
        Self {
            source,
            _view: PhantomData,
        }
    }
}

impl<V, H> HandlerInvoker for TypedInvoker<V, H>
where
    V: ?Sized + SignalView,
    H: SignalHandler<V>,
{
    fn invoke(&self, signal: Arc<dyn AnySignal>, scope: InvocationScope) -> BoxDispatchFuture {
        let signal = match view::<V>(&signal) {
            Ok(signal) => signal,
            Err(err) => return Box::pin(future::ready(Err(err))),
        };

        let mut pipeline = scope.pipeline::<V>();
        if let Err(err) = <H as SignalHandler<V>>::configure_pipeline(&mut pipeline) {
            return Box::pin(future::ready(Err(err.into())));
        }

        let handler = match &self.source {
            HandlerSource::Factory(factory) => Arc::new(factory(&scope.services)),
            HandlerSource::Instance(instance) => Arc::clone(instance),
        };

        let scope = Arc::new(scope);
        let terminal_scope = Arc::clone(&scope);
        let terminal: Next<V> = Arc::new(
            move |signal: Arc<V>, cancel: CancellationToken| -> BoxDispatchFuture {
                let handler = Arc::clone(&handler);
                let ctx = terminal_scope.handler_context(cancel);
                Box::pin(async move {
                    <H as SignalHandler<V>>::handle(&*handler, signal, &ctx)
                        .await
                        .map_err(DispatchError::from_handler)
                })
            },
        );

        pipeline.build(terminal).run(signal, scope.cancel.clone())
    }
}

type HandlerFuture = BoxFuture<'static, anyhow::Result<()>>;

pub(crate) type DelegateFn<V> = Arc<dyn Fn(Arc<V>, HandlerContext) -> HandlerFuture + Send + Sync>;

pub(crate) type DelegatePipelineFn<V> =
    Arc<dyn Fn(&mut Pipeline<V>) -> Result<(), ConfigurationError> + Send + Sync>;

pub(crate) struct DelegateInvoker<V: ?Sized + SignalView> {
    handler: DelegateFn<V>,
    configure: Option<DelegatePipelineFn<V>>,
}

impl<V: ?Sized + SignalView> DelegateInvoker<V> {
    pub(crate) fn new<F, Fut>(handler: F, configure: Option<DelegatePipelineFn<V>>) -> Self
    where
        F: Fn(Arc<V>, HandlerContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            handler: Arc::new(
                move |signal: Arc<V>, ctx: HandlerContext| -> HandlerFuture {
                    Box::pin(handler(signal, ctx))
                },
            ),
            configure,
        }
    }
}

impl<V: ?Sized + SignalView> HandlerInvoker for DelegateInvoker<V> {
    fn invoke(&self, signal: Arc<dyn AnySignal>, scope: InvocationScope) -> BoxDispatchFuture {
        let signal = match view::<V>(&signal) {
            Ok(signal) => signal,
            Err(err) => return Box::pin(future::ready(Err(err))),
        };

        let mut pipeline = scope.pipeline::<V>();
        if let Some(configure) = &self.configure {
            if let Err(err) = configure(&mut pipeline) {
                return Box::pin(future::ready(Err(err.into())));
            }
        }

        let handler = Arc::clone(&self.handler);
        let scope = Arc::new(scope);
        let terminal_scope = Arc::clone(&scope);
        let terminal: Next<V> = Arc::new(
            move |signal: Arc<V>, cancel: CancellationToken| -> BoxDispatchFuture {
                let call = handler(signal, terminal_scope.handler_context(cancel));
                Box::pin(async move { call.await.map_err(DispatchError::from_handler) })
            },
        );

        pipeline.build(terminal).run(signal, scope.cancel.clone())
    }
}
