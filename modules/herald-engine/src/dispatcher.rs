//! The engine handle and the per-signal dispatcher.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use herald_context::{Context, ContextScope};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, Instrument};

use crate::broadcast::{BroadcastingStrategy, SequentialBroadcastingStrategy};
use crate::config::EngineConfig;
use crate::error::{ConfigurationError, DispatchResult};
use crate::pipeline::{BoxDispatchFuture, Next, Pipeline};
use crate::registry::HandlerRegistry;
use crate::services::ServiceScope;
use crate::signal::{AnySignal, Signal, SignalTypeInfo};
use crate::transport::{SignalTransport, TransportBuilder, TransportRole, TransportType};

struct EngineInner {
    registry: HandlerRegistry,
    config: EngineConfig,
    default_strategy: Arc<dyn BroadcastingStrategy>,
}

/// Cheaply clonable entry point: a registry plus the default strategy.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Fails if the configured default strategy is invalid.
    pub fn new(
        registry: HandlerRegistry,
        config: EngineConfig,
    ) -> Result<Self, ConfigurationError> {
        let default_strategy = config.broadcasting.strategy()?;
        Ok(Self::with_strategy(registry, config, default_strategy))
    }

    /// Sequential, collect-and-aggregate delivery.
    pub fn from_registry(registry: HandlerRegistry) -> Self {
        Self::with_strategy(
            registry,
            EngineConfig::default(),
            Arc::new(SequentialBroadcastingStrategy::default()),
        )
    }

    fn with_strategy(
        registry: HandlerRegistry,
        config: EngineConfig,
        default_strategy: Arc<dyn BroadcastingStrategy>,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                registry,
                config,
                default_strategy,
            }),
        }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.inner.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn default_strategy(&self) -> Arc<dyn BroadcastingStrategy> {
        Arc::clone(&self.inner.default_strategy)
    }

    /// Dispatcher for publishing `S` as a new operation.
    pub fn publisher<S: Signal>(&self, services: ServiceScope) -> SignalDispatcher<S> {
        SignalDispatcher::new(self.clone(), services, TransportRole::Publisher)
    }

    /// Dispatcher for delivering an inbound `S` that continues the operation
    /// carried by `context` (used by transport adapters on the receiving side).
    pub fn receiver<S: Signal>(
        &self,
        services: ServiceScope,
        context: Context,
    ) -> SignalDispatcher<S> {
        SignalDispatcher::new(self.clone(), services, TransportRole::Receiver).within(context)
    }
}

type ConfigurePipeline<S> =
    Arc<dyn Fn(&mut Pipeline<S>) -> Result<(), ConfigurationError> + Send + Sync>;

type TransportFuture = BoxFuture<'static, DispatchResult<Arc<dyn SignalTransport>>>;

type ConfigureTransport = Arc<dyn Fn(TransportBuilder) -> TransportFuture + Send + Sync>;

/// Publishes one signal type. Configuration is accumulated builder-style and
/// applied fresh on every [`dispatch`](Self::dispatch).
pub struct SignalDispatcher<S: Signal> {
    engine: Engine,
    services: ServiceScope,
    parent: Option<Context>,
    role: TransportRole,
    pipelines: Vec<ConfigurePipeline<S>>,
    transport: Option<ConfigureTransport>,
}

impl<S: Signal> Clone for SignalDispatcher<S> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            services: self.services.clone(),
            parent: self.parent.clone(),
            role: self.role,
            pipelines: self.pipelines.clone(),
            transport: self.transport.clone(),
        }
    }
}

impl<S: Signal> SignalDispatcher<S> {
    fn new(engine: Engine, services: ServiceScope, role: TransportRole) -> Self {
        Self {
            engine,
            services,
            parent: None,
            role,
            pipelines: Vec::new(),
            transport: None,
        }
    }

    /// Run inside `context`: forked for publishers, shared for receivers.
    pub fn within(mut self, context: Context) -> Self {
        self.parent = Some(context);
        self
    }

    /// Add a pipeline configuration. Several are applied in the order added.
    pub fn with_pipeline<F>(mut self, configure: F) -> Self
    where
        F: Fn(&mut Pipeline<S>) -> Result<(), ConfigurationError> + Send + Sync + 'static,
    {
        self.pipelines.push(Arc::new(configure));
        self
    }

    /// Choose the transport per dispatch. Replaces any earlier choice.
    pub fn with_transport<F, Fut>(mut self, configure: F) -> Self
    where
        F: Fn(TransportBuilder) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DispatchResult<Arc<dyn SignalTransport>>> + Send + 'static,
    {
        self.transport = Some(Arc::new(
            move |builder: TransportBuilder| -> TransportFuture {
                Box::pin(configure(builder))
            },
        ));
        self
    }

    pub fn role(&self) -> TransportRole {
        self.role
    }

    pub async fn dispatch(&self, signal: S, cancel: CancellationToken) -> DispatchResult {
        self.dispatch_arc(Arc::new(signal), cancel).await
    }

    pub async fn dispatch_arc(&self, signal: Arc<S>, cancel: CancellationToken) -> DispatchResult {
        let scope = match (&self.parent, self.role) {
            (Some(parent), TransportRole::Publisher) => parent.fork(),
            (Some(parent), TransportRole::Receiver) => ContextScope::detached(parent.clone()),
            (None, _) => ContextScope::detached(Context::new()),
        };
        let context = scope.context().clone();

        let had_signal_id = context.signal_id().is_some();
        if !had_signal_id {
            context.mint_signal_id();
        }

        let signal_type = Arc::new(SignalTypeInfo::of::<S>());
        let transport = self.resolve_transport(&context, &signal_type).await?;

        // A nested publish is its own signal within the same trace.
        if self.role == TransportRole::Publisher && had_signal_id {
            context.mint_signal_id();
        }

        let transport_type =
            TransportType::new(transport.transport_type_name().to_owned(), self.role);
        let mut pipeline = Pipeline::new(
            Arc::clone(&signal_type),
            self.services.clone(),
            context.clone(),
            transport_type.clone(),
        );
        S::configure_pipeline(&mut pipeline)?;
        for configure in &self.pipelines {
            configure(&mut pipeline)?;
        }

        let span = info_span!(
            "dispatch",
            signal = signal_type.concrete().name(),
            signal_id = %context.signal_id().unwrap_or_default(),
            trace_id = %context.trace_id(),
            transport = %transport_type
        );

        let services = self.services.clone();
        let terminal_context = context.clone();
        let terminal: Next<S> = Arc::new(
            move |signal: Arc<S>, cancel: CancellationToken| -> BoxDispatchFuture {
                let transport = Arc::clone(&transport);
                let services = services.clone();
                let context = terminal_context.clone();
                Box::pin(async move {
                    let signal: Arc<dyn AnySignal> = signal;
                    transport.publish(signal, &services, &context, cancel).await
                })
            },
        );

        let result = pipeline
            .build(terminal)
            .run(signal, cancel)
            .instrument(span)
            .await;
        drop(scope);
        result
    }

    async fn resolve_transport(
        &self,
        context: &Context,
        signal_type: &Arc<SignalTypeInfo>,
    ) -> DispatchResult<Arc<dyn SignalTransport>> {
        let builder = TransportBuilder::new(
            self.engine.clone(),
            self.services.clone(),
            context.clone(),
            Arc::clone(signal_type),
        );
        match &self.transport {
            Some(configure) => {
                let transport = configure(builder).await?;
                debug!(transport = transport.transport_type_name(), "resolved custom transport");
                Ok(transport)
            }
            None => Ok(builder.use_in_process()),
        }
    }
}
