//! Delivery seam between the dispatcher and whatever carries the signal.
//!
//! The in-process transport resolves handlers from the registry and fans out
//! through a broadcasting strategy. Out-of-process transports implement
//! [`SignalTransport`] and carry the context with `herald_context::wire`.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use herald_context::{Context, ContextScope};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::broadcast::{
    BroadcastingStrategy, InvocationFn, ParallelBroadcastingConfig,
    ParallelBroadcastingStrategy, SequentialBroadcastingConfig, SequentialBroadcastingStrategy,
};
use crate::dispatcher::Engine;
use crate::error::{ConfigurationError, DispatchResult};
use crate::handler::InvocationScope;
use crate::registry::Registration;
use crate::services::ServiceScope;
use crate::signal::{AnySignal, SignalTypeInfo};

/// Name of the built-in in-process transport.
pub const IN_PROCESS_TRANSPORT: &str = "in-process";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportRole {
    Publisher,
    Receiver,
}

impl fmt::Display for TransportRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportRole::Publisher => f.write_str("publisher"),
            TransportRole::Receiver => f.write_str("receiver"),
        }
    }
}

/// Static description of which transport carries a dispatch and which side
/// of it the current code runs on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransportType {
    name: Cow<'static, str>,
    role: TransportRole,
}

impl TransportType {
    pub fn new(name: impl Into<Cow<'static, str>>, role: TransportRole) -> Self {
        Self {
            name: name.into(),
            role,
        }
    }

    pub fn in_process(role: TransportRole) -> Self {
        Self::new(IN_PROCESS_TRANSPORT, role)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> TransportRole {
        self.role
    }

    pub fn is_in_process(&self) -> bool {
        self.name == IN_PROCESS_TRANSPORT
    }
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.role)
    }
}

#[async_trait]
pub trait SignalTransport: Send + Sync {
    fn transport_type_name(&self) -> &str;

    async fn publish(
        &self,
        signal: Arc<dyn AnySignal>,
        services: &ServiceScope,
        context: &Context,
        cancel: CancellationToken,
    ) -> DispatchResult;
}

/// Delivers to registered handlers in this process.
pub struct InProcessTransport {
    engine: Engine,
    strategy: Arc<dyn BroadcastingStrategy>,
}

impl InProcessTransport {
    pub fn new(engine: Engine, strategy: Arc<dyn BroadcastingStrategy>) -> Self {
        Self { engine, strategy }
    }
}

#[async_trait]
impl SignalTransport for InProcessTransport {
    fn transport_type_name(&self) -> &str {
        IN_PROCESS_TRANSPORT
    }

    async fn publish(
        &self,
        signal: Arc<dyn AnySignal>,
        services: &ServiceScope,
        context: &Context,
        cancel: CancellationToken,
    ) -> DispatchResult {
        let signal_type = Arc::new(signal.type_info());
        let targets: Vec<Registration> = self
            .engine
            .registry()
            .invocation_targets(&signal_type)
            .iter()
            .filter(|registration| registration.in_process())
            .cloned()
            .collect();

        debug!(
            signal = signal_type.concrete().name(),
            targets = targets.len(),
            "resolved in-process targets"
        );

        // One fork per target so concurrent receivers never share state.
        // Scopes are dropped in registration order after the broadcast, so
        // for the same upstream key the last registered target wins.
        let scopes: Vec<ContextScope> = targets.iter().map(|_| context.fork()).collect();

        let invocations: Vec<InvocationFn> = targets
            .iter()
            .zip(&scopes)
            .map(|(registration, scope)| {
                invocation(
                    registration,
                    Arc::clone(&signal),
                    self.engine.clone(),
                    services.clone(),
                    scope.context().clone(),
                    Arc::clone(&signal_type),
                )
            })
            .collect();

        let result = self
            .strategy
            .broadcast(invocations, services, signal, cancel)
            .await;
        drop(scopes);
        result
    }
}

fn invocation(
    registration: &Registration,
    signal: Arc<dyn AnySignal>,
    engine: Engine,
    services: ServiceScope,
    context: Context,
    signal_type: Arc<SignalTypeInfo>,
) -> InvocationFn {
    let invoker = Arc::clone(registration.invoker());
    Box::new(move |cancel| {
        invoker.invoke(
            signal,
            InvocationScope {
                engine,
                services,
                context,
                transport: TransportType::in_process(TransportRole::Receiver),
                signal_type,
                cancel,
            },
        )
    })
}

/// Handed to transport configuration callbacks.
pub struct TransportBuilder {
    engine: Engine,
    services: ServiceScope,
    context: Context,
    signal_type: Arc<SignalTypeInfo>,
}

impl TransportBuilder {
    pub(crate) fn new(
        engine: Engine,
        services: ServiceScope,
        context: Context,
        signal_type: Arc<SignalTypeInfo>,
    ) -> Self {
        Self {
            engine,
            services,
            context,
            signal_type,
        }
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn services(&self) -> &ServiceScope {
        &self.services
    }

    pub fn signal_type(&self) -> &SignalTypeInfo {
        &self.signal_type
    }

    /// In-process delivery with the engine's default strategy.
    pub fn use_in_process(&self) -> Arc<dyn SignalTransport> {
        self.use_in_process_with(self.engine.default_strategy())
    }

    pub fn use_in_process_with_sequential(
        &self,
        config: SequentialBroadcastingConfig,
    ) -> Arc<dyn SignalTransport> {
        self.use_in_process_with(Arc::new(SequentialBroadcastingStrategy::new(config)))
    }

    pub fn use_in_process_with_parallel(
        &self,
        config: ParallelBroadcastingConfig,
    ) -> Result<Arc<dyn SignalTransport>, ConfigurationError> {
        let strategy = ParallelBroadcastingStrategy::new(config)?;
        Ok(self.use_in_process_with(Arc::new(strategy)))
    }

    pub fn use_in_process_with(
        &self,
        strategy: Arc<dyn BroadcastingStrategy>,
    ) -> Arc<dyn SignalTransport> {
        Arc::new(InProcessTransport::new(self.engine.clone(), strategy))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_type_display_and_in_process() {
        let publisher = TransportType::in_process(TransportRole::Publisher);
        assert!(publisher.is_in_process());
        assert_eq!(publisher.to_string(), "in-process:publisher");

        let http = TransportType::new(String::from("http"), TransportRole::Receiver);
        assert!(!http.is_in_process());
        assert_eq!(http.name(), "http");
        assert_eq!(http.role(), TransportRole::Receiver);
    }
}
