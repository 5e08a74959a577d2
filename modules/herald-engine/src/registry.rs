//! Handler registrations and the per-type target lookup.
//!
//! Registrations are fixed once the registry is built. Lookups are memoized
//! per concrete runtime type: the first lookup for a type computes the
//! matching registrations exactly once, later lookups share the result.

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, OnceLock};

use arc_swap::ArcSwap;
use tracing::debug;

use crate::error::ConfigurationError;
use crate::handler::{
    DelegateInvoker, DelegatePipelineFn, HandlerContext, HandlerInvoker, HandlerSource,
    SignalHandler, TypedInvoker,
};
use crate::pipeline::Pipeline;
use crate::services::ServiceScope;
use crate::signal::{SignalType, SignalTypeInfo, SignalView};

/// How a registration's handler is provided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    Type { id: TypeId, name: &'static str },
    Delegate,
}

#[derive(Clone)]
pub struct Registration {
    signal_type: SignalType,
    handler: HandlerKind,
    in_process: bool,
    invoker: Arc<dyn HandlerInvoker>,
}

impl Registration {
    /// The declared signal type or family; used only for assignability.
    pub fn signal_type(&self) -> SignalType {
        self.signal_type
    }

    pub fn handler(&self) -> HandlerKind {
        self.handler
    }

    pub fn is_delegate(&self) -> bool {
        self.handler == HandlerKind::Delegate
    }

    pub fn in_process(&self) -> bool {
        self.in_process
    }

    pub fn invoker(&self) -> &Arc<dyn HandlerInvoker> {
        &self.invoker
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("signal_type", &self.signal_type)
            .field("handler", &self.handler)
            .field("in_process", &self.in_process)
            .finish()
    }
}

type TargetCell = Arc<OnceLock<Arc<[Registration]>>>;

pub struct HandlerRegistry {
    registrations: Vec<Registration>,
    /// Copy-on-write map; reads never take a lock.
    cache: ArcSwap<HashMap<TypeId, TargetCell>>,
}

impl HandlerRegistry {
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::default()
    }

    pub fn registrations(&self) -> &[Registration] {
        &self.registrations
    }

    /// Registrations whose declared type the runtime signal is assignable to,
    /// in registration order. An empty result is not an error.
    pub fn invocation_targets(&self, signal_type: &SignalTypeInfo) -> Arc<[Registration]> {
        let key = signal_type.concrete().id();

        let cached = self.cache.load().get(&key).cloned();
        let cell = match cached {
            Some(cell) => cell,
            None => self.insert_cell(key),
        };

        // Racing first lookups share one cell, so this runs once per type.
        let targets = cell.get_or_init(|| {
            let targets: Vec<Registration> = self
                .registrations
                .iter()
                .filter(|r| signal_type.is_assignable_to(r.signal_type.id()))
                .cloned()
                .collect();
            debug!(
                signal = signal_type.concrete().name(),
                targets = targets.len(),
                "computed invocation targets"
            );
            targets.into()
        });
        Arc::clone(targets)
    }

    fn insert_cell(&self, key: TypeId) -> TargetCell {
        let fresh = TargetCell::default();
        self.cache.rcu(|current| {
            let mut next = (**current).clone();
            next.entry(key).or_insert_with(|| Arc::clone(&fresh));
            next
        });
        // Cells are never removed, so whichever insert won is visible now.
        self.cache.load().get(&key).cloned().unwrap_or(fresh)
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("registrations", &self.registrations)
            .finish()
    }
}

#[derive(Default)]
pub struct HandlerRegistryBuilder {
    registrations: Vec<Registration>,
}

impl HandlerRegistryBuilder {
    /// Register handler type `H` for `V`, built by `factory` for every invocation.
    pub fn handler<V, H, F>(self, factory: F) -> Self
    where
        V: ?Sized + SignalView,
        H: SignalHandler<V>,
        F: Fn(&ServiceScope) -> H + Send + Sync + 'static,
    {
        self.typed::<V, H>(HandlerSource::Factory(Arc::new(factory)))
    }

    /// Register one shared instance of `H` for `V`.
    pub fn handler_instance<V, H>(self, handler: Arc<H>) -> Self
    where
        V: ?Sized + SignalView,
        H: SignalHandler<V>,
    {
        self.typed::<V, H>(HandlerSource::Instance(handler))
    }

    pub fn delegate<V, F, Fut>(self, handler: F) -> Self
    where
        V: ?Sized + SignalView,
        F: Fn(Arc<V>, HandlerContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.push_delegate(DelegateInvoker::new(handler, None))
    }

    /// Register a delegate with its own receiver pipeline.
    pub fn delegate_with_pipeline<V, F, Fut, C>(self, configure: C, handler: F) -> Self
    where
        V: ?Sized + SignalView,
        F: Fn(Arc<V>, HandlerContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
        C: Fn(&mut Pipeline<V>) -> Result<(), ConfigurationError> + Send + Sync + 'static,
    {
        let configure: DelegatePipelineFn<V> = Arc::new(configure);
        self.push_delegate(DelegateInvoker::new(handler, Some(configure)))
    }

    pub fn build(self) -> HandlerRegistry {
        debug!(registrations = self.registrations.len(), "built handler registry");
        HandlerRegistry {
            registrations: self.registrations,
            cache: ArcSwap::from_pointee(HashMap::new()),
        }
    }

    fn typed<V, H>(mut self, source: HandlerSource<H>) -> Self
    where
        V: ?Sized + SignalView,
        H: SignalHandler<V>,
    {
        let registration = Registration {
            signal_type: SignalType::of::<V>(),
            handler: HandlerKind::Type {
                id: TypeId::of::<H>(),
                name: std::any::type_name::<H>(),
            },
            in_process: <H as SignalHandler<V>>::in_process_receiver(),
            invoker: Arc::new(TypedInvoker::<V, H>::new(source)),
        };

        // Re-registering the same handler for the same type replaces it in place.
        match self.registrations.iter_mut().find(|r| {
            r.signal_type == registration.signal_type && r.handler == registration.handler
        }) {
            Some(existing) => *existing = registration,
            None => self.registrations.push(registration),
        }
        self
    }

    fn push_delegate<V: ?Sized + SignalView>(mut self, invoker: DelegateInvoker<V>) -> Self {
        self.registrations.push(Registration {
            signal_type: SignalType::of::<V>(),
            handler: HandlerKind::Delegate,
            in_process: true,
            invoker: Arc::new(invoker),
        });
        self
    }
}
