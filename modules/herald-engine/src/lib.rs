//! In-process signal dispatch.
//!
//! A published signal flows through the dispatcher (context fork, signal id),
//! the publisher pipeline, and the transport. The in-process transport
//! resolves matching registrations from the [`HandlerRegistry`] and fans out
//! through a [`BroadcastingStrategy`]. Every handler invocation then runs its
//! own receiver pipeline.
//!
//! Handlers registered for a family (a `dyn Trait` declared with
//! [`impl_signal!`]) receive every signal in that family.

pub mod broadcast;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod pipeline;
pub mod registry;
pub mod services;
pub mod signal;
pub mod transport;

pub use broadcast::{
    BroadcastingStrategy, ExceptionHandling, InvocationFn, ParallelBroadcastingConfig,
    ParallelBroadcastingStrategy, SequentialBroadcastingConfig, SequentialBroadcastingStrategy,
    UNBOUNDED_PARALLELISM,
};
pub use config::{load_config, parse_config, BroadcastingConfig, EngineConfig, StrategyKind};
pub use dispatcher::{Engine, SignalDispatcher};
pub use error::{AggregateError, ConfigurationError, DispatchError, DispatchResult};
pub use handler::{HandlerContext, HandlerInvoker, InvocationScope, SignalHandler};
pub use pipeline::{
    BoxDispatchFuture, FnMiddleware, MiddlewareContext, Next, Pipeline, PipelineRunner,
    SignalMiddleware,
};
pub use registry::{HandlerKind, HandlerRegistry, HandlerRegistryBuilder, Registration};
pub use services::{ServiceScope, ServiceScopeBuilder};
pub use signal::{view_of, AnySignal, Signal, SignalType, SignalTypeInfo, SignalView};
pub use transport::{
    InProcessTransport, SignalTransport, TransportBuilder, TransportRole, TransportType,
    IN_PROCESS_TRANSPORT,
};

pub use herald_context as context;
pub use tokio_util::sync::CancellationToken;
