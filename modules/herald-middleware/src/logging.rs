//! Structured logging around a dispatch.
//!
//! One event before execution, one after success (with elapsed time) and one
//! on failure. Errors are logged and returned unchanged.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use herald_engine::{
    DispatchError, DispatchResult, MiddlewareContext, SignalMiddleware, SignalView, TransportRole,
    TransportType,
};
use tracing::Level;

/// Emit a tracing event at a level only known at runtime.
macro_rules! event_at {
    ($level:expr, $($arg:tt)+) => {
        match $level {
            Level::ERROR => tracing::error!($($arg)+),
            Level::WARN => tracing::warn!($($arg)+),
            Level::INFO => tracing::info!($($arg)+),
            Level::DEBUG => tracing::debug!($($arg)+),
            _ => tracing::trace!($($arg)+),
        }
    };
}

macro_rules! enabled_at {
    ($level:expr) => {
        match $level {
            Level::ERROR => tracing::enabled!(Level::ERROR),
            Level::WARN => tracing::enabled!(Level::WARN),
            Level::INFO => tracing::enabled!(Level::INFO),
            Level::DEBUG => tracing::enabled!(Level::DEBUG),
            _ => tracing::enabled!(Level::TRACE),
        }
    };
}

/// How the signal payload appears in the pre-execution entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PayloadLogging {
    Omit,
    #[default]
    Debug,
    PrettyDebug,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggingPhase {
    PreExecution,
    PostExecution,
    Exception,
}

/// What a hook sees. `elapsed` is set after execution, `error` on failure.
pub struct LoggingRecord<'a, S: ?Sized> {
    pub phase: LoggingPhase,
    pub level: Level,
    pub signal: &'a S,
    pub signal_type: &'static str,
    pub signal_id: &'a str,
    pub trace_id: &'a str,
    pub transport: &'a TransportType,
    pub elapsed: Option<Duration>,
    pub error: Option<&'a DispatchError>,
}

/// Returning `false` suppresses the default entry for that phase.
pub type LoggingHook<S> = Arc<dyn Fn(&LoggingRecord<'_, S>) -> bool + Send + Sync>;

pub struct LoggingMiddleware<S: ?Sized> {
    pub pre_execution_level: Level,
    pub post_execution_level: Level,
    pub exception_level: Level,
    pub payload_logging: PayloadLogging,
    pub pre_execution_hook: Option<LoggingHook<S>>,
    pub post_execution_hook: Option<LoggingHook<S>>,
    pub exception_hook: Option<LoggingHook<S>>,
}

impl<S: ?Sized> Default for LoggingMiddleware<S> {
    fn default() -> Self {
        Self {
            pre_execution_level: Level::INFO,
            post_execution_level: Level::INFO,
            exception_level: Level::ERROR,
            payload_logging: PayloadLogging::default(),
            pre_execution_hook: None,
            post_execution_hook: None,
            exception_hook: None,
        }
    }
}

impl<S: ?Sized> fmt::Debug for LoggingMiddleware<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoggingMiddleware")
            .field("pre_execution_level", &self.pre_execution_level)
            .field("post_execution_level", &self.post_execution_level)
            .field("exception_level", &self.exception_level)
            .field("payload_logging", &self.payload_logging)
            .finish_non_exhaustive()
    }
}

impl<S: ?Sized + SignalView> LoggingMiddleware<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_payload_logging(mut self, payload_logging: PayloadLogging) -> Self {
        self.payload_logging = payload_logging;
        self
    }

    pub fn with_levels(mut self, pre: Level, post: Level, exception: Level) -> Self {
        self.pre_execution_level = pre;
        self.post_execution_level = post;
        self.exception_level = exception;
        self
    }

    pub fn on_pre_execution<F>(mut self, hook: F) -> Self
    where
        F: Fn(&LoggingRecord<'_, S>) -> bool + Send + Sync + 'static,
    {
        self.pre_execution_hook = Some(Arc::new(hook));
        self
    }

    pub fn on_post_execution<F>(mut self, hook: F) -> Self
    where
        F: Fn(&LoggingRecord<'_, S>) -> bool + Send + Sync + 'static,
    {
        self.post_execution_hook = Some(Arc::new(hook));
        self
    }

    pub fn on_exception<F>(mut self, hook: F) -> Self
    where
        F: Fn(&LoggingRecord<'_, S>) -> bool + Send + Sync + 'static,
    {
        self.exception_hook = Some(Arc::new(hook));
        self
    }

    fn pre_execution(&self, record: &LoggingRecord<'_, S>) {
        if !run_hook(self.pre_execution_hook.as_ref(), record) || !enabled_at!(record.level) {
            return;
        }

        let payload = match self.payload_logging {
            PayloadLogging::Omit => None,
            PayloadLogging::Debug => Some(format!("{:?}", record.signal)),
            PayloadLogging::PrettyDebug => Some(format!("{:#?}", record.signal)),
        };
        let verb = match record.transport.role() {
            TransportRole::Publisher => "Publishing",
            TransportRole::Receiver => "Handling",
        };
        let mut message = format!(
            "{verb} {}signal of type '{}'",
            transport_label(record.transport),
            short_type_name(record.signal_type)
        );
        if let Some(payload) = payload {
            message.push_str(" with payload ");
            message.push_str(&payload);
        }

        event_at!(
            record.level,
            signal_id = %record.signal_id,
            trace_id = %record.trace_id,
            transport = %record.transport,
            "{message}"
        );
    }

    fn post_execution(&self, record: &LoggingRecord<'_, S>) {
        if !run_hook(self.post_execution_hook.as_ref(), record) || !enabled_at!(record.level) {
            return;
        }

        let verb = match record.transport.role() {
            TransportRole::Publisher => "Published",
            TransportRole::Receiver => "Handled",
        };
        let elapsed_ms = millis(record.elapsed);
        event_at!(
            record.level,
            signal_id = %record.signal_id,
            trace_id = %record.trace_id,
            transport = %record.transport,
            elapsed_ms,
            "{verb} {}signal of type '{}' in {elapsed_ms:.4}ms",
            transport_label(record.transport),
            short_type_name(record.signal_type)
        );
    }

    fn exception(&self, record: &LoggingRecord<'_, S>) {
        if !run_hook(self.exception_hook.as_ref(), record) || !enabled_at!(record.level) {
            return;
        }

        let verb = match record.transport.role() {
            TransportRole::Publisher => "publishing",
            TransportRole::Receiver => "handling",
        };
        let error = record.error.map(ToString::to_string).unwrap_or_default();
        let elapsed_ms = millis(record.elapsed);
        event_at!(
            record.level,
            signal_id = %record.signal_id,
            trace_id = %record.trace_id,
            transport = %record.transport,
            elapsed_ms,
            error = %error,
            "An error occurred while {verb} {}signal of type '{}' after {elapsed_ms:.4}ms",
            transport_label(record.transport),
            short_type_name(record.signal_type)
        );
    }
}

#[async_trait]
impl<S: ?Sized + SignalView> SignalMiddleware<S> for LoggingMiddleware<S> {
    async fn execute(&self, ctx: MiddlewareContext<S>) -> DispatchResult {
        let signal_id = ctx
            .context()
            .signal_id()
            .unwrap_or_else(|| "unknown".to_owned());
        let trace_id = ctx.context().trace_id();
        let signal_type = ctx.signal_type().concrete().name();
        let started = Instant::now();

        let record = |phase, level, elapsed, error| LoggingRecord {
            phase,
            level,
            signal: &**ctx.signal(),
            signal_type,
            signal_id: &signal_id,
            trace_id: &trace_id,
            transport: ctx.transport_type(),
            elapsed,
            error,
        };

        self.pre_execution(&record(
            LoggingPhase::PreExecution,
            self.pre_execution_level,
            None,
            None,
        ));

        let result = ctx.proceed().await;
        let elapsed = Some(started.elapsed());

        match &result {
            Ok(()) => self.post_execution(&record(
                LoggingPhase::PostExecution,
                self.post_execution_level,
                elapsed,
                None,
            )),
            Err(err) => self.exception(&record(
                LoggingPhase::Exception,
                self.exception_level,
                elapsed,
                Some(err),
            )),
        }

        result
    }
}

fn run_hook<S: ?Sized>(hook: Option<&LoggingHook<S>>, record: &LoggingRecord<'_, S>) -> bool {
    hook.map_or(true, |hook| hook(record))
}

/// `""` for in-process receivers, otherwise the transport name and a space.
fn transport_label(transport: &TransportType) -> String {
    if transport.is_in_process() && transport.role() == TransportRole::Receiver {
        String::new()
    } else {
        format!("{} ", transport.name())
    }
}

fn short_type_name(name: &str) -> &str {
    let base = name.split('<').next().unwrap_or(name);
    match base.rfind("::") {
        Some(idx) => &name[idx + 2..],
        None => name,
    }
}

fn millis(elapsed: Option<Duration>) -> f64 {
    elapsed.map_or(0.0, |d| d.as_secs_f64() * 1000.0)
}
