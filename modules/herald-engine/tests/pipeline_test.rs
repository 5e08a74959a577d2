//! Pipeline composition: ordering, removal, configuration, short-circuit.

mod harness;

use std::sync::Arc;

use async_trait::async_trait;
use harness::{InvalidOperation, Ping, Recorder};
use herald_engine::context::Context;
use herald_engine::{
    BoxDispatchFuture, CancellationToken, ConfigurationError, DispatchError, DispatchResult,
    MiddlewareContext, Next, Pipeline, ServiceScope, SignalMiddleware, SignalTypeInfo,
    SignalView, TransportRole, TransportType,
};

// ---------------------------------------------------------------------------
// Test middlewares
// ---------------------------------------------------------------------------

/// Records before/after entries around `next`, and any error it observes.
struct Tag {
    label: String,
    log: Recorder,
}

impl Tag {
    fn new(label: &str, log: &Recorder) -> Self {
        Self {
            label: label.to_string(),
            log: log.clone(),
        }
    }
}

#[async_trait]
impl<S: ?Sized + SignalView> SignalMiddleware<S> for Tag {
    async fn execute(&self, ctx: MiddlewareContext<S>) -> DispatchResult {
        self.log.push(format!("{}:before", self.label));
        let result = ctx.proceed().await;
        match &result {
            Ok(()) => self.log.push(format!("{}:after", self.label)),
            Err(err) => self.log.push(format!("{}:saw-error:{err}", self.label)),
        }
        result
    }
}

/// Never calls `next`.
struct ShortCircuit;

#[async_trait]
impl SignalMiddleware<Ping> for ShortCircuit {
    async fn execute(&self, _ctx: MiddlewareContext<Ping>) -> DispatchResult {
        Ok(())
    }
}

fn pipeline() -> Pipeline<Ping> {
    Pipeline::new(
        Arc::new(SignalTypeInfo::of::<Ping>()),
        ServiceScope::empty(),
        Context::new(),
        TransportType::in_process(TransportRole::Publisher),
    )
}

fn recording_terminal(log: &Recorder) -> Next<Ping> {
    let log = log.clone();
    Arc::new(move |signal: Arc<Ping>, _cancel: CancellationToken| -> BoxDispatchFuture {
        let log = log.clone();
        Box::pin(async move {
            log.push(format!("terminal:{}", signal.0));
            Ok(())
        })
    })
}

fn failing_terminal(log: &Recorder) -> Next<Ping> {
    let log = log.clone();
    Arc::new(move |_signal: Arc<Ping>, _cancel: CancellationToken| -> BoxDispatchFuture {
        let log = log.clone();
        Box::pin(async move {
            log.push("terminal");
            Err(DispatchError::Handler(InvalidOperation("terminal").into()))
        })
    })
}

// ---------------------------------------------------------------------------
// Ordering
// ---------------------------------------------------------------------------

#[tokio::test]
async fn first_added_middleware_runs_outermost() {
    let log = Recorder::new();
    let mut pipeline = pipeline();
    pipeline
        .use_middleware(Tag::new("A", &log))
        .use_middleware(Tag::new("B", &log));

    let runner = pipeline.build(recording_terminal(&log));
    assert_eq!(runner.len(), 2);
    runner.run(Arc::new(Ping(1)), CancellationToken::new()).await.unwrap();

    assert_eq!(
        log.entries(),
        vec!["A:before", "B:before", "terminal:1", "B:after", "A:after"]
    );
}

#[tokio::test]
async fn inner_failure_is_observable_in_outer_wrapper() {
    let log = Recorder::new();
    let mut pipeline = pipeline();
    pipeline
        .use_middleware(Tag::new("A", &log))
        .use_middleware(Tag::new("B", &log));

    let err = pipeline
        .build(failing_terminal(&log))
        .run(Arc::new(Ping(1)), CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "invalid operation: terminal");
    assert_eq!(
        log.entries(),
        vec![
            "A:before",
            "B:before",
            "terminal",
            "B:saw-error:invalid operation: terminal",
            "A:saw-error:invalid operation: terminal",
        ]
    );
}

#[tokio::test]
async fn closure_middlewares_compose_with_typed_ones() {
    let log = Recorder::new();
    let mut pipeline = pipeline();
    let closure_log = log.clone();
    pipeline.use_fn(move |ctx: MiddlewareContext<Ping>| {
        let log = closure_log.clone();
        async move {
            log.push("closure");
            ctx.proceed().await
        }
    });
    pipeline.use_middleware(Tag::new("A", &log));

    pipeline
        .build(recording_terminal(&log))
        .run(Arc::new(Ping(2)), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        log.entries(),
        vec!["closure", "A:before", "terminal:2", "A:after"]
    );
}

// ---------------------------------------------------------------------------
// Without / Configure
// ---------------------------------------------------------------------------

#[tokio::test]
async fn without_removes_every_instance() {
    let log = Recorder::new();
    let mut pipeline = pipeline();
    pipeline
        .use_middleware(Tag::new("A", &log))
        .use_middleware(ShortCircuit)
        .use_middleware(Tag::new("B", &log));
    pipeline.without::<Tag>();

    assert_eq!(pipeline.len(), 1);
    assert!(!pipeline.contains::<Tag>());

    pipeline.without::<ShortCircuit>().without::<ShortCircuit>();
    assert!(pipeline.is_empty());

    pipeline
        .build(recording_terminal(&log))
        .run(Arc::new(Ping(3)), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(log.entries(), vec!["terminal:3"]);
}

#[tokio::test]
async fn configure_mutates_all_instances() {
    let log = Recorder::new();
    let mut pipeline = pipeline();
    pipeline
        .use_middleware(Tag::new("a", &log))
        .use_middleware(Tag::new("b", &log));

    pipeline
        .configure::<Tag>(|tag| tag.label = tag.label.to_uppercase())
        .unwrap();

    pipeline
        .build(recording_terminal(&log))
        .run(Arc::new(Ping(4)), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(
        log.entries(),
        vec!["A:before", "B:before", "terminal:4", "B:after", "A:after"]
    );
}

#[test]
fn configure_missing_middleware_is_a_configuration_error() {
    let mut pipeline = pipeline();
    pipeline.use_middleware(ShortCircuit);

    let err = pipeline.configure::<Tag>(|_| {}).err().unwrap();
    assert!(matches!(
        err,
        ConfigurationError::MiddlewareNotInPipeline { middleware } if middleware.ends_with("Tag")
    ));
}

#[test]
fn middleware_names_follow_registration_order() {
    let log = Recorder::new();
    let mut pipeline = pipeline();
    pipeline
        .use_middleware(ShortCircuit)
        .use_middleware(Tag::new("A", &log));

    let names = pipeline.middleware_names();
    assert_eq!(names.len(), 2);
    assert!(names[0].ends_with("ShortCircuit"));
    assert!(names[1].ends_with("Tag"));
    assert!(pipeline.transport_type().is_in_process());
    assert_eq!(pipeline.transport_type().role(), TransportRole::Publisher);
}

// ---------------------------------------------------------------------------
// Short-circuit and signal replacement
// ---------------------------------------------------------------------------

#[tokio::test]
async fn short_circuit_skips_terminal() {
    let log = Recorder::new();
    let mut pipeline = pipeline();
    pipeline
        .use_middleware(Tag::new("A", &log))
        .use_middleware(ShortCircuit);

    pipeline
        .build(recording_terminal(&log))
        .run(Arc::new(Ping(5)), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(log.entries(), vec!["A:before", "A:after"]);
}

#[tokio::test]
async fn middleware_can_replace_the_signal() {
    let log = Recorder::new();
    let mut pipeline = pipeline();
    pipeline.use_fn(|ctx: MiddlewareContext<Ping>| async move {
        let doubled = Arc::new(Ping(ctx.signal().0 * 2));
        ctx.next(doubled, ctx.cancellation_token().clone()).await
    });

    pipeline
        .build(recording_terminal(&log))
        .run(Arc::new(Ping(21)), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(log.entries(), vec!["terminal:42"]);
}

#[tokio::test]
async fn middleware_sees_runtime_signal_type_and_token() {
    let cancel = CancellationToken::new();
    cancel.cancel();

    let mut pipeline = pipeline();
    pipeline.use_fn(|ctx: MiddlewareContext<Ping>| async move {
        assert!(ctx.signal_type().concrete().name().ends_with("Ping"));
        if ctx.cancellation_token().is_cancelled() {
            return Err(DispatchError::Cancelled);
        }
        ctx.proceed().await
    });

    let log = Recorder::new();
    let err = pipeline
        .build(recording_terminal(&log))
        .run(Arc::new(Ping(1)), cancel)
        .await
        .unwrap_err();
    assert!(err.is_cancellation());
    assert_eq!(log.len(), 0);
}
