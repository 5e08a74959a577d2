//! Fan-out strategies: ordering, concurrency and failure reconciliation for
//! the invocations of one in-process publish.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use serde::Deserialize;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{AggregateError, ConfigurationError, DispatchError, DispatchResult};
use crate::pipeline::BoxDispatchFuture;
use crate::services::ServiceScope;
use crate::signal::AnySignal;

/// Invokes exactly one resolved handler for the published signal.
pub type InvocationFn = Box<dyn FnOnce(CancellationToken) -> BoxDispatchFuture + Send>;

/// Upper bound used when parallelism is not limited.
pub const UNBOUNDED_PARALLELISM: usize = Semaphore::MAX_PERMITS;

#[async_trait]
pub trait BroadcastingStrategy: Send + Sync + 'static {
    async fn broadcast(
        &self,
        targets: Vec<InvocationFn>,
        services: &ServiceScope,
        signal: Arc<dyn AnySignal>,
        cancel: CancellationToken,
    ) -> DispatchResult;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExceptionHandling {
    /// Stop at the first failure that is not a cancellation.
    ThrowOnFirstException,
    /// Run every target, then report all failures.
    #[default]
    CollectAndAggregate,
}

impl FromStr for ExceptionHandling {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "throw_on_first_exception" => Ok(Self::ThrowOnFirstException),
            "collect_and_aggregate" => Ok(Self::CollectAndAggregate),
            other => Err(ConfigurationError::InvalidConfig(format!(
                "unknown exception handling `{other}`"
            ))),
        }
    }
}

impl fmt::Display for ExceptionHandling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ThrowOnFirstException => f.write_str("throw_on_first_exception"),
            Self::CollectAndAggregate => f.write_str("collect_and_aggregate"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequentialBroadcastingConfig {
    pub exception_handling: ExceptionHandling,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParallelBroadcastingConfig {
    /// `None` means unbounded.
    pub max_degree_of_parallelism: Option<usize>,
}

/// Runs targets one at a time in registration order.
#[derive(Debug, Clone, Default)]
pub struct SequentialBroadcastingStrategy {
    config: SequentialBroadcastingConfig,
}

impl SequentialBroadcastingStrategy {
    pub fn new(config: SequentialBroadcastingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> SequentialBroadcastingConfig {
        self.config
    }
}

#[async_trait]
impl BroadcastingStrategy for SequentialBroadcastingStrategy {
    async fn broadcast(
        &self,
        targets: Vec<InvocationFn>,
        _services: &ServiceScope,
        _signal: Arc<dyn AnySignal>,
        cancel: CancellationToken,
    ) -> DispatchResult {
        let mut failures = Vec::new();

        for (index, target) in targets.into_iter().enumerate() {
            let Err(err) = target(cancel.clone()).await else {
                continue;
            };

            if err.is_cancellation() {
                debug!(target_index = index, "target cancelled");
                failures.push(err);
                continue;
            }

            warn!(target_index = index, error = %err, "handler failed");
            if self.config.exception_handling == ExceptionHandling::ThrowOnFirstException {
                // Earlier cancellations travel with the first real failure.
                if failures.is_empty() {
                    return Err(err);
                }
                failures.push(err);
                return Err(AggregateError::new(failures).into());
            }
            failures.push(err);
        }

        reconcile_sequential(failures)
    }
}

fn reconcile_sequential(mut failures: Vec<DispatchError>) -> DispatchResult {
    match failures.len() {
        0 => Ok(()),
        1 => Err(failures.remove(0)),
        _ if failures.iter().all(DispatchError::is_cancellation) => Err(failures.remove(0)),
        _ => Err(AggregateError::new(failures).into()),
    }
}

/// Runs targets concurrently, at most `max_degree_of_parallelism` at a time.
#[derive(Debug, Clone)]
pub struct ParallelBroadcastingStrategy {
    max_degree_of_parallelism: usize,
}

impl ParallelBroadcastingStrategy {
    pub fn new(config: ParallelBroadcastingConfig) -> Result<Self, ConfigurationError> {
        let max_degree_of_parallelism = match config.max_degree_of_parallelism {
            Some(0) => return Err(ConfigurationError::InvalidMaxDegreeOfParallelism(0)),
            Some(limit) => limit.min(UNBOUNDED_PARALLELISM),
            None => UNBOUNDED_PARALLELISM,
        };
        Ok(Self {
            max_degree_of_parallelism,
        })
    }

    pub fn max_degree_of_parallelism(&self) -> usize {
        self.max_degree_of_parallelism
    }
}

enum TargetOutcome {
    Completed,
    Failed(DispatchError),
    /// Cancelled while waiting for a permit; the target never ran.
    Skipped,
}

async fn run_target(
    index: usize,
    target: InvocationFn,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
) -> TargetOutcome {
    // A free permit is taken even when the token is already cancelled; only
    // waiting for one is abandoned on cancellation.
    let permit = match Arc::clone(&semaphore).try_acquire_owned() {
        Ok(permit) => Some(permit),
        Err(_) => tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            permit = semaphore.acquire_owned() => permit.ok(),
        },
    };
    let Some(_permit) = permit else {
        debug!(target_index = index, "permit acquisition cancelled, skipping target");
        return TargetOutcome::Skipped;
    };

    let invocation = async move { target(cancel).await };
    match AssertUnwindSafe(invocation).catch_unwind().await {
        Ok(Ok(())) => TargetOutcome::Completed,
        Ok(Err(err)) => TargetOutcome::Failed(err),
        Err(_) => {
            warn!(target_index = index, "handler panicked");
            TargetOutcome::Failed(DispatchError::Handler(anyhow::anyhow!("handler panicked")))
        }
    }
}

#[async_trait]
impl BroadcastingStrategy for ParallelBroadcastingStrategy {
    async fn broadcast(
        &self,
        targets: Vec<InvocationFn>,
        _services: &ServiceScope,
        _signal: Arc<dyn AnySignal>,
        cancel: CancellationToken,
    ) -> DispatchResult {
        let semaphore = Arc::new(Semaphore::new(self.max_degree_of_parallelism));

        // Targets are driven by this future, so dropping it drops them too.
        let mut pending: FuturesUnordered<_> = targets
            .into_iter()
            .enumerate()
            .map(|(index, target)| {
                let outcome = run_target(index, target, Arc::clone(&semaphore), cancel.clone());
                async move { (index, outcome.await) }
            })
            .collect();

        let mut outcomes = Vec::with_capacity(pending.len());
        while let Some(outcome) = pending.next().await {
            outcomes.push(outcome);
        }
        outcomes.sort_by_key(|(index, _)| *index);

        let mut failures = Vec::new();
        let mut skipped = 0usize;
        for (index, outcome) in outcomes {
            match outcome {
                TargetOutcome::Completed => {}
                TargetOutcome::Skipped => skipped += 1,
                TargetOutcome::Failed(err) => {
                    if !err.is_cancellation() {
                        warn!(target_index = index, error = %err, "handler failed");
                    }
                    failures.push(err);
                }
            }
        }
        if skipped > 0 {
            debug!(skipped, "targets skipped after cancellation");
        }

        reconcile_parallel(failures)
    }
}

/// Skipped targets contribute nothing, so zero failures is success.
fn reconcile_parallel(mut failures: Vec<DispatchError>) -> DispatchResult {
    if failures.is_empty() {
        return Ok(());
    }
    if failures.iter().all(DispatchError::is_cancellation) {
        return Err(failures.remove(0));
    }
    Err(AggregateError::new(failures).into())
}
