//! Error taxonomy for dispatch.
//!
//! Configuration errors surface before any handler runs. Handler errors are
//! carried as `anyhow::Error` and reconciled by the broadcasting strategy.

use thiserror::Error;

pub type DispatchResult<T = ()> = Result<T, DispatchError>;

/// Misconfiguration detected before any target is invoked.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("middleware `{middleware}` is not present in the pipeline")]
    MiddlewareNotInPipeline { middleware: &'static str },

    #[error("max degree of parallelism must be at least 1, got {0}")]
    InvalidMaxDegreeOfParallelism(usize),

    #[error("service `{0}` is not registered in the service scope")]
    MissingService(&'static str),

    #[error("signal `{signal}` cannot be viewed as `{target}`")]
    SignalNotAssignable {
        signal: &'static str,
        target: &'static str,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("dispatch was cancelled")]
    Cancelled,

    #[error(transparent)]
    Handler(anyhow::Error),

    #[error(transparent)]
    Aggregate(#[from] AggregateError),
}

impl DispatchError {
    pub fn is_cancellation(&self) -> bool {
        matches!(self, DispatchError::Cancelled)
    }

    /// Convert a handler's error, recovering engine errors that were passed
    /// through `anyhow` (for example from a nested publish).
    pub fn from_handler(err: anyhow::Error) -> Self {
        match err.downcast::<DispatchError>() {
            Ok(dispatch) => dispatch,
            Err(err) => match err.downcast::<ConfigurationError>() {
                Ok(config) => DispatchError::Configuration(config),
                Err(err) => DispatchError::Handler(err),
            },
        }
    }

    /// Inner errors if this is an aggregate, otherwise a single-element slice.
    pub fn flatten(&self) -> Vec<&DispatchError> {
        match self {
            DispatchError::Aggregate(agg) => agg.errors().iter().collect(),
            other => vec![other],
        }
    }
}

/// Several failures from one broadcast, in the order they were observed.
#[derive(Debug, Error)]
#[error("{} dispatch targets failed: [{}]", .errors.len(), join_messages(.errors))]
pub struct AggregateError {
    errors: Vec<DispatchError>,
}

impl AggregateError {
    pub fn new(errors: Vec<DispatchError>) -> Self {
        Self { errors }
    }

    pub fn errors(&self) -> &[DispatchError] {
        &self.errors
    }

    pub fn into_errors(self) -> Vec<DispatchError> {
        self.errors
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

fn join_messages(errors: &[DispatchError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_errors_recover_engine_kinds() {
        let err = DispatchError::from_handler(anyhow::Error::new(DispatchError::Cancelled));
        assert!(err.is_cancellation());

        let err = DispatchError::from_handler(anyhow::Error::new(
            ConfigurationError::MissingService("Db"),
        ));
        assert!(matches!(
            err,
            DispatchError::Configuration(ConfigurationError::MissingService("Db"))
        ));

        let err = DispatchError::from_handler(anyhow::anyhow!("boom"));
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn aggregate_lists_inner_messages_in_order() {
        let agg = AggregateError::new(vec![
            DispatchError::Handler(anyhow::anyhow!("first")),
            DispatchError::Cancelled,
        ]);
        assert_eq!(
            agg.to_string(),
            "2 dispatch targets failed: [first; dispatch was cancelled]"
        );
    }
}
