//! Engine configuration, from TOML or from the environment.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

use crate::broadcast::{
    BroadcastingStrategy, ExceptionHandling, ParallelBroadcastingConfig,
    ParallelBroadcastingStrategy, SequentialBroadcastingConfig, SequentialBroadcastingStrategy,
};
use crate::error::ConfigurationError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    #[serde(default)]
    pub broadcasting: BroadcastingConfig,
}

/// Default fan-out policy for in-process delivery.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BroadcastingConfig {
    #[serde(default)]
    pub strategy: StrategyKind,
    /// Sequential only.
    #[serde(default)]
    pub exception_handling: ExceptionHandling,
    /// Parallel only. Absent means unbounded.
    #[serde(default)]
    pub max_degree_of_parallelism: Option<usize>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    #[default]
    Sequential,
    Parallel,
}

impl FromStr for StrategyKind {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequential" => Ok(Self::Sequential),
            "parallel" => Ok(Self::Parallel),
            other => Err(ConfigurationError::InvalidConfig(format!(
                "unknown broadcasting strategy `{other}`"
            ))),
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sequential => f.write_str("sequential"),
            Self::Parallel => f.write_str("parallel"),
        }
    }
}

impl BroadcastingConfig {
    /// Build the configured strategy. Validation happens here, synchronously.
    pub fn strategy(&self) -> Result<Arc<dyn BroadcastingStrategy>, ConfigurationError> {
        match self.strategy {
            StrategyKind::Sequential => Ok(Arc::new(SequentialBroadcastingStrategy::new(
                SequentialBroadcastingConfig {
                    exception_handling: self.exception_handling,
                },
            ))),
            StrategyKind::Parallel => Ok(Arc::new(ParallelBroadcastingStrategy::new(
                ParallelBroadcastingConfig {
                    max_degree_of_parallelism: self.max_degree_of_parallelism,
                },
            )?)),
        }
    }
}

impl EngineConfig {
    /// Load from `HERALD_*` environment variables (and `.env` if present).
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut broadcasting = BroadcastingConfig::default();

        if let Some(strategy) = lookup("HERALD_BROADCASTING_STRATEGY") {
            broadcasting.strategy = strategy
                .parse::<StrategyKind>()
                .context("HERALD_BROADCASTING_STRATEGY")?;
        }
        if let Some(handling) = lookup("HERALD_EXCEPTION_HANDLING") {
            broadcasting.exception_handling = handling
                .parse::<ExceptionHandling>()
                .context("HERALD_EXCEPTION_HANDLING")?;
        }
        if let Some(limit) = lookup("HERALD_MAX_DEGREE_OF_PARALLELISM") {
            let limit: usize = limit
                .trim()
                .parse()
                .context("HERALD_MAX_DEGREE_OF_PARALLELISM must be a non-negative integer")?;
            broadcasting.max_degree_of_parallelism = Some(limit);
        }

        Ok(Self { broadcasting })
    }

    pub fn log_summary(&self) {
        let b = &self.broadcasting;
        info!(
            strategy = %b.strategy,
            exception_handling = %b.exception_handling,
            max_degree_of_parallelism = ?b.max_degree_of_parallelism,
            "Engine config"
        );
    }
}

/// Load and parse a TOML config file.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

pub fn parse_config(content: &str) -> Result<EngineConfig> {
    let config: EngineConfig = toml::from_str(content)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_toml_gives_sequential_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.broadcasting.strategy, StrategyKind::Sequential);
        assert_eq!(
            config.broadcasting.exception_handling,
            ExceptionHandling::CollectAndAggregate
        );
    }

    #[test]
    fn parses_parallel_table() {
        let config = parse_config(
            r#"
            [broadcasting]
            strategy = "parallel"
            max_degree_of_parallelism = 4
            "#,
        )
        .unwrap();
        assert_eq!(config.broadcasting.strategy, StrategyKind::Parallel);
        assert_eq!(config.broadcasting.max_degree_of_parallelism, Some(4));
        assert!(config.broadcasting.strategy().is_ok());
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(parse_config("[broadcasting]\nretries = 3\n").is_err());
        assert!(parse_config("[transport]\n").is_err());
    }

    #[test]
    fn zero_parallelism_fails_when_building_strategy() {
        let config = parse_config(
            "[broadcasting]\nstrategy = \"parallel\"\nmax_degree_of_parallelism = 0\n",
        )
        .unwrap();
        assert!(matches!(
            config.broadcasting.strategy(),
            Err(ConfigurationError::InvalidMaxDegreeOfParallelism(0))
        ));
    }

    #[test]
    fn env_lookup_overrides_defaults() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("HERALD_BROADCASTING_STRATEGY", "Parallel"),
            ("HERALD_MAX_DEGREE_OF_PARALLELISM", " 8 "),
        ]);
        let config = EngineConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.broadcasting.strategy, StrategyKind::Parallel);
        assert_eq!(config.broadcasting.max_degree_of_parallelism, Some(8));
        assert_eq!(
            config.broadcasting.exception_handling,
            ExceptionHandling::CollectAndAggregate
        );

        let bad = HashMap::from([("HERALD_EXCEPTION_HANDLING", "never")]);
        assert!(EngineConfig::from_lookup(|k| bad.get(k).map(|v| v.to_string())).is_err());
    }

    #[test]
    fn load_config_reports_missing_file() {
        let err = load_config(Path::new("/nonexistent/herald.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
