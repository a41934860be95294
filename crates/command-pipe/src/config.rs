//! Pipe configuration
//!
//! [`PipeConfig`] can be built in code or loaded from YAML:
//!
//! ```yaml
//! keep: 50
//! agg_type: JSON
//! verbose: true
//! read_timeout_ms: 100
//! ```
//!
//! Custom aggregation functions can only be set in code.

use crate::aggregate::{AggType, AggregationFn, DEFAULT_KEEP, Record};
use crate::error::{BoxError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Settings applied to runs started after [`Pipe::configure`](crate::Pipe::configure)
#[derive(Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipeConfig {
    /// Lines retained by the line aggregator
    pub keep: usize,

    /// Custom aggregation, ignored when `agg_type` is set
    #[serde(skip)]
    pub aggregation_func: Option<AggregationFn>,

    /// Built-in aggregation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agg_type: Option<AggType>,

    /// Log run lifecycle at info instead of debug
    pub verbose: bool,

    /// How long a cancelled run keeps delivering output that is already
    /// buffered in the pipe; zero skips it
    #[serde(rename = "read_timeout_ms", with = "duration_ms")]
    pub read_timeout: Duration,
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            keep: DEFAULT_KEEP,
            aggregation_func: None,
            agg_type: None,
            verbose: false,
            read_timeout: Duration::ZERO,
        }
    }
}

impl PipeConfig {
    /// Parse a configuration from YAML, filling missing fields with defaults
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load a configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Set the number of lines kept by the line aggregator
    pub fn keep(mut self, keep: usize) -> Self {
        self.keep = keep;
        self
    }

    /// Set a custom aggregation function
    pub fn aggregation_func<F>(mut self, func: F) -> Self
    where
        F: Fn(&str) -> std::result::Result<Option<Record>, BoxError> + Send + Sync + 'static,
    {
        self.aggregation_func = Some(Arc::new(func));
        self
    }

    /// Select a built-in aggregator
    pub fn agg_type(mut self, agg_type: AggType) -> Self {
        self.agg_type = Some(agg_type);
        self
    }

    /// Enable lifecycle logging
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Set the read timeout for cancelled runs
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }
}

impl fmt::Debug for PipeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipeConfig")
            .field("keep", &self.keep)
            .field(
                "aggregation_func",
                &self.aggregation_func.as_ref().map(|_| "Fn(&str)"),
            )
            .field("agg_type", &self.agg_type)
            .field("verbose", &self.verbose)
            .field("read_timeout", &self.read_timeout)
            .finish()
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = PipeConfig::default();
        assert_eq!(config.keep, 100);
        assert!(config.aggregation_func.is_none());
        assert_eq!(config.agg_type, None);
        assert!(!config.verbose);
        assert_eq!(config.read_timeout, Duration::ZERO);
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r#"
keep: 10
agg_type: JSON
verbose: true
read_timeout_ms: 250
"#;
        let config = PipeConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.keep, 10);
        assert_eq!(config.agg_type, Some(AggType::Json));
        assert!(config.verbose);
        assert_eq!(config.read_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let config = PipeConfig::from_yaml("agg_type: LINES").unwrap();
        assert_eq!(config.keep, 100);
        assert_eq!(config.agg_type, Some(AggType::Lines));
        assert_eq!(config.read_timeout, Duration::ZERO);
    }

    #[test]
    fn test_maximum_keep_from_yaml_aggregates() {
        let config = PipeConfig::from_yaml("keep: 18446744073709551615\nagg_type: LINES").unwrap();
        assert_eq!(config.keep, usize::MAX);

        let mut aggregator = crate::aggregate::Aggregator::from_config(&config);
        assert_eq!(aggregator.push("line".to_string()).unwrap(), None);
        assert_eq!(aggregator.buffered(), 1);
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        let result = PipeConfig::from_yaml("keep: 1\naggregation: lines\n");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "keep: 3\nagg_type: LINES").unwrap();

        let config = PipeConfig::from_file(file.path()).unwrap();
        assert_eq!(config.keep, 3);
        assert_eq!(config.agg_type, Some(AggType::Lines));
    }

    #[test]
    fn test_from_missing_file() {
        let result = PipeConfig::from_file("/nonexistent/pipe.yaml");
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[test]
    fn test_yaml_round_trip_skips_custom_function() {
        let config = PipeConfig::default()
            .keep(7)
            .read_timeout(Duration::from_millis(30))
            .aggregation_func(|_| Ok(None));

        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(!yaml.contains("aggregation_func"));

        let parsed = PipeConfig::from_yaml(&yaml).unwrap();
        assert_eq!(parsed.keep, 7);
        assert_eq!(parsed.read_timeout, Duration::from_millis(30));
        assert!(parsed.aggregation_func.is_none());
    }

    #[test]
    fn test_debug_hides_function() {
        let config = PipeConfig::default().aggregation_func(|_| Ok(None));
        let debug = format!("{:?}", config);
        assert!(debug.contains("Fn(&str)"));
    }
}
