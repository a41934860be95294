//! Line aggregation
//!
//! An [`Aggregator`] maps each raw stdout line to zero or one [`Record`]s,
//! buffering what it needs between calls. A fresh aggregator is built from
//! the [`PipeConfig`] on every start, so buffers never outlive a run.

use crate::config::PipeConfig;
use crate::error::{BoxError, Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Default number of lines kept by the line aggregator
pub const DEFAULT_KEEP: usize = 100;

/// Lines the JSON aggregator buffers before giving up on a sample
pub const MAX_JSON_BUFFER_LINES: usize = 1_000_000;

/// A result delivered to `on_result`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Record {
    /// A raw line, when no aggregation is configured
    Line(String),
    /// The most recent lines, emitted by the line aggregator
    Batch(Vec<String>),
    /// A reconstructed JSON object, emitted by the JSON aggregator
    Json(serde_json::Value),
}

impl Record {
    /// Returns true for records carrying nothing worth delivering
    pub fn is_empty(&self) -> bool {
        match self {
            Record::Line(line) => line.is_empty(),
            Record::Batch(lines) => lines.is_empty(),
            Record::Json(value) => value.is_null(),
        }
    }

    /// The raw line, if this is a [`Record::Line`]
    pub fn as_line(&self) -> Option<&str> {
        match self {
            Record::Line(line) => Some(line),
            _ => None,
        }
    }

    /// The batched lines, if this is a [`Record::Batch`]
    pub fn as_batch(&self) -> Option<&[String]> {
        match self {
            Record::Batch(lines) => Some(lines),
            _ => None,
        }
    }

    /// The parsed object, if this is a [`Record::Json`]
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Record::Json(value) => Some(value),
            _ => None,
        }
    }
}

/// Built-in aggregation strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AggType {
    /// Periodic batches of the most recent lines
    Lines,
    /// Pretty-printed JSON objects, one per sample
    Json,
}

/// A custom aggregation function
///
/// Returning `Ok(None)` swallows the line; an `Err` fails the run.
pub type AggregationFn =
    Arc<dyn Fn(&str) -> std::result::Result<Option<Record>, BoxError> + Send + Sync>;

/// Wrap a closure as an [`AggregationFn`]
pub fn aggregation_fn<F>(func: F) -> AggregationFn
where
    F: Fn(&str) -> std::result::Result<Option<Record>, BoxError> + Send + Sync + 'static,
{
    Arc::new(func)
}

/// Keeps a bounded history and emits it in batches
#[derive(Debug, Clone)]
pub struct LineAggregator {
    keep: usize,
    history: Vec<String>,
}

impl LineAggregator {
    /// Create an aggregator that emits the last `keep` lines every `keep` lines
    ///
    /// With `keep == 0` nothing is ever emitted and no history is retained,
    /// rather than emitting the whole history on every line.
    pub fn new(keep: usize) -> Self {
        Self {
            keep,
            history: Vec::new(),
        }
    }

    /// Buffer a line, returning a snapshot once the history reaches twice `keep`
    pub fn push(&mut self, line: String) -> Option<Vec<String>> {
        self.history.push(line);
        if self.history.len() < self.keep.saturating_mul(2) {
            return None;
        }

        let excess = self.history.len() - self.keep;
        self.history.drain(..excess);
        if self.history.is_empty() {
            return None;
        }
        Some(self.history.clone())
    }

    /// Lines currently buffered
    pub fn history(&self) -> &[String] {
        &self.history
    }
}

/// Reassembles pretty-printed JSON objects
///
/// Tools like `intel_gpu_top -J` print one object per sample and close it
/// with `}` or `},` at the start of a line. Everything before that line is
/// buffered and parsed together with a closing brace.
#[derive(Debug, Clone)]
pub struct JsonAggregator {
    buffer: Vec<String>,
    limit: usize,
}

impl Default for JsonAggregator {
    fn default() -> Self {
        Self::with_limit(MAX_JSON_BUFFER_LINES)
    }
}

impl JsonAggregator {
    /// Create an aggregator with the default buffer bound
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an aggregator that fails once more than `limit` lines are buffered
    pub fn with_limit(limit: usize) -> Self {
        Self {
            buffer: Vec::new(),
            limit,
        }
    }

    /// Feed a line, returning a parsed object when a sample closes
    ///
    /// On overflow the buffered lines are discarded.
    pub fn push(&mut self, line: String) -> Result<Option<serde_json::Value>> {
        if closes_root_object(&line) {
            let text = format!("{}\n}}", self.buffer.join("\n"));
            match serde_json::from_str(&text) {
                Ok(value) => {
                    self.buffer.clear();
                    return Ok(Some(value));
                }
                // Most likely a nested closing brace; keep collecting
                Err(e) => debug!(error = %e, "ignoring multi-line JSON parse error"),
            }
        }

        self.buffer.push(line);
        if self.buffer.len() > self.limit {
            self.buffer.clear();
            return Err(Error::AggregationOverflow { limit: self.limit });
        }
        Ok(None)
    }

    /// Lines currently buffered
    pub fn buffered(&self) -> &[String] {
        &self.buffer
    }
}

fn closes_root_object(line: &str) -> bool {
    line == "}" || line == "},"
}

/// The aggregation strategy of one run, owning its buffer
pub enum Aggregator {
    /// Every line is delivered as it is
    None,
    /// See [`LineAggregator`]
    Lines(LineAggregator),
    /// See [`JsonAggregator`]
    Json(JsonAggregator),
    /// A caller supplied function
    Custom(AggregationFn),
}

impl Aggregator {
    /// Build the aggregator selected by `config`
    ///
    /// `agg_type` takes precedence over `aggregation_func`.
    pub fn from_config(config: &PipeConfig) -> Self {
        match (config.agg_type, &config.aggregation_func) {
            (Some(AggType::Lines), _) => Aggregator::Lines(LineAggregator::new(config.keep)),
            (Some(AggType::Json), _) => Aggregator::Json(JsonAggregator::new()),
            (None, Some(func)) => Aggregator::Custom(func.clone()),
            (None, None) => Aggregator::None,
        }
    }

    /// Map one line to the record that should be delivered, if any
    pub fn push(&mut self, line: String) -> Result<Option<Record>> {
        let record = match self {
            Aggregator::None => return Ok(Some(Record::Line(line))),
            Aggregator::Lines(agg) => agg.push(line).map(Record::Batch),
            Aggregator::Json(agg) => agg.push(line)?.map(Record::Json),
            Aggregator::Custom(func) => (**func)(&line).map_err(Error::Aggregation)?,
        };
        Ok(record.filter(|r| !r.is_empty()))
    }

    /// Number of lines held back in the buffer
    pub fn buffered(&self) -> usize {
        match self {
            Aggregator::None | Aggregator::Custom(_) => 0,
            Aggregator::Lines(agg) => agg.history().len(),
            Aggregator::Json(agg) => agg.buffered().len(),
        }
    }
}

impl fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aggregator::None => write!(f, "Aggregator::None"),
            Aggregator::Lines(agg) => f.debug_tuple("Aggregator::Lines").field(agg).finish(),
            Aggregator::Json(agg) => f.debug_tuple("Aggregator::Json").field(agg).finish(),
            Aggregator::Custom(_) => write!(f, "Aggregator::Custom(..)"),
        }
    }
}
