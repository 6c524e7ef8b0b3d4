//! Output filters.
//!
//! A filter selects one variable (see [`crate::lookup`]) and checks it against
//! a prefix-anchored regex. Output stages combine their filters with AND: a
//! message is forwarded only when every filter matches.

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::envelope::Envelope;
use crate::lookup::{lookup, prefix_match, Variables};

/// Errors raised while compiling filters.
#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    #[error("Invalid pattern '{pattern}' for field '{field}': {source}")]
    InvalidPattern {
        field: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// One `{field, pattern}` entry of an output's `filters` list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FilterConfig {
    pub field: String,
    pub pattern: String,
}

/// A compiled field/pattern predicate.
#[derive(Debug, Clone)]
pub struct Filter {
    field: String,
    pattern: Regex,
}

impl Filter {
    pub fn new(config: &FilterConfig) -> Result<Self, FilterError> {
        let pattern = Regex::new(&config.pattern).map_err(|source| FilterError::InvalidPattern {
            field: config.field.clone(),
            pattern: config.pattern.clone(),
            source,
        })?;
        Ok(Self {
            field: config.field.clone(),
            pattern,
        })
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    /// True when the field resolves and its value matches from position 0.
    pub fn matches(&self, variables: &Variables, data: &Value) -> bool {
        lookup(&self.field, variables, data)
            .map(|value| prefix_match(&self.pattern, &value))
            .unwrap_or(false)
    }
}

/// All filters of one output stage.
#[derive(Debug, Clone, Default)]
pub struct FilterChain {
    filters: Vec<Filter>,
}

impl FilterChain {
    pub fn compile(configs: &[FilterConfig]) -> Result<Self, FilterError> {
        let filters = configs.iter().map(Filter::new).collect::<Result<_, _>>()?;
        Ok(Self { filters })
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// True when the envelope must not be forwarded.
    ///
    /// A payload that is not valid JSON is seen as `null`.
    pub fn suppress(&self, envelope: &Envelope) -> bool {
        if self.filters.is_empty() {
            return false;
        }
        let variables = envelope.variables();
        let data = envelope.parse_payload().unwrap_or(Value::Null);
        !self
            .filters
            .iter()
            .all(|filter| filter.matches(&variables, &data))
    }
}
