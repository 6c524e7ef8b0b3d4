//! Compiled reactor rules.
//!
//! A rule selects one variable, tests it against a list of patterns (any may
//! match) and describes the command to run on a match. Command arguments are
//! templates:
//!
//! | config string   | meaning                                   |
//! |-----------------|-------------------------------------------|
//! | `$var`          | argv entry resolved from `var`            |
//! | `stdin:$var`    | stdin line resolved from `var`            |
//! | `stdin:text`    | literal stdin line                        |
//! | anything else   | literal argv entry                        |

use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error};

use super::exec::{CommandRunner, ExecError};
use super::RuleError;
use crate::config::deserialize_seconds;
use crate::lookup::{lookup, prefix_match, UnknownVariable, Variables};

const STDIN_PREFIX: &str = "stdin:";
const VARIABLE_PREFIX: char = '$';

// ============================================================================
// Configuration
// ============================================================================

/// One entry of `reactor.rules`.
#[derive(Debug, Clone, Deserialize)]
pub struct RuleConfig {
    pub name: String,
    #[serde(rename = "match")]
    pub matching: MatchConfig,
    pub exec: ExecConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MatchConfig {
    pub field: String,
    #[serde(alias = "pattern")]
    pub patterns: Patterns,
}

/// A single pattern or a list of them.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Patterns {
    One(String),
    Many(Vec<String>),
}

impl Patterns {
    pub fn as_slice(&self) -> &[String] {
        match self {
            Patterns::One(pattern) => std::slice::from_ref(pattern),
            Patterns::Many(patterns) => patterns,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecConfig {
    pub path: String,
    #[serde(deserialize_with = "deserialize_seconds")]
    pub timeout: Duration,
    #[serde(default)]
    pub args: Vec<ArgSpec>,
}

/// One command argument template.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum ArgSpec {
    Literal(String),
    Substitute(String),
    StdinLiteral(String),
    StdinSubstitute(String),
}

impl ArgSpec {
    pub fn parse(spec: &str) -> Self {
        if let Some(name) = spec.strip_prefix(VARIABLE_PREFIX) {
            return ArgSpec::Substitute(name.to_string());
        }
        match spec.strip_prefix(STDIN_PREFIX) {
            Some(rest) => match rest.strip_prefix(VARIABLE_PREFIX) {
                Some(name) => ArgSpec::StdinSubstitute(name.to_string()),
                None => ArgSpec::StdinLiteral(rest.to_string()),
            },
            None => ArgSpec::Literal(spec.to_string()),
        }
    }
}

impl From<String> for ArgSpec {
    fn from(spec: String) -> Self {
        ArgSpec::parse(&spec)
    }
}

// ============================================================================
// Matcher
// ============================================================================

/// A fully resolved command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// `argv[0]` is the binary path.
    pub argv: Vec<String>,
    /// Stdin lines joined with `\n`.
    pub stdin: String,
    pub timeout: Duration,
}

/// What happened when a matcher ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Arguments could not be built; nothing was launched.
    Skipped,
    /// The command exited. Exit status is informational only.
    Completed { exit_code: Option<i32> },
    /// The command was killed after its timeout.
    TimedOut,
    /// The command could not be started.
    LaunchFailed,
}

/// A compiled rule. Immutable once built.
#[derive(Debug, Clone)]
pub struct Matcher {
    name: String,
    field: String,
    patterns: Vec<Regex>,
    binary: String,
    timeout: Duration,
    args: Vec<ArgSpec>,
}

impl Matcher {
    pub fn compile(rule: &RuleConfig) -> Result<Self, RuleError> {
        let patterns = rule
            .matching
            .patterns
            .as_slice()
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|source| RuleError::InvalidPattern {
                    rule: rule.name.clone(),
                    pattern: pattern.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            name: rule.name.clone(),
            field: rule.matching.field.clone(),
            patterns,
            binary: rule.exec.path.clone(),
            timeout: rule.exec.timeout,
            args: rule.exec.args.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// True when the field resolves and any pattern matches it from position 0.
    pub fn matches(&self, variables: &Variables, data: &Value) -> bool {
        match lookup(&self.field, variables, data) {
            Ok(value) => self
                .patterns
                .iter()
                .any(|pattern| prefix_match(pattern, &value)),
            Err(_) => false,
        }
    }

    /// Resolve every argument template. Fails as a whole on the first unknown variable.
    pub fn build_args(
        &self,
        variables: &Variables,
        data: &Value,
    ) -> Result<Invocation, UnknownVariable> {
        let mut argv = vec![self.binary.clone()];
        let mut stdin = Vec::new();

        for arg in &self.args {
            match arg {
                ArgSpec::Literal(text) => argv.push(text.clone()),
                ArgSpec::Substitute(name) => argv.push(lookup(name, variables, data)?),
                ArgSpec::StdinLiteral(text) => stdin.push(text.clone()),
                ArgSpec::StdinSubstitute(name) => stdin.push(lookup(name, variables, data)?),
            }
        }

        Ok(Invocation {
            argv,
            stdin: stdin.join("\n"),
            timeout: self.timeout,
        })
    }

    /// Build the command line and run it. Failures are logged, never returned.
    pub async fn run(
        &self,
        runner: &dyn CommandRunner,
        variables: &Variables,
        data: &Value,
    ) -> RunOutcome {
        let invocation = match self.build_args(variables, data) {
            Ok(invocation) => invocation,
            Err(e) => {
                error!(rule = %self.name, error = %e, "Unable to build the argument list");
                return RunOutcome::Skipped;
            }
        };

        debug!(rule = %self.name, argv = ?invocation.argv, "Running");
        match runner.execute(&invocation).await {
            Ok(output) => {
                debug!(
                    rule = %self.name,
                    exit_code = ?output.exit_code,
                    output = %String::from_utf8_lossy(&output.output),
                    "Command finished"
                );
                RunOutcome::Completed {
                    exit_code: output.exit_code,
                }
            }
            Err(ExecError::Timeout(timeout)) => {
                error!(rule = %self.name, argv = ?invocation.argv, timeout = ?timeout, "Timeout when running");
                RunOutcome::TimedOut
            }
            Err(e) => {
                error!(rule = %self.name, argv = ?invocation.argv, error = %e, "Unable to run");
                RunOutcome::LaunchFailed
            }
        }
    }
}
