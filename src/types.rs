use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use regex::Regex;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

use crate::errors::CmdbenchError;
use crate::fingerprint;

/// Environment handed to a child verbatim. Ordered so its textual form is stable.
pub type EnvMap = BTreeMap<String, String>;

pub const DEFAULT_REPEAT: i64 = 3;

/// A command as written by the user: either one string or an already split argv.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum CommandInput {
    Text(String),
    Tokens(Vec<String>),
}

impl CommandInput {
    /// Text is split on runs of whitespace. There is no quoting or escaping:
    /// `"echo 'a b'"` yields three tokens.
    pub fn normalize(self) -> CommandLine {
        match self {
            CommandInput::Text(text) => {
                CommandLine(text.split_whitespace().map(str::to_string).collect())
            }
            CommandInput::Tokens(tokens) => CommandLine(tokens),
        }
    }
}

impl From<&str> for CommandInput {
    fn from(text: &str) -> Self {
        CommandInput::Text(text.to_string())
    }
}

impl From<String> for CommandInput {
    fn from(text: String) -> Self {
        CommandInput::Text(text)
    }
}

impl From<Vec<String>> for CommandInput {
    fn from(tokens: Vec<String>) -> Self {
        CommandInput::Tokens(tokens)
    }
}

impl From<Vec<&str>> for CommandInput {
    fn from(tokens: Vec<&str>) -> Self {
        CommandInput::Tokens(tokens.into_iter().map(str::to_string).collect())
    }
}

impl<const N: usize> From<[&str; N]> for CommandInput {
    fn from(tokens: [&str; N]) -> Self {
        CommandInput::Tokens(tokens.iter().map(|t| t.to_string()).collect())
    }
}

/// Canonical argv of a command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandLine(Vec<String>);

impl CommandLine {
    pub fn tokens(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Tokens joined by single spaces, as used in fingerprints and messages.
    pub fn joined(&self) -> String {
        self.0.join(" ")
    }

    /// `prefix` followed by this command, e.g. a profiler wrapping the benchmark.
    pub fn prefixed_by(&self, prefix: &CommandLine) -> CommandLine {
        CommandLine(prefix.0.iter().chain(self.0.iter()).cloned().collect())
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.joined())
    }
}

/// How one iteration is measured, fixed at construction.
#[derive(Debug, Clone)]
pub enum BenchmarkKind {
    /// Wall-clock time of `code`.
    Timing,
    /// First capture group of `pattern` in the combined stdout/stderr of `code`.
    Pattern { pattern: Regex },
    /// `prefix + code`, whose stdout carries `value,series` lines.
    Perf { prefix: CommandLine },
}

impl BenchmarkKind {
    pub fn name(&self) -> &'static str {
        match self {
            BenchmarkKind::Timing => KindName::Timing.as_str(),
            BenchmarkKind::Pattern { .. } => KindName::Pattern.as_str(),
            BenchmarkKind::Perf { .. } => KindName::Perf.as_str(),
        }
    }
}

/// Kind tag as written in suite files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KindName {
    #[default]
    Timing,
    Pattern,
    Perf,
}

impl KindName {
    pub fn as_str(self) -> &'static str {
        match self {
            KindName::Timing => "timing",
            KindName::Pattern => "pattern",
            KindName::Perf => "perf",
        }
    }
}

/// A validated benchmark definition. Immutable once built.
#[derive(Debug, Clone)]
pub struct BenchmarkSpec {
    name: String,
    code: CommandLine,
    code_env: Option<EnvMap>,
    setup: Option<CommandLine>,
    setup_env: Option<EnvMap>,
    cleanup: Option<CommandLine>,
    cleanup_env: Option<EnvMap>,
    repeat: u32,
    timeout: Option<Duration>,
    kind: BenchmarkKind,
}

impl BenchmarkSpec {
    pub fn timing(name: impl Into<String>, code: impl Into<CommandInput>) -> BenchmarkBuilder {
        BenchmarkBuilder::new(name, code)
    }

    pub fn pattern(
        name: impl Into<String>,
        code: impl Into<CommandInput>,
        pattern: impl Into<String>,
    ) -> BenchmarkBuilder {
        BenchmarkBuilder::new(name, code)
            .kind(KindName::Pattern)
            .pattern(pattern)
    }

    pub fn perf(
        name: impl Into<String>,
        prefix: impl Into<CommandInput>,
        code: impl Into<CommandInput>,
    ) -> BenchmarkBuilder {
        BenchmarkBuilder::new(name, code)
            .kind(KindName::Perf)
            .prefix(prefix)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn code(&self) -> &CommandLine {
        &self.code
    }

    pub fn code_env(&self) -> Option<&EnvMap> {
        self.code_env.as_ref()
    }

    pub fn setup(&self) -> Option<&CommandLine> {
        self.setup.as_ref()
    }

    pub fn setup_env(&self) -> Option<&EnvMap> {
        self.setup_env.as_ref()
    }

    pub fn cleanup(&self) -> Option<&CommandLine> {
        self.cleanup.as_ref()
    }

    pub fn cleanup_env(&self) -> Option<&EnvMap> {
        self.cleanup_env.as_ref()
    }

    pub fn repeat(&self) -> u32 {
        self.repeat
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn kind(&self) -> &BenchmarkKind {
        &self.kind
    }

    pub fn fingerprint(&self) -> String {
        fingerprint::fingerprint(self)
    }
}

/// Collects raw benchmark fields and validates them in [`BenchmarkBuilder::build`].
#[derive(Debug, Clone)]
pub struct BenchmarkBuilder {
    name: String,
    code: CommandInput,
    code_env: Option<EnvMap>,
    setup: Option<CommandInput>,
    setup_env: Option<EnvMap>,
    cleanup: Option<CommandInput>,
    cleanup_env: Option<EnvMap>,
    repeat: i64,
    timeout_secs: Option<f64>,
    kind: KindName,
    pattern: Option<String>,
    prefix: Option<CommandInput>,
}

impl BenchmarkBuilder {
    pub fn new(name: impl Into<String>, code: impl Into<CommandInput>) -> Self {
        BenchmarkBuilder {
            name: name.into(),
            code: code.into(),
            code_env: None,
            setup: None,
            setup_env: None,
            cleanup: None,
            cleanup_env: None,
            repeat: DEFAULT_REPEAT,
            timeout_secs: None,
            kind: KindName::Timing,
            pattern: None,
            prefix: None,
        }
    }

    pub fn code_env(mut self, env: EnvMap) -> Self {
        self.code_env = Some(env);
        self
    }

    pub fn setup(mut self, setup: impl Into<CommandInput>) -> Self {
        self.setup = Some(setup.into());
        self
    }

    pub fn setup_env(mut self, env: EnvMap) -> Self {
        self.setup_env = Some(env);
        self
    }

    pub fn cleanup(mut self, cleanup: impl Into<CommandInput>) -> Self {
        self.cleanup = Some(cleanup.into());
        self
    }

    pub fn cleanup_env(mut self, env: EnvMap) -> Self {
        self.cleanup_env = Some(env);
        self
    }

    pub fn repeat(mut self, repeat: i64) -> Self {
        self.repeat = repeat;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = Some(timeout.as_secs_f64());
        self
    }

    pub fn timeout_secs(mut self, seconds: f64) -> Self {
        self.timeout_secs = Some(seconds);
        self
    }

    pub fn kind(mut self, kind: KindName) -> Self {
        self.kind = kind;
        self
    }

    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    pub fn prefix(mut self, prefix: impl Into<CommandInput>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn build(self) -> Result<BenchmarkSpec, CmdbenchError> {
        let name = self.name;
        if name.trim().is_empty() {
            return Err(CmdbenchError::EmptyName);
        }

        let code = self.code.normalize();
        if code.is_empty() {
            return Err(CmdbenchError::EmptyCode { name });
        }

        let repeat = match u32::try_from(self.repeat) {
            Ok(n) if n >= 1 => n,
            _ => {
                return Err(CmdbenchError::InvalidRepeat {
                    name,
                    repeat: self.repeat,
                });
            }
        };

        let timeout = match self.timeout_secs {
            None => None,
            Some(seconds) => match Duration::try_from_secs_f64(seconds) {
                Ok(d) if !d.is_zero() => Some(d),
                _ => return Err(CmdbenchError::InvalidTimeout { name, seconds }),
            },
        };

        let kind = match self.kind {
            KindName::Timing => {
                reject_field(&name, self.kind, "pattern", self.pattern.is_some())?;
                reject_field(&name, self.kind, "prefix", self.prefix.is_some())?;
                BenchmarkKind::Timing
            }
            KindName::Pattern => {
                reject_field(&name, self.kind, "prefix", self.prefix.is_some())?;
                let Some(raw) = self.pattern else {
                    return Err(missing_field(name, self.kind, "pattern"));
                };
                let pattern = match Regex::new(&raw) {
                    Ok(re) => re,
                    Err(source) => return Err(CmdbenchError::InvalidPattern { name, source }),
                };
                let groups = pattern.captures_len() - 1;
                if groups != 1 {
                    return Err(CmdbenchError::CaptureGroupCount {
                        name,
                        found: groups,
                    });
                }
                BenchmarkKind::Pattern { pattern }
            }
            KindName::Perf => {
                reject_field(&name, self.kind, "pattern", self.pattern.is_some())?;
                let prefix = self.prefix.map(CommandInput::normalize).unwrap_or_default();
                if prefix.is_empty() {
                    return Err(missing_field(name, self.kind, "prefix"));
                }
                BenchmarkKind::Perf { prefix }
            }
        };

        Ok(BenchmarkSpec {
            name,
            code,
            code_env: self.code_env,
            setup: normalize_optional(self.setup),
            setup_env: self.setup_env,
            cleanup: normalize_optional(self.cleanup),
            cleanup_env: self.cleanup_env,
            repeat,
            timeout,
            kind,
        })
    }
}

/// An optional command that splits into nothing is the same as no command.
fn normalize_optional(input: Option<CommandInput>) -> Option<CommandLine> {
    input.map(CommandInput::normalize).filter(|c| !c.is_empty())
}

fn missing_field(name: String, kind: KindName, field: &'static str) -> CmdbenchError {
    CmdbenchError::MissingField {
        name,
        kind: kind.as_str(),
        field,
    }
}

fn reject_field(
    name: &str,
    kind: KindName,
    field: &'static str,
    present: bool,
) -> Result<(), CmdbenchError> {
    if present {
        return Err(CmdbenchError::UnexpectedField {
            name: name.to_string(),
            kind: kind.as_str(),
            field,
        });
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    Setup,
    NonZeroExit,
    PatternNotFound,
    InvalidValue,
    Spawn,
    Timeout,
    Cleanup,
    Cancelled,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::Setup => "setup failed",
            FailureKind::NonZeroExit => "non-zero exit",
            FailureKind::PatternNotFound => "no match",
            FailureKind::InvalidValue => "invalid value",
            FailureKind::Spawn => "spawn error",
            FailureKind::Timeout => "timeout",
            FailureKind::Cleanup => "cleanup failed",
            FailureKind::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Why a run produced no measurements, with the text to show for it.
#[derive(Debug, Clone, PartialEq)]
pub struct Failure {
    pub kind: FailureKind,
    pub diagnostic: String,
}

impl Failure {
    pub fn new(kind: FailureKind, diagnostic: impl Into<String>) -> Self {
        Failure {
            kind,
            diagnostic: diagnostic.into(),
        }
    }
}

/// Result of measuring a single iteration.
#[derive(Debug, Clone, PartialEq)]
pub enum IterationOutcome {
    Measured(f64),
    MeasuredSeries(BTreeMap<String, f64>),
    Failed(Failure),
}

/// Summary statistics over the scalar measurements of one run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Summary {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    pub std_dev: f64,
}

/// What a run emits. A run yields one `Aggregate`, any number of `Series`,
/// or exactly one `Failure`; never a mix of successes and a failure.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultRecord {
    Aggregate(Summary),
    Series { series_name: String, value: f64 },
    Failure(Failure),
}

impl ResultRecord {
    pub fn succeeded(&self) -> bool {
        !matches!(self, ResultRecord::Failure(_))
    }
}

impl Serialize for ResultRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ResultRecord::Aggregate(summary) => {
                let mut map = serializer.serialize_map(Some(6))?;
                map.serialize_entry("succeeded", &true)?;
                map.serialize_entry("timing_min", &summary.min)?;
                map.serialize_entry("timing_max", &summary.max)?;
                map.serialize_entry("timing_mean", &summary.mean)?;
                map.serialize_entry("timing_median", &summary.median)?;
                map.serialize_entry("timing_std", &summary.std_dev)?;
                map.end()
            }
            ResultRecord::Series { series_name, value } => {
                let mut map = serializer.serialize_map(Some(3))?;
                map.serialize_entry("succeeded", &true)?;
                map.serialize_entry("series_name", series_name)?;
                map.serialize_entry("series_value", value)?;
                map.end()
            }
            ResultRecord::Failure(failure) => {
                let mut map = serializer.serialize_map(Some(3))?;
                map.serialize_entry("succeeded", &false)?;
                map.serialize_entry("kind", &failure.kind)?;
                map.serialize_entry("traceback", &failure.diagnostic)?;
                map.end()
            }
        }
    }
}

/// Everything one benchmark run produced, keyed by its fingerprint.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub name: String,
    pub kind: &'static str,
    pub fingerprint: String,
    pub started_at: DateTime<Utc>,
    #[serde(serialize_with = "serialize_secs")]
    pub elapsed: Duration,
    pub records: Vec<ResultRecord>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.records.iter().all(ResultRecord::succeeded)
    }

    pub fn failure(&self) -> Option<&Failure> {
        self.records.iter().find_map(|r| match r {
            ResultRecord::Failure(f) => Some(f),
            _ => None,
        })
    }
}

fn serialize_secs<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(d.as_secs_f64())
}

#[derive(Clone, ValueEnum)]
pub enum OutputFormat {
    Default,
    Short,
}
