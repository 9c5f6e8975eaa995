use std::collections::HashSet;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Deserialize;

use crate::errors::CmdbenchError;
use crate::types::{BenchmarkBuilder, BenchmarkSpec, CommandInput, EnvMap, KindName};

pub const DEFAULT_SUITE_FILE: &str = "cmdbench.toml";

/// Values applied to every benchmark that does not set its own.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Defaults {
    pub repeat: Option<i64>,
    /// Seconds.
    pub timeout: Option<f64>,
}

impl Defaults {
    /// Fields set in `overrides` win over ours.
    pub fn overridden_by(self, overrides: &Defaults) -> Defaults {
        Defaults {
            repeat: overrides.repeat.or(self.repeat),
            timeout: overrides.timeout.or(self.timeout),
        }
    }
}

/// One `[[benchmark]]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BenchmarkEntry {
    pub name: String,
    #[serde(default)]
    pub kind: KindName,
    pub code: CommandInput,
    pub code_env: Option<EnvMap>,
    pub setup: Option<CommandInput>,
    pub setup_env: Option<EnvMap>,
    pub cleanup: Option<CommandInput>,
    pub cleanup_env: Option<EnvMap>,
    pub repeat: Option<i64>,
    pub timeout: Option<f64>,
    pub pattern: Option<String>,
    pub prefix: Option<CommandInput>,
}

impl BenchmarkEntry {
    pub fn into_spec(self, defaults: &Defaults) -> Result<BenchmarkSpec, CmdbenchError> {
        let mut builder = BenchmarkBuilder::new(self.name, self.code).kind(self.kind);

        if let Some(env) = self.code_env {
            builder = builder.code_env(env);
        }
        if let Some(setup) = self.setup {
            builder = builder.setup(setup);
        }
        if let Some(env) = self.setup_env {
            builder = builder.setup_env(env);
        }
        if let Some(cleanup) = self.cleanup {
            builder = builder.cleanup(cleanup);
        }
        if let Some(env) = self.cleanup_env {
            builder = builder.cleanup_env(env);
        }
        if let Some(repeat) = self.repeat.or(defaults.repeat) {
            builder = builder.repeat(repeat);
        }
        if let Some(seconds) = self.timeout.or(defaults.timeout) {
            builder = builder.timeout_secs(seconds);
        }
        if let Some(pattern) = self.pattern {
            builder = builder.pattern(pattern);
        }
        if let Some(prefix) = self.prefix {
            builder = builder.prefix(prefix);
        }

        builder.build()
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SuiteFile {
    #[serde(default)]
    defaults: Defaults,
    #[serde(default)]
    benchmark: Vec<BenchmarkEntry>,
}

/// Validated benchmarks from one suite file, in file order.
#[derive(Debug, Clone)]
pub struct Suite {
    pub path: PathBuf,
    pub benchmarks: Vec<BenchmarkSpec>,
}

impl Suite {
    /// Keeps only benchmarks whose name matches `filter`.
    pub fn filtered(mut self, filter: Option<&Regex>) -> Suite {
        if let Some(re) = filter {
            self.benchmarks.retain(|b| re.is_match(b.name()));
        }
        self
    }
}

/// Reads and validates a suite file. `overrides` take precedence over the
/// file's `[defaults]` table.
pub fn load_suite(path: &Path, overrides: &Defaults) -> Result<Suite, CmdbenchError> {
    let text = std::fs::read_to_string(path).map_err(|source| CmdbenchError::SuiteReadError {
        path: path.to_path_buf(),
        source,
    })?;
    parse_suite(&text, path, overrides)
}

/// Parses suite text; `path` is only used in error messages and the result.
pub fn parse_suite(text: &str, path: &Path, overrides: &Defaults) -> Result<Suite, CmdbenchError> {
    let file: SuiteFile = toml::from_str(text).map_err(|err| CmdbenchError::SuiteParseError {
        path: path.to_path_buf(),
        detail: err.to_string().trim_end().to_string(),
    })?;

    let defaults = file.defaults.overridden_by(overrides);
    let mut seen = HashSet::new();
    let mut benchmarks = Vec::with_capacity(file.benchmark.len());

    for entry in file.benchmark {
        if !seen.insert(entry.name.clone()) {
            return Err(CmdbenchError::DuplicateBenchmark {
                path: path.to_path_buf(),
                name: entry.name,
            });
        }
        let spec = entry
            .into_spec(&defaults)
            .map_err(|source| CmdbenchError::InvalidBenchmark {
                path: path.to_path_buf(),
                source: Box::new(source),
            })?;
        benchmarks.push(spec);
    }

    tracing::debug!(path = %path.display(), count = benchmarks.len(), "loaded suite");

    Ok(Suite {
        path: path.to_path_buf(),
        benchmarks,
    })
}
