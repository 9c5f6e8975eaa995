use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum CmdbenchError {
    #[error("Benchmark name must not be empty")]
    EmptyName,

    #[error("Benchmark '{name}' has an empty `code` command")]
    EmptyCode { name: String },

    #[error("Benchmark '{name}' has repeat = {repeat}; it must be at least 1")]
    InvalidRepeat { name: String, repeat: i64 },

    #[error("Benchmark '{name}' has a non-positive timeout ({seconds}s)")]
    InvalidTimeout { name: String, seconds: f64 },

    #[error("Benchmark '{name}' is of kind '{kind}' but has no `{field}`")]
    MissingField {
        name: String,
        kind: &'static str,
        field: &'static str,
    },

    #[error("Benchmark '{name}' sets `{field}`, which kind '{kind}' does not use")]
    UnexpectedField {
        name: String,
        kind: &'static str,
        field: &'static str,
    },

    #[error("Benchmark '{name}' has an invalid pattern: {source}")]
    InvalidPattern {
        name: String,
        source: regex::Error,
    },

    #[error("Benchmark '{name}' pattern must have exactly one capture group, found {found}")]
    CaptureGroupCount { name: String, found: usize },

    #[error("Failed to read suite file {path}: {source}")]
    SuiteReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse suite file {path}: {detail}")]
    SuiteParseError { path: PathBuf, detail: String },

    #[error("Suite file {path} defines benchmark '{name}' more than once")]
    DuplicateBenchmark { path: PathBuf, name: String },

    #[error("Invalid benchmark in {path}: {source}")]
    InvalidBenchmark {
        path: PathBuf,
        source: Box<CmdbenchError>,
    },

    #[error("{failed} of {total} benchmark(s) failed")]
    BenchmarksFailed { failed: usize, total: usize },
}
