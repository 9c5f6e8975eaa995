pub mod aggregate;
pub mod config;
pub mod display;
pub mod errors;
pub mod fingerprint;
pub mod lifecycle;
pub mod parse;
pub mod runner;
pub mod strategy;
pub mod types;

pub use errors::CmdbenchError;
pub use lifecycle::Lifecycle;
pub use runner::{ProcessRunner, SystemRunner};
pub use types::{BenchmarkSpec, ResultRecord, RunReport};
