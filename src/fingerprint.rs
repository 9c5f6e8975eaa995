use sha2::{Digest, Sha256};

use crate::types::{BenchmarkSpec, CommandLine, EnvMap};

/// Stands in for an absent command or environment.
const ABSENT: &str = "None";

/// Identity hash of a benchmark's static definition.
///
/// Covers name, setup, code and cleanup together with their environments.
/// `repeat`, `timeout` and the measurement kind are left out so that results
/// from runs with a different iteration count stay comparable.
pub fn fingerprint(spec: &BenchmarkSpec) -> String {
    let parts = [
        spec.name().to_string(),
        render_command(spec.setup()),
        render_env(spec.setup_env()),
        spec.code().joined(),
        render_env(spec.code_env()),
        render_command(spec.cleanup()),
        render_env(spec.cleanup_env()),
    ];

    let digest = Sha256::digest(parts.join(" ").as_bytes());
    hex::encode(digest)
}

/// First `len` hex digits, for compact display.
pub fn short(fingerprint: &str, len: usize) -> &str {
    fingerprint.get(..len).unwrap_or(fingerprint)
}

fn render_command(command: Option<&CommandLine>) -> String {
    match command {
        Some(c) => c.joined(),
        None => ABSENT.to_string(),
    }
}

fn render_env(env: Option<&EnvMap>) -> String {
    match env {
        // A BTreeMap<String, String> always serializes; keys come out sorted.
        Some(map) => serde_json::to_string(map).unwrap_or_else(|_| ABSENT.to_string()),
        None => ABSENT.to_string(),
    }
}
