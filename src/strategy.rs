use regex::Regex;

use crate::parse;
use crate::runner::{Invocation, ProcessRunner, RunError};
use crate::types::{BenchmarkKind, BenchmarkSpec, CommandLine, IterationOutcome};

/// Measures one iteration of `spec` with the strategy its kind selects.
///
/// Any failure (spawn error, non-zero exit, timeout, missing match) becomes
/// [`IterationOutcome::Failed`] carrying the diagnostic for the report.
pub fn measure_iteration<R: ProcessRunner>(spec: &BenchmarkSpec, runner: &R) -> IterationOutcome {
    let result = match spec.kind() {
        BenchmarkKind::Timing => time_code(spec, runner),
        BenchmarkKind::Pattern { pattern } => extract_from_output(spec, pattern, runner),
        BenchmarkKind::Perf { prefix } => profile_code(spec, prefix, runner),
    };

    result.unwrap_or_else(|err| IterationOutcome::Failed(err.to_failure()))
}

/// Wall-clock seconds spent in `code`.
fn time_code<R: ProcessRunner>(spec: &BenchmarkSpec, runner: &R) -> Result<IterationOutcome, RunError> {
    let invocation = Invocation::new(spec.code(), spec.code_env()).timeout(spec.timeout());
    let output = runner.run(&invocation)?.check(&invocation)?;
    Ok(IterationOutcome::Measured(output.elapsed.as_secs_f64()))
}

/// The first capture group of `pattern` in the merged stdout/stderr of `code`.
fn extract_from_output<R: ProcessRunner>(
    spec: &BenchmarkSpec,
    pattern: &Regex,
    runner: &R,
) -> Result<IterationOutcome, RunError> {
    let invocation = Invocation::new(spec.code(), spec.code_env())
        .merge_stderr()
        .timeout(spec.timeout());
    let output = runner.run(&invocation)?.check(&invocation)?;

    let Some(text) = parse::extract_capture(pattern, &output.output).map(str::to_string) else {
        return Err(RunError::PatternNotFound {
            pattern: pattern.as_str().to_string(),
            command: invocation.command_text(),
            output: output.output,
        });
    };

    let value = parse::parse_number(&text).ok_or(RunError::InvalidValue { text })?;
    Ok(IterationOutcome::Measured(value))
}

/// Every `value,series` line printed by `prefix + code`.
fn profile_code<R: ProcessRunner>(
    spec: &BenchmarkSpec,
    prefix: &CommandLine,
    runner: &R,
) -> Result<IterationOutcome, RunError> {
    let command = spec.code().prefixed_by(prefix);
    let invocation = Invocation::new(&command, spec.code_env()).timeout(spec.timeout());
    let output = runner.run(&invocation)?.check(&invocation)?;
    Ok(IterationOutcome::MeasuredSeries(parse::parse_series(&output.output)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::StderrMode;
    use crate::runner::scripted::{ScriptedRunner, Step};
    use crate::types::{EnvMap, FailureKind};

    fn failed_kind(outcome: &IterationOutcome) -> Option<FailureKind> {
        match outcome {
            IterationOutcome::Failed(f) => Some(f.kind),
            _ => None,
        }
    }

    #[test]
    fn timing_reports_runner_elapsed() {
        let spec = BenchmarkSpec::timing("t", "sleep 1").build().unwrap();
        let runner = ScriptedRunner::new([Step::took(1.25)]);
        assert_eq!(
            measure_iteration(&spec, &runner),
            IterationOutcome::Measured(1.25)
        );
        let calls = runner.calls();
        assert_eq!(calls[0].command(), "sleep 1");
        assert_eq!(calls[0].stderr, StderrMode::Inherit);
    }

    #[test]
    fn timing_fails_on_non_zero_exit() {
        let spec = BenchmarkSpec::timing("t", "false").build().unwrap();
        let runner = ScriptedRunner::new([Step::exit(1, "")]);
        let outcome = measure_iteration(&spec, &runner);
        assert_eq!(failed_kind(&outcome), Some(FailureKind::NonZeroExit));
    }

    #[test]
    fn timing_passes_env_and_timeout() {
        let mut env = EnvMap::new();
        env.insert("LANG".into(), "C".into());
        let spec = BenchmarkSpec::timing("t", "true")
            .code_env(env.clone())
            .timeout_secs(2.0)
            .build()
            .unwrap();
        let runner = ScriptedRunner::new([]);
        measure_iteration(&spec, &runner);
        let call = &runner.calls()[0];
        assert_eq!(call.env.as_ref(), Some(&env));
        assert_eq!(call.timeout, spec.timeout());
    }

    #[test]
    fn timeout_becomes_failure() {
        let spec = BenchmarkSpec::timing("t", "sleep 60")
            .timeout_secs(0.5)
            .build()
            .unwrap();
        let runner = ScriptedRunner::new([Step::Timeout]);
        let outcome = measure_iteration(&spec, &runner);
        assert_eq!(failed_kind(&outcome), Some(FailureKind::Timeout));
    }

    #[test]
    fn spawn_error_becomes_failure() {
        let spec = BenchmarkSpec::timing("t", "no-such-binary").build().unwrap();
        let runner = ScriptedRunner::new([Step::SpawnError]);
        let outcome = measure_iteration(&spec, &runner);
        assert_eq!(failed_kind(&outcome), Some(FailureKind::Spawn));
    }

    #[test]
    fn pattern_extracts_value_from_merged_output() {
        let spec = BenchmarkSpec::pattern("p", "./bench", r"Result: ([0-9.]+)")
            .build()
            .unwrap();
        let runner = ScriptedRunner::new([Step::ok("warming up\nResult: 42.5ms\n")]);
        assert_eq!(
            measure_iteration(&spec, &runner),
            IterationOutcome::Measured(42.5)
        );
        assert_eq!(runner.calls()[0].stderr, StderrMode::Merge);
    }

    #[test]
    fn pattern_without_match_fails_with_no_match() {
        let spec = BenchmarkSpec::pattern("p", "./bench", r"Result: ([0-9.]+)")
            .build()
            .unwrap();
        let runner = ScriptedRunner::new([Step::ok("crashed politely\n")]);
        let IterationOutcome::Failed(failure) = measure_iteration(&spec, &runner) else {
            panic!("expected a failure");
        };
        assert_eq!(failure.kind, FailureKind::PatternNotFound);
        assert!(failure.diagnostic.contains("no match"));
        assert!(failure.diagnostic.contains("crashed politely"));
    }

    #[test]
    fn pattern_checks_exit_before_searching() {
        let spec = BenchmarkSpec::pattern("p", "./bench", r"Result: ([0-9.]+)")
            .build()
            .unwrap();
        let runner = ScriptedRunner::new([Step::exit(2, "Result: 1.0\n")]);
        let outcome = measure_iteration(&spec, &runner);
        assert_eq!(failed_kind(&outcome), Some(FailureKind::NonZeroExit));
    }

    #[test]
    fn pattern_with_non_numeric_capture_fails() {
        let spec = BenchmarkSpec::pattern("p", "./bench", r"Result: (\S+)")
            .build()
            .unwrap();
        let runner = ScriptedRunner::new([Step::ok("Result: fast\n")]);
        let outcome = measure_iteration(&spec, &runner);
        assert_eq!(failed_kind(&outcome), Some(FailureKind::InvalidValue));
    }

    #[test]
    fn perf_prefixes_code_and_parses_series() {
        let spec = BenchmarkSpec::perf("s", "perf stat -x,", "./app --n 10")
            .build()
            .unwrap();
        let runner = ScriptedRunner::new([Step::ok("123,cache-misses\n456,branch-misses\n")]);
        let IterationOutcome::MeasuredSeries(series) = measure_iteration(&spec, &runner) else {
            panic!("expected a series outcome");
        };
        assert_eq!(series.len(), 2);
        assert_eq!(series["cache-misses"], 123.0);
        assert_eq!(runner.commands(), ["perf stat -x, ./app --n 10"]);
    }

    #[test]
    fn perf_fails_on_non_zero_exit() {
        let spec = BenchmarkSpec::perf("s", "perf stat -x,", "./app")
            .build()
            .unwrap();
        let runner = ScriptedRunner::new([Step::exit(1, "123,cycles\n")]);
        let outcome = measure_iteration(&spec, &runner);
        assert_eq!(failed_kind(&outcome), Some(FailureKind::NonZeroExit));
    }
}
