use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use chrono::Utc;

use crate::aggregate;
use crate::runner::{Invocation, ProcessRunner};
use crate::strategy;
use crate::types::{
    BenchmarkSpec, CommandLine, EnvMap, Failure, FailureKind, IterationOutcome, ResultRecord,
    RunReport,
};

/// Upper bound on the outcome buffer reserved before the first iteration.
const MAX_PREALLOCATED: u32 = 1024;

/// Stage of a single benchmark run, in the order they happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Setup,
    Iteration { index: u32, of: u32 },
    Cleanup,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Setup => f.write_str("setup"),
            Phase::Iteration { index, of } => write!(f, "iteration {index} of {of}"),
            Phase::Cleanup => f.write_str("cleanup"),
        }
    }
}

/// Runs benchmarks one at a time: setup, `repeat` measured iterations,
/// then cleanup.
///
/// Iterations never overlap. The first failing phase ends the measurement
/// and the run reports a single failure record. Cleanup runs exactly once
/// whenever it is configured, whatever happened before it; it receives
/// nothing from setup, so a setup that failed or never ran is not a problem.
pub struct Lifecycle<R> {
    runner: R,
    cancel: Option<Arc<AtomicBool>>,
}

impl<R: ProcessRunner> Lifecycle<R> {
    pub fn new(runner: R) -> Self {
        Lifecycle {
            runner,
            cancel: None,
        }
    }

    /// Abandons the remaining iterations once `flag` is set. The flag is only
    /// looked at between iterations, never while a child is running.
    ///
    /// Library-only: the `cmdbench` binary installs no signal handler and
    /// never sets a flag, so Ctrl-C there terminates the whole process group.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn run(&self, spec: &BenchmarkSpec) -> RunReport {
        let span = tracing::info_span!("benchmark", name = spec.name(), kind = spec.kind().name());
        let _guard = span.enter();

        let started_at = Utc::now();
        let clock = Instant::now();

        let mut records = match self.setup(spec).and_then(|()| self.iterate(spec)) {
            Ok(outcomes) => aggregate::summarize(&outcomes),
            Err(failure) => vec![ResultRecord::Failure(failure)],
        };

        if let Err(failure) = self.cleanup(spec) {
            records = merge_cleanup_failure(records, failure);
        }

        let report = RunReport {
            name: spec.name().to_string(),
            kind: spec.kind().name(),
            fingerprint: spec.fingerprint(),
            started_at,
            elapsed: clock.elapsed(),
            records,
        };

        match report.failure() {
            None => tracing::info!(records = report.records.len(), elapsed = ?report.elapsed, "benchmark finished"),
            Some(failure) => tracing::warn!(kind = %failure.kind, "benchmark failed"),
        }

        report
    }

    fn setup(&self, spec: &BenchmarkSpec) -> Result<(), Failure> {
        let Some(setup) = spec.setup() else {
            return Ok(());
        };
        self.run_hook(Phase::Setup, setup, spec.setup_env(), FailureKind::Setup)
    }

    fn cleanup(&self, spec: &BenchmarkSpec) -> Result<(), Failure> {
        let Some(cleanup) = spec.cleanup() else {
            return Ok(());
        };
        self.run_hook(Phase::Cleanup, cleanup, spec.cleanup_env(), FailureKind::Cleanup)
    }

    fn run_hook(
        &self,
        phase: Phase,
        command: &CommandLine,
        env: Option<&EnvMap>,
        kind: FailureKind,
    ) -> Result<(), Failure> {
        tracing::debug!(%phase, command = %command, "running");
        let invocation = Invocation::new(command, env);
        match self
            .runner
            .run(&invocation)
            .and_then(|output| output.check(&invocation))
        {
            Ok(_) => Ok(()),
            Err(err) => {
                tracing::warn!(%phase, error = %err, "phase failed");
                Err(Failure::new(kind, format!("{phase} failed: {}", err.diagnostic())))
            }
        }
    }

    fn iterate(&self, spec: &BenchmarkSpec) -> Result<Vec<IterationOutcome>, Failure> {
        let repeat = spec.repeat();
        let mut outcomes = Vec::with_capacity(repeat.min(MAX_PREALLOCATED) as usize);

        for index in 1..=repeat {
            let phase = Phase::Iteration { index, of: repeat };

            if self.cancelled() {
                tracing::warn!(%phase, "cancelled");
                return Err(Failure::new(
                    FailureKind::Cancelled,
                    format!("run cancelled before {phase}"),
                ));
            }

            tracing::debug!(%phase, "measuring");
            match strategy::measure_iteration(spec, &self.runner) {
                IterationOutcome::Failed(failure) => {
                    tracing::warn!(%phase, kind = %failure.kind, "iteration failed");
                    return Err(Failure::new(
                        failure.kind,
                        format!("{phase}: {}", failure.diagnostic),
                    ));
                }
                outcome => outcomes.push(outcome),
            }
        }

        Ok(outcomes)
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

/// Folds a cleanup failure into the records of a run.
///
/// A run that had succeeded is reported as the cleanup failure. A run that
/// had already failed keeps its failure kind and gains the cleanup text.
fn merge_cleanup_failure(records: Vec<ResultRecord>, cleanup: Failure) -> Vec<ResultRecord> {
    let earlier = records.into_iter().find_map(|r| match r {
        ResultRecord::Failure(f) => Some(f),
        _ => None,
    });

    let merged = match earlier {
        Some(mut failure) => {
            failure.diagnostic.push_str("\n\n");
            failure.diagnostic.push_str(&cleanup.diagnostic);
            failure
        }
        None => cleanup,
    };
    vec![ResultRecord::Failure(merged)]
}
