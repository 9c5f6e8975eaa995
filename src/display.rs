use std::collections::BTreeMap;

use owo_colors::{OwoColorize, Stream, Style};

use crate::fingerprint;
use crate::types::{BenchmarkKind, BenchmarkSpec, ResultRecord, RunReport, Summary};

const FINGERPRINT_WIDTH: usize = 12;

/// Truncate a line at word boundaries, appending "..." if truncated.
pub fn truncate_line(line: &str, max_chars: usize) -> String {
    let char_count = line.chars().count();
    if char_count <= max_chars {
        return line.to_string();
    }

    let limit = max_chars.saturating_sub(3);

    let byte_limit = line
        .char_indices()
        .nth(limit)
        .map(|(i, _)| i)
        .unwrap_or(line.len());

    let truncated = &line[..byte_limit];
    match truncated.rfind(' ') {
        Some(last_space) if last_space > 0 => format!("{}...", &truncated[..last_space]),
        _ => format!("{}...", truncated),
    }
}

/// Seconds rendered with a unit that keeps 3-4 significant digits.
pub fn format_seconds(secs: f64) -> String {
    let abs = secs.abs();
    if abs >= 1.0 {
        format!("{:.3}s", secs)
    } else if abs >= 1e-3 {
        format!("{:.3}ms", secs * 1e3)
    } else if abs >= 1e-6 {
        format!("{:.3}µs", secs * 1e6)
    } else {
        format!("{:.0}ns", secs * 1e9)
    }
}

/// A measured value with no known unit: integers stay integral, anything
/// else gets up to four decimals.
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        return format!("{:.0}", value);
    }
    let s = format!("{:.4}", value);
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}

fn format_measure(kind: &str, value: f64) -> String {
    if kind == "timing" {
        format_seconds(value)
    } else {
        format_number(value)
    }
}

fn style_name() -> Style {
    Style::new().bold()
}

fn style_failed() -> Style {
    Style::new().red().bold()
}

fn status_label(report: &RunReport, width: usize) -> String {
    if report.succeeded() {
        format!("{:<width$}", "ok")
            .if_supports_color(Stream::Stdout, |s| s.green())
            .to_string()
    } else {
        format!("{:<width$}", "FAILED")
            .if_supports_color(Stream::Stdout, |s| s.style(style_failed()))
            .to_string()
    }
}

fn summary_line(kind: &str, s: &Summary) -> String {
    format!(
        "min {}  median {}  mean {}  max {}  std {}",
        format_measure(kind, s.min),
        format_measure(kind, s.median),
        format_measure(kind, s.mean),
        format_measure(kind, s.max),
        format_measure(kind, s.std_dev),
    )
}

/// Series samples grouped by name, in first-seen iteration order per name.
fn group_series(records: &[ResultRecord]) -> BTreeMap<&str, Vec<f64>> {
    let mut grouped: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for record in records {
        if let ResultRecord::Series { series_name, value } = record {
            grouped.entry(series_name.as_str()).or_default().push(*value);
        }
    }
    grouped
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("")
}

/// Default format: one block per benchmark plus a pass/fail footer.
pub fn format_default(reports: &[RunReport]) -> String {
    let mut out = String::new();

    out.push_str(
        &"Benchmark results:"
            .if_supports_color(Stream::Stdout, |s| s.dimmed())
            .to_string(),
    );
    out.push_str("\n\n");

    let name_width = reports.iter().map(|r| r.name.chars().count()).max().unwrap_or(0);

    for report in reports {
        let name_padded = format!("{:<width$}", report.name, width = name_width);
        let name_colored = name_padded
            .if_supports_color(Stream::Stdout, |s| s.style(style_name()))
            .to_string();
        let fp = fingerprint::short(&report.fingerprint, FINGERPRINT_WIDTH)
            .if_supports_color(Stream::Stdout, |s| s.dimmed())
            .to_string();

        out.push_str(&format!(
            "  {}  {}  {}",
            name_colored,
            fp,
            status_label(report, 6)
        ));

        if let Some(failure) = report.failure() {
            out.push_str(&format!(
                "  {}: {}\n",
                failure.kind,
                truncate_line(first_line(&failure.diagnostic), 72)
            ));
            for line in failure.diagnostic.lines().skip(1) {
                out.push_str(
                    &format!("      {}", line)
                        .if_supports_color(Stream::Stdout, |s| s.dimmed())
                        .to_string(),
                );
                out.push('\n');
            }
            continue;
        }

        let series = group_series(&report.records);
        for record in &report.records {
            if let ResultRecord::Aggregate(summary) = record {
                out.push_str(&format!("  {}", summary_line(report.kind, summary)));
            }
        }
        out.push('\n');

        for (name, values) in &series {
            let rendered: Vec<String> = values.iter().map(|v| format_number(*v)).collect();
            out.push_str(&format!(
                "      {}: {}\n",
                name.if_supports_color(Stream::Stdout, |s| s.cyan()),
                rendered.join(", ")
            ));
        }
    }

    let failed = reports.iter().filter(|r| !r.succeeded()).count();
    let footer = format!("{} passed, {} failed", reports.len() - failed, failed);
    out.push('\n');
    if failed > 0 {
        out.push_str(
            &footer
                .if_supports_color(Stream::Stdout, |s| s.style(style_failed()))
                .to_string(),
        );
    } else {
        out.push_str(
            &footer
                .if_supports_color(Stream::Stdout, |s| s.dimmed())
                .to_string(),
        );
    }
    out.push('\n');

    out
}

/// Short format: one line per benchmark, no header or footer.
pub fn format_short(reports: &[RunReport]) -> String {
    let name_width = reports.iter().map(|r| r.name.chars().count()).max().unwrap_or(0);
    let mut out = String::new();

    for report in reports {
        let detail = if let Some(failure) = report.failure() {
            failure.kind.to_string()
        } else {
            let series = group_series(&report.records);
            let aggregate = report.records.iter().find_map(|r| match r {
                ResultRecord::Aggregate(s) => Some(s),
                _ => None,
            });
            match aggregate {
                Some(s) => format!("median {}", format_measure(report.kind, s.median)),
                None => format!("{} series", series.len()),
            }
        };

        out.push_str(&format!(
            "{:<width$}  {}  {}\n",
            report.name,
            status_label(report, 6),
            detail,
            width = name_width
        ));
    }

    out
}

pub fn format_json(reports: &[RunReport]) -> String {
    serde_json::to_string_pretty(reports).unwrap_or_else(|_| "[]".to_string())
}

/// `cmdbench list` output: fingerprint, name, kind and iteration count.
pub fn format_list(specs: &[BenchmarkSpec]) -> String {
    let name_width = specs.iter().map(|s| s.name().chars().count()).max().unwrap_or(0);
    let mut out = String::new();

    for spec in specs {
        let fp = spec.fingerprint();
        let kind = match spec.kind() {
            BenchmarkKind::Perf { prefix } => format!("perf ({})", prefix),
            other => other.name().to_string(),
        };
        out.push_str(&format!(
            "{}  {:<width$}  {} x{}\n",
            fingerprint::short(&fp, FINGERPRINT_WIDTH)
                .if_supports_color(Stream::Stdout, |s| s.dimmed()),
            spec.name(),
            kind,
            spec.repeat(),
            width = name_width
        ));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Failure, FailureKind};
    use chrono::{DateTime, Utc};
    use std::time::Duration;

    fn fixed_start() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-02-18T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn report(name: &str, kind: &'static str, records: Vec<ResultRecord>) -> RunReport {
        RunReport {
            name: name.to_string(),
            kind,
            fingerprint: "0123456789abcdef".repeat(4),
            started_at: fixed_start(),
            elapsed: Duration::from_millis(250),
            records,
        }
    }

    fn aggregate(min: f64, median: f64, max: f64) -> ResultRecord {
        ResultRecord::Aggregate(Summary {
            min,
            max,
            mean: median,
            median,
            std_dev: 0.0,
        })
    }

    // --- truncate_line ---

    #[test]
    fn truncate_short_line_unchanged() {
        assert_eq!(truncate_line("hello", 10), "hello");
    }

    #[test]
    fn truncate_at_word_boundary() {
        assert_eq!(
            truncate_line("the quick brown fox jumps", 15),
            "the quick..."
        );
    }

    #[test]
    fn truncate_without_spaces() {
        assert_eq!(truncate_line("abcdefghijkl", 8), "abcde...");
    }

    #[test]
    fn truncate_multibyte() {
        let s = "ééééééééééé";
        let t = truncate_line(s, 6);
        assert_eq!(t, "ééé...");
    }

    // --- number formatting ---

    #[test]
    fn seconds_pick_units() {
        assert_eq!(format_seconds(2.5), "2.500s");
        assert_eq!(format_seconds(0.0123), "12.300ms");
        assert_eq!(format_seconds(0.0000425), "42.500µs");
        assert_eq!(format_seconds(0.000000012), "12ns");
    }

    #[test]
    fn numbers_trim_zeros() {
        assert_eq!(format_number(123.0), "123");
        assert_eq!(format_number(42.5), "42.5");
        assert_eq!(format_number(0.33333333), "0.3333");
    }

    // --- formats ---

    #[test]
    fn default_lists_each_benchmark() {
        let reports = vec![
            report("fast", "timing", vec![aggregate(0.001, 0.002, 0.003)]),
            report(
                "broken",
                "timing",
                vec![ResultRecord::Failure(Failure::new(
                    FailureKind::NonZeroExit,
                    "iteration 1 of 3: `false` exited with status 1\n--- output ---\noops",
                ))],
            ),
        ];
        let out = format_default(&reports);
        assert!(out.contains("Benchmark results:"));
        assert!(out.contains("fast"));
        assert!(out.contains("median 2.000ms"));
        assert!(out.contains("0123456789ab"));
        assert!(out.contains("FAILED"));
        assert!(out.contains("non-zero exit: iteration 1 of 3"));
        assert!(out.contains("oops"));
        assert!(out.contains("1 passed, 1 failed"));
    }

    #[test]
    fn default_groups_series() {
        let series = |name: &str, value| ResultRecord::Series {
            series_name: name.to_string(),
            value,
        };
        let reports = vec![report(
            "perf",
            "perf",
            vec![
                series("branch-misses", 456.0),
                series("cache-misses", 123.0),
                series("branch-misses", 457.0),
                series("cache-misses", 124.0),
            ],
        )];
        let out = format_default(&reports);
        assert!(out.contains("cache-misses: 123, 124"));
        assert!(out.contains("branch-misses: 456, 457"));
    }

    #[test]
    fn pattern_values_have_no_unit() {
        let reports = vec![report("grep", "pattern", vec![aggregate(40.0, 42.5, 45.0)])];
        let out = format_default(&reports);
        assert!(out.contains("median 42.5 "));
    }

    #[test]
    fn short_is_one_line_each() {
        let reports = vec![
            report("a", "timing", vec![aggregate(1.0, 2.0, 3.0)]),
            report(
                "b",
                "timing",
                vec![ResultRecord::Failure(Failure::new(FailureKind::Timeout, "t"))],
            ),
        ];
        let out = format_short(&reports);
        assert_eq!(out.lines().count(), 2);
        assert!(out.contains("median 2.000s"));
        assert!(out.contains("timeout"));
        assert!(!out.contains("Benchmark results:"));
    }

    #[test]
    fn short_aligns_non_ascii_names() {
        let reports = vec![
            report("décodage", "timing", vec![aggregate(1.0, 2.0, 3.0)]),
            report("parse", "timing", vec![aggregate(1.0, 2.0, 3.0)]),
        ];
        let out = format_short(&reports);
        let columns: Vec<usize> = out
            .lines()
            .map(|l| l.chars().position(|c| c == 'k').unwrap())
            .collect();
        assert_eq!(columns, [11, 11]);
    }

    #[test]
    fn short_empty() {
        assert!(format_short(&[]).is_empty());
    }

    #[test]
    fn json_matches_record_schema() {
        let reports = vec![report("a", "timing", vec![aggregate(1.0, 2.0, 3.0)])];
        let parsed: serde_json::Value = serde_json::from_str(&format_json(&reports)).unwrap();
        let entry = &parsed.as_array().unwrap()[0];
        assert_eq!(entry["name"], "a");
        assert_eq!(entry["kind"], "timing");
        assert_eq!(entry["fingerprint"].as_str().unwrap().len(), 64);
        assert_eq!(entry["elapsed"], 0.25);
        assert!(entry["started_at"].as_str().unwrap().starts_with("2026-02-18"));
        assert_eq!(entry["records"][0]["succeeded"], true);
        assert_eq!(entry["records"][0]["timing_median"], 2.0);
    }

    #[test]
    fn list_shows_fingerprint_and_kind() {
        let specs = vec![
            BenchmarkSpec::timing("ls", "ls").build().unwrap(),
            BenchmarkSpec::perf("p", "perf stat -x,", "./app")
                .repeat(5)
                .build()
                .unwrap(),
        ];
        let out = format_list(&specs);
        let fp = specs[0].fingerprint();
        assert!(out.contains(&fp[..FINGERPRINT_WIDTH]));
        assert!(out.contains("timing x3"));
        assert!(out.contains("perf (perf stat -x,) x5"));
    }
}
