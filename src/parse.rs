use std::collections::BTreeMap;

use regex::Regex;

/// Bytes of captured output kept in a failure diagnostic.
pub const MAX_TAIL_BYTES: usize = 4096;

/// Text of the first capture group of the first match of `pattern`.
pub fn extract_capture<'a>(pattern: &Regex, output: &'a str) -> Option<&'a str> {
    pattern
        .captures(output)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Parses a measurement the way a user would write it: surrounding
/// whitespace is ignored, `1e3` and `42.5` are accepted.
pub fn parse_number(text: &str) -> Option<f64> {
    text.trim().parse::<f64>().ok()
}

/// Parses profiler output of the form `value,series[,ignored...]`, one
/// record per line.
///
/// Lines with fewer than two fields, a non-numeric value or an empty series
/// name are skipped. A series seen twice keeps its last value.
pub fn parse_series(output: &str) -> BTreeMap<String, f64> {
    let mut series = BTreeMap::new();

    for line in output.lines() {
        let mut fields = line.split(',');
        let (Some(value), Some(key)) = (fields.next(), fields.next()) else {
            continue;
        };

        let key = key.trim();
        if key.is_empty() {
            continue;
        }

        let Some(value) = parse_number(value) else {
            continue;
        };

        series.insert(key.to_string(), value);
    }

    series
}

/// Last [`MAX_TAIL_BYTES`] of `output`, starting on a char boundary.
pub fn output_tail(output: &str) -> &str {
    if output.len() <= MAX_TAIL_BYTES {
        return output;
    }
    let mut start = output.len() - MAX_TAIL_BYTES;
    while !output.is_char_boundary(start) {
        start += 1;
    }
    &output[start..]
}
