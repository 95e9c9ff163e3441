//! Parsing strategies for debugfs text files.
//!
//! Every strategy is a pure function from the file text to a list of
//! emissions. Scalar files are lenient (a bad value is logged and dropped);
//! the table strategies are strict and fail the whole file.

use crate::emit::{Emission, Labels};
use crate::error::TableError;
use regex::Regex;
use tracing::warn;

/// Fixed column widths of the `xmit` table.
pub const COLUMN_WIDTHS: [usize; 5] = [19, 11, 11, 10, 10];

/// Byte offsets inside a `rc_stats` data row.
const RATE_LABEL: (usize, usize) = (21, 27);
const RATE_BEST_A: usize = 14;
const RATE_SUCCESS: (usize, usize) = (100, 109);
const RATE_ATTEMPTS_START: usize = 112;
const RATE_HEADER_LINES: usize = 3;
const RATE_FOOTER_LINES: usize = 4;

/// Pattern of the `rc_stats` summary line.
pub const RATE_SUMMARY_PATTERN: &str = r"Total.*ideal (\d+).*lookaround (\d+)";

/// Parses an integer with an optional sign and radix prefix
/// (`0x`, `0o`, `0b`, or a bare leading `0` for octal).
pub fn parse_int_prefixed(s: &str) -> Option<i64> {
    let (negative, digits) = match s.as_bytes().first()? {
        b'-' => (true, &s[1..]),
        b'+' => (false, &s[1..]),
        _ => (false, s),
    };

    let lower = digits.get(..2).map(|p| p.to_ascii_lowercase());
    let (radix, body) = match lower.as_deref() {
        Some("0x") => (16, &digits[2..]),
        Some("0o") => (8, &digits[2..]),
        Some("0b") => (2, &digits[2..]),
        _ if digits.len() > 1 && digits.starts_with('0') => (8, &digits[1..]),
        _ => (10, digits),
    };

    let body: String = body.chars().filter(|&c| c != '_').collect();
    if body.is_empty() || body.starts_with(['+', '-']) {
        return None;
    }

    let magnitude = i128::from(u64::from_str_radix(&body, radix).ok()?);
    let value = if negative { -magnitude } else { magnitude };
    i64::try_from(value).ok()
}

/// Single value. `enable`/`disable` anywhere in the text map to 1/0,
/// anything else must be an integer.
pub fn parse_scalar(text: &str) -> Vec<Emission> {
    let text = text.to_lowercase();

    if text.contains("enable") {
        return vec![Emission::plain("", 1.0)];
    }
    if text.contains("disable") {
        return vec![Emission::plain("", 0.0)];
    }

    match parse_int_prefixed(text.trim()) {
        Some(v) => vec![Emission::plain("", v as f64)],
        None => {
            warn!(text = %text.trim(), "scalar value is not an integer, skipping");
            Vec::new()
        }
    }
}

/// One flag per non-empty line, each present with value 1.
pub fn parse_flag_list(text: &str) -> Vec<Emission> {
    text.split('\n')
        .filter(|l| !l.is_empty())
        .map(|l| Emission::plain(l, 1.0))
        .collect()
}

fn table_key(raw: &str) -> String {
    raw.trim().replace(' ', "_")
}

fn parse_table_int(line: &str, value: &str) -> Result<i64, TableError> {
    value
        .trim()
        .parse::<i64>()
        .map_err(|_| TableError::InvalidInteger {
            line: line.to_string(),
            value: value.trim().to_string(),
        })
}

fn slice<'a>(line: &'a str, start: usize, end: usize) -> Result<&'a str, TableError> {
    line.get(start..end).ok_or_else(|| TableError::ShortLine {
        line: line.to_string(),
        start,
        end,
    })
}

/// `key: value` rows. An empty value marks a section header.
pub fn parse_row_table(text: &str) -> Result<Vec<Emission>, TableError> {
    let mut out = Vec::new();
    for line in text.split('\n') {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = table_key(key);
        match value.trim() {
            "ENABLED" => out.push(Emission::plain(key, 1.0)),
            "DISABLED" => out.push(Emission::plain(key, 0.0)),
            "" => {}
            _ => {
                let v = parse_table_int(line, value)?;
                out.push(Emission::plain(key, v as f64));
            }
        }
    }
    Ok(out)
}

/// Fixed-width table: a header naming the columns, then `key: v1 v2 v3 v4`
/// rows. Each value is emitted with a `col` label taken from the header.
pub fn parse_column_table(text: &str) -> Result<Vec<Emission>, TableError> {
    let mut lines = text.split('\n');
    let header = lines.next().filter(|h| !h.is_empty()).ok_or(TableError::MissingHeader)?;

    let mut columns = Vec::with_capacity(COLUMN_WIDTHS.len());
    let mut start = 0;
    for width in COLUMN_WIDTHS {
        columns.push((start, start + width, slice(header, start, start + width)?.trim()));
        start += width;
    }

    let mut out = Vec::new();
    for line in lines.filter(|l| !l.is_empty()) {
        let key = table_key(line.split_once(':').map_or(line, |(k, _)| k));
        for &(start, end, name) in &columns[1..] {
            let value = parse_table_int(line, slice(line, start, end)?)?;
            let mut labels = Labels::new();
            labels.insert("col".to_string(), name.to_string());
            out.push(Emission::new(key.clone(), labels, value as f64));
        }
    }
    Ok(out)
}

/// Minstrel `rc_stats`: three header lines, one row per rate, and a footer
/// whose summary line carries the ideal and lookaround counts.
pub fn parse_rate_table(text: &str, summary: &Regex) -> Result<Vec<Emission>, TableError> {
    let lines: Vec<&str> = text.split('\n').collect();
    let mut out = Vec::new();

    if lines.len() > RATE_HEADER_LINES + RATE_FOOTER_LINES {
        for &line in &lines[RATE_HEADER_LINES..lines.len() - RATE_FOOTER_LINES] {
            let rate = slice(line, RATE_LABEL.0, RATE_LABEL.1)?.trim();
            let mut labels = Labels::new();
            labels.insert("rate".to_string(), rate.to_string());

            if line.as_bytes().get(RATE_BEST_A) == Some(&b'A') {
                out.push(Emission::new("best_A", labels.clone(), 1.0));
            }

            let success = parse_table_int(line, slice(line, RATE_SUCCESS.0, RATE_SUCCESS.1)?)?;
            out.push(Emission::new("rate_success", labels.clone(), success as f64));

            let attempts = parse_table_int(line, slice(line, RATE_ATTEMPTS_START, line.len())?)?;
            out.push(Emission::new("rate_attempts", labels, attempts as f64));
        }
    }

    let tail = &lines[lines.len().saturating_sub(RATE_FOOTER_LINES)..];
    for &line in tail {
        if let Some(caps) = summary.captures(line) {
            let ideal = parse_table_int(line, &caps[1])?;
            let lookaround = parse_table_int(line, &caps[2])?;
            out.push(Emission::plain("ideal", ideal as f64));
            out.push(Emission::plain("lookaround", lookaround as f64));
            return Ok(out);
        }
    }

    Err(TableError::MissingSummary {
        tail: tail.iter().map(|l| l.to_string()).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary_re() -> Regex {
        Regex::new(RATE_SUMMARY_PATTERN).unwrap()
    }

    fn find<'a>(out: &'a [Emission], key: &str) -> Vec<&'a Emission> {
        out.iter().filter(|e| e.key == key).collect()
    }

    #[test]
    fn test_parse_int_prefixed() {
        assert_eq!(parse_int_prefixed("42"), Some(42));
        assert_eq!(parse_int_prefixed("-7"), Some(-7));
        assert_eq!(parse_int_prefixed("0x1f"), Some(31));
        assert_eq!(parse_int_prefixed("0X1F"), Some(31));
        assert_eq!(parse_int_prefixed("010"), Some(8));
        assert_eq!(parse_int_prefixed("0b101"), Some(5));
        assert_eq!(parse_int_prefixed("0o17"), Some(15));
        assert_eq!(parse_int_prefixed("0"), Some(0));
        assert_eq!(parse_int_prefixed("1_000"), Some(1000));
        assert_eq!(parse_int_prefixed("-9223372036854775808"), Some(i64::MIN));
        assert_eq!(parse_int_prefixed("9223372036854775808"), None);
        assert_eq!(parse_int_prefixed(""), None);
        assert_eq!(parse_int_prefixed("0x"), None);
        assert_eq!(parse_int_prefixed("--1"), None);
        assert_eq!(parse_int_prefixed("12 34"), None);
    }

    #[test]
    fn test_scalar_integer() {
        assert_eq!(parse_scalar("0x0000000f\n"), vec![Emission::plain("", 15.0)]);
        assert_eq!(parse_scalar("  20\n"), vec![Emission::plain("", 20.0)]);
    }

    #[test]
    fn test_scalar_enable_disable() {
        assert_eq!(parse_scalar("Spectral scan: Enabled\n"), vec![Emission::plain("", 1.0)]);
        assert_eq!(parse_scalar("TPC: DISABLE\n"), vec![Emission::plain("", 0.0)]);
    }

    #[test]
    fn test_scalar_garbage_is_dropped() {
        assert!(parse_scalar("background\n").is_empty());
        assert!(parse_scalar("").is_empty());
    }

    #[test]
    fn test_flag_list() {
        let out = parse_flag_list("AUTH\nASSOC\n\nAUTHORIZED\n");
        let keys: Vec<_> = out.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["AUTH", "ASSOC", "AUTHORIZED"]);
        assert!(out.iter().all(|e| e.value == 1.0 && e.labels.is_empty()));
    }

    #[test]
    fn test_row_table() {
        let out = parse_row_table("KEY: 5\nFOO: ENABLED\nBAR:\n").unwrap();
        assert_eq!(
            out,
            vec![Emission::plain("KEY", 5.0), Emission::plain("FOO", 1.0)]
        );
    }

    #[test]
    fn test_row_table_keys_and_disabled() {
        let out = parse_row_table(
            "SYNC_CAUSE stats:\n  RX OK : 12\n  ANI: DISABLED\nno colon line\n",
        )
        .unwrap();
        assert_eq!(
            out,
            vec![Emission::plain("RX_OK", 12.0), Emission::plain("ANI", 0.0)]
        );
    }

    #[test]
    fn test_row_table_bad_integer_is_error() {
        let err = parse_row_table("A: 1\nB: many\n").unwrap_err();
        assert_eq!(
            err,
            TableError::InvalidInteger {
                line: "B: many".into(),
                value: "many".into()
            }
        );
    }

    fn xmit_fixture() -> String {
        let header = format!("{:<19}{:>11}{:>11}{:>10}{:>10}", "", "BE", "BK", "VI", "VO");
        let row = format!("{:<19}{:>11}{:>11}{:>10}{:>10}", "MPDUs Queued:", 1, 22, 333, 4444);
        format!("{}\n{}\n\n", header, row)
    }

    #[test]
    fn test_column_table() {
        let out = parse_column_table(&xmit_fixture()).unwrap();
        assert_eq!(out.len(), 4);
        let cols: Vec<_> = out.iter().map(|e| e.labels["col"].as_str()).collect();
        assert_eq!(cols, vec!["BE", "BK", "VI", "VO"]);
        let values: Vec<_> = out.iter().map(|e| e.value).collect();
        assert_eq!(values, vec![1.0, 22.0, 333.0, 4444.0]);
        assert!(out.iter().all(|e| e.key == "MPDUs_Queued"));
    }

    #[test]
    fn test_column_table_short_row_is_error() {
        let header = format!("{:<19}{:>11}{:>11}{:>10}{:>10}", "", "BE", "BK", "VI", "VO");
        let text = format!("{}\nshort: 1\n", header);
        assert!(matches!(
            parse_column_table(&text),
            Err(TableError::ShortLine { .. })
        ));
    }

    #[test]
    fn test_column_table_bad_value_is_error() {
        let header = format!("{:<19}{:>11}{:>11}{:>10}{:>10}", "", "BE", "BK", "VI", "VO");
        let row = format!("{:<19}{:>11}{:>11}{:>10}{:>10}", "x:", 1, "n/a", 3, 4);
        let err = parse_column_table(&format!("{}\n{}\n", header, row)).unwrap_err();
        assert!(matches!(err, TableError::InvalidInteger { value, .. } if value == "n/a"));
    }

    fn rate_row(best: char, rate: &str, success: u64, attempts: u64) -> String {
        let mut row = vec![b' '; 112];
        row[RATE_BEST_A] = best as u8;
        let label = format!("{:<6}", rate);
        row[21..27].copy_from_slice(label.as_bytes());
        let s = format!("{:>9}", success);
        row[100..109].copy_from_slice(s.as_bytes());
        let mut line = String::from_utf8(row).unwrap();
        line.push_str(&attempts.to_string());
        line
    }

    fn rc_stats_fixture() -> String {
        let mut lines = vec![
            "              best   ____________rate__________    ________statistics________".to_string(),
            "mode guard #  rate  [name   idx airtime  max_tp]  [avg(tp) avg(prob) sd(prob)]".to_string(),
            String::new(),
        ];
        lines.push(rate_row('A', "MCS0", 10, 12));
        lines.push(rate_row(' ', "MCS7", 200, 250));
        lines.push(String::new());
        lines.push("Total packet count::    ideal 3470      lookaround 185".to_string());
        lines.push("Average # of aggregated frames per A-MPDU: 1.0".to_string());
        lines.push(String::new());
        lines.join("\n")
    }

    #[test]
    fn test_rate_table() {
        let out = parse_rate_table(&rc_stats_fixture(), &summary_re()).unwrap();

        let best = find(&out, "best_A");
        assert_eq!(best.len(), 1);
        assert_eq!(best[0].labels["rate"], "MCS0");

        let success = find(&out, "rate_success");
        assert_eq!(success.len(), 2);
        assert_eq!(success[1].labels["rate"], "MCS7");
        assert_eq!(success[1].value, 200.0);

        let attempts = find(&out, "rate_attempts");
        assert_eq!(attempts[0].value, 12.0);
        assert_eq!(attempts[1].value, 250.0);

        assert_eq!(find(&out, "ideal")[0].value, 3470.0);
        assert_eq!(find(&out, "lookaround")[0].value, 185.0);
        assert!(find(&out, "ideal")[0].labels.is_empty());
    }

    #[test]
    fn test_rate_table_missing_summary_is_error() {
        let text = rc_stats_fixture().replace("Total", "Sum");
        assert!(matches!(
            parse_rate_table(&text, &summary_re()),
            Err(TableError::MissingSummary { .. })
        ));
    }

    #[test]
    fn test_rate_table_summary_only() {
        let out = parse_rate_table("Total: ideal 1 lookaround 2\n", &summary_re()).unwrap();
        assert_eq!(
            out,
            vec![Emission::plain("ideal", 1.0), Emission::plain("lookaround", 2.0)]
        );
    }
}
