//! Shared output parsing for the agent CLIs.
//!
//! Agents report review results in whatever shape their CLI happens to print:
//! a single JSON document, fenced ```json blocks inside prose, an NDJSON
//! event stream, or free text. The extractors here try those shapes in order
//! and degrade to zero findings with a diagnostic rather than failing.

use crate::adapter::RawFinding;
use mco_core::model::Severity;
use serde_json::Value;

const MAX_TITLE_LEN: usize = 200;

/// Recover findings from a blob of provider output.
pub fn findings_from_text(text: &str) -> (Vec<RawFinding>, Option<String>) {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return (vec![], Some("empty output".to_string()));
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        let findings = findings_from_value(&value);
        if !findings.is_empty() {
            return (findings, None);
        }
    }

    let mut findings = Vec::new();
    for block in fenced_json_blocks(text) {
        if let Ok(value) = serde_json::from_str::<Value>(&block) {
            findings.extend(findings_from_value(&value));
        }
    }
    if !findings.is_empty() {
        return (findings, None);
    }

    let findings = heuristic_findings(text);
    if findings.is_empty() {
        (vec![], Some("no findings recovered from output".to_string()))
    } else {
        (findings, Some("heuristic extraction".to_string()))
    }
}

/// Findings from a parsed JSON document: either `{"findings": [...]}` or a
/// bare array of finding objects.
pub fn findings_from_value(value: &Value) -> Vec<RawFinding> {
    let items = match value {
        Value::Object(map) => match map.get("findings").and_then(Value::as_array) {
            Some(arr) => arr.as_slice(),
            None => return vec![],
        },
        Value::Array(arr) => arr.as_slice(),
        _ => return vec![],
    };
    items.iter().filter_map(finding_from_value).collect()
}

fn finding_from_value(value: &Value) -> Option<RawFinding> {
    let obj = value.as_object()?;
    let title = obj
        .get("title")
        .or_else(|| obj.get("summary"))
        .or_else(|| obj.get("message"))
        .and_then(Value::as_str)?
        .trim();
    if title.is_empty() {
        return None;
    }

    let severity = obj
        .get("severity")
        .and_then(Value::as_str)
        .and_then(Severity::parse)
        .unwrap_or(Severity::Info);
    let category = obj
        .get("category")
        .and_then(Value::as_str)
        .unwrap_or("general")
        .to_string();
    let recommendation = obj
        .get("recommendation")
        .or_else(|| obj.get("fix"))
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let confidence = obj
        .get("confidence")
        .and_then(Value::as_f64)
        .filter(|c| c.is_finite());
    let fingerprint = obj
        .get("fingerprint")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    Some(RawFinding {
        severity,
        category,
        title: truncate_title(title),
        evidence: evidence_text(obj.get("evidence")),
        recommendation,
        confidence,
        fingerprint,
    })
}

/// Evidence may be free text or a `{file, line, snippet}` object.
fn evidence_text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Object(obj)) => {
            let file = obj.get("file").and_then(Value::as_str).unwrap_or("");
            let line = obj.get("line").and_then(Value::as_u64);
            let snippet = obj.get("snippet").and_then(Value::as_str).unwrap_or("");
            let mut out = match (file.is_empty(), line) {
                (false, Some(line)) => format!("{file}:{line}"),
                (false, None) => file.to_string(),
                (true, _) => String::new(),
            };
            if !snippet.is_empty() {
                if !out.is_empty() {
                    out.push(' ');
                }
                out.push_str(snippet);
            }
            out
        }
        _ => String::new(),
    }
}

fn truncate_title(title: &str) -> String {
    if title.chars().count() <= MAX_TITLE_LEN {
        title.to_string()
    } else {
        title.chars().take(MAX_TITLE_LEN).collect()
    }
}

/// Contents of every ```json fenced block in the text.
pub fn fenced_json_blocks(text: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find("```json") {
        let after = &rest[start + "```json".len()..];
        match after.find("```") {
            Some(end) => {
                blocks.push(after[..end].trim().to_string());
                rest = &after[end + 3..];
            }
            None => break,
        }
    }
    blocks
}

/// Parse NDJSON: one JSON value per non-empty line, unparseable lines skipped.
pub fn ndjson_values(text: &str) -> Vec<Value> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| serde_json::from_str::<Value>(line).ok())
        .collect()
}

/// Last-resort extraction: lines shaped like `- [high] title` or
/// `critical: title`.
fn heuristic_findings(text: &str) -> Vec<RawFinding> {
    let mut out = Vec::new();
    for line in text.lines() {
        let stripped = line.trim_start_matches(['-', '*', ' ', '\t']);
        let lowered = stripped.to_lowercase();
        for severity in [
            Severity::Critical,
            Severity::High,
            Severity::Medium,
            Severity::Low,
            Severity::Info,
        ] {
            let word = severity.as_str();
            let matched = [format!("[{word}]"), format!("{word}:")]
                .iter()
                .find_map(|prefix| {
                    if lowered.starts_with(prefix.as_str()) {
                        stripped.get(prefix.len()..).map(str::trim)
                    } else {
                        None
                    }
                });
            if let Some(title) = matched {
                if !title.is_empty() {
                    out.push(RawFinding {
                        severity,
                        category: "general".to_string(),
                        title: truncate_title(title),
                        evidence: String::new(),
                        recommendation: String::new(),
                        confidence: None,
                        fingerprint: String::new(),
                    });
                }
                break;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_findings_document() {
        let text = r#"{"findings":[{"severity":"high","category":"security","title":"Leaked key","evidence":"src/lib.rs:10","recommendation":"rotate it","confidence":0.85,"fingerprint":"fp-leaked-key"}]}"#;
        let (findings, diag) = findings_from_text(text);
        assert!(diag.is_none());
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::High);
        assert_eq!(findings[0].evidence, "src/lib.rs:10");
        assert_eq!(findings[0].confidence, Some(0.85));
        assert_eq!(findings[0].fingerprint, "fp-leaked-key");
    }

    #[test]
    fn confidence_and_fingerprint_default_when_absent() {
        let text = r#"{"findings":[{"severity":"low","title":"nit"}]}"#;
        let (findings, _) = findings_from_text(text);
        assert_eq!(findings[0].confidence, None);
        assert!(findings[0].fingerprint.is_empty());
    }

    #[test]
    fn parses_fenced_block_inside_prose() {
        let text = "Here is my review:\n```json\n[{\"severity\":\"low\",\"title\":\"nit\"}]\n```\nDone.";
        let (findings, diag) = findings_from_text(text);
        assert!(diag.is_none());
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].title, "nit");
    }

    #[test]
    fn structured_evidence_is_flattened() {
        let text = r#"{"findings":[{"severity":"medium","title":"t","evidence":{"file":"a.rs","line":3,"snippet":"let x"}}]}"#;
        let (findings, _) = findings_from_text(text);
        assert_eq!(findings[0].evidence, "a.rs:3 let x");
    }

    #[test]
    fn heuristic_lines_are_recovered_with_diagnostic() {
        let text = "- [high] SQL injection in query builder\nlow: unused import\n";
        let (findings, diag) = findings_from_text(text);
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].severity, Severity::High);
        assert_eq!(findings[1].severity, Severity::Low);
        assert_eq!(diag.as_deref(), Some("heuristic extraction"));
    }

    #[test]
    fn garbage_yields_zero_findings_and_a_diagnostic() {
        let (findings, diag) = findings_from_text("the model had nothing to say");
        assert!(findings.is_empty());
        assert!(diag.is_some());
    }

    #[test]
    fn long_titles_are_truncated() {
        let long = "x".repeat(500);
        let text = format!(r#"{{"findings":[{{"severity":"low","title":"{long}"}}]}}"#);
        let (findings, _) = findings_from_text(&text);
        assert_eq!(findings[0].title.len(), 200);
    }

    #[test]
    fn ndjson_skips_bad_lines() {
        let values = ndjson_values("{\"a\":1}\nnot json\n{\"b\":2}\n");
        assert_eq!(values.len(), 2);
    }
}
