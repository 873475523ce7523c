//! Artifact tree writer.
//!
//! Every file is written atomically (write to a temp sibling, then rename) so
//! a concurrent reader never observes a partial document.

use crate::runner::RunOutcome;
use anyhow::{Context, Result};
use mco_core::ids;
use mco_core::model::{Finding, Mode, RunResult, Severity};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

const SEVERITY_ORDER: &[Severity] = &[
    Severity::Critical,
    Severity::High,
    Severity::Medium,
    Severity::Low,
    Severity::Info,
];

/// One task's artifact subtree: `<artifact_base>/<task_id>/`.
pub struct ArtifactLayout {
    root: PathBuf,
}

impl ArtifactLayout {
    /// Create the subtree for a fresh task id, including the `providers/` and
    /// `raw/` directories runners stream into.
    pub fn create(base: &Path, task_id: &str) -> Result<Self> {
        let root = base.join(task_id);
        std::fs::create_dir_all(root.join("providers"))
            .with_context(|| format!("create {}", root.join("providers").display()))?;
        std::fs::create_dir_all(root.join("raw"))
            .with_context(|| format!("create {}", root.join("raw").display()))?;
        Ok(Self { root })
    }

    /// Mint a task id that is unused under `base` and create its subtree.
    pub fn create_unique(base: &Path) -> Result<(String, Self)> {
        loop {
            let task_id = ids::new_task_id();
            if base.join(&task_id).exists() {
                continue;
            }
            return Ok((task_id.clone(), Self::create(base, &task_id)?));
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn raw_dir(&self) -> PathBuf {
        self.root.join("raw")
    }
}

/// Atomic single-file write: temp sibling + rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("artifact");
    let tmp = path.with_file_name(format!(".{file_name}.tmp"));
    std::fs::write(&tmp, bytes).with_context(|| format!("write {}", tmp.display()))?;
    std::fs::rename(&tmp, path).with_context(|| format!("rename into {}", path.display()))?;
    Ok(())
}

/// Flush one runner's captured streams to `raw/<id>.stdout` / `raw/<id>.stderr`.
pub fn write_raw_streams(raw_dir: &Path, provider_id: &str, outcome: &RunOutcome) -> Result<()> {
    write_atomic(
        &raw_dir.join(format!("{provider_id}.stdout")),
        outcome.stdout_text.as_bytes(),
    )?;
    write_atomic(
        &raw_dir.join(format!("{provider_id}.stderr")),
        outcome.stderr_text.as_bytes(),
    )?;
    Ok(())
}

/// Write the full result tree for a finished run.
pub fn write_run(layout: &ArtifactLayout, run: &RunResult) -> Result<()> {
    let root = layout.root();

    write_atomic(
        &root.join("run.json"),
        serde_json::to_vec_pretty(run)?.as_slice(),
    )?;
    write_atomic(
        &root.join("decision.md"),
        format!("{}\n", run.decision.as_str()).as_bytes(),
    )?;
    write_atomic(&root.join("summary.md"), render_summary(run).as_bytes())?;

    for result in run.provider_results.values() {
        write_atomic(
            &root.join("providers").join(format!("{}.json", result.provider_id)),
            serde_json::to_vec_pretty(result)?.as_slice(),
        )?;
    }

    if run.mode == Mode::Review {
        write_atomic(
            &root.join("findings.json"),
            serde_json::to_vec_pretty(&json!({ "findings": run.findings }))?.as_slice(),
        )?;
        write_atomic(
            &root.join("findings.sarif"),
            serde_json::to_vec_pretty(&render_sarif(run))?.as_slice(),
        )?;
    }

    Ok(())
}

fn escape_cell(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('|', "\\|")
        .replace('\n', "<br>")
}

/// Human-readable run summary: decision, per-provider states, severity
/// breakdown, and the findings table.
pub fn render_summary(run: &RunResult) -> String {
    let mode_word = match run.mode {
        Mode::Review => "Review",
        Mode::Run => "Run",
    };
    let ordered = run.results_in_order();
    let success = ordered
        .iter()
        .filter(|r| r.run_state == mco_core::model::RunState::ExitedOk)
        .count();

    let mut lines: Vec<String> = vec![
        format!("## MCO {mode_word} Summary"),
        String::new(),
        format!("- Task: `{}`", run.task_id),
        format!("- Decision: **{}**", run.decision.as_str()),
        format!(
            "- Providers: success `{}` / failure `{}`",
            success,
            ordered.len() - success
        ),
        format!("- Findings: `{}`", run.findings.len()),
        String::new(),
        "### Providers".to_string(),
        String::new(),
        "| Provider | State | Error | Attempts | Duration (s) |".to_string(),
        "|---|---|---|---:|---:|".to_string(),
    ];

    for result in &ordered {
        let error = result
            .error_kind
            .map(|k| format!("`{}`", k.as_str()))
            .unwrap_or_else(|| "-".to_string());
        let duration = result
            .duration_seconds
            .map(|d| d.to_string())
            .unwrap_or_else(|| "-".to_string());
        lines.push(format!(
            "| `{}` | `{}` | {} | {} | {} |",
            result.provider_id,
            result.run_state.as_str(),
            error,
            result.attempts,
            duration
        ));
    }

    if run.mode == Mode::Run {
        lines.push(String::new());
        return lines.join("\n") + "\n";
    }

    lines.push(String::new());
    lines.push("### Severity Breakdown".to_string());
    lines.push(String::new());
    lines.push("| Severity | Count |".to_string());
    lines.push("|---|---:|".to_string());
    for severity in SEVERITY_ORDER {
        let count = run.findings.iter().filter(|f| f.severity == *severity).count();
        lines.push(format!("| `{}` | {} |", severity.as_str(), count));
    }

    lines.push(String::new());
    lines.push("### Findings".to_string());
    lines.push(String::new());
    if run.findings.is_empty() {
        lines.push("_No findings reported._".to_string());
        lines.push(String::new());
        return lines.join("\n");
    }

    lines.push(
        "| Severity | Category | Title | Evidence | Confidence | Providers | Recommendation |"
            .to_string(),
    );
    lines.push("|---|---|---|---|---:|---|---|".to_string());
    let mut sorted: Vec<&Finding> = run.findings.iter().collect();
    sorted.sort_by_key(|f| (f.severity, f.title.clone()));
    for finding in sorted {
        let confidence = finding
            .confidence
            .map(|c| format!("{c:.2}"))
            .unwrap_or_else(|| "-".to_string());
        lines.push(format!(
            "| `{}` | {} | {} | `{}` | {} | `{}` | {} |",
            finding.severity.as_str(),
            escape_cell(&finding.category),
            escape_cell(&finding.title),
            escape_cell(&finding.evidence),
            confidence,
            finding.detected_by.join(", "),
            escape_cell(&finding.recommendation),
        ));
    }
    lines.push(String::new());
    lines.join("\n")
}

fn slugify(category: &str, title: &str) -> String {
    let mut slug = String::new();
    for c in format!("{category}-{title}").to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_matches('-').to_string();
    if slug.is_empty() {
        "finding".to_string()
    } else {
        slug
    }
}

fn rule_id(finding: &Finding) -> String {
    let category = if finding.category.is_empty() {
        "general"
    } else {
        finding.category.as_str()
    };
    let mut hasher = Sha256::new();
    hasher.update(category.as_bytes());
    hasher.update(b"||");
    hasher.update(finding.title.as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().take(5).map(|b| format!("{b:02x}")).collect();
    format!("mco/{}/{}", slugify(category, &finding.title), hex)
}

fn sarif_level(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "error",
        Severity::High => "warning",
        Severity::Medium | Severity::Low | Severity::Info => "note",
    }
}

/// Parse a `path:line` prefix out of free-text evidence.
fn evidence_location(evidence: &str) -> Option<(String, u64)> {
    let token = evidence.split_whitespace().next()?;
    let (file, line) = token.rsplit_once(':')?;
    let line: u64 = line.trim_end_matches(|c: char| !c.is_ascii_digit()).parse().ok()?;
    if file.is_empty() {
        return None;
    }
    Some((file.to_string(), line))
}

/// SARIF 2.1.0 rendering of the aggregated findings.
pub fn render_sarif(run: &RunResult) -> Value {
    let mut rules: Vec<Value> = Vec::new();
    let mut seen_rules: Vec<String> = Vec::new();
    let mut results: Vec<Value> = Vec::new();

    for finding in &run.findings {
        let id = rule_id(finding);
        if !seen_rules.contains(&id) {
            seen_rules.push(id.clone());
            let mut rule = json!({
                "id": id,
                "name": slugify(&finding.category, &finding.title),
                "shortDescription": { "text": finding.title },
                "properties": { "category": finding.category },
            });
            if !finding.recommendation.is_empty() {
                rule["help"] = json!({ "text": finding.recommendation });
            }
            rules.push(rule);
        }

        let mut result = json!({
            "ruleId": id,
            "level": sarif_level(finding.severity),
            "message": { "text": finding.title },
            "properties": {
                "severity": finding.severity.as_str(),
                "category": finding.category,
                "confidence": finding.confidence.unwrap_or(0.0),
                "fingerprint": finding.fingerprint,
                "detected_by": finding.detected_by,
            },
        });
        if let Some((file, line)) = evidence_location(&finding.evidence) {
            result["locations"] = json!([{
                "physicalLocation": {
                    "artifactLocation": { "uri": file },
                    "region": { "startLine": line },
                }
            }]);
        }
        results.push(result);
    }

    json!({
        "$schema": "https://json.schemastore.org/sarif-2.1.0.json",
        "version": "2.1.0",
        "runs": [{
            "tool": {
                "driver": {
                    "name": "MCO",
                    "rules": rules,
                }
            },
            "properties": {
                "decision": run.decision.as_str(),
                "findings_count": run.findings.len(),
            },
            "results": results,
        }]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn atomic_write_leaves_no_temp_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("doc.json");
        write_atomic(&path, b"{\"ok\":true}").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"{\"ok\":true}");
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn layout_creates_provider_and_raw_dirs() {
        let dir = tempdir().unwrap();
        let layout = ArtifactLayout::create(dir.path(), "20260802-000000-aaaa0000").unwrap();
        assert!(layout.root().join("providers").is_dir());
        assert!(layout.raw_dir().is_dir());
    }

    #[test]
    fn unique_layout_avoids_collisions() {
        let dir = tempdir().unwrap();
        let (a, _) = ArtifactLayout::create_unique(dir.path()).unwrap();
        let (b, _) = ArtifactLayout::create_unique(dir.path()).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn evidence_location_parses_file_line() {
        assert_eq!(
            evidence_location("src/lib.rs:42 let x = 1;"),
            Some(("src/lib.rs".to_string(), 42))
        );
        assert_eq!(evidence_location("no location here"), None);
        assert_eq!(evidence_location(""), None);
    }

    #[test]
    fn rule_ids_are_stable() {
        let finding = Finding {
            provider_id: "claude".into(),
            ordinal: 0,
            severity: Severity::High,
            category: "security".into(),
            title: "Leaked key".into(),
            evidence: String::new(),
            recommendation: String::new(),
            confidence: Some(0.9),
            fingerprint: "fp-leaked-key".into(),
            detected_by: vec!["claude".into()],
        };
        assert_eq!(rule_id(&finding), rule_id(&finding));
        assert!(rule_id(&finding).starts_with("mco/security-leaked-key/"));
    }
}
