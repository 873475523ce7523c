//! Turns raw runner outcomes and adapter parses into the uniform
//! `ProviderResult` / `RunResult` documents.

use crate::runner::RunOutcome;
use mco_adapters::ParsedOutput;
use mco_core::classify;
use mco_core::decision::decide;
use mco_core::model::{
    ErrorKind, Finding, Mode, ProviderResult, RunResult, RunState, Task,
};
use mco_core::time::{iso_from_ms, whole_seconds_between, EpochMs};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Finding identity when the adapter did not supply a fingerprint: a short
/// hash of category and title, matching the SARIF rule-id derivation.
fn derived_fingerprint(category: &str, title: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(category.as_bytes());
    hasher.update(b"||");
    hasher.update(title.as_bytes());
    hasher.finalize().iter().take(8).map(|b| format!("{b:02x}")).collect()
}

/// Materialize the result of one supervised provider attempt.
pub fn provider_result(
    provider_id: &str,
    outcome: &RunOutcome,
    parsed: ParsedOutput,
    mode: Mode,
    attempts: u32,
    retry_delays_seconds: Vec<f64>,
    auth_ok: bool,
) -> ProviderResult {
    // Findings survive a non-zero exit when the parser recovered them, but a
    // cancelled or unspawned provider reports none.
    let parse_usable = !parsed.findings.is_empty()
        || parsed.payload.as_deref().map_or(false, |p| !p.trim().is_empty());
    let keep_findings = matches!(outcome.state, RunState::ExitedOk | RunState::ExitedErr);

    let findings: Vec<Finding> = if keep_findings {
        parsed
            .findings
            .iter()
            .enumerate()
            .map(|(i, raw)| Finding {
                provider_id: provider_id.to_string(),
                ordinal: i as u32,
                severity: raw.severity,
                category: raw.category.clone(),
                title: raw.title.clone(),
                evidence: raw.evidence.clone(),
                recommendation: raw.recommendation.clone(),
                confidence: raw.confidence,
                fingerprint: if raw.fingerprint.is_empty() {
                    derived_fingerprint(&raw.category, &raw.title)
                } else {
                    raw.fingerprint.clone()
                },
                detected_by: vec![provider_id.to_string()],
            })
            .collect()
    } else {
        vec![]
    };

    let error_kind = match outcome.state {
        RunState::CancelledStall => Some(ErrorKind::CancelledStall),
        RunState::CancelledHard => Some(ErrorKind::CancelledHard),
        RunState::CancelledExternal => Some(ErrorKind::CancelledExternal),
        RunState::SpawnFailed => Some(ErrorKind::SpawnFailed),
        RunState::ExitedErr if !parse_usable => Some(ErrorKind::ExitNonzero),
        RunState::ExitedOk if mode == Mode::Review && findings.is_empty() => {
            Some(ErrorKind::ParseEmpty)
        }
        _ => None,
    };

    let error_detail = outcome.error_detail.clone().or_else(|| {
        if error_kind.is_some() {
            parsed.diagnostic.clone()
        } else {
            None
        }
    });

    let payload = match mode {
        Mode::Run => parsed
            .payload
            .clone()
            .filter(|p| !p.trim().is_empty())
            .or_else(|| {
                let raw = outcome.stdout_text.trim();
                (!raw.is_empty()).then(|| raw.to_string())
            }),
        Mode::Review => None,
    };

    ProviderResult {
        provider_id: provider_id.to_string(),
        run_state: outcome.state,
        started_at: Some(iso_from_ms(outcome.started_at_ms)),
        ended_at: Some(iso_from_ms(outcome.ended_at_ms)),
        duration_seconds: Some(whole_seconds_between(
            outcome.started_at_ms,
            outcome.ended_at_ms,
        )),
        exit_code: outcome.exit_code,
        stdout_bytes: outcome.stdout_bytes,
        stderr_bytes: outcome.stderr_bytes,
        findings,
        payload,
        error_kind,
        error_detail,
        warnings: classify::stderr_warnings(&outcome.stderr_text),
        attempts,
        retry_delays_seconds,
        auth_ok,
    }
}

/// Result for a provider whose binary was never found.
pub fn skipped_result(provider_id: &str, diagnostic: &str) -> ProviderResult {
    ProviderResult {
        provider_id: provider_id.to_string(),
        run_state: RunState::SkippedUndetected,
        started_at: None,
        ended_at: None,
        duration_seconds: None,
        exit_code: None,
        stdout_bytes: 0,
        stderr_bytes: 0,
        findings: vec![],
        payload: None,
        error_kind: Some(ErrorKind::NotDetected),
        error_detail: Some(diagnostic.to_string()),
        warnings: vec![],
        attempts: 0,
        retry_delays_seconds: vec![],
        auth_ok: false,
    }
}

/// Result for a provider whose adapter could not express a required
/// permission in strict mode. The child is never spawned.
pub fn permission_unmet_result(provider_id: &str, detail: String, auth_ok: bool) -> ProviderResult {
    ProviderResult {
        provider_id: provider_id.to_string(),
        run_state: RunState::SpawnFailed,
        started_at: None,
        ended_at: None,
        duration_seconds: None,
        exit_code: None,
        stdout_bytes: 0,
        stderr_bytes: 0,
        findings: vec![],
        payload: None,
        error_kind: Some(ErrorKind::PermissionUnmet),
        error_detail: Some(detail),
        warnings: vec![],
        attempts: 0,
        retry_delays_seconds: vec![],
        auth_ok,
    }
}

/// Result for an orchestrator-side bug while driving one provider.
pub fn internal_result(provider_id: &str, detail: String) -> ProviderResult {
    ProviderResult {
        provider_id: provider_id.to_string(),
        run_state: RunState::SpawnFailed,
        started_at: None,
        ended_at: None,
        duration_seconds: None,
        exit_code: None,
        stdout_bytes: 0,
        stderr_bytes: 0,
        findings: vec![],
        payload: None,
        error_kind: Some(ErrorKind::Internal),
        error_detail: Some(detail),
        warnings: vec![],
        attempts: 0,
        retry_delays_seconds: vec![],
        auth_ok: false,
    }
}

/// Assemble the aggregate document once every provider is terminal.
///
/// Findings concatenate in the task's provider order, so two runs of the same
/// task produce the same provider/ordinal sequence. Findings that share a
/// fingerprint across providers collapse into one entry whose `detected_by`
/// is the union of reporters; the first reporter keeps its slot.
pub fn aggregate(
    task: &Task,
    started_ms: EpochMs,
    ended_ms: EpochMs,
    provider_results: BTreeMap<String, ProviderResult>,
) -> RunResult {
    let ordered: Vec<&ProviderResult> = task
        .provider_ids
        .iter()
        .filter_map(|id| provider_results.get(id))
        .collect();
    let decision = decide(task.mode, &ordered);
    let mut findings: Vec<Finding> = Vec::new();
    for result in &ordered {
        for finding in &result.findings {
            match findings.iter_mut().find(|f| f.fingerprint == finding.fingerprint) {
                Some(existing) => {
                    if !existing.detected_by.contains(&finding.provider_id) {
                        existing.detected_by.push(finding.provider_id.clone());
                    }
                    // Corroboration never lowers confidence.
                    existing.confidence = match (existing.confidence, finding.confidence) {
                        (Some(a), Some(b)) => Some(a.max(b)),
                        (a, b) => a.or(b),
                    };
                }
                None => findings.push(finding.clone()),
            }
        }
    }

    RunResult {
        task_id: task.task_id.clone(),
        mode: task.mode,
        started_at: iso_from_ms(started_ms),
        ended_at: iso_from_ms(ended_ms),
        duration_seconds: whole_seconds_between(started_ms, ended_ms),
        decision,
        providers: task.provider_ids.clone(),
        provider_results,
        findings,
    }
}
