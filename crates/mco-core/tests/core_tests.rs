//! Integration tests for the core crate.

use mco_core::decision::decide;
use mco_core::model::{
    Decision, ErrorKind, Finding, Mode, Policy, ProviderResult, RunState, Severity,
};

fn result(provider: &str, state: RunState) -> ProviderResult {
    ProviderResult {
        provider_id: provider.to_string(),
        run_state: state,
        started_at: None,
        ended_at: None,
        duration_seconds: None,
        exit_code: None,
        stdout_bytes: 0,
        stderr_bytes: 0,
        findings: vec![],
        payload: None,
        error_kind: None,
        error_detail: None,
        warnings: vec![],
        attempts: 1,
        retry_delays_seconds: vec![],
        auth_ok: true,
    }
}

fn finding(provider: &str, ordinal: u32, severity: Severity) -> Finding {
    Finding {
        provider_id: provider.to_string(),
        ordinal,
        severity,
        category: "general".into(),
        title: "something".into(),
        evidence: String::new(),
        recommendation: String::new(),
        confidence: None,
        fingerprint: String::new(),
        detected_by: vec![provider.to_string()],
    }
}

#[test]
fn test_run_state_serde() {
    let s = serde_json::to_string(&RunState::CancelledStall).unwrap();
    assert_eq!(s, r#""cancelled_stall""#);
    let back: RunState = serde_json::from_str(&s).unwrap();
    assert_eq!(back, RunState::CancelledStall);
}

#[test]
fn test_terminal_states() {
    assert!(RunState::ExitedOk.is_terminal());
    assert!(RunState::SkippedUndetected.is_terminal());
    assert!(RunState::CancelledExternal.is_terminal());
    assert!(!RunState::Stalling.is_terminal());
    assert!(!RunState::Pending.is_terminal());
}

#[test]
fn test_decision_serde_is_uppercase() {
    assert_eq!(serde_json::to_string(&Decision::Escalate).unwrap(), r#""ESCALATE""#);
    assert_eq!(serde_json::to_string(&Decision::Pass).unwrap(), r#""PASS""#);
}

#[test]
fn test_error_kind_serde() {
    assert_eq!(
        serde_json::to_string(&ErrorKind::PermissionUnmet).unwrap(),
        r#""permission_unmet""#
    );
}

#[test]
fn test_decision_exit_codes() {
    assert_eq!(Decision::Pass.exit_code(), 0);
    assert_eq!(Decision::Fail.exit_code(), 1);
    assert_eq!(Decision::Escalate.exit_code(), 2);
    assert_eq!(Decision::Partial.exit_code(), 3);
}

#[test]
fn review_critical_finding_fails() {
    let mut a = result("claude", RunState::ExitedOk);
    a.findings.push(finding("claude", 0, Severity::Critical));
    let b = result("codex", RunState::ExitedOk);
    assert_eq!(decide(Mode::Review, &[&a, &b]), Decision::Fail);
}

#[test]
fn review_no_success_fails() {
    let a = result("claude", RunState::ExitedErr);
    let b = result("codex", RunState::CancelledStall);
    assert_eq!(decide(Mode::Review, &[&a, &b]), Decision::Fail);
}

#[test]
fn review_partial_when_one_degraded() {
    let a = result("claude", RunState::ExitedOk);
    let b = result("codex", RunState::CancelledStall);
    assert_eq!(decide(Mode::Review, &[&a, &b]), Decision::Partial);
}

#[test]
fn review_skipped_provider_is_partial() {
    let mut a = result("claude", RunState::ExitedOk);
    a.findings.push(finding("claude", 0, Severity::Low));
    let mut b = result("qwen", RunState::SkippedUndetected);
    b.error_kind = Some(ErrorKind::NotDetected);
    assert_eq!(decide(Mode::Review, &[&a, &b]), Decision::Partial);
}

#[test]
fn review_high_finding_escalates() {
    let mut a = result("claude", RunState::ExitedOk);
    a.findings.push(finding("claude", 0, Severity::High));
    let mut b = result("codex", RunState::ExitedOk);
    b.findings.push(finding("codex", 0, Severity::High));
    assert_eq!(decide(Mode::Review, &[&a, &b]), Decision::Escalate);
}

#[test]
fn review_clean_pass() {
    let a = result("claude", RunState::ExitedOk);
    let mut b = result("codex", RunState::ExitedOk);
    b.findings.push(finding("codex", 0, Severity::Medium));
    assert_eq!(decide(Mode::Review, &[&a, &b]), Decision::Pass);
}

#[test]
fn review_critical_beats_degraded_partial() {
    // Rule order: a critical finding fails the run even when another
    // provider was cancelled.
    let mut a = result("claude", RunState::ExitedOk);
    a.findings.push(finding("claude", 0, Severity::Critical));
    let b = result("codex", RunState::CancelledHard);
    assert_eq!(decide(Mode::Review, &[&a, &b]), Decision::Fail);
}

#[test]
fn run_mode_all_some_none() {
    let ok = result("claude", RunState::ExitedOk);
    let ok2 = result("codex", RunState::ExitedOk);
    let bad = result("gemini", RunState::ExitedErr);
    assert_eq!(decide(Mode::Run, &[&ok, &ok2]), Decision::Pass);
    assert_eq!(decide(Mode::Run, &[&ok, &bad]), Decision::Partial);
    assert_eq!(decide(Mode::Run, &[&bad]), Decision::Fail);
    assert_eq!(decide(Mode::Run, &[]), Decision::Fail);
}

#[test]
fn decision_is_pure() {
    let a = result("claude", RunState::ExitedOk);
    let b = result("codex", RunState::CancelledStall);
    let first = decide(Mode::Review, &[&a, &b]);
    let second = decide(Mode::Review, &[&a, &b]);
    assert_eq!(first, second);
}

#[test]
fn policy_defaults_match_contract() {
    let p = Policy::default();
    assert_eq!(p.stall_timeout_seconds, 900);
    assert_eq!(p.review_hard_timeout_seconds, 0);
    assert_eq!(p.max_provider_parallelism, 0);
    assert_eq!(p.max_retries, 1);
    assert_eq!(p.cancel_grace_seconds, 10);
}

#[test]
fn per_provider_stall_window_override() {
    let mut p = Policy::default();
    p.provider_timeouts.insert("codex".into(), 30);
    assert_eq!(p.stall_window_seconds("codex"), 30);
    assert_eq!(p.stall_window_seconds("claude"), 900);
}
