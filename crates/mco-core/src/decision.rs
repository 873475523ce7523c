use crate::model::{Decision, Mode, ProviderResult, RunState, Severity};

/// Exit code for orchestrator-internal failures (config unreadable, artifact
/// base unwritable, bugs).
pub const EXIT_INTERNAL: i32 = 70;
/// Exit code for CLI usage errors.
pub const EXIT_USAGE: i32 = 64;

fn succeeded(result: &ProviderResult) -> bool {
    result.run_state == RunState::ExitedOk
}

fn degraded(result: &ProviderResult) -> bool {
    matches!(
        result.run_state,
        RunState::CancelledStall
            | RunState::CancelledHard
            | RunState::CancelledExternal
            | RunState::SpawnFailed
            | RunState::ExitedErr
            | RunState::SkippedUndetected
    )
}

/// Derive the aggregate decision from per-provider results.
///
/// Pure function: same inputs, same decision. Review mode applies the rules in
/// order, first match wins; run mode only looks at exit success.
pub fn decide(mode: Mode, results: &[&ProviderResult]) -> Decision {
    match mode {
        Mode::Review => decide_review(results),
        Mode::Run => decide_run(results),
    }
}

fn decide_review(results: &[&ProviderResult]) -> Decision {
    let any_critical = results
        .iter()
        .flat_map(|r| r.findings.iter())
        .any(|f| f.severity == Severity::Critical);
    if any_critical {
        return Decision::Fail;
    }

    let succeeded_count = results.iter().filter(|r| succeeded(r)).count();
    if succeeded_count == 0 {
        return Decision::Fail;
    }

    if results.iter().any(|r| degraded(r)) {
        return Decision::Partial;
    }

    let any_high = results
        .iter()
        .flat_map(|r| r.findings.iter())
        .any(|f| f.severity == Severity::High);
    if any_high {
        return Decision::Escalate;
    }

    Decision::Pass
}

fn decide_run(results: &[&ProviderResult]) -> Decision {
    let total = results.len();
    let ok = results.iter().filter(|r| succeeded(r)).count();
    if total == 0 || ok == 0 {
        Decision::Fail
    } else if ok == total {
        Decision::Pass
    } else {
        Decision::Partial
    }
}
