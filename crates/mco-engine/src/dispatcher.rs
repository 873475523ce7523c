//! Top-level orchestration: detect, admit under the parallelism cap, supervise
//! every runner to a terminal state, and aggregate.

use crate::artifacts;
use crate::normalize;
use crate::runner::{self, SuperviseParams};
use anyhow::{bail, Context, Result};
use mco_adapters::{AdapterError, ProviderAdapter};
use mco_core::model::{Mode, ProviderResult, ProviderSpec, RunResult, RunState, Task};
use mco_core::retry::backoff_delay_seconds;
use mco_core::time::now_ms;
use mco_core::{classify, Decision};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Run one task end to end and return the aggregate document.
///
/// `adapters` must line up with `task.provider_ids` (the CLI resolves them
/// from the registry in order). `raw_dir`, when set, receives
/// `<id>.stdout` / `<id>.stderr` per provider; it must exist before the call
/// so children can stream while running. Flipping `interrupt` to true cancels
/// every non-terminal runner with the external reason.
///
/// Per-provider failures never surface as `Err`; only pre-fan-out problems do.
pub async fn execute_task(
    task: Arc<Task>,
    adapters: Vec<Box<dyn ProviderAdapter>>,
    raw_dir: Option<PathBuf>,
    interrupt: watch::Receiver<bool>,
) -> Result<RunResult> {
    let started_ms = now_ms();

    if adapters.len() != task.provider_ids.len() {
        bail!(
            "adapter set does not match provider list ({} vs {})",
            adapters.len(),
            task.provider_ids.len()
        );
    }
    for (adapter, id) in adapters.iter().zip(&task.provider_ids) {
        if adapter.id() != id {
            bail!("adapter order mismatch: expected '{id}', got '{}'", adapter.id());
        }
    }

    let mut results: BTreeMap<String, ProviderResult> = BTreeMap::new();
    let mut eligible: Vec<(Box<dyn ProviderAdapter>, ProviderSpec)> = Vec::new();

    for adapter in adapters {
        let detection = adapter.detect().await;
        let spec = ProviderSpec {
            id: adapter.id().to_string(),
            binary_name: adapter.binary_name().to_string(),
            detected: detection.detected,
            auth_ok: detection.auth_ok,
            diagnostic: detection.diagnostic,
        };
        if !spec.detected {
            info!("{}: binary not found, skipping", spec.id);
            results.insert(spec.id.clone(), normalize::skipped_result(&spec.id, &spec.diagnostic));
            continue;
        }
        if !spec.auth_ok {
            // Auth trouble surfaces through the run itself; detection only
            // records the hint.
            warn!("{}: probe reported '{}', admitting anyway", spec.id, spec.diagnostic);
        }
        eligible.push((adapter, spec));
    }

    let cap = match task.policy.max_provider_parallelism {
        0 => eligible.len().max(1),
        n => n,
    };
    let semaphore = Arc::new(Semaphore::new(cap));

    let mut handles: Vec<(String, JoinHandle<ProviderResult>)> = Vec::new();
    for (adapter, spec) in eligible {
        // Acquiring here (not inside the spawned task) is what makes
        // admission follow the provider-list order.
        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .context("admission semaphore closed")?;
        let id = spec.id.clone();
        let task = Arc::clone(&task);
        let raw_dir = raw_dir.clone();
        let interrupt = interrupt.clone();
        let handle = tokio::spawn(async move {
            let result = run_one(adapter.as_ref(), &task, &spec, raw_dir, interrupt).await;
            drop(permit);
            result
        });
        handles.push((id, handle));
    }

    // Wait-all: every provider reaches a terminal state before aggregation.
    for (id, handle) in handles {
        let result = match handle.await {
            Ok(result) => result,
            Err(e) => {
                warn!("{id}: runner task failed: {e}");
                normalize::internal_result(&id, format!("runner task failed: {e}"))
            }
        };
        results.insert(id, result);
    }

    let run = normalize::aggregate(&task, started_ms, now_ms(), results);
    log_outcome(&run);
    Ok(run)
}

/// Drive one admitted provider to a terminal `ProviderResult`, retrying
/// transient failures within the policy budget.
async fn run_one(
    adapter: &dyn ProviderAdapter,
    task: &Task,
    spec: &ProviderSpec,
    raw_dir: Option<PathBuf>,
    interrupt: watch::Receiver<bool>,
) -> ProviderResult {
    let id = spec.id.as_str();
    let policy = &task.policy;

    let invocation = match adapter.build_invocation(task) {
        Ok(invocation) => invocation,
        Err(err @ AdapterError::PermissionUnmet { .. }) => {
            warn!("{id}: {err}");
            return normalize::permission_unmet_result(id, err.to_string(), spec.auth_ok);
        }
        Err(err) => {
            return normalize::internal_result(id, err.to_string());
        }
    };

    let params = SuperviseParams {
        stall_window: Duration::from_secs(policy.stall_window_seconds(id).max(1)),
        hard_deadline: match (task.mode, policy.review_hard_timeout_seconds) {
            (Mode::Review, secs) if secs > 0 => Some(Duration::from_secs(secs)),
            _ => None,
        },
        grace: Duration::from_secs(policy.cancel_grace_seconds),
        ..SuperviseParams::default()
    };

    let mut attempts = 0u32;
    let mut delays: Vec<f64> = Vec::new();
    loop {
        attempts += 1;
        let (state_tx, _state_rx) = watch::channel(RunState::Admitted);
        let outcome = runner::run_supervised(
            &invocation,
            &task.repo_path,
            &params,
            Arc::new(state_tx),
            interrupt.clone(),
        )
        .await;

        if let Some(dir) = &raw_dir {
            if let Err(e) = artifacts::write_raw_streams(dir, id, &outcome) {
                warn!("{id}: raw log write failed: {e}");
            }
        }

        let parsed = adapter.parse(
            &outcome.stdout_text,
            &outcome.stderr_text,
            outcome.exit_code,
            task.mode,
        );
        let retryable = outcome.state == RunState::ExitedErr
            && attempts <= policy.max_retries
            && !*interrupt.borrow();
        let transient = classify::transient_failure(&outcome.stderr_text);
        let result =
            normalize::provider_result(id, &outcome, parsed, task.mode, attempts, delays.clone(), spec.auth_ok);

        match (retryable, transient) {
            (true, Some(label)) => {
                let delay = backoff_delay_seconds(
                    policy.retry_base_delay_seconds,
                    policy.retry_backoff_multiplier,
                    attempts,
                );
                warn!("{id}: transient failure ({label}), retrying in {delay:.1}s");
                delays.push(delay);
                tokio::time::sleep(Duration::from_secs_f64(delay)).await;
            }
            _ => {
                info!(
                    "{id}: terminal state {} after {attempts} attempt(s)",
                    result.run_state.as_str()
                );
                return result;
            }
        }
    }
}

fn log_outcome(run: &RunResult) {
    let summary: Vec<String> = run
        .results_in_order()
        .iter()
        .map(|r| format!("{}={}", r.provider_id, r.run_state.as_str()))
        .collect();
    match run.decision {
        Decision::Pass => info!("decision PASS [{}]", summary.join(", ")),
        other => warn!("decision {} [{}]", other.as_str(), summary.join(", ")),
    }
}
