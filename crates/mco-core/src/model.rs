use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// A provider identifier ("claude", "codex", ...).
pub type ProviderId = String;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Review,
    Run,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EnforcementMode {
    Strict,
    Lenient,
}

impl Default for EnforcementMode {
    fn default() -> Self {
        Self::Strict
    }
}

/// Path scoping handed through to each adapter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathConstraints {
    /// Paths the agent may read or touch.
    #[serde(default)]
    pub allow_paths: Vec<String>,
    /// Paths the task is specifically about.
    #[serde(default)]
    pub target_paths: Vec<String>,
}

/// Supervision policy for one task. Immutable once the task is dispatched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    /// Cancel a provider when its output has not grown for this long.
    pub stall_timeout_seconds: u64,
    /// Review mode only: cancel a provider this long after spawn. 0 disables.
    pub review_hard_timeout_seconds: u64,
    /// Concurrent runner cap. 0 = unbounded.
    pub max_provider_parallelism: usize,
    pub enforcement_mode: EnforcementMode,
    /// Per-provider stall window override, in seconds.
    #[serde(default)]
    pub provider_timeouts: BTreeMap<ProviderId, u64>,
    /// Free-form per-provider permission options, passed to the adapter.
    #[serde(default)]
    pub provider_permissions: BTreeMap<ProviderId, BTreeMap<String, String>>,
    /// Retry budget for transient provider failures.
    pub max_retries: u32,
    pub retry_base_delay_seconds: f64,
    pub retry_backoff_multiplier: f64,
    /// Seconds between SIGTERM and SIGKILL when cancelling.
    pub cancel_grace_seconds: u64,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            stall_timeout_seconds: 900,
            review_hard_timeout_seconds: 0,
            max_provider_parallelism: 0,
            enforcement_mode: EnforcementMode::Strict,
            provider_timeouts: BTreeMap::new(),
            provider_permissions: BTreeMap::new(),
            max_retries: 1,
            retry_base_delay_seconds: 1.0,
            retry_backoff_multiplier: 2.0,
            cancel_grace_seconds: 10,
        }
    }
}

impl Policy {
    /// Effective stall window for one provider.
    pub fn stall_window_seconds(&self, provider_id: &str) -> u64 {
        self.provider_timeouts
            .get(provider_id)
            .copied()
            .unwrap_or(self.stall_timeout_seconds)
    }

    pub fn permissions_for(&self, provider_id: &str) -> BTreeMap<String, String> {
        self.provider_permissions
            .get(provider_id)
            .cloned()
            .unwrap_or_default()
    }
}

/// One invocation of the orchestrator: a frozen prompt, provider set, and policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub mode: Mode,
    pub prompt: String,
    pub repo_path: PathBuf,
    pub provider_ids: Vec<ProviderId>,
    pub policy: Policy,
    #[serde(default)]
    pub constraints: PathConstraints,
}

/// What the detect phase learned about one provider's CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSpec {
    pub id: ProviderId,
    pub binary_name: String,
    pub detected: bool,
    pub auth_ok: bool,
    pub diagnostic: String,
}

/// Per-runner lifecycle state. Transitions are monotonic; the last seven are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Pending,
    Admitted,
    Spawning,
    Running,
    Stalling,
    Cancelling,
    ExitedOk,
    ExitedErr,
    CancelledStall,
    CancelledHard,
    CancelledExternal,
    SpawnFailed,
    SkippedUndetected,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::ExitedOk
                | Self::ExitedErr
                | Self::CancelledStall
                | Self::CancelledHard
                | Self::CancelledExternal
                | Self::SpawnFailed
                | Self::SkippedUndetected
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Admitted => "admitted",
            Self::Spawning => "spawning",
            Self::Running => "running",
            Self::Stalling => "stalling",
            Self::Cancelling => "cancelling",
            Self::ExitedOk => "exited_ok",
            Self::ExitedErr => "exited_err",
            Self::CancelledStall => "cancelled_stall",
            Self::CancelledHard => "cancelled_hard",
            Self::CancelledExternal => "cancelled_external",
            Self::SpawnFailed => "spawn_failed",
            Self::SkippedUndetected => "skipped_undetected",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::Info => "info",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "critical" => Some(Self::Critical),
            "high" => Some(Self::High),
            "medium" => Some(Self::Medium),
            "low" => Some(Self::Low),
            "info" => Some(Self::Info),
            _ => None,
        }
    }
}

/// One normalized review observation. Never mutated after the normalizer emits it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Finding {
    pub provider_id: ProviderId,
    /// Stable per-provider ordinal assigned by the normalizer.
    pub ordinal: u32,
    pub severity: Severity,
    pub category: String,
    pub title: String,
    pub evidence: String,
    pub recommendation: String,
    /// Adapter-reported confidence in [0, 1], when the CLI supplies one.
    pub confidence: Option<f64>,
    /// Stable identity used to recognize the same finding across providers.
    /// Derived from category and title when the adapter does not supply one.
    #[serde(default)]
    pub fingerprint: String,
    /// Every provider that reported this finding. Aggregation unions these
    /// when findings share a fingerprint.
    #[serde(default)]
    pub detected_by: Vec<ProviderId>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotDetected,
    PermissionUnmet,
    SpawnFailed,
    CancelledStall,
    CancelledHard,
    CancelledExternal,
    ExitNonzero,
    ParseEmpty,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotDetected => "not_detected",
            Self::PermissionUnmet => "permission_unmet",
            Self::SpawnFailed => "spawn_failed",
            Self::CancelledStall => "cancelled_stall",
            Self::CancelledHard => "cancelled_hard",
            Self::CancelledExternal => "cancelled_external",
            Self::ExitNonzero => "exit_nonzero",
            Self::ParseEmpty => "parse_empty",
            Self::Internal => "internal",
        }
    }
}

/// Outcome of one provider's supervised execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResult {
    pub provider_id: ProviderId,
    pub run_state: RunState,
    pub started_at: Option<String>,
    pub ended_at: Option<String>,
    pub duration_seconds: Option<u64>,
    pub exit_code: Option<i32>,
    pub stdout_bytes: u64,
    pub stderr_bytes: u64,
    /// Empty in run mode and on failure.
    pub findings: Vec<Finding>,
    /// Run mode: the provider's free-text output.
    pub payload: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub error_detail: Option<String>,
    /// Diagnostic markers spotted on stderr (rate limiting, MCP noise, ...).
    #[serde(default)]
    pub warnings: Vec<String>,
    pub attempts: u32,
    #[serde(default)]
    pub retry_delays_seconds: Vec<f64>,
    pub auth_ok: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Decision {
    Pass,
    Fail,
    Escalate,
    Partial,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
            Self::Escalate => "ESCALATE",
            Self::Partial => "PARTIAL",
        }
    }

    /// Process exit code for this decision.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Pass => 0,
            Self::Fail => 1,
            Self::Escalate => 2,
            Self::Partial => 3,
        }
    }
}

/// The aggregate document for one task, written to `run.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub task_id: String,
    pub mode: Mode,
    pub started_at: String,
    pub ended_at: String,
    pub duration_seconds: u64,
    pub decision: Decision,
    /// Canonical provider order (the task's input order).
    pub providers: Vec<ProviderId>,
    pub provider_results: BTreeMap<ProviderId, ProviderResult>,
    /// Per-provider findings concatenated in provider order.
    pub findings: Vec<Finding>,
}

impl RunResult {
    pub fn results_in_order(&self) -> Vec<&ProviderResult> {
        self.providers
            .iter()
            .filter_map(|id| self.provider_results.get(id))
            .collect()
    }
}
