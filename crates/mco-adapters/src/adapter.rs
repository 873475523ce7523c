use async_trait::async_trait;
use mco_core::model::{EnforcementMode, Mode, Severity, Task};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("provider '{provider}' cannot honor permission option '{option}'")]
    PermissionUnmet { provider: String, option: String },
    #[error("invalid task for provider '{provider}': {reason}")]
    InvalidTask { provider: String, reason: String },
}

/// What the detect phase learned about one CLI.
#[derive(Debug, Clone)]
pub struct Detection {
    pub detected: bool,
    pub auth_ok: bool,
    pub diagnostic: String,
}

/// A fully-built child invocation. `argv[0]` is the binary.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub argv: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub stdin: Option<String>,
}

/// A finding as recovered from one provider's raw output, before the
/// normalizer tags it with provider id and ordinal.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFinding {
    pub severity: Severity,
    pub category: String,
    pub title: String,
    pub evidence: String,
    pub recommendation: String,
    pub confidence: Option<f64>,
    /// Adapter-supplied identity; empty means the normalizer derives one.
    pub fingerprint: String,
}

/// Adapter parse result. Zero findings with a diagnostic is a valid outcome,
/// not an error.
#[derive(Debug, Clone, Default)]
pub struct ParsedOutput {
    pub findings: Vec<RawFinding>,
    pub payload: Option<String>,
    pub diagnostic: Option<String>,
}

/// Uniform per-provider contract. Adapters are stateless with respect to the
/// task; they hold no per-run state between calls.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn id(&self) -> &'static str;

    fn binary_name(&self) -> &str;

    /// Probe for the CLI. Side-effect-free beyond PATH lookup and a short
    /// `--version`-style subcommand; must not block on network.
    async fn detect(&self) -> Detection;

    /// Build the child invocation for a task. In strict enforcement mode an
    /// inexpressible permission option is an error, not a silent drop.
    fn build_invocation(&self, task: &Task) -> Result<Invocation, AdapterError>;

    /// Recover findings (review mode) or a payload (run mode) from the
    /// captured output.
    fn parse(&self, stdout: &str, stderr: &str, exit_code: Option<i32>, mode: Mode)
        -> ParsedOutput;
}

/// Environment that pushes agent CLIs into non-interactive operation.
pub(crate) fn non_interactive_env() -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    env.insert("CI".to_string(), "true".to_string());
    env.insert("NO_COLOR".to_string(), "1".to_string());
    env.insert("TERM".to_string(), "dumb".to_string());
    env
}

/// The prompt actually sent to a provider: the task prompt plus any path
/// constraints rendered as plain instructions.
pub(crate) fn render_prompt(task: &Task) -> String {
    let mut prompt = task.prompt.clone();
    if !task.constraints.target_paths.is_empty() {
        prompt.push_str("\n\nFocus on these paths: ");
        prompt.push_str(&task.constraints.target_paths.join(", "));
    }
    if !task.constraints.allow_paths.is_empty() {
        prompt.push_str("\nOnly touch files under: ");
        prompt.push_str(&task.constraints.allow_paths.join(", "));
    }
    prompt
}

/// Apply a provider's permission options against the set of keys the adapter
/// can express. Known keys are handed to `apply`; unknown keys are an error in
/// strict mode and a logged no-op in lenient mode.
pub(crate) fn map_permissions<F>(
    provider: &str,
    task: &Task,
    known: &[&str],
    mut apply: F,
) -> Result<(), AdapterError>
where
    F: FnMut(&str, &str),
{
    for (key, value) in task.policy.permissions_for(provider) {
        if known.contains(&key.as_str()) {
            apply(&key, &value);
        } else {
            match task.policy.enforcement_mode {
                EnforcementMode::Strict => {
                    return Err(AdapterError::PermissionUnmet {
                        provider: provider.to_string(),
                        option: key,
                    });
                }
                EnforcementMode::Lenient => {
                    warn!("{provider}: ignoring unsupported permission option '{key}'");
                }
            }
        }
    }
    Ok(())
}
