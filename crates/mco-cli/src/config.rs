//! `mco.json` loading and the flag/file/default merge.
//!
//! Precedence: CLI flags override config file values; the config file
//! overrides built-in defaults.

use anyhow::{Context, Result};
use mco_core::model::{EnforcementMode, Policy};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

pub const DEFAULT_ARTIFACT_BASE: &str = "reports/review";
pub const DEFAULT_STATE_FILE: &str = ".mco/state.json";
pub const DEFAULT_PROVIDERS: &[&str] = &["claude", "codex"];

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub providers: Option<Vec<String>>,
    pub artifact_base: Option<String>,
    pub state_file: Option<String>,
    pub policy: Option<FilePolicy>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilePolicy {
    pub stall_timeout_seconds: Option<u64>,
    pub review_hard_timeout_seconds: Option<u64>,
    pub max_provider_parallelism: Option<usize>,
    pub enforcement_mode: Option<EnforcementMode>,
    pub provider_timeouts: Option<BTreeMap<String, u64>>,
    pub provider_permissions: Option<BTreeMap<String, BTreeMap<String, String>>>,
    pub max_retries: Option<u32>,
    pub retry_base_delay_seconds: Option<f64>,
    pub retry_backoff_multiplier: Option<f64>,
    pub cancel_grace_seconds: Option<u64>,
}

pub fn load_file(path: &Path) -> Result<FileConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read config {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parse config {}", path.display()))
}

/// Policy-shaped CLI overrides; everything is optional.
#[derive(Debug, Clone, Default)]
pub struct PolicyOverrides {
    pub stall_timeout_seconds: Option<u64>,
    pub review_hard_timeout_seconds: Option<u64>,
    pub max_provider_parallelism: Option<usize>,
    pub enforcement_mode: Option<EnforcementMode>,
}

/// Fold defaults, file values, and flag overrides into the effective policy.
pub fn merge_policy(file: Option<&FilePolicy>, flags: &PolicyOverrides) -> Policy {
    let mut policy = Policy::default();

    if let Some(file) = file {
        if let Some(v) = file.stall_timeout_seconds {
            policy.stall_timeout_seconds = v;
        }
        if let Some(v) = file.review_hard_timeout_seconds {
            policy.review_hard_timeout_seconds = v;
        }
        if let Some(v) = file.max_provider_parallelism {
            policy.max_provider_parallelism = v;
        }
        if let Some(v) = file.enforcement_mode {
            policy.enforcement_mode = v;
        }
        if let Some(v) = &file.provider_timeouts {
            policy.provider_timeouts = v.clone();
        }
        if let Some(v) = &file.provider_permissions {
            policy.provider_permissions = v.clone();
        }
        if let Some(v) = file.max_retries {
            policy.max_retries = v;
        }
        if let Some(v) = file.retry_base_delay_seconds {
            policy.retry_base_delay_seconds = v;
        }
        if let Some(v) = file.retry_backoff_multiplier {
            policy.retry_backoff_multiplier = v;
        }
        if let Some(v) = file.cancel_grace_seconds {
            policy.cancel_grace_seconds = v;
        }
    }

    if let Some(v) = flags.stall_timeout_seconds {
        policy.stall_timeout_seconds = v;
    }
    if let Some(v) = flags.review_hard_timeout_seconds {
        policy.review_hard_timeout_seconds = v;
    }
    if let Some(v) = flags.max_provider_parallelism {
        policy.max_provider_parallelism = v;
    }
    if let Some(v) = flags.enforcement_mode {
        policy.enforcement_mode = v;
    }

    policy.stall_timeout_seconds = policy.stall_timeout_seconds.max(1);
    policy
}

/// Provider list: flags beat file beats the built-in default; order is kept
/// and duplicates are dropped.
pub fn merge_providers(file: Option<&Vec<String>>, flags: Option<&Vec<String>>) -> Vec<String> {
    let chosen: Vec<String> = match (flags, file) {
        (Some(flags), _) => flags.clone(),
        (None, Some(file)) => file.clone(),
        (None, None) => DEFAULT_PROVIDERS.iter().map(|s| s.to_string()).collect(),
    };
    let mut out: Vec<String> = Vec::new();
    for id in chosen {
        if !out.contains(&id) {
            out.push(id);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_file_or_flags() {
        let policy = merge_policy(None, &PolicyOverrides::default());
        assert_eq!(policy.stall_timeout_seconds, 900);
        assert_eq!(policy.enforcement_mode, EnforcementMode::Strict);

        let providers = merge_providers(None, None);
        assert_eq!(providers, vec!["claude".to_string(), "codex".to_string()]);
    }

    #[test]
    fn file_overrides_defaults_and_flags_override_file() {
        let file = FilePolicy {
            stall_timeout_seconds: Some(120),
            max_provider_parallelism: Some(2),
            ..FilePolicy::default()
        };
        let flags = PolicyOverrides {
            stall_timeout_seconds: Some(60),
            ..PolicyOverrides::default()
        };
        let policy = merge_policy(Some(&file), &flags);
        assert_eq!(policy.stall_timeout_seconds, 60);
        assert_eq!(policy.max_provider_parallelism, 2);
    }

    #[test]
    fn stall_window_never_drops_below_one_second() {
        let flags = PolicyOverrides {
            stall_timeout_seconds: Some(0),
            ..PolicyOverrides::default()
        };
        assert_eq!(merge_policy(None, &flags).stall_timeout_seconds, 1);
    }

    #[test]
    fn provider_list_keeps_order_and_dedupes() {
        let flags = vec![
            "codex".to_string(),
            "claude".to_string(),
            "codex".to_string(),
        ];
        assert_eq!(
            merge_providers(None, Some(&flags)),
            vec!["codex".to_string(), "claude".to_string()]
        );
    }

    #[test]
    fn config_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mco.json");
        std::fs::write(
            &path,
            r#"{
                "providers": ["gemini"],
                "artifact_base": "out/reviews",
                "policy": {
                    "stall_timeout_seconds": 300,
                    "enforcement_mode": "lenient",
                    "provider_timeouts": {"gemini": 60}
                }
            }"#,
        )
        .unwrap();

        let cfg = load_file(&path).unwrap();
        assert_eq!(cfg.providers.as_deref(), Some(&["gemini".to_string()][..]));
        assert_eq!(cfg.artifact_base.as_deref(), Some("out/reviews"));
        let policy = merge_policy(cfg.policy.as_ref(), &PolicyOverrides::default());
        assert_eq!(policy.stall_timeout_seconds, 300);
        assert_eq!(policy.enforcement_mode, EnforcementMode::Lenient);
        assert_eq!(policy.provider_timeouts.get("gemini"), Some(&60));
    }

    #[test]
    fn malformed_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mco.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(load_file(&path).is_err());
    }
}
