//! Integration tests for the provider adapters.

use mco_adapters::{
    adapter_for, AdapterError, ClaudeAdapter, CodexAdapter, GeminiAdapter, ProviderAdapter,
};
use mco_core::model::{EnforcementMode, Mode, PathConstraints, Policy, Severity, Task};
use std::collections::BTreeMap;
use std::path::PathBuf;

fn sample_task(provider: &str, permissions: &[(&str, &str)]) -> Task {
    let mut provider_permissions = BTreeMap::new();
    if !permissions.is_empty() {
        let opts: BTreeMap<String, String> = permissions
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        provider_permissions.insert(provider.to_string(), opts);
    }
    Task {
        task_id: "20260802-101530-abcd1234".to_string(),
        mode: Mode::Review,
        prompt: "Review this repository for bugs".to_string(),
        repo_path: PathBuf::from("/tmp/project"),
        provider_ids: vec![provider.to_string()],
        policy: Policy {
            provider_permissions,
            ..Policy::default()
        },
        constraints: PathConstraints::default(),
    }
}

#[test]
fn claude_invocation_is_non_interactive() {
    let task = sample_task("claude", &[]);
    let inv = ClaudeAdapter.build_invocation(&task).unwrap();

    assert_eq!(inv.argv[0], "claude");
    assert_eq!(inv.argv[1], "--print");
    assert_eq!(inv.argv[2], "--output-format");
    assert_eq!(inv.argv[3], "json");
    assert_eq!(inv.argv.last().unwrap(), "Review this repository for bugs");
    assert_eq!(inv.env.get("CI").map(String::as_str), Some("true"));
    assert_eq!(inv.env.get("NO_COLOR").map(String::as_str), Some("1"));
    assert!(inv.stdin.is_none());
}

#[test]
fn claude_maps_permission_options_to_flags() {
    let task = sample_task(
        "claude",
        &[("permission_mode", "plan"), ("allowed_tools", "Read,Grep")],
    );
    let inv = ClaudeAdapter.build_invocation(&task).unwrap();

    let idx = inv.argv.iter().position(|a| a == "--permission-mode").unwrap();
    assert_eq!(inv.argv[idx + 1], "plan");
    let idx = inv.argv.iter().position(|a| a == "--allowedTools").unwrap();
    assert_eq!(inv.argv[idx + 1], "Read,Grep");
}

#[test]
fn claude_allow_paths_become_add_dir() {
    let mut task = sample_task("claude", &[]);
    task.constraints.allow_paths = vec!["src".to_string(), "tests".to_string()];
    let inv = ClaudeAdapter.build_invocation(&task).unwrap();

    let dirs: Vec<&String> = inv
        .argv
        .iter()
        .enumerate()
        .filter(|(_, a)| *a == "--add-dir")
        .map(|(i, _)| &inv.argv[i + 1])
        .collect();
    assert_eq!(dirs, vec!["src", "tests"]);
}

#[test]
fn strict_mode_rejects_unknown_permission() {
    let task = sample_task("claude", &[("telemetry", "off")]);
    let err = ClaudeAdapter.build_invocation(&task).unwrap_err();
    match err {
        AdapterError::PermissionUnmet { provider, option } => {
            assert_eq!(provider, "claude");
            assert_eq!(option, "telemetry");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn lenient_mode_drops_unknown_permission() {
    let mut task = sample_task("claude", &[("telemetry", "off")]);
    task.policy.enforcement_mode = EnforcementMode::Lenient;
    let inv = ClaudeAdapter.build_invocation(&task).unwrap();
    assert!(!inv.argv.iter().any(|a| a.contains("telemetry")));
}

#[test]
fn target_paths_are_rendered_into_prompt() {
    let mut task = sample_task("gemini", &[]);
    task.constraints.target_paths = vec!["src/lib.rs".to_string()];
    let inv = GeminiAdapter.build_invocation(&task).unwrap();
    let prompt = inv.argv.last().unwrap();
    assert!(prompt.contains("Review this repository for bugs"));
    assert!(prompt.contains("src/lib.rs"));
}

#[test]
fn codex_invocation_uses_exec_json() {
    let task = sample_task("codex", &[("sandbox_mode", "workspace-write")]);
    let inv = CodexAdapter.build_invocation(&task).unwrap();
    assert_eq!(inv.argv[0], "codex");
    assert_eq!(inv.argv[1], "exec");
    assert_eq!(inv.argv[2], "--json");
    let idx = inv.argv.iter().position(|a| a == "--sandbox").unwrap();
    assert_eq!(inv.argv[idx + 1], "workspace-write");
}

#[test]
fn claude_parses_findings_from_result_envelope() {
    let stdout = r#"{"type":"result","result":"```json\n[{\"severity\":\"high\",\"category\":\"security\",\"title\":\"Hardcoded secret\",\"evidence\":\"src/auth.rs:42\",\"recommendation\":\"move to env\"}]\n```"}"#;
    let parsed = ClaudeAdapter.parse(stdout, "", Some(0), Mode::Review);
    assert_eq!(parsed.findings.len(), 1);
    assert_eq!(parsed.findings[0].severity, Severity::High);
    assert_eq!(parsed.findings[0].title, "Hardcoded secret");
}

#[test]
fn claude_run_mode_returns_payload() {
    let stdout = r#"{"type":"result","result":"done, created foo.rs"}"#;
    let parsed = ClaudeAdapter.parse(stdout, "", Some(0), Mode::Run);
    assert!(parsed.findings.is_empty());
    assert_eq!(parsed.payload.as_deref(), Some("done, created foo.rs"));
}

#[test]
fn codex_parses_findings_from_event_stream() {
    let stdout = concat!(
        r#"{"type":"turn.started"}"#,
        "\n",
        r#"{"item":{"type":"agent_message","text":"{\"findings\":[{\"severity\":\"critical\",\"title\":\"RCE via eval\"}]}"}}"#,
        "\n",
        r#"{"type":"turn.completed"}"#,
        "\n",
    );
    let parsed = CodexAdapter.parse(stdout, "", Some(0), Mode::Review);
    assert_eq!(parsed.findings.len(), 1);
    assert_eq!(parsed.findings[0].severity, Severity::Critical);
}

#[test]
fn unparseable_output_is_not_an_error() {
    let parsed = GeminiAdapter.parse("I could not find anything noteworthy.", "", Some(0), Mode::Review);
    assert!(parsed.findings.is_empty());
    assert!(parsed.diagnostic.is_some());
}

#[tokio::test]
async fn detect_reports_missing_binary() {
    // None of the agent CLIs are installed in the test environment, so use
    // the registry entry whose binary name is certainly absent.
    let adapter = adapter_for("qwen").unwrap();
    let detection = adapter.detect().await;
    if !detection.detected {
        assert_eq!(detection.diagnostic, "binary_not_found");
        assert!(!detection.auth_ok);
    }
}
