//! Adapter for Anthropic's Claude Code CLI, driven via
//! `--print --output-format json` for non-interactive operation.

use crate::adapter::{
    map_permissions, non_interactive_env, render_prompt, AdapterError, Detection, Invocation,
    ParsedOutput, ProviderAdapter,
};
use crate::{extract, probe};
use async_trait::async_trait;
use mco_core::model::{Mode, Task};
use serde_json::Value;

const PERMISSION_KEYS: &[&str] = &[
    "permission_mode",
    "allowed_tools",
    "disallowed_tools",
    "model",
    "max_turns",
];

#[derive(Debug, Clone, Default)]
pub struct ClaudeAdapter;

#[async_trait]
impl ProviderAdapter for ClaudeAdapter {
    fn id(&self) -> &'static str {
        "claude"
    }

    fn binary_name(&self) -> &str {
        "claude"
    }

    async fn detect(&self) -> Detection {
        probe::detect_binary(self.binary_name()).await
    }

    fn build_invocation(&self, task: &Task) -> Result<Invocation, AdapterError> {
        let mut argv = vec![
            self.binary_name().to_string(),
            "--print".to_string(),
            "--output-format".to_string(),
            "json".to_string(),
        ];

        map_permissions(self.id(), task, PERMISSION_KEYS, |key, value| match key {
            "permission_mode" => {
                argv.push("--permission-mode".to_string());
                argv.push(value.to_string());
            }
            "allowed_tools" => {
                argv.push("--allowedTools".to_string());
                argv.push(value.to_string());
            }
            "disallowed_tools" => {
                argv.push("--disallowedTools".to_string());
                argv.push(value.to_string());
            }
            "model" => {
                argv.push("--model".to_string());
                argv.push(value.to_string());
            }
            "max_turns" => {
                argv.push("--max-turns".to_string());
                argv.push(value.to_string());
            }
            _ => {}
        })?;

        // Claude can widen its working set natively; other adapters get the
        // same constraint through the prompt text.
        for path in &task.constraints.allow_paths {
            argv.push("--add-dir".to_string());
            argv.push(path.clone());
        }

        argv.push(render_prompt(task));

        Ok(Invocation {
            argv,
            env: non_interactive_env(),
            stdin: None,
        })
    }

    fn parse(&self, stdout: &str, _stderr: &str, _exit_code: Option<i32>, mode: Mode) -> ParsedOutput {
        // --output-format json wraps the agent's answer in an envelope whose
        // `result` field holds the text we actually want.
        let (inner, envelope_diag) = match serde_json::from_str::<Value>(stdout.trim()) {
            Ok(envelope) => match envelope.get("result").and_then(Value::as_str) {
                Some(result) => (result.to_string(), None),
                None => (stdout.to_string(), Some("no result field in envelope".to_string())),
            },
            Err(_) => (stdout.to_string(), Some("output was not a JSON envelope".to_string())),
        };

        match mode {
            Mode::Run => ParsedOutput {
                findings: vec![],
                payload: Some(inner),
                diagnostic: envelope_diag,
            },
            Mode::Review => {
                let (findings, diag) = extract::findings_from_text(&inner);
                ParsedOutput {
                    findings,
                    payload: None,
                    diagnostic: diag.or(envelope_diag),
                }
            }
        }
    }
}
