//! Adapter for OpenAI's Codex CLI, driven via `exec --json` which emits
//! newline-delimited JSON events.

use crate::adapter::{
    map_permissions, non_interactive_env, render_prompt, AdapterError, Detection, Invocation,
    ParsedOutput, ProviderAdapter,
};
use crate::{extract, probe};
use async_trait::async_trait;
use mco_core::model::{Mode, Task};
use serde_json::Value;

const PERMISSION_KEYS: &[&str] = &["model", "sandbox_mode", "full_auto"];

#[derive(Debug, Clone, Default)]
pub struct CodexAdapter;

#[async_trait]
impl ProviderAdapter for CodexAdapter {
    fn id(&self) -> &'static str {
        "codex"
    }

    fn binary_name(&self) -> &str {
        "codex"
    }

    async fn detect(&self) -> Detection {
        probe::detect_binary(self.binary_name()).await
    }

    fn build_invocation(&self, task: &Task) -> Result<Invocation, AdapterError> {
        let mut argv = vec![
            self.binary_name().to_string(),
            "exec".to_string(),
            "--json".to_string(),
        ];

        map_permissions(self.id(), task, PERMISSION_KEYS, |key, value| match key {
            "model" => {
                argv.push("--model".to_string());
                argv.push(value.to_string());
            }
            "sandbox_mode" => {
                argv.push("--sandbox".to_string());
                argv.push(value.to_string());
            }
            "full_auto" if value == "true" => {
                argv.push("--full-auto".to_string());
            }
            _ => {}
        })?;

        argv.push(render_prompt(task));

        Ok(Invocation {
            argv,
            env: non_interactive_env(),
            stdin: None,
        })
    }

    fn parse(&self, stdout: &str, _stderr: &str, _exit_code: Option<i32>, mode: Mode) -> ParsedOutput {
        // Walk the event stream and stitch together the agent's message text;
        // findings live inside that text, not in the event framing.
        let events = extract::ndjson_values(stdout);
        let mut message = String::new();
        for event in &events {
            if let Some(text) = agent_message_text(event) {
                if !message.is_empty() {
                    message.push('\n');
                }
                message.push_str(text);
            }
        }
        let (inner, diag) = if message.is_empty() {
            (stdout.to_string(), Some("no agent message events in stream".to_string()))
        } else {
            (message, None)
        };

        match mode {
            Mode::Run => ParsedOutput {
                findings: vec![],
                payload: Some(inner),
                diagnostic: diag,
            },
            Mode::Review => {
                let (findings, parse_diag) = extract::findings_from_text(&inner);
                ParsedOutput {
                    findings,
                    payload: None,
                    diagnostic: parse_diag.or(diag),
                }
            }
        }
    }
}

/// Text carried by an `agent_message` event, in either the flat or the
/// `item.completed` framing the CLI has used across releases.
fn agent_message_text(event: &Value) -> Option<&str> {
    if event.get("type").and_then(Value::as_str) == Some("agent_message") {
        return event.get("message").and_then(Value::as_str);
    }
    let item = event.get("item")?;
    if item.get("type").and_then(Value::as_str) == Some("agent_message") {
        return item.get("text").and_then(Value::as_str);
    }
    None
}
