//! Adapter for the OpenCode CLI. `opencode run <prompt>` executes one
//! non-interactive turn.

use crate::adapter::{
    map_permissions, non_interactive_env, render_prompt, AdapterError, Detection, Invocation,
    ParsedOutput, ProviderAdapter,
};
use crate::{extract, probe};
use async_trait::async_trait;
use mco_core::model::{Mode, Task};

const PERMISSION_KEYS: &[&str] = &["model", "agent"];

#[derive(Debug, Clone, Default)]
pub struct OpencodeAdapter;

#[async_trait]
impl ProviderAdapter for OpencodeAdapter {
    fn id(&self) -> &'static str {
        "opencode"
    }

    fn binary_name(&self) -> &str {
        "opencode"
    }

    async fn detect(&self) -> Detection {
        probe::detect_binary(self.binary_name()).await
    }

    fn build_invocation(&self, task: &Task) -> Result<Invocation, AdapterError> {
        let mut argv = vec![self.binary_name().to_string(), "run".to_string()];

        map_permissions(self.id(), task, PERMISSION_KEYS, |key, value| match key {
            "model" => {
                argv.push("--model".to_string());
                argv.push(value.to_string());
            }
            "agent" => {
                argv.push("--agent".to_string());
                argv.push(value.to_string());
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
        match mode {
            Mode::Run => ParsedOutput {
                findings: vec![],
                payload: Some(stdout.to_string()),
                diagnostic: None,
            },
            Mode::Review => {
                let (findings, diagnostic) = extract::findings_from_text(stdout);
                ParsedOutput {
                    findings,
                    payload: None,
                    diagnostic,
                }
            }
        }
    }
}
