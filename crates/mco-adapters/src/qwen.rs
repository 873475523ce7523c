//! Adapter for the Qwen Code CLI, a Gemini-CLI derivative with the same
//! `--prompt` non-interactive surface.

use crate::adapter::{
    map_permissions, non_interactive_env, render_prompt, AdapterError, Detection, Invocation,
    ParsedOutput, ProviderAdapter,
};
use crate::{extract, probe};
use async_trait::async_trait;
use mco_core::model::{Mode, Task};

const PERMISSION_KEYS: &[&str] = &["model", "approval_mode", "yolo"];

#[derive(Debug, Clone, Default)]
pub struct QwenAdapter;

#[async_trait]
impl ProviderAdapter for QwenAdapter {
    fn id(&self) -> &'static str {
        "qwen"
    }

    fn binary_name(&self) -> &str {
        "qwen"
    }

    async fn detect(&self) -> Detection {
        probe::detect_binary(self.binary_name()).await
    }

    fn build_invocation(&self, task: &Task) -> Result<Invocation, AdapterError> {
        let mut argv = vec![self.binary_name().to_string()];

        map_permissions(self.id(), task, PERMISSION_KEYS, |key, value| match key {
            "model" => {
                argv.push("--model".to_string());
                argv.push(value.to_string());
            }
            "approval_mode" => {
                argv.push("--approval-mode".to_string());
                argv.push(value.to_string());
            }
            "yolo" if value == "true" => {
                argv.push("--yolo".to_string());
            }
            _ => {}
        })?;

        argv.push("--prompt".to_string());
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
