//! Provider adapters: the translation layer between each AI coding-agent CLI
//! and the orchestrator's uniform contract.

pub mod adapter;
pub mod extract;
pub mod probe;
pub mod registry;

mod claude;
mod codex;
mod gemini;
mod opencode;
mod qwen;

pub use adapter::{AdapterError, Detection, Invocation, ParsedOutput, ProviderAdapter, RawFinding};
pub use claude::ClaudeAdapter;
pub use codex::CodexAdapter;
pub use gemini::GeminiAdapter;
pub use opencode::OpencodeAdapter;
pub use qwen::QwenAdapter;
pub use registry::{adapter_for, adapters_for, PROVIDER_IDS};
