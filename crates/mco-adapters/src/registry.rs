//! Closed registry of the provider adapters, keyed by provider id.

use crate::adapter::ProviderAdapter;
use crate::{ClaudeAdapter, CodexAdapter, GeminiAdapter, OpencodeAdapter, QwenAdapter};

/// Every provider this build knows how to drive, in canonical order.
pub const PROVIDER_IDS: &[&str] = &["claude", "codex", "gemini", "opencode", "qwen"];

pub fn adapter_for(provider_id: &str) -> Option<Box<dyn ProviderAdapter>> {
    match provider_id {
        "claude" => Some(Box::new(ClaudeAdapter)),
        "codex" => Some(Box::new(CodexAdapter)),
        "gemini" => Some(Box::new(GeminiAdapter)),
        "opencode" => Some(Box::new(OpencodeAdapter)),
        "qwen" => Some(Box::new(QwenAdapter)),
        _ => None,
    }
}

/// Resolve a provider id list, preserving order. Unknown ids are reported by
/// name so the CLI can fail usage-style before any fan-out.
pub fn adapters_for(provider_ids: &[String]) -> Result<Vec<Box<dyn ProviderAdapter>>, String> {
    provider_ids
        .iter()
        .map(|id| adapter_for(id).ok_or_else(|| id.clone()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|unknown| format!("unknown provider '{unknown}' (known: {})", PROVIDER_IDS.join(", ")))
}
