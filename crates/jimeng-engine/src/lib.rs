pub mod client;
pub mod plugin;
pub mod retention;
pub mod storage;

pub use client::{GenerationPayload, ImageProvider, JimengClient};
pub use plugin::{help_text, JimengPlugin, PLUGIN_META};
pub use retention::{RetentionSweeper, RetentionTimer, SweepReport};
pub use storage::ImageStore;

/// Flattens an error chain into one line, skipping repeated causes.
pub fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts
            .last()
            .map(|existing: &String| existing == trimmed)
            .unwrap_or(false)
        {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
