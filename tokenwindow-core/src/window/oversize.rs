use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::info;

use crate::settings::config::OversizedMessageHandling;
use crate::tokens::TokenCounter;
use crate::window::register::{OffloadRef, Register};

/// Offload any register whose content exceeds the configured share of the
/// window (strictly greater than; a register exactly at the threshold stays).
///
/// The original bytes are written to the temp directory verbatim and the
/// register keeps a short head preview plus a stub that steers the model away
/// from re-reading the file through the tool that produced the bloat.
pub fn offload_oversized(
    registers: &mut [Register],
    conversation_id: &str,
    counter: &dyn TokenCounter,
    config: &OversizedMessageHandling,
    max_window_size: u32,
    base_dir: &Path,
) -> Result<Vec<u32>> {
    if !config.enabled {
        return Ok(Vec::new());
    }

    let threshold = max_window_size as u64 * config.threshold_percent as u64 / 100;
    let mut offloaded = Vec::new();

    for register in registers.iter_mut() {
        if !register.in_window || register.offload.is_some() {
            continue;
        }
        let tokens = counter.count_tokens(&register.content);
        if tokens as u64 <= threshold {
            continue;
        }

        let temp_dir = base_dir.join(&config.temp_directory);
        fs::create_dir_all(&temp_dir)
            .with_context(|| format!("failed to create temp directory {temp_dir:?}"))?;

        // Filename embeds conversation id, position, and timestamp, so the
        // single-turn-per-conversation rule makes collisions impossible.
        let timestamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
        let path = temp_dir.join(format!(
            "large_message_{conversation_id}_{}_{timestamp}.txt",
            register.position
        ));
        fs::write(&path, &register.content)
            .with_context(|| format!("failed to offload register content to {path:?}"))?;

        let preview = head_preview(&register.content, config.truncate_to_tokens);
        let stub = config
            .instruction_template
            .replace("{path}", &path.display().to_string());
        register.content = format!("{preview}...\n\n{stub}");
        register.offload = Some(OffloadRef {
            path: path.clone(),
            original_token_count: tokens,
        });

        info!(
            conversation_id,
            position = register.position,
            tokens,
            path = %path.display(),
            "offloaded oversized register"
        );
        offloaded.push(register.position);
    }

    Ok(offloaded)
}

/// First ~`tokens` worth of content, cut back to the nearest word boundary.
fn head_preview(content: &str, tokens: u32) -> &str {
    let budget = (tokens as usize) * 4;
    if content.len() <= budget {
        return content;
    }
    let mut end = budget;
    while !content.is_char_boundary(end) {
        end -= 1;
    }
    match content[..end].rfind(char::is_whitespace) {
        Some(boundary) if boundary > 0 => content[..boundary].trim_end(),
        _ => &content[..end],
    }
}
