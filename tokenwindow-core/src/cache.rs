//! Prefix-cache accounting. One integer per conversation, the breakpoint
//! (1-based position of the last user register as of the previous turn),
//! splits every turn's input into `cache_read` (before it) and
//! `cache_creation` (after it, through the new breakpoint).

use tracing::warn;

use crate::message::CacheStats;
use crate::tokens::TokenCounter;
use crate::window::register::{Register, RegisterRole};

/// Result of one turn's accounting.
#[derive(Debug, Clone, Copy)]
pub struct CacheUpdate {
    pub stats: CacheStats,
    pub new_breakpoint: u32,
}

/// Compute stats for the rebuilt sequence.
///
/// `retained_prefix` is set when this turn applied a recache whose selection
/// kept positions `1..=R` intact: the prefix is still cache-hot even though
/// the breakpoint may have moved backward, and reading it from the command is
/// the only way to avoid understating creation on the following turn.
pub fn account(
    registers: &[&Register],
    old_breakpoint: u32,
    retained_prefix: Option<u32>,
    counter: &dyn TokenCounter,
) -> CacheUpdate {
    let new_breakpoint = registers
        .iter()
        .rev()
        .find(|r| r.role == RegisterRole::User)
        .map(|r| r.position)
        .unwrap_or(0);

    let stats = if new_breakpoint == 0 {
        CacheStats::default()
    } else if old_breakpoint == 0 {
        CacheStats {
            cache_creation_input_tokens: span_tokens(registers, 1, new_breakpoint, counter),
            cache_read_input_tokens: 0,
        }
    } else if let Some(retained) = retained_prefix {
        CacheStats {
            cache_read_input_tokens: span_tokens(registers, 1, retained, counter),
            cache_creation_input_tokens: span_tokens(registers, retained + 1, new_breakpoint, counter),
        }
    } else {
        CacheStats {
            cache_read_input_tokens: span_tokens(registers, 1, old_breakpoint, counter),
            cache_creation_input_tokens: span_tokens(
                registers,
                old_breakpoint + 1,
                new_breakpoint,
                counter,
            ),
        }
    };

    CacheUpdate {
        stats,
        new_breakpoint,
    }
}

/// Tokens over the inclusive 1-based position span. Inverted or out-of-window
/// spans contribute zero and are logged, never raised.
fn span_tokens(registers: &[&Register], from: u32, to: u32, counter: &dyn TokenCounter) -> u32 {
    if from > to {
        if to != from - 1 {
            warn!(from, to, "inverted cache span contributes zero");
        }
        return 0;
    }
    registers
        .iter()
        .filter(|r| r.position >= from && r.position <= to)
        .map(|r| counter.count_tokens(&r.content))
        .sum()
}
