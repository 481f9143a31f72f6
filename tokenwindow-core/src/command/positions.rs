//! The position-list grammar: `POSITION := INT | INT "-" INT`,
//! `LIST := POSITION ("," POSITION)*`, arbitrary whitespace, garbage tokens
//! silently dropped. The parser is deliberately lax: a model that gets the
//! punctuation slightly wrong should still be understood.

use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

/// One requested register position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionSpec {
    pub position: u32,
    /// Whether the position came out of a range expansion. Range-expanded
    /// positions are allowed to land on placeholders; individually chosen
    /// ones are not.
    pub from_range: bool,
    /// The token this position came from, for diagnostics.
    pub source_token: String,
}

fn range_pattern() -> &'static Regex {
    static RANGE: OnceLock<Regex> = OnceLock::new();
    RANGE.get_or_init(|| Regex::new(r"^(\d+)-(\d+)$").expect("range pattern must compile"))
}

/// Parse a position-list string. Duplicates collapse keeping the first
/// occurrence's tag; the result is sorted ascending.
pub fn parse_position_list(input: &str) -> Vec<PositionSpec> {
    let mut specs: Vec<PositionSpec> = Vec::new();

    for token in input.split(',') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }

        if let Some(captures) = range_pattern().captures(token) {
            let start: Option<u32> = captures[1].parse().ok();
            let end: Option<u32> = captures[2].parse().ok();
            let (Some(start), Some(end)) = (start, end) else {
                debug!(token, "range bounds out of representable range, skipped");
                continue;
            };
            if start > end {
                debug!(token, "inverted range, skipped");
                continue;
            }
            for position in start..=end {
                push_unique(&mut specs, position, true, token);
            }
        } else if token.chars().all(|c| c.is_ascii_digit()) {
            match token.parse::<u32>() {
                Ok(position) => push_unique(&mut specs, position, false, token),
                Err(_) => debug!(token, "position out of representable range, skipped"),
            }
        } else {
            debug!(token, "unrecognized position token, skipped");
        }
    }

    specs.sort_by_key(|s| s.position);
    specs
}

fn push_unique(specs: &mut Vec<PositionSpec>, position: u32, from_range: bool, token: &str) {
    if specs.iter().any(|s| s.position == position) {
        return;
    }
    specs.push(PositionSpec {
        position,
        from_range,
        source_token: token.to_string(),
    });
}
