//! Validation of a parsed position list against the current window. Runs
//! after newly received client messages are appended, so the count checked
//! here is the count the model was shown.

use std::fmt;

use regex::Regex;
use tracing::info;

use crate::command::positions::PositionSpec;
use crate::window::register::Register;

/// Short per-register line used when enumerating the window back to the model.
#[derive(Debug, Clone)]
pub struct RegisterSample {
    pub position: u32,
    pub role: String,
    pub preview: String,
}

#[derive(Debug, Clone)]
pub enum ValidationError {
    /// `messages` key missing or blank.
    EmptyArguments,
    /// Every token in the list was garbage.
    NoValidPositions,
    /// At least one position lies outside `1..=window_len`.
    InvalidPositions {
        invalid: Vec<u32>,
        window_len: u32,
        samples: Vec<RegisterSample>,
    },
    /// An individually selected (not range-expanded) position points at a
    /// placeholder register.
    PlaceholderSelected {
        positions: Vec<u32>,
        contents: Vec<String>,
        suggested_real_positions: Vec<u32>,
    },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::EmptyArguments => {
                write!(
                    f,
                    "EMPTY MESSAGE LIST: the messages argument was missing or blank. \
                     Provide a comma-separated list of positions such as \"1-4,25,30\"."
                )
            }
            ValidationError::NoValidPositions => {
                write!(
                    f,
                    "NO VALID MESSAGE NUMBERS: none of the provided tokens parsed as a \
                     position. Use integers or integer ranges such as \"1-4,25,30\"."
                )
            }
            ValidationError::InvalidPositions {
                invalid,
                window_len,
                samples,
            } => {
                let list = join_numbers(invalid);
                writeln!(
                    f,
                    "INVALID MESSAGE NUMBERS: {list} do not exist. Your current window \
                     has {window_len} messages (valid range: 1-{window_len}). \
                     Current messages:"
                )?;
                for sample in samples {
                    writeln!(f, "[{}] {}: {}", sample.position, sample.role, sample.preview)?;
                }
                Ok(())
            }
            ValidationError::PlaceholderSelected {
                positions,
                contents,
                suggested_real_positions,
            } => {
                let list = join_numbers(positions);
                let quoted: Vec<String> = contents.iter().map(|c| format!("{c:?}")).collect();
                write!(
                    f,
                    "PLACEHOLDER MESSAGES SELECTED: position(s) {list} hold filler \
                     content ({}) inserted only to keep turn order. Select messages \
                     with real content instead, for example: {}.",
                    quoted.join(", "),
                    join_numbers(suggested_real_positions),
                )
            }
        }
    }
}

fn join_numbers(numbers: &[u32]) -> String {
    numbers
        .iter()
        .map(|n| n.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Recognizes placeholder content: the synthesized flag, the configured
/// template with any position substituted, or the literal fallback.
pub struct PlaceholderMatcher {
    pattern: Regex,
}

impl PlaceholderMatcher {
    pub fn from_template(template: &str) -> Self {
        let escaped = regex::escape(template).replace(r"\{position\}", r"\d+");
        let pattern = Regex::new(&format!("^{escaped}$"))
            .unwrap_or_else(|_| Regex::new(r"^Message \d+$").expect("fallback must compile"));
        Self { pattern }
    }

    pub fn is_placeholder(&self, register: &Register) -> bool {
        register.placeholder
            || register.content == "DISTILLED"
            || self.pattern.is_match(&register.content)
    }
}

/// Check every requested position against the in-window registers.
pub fn validate_positions(
    specs: &[PositionSpec],
    registers: &[&Register],
    matcher: &PlaceholderMatcher,
) -> Result<(), ValidationError> {
    if specs.is_empty() {
        return Err(ValidationError::NoValidPositions);
    }

    let window_len = registers.len() as u32;
    let invalid: Vec<u32> = specs
        .iter()
        .map(|s| s.position)
        .filter(|&p| p == 0 || p > window_len)
        .collect();
    if !invalid.is_empty() {
        let samples = registers
            .iter()
            .take(10)
            .map(|r| RegisterSample {
                position: r.position,
                role: r.role.to_string(),
                preview: preview(&r.content),
            })
            .collect();
        return Err(ValidationError::InvalidPositions {
            invalid,
            window_len,
            samples,
        });
    }

    let mut placeholder_positions = Vec::new();
    let mut placeholder_contents = Vec::new();
    for spec in specs {
        let register = registers[(spec.position - 1) as usize];
        if matcher.is_placeholder(register) {
            if spec.from_range {
                // Ranges sweep placeholders up legitimately.
                info!(
                    position = spec.position,
                    token = %spec.source_token,
                    "placeholder selected via range expansion"
                );
            } else {
                placeholder_positions.push(spec.position);
                placeholder_contents.push(register.content.clone());
            }
        }
    }

    if !placeholder_positions.is_empty() {
        let suggested_real_positions = registers
            .iter()
            .filter(|r| !matcher.is_placeholder(r))
            .map(|r| r.position)
            .take(10)
            .collect();
        return Err(ValidationError::PlaceholderSelected {
            positions: placeholder_positions,
            contents: placeholder_contents,
            suggested_real_positions,
        });
    }

    Ok(())
}

fn preview(content: &str) -> String {
    let short: String = content.chars().take(30).collect();
    if content.chars().count() > 30 {
        format!("{short}…")
    } else {
        short
    }
}
