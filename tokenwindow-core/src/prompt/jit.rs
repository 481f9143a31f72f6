//! Just-in-time instruction injection. Once window usage crosses the
//! configured threshold, the latest user message is displaced into
//! `preserved_user` and replaced with the JIT prompt plus a register map the
//! model can pick coherent positions from. The turn after, the block is
//! cleaned back out before any new injection decision.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use regex::{Regex, RegexBuilder};
use tracing::{debug, info};

use crate::command::Neuralyzer;
use crate::settings::config::{CleaningRule, JitInstruction, UserMessageTruncation};
use crate::tokens::TokenCounter;
use crate::window::register::RegisterRole;
use crate::window::state::{ConversationState, PreserveReason, PreservedUser};

/// One compiled assistant-cleaning rule.
#[derive(Debug)]
pub struct CompiledCleaningRule {
    regex: Regex,
    replace: String,
}

/// Compile the configured cleaning table. Invalid patterns were already
/// rejected by config validation; failure here is still surfaced rather than
/// skipped so a drifted config cannot half-clean.
pub fn compile_cleaning_rules(rules: &[CleaningRule]) -> Result<Vec<CompiledCleaningRule>> {
    rules
        .iter()
        .map(|rule| {
            let regex = RegexBuilder::new(&rule.search)
                .case_insensitive(!rule.case_sensitive)
                .build()
                .with_context(|| format!("cleaning pattern {:?} does not compile", rule.search))?;
            Ok(CompiledCleaningRule {
                regex,
                replace: rule.replace.clone(),
            })
        })
        .collect()
}

pub struct JitInjector<'a> {
    pub config: &'a JitInstruction,
    pub truncation: &'a UserMessageTruncation,
    pub cleaning: &'a [CompiledCleaningRule],
    pub counter: &'a dyn TokenCounter,
    pub neuralyzer: &'a Neuralyzer,
    pub base_dir: &'a Path,
    pub max_window_size: u32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JitOutcome {
    pub injected: bool,
    pub cleaned_previous: bool,
    pub truncated_user: bool,
    pub percentage: u32,
}

impl JitInjector<'_> {
    /// Remove the previous turn's JIT block: the configured cleaning rules run
    /// over every in-window register, and the neuralyzer re-scrubs everything
    /// at or past the recorded injection index so stale command vocabulary in
    /// the model's own replies cannot re-prime it.
    pub fn clean_previous(&self, state: &mut ConversationState) -> bool {
        if !state.jit_active {
            return false;
        }
        let injection_index = state.jit_injection_index.unwrap_or(u32::MAX);

        for register in state.store.in_window_mut() {
            for rule in self.cleaning {
                register.content = rule
                    .regex
                    .replace_all(&register.content, rule.replace.as_str())
                    .into_owned();
            }
            if register.position >= injection_index {
                register.content = self.neuralyzer.scrub(&register.content);
            }
        }

        state.jit_active = false;
        state.jit_injection_index = None;
        debug!(injection_index, "cleaned previous JIT block");
        true
    }

    /// The post-reconstruction decision: inject at or above the threshold,
    /// otherwise truncate an over-budget latest user message, otherwise keep
    /// the usage display current.
    pub fn run(
        &self,
        state: &mut ConversationState,
        system_prompt_text: &str,
        external: bool,
    ) -> Result<JitOutcome> {
        let mut outcome = JitOutcome {
            cleaned_previous: self.clean_previous(state),
            ..Default::default()
        };

        let system_tokens = self.counter.count_tokens(system_prompt_text);
        let conversation_tokens: u32 = state
            .store
            .in_window()
            .iter()
            .map(|r| self.counter.count_tokens(&r.content))
            .sum();
        let total_tokens = system_tokens + conversation_tokens;
        outcome.percentage =
            ((total_tokens as f64 * 100.0) / self.max_window_size as f64).round() as u32;

        if outcome.percentage >= self.config.threshold {
            self.inject(state, external, outcome.percentage)?;
            outcome.injected = true;
            return Ok(outcome);
        }

        let last_user_tokens = state
            .store
            .last_register_mut(RegisterRole::User)
            .map(|r| self.counter.count_tokens(&r.content))
            .unwrap_or(0);
        let other_tokens = conversation_tokens.saturating_sub(last_user_tokens);
        let budget = self
            .max_window_size
            .saturating_sub(system_tokens)
            .saturating_sub(self.truncation.token_buffer)
            .saturating_sub(other_tokens);

        if self.truncation.enabled && last_user_tokens > budget {
            if let Some(register) = state.store.last_register_mut(RegisterRole::User) {
                register.content = truncate_to_budget(
                    &register.content,
                    budget,
                    self.truncation.preserve_from_start,
                    &self.truncation.truncation_indicator,
                    self.counter,
                );
                outcome.truncated_user = true;
                info!(budget, "truncated oversized latest user message");
            }
            return Ok(outcome);
        }

        self.refresh_usage_display(state, outcome.percentage);
        Ok(outcome)
    }

    fn inject(&self, state: &mut ConversationState, external: bool, percentage: u32) -> Result<()> {
        let jit_text = self.load_prompt(external)?;
        let register_map = register_map(state, self.counter);

        let preamble = match &state.current_mcp_error {
            Some(error) => format!("PREVIOUS MCP ERROR: {error}\n\n"),
            None => String::new(),
        };

        let Some(register) = state.store.last_register_mut(RegisterRole::User) else {
            return Ok(());
        };
        let position = register.position;
        let original = std::mem::replace(
            &mut register.content,
            format!("{preamble}{jit_text}\n\n{register_map}"),
        );

        state.preserved_user = Some(PreservedUser {
            text: original,
            reason: PreserveReason::JitThresholdHit,
        });
        state.jit_active = true;
        state.jit_injection_index = Some(position);
        info!(percentage, position, external, "injected JIT block");
        Ok(())
    }

    fn load_prompt(&self, external: bool) -> Result<String> {
        let path = self.prompt_path(external);
        fs::read_to_string(&path)
            .with_context(|| format!("failed to read JIT prompt from {path:?}"))
    }

    pub fn prompt_path(&self, external: bool) -> PathBuf {
        let relative = if external {
            self.config
                .external_prompt_file
                .as_deref()
                .unwrap_or(&self.config.prompt_file)
        } else {
            &self.config.prompt_file
        };
        self.base_dir.join(relative)
    }

    /// Substitute the live percentage into the usage display, when (and only
    /// when) the message already carries the marker. The manager never
    /// invents the display.
    fn refresh_usage_display(&self, state: &mut ConversationState, percentage: u32) {
        let pattern = &self.config.window_usage_pattern;
        let Ok(search) = Regex::new(&pattern.search_regex) else {
            return;
        };
        let replacement = pattern
            .replace_template
            .replace("{percentage}", &percentage.to_string());

        if let Some(register) = state.store.last_register_mut(RegisterRole::User) {
            if register.content.contains(&pattern.detection_text) {
                register.content = search
                    .replace_all(&register.content, replacement.as_str())
                    .into_owned();
            }
        }
    }
}

/// `[i] role (tokens): first-25-words` per in-window register, so the model
/// can pick coherent positions without seeing full contents.
pub fn register_map(state: &ConversationState, counter: &dyn TokenCounter) -> String {
    let mut lines = vec!["Current window:".to_string()];
    for register in state.store.in_window() {
        let head: Vec<&str> = register.content.split_whitespace().take(25).collect();
        lines.push(format!(
            "[{}] {} ({}): {}",
            register.position,
            register.role,
            counter.count_tokens(&register.content),
            head.join(" "),
        ));
    }
    lines.join("\n")
}

/// Largest prefix (or suffix) of `content` that fits `budget` together with
/// the indicator, found by binary search on the byte length.
fn truncate_to_budget(
    content: &str,
    budget: u32,
    preserve_from_start: bool,
    indicator: &str,
    counter: &dyn TokenCounter,
) -> String {
    let indicator_tokens = counter.count_tokens(indicator);
    let content_budget = budget.saturating_sub(indicator_tokens);

    let slice_at = |len: usize| -> &str {
        if preserve_from_start {
            let mut end = len;
            while !content.is_char_boundary(end) {
                end -= 1;
            }
            &content[..end]
        } else {
            let mut start = content.len() - len;
            while !content.is_char_boundary(start) {
                start += 1;
            }
            &content[start..]
        }
    };

    let mut low = 0usize;
    let mut high = content.len();
    while low < high {
        let mid = (low + high).div_ceil(2);
        if counter.count_tokens(slice_at(mid)) <= content_budget {
            low = mid;
        } else {
            high = mid - 1;
        }
    }

    format!("{}{indicator}", slice_at(low))
}

fn xml_result_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\[use_mcp_tool for [^\]]*recache_message_array[^\]]*\]\s*Result:")
            .expect("tool result pattern must compile")
    })
}

fn rpc_result_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\[[^\]]*tokenwindow-local__recache_message_array[^\]]*\]\s*Result:")
            .expect("tool result pattern must compile")
    })
}

/// Whether a user message is a recache tool result echoed back by the client.
/// A match with a preserved user pending triggers the swap that restores the
/// displaced question.
pub fn is_recache_tool_result(text: &str) -> bool {
    xml_result_pattern().is_match(text) || rpc_result_pattern().is_match(text)
}
