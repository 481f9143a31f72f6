//! Configuration model for `data/config/token-window.json`.
//!
//! Every key carries a serde default so a partial file loads cleanly; the
//! whole snapshot is validated once at startup and never re-read mid-process
//! (changing the window size mid-conversation would make historical cache
//! stats incoherent). Only prompt files are re-read per turn.

use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

fn default_max_window_size() -> u32 {
    128_000
}

fn default_jit_threshold() -> u32 {
    80
}

fn default_jit_prompt_file() -> String {
    "data/config/prompts/jit.txt".to_string()
}

fn default_detection_text() -> String {
    "tokens used".to_string()
}

fn default_search_regex() -> String {
    r"\d+\s*/\s*\d+K?\s*tokens\s*used\s*\(\d+%\)".to_string()
}

fn default_replace_template() -> String {
    "{percentage}% of the context window used".to_string()
}

fn default_enabled() -> bool {
    true
}

fn default_token_buffer() -> u32 {
    1_000
}

fn default_truncation_indicator() -> String {
    "\n\n[message truncated to fit the context window]".to_string()
}

fn default_preserve_from_start() -> bool {
    true
}

fn default_threshold_percent() -> u32 {
    25
}

fn default_truncate_to_tokens() -> u32 {
    100
}

fn default_temp_directory() -> String {
    "data/temp".to_string()
}

fn default_instruction_template() -> String {
    "[TRUNCATED - Full content saved to disk. Use grep, tail, head, wc, sed, awk \
     or any other tool to access: {path} without crushing your window. Do not use \
     read_file on it because I will only truncate it again. As a last resort read \
     the large file in smaller chunks.]"
        .to_string()
}

fn default_placeholder_template() -> String {
    "Message {position}".to_string()
}

/// Detection and substitution of the window-usage display inside the latest
/// user message. If the detection text is absent the manager never invents a
/// usage display.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WindowUsagePattern {
    #[serde(default = "default_detection_text")]
    pub detection_text: String,
    #[serde(default = "default_search_regex")]
    pub search_regex: String,
    /// Replacement with a `{percentage}` placeholder.
    #[serde(default = "default_replace_template")]
    pub replace_template: String,
}

impl Default for WindowUsagePattern {
    fn default() -> Self {
        Self {
            detection_text: default_detection_text(),
            search_regex: default_search_regex(),
            replace_template: default_replace_template(),
        }
    }
}

/// One search/replace pair applied when cleaning a previous JIT block out of
/// the message list.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CleaningRule {
    pub search: String,
    #[serde(default)]
    pub replace: String,
    #[serde(default = "default_enabled")]
    pub case_sensitive: bool,
}

/// Just-in-time instruction injection.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JitInstruction {
    /// Window usage percentage at which the JIT block is injected.
    #[serde(default = "default_jit_threshold")]
    pub threshold: u32,
    /// Prompt file for internal conversations.
    #[serde(default = "default_jit_prompt_file")]
    pub prompt_file: String,
    /// Prompt file for conversations originating from an external API caller.
    /// Falls back to `prompt_file` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_prompt_file: Option<String>,
    #[serde(default)]
    pub window_usage_pattern: WindowUsagePattern,
    #[serde(default)]
    pub assistant_cleaning: Vec<CleaningRule>,
}

impl Default for JitInstruction {
    fn default() -> Self {
        Self {
            threshold: default_jit_threshold(),
            prompt_file: default_jit_prompt_file(),
            external_prompt_file: None,
            window_usage_pattern: WindowUsagePattern::default(),
            assistant_cleaning: Vec::new(),
        }
    }
}

/// Truncation of a latest user message that alone exceeds its budget.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserMessageTruncation {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Tokens held back from the per-message budget for the reply.
    #[serde(default = "default_token_buffer")]
    pub token_buffer: u32,
    #[serde(default = "default_truncation_indicator")]
    pub truncation_indicator: String,
    /// Keep the head of the message (true) or the tail (false).
    #[serde(default = "default_preserve_from_start")]
    pub preserve_from_start: bool,
}

impl Default for UserMessageTruncation {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            token_buffer: default_token_buffer(),
            truncation_indicator: default_truncation_indicator(),
            preserve_from_start: default_preserve_from_start(),
        }
    }
}

/// Offloading of registers larger than a share of the window.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OversizedMessageHandling {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_threshold_percent")]
    pub threshold_percent: u32,
    /// Size of the head preview left in place of the offloaded content.
    #[serde(default = "default_truncate_to_tokens")]
    pub truncate_to_tokens: u32,
    #[serde(default = "default_temp_directory")]
    pub temp_directory: String,
    /// Stub appended after the preview; `{path}` is substituted.
    #[serde(default = "default_instruction_template")]
    pub instruction_template: String,
}

impl Default for OversizedMessageHandling {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            threshold_percent: default_threshold_percent(),
            truncate_to_tokens: default_truncate_to_tokens(),
            temp_directory: default_temp_directory(),
            instruction_template: default_instruction_template(),
        }
    }
}

/// Placeholder registers synthesized by the reconstructor.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlaceholderMessages {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_placeholder_template")]
    pub template: String,
}

impl Default for PlaceholderMessages {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            template: default_placeholder_template(),
        }
    }
}

/// Root of `token-window.json`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TokenWindowConfig {
    #[serde(default = "default_max_window_size")]
    pub max_window_size: u32,
    #[serde(rename = "JITinstruction", default)]
    pub jit_instruction: JitInstruction,
    #[serde(default)]
    pub user_message_truncation: UserMessageTruncation,
    #[serde(default)]
    pub oversized_message_handling: OversizedMessageHandling,
    #[serde(default)]
    pub placeholder_messages: PlaceholderMessages,
}

impl Default for TokenWindowConfig {
    fn default() -> Self {
        Self {
            max_window_size: default_max_window_size(),
            jit_instruction: JitInstruction::default(),
            user_message_truncation: UserMessageTruncation::default(),
            oversized_message_handling: OversizedMessageHandling::default(),
            placeholder_messages: PlaceholderMessages::default(),
        }
    }
}

impl TokenWindowConfig {
    /// Validates the snapshot. Any failure here is fatal at startup; the
    /// pipeline never runs against a degenerate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_window_size == 0 {
            return Err("maxWindowSize must be greater than zero".to_string());
        }
        if self.jit_instruction.threshold == 0 || self.jit_instruction.threshold > 100 {
            return Err(format!(
                "JITinstruction.threshold ({}) must be within 1..=100",
                self.jit_instruction.threshold
            ));
        }
        if self.oversized_message_handling.threshold_percent == 0
            || self.oversized_message_handling.threshold_percent > 100
        {
            return Err(format!(
                "oversizedMessageHandling.thresholdPercent ({}) must be within 1..=100",
                self.oversized_message_handling.threshold_percent
            ));
        }
        if self.oversized_message_handling.truncate_to_tokens == 0 {
            return Err("oversizedMessageHandling.truncateToTokens must be non-zero".to_string());
        }
        if self.placeholder_messages.template.trim().is_empty() {
            return Err("placeholderMessages.template must not be blank".to_string());
        }
        if let Err(e) = Regex::new(&self.jit_instruction.window_usage_pattern.search_regex) {
            return Err(format!(
                "JITinstruction.windowUsagePattern.searchRegex does not compile: {e}"
            ));
        }
        for rule in &self.jit_instruction.assistant_cleaning {
            if let Err(e) = Regex::new(&rule.search) {
                return Err(format!(
                    "JITinstruction.assistantCleaning pattern {:?} does not compile: {e}",
                    rule.search
                ));
            }
        }
        Ok(())
    }
}
