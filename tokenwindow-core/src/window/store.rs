use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use crate::message::ChatMessage;
use crate::window::register::{Register, RegisterRole};

/// Append-only register log for one conversation.
///
/// Positions are handed out densely and never reused within an unbroken
/// sequence; `replace_all` starts a fresh sequence (rebuilds renumber from 1).
#[derive(Debug)]
pub struct RegisterStore {
    registers: Vec<Register>,
    next_position: u32,
}

impl Default for RegisterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterStore {
    pub fn new() -> Self {
        Self {
            registers: Vec::new(),
            next_position: 1,
        }
    }

    /// Append the given client messages as in-window registers. System-role
    /// entries are dropped and window-usage chatter is stripped first.
    ///
    /// No deduplication happens here; the orchestrator slices the client's
    /// full resend down to the new tail before calling this.
    pub fn append_from_client(&mut self, messages: &[ChatMessage]) {
        for message in messages {
            let Some(role) = RegisterRole::from_role(message.role) else {
                continue;
            };
            let content = strip_context_usage(&message.content);
            let position = self.next_position;
            self.next_position += 1;
            self.registers.push(Register::new(position, role, content));
        }
        debug!(
            appended = messages.len(),
            total = self.registers.len(),
            "appended client messages"
        );
    }

    pub fn in_window(&self) -> Vec<&Register> {
        self.registers.iter().filter(|r| r.in_window).collect()
    }

    pub fn in_window_len(&self) -> u32 {
        self.registers.iter().filter(|r| r.in_window).count() as u32
    }

    pub fn register_at(&self, position: u32) -> Option<&Register> {
        self.registers
            .iter()
            .find(|r| r.in_window && r.position == position)
    }

    pub fn last_register_mut(&mut self, role: RegisterRole) -> Option<&mut Register> {
        self.registers
            .iter_mut()
            .rev()
            .find(|r| r.in_window && r.role == role)
    }

    /// Mutable walk over the in-window sequence, oldest first.
    pub fn in_window_mut(&mut self) -> impl Iterator<Item = &mut Register> {
        self.registers.iter_mut().filter(|r| r.in_window)
    }

    /// The full backing slice, in-window or not.
    pub fn registers_mut(&mut self) -> &mut [Register] {
        &mut self.registers
    }

    /// Replace the visible sequence with a freshly rebuilt one. The previous
    /// sequence is discarded in full; position numbering restarts after it.
    pub fn replace_all(&mut self, registers: Vec<Register>) {
        self.next_position = registers.len() as u32 + 1;
        self.registers = registers;
    }

    pub fn reset(&mut self) {
        self.registers.clear();
        self.next_position = 1;
    }

    /// Render the in-window sequence as outbound messages.
    pub fn to_messages(&self) -> Vec<ChatMessage> {
        self.in_window()
            .into_iter()
            .map(|r| ChatMessage::new(r.role.to_role(), r.content.clone()))
            .collect()
    }
}

fn usage_patterns() -> &'static Vec<Regex> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        // Overlapping on purpose: upstream renderers vary in how they print
        // the usage section, and a partial strip breaks prefix caching.
        [
            r"# Context Window Usage\n[^\n]*\n*",
            r"\d+\s*/\s*\d+K?\s*tokens\s*used\s*\(\d+%\)\s*\n*",
            r"# Context Window Usage\s*\n*",
            r"(?m)^.*tokens used.*$\n?",
            r"(?m)^.*\(\d+%\).*$\n?",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("usage pattern must compile"))
        .collect()
    })
}

/// Delete every variant of the "Context Window Usage" section the model's own
/// chatter may carry, then collapse the blank lines left behind.
pub fn strip_context_usage(text: &str) -> String {
    let mut out = text.to_string();
    for pattern in usage_patterns() {
        out = pattern.replace_all(&out, "").into_owned();
    }
    static BLANKS: OnceLock<Regex> = OnceLock::new();
    let blanks = BLANKS.get_or_init(|| Regex::new(r"\n{3,}").expect("blank pattern must compile"));
    blanks.replace_all(&out, "\n\n").into_owned()
}
