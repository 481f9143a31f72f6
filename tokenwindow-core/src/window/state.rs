use serde::Serialize;

use crate::message::CacheStats;
use crate::tokens::TokenCounter;
use crate::window::store::RegisterStore;

/// Why a user message was displaced into `preserved_user`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PreserveReason {
    JitThresholdHit,
}

#[derive(Debug, Clone)]
pub struct PreservedUser {
    pub text: String,
    pub reason: PreserveReason,
}

/// Everything the manager tracks for one conversation id. Created lazily on
/// first turn, mutated only by the orchestrator under the per-conversation
/// lock, torn down by an explicit `reset`.
#[derive(Debug, Default)]
pub struct ConversationState {
    pub store: RegisterStore,
    /// Original user text clobbered by a JIT injection, awaiting restoration.
    pub preserved_user: Option<PreservedUser>,
    /// 1-based position of the last user register as of the end of the
    /// previous turn. Zero means no turn has completed yet.
    pub cache_breakpoint: u32,
    pub last_cache_stats: CacheStats,
    /// Consecutive failed tool invocations.
    pub error_streak: u32,
    /// One preserved-user snapshot per errored turn.
    pub error_stack: Vec<String>,
    /// Error text to prepend to the next JIT block.
    pub current_mcp_error: Option<String>,
    /// Whether the previous turn's outbound messages contained a JIT block,
    /// and at which register position; scopes next-turn scrubbing.
    pub jit_active: bool,
    pub jit_injection_index: Option<u32>,
    /// Optional secondary cacheable system prompt.
    pub system2_content: Option<String>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self {
            store: RegisterStore::new(),
            ..Default::default()
        }
    }

    pub fn snapshot(&self, counter: &dyn TokenCounter) -> WindowSnapshot {
        let registers = self
            .store
            .in_window()
            .into_iter()
            .map(|r| RegisterSnapshot {
                position: r.position,
                role: r.role.to_string(),
                tokens: counter.count_tokens(&r.content),
                placeholder: r.placeholder,
                distilled: r.distilled,
                offloaded: r.offload.is_some(),
                preview: preview(&r.content),
            })
            .collect();
        WindowSnapshot {
            registers,
            cache_breakpoint: self.cache_breakpoint,
            last_cache_stats: self.last_cache_stats,
            error_streak: self.error_streak,
            current_mcp_error: self.current_mcp_error.clone(),
            jit_active: self.jit_active,
            jit_injection_index: self.jit_injection_index,
            preserved_user: self.preserved_user.as_ref().map(|p| p.reason),
        }
    }
}

fn preview(content: &str) -> String {
    let mut out: String = content.chars().take(60).collect();
    if content.chars().count() > 60 {
        out.push('…');
    }
    out
}

/// One register as seen by diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct RegisterSnapshot {
    pub position: u32,
    pub role: String,
    pub tokens: u32,
    pub placeholder: bool,
    pub distilled: bool,
    pub offloaded: bool,
    pub preview: String,
}

/// Diagnostic view of a conversation's window, for host UIs and debugging.
#[derive(Debug, Clone, Serialize)]
pub struct WindowSnapshot {
    pub registers: Vec<RegisterSnapshot>,
    pub cache_breakpoint: u32,
    pub last_cache_stats: CacheStats,
    pub error_streak: u32,
    pub current_mcp_error: Option<String>,
    pub jit_active: bool,
    pub jit_injection_index: Option<u32>,
    pub preserved_user: Option<PreserveReason>,
}
