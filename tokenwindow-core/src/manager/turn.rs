//! The per-turn pipeline, in strict order: tool-result swap, command
//! detection, register append, validation, application, reconstruction,
//! accounting, oversize handling, JIT, render.

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::cache;
use crate::command::validate::PlaceholderMatcher;
use crate::command::{
    detect_invocation, parse_position_list, validate_positions, RecacheInvocation, ValidationError,
};
use crate::message::{ChatMessage, Role, TurnOutput};
use crate::prompt::jit::{is_recache_tool_result, JitInjector};
use crate::prompt::system;
use crate::window::oversize::offload_oversized;
use crate::window::reconstruct::{rebuild, Selection};
use crate::window::register::RegisterRole;
use crate::window::state::ConversationState;

use super::TokenWindowManager;

const ERROR_RESULT_PREFIX: &str = "[use_mcp_tool] Result: ERROR: ";

pub(super) fn run_turn(
    manager: &TokenWindowManager,
    state: &mut ConversationState,
    conversation_id: &str,
    mut messages: Vec<ChatMessage>,
    bot_id: Option<&str>,
) -> Result<TurnOutput> {
    let external = messages
        .iter()
        .any(|m| m.source.as_deref() == Some("api"));

    let mut system_text = manager.system_loader.load(external)?;
    if let Some(bot_id) = bot_id {
        system_text = system::apply_role_hint(&system_text, bot_id);
    }

    let old_breakpoint = state.cache_breakpoint;

    if messages.is_empty() && state.store.in_window_len() == 0 {
        state.last_cache_stats = Default::default();
        return Ok(TurnOutput {
            messages: Vec::new(),
            system_prompt: system::render(system_text, state.system2_content.as_deref()),
        });
    }

    swap_tool_results(manager, state, conversation_id, &mut messages);

    // Detect without validating, and scrub the invocation out of the reply
    // before it is ever stored. Success or error, the text the model sees
    // again must not teach it its own mechanism back.
    let mut command: Option<RecacheInvocation> = None;
    if let Some(last_assistant) = messages.iter_mut().rev().find(|m| m.role == Role::Assistant) {
        if let Some(invocation) = detect_invocation(&last_assistant.content) {
            debug!(
                conversation_id,
                wrapper = ?invocation.wrapper,
                raw = %invocation.raw_arguments,
                "detected recache invocation"
            );
            last_assistant.content = manager.neuralyzer.scrub(&last_assistant.content);
            command = Some(invocation);
        }
    }

    append_new_tail(state, &messages);

    let mut retained_prefix = None;
    if let Some(invocation) = command {
        match evaluate_command(manager, state, &invocation) {
            CommandOutcome::Ignored => {}
            CommandOutcome::Applied { retained } => {
                retained_prefix = retained;
                state.current_mcp_error = None;
                state.error_streak = 0;
                state.error_stack.clear();
                manager.diag.record(
                    "RECACHE_APPLIED",
                    &format!(
                        "conversation={conversation_id} window={} retained_prefix={:?}",
                        state.store.in_window_len(),
                        retained_prefix
                    ),
                );
            }
            CommandOutcome::Rejected(error) => {
                surface_error(manager, state, conversation_id, &error);
            }
        }
    }

    let update = {
        let registers = state.store.in_window();
        cache::account(
            &registers,
            old_breakpoint,
            retained_prefix,
            manager.counter.as_ref(),
        )
    };
    state.cache_breakpoint = update.new_breakpoint;
    state.last_cache_stats = update.stats;

    let offloaded = offload_oversized(
        state.store.registers_mut(),
        conversation_id,
        manager.counter.as_ref(),
        &manager.config.oversized_message_handling,
        manager.config.max_window_size,
        &manager.base_dir,
    )?;
    if !offloaded.is_empty() {
        manager.diag.record(
            "OVERSIZE_OFFLOAD",
            &format!("conversation={conversation_id} positions={offloaded:?}"),
        );
    }

    let injector = JitInjector {
        config: &manager.config.jit_instruction,
        truncation: &manager.config.user_message_truncation,
        cleaning: &manager.cleaning,
        counter: manager.counter.as_ref(),
        neuralyzer: &manager.neuralyzer,
        base_dir: &manager.base_dir,
        max_window_size: manager.config.max_window_size,
    };
    let jit = injector.run(state, &system_text, external)?;
    if jit.injected || jit.cleaned_previous {
        manager.diag.record(
            "JIT",
            &format!(
                "conversation={conversation_id} injected={} cleaned={} usage={}%",
                jit.injected, jit.cleaned_previous, jit.percentage
            ),
        );
    }

    info!(
        conversation_id,
        window = state.store.in_window_len(),
        breakpoint = state.cache_breakpoint,
        usage_percent = jit.percentage,
        "turn complete"
    );

    Ok(TurnOutput {
        messages: state.store.to_messages(),
        system_prompt: system::render(system_text, state.system2_content.as_deref()),
    })
}

/// Restore a displaced user question when its JIT round trip completed: the
/// client echoed a recache tool result and a preserved user is pending.
fn swap_tool_results(
    manager: &TokenWindowManager,
    state: &mut ConversationState,
    conversation_id: &str,
    messages: &mut [ChatMessage],
) {
    for message in messages.iter_mut().filter(|m| m.role == Role::User) {
        if !is_recache_tool_result(&message.content) {
            continue;
        }
        let Some(preserved) = state.preserved_user.take() else {
            continue;
        };
        message.content = preserved.text;
        state.error_streak = 0;
        state.error_stack.clear();
        manager.diag.record(
            "TOOL_RESULT_SWAP",
            &format!("conversation={conversation_id} restored preserved user message"),
        );
    }
}

/// The client resends its full view every turn; only the tail beyond what the
/// store already holds is new.
fn append_new_tail(state: &mut ConversationState, messages: &[ChatMessage]) {
    let existing = state.store.in_window_len() as usize;
    let non_system: Vec<ChatMessage> = messages
        .iter()
        .filter(|m| m.role != Role::System)
        .cloned()
        .collect();
    if non_system.len() > existing {
        state.store.append_from_client(&non_system[existing..]);
    }
}

enum CommandOutcome {
    /// Parse-level failure: no recache applied, nothing surfaced.
    Ignored,
    Applied {
        retained: Option<u32>,
    },
    Rejected(ValidationError),
}

fn evaluate_command(
    manager: &TokenWindowManager,
    state: &mut ConversationState,
    invocation: &RecacheInvocation,
) -> CommandOutcome {
    let Some(arguments) = invocation.arguments.as_ref() else {
        warn!(raw = %invocation.raw_arguments, "malformed recache arguments ignored");
        manager
            .diag
            .record("RECACHE_PARSE_ERROR", &invocation.raw_arguments);
        return CommandOutcome::Ignored;
    };

    let messages_field = arguments.get("messages").and_then(|v| v.as_str());
    let Some(list) = messages_field.filter(|s| !s.trim().is_empty()) else {
        return CommandOutcome::Rejected(ValidationError::EmptyArguments);
    };

    let specs = parse_position_list(list);
    let matcher =
        PlaceholderMatcher::from_template(&manager.config.placeholder_messages.template);
    {
        let registers = state.store.in_window();
        if let Err(error) = validate_positions(&specs, &registers, &matcher) {
            return CommandOutcome::Rejected(error);
        }
    }

    let selections: Vec<Selection> = {
        let registers = state.store.in_window();
        specs
            .iter()
            .map(|spec| {
                let register = registers[(spec.position - 1) as usize];
                Selection {
                    position_in_store: register.position,
                    role: register.role,
                    content: register.content.clone(),
                    is_placeholder: matcher.is_placeholder(register),
                }
            })
            .collect()
    };

    let cleaned_tail = state
        .store
        .in_window()
        .iter()
        .rev()
        .find(|r| r.role == RegisterRole::Assistant)
        .map(|r| r.content.clone())
        .unwrap_or_default();

    let anchor = match state.preserved_user.take() {
        Some(preserved) => preserved.text,
        None => state
            .store
            .in_window()
            .iter()
            .rev()
            .find(|r| r.role == RegisterRole::User)
            .map(|r| r.content.clone())
            .unwrap_or_default(),
    };

    let rebuilt = rebuild(
        &selections,
        &cleaned_tail,
        &anchor,
        &manager.config.placeholder_messages,
    );
    let retained = retained_prefix_len(&specs.iter().map(|s| s.position).collect::<Vec<_>>());
    state.store.replace_all(rebuilt);

    CommandOutcome::Applied { retained }
}

/// Longest prefix of the sorted selection equal to `1..=R`; the span that is
/// still cache-hot after the rebuild.
fn retained_prefix_len(positions: &[u32]) -> Option<u32> {
    let mut retained = 0;
    for (index, &position) in positions.iter().enumerate() {
        if position == index as u32 + 1 {
            retained = position;
        } else {
            break;
        }
    }
    (retained > 0).then_some(retained)
}

/// Write the validation failure into the latest user register as a synthetic
/// tool result, and arm the error bookkeeping for the next JIT block.
fn surface_error(
    manager: &TokenWindowManager,
    state: &mut ConversationState,
    conversation_id: &str,
    error: &ValidationError,
) {
    let rendered = error.to_string();
    if let Some(register) = state.store.last_register_mut(RegisterRole::User) {
        register.content = format!("{ERROR_RESULT_PREFIX}{rendered}");
    }
    state.error_streak += 1;
    if let Some(preserved) = &state.preserved_user {
        state.error_stack.push(preserved.text.clone());
    }
    state.current_mcp_error = Some(rendered.clone());
    manager.diag.record(
        "RECACHE_REJECTED",
        &format!(
            "conversation={conversation_id} streak={}\n{rendered}",
            state.error_streak
        ),
    );
}
