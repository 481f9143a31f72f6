use tracing::{error, warn};

use crate::settings::config::PlaceholderMessages;
use crate::window::register::{Register, RegisterRole};

/// One register chosen by position for the rebuilt window.
#[derive(Debug, Clone)]
pub struct Selection {
    pub position_in_store: u32,
    pub role: RegisterRole,
    pub content: String,
    pub is_placeholder: bool,
}

/// Rebuild a fresh, densely numbered register sequence from selected
/// registers plus the scrubbed assistant tail and the anchoring user message.
///
/// Target postconditions: odd length, begins and ends with a user register,
/// strict role alternation. Where alternation and the "never two placeholders
/// in a row" rule conflict, the placeholder rule wins and the local role
/// mismatch is accepted.
pub fn rebuild(
    selections: &[Selection],
    cleaned_assistant_tail: &str,
    anchor_user: &str,
    placeholders: &PlaceholderMessages,
) -> Vec<Register> {
    let mut working: Vec<Register> = Vec::with_capacity(selections.len() + 3);

    for selection in selections {
        let expected = expected_role(working.len());
        if placeholders.enabled && selection.role != expected && !last_is_placeholder(&working) {
            working.push(Register::synthesized_placeholder(expected));
        }
        let mut register = Register::new(0, selection.role, selection.content.clone());
        register.placeholder = selection.is_placeholder;
        register.origin_position = Some(selection.position_in_store);
        working.push(register);
    }

    let mut tail = Register::new(0, RegisterRole::Assistant, cleaned_assistant_tail);
    tail.distilled = true;
    working.push(tail);

    working.push(Register::new(0, RegisterRole::User, anchor_user));

    // An even-length result normally gets one trailing user placeholder; if
    // the last register is already a placeholder the sequence is returned
    // even-length instead, which callers tolerate better than two fillers.
    if working.len() % 2 == 0 {
        if !placeholders.enabled || last_is_placeholder(&working) {
            warn!(
                len = working.len(),
                "rebuilt window is even-length and placeholder-terminated"
            );
        } else {
            working.push(Register::synthesized_placeholder(RegisterRole::User));
        }
    }

    for (index, register) in working.iter_mut().enumerate() {
        register.position = index as u32 + 1;
        if register.placeholder && register.content.is_empty() {
            register.content = placeholders
                .template
                .replace("{position}", &register.position.to_string());
        }
    }

    for pair in working.windows(2) {
        if pair[0].placeholder && pair[1].placeholder {
            error!(
                first = pair[0].position,
                second = pair[1].position,
                "consecutive placeholder registers in rebuilt window"
            );
        }
    }

    working
}

fn expected_role(len: usize) -> RegisterRole {
    if len % 2 == 0 {
        RegisterRole::User
    } else {
        RegisterRole::Assistant
    }
}

fn last_is_placeholder(working: &[Register]) -> bool {
    working.last().is_some_and(|r| r.placeholder)
}
