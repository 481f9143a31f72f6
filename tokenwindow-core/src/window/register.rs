use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::message::Role;

/// Role of a register. System content never enters the register stream, so
/// this is deliberately narrower than the wire-level [`Role`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegisterRole {
    User,
    Assistant,
}

impl RegisterRole {
    pub fn from_role(role: Role) -> Option<Self> {
        match role {
            Role::User => Some(RegisterRole::User),
            Role::Assistant => Some(RegisterRole::Assistant),
            Role::System => None,
        }
    }

    pub fn to_role(self) -> Role {
        match self {
            RegisterRole::User => Role::User,
            RegisterRole::Assistant => Role::Assistant,
        }
    }
}

impl std::fmt::Display for RegisterRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegisterRole::User => write!(f, "user"),
            RegisterRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// Pointer to the on-disk copy of an oversized register's original content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OffloadRef {
    pub path: PathBuf,
    pub original_token_count: u32,
}

/// One turn-sized unit of the conversation window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Register {
    /// 1-based position within the visible window, densely renumbered after
    /// every rebuild.
    pub position: u32,
    pub role: RegisterRole,
    pub content: String,
    /// Registers dropped by a reshape are retained with `false`; their
    /// positions are never reused within an unbroken sequence.
    pub in_window: bool,
    /// Synthesized by the reconstructor purely to preserve alternation.
    pub placeholder: bool,
    /// The scrubbed assistant tail carried through a rebuild.
    pub distilled: bool,
    pub offload: Option<OffloadRef>,
    /// For registers carried through a reshape, the position they held
    /// before the rebuild.
    pub origin_position: Option<u32>,
}

impl Register {
    pub fn new(position: u32, role: RegisterRole, content: impl Into<String>) -> Self {
        Self {
            position,
            role,
            content: content.into(),
            in_window: true,
            placeholder: false,
            distilled: false,
            offload: None,
            origin_position: None,
        }
    }

    pub fn synthesized_placeholder(role: RegisterRole) -> Self {
        let mut register = Self::new(0, role, "");
        register.placeholder = true;
        register
    }
}
