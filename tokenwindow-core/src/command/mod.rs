//! Detection and parsing of the one in-band command the model may emit:
//! `recache_message_array`, wrapped either as an XML MCP call or as a
//! JSON-RPC 2.0 `tools/call` envelope. Assistant text is treated as an
//! untrusted byte stream; only these two fixed wrappers are recognized and
//! malformed commands are never repaired.

pub mod json_parser;
pub mod neuralyzer;
pub mod positions;
pub mod validate;
pub mod xml_parser;

pub use neuralyzer::Neuralyzer;
pub use positions::{parse_position_list, PositionSpec};
pub use validate::{validate_positions, ValidationError};

pub const TOOL_NAME: &str = "recache_message_array";
pub const SERVER_NAME: &str = "tokenwindow-local";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrapperKind {
    XmlMcp,
    JsonRpc,
}

/// A recognized invocation found inside assistant text.
#[derive(Debug, Clone)]
pub struct RecacheInvocation {
    pub id: String,
    pub wrapper: WrapperKind,
    /// The arguments payload as it appeared in the text.
    pub raw_arguments: String,
    /// Parsed arguments object; `None` means the payload was not valid JSON
    /// (a parse error, silently ignored downstream).
    pub arguments: Option<serde_json::Value>,
    /// Byte span of the full wrapper block within the scanned text.
    pub span: (usize, usize),
}

impl RecacheInvocation {
    /// The `messages` position-list string, if the arguments carried one.
    pub fn messages_field(&self) -> Option<&str> {
        self.arguments
            .as_ref()
            .and_then(|v| v.get("messages"))
            .and_then(|v| v.as_str())
    }
}

/// Find the first invocation in either wrapper form. XML is tried first,
/// mirroring the order the wrappers are taught in the system prompt.
pub fn detect_invocation(text: &str) -> Option<RecacheInvocation> {
    let mut all = detect_all(text);
    if all.is_empty() {
        None
    } else {
        Some(all.remove(0))
    }
}

/// Every invocation in the text, ordered by span start. Used by the
/// neuralyzer to cut all wrapper blocks out.
pub fn detect_all(text: &str) -> Vec<RecacheInvocation> {
    let mut found = xml_parser::scan(text);
    found.extend(json_parser::scan(text));
    found.sort_by_key(|inv| inv.span.0);
    found
}
