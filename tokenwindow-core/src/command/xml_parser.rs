//! XML-MCP wrapper extraction:
//! `<use_mcp_tool><server_name>…</server_name><tool_name>recache_message_array</tool_name>
//! <arguments>{…}</arguments></use_mcp_tool>`

use tracing::debug;
use uuid::Uuid;

use super::{RecacheInvocation, WrapperKind, TOOL_NAME};

/// Locate `<name>…</name>` starting at or after `from`. Returns the span of
/// the full element and the inner content slice.
fn find_tag_block<'a>(text: &'a str, name: &str, from: usize) -> Option<(usize, usize, &'a str)> {
    let open = format!("<{name}>");
    let close = format!("</{name}>");

    let open_pos = text[from..].find(&open)? + from;
    let inner_start = open_pos + open.len();
    let close_pos = text[inner_start..].find(&close)? + inner_start;

    Some((open_pos, close_pos + close.len(), &text[inner_start..close_pos]))
}

/// Scan for every `<use_mcp_tool>` block naming the recache tool. Blocks
/// naming other tools are skipped, not errors; the text is untrusted and the
/// host may route other servers' calls through the same transcript.
pub fn scan(text: &str) -> Vec<RecacheInvocation> {
    let mut found = Vec::new();
    let mut search_from = 0;

    while let Some((block_start, block_end, inner)) =
        find_tag_block(text, "use_mcp_tool", search_from)
    {
        search_from = block_end;

        let tool_name = find_tag_block(inner, "tool_name", 0).map(|(_, _, t)| t.trim());
        if tool_name != Some(TOOL_NAME) {
            continue;
        }

        let Some((_, _, raw_arguments)) = find_tag_block(inner, "arguments", 0) else {
            debug!("use_mcp_tool block without arguments element");
            continue;
        };
        let raw_arguments = raw_arguments.trim();

        let arguments = serde_json::from_str(raw_arguments).ok();
        found.push(RecacheInvocation {
            id: Uuid::new_v4().to_string(),
            wrapper: WrapperKind::XmlMcp,
            raw_arguments: raw_arguments.to_string(),
            arguments,
            span: (block_start, block_end),
        });
    }

    debug!(count = found.len(), "scanned text for XML-MCP invocations");
    found
}
