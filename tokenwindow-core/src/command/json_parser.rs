//! JSON-RPC 2.0 wrapper extraction:
//! `{"jsonrpc":"2.0","method":"tools/call","params":{"name":"tokenwindow-local__recache_message_array","arguments":{…}},"id":N}`

use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use super::{RecacheInvocation, WrapperKind, TOOL_NAME};

/// Manual brace matching handles nested structures and escaped quotes that
/// regex cannot reliably parse.
fn find_json_end(text: &str, start: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    if start >= bytes.len() || bytes[start] != b'{' {
        return None;
    }

    let mut depth = 0;
    let mut in_string = false;
    let mut escape_next = false;

    for (offset, &ch) in bytes[start..].iter().enumerate() {
        if escape_next {
            escape_next = false;
            continue;
        }
        if ch == b'\\' && in_string {
            escape_next = true;
            continue;
        }
        if ch == b'"' {
            in_string = !in_string;
            continue;
        }
        if in_string {
            continue;
        }
        if ch == b'{' {
            depth += 1;
        } else if ch == b'}' {
            depth -= 1;
            if depth == 0 {
                return Some(start + offset + 1);
            }
        }
    }

    None
}

/// Linear scan from text start required because JSON string state depends on
/// all preceding characters.
fn is_inside_json_string(text: &str, pos: usize) -> bool {
    let bytes = text.as_bytes();
    let mut in_string = false;
    let mut escape_next = false;

    for (i, &ch) in bytes.iter().enumerate() {
        if i >= pos {
            return in_string;
        }
        if escape_next {
            escape_next = false;
            continue;
        }
        if ch == b'\\' && in_string {
            escape_next = true;
            continue;
        }
        if ch == b'"' {
            in_string = !in_string;
        }
    }

    in_string
}

/// Walk back from the marker to the outermost `{` whose balanced span covers
/// it, so partial JSON is never left behind in the text.
fn find_outermost_json_containing(
    text: &str,
    search_start: usize,
    marker_pos: usize,
) -> Option<(usize, usize, Value)> {
    let search_region = &text[search_start..marker_pos];

    for (offset, _) in search_region.match_indices('{') {
        let json_start = search_start + offset;
        let Some(json_end) = find_json_end(text, json_start) else {
            continue;
        };
        if json_end <= marker_pos {
            continue;
        }
        let json_str = &text[json_start..json_end];
        if let Ok(parsed) = serde_json::from_str::<Value>(json_str) {
            if is_recache_rpc(&parsed) {
                return Some((json_start, json_end, parsed));
            }
        }
    }

    None
}

fn is_recache_rpc(value: &Value) -> bool {
    let Some(obj) = value.as_object() else {
        return false;
    };
    if obj.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
        return false;
    }
    if obj.get("method").and_then(Value::as_str) != Some("tools/call") {
        return false;
    }
    obj.get("params")
        .and_then(|p| p.get("name"))
        .and_then(Value::as_str)
        .is_some_and(|name| name.ends_with(TOOL_NAME))
}

/// Scan for JSON-RPC `tools/call` envelopes naming the recache tool.
pub fn scan(text: &str) -> Vec<RecacheInvocation> {
    let mut found = Vec::new();
    // Quotes included so the marker position sits outside the method string,
    // keeping the inside-string check meaningful.
    let marker = "\"tools/call\"";
    let mut search_pos = 0;
    let mut region_start = 0;

    while let Some(marker_pos) = text[search_pos..].find(marker) {
        let abs_marker_pos = search_pos + marker_pos;

        // Prevents extraction when envelope syntax appears inside a string
        // value of some larger structure.
        if is_inside_json_string(text, abs_marker_pos) {
            search_pos = abs_marker_pos + marker.len();
            continue;
        }

        let Some((json_start, json_end, parsed)) =
            find_outermost_json_containing(text, region_start, abs_marker_pos)
        else {
            search_pos = abs_marker_pos + marker.len();
            continue;
        };

        let arguments = parsed
            .get("params")
            .and_then(|p| p.get("arguments"))
            .cloned()
            .unwrap_or_else(|| Value::Object(serde_json::Map::new()));
        let raw_arguments = arguments.to_string();

        found.push(RecacheInvocation {
            id: Uuid::new_v4().to_string(),
            wrapper: WrapperKind::JsonRpc,
            raw_arguments,
            arguments: Some(arguments),
            span: (json_start, json_end),
        });

        search_pos = json_end;
        region_start = json_end;
    }

    debug!(count = found.len(), "scanned text for JSON-RPC invocations");
    found
}
