//! The scrubbing pass that removes every trace of the recache mechanism from
//! text before it is shown to the model again: the invocation itself, the
//! command vocabulary, and any numeric shapes a model could read as register
//! positions. Deliberately aggressive; false positives in prose cost less
//! than the model re-learning the mechanism from its own transcript.

use regex::Regex;

use super::detect_all;

pub struct Neuralyzer {
    surface_call: Regex,
    slash_forms: Regex,
    vocabulary: Regex,
    command_tags: Regex,
    numeric_rules: Vec<Regex>,
    window_sentence: Regex,
    space_runs: Regex,
    punct_only_lines: Regex,
    blank_runs: Regex,
}

impl Default for Neuralyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl Neuralyzer {
    pub fn new() -> Self {
        let compile = |pattern: &str| Regex::new(pattern).expect("scrub pattern must compile");
        Self {
            surface_call: compile(r"recache_message_array\s*\([^)]*\)"),
            slash_forms: compile(r"/(?:restore|newchat)\s+\d+"),
            vocabulary: compile(
                r"(?i)\b(?:restore|newchat|new chat|cache_read|cache_write|foundation|append)\b",
            ),
            command_tags: compile(
                r"(?s)<(recache_message_array|message_indices)>.*?</(recache_message_array|message_indices)>",
            ),
            numeric_rules: vec![
                // Bracketed or braced position groups: [3], [1-4, 7], {2,5}.
                compile(r"\[\s*\d+(?:\s*[-,]\s*\d+)*\s*\]"),
                compile(r"\{\s*\d+(?:\s*[-,]\s*\d+)*\s*\}"),
                // Parenthesized single positions or ranges: (7), (2-5).
                compile(r"\(\s*\d+(?:\s*-\s*\d+)?\s*\)"),
                // Comma-separated number lists.
                compile(r"\b\d+(?:\s*,\s*\d+)+\b"),
                // "Message 7:" / "Messages 2-5:" prefixes.
                compile(r"(?i)\bmessages?\s+\d+(?:\s*-\s*\d+)?\s*:"),
                // "3-9 entries" phrasing.
                compile(r"\b\d+\s*-\s*\d+\s+entries\b"),
                // Number-prefixed list items at line start.
                compile(r"(?m)^\s*\d+[.)]\s+"),
                // Bare numbers bounded by non-word characters.
                compile(r"\b\d+\b"),
            ],
            window_sentence: compile(r"(?is)[^.]*\bcontext window\b[^.]*\.?"),
            space_runs: compile(r"[ \t]{2,}"),
            punct_only_lines: compile(r"(?m)^[ \t]*[\p{P}\p{S}]+[ \t]*$\n?"),
            blank_runs: compile(r"\n{3,}"),
        }
    }

    /// Full scrub: invocation blocks, surface forms, vocabulary, slash forms,
    /// command tags, numeric references, window talk, then whitespace repair.
    /// Removals run in that order so earlier rules see intact structure.
    pub fn scrub(&self, text: &str) -> String {
        let mut out = self.remove_invocation_blocks(text);
        out = self.surface_call.replace_all(&out, "").into_owned();
        out = self.vocabulary.replace_all(&out, "").into_owned();
        out = self.slash_forms.replace_all(&out, "").into_owned();
        out = self.command_tags.replace_all(&out, "").into_owned();
        for rule in &self.numeric_rules {
            out = rule.replace_all(&out, "").into_owned();
        }
        out = self.window_sentence.replace_all(&out, "").into_owned();
        self.tidy(&out)
    }

    /// Cut every recognized wrapper block out of the text, keeping the
    /// surrounding prose.
    pub fn remove_invocation_blocks(&self, text: &str) -> String {
        let invocations = detect_all(text);
        if invocations.is_empty() {
            return text.to_string();
        }
        let mut out = String::with_capacity(text.len());
        let mut last_end = 0;
        for invocation in invocations {
            let (start, end) = invocation.span;
            if start < last_end {
                continue;
            }
            out.push_str(&text[last_end..start]);
            last_end = end;
        }
        out.push_str(&text[last_end..]);
        out
    }

    fn tidy(&self, text: &str) -> String {
        let mut out = self.space_runs.replace_all(text, " ").into_owned();
        out = self.punct_only_lines.replace_all(&out, "").into_owned();
        out = self.blank_runs.replace_all(&out, "\n\n").into_owned();
        out.trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::xml_parser::tests_support as xml;

    fn scrub(text: &str) -> String {
        Neuralyzer::new().scrub(text)
    }

    #[test]
    fn removes_xml_invocation_and_keeps_prose() {
        let text = format!(
            "I kept the early questions.\n{}\nThe rest can go.",
            xml::wrapped(r#"{"messages":"1-2,7"}"#)
        );
        let out = scrub(&text);
        assert!(!out.contains("use_mcp_tool"));
        assert!(!out.contains("recache_message_array"));
        assert!(out.contains("I kept the early questions."));
        assert!(out.contains("The rest can go."));
    }

    #[test]
    fn removes_surface_call_form() {
        let out = scrub("calling recache_message_array({\"messages\": \"1-3\"}) now");
        assert!(!out.contains("recache_message_array"));
    }

    #[test]
    fn removes_command_vocabulary() {
        let out = scrub("I will restore the foundation and append to the new chat");
        for word in ["restore", "foundation", "append", "new chat"] {
            assert!(!out.contains(word), "{word:?} survived: {out:?}");
        }
    }

    #[test]
    fn removes_slash_forms() {
        let out = scrub("try /restore 12 or /newchat 3");
        assert!(!out.contains("12"));
        assert!(!out.contains('3'));
    }

    #[test]
    fn removes_index_tags_with_contents() {
        let out = scrub("keep <message_indices>1,2,3</message_indices> this");
        assert!(!out.contains("message_indices"));
        assert!(!out.contains("1,2,3"));
        assert!(out.contains("keep"));
        assert!(out.contains("this"));
    }

    #[test]
    fn removes_numeric_references() {
        let out = scrub("see [3] and {4,5} and (6-9) plus 10, 11, 12 done");
        assert!(!out.chars().any(|c| c.is_ascii_digit()), "digits survived: {out:?}");
        assert!(out.contains("see"));
        assert!(out.contains("done"));
    }

    #[test]
    fn removes_message_prefixes_and_entry_counts() {
        let out = scrub("Message 7: hello. Keeping 3-9 entries around.");
        assert!(!out.contains("Message 7"));
        assert!(!out.contains("entries"));
        assert!(out.contains("hello"));
    }

    #[test]
    fn removes_numbered_list_markers() {
        let out = scrub("1. first\n2) second\nplain line");
        assert!(out.contains("first"));
        assert!(out.contains("second"));
        assert!(!out.contains("1."));
        assert!(!out.contains("2)"));
    }

    #[test]
    fn removes_context_window_sentences() {
        let out = scrub("Fine so far. The context window is nearly full. Moving on.");
        assert!(!out.to_lowercase().contains("context window"));
        assert!(out.contains("Fine so far."));
        assert!(out.contains("Moving on."));
    }

    #[test]
    fn tidies_leftover_whitespace() {
        let out = scrub("a    b\n\n\n\n,;\nc");
        assert!(!out.contains("    "));
        assert!(!out.contains("\n\n\n"));
        assert!(!out.contains(",;"));
    }
}
