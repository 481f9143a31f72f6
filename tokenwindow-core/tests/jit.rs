
use fixture::{padded, Fixture, JIT_PROMPT};
use tokenwindow_core::ChatMessage;

fn xml_command(messages: &str) -> String {
    format!(
        "<use_mcp_tool>\n<server_name>tokenwindow-local</server_name>\n\
         <tool_name>recache_message_array</tool_name>\n\
         <arguments>{{\"messages\": \"{messages}\"}}</arguments>\n</use_mcp_tool>"
    )
}

/// Four messages of 760 tokens total; with a 39-token final user and the
/// one-token system prompt the turn lands exactly on 80% of the 1000-token
/// window.
fn heavy_history(final_user: String) -> Vec<ChatMessage> {
    vec![
        ChatMessage::user(padded("alpha ", 240)),
        ChatMessage::assistant(padded("bravo ", 240)),
        ChatMessage::user(padded("charlie ", 240)),
        ChatMessage::assistant(padded("delta ", 40)),
        ChatMessage::user(final_user),
    ]
}

#[tokio::test]
async fn threshold_hit_injects_prompt_and_register_map() {
    let fx = Fixture::new();

    let out = fx
        .manager
        .process_request("conv", heavy_history(padded("what is the plan?", 39)), None)
        .await
        .unwrap();

    let last = out.messages.last().unwrap();
    assert!(last.content.starts_with("ATTENTION WINDOW STEWARD"));
    assert!(last.content.contains("Current window:"));
    assert!(last.content.contains("[1] user"));

    let snapshot = fx.manager.get_window_state("conv").await.unwrap();
    assert!(snapshot.jit_active);
    assert_eq!(snapshot.jit_injection_index, Some(5));
    assert!(snapshot.preserved_user.is_some());
}

#[tokio::test]
async fn threshold_exactly_met_injects_just_under_does_not() {
    let fx = Fixture::new();

    // 799 conversation tokens + 1 system token = exactly 80%.
    fx.manager
        .process_request("at", heavy_history(padded("q", 39)), None)
        .await
        .unwrap();
    assert!(fx.manager.get_window_state("at").await.unwrap().jit_active);

    // 793 + 1 = 794 tokens → 79% after rounding.
    let original = padded("q", 33);
    let out = fx
        .manager
        .process_request("under", heavy_history(original.clone()), None)
        .await
        .unwrap();
    assert!(!fx.manager.get_window_state("under").await.unwrap().jit_active);
    assert_eq!(out.messages.last().unwrap().content, original);
}

#[tokio::test]
async fn jit_block_is_cleaned_next_turn_without_recache() {
    let fx = Fixture::new();
    let out = fx
        .manager
        .process_request("conv", heavy_history(padded("question", 39)), None)
        .await
        .unwrap();
    assert!(out.messages.last().unwrap().content.contains(JIT_PROMPT));

    let mut history = out.messages.clone();
    history.push(ChatMessage::assistant("understood"));
    history.push(ChatMessage::user("carry on"));
    let out = fx
        .manager
        .process_request("conv", history, None)
        .await
        .unwrap();

    assert!(out
        .messages
        .iter()
        .all(|m| !m.content.contains("ATTENTION WINDOW STEWARD")));
    let snapshot = fx.manager.get_window_state("conv").await.unwrap();
    assert!(!snapshot.jit_active);
}

#[tokio::test]
async fn jit_round_trip_restores_preserved_user_through_recache() {
    let fx = Fixture::new();
    let original = padded("what is the plan?", 39);
    let out = fx
        .manager
        .process_request("conv", heavy_history(original.clone()), None)
        .await
        .unwrap();
    assert!(out.messages.last().unwrap().content.contains(JIT_PROMPT));

    // The model answers the JIT block with a recache; the client appends the
    // tool result as a new user message. The swap restores the displaced
    // question, and the rebuild anchors on it.
    let mut history = out.messages.clone();
    history.push(ChatMessage::assistant(format!(
        "keeping the start\n{}",
        xml_command("1")
    )));
    history.push(ChatMessage::user(
        "[use_mcp_tool for 'tokenwindow-local: recache_message_array'] Result: ok",
    ));
    let out = fx
        .manager
        .process_request("conv", history, None)
        .await
        .unwrap();

    assert_eq!(out.messages.len(), 3);
    let last = out.messages.last().unwrap();
    assert!(last.content.contains("what is the plan?"));
    assert!(!last.content.contains("Result:"));

    let snapshot = fx.manager.get_window_state("conv").await.unwrap();
    assert!(snapshot.preserved_user.is_none());
    assert!(!snapshot.jit_active);
    assert_eq!(snapshot.error_streak, 0);
}

#[tokio::test]
async fn mcp_error_is_prepended_to_next_jit_block() {
    let fx = Fixture::new();

    let mut history = vec![
        ChatMessage::user("first question"),
        ChatMessage::assistant(xml_command("40")),
        ChatMessage::user("second question"),
    ];
    fx.manager
        .process_request("conv", history.clone(), None)
        .await
        .unwrap();
    assert_eq!(
        fx.manager.get_window_state("conv").await.unwrap().error_streak,
        1
    );

    history.push(ChatMessage::assistant(padded("echo ", 240)));
    history.push(ChatMessage::user(padded("foxtrot ", 240)));
    fx.manager
        .process_request("conv", history.clone(), None)
        .await
        .unwrap();

    history.push(ChatMessage::assistant(padded("golf ", 240)));
    history.push(ChatMessage::user(padded("hotel ", 60)));
    let out = fx
        .manager
        .process_request("conv", history, None)
        .await
        .unwrap();

    let last = out.messages.last().unwrap();
    assert!(last.content.starts_with("PREVIOUS MCP ERROR: "));
    assert!(last.content.contains("INVALID MESSAGE NUMBERS"));
    assert!(last.content.contains(JIT_PROMPT));
}

#[tokio::test]
async fn oversized_latest_user_is_truncated_below_threshold() {
    let fx = Fixture::with_config(serde_json::json!({
        "maxWindowSize": 1000,
        "JITinstruction": {"threshold": 95, "promptFile": "data/config/prompts/jit.txt"},
        "userMessageTruncation": {"enabled": true, "tokenBuffer": 300},
        "oversizedMessageHandling": {"enabled": false}
    }));

    let out = fx
        .manager
        .process_request("conv", vec![ChatMessage::user(padded("big ", 900))], None)
        .await
        .unwrap();

    let content = &out.messages[0].content;
    assert!(content.starts_with("big "));
    assert!(content.ends_with("[message truncated to fit the context window]"));
    // Budget: 1000 window - 1 system token - 300 buffer = 699.
    assert!(content.len().div_ceil(4) <= 699);
}

#[tokio::test]
async fn usage_display_is_refreshed_not_invented() {
    let fx = Fixture::with_config(serde_json::json!({
        "maxWindowSize": 1000,
        "JITinstruction": {
            "threshold": 80,
            "promptFile": "data/config/prompts/jit.txt",
            "windowUsagePattern": {
                "detectionText": "Window usage:",
                "searchRegex": "Window usage: \\d+%",
                "replaceTemplate": "Window usage: {percentage}%"
            }
        },
        "userMessageTruncation": {"enabled": true, "tokenBuffer": 100}
    }));

    let out = fx
        .manager
        .process_request(
            "conv",
            vec![ChatMessage::user("hello\nWindow usage: 0%")],
            None,
        )
        .await
        .unwrap();
    assert!(out.messages[0].content.contains("Window usage: 1%"));

    // No marker, no display: the manager never invents it.
    let out = fx
        .manager
        .process_request(
            "other",
            vec![ChatMessage::user("plain question")],
            None,
        )
        .await
        .unwrap();
    assert_eq!(out.messages[0].content, "plain question");
}
