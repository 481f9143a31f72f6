
use fixture::Fixture;
use tokenwindow_core::{ChatMessage, Role, TokenWindowManager};

fn xml_command(messages: &str) -> String {
    format!(
        "<use_mcp_tool>\n<server_name>tokenwindow-local</server_name>\n\
         <tool_name>recache_message_array</tool_name>\n\
         <arguments>{{\"messages\": \"{messages}\"}}</arguments>\n</use_mcp_tool>"
    )
}

fn rpc_command(messages: &str) -> String {
    format!(
        r#"{{"jsonrpc":"2.0","method":"tools/call","params":{{"name":"tokenwindow-local__recache_message_array","arguments":{{"messages":"{messages}"}}}},"id":3}}"#
    )
}

/// Drive the conversation to a nine-register window:
/// U alpha-q, A alpha-a, U beta-q, A beta-a, U gamma-q, A gamma-a,
/// U delta-q, A delta-a, U epsilon-q.
async fn nine_register_window(manager: &TokenWindowManager, id: &str) -> Vec<ChatMessage> {
    let mut history = vec![ChatMessage::user("alpha question")];
    manager
        .process_request(id, history.clone(), None)
        .await
        .unwrap();

    for (answer, question) in [
        ("alpha answer", "beta question"),
        ("beta answer", "gamma question"),
        ("gamma answer", "delta question"),
        ("delta answer", "epsilon question"),
    ] {
        history.push(ChatMessage::assistant(answer));
        history.push(ChatMessage::user(question));
        manager
            .process_request(id, history.clone(), None)
            .await
            .unwrap();
    }
    history
}

#[tokio::test]
async fn valid_recache_rebuilds_window() {
    let fx = Fixture::new();
    let mut history = nine_register_window(&fx.manager, "conv").await;

    history.push(ChatMessage::assistant(format!(
        "Keeping the early work.\n{}",
        xml_command("1-2,7")
    )));
    history.push(ChatMessage::user("final question"));

    let out = fx
        .manager
        .process_request("conv", history, None)
        .await
        .unwrap();

    assert_eq!(out.messages.len(), 5);
    assert_eq!(out.messages[0].content, "alpha question");
    assert_eq!(out.messages[1].content, "alpha answer");
    assert_eq!(out.messages[2].content, "delta question");
    assert_eq!(out.messages[4].content, "final question");

    // The assistant tail survives scrubbed: prose kept, every trace of the
    // invocation and its numbers gone.
    let tail = &out.messages[3].content;
    assert_eq!(out.messages[3].role, Role::Assistant);
    assert!(tail.contains("Keeping the early work."));
    assert!(!tail.contains("use_mcp_tool"));
    assert!(!tail.contains("recache_message_array"));
    assert!(!tail.chars().any(|c| c.is_ascii_digit()));

    // Retained prefix 1..=2 reads from cache; everything after it through the
    // new breakpoint ("delta question" + tail + anchor) is creation.
    let stats = fx.manager.get_cache_stats("conv").await;
    assert_eq!(stats.cache_read_input_tokens, 4 + 3);
    assert_eq!(stats.cache_creation_input_tokens, 4 + 6 + 4);

    let snapshot = fx.manager.get_window_state("conv").await.unwrap();
    assert_eq!(snapshot.cache_breakpoint, 5);
    assert_eq!(snapshot.error_streak, 0);
}

#[tokio::test]
async fn json_rpc_wrapper_applies_too() {
    let fx = Fixture::new();
    let out = fx
        .manager
        .process_request(
            "conv",
            vec![
                ChatMessage::user("first question"),
                ChatMessage::assistant(format!("reshaping\n{}", rpc_command("1"))),
                ChatMessage::user("second question"),
            ],
            None,
        )
        .await
        .unwrap();

    assert_eq!(out.messages.len(), 3);
    assert_eq!(out.messages[0].content, "first question");
    assert_eq!(out.messages[1].role, Role::Assistant);
    assert!(!out.messages[1].content.contains("jsonrpc"));
    assert_eq!(out.messages[2].content, "second question");
}

#[tokio::test]
async fn invalid_position_surfaces_register_enumeration() {
    let fx = Fixture::new();
    let out = fx
        .manager
        .process_request(
            "conv",
            vec![
                ChatMessage::user("first question"),
                ChatMessage::assistant("first answer"),
                ChatMessage::user("second question"),
                ChatMessage::assistant(format!("pruning\n{}", xml_command("1-4,25"))),
                ChatMessage::user("third question"),
            ],
            None,
        )
        .await
        .unwrap();

    let last = out.messages.last().unwrap();
    assert_eq!(last.role, Role::User);
    assert!(last.content.starts_with(
        "[use_mcp_tool] Result: ERROR: INVALID MESSAGE NUMBERS: 25 do not exist. \
         Your current window has 5 messages (valid range: 1-5)."
    ));
    assert!(last.content.contains("[1] user: first question"));

    let snapshot = fx.manager.get_window_state("conv").await.unwrap();
    assert_eq!(snapshot.error_streak, 1);
    assert!(snapshot.current_mcp_error.is_some());
}

#[tokio::test]
async fn placeholder_selected_individually_is_rejected() {
    let fx = Fixture::new();

    // First recache: picking two users in a row forces an assistant
    // placeholder at position 2.
    let out = fx
        .manager
        .process_request(
            "conv",
            vec![
                ChatMessage::user("first question"),
                ChatMessage::assistant("first answer"),
                ChatMessage::user("second question"),
                ChatMessage::assistant(format!("keeping questions\n{}", xml_command("1,3"))),
                ChatMessage::user("third question"),
            ],
            None,
        )
        .await
        .unwrap();
    assert_eq!(out.messages[1].content, "Message 2");

    // Second command selects that placeholder individually.
    let mut history = out.messages.clone();
    history.push(ChatMessage::assistant(xml_command("2")));
    history.push(ChatMessage::user("fourth question"));
    let out = fx
        .manager
        .process_request("conv", history, None)
        .await
        .unwrap();

    let last = out.messages.last().unwrap();
    assert!(last
        .content
        .starts_with("[use_mcp_tool] Result: ERROR: PLACEHOLDER MESSAGES SELECTED"));
    assert!(last.content.contains("Message 2"));

    let snapshot = fx.manager.get_window_state("conv").await.unwrap();
    assert_eq!(snapshot.error_streak, 1);
}

#[tokio::test]
async fn placeholder_inside_range_is_accepted() {
    let fx = Fixture::new();
    let out = fx
        .manager
        .process_request(
            "conv",
            vec![
                ChatMessage::user("first question"),
                ChatMessage::assistant("first answer"),
                ChatMessage::user("second question"),
                ChatMessage::assistant(format!("keeping questions\n{}", xml_command("1,3"))),
                ChatMessage::user("third question"),
            ],
            None,
        )
        .await
        .unwrap();
    assert_eq!(out.messages[1].content, "Message 2");

    let mut history = out.messages.clone();
    history.push(ChatMessage::assistant(xml_command("1-3")));
    history.push(ChatMessage::user("fourth question"));
    let out = fx
        .manager
        .process_request("conv", history, None)
        .await
        .unwrap();

    assert!(!out.messages.last().unwrap().content.contains("ERROR"));
    let snapshot = fx.manager.get_window_state("conv").await.unwrap();
    assert_eq!(snapshot.error_streak, 0);
}

#[tokio::test]
async fn full_window_selection_preserves_contents_in_order() {
    let fx = Fixture::new();
    let out = fx
        .manager
        .process_request(
            "conv",
            vec![
                ChatMessage::user("one"),
                ChatMessage::assistant("two"),
                ChatMessage::user("three"),
                ChatMessage::assistant(xml_command("1-5")),
                ChatMessage::user("four"),
            ],
            None,
        )
        .await
        .unwrap();

    let contents: Vec<&str> = out.messages.iter().map(|m| m.content.as_str()).collect();
    // Selected window in order, then the (fully scrubbed, empty-prose)
    // assistant tail, then the anchoring user.
    assert_eq!(&contents[0..3], &["one", "two", "three"]);
    assert_eq!(contents[4], "four");
    assert_eq!(out.messages.len() % 2, 1);
}

#[tokio::test]
async fn malformed_arguments_are_silently_ignored() {
    let fx = Fixture::new();
    let out = fx
        .manager
        .process_request(
            "conv",
            vec![
                ChatMessage::user("first question"),
                ChatMessage::assistant(
                    "thinking <use_mcp_tool><server_name>tokenwindow-local</server_name>\
                     <tool_name>recache_message_array</tool_name>\
                     <arguments>{broken</arguments></use_mcp_tool> done",
                ),
                ChatMessage::user("second question"),
            ],
            None,
        )
        .await
        .unwrap();

    // No synthetic tool error, no rebuild; the invocation is still scrubbed.
    assert_eq!(out.messages.len(), 3);
    assert!(!out.messages.last().unwrap().content.contains("ERROR"));
    assert!(!out.messages[1].content.contains("use_mcp_tool"));
    assert!(out.messages[1].content.contains("thinking"));

    let snapshot = fx.manager.get_window_state("conv").await.unwrap();
    assert_eq!(snapshot.error_streak, 0);
}

#[tokio::test]
async fn blank_messages_field_is_surfaced() {
    let fx = Fixture::new();
    let out = fx
        .manager
        .process_request(
            "conv",
            vec![
                ChatMessage::user("first question"),
                ChatMessage::assistant(xml_command("  ")),
                ChatMessage::user("second question"),
            ],
            None,
        )
        .await
        .unwrap();

    let last = out.messages.last().unwrap();
    assert!(last
        .content
        .starts_with("[use_mcp_tool] Result: ERROR: EMPTY MESSAGE LIST"));
}

#[tokio::test]
async fn garbage_only_positions_are_surfaced() {
    let fx = Fixture::new();
    let out = fx
        .manager
        .process_request(
            "conv",
            vec![
                ChatMessage::user("first question"),
                ChatMessage::assistant(xml_command("alpha, beta")),
                ChatMessage::user("second question"),
            ],
            None,
        )
        .await
        .unwrap();

    let last = out.messages.last().unwrap();
    assert!(last
        .content
        .starts_with("[use_mcp_tool] Result: ERROR: NO VALID MESSAGE NUMBERS"));
}

#[tokio::test]
async fn error_streak_accumulates_and_recovers() {
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
    history.push(ChatMessage::assistant(xml_command("50")));
    history.push(ChatMessage::user("third question"));
    fx.manager
        .process_request("conv", history.clone(), None)
        .await
        .unwrap();

    let snapshot = fx.manager.get_window_state("conv").await.unwrap();
    assert_eq!(snapshot.error_streak, 2);

    // A successful recache clears the streak and the pending error.
    history.push(ChatMessage::assistant(xml_command("1")));
    history.push(ChatMessage::user("fourth question"));
    fx.manager
        .process_request("conv", history, None)
        .await
        .unwrap();

    let snapshot = fx.manager.get_window_state("conv").await.unwrap();
    assert_eq!(snapshot.error_streak, 0);
    assert!(snapshot.current_mcp_error.is_none());
}
