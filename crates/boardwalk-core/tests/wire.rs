use boardwalk_core::{
    is_mine, parse_snapshot, resolve, AuthorshipPolicy, Message, OutboundFrame, SessionIdentity,
};

#[test]
fn outbound_frame_reads_back_as_message() {
    let session = SessionIdentity::new("user_2x")
        .with_username("alice")
        .with_image_url("https://img.example/alice.png");
    let frame = OutboundFrame::compose(&session, "hello").with_client_msg_id("c-42");
    let text = serde_json::to_string(&frame).expect("serialize");

    let message = Message::from_frame(&text).expect("frame parses as a record");
    assert_eq!(message.author.id, "user_2x");
    assert_eq!(message.author.image_url.as_deref(), Some("https://img.example/alice.png"));
    assert_eq!(message.client_msg_id.as_deref(), Some("c-42"));
    assert!(message.created_at.is_none());
    assert!(is_mine(&message, Some(&session)));
}

#[test]
fn shared_display_name_is_ambiguous_only_under_display_name_policy() {
    let alice = SessionIdentity::new("u1").with_username("alice");
    let impostor = SessionIdentity::new("u9").with_username("alice");
    let frame = OutboundFrame::compose(&impostor, "not me");
    let message =
        Message::from_frame(&serde_json::to_string(&frame).expect("serialize")).expect("parse");

    assert!(resolve(AuthorshipPolicy::DisplayName, &message, Some(&alice)).is_mine());
    assert!(!resolve(AuthorshipPolicy::StableId, &message, Some(&alice)).is_mine());
    assert!(!resolve(AuthorshipPolicy::StableId, &message, None).is_mine());
}

#[test]
fn snapshot_from_original_relay_shape() {
    let body = br#"[
        {"user":{"id":"u1","username":"alice","imageUrl":""},"message":"one","created_at":"2024-05-01 12:00:00"},
        {"user":{"id":"u2","username":"","imageUrl":""},"message":"two","created_at":"2024-05-01 12:00:01"}
    ]"#;
    let messages = parse_snapshot(body).expect("snapshot");
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].author.display_name(), None);

    let observer: Option<&SessionIdentity> = None;
    assert!(messages.iter().all(|m| !is_mine(m, observer)));
}
