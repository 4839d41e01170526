use super::*;

fn unsealed_count(transcript: &Transcript) -> usize {
    transcript
        .snapshot()
        .iter()
        .filter(|turn| !turn.sealed)
        .count()
}

#[test]
fn user_turn_is_sealed_and_trimmed() {
    let mut transcript = Transcript::new();
    let turn = transcript.append_user_turn("  Hello \n").expect("user turn");

    let stored = transcript.get(turn).expect("stored");
    assert_eq!(stored.role, Role::User);
    assert_eq!(stored.content, "Hello");
    assert!(stored.sealed);
    assert!(stored.references.is_none());
}

#[test]
fn blank_user_text_is_invalid_input() {
    let mut transcript = Transcript::new();
    assert_eq!(transcript.append_user_turn(""), Err(ChatError::InvalidInput));
    assert_eq!(
        transcript.append_user_turn(" \t\n "),
        Err(ChatError::InvalidInput)
    );
    assert!(transcript.is_empty());
}

#[test]
fn second_placeholder_violates_single_unsealed_turn() {
    let mut transcript = Transcript::new();
    transcript.append_user_turn("Hello").expect("user");
    transcript.append_assistant_placeholder().expect("placeholder");

    let err = transcript
        .append_assistant_placeholder()
        .expect_err("must reject");
    assert!(matches!(err, ChatError::InvariantViolation(_)));

    let err = transcript
        .append_user_turn("again")
        .expect_err("must reject");
    assert!(matches!(err, ChatError::InvariantViolation(_)));
    assert_eq!(unsealed_count(&transcript), 1);
    assert_eq!(transcript.len(), 2);
}

#[test]
fn content_appends_in_order_until_sealed() {
    let mut transcript = Transcript::new();
    transcript.append_user_turn("Hello").expect("user");
    let turn = transcript.append_assistant_placeholder().expect("placeholder");
    assert_eq!(transcript.in_flight(), Some(turn));

    transcript.append_content(turn, "Hi").expect("delta");
    transcript.append_content(turn, "").expect("empty delta");
    transcript.append_content(turn, " there").expect("delta");
    transcript.seal(turn).expect("seal");

    assert_eq!(transcript.get(turn).expect("turn").content, "Hi there");
    assert_eq!(transcript.in_flight(), None);

    let err = transcript
        .append_content(turn, "late")
        .expect_err("sealed turn");
    assert!(matches!(err, ChatError::InvariantViolation(_)));
    assert_eq!(transcript.get(turn).expect("turn").content, "Hi there");
}

#[test]
fn content_cannot_target_user_or_unknown_turns() {
    let mut transcript = Transcript::new();
    let user = transcript.append_user_turn("Hello").expect("user");

    assert!(matches!(
        transcript.append_content(user, "x"),
        Err(ChatError::InvariantViolation(_))
    ));
    assert!(matches!(
        transcript.append_content(TurnId(9), "x"),
        Err(ChatError::InvariantViolation(_))
    ));
}

#[test]
fn references_are_replaced_wholesale_even_after_sealing() {
    let mut transcript = Transcript::new();
    transcript.append_user_turn("Hello").expect("user");
    let turn = transcript.append_assistant_placeholder().expect("placeholder");

    transcript
        .set_references(
            turn,
            vec![
                Reference::new("r1-a", "http://a"),
                Reference::new("r1-b", "http://b"),
            ],
        )
        .expect("first batch");
    transcript.seal(turn).expect("seal");
    transcript
        .set_references(turn, vec![Reference::new("r2", "http://c")])
        .expect("second batch");

    assert_eq!(
        transcript.get(turn).expect("turn").references,
        Some(vec![Reference::new("r2", "http://c")])
    );
}

#[test]
fn references_are_rejected_on_user_turns() {
    let mut transcript = Transcript::new();
    let user = transcript.append_user_turn("Hello").expect("user");
    assert!(matches!(
        transcript.set_references(user, Vec::new()),
        Err(ChatError::InvariantViolation(_))
    ));
}

#[test]
fn sealing_twice_leaves_turn_unchanged() {
    let mut transcript = Transcript::new();
    transcript.append_user_turn("Hello").expect("user");
    let turn = transcript.append_assistant_placeholder().expect("placeholder");
    transcript.append_content(turn, "partial").expect("delta");
    transcript
        .set_references(turn, vec![Reference::new("doc", "http://x")])
        .expect("refs");

    transcript.seal(turn).expect("seal");
    let first = transcript.get(turn).cloned().expect("turn");
    transcript.seal(turn).expect("seal again");

    assert_eq!(transcript.get(turn), Some(&first));
}

#[test]
fn snapshot_is_detached_from_later_mutation() {
    let mut transcript = Transcript::new();
    transcript.append_user_turn("Hello").expect("user");
    let turn = transcript.append_assistant_placeholder().expect("placeholder");
    transcript.append_content(turn, "Hi").expect("delta");

    let before = transcript.snapshot();
    transcript.append_content(turn, " there").expect("delta");

    assert_eq!(before[1].content, "Hi");
    assert_eq!(transcript.snapshot()[1].content, "Hi there");
}

#[test]
fn history_keeps_roles_and_drops_references() {
    let mut transcript = Transcript::new();
    transcript.append_user_turn("Hello").expect("user");
    let turn = transcript.append_assistant_placeholder().expect("placeholder");
    transcript.append_content(turn, "Hi").expect("delta");
    transcript
        .set_references(turn, vec![Reference::new("doc", "http://x")])
        .expect("refs");
    transcript.seal(turn).expect("seal");

    assert_eq!(
        transcript.history(),
        vec![
            HistoryEntry {
                role: Role::User,
                content: "Hello".to_string(),
            },
            HistoryEntry {
                role: Role::Assistant,
                content: "Hi".to_string(),
            },
        ]
    );
}
