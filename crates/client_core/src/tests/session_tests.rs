use super::*;

const SCENARIO: &str = concat!(
    "data: {\"content\":\"Hi\"}\n",
    "\n",
    "data: {\"content\":\" there\"}\n",
    "data: {\"references\":[{\"name\":\"doc1\",\"url\":\"http://x\"}],\"isReference\":true}\n",
    "data: [DONE]\n",
);

fn open_session() -> (Transcript, StreamSession) {
    let mut transcript = Transcript::new();
    transcript.append_user_turn("Hello").expect("user");
    let turn = transcript.append_assistant_placeholder().expect("placeholder");
    (transcript, StreamSession::new(turn))
}

fn run_chunks(chunks: &[&[u8]]) -> (Transcript, StreamSession, Vec<SessionUpdate>) {
    let (mut transcript, mut session) = open_session();
    let mut updates = Vec::new();
    for chunk in chunks {
        updates.extend(session.ingest(chunk, &mut transcript).expect("ingest"));
    }
    updates.extend(session.finish(&mut transcript).expect("finish"));
    (transcript, session, updates)
}

#[test]
fn scenario_builds_content_and_references() {
    let (transcript, session, updates) = run_chunks(&[SCENARIO.as_bytes()]);
    let turn = transcript.get(session.turn()).expect("turn");

    assert_eq!(turn.content, "Hi there");
    assert_eq!(
        turn.references,
        Some(vec![Reference::new("doc1", "http://x")])
    );
    assert!(session.is_finished());
    assert_eq!(session.accumulated(), "Hi there");
    assert_eq!(
        updates,
        vec![
            SessionUpdate::Content("Hi".to_string()),
            SessionUpdate::Content(" there".to_string()),
            SessionUpdate::References(vec![Reference::new("doc1", "http://x")]),
            SessionUpdate::EndOfStream,
        ]
    );
}

#[test]
fn content_is_independent_of_chunk_boundaries() {
    let body = SCENARIO.as_bytes();
    let (expected, _, expected_updates) = run_chunks(&[body]);

    for split in 0..=body.len() {
        let (head, tail) = body.split_at(split);
        let (transcript, _, updates) = run_chunks(&[head, tail]);
        assert_eq!(transcript.snapshot(), expected.snapshot(), "split at {split}");
        assert_eq!(updates, expected_updates, "split at {split}");
    }

    let single_bytes: Vec<&[u8]> = body.chunks(1).collect();
    let (transcript, _, _) = run_chunks(&single_bytes);
    assert_eq!(transcript.snapshot(), expected.snapshot());
}

#[test]
fn malformed_event_is_skipped_without_aborting() {
    let body = "data: {not-json}\ndata: {\"content\":\"ok\"}\ndata: [DONE]\n";
    let (transcript, session, updates) = run_chunks(&[body.as_bytes()]);

    assert_eq!(transcript.get(session.turn()).expect("turn").content, "ok");
    assert_eq!(session.malformed_events(), 1);
    assert!(matches!(updates[0], SessionUpdate::Malformed { .. }));
    assert_eq!(updates.last(), Some(&SessionUpdate::EndOfStream));
}

#[test]
fn later_reference_batch_replaces_earlier_one() {
    let body = concat!(
        "data: {\"references\":[{\"name\":\"r1\",\"url\":\"http://1\"},{\"name\":\"r1b\",\"url\":\"http://1b\"}],\"isReference\":true}\n",
        "data: {\"content\":\"text\"}\n",
        "data: {\"references\":[{\"name\":\"r2\",\"url\":\"http://2\"}],\"isReference\":true}\n",
        "data: [DONE]\n",
    );
    let (transcript, session, _) = run_chunks(&[body.as_bytes()]);

    let expected = vec![Reference::new("r2", "http://2")];
    assert_eq!(
        transcript.get(session.turn()).expect("turn").references,
        Some(expected.clone())
    );
    assert_eq!(session.references(), Some(expected.as_slice()));
}

#[test]
fn reference_first_ordering_is_accepted() {
    let body = concat!(
        "data: {\"references\":[{\"name\":\"doc\",\"url\":\"http://x\"}]}\n",
        "data: {\"content\":\"after\"}\n",
    );
    let (transcript, session, _) = run_chunks(&[body.as_bytes()]);
    let turn = transcript.get(session.turn()).expect("turn");
    assert_eq!(turn.content, "after");
    assert_eq!(turn.references, Some(vec![Reference::new("doc", "http://x")]));
}

#[test]
fn lines_after_sentinel_are_not_applied() {
    let body = "data: {\"content\":\"a\"}\ndata: [DONE]\ndata: {\"content\":\"b\"}\n";
    let (mut transcript, mut session) = open_session();
    session
        .ingest(body.as_bytes(), &mut transcript)
        .expect("ingest");
    let later = session
        .ingest(b"data: {\"content\":\"c\"}\n", &mut transcript)
        .expect("ingest after done");

    assert!(later.is_empty());
    assert_eq!(transcript.get(session.turn()).expect("turn").content, "a");
}

#[test]
fn unterminated_final_line_is_applied_on_finish() {
    let body = "data: {\"content\":\"x\"}\ndata: {\"content\":\"y\"}";
    let (transcript, session, updates) = run_chunks(&[body.as_bytes()]);

    assert_eq!(transcript.get(session.turn()).expect("turn").content, "xy");
    assert!(!session.is_finished());
    assert_eq!(updates.len(), 2);
}

#[test]
fn empty_content_delta_produces_no_update() {
    let (transcript, session, updates) = run_chunks(&[b"data: {\"content\":\"\"}\n"]);
    assert!(updates.is_empty());
    assert_eq!(transcript.get(session.turn()).expect("turn").content, "");
}

#[test]
fn applying_to_a_sealed_turn_is_an_invariant_violation() {
    let (mut transcript, mut session) = open_session();
    transcript.seal(session.turn()).expect("seal");

    let err = session
        .ingest(b"data: {\"content\":\"late\"}\n", &mut transcript)
        .expect_err("sealed");
    assert!(matches!(err, ChatError::InvariantViolation(_)));
}
