// tests/moderation_flow.rs
//
// State-machine guarantees of the moderation queue: terminal decisions,
// dedup at submit time, and per-id mutual exclusion under racing callers.

use std::sync::Arc;

use newsroom_pipeline::moderation::{ItemStatus, ModerationQueue};
use newsroom_pipeline::sources::ScrapedDocument;
use newsroom_pipeline::PipelineError;

fn doc(url: &str, body: &str) -> ScrapedDocument {
    ScrapedDocument {
        source_url: url.to_string(),
        title: "Headline".to_string(),
        body: body.to_string(),
        category: "politics".to_string(),
        published_at: 0,
    }
}

#[test]
fn approve_is_terminal() {
    let q = ModerationQueue::new();
    let item = q.submit(&doc("https://a.example/1", "first story")).unwrap();
    assert_eq!(item.status, ItemStatus::Pending);

    let approved = q.approve(item.id).unwrap();
    assert_eq!(approved.status, ItemStatus::Approved);
    assert!(approved.decided_at.is_some());

    assert!(matches!(
        q.approve(item.id),
        Err(PipelineError::InvalidTransition { .. })
    ));
    assert!(matches!(
        q.reject(item.id),
        Err(PipelineError::InvalidTransition { .. })
    ));
}

#[test]
fn duplicate_against_pending_and_approved_but_not_rejected() {
    let q = ModerationQueue::new();
    let a = q.submit(&doc("https://a.example/1", "same words")).unwrap();

    // Pending blocks the duplicate.
    assert!(matches!(
        q.submit(&doc("https://b.example/2", "same words")),
        Err(PipelineError::DuplicateContent { .. })
    ));

    // Approved still blocks it.
    q.approve(a.id).unwrap();
    assert!(matches!(
        q.submit(&doc("https://b.example/2", "same words")),
        Err(PipelineError::DuplicateContent { .. })
    ));

    // Rejected frees the fingerprint for resubmission.
    let c = q.submit(&doc("https://c.example/3", "other words")).unwrap();
    q.reject(c.id).unwrap();
    assert!(q.submit(&doc("https://c.example/3", "other words")).is_ok());
}

#[test]
fn audit_trail_keeps_rejected_items() {
    let q = ModerationQueue::new();
    let a = q.submit(&doc("https://a.example/1", "kept for audit")).unwrap();
    q.reject(a.id).unwrap();
    let stored = q.get(a.id).expect("rejected item must stay in the store");
    assert_eq!(stored.status, ItemStatus::Rejected);
    assert_eq!(q.counts().rejected, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn racing_decisions_have_exactly_one_winner() {
    for _ in 0..50 {
        let q = Arc::new(ModerationQueue::new());
        let item = q.submit(&doc("https://a.example/1", "contested story")).unwrap();

        let qa = Arc::clone(&q);
        let qb = Arc::clone(&q);
        let id = item.id;
        let approve = tokio::task::spawn_blocking(move || qa.approve(id));
        let reject = tokio::task::spawn_blocking(move || qb.reject(id));

        let a = approve.await.unwrap();
        let r = reject.await.unwrap();

        assert_ne!(a.is_ok(), r.is_ok(), "exactly one transition must win");
        let loser = if a.is_ok() { r } else { a };
        assert!(matches!(loser, Err(PipelineError::InvalidTransition { .. })));
    }
}
