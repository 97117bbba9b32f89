mod helpers;

use faq_assistant::error::FaqError;
use faq_assistant::knowledge::store;
use faq_assistant::knowledge::types::Source;
use faq_assistant::router::RouterState;
use helpers::{add_entry, at_similarity, axis, build_app};

#[tokio::test]
async fn close_match_answers_locally_and_schedules_update() {
    let t = build_app().await;
    add_entry(&t, "How do I reset my password?", "Use the self-service portal.", axis(0)).await;
    t.embedder.set("I forgot my password", at_similarity(0.93));

    let answer = t.app.router.answer("I forgot my password", None).await.unwrap();

    assert_eq!(answer.source, Source::Local);
    assert_eq!(answer.answer, "Use the self-service portal.");
    assert_eq!(answer.matched_question.as_deref(), Some("How do I reset my password?"));
    assert!((answer.similarity.unwrap() - 0.93).abs() < 1e-3);
    assert_eq!(answer.collection, "faq");
    assert_eq!(
        answer.states,
        vec![
            RouterState::ReceivedQuestion,
            RouterState::EmbeddingComputed,
            RouterState::Searched,
            RouterState::LocalHit,
            RouterState::Responded,
        ]
    );
    assert_eq!(t.responder.calls(), 0);

    let stats = t.app.queue.stats().await.unwrap();
    assert_eq!(stats.pending, 1);
    assert!(answer.writeback_task.is_some());

    // the update refreshes the matched entry; no new entry appears
    let drained = t.app.drain().await.unwrap();
    assert_eq!(drained.done, 1);
    let entries = t
        .app
        .store
        .run(|conn| store::list_entries(conn, "faq", 10))
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].content, "How do I reset my password?");
}

#[tokio::test]
async fn distant_match_falls_back_and_learns_the_answer() {
    let t = build_app().await;
    add_entry(&t, "How do I reset my password?", "Use the self-service portal.", axis(0)).await;
    t.embedder.set("How do I configure the VPN?", at_similarity(0.40));

    let first = t.app.router.answer("How do I configure the VPN?", None).await.unwrap();
    assert_eq!(first.source, Source::Generative);
    assert_eq!(first.answer, "generated answer to: How do I configure the VPN?");
    assert!(first.matched_question.is_none());
    assert!((first.similarity.unwrap() - 0.40).abs() < 1e-3);
    assert_eq!(first.states[3], RouterState::GenerativeFallback);
    assert_eq!(t.responder.calls(), 1);

    assert_eq!(t.app.drain().await.unwrap().done, 1);

    // the generated pair is now in the knowledge base
    let second = t.app.router.answer("How do I configure the VPN?", None).await.unwrap();
    assert_eq!(second.source, Source::Local);
    assert_eq!(second.answer, first.answer);
    assert!(second.similarity.unwrap() > 0.999);
    assert_eq!(t.responder.calls(), 1);
}

#[tokio::test]
async fn empty_collection_means_no_match() {
    let t = build_app().await;

    let answer = t.app.router.answer("What is DNS?", Some("networking")).await.unwrap();
    assert_eq!(answer.source, Source::Generative);
    assert_eq!(answer.similarity, None);
    assert_eq!(answer.collection, "networking");
    assert_eq!(t.responder.calls(), 1);
}

#[tokio::test]
async fn collections_do_not_leak_matches() {
    let t = build_app().await;
    add_entry(&t, "How do I reset my password?", "Use the portal.", axis(0)).await;

    let answer = t
        .app
        .router
        .answer("How do I reset my password?", Some("hr"))
        .await
        .unwrap();
    assert_eq!(answer.source, Source::Generative);
    assert_eq!(answer.similarity, None);
}

#[tokio::test]
async fn blank_question_is_rejected_before_embedding() {
    let t = build_app().await;

    let err = t.app.router.answer("   ", None).await.unwrap_err();
    assert!(matches!(err, FaqError::InvalidArgument(_)));

    let err = t.app.router.answer("hello", Some("")).await.unwrap_err();
    assert!(matches!(err, FaqError::InvalidArgument(_)));

    assert_eq!(t.embedder.calls(), 0);
    assert_eq!(t.app.queue.stats().await.unwrap().pending, 0);
}

#[tokio::test]
async fn generation_failure_schedules_nothing_and_is_sanitized() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = helpers::test_config(&dir);
    let t = helpers::build_app_with(
        dir,
        config,
        helpers::MockEmbedder::new(),
        helpers::MockResponder::failing(),
    )
    .await;

    let err = t.app.router.answer("Why is the printer offline?", None).await.unwrap_err();
    assert!(matches!(err, FaqError::Generation(_)));
    let public = err.to_public();
    assert_eq!(public.kind, "internal");
    assert!(!public.message.contains("sk-test"));

    assert_eq!(t.app.queue.stats().await.unwrap().pending, 0);
}

#[tokio::test]
async fn repeated_questions_hit_the_embedding_cache() {
    let t = build_app().await;
    add_entry(&t, "How do I reset my password?", "Use the portal.", axis(0)).await;
    let before = t.embedder.calls();

    for _ in 0..3 {
        t.app
            .router
            .answer("How do I reset my password?", None)
            .await
            .unwrap();
    }
    assert_eq!(t.embedder.calls(), before + 1);
}

#[tokio::test]
async fn slow_generation_times_out_without_scheduling_writeback() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut config = helpers::test_config(&dir);
    config.server.request_timeout_secs = 1;
    let t = helpers::build_app_with(
        dir,
        config,
        helpers::MockEmbedder::new(),
        helpers::MockResponder::slow(std::time::Duration::from_secs(3)),
    )
    .await;

    let err = t
        .app
        .router
        .answer("Why is my laptop so slow?", None)
        .await
        .unwrap_err();
    assert!(matches!(err, FaqError::Timeout(_)), "got {err:?}");
    assert_eq!(err.to_public().kind, "timeout");
    assert_eq!(t.responder.calls(), 1);
    assert_eq!(t.app.queue.stats().await.unwrap().pending, 0);
}

#[tokio::test]
async fn many_identical_entries_resolve_to_the_oldest() {
    let t = build_app().await;
    for i in 0..6 {
        add_entry(&t, &format!("tie{i}"), &format!("answer {i}"), axis(2)).await;
    }
    t.embedder.set("which one?", axis(2));

    let answer = t.app.router.answer("which one?", None).await.unwrap();
    assert_eq!(answer.source, Source::Local);
    assert_eq!(answer.matched_question.as_deref(), Some("tie0"));
    assert_eq!(answer.answer, "answer 0");
}
