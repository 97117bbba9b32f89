mod helpers;

use faq_assistant::error::FaqError;
use faq_assistant::knowledge::types::TaskItem;
use faq_assistant::knowledge::{collections, store};
use helpers::{axis, build_app};

async fn seed_hr(t: &helpers::TestApp) {
    t.embedder.set("How many vacation days do I get?", axis(0));
    t.embedder.set("Who do I ask about payroll?", axis(1));
    let report = t
        .app
        .pipeline
        .add_entries(&[
            TaskItem::new("How many vacation days do I get?", "25 per year.", "hr"),
            TaskItem::new("Who do I ask about payroll?", "The finance team.", "hr"),
        ])
        .await;
    assert_eq!(report.inserted, 2);
}

#[tokio::test]
async fn listing_reports_entry_counts() {
    let t = build_app().await;
    seed_hr(&t).await;
    t.app
        .store
        .run(|conn| collections::create_collection(conn, "empty"))
        .await
        .unwrap();

    let all = t
        .app
        .store
        .run(|conn| collections::list_collections(conn, 10))
        .await
        .unwrap();
    let counts: Vec<(String, i64)> = all.into_iter().map(|c| (c.name, c.entry_count)).collect();
    assert_eq!(counts, vec![("empty".to_string(), 0), ("hr".to_string(), 2)]);

    let limited = t
        .app
        .store
        .run(|conn| collections::list_collections(conn, 1))
        .await
        .unwrap();
    assert_eq!(limited.len(), 1);
}

#[tokio::test]
async fn create_is_idempotent_and_rejects_blank_names() {
    let t = build_app().await;
    let created = t
        .app
        .store
        .run(|conn| {
            Ok((
                collections::create_collection(conn, "it")?,
                collections::create_collection(conn, "it")?,
            ))
        })
        .await
        .unwrap();
    assert_eq!(created, (true, false));

    let err = t
        .app
        .store
        .run(|conn| collections::create_collection(conn, " "))
        .await
        .unwrap_err();
    assert!(matches!(err, FaqError::InvalidArgument(_)));
}

#[tokio::test]
async fn rename_moves_entries_and_their_vectors() {
    let t = build_app().await;
    seed_hr(&t).await;

    let moved = t
        .app
        .store
        .run(|conn| collections::rename_collection(conn, "hr", "people"))
        .await
        .unwrap();
    assert_eq!(moved, 2);

    let hit = t
        .app
        .store
        .find_most_similar(axis(1), "people".into())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(hit.content, "Who do I ask about payroll?");
    assert_eq!(hit.collection, "people");
    assert!(t
        .app
        .store
        .find_most_similar(axis(1), "hr".into())
        .await
        .unwrap()
        .is_none());

    let exists = t
        .app
        .store
        .run(|conn| collections::get_collection(conn, "hr"))
        .await
        .unwrap();
    assert!(exists.is_none());
}

#[tokio::test]
async fn rename_onto_existing_collection_is_an_integrity_violation() {
    let t = build_app().await;
    seed_hr(&t).await;
    let err = t
        .app
        .store
        .run(|conn| {
            collections::create_collection(conn, "people")?;
            collections::rename_collection(conn, "hr", "people")
        })
        .await
        .unwrap_err();
    assert!(matches!(err, FaqError::IntegrityViolation(_)));

    let err = t
        .app
        .store
        .run(|conn| collections::rename_collection(conn, "nope", "other"))
        .await
        .unwrap_err();
    assert!(matches!(err, FaqError::NotFound(_)));
}

#[tokio::test]
async fn delete_removes_entries_from_search() {
    let t = build_app().await;
    seed_hr(&t).await;

    let removed = t
        .app
        .store
        .run(|conn| collections::delete_collection(conn, "hr"))
        .await
        .unwrap();
    assert_eq!(removed, 2);
    assert!(t
        .app
        .store
        .find_most_similar(axis(0), "hr".into())
        .await
        .unwrap()
        .is_none());

    let err = t
        .app
        .store
        .run(|conn| collections::delete_collection(conn, "hr"))
        .await
        .unwrap_err();
    assert!(matches!(err, FaqError::NotFound(_)));
}

#[tokio::test]
async fn entries_can_be_deleted_by_natural_key() {
    let t = build_app().await;
    seed_hr(&t).await;

    t.app
        .store
        .run(|conn| store::delete_entry(conn, "Who do I ask about payroll?", "hr"))
        .await
        .unwrap();
    let hit = t
        .app
        .store
        .find_most_similar(axis(1), "hr".into())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(hit.content, "How many vacation days do I get?");
    assert!(hit.score.abs() < 1e-6);

    let err = t
        .app
        .store
        .run(|conn| store::delete_entry(conn, "Who do I ask about payroll?", "hr"))
        .await
        .unwrap_err();
    assert!(matches!(err, FaqError::NotFound(_)));
}
