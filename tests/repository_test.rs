//! End-to-end repository behaviour through the public library surface.

mod helpers;

use engram::config::DecayConfig;
use engram::error::MemoryError;
use engram::memory::store::{
    batch_delete, get_memory, hard_delete, soft_delete, update_memory, UpdateMemoryRequest,
};
use engram::memory::types::{MemoryMetadata, MetadataPatch, Sector};
use helpers::{seed_memory, test_db, SpikeProvider};

#[test]
fn create_then_get_round_trip() {
    let mut conn = test_db();
    let cfg = DecayConfig::default();
    let id = seed_memory(
        &mut conn,
        "u1",
        "the release train left on time",
        Sector::Episodic,
        MemoryMetadata {
            tags: vec!["release".into()],
            keywords: vec!["train".into()],
            ..MemoryMetadata::default()
        },
    );

    let memory = get_memory(&mut conn, &id, "u1", &cfg).unwrap().unwrap();
    assert_eq!(memory.content, "the release train left on time");
    assert_eq!(memory.primary_sector, Sector::Episodic);
    assert_eq!(memory.metadata.tags, vec!["release".to_string()]);
    assert!((memory.strength - 1.0).abs() < 0.2); // creation strength + access boost cap
    assert_eq!(memory.access_count, 1);
}

#[test]
fn get_distinguishes_missing_from_foreign() {
    let mut conn = test_db();
    let cfg = DecayConfig::default();
    let id = seed_memory(&mut conn, "owner", "private", Sector::Semantic, MemoryMetadata::default());

    assert!(get_memory(&mut conn, "no-such-id", "owner", &cfg).unwrap().is_none());
    let err = get_memory(&mut conn, &id, "other-user", &cfg).unwrap_err();
    assert!(matches!(err, MemoryError::NotFound { .. }));
}

#[test]
fn repeated_gets_accumulate_access_count() {
    let mut conn = test_db();
    let cfg = DecayConfig::default();
    let id = seed_memory(&mut conn, "u1", "popular", Sector::Semantic, MemoryMetadata::default());

    for _ in 0..3 {
        get_memory(&mut conn, &id, "u1", &cfg).unwrap();
    }
    let count: u32 = conn
        .query_row(
            "SELECT access_count FROM memories WHERE id = ?1",
            rusqlite::params![id],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(count, 3);
}

#[test]
fn strength_never_exceeds_one_under_reinforcement() {
    let mut conn = test_db();
    let cfg = DecayConfig::default();
    let id = seed_memory(&mut conn, "u1", "capped", Sector::Semantic, MemoryMetadata::default());

    for _ in 0..20 {
        get_memory(&mut conn, &id, "u1", &cfg).unwrap();
    }
    let strength: f64 = conn
        .query_row(
            "SELECT strength FROM memories WHERE id = ?1",
            rusqlite::params![id],
            |row| row.get(0),
        )
        .unwrap();
    assert!(strength <= 1.0);
}

#[test]
fn update_metadata_clears_and_merges() {
    let mut conn = test_db();
    let id = seed_memory(
        &mut conn,
        "u1",
        "metadata bearer",
        Sector::Semantic,
        MemoryMetadata {
            keywords: vec!["old".into()],
            tags: vec!["keep-me".into()],
            category: Some("notes".into()),
            importance: Some(0.4),
            ..MemoryMetadata::default()
        },
    );

    let patch: MetadataPatch = serde_json::from_str(
        r#"{"keywords": ["fresh"], "category": null}"#,
    )
    .unwrap();
    let request = UpdateMemoryRequest {
        metadata: Some(patch),
        ..UpdateMemoryRequest::default()
    };
    let updated = update_memory(&mut conn, &SpikeProvider, &id, "u1", &request, "default").unwrap();

    assert_eq!(updated.metadata.keywords, vec!["fresh".to_string()]);
    assert_eq!(updated.metadata.tags, vec!["keep-me".to_string()]); // untouched
    assert!(updated.metadata.category.is_none()); // explicit null cleared
    assert_eq!(updated.metadata.importance, Some(0.4)); // untouched
}

#[test]
fn soft_delete_then_hard_delete() {
    let mut conn = test_db();
    let id = seed_memory(&mut conn, "u1", "fleeting", Sector::Episodic, MemoryMetadata::default());

    soft_delete(&mut conn, &id, "u1").unwrap();
    let strength: f64 = conn
        .query_row(
            "SELECT strength FROM memories WHERE id = ?1",
            rusqlite::params![id],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(strength, 0.0);

    hard_delete(&mut conn, &id, "u1", "default").unwrap();
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM memories WHERE id = ?1",
            rusqlite::params![id],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(count, 0);
}

#[test]
fn delete_requires_matching_user() {
    let mut conn = test_db();
    let id = seed_memory(&mut conn, "u1", "guarded", Sector::Semantic, MemoryMetadata::default());

    assert!(matches!(
        soft_delete(&mut conn, &id, "intruder").unwrap_err(),
        MemoryError::NotFound { .. }
    ));
    assert!(matches!(
        hard_delete(&mut conn, &id, "intruder", "default").unwrap_err(),
        MemoryError::NotFound { .. }
    ));
}

#[test]
fn batch_delete_mixed_ids() {
    let mut conn = test_db();
    let id_a = seed_memory(&mut conn, "u1", "first", Sector::Episodic, MemoryMetadata::default());
    let id_b = seed_memory(&mut conn, "u1", "second", Sector::Episodic, MemoryMetadata::default());

    let result = batch_delete(
        &mut conn,
        &[id_a, "ghost".to_string(), id_b],
        "u1",
        "default",
    )
    .unwrap();

    assert_eq!(result.success_count, 2);
    assert_eq!(result.failure_count, 1);
    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.failures[0].memory_id, "ghost");
    assert_eq!(result.failures[0].error, "Memory not found");
}

#[test]
fn hard_delete_cascades_links_both_directions() {
    let mut conn = test_db();
    // Identical content gives cosine 1.0 in the semantic sector, so the
    // second create links back to the first.
    let first = seed_memory(&mut conn, "u1", "twin", Sector::Semantic, MemoryMetadata::default());
    let second = seed_memory(&mut conn, "u1", "twin", Sector::Semantic, MemoryMetadata::default());

    let link_count: i64 = conn
        .query_row("SELECT COUNT(*) FROM memory_links", [], |row| row.get(0))
        .unwrap();
    assert!(link_count > 0);

    hard_delete(&mut conn, &first, "u1", "default").unwrap();

    let remaining: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM memory_links WHERE source_id = ?1 OR target_id = ?1",
            rusqlite::params![first],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(remaining, 0);

    // The surviving memory is still readable.
    assert!(engram::memory::store::read_memory(&conn, &second).unwrap().is_some());
}
