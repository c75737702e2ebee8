//! Decay and reinforcement behaviour through the public surface.

mod helpers;

use engram::config::DecayConfig;
use engram::memory::decay::{
    apply_decay, auto_reinforce_on_access, calculate_decayed_strength, get_reinforcement_history,
    reinforce_memory,
};
use engram::memory::types::{MemoryMetadata, Sector};
use helpers::{backdate, seed_memory, test_db};

#[test]
fn episodic_memory_decays_to_point_seven_four_at_ten_days() {
    let mut conn = test_db();
    let cfg = DecayConfig::default();
    let id = seed_memory(&mut conn, "u1", "ten day memory", Sector::Episodic, MemoryMetadata::default());
    backdate(&conn, &id, 10, false);

    // The pure formula...
    let last_accessed: String = conn
        .query_row(
            "SELECT last_accessed FROM memories WHERE id = ?1",
            rusqlite::params![id],
            |row| row.get(0),
        )
        .unwrap();
    let computed = calculate_decayed_strength(
        1.0,
        &last_accessed,
        Sector::Episodic,
        chrono::Utc::now(),
        &cfg,
    );
    assert!((computed - 0.74).abs() < 0.01, "got {computed}");

    // ...and the applied row agree.
    let applied = apply_decay(&mut conn, &id, &cfg).unwrap();
    assert!((applied - 0.74).abs() < 0.01);
    let row: f64 = conn
        .query_row(
            "SELECT strength FROM memories WHERE id = ?1",
            rusqlite::params![id],
            |row| row.get(0),
        )
        .unwrap();
    assert!((row - applied).abs() < 1e-12);
}

#[test]
fn strength_stays_within_bounds_across_the_lifecycle() {
    let cfg = DecayConfig::default();
    let now = chrono::Utc::now();

    // P1: for any age, minimum_strength <= strength <= 1.
    for days in [0, 1, 10, 100, 10_000] {
        let t0 = (now - chrono::Duration::days(days)).to_rfc3339();
        for sector in Sector::ALL {
            let s = calculate_decayed_strength(1.0, &t0, sector, now, &cfg);
            assert!(s >= cfg.minimum_strength && s <= 1.0, "{sector} at {days}d: {s}");
        }
    }
}

#[test]
fn decay_is_monotone_non_increasing() {
    let cfg = DecayConfig::default();
    let now = chrono::Utc::now();
    let mut last = f64::INFINITY;
    for days in [0, 1, 2, 5, 10, 30, 90, 365] {
        let t0 = (now - chrono::Duration::days(days)).to_rfc3339();
        let s = calculate_decayed_strength(0.9, &t0, Sector::Reflective, now, &cfg);
        assert!(s <= last, "not monotone at {days} days");
        last = s;
    }
}

#[test]
fn sector_retention_order_at_thirty_days() {
    let cfg = DecayConfig::default();
    let now = chrono::Utc::now();
    let t0 = (now - chrono::Duration::days(30)).to_rfc3339();

    let strength = |sector| calculate_decayed_strength(1.0, &t0, sector, now, &cfg);
    let semantic = strength(Sector::Semantic);
    let procedural = strength(Sector::Procedural);
    let reflective = strength(Sector::Reflective);
    let emotional = strength(Sector::Emotional);
    let episodic = strength(Sector::Episodic);

    assert!(semantic >= procedural);
    assert!(procedural >= reflective);
    assert!(reflective >= emotional);
    assert!(emotional >= episodic);
}

#[test]
fn zero_age_decay_is_identity() {
    let cfg = DecayConfig::default();
    let now = chrono::Utc::now();
    let s = calculate_decayed_strength(0.8, &now.to_rfc3339(), Sector::Episodic, now, &cfg);
    assert_eq!(s, 0.8);
}

#[test]
fn reinforcement_caps_at_one_and_logs_history() {
    let mut conn = test_db();
    let id = seed_memory(&mut conn, "u1", "boosted", Sector::Semantic, MemoryMetadata::default());

    conn.execute(
        "UPDATE memories SET strength = 0.85 WHERE id = ?1",
        rusqlite::params![id],
    )
    .unwrap();

    let outcome = reinforce_memory(&mut conn, &id, 0.5).unwrap();
    assert_eq!(outcome.strength_after, 1.0);

    let history = get_reinforcement_history(&conn, &id).unwrap();
    assert_eq!(history.len(), 1);
    assert!((history[0].strength_before - 0.85).abs() < 1e-9);
    assert_eq!(history[0].strength_after, 1.0);
}

#[test]
fn access_within_an_hour_gets_exactly_half_the_boost() {
    let mut conn = test_db();
    let cfg = DecayConfig::default();
    let id = seed_memory(&mut conn, "u1", "repeat visitor", Sector::Episodic, MemoryMetadata::default());

    let first = auto_reinforce_on_access(&mut conn, &id, &cfg).unwrap();
    assert!((first.boost - cfg.reinforcement_boost).abs() < 1e-12);

    let second = auto_reinforce_on_access(&mut conn, &id, &cfg).unwrap();
    assert!((second.boost - cfg.reinforcement_boost * 0.5).abs() < 1e-12);

    // History is newest-first.
    let history = get_reinforcement_history(&conn, &id).unwrap();
    assert_eq!(history.len(), 2);
    assert!((history[0].boost - second.boost).abs() < 1e-12);
}
