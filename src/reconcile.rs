use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::config::{Rect, SceneConfig};
use crate::identity;
use crate::rng::RandomSource;
use crate::types::{AnimatedEntity, AttendeeRecord, Facing, MotionState, Point};

/// Merges a full roster snapshot into the animated collection.
///
/// Known ids keep their motion state untouched and take every business field
/// from the snapshot; new ids get fresh random motion; missing ids are dropped.
/// The result follows snapshot order. Repeated ids in a snapshot keep only
/// their first occurrence.
pub fn reconcile<R: RandomSource>(
    previous: &[AnimatedEntity],
    snapshot: &[AttendeeRecord],
    scene: &SceneConfig,
    fallback_sprite: &str,
    rng: &mut R,
) -> Vec<AnimatedEntity> {
    let existing: HashMap<&str, &MotionState> = previous
        .iter()
        .map(|entity| (entity.id.as_str(), &entity.motion))
        .collect();
    let mut seen: HashSet<&str> = HashSet::with_capacity(snapshot.len());
    let mut next = Vec::with_capacity(snapshot.len());

    for record in snapshot {
        if !seen.insert(record.id.as_str()) {
            debug!(id = %record.id, "duplicate id in roster snapshot");
            continue;
        }
        let motion = match existing.get(record.id.as_str()) {
            Some(motion) => **motion,
            None => spawn_motion(scene, rng),
        };
        next.push(AnimatedEntity {
            id: record.id.clone(),
            name: record.name.clone(),
            created_at: record.created_at,
            identity: identity::decode(&record.packed_identity, fallback_sprite),
            is_winner: record.is_winner,
            motion,
        });
    }
    next
}

pub fn spawn_motion<R: RandomSource>(scene: &SceneConfig, rng: &mut R) -> MotionState {
    MotionState {
        position: random_point(&scene.spawn_area, rng),
        target: random_point(&scene.spawn_area, rng),
        speed: rng.range(scene.min_speed, scene.max_speed),
        facing: if rng.bool(0.5) {
            Facing::Left
        } else {
            Facing::Right
        },
        held: false,
    }
}

pub fn random_point<R: RandomSource>(area: &Rect, rng: &mut R) -> Point {
    Point {
        x: rng.range(area.min_x, area.max_x),
        y: rng.range(area.min_y, area.max_y),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::constants::FALLBACK_SPRITE;
    use crate::rng::Rng;

    fn record(id: &str, name: &str) -> AttendeeRecord {
        AttendeeRecord {
            id: id.to_string(),
            name: name.to_string(),
            created_at: Utc.timestamp_opt(1_700_000_000, 0).single().expect("valid timestamp"),
            packed_identity: format!("sprite:Alex|photo:https://x/{id}.jpg"),
            is_winner: false,
        }
    }

    fn run(previous: &[AnimatedEntity], snapshot: &[AttendeeRecord], seed: u32) -> Vec<AnimatedEntity> {
        reconcile(
            previous,
            snapshot,
            &SceneConfig::default(),
            FALLBACK_SPRITE,
            &mut Rng::new(seed),
        )
    }

    fn ids(entities: &[AnimatedEntity]) -> Vec<&str> {
        entities.iter().map(|entity| entity.id.as_str()).collect()
    }

    #[test]
    fn new_entities_spawn_inside_spawn_area_with_speed_in_range() {
        let scene = SceneConfig::default();
        let snapshot: Vec<AttendeeRecord> =
            (0..200).map(|i| record(&format!("id{i}"), "N")).collect();
        let entities = run(&[], &snapshot, 3);
        assert_eq!(entities.len(), 200);
        for entity in &entities {
            assert!(scene.spawn_area.contains(entity.motion.position));
            assert!(scene.spawn_area.contains(entity.motion.target));
            assert!(scene.bounds.contains(entity.motion.position));
            assert!((scene.min_speed..=scene.max_speed).contains(&entity.motion.speed));
            assert!(!entity.motion.held);
        }
        assert!(entities.iter().any(|e| e.motion.facing == Facing::Left));
        assert!(entities.iter().any(|e| e.motion.facing == Facing::Right));
    }

    #[test]
    fn preserves_motion_and_takes_new_business_fields() {
        let mut first = run(&[], &[record("a", "Alice")], 1);
        first[0].motion.position = Point::new(5.0, 5.0);
        let mut renamed = record("a", "Alicia");
        renamed.is_winner = true;
        renamed.packed_identity = "sprite:Maru".to_string();

        let next = run(&first, &[renamed], 2);
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].motion.position, Point::new(5.0, 5.0));
        assert_eq!(next[0].motion, first[0].motion);
        assert_eq!(next[0].name, "Alicia");
        assert!(next[0].is_winner);
        assert_eq!(next[0].identity.sprite_name, "Maru");
        assert_eq!(next[0].identity.photo_url, None);
    }

    #[test]
    fn drops_ids_missing_from_snapshot() {
        let all = run(&[], &[record("1", "a"), record("2", "b"), record("3", "c")], 4);
        let next = run(&all, &[record("1", "a"), record("3", "c")], 5);
        assert_eq!(ids(&next), vec!["1", "3"]);
        assert_eq!(next[0].motion, all[0].motion);
        assert_eq!(next[1].motion, all[2].motion);
    }

    #[test]
    fn reconcile_is_idempotent_for_unchanged_snapshot() {
        let snapshot = vec![record("x", "X"), record("y", "Y"), record("z", "Z")];
        let once = run(&[], &snapshot, 10);
        // A different seed proves nothing is re-randomized.
        let twice = run(&once, &snapshot, 99);
        assert_eq!(once, twice);
    }

    #[test]
    fn output_follows_snapshot_order() {
        let before = run(&[], &[record("a", "A"), record("b", "B")], 6);
        let next = run(&before, &[record("c", "C"), record("b", "B"), record("a", "A")], 7);
        assert_eq!(ids(&next), vec!["c", "b", "a"]);
    }

    #[test]
    fn held_entity_keeps_position_and_hold() {
        let mut before = run(&[], &[record("h", "Held")], 8);
        before[0].motion.held = true;
        before[0].motion.position = Point::new(44.0, 1.0);
        let next = run(&before, &[record("h", "Held Renamed")], 9);
        assert!(next[0].motion.held);
        assert_eq!(next[0].motion.position, Point::new(44.0, 1.0));
        assert_eq!(next[0].name, "Held Renamed");
    }

    #[test]
    fn duplicate_ids_keep_first_occurrence() {
        let next = run(&[], &[record("d", "First"), record("d", "Second")], 11);
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].name, "First");
    }

    #[test]
    fn malformed_identity_uses_fallback() {
        let mut bad = record("m", "M");
        bad.packed_identity = "not-a-sprite".to_string();
        let next = run(&[], &[bad], 12);
        assert_eq!(next[0].identity.sprite_name, FALLBACK_SPRITE);
        assert_eq!(next[0].identity.photo_url, None);
    }
}
