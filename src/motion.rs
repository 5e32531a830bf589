use crate::config::SceneConfig;
use crate::reconcile::random_point;
use crate::rng::RandomSource;
use crate::types::{AnimatedEntity, Facing, MotionState, Point};

/// One simulator tick over the whole collection. Returns the replacement
/// collection; held entities come back unchanged.
pub fn step<R: RandomSource>(
    entities: &[AnimatedEntity],
    scene: &SceneConfig,
    rng: &mut R,
) -> Vec<AnimatedEntity> {
    entities
        .iter()
        .map(|entity| AnimatedEntity {
            motion: step_motion(&entity.motion, scene, rng),
            ..entity.clone()
        })
        .collect()
}

pub fn step_motion<R: RandomSource>(
    motion: &MotionState,
    scene: &SceneConfig,
    rng: &mut R,
) -> MotionState {
    if motion.held {
        return *motion;
    }

    let dx = motion.target.x - motion.position.x;
    let dy = motion.target.y - motion.position.y;
    let distance = (dx * dx + dy * dy).sqrt();

    if distance < scene.arrival_threshold {
        return MotionState {
            target: random_point(&scene.wander_area, rng),
            ..*motion
        };
    }

    // Never step past the waypoint, otherwise a fast walker could orbit it.
    let stride = motion.speed.min(distance);
    let moved = Point {
        x: motion.position.x + dx / distance * stride,
        y: motion.position.y + dy / distance * stride,
    };
    let facing = if dx > 0.0 {
        Facing::Right
    } else if dx < 0.0 {
        Facing::Left
    } else {
        motion.facing
    };

    MotionState {
        position: scene.bounds.clamp(moved),
        facing,
        ..*motion
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::config::Rect;
    use crate::reconcile::spawn_motion;
    use crate::rng::{Rng, ScriptedRng};
    use crate::types::Identity;

    fn entity(id: &str, motion: MotionState) -> AnimatedEntity {
        AnimatedEntity {
            id: id.to_string(),
            name: id.to_uppercase(),
            created_at: Utc::now(),
            identity: Identity {
                sprite_name: "Sam".to_string(),
                photo_url: None,
            },
            is_winner: false,
            motion,
        }
    }

    fn motion(position: Point, target: Point, speed: f32) -> MotionState {
        MotionState {
            position,
            target,
            speed,
            facing: Facing::Right,
            held: false,
        }
    }

    #[test]
    fn advances_toward_target_by_speed() {
        let scene = SceneConfig::default();
        let start = motion(Point::new(10.0, 10.0), Point::new(10.0, 20.0), 0.25);
        let next = step_motion(&start, &scene, &mut Rng::new(1));
        assert!((next.position.x - 10.0).abs() < 1e-6);
        assert!((next.position.y - 10.25).abs() < 1e-6);
        assert_eq!(next.target, start.target);
        // Purely vertical movement keeps the previous facing.
        assert_eq!(next.facing, Facing::Right);
    }

    #[test]
    fn facing_follows_horizontal_direction() {
        let scene = SceneConfig::default();
        let left = step_motion(
            &motion(Point::new(20.0, 20.0), Point::new(5.0, 20.0), 0.2),
            &scene,
            &mut Rng::new(1),
        );
        assert_eq!(left.facing, Facing::Left);
        let right = step_motion(
            &MotionState {
                facing: Facing::Left,
                ..motion(Point::new(5.0, 20.0), Point::new(20.0, 25.0), 0.2)
            },
            &scene,
            &mut Rng::new(1),
        );
        assert_eq!(right.facing, Facing::Right);
    }

    #[test]
    fn arrival_picks_new_wander_target_without_moving() {
        let scene = SceneConfig::default();
        let start = motion(Point::new(20.0, 30.0), Point::new(20.5, 30.5), 0.3);
        let mut rng = ScriptedRng::new(vec![0.0, 0.999]);
        let next = step_motion(&start, &scene, &mut rng);
        assert_eq!(next.position, start.position);
        assert_eq!(next.target.x, scene.wander_area.min_x);
        assert!(scene.wander_area.contains(next.target));
        assert!(next.target.y > 84.0);
    }

    #[test]
    fn positions_are_clamped_not_wrapped() {
        let scene = SceneConfig {
            bounds: Rect::new(0.0, 0.0, 10.0, 10.0),
            ..SceneConfig::default()
        };
        let start = motion(Point::new(9.9, 5.0), Point::new(30.0, 5.0), 2.0);
        let next = step_motion(&start, &scene, &mut Rng::new(1));
        assert_eq!(next.position, Point::new(10.0, 5.0));
    }

    #[test]
    fn stride_never_overshoots_target() {
        let scene = SceneConfig {
            arrival_threshold: 0.1,
            ..SceneConfig::default()
        };
        let start = motion(Point::new(10.0, 10.0), Point::new(11.0, 10.0), 5.0);
        let next = step_motion(&start, &scene, &mut Rng::new(1));
        assert_eq!(next.position, Point::new(11.0, 10.0));
    }

    #[test]
    fn held_entities_are_frozen() {
        let scene = SceneConfig::default();
        let mut held = spawn_motion(&scene, &mut Rng::new(5));
        held.held = true;
        let mut entities = vec![
            entity("held", held),
            entity("free", spawn_motion(&scene, &mut Rng::new(6))),
        ];
        let mut rng = Rng::new(7);
        for _ in 0..500 {
            entities = step(&entities, &scene, &mut rng);
        }
        assert_eq!(entities[0].motion, held);
        assert_ne!(entities[1].motion.position, spawn_motion(&scene, &mut Rng::new(6)).position);
    }

    #[test]
    fn every_position_stays_in_bounds() {
        let scene = SceneConfig::default();
        for seed in 1..=20u32 {
            let mut rng = Rng::new(seed);
            let mut entities: Vec<AnimatedEntity> = (0..25)
                .map(|i| entity(&format!("e{i}"), spawn_motion(&scene, &mut rng)))
                .collect();
            for _ in 0..1_000 {
                entities = step(&entities, &scene, &mut rng);
                for e in &entities {
                    assert!(
                        scene.bounds.contains(e.motion.position),
                        "seed {seed}: {:?} escaped",
                        e.motion.position
                    );
                }
            }
        }
    }

    #[test]
    fn step_keeps_business_fields_and_order() {
        let scene = SceneConfig::default();
        let mut rng = Rng::new(3);
        let entities = vec![
            entity("a", spawn_motion(&scene, &mut rng)),
            entity("b", spawn_motion(&scene, &mut rng)),
        ];
        let next = step(&entities, &scene, &mut rng);
        assert_eq!(next.len(), 2);
        assert_eq!(next[0].id, "a");
        assert_eq!(next[1].name, "B");
        assert_eq!(next[0].identity, entities[0].identity);
    }
}
