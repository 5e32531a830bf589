pub const TICK_RATE: u32 = 25;
pub const TICK_MS: u64 = 1000 / TICK_RATE as u64;

pub const POLL_INTERVAL_MS: u64 = 10_000;
pub const SPIN_INTERVAL_MS: u64 = 100;
pub const SPIN_CYCLES: u32 = 20;
pub const SHEETS_TIMEOUT_MS: u64 = 10_000;

pub const SCENE_MAX_X: f32 = 45.0;
pub const SCENE_MAX_Y: f32 = 90.0;
pub const ARRIVAL_THRESHOLD: f32 = 1.5;
pub const MIN_SPEED: f32 = 0.15;
pub const MAX_SPEED: f32 = 0.35;

// New arrivals appear on the left of the sand; wandering covers the full beach.
pub const SPAWN_AREA: (f32, f32, f32, f32) = (5.0, 20.0, 35.0, 80.0);
pub const WANDER_AREA: (f32, f32, f32, f32) = (5.0, 10.0, 45.0, 85.0);

pub const FALLBACK_SPRITE: &str = "Abigail";
pub const SPRITE_OPTIONS: [&str; 10] = [
    "Abigail",
    "Alex",
    "Haley",
    "Harvey",
    "Leah",
    "Sebastian",
    "Shane",
    "Penny",
    "Maru",
    "Sam",
];

pub const MAX_NAME_LEN: usize = 32;
pub const DEFAULT_NAME: &str = "Guest";

pub fn is_known_sprite(name: &str) -> bool {
    SPRITE_OPTIONS.contains(&name)
}
