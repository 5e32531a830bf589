use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::constants::{
    ARRIVAL_THRESHOLD, FALLBACK_SPRITE, MAX_SPEED, MIN_SPEED, POLL_INTERVAL_MS, SCENE_MAX_X,
    SCENE_MAX_Y, SHEETS_TIMEOUT_MS, SPAWN_AREA, SPIN_CYCLES, SPIN_INTERVAL_MS, TICK_MS,
    WANDER_AREA,
};
use crate::error::ConfigError;
use crate::types::Point;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rect {
    pub min_x: f32,
    pub min_y: f32,
    pub max_x: f32,
    pub max_y: f32,
}

impl Rect {
    pub fn new(min_x: f32, min_y: f32, max_x: f32, max_y: f32) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.min_x
            && point.x <= self.max_x
            && point.y >= self.min_y
            && point.y <= self.max_y
    }

    pub fn clamp(&self, point: Point) -> Point {
        Point {
            x: point.x.clamp(self.min_x, self.max_x),
            y: point.y.clamp(self.min_y, self.max_y),
        }
    }

    pub fn intersect(&self, other: &Rect) -> Rect {
        Rect {
            min_x: self.min_x.max(other.min_x),
            min_y: self.min_y.max(other.min_y),
            max_x: self.max_x.min(other.max_x),
            max_y: self.max_y.min(other.max_y),
        }
    }

    fn is_valid(&self) -> bool {
        [self.min_x, self.min_y, self.max_x, self.max_y]
            .iter()
            .all(|value| value.is_finite())
            && self.min_x <= self.max_x
            && self.min_y <= self.max_y
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SceneConfig {
    /// Hard limits; every position is clamped into this rectangle.
    pub bounds: Rect,
    pub spawn_area: Rect,
    pub wander_area: Rect,
    pub arrival_threshold: f32,
    pub min_speed: f32,
    pub max_speed: f32,
}

impl Default for SceneConfig {
    fn default() -> Self {
        let (sx0, sy0, sx1, sy1) = SPAWN_AREA;
        let (wx0, wy0, wx1, wy1) = WANDER_AREA;
        Self {
            bounds: Rect::new(0.0, 0.0, SCENE_MAX_X, SCENE_MAX_Y),
            spawn_area: Rect::new(sx0, sy0, sx1, sy1),
            wander_area: Rect::new(wx0, wy0, wx1, wy1),
            arrival_threshold: ARRIVAL_THRESHOLD,
            min_speed: MIN_SPEED,
            max_speed: MAX_SPEED,
        }
    }
}

impl SceneConfig {
    pub fn with_bounds(max_x: f32, max_y: f32) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let bounds = Rect::new(0.0, 0.0, max_x, max_y);
        if !bounds.is_valid() {
            return Err(ConfigError::Bounds(format!("{max_x}x{max_y}")));
        }
        let mut spawn_area = defaults.spawn_area.intersect(&bounds);
        let mut wander_area = defaults.wander_area.intersect(&bounds);
        // A scene smaller than the default areas falls back to its full extent.
        if !spawn_area.is_valid() {
            spawn_area = bounds;
        }
        if !wander_area.is_valid() {
            wander_area = bounds;
        }
        Ok(Self {
            bounds,
            spawn_area,
            wander_area,
            ..defaults
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct EngineConfig {
    pub scene: SceneConfig,
    pub tick: Duration,
    pub poll_interval: Duration,
    pub spin_cycles: u32,
    pub spin_interval: Duration,
    pub fallback_sprite: String,
    pub seed: Option<u32>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scene: SceneConfig::default(),
            tick: Duration::from_millis(TICK_MS),
            poll_interval: Duration::from_millis(POLL_INTERVAL_MS),
            spin_cycles: SPIN_CYCLES,
            spin_interval: Duration::from_millis(SPIN_INTERVAL_MS),
            fallback_sprite: FALLBACK_SPRITE.to_string(),
            seed: None,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let max_x = parse_var(&lookup, "SCENE_MAX_X")?.unwrap_or(defaults.scene.bounds.max_x);
        let max_y = parse_var(&lookup, "SCENE_MAX_Y")?.unwrap_or(defaults.scene.bounds.max_y);
        let fallback_sprite = lookup("FALLBACK_SPRITE")
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or(defaults.fallback_sprite);

        Ok(Self {
            scene: SceneConfig::with_bounds(max_x, max_y)?,
            tick: parse_millis(&lookup, "SIM_TICK_MS")?.unwrap_or(defaults.tick),
            poll_interval: parse_millis(&lookup, "ROSTER_POLL_INTERVAL_MS")?
                .unwrap_or(defaults.poll_interval),
            spin_cycles: parse_nonzero(&lookup, "DRAW_SPIN_CYCLES")?
                .unwrap_or(defaults.spin_cycles),
            spin_interval: parse_millis(&lookup, "DRAW_SPIN_INTERVAL_MS")?
                .unwrap_or(defaults.spin_interval),
            fallback_sprite,
            seed: parse_var(&lookup, "ROSTER_SEED")?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackendConfig {
    Memory { db_path: Option<PathBuf> },
    Sheet { url: String, timeout: Duration },
}

#[derive(Clone, Debug, PartialEq)]
pub struct ServerConfig {
    pub port: u16,
    pub static_dir: Option<PathBuf>,
    pub backend: BackendConfig,
    pub engine: EngineConfig,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let port = parse_var(&lookup, "PORT")?.unwrap_or(8080);
        let sheets_url = lookup("SHEETS_URL")
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        let requested = lookup("ROSTER_BACKEND").map(|value| value.trim().to_ascii_lowercase());

        let backend = match (requested.as_deref(), sheets_url) {
            (Some("sheet"), None) => return Err(ConfigError::Missing("SHEETS_URL")),
            (Some("sheet") | None, Some(url)) => BackendConfig::Sheet {
                url,
                timeout: parse_millis(&lookup, "SHEETS_TIMEOUT_MS")?
                    .unwrap_or(Duration::from_millis(SHEETS_TIMEOUT_MS)),
            },
            (Some("memory") | None, _) => BackendConfig::Memory {
                db_path: match lookup("ROSTER_DB_PATH") {
                    Some(raw) if raw.trim().eq_ignore_ascii_case("none") => None,
                    Some(raw) => Some(PathBuf::from(raw)),
                    None => Some(PathBuf::from(".data/roster.json")),
                },
            },
            (Some(other), _) => {
                return Err(ConfigError::Invalid {
                    key: "ROSTER_BACKEND",
                    value: other.to_string(),
                })
            }
        };

        Ok(Self {
            port,
            static_dir: lookup("STATIC_DIR").map(PathBuf::from),
            backend,
            engine: EngineConfig::from_lookup(&lookup)?,
        })
    }
}

fn parse_var<F, T>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<T>()
        .map(Some)
        .map_err(|_| ConfigError::Invalid { key, value: raw })
}

fn parse_nonzero<F>(lookup: &F, key: &'static str) -> Result<Option<u32>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match parse_var::<F, u32>(lookup, key)? {
        Some(0) => Err(ConfigError::Invalid {
            key,
            value: "0".to_string(),
        }),
        other => Ok(other),
    }
}

fn parse_millis<F>(lookup: &F, key: &'static str) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    Ok(parse_nonzero(lookup, key)?.map(|ms| Duration::from_millis(ms as u64)))
}
