use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttendeeRecord {
    pub id: String,
    pub name: String,
    #[serde(rename = "created_at")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "face_photo_url", default)]
    pub packed_identity: String,
    #[serde(rename = "is_winner", default)]
    pub is_winner: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NewAttendee {
    pub name: String,
    #[serde(rename = "face_photo_url")]
    pub packed_identity: String,
    #[serde(rename = "is_winner")]
    pub is_winner: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct AttendeePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "face_photo_url", skip_serializing_if = "Option::is_none")]
    pub packed_identity: Option<String>,
    #[serde(rename = "is_winner", skip_serializing_if = "Option::is_none")]
    pub is_winner: Option<bool>,
}

impl AttendeePatch {
    pub fn rename(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn winner() -> Self {
        Self {
            is_winner: Some(true),
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Identity {
    #[serde(rename = "sprite")]
    pub sprite_name: String,
    #[serde(rename = "photoUrl")]
    pub photo_url: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Facing {
    Left,
    Right,
}

impl Facing {
    pub fn sign(self) -> i8 {
        match self {
            Self::Left => -1,
            Self::Right => 1,
        }
    }
}

/// Local-only simulation state. Created once per attendee id and carried
/// through every reconciliation while that id stays on the roster.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MotionState {
    pub position: Point,
    pub target: Point,
    pub speed: f32,
    pub facing: Facing,
    pub held: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AnimatedEntity {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub identity: Identity,
    pub is_winner: bool,
    pub motion: MotionState,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    Push,
    Poll,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DrawPhase {
    Idle,
    Spinning,
    Revealed,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum CommitStatus {
    Pending,
    Committed,
    Failed(String),
}

#[derive(Clone, Debug, Serialize)]
pub struct EntityView {
    pub id: String,
    pub name: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub identity: Identity,
    #[serde(rename = "isWinner")]
    pub is_winner: bool,
    pub x: f32,
    pub y: f32,
    pub facing: i8,
    pub held: bool,
}

impl From<&AnimatedEntity> for EntityView {
    fn from(entity: &AnimatedEntity) -> Self {
        Self {
            id: entity.id.clone(),
            name: entity.name.clone(),
            created_at: entity.created_at,
            identity: entity.identity.clone(),
            is_winner: entity.is_winner,
            x: entity.motion.position.x,
            y: entity.motion.position.y,
            facing: entity.motion.facing.sign(),
            held: entity.motion.held,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct DrawView {
    pub phase: DrawPhase,
    #[serde(rename = "candidateId")]
    pub candidate_id: Option<String>,
    #[serde(rename = "winnerId")]
    pub winner_id: Option<String>,
    pub commit: Option<CommitStatus>,
}

#[derive(Clone, Debug, Serialize)]
pub struct SceneView {
    pub tick: u64,
    pub sync: SyncMode,
    #[serde(rename = "lastSyncedAt")]
    pub last_synced_at: Option<DateTime<Utc>>,
    #[serde(rename = "lastFetchError")]
    pub last_fetch_error: Option<String>,
    pub entities: Vec<EntityView>,
    pub draw: DrawView,
}

impl SceneView {
    pub fn empty(sync: SyncMode) -> Self {
        Self {
            tick: 0,
            sync,
            last_synced_at: None,
            last_fetch_error: None,
            entities: Vec::new(),
            draw: DrawView {
                phase: DrawPhase::Idle,
                candidate_id: None,
                winner_id: None,
                commit: None,
            },
        }
    }

    pub fn entity(&self, id: &str) -> Option<&EntityView> {
        self.entities.iter().find(|entity| entity.id == id)
    }
}
