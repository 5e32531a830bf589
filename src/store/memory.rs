use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::distr::Alphanumeric;
use rand::Rng as _;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, warn};

use super::{sort_newest_first, ChangeFeed, RosterStore};
use crate::error::{StoreError, StoreResult};
use crate::types::{AttendeePatch, AttendeeRecord, NewAttendee};

const STORE_FILE_VERSION: u8 = 1;
const CHANGE_CHANNEL_CAPACITY: usize = 16;

#[derive(Clone, Debug, Serialize, Deserialize)]
struct StoreFile {
    version: u8,
    attendees: Vec<AttendeeRecord>,
}

#[derive(Clone, Debug, Deserialize)]
struct StoreFileRaw {
    version: u8,
    attendees: Vec<serde_json::Value>,
}

#[derive(Debug)]
struct Inner {
    file_path: Option<PathBuf>,
    attendees: Mutex<HashMap<String, AttendeeRecord>>,
    changes: broadcast::Sender<()>,
}

/// In-process roster that notifies subscribers on every mutation, optionally
/// persisted to a JSON file after each successful write.
#[derive(Clone, Debug)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::from_parts(None, HashMap::new())
    }

    pub fn from_records(records: Vec<AttendeeRecord>) -> Self {
        let attendees = records
            .into_iter()
            .map(|record| (record.id.clone(), record))
            .collect();
        Self::from_parts(None, attendees)
    }

    pub fn open(file_path: PathBuf) -> Self {
        let attendees = load_attendees(&file_path);
        Self::from_parts(Some(file_path), attendees)
    }

    fn from_parts(file_path: Option<PathBuf>, attendees: HashMap<String, AttendeeRecord>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                file_path,
                attendees: Mutex::new(attendees),
                changes,
            }),
        }
    }

    /// Applies `mutate` to a copy, persists it, then swaps it in. A failed
    /// save leaves the live roster untouched. The lock is held across the
    /// write so file order matches commit order.
    async fn commit<T, F>(&self, mutate: F) -> StoreResult<T>
    where
        F: FnOnce(&mut HashMap<String, AttendeeRecord>) -> StoreResult<T>,
    {
        let mut guard = self.inner.attendees.lock().await;
        let mut next = guard.clone();
        let out = mutate(&mut next)?;
        if let Some(path) = &self.inner.file_path {
            save_attendees(path, &next).await?;
        }
        *guard = next;
        drop(guard);

        let _ = self.inner.changes.send(());
        Ok(out)
    }
}

impl RosterStore for MemoryStore {
    async fn list_all(&self) -> StoreResult<Vec<AttendeeRecord>> {
        let mut records: Vec<AttendeeRecord> =
            self.inner.attendees.lock().await.values().cloned().collect();
        sort_newest_first(&mut records);
        Ok(records)
    }

    async fn insert(&self, attendee: NewAttendee) -> StoreResult<String> {
        let created_at = Utc::now();
        let id = make_attendee_id(created_at);
        let record = AttendeeRecord {
            id: id.clone(),
            name: attendee.name,
            created_at,
            packed_identity: attendee.packed_identity,
            is_winner: attendee.is_winner,
        };
        self.commit(move |attendees| {
            attendees.insert(record.id.clone(), record);
            Ok(())
        })
        .await?;
        debug!(%id, "attendee inserted");
        Ok(id)
    }

    async fn update(&self, id: &str, patch: AttendeePatch) -> StoreResult<()> {
        self.commit(|attendees| {
            let record = attendees
                .get_mut(id)
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
            if let Some(name) = patch.name {
                record.name = name;
            }
            if let Some(packed_identity) = patch.packed_identity {
                record.packed_identity = packed_identity;
            }
            if let Some(is_winner) = patch.is_winner {
                record.is_winner = is_winner;
            }
            Ok(())
        })
        .await
    }

    async fn remove(&self, id: &str) -> StoreResult<()> {
        self.commit(|attendees| {
            attendees
                .remove(id)
                .map(|_| ())
                .ok_or_else(|| StoreError::NotFound(id.to_string()))
        })
        .await
    }

    async fn reset_all(&self) -> StoreResult<()> {
        self.commit(|attendees| {
            for record in attendees.values_mut() {
                record.is_winner = false;
            }
            Ok(())
        })
        .await
    }

    fn subscribe(&self) -> Option<ChangeFeed> {
        Some(ChangeFeed::new(self.inner.changes.subscribe()))
    }
}

fn make_attendee_id(created_at: DateTime<Utc>) -> String {
    let suffix: String = rand::rng()
        .sample_iter(Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    format!("att_{}_{suffix}", created_at.timestamp_millis())
}

async fn save_attendees(
    path: &Path,
    attendees: &HashMap<String, AttendeeRecord>,
) -> StoreResult<()> {
    let mut records: Vec<AttendeeRecord> = attendees.values().cloned().collect();
    sort_newest_first(&mut records);
    let payload = serde_json::to_string_pretty(&StoreFile {
        version: STORE_FILE_VERSION,
        attendees: records,
    })?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, payload).await?;
    Ok(())
}

fn load_attendees(path: &Path) -> HashMap<String, AttendeeRecord> {
    let text = match fs::read_to_string(path) {
        Ok(value) => value,
        Err(error) => {
            if error.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), %error, "failed to read roster file");
            }
            return HashMap::new();
        }
    };
    let parsed = match serde_json::from_str::<StoreFileRaw>(&text) {
        Ok(value) if value.version == STORE_FILE_VERSION => value,
        Ok(value) => {
            warn!(path = %path.display(), version = value.version, "unsupported roster file version");
            return HashMap::new();
        }
        Err(error) => {
            warn!(path = %path.display(), %error, "failed to parse roster file");
            return HashMap::new();
        }
    };

    let mut attendees = HashMap::new();
    for (index, raw_value) in parsed.attendees.into_iter().enumerate() {
        let record: AttendeeRecord = match serde_json::from_value(raw_value) {
            Ok(record) => record,
            Err(error) => {
                warn!(path = %path.display(), index, %error, "skipping unreadable attendee");
                continue;
            }
        };
        if record.id.trim().is_empty() {
            continue;
        }
        // First occurrence wins; ids are immutable once created.
        attendees.entry(record.id.clone()).or_insert(record);
    }
    attendees
}
