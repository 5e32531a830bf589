use std::future::Future;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::error::StoreResult;
use crate::types::{AttendeePatch, AttendeeRecord, NewAttendee, SyncMode};

mod memory;
mod sheet;

pub use self::memory::MemoryStore;
pub use self::sheet::SheetStore;

/// The remote attendee store. `list_all` always returns the full roster,
/// newest first; the engine never relies on deltas.
pub trait RosterStore: Clone + Send + Sync + 'static {
    fn list_all(&self) -> impl Future<Output = StoreResult<Vec<AttendeeRecord>>> + Send;

    fn insert(&self, attendee: NewAttendee) -> impl Future<Output = StoreResult<String>> + Send;

    fn update(
        &self,
        id: &str,
        patch: AttendeePatch,
    ) -> impl Future<Output = StoreResult<()>> + Send;

    fn remove(&self, id: &str) -> impl Future<Output = StoreResult<()>> + Send;

    /// Clears every winner flag in one logical operation.
    fn reset_all(&self) -> impl Future<Output = StoreResult<()>> + Send;

    /// Push-capable stores hand out a change feed; poll-only stores return `None`.
    fn subscribe(&self) -> Option<ChangeFeed> {
        None
    }

    fn sync_mode(&self) -> SyncMode {
        if self.subscribe().is_some() {
            SyncMode::Push
        } else {
            SyncMode::Poll
        }
    }
}

/// Payload-free "something changed" signal. Dropping the feed unsubscribes.
#[derive(Debug)]
pub struct ChangeFeed {
    rx: broadcast::Receiver<()>,
}

impl ChangeFeed {
    pub(crate) fn new(rx: broadcast::Receiver<()>) -> Self {
        Self { rx }
    }

    /// Resolves on the next change; `false` once the store is gone.
    pub async fn changed(&mut self) -> bool {
        match self.rx.recv().await {
            Ok(()) => true,
            // Missed signals collapse into one, a full refetch covers them all.
            Err(RecvError::Lagged(_)) => true,
            Err(RecvError::Closed) => false,
        }
    }
}

#[derive(Clone, Debug)]
pub enum Backend {
    Memory(MemoryStore),
    Sheet(SheetStore),
}

impl Backend {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Memory(_) => "memory",
            Self::Sheet(_) => "sheet",
        }
    }
}

impl RosterStore for Backend {
    async fn list_all(&self) -> StoreResult<Vec<AttendeeRecord>> {
        match self {
            Self::Memory(store) => store.list_all().await,
            Self::Sheet(store) => store.list_all().await,
        }
    }

    async fn insert(&self, attendee: NewAttendee) -> StoreResult<String> {
        match self {
            Self::Memory(store) => store.insert(attendee).await,
            Self::Sheet(store) => store.insert(attendee).await,
        }
    }

    async fn update(&self, id: &str, patch: AttendeePatch) -> StoreResult<()> {
        match self {
            Self::Memory(store) => store.update(id, patch).await,
            Self::Sheet(store) => store.update(id, patch).await,
        }
    }

    async fn remove(&self, id: &str) -> StoreResult<()> {
        match self {
            Self::Memory(store) => store.remove(id).await,
            Self::Sheet(store) => store.remove(id).await,
        }
    }

    async fn reset_all(&self) -> StoreResult<()> {
        match self {
            Self::Memory(store) => store.reset_all().await,
            Self::Sheet(store) => store.reset_all().await,
        }
    }

    fn subscribe(&self) -> Option<ChangeFeed> {
        match self {
            Self::Memory(store) => store.subscribe(),
            Self::Sheet(store) => store.subscribe(),
        }
    }
}

/// Newest first; ties broken by id so repeated listings agree.
pub fn sort_newest_first(records: &mut [AttendeeRecord]) {
    records.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.id.cmp(&a.id))
    });
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    fn record(id: &str, secs: i64) -> AttendeeRecord {
        AttendeeRecord {
            id: id.to_string(),
            name: id.to_uppercase(),
            created_at: Utc.timestamp_opt(secs, 0).single().expect("valid timestamp"),
            packed_identity: String::new(),
            is_winner: false,
        }
    }

    #[test]
    fn sort_newest_first_orders_by_created_at_then_id() {
        let mut records = vec![record("a", 10), record("c", 30), record("b", 30), record("d", 20)];
        sort_newest_first(&mut records);
        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b", "d", "a"]);
    }

    #[tokio::test]
    async fn backend_reports_sync_mode_of_its_variant() {
        let memory = Backend::Memory(MemoryStore::new());
        assert_eq!(memory.sync_mode(), SyncMode::Push);
        assert_eq!(memory.label(), "memory");

        let sheet = Backend::Sheet(
            SheetStore::new("http://127.0.0.1:9/exec", std::time::Duration::from_secs(1))
                .expect("client builds"),
        );
        assert_eq!(sheet.sync_mode(), SyncMode::Poll);
    }
}
