use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{sort_newest_first, RosterStore};
use crate::error::{StoreError, StoreResult};
use crate::types::{AttendeePatch, AttendeeRecord, NewAttendee};

/// Spreadsheet-backed roster exposed through a script web app. It cannot
/// push, so the controller polls it.
#[derive(Clone, Debug)]
pub struct SheetStore {
    client: reqwest::Client,
    url: String,
}

impl SheetStore {
    pub fn new(url: impl Into<String>, timeout: Duration) -> StoreResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    async fn post<B: Serialize + ?Sized>(&self, action: &str, body: &B) -> StoreResult<Value> {
        let response = self
            .client
            .post(&self.url)
            .query(&[("action", action)])
            // The script host only reads the raw body; text/plain keeps it simple.
            .header(reqwest::header::CONTENT_TYPE, "text/plain;charset=utf-8")
            .body(serde_json::to_string(body)?)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(StoreError::Status(response.status().as_u16()));
        }
        let reply: Value = response.json().await?;
        check_reply(&reply)?;
        Ok(reply)
    }
}

impl RosterStore for SheetStore {
    async fn list_all(&self) -> StoreResult<Vec<AttendeeRecord>> {
        let response = self.client.get(&self.url).send().await?;
        if !response.status().is_success() {
            return Err(StoreError::Status(response.status().as_u16()));
        }
        let body: Value = response.json().await?;
        let rows = body
            .as_array()
            .ok_or_else(|| StoreError::Malformed("expected a JSON array of rows".to_string()))?;

        let mut records = Vec::with_capacity(rows.len());
        for (index, row) in rows.iter().enumerate() {
            match parse_row(row) {
                Some(record) => records.push(record),
                None => debug!(index, "skipping sheet row without id"),
            }
        }
        sort_newest_first(&mut records);
        Ok(records)
    }

    async fn insert(&self, attendee: NewAttendee) -> StoreResult<String> {
        let reply = self.post("insert", &attendee).await?;
        reply
            .get("id")
            .and_then(value_to_string)
            .ok_or_else(|| StoreError::Malformed("insert reply carried no id".to_string()))
    }

    async fn update(&self, id: &str, patch: AttendeePatch) -> StoreResult<()> {
        let mut body = serde_json::to_value(&patch)?;
        if let Some(object) = body.as_object_mut() {
            object.insert("id".to_string(), Value::String(id.to_string()));
        }
        self.post("update", &body)
            .await
            .map(|_| ())
            .map_err(|error| not_found_for(error, id))
    }

    async fn remove(&self, id: &str) -> StoreResult<()> {
        self.post("delete", &json!({ "id": id }))
            .await
            .map(|_| ())
            .map_err(|error| not_found_for(error, id))
    }

    async fn reset_all(&self) -> StoreResult<()> {
        self.post("reset_winners", &json!({})).await.map(|_| ())
    }
}

fn check_reply(reply: &Value) -> StoreResult<()> {
    match reply.get("status").and_then(Value::as_str) {
        Some("success") => Ok(()),
        Some(_) => Err(StoreError::Rejected(
            reply
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("request failed")
                .to_string(),
        )),
        None => Err(StoreError::Malformed("reply carried no status".to_string())),
    }
}

// The script answers an unmatched id with its generic "action not found".
fn not_found_for(error: StoreError, id: &str) -> StoreError {
    match error {
        StoreError::Rejected(message) if message.eq_ignore_ascii_case("action not found") => {
            StoreError::NotFound(id.to_string())
        }
        other => other,
    }
}

fn parse_row(row: &Value) -> Option<AttendeeRecord> {
    let object = row.as_object()?;
    let id = object.get("id").and_then(value_to_string)?;
    if id.is_empty() {
        return None;
    }
    let name = object
        .get("name")
        .and_then(value_to_string)
        .unwrap_or_default();
    let created_at = object
        .get("created_at")
        .and_then(Value::as_str)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw.trim()).ok())
        .map(|at| at.with_timezone(&Utc));
    let created_at = match created_at {
        Some(at) => at,
        None => {
            warn!(%id, "sheet row has no readable created_at");
            DateTime::<Utc>::UNIX_EPOCH
        }
    };
    let packed_identity = object
        .get("face_photo_url")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let is_winner = match object.get("is_winner") {
        Some(Value::Bool(value)) => *value,
        Some(Value::String(value)) => value.trim().eq_ignore_ascii_case("true"),
        _ => false,
    };

    Some(AttendeeRecord {
        id,
        name,
        created_at,
        packed_identity,
        is_winner,
    })
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.trim().to_string()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}
