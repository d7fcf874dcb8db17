use std::ops::Deref;

use chrono::{DateTime, Utc};
use mongodb::bson::{serde_helpers::chrono_datetime_as_bson_datetime, Document};
use mongodb::error::Error as DbError;
use serde::{Deserialize, Serialize};

use crate::model::mongodb::{Coll, Id};

/// What happened. Lifecycle transitions all share `StateChanged`; the detail
/// document carries the before/after pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditAction {
    ElectionCreated,
    StateChanged,
    OpenScheduled,
    TokensIssued,
    TallyRun,
    HardDeleted,
}

/// Who did it. Scheduled transitions are performed by the system itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Performer {
    Admin(Id),
    Voter(Id),
    System,
}

/// Core audit entry data, as stored in the database. The log is append-only;
/// nothing updates or deletes entries, including election hard deletion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntryCore {
    pub action: AuditAction,
    pub performer: Performer,
    pub election_id: Id,
    /// Action-specific payload, e.g. `{from, to}` for a state change.
    pub detail: Document,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub timestamp: DateTime<Utc>,
    pub correlation_id: String,
}

impl AuditEntryCore {
    pub fn new(
        action: AuditAction,
        performer: Performer,
        election_id: Id,
        detail: Document,
        correlation_id: String,
    ) -> Self {
        Self {
            action,
            performer,
            election_id,
            detail,
            timestamp: Utc::now(),
            correlation_id,
        }
    }
}

/// An audit entry from the database, with its unique ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub entry: AuditEntryCore,
}

impl Deref for AuditLogEntry {
    type Target = AuditEntryCore;

    fn deref(&self) -> &Self::Target {
        &self.entry
    }
}

/// An audit entry as the API presents it, with a plain RFC 3339 timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntryView {
    pub action: AuditAction,
    pub performer: Performer,
    pub election_id: Id,
    pub detail: Document,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: String,
}

impl From<AuditLogEntry> for AuditEntryView {
    fn from(entry: AuditLogEntry) -> Self {
        Self {
            action: entry.entry.action,
            performer: entry.entry.performer,
            election_id: entry.entry.election_id,
            detail: entry.entry.detail,
            timestamp: entry.entry.timestamp,
            correlation_id: entry.entry.correlation_id,
        }
    }
}

/// Append an entry to the audit trail.
pub async fn append(audit: &Coll<AuditEntryCore>, entry: AuditEntryCore) -> Result<(), DbError> {
    debug!(
        "Audit: {:?} on election {} by {:?} ({})",
        entry.action, entry.election_id, entry.performer, entry.correlation_id
    );
    audit.insert_one(entry, None).await?;
    Ok(())
}
