//! Event record store contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist event records in both representations: the embedded JSON list
//!   on the child row and the indexed `events` table.
//! - Expose single-side maintenance writes used by the repair engine.
//!
//! # Invariants
//! - Write paths call `EventRecord::validate()` before SQL mutations.
//! - `create` writes both representations in one transaction.
//! - `update` only closes an open record; closed records are immutable.
//! - Read paths reject invalid persisted state instead of masking it.

use crate::db::migrations::latest_version;
use crate::db::{self, DbError};
use crate::model::child::ChildId;
use crate::model::event::{
    EmotionalState, EventId, EventPatch, EventRecord, EventType, EventValidationError,
};
use log::warn;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

const EVENT_SELECT_SQL: &str = "SELECT
    id,
    child_id,
    event_type,
    start_time,
    end_time,
    sleep_delay,
    awake_delay,
    emotional_state,
    notes,
    payload
FROM events";

const EVENT_ORDER_SQL: &str = "ORDER BY start_time IS NULL, start_time DESC, id ASC";

/// SQLite caps bound parameters per statement; deletes are chunked below it.
const DELETE_CHUNK_SIZE: usize = 500;

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error shared by event, child and document stores.
#[derive(Debug)]
pub enum RepoError {
    Validation(EventValidationError),
    Db(DbError),
    /// Event record does not exist.
    NotFound(EventId),
    /// Child record does not exist.
    ChildNotFound(ChildId),
    /// Patch targeted a record whose interval is already closed.
    AlreadyClosed(EventId),
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    InvalidData(String),
}

impl RepoError {
    /// Whether the store itself is unreachable. Batch callers abort on these
    /// and isolate everything else per child.
    pub fn is_unavailable(&self) -> bool {
        match self {
            Self::Db(err) => err.is_unavailable(),
            Self::UninitializedConnection { .. } => true,
            Self::Validation(_)
            | Self::NotFound(_)
            | Self::ChildNotFound(_)
            | Self::AlreadyClosed(_)
            | Self::InvalidData(_) => false,
        }
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound(id) => write!(f, "event not found: {id}"),
            Self::ChildNotFound(id) => write!(f, "child not found: {id}"),
            Self::AlreadyClosed(id) => write!(f, "event interval already closed: {id}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "repository requires schema version {expected_version}, got {actual_version}"
            ),
            Self::InvalidData(message) => write!(f, "invalid persisted event data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<EventValidationError> for RepoError {
    fn from(value: EventValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Indexed row reduced to ownership and key columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedEntry {
    pub id: EventId,
    pub child_id: ChildId,
    pub kind: EventType,
    pub start_time: Option<i64>,
}

/// Unvalidated listing of the indexed table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexListing {
    pub entries: Vec<IndexedEntry>,
    /// Rows whose id, owner or type column could not be decoded.
    pub unreadable: Vec<String>,
}

/// Persistence contract over both event representations.
pub trait EventRecordStore {
    /// Dual write: inserts the indexed row and appends to the embedded list.
    fn create(&self, record: &EventRecord) -> RepoResult<EventId>;
    /// Embedded representation for one child, in stored order.
    fn get(&self, child_id: ChildId) -> RepoResult<Vec<EventRecord>>;
    /// Indexed representation for one child, most recent first.
    fn list_indexed(&self, child_id: ChildId) -> RepoResult<Vec<EventRecord>>;
    /// Every indexed record regardless of owner, most recent first.
    fn list_all_indexed(&self) -> RepoResult<Vec<EventRecord>>;
    /// Owner and key of every indexed row, without record validation.
    ///
    /// A row that fails record validation (for example `end < start`) is
    /// still listed. Rows with undecodable ids land in `unreadable`.
    fn list_index_entries(&self) -> RepoResult<IndexListing>;
    /// Closes an open record in both representations.
    fn update(&self, id: EventId, patch: EventPatch) -> RepoResult<EventRecord>;
    /// Deletes indexed records by id. Returns deleted row count.
    fn delete_many(&self, ids: &[EventId]) -> RepoResult<usize>;
    /// Deletes every indexed record referencing `child_id`.
    fn delete_by_child(&self, child_id: ChildId) -> RepoResult<usize>;
    /// Single-side write into the indexed table only.
    fn insert_indexed(&self, record: &EventRecord) -> RepoResult<EventId>;
    /// Replaces the indexed set of one child atomically.
    fn replace_indexed(&self, child_id: ChildId, records: &[EventRecord]) -> RepoResult<usize>;
    /// Replaces the embedded list of one child atomically.
    fn replace_embedded(&self, child_id: ChildId, records: &[EventRecord]) -> RepoResult<()>;
    /// Replaces both representations of one child in one transaction.
    fn replace_all(&self, child_id: ChildId, records: &[EventRecord]) -> RepoResult<usize>;
    /// Connectivity check (`SELECT 1`).
    fn ping(&self) -> RepoResult<()>;
}

/// SQLite-backed event store.
#[derive(Clone, Copy)]
pub struct SqliteEventStore<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteEventStore<'conn> {
    /// Constructs a store from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_schema_ready(conn)?;
        Ok(Self { conn })
    }
}

impl EventRecordStore for SqliteEventStore<'_> {
    fn create(&self, record: &EventRecord) -> RepoResult<EventId> {
        record.validate()?;

        let tx = self.conn.unchecked_transaction()?;
        let mut embedded = load_embedded(&tx, record.child_id)?
            .ok_or(RepoError::ChildNotFound(record.child_id))?;
        insert_event_row(&tx, record)?;
        embedded.push(record.clone());
        store_embedded(&tx, record.child_id, &embedded)?;
        tx.commit()?;

        Ok(record.id)
    }

    fn get(&self, child_id: ChildId) -> RepoResult<Vec<EventRecord>> {
        load_embedded(self.conn, child_id)?.ok_or(RepoError::ChildNotFound(child_id))
    }

    fn list_indexed(&self, child_id: ChildId) -> RepoResult<Vec<EventRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "{EVENT_SELECT_SQL} WHERE child_id = ?1 {EVENT_ORDER_SQL};"
        ))?;
        let mut rows = stmt.query([child_id.to_string()])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(parse_event_row(row)?);
        }
        Ok(records)
    }

    fn list_all_indexed(&self) -> RepoResult<Vec<EventRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{EVENT_SELECT_SQL} {EVENT_ORDER_SQL};"))?;
        let mut rows = stmt.query([])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(parse_event_row(row)?);
        }
        Ok(records)
    }

    fn update(&self, id: EventId, patch: EventPatch) -> RepoResult<EventRecord> {
        let tx = self.conn.unchecked_transaction()?;
        let mut record = get_indexed(&tx, id)?.ok_or(RepoError::NotFound(id))?;
        if record.end_time.is_some() {
            return Err(RepoError::AlreadyClosed(id));
        }
        record.end_time = Some(patch.end_time);
        record.validate()?;

        tx.execute(
            "UPDATE events
             SET
                end_time = ?2,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1
               AND end_time IS NULL;",
            params![id.to_string(), patch.end_time],
        )?;

        if let Some(mut embedded) = load_embedded(&tx, record.child_id)? {
            // Repairs may re-derive indexed ids; the open copy with the same
            // key stands in for it.
            let key = record.key();
            let position = embedded
                .iter()
                .position(|entry| entry.id == id)
                .or_else(|| {
                    embedded
                        .iter()
                        .position(|entry| entry.is_open() && entry.key() == key)
                });
            match position {
                Some(index) => {
                    embedded[index].end_time = Some(patch.end_time);
                    store_embedded(&tx, record.child_id, &embedded)?;
                }
                None => warn!(
                    "event=event_update module=event_repo status=embedded_missing id={} child_id={}",
                    id, record.child_id
                ),
            }
        }
        tx.commit()?;

        Ok(record)
    }

    fn list_index_entries(&self) -> RepoResult<IndexListing> {
        let mut stmt = self.conn.prepare(
            "SELECT id, child_id, event_type, start_time
             FROM events
             ORDER BY start_time IS NULL, start_time DESC, id ASC;",
        )?;
        let mut rows = stmt.query([])?;
        let mut listing = IndexListing::default();
        while let Some(row) = rows.next()? {
            match parse_index_entry(row) {
                Ok(entry) => listing.entries.push(entry),
                Err(RepoError::InvalidData(reason)) => {
                    warn!(
                        "event=index_listing module=event_repo status=unreadable_row reason={}",
                        reason
                    );
                    listing.unreadable.push(reason);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(listing)
    }

    fn delete_many(&self, ids: &[EventId]) -> RepoResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let tx = self.conn.unchecked_transaction()?;
        let mut deleted = 0;
        for chunk in ids.chunks(DELETE_CHUNK_SIZE) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let bind_values = chunk
                .iter()
                .map(|id| Value::Text(id.to_string()))
                .collect::<Vec<_>>();
            deleted += tx.execute(
                &format!("DELETE FROM events WHERE id IN ({placeholders});"),
                params_from_iter(bind_values),
            )?;
        }
        tx.commit()?;

        Ok(deleted)
    }

    fn delete_by_child(&self, child_id: ChildId) -> RepoResult<usize> {
        let deleted = self.conn.execute(
            "DELETE FROM events WHERE child_id = ?1;",
            [child_id.to_string()],
        )?;
        Ok(deleted)
    }

    fn insert_indexed(&self, record: &EventRecord) -> RepoResult<EventId> {
        record.validate()?;
        insert_event_row(self.conn, record)?;
        Ok(record.id)
    }

    fn replace_indexed(&self, child_id: ChildId, records: &[EventRecord]) -> RepoResult<usize> {
        for record in records {
            record.validate()?;
        }

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM events WHERE child_id = ?1;",
            [child_id.to_string()],
        )?;
        for record in records {
            let mut owned = record.clone();
            owned.child_id = child_id;
            insert_event_row(&tx, &owned)?;
        }
        tx.commit()?;

        Ok(records.len())
    }

    fn replace_embedded(&self, child_id: ChildId, records: &[EventRecord]) -> RepoResult<()> {
        for record in records {
            record.validate()?;
        }
        if !store_embedded(self.conn, child_id, records)? {
            return Err(RepoError::ChildNotFound(child_id));
        }
        Ok(())
    }

    fn replace_all(&self, child_id: ChildId, records: &[EventRecord]) -> RepoResult<usize> {
        for record in records {
            record.validate()?;
        }

        let tx = self.conn.unchecked_transaction()?;
        if !store_embedded(&tx, child_id, records)? {
            return Err(RepoError::ChildNotFound(child_id));
        }
        tx.execute(
            "DELETE FROM events WHERE child_id = ?1;",
            [child_id.to_string()],
        )?;
        for record in records {
            let mut owned = record.clone();
            owned.child_id = child_id;
            insert_event_row(&tx, &owned)?;
        }
        tx.commit()?;

        Ok(records.len())
    }

    fn ping(&self) -> RepoResult<()> {
        db::ping(self.conn)?;
        Ok(())
    }
}

/// Fails unless the connection carries the latest schema.
pub(crate) fn ensure_schema_ready(conn: &Connection) -> RepoResult<()> {
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    let expected_version = latest_version();
    if actual_version != expected_version {
        return Err(RepoError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }
    Ok(())
}

pub(crate) fn parse_uuid(value: &str, column: &str) -> RepoResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| RepoError::InvalidData(format!("invalid uuid value `{value}` in {column}")))
}

fn get_indexed(conn: &Connection, id: EventId) -> RepoResult<Option<EventRecord>> {
    let mut stmt = conn.prepare(&format!("{EVENT_SELECT_SQL} WHERE id = ?1;"))?;
    let mut rows = stmt.query([id.to_string()])?;
    match rows.next()? {
        Some(row) => Ok(Some(parse_event_row(row)?)),
        None => Ok(None),
    }
}

fn insert_event_row(conn: &Connection, record: &EventRecord) -> RepoResult<()> {
    let payload = if record.payload.is_null() {
        None
    } else {
        Some(record.payload.to_string())
    };

    conn.execute(
        "INSERT INTO events (
            id,
            child_id,
            event_type,
            start_time,
            end_time,
            sleep_delay,
            awake_delay,
            emotional_state,
            notes,
            payload
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10);",
        params![
            record.id.to_string(),
            record.child_id.to_string(),
            record.kind.as_str(),
            record.start_time,
            record.end_time,
            record.sleep_delay,
            record.awake_delay,
            record.emotional_state.map(EmotionalState::as_str),
            record.notes.as_deref(),
            payload,
        ],
    )?;
    Ok(())
}

/// Loads the embedded list. `None` when the child row does not exist.
fn load_embedded(conn: &Connection, child_id: ChildId) -> RepoResult<Option<Vec<EventRecord>>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT embedded_events FROM children WHERE id = ?1;",
            [child_id.to_string()],
            |row| row.get(0),
        )
        .optional()?;

    let Some(raw) = raw else {
        return Ok(None);
    };

    let mut records: Vec<EventRecord> = serde_json::from_str(&raw).map_err(|err| {
        RepoError::InvalidData(format!(
            "children.embedded_events for {child_id} is not a valid event list: {err}"
        ))
    })?;
    for record in &mut records {
        record.child_id = child_id;
    }
    Ok(Some(records))
}

/// Writes the embedded list. Returns `false` when the child row is missing.
fn store_embedded(conn: &Connection, child_id: ChildId, records: &[EventRecord]) -> RepoResult<bool> {
    let raw = serde_json::to_string(records)
        .map_err(|err| RepoError::InvalidData(format!("cannot encode embedded events: {err}")))?;
    let changed = conn.execute(
        "UPDATE children
         SET
            embedded_events = ?2,
            updated_at = (strftime('%s', 'now') * 1000)
         WHERE id = ?1;",
        params![child_id.to_string(), raw],
    )?;
    Ok(changed > 0)
}

fn parse_index_entry(row: &Row<'_>) -> RepoResult<IndexedEntry> {
    let id_text: String = row.get("id")?;
    let child_text: String = row.get("child_id")?;
    let type_text: String = row.get("event_type")?;
    let kind = EventType::parse(&type_text).ok_or_else(|| {
        RepoError::InvalidData(format!("invalid event type `{type_text}` in row `{id_text}`"))
    })?;
    Ok(IndexedEntry {
        id: parse_uuid(&id_text, "events.id")?,
        child_id: parse_uuid(&child_text, "events.child_id")?,
        kind,
        start_time: row.get("start_time")?,
    })
}

fn parse_event_row(row: &Row<'_>) -> RepoResult<EventRecord> {
    let id_text: String = row.get("id")?;
    let child_text: String = row.get("child_id")?;

    let type_text: String = row.get("event_type")?;
    let kind = EventType::parse(&type_text).ok_or_else(|| {
        RepoError::InvalidData(format!("invalid event type `{type_text}` in events.event_type"))
    })?;

    let emotional_state = match row.get::<_, Option<String>>("emotional_state")? {
        Some(value) => Some(EmotionalState::parse(&value).ok_or_else(|| {
            RepoError::InvalidData(format!(
                "invalid emotional state `{value}` in events.emotional_state"
            ))
        })?),
        None => None,
    };

    let payload = match row.get::<_, Option<String>>("payload")? {
        Some(raw) => serde_json::from_str(&raw).map_err(|err| {
            RepoError::InvalidData(format!("invalid json in events.payload: {err}"))
        })?,
        None => serde_json::Value::Null,
    };

    let record = EventRecord {
        id: parse_uuid(&id_text, "events.id")?,
        child_id: parse_uuid(&child_text, "events.child_id")?,
        kind,
        start_time: row.get("start_time")?,
        end_time: row.get("end_time")?,
        sleep_delay: row.get("sleep_delay")?,
        awake_delay: row.get("awake_delay")?,
        emotional_state,
        notes: row.get("notes")?,
        payload,
    };
    record.validate()?;
    Ok(record)
}
