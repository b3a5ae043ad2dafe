use lullaby_core::db::{open_db_in_memory, DbError};
use lullaby_core::{
    Child, ChildDirectory, ChildId, EventId, EventPatch, EventRecord, EventRecordStore, EventType,
    HealthCheck, HealthStatus, IndexListing, IntegrityConfig, RepoError, RepoResult,
    SqliteChildDirectory, SqliteEventStore,
};
use rusqlite::Connection;
use std::time::Duration;
use uuid::Uuid;

fn config() -> IntegrityConfig {
    IntegrityConfig::default().with_sweep_delay(Duration::ZERO)
}

fn seed_child(conn: &Connection) -> ChildId {
    SqliteChildDirectory::try_new(conn)
        .unwrap()
        .create_child(&Child::new(None, "Robin"))
        .unwrap()
}

fn seed_with_orphans(conn: &Connection, valid: i64, orphaned: i64) {
    let child_id = seed_child(conn);
    let store = SqliteEventStore::try_new(conn).unwrap();
    for index in 0..valid {
        store
            .create(&EventRecord::new(child_id, EventType::Feeding, Some(index * 1_000)))
            .unwrap();
    }
    let ghost = Uuid::new_v4();
    for index in 0..orphaned {
        store
            .insert_indexed(&EventRecord::new(ghost, EventType::Wake, Some(index * 1_000)))
            .unwrap();
    }
}

fn check(conn: &Connection) -> lullaby_core::HealthReport {
    HealthCheck::new(
        SqliteEventStore::try_new(conn).unwrap(),
        SqliteChildDirectory::try_new(conn).unwrap(),
        config(),
    )
    .check()
}

#[test]
fn clean_store_is_healthy() {
    let conn = open_db_in_memory().unwrap();
    seed_with_orphans(&conn, 10, 0);

    let report = check(&conn);
    assert_eq!(report.status, HealthStatus::Healthy);
    assert!(report.store_connected);
    assert_eq!(report.total_indexed, 10);
    assert_eq!(report.total_children, 1);
    assert_eq!(report.unsynced_children, 0);
    assert_eq!(report.recommendations, vec!["No action needed.".to_string()]);
}

#[test]
fn contamination_rate_drives_status() {
    let warning = open_db_in_memory().unwrap();
    seed_with_orphans(&warning, 92, 8);
    let report = check(&warning);
    assert_eq!(report.status, HealthStatus::Warning);
    assert_eq!(report.orphaned_count, 8);
    assert!(report
        .recommendations
        .iter()
        .any(|line| line.contains("clean --apply")));

    let critical = open_db_in_memory().unwrap();
    seed_with_orphans(&critical, 80, 20);
    assert_eq!(check(&critical).status, HealthStatus::Critical);
}

#[test]
fn drift_is_recommended_for_repair() {
    let conn = open_db_in_memory().unwrap();
    let child_id = seed_child(&conn);
    let store = SqliteEventStore::try_new(&conn).unwrap();
    store
        .insert_indexed(&EventRecord::new(child_id, EventType::Feeding, Some(1_000)))
        .unwrap();

    let report = check(&conn);
    assert_eq!(report.status, HealthStatus::Healthy);
    assert_eq!(report.unsynced_children, 1);
    assert!(report
        .recommendations
        .iter()
        .any(|line| line.contains("repair --strategy merge")));
}

/// Store whose data calls all fail. An unreachable one also fails pings as
/// if the database were locked; a reachable one answers pings but cannot
/// decode any row.
#[derive(Clone, Copy)]
struct BrokenStore {
    reachable: bool,
}

fn locked() -> RepoError {
    RepoError::Db(DbError::Sqlite(rusqlite::Error::SqliteFailure(
        rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_LOCKED),
        None,
    )))
}

impl BrokenStore {
    fn failure(&self) -> RepoError {
        if self.reachable {
            RepoError::InvalidData("corrupt index page".to_string())
        } else {
            locked()
        }
    }
}

impl EventRecordStore for BrokenStore {
    fn create(&self, _record: &EventRecord) -> RepoResult<EventId> {
        Err(self.failure())
    }
    fn get(&self, _child_id: ChildId) -> RepoResult<Vec<EventRecord>> {
        Err(self.failure())
    }
    fn list_indexed(&self, _child_id: ChildId) -> RepoResult<Vec<EventRecord>> {
        Err(self.failure())
    }
    fn list_all_indexed(&self) -> RepoResult<Vec<EventRecord>> {
        Err(self.failure())
    }
    fn list_index_entries(&self) -> RepoResult<IndexListing> {
        Err(self.failure())
    }
    fn update(&self, _id: EventId, _patch: EventPatch) -> RepoResult<EventRecord> {
        Err(self.failure())
    }
    fn delete_many(&self, _ids: &[EventId]) -> RepoResult<usize> {
        Err(self.failure())
    }
    fn delete_by_child(&self, _child_id: ChildId) -> RepoResult<usize> {
        Err(self.failure())
    }
    fn insert_indexed(&self, _record: &EventRecord) -> RepoResult<EventId> {
        Err(self.failure())
    }
    fn replace_indexed(&self, _child_id: ChildId, _records: &[EventRecord]) -> RepoResult<usize> {
        Err(self.failure())
    }
    fn replace_embedded(&self, _child_id: ChildId, _records: &[EventRecord]) -> RepoResult<()> {
        Err(self.failure())
    }
    fn replace_all(&self, _child_id: ChildId, _records: &[EventRecord]) -> RepoResult<usize> {
        Err(self.failure())
    }
    fn ping(&self) -> RepoResult<()> {
        if self.reachable {
            Ok(())
        } else {
            Err(locked())
        }
    }
}

#[test]
fn unreachable_store_is_critical() {
    let conn = open_db_in_memory().unwrap();
    let report = HealthCheck::new(
        BrokenStore { reachable: false },
        SqliteChildDirectory::try_new(&conn).unwrap(),
        config(),
    )
    .check();

    assert_eq!(report.status, HealthStatus::Critical);
    assert!(!report.store_connected);
    assert_eq!(report.recommendations.len(), 1);
}

#[test]
fn failed_scan_on_reachable_store_stays_connected() {
    let conn = open_db_in_memory().unwrap();
    let report = HealthCheck::new(
        BrokenStore { reachable: true },
        SqliteChildDirectory::try_new(&conn).unwrap(),
        config(),
    )
    .check();

    assert_eq!(report.status, HealthStatus::Critical);
    assert!(report.store_connected);
    assert_eq!(report.recommendations.len(), 1);
    assert!(report.recommendations[0].contains("contamination scan"));
    assert!(report.recommendations[0].contains("corrupt index page"));
}

#[test]
fn malformed_orphan_does_not_disconnect() {
    let conn = open_db_in_memory().unwrap();
    seed_with_orphans(&conn, 19, 0);
    conn.execute(
        "INSERT INTO events (id, child_id, event_type, start_time, end_time)
         VALUES (?1, ?2, 'nap', 2000, 1000);",
        [Uuid::new_v4().to_string(), Uuid::new_v4().to_string()],
    )
    .unwrap();

    let report = check(&conn);
    assert!(report.store_connected);
    assert_eq!(report.status, HealthStatus::Warning);
    assert_eq!(report.orphaned_count, 1);
    assert_eq!(report.total_indexed, 20);
}
