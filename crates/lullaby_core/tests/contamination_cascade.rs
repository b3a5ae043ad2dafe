use lullaby_core::db::open_db_in_memory;
use lullaby_core::{
    CascadeDelete, Child, ChildDirectory, ChildDocumentStore, ChildId, CleanMode, CleanOutcome,
    ContaminationScanner, EventRecord, EventRecordStore, EventType, IntegrityConfig,
    IntegrityError, Parent, SqliteChildDirectory, SqliteChildDocumentStore, SqliteEventStore,
};
use rusqlite::Connection;
use std::time::Duration;
use uuid::Uuid;

fn config() -> IntegrityConfig {
    IntegrityConfig::default().with_sweep_delay(Duration::ZERO)
}

fn seed_child(conn: &Connection, parent: Option<&Parent>) -> ChildId {
    let directory = SqliteChildDirectory::try_new(conn).unwrap();
    if let Some(parent) = parent {
        directory.create_parent(parent).unwrap();
    }
    directory
        .create_child(&Child::new(parent.map(|parent| parent.id), "Robin"))
        .unwrap()
}

fn seed_feedings(store: &SqliteEventStore<'_>, child_id: ChildId, count: i64) {
    for index in 0..count {
        store
            .create(&EventRecord::new(child_id, EventType::Feeding, Some(index * 1_000)))
            .unwrap();
    }
}

#[test]
fn scan_then_clean_removes_orphans() {
    let conn = open_db_in_memory().unwrap();
    let kept = seed_child(&conn, None);
    let doomed = seed_child(&conn, None);
    let store = SqliteEventStore::try_new(&conn).unwrap();
    let directory = SqliteChildDirectory::try_new(&conn).unwrap();

    seed_feedings(&store, kept, 85);
    seed_feedings(&store, doomed, 15);
    // Child row removed without its events: the dangling-reference case.
    assert!(directory.delete_child(doomed).unwrap());

    let scanner = ContaminationScanner::new(store, directory, config().with_clean_batch_size(4));
    let report = scanner.scan().unwrap();
    assert_eq!(report.total_indexed, 100);
    assert_eq!(report.orphaned.len(), 15);
    assert_eq!(report.valid.len(), 85);
    assert_eq!(report.contamination_rate, 15.0);
    assert_eq!(report.orphaned_by_child.get(&doomed), Some(&15));

    assert_eq!(
        scanner.clean(CleanMode::default()).unwrap(),
        CleanOutcome::WouldClean { count: 15 }
    );
    assert_eq!(store.list_all_indexed().unwrap().len(), 100);

    assert_eq!(
        scanner.clean(CleanMode::Apply).unwrap(),
        CleanOutcome::Cleaned {
            count: 15,
            failed_groups: Vec::new()
        }
    );

    let rescan = scanner.scan().unwrap();
    assert!(rescan.orphaned.is_empty());
    assert_eq!(rescan.contamination_rate, 0.0);
    assert_eq!(store.list_indexed(kept).unwrap().len(), 85);
}

#[test]
fn malformed_orphan_is_scanned_and_cleaned() {
    let conn = open_db_in_memory().unwrap();
    let kept = seed_child(&conn, None);
    let store = SqliteEventStore::try_new(&conn).unwrap();
    seed_feedings(&store, kept, 3);

    // Clock-skewed row that fails record validation.
    let skewed = Uuid::new_v4();
    let ghost = Uuid::new_v4();
    conn.execute(
        "INSERT INTO events (id, child_id, event_type, start_time, end_time)
         VALUES (?1, ?2, 'nap', 2000, 1000);",
        [skewed.to_string(), ghost.to_string()],
    )
    .unwrap();
    assert!(store.list_all_indexed().is_err());

    let scanner = ContaminationScanner::new(
        store,
        SqliteChildDirectory::try_new(&conn).unwrap(),
        config(),
    );
    let report = scanner.scan().unwrap();
    assert_eq!(report.total_indexed, 4);
    assert_eq!(report.orphaned.len(), 1);
    assert_eq!(report.orphaned[0].id, skewed);
    assert_eq!(report.orphaned[0].kind, EventType::Nap);
    assert!(report.unreadable_rows.is_empty());

    assert_eq!(
        scanner.clean(CleanMode::Apply).unwrap(),
        CleanOutcome::Cleaned {
            count: 1,
            failed_groups: Vec::new()
        }
    );
    assert_eq!(store.list_all_indexed().unwrap().len(), 3);
}

#[test]
fn undecodable_row_is_reported_not_fatal() {
    let conn = open_db_in_memory().unwrap();
    seed_child(&conn, None);
    conn.execute(
        "INSERT INTO events (id, child_id, event_type, start_time)
         VALUES ('not-a-uuid', 'also-not-a-uuid', 'wake', 1000);",
        [],
    )
    .unwrap();

    let report = ContaminationScanner::new(
        SqliteEventStore::try_new(&conn).unwrap(),
        SqliteChildDirectory::try_new(&conn).unwrap(),
        config(),
    )
    .scan()
    .unwrap();
    assert_eq!(report.total_indexed, 0);
    assert_eq!(report.unreadable_rows.len(), 1);
}

#[test]
fn scan_of_empty_index_reports_zero_rate() {
    let conn = open_db_in_memory().unwrap();
    let scanner = ContaminationScanner::new(
        SqliteEventStore::try_new(&conn).unwrap(),
        SqliteChildDirectory::try_new(&conn).unwrap(),
        config(),
    );

    let report = scanner.scan().unwrap();
    assert_eq!(report.total_indexed, 0);
    assert_eq!(report.contamination_rate, 0.0);
}

#[test]
fn cascade_delete_removes_every_dependent_record() {
    let conn = open_db_in_memory().unwrap();
    let parent = Parent::new("Sam");
    let child_id = seed_child(&conn, Some(&parent));
    let sibling = seed_child(&conn, None);
    let store = SqliteEventStore::try_new(&conn).unwrap();
    let directory = SqliteChildDirectory::try_new(&conn).unwrap();
    let documents = SqliteChildDocumentStore::try_new(&conn).unwrap();

    seed_feedings(&store, child_id, 42);
    seed_feedings(&store, sibling, 2);
    for title in ["week 1", "week 2", "week 3"] {
        documents.create_plan(child_id, title).unwrap();
    }
    documents.create_consultation(child_id, "initial").unwrap();
    documents.create_plan(sibling, "week 1").unwrap();

    let cascade = CascadeDelete::new(store, directory, documents);
    let outcome = cascade.delete_child(child_id).unwrap();
    assert!(outcome.deleted);
    assert!(outcome.parent_reference_cleared);
    assert_eq!(outcome.deletions.events, 42);
    assert_eq!(outcome.deletions.plans, 3);
    assert_eq!(outcome.deletions.consultations, 1);
    assert_eq!(outcome.deletions.child, 1);

    assert!(!directory.exists(child_id).unwrap());
    assert!(store.list_indexed(child_id).unwrap().is_empty());
    assert_eq!(documents.count_plans(child_id).unwrap(), 0);
    assert_eq!(documents.count_consultations(child_id).unwrap(), 0);
    assert!(directory.list_child_references(parent.id).unwrap().is_empty());

    assert_eq!(store.list_indexed(sibling).unwrap().len(), 2);
    assert_eq!(documents.count_plans(sibling).unwrap(), 1);

    let scanner = ContaminationScanner::new(store, directory, config());
    assert!(scanner.scan().unwrap().orphaned.is_empty());
}

#[test]
fn cascade_delete_of_unknown_child_touches_nothing() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteEventStore::try_new(&conn).unwrap();
    let ghost = Uuid::new_v4();

    // Orphaned rows under the ghost id must survive a rejected delete.
    store
        .insert_indexed(&EventRecord::new(ghost, EventType::Wake, Some(1_000)))
        .unwrap();

    let cascade = CascadeDelete::new(
        store,
        SqliteChildDirectory::try_new(&conn).unwrap(),
        SqliteChildDocumentStore::try_new(&conn).unwrap(),
    );
    assert!(matches!(
        cascade.delete_child(ghost),
        Err(IntegrityError::ChildNotFound(id)) if id == ghost
    ));
    assert_eq!(store.list_all_indexed().unwrap().len(), 1);
}

#[test]
fn cascade_delete_finishes_after_child_row_is_gone() {
    let conn = open_db_in_memory().unwrap();
    let parent = Parent::new("Sam");
    let child_id = seed_child(&conn, Some(&parent));
    let store = SqliteEventStore::try_new(&conn).unwrap();
    let directory = SqliteChildDirectory::try_new(&conn).unwrap();
    let documents = SqliteChildDocumentStore::try_new(&conn).unwrap();
    seed_feedings(&store, child_id, 3);
    documents.create_plan(child_id, "week 1").unwrap();

    // Interrupted after the child row went away.
    assert!(directory.delete_child(child_id).unwrap());
    assert_eq!(
        directory.list_child_references(parent.id).unwrap(),
        vec![child_id]
    );

    let cascade = CascadeDelete::new(store, directory, documents);
    let outcome = cascade.delete_child(child_id).unwrap();
    assert!(outcome.resumed);
    assert!(!outcome.deleted);
    assert!(outcome.parent_reference_cleared);
    assert_eq!(outcome.deletions.events, 3);
    assert_eq!(outcome.deletions.plans, 1);
    assert_eq!(outcome.deletions.child, 0);
    assert!(directory.list_child_references(parent.id).unwrap().is_empty());
    assert!(store.list_all_indexed().unwrap().is_empty());

    assert!(matches!(
        cascade.delete_child(child_id),
        Err(IntegrityError::ChildNotFound(id)) if id == child_id
    ));
}
