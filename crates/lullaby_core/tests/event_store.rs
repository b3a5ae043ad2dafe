use lullaby_core::db::open_db_in_memory;
use lullaby_core::{
    Child, ChildDirectory, EventPatch, EventRecord, EventRecordStore, EventType,
    EventValidationError, Parent, RepoError, SqliteChildDirectory, SqliteEventStore,
};
use rusqlite::Connection;
use uuid::Uuid;

fn seed_child(conn: &Connection) -> Uuid {
    let directory = SqliteChildDirectory::try_new(conn).unwrap();
    let parent = Parent::new("Sam");
    directory.create_parent(&parent).unwrap();
    directory
        .create_child(&Child::new(Some(parent.id), "Robin"))
        .unwrap()
}

#[test]
fn create_writes_both_representations() {
    let conn = open_db_in_memory().unwrap();
    let child_id = seed_child(&conn);
    let store = SqliteEventStore::try_new(&conn).unwrap();

    let mut feeding = EventRecord::new(child_id, EventType::Feeding, Some(1_700_000_000_000));
    feeding.notes = Some("left side".to_string());
    feeding.payload = serde_json::json!({ "amount_ml": 90 });
    store.create(&feeding).unwrap();

    let embedded = store.get(child_id).unwrap();
    let indexed = store.list_indexed(child_id).unwrap();
    assert_eq!(embedded, vec![feeding.clone()]);
    assert_eq!(indexed, vec![feeding]);
}

#[test]
fn create_for_unknown_child_writes_nothing() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteEventStore::try_new(&conn).unwrap();
    let ghost = Uuid::new_v4();

    let record = EventRecord::new(ghost, EventType::Wake, Some(1_000));
    match store.create(&record) {
        Err(RepoError::ChildNotFound(id)) => assert_eq!(id, ghost),
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(store.list_all_indexed().unwrap().is_empty());
}

#[test]
fn create_rejects_invalid_records() {
    let conn = open_db_in_memory().unwrap();
    let child_id = seed_child(&conn);
    let store = SqliteEventStore::try_new(&conn).unwrap();

    let missing_start = EventRecord::new(child_id, EventType::Sleep, None);
    assert!(matches!(
        store.create(&missing_start),
        Err(RepoError::Validation(EventValidationError::MissingStartTime(
            EventType::Sleep
        )))
    ));

    let backwards = EventRecord::interval(child_id, EventType::Nap, 5_000, 1_000);
    assert!(matches!(
        store.create(&backwards),
        Err(RepoError::Validation(EventValidationError::EndBeforeStart { .. }))
    ));

    let activity = EventRecord::new(child_id, EventType::ExtraActivities, None);
    store.create(&activity).unwrap();
    assert_eq!(store.get(child_id).unwrap().len(), 1);
}

#[test]
fn update_closes_open_interval_once() {
    let conn = open_db_in_memory().unwrap();
    let child_id = seed_child(&conn);
    let store = SqliteEventStore::try_new(&conn).unwrap();

    let waking = EventRecord::new(child_id, EventType::NightWaking, Some(10_000));
    store.create(&waking).unwrap();

    let closed = store.update(waking.id, EventPatch { end_time: 70_000 }).unwrap();
    assert_eq!(closed.end_time, Some(70_000));
    assert_eq!(store.get(child_id).unwrap()[0].end_time, Some(70_000));
    assert_eq!(store.list_indexed(child_id).unwrap()[0].end_time, Some(70_000));

    assert!(matches!(
        store.update(waking.id, EventPatch { end_time: 90_000 }),
        Err(RepoError::AlreadyClosed(id)) if id == waking.id
    ));
    assert!(matches!(
        store.update(Uuid::new_v4(), EventPatch { end_time: 90_000 }),
        Err(RepoError::NotFound(_))
    ));
}

#[test]
fn indexed_listing_is_newest_first() {
    let conn = open_db_in_memory().unwrap();
    let child_id = seed_child(&conn);
    let store = SqliteEventStore::try_new(&conn).unwrap();

    for start in [3_000, 1_000, 2_000] {
        store
            .create(&EventRecord::new(child_id, EventType::Feeding, Some(start)))
            .unwrap();
    }

    let starts: Vec<_> = store
        .list_indexed(child_id)
        .unwrap()
        .into_iter()
        .map(|record| record.start_time)
        .collect();
    assert_eq!(starts, vec![Some(3_000), Some(2_000), Some(1_000)]);
}

#[test]
fn maintenance_writes_touch_one_side_only() {
    let conn = open_db_in_memory().unwrap();
    let child_id = seed_child(&conn);
    let store = SqliteEventStore::try_new(&conn).unwrap();

    let bypass = EventRecord::new(child_id, EventType::Medication, Some(4_000));
    store.insert_indexed(&bypass).unwrap();
    assert!(store.get(child_id).unwrap().is_empty());
    assert_eq!(store.list_indexed(child_id).unwrap().len(), 1);

    let embedded_only = vec![EventRecord::new(child_id, EventType::Bedtime, Some(8_000))];
    store.replace_embedded(child_id, &embedded_only).unwrap();
    assert_eq!(store.get(child_id).unwrap(), embedded_only);
    assert_eq!(store.list_indexed(child_id).unwrap(), vec![bypass]);

    assert_eq!(store.replace_indexed(child_id, &embedded_only).unwrap(), 1);
    assert_eq!(store.list_indexed(child_id).unwrap(), embedded_only);
}

#[test]
fn delete_many_removes_only_listed_ids() {
    let conn = open_db_in_memory().unwrap();
    let child_id = seed_child(&conn);
    let store = SqliteEventStore::try_new(&conn).unwrap();

    let records: Vec<_> = (0..4)
        .map(|offset| EventRecord::new(child_id, EventType::Feeding, Some(offset * 1_000)))
        .collect();
    for record in &records {
        store.create(record).unwrap();
    }

    let deleted = store.delete_many(&[records[0].id, records[2].id]).unwrap();
    assert_eq!(deleted, 2);
    assert_eq!(store.delete_many(&[]).unwrap(), 0);

    let remaining: Vec<_> = store
        .list_indexed(child_id)
        .unwrap()
        .into_iter()
        .map(|record| record.id)
        .collect();
    assert_eq!(remaining, vec![records[3].id, records[1].id]);
}
