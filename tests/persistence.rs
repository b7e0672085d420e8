//! Durable state: codec round trips and flush scheduling.

use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use userdb::{DataFile, FlushPolicy, Format, Scheduler, Store, StoreError, User, UserId};

fn data_file(dir: &TempDir) -> DataFile {
    DataFile::new(dir.path().join("data.json"), Format::Json)
}

fn seeded_store() -> Arc<Store> {
    let store = Arc::new(Store::new());
    store.create(User::draft("Petya", 20)).unwrap();
    store.create(User::draft("Alyosha", 30)).unwrap();
    store.create(User::draft("Vasya", 35)).unwrap();
    store
}

/// Poll until `cond` holds or the deadline passes.
fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    cond()
}

#[test]
fn test_open_nonexistent_file_is_empty() {
    let dir = TempDir::new().unwrap();
    let store = Store::open(&data_file(&dir)).unwrap();

    assert_eq!(store.count(), 0);
    assert_eq!(store.counter(), 0);
    assert_eq!(store.create(User::default()).unwrap().id, UserId(1));
}

#[test]
fn test_open_corrupt_file_fails() {
    let dir = TempDir::new().unwrap();
    let file = data_file(&dir);
    fs::write(file.path(), b"{\"Users\": [1, 2").unwrap();

    let result = Store::open(&file);
    assert!(matches!(result, Err(StoreError::Load { .. })));
}

#[test]
fn test_round_trip_preserves_table_and_counter() {
    let dir = TempDir::new().unwrap();
    for format in [Format::Json, Format::MessagePack] {
        let file = DataFile::new(dir.path().join(format!("data.{}", format)), format);
        let store = seeded_store();
        store.delete(UserId(3)).unwrap();

        file.save(&store.snapshot()).unwrap();
        let reopened = Store::open(&file).unwrap();

        assert_eq!(reopened.snapshot(), store.snapshot());
        assert_eq!(reopened.counter(), 3);
        // Deleted ids stay retired across restarts.
        assert_eq!(reopened.create(User::default()).unwrap().id, UserId(4));
    }
}

#[test]
fn test_loads_document_written_by_hand() {
    let dir = TempDir::new().unwrap();
    let file = data_file(&dir);
    fs::write(
        file.path(),
        r#"{"Counter":3,"Users":{"1":{"ID":1,"Name":"Petya","Age":20},"2":{"ID":2,"Name":"Alyosha","Age":30},"3":{"ID":3,"Name":"Vasya","Age":35}}}"#,
    )
    .unwrap();

    let store = Store::open(&file).unwrap();
    assert_eq!(store.count(), 3);
    assert_eq!(store.get(UserId(2)).unwrap().name, "Alyosha");
}

#[test]
fn test_write_through_flushes_every_mutation() {
    let dir = TempDir::new().unwrap();
    let file = data_file(&dir);
    let store = Arc::new(Store::new());
    let mut scheduler =
        Scheduler::start(Arc::clone(&store), file.clone(), FlushPolicy::WriteThrough).unwrap();

    store.create(User::draft("Petya", 20)).unwrap();
    assert_eq!(file.load().unwrap().users.len(), 1);

    store.update(UserId(1), &User::with_age(21)).unwrap();
    assert_eq!(file.load().unwrap().users[&UserId(1)].age, 21);

    store.delete(UserId(1)).unwrap();
    let table = file.load().unwrap();
    assert!(table.users.is_empty());
    assert_eq!(table.counter, 1);

    scheduler.shutdown().unwrap();

    // After shutdown the store no longer writes through.
    store.create(User::draft("Vasya", 35)).unwrap();
    assert!(file.load().unwrap().users.is_empty());
}

#[test]
fn test_interval_policy_flushes_on_timer() {
    let dir = TempDir::new().unwrap();
    let file = data_file(&dir);
    let store = seeded_store();
    let mut scheduler = Scheduler::start(
        Arc::clone(&store),
        file.clone(),
        FlushPolicy::Interval(Duration::from_millis(100)),
    )
    .unwrap();

    assert!(wait_for(Duration::from_secs(5), || file.path().exists()));
    assert!(wait_for(Duration::from_secs(5), || {
        file.load().map(|t| t.users.len() == 3).unwrap_or(false)
    }));

    store.create(User::draft("Masha", 18)).unwrap();
    assert!(wait_for(Duration::from_secs(5), || {
        file.load().map(|t| t.users.len() == 4).unwrap_or(false)
    }));

    scheduler.shutdown().unwrap();
}

#[test]
fn test_trigger_flushes_in_background() {
    let dir = TempDir::new().unwrap();
    let file = data_file(&dir);
    let store = seeded_store();
    let mut scheduler = Scheduler::start(Arc::clone(&store), file.clone(), FlushPolicy::Manual).unwrap();
    let handle = scheduler.handle();

    assert!(!file.path().exists());
    handle.trigger().unwrap();
    assert!(wait_for(Duration::from_secs(5), || {
        file.load().map(|t| t.users.len() == 3).unwrap_or(false)
    }));

    scheduler.shutdown().unwrap();
}

#[test]
fn test_overlapping_flushes_and_mutations() {
    let dir = TempDir::new().unwrap();
    let file = data_file(&dir);
    let store = Arc::new(Store::new());
    let mut scheduler = Scheduler::start(
        Arc::clone(&store),
        file.clone(),
        FlushPolicy::Interval(Duration::from_millis(10)),
    )
    .unwrap();
    let handle = scheduler.handle();

    let writers: Vec<_> = (0..4)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for i in 0..100u32 {
                    store.create(User::draft("bulk", i + 1)).unwrap();
                }
            })
        })
        .collect();
    let flushers: Vec<_> = (0..4)
        .map(|_| {
            let handle = handle.clone();
            thread::spawn(move || {
                for _ in 0..20 {
                    handle.trigger().unwrap();
                    handle.flush_now().unwrap();
                }
            })
        })
        .collect();

    for t in writers.into_iter().chain(flushers) {
        t.join().unwrap();
    }

    scheduler.shutdown().unwrap();
    let table = file.load().unwrap();
    assert_eq!(table, store.snapshot());
    assert_eq!(table.users.len(), 400);
    assert_eq!(table.counter, 400);
}

#[test]
fn test_failed_flush_keeps_memory_and_later_flushes_work() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("data.json");
    let file = DataFile::new(&path, Format::Json);
    let store = seeded_store();
    let mut scheduler = Scheduler::start(Arc::clone(&store), file.clone(), FlushPolicy::Manual).unwrap();
    let handle = scheduler.handle();

    // A directory in place of the data file makes the rename fail.
    fs::create_dir(&path).unwrap();
    let result = handle.flush_now();
    assert!(matches!(result, Err(StoreError::Save { .. })));
    assert_eq!(store.count(), 3);

    fs::remove_dir(&path).unwrap();
    store.create(User::draft("Masha", 18)).unwrap();
    let stats = scheduler.shutdown().unwrap();
    assert_eq!(stats.users, 4);
    assert_eq!(file.load().unwrap().users.len(), 4);
}

#[test]
fn test_write_through_failure_keeps_mutation() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("data.json");
    let file = DataFile::new(&path, Format::Json);
    let store = Arc::new(Store::new());

    fs::create_dir(&path).unwrap();
    let mut scheduler =
        Scheduler::start(Arc::clone(&store), file.clone(), FlushPolicy::WriteThrough).unwrap();

    // The flush behind this mutation fails, the mutation itself does not.
    let first = store.create(User::draft("Petya", 20)).unwrap();
    assert_eq!(first.id, UserId(1));
    assert_eq!(store.count(), 1);
    assert!(path.is_dir());

    fs::remove_dir(&path).unwrap();
    store.create(User::draft("Vasya", 35)).unwrap();

    let table = file.load().unwrap();
    assert_eq!(table.users.len(), 2);
    assert_eq!(table.users[&UserId(1)].name, "Petya");
    assert_eq!(table.counter, 2);

    scheduler.shutdown().unwrap();
}
