//! On-disk stores: recovery, checkpoints, sharing and open failures.

use std::io::Write as _;

use tracing_subscriber::EnvFilter;
use trellis_engine::{Config, Database, ErrorKind, Session, Stage};

/// Routes library logs through the test harness; `RUST_LOG=trellis=debug`
/// shows recovery and checkpoint activity.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

fn populate(session: &mut Session) {
    session
        .execute("CREATE NODE TABLE Person(name STRING, tags STRING[], PRIMARY KEY(name))")
        .unwrap();
    session.execute("CREATE REL TABLE Knows(FROM Person TO Person)").unwrap();
    session.execute("CREATE (:Person {name: 'Ann', tags: ['a', 'b']})").unwrap();
    session.execute("CREATE (:Person {name: 'Ben', tags: ['c']})").unwrap();
    session
        .execute("MATCH (a:Person {name: 'Ann'}), (b:Person {name: 'Ben'}) CREATE (a)-[:Knows]->(b)")
        .unwrap();
}

fn names(session: &mut Session) -> Vec<String> {
    let mut result = session
        .execute("MATCH (p:Person) RETURN p.name AS name ORDER BY name")
        .unwrap();
    result.collect_string_columns().unwrap().swap_remove("name").unwrap()
}

#[test]
fn data_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("graph");
    {
        let db = Database::open(&path, Config::default()).unwrap();
        assert!(!db.is_in_memory());
        populate(&mut db.connect().unwrap());
        db.close().unwrap();
    }
    let db = Database::open(&path, Config::default()).unwrap();
    let mut session = db.connect().unwrap();
    assert_eq!(names(&mut session), ["Ann", "Ben"]);
    let mut result = session
        .execute("MATCH (a:Person)-[:Knows]->(b:Person) RETURN a.tags, b.name")
        .unwrap();
    let row = result.get_next().unwrap();
    assert_eq!(row.get_value(0).unwrap().to_string(), "[a, b]");
    let stats = db.stats().unwrap();
    assert_eq!((stats.node_count, stats.edge_count, stats.table_count), (2, 1, 2));
}

#[test]
fn wal_replay_without_checkpoint() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("graph");
    {
        // No automatic checkpoint, and no final one: the handle is leaked
        // the way a crashed process would leave it.
        let db = Database::open(&path, Config::default().with_checkpoint_threshold(u64::MAX)).unwrap();
        populate(&mut db.connect().unwrap());
        assert!(db.stats().unwrap().wal_size > 0);
        std::mem::forget(db);
    }
    // The leaked handle still owns the path in this process, so recover
    // from a copy of its files.
    let copy = dir.path().join("copy");
    std::fs::create_dir(&copy).unwrap();
    for entry in std::fs::read_dir(&path).unwrap() {
        let entry = entry.unwrap();
        if entry.file_name() != "lock" {
            std::fs::copy(entry.path(), copy.join(entry.file_name())).unwrap();
        }
    }
    let db = Database::open(&copy, Config::default()).unwrap();
    assert_eq!(names(&mut db.connect().unwrap()), ["Ann", "Ben"]);
}

#[test]
fn torn_wal_tail_is_ignored() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("graph");
    {
        let db = Database::open(&path, Config::default()).unwrap();
        let mut session = db.connect().unwrap();
        populate(&mut session);
        session.execute("CHECKPOINT").unwrap();
        session.execute("CREATE (:Person {name: 'Cid', tags: ['c']})").unwrap();
        drop(session);
        std::mem::forget(db);
    }
    let copy = dir.path().join("copy");
    std::fs::create_dir(&copy).unwrap();
    for file in ["trellis.meta", "snapshot.bin", "wal.log"] {
        std::fs::copy(path.join(file), copy.join(file)).unwrap();
    }
    let mut wal = std::fs::OpenOptions::new().append(true).open(copy.join("wal.log")).unwrap();
    wal.write_all(&[0x40, 0, 0, 0, 0xde, 0xad]).unwrap();
    drop(wal);

    let db = Database::open(&copy, Config::default()).unwrap();
    let mut session = db.connect().unwrap();
    assert_eq!(names(&mut session), ["Ann", "Ben", "Cid"]);
    // Writes after recovery append to the truncated log.
    session.execute("CREATE (:Person {name: 'Dee', tags: ['c']})").unwrap();
    db.close().unwrap();
    let db = Database::open(&copy, Config::default()).unwrap();
    assert_eq!(names(&mut db.connect().unwrap()), ["Ann", "Ben", "Cid", "Dee"]);
}

#[test]
fn checkpoint_truncates_wal() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(dir.path().join("graph"), Config::default()).unwrap();
    populate(&mut db.connect().unwrap());
    let before = db.stats().unwrap().wal_size;
    db.checkpoint().unwrap();
    let after = db.stats().unwrap().wal_size;
    assert!(after < before, "{after} >= {before}");
}

#[test]
fn automatic_checkpoint_past_threshold() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(dir.path().join("graph"), Config::default().with_checkpoint_threshold(1)).unwrap();
    populate(&mut db.connect().unwrap());
    // The last commit already checkpointed, so another one changes nothing.
    let before = db.stats().unwrap().wal_size;
    db.checkpoint().unwrap();
    assert_eq!(db.stats().unwrap().wal_size, before);
}

#[test]
fn same_path_shares_one_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("graph");
    let a = Database::open(&path, Config::default()).unwrap();
    let b = Database::open(&path, Config::default()).unwrap();
    populate(&mut a.connect().unwrap());
    assert_eq!(names(&mut b.connect().unwrap()), ["Ann", "Ben"]);

    // Closing one handle leaves the other working.
    a.close().unwrap();
    let mut session = b.connect().unwrap();
    session.execute("CREATE (:Person {name: 'Cid', tags: ['c']})").unwrap();
    b.close().unwrap();

    let c = Database::open(&path, Config::default()).unwrap();
    assert_eq!(names(&mut c.connect().unwrap()), ["Ann", "Ben", "Cid"]);
}

#[test]
fn read_only_handle_rejects_writes_at_execute() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("graph");
    {
        let db = Database::open(&path, Config::default()).unwrap();
        populate(&mut db.connect().unwrap());
    }
    let db = Database::open(&path, Config::default().with_read_only(true)).unwrap();
    let mut session = db.connect().unwrap();
    assert_eq!(names(&mut session), ["Ann", "Ben"]);
    let err = session.execute("CREATE (:Person {name: 'Cid', tags: ['c']})").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Execution);
    assert_eq!(err.stage(), Stage::Execute);
    let err = session.execute("DROP TABLE Knows").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Execution);

    // A writable handle cannot join a read-only store.
    let err = Database::open(&path, Config::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StorageOpen);
}

#[test]
fn open_failures() {
    let dir = tempfile::tempdir().unwrap();

    let err = Database::open(dir.path().join("missing"), Config::default().with_read_only(true)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StorageOpen);
    assert_eq!(err.stage(), Stage::Open);
    assert!(!dir.path().join("missing").exists());

    let foreign = dir.path().join("foreign");
    std::fs::create_dir(&foreign).unwrap();
    std::fs::write(foreign.join("notes.txt"), "hello").unwrap();
    let err = Database::open(&foreign, Config::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StorageOpen);

    let file = dir.path().join("file");
    std::fs::write(&file, "x").unwrap();
    let err = Database::open(&file, Config::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StorageOpen);
}

#[cfg(target_os = "linux")]
#[test]
fn lock_held_by_other_process() {
    let dir = tempfile::tempdir().unwrap();
    let locked = dir.path().join("locked");
    drop(Database::open(&locked, Config::default()).unwrap());
    // PID 1 is alive and never ours.
    std::fs::write(locked.join("lock"), "1").unwrap();
    let err = Database::open(&locked, Config::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StorageOpen);
    assert!(err.message().contains("locked"), "{}", err.message());
    // The failed open left the lock alone.
    assert_eq!(std::fs::read_to_string(locked.join("lock")).unwrap(), "1");
}

#[test]
fn in_memory_never_touches_disk() {
    for path in [":memory:", ""] {
        let db = Database::open(path, Config::default()).unwrap();
        assert!(db.is_in_memory());
        populate(&mut db.connect().unwrap());
        db.checkpoint().unwrap();
        assert_eq!(db.stats().unwrap().wal_size, 0);
        assert!(db.path().is_none());
        db.close().unwrap();
    }
    assert!(!std::path::Path::new(":memory:").exists());
}
