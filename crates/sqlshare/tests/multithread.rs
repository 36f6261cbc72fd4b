//! Connections and cursors used from several OS threads.

use sqlshare::prelude::*;
use sqlshare::HandleKind;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

const THREADS: usize = 3;

fn relaxed(target: impl Into<Target>) -> Connection {
    Connection::open_with_config(
        ConnectionConfig::new(target).allow_cross_thread_access(true),
    )
    .unwrap()
}

fn create_inserts(conn: &Connection) {
    conn.execute(
        "DROP TABLE IF EXISTS my_inserts; CREATE TABLE my_inserts (thread_name TEXT)",
        &[],
    )
    .unwrap();
}

fn thread_names(conn: &Connection) -> Vec<String> {
    conn.execute("SELECT * FROM my_inserts ORDER BY thread_name", &[])
        .unwrap()
        .fetchall()
        .unwrap()
        .into_iter()
        .map(|row| row.get_as::<String>(0).unwrap())
        .collect()
}

fn expected_names() -> Vec<String> {
    (0..THREADS).map(|i| format!("my_thread_{i}")).collect()
}

/// Run `work` on named threads `my_thread_0..` and wait for all of them.
fn run_named<F>(work: impl Fn(usize) -> F)
where
    F: FnOnce() + Send + 'static,
{
    let handles: Vec<_> = (0..THREADS)
        .map(|i| {
            thread::Builder::new()
                .name(format!("my_thread_{i}"))
                .spawn(work(i))
                .unwrap()
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
}

fn insert_own_name(cursor: &Cursor) {
    let name = thread::current().name().unwrap().to_string();
    let rows = cursor
        .execute("INSERT INTO my_inserts VALUES (?)", &params![name])
        .unwrap()
        .fetchall()
        .unwrap();
    assert!(rows.is_empty());
}

#[test]
fn cursors_created_inside_threads() {
    let conn = relaxed(Target::Memory);
    create_inserts(&conn);

    run_named(|_| {
        let conn = conn.clone();
        move || {
            let cursor = conn.cursor().unwrap();
            insert_own_name(&cursor);
        }
    });

    assert_eq!(thread_names(&conn), expected_names());
}

#[test]
fn cursors_created_on_main_and_handed_over() {
    let conn = relaxed(Target::Memory);
    create_inserts(&conn);
    let cursors: Vec<Cursor> = (0..THREADS).map(|_| conn.cursor().unwrap()).collect();
    assert_eq!(conn.cursor_count(), THREADS);

    run_named(|i| {
        let cursor = cursors[i].clone();
        move || insert_own_name(&cursor)
    });

    assert_eq!(thread_names(&conn), expected_names());
}

#[test]
fn strict_cursors_handed_over_after_release() {
    let conn = Connection::open_memory().unwrap();
    create_inserts(&conn);
    let cursors: Vec<Cursor> = (0..THREADS)
        .map(|_| {
            let cursor = conn.cursor().unwrap();
            cursor.release_thread().unwrap();
            cursor
        })
        .collect();

    run_named(|i| {
        let cursor = cursors[i].clone();
        move || {
            cursor.bind_to_current_thread().unwrap();
            insert_own_name(&cursor);
        }
    });

    assert_eq!(thread_names(&conn), expected_names());
}

#[test]
fn cursors_on_file_target() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("another_test.db");
    let conn = relaxed(path.as_path());
    create_inserts(&conn);

    run_named(|_| {
        let conn = conn.clone();
        move || {
            let cursor = conn.cursor().unwrap();
            insert_own_name(&cursor);
        }
    });

    assert_eq!(thread_names(&conn), expected_names());
    conn.close().unwrap();
    std::fs::remove_file(&path).unwrap();
}

#[test]
fn many_threads_insert_every_payload_once() {
    const WORKERS: usize = 16;
    const PER_WORKER: usize = 25;

    let conn = relaxed(Target::Memory);
    conn.execute("CREATE TABLE payloads (worker INTEGER, seq INTEGER)", &[])
        .unwrap();
    let barrier = Arc::new(Barrier::new(WORKERS));

    let handles: Vec<_> = (0..WORKERS)
        .map(|worker| {
            let conn = conn.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let cursor = conn.cursor().unwrap();
                barrier.wait();
                for seq in 0..PER_WORKER {
                    cursor
                        .execute(
                            "INSERT INTO payloads VALUES (?, ?)",
                            &params![worker as i64, seq as i64],
                        )
                        .unwrap();
                    assert_eq!(cursor.rowcount().unwrap(), 1);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let total = conn
        .execute("SELECT count(*) FROM payloads", &[])
        .unwrap()
        .fetchone()
        .unwrap()
        .unwrap()
        .get_as::<i64>(0)
        .unwrap();
    assert_eq!(total, (WORKERS * PER_WORKER) as i64);

    let distinct = conn
        .execute(
            "SELECT count(*) FROM (SELECT DISTINCT worker, seq FROM payloads)",
            &[],
        )
        .unwrap()
        .fetchone()
        .unwrap()
        .unwrap()
        .get_as::<i64>(0)
        .unwrap();
    assert_eq!(distinct, total);
}

#[test]
fn concurrent_cursors_never_half_apply() {
    let conn = relaxed(Target::Memory);
    conn.execute(
        "CREATE TABLE ledger (account INTEGER PRIMARY KEY, balance INTEGER);
         INSERT INTO ledger VALUES (1, 1000), (2, 1000);",
        &[],
    )
    .unwrap();
    let barrier = Arc::new(Barrier::new(4));

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let cursor = conn.cursor().unwrap();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..50 {
                    if i % 2 == 0 {
                        cursor
                            .execute(
                                "BEGIN; UPDATE ledger SET balance = balance - 1 WHERE account = 1; \
                                 UPDATE ledger SET balance = balance + 1 WHERE account = 2; COMMIT;",
                                &[],
                            )
                            .unwrap();
                    } else {
                        let sum = cursor
                            .execute("SELECT sum(balance) FROM ledger", &[])
                            .unwrap()
                            .fetchone()
                            .unwrap()
                            .unwrap()
                            .get_as::<i64>(0)
                            .unwrap();
                        assert_eq!(sum, 2000);
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let rows = conn
        .execute("SELECT balance FROM ledger ORDER BY account", &[])
        .unwrap()
        .fetchall()
        .unwrap();
    assert_eq!(rows[0].get_as::<i64>(0).unwrap(), 900);
    assert_eq!(rows[1].get_as::<i64>(0).unwrap(), 1100);
}

#[test]
fn strict_rejects_foreign_execute_without_side_effects() {
    let conn = Connection::open_memory().unwrap();
    conn.execute("CREATE TABLE t (v INTEGER)", &[]).unwrap();

    let remote = conn.clone();
    let result = thread::spawn(move || {
        remote
            .execute("INSERT INTO t VALUES (1)", &[])
            .map(|_| ())
    })
    .join()
    .unwrap();
    match result {
        Err(Error::CrossThread(e)) => {
            assert_eq!(e.handle, HandleKind::Connection);
            assert_eq!(e.bound, thread::current().id());
        }
        other => panic!("expected cross-thread error, got {other:?}"),
    }

    let count = conn
        .execute("SELECT count(*) FROM t", &[])
        .unwrap()
        .fetchone()
        .unwrap()
        .unwrap()
        .get_as::<i64>(0)
        .unwrap();
    assert_eq!(count, 0);
}

#[test]
fn strict_rejects_foreign_cursor_creation() {
    let conn = Connection::open_memory().unwrap();
    let remote = conn.clone();
    let result = thread::spawn(move || remote.cursor().map(|_| ()))
        .join()
        .unwrap();
    assert!(matches!(result, Err(Error::CrossThread(_))));
    assert_eq!(conn.cursor_count(), 0);
}

#[test]
fn relaxation_admits_foreign_thread() {
    let conn = Connection::open_memory().unwrap();
    conn.execute("CREATE TABLE t (v INTEGER)", &[]).unwrap();
    conn.release_thread().unwrap();

    let remote = conn.clone();
    thread::spawn(move || {
        remote.execute("INSERT INTO t VALUES (1)", &[]).unwrap();
        remote.cursor().unwrap().execute("INSERT INTO t VALUES (2)", &[]).unwrap();
    })
    .join()
    .unwrap();

    let rows = conn
        .execute("SELECT v FROM t ORDER BY v", &[])
        .unwrap()
        .fetchall()
        .unwrap();
    assert_eq!(rows.len(), 2);
}

#[test]
fn close_from_another_thread_invalidates_cursors() {
    let conn = relaxed(Target::Memory);
    let cursors: Vec<Cursor> = (0..THREADS).map(|_| conn.cursor().unwrap()).collect();
    for cursor in &cursors {
        cursor.execute("SELECT 1", &[]).unwrap();
    }

    let remote = conn.clone();
    thread::spawn(move || remote.close().unwrap()).join().unwrap();

    for cursor in &cursors {
        match cursor.fetchall() {
            Err(Error::Closed(e)) => assert_eq!(e.handle, HandleKind::Connection),
            other => panic!("expected closed error, got {other:?}"),
        }
    }
}

#[test]
fn close_waits_for_in_flight_statement() {
    const ROWS: i64 = 1_000_000;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("drain.db");
    let conn = relaxed(path.as_path());
    conn.execute("CREATE TABLE big (v INTEGER)", &[]).unwrap();
    let cursor = conn.cursor().unwrap();
    let started = Arc::new(Barrier::new(2));

    let worker = {
        let started = Arc::clone(&started);
        thread::spawn(move || {
            started.wait();
            let result = cursor
                .execute(
                    "INSERT INTO big SELECT x FROM (WITH RECURSIVE c(x) AS \
                     (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < ?) SELECT x FROM c)",
                    &params![ROWS],
                )
                .map(|_| ());
            (result, Instant::now())
        })
    };

    started.wait();
    thread::sleep(Duration::from_millis(150));
    conn.close().unwrap();
    let closed_at = Instant::now();

    let (result, finished_at) = worker.join().unwrap();
    result.unwrap();
    assert!(finished_at <= closed_at);

    let conn = Connection::open_path(&path).unwrap();
    let total = conn
        .execute("SELECT count(*) FROM big", &[])
        .unwrap()
        .fetchone()
        .unwrap()
        .unwrap()
        .get_as::<i64>(0)
        .unwrap();
    assert_eq!(total, ROWS);
}
