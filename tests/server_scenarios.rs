//! Concurrency scenarios: per-key locking under contention and the worker
//! pool's serializable commits.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use strandkv::lock::{LockMode, LockManager};
use strandkv::storage::btree::{BTree, BTreeConfig, Value};
use strandkv::storage::pager::Pager;
use strandkv::storage::vlog::ValueLog;
use strandkv::storage::Record;
use strandkv::txn::{build_transaction_request, Operation, TransactionState};
use strandkv::DatabaseServer;
use tempfile::tempdir;

#[test]
fn counter_under_contention_reaches_exact_total() {
    const THREADS: usize = 6;
    const INCREMENTS_PER_THREAD: usize = 200;

    let dir = tempdir().unwrap();
    let pager = Pager::open(&dir.path().join("data.pages"), 4096).unwrap();
    let value_log = ValueLog::open(&dir.path().join("vlog")).unwrap();
    let tree = Arc::new(RwLock::new(
        BTree::new(BTreeConfig {
            pager,
            value_log,
            inline_threshold: 1024,
            root_hint: 0,
            ttl_clock: None,
        })
        .unwrap(),
    ));
    let locks = Arc::new(LockManager::new());

    tree.write()
        .insert("counter", Record::new(Value::I64(0)))
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..THREADS {
        let tree = Arc::clone(&tree);
        let locks = Arc::clone(&locks);
        handles.push(std::thread::spawn(move || {
            for _ in 0..INCREMENTS_PER_THREAD {
                let _guard = locks.lock("counter", LockMode::Exclusive);
                let current = match tree.read().find("counter").unwrap().value {
                    Value::I64(v) => v,
                    other => panic!("unexpected value {:?}", other),
                };
                tree.write()
                    .insert("counter", Record::new(Value::I64(current + 1)))
                    .unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(
        tree.read().find("counter").unwrap().value,
        Value::I64((THREADS * INCREMENTS_PER_THREAD) as i64)
    );
    assert_eq!(locks.locked_keys(), 0);
}

#[test]
fn worker_pool_commits_every_submitted_transaction() {
    const CLIENTS: usize = 4;
    const TXNS_PER_CLIENT: u64 = 50;

    let dir = tempdir().unwrap();
    let server = Arc::new(DatabaseServer::open_dir(dir.path(), 4).unwrap());
    server.start();

    let mut handles = Vec::new();
    for client in 0..CLIENTS as u64 {
        let server = Arc::clone(&server);
        handles.push(std::thread::spawn(move || {
            for i in 0..TXNS_PER_CLIENT {
                let txn_id = client * TXNS_PER_CLIENT + i;
                let key = format!("client-{}-key-{}", client, i);
                let request = build_transaction_request(
                    txn_id,
                    vec![Operation::set(&key, Record::new(Value::I64(txn_id as i64)))],
                );
                while !server.submit_transaction(request.clone()) {
                    std::thread::sleep(Duration::from_millis(1));
                }
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let expected = CLIENTS as u64 * TXNS_PER_CLIENT;
    let mut results = Vec::new();
    for _ in 0..400 {
        server.wait_for_results(Duration::from_millis(50));
        results.extend(server.drain_completed());
        if results.len() as u64 >= expected {
            break;
        }
    }
    server.stop();

    assert_eq!(results.len() as u64, expected);
    assert!(results
        .iter()
        .all(|result| result.state == TransactionState::Committed));

    let reopened = DatabaseServer::open_dir(dir.path(), 1).unwrap();
    for client in 0..CLIENTS as u64 {
        for i in 0..TXNS_PER_CLIENT {
            let key = format!("client-{}-key-{}", client, i);
            let txn_id = client * TXNS_PER_CLIENT + i;
            assert_eq!(
                reopened.read_committed(&key).unwrap().value,
                Value::I64(txn_id as i64),
                "lost {}",
                key
            );
        }
    }
}

#[test]
fn conflicting_writers_serialize_on_the_same_key() {
    let dir = tempdir().unwrap();
    let server = Arc::new(DatabaseServer::open_dir(dir.path(), 4).unwrap());
    server.start();

    const WRITERS: u64 = 40;
    for txn_id in 0..WRITERS {
        let request = build_transaction_request(
            txn_id,
            vec![Operation::set("shared", Record::new(Value::I64(txn_id as i64)))],
        );
        assert!(server.submit_transaction(request));
    }

    let mut results = Vec::new();
    for _ in 0..400 {
        server.wait_for_results(Duration::from_millis(50));
        results.extend(server.drain_completed());
        if results.len() as u64 >= WRITERS {
            break;
        }
    }
    server.stop();

    assert_eq!(results.len() as u64, WRITERS);
    assert!(results
        .iter()
        .all(|result| result.state == TransactionState::Committed));

    // The committed value is whichever writer serialized last; it must be
    // one of the submitted values.
    let reopened = DatabaseServer::open_dir(dir.path(), 1).unwrap();
    match reopened.read_committed("shared").unwrap().value {
        Value::I64(v) => assert!((0..WRITERS as i64).contains(&v)),
        other => panic!("unexpected value {:?}", other),
    }
}
