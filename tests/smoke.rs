// ABOUTME: End-to-end smoke test for the storage manager lifecycle.
// ABOUTME: Exercises error dedup, sequenced log ingestion, paging, tailing, envelopes, and clearing.

use std::sync::Arc;
use std::thread;

use procstore_core::{
    LogCursor, LogFilter, LogRetrievalResponse, LogStatsSummary, LogStream, Outcome, ProcessLog,
    SimpleError,
};
use procstore_store::{StorageManager, StoreConfig};

fn error_at(message: &str, timestamp: &str) -> SimpleError {
    SimpleError {
        instance_id: "a".to_string(),
        process_id: "web".to_string(),
        message: message.to_string(),
        level: 2,
        timestamp: timestamp.to_string(),
        raw_output: format!("{timestamp} {message}"),
    }
}

fn log(instance: &str, message: &str) -> ProcessLog {
    ProcessLog::new(instance, "web", "info", message, LogStream::Stdout)
}

#[test]
fn smoke_test_full_lifecycle() {
    // 1. Open a fresh store in a nested directory that does not exist yet
    let dir = tempfile::TempDir::new().unwrap();
    let config = StoreConfig::at(dir.path().join("data").join("procstore.db"));
    let mgr = StorageManager::open(&config).unwrap();

    // 2. Same failure on two ephemeral ports collapses into one error
    assert!(
        mgr.store_error(
            "a",
            "web",
            &error_at("Connect to 10.0.0.1:54231 failed", "2024-05-01T10:00:00.000Z"),
        )
        .unwrap()
    );
    assert!(
        !mgr.store_error(
            "a",
            "web",
            &error_at("Connect to 10.0.0.1:61002 failed", "2024-05-01T10:00:07.000Z"),
        )
        .unwrap()
    );
    mgr.store_error(
        "b",
        "web",
        &error_at("Connect to 10.0.0.1:54231 failed", "2024-05-01T10:00:00.000Z"),
    )
    .unwrap();

    let errors = mgr.get_errors("a").unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].occurrence_count, 2);
    assert_eq!(errors[0].timestamp, "2024-05-01T10:00:07.000Z");

    let summary = mgr.get_error_summary("a").unwrap();
    assert_eq!(summary.total_errors, 2);
    assert_eq!(summary.unique_errors, 1);
    assert_eq!(summary.repeated_errors, 1);

    // 3. Sequences are global across instances
    let first = mgr
        .store_logs(&[log("a", "boot"), log("a", "listening"), log("a", "ready")])
        .unwrap();
    let n = first[0];
    assert_eq!(first, vec![n, n + 1, n + 2]);
    let second = mgr.store_logs(&[log("b", "boot"), log("b", "ready")]).unwrap();
    assert_eq!(second, vec![n + 3, n + 4]);

    // 4. Paged read, newest first
    let page = mgr.get_logs(&LogFilter::new("a").with_limit(2)).unwrap();
    assert_eq!(page.logs[0].message, "ready");
    assert_eq!(page.logs[1].message, "listening");
    assert_eq!(page.total_count, 3);
    assert!(page.has_more);

    // 5. Tail from the start, then nothing new
    let tail = mgr.get_logs_since(&LogCursor::start("a"), 100).unwrap();
    let messages: Vec<_> = tail.logs.iter().map(|l| l.message.as_str()).collect();
    assert_eq!(messages, vec!["boot", "listening", "ready"]);
    let idle = mgr.get_logs_since(&tail.cursor, 100).unwrap();
    assert!(idle.logs.is_empty());

    // 6. Envelope shape for the API layer
    let outcome: Outcome<LogStatsSummary> = mgr.get_log_stats("a").into();
    let json = serde_json::to_value(&outcome).unwrap();
    assert_eq!(json["success"], true);
    assert_eq!(json["data"]["totalLogs"], 3);

    // 7. Clearing reports the prior count exactly once
    assert_eq!(mgr.clear_errors("a").unwrap().cleared_count, 1);
    assert_eq!(mgr.clear_errors("a").unwrap().cleared_count, 0);
    assert_eq!(mgr.clear_logs("a").unwrap().cleared_count, 3);
    assert_eq!(mgr.clear_logs("a").unwrap().cleared_count, 0);
    assert_eq!(mgr.get_errors("b").unwrap().len(), 1);

    // 8. Close twice, then every call reports a closed store
    mgr.close();
    mgr.close();
    let outcome: Outcome<LogRetrievalResponse> = mgr.get_logs(&LogFilter::new("b")).into();
    let json = serde_json::to_value(&outcome).unwrap();
    assert_eq!(json["success"], false);
    assert_eq!(json["error"]["code"], "closed");
}

#[test]
fn concurrent_writers_get_unique_increasing_sequences() {
    let dir = tempfile::TempDir::new().unwrap();
    let mgr = Arc::new(StorageManager::open(&StoreConfig::at(dir.path().join("store.db"))).unwrap());

    let handles: Vec<_> = (0..4)
        .map(|worker| {
            let mgr = Arc::clone(&mgr);
            thread::spawn(move || {
                let instance = format!("inst-{worker}");
                let mut seen = Vec::new();
                for batch in 0..10 {
                    let logs: Vec<_> = (0..3)
                        .map(|i| log(&instance, &format!("{batch}-{i}")))
                        .collect();
                    seen.extend(mgr.store_logs(&logs).unwrap());
                }
                seen
            })
        })
        .collect();

    let mut all = Vec::new();
    for handle in handles {
        let seen = handle.join().unwrap();
        // Each writer observes its own sequences in increasing order.
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
        all.extend(seen);
    }

    all.sort_unstable();
    let expected: Vec<i64> = (1..=120).collect();
    assert_eq!(all, expected);

    let error = SimpleError {
        instance_id: "x".to_string(),
        process_id: "p".to_string(),
        message: "shared failure".to_string(),
        level: 3,
        timestamp: "2024-01-01T00:00:00.000Z".to_string(),
        raw_output: String::new(),
    };
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let mgr = Arc::clone(&mgr);
            let error = error.clone();
            thread::spawn(move || {
                for _ in 0..5 {
                    mgr.store_error("x", "p", &error).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let errors = mgr.get_errors("x").unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].occurrence_count, 20);
}
