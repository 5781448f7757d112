mod common;

use std::fs;
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use forgelearn::constants::LOCK_FILE;
use forgelearn::infra::archive::archive_path;
use forgelearn::infra::lock::{ExportLock, LockMode, LockOptions};
use forgelearn::prelude::*;
use forgelearn::Error;

use common::*;

#[test]
fn test_holders_never_overlap() {
    let tmp       = TempDir::new().unwrap();
    let target    = Arc::new(tmp.path().join("shared"));
    let intervals = Arc::new(Mutex::new(Vec::<(Instant, Instant)>::new()));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let target    = Arc::clone(&target);
            let intervals = Arc::clone(&intervals);
            thread::spawn(move || {
                let lock  = ExportLock::writer(&target).unwrap();
                let start = Instant::now();
                thread::sleep(Duration::from_millis(15));
                let end   = Instant::now();
                lock.commit();
                intervals.lock().unwrap().push((start, end));
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let mut intervals = intervals.lock().unwrap().clone();
    intervals.sort_by_key(|(start, _)| *start);
    assert_eq!(intervals.len(), 4);
    for pair in intervals.windows(2) {
        assert!(pair[0].1 <= pair[1].0, "critical sections overlapped");
    }
    assert!(!tmp.path().join(LOCK_FILE).exists());
}

#[test]
fn test_short_timeout_reports_lock_path() {
    let tmp   = TempDir::new().unwrap();
    let _held = ExportLock::writer(&tmp.path().join("a")).unwrap();

    // a sibling target shares the parent, hence the same lock file
    let short = LockOptions { timeout: Duration::from_millis(40), poll: Duration::from_millis(5) };
    let err   = ExportLock::acquire(&tmp.path().join("b"), LockMode::Reader, short).unwrap_err();
    assert!(matches!(err, Error::Lock { .. }));
    assert!(err.to_string().contains(LOCK_FILE));
}

#[test]
fn test_save_waits_for_current_holder() {
    let tmp = TempDir::new().unwrap();
    let out = tmp.path().join("out");
    let logs = tmp.path().join("_logs");

    let held = ExportLock::reader(&out).unwrap();
    let (ready_tx, ready_rx) = mpsc::channel();
    let saver = {
        let out = out.clone();
        thread::spawn(move || {
            let mut p = fitted(&logs);
            ready_tx.send(()).unwrap();
            p.save(&out, SaveOptions::default()).unwrap();
        })
    };
    ready_rx.recv().unwrap();
    thread::sleep(Duration::from_millis(100));
    assert!(!archive_path(&out).exists());

    drop(held);
    saver.join().unwrap();
    assert!(archive_path(&out).is_file());
}

#[test]
fn test_concurrent_saves_leave_a_loadable_export() {
    let tmp  = TempDir::new().unwrap();
    let out  = Arc::new(tmp.path().join("out"));
    let logs = Arc::new(tmp.path().join("_logs"));

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let out  = Arc::clone(&out);
            let logs = Arc::clone(&logs);
            thread::spawn(move || {
                let mut p = fitted(&logs);
                p.save(&out, SaveOptions::default()).unwrap();
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let (x, _)   = regression_data(8);
    let restored = TabularPipeline::<B>::load(&out, registries(), LoadOptions::default()).unwrap();
    assert_eq!(predictions(&restored, &x).dim(), (8, 1));
    assert!(!out.exists());
    assert!(fs::read_dir(tmp.path()).unwrap().all(|e| e.unwrap().file_name() != LOCK_FILE));
}

#[test]
fn test_unfinished_writer_removes_partial_export() {
    let tmp    = TempDir::new().unwrap();
    let target = tmp.path().join("half");
    {
        let _lock = ExportLock::writer(&target).unwrap();
        fs::create_dir_all(&target).unwrap();
        fs::write(target.join("config_bundle.json"), "{}").unwrap();
    }
    assert!(!target.exists());
    assert!(!tmp.path().join(LOCK_FILE).exists());
}
