use chrono::{Duration as Days, FixedOffset, Local, TimeZone};
use medtrack_core::{
    ConflictKind, MedicineSpec, MedicineTracker, RetryPolicy, TrackerError, TrackerOptions,
};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

#[test]
fn shared_tracker_lets_exactly_one_caller_take_the_last_pill() {
    let tracker = Arc::new(MedicineTracker::open_in_memory().unwrap());
    let medicine = tracker.add_medicine(&spec("Warfarin", 1)).unwrap();
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let tracker = Arc::clone(&tracker);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                tracker.mark_taken(medicine.id)
            })
        })
        .collect();

    let results: Vec<_> = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect();
    let successes = results.iter().filter(|result| result.is_ok()).count();
    assert_eq!(successes, 1);
    for result in results.iter().filter(|result| result.is_err()) {
        assert!(matches!(result, Err(TrackerError::Conflict(_))));
    }
    assert_eq!(tracker.get_medicine(medicine.id).unwrap().pills_remaining, 0);
}

#[test]
fn separate_connections_never_oversell_stock() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("contended.db");
    let setup = open_patient(&path);
    let medicine = setup.add_medicine(&spec("Insulin", 3)).unwrap();
    drop(setup);

    let base = FixedOffset::east_opt(0)
        .unwrap()
        .from_local_datetime(&Local::now().date_naive().and_hms_opt(8, 0, 0).unwrap())
        .unwrap();
    let workers = 6;
    let barrier = Arc::new(Barrier::new(workers));

    let handles: Vec<_> = (0..workers)
        .map(|index| {
            let path = path.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let tracker = open_patient(&path);
                barrier.wait();
                // Distinct dates so only stock, not duplicate doses, limits success.
                tracker.mark_taken_at(medicine.id, base + Days::days(index as i64))
            })
        })
        .collect();

    let results: Vec<_> = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect();
    let successes = results.iter().filter(|result| result.is_ok()).count();
    assert_eq!(successes, 3);
    for result in results.iter().filter(|result| result.is_err()) {
        assert!(matches!(
            result,
            Err(TrackerError::Conflict(ConflictKind::InsufficientStock { .. }))
        ));
    }

    let check = open_patient(&path);
    assert_eq!(check.get_medicine(medicine.id).unwrap().pills_remaining, 0);
    assert_eq!(
        check.get_tracking_history(&Default::default()).unwrap().len(),
        3
    );
}

#[test]
fn poller_sees_monotonic_versions_while_writers_commit() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("polled.db");
    let writer = Arc::new(open_patient(&path));
    let poller = open_patient(&path);

    let writer_handle = {
        let writer = Arc::clone(&writer);
        thread::spawn(move || {
            for index in 0..20 {
                writer
                    .add_medicine(&spec(&format!("Medicine {index}"), 10))
                    .unwrap();
            }
        })
    };

    let mut last = poller.current_version().unwrap();
    while !writer_handle.is_finished() {
        let version = poller.current_version().unwrap();
        assert!(version >= last, "version went backwards: {last} -> {version}");
        last = version;
    }
    writer_handle.join().unwrap();

    let final_version = poller.current_version().unwrap();
    assert!(final_version >= last);
    assert_eq!(final_version, writer.current_version().unwrap());
}

#[test]
fn held_write_lock_times_out_without_blocking_readers() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("locked.db");
    let tracker = MedicineTracker::open_with(
        &path,
        TrackerOptions {
            busy_timeout: Duration::from_millis(20),
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(5),
            },
            ..TrackerOptions::default()
        },
    )
    .unwrap();
    let before = tracker.current_version().unwrap();

    let holder = Connection::open(&path).unwrap();
    holder.execute_batch("BEGIN IMMEDIATE").unwrap();

    let err = tracker.add_medicine(&spec("Blocked", 10)).unwrap_err();
    assert!(matches!(err, TrackerError::LockTimeout { attempts: 3 }));
    assert!(err.is_retryable());
    assert_eq!(tracker.current_version().unwrap(), before);
    assert_eq!(
        tracker
            .list_medicines(&Default::default())
            .unwrap()
            .total,
        0
    );

    holder.execute_batch("ROLLBACK").unwrap();
    tracker.add_medicine(&spec("Unblocked", 10)).unwrap();
    assert_eq!(tracker.current_version().unwrap(), before + 1);
}

fn open_patient(path: &Path) -> MedicineTracker {
    MedicineTracker::open_with(
        path,
        TrackerOptions {
            busy_timeout: Duration::from_secs(2),
            retry: RetryPolicy {
                max_attempts: 10,
                base_delay: Duration::from_millis(10),
            },
            ..TrackerOptions::default()
        },
    )
    .unwrap()
}

fn spec(name: &str, pills: i64) -> MedicineSpec {
    MedicineSpec {
        name: name.to_string(),
        dosage: "5mg".to_string(),
        time_window: "morning".to_string(),
        days: ["mon", "tue", "wed", "thu", "fri", "sat", "sun"]
            .iter()
            .map(|day| day.to_string())
            .collect(),
        with_food: false,
        pills_remaining: pills,
        pills_per_dose: 1,
        low_stock_threshold: 0,
        notes: None,
        active: true,
    }
}
