use chrono::{DateTime, Datelike, Duration, FixedOffset, Local, NaiveDate, NaiveTime, TimeZone};
use medtrack_core::model::schedule::weekday_code;
use medtrack_core::{
    ConflictKind, DoseState, DoseStatus, HistoryQuery, MedicineSpec, MedicineTracker, SkipReason,
    TimeWindow, TrackerError,
};
use uuid::Uuid;

#[test]
fn mark_taken_twice_succeeds_once_and_never_goes_negative() {
    let tracker = MedicineTracker::open_in_memory().unwrap();
    let mut input = spec("Levothyroxine", "morning");
    input.pills_remaining = 1;
    let medicine = tracker.add_medicine(&input).unwrap();

    let first = tracker.mark_taken(medicine.id).unwrap();
    assert_eq!(first.medicine.pills_remaining, 0);
    assert_eq!(first.event.status, DoseStatus::Taken);
    assert!(first.low_stock);

    let second = tracker.mark_taken(medicine.id).unwrap_err();
    assert!(matches!(second, TrackerError::Conflict(_)));
    assert_eq!(second.code(), "CONFLICT");
    assert_eq!(tracker.get_medicine(medicine.id).unwrap().pills_remaining, 0);
}

#[test]
fn mark_taken_without_enough_stock_is_a_conflict_and_commits_nothing() {
    let tracker = MedicineTracker::open_in_memory().unwrap();
    let mut input = spec("Prednisone", "evening");
    input.pills_remaining = 3;
    input.pills_per_dose = 2;
    let medicine = tracker.add_medicine(&input).unwrap();

    let first_day = at(today(), 18, 0);
    tracker.mark_taken_at(medicine.id, first_day).unwrap();
    let version = tracker.current_version().unwrap();

    let err = tracker
        .mark_taken_at(medicine.id, first_day + Duration::days(1))
        .unwrap_err();
    assert!(matches!(
        err,
        TrackerError::Conflict(ConflictKind::InsufficientStock {
            pills_remaining: 1,
            pills_per_dose: 2,
            ..
        })
    ));
    assert_eq!(tracker.get_medicine(medicine.id).unwrap().pills_remaining, 1);
    assert_eq!(tracker.current_version().unwrap(), version);
    assert_eq!(
        tracker.get_tracking_history(&HistoryQuery::default()).unwrap().len(),
        1
    );
}

#[test]
fn pending_doses_follow_the_window_clock() {
    let tracker = MedicineTracker::open_in_memory().unwrap();
    let medicine = tracker.add_medicine(&spec("Metformin", "morning")).unwrap();
    let date = today();

    assert!(tracker.get_pending_doses(date, clock(5, 0)).unwrap().is_empty());

    let open = tracker.get_pending_doses(date, clock(8, 0)).unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].medicine_id, medicine.id);
    assert_eq!(open[0].state, DoseState::Scheduled);
    assert_eq!(open[0].time_window, TimeWindow::Morning);

    let closed = tracker.get_pending_doses(date, clock(13, 0)).unwrap();
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].state, DoseState::Missed);
}

#[test]
fn pending_doses_are_ordered_by_window_then_name() {
    let tracker = MedicineTracker::open_in_memory().unwrap();
    tracker.add_medicine(&spec("zinc", "afternoon")).unwrap();
    tracker.add_medicine(&spec("Biotin", "morning")).unwrap();
    tracker.add_medicine(&spec("aspirin", "morning")).unwrap();

    let doses = tracker.get_pending_doses(today(), clock(13, 0)).unwrap();
    let names: Vec<&str> = doses.iter().map(|d| d.medicine_name.as_str()).collect();
    assert_eq!(names, vec!["aspirin", "Biotin", "zinc"]);
    assert_eq!(doses[2].state, DoseState::Scheduled);
}

#[test]
fn pending_doses_skip_resolved_inactive_and_unscheduled_medicines() {
    let tracker = MedicineTracker::open_in_memory().unwrap();
    let taken = tracker.add_medicine(&spec("Taken", "morning")).unwrap();
    let mut paused = spec("Paused", "morning");
    paused.active = false;
    tracker.add_medicine(&paused).unwrap();

    let date = today();
    let mut other_day = spec("Other day", "morning");
    other_day.days = vec![weekday_code((date + Duration::days(1)).weekday()).to_string()];
    tracker.add_medicine(&other_day).unwrap();

    tracker.mark_taken_at(taken.id, at(date, 7, 0)).unwrap();

    assert!(tracker.get_pending_doses(date, clock(9, 0)).unwrap().is_empty());
}

#[test]
fn skip_then_mark_taken_is_a_conflict_and_leaves_stock_alone() {
    let tracker = MedicineTracker::open_in_memory().unwrap();
    let medicine = tracker.add_medicine(&spec("Ibuprofen", "afternoon")).unwrap();

    let skipped = tracker
        .skip(medicine.id, "out_of_stock", Some("refill needed"))
        .unwrap();
    assert_eq!(skipped.status, DoseStatus::Skipped);
    assert_eq!(skipped.skip_reason, Some(SkipReason::OutOfStock));
    assert_eq!(skipped.skip_notes.as_deref(), Some("refill needed"));

    let err = tracker.mark_taken(medicine.id).unwrap_err();
    match err {
        TrackerError::Conflict(ConflictKind::AlreadyResolved { status, .. }) => {
            assert_eq!(status, DoseStatus::Skipped)
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(tracker.get_medicine(medicine.id).unwrap().pills_remaining, 30);
}

#[test]
fn skip_accepts_labels_and_rejects_unknown_reasons() {
    let tracker = MedicineTracker::open_in_memory().unwrap();
    let medicine = tracker.add_medicine(&spec("Sertraline", "night")).unwrap();
    let date = today();

    let event = tracker
        .skip_at(medicine.id, "Side effects", None, at(date, 22, 0))
        .unwrap();
    assert_eq!(event.skip_reason, Some(SkipReason::SideEffects));

    let err = tracker
        .skip_at(medicine.id, "bored", None, at(date + Duration::days(1), 22, 0))
        .unwrap_err();
    assert!(matches!(err, TrackerError::Validation { field: "reason", .. }));

    let long_notes = "n".repeat(501);
    let err = tracker
        .skip_at(
            medicine.id,
            "other",
            Some(&long_notes),
            at(date + Duration::days(1), 22, 0),
        )
        .unwrap_err();
    assert!(matches!(err, TrackerError::Validation { field: "notes", .. }));
}

#[test]
fn late_mark_taken_is_recorded_against_the_window() {
    let tracker = MedicineTracker::open_in_memory().unwrap();
    let medicine = tracker.add_medicine(&spec("Omeprazole", "morning")).unwrap();
    let date = today();

    let result = tracker.mark_taken_at(medicine.id, at(date, 15, 30)).unwrap();
    assert_eq!(result.event.date, date);
    assert_eq!(result.event.time_window, TimeWindow::Morning);

    assert!(tracker.get_pending_doses(date, clock(16, 0)).unwrap().is_empty());
    let summary = tracker.get_today_summary(date, clock(16, 0)).unwrap();
    assert_eq!(summary.taken, 1);
    assert_eq!(summary.missed, 0);
}

#[test]
fn marking_an_unknown_medicine_is_not_found() {
    let tracker = MedicineTracker::open_in_memory().unwrap();
    let missing = Uuid::new_v4();

    assert!(matches!(
        tracker.mark_taken(missing),
        Err(TrackerError::NotFound(id)) if id == missing
    ));
    assert!(matches!(
        tracker.skip(missing, "forgot", None),
        Err(TrackerError::NotFound(_))
    ));
}

#[test]
fn low_stock_flag_turns_on_at_threshold() {
    let tracker = MedicineTracker::open_in_memory().unwrap();
    let mut input = spec("Amlodipine", "morning");
    input.pills_remaining = 6;
    input.low_stock_threshold = 5;
    let medicine = tracker.add_medicine(&input).unwrap();

    let result = tracker.mark_taken(medicine.id).unwrap();
    assert_eq!(result.medicine.pills_remaining, 5);
    assert!(result.low_stock);
    assert_eq!(tracker.list_low_stock().unwrap().len(), 1);
}

#[test]
fn batch_marks_each_medicine_independently() {
    let tracker = MedicineTracker::open_in_memory().unwrap();
    let first = tracker.add_medicine(&spec("First", "morning")).unwrap();
    let mut empty = spec("Empty", "morning");
    empty.pills_remaining = 0;
    let empty = tracker.add_medicine(&empty).unwrap();
    let missing = Uuid::new_v4();

    let outcomes = tracker
        .mark_taken_batch(&[first.id, empty.id, missing])
        .unwrap();
    assert_eq!(outcomes.len(), 3);
    assert_eq!(outcomes[0].medicine_id, first.id);
    assert_eq!(
        outcomes[0].result.as_ref().unwrap().medicine.pills_remaining,
        29
    );
    assert!(matches!(
        outcomes[1].result,
        Err(TrackerError::Conflict(ConflictKind::InsufficientStock { .. }))
    ));
    assert!(matches!(outcomes[2].result, Err(TrackerError::NotFound(_))));

    assert_eq!(tracker.get_medicine(first.id).unwrap().pills_remaining, 29);
}

#[test]
fn batch_size_is_bounded() {
    let tracker = MedicineTracker::open_in_memory().unwrap();

    assert!(matches!(
        tracker.mark_taken_batch(&[]),
        Err(TrackerError::Validation { field: "medicine_ids", .. })
    ));
    let too_many: Vec<Uuid> = (0..21).map(|_| Uuid::new_v4()).collect();
    assert!(matches!(
        tracker.mark_taken_batch(&too_many),
        Err(TrackerError::Validation { field: "medicine_ids", .. })
    ));
}

#[test]
fn today_summary_counts_every_state() {
    let tracker = MedicineTracker::open_in_memory().unwrap();
    let date = today();
    let taken = tracker.add_medicine(&spec("Taken", "morning")).unwrap();
    tracker.add_medicine(&spec("Missed", "morning")).unwrap();
    tracker.add_medicine(&spec("Pending", "afternoon")).unwrap();
    tracker.add_medicine(&spec("Upcoming", "evening")).unwrap();
    let skipped = tracker.add_medicine(&spec("Skipped", "night")).unwrap();
    let mut low = spec("Low", "evening");
    low.active = false;
    low.pills_remaining = 0;
    tracker.add_medicine(&low).unwrap();

    tracker.mark_taken_at(taken.id, at(date, 8, 0)).unwrap();
    tracker
        .skip_at(skipped.id, "doctor_advised", None, at(date, 12, 30))
        .unwrap();

    let summary = tracker.get_today_summary(date, clock(13, 0)).unwrap();
    assert_eq!(summary.date, date);
    assert_eq!(summary.scheduled, 5);
    assert_eq!(summary.taken, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.missed, 1);
    assert_eq!(summary.pending, 1);
    assert_eq!(summary.upcoming, 1);
    assert_eq!(summary.low_stock, 0);
}

#[test]
fn skip_history_is_newest_first_with_medicine_details() {
    let tracker = MedicineTracker::open_in_memory().unwrap();
    let medicine = tracker.add_medicine(&spec("Losartan", "morning")).unwrap();
    let date = today();

    for offset in 0..3 {
        tracker
            .skip_at(
                medicine.id,
                "forgot",
                Some("busy morning"),
                at(date + Duration::days(offset), 9, 0),
            )
            .unwrap();
    }
    tracker
        .mark_taken_at(medicine.id, at(date + Duration::days(3), 9, 0))
        .unwrap();

    let skips = tracker.get_skip_history(&HistoryQuery::default()).unwrap();
    assert_eq!(skips.len(), 3);
    assert_eq!(skips[0].date, date + Duration::days(2));
    assert_eq!(skips[2].date, date);
    assert_eq!(skips[0].medicine_name, "Losartan");
    assert_eq!(skips[0].dosage, "10mg");
    assert_eq!(skips[0].reason, SkipReason::Forgot);
    assert_eq!(skips[0].notes.as_deref(), Some("busy morning"));

    let limited = tracker
        .get_tracking_history(&HistoryQuery {
            limit: Some(2),
            ..HistoryQuery::default()
        })
        .unwrap();
    assert_eq!(limited.len(), 2);
    assert_eq!(limited[0].event.status, DoseStatus::Taken);

    let ranged = tracker
        .get_tracking_history(&HistoryQuery {
            start_date: Some(date + Duration::days(1)),
            end_date: Some(date + Duration::days(2)),
            medicine_id: Some(medicine.id),
            limit: None,
        })
        .unwrap();
    assert_eq!(ranged.len(), 2);
}

#[test]
fn history_rejects_inverted_ranges() {
    let tracker = MedicineTracker::open_in_memory().unwrap();
    let date = today();
    let err = tracker
        .get_skip_history(&HistoryQuery {
            start_date: Some(date),
            end_date: Some(date - Duration::days(1)),
            ..HistoryQuery::default()
        })
        .unwrap_err();
    assert!(matches!(err, TrackerError::Validation { field: "date_range", .. }));
}

fn spec(name: &str, window: &str) -> MedicineSpec {
    MedicineSpec {
        name: name.to_string(),
        dosage: "10mg".to_string(),
        time_window: window.to_string(),
        days: ["mon", "tue", "wed", "thu", "fri", "sat", "sun"]
            .iter()
            .map(|day| day.to_string())
            .collect(),
        with_food: false,
        pills_remaining: 30,
        pills_per_dose: 1,
        low_stock_threshold: 0,
        notes: None,
        active: true,
    }
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

fn clock(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap()
}

/// Instant on `date` at `hour:minute`, in a zero offset so the calendar date
/// is exactly `date`.
fn at(date: NaiveDate, hour: u32, minute: u32) -> DateTime<FixedOffset> {
    FixedOffset::east_opt(0)
        .unwrap()
        .from_local_datetime(&date.and_hms_opt(hour, minute, 0).unwrap())
        .unwrap()
}
