//! Adherence aggregation over a date range.
//!
//! # Responsibility
//! - Combine stored events with the reminder engine's Missed projection into
//!   per-range and per-day counts.
//!
//! # Invariants
//! - Each (date, medicine, window) dose is counted once; a stored event wins
//!   over its projection.
//! - `adherence_rate = taken / (taken + skipped + missed)`; pending doses are
//!   excluded and an empty denominator yields `0.0`.

use crate::model::medicine::MedicineId;
use crate::model::schedule::TimeWindow;
use crate::model::tracking::DoseState;
use crate::service::reminder::{project_day, DaySnapshot};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default look-back when the caller gives no start date.
pub const DEFAULT_RANGE_DAYS: i64 = 30;
/// Widest accepted range, inclusive of both ends.
pub const MAX_RANGE_DAYS: i64 = 366;

/// Range and scope of an adherence query. Missing dates default to the last
/// `DEFAULT_RANGE_DAYS` days ending today.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdherenceQuery {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub medicine_id: Option<MedicineId>,
}

/// Counts for one calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayAdherence {
    pub date: NaiveDate,
    pub taken: u32,
    pub skipped: u32,
    pub missed: u32,
    pub pending: u32,
}

/// Aggregated adherence over `[start_date, end_date]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdherenceReport {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub medicine_id: Option<MedicineId>,
    pub taken: u32,
    pub skipped: u32,
    pub missed: u32,
    /// Not yet resolved and window not yet closed.
    pub pending: u32,
    pub total: u32,
    pub adherence_rate: f64,
    pub skip_rate: f64,
    /// Newest day first; days without doses are omitted.
    pub daily: Vec<DayAdherence>,
}

/// Builds the report for `start..=end` as observed at `now`.
///
/// `snapshot.medicines` and `snapshot.events` must already be scoped to the
/// query's medicine filter; events outside the range are ignored.
pub fn build_report(
    snapshot: DaySnapshot<'_>,
    start: NaiveDate,
    end: NaiveDate,
    medicine_id: Option<MedicineId>,
    now: NaiveDateTime,
) -> AdherenceReport {
    let mut doses: BTreeMap<(NaiveDate, MedicineId, TimeWindow), DoseState> = BTreeMap::new();
    for event in snapshot
        .events
        .iter()
        .filter(|event| event.date >= start && event.date <= end)
    {
        doses.insert(
            (event.date, event.medicine_id, event.time_window),
            DoseState::from(event.status),
        );
    }

    let mut next = Some(start);
    while let Some(date) = next.filter(|date| *date <= end) {
        for dose in project_day(snapshot, date, now) {
            let instance = dose.instance;
            doses
                .entry((instance.date, instance.medicine_id, instance.time_window))
                .or_insert(instance.state);
        }
        next = date.succ_opt();
    }

    let mut report = AdherenceReport {
        start_date: start,
        end_date: end,
        medicine_id,
        taken: 0,
        skipped: 0,
        missed: 0,
        pending: 0,
        total: 0,
        adherence_rate: 0.0,
        skip_rate: 0.0,
        daily: Vec::new(),
    };
    let mut daily: BTreeMap<NaiveDate, DayAdherence> = BTreeMap::new();

    for ((date, _, _), state) in doses {
        let day = daily.entry(date).or_insert_with(|| DayAdherence {
            date,
            taken: 0,
            skipped: 0,
            missed: 0,
            pending: 0,
        });
        match state {
            DoseState::Taken => {
                report.taken += 1;
                day.taken += 1;
            }
            DoseState::Skipped => {
                report.skipped += 1;
                day.skipped += 1;
            }
            DoseState::Missed => {
                report.missed += 1;
                day.missed += 1;
            }
            DoseState::Scheduled => {
                report.pending += 1;
                day.pending += 1;
            }
        }
    }

    report.total = report.taken + report.skipped + report.missed + report.pending;
    let resolved = report.taken + report.skipped + report.missed;
    report.adherence_rate = ratio(report.taken, resolved);
    report.skip_rate = ratio(report.skipped, resolved);
    report.daily = daily.into_values().rev().collect();
    report
}

/// Resolves the default range and checks its bounds.
pub fn resolve_range(
    query: &AdherenceQuery,
    today: NaiveDate,
) -> Result<(NaiveDate, NaiveDate), String> {
    let end = query.end_date.unwrap_or(today);
    let start = match query.start_date {
        Some(start) => start,
        None => end
            .checked_sub_signed(Duration::days(DEFAULT_RANGE_DAYS - 1))
            .ok_or_else(|| format!("end date {end} leaves no room for the default range"))?,
    };
    if start > end {
        return Err(format!("start date {start} is after end date {end}"));
    }
    if (end - start).num_days() + 1 > MAX_RANGE_DAYS {
        return Err(format!("date range must not exceed {MAX_RANGE_DAYS} days"));
    }
    Ok((start, end))
}

fn ratio(part: u32, whole: u32) -> f64 {
    if whole == 0 {
        0.0
    } else {
        f64::from(part) / f64::from(whole)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::medicine::Medicine;
    use crate::model::schedule::TimeWindowTable;
    use crate::model::tracking::{DoseStatus, SkipReason, TrackingEvent};
    use chrono::{FixedOffset, TimeZone, Utc, Weekday};
    use uuid::Uuid;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    fn daily_medicine() -> Medicine {
        let created = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        Medicine {
            id: Uuid::new_v4(),
            name: "Metformin".to_string(),
            dosage: "500mg".to_string(),
            time_window: TimeWindow::Morning,
            days: vec![
                Weekday::Mon,
                Weekday::Tue,
                Weekday::Wed,
                Weekday::Thu,
                Weekday::Fri,
                Weekday::Sat,
                Weekday::Sun,
            ],
            with_food: true,
            pills_remaining: 30,
            pills_per_dose: 1,
            low_stock_threshold: 5,
            notes: None,
            active: true,
            created_at: created,
            updated_at: created,
        }
    }

    fn event(medicine: &Medicine, date: NaiveDate, status: DoseStatus) -> TrackingEvent {
        TrackingEvent {
            id: 0,
            medicine_id: medicine.id,
            date,
            time_window: medicine.time_window,
            status,
            event_timestamp: Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap(),
            skip_reason: (status == DoseStatus::Skipped).then_some(SkipReason::SideEffects),
            skip_notes: None,
        }
    }

    fn snapshot<'a>(
        medicines: &'a [Medicine],
        events: &'a [TrackingEvent],
        windows: &'a TimeWindowTable,
    ) -> DaySnapshot<'a> {
        DaySnapshot {
            medicines,
            events,
            windows,
            utc_offset: FixedOffset::east_opt(0).unwrap(),
        }
    }

    #[test]
    fn report_counts_taken_skipped_missed_and_pending() {
        let medicine = daily_medicine();
        let events = vec![
            event(&medicine, day(1), DoseStatus::Taken),
            event(&medicine, day(2), DoseStatus::Skipped),
        ];
        // Day 3 closed without event, day 4 morning still open.
        let now = day(4).and_hms_opt(9, 0, 0).unwrap();
        let windows = TimeWindowTable::default();
        let medicines = [medicine];
        let report = build_report(
            snapshot(&medicines, &events, &windows),
            day(1),
            day(4),
            None,
            now,
        );

        assert_eq!(report.taken, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.missed, 1);
        assert_eq!(report.pending, 1);
        assert_eq!(report.total, 4);
        assert!((report.adherence_rate - 1.0 / 3.0).abs() < 1e-9);
        assert!((report.skip_rate - 1.0 / 3.0).abs() < 1e-9);
        let dates: Vec<NaiveDate> = report.daily.iter().map(|d| d.date).collect();
        assert_eq!(dates, vec![day(4), day(3), day(2), day(1)]);
    }

    #[test]
    fn empty_range_has_zero_rate() {
        let windows = TimeWindowTable::default();
        let report = build_report(
            snapshot(&[], &[], &windows),
            day(1),
            day(7),
            None,
            day(8).and_hms_opt(0, 0, 0).unwrap(),
        );
        assert_eq!(report.total, 0);
        assert_eq!(report.adherence_rate, 0.0);
        assert!(report.daily.is_empty());
    }

    #[test]
    fn events_of_inactive_medicines_still_count() {
        let mut medicine = daily_medicine();
        let events = vec![event(&medicine, day(1), DoseStatus::Taken)];
        medicine.active = false;
        let windows = TimeWindowTable::default();
        let medicines = [medicine];
        let report = build_report(
            snapshot(&medicines, &events, &windows),
            day(1),
            day(3),
            None,
            day(5).and_hms_opt(0, 0, 0).unwrap(),
        );
        assert_eq!(report.taken, 1);
        assert_eq!(report.missed, 0);
        assert_eq!(report.adherence_rate, 1.0);
    }

    #[test]
    fn resolve_range_defaults_and_rejects_inverted_ranges() {
        let today = day(31);
        let (start, end) = resolve_range(&AdherenceQuery::default(), today).unwrap();
        assert_eq!(end, today);
        assert_eq!((end - start).num_days(), DEFAULT_RANGE_DAYS - 1);

        let inverted = AdherenceQuery {
            start_date: Some(day(10)),
            end_date: Some(day(9)),
            medicine_id: None,
        };
        assert!(resolve_range(&inverted, today).is_err());
    }

    #[test]
    fn range_at_the_calendar_edges_does_not_overflow() {
        let windows = TimeWindowTable::default();
        let medicines = [daily_medicine()];
        let report = build_report(
            snapshot(&medicines, &[], &windows),
            NaiveDate::MAX - Duration::days(2),
            NaiveDate::MAX,
            None,
            NaiveDate::MAX.and_hms_opt(23, 59, 0).unwrap(),
        );
        assert_eq!(report.missed, 3);

        let at_min = AdherenceQuery {
            end_date: Some(NaiveDate::MIN),
            ..AdherenceQuery::default()
        };
        assert!(resolve_range(&at_min, day(31)).is_err());

        let single_min_day = AdherenceQuery {
            start_date: Some(NaiveDate::MIN),
            end_date: Some(NaiveDate::MIN),
            medicine_id: None,
        };
        assert_eq!(
            resolve_range(&single_min_day, day(31)).unwrap(),
            (NaiveDate::MIN, NaiveDate::MIN)
        );
    }
}
