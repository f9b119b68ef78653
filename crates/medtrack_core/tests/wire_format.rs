use chrono::{Local, NaiveTime};
use medtrack_core::{
    HistoryQuery, Medicine, MedicineQuery, MedicineSpec, MedicineTracker, TrackingRecord,
};

#[test]
fn medicine_serialization_uses_expected_wire_fields() {
    let tracker = MedicineTracker::open_in_memory().unwrap();
    let medicine = tracker.add_medicine(&spec()).unwrap();

    let json = serde_json::to_value(&medicine).unwrap();
    assert_eq!(json["id"], medicine.id.to_string());
    assert_eq!(json["name"], "Lisinopril");
    assert_eq!(json["time_window"], "morning");
    assert_eq!(json["pills_remaining"], 30);
    assert_eq!(json["with_food"], true);
    assert_eq!(json["active"], true);
    assert!(json["notes"].is_null());

    let decoded: Medicine = serde_json::from_value(json).unwrap();
    assert_eq!(decoded, medicine);
}

#[test]
fn medicine_spec_deserializes_with_defaults() {
    let spec: MedicineSpec = serde_json::from_str(
        r#"{
            "name": "Aspirin",
            "dosage": "81mg",
            "time_window": "Evening",
            "days": ["mon", "wed"],
            "pills_remaining": 12
        }"#,
    )
    .unwrap();

    assert_eq!(spec.pills_per_dose, 1);
    assert_eq!(spec.low_stock_threshold, 0);
    assert!(spec.active);
    assert!(!spec.with_food);
    assert!(spec.validate().is_ok());
}

#[test]
fn tracking_record_flattens_event_fields() {
    let tracker = MedicineTracker::open_in_memory().unwrap();
    let medicine = tracker.add_medicine(&spec()).unwrap();
    tracker
        .skip(medicine.id, "Out of stock", Some("pharmacy closed"))
        .unwrap();

    let records = tracker.get_tracking_history(&HistoryQuery::default()).unwrap();
    let json = serde_json::to_value(&records[0]).unwrap();
    assert_eq!(json["medicine_id"], medicine.id.to_string());
    assert_eq!(json["medicine_name"], "Lisinopril");
    assert_eq!(json["status"], "skipped");
    assert_eq!(json["skip_reason"], "out_of_stock");
    assert_eq!(json["skip_notes"], "pharmacy closed");
    assert_eq!(json["time_window"], "morning");

    let decoded: TrackingRecord = serde_json::from_value(json).unwrap();
    assert_eq!(decoded, records[0]);
}

#[test]
fn dose_instance_reports_state_and_window_bounds() {
    let tracker = MedicineTracker::open_in_memory().unwrap();
    tracker.add_medicine(&spec()).unwrap();

    let doses = tracker
        .get_pending_doses(
            Local::now().date_naive(),
            NaiveTime::from_hms_opt(13, 0, 0).unwrap(),
        )
        .unwrap();
    let json = serde_json::to_value(&doses).unwrap();
    assert_eq!(json[0]["state"], "missed");
    assert_eq!(json[0]["window"]["start_minute"], 360);
    assert_eq!(json[0]["window"]["end_minute"], 720);
}

#[test]
fn paged_listing_serializes_items_and_totals() {
    let tracker = MedicineTracker::open_in_memory().unwrap();
    tracker.add_medicine(&spec()).unwrap();

    let page = tracker.list_medicines(&MedicineQuery::default()).unwrap();
    let json = serde_json::to_value(&page).unwrap();
    assert_eq!(json["total"], 1);
    assert_eq!(json["page"], 1);
    assert_eq!(json["per_page"], 20);
    assert_eq!(json["items"].as_array().unwrap().len(), 1);
}

fn spec() -> MedicineSpec {
    MedicineSpec {
        name: "Lisinopril".to_string(),
        dosage: "10mg".to_string(),
        time_window: "morning".to_string(),
        days: ["mon", "tue", "wed", "thu", "fri", "sat", "sun"]
            .iter()
            .map(|day| day.to_string())
            .collect(),
        with_food: true,
        pills_remaining: 30,
        pills_per_dose: 1,
        low_stock_threshold: 5,
        notes: None,
        active: true,
    }
}
