use std::collections::BTreeSet;

use assert_matches::assert_matches;
use chrono::{DateTime, Duration, NaiveDate, Utc};

use cfia_recalls::domain::{Nid, RecallClass, RecallRecord};
use cfia_recalls::error::RecallError;
use cfia_recalls::load::{LoadReport, Loader};
use cfia_recalls::store::RecallStore;

fn t0() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2025-01-15T09:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

fn record(nid: i64, title: &str) -> RecallRecord {
    RecallRecord {
        nid: Nid::new(nid),
        title: title.to_string(),
        url: format!("https://recalls-rappels.canada.ca/en/alert-recall/{nid}"),
        product: "Brand X Cheese".to_string(),
        issue: "Listeria - Food".to_string(),
        main_issue: Some("Biological contamination".to_string()),
        secondary_issue: None,
        bacteria_subtype: Some("Listeria monocytogenes".to_string()),
        category: "Bacteria".to_string(),
        class: RecallClass::Class1,
        last_updated: NaiveDate::from_ymd_opt(2024, 5, 13).unwrap(),
    }
}

#[test]
fn first_load_inserts_every_record() {
    let mut store = RecallStore::open_in_memory().unwrap();
    let batch = vec![record(1, "a"), record(2, "b")];
    let report = Loader::load(store.connection_mut(), &batch, t0()).unwrap();
    assert_eq!(
        report,
        LoadReport {
            inserted: 2,
            ..LoadReport::default()
        }
    );

    let stored = store.all().unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].record, batch[0]);
    assert!(!stored[0].is_archived);
    assert_eq!(stored[0].created_at, t0());
}

#[test]
fn update_keeps_created_at() {
    let mut store = RecallStore::open_in_memory().unwrap();
    Loader::load(store.connection_mut(), &[record(1, "old title")], t0()).unwrap();

    let mut changed = record(1, "new title");
    changed.class = RecallClass::Class2;
    let report = Loader::load(
        store.connection_mut(),
        &[changed.clone()],
        t0() + Duration::days(1),
    )
    .unwrap();
    assert_eq!(report.updated, 1);
    assert_eq!(report.inserted, 0);

    let stored = store.get(Nid::new(1)).unwrap().unwrap();
    assert_eq!(stored.record, changed);
    assert_eq!(stored.created_at, t0());
}

#[test]
fn reload_of_same_batch_changes_nothing() {
    let mut store = RecallStore::open_in_memory().unwrap();
    let batch = vec![record(1, "a"), record(2, "b")];
    Loader::load(store.connection_mut(), &batch, t0()).unwrap();
    let before = store.all().unwrap();

    let report = Loader::load(store.connection_mut(), &batch, t0() + Duration::hours(6)).unwrap();
    assert_eq!(report.unchanged, 2);
    assert_eq!(report.written(), 0);
    assert_eq!(store.all().unwrap(), before);
}

#[test]
fn missing_nid_is_archived_with_fields_untouched() {
    let mut store = RecallStore::open_in_memory().unwrap();
    let original = record(12345, "Brand X Cheese recalled due to Listeria");
    Loader::load(
        store.connection_mut(),
        &[original.clone(), record(2, "b")],
        t0(),
    )
    .unwrap();

    let report = Loader::load(store.connection_mut(), &[record(2, "b")], t0()).unwrap();
    assert_eq!(report.archived, 1);
    assert_eq!(report.unchanged, 1);

    let archived = store.get(Nid::new(12345)).unwrap().unwrap();
    assert!(archived.is_archived);
    assert_eq!(archived.record, original);
    assert_eq!(store.count_archived().unwrap(), 1);

    // Already archived rows are not counted again.
    let report = Loader::load(store.connection_mut(), &[record(2, "b")], t0()).unwrap();
    assert_eq!(report.archived, 0);
}

#[test]
fn reappearing_nid_is_restored() {
    let mut store = RecallStore::open_in_memory().unwrap();
    Loader::load(store.connection_mut(), &[record(7, "a")], t0()).unwrap();
    Loader::load(store.connection_mut(), &[], t0()).unwrap();
    assert!(store.get(Nid::new(7)).unwrap().unwrap().is_archived);

    let report = Loader::load(store.connection_mut(), &[record(7, "a")], t0()).unwrap();
    assert_eq!(report.restored, 1);
    let stored = store.get(Nid::new(7)).unwrap().unwrap();
    assert!(!stored.is_archived);
    assert_eq!(stored.created_at, t0());
}

#[test]
fn duplicate_nid_fails_without_writing() {
    let mut store = RecallStore::open_in_memory().unwrap();
    Loader::load(store.connection_mut(), &[record(1, "a")], t0()).unwrap();
    let before = store.all().unwrap();

    let err = Loader::load(
        store.connection_mut(),
        &[record(2, "b"), record(3, "c"), record(3, "c again")],
        t0(),
    )
    .unwrap_err();
    assert_matches!(err, RecallError::Load(message) if message.contains("duplicate NID 3"));
    assert_eq!(store.all().unwrap(), before);
}

#[test]
fn batch_order_does_not_matter() {
    let batch = vec![record(3, "c"), record(1, "a"), record(2, "b")];
    let mut reversed = batch.clone();
    reversed.reverse();

    let mut left = RecallStore::open_in_memory().unwrap();
    let mut right = RecallStore::open_in_memory().unwrap();
    Loader::load(left.connection_mut(), &batch, t0()).unwrap();
    Loader::load(right.connection_mut(), &reversed, t0()).unwrap();
    assert_eq!(left.all().unwrap(), right.all().unwrap());
}

#[test]
fn file_database_persists_between_opens() {
    let dir = tempfile::tempdir().unwrap();
    let path = camino::Utf8PathBuf::from_path_buf(dir.path().join("nested/recalls.db")).unwrap();

    {
        let mut store = RecallStore::open(&path).unwrap();
        Loader::load(store.connection_mut(), &[record(9, "a")], t0()).unwrap();
    }
    let store = RecallStore::open(&path).unwrap();
    assert_eq!(store.count().unwrap(), 1);
}

#[test]
fn retained_nids_escape_the_archive_sweep() {
    let mut store = RecallStore::open_in_memory().unwrap();
    Loader::load(store.connection_mut(), &[record(1, "a"), record(2, "b")], t0()).unwrap();

    let retained = BTreeSet::from([Nid::new(2)]);
    let report =
        Loader::load_retaining(store.connection_mut(), &[record(1, "a")], &retained, t0()).unwrap();
    assert_eq!(report.archived, 0);
    assert!(!store.get(Nid::new(2)).unwrap().unwrap().is_archived);

    let report = Loader::load(store.connection_mut(), &[record(1, "a")], t0()).unwrap();
    assert_eq!(report.archived, 1);
}
