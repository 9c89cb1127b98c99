use std::fs;

use chrono::NaiveDate;

use cfia_recalls::domain::RawRecallRecord;
use cfia_recalls::normalize::{extract_product_name, is_food_recall, normalize};
use cfia_recalls::source::decode_csv;

fn fixture() -> Vec<RawRecallRecord> {
    let body = fs::read_to_string("tests/fixtures/recalls_sample.csv").unwrap();
    decode_csv(&body).unwrap()
}

fn raw(pairs: &[(&str, &str)]) -> RawRecallRecord {
    RawRecallRecord::from_pairs(pairs.iter().copied())
}

#[test]
fn fixture_rows_decode_with_canonical_columns() {
    let records = fixture();
    assert_eq!(records.len(), 7);
    assert_eq!(records[0].get(&["NID"]), Some("10001"));
    assert_eq!(records[1].get(&["RecallClass"]), Some("Class 1 - Class 2"));
}

#[test]
fn product_falls_back_to_title_extraction() {
    let normalized = normalize(&fixture()[0]).unwrap();
    assert_eq!(normalized.nid.get(), 10001);
    assert_eq!(normalized.product, "Brand X Cheese");
    assert_eq!(normalized.issue, "Listeria - Food");
    assert_eq!(
        normalized.last_updated,
        NaiveDate::from_ymd_opt(2024, 5, 13).unwrap()
    );
}

#[test]
fn markup_is_stripped_from_title() {
    let normalized = normalize(&fixture()[1]).unwrap();
    assert_eq!(normalized.title, "Salmonella in Brand Y tahini");
    assert_eq!(normalized.product, "Brand Y tahini");
    assert_eq!(normalized.class_text, "Class 1 - Class 2");
}

#[test]
fn o157_issue_is_split_into_segments() {
    let normalized = normalize(&fixture()[2]).unwrap();
    assert_eq!(normalized.issue, "E. Coli - O157:H7");
}

#[test]
fn unparseable_date_is_a_parse_error() {
    let err = normalize(&fixture()[4]).unwrap_err();
    assert_eq!(err.nid.as_deref(), Some("10005"));
    assert_eq!(err.title.as_deref(), Some("Brand W sprouts may contain Salmonella"));
    assert!(err.reason.contains("N/A"), "{}", err.reason);
}

#[test]
fn missing_nid_or_title_is_rejected() {
    let no_nid = raw(&[("Title", "Cheese"), ("Last updated", "2024-01-01")]);
    assert_eq!(normalize(&no_nid).unwrap_err().reason, "missing NID");

    let bad_nid = raw(&[("NID", "abc"), ("Title", "Cheese"), ("Last updated", "2024-01-01")]);
    let err = normalize(&bad_nid).unwrap_err();
    assert_eq!(err.nid.as_deref(), Some("abc"));
    assert_eq!(err.title.as_deref(), Some("Cheese"));

    let no_title = raw(&[("NID", "7"), ("Title", "<p> </p>"), ("Last updated", "2024-01-01")]);
    assert_eq!(normalize(&no_title).unwrap_err().reason, "missing title");
}

#[test]
fn empty_issue_is_kept_empty() {
    let record = raw(&[
        ("NID", "55"),
        ("Title", "Brand Q juice recalled"),
        ("Last updated", "2024-01-01"),
    ]);
    let normalized = normalize(&record).unwrap();
    assert_eq!(normalized.issue, "");
    assert_eq!(normalized.product, "Brand Q juice");
    assert_eq!(normalized.url, "");
}

#[test]
fn product_extraction_triggers() {
    assert_eq!(
        extract_product_name("Undeclared milk in Brand Z cookies").as_deref(),
        Some("Brand Z cookies")
    );
    assert_eq!(
        extract_product_name("Brand W sprouts may contain Salmonella").as_deref(),
        Some("Brand W sprouts")
    );
    assert_eq!(extract_product_name("Recall notice"), None);
}

#[test]
fn food_filter_excludes_medical_devices_and_allergens() {
    let flags = fixture().iter().map(is_food_recall).collect::<Vec<_>>();
    assert_eq!(flags, vec![true, true, true, false, true, false, true]);
}
