use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};
use std::collections::btree_map::Entry;
use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::classify::Classifier;
use crate::domain::{Nid, RawRecallRecord, RecallClass, RecallRecord};
use crate::error::{ParseError, RecallError};
use crate::load::{LoadReport, Loader};
use crate::normalize::{NID_COLUMNS, is_food_recall, normalize};
use crate::source::{RecallSource, RecordStream};
use crate::store::RecallStore;

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Keep only Salmonella / Listeria / E. coli recalls.
    pub food_only: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self { food_only: true }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TransformReport {
    pub fetched: usize,
    pub filtered_out: usize,
    pub duplicates: usize,
    pub dropped: Vec<ParseError>,
    /// NIDs listed upstream that produced no record (filtered or dropped).
    /// Still live, so never archived by this run.
    #[serde(skip)]
    pub retained: BTreeSet<Nid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub pages: u32,
    pub fetched: usize,
    pub filtered_out: usize,
    pub duplicates: usize,
    pub dropped: Vec<ParseError>,
    pub loaded: usize,
    pub load: LoadReport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Fetch,
    Transform,
    Load,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub phase: Phase,
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Fetch -> normalize -> classify -> load, once.
pub struct App<S: RecallSource> {
    source: S,
    classifier: Classifier,
    options: RunOptions,
}

impl<S: RecallSource> App<S> {
    pub fn new(source: S, classifier: Classifier, options: RunOptions) -> Self {
        Self {
            source,
            classifier,
            options,
        }
    }

    pub fn run(
        &self,
        store: &mut RecallStore,
        sink: &dyn ProgressSink,
    ) -> Result<RunReport, RecallError> {
        self.run_at(store, Utc::now(), sink)
    }

    /// Same as [`App::run`] with an explicit insert timestamp.
    pub fn run_at(
        &self,
        store: &mut RecallStore,
        now: DateTime<Utc>,
        sink: &dyn ProgressSink,
    ) -> Result<RunReport, RecallError> {
        let started = Instant::now();
        sink.event(ProgressEvent {
            phase: Phase::Fetch,
            message: "fetching recall listings".to_string(),
            elapsed: None,
        });
        let mut stream = RecordStream::new(&self.source);
        let raws = stream.by_ref().collect::<Result<Vec<_>, _>>()?;
        let pages = stream.pages_fetched();
        sink.event(ProgressEvent {
            phase: Phase::Fetch,
            message: format!("fetched {} records from {pages} page(s)", raws.len()),
            elapsed: Some(started.elapsed()),
        });

        let (records, transform) = self.transform(raws);
        sink.event(ProgressEvent {
            phase: Phase::Transform,
            message: format!(
                "classified {} records ({} filtered, {} duplicates, {} dropped)",
                records.len(),
                transform.filtered_out,
                transform.duplicates,
                transform.dropped.len()
            ),
            elapsed: Some(started.elapsed()),
        });

        let load =
            Loader::load_retaining(store.connection_mut(), &records, &transform.retained, now)?;
        sink.event(ProgressEvent {
            phase: Phase::Load,
            message: format!(
                "loaded {} records ({} inserted, {} updated, {} archived)",
                records.len(),
                load.inserted,
                load.updated,
                load.archived
            ),
            elapsed: Some(started.elapsed()),
        });

        Ok(RunReport {
            pages,
            fetched: transform.fetched,
            filtered_out: transform.filtered_out,
            duplicates: transform.duplicates,
            dropped: transform.dropped,
            loaded: records.len(),
            load,
        })
    }

    /// Normalizes and classifies a fetched batch. Records that fail to parse
    /// are reported and skipped; the result holds one record per NID.
    pub fn transform(&self, raws: Vec<RawRecallRecord>) -> (Vec<RecallRecord>, TransformReport) {
        let mut report = TransformReport {
            fetched: raws.len(),
            ..TransformReport::default()
        };
        let mut records = Vec::with_capacity(raws.len());
        for raw in &raws {
            if self.options.food_only && !is_food_recall(raw) {
                report.filtered_out += 1;
                report.retained.extend(raw_nid(raw));
                continue;
            }
            match normalize(raw) {
                Ok(normalized) => {
                    let classification = self.classifier.classify_record(&normalized);
                    records.push(RecallRecord::from_parts(normalized, classification));
                }
                Err(err) => {
                    tracing::warn!(
                        nid = err.nid.as_deref().unwrap_or("?"),
                        title = err.title.as_deref().unwrap_or(""),
                        reason = %err.reason,
                        "dropping recall record"
                    );
                    report.retained.extend(raw_nid(raw));
                    report.dropped.push(err);
                }
            }
        }
        let (records, duplicates) = dedupe_by_nid(records);
        report.duplicates = duplicates;
        for record in &records {
            report.retained.remove(&record.nid);
        }
        (records, report)
    }
}

fn raw_nid(raw: &RawRecallRecord) -> Option<Nid> {
    raw.get(NID_COLUMNS)?.parse().ok()
}

/// Collapses records sharing a NID to one, independent of input order: the
/// most recently updated wins, remaining ties go to the greater content.
pub fn dedupe_by_nid(records: Vec<RecallRecord>) -> (Vec<RecallRecord>, usize) {
    let mut by_nid = BTreeMap::<Nid, RecallRecord>::new();
    let mut duplicates = 0;
    for record in records {
        match by_nid.entry(record.nid) {
            Entry::Vacant(slot) => {
                slot.insert(record);
            }
            Entry::Occupied(mut slot) => {
                duplicates += 1;
                if preference_key(&record) > preference_key(slot.get()) {
                    slot.insert(record);
                }
            }
        }
    }
    (by_nid.into_values().collect(), duplicates)
}

type PreferenceKey<'a> = (
    NaiveDate,
    &'a str,
    &'a str,
    &'a str,
    &'a str,
    &'a str,
    Option<&'a str>,
    Option<&'a str>,
    Option<&'a str>,
    Reverse<RecallClass>,
);

fn preference_key(record: &RecallRecord) -> PreferenceKey<'_> {
    (
        record.last_updated,
        &record.title,
        &record.issue,
        &record.product,
        &record.url,
        &record.category,
        record.main_issue.as_deref(),
        record.secondary_issue.as_deref(),
        record.bacteria_subtype.as_deref(),
        Reverse(record.class),
    )
}
