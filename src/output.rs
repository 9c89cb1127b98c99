use std::io::{self, Write};

use serde::Serialize;

use crate::app::{ProgressEvent, ProgressSink, RunReport};
use crate::domain::Classification;

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_run(result: &RunReport) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_classification(result: &Classification) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Forwards progress events to the tracing subscriber.
pub struct LogSink;

impl ProgressSink for LogSink {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => tracing::info!(
                phase = ?event.phase,
                elapsed_ms = elapsed.as_millis() as u64,
                "{}",
                event.message
            ),
            None => tracing::info!(phase = ?event.phase, "{}", event.message),
        }
    }
}

pub fn print_run_summary(report: &RunReport) {
    println!("CFIA recalls run summary");
    println!("  pages fetched:   {}", report.pages);
    println!("  records fetched: {}", report.fetched);
    println!("  filtered out:    {}", report.filtered_out);
    println!("  duplicates:      {}", report.duplicates);
    println!("  dropped:         {}", report.dropped.len());
    println!("  loaded:          {}", report.loaded);
    println!(
        "    inserted {} / updated {} / unchanged {} / restored {} / archived {}",
        report.load.inserted,
        report.load.updated,
        report.load.unchanged,
        report.load.restored,
        report.load.archived
    );
    for dropped in &report.dropped {
        println!("  ! {dropped}");
    }
}

pub fn print_classification(classification: &Classification) {
    let or_none = |value: &Option<String>| value.clone().unwrap_or_else(|| "-".to_string());
    println!("category:         {}", classification.category);
    println!("main issue:       {}", or_none(&classification.main_issue));
    println!("secondary issue:  {}", or_none(&classification.secondary_issue));
    println!("bacteria subtype: {}", or_none(&classification.bacteria_subtype));
    println!("class:            {}", classification.class);
}
