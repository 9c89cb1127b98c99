//! Batch ETL for Canadian Food Inspection Agency food recalls.
//!
//! A run fetches the recall listing, normalizes each record, classifies its
//! hazard with ordered keyword rules and upserts the batch into SQLite in a
//! single transaction, archiving recalls that disappeared upstream.

pub mod app;
pub mod classify;
pub mod config;
pub mod domain;
pub mod error;
pub mod load;
pub mod normalize;
pub mod output;
pub mod source;
pub mod store;
