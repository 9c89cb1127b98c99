use std::collections::VecDeque;
use std::fmt;
use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;

use crate::domain::RawRecallRecord;
use crate::error::RecallError;

/// How the source splits its listing into pages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pagination {
    /// One response carries the whole dataset.
    Single,
    Paged {
        page_param: String,
        page_size_param: String,
        page_size: u32,
    },
}

impl Pagination {
    pub fn paged(page_size: u32) -> Self {
        Pagination::Paged {
            page_param: "page".to_string(),
            page_size_param: "page_size".to_string(),
            page_size,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SourcePage {
    pub records: Vec<RawRecallRecord>,
    pub has_more: bool,
}

pub trait RecallSource {
    fn fetch_page(&self, page: u32) -> Result<SourcePage, RecallError>;
}

impl<S: RecallSource + ?Sized> RecallSource for &S {
    fn fetch_page(&self, page: u32) -> Result<SourcePage, RecallError> {
        (**self).fetch_page(page)
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(5),
        }
    }
}

#[derive(Clone)]
pub struct HttpRecallSource {
    client: Client,
    url: String,
    pagination: Pagination,
    retry: RetryPolicy,
}

impl HttpRecallSource {
    pub fn new(
        url: impl Into<String>,
        pagination: Pagination,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, RecallError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("cfia-recalls/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| RecallError::Config(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| RecallError::Config(format!("http client: {err}")))?;
        Ok(Self {
            client,
            url: url.into(),
            pagination,
            retry,
        })
    }

    fn request(&self, page: u32) -> reqwest::blocking::RequestBuilder {
        let request = self.client.get(&self.url);
        match &self.pagination {
            Pagination::Single => request,
            Pagination::Paged {
                page_param,
                page_size_param,
                page_size,
            } => request.query(&[
                (page_param.as_str(), page.to_string()),
                (page_size_param.as_str(), page_size.to_string()),
            ]),
        }
    }

    /// One full download of `page`: request, status check and body read all
    /// sit inside the same retried attempt.
    fn download(&self, page: u32) -> Result<Download, RecallError> {
        let mut attempt = 0u32;
        loop {
            let failure = match self.request(page).send() {
                Ok(resp) if resp.status().is_success() => {
                    let content_type = resp
                        .headers()
                        .get(CONTENT_TYPE)
                        .and_then(|value| value.to_str().ok())
                        .map(|value| value.to_string());
                    match resp.bytes() {
                        Ok(bytes) => {
                            let body = String::from_utf8_lossy(&bytes).into_owned();
                            return Ok(Download { content_type, body });
                        }
                        Err(err) => Failure::Body(err),
                    }
                }
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    let message = resp
                        .text()
                        .unwrap_or_else(|_| "recall source request failed".to_string());
                    Failure::Status { status, message }
                }
                Err(err) => Failure::Transport(err),
            };

            if attempt < self.retry.max_retries && failure.is_retryable() {
                attempt += 1;
                tracing::debug!(page, attempt, reason = %failure, "retrying recall source request");
                thread::sleep(self.retry.base_delay * attempt);
                continue;
            }
            return Err(failure.into_error(page));
        }
    }
}

struct Download {
    content_type: Option<String>,
    body: String,
}

enum Failure {
    Status { status: u16, message: String },
    Transport(reqwest::Error),
    /// The server accepted the request but the body stream broke off.
    Body(reqwest::Error),
}

impl Failure {
    fn is_retryable(&self) -> bool {
        match self {
            Failure::Status { status, .. } => is_retryable_status(*status),
            Failure::Transport(err) => is_retryable_error(err),
            Failure::Body(_) => true,
        }
    }

    fn into_error(self, page: u32) -> RecallError {
        match self {
            Failure::Status { status, message } => RecallError::FetchStatus {
                page,
                status,
                message,
            },
            Failure::Transport(err) | Failure::Body(err) => RecallError::FetchHttp {
                page,
                message: err.to_string(),
            },
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::Status { status, .. } => write!(f, "status {status}"),
            Failure::Transport(err) => write!(f, "{err}"),
            Failure::Body(err) => write!(f, "body: {err}"),
        }
    }
}

impl RecallSource for HttpRecallSource {
    fn fetch_page(&self, page: u32) -> Result<SourcePage, RecallError> {
        let download = self.download(page)?;
        let records = decode_body(&download.body, download.content_type.as_deref())?;
        tracing::info!(page, records = records.len(), "fetched recall page");

        let has_more = match &self.pagination {
            Pagination::Single => false,
            Pagination::Paged { page_size, .. } => records.len() >= *page_size as usize,
        };
        Ok(SourcePage { records, has_more })
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

/// Decodes a page body as JSON or CSV, by content type or leading byte.
pub fn decode_body(body: &str, content_type: Option<&str>) -> Result<Vec<RawRecallRecord>, RecallError> {
    let trimmed = body.trim_start_matches('\u{feff}').trim_start();
    let looks_json = content_type.is_some_and(|value| value.contains("json"))
        || trimmed.starts_with('[')
        || trimmed.starts_with('{');
    if looks_json {
        decode_json(trimmed)
    } else {
        decode_csv(trimmed)
    }
}

pub fn decode_csv(body: &str) -> Result<Vec<RawRecallRecord>, RecallError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(body.as_bytes());
    let headers = reader
        .headers()
        .map_err(|err| RecallError::SourceDecode(format!("csv header: {err}")))?
        .clone();

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row.map_err(|err| RecallError::SourceDecode(format!("csv row: {err}")))?;
        let record = RawRecallRecord::from_pairs(
            headers
                .iter()
                .zip(row.iter())
                .map(|(column, value)| (column, value.to_string())),
        );
        if !record.is_empty() {
            records.push(record);
        }
    }
    Ok(records)
}

pub fn decode_json(body: &str) -> Result<Vec<RawRecallRecord>, RecallError> {
    let value: Value =
        serde_json::from_str(body).map_err(|err| RecallError::SourceDecode(err.to_string()))?;
    let items = match &value {
        Value::Array(items) => items,
        Value::Object(map) => ["data", "records", "items", "results"]
            .iter()
            .find_map(|key| map.get(*key).and_then(|v| v.as_array()))
            .ok_or_else(|| {
                RecallError::SourceDecode("JSON object carries no record array".to_string())
            })?,
        _ => {
            return Err(RecallError::SourceDecode(
                "expected a JSON array of records".to_string(),
            ));
        }
    };

    let mut records = Vec::with_capacity(items.len());
    for item in items {
        let Some(object) = item.as_object() else {
            return Err(RecallError::SourceDecode(
                "record is not a JSON object".to_string(),
            ));
        };
        let mut record = RawRecallRecord::new();
        for (key, value) in object {
            let text = match value {
                Value::Null => continue,
                Value::String(text) => text.clone(),
                Value::Number(number) => number.to_string(),
                Value::Bool(flag) => flag.to_string(),
                other => other.to_string(),
            };
            record.insert(key, text);
        }
        records.push(record);
    }
    Ok(records)
}

/// Lazily walks the source page by page, yielding one raw record at a time.
///
/// The next page is requested only once the current one is drained. After
/// the first error the stream is exhausted.
pub struct RecordStream<S: RecallSource> {
    source: S,
    next_page: u32,
    buffer: VecDeque<RawRecallRecord>,
    finished: bool,
}

impl<S: RecallSource> RecordStream<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            next_page: 0,
            buffer: VecDeque::new(),
            finished: false,
        }
    }

    /// Number of pages requested so far.
    pub fn pages_fetched(&self) -> u32 {
        self.next_page
    }
}

impl<S: RecallSource> Iterator for RecordStream<S> {
    type Item = Result<RawRecallRecord, RecallError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.buffer.pop_front() {
                return Some(Ok(record));
            }
            if self.finished {
                return None;
            }
            let page = self.next_page;
            self.next_page += 1;
            match self.source.fetch_page(page) {
                Ok(fetched) => {
                    self.finished = !fetched.has_more || fetched.records.is_empty();
                    self.buffer.extend(fetched.records);
                }
                Err(err) => {
                    self.finished = true;
                    return Some(Err(err));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_csv_with_quotes_and_bom() {
        let body = "\u{feff}NID,Title,Issue\n1,\"Cheese, soft\",Listeria - Food\n";
        let records = decode_body(body, Some("text/csv")).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get(&["Title"]), Some("Cheese, soft"));
        assert_eq!(records[0].get(&["NID"]), Some("1"));
    }

    #[test]
    fn decode_json_wrapped_array() {
        let body = r#"{"data":[{"NID":42,"Title":"Salami","Archived":false}]}"#;
        let records = decode_body(body, None).unwrap();
        assert_eq!(records[0].get(&["nid"]), Some("42"));
        assert_eq!(records[0].get(&["archived"]), Some("false"));
    }

    #[test]
    fn decode_json_rejects_scalars() {
        assert!(decode_json("17").is_err());
    }
}
