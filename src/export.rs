//! CSV downloads for admin tables and campaign proposals.

use axum::{
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// A flat record that can be written as one CSV line.
pub trait CsvRow: Serialize {
    const HEADERS: &'static [&'static str];
}

pub fn to_csv<T: CsvRow>(rows: &[T]) -> Result<Vec<u8>, csv::Error> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.write_record(T::HEADERS)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer
        .into_inner()
        .map_err(|err| csv::Error::from(err.into_error()))
}

pub struct CsvDownload {
    filename: String,
    body: Vec<u8>,
}

impl CsvDownload {
    pub fn new<T: CsvRow>(filename: impl Into<String>, rows: &[T]) -> Result<Self, csv::Error> {
        Ok(Self {
            filename: filename.into(),
            body: to_csv(rows)?,
        })
    }
}

impl IntoResponse for CsvDownload {
    fn into_response(self) -> Response {
        let disposition = attachment_disposition(&self.filename);
        let mut response = self.body.into_response();
        let headers = response.headers_mut();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/csv; charset=utf-8"),
        );
        if let Ok(value) = HeaderValue::from_str(&disposition) {
            headers.insert(header::CONTENT_DISPOSITION, value);
        }
        response
    }
}

pub(crate) fn attachment_disposition(filename: &str) -> String {
    let sanitized: String = filename
        .chars()
        .map(|ch| match ch {
            '"' | '\\' | '\r' | '\n' => '_',
            _ => ch,
        })
        .collect();
    let ascii: String = sanitized
        .chars()
        .map(|ch| if ch.is_ascii() { ch } else { '_' })
        .collect();
    let encoded =
        percent_encoding::utf8_percent_encode(&sanitized, percent_encoding::NON_ALPHANUMERIC);
    format!("attachment; filename=\"{ascii}\"; filename*=UTF-8''{encoded}")
}
