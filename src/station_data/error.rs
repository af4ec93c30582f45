use chrono::{DateTime, Utc};
use polars::error::PolarsError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StationDataError {
    #[error("Network request failed for {0}")]
    NetworkRequest(String, #[source] reqwest::Error),

    #[error("HTTP request failed for {url} with status {status}")]
    HttpStatus {
        url: String,
        status: reqwest::StatusCode,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to decode JSON response from {url}")]
    JsonDecode {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    // The station API signals most problems inside a 200 response; a missing
    // STATION array is how an auth or query error usually shows up.
    #[error("Response carries no STATION array")]
    MissingStationArray,

    #[error("Failed processing station frame: {0}")]
    DataFrameProcessing(#[from] PolarsError),

    #[error("I/O error writing CSV file '{0}'")]
    CsvWriteIo(PathBuf, #[source] std::io::Error),

    #[error("Encoding error writing CSV file '{0}'")]
    CsvWritePolars(PathBuf, #[source] PolarsError),

    #[error("History range is empty: floor {floor} is not before {from}")]
    EmptyHistoryRange {
        from: DateTime<Utc>,
        floor: DateTime<Utc>,
    },

    #[error("Background task failed to complete")]
    TaskJoin(#[from] tokio::task::JoinError),
}
