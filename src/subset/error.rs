use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SubsetError {
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

    #[error("Subset service returned a fault for {method}: {code}")]
    Fault { method: &'static str, code: String },

    #[error("Subset job {job_id} failed: {code}")]
    JobFailed { job_id: String, code: String },

    #[error("Malformed {method} response: missing {field}")]
    MissingField {
        method: &'static str,
        field: &'static str,
    },

    #[error(
        "Result listing for job {job_id} stalled at {retrieved} of {expected} items"
    )]
    ResultPagination {
        job_id: String,
        expected: usize,
        retrieved: usize,
    },

    #[error("I/O error writing granule file '{0}'")]
    GranuleWriteIo(PathBuf, #[source] std::io::Error),
}
