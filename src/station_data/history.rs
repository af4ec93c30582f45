use crate::station_data::client::{StationQuery, SynopticClient};
use crate::station_data::error::StationDataError;
use crate::station_data::frame::normalize_response;
use chrono::{DateTime, Duration, TimeZone, Utc};
use log::{debug, info};
use polars::prelude::*;

/// Earliest instant the history walk seeks back to when the caller does not
/// give one. Little station data predates it, so walking further back mostly
/// burns API quota.
pub fn default_history_floor() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// A half-open span of time, `start` inclusive to `end` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn length(&self) -> Duration {
        self.end - self.start
    }
}

/// Walks windows of `window` length backwards from `from` until `floor`.
///
/// Windows are contiguous and newest-first: the first window ends at `from`,
/// each later window ends where the previous one started, and the final
/// window is clamped so its start lands exactly on `floor`. Together the
/// windows cover `[floor, from)` with no gaps and no overlap.
///
/// Yields nothing when `from` is not after `floor` or `window` is not
/// positive.
pub fn windows_back(from: DateTime<Utc>, floor: DateTime<Utc>, window: Duration) -> WindowsBack {
    WindowsBack {
        cursor: from,
        floor,
        window,
    }
}

#[derive(Debug, Clone)]
pub struct WindowsBack {
    cursor: DateTime<Utc>,
    floor: DateTime<Utc>,
    window: Duration,
}

impl Iterator for WindowsBack {
    type Item = TimeWindow;

    fn next(&mut self) -> Option<TimeWindow> {
        if self.window <= Duration::zero() || self.cursor <= self.floor {
            return None;
        }
        let end = self.cursor;
        let start = std::cmp::max(end - self.window, self.floor);
        self.cursor = start;
        Some(TimeWindow { start, end })
    }
}

/// Stacks single-row chunk frames into one frame, aligning columns by name.
///
/// Chunks from different windows rarely agree on columns, since stations come
/// and go and sensors fall silent. A diagonal concat fills the holes with
/// nulls and widens clashing dtypes to their supertype.
pub(crate) fn concat_history(chunks: Vec<DataFrame>) -> Result<DataFrame, StationDataError> {
    let lazy: Vec<LazyFrame> = chunks.into_iter().map(IntoLazy::lazy).collect();
    let mut args = UnionArgs::default();
    args.to_supertypes = true;
    let merged = concat_lf_diagonal(lazy, args)?.collect()?;
    Ok(merged)
}

/// Pulls the full measurement history between `floor` and `from` in
/// `window`-sized requests, newest first, and merges the chunks.
///
/// Asking the API for years of state-wide timeseries at once does not work;
/// day-sized windows do. The first request that fails aborts the walk.
///
/// # Errors
///
/// Returns [`StationDataError::EmptyHistoryRange`] when the range produces no
/// windows, and propagates request and merge failures.
pub async fn walk_history(
    client: &SynopticClient,
    query: &StationQuery,
    from: DateTime<Utc>,
    floor: DateTime<Utc>,
    window: Duration,
) -> Result<DataFrame, StationDataError> {
    let mut chunks = Vec::new();
    for span in windows_back(from, floor, window) {
        debug!("Fetching timeseries window {} .. {}", span.start, span.end);
        let response = client.timeseries(query, &span).await?;
        chunks.push(normalize_response(&response)?);
    }
    if chunks.is_empty() {
        return Err(StationDataError::EmptyHistoryRange { from, floor });
    }
    info!("Merging {} timeseries chunks", chunks.len());
    concat_history(chunks)
}
