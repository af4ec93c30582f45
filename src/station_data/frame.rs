use crate::station_data::error::StationDataError;
use log::warn;
use polars::prelude::*;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::path::Path;

/// Key under which the station API returns the per-station records.
pub const STATION_ARRAY_KEY: &str = "STATION";

/// Column holding the provider's quality-control verdict for a station.
pub const QC_FLAG_COLUMN: &str = "QC_FLAGGED";

const QC_FLAGGED_TRUE: &str = "TRUE";

/// Flattened column names of the measurements the fire-risk model consumes.
///
/// Station identity and position come first, followed by the observation
/// values and their timestamps as the latest-measurements endpoint names them.
pub const DEFAULT_OBSERVATION_COLUMNS: &[&str] = &[
    "STID",
    "ELEVATION",
    "LONGITUDE",
    "QC_FLAGGED",
    "LATITUDE",
    "PERIOD_OF_RECORD.start",
    "PERIOD_OF_RECORD.end",
    "OBSERVATIONS.air_temp_value_1.date_time",
    "OBSERVATIONS.air_temp_value_1.value",
    "OBSERVATIONS.air_temp_value_2.date_time",
    "OBSERVATIONS.air_temp_value_2.value",
    "OBSERVATIONS.sea_level_pressure_value_1d.date_time",
    "OBSERVATIONS.sea_level_pressure_value_1d.value",
    "OBSERVATIONS.sea_level_pressure_value_1.date_time",
    "OBSERVATIONS.sea_level_pressure_value_1.value",
    "OBSERVATIONS.dew_point_temperature_value_1d.date_time",
    "OBSERVATIONS.dew_point_temperature_value_1d.value",
    "OBSERVATIONS.dew_point_temperature_value_1.date_time",
    "OBSERVATIONS.dew_point_temperature_value_1.value",
    "OBSERVATIONS.relative_humidity_value_1.date_time",
    "OBSERVATIONS.relative_humidity_value_1.value",
];

/// Builds a [`DataFrame`] with one row per element of the response's
/// `STATION` array.
///
/// Nested objects are flattened into dot-separated column names
/// (`PERIOD_OF_RECORD.start`), arrays become JSON-encoded text cells, and
/// stations that lack a column another station has get a null there.
///
/// # Errors
///
/// Returns [`StationDataError::MissingStationArray`] when the response has no
/// `STATION` array, which is how the API reports bad tokens and bad queries
/// inside a 200 response. The response's `SUMMARY` object, when present, is
/// logged to ease diagnosis.
pub fn normalize_stations(response: &Value) -> Result<DataFrame, StationDataError> {
    let stations = response
        .get(STATION_ARRAY_KEY)
        .and_then(Value::as_array)
        .ok_or_else(|| {
            if let Some(summary) = response.get("SUMMARY") {
                warn!("Station response summary: {summary}");
            }
            StationDataError::MissingStationArray
        })?;
    let rows: Vec<Vec<(String, Value)>> = stations.iter().map(flatten_record).collect();
    Ok(rows_to_frame(&rows)?)
}

/// Builds a single-row [`DataFrame`] from a whole API response.
///
/// Used for timeseries chunks, where every column of the envelope is kept so
/// chunks from different requests can be stacked and compared later. Arrays
/// (including the `STATION` array itself) become JSON-encoded text cells.
pub fn normalize_response(response: &Value) -> Result<DataFrame, StationDataError> {
    let row = flatten_record(response);
    Ok(rows_to_frame(&[row])?)
}

/// Flattens one JSON record into `(column name, value)` cells with
/// dot-separated paths and pandas-style deduplicated names.
fn flatten_record(value: &Value) -> Vec<(String, Value)> {
    let mut cells = Vec::new();
    flatten_value("", value, &mut cells);
    dedup_names(&mut cells);
    cells
}

fn flatten_value(prefix: &str, value: &Value, out: &mut Vec<(String, Value)>) {
    match value {
        Value::Object(fields) => {
            for (key, child) in fields {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten_value(&path, child, out);
            }
        }
        leaf => out.push((prefix.to_string(), leaf.clone())),
    }
}

/// Renames duplicate cell names in place: the first occurrence keeps its name,
/// later ones get `.1`, `.2`, ... suffixes, skipping suffixes already taken.
fn dedup_names(cells: &mut [(String, Value)]) {
    let mut seen: HashSet<String> = HashSet::with_capacity(cells.len());
    for (name, _) in cells.iter_mut() {
        if seen.contains(name) {
            let mut counter = 1usize;
            let mut candidate = format!("{name}.{counter}");
            while seen.contains(&candidate) {
                counter += 1;
                candidate = format!("{name}.{counter}");
            }
            *name = candidate;
        }
        seen.insert(name.clone());
    }
}

fn rows_to_frame(rows: &[Vec<(String, Value)>]) -> PolarsResult<DataFrame> {
    let mut order: Vec<&str> = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();
    for row in rows {
        for (name, _) in row {
            if seen.insert(name.as_str()) {
                order.push(name.as_str());
            }
        }
    }
    let lookups: Vec<HashMap<&str, &Value>> = rows
        .iter()
        .map(|row| {
            row.iter()
                .map(|(name, value)| (name.as_str(), value))
                .collect()
        })
        .collect();
    let mut columns = Vec::with_capacity(order.len());
    for name in order {
        let cells: Vec<Option<&Value>> = lookups.iter().map(|row| row.get(name).copied()).collect();
        columns.push(build_column(name, &cells));
    }
    DataFrame::new(columns)
}

/// Picks a column dtype from the cells: all-numeric becomes `Float64`,
/// all-boolean becomes `Boolean`, anything mixed falls back to text with
/// non-string leaves JSON-encoded.
fn build_column(name: &str, cells: &[Option<&Value>]) -> Column {
    let mut numeric = true;
    let mut boolean = true;
    let mut populated = false;
    for cell in cells.iter().copied().flatten() {
        match cell {
            Value::Null => {}
            Value::Number(_) => {
                boolean = false;
                populated = true;
            }
            Value::Bool(_) => {
                numeric = false;
                populated = true;
            }
            _ => {
                numeric = false;
                boolean = false;
                populated = true;
            }
        }
    }
    if populated && numeric {
        let values: Vec<Option<f64>> = cells
            .iter()
            .map(|cell| cell.and_then(Value::as_f64))
            .collect();
        Series::new(name.into(), values).into_column()
    } else if populated && boolean {
        let values: Vec<Option<bool>> = cells
            .iter()
            .map(|cell| cell.and_then(Value::as_bool))
            .collect();
        Series::new(name.into(), values).into_column()
    } else {
        let values: Vec<Option<String>> = cells
            .iter()
            .map(|cell| cell.and_then(cell_to_string))
            .collect();
        Series::new(name.into(), values).into_column()
    }
}

fn cell_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

/// A tabular view over station measurements, ready for cleaning and export.
#[derive(Debug, Clone)]
pub struct StationFrame {
    pub frame: DataFrame,
}

impl StationFrame {
    pub fn new(frame: DataFrame) -> Self {
        Self { frame }
    }

    /// Normalizes a latest-measurements response into one row per station.
    ///
    /// # Errors
    ///
    /// Returns an error when the response has no `STATION` array or the
    /// columns cannot be assembled into a frame.
    pub fn from_latest_response(response: &Value) -> Result<Self, StationDataError> {
        Ok(Self::new(normalize_stations(response)?))
    }

    /// Number of station rows in the frame.
    pub fn station_count(&self) -> usize {
        self.frame.height()
    }

    pub fn is_empty(&self) -> bool {
        self.frame.height() == 0
    }

    /// Removes stations whose quality-control flag is raised.
    ///
    /// Rows where `QC_FLAGGED` is absent or null are kept: only an explicit
    /// `TRUE` (or boolean `true`) marks a station as flagged. A frame without
    /// the flag column is returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`StationDataError::DataFrameProcessing`] when the filter
    /// cannot be evaluated.
    pub fn drop_flagged(&self) -> Result<Self, StationDataError> {
        let flag = match self.frame.column(QC_FLAG_COLUMN) {
            Ok(column) => column,
            Err(_) => return Ok(self.clone()),
        };
        let predicate = match flag.dtype() {
            DataType::Boolean => col(QC_FLAG_COLUMN)
                .eq(lit(false))
                .or(col(QC_FLAG_COLUMN).is_null()),
            _ => col(QC_FLAG_COLUMN)
                .neq(lit(QC_FLAGGED_TRUE))
                .or(col(QC_FLAG_COLUMN).is_null()),
        };
        let filtered = self.frame.clone().lazy().filter(predicate).collect()?;
        Ok(Self::new(filtered))
    }

    /// Restricts the frame to the given columns, in the given order.
    ///
    /// Columns the frame does not have are skipped rather than erroring, so a
    /// fixed wishlist like [`DEFAULT_OBSERVATION_COLUMNS`] works against
    /// responses where some sensors never reported.
    ///
    /// # Errors
    ///
    /// Returns [`StationDataError::DataFrameProcessing`] when the projection
    /// fails.
    pub fn select_columns(&self, wanted: &[&str]) -> Result<Self, StationDataError> {
        let present: Vec<&str> = wanted
            .iter()
            .copied()
            .filter(|name| self.frame.column(name).is_ok())
            .collect();
        let selected = self.frame.select(present)?;
        Ok(Self::new(selected))
    }

    /// Writes the frame to `path` as CSV with a header row.
    ///
    /// # Errors
    ///
    /// Returns [`StationDataError::CsvWriteIo`] when the file cannot be
    /// created and [`StationDataError::CsvWritePolars`] when encoding fails.
    pub fn write_csv(&self, path: &Path) -> Result<(), StationDataError> {
        let mut file = File::create(path)
            .map_err(|source| StationDataError::CsvWriteIo(path.to_path_buf(), source))?;
        let mut frame = self.frame.clone();
        CsvWriter::new(&mut file)
            .include_header(true)
            .finish(&mut frame)
            .map_err(|source| StationDataError::CsvWritePolars(path.to_path_buf(), source))?;
        Ok(())
    }
}
