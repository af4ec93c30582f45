//! Types and envelope builders for the JSON WSP dialect the GES DISC subset
//! service speaks. The protocol messages are fixed shapes, so they are built
//! with [`json!`] rather than a general WSP client layer.

use bon::Builder;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

/// Endpoint of the GES DISC subset service.
pub const DEFAULT_SUBSET_ENDPOINT: &str = "https://disc.gsfc.nasa.gov/service/subset/jsonwsp";

const WSP_VERSION: &str = "1.0";
const WSP_REQUEST: &str = "jsonwsp/request";
const WSP_FAULT: &str = "jsonwsp/fault";

fn format_wsp_time(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Geographic selection for a subset, in degrees east and north.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        Self {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        }
    }

    pub fn global() -> Self {
        Self::new(-180.0, -90.0, 180.0, 90.0)
    }

    // The service wants corners as [minlon, minlat, maxlon, maxlat].
    fn to_corners(self) -> [f64; 4] {
        [self.min_lon, self.min_lat, self.max_lon, self.max_lat]
    }
}

/// Restriction of one dataset dimension to an explicit set of index values,
/// e.g. a band of pressure levels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionSlice {
    pub dimension: String,
    pub values: Vec<i64>,
}

impl DimensionSlice {
    pub fn new(dimension: impl Into<String>, values: Vec<i64>) -> Self {
        Self {
            dimension: dimension.into(),
            values,
        }
    }

    fn to_entries(&self) -> Vec<Value> {
        self.values
            .iter()
            .map(|value| {
                json!({
                    "dimensionId": self.dimension,
                    "dimensionValue": value,
                })
            })
            .collect()
    }
}

/// Everything needed to ask the service for a spatially and temporally
/// cropped cut of a dataset.
///
/// When `variables` is empty the whole dataset is subset; otherwise one data
/// entry per variable is submitted. Dimension slices, when given, apply to
/// every variable entry.
#[derive(Debug, Clone, Builder)]
pub struct SubsetRequest {
    #[builder(into)]
    pub dataset: String,
    #[builder(default)]
    pub variables: Vec<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub bounding_box: BoundingBox,
    #[builder(default = true)]
    pub crop: bool,
    #[builder(default)]
    pub dimension_slices: Vec<DimensionSlice>,
}

impl SubsetRequest {
    fn to_args(&self) -> Value {
        let slices: Vec<Value> = self
            .dimension_slices
            .iter()
            .flat_map(DimensionSlice::to_entries)
            .collect();
        let entry = |variable: Option<&String>| {
            let mut data = json!({ "datasetId": self.dataset });
            if let Some(variable) = variable {
                data["variable"] = json!(variable);
            }
            if !slices.is_empty() {
                data["slice"] = Value::Array(slices.clone());
            }
            data
        };
        let data: Vec<Value> = if self.variables.is_empty() {
            vec![entry(None)]
        } else {
            self.variables.iter().map(|v| entry(Some(v))).collect()
        };
        json!({
            "role": "subset",
            "start": format_wsp_time(self.start),
            "end": format_wsp_time(self.end),
            "box": self.bounding_box.to_corners(),
            "crop": self.crop,
            "data": data,
        })
    }
}

pub(crate) fn subset_envelope(request: &SubsetRequest) -> Value {
    json!({
        "methodname": "subset",
        "type": WSP_REQUEST,
        "version": WSP_VERSION,
        "args": request.to_args(),
    })
}

pub(crate) fn status_envelope(job_id: &str) -> Value {
    json!({
        "methodname": "GetStatus",
        "type": WSP_REQUEST,
        "version": WSP_VERSION,
        "args": { "jobId": job_id },
    })
}

pub(crate) fn result_envelope(job_id: &str, count: usize, start_index: usize) -> Value {
    json!({
        "methodname": "GetResult",
        "type": WSP_REQUEST,
        "version": WSP_VERSION,
        "args": {
            "jobId": job_id,
            "count": count,
            "startIndex": start_index,
        },
    })
}

/// Lifecycle state the service reports for a subset job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Accepted,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_pending(self) -> bool {
        matches!(self, Self::Accepted | Self::Running)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Accepted => "Accepted",
            Self::Running => "Running",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
        };
        f.write_str(name)
    }
}

/// One entry of a job's result listing.
///
/// Granules carry the covered time span; documentation links carry none.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultItem {
    pub label: String,
    pub link: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<Value>,
}

impl ResultItem {
    /// An item is a downloadable granule when both timestamps are present and
    /// non-null.
    pub fn is_granule(&self) -> bool {
        matches!(&self.start, Some(value) if !value.is_null())
            && matches!(&self.end, Some(value) if !value.is_null())
    }
}

/// Splits a result listing into `(granules, documentation)`.
pub fn classify_results(items: Vec<ResultItem>) -> (Vec<ResultItem>, Vec<ResultItem>) {
    items.into_iter().partition(ResultItem::is_granule)
}

#[derive(Debug, Deserialize)]
pub(crate) struct WspEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub result: Option<WspResult>,
    pub fault: Option<WspFault>,
}

impl WspEnvelope {
    pub fn is_fault(&self) -> bool {
        self.kind == WSP_FAULT
    }

    pub fn fault_code(&self) -> Option<String> {
        self.fault.as_ref().and_then(|fault| fault.code.clone())
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct WspResult {
    #[serde(rename = "jobId")]
    pub job_id: Option<String>,
    #[serde(rename = "Status")]
    pub status: Option<JobStatus>,
    #[serde(rename = "PercentCompleted")]
    pub percent_completed: Option<f64>,
    pub message: Option<String>,
    #[serde(rename = "itemsPerPage")]
    pub items_per_page: Option<usize>,
    #[serde(rename = "totalResults")]
    pub total_results: Option<usize>,
    pub items: Option<Vec<ResultItem>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WspFault {
    pub code: Option<String>,
    #[serde(rename = "string")]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_request() -> SubsetRequest {
        SubsetRequest::builder()
            .dataset("NLDAS_FORA0125_H_2.0")
            .variables(vec!["SoilM_0_100cm".to_string(), "Tair".to_string()])
            .start(Utc.with_ymd_and_hms(2020, 8, 1, 0, 0, 0).unwrap())
            .end(Utc.with_ymd_and_hms(2020, 8, 3, 23, 59, 59).unwrap())
            .bounding_box(BoundingBox::new(-125.0, 32.0, -113.0, 42.5))
            .dimension_slices(vec![DimensionSlice::new("depth", vec![1, 2])])
            .build()
    }

    #[test]
    fn test_subset_envelope_matches_the_service_wire_format() {
        let envelope = subset_envelope(&sample_request());

        assert_eq!(envelope["methodname"], "subset");
        assert_eq!(envelope["type"], "jsonwsp/request");
        assert_eq!(envelope["version"], "1.0");

        let args = &envelope["args"];
        assert_eq!(args["role"], "subset");
        assert_eq!(args["start"], "2020-08-01T00:00:00.000Z");
        assert_eq!(args["end"], "2020-08-03T23:59:59.000Z");
        assert_eq!(args["box"], json!([-125.0, 32.0, -113.0, 42.5]));
        assert_eq!(args["crop"], true);

        let data = args["data"].as_array().unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(data[0]["datasetId"], "NLDAS_FORA0125_H_2.0");
        assert_eq!(data[0]["variable"], "SoilM_0_100cm");
        assert_eq!(
            data[0]["slice"],
            json!([
                {"dimensionId": "depth", "dimensionValue": 1},
                {"dimensionId": "depth", "dimensionValue": 2},
            ])
        );
        assert_eq!(data[1]["variable"], "Tair");
    }

    #[test]
    fn test_empty_variable_list_subsets_the_whole_dataset() {
        let request = SubsetRequest::builder()
            .dataset("NLDAS_FORA0125_H_2.0")
            .start(Utc.with_ymd_and_hms(2020, 8, 1, 0, 0, 0).unwrap())
            .end(Utc.with_ymd_and_hms(2020, 8, 2, 0, 0, 0).unwrap())
            .bounding_box(BoundingBox::global())
            .build();
        let envelope = subset_envelope(&request);

        let data = envelope["args"]["data"].as_array().unwrap();
        assert_eq!(data.len(), 1);
        assert_eq!(data[0]["datasetId"], "NLDAS_FORA0125_H_2.0");
        assert!(data[0].get("variable").is_none());
        assert!(data[0].get("slice").is_none());
    }

    #[test]
    fn test_status_and_result_envelopes_carry_job_arguments() {
        let status = status_envelope("5000000001");
        assert_eq!(status["methodname"], "GetStatus");
        assert_eq!(status["args"]["jobId"], "5000000001");

        let result = result_envelope("5000000001", 20, 40);
        assert_eq!(result["methodname"], "GetResult");
        assert_eq!(result["args"]["count"], 20);
        assert_eq!(result["args"]["startIndex"], 40);
    }

    #[test]
    fn test_granules_need_both_timestamps() {
        let granule = ResultItem {
            label: "a.nc4".to_string(),
            link: "https://example.com/a.nc4".to_string(),
            start: Some(json!("2020-08-01T00:00:00.000Z")),
            end: Some(json!("2020-08-01T01:00:00.000Z")),
        };
        let untimed = ResultItem {
            start: None,
            ..granule.clone()
        };
        let null_start = ResultItem {
            start: Some(Value::Null),
            ..granule.clone()
        };
        assert!(granule.is_granule());
        assert!(!untimed.is_granule());
        assert!(!null_start.is_granule());

        let (granules, docs) = classify_results(vec![granule, untimed, null_start]);
        assert_eq!(granules.len(), 1);
        assert_eq!(docs.len(), 2);
    }

    #[test]
    fn test_status_envelope_decodes_with_service_field_names() {
        let envelope: WspEnvelope = serde_json::from_value(json!({
            "type": "jsonwsp/response",
            "version": "1.0",
            "methodname": "GetStatus",
            "result": {
                "Status": "Running",
                "PercentCompleted": 42.0,
                "message": "job is running",
            },
        }))
        .unwrap();

        assert!(!envelope.is_fault());
        let result = envelope.result.unwrap();
        assert_eq!(result.status, Some(JobStatus::Running));
        assert_eq!(result.percent_completed, Some(42.0));
        assert!(result.status.unwrap().is_pending());
    }

    #[test]
    fn test_fault_envelope_exposes_its_code() {
        let envelope: WspEnvelope = serde_json::from_value(json!({
            "type": "jsonwsp/fault",
            "version": "1.0",
            "fault": {"code": "Client.BadRequest", "string": "bad args"},
        }))
        .unwrap();

        assert!(envelope.is_fault());
        assert_eq!(envelope.fault_code().as_deref(), Some("Client.BadRequest"));
    }
}
