use crate::station_data::error::StationDataError;
use crate::station_data::history::TimeWindow;
use chrono::{DateTime, Utc};
use log::debug;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Root of the Synoptic Data weather API.
pub const DEFAULT_STATION_API_ROOT: &str = "https://api.synopticdata.com/v2";

const LATEST_PATH: &str = "stations/latest";
const TIMESERIES_PATH: &str = "stations/timeseries";

/// Compact timestamp format the station API expects, e.g. `202001010000`.
pub(crate) const SYN_TIME_FORMAT: &str = "%Y%m%d%H%M";

pub(crate) fn format_api_time(instant: DateTime<Utc>) -> String {
    instant.format(SYN_TIME_FORMAT).to_string()
}

fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path)
}

/// Station selection shared by the latest and timeseries endpoints.
///
/// The default asks for every California station reporting at least one of
/// the variables the fire-risk model consumes, in metric units with wind in
/// km/h and pressure in millibar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationQuery {
    pub state: String,
    pub units: String,
    pub vars: Vec<String>,
    pub vars_operator: String,
}

impl Default for StationQuery {
    fn default() -> Self {
        Self {
            state: "CA".to_string(),
            units: "metric,speed|kph,pres|mb".to_string(),
            vars: [
                "air_temp",
                "sea_level_pressure",
                "relative_humidity",
                "dew_point_temperature",
                "soil_temp",
                "precip_accum",
            ]
            .iter()
            .map(ToString::to_string)
            .collect(),
            vars_operator: "or".to_string(),
        }
    }
}

impl StationQuery {
    fn params(&self) -> Vec<(&'static str, String)> {
        vec![
            ("state", self.state.clone()),
            ("units", self.units.clone()),
            ("varsoperator", self.vars_operator.clone()),
            ("vars", self.vars.join(",")),
        ]
    }
}

/// Thin client for the station measurement API.
///
/// Returns raw JSON responses; normalization into frames lives in
/// [`crate::station_data::frame`] so it stays testable without a network.
#[derive(Clone)]
pub struct SynopticClient {
    http: Client,
    base_url: String,
    token: String,
}

impl fmt::Debug for SynopticClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SynopticClient")
            .field("base_url", &self.base_url)
            .field("token", &"<redacted>")
            .finish()
    }
}

impl SynopticClient {
    /// Creates a client against the public API root.
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_base_url(DEFAULT_STATION_API_ROOT, token)
    }

    /// Creates a client against an alternate API root, mainly for tests and
    /// mirrors.
    pub fn with_base_url(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into(),
            token: token.into(),
        }
    }

    /// Fetches the most recent measurement set for each station matching the
    /// query.
    ///
    /// # Errors
    ///
    /// Returns a [`StationDataError`] when the request fails, the server
    /// answers with an error status, or the body is not JSON.
    pub async fn latest(&self, query: &StationQuery) -> Result<Value, StationDataError> {
        self.get_json(LATEST_PATH, query.params()).await
    }

    /// Fetches all measurements inside the window for each station matching
    /// the query.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`SynopticClient::latest`].
    pub async fn timeseries(
        &self,
        query: &StationQuery,
        window: &TimeWindow,
    ) -> Result<Value, StationDataError> {
        let mut params = query.params();
        params.push(("START", format_api_time(window.start)));
        params.push(("END", format_api_time(window.end)));
        self.get_json(TIMESERIES_PATH, params).await
    }

    async fn get_json(
        &self,
        path: &str,
        mut params: Vec<(&'static str, String)>,
    ) -> Result<Value, StationDataError> {
        params.push(("token", self.token.clone()));
        let url = join_url(&self.base_url, path);
        debug!("Requesting {url}");
        let response = self
            .http
            .get(&url)
            .query(&params)
            .send()
            .await
            .map_err(|source| StationDataError::NetworkRequest(url.clone(), source))?;
        let response = match response.error_for_status() {
            Ok(response) => response,
            Err(source) => {
                return Err(match source.status() {
                    Some(status) => StationDataError::HttpStatus {
                        url,
                        status,
                        source,
                    },
                    None => StationDataError::NetworkRequest(url, source),
                });
            }
        };
        response
            .json::<Value>()
            .await
            .map_err(|source| StationDataError::JsonDecode { url, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_default_query_covers_the_fire_model_variables() {
        let params = StationQuery::default().params();
        assert!(params.contains(&("state", "CA".to_string())));
        assert!(params.contains(&("varsoperator", "or".to_string())));
        assert!(params.contains(&(
            "vars",
            "air_temp,sea_level_pressure,relative_humidity,\
             dew_point_temperature,soil_temp,precip_accum"
                .to_string()
        )));
    }

    #[test]
    fn test_api_timestamps_use_the_compact_format() {
        let instant = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(format_api_time(instant), "202001010000");
        let later = Utc.with_ymd_and_hms(2023, 7, 4, 16, 5, 0).unwrap();
        assert_eq!(format_api_time(later), "202307041605");
    }

    #[test]
    fn test_url_join_tolerates_trailing_slash() {
        assert_eq!(
            join_url("https://api.example.com/v2/", LATEST_PATH),
            "https://api.example.com/v2/stations/latest"
        );
        assert_eq!(
            join_url("https://api.example.com/v2", TIMESERIES_PATH),
            "https://api.example.com/v2/stations/timeseries"
        );
    }

    #[test]
    fn test_debug_output_redacts_the_token() {
        let client = SynopticClient::new("super-secret");
        let rendered = format!("{client:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
