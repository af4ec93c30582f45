//! This module provides the main entry point for pulling weather and climate
//! data into a workspace. It bundles the station measurement client and the
//! satellite subset client behind one façade, so a fire-risk pipeline can ask
//! for "the latest CSV" or "everything back to the floor" without touching
//! either API directly.

use crate::credentials::{CredentialError, Credentials, STATION_TOKEN_VAR};
use crate::error::WileError;
use crate::station_data::client::{StationQuery, SynopticClient, DEFAULT_STATION_API_ROOT};
use crate::station_data::error::StationDataError;
use crate::station_data::frame::StationFrame;
use crate::station_data::history::{default_history_floor, walk_history};
use crate::subset::client::{
    GesDiscClient, SubsetOutcome, DEFAULT_POLL_INTERVAL, DEFAULT_RESULT_PAGE_SIZE,
};
use crate::subset::wsp::{subset_envelope, SubsetRequest, DEFAULT_SUBSET_ENDPOINT};
use crate::workspace::Workspace;
use bon::bon;
use chrono::{DateTime, Duration, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::task;

/// Environment variable naming a `key,value` credential file to load the
/// Earthdata login from.
pub const CREDENTIAL_FILE_VAR: &str = "WILE_CREDENTIAL_FILE";

/// File the latest station measurements are written to, under `data/rt`.
pub const REALTIME_CSV_FILE: &str = "synoptic_latest.csv";

const HISTORY_FILE_PREFIX: &str = "synoptic_history_";
const HISTORY_FILE_TIME_FORMAT: &str = "%Y%m%d_%H%M%S";

fn history_file_name(instant: DateTime<Utc>) -> String {
    format!(
        "{HISTORY_FILE_PREFIX}{}.csv",
        instant.format(HISTORY_FILE_TIME_FORMAT)
    )
}

/// Settings for a [`Wile`] instance.
///
/// Every field has a sensible default; a minimal setup only needs a token via
/// [`STATION_TOKEN_VAR`] and, for subsets, an Earthdata login. Secrets never
/// live in this struct's `Debug` output.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WileConfig {
    /// Directory the `data/`, `outputs/` and `debug/` tree is rooted at.
    pub workspace_root: PathBuf,
    /// Station API root, [`DEFAULT_STATION_API_ROOT`] unless overridden.
    pub station_api_root: String,
    /// Station API token; falls back to the [`STATION_TOKEN_VAR`] variable.
    pub station_token: Option<String>,
    /// Subset service endpoint, [`DEFAULT_SUBSET_ENDPOINT`] unless overridden.
    pub subset_endpoint: String,
    /// `key,value` file holding the Earthdata login; falls back to
    /// [`CREDENTIAL_FILE_VAR`], then to the login/password variables.
    pub credential_file: Option<PathBuf>,
    /// Pause between subset job status polls.
    pub poll_interval: std::time::Duration,
    /// Batch size for subset result listings.
    pub result_page_size: usize,
    /// When set, raw API payloads are also written under `debug/`.
    pub debug_dumps: bool,
}

impl Default for WileConfig {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from("."),
            station_api_root: DEFAULT_STATION_API_ROOT.to_string(),
            station_token: None,
            subset_endpoint: DEFAULT_SUBSET_ENDPOINT.to_string(),
            credential_file: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            result_page_size: DEFAULT_RESULT_PAGE_SIZE,
            debug_dumps: false,
        }
    }
}

impl fmt::Debug for WileConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WileConfig")
            .field("workspace_root", &self.workspace_root)
            .field("station_api_root", &self.station_api_root)
            .field(
                "station_token",
                &self.station_token.as_ref().map(|_| "<redacted>"),
            )
            .field("subset_endpoint", &self.subset_endpoint)
            .field("credential_file", &self.credential_file)
            .field("poll_interval", &self.poll_interval)
            .field("result_page_size", &self.result_page_size)
            .field("debug_dumps", &self.debug_dumps)
            .finish()
    }
}

/// The main client for pulling fire-weather inputs into a workspace.
///
/// Owns the workspace directory tree and one client per upstream service.
/// Either client may be absent when its credentials are not configured; the
/// corresponding operations then fail with a [`CredentialError`] instead of
/// reaching the network.
///
/// # Examples
///
/// ```rust
/// # use wile::{Wile, WileError};
/// # async fn run() -> Result<(), WileError> {
/// let wile = Wile::new("./fire-data").await?;
/// let csv = wile.pull_latest().auto_clean(true).call().await?;
/// println!("wrote {}", csv.display());
/// # Ok(())
/// # }
/// ```
pub struct Wile {
    workspace: Workspace,
    stations: Option<SynopticClient>,
    subsets: Option<GesDiscClient>,
    debug_dumps: bool,
}

#[bon]
impl Wile {
    /// Creates a client rooted at `workspace_root` with default settings.
    ///
    /// The directory tree is created if missing. Credentials are taken from
    /// the environment: the station token from [`STATION_TOKEN_VAR`] and the
    /// Earthdata login from [`CREDENTIAL_FILE_VAR`] or the login/password
    /// variables.
    ///
    /// # Errors
    ///
    /// Returns [`WileError::Workspace`] when the tree cannot be created and
    /// [`WileError::Credential`] when a configured credential file is
    /// unreadable.
    pub async fn new(workspace_root: impl Into<PathBuf>) -> Result<Self, WileError> {
        Self::with_config(WileConfig {
            workspace_root: workspace_root.into(),
            ..WileConfig::default()
        })
        .await
    }

    /// Creates a client from an explicit [`WileConfig`].
    ///
    /// # Errors
    ///
    /// Same failure modes as [`Wile::new`].
    pub async fn with_config(config: WileConfig) -> Result<Self, WileError> {
        let workspace = Workspace::new(&config.workspace_root);
        workspace.ensure_tree().await?;

        let token = config
            .station_token
            .clone()
            .or_else(|| env::var(STATION_TOKEN_VAR).ok());
        let stations =
            token.map(|token| SynopticClient::with_base_url(config.station_api_root.clone(), token));
        if stations.is_none() {
            info!("No station API token configured; station operations are disabled");
        }

        let credentials = match &config.credential_file {
            Some(path) => Some(Credentials::from_file(path).await?),
            None => match env::var(CREDENTIAL_FILE_VAR) {
                Ok(path) => Some(Credentials::from_file(Path::new(&path)).await?),
                Err(_) => Credentials::from_env(),
            },
        };
        let subsets = credentials.map(|credentials| {
            GesDiscClient::builder()
                .credentials(credentials)
                .endpoint(config.subset_endpoint.clone())
                .poll_interval(config.poll_interval)
                .page_size(config.result_page_size)
                .build()
        });
        if subsets.is_none() {
            info!("No Earthdata credentials configured; subset operations are disabled");
        }

        Ok(Self {
            workspace,
            stations,
            subsets,
            debug_dumps: config.debug_dumps,
        })
    }

    /// The workspace this client writes into.
    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Fetches the latest station measurements as a [`StationFrame`].
    ///
    /// This method uses a builder pattern.
    ///
    /// # Arguments
    ///
    /// * `.query(StationQuery)`: Optional. Station selection; defaults to
    ///   the California fire-weather query.
    /// * `.auto_clean(bool)`: Optional. Drop quality-flagged stations.
    ///   Defaults to `false`.
    /// * `.columns(Vec<String>)`: Optional. Restrict the frame to these
    ///   columns, e.g. [`DEFAULT_OBSERVATION_COLUMNS`]. Missing columns are
    ///   skipped.
    ///
    /// # Errors
    ///
    /// Returns [`WileError::Credential`] when no station token is configured
    /// and [`WileError::StationData`] for request and normalization
    /// failures.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use wile::{Wile, WileError, DEFAULT_OBSERVATION_COLUMNS};
    /// # async fn run() -> Result<(), WileError> {
    /// let wile = Wile::new(".").await?;
    /// let frame = wile
    ///     .latest()
    ///     .auto_clean(true)
    ///     .columns(DEFAULT_OBSERVATION_COLUMNS.iter().map(|c| c.to_string()).collect())
    ///     .call()
    ///     .await?;
    /// println!("{} stations reporting", frame.station_count());
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// [`DEFAULT_OBSERVATION_COLUMNS`]: crate::DEFAULT_OBSERVATION_COLUMNS
    #[builder]
    pub async fn latest(
        &self,
        query: Option<StationQuery>,
        auto_clean: Option<bool>,
        columns: Option<Vec<String>>,
    ) -> Result<StationFrame, WileError> {
        let client = self.station_client()?;
        let query = query.unwrap_or_default();
        let response = client.latest(&query).await?;
        self.dump_debug("synoptic_latest.json", &response).await;

        let mut frame = StationFrame::from_latest_response(&response)?;
        info!(
            "Fetched latest measurements for {} stations",
            frame.station_count()
        );
        if auto_clean.unwrap_or(false) {
            let before = frame.station_count();
            frame = frame.drop_flagged()?;
            info!(
                "Dropped {} quality-flagged stations",
                before - frame.station_count()
            );
        }
        if let Some(columns) = columns {
            let wanted: Vec<&str> = columns.iter().map(String::as_str).collect();
            frame = frame.select_columns(&wanted)?;
        }
        Ok(frame)
    }

    /// Fetches the latest station measurements and writes them to
    /// `data/rt/synoptic_latest.csv`.
    ///
    /// Accepts the same builder arguments as [`Wile::latest`] and returns
    /// the path written.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`Wile::latest`], plus CSV write failures.
    #[builder]
    pub async fn pull_latest(
        &self,
        query: Option<StationQuery>,
        auto_clean: Option<bool>,
        columns: Option<Vec<String>>,
    ) -> Result<PathBuf, WileError> {
        let frame = self
            .latest()
            .maybe_query(query)
            .maybe_auto_clean(auto_clean)
            .maybe_columns(columns)
            .call()
            .await?;
        let path = self.workspace.data_rt().join(REALTIME_CSV_FILE);
        write_csv_file(frame, path.clone()).await?;
        info!("Saved realtime measurements to {}", path.display());
        Ok(path)
    }

    /// Fetches the full measurement history, walking backwards from now in
    /// fixed windows, and returns the merged [`StationFrame`].
    ///
    /// This method uses a builder pattern.
    ///
    /// # Arguments
    ///
    /// * `.floor(DateTime<Utc>)`: Optional. Earliest instant to seek to.
    ///   Defaults to 2020-01-01 00:00 UTC.
    /// * `.window(Duration)`: Optional. Length of each request window.
    ///   Defaults to one day.
    /// * `.query(StationQuery)`: Optional. Station selection, as in
    ///   [`Wile::latest`].
    /// * `.from(DateTime<Utc>)`: Optional. Instant to walk back from.
    ///   Defaults to now.
    ///
    /// # Errors
    ///
    /// Returns [`WileError::StationData`] when a window request fails (the
    /// walk stops at the first failure) or when the range is empty.
    #[builder]
    pub async fn history(
        &self,
        floor: Option<DateTime<Utc>>,
        window: Option<Duration>,
        query: Option<StationQuery>,
        from: Option<DateTime<Utc>>,
    ) -> Result<StationFrame, WileError> {
        let client = self.station_client()?;
        let query = query.unwrap_or_default();
        let from = from.unwrap_or_else(Utc::now);
        let floor = floor.unwrap_or_else(default_history_floor);
        let window = window.unwrap_or_else(|| Duration::days(1));
        let merged = walk_history(client, &query, from, floor, window).await?;
        Ok(StationFrame::new(merged))
    }

    /// Fetches the full measurement history and writes it to a timestamped
    /// CSV under `data/hist`.
    ///
    /// Accepts the same builder arguments as [`Wile::history`] and returns
    /// the path written.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`Wile::history`], plus CSV write failures.
    #[builder]
    pub async fn pull_history(
        &self,
        floor: Option<DateTime<Utc>>,
        window: Option<Duration>,
        query: Option<StationQuery>,
    ) -> Result<PathBuf, WileError> {
        let frame = self
            .history()
            .maybe_floor(floor)
            .maybe_window(window)
            .maybe_query(query)
            .call()
            .await?;
        let path = self
            .workspace
            .data_hist()
            .join(history_file_name(Utc::now()));
        write_csv_file(frame, path.clone()).await?;
        info!("Saved historical measurements to {}", path.display());
        Ok(path)
    }

    /// Runs a subset job end to end: submit, poll until done, list results,
    /// download granules into `outputs/`.
    ///
    /// Partial downloads are staged under `data/tmp` and moved into place
    /// once complete. Documentation links are reported, never downloaded.
    ///
    /// # Arguments
    ///
    /// * `.request(SubsetRequest)`: **Required.** What to subset.
    ///
    /// # Errors
    ///
    /// Returns [`WileError::Credential`] when no Earthdata login is
    /// configured and [`WileError::Subset`] when the job fails or its result
    /// listing cannot be retrieved. Individual download failures are
    /// reported in the returned [`SubsetOutcome`] instead.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use wile::{BoundingBox, SubsetRequest, Wile, WileError};
    /// # use chrono::{TimeZone, Utc};
    /// # async fn run() -> Result<(), WileError> {
    /// let wile = Wile::new(".").await?;
    /// let request = SubsetRequest::builder()
    ///     .dataset("NLDAS_FORA0125_H_2.0")
    ///     .variables(vec!["SoilM_0_100cm".to_string()])
    ///     .start(Utc.with_ymd_and_hms(2020, 8, 1, 0, 0, 0).unwrap())
    ///     .end(Utc.with_ymd_and_hms(2020, 8, 3, 0, 0, 0).unwrap())
    ///     .bounding_box(BoundingBox::new(-125.0, 32.0, -113.0, 42.5))
    ///     .build();
    /// let outcome = wile.run_subset().request(request).call().await?;
    /// println!("downloaded {} granules", outcome.downloaded.len());
    /// # Ok(())
    /// # }
    /// ```
    #[builder]
    pub async fn run_subset(&self, request: SubsetRequest) -> Result<SubsetOutcome, WileError> {
        let client = self.subset_client()?;
        self.dump_debug("subset_request.json", &subset_envelope(&request))
            .await;
        let outcome = client
            .run(
                &request,
                &self.workspace.data_tmp(),
                &self.workspace.outputs(),
            )
            .await?;
        info!(
            "Subset job {} produced {} granules ({} failures, {} documentation links)",
            outcome.job_id,
            outcome.downloaded.len(),
            outcome.failures.len(),
            outcome.documentation.len()
        );
        Ok(outcome)
    }

    fn station_client(&self) -> Result<&SynopticClient, WileError> {
        self.stations
            .as_ref()
            .ok_or(WileError::Credential(CredentialError::MissingToken))
    }

    fn subset_client(&self) -> Result<&GesDiscClient, WileError> {
        self.subsets
            .as_ref()
            .ok_or(WileError::Credential(CredentialError::MissingCredentials))
    }

    // Raw payloads occasionally matter more than the frames built from
    // them; dump failures must never sink a pull.
    async fn dump_debug(&self, file_name: &str, payload: &serde_json::Value) {
        if !self.debug_dumps {
            return;
        }
        let path = self.workspace.debug().join(file_name);
        let rendered = match serde_json::to_vec_pretty(payload) {
            Ok(rendered) => rendered,
            Err(error) => {
                warn!("Could not render debug dump {}: {error}", path.display());
                return;
            }
        };
        if let Err(error) = tokio::fs::write(&path, rendered).await {
            warn!("Could not write debug dump {}: {error}", path.display());
        }
    }
}

async fn write_csv_file(frame: StationFrame, path: PathBuf) -> Result<(), WileError> {
    task::spawn_blocking(move || frame.write_csv(&path))
        .await
        .map_err(StationDataError::TaskJoin)??;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn test_with_config_bootstraps_the_workspace_tree() -> Result<(), WileError> {
        let dir = tempfile::tempdir().unwrap();
        let wile = Wile::with_config(WileConfig {
            workspace_root: dir.path().to_path_buf(),
            station_token: Some("test-token".to_string()),
            ..WileConfig::default()
        })
        .await?;

        assert!(wile.workspace().data_rt().is_dir());
        assert!(wile.workspace().data_hist().is_dir());
        assert!(wile.workspace().outputs().is_dir());
        assert!(wile.workspace().debug().is_dir());
        Ok(())
    }

    #[test]
    fn test_config_defaults_point_at_the_public_services() {
        let config = WileConfig::default();
        assert_eq!(config.workspace_root, PathBuf::from("."));
        assert_eq!(config.station_api_root, DEFAULT_STATION_API_ROOT);
        assert_eq!(config.subset_endpoint, DEFAULT_SUBSET_ENDPOINT);
        assert_eq!(config.poll_interval, std::time::Duration::from_secs(5));
        assert_eq!(config.result_page_size, 20);
        assert!(!config.debug_dumps);
    }

    #[test]
    fn test_config_debug_output_redacts_the_token() {
        let config = WileConfig {
            station_token: Some("super-secret".to_string()),
            ..WileConfig::default()
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_history_files_carry_their_pull_timestamp() {
        let instant = Utc.with_ymd_and_hms(2020, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(
            history_file_name(instant),
            "synoptic_history_20200102_030405.csv"
        );
    }
}
