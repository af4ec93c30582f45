use crate::credentials::Credentials;
use crate::subset::error::SubsetError;
use crate::subset::wsp::{
    classify_results, result_envelope, status_envelope, subset_envelope, JobStatus, ResultItem,
    SubsetRequest, WspEnvelope, WspResult, DEFAULT_SUBSET_ENDPOINT,
};
use bon::bon;
use futures_util::TryStreamExt;
use log::{debug, info, warn};
use reqwest::header::ACCEPT;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio_util::io::StreamReader;

/// Seconds between job status polls, per the service's usage guidance.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Result listing batch size.
pub const DEFAULT_RESULT_PAGE_SIZE: usize = 20;

/// A submitted subset job.
#[derive(Debug, Clone)]
pub struct SubsetJob {
    pub id: String,
    pub status: JobStatus,
}

/// One poll of a job's progress.
#[derive(Debug, Clone)]
pub struct JobUpdate {
    pub status: JobStatus,
    pub percent_completed: Option<f64>,
    pub message: Option<String>,
    pub fault_code: Option<String>,
}

/// What a completed subset run produced.
#[derive(Debug)]
pub struct SubsetOutcome {
    pub job_id: String,
    pub downloaded: Vec<PathBuf>,
    pub documentation: Vec<ResultItem>,
    pub failures: Vec<DownloadFailure>,
}

/// Granule downloads that go wrong are reported, not fatal.
#[derive(Debug, Default)]
pub struct DownloadReport {
    pub downloaded: Vec<PathBuf>,
    pub failures: Vec<DownloadFailure>,
}

#[derive(Debug, Clone)]
pub struct DownloadFailure {
    pub label: String,
    pub link: String,
    pub reason: String,
}

/// Client for the GES DISC subsetting service.
///
/// Drives the whole job lifecycle: submission, status polling, paging
/// through the result listing, and downloading the produced granules with
/// Earthdata credentials.
#[derive(Debug, Clone)]
pub struct GesDiscClient {
    http: Client,
    endpoint: String,
    credentials: Credentials,
    poll_interval: Duration,
    page_size: usize,
}

#[bon]
impl GesDiscClient {
    /// Creates a client.
    ///
    /// # Arguments
    ///
    /// * `credentials` - Earthdata login used for the service and for
    ///   granule downloads.
    /// * `endpoint` - Subset service URL, [`DEFAULT_SUBSET_ENDPOINT`] when
    ///   omitted.
    /// * `poll_interval` - Pause between status polls, 5 s when omitted.
    /// * `page_size` - Result listing batch size, 20 when omitted.
    #[builder]
    pub fn new(
        credentials: Credentials,
        endpoint: Option<String>,
        poll_interval: Option<Duration>,
        page_size: Option<usize>,
    ) -> Self {
        Self {
            http: Client::new(),
            endpoint: endpoint.unwrap_or_else(|| DEFAULT_SUBSET_ENDPOINT.to_string()),
            credentials,
            poll_interval: poll_interval.unwrap_or(DEFAULT_POLL_INTERVAL),
            page_size: page_size.unwrap_or(DEFAULT_RESULT_PAGE_SIZE),
        }
    }

    /// Submits a subset request and returns the job handle.
    ///
    /// # Errors
    ///
    /// Returns [`SubsetError::Fault`] when the service rejects the request
    /// and [`SubsetError::MissingField`] when the acceptance carries no job
    /// id.
    pub async fn submit(&self, request: &SubsetRequest) -> Result<SubsetJob, SubsetError> {
        let envelope = self.call("subset", &subset_envelope(request)).await?;
        if envelope.is_fault() {
            return Err(SubsetError::Fault {
                method: "subset",
                code: fault_code_or_unknown(&envelope),
            });
        }
        let result = envelope.result.ok_or(SubsetError::MissingField {
            method: "subset",
            field: "result",
        })?;
        let id = result.job_id.ok_or(SubsetError::MissingField {
            method: "subset",
            field: "jobId",
        })?;
        let status = result.status.unwrap_or(JobStatus::Accepted);
        info!("Job ID: {id}");
        info!("Job status: {status}");
        Ok(SubsetJob { id, status })
    }

    /// Asks the service how a job is doing.
    ///
    /// A failed job sometimes answers with a bare fault envelope instead of
    /// a result carrying `Status: Failed`; both shapes come back as a
    /// [`JobUpdate`].
    pub async fn status(&self, job_id: &str) -> Result<JobUpdate, SubsetError> {
        let envelope = self.call("GetStatus", &status_envelope(job_id)).await?;
        let is_fault = envelope.is_fault();
        let fault_code = envelope.fault_code();
        let fault_message = envelope
            .fault
            .as_ref()
            .and_then(|fault| fault.message.clone());
        match envelope.result {
            Some(result) => {
                let status = result.status.ok_or(SubsetError::MissingField {
                    method: "GetStatus",
                    field: "Status",
                })?;
                Ok(JobUpdate {
                    status,
                    percent_completed: result.percent_completed,
                    message: result.message,
                    fault_code,
                })
            }
            None if is_fault => Ok(JobUpdate {
                status: JobStatus::Failed,
                percent_completed: None,
                message: fault_message,
                fault_code,
            }),
            None => Err(SubsetError::MissingField {
                method: "GetStatus",
                field: "result",
            }),
        }
    }

    /// Polls the job until it leaves `Accepted`/`Running`.
    ///
    /// # Errors
    ///
    /// Returns [`SubsetError::JobFailed`] with the service's fault code when
    /// the job ends in `Failed`, and propagates polling failures.
    pub async fn wait_until_done(&self, job: &SubsetJob) -> Result<(), SubsetError> {
        let mut current = JobUpdate {
            status: job.status,
            percent_completed: None,
            message: None,
            fault_code: None,
        };
        while current.status.is_pending() {
            tokio::time::sleep(self.poll_interval).await;
            current = self.status(&job.id).await?;
            match current.percent_completed {
                Some(percent) => {
                    info!("Job status: {} ({percent:.0}% complete)", current.status);
                }
                None => info!("Job status: {}", current.status),
            }
        }
        if current.status == JobStatus::Succeeded {
            info!(
                "Job finished: {}",
                current.message.as_deref().unwrap_or("no message")
            );
            Ok(())
        } else {
            Err(SubsetError::JobFailed {
                job_id: job.id.clone(),
                code: current
                    .fault_code
                    .unwrap_or_else(|| "unknown".to_string()),
            })
        }
    }

    /// Pages through the job's result listing until every reported item is
    /// in hand.
    ///
    /// # Errors
    ///
    /// Returns [`SubsetError::ResultPagination`] when the listing stalls
    /// short of the reported total, plus the usual transport and protocol
    /// failures.
    pub async fn fetch_results(&self, job_id: &str) -> Result<Vec<ResultItem>, SubsetError> {
        let mut pager = ResultPager::new(job_id, self.page_size);
        loop {
            let envelope = self
                .call(
                    "GetResult",
                    &result_envelope(job_id, self.page_size, pager.next_index()),
                )
                .await?;
            if envelope.is_fault() {
                return Err(SubsetError::Fault {
                    method: "GetResult",
                    code: fault_code_or_unknown(&envelope),
                });
            }
            let result = envelope.result.ok_or(SubsetError::MissingField {
                method: "GetResult",
                field: "result",
            })?;
            pager.absorb(result)?;
            if pager.is_complete() {
                break;
            }
        }
        let expected = pager.expected();
        let items = pager.into_items();
        info!("Retrieved {} out of {expected} expected items", items.len());
        Ok(items)
    }

    /// Downloads each granule into `dest_dir`, staging partial files in
    /// `scratch_dir`.
    ///
    /// A granule that fails to download is logged and recorded; the rest of
    /// the list still gets its chance.
    pub async fn download_granules(
        &self,
        items: &[ResultItem],
        scratch_dir: &Path,
        dest_dir: &Path,
    ) -> DownloadReport {
        let mut report = DownloadReport::default();
        for item in items {
            match self.download_granule(item, scratch_dir, dest_dir).await {
                Ok(path) => {
                    info!("Downloaded {}", path.display());
                    report.downloaded.push(path);
                }
                Err(error) => {
                    warn!("Failed to download {}: {error}", item.link);
                    report.failures.push(DownloadFailure {
                        label: item.label.clone(),
                        link: item.link.clone(),
                        reason: error.to_string(),
                    });
                }
            }
        }
        report
    }

    /// Runs the whole pipeline: submit, wait, list, classify, download.
    ///
    /// Documentation links are reported in the outcome but never downloaded.
    ///
    /// # Errors
    ///
    /// Fails when submission, polling, or the result listing fails.
    /// Individual download failures end up in
    /// [`SubsetOutcome::failures`] instead.
    pub async fn run(
        &self,
        request: &SubsetRequest,
        scratch_dir: &Path,
        dest_dir: &Path,
    ) -> Result<SubsetOutcome, SubsetError> {
        let job = self.submit(request).await?;
        self.wait_until_done(&job).await?;
        let items = self.fetch_results(&job.id).await?;
        let (granules, documentation) = classify_results(items);
        for doc in &documentation {
            info!("Documentation: {}: {}", doc.label, doc.link);
        }
        let report = self.download_granules(&granules, scratch_dir, dest_dir).await;
        Ok(SubsetOutcome {
            job_id: job.id,
            downloaded: report.downloaded,
            documentation,
            failures: report.failures,
        })
    }

    async fn download_granule(
        &self,
        item: &ResultItem,
        scratch_dir: &Path,
        dest_dir: &Path,
    ) -> Result<PathBuf, SubsetError> {
        let file_name = sanitize_label(&item.label);
        let part_path = scratch_dir.join(format!("{file_name}.part"));
        let final_path = dest_dir.join(file_name);

        let mut response = self
            .http
            .get(&item.link)
            .send()
            .await
            .map_err(|source| SubsetError::NetworkRequest(item.link.clone(), source))?;
        // Earthdata-protected links answer 401 until asked with credentials.
        if response.status() == StatusCode::UNAUTHORIZED {
            debug!("Retrying {} with Earthdata credentials", item.link);
            response = self
                .http
                .get(&item.link)
                .basic_auth(&self.credentials.login, Some(&self.credentials.password))
                .send()
                .await
                .map_err(|source| SubsetError::NetworkRequest(item.link.clone(), source))?;
        }
        let response = match response.error_for_status() {
            Ok(response) => response,
            Err(source) => {
                return Err(match source.status() {
                    Some(status) => SubsetError::HttpStatus {
                        url: item.link.clone(),
                        status,
                        source,
                    },
                    None => SubsetError::NetworkRequest(item.link.clone(), source),
                });
            }
        };

        let stream = response
            .bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
        let mut reader = StreamReader::new(stream);
        let mut file = fs::File::create(&part_path)
            .await
            .map_err(|source| SubsetError::GranuleWriteIo(part_path.clone(), source))?;
        tokio::io::copy(&mut reader, &mut file)
            .await
            .map_err(|source| SubsetError::GranuleWriteIo(part_path.clone(), source))?;
        drop(file);
        fs::rename(&part_path, &final_path)
            .await
            .map_err(|source| SubsetError::GranuleWriteIo(final_path.clone(), source))?;
        Ok(final_path)
    }

    async fn call(&self, method: &'static str, envelope: &Value) -> Result<WspEnvelope, SubsetError> {
        debug!("POST {} ({method})", self.endpoint);
        let response = self
            .http
            .post(&self.endpoint)
            .basic_auth(&self.credentials.login, Some(&self.credentials.password))
            .header(ACCEPT, "application/json")
            .json(envelope)
            .send()
            .await
            .map_err(|source| SubsetError::NetworkRequest(self.endpoint.clone(), source))?;
        let response = match response.error_for_status() {
            Ok(response) => response,
            Err(source) => {
                return Err(match source.status() {
                    Some(status) => SubsetError::HttpStatus {
                        url: self.endpoint.clone(),
                        status,
                        source,
                    },
                    None => SubsetError::NetworkRequest(self.endpoint.clone(), source),
                });
            }
        };
        let parsed: WspEnvelope = response.json().await.map_err(|source| {
            SubsetError::JsonDecode {
                url: self.endpoint.clone(),
                source,
            }
        })?;
        if parsed.is_fault() {
            warn!(
                "{method} request returned a fault: {}",
                fault_code_or_unknown(&parsed)
            );
        }
        Ok(parsed)
    }
}

fn fault_code_or_unknown(envelope: &WspEnvelope) -> String {
    envelope
        .fault_code()
        .unwrap_or_else(|| "unknown".to_string())
}

// Labels double as file names; keep server-provided ones inside the
// destination directory.
fn sanitize_label(label: &str) -> String {
    label.replace(['/', '\\'], "_")
}

/// Accumulates result listing pages and knows when the listing is complete.
///
/// The start index advances by the batch size per request. A page that adds
/// nothing while items are still outstanding would loop forever, so it is an
/// error.
#[derive(Debug)]
struct ResultPager {
    job_id: String,
    page_size: usize,
    pages: usize,
    total: Option<usize>,
    items: Vec<ResultItem>,
}

impl ResultPager {
    fn new(job_id: &str, page_size: usize) -> Self {
        Self {
            job_id: job_id.to_string(),
            page_size,
            pages: 0,
            total: None,
            items: Vec::new(),
        }
    }

    fn next_index(&self) -> usize {
        self.pages * self.page_size
    }

    fn expected(&self) -> usize {
        self.total.unwrap_or(0)
    }

    fn is_complete(&self) -> bool {
        self.total.is_some_and(|total| self.items.len() >= total)
    }

    fn absorb(&mut self, result: WspResult) -> Result<(), SubsetError> {
        let total = result.total_results.ok_or(SubsetError::MissingField {
            method: "GetResult",
            field: "totalResults",
        })?;
        let page = result.items.ok_or(SubsetError::MissingField {
            method: "GetResult",
            field: "items",
        })?;
        if let Some(reported) = result.items_per_page {
            debug!("GetResult page {} reports {reported} items", self.pages);
        }
        self.total.get_or_insert(total);
        if page.is_empty() && !self.is_complete() {
            return Err(SubsetError::ResultPagination {
                job_id: self.job_id.clone(),
                expected: self.expected(),
                retrieved: self.items.len(),
            });
        }
        self.pages += 1;
        self.items.extend(page);
        Ok(())
    }

    fn into_items(mut self) -> Vec<ResultItem> {
        if let Some(total) = self.total {
            self.items.truncate(total);
        }
        self.items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn item(label: &str) -> ResultItem {
        ResultItem {
            label: label.to_string(),
            link: format!("https://example.com/{label}"),
            start: Some(json!("2020-08-01T00:00:00.000Z")),
            end: Some(json!("2020-08-01T01:00:00.000Z")),
        }
    }

    fn page(total: usize, labels: &[&str]) -> WspResult {
        WspResult {
            total_results: Some(total),
            items_per_page: Some(labels.len()),
            items: Some(labels.iter().map(|label| item(label)).collect()),
            ..WspResult::default()
        }
    }

    #[test]
    fn test_pager_walks_batches_until_the_reported_total() -> Result<(), SubsetError> {
        let mut pager = ResultPager::new("123", 2);

        assert_eq!(pager.next_index(), 0);
        pager.absorb(page(5, &["a", "b"]))?;
        assert!(!pager.is_complete());
        assert_eq!(pager.next_index(), 2);
        pager.absorb(page(5, &["c", "d"]))?;
        assert_eq!(pager.next_index(), 4);
        pager.absorb(page(5, &["e"]))?;
        assert!(pager.is_complete());

        let items = pager.into_items();
        assert_eq!(items.len(), 5);
        assert_eq!(items[4].label, "e");
        Ok(())
    }

    #[test]
    fn test_pager_flags_a_stalled_listing() {
        let mut pager = ResultPager::new("123", 2);
        pager.absorb(page(4, &["a", "b"])).unwrap();
        let result = pager.absorb(page(4, &[]));

        match result {
            Err(SubsetError::ResultPagination {
                job_id,
                expected,
                retrieved,
            }) => {
                assert_eq!(job_id, "123");
                assert_eq!(expected, 4);
                assert_eq!(retrieved, 2);
            }
            other => panic!("expected a pagination error, got {other:?}"),
        }
    }

    #[test]
    fn test_pager_accepts_an_empty_listing() -> Result<(), SubsetError> {
        let mut pager = ResultPager::new("123", 20);
        pager.absorb(page(0, &[]))?;
        assert!(pager.is_complete());
        assert!(pager.into_items().is_empty());
        Ok(())
    }

    #[test]
    fn test_pager_truncates_overshoot_to_the_reported_total() -> Result<(), SubsetError> {
        let mut pager = ResultPager::new("123", 2);
        pager.absorb(page(3, &["a", "b"]))?;
        pager.absorb(page(3, &["c", "d"]))?;
        assert!(pager.is_complete());
        assert_eq!(pager.into_items().len(), 3);
        Ok(())
    }

    #[test]
    fn test_pager_requires_the_bookkeeping_fields() {
        let mut pager = ResultPager::new("123", 2);
        let missing_total = WspResult {
            items: Some(vec![item("a")]),
            ..WspResult::default()
        };
        assert!(matches!(
            pager.absorb(missing_total),
            Err(SubsetError::MissingField {
                field: "totalResults",
                ..
            })
        ));
        let missing_items = WspResult {
            total_results: Some(3),
            ..WspResult::default()
        };
        assert!(matches!(
            pager.absorb(missing_items),
            Err(SubsetError::MissingField { field: "items", .. })
        ));
    }

    #[test]
    fn test_labels_cannot_escape_the_destination_directory() {
        assert_eq!(sanitize_label("../../etc/passwd"), ".._.._etc_passwd");
        assert_eq!(sanitize_label("plain.nc4"), "plain.nc4");
    }

    fn http_response(status: &str, content_type: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {status}\r\ncontent-type: {content_type}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        )
    }

    fn content_length(head: &str) -> usize {
        for line in head.lines() {
            if let Some((name, value)) = line.split_once(':') {
                if name.eq_ignore_ascii_case("content-length") {
                    return value.trim().parse().unwrap_or(0);
                }
            }
        }
        0
    }

    async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
        let mut data = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            match socket.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => data.extend_from_slice(&buf[..n]),
            }
            if let Some(head_end) = data.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&data[..head_end]).to_string();
                if data.len() >= head_end + 4 + content_length(&head) {
                    return head;
                }
            }
        }
        String::from_utf8_lossy(&data).to_string()
    }

    /// Serves one canned response per connection and records each request
    /// head, so tests can assert what actually went over the wire.
    async fn canned_server(
        responses: Vec<String>,
    ) -> (std::net::SocketAddr, Arc<Mutex<Vec<String>>>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind listener");
        let addr = listener.local_addr().expect("local addr");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        tokio::spawn(async move {
            for response in responses {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let request = read_request(&mut socket).await;
                log.lock().expect("request log").push(request);
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        (addr, seen)
    }

    #[tokio::test]
    async fn test_download_retries_with_basic_auth_after_unauthorized() {
        let (addr, seen) = canned_server(vec![
            http_response("401 Unauthorized", "text/plain", ""),
            http_response("200 OK", "application/octet-stream", "granule-bytes"),
        ])
        .await;
        let client = GesDiscClient::builder()
            .credentials(Credentials::new("jane", "hunter2"))
            .build();
        let dir = tempfile::tempdir().expect("tempdir");
        let scratch = dir.path().join("tmp");
        let dest = dir.path().join("outputs");
        std::fs::create_dir_all(&scratch).expect("scratch dir");
        std::fs::create_dir_all(&dest).expect("dest dir");
        let granule = ResultItem {
            label: "MERRA2_subset.nc4".to_string(),
            link: format!("http://{addr}/MERRA2_subset.nc4"),
            start: Some(json!("2020-08-01T00:00:00.000Z")),
            end: Some(json!("2020-08-01T01:00:00.000Z")),
        };

        let report = client.download_granules(&[granule], &scratch, &dest).await;

        assert!(report.failures.is_empty(), "failures: {:?}", report.failures);
        assert_eq!(report.downloaded, vec![dest.join("MERRA2_subset.nc4")]);
        let contents =
            std::fs::read_to_string(dest.join("MERRA2_subset.nc4")).expect("granule file");
        assert_eq!(contents, "granule-bytes");

        let requests = seen.lock().expect("request log");
        assert_eq!(requests.len(), 2);
        assert!(!requests[0].to_ascii_lowercase().contains("authorization"));
        // jane:hunter2, base64-encoded
        assert!(requests[1].contains("Basic amFuZTpodW50ZXIy"));
    }

    #[tokio::test]
    async fn test_download_gives_up_after_one_authenticated_retry() {
        let (addr, seen) = canned_server(vec![
            http_response("401 Unauthorized", "text/plain", ""),
            http_response("401 Unauthorized", "text/plain", ""),
        ])
        .await;
        let client = GesDiscClient::builder()
            .credentials(Credentials::new("jane", "hunter2"))
            .build();
        let dir = tempfile::tempdir().expect("tempdir");
        let granule = ResultItem {
            label: "MERRA2_subset.nc4".to_string(),
            link: format!("http://{addr}/MERRA2_subset.nc4"),
            start: Some(json!("2020-08-01T00:00:00.000Z")),
            end: Some(json!("2020-08-01T01:00:00.000Z")),
        };

        let report = client
            .download_granules(&[granule], dir.path(), dir.path())
            .await;

        assert!(report.downloaded.is_empty());
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].reason.contains("401"));
        assert_eq!(seen.lock().expect("request log").len(), 2);
    }

    #[tokio::test]
    async fn test_failed_job_yields_its_fault_code() {
        let status_body = json!({
            "type": "jsonwsp/response",
            "version": "1.0",
            "methodname": "GetStatus",
            "result": {"Status": "Failed"},
            "fault": {"code": "Server.ProcessingError", "string": "subsetter crashed"},
        })
        .to_string();
        let (addr, _requests) =
            canned_server(vec![http_response("200 OK", "application/json", &status_body)]).await;
        let client = GesDiscClient::builder()
            .credentials(Credentials::new("jane", "hunter2"))
            .endpoint(format!("http://{addr}"))
            .poll_interval(Duration::from_millis(1))
            .build();
        let job = SubsetJob {
            id: "5000000001".to_string(),
            status: JobStatus::Running,
        };

        match client.wait_until_done(&job).await {
            Err(SubsetError::JobFailed { job_id, code }) => {
                assert_eq!(job_id, "5000000001");
                assert_eq!(code, "Server.ProcessingError");
            }
            other => panic!("expected a job failure, got {other:?}"),
        }
    }
}
