use chrono::{TimeZone, Utc};
use wile::{BoundingBox, Credentials, SubsetRequest, Wile, WileError};

#[tokio::main]
async fn main() -> Result<(), WileError> {
    // Run with RUST_LOG=info to watch the job progress.
    env_logger::init();

    // Needs EARTHDATA_LOGIN and EARTHDATA_PASSWORD in the environment.
    if let Some(credentials) = Credentials::from_env() {
        // OPeNDAP-style tooling reads ~/.netrc; keep it in sync.
        credentials.write_earthdata_files_in_home().await?;
    }

    let wile = Wile::new("./wile-data").await?;

    let request = SubsetRequest::builder()
        .dataset("NLDAS_FORA0125_H_2.0")
        .variables(vec!["SoilM_0_100cm".to_string(), "Tair".to_string()])
        .start(Utc.with_ymd_and_hms(2020, 8, 1, 0, 0, 0).unwrap())
        .end(Utc.with_ymd_and_hms(2020, 8, 3, 23, 59, 59).unwrap())
        .bounding_box(BoundingBox::new(-125.0, 32.0, -113.0, 42.5))
        .build();

    let outcome = wile.run_subset().request(request).call().await?;
    println!("job {} finished", outcome.job_id);
    for path in &outcome.downloaded {
        println!("  granule {}", path.display());
    }
    for doc in &outcome.documentation {
        println!("  docs    {}: {}", doc.label, doc.link);
    }
    for failure in &outcome.failures {
        eprintln!("  failed  {}: {}", failure.link, failure.reason);
    }

    Ok(())
}
