use chrono::{Duration, Utc};
use wile::{Wile, WileError};

#[tokio::main]
async fn main() -> Result<(), WileError> {
    // Run with RUST_LOG=info to watch the window-by-window walk.
    env_logger::init();

    // Needs SYNOPTIC_TOKEN in the environment.
    let wile = Wile::new("./wile-data").await?;

    // Keep the demo cheap: two day-sized windows instead of the full archive.
    let path = wile
        .pull_history()
        .floor(Utc::now() - Duration::days(2))
        .window(Duration::days(1))
        .call()
        .await?;
    println!("wrote {}", path.display());

    Ok(())
}
