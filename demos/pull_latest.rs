use std::env;
use wile::{Wile, WileError, DEFAULT_OBSERVATION_COLUMNS};

#[tokio::main]
async fn main() -> Result<(), WileError> {
    env_logger::init();
    configure_polars_display();

    // Needs SYNOPTIC_TOKEN in the environment.
    let wile = Wile::new("./wile-data").await?;

    let frame = wile
        .latest()
        .auto_clean(true)
        .columns(
            DEFAULT_OBSERVATION_COLUMNS
                .iter()
                .map(|c| c.to_string())
                .collect(),
        )
        .call()
        .await?;
    println!("{} stations reporting", frame.station_count());
    println!("{}", frame.frame.head(Some(10)));

    let path = wile.pull_latest().auto_clean(true).call().await?;
    println!("wrote {}", path.display());

    Ok(())
}

fn configure_polars_display() {
    // show every column
    env::set_var("POLARS_FMT_MAX_COLS", "-1");
    // show 20 rows
    env::set_var("POLARS_FMT_MAX_ROWS", "20");
}
