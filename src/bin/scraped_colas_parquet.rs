use std::error::Error;

use clap::Parser;
use serde_json::json;
use ttb_loaders::export::parquet::run_parquet_loader;
use ttb_loaders::export::{context_from, DEFAULT_DATABASE};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// MotherDuck database name
    #[arg(short, long, default_value = DEFAULT_DATABASE)]
    database: String,
}

/// Observable Framework data loader: scraped COLA records as parquet on
/// stdout.
fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    env_logger::init();
    dotenvy::dotenv().ok();

    let query = r"
    SELECT * FROM cola_images.vw_colas
    ";

    let context = context_from(json!({
        "schema": "cola_images",
        "table": "vw_colas",
        "loader": "scraped_colas"
    }));

    run_parquet_loader(query, &args.database, Some(&context))?;

    Ok(())
}
