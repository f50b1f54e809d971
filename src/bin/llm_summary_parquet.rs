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

/// Observable Framework data loader: LLM analysis summary statistics as
/// parquet on stdout.
fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    env_logger::init();
    dotenvy::dotenv().ok();

    let query = r"
    SELECT
      model_version,
      analysis_type,
      ct_commodity,
      total_colas_analyzed,
      num_colas_with_violations,
      percent_colas_with_violations,
      tokens_per_cola,
      first_analysis_date AS first_analysis,
      last_analysis_date AS last_analysis
    FROM cola_images.vw_llm_summary
    ";

    let context = context_from(json!({
        "schema": "cola_images",
        "table": "vw_llm_summary",
        "loader": "llm_summary"
    }));

    run_parquet_loader(query, &args.database, Some(&context))?;

    Ok(())
}
