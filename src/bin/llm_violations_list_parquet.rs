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

/// Observable Framework data loader: the flat list of LLM-flagged label
/// violations as parquet on stdout.
fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    env_logger::init();
    dotenvy::dotenv().ok();

    let query = r"
    SELECT
      cola_id,
      cola_form_url,
      cola_internal_url,
      ct_commodity,
      ct_source,
      violation_comment,
      violation_type,
      violation_group,
      violation_subgroup,
      cfr_ref,
      analysis_type,
      analysis_model
    FROM cola_images.vw_cola_violations_list
    ";

    let context = context_from(json!({
        "schema": "cola_images",
        "table": "vw_cola_violations_list",
        "loader": "llm_violations_list"
    }));

    run_parquet_loader(query, &args.database, Some(&context))?;

    Ok(())
}
