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

/// Observable Framework data loader: per-COLA LLM label analysis as parquet
/// on stdout.
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
      ai_net_contents,
      ai_abv_percentage,
      ai_ingredients,
      ai_statement_of_composition,
      brand_name,
      ai_brand_name,
      class_type,
      ai_class_type,
      ai_wine_appellation,
      ai_grape_varieties,
      ai_websites,
      num_violations,
      analysis_type,
      ai_model_version
    FROM cola_images.vw_cola_analysis
    ";

    let context = context_from(json!({
        "schema": "cola_images",
        "table": "vw_cola_analysis",
        "loader": "llm_analysis"
    }));

    run_parquet_loader(query, &args.database, Some(&context))?;

    Ok(())
}
