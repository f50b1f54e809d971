use std::error::Error;

use clap::Parser;
use serde_json::json;
use ttb_loaders::export::context_from;
use ttb_loaders::export::json::run_json_loader;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// MotherDuck database name
    #[arg(short, long, default_value = "ttb_public_comments")]
    database: String,
}

/// Observable Framework data loader: regulations.gov public comments with
/// document details and parsed attachment texts, as JSON on stdout.
fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    env_logger::init();
    dotenvy::dotenv().ok();

    let query = r"
    SELECT
        -- count of attachments for this comment
        (SELECT COUNT(*)
         FROM attachments a
         WHERE a.comment_id = c.comment_id) AS attachment_count,
        -- the comment text plus every parsed attachment text, each tagged
        -- with its source
        ARRAY(
          SELECT {'source': 'DIRECT (NON-ATTACHMENT)', 'text': c.comment_text}
          UNION ALL
          SELECT {'source': a.attachment_file_url, 'text': a.attachment_parsed_text}
          FROM attachments a
          WHERE a.comment_id = c.comment_id
            AND a.attachment_parsed_text IS NOT NULL
            AND a.attachment_parsed_text != ''
        ) AS comment_text_sources,
        c.*,
        d.document_type,
        d.document_title,
        d.document_posted_date,
        d.docket_id,
        d.document_subtype,
        d.agency_id,
        d.comment_start_date,
        d.comment_end_date,
        d.within_comment_period,
        d.open_for_comment,
        d.cfr_part,
        d.fr_doc_num,
        d.fr_vol_num,
        d.start_end_page,
        d.abstract AS document_abstract
    FROM comments c
    LEFT JOIN documents d ON c.document_id = d.document_id
    ";

    let context = context_from(json!({
        "schema": "public_comments",
        "tables": ["comments", "documents", "attachments"],
        "loader": "public_comments"
    }));

    run_json_loader(query, &args.database, Some(&context))?;

    Ok(())
}
