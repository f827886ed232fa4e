//! Applies one change document file to a roadgraph database.
//!
//! Run with: `cargo run --bin apply_osc -- --db roads.db --file change.json`
//!
//! On success the outcome (placeholder mappings plus changeset summary) is
//! printed to stdout as JSON. On failure an error object is printed and the
//! process exits non-zero; the database is unchanged.
//!
//! Logging goes to stderr and is filtered with `RUST_LOG`
//! (default `info`), for example `RUST_LOG=roadgraph=debug`.
//!
//! # Examples
//!
//! ```bash
//! # New changeset for user 99
//! cargo run --release --bin apply_osc -- --db roads.db --file upload.json
//!
//! # Existing changeset, strict versions
//! cargo run --release --bin apply_osc -- --db roads.db --file upload.json \
//!     --changeset 12 --config engine.json
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use roadgraph::{ChangesetId, EngineConfig, Error, RoadGraph};
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// User that owns changesets the tool opens itself.
const DEFAULT_USER_ID: i64 = 99;

struct Args {
    db_path: PathBuf,
    file: PathBuf,
    changeset: Option<i64>,
    user_id: i64,
    config_path: Option<PathBuf>,
}

const USAGE: &str = r#"apply_osc

Usage: apply_osc --db <PATH> --file <PATH> [OPTIONS]

Options:
  -d, --db <PATH>         Database path (created if missing)
  -f, --file <PATH>       Change document (JSON osmChange)
  -c, --changeset <ID>    Apply under an existing changeset
  -u, --user <ID>         Owner of a newly opened changeset (default: 99)
      --config <PATH>     Engine config file (JSON)
  -h, --help              Show this help
"#;

fn parse_args() -> Result<Args, String> {
    let args: Vec<String> = std::env::args().collect();

    let mut db_path = None;
    let mut file = None;
    let mut changeset = None;
    let mut user_id = DEFAULT_USER_ID;
    let mut config_path = None;

    let mut i = 1;
    while i < args.len() {
        let flag = args[i].as_str();
        let mut value = || {
            i += 1;
            args.get(i)
                .cloned()
                .ok_or_else(|| format!("missing value for {}", flag))
        };
        match flag {
            "--db" | "-d" => db_path = Some(PathBuf::from(value()?)),
            "--file" | "-f" => file = Some(PathBuf::from(value()?)),
            "--changeset" | "-c" => {
                let raw = value()?;
                changeset = Some(
                    raw.parse()
                        .map_err(|_| format!("invalid --changeset value: {}", raw))?,
                );
            }
            "--user" | "-u" => {
                let raw = value()?;
                user_id = raw
                    .parse()
                    .map_err(|_| format!("invalid --user value: {}", raw))?;
            }
            "--config" => config_path = Some(PathBuf::from(value()?)),
            "--help" | "-h" => {
                println!("{}", USAGE);
                std::process::exit(0);
            }
            arg => return Err(format!("unknown argument: {}", arg)),
        }
        i += 1;
    }

    Ok(Args {
        db_path: db_path.ok_or("--db is required")?,
        file: file.ok_or("--file is required")?,
        changeset,
        user_id,
        config_path,
    })
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();
}

async fn run(args: Args) -> roadgraph::Result<serde_json::Value> {
    let config = match &args.config_path {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    let text = std::fs::read_to_string(&args.file)?;

    let graph = RoadGraph::open_with_config(&args.db_path, config).await?;

    let changeset = match args.changeset {
        Some(id) => ChangesetId::from_raw(id),
        None => {
            let opened = graph.open_changeset(args.user_id).await?;
            info!(changeset = %opened.id, user = args.user_id, "opened changeset");
            opened.id
        }
    };

    let result = graph.apply_json(&text, changeset).await;
    graph.shutdown().await;

    Ok(serde_json::to_value(result?)?)
}

fn error_body(err: &Error) -> serde_json::Value {
    json!({
        "error": err.kind(),
        "message": err.to_string(),
        "ids": err.offending_ids(),
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = match parse_args() {
        Ok(args) => args,
        Err(message) => {
            eprintln!("{}\n\n{}", message, USAGE);
            return ExitCode::from(2);
        }
    };

    init_logging();

    match run(args).await {
        Ok(outcome) => {
            println!("{}", outcome);
            ExitCode::SUCCESS
        }
        Err(err) => {
            println!("{}", error_body(&err));
            ExitCode::FAILURE
        }
    }
}
