//! reads-enricher: binary entrypoint.
//! Reads the record list produced by the list parser (JSON array), enriches it and
//! writes the result back out as JSON.
//!
//! Env:
//!   ENRICHER_INPUT        input JSON (default `exports/reads_raw.json`)
//!   ENRICHER_OUTPUT       output JSON (default `exports/reads.json`)
//!   ENRICHER_CLEAR_CACHE  `1` clears the content cache and exits
//!   RUST_LOG              log filter (default `reads_enricher=info,warn`)

use anyhow::{Context, Result};
use reads_enricher::{Enricher, EnricherConfig, PublicationRecord};
use std::fs;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_INPUT: &str = "exports/reads_raw.json";
const DEFAULT_OUTPUT: &str = "exports/reads.json";

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("reads_enricher=info,warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

fn env_path(name: &str, default: &str) -> PathBuf {
    std::env::var(name)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(default))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = EnricherConfig::load()?;
    let workers = cfg.images.workers;
    let retries = cfg.network.max_retries;
    let enricher = Enricher::from_config(cfg)?;

    if std::env::var("ENRICHER_CLEAR_CACHE").is_ok_and(|v| v == "1") {
        enricher.cache().clear()?;
        return Ok(());
    }

    let input = env_path("ENRICHER_INPUT", DEFAULT_INPUT);
    let output = env_path("ENRICHER_OUTPUT", DEFAULT_OUTPUT);

    let raw = fs::read_to_string(&input)
        .with_context(|| format!("reading records from {}", input.display()))?;
    let records: Vec<PublicationRecord> = serde_json::from_str(&raw)
        .with_context(|| format!("parsing records in {}", input.display()))?;

    info!(
        input = %input.display(),
        records = records.len(),
        workers,
        retries,
        cache = enricher.cache().is_enabled(),
        cache_dir = %enricher.cache().dir().display(),
        "starting enrichment"
    );

    let outcome = enricher.run(records).await;

    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(&outcome.records)?;
    fs::write(&output, json).with_context(|| format!("writing {}", output.display()))?;

    info!(
        output = %output.display(),
        kept = outcome.records.len(),
        rejected = outcome.rejected.len(),
        labeled = outcome.labeling.labeled,
        skipped = outcome.labeling.skipped,
        "enrichment written"
    );
    Ok(())
}
