//! CSV importer CLI
//!
//! Starts an import session against a marten server, streams the file
//! through the parser off the async runtime, and uploads batches
//! strictly one at a time. Ctrl-C requests cooperative cancellation:
//! parsing stops, no new uploads start, and an upload already in
//! flight is left to finish or fail on its own.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use marten::import::{
    CsvParser, DateWindow, HttpTransport, ImportPhase, ImportProgress, UploadCoordinator,
};
use marten::models::import::StartImportResponse;

#[derive(Parser)]
#[command(name = "marten-import")]
#[command(about = "Import an analytics CSV export into a marten server", long_about = None)]
struct Cli {
    /// Path to the CSV export file
    #[arg(long)]
    file: PathBuf,

    /// Base URL of the marten server (e.g. http://localhost:8080)
    #[arg(long)]
    server: String,

    /// Target site id
    #[arg(long)]
    site_id: i64,

    /// Site API token
    #[arg(long)]
    token: String,

    /// Rows per uploaded batch
    #[arg(long, default_value_t = marten::import::BATCH_SIZE)]
    batch_size: usize,
}

async fn start_import(cli: &Cli) -> Result<StartImportResponse> {
    let url = format!(
        "{}/api/import/{}",
        cli.server.trim_end_matches('/'),
        cli.site_id
    );
    let response = reqwest::Client::new()
        .post(&url)
        .bearer_auth(&cli.token)
        .send()
        .await
        .context("failed to reach server")?;

    if !response.status().is_success() {
        return Err(anyhow!(
            "server refused to start import: {}",
            response.status()
        ));
    }

    Ok(response.json().await?)
}

fn print_progress(progress: ImportProgress) {
    match progress.status {
        ImportPhase::Completed => {
            let note = progress.message.as_deref().unwrap_or("done");
            println!(
                "✓ Completed: {} imported, {} parsed, {} skipped, {} errors ({})",
                progress.imported_events,
                progress.parsed_rows,
                progress.skipped_rows,
                progress.errors,
                note
            );
        }
        ImportPhase::Failed => {
            let note = progress.message.as_deref().unwrap_or("unknown error");
            println!("✗ Failed: {}", note);
        }
        _ => {
            println!(
                "… {} parsed, {} skipped, {} imported, {} errors",
                progress.parsed_rows,
                progress.skipped_rows,
                progress.imported_events,
                progress.errors
            );
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let started = start_import(&cli).await?;
    let range = &started.allowed_date_range;
    println!(
        "Import {} started; server accepts events from {} to {}",
        started.import_id, range.earliest_allowed_date, range.latest_allowed_date
    );

    let window = DateWindow::from_strings(
        &range.earliest_allowed_date,
        &range.latest_allowed_date,
    )
    .ok_or_else(|| anyhow!("server returned an invalid allowed date range"))?;

    let cancel = CancellationToken::new();

    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("cancellation requested, finishing the in-flight upload");
            ctrl_c_cancel.cancel();
        }
    });

    let file = std::fs::File::open(&cli.file)
        .with_context(|| format!("failed to open {}", cli.file.display()))?;

    // Capacity 1: the parser stays at most one batch ahead of the
    // single in-flight upload.
    let (tx, rx) = mpsc::channel(1);

    let parser = CsvParser::new(window, cancel.clone()).with_batch_size(cli.batch_size);
    let parse_handle = tokio::task::spawn_blocking(move || parser.run(file, &tx));

    let transport = HttpTransport::new(&cli.server, cli.site_id, &started.import_id, &cli.token);
    let coordinator =
        UploadCoordinator::new(transport, cancel).with_progress(Box::new(print_progress));
    let outcome = coordinator.run(rx).await;

    // Surface a parse failure (unreadable file) over the generic
    // "parsing stopped" outcome it causes downstream
    parse_handle
        .await
        .context("parser task panicked")?
        .context("failed to parse source file")?;

    if outcome.status == ImportPhase::Failed {
        return Err(anyhow!(
            outcome
                .message
                .unwrap_or_else(|| "import failed".to_string())
        ));
    }

    Ok(())
}
