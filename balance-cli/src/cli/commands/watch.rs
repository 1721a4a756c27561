//! Long-running file-drop ingestion
//!
//! Change notifications are printed to stdout as one JSON object per line.

use anyhow::Result;
use colored::*;
use tokio::sync::broadcast::error::RecvError;

use crate::cli::{WatchArgs, coordinator, open_pool, resolve_source};
use crate::config::Config;
use crate::config::repository::sources;
use crate::ingest::IngestError;
use crate::ingest::watcher::WorkbookWatcher;

pub async fn handle_watch_command(args: WatchArgs, config: &Config) -> Result<()> {
    let dir = args.dir.clone().unwrap_or_else(|| config.storage.data_dir.clone());

    let pool = open_pool(config).await?;
    let source = resolve_source(&pool, config, &args.source, None).await?;
    sources::upsert_source(&pool, &source).await?;

    let coordinator = coordinator(pool, config);
    if let Some(overview) = coordinator.restore(&source).await? {
        log::info!(
            "Restored dataset '{}' with {} year(s)",
            overview.dataset_id,
            overview.years().len()
        );
    }
    log::debug!("Published datasets: {}", coordinator.snapshots().datasets().join(", "));

    let mut events = coordinator.events().subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(line) => println!("{}", line),
                    Err(e) => log::warn!("Failed to serialize change event: {}", e),
                },
                Err(RecvError::Lagged(missed)) => {
                    log::warn!("Dropped {} change notification(s)", missed)
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut watcher = WorkbookWatcher::start(&dir, config.debounce())?;
    eprintln!(
        "Watching {} for source {} (Ctrl+C to stop)",
        dir.display().to_string().cyan(),
        source.source_id.bright_green().bold()
    );

    loop {
        tokio::select! {
            next = watcher.next() => {
                let Some(path) = next else {
                    log::warn!("File watcher stopped");
                    break;
                };

                let current = sources::get_source(coordinator.pool(), &source.source_id)
                    .await?
                    .unwrap_or_else(|| source.clone());
                match coordinator.ingest_file(&current, &path).await {
                    Ok(outcome) => log::info!(
                        "{}: {} ({})",
                        path.display(),
                        outcome.run.status,
                        outcome.run.message
                    ),
                    Err(e) => match e.downcast_ref::<IngestError>() {
                        Some(refusal) => log::warn!("Skipped {}: {}", path.display(), refusal),
                        None => log::error!("Ingestion of {} failed: {:#}", path.display(), e),
                    },
                }
            }
            _ = tokio::signal::ctrl_c() => {
                log::info!("Stopping watcher");
                break;
            }
        }
    }

    let stats = coordinator.run_stats();
    log::info!(
        "Watcher stopped after {} run(s), {} refused",
        stats.runs_started,
        stats.runs_refused
    );

    // Closing the event bus ends the printer
    drop(coordinator);
    if let Err(e) = printer.await {
        log::warn!("Event printer task failed: {}", e);
    }
    Ok(())
}
