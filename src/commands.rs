use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local};
use indicatif::HumanBytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::config::Settings;
use crate::coordinator::TransferCoordinator;
use crate::error::TransferError;
use crate::observer::{dispatch_until_settled, ConsoleSink, TransferEvent};
use crate::session::BackgroundSession;
use crate::state::SessionRecord;
use crate::store::ResultStore;

/// How long to wait for the session's "all events delivered" signal after
/// the resumed transfer settled.
const RELAUNCH_SIGNAL_GRACE: Duration = Duration::from_secs(5);

/// Runs one transfer to completion.
///
/// A transfer left pending by an earlier process is resumed first; while it
/// runs, a newly requested `url` is rejected like any other start request
/// made during a transfer.
pub async fn run(settings: Settings, url: Option<String>, daemon: bool) -> Result<()> {
    fs::create_dir_all(&settings.download_dir)
        .await
        .context("Failed to create download directory")?;

    let session = Arc::new(BackgroundSession::new(&settings).context("Failed to set up HTTP session")?);
    let pending = session.pending().context("Failed to read session record")?;

    if pending.is_none() && url.is_none() {
        println!("Nothing to resume in {:?}. Pass a URL to start a download.", settings.staging_dir);
        return Ok(());
    }

    let store = ResultStore::new(&settings.download_dir);
    let (coordinator, mut events) = TransferCoordinator::new(session.clone(), store, settings.stall_timeout);
    let watchdog = coordinator.spawn_watchdog(settings.watchdog_period());

    let mut relaunch = None;
    if let Some(pending) = pending {
        let (tx, rx) = oneshot::channel();
        coordinator.set_relaunch_signal(Box::new(move || {
            let _ = tx.send(());
        }));
        coordinator.resume(&pending).context("Failed to resume pending transfer")?;
        relaunch = Some(rx);
    }

    if let Some(url) = url {
        match coordinator.start(&url) {
            Ok(handle) => info!(id = %handle.id, name = %handle.destination_name, "download requested"),
            Err(TransferError::AlreadyActive) => {
                warn!(%url, "a transfer is already in flight, request ignored")
            }
            Err(e) => return Err(e).with_context(|| format!("Failed to start download of {}", url)),
        }
    }

    let mut sink = ConsoleSink::new();
    let outcome = tokio::select! {
        outcome = dispatch_until_settled(&mut events, &mut sink) => outcome,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, staged bytes are kept for the next run");
            None
        }
    };

    if let (Some(rx), Some(_)) = (relaunch, outcome.as_ref()) {
        if tokio::time::timeout(RELAUNCH_SIGNAL_GRACE, rx).await.is_err() {
            warn!("session did not confirm delivery of relaunch events");
        }
    }

    if let Some(handle) = watchdog {
        handle.abort();
    }

    if daemon {
        crate::daemon::cleanup_pid_file(&settings);
    }

    match outcome {
        Some(TransferEvent::Failed { reason, .. }) => bail!("Transfer failed: {}", reason),
        Some(TransferEvent::Completed { stored: Err(e), .. }) => {
            bail!("Transfer completed but the file could not be stored: {}", e)
        }
        _ => Ok(()),
    }
}

pub async fn show_status(settings: &Settings) -> Result<()> {
    #[cfg(unix)]
    match crate::daemon::get_daemon_pid(&settings.pid_file()) {
        Ok(Some(pid)) => println!("Daemon: running (PID: {})", pid),
        _ => println!("Daemon: not running"),
    }

    let record = SessionRecord::new(&settings.staging_dir);
    match record.load().context("Failed to read session record")? {
        Some(pending) => {
            let part = settings.staging_dir.join(format!("{}.part", pending.id));
            let staged = fs::metadata(&part).await.map(|m| m.len()).unwrap_or(0);
            let since: DateTime<Local> = pending.created_at.into();
            println!(
                "Pending: {} ({} staged, since {})",
                pending.url,
                HumanBytes(staged),
                since.format("%Y-%m-%d %H:%M")
            );
        }
        None => println!("Pending: none"),
    }
    println!();

    if !settings.download_dir.exists() {
        println!("Download directory '{:?}' does not exist.", settings.download_dir);
        println!("Tip: If you used a custom download directory, please specify it with --download-dir");
        return Ok(());
    }

    println!("{:<50} {:<17} {:<15}", "Filename", "Stored", "Size");
    println!("{:-<50} {:-<17} {:-<15}", "", "", "");

    let mut found_any = false;
    let mut entries = fs::read_dir(&settings.download_dir)
        .await
        .context("Failed to read download directory")?;
    while let Some(entry) = entries.next_entry().await? {
        let metadata = match entry.metadata().await {
            Ok(metadata) if metadata.is_file() => metadata,
            _ => continue,
        };
        let filename = entry.file_name().to_string_lossy().to_string();
        if filename.starts_with('.') {
            continue;
        }
        let stored = metadata
            .modified()
            .map(|t| DateTime::<Local>::from(t).format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        println!("{:<50} {:<17} {:<15}", filename, stored, HumanBytes(metadata.len()).to_string());
        found_any = true;
    }

    if !found_any {
        println!("No stored downloads in '{:?}'.", settings.download_dir);
    }

    Ok(())
}

pub async fn follow_status(settings: &Settings) -> Result<()> {
    loop {
        print!("\x1B[1;1H\x1B[0J");
        show_status(settings).await?;
        println!("\n(Press Ctrl+C to exit view)");
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}
