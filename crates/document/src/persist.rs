//! Writing committed documents to disk.

use std::path::{Path, PathBuf};

use duet_core::{DomainEvent, EventBus};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Read a document file.
pub async fn load(path: &Path) -> std::io::Result<String> {
    tokio::fs::read_to_string(path).await
}

/// Write `text` to `path` via a sibling temp file and a rename, so readers
/// never see a half-written document.
pub async fn save_atomic(path: &Path, text: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }

    let tmp = temp_path(path);
    tokio::fs::write(&tmp, text).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }
    debug!(path = %path.display(), bytes = text.len(), "Document saved");
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Save every committed document to `path` as commits are announced.
///
/// Only text carried by [`DomainEvent::DocumentCommitted`] is written, which
/// the store publishes after validation and commit.
pub fn spawn_autosave(bus: &EventBus, path: PathBuf) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let DomainEvent::DocumentCommitted { text, .. } = event.as_ref()
                        && let Err(e) = save_atomic(&path, text).await
                    {
                        warn!(path = %path.display(), error = %e, "Autosave failed");
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Autosave lagged behind commits");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
