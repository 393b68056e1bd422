use std::fs;
use std::sync::Arc;

use anyhow::Context;
use svclb::snapshot::ServiceEndpoints;
use svclb::Reconciler;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::ReplayArgs;

/// Feed each snapshot file through the reconciler as one full-state
/// callback, in the order given.
pub async fn run(
    reconciler: Arc<Reconciler>,
    args: ReplayArgs,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    for path in &args.snapshots {
        if cancel.is_cancelled() {
            info!("cancelled before {}", path.display());
            break;
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading snapshot {}", path.display()))?;
        let records: Vec<ServiceEndpoints> = serde_json::from_str(&raw)
            .with_context(|| format!("parsing snapshot {}", path.display()))?;
        info!(
            "applying snapshot {} with {} services",
            path.display(),
            records.len()
        );

        let (tx, rx) = tokio::sync::mpsc::channel(args.data_plane.channel_capacity);
        tokio::spawn(async move {
            for record in records {
                if tx.send(record).await.is_err() {
                    break;
                }
            }
        });
        reconciler.callback(rx).await;
    }
    Ok(())
}
