//! `twinsync apply`: newline-delimited JSON records in, batches out

use anyhow::Result;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use twinsync_engine::{BatchReport, TwinUpdater};

#[derive(Debug, Default)]
pub struct ApplySummary {
    pub batches: usize,
    pub failed_batches: usize,
    pub report: BatchReport,
}

/// Read records line by line and hand them to `updater` in batches of
/// `batch_size`. Blank lines are ignored. Failed batches are logged and
/// counted; processing continues with the next batch.
pub async fn apply_records<R>(
    updater: &TwinUpdater,
    reader: R,
    batch_size: usize,
) -> Result<ApplySummary>
where
    R: AsyncBufRead + Unpin,
{
    let batch_size = batch_size.max(1);
    let mut summary = ApplySummary::default();
    let mut lines = reader.lines();
    let mut batch = Vec::with_capacity(batch_size);

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        batch.push(line);
        if batch.len() == batch_size {
            run_batch(updater, std::mem::take(&mut batch), &mut summary).await;
        }
    }
    if !batch.is_empty() {
        run_batch(updater, batch, &mut summary).await;
    }
    Ok(summary)
}

async fn run_batch(updater: &TwinUpdater, batch: Vec<String>, summary: &mut ApplySummary) {
    summary.batches += 1;
    match updater.process_batch(batch).await {
        Ok(report) => summary.report.merge(&report),
        Err(err) => {
            tracing::error!(batch = summary.batches, error = %err, "batch failed");
            summary.failed_batches += 1;
            summary.report.merge(&err.report);
        }
    }
}
