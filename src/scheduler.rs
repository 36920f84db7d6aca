/// Scheduler Module
///
/// Periodic retention cleanup of used posts and old posted records.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::time;

use crate::config::RetentionSettings;
use crate::store::Store;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionReport {
    pub posted_records_deleted: u64,
    pub used_posts_deleted: u64,
}

/// One retention pass relative to `now`
pub async fn run_retention(
    store: &dyn Store,
    retention: &RetentionSettings,
    now: DateTime<Utc>,
) -> Result<RetentionReport> {
    let posted_records_deleted = store
        .delete_posted_records_before(now - retention.posted_record_max_age)
        .await?;
    let used_posts_deleted = store
        .delete_used_posts_fetched_before(now - retention.used_post_max_age)
        .await?;

    Ok(RetentionReport {
        posted_records_deleted,
        used_posts_deleted,
    })
}

/// Start the cleanup loop; never returns
pub async fn start_cleanup_scheduler(store: Arc<dyn Store>, retention: RetentionSettings) {
    let mut interval = time::interval(retention.cleanup_interval);

    log::info!(
        "Starting cleanup scheduler (every {}s, used posts kept {}h, posted records kept {}d)",
        retention.cleanup_interval.as_secs(),
        retention.used_post_max_age.num_hours(),
        retention.posted_record_max_age.num_days()
    );

    // Skip the first tick (immediate execution)
    interval.tick().await;

    loop {
        interval.tick().await;

        match run_retention(store.as_ref(), &retention, Utc::now()).await {
            Ok(report) => log::info!(
                "Cleanup complete: {} posted records, {} used posts removed",
                report.posted_records_deleted,
                report.used_posts_deleted
            ),
            Err(e) => log::error!("Cleanup failed: {:#}", e),
        }
    }
}
