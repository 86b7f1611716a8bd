use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::SchedulerSettings;
use crate::db::{PublishOutcome, Repository};
use crate::error::Result;

/// Storage operations the publishing scheduler depends on.
#[async_trait]
pub trait PublishStore: Send + Sync {
    /// Ids of scheduled, unpublished articles with `scheduled_publish_at <= as_of`.
    async fn find_due(&self, as_of: DateTime<Utc>) -> Result<Vec<i64>>;

    /// Atomically mark one article published at `at`.
    async fn publish(&self, article_id: i64, at: DateTime<Utc>) -> Result<PublishOutcome>;

    async fn save_scheduler_settings(&self, settings: &SchedulerSettings) -> Result<()>;
}

#[async_trait]
impl PublishStore for Repository {
    async fn find_due(&self, as_of: DateTime<Utc>) -> Result<Vec<i64>> {
        Repository::find_due(self, as_of).await
    }

    async fn publish(&self, article_id: i64, at: DateTime<Utc>) -> Result<PublishOutcome> {
        Repository::publish(self, article_id, at).await
    }

    async fn save_scheduler_settings(&self, settings: &SchedulerSettings) -> Result<()> {
        Repository::save_scheduler_settings(self, settings).await
    }
}
