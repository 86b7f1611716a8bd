use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;

use crate::config::{Config, SchedulerSettings};
use crate::db::Repository;
use crate::error::{AppError, Result};
use crate::feed::ContentFilter;
use crate::models::NewArticle;
use crate::scheduler::{PublishScheduler, PublishStore};

/// How often the daemon re-reads settings written by other processes.
const SETTINGS_RELOAD_INTERVAL: Duration = Duration::from_secs(60);

pub struct App {
    pub repository: Arc<Repository>,
    pub scheduler: PublishScheduler,
    pub feed: ContentFilter,
}

impl App {
    pub async fn new(config: &Config) -> Result<Self> {
        let catalog = config.region_catalog()?;
        let repository = Arc::new(Repository::new(&config.db_path, catalog).await?);

        let settings = Self::scheduler_settings(&repository, config).await?;
        let store: Arc<dyn PublishStore> = repository.clone();
        let scheduler = PublishScheduler::new(store, settings);

        let feed = ContentFilter::new(
            Arc::clone(&repository),
            config.default_page_size,
            config.max_page_size,
        );

        Ok(Self {
            repository,
            scheduler,
            feed,
        })
    }

    // Settings changed at runtime by an admin take precedence over the file.
    // A stored row that fails to parse or validate is ignored so the CLI can
    // still start and overwrite it.
    async fn scheduler_settings(
        repository: &Repository,
        config: &Config,
    ) -> Result<SchedulerSettings> {
        let stored = match repository.load_scheduler_settings().await {
            Ok(stored) => stored,
            Err(AppError::Json(e)) => {
                tracing::warn!(error = %e, "Ignoring unreadable stored scheduler settings");
                return Ok(config.scheduler);
            }
            Err(e) => return Err(e),
        };

        match stored {
            Some(stored) => match stored.validate() {
                Ok(()) => Ok(stored),
                Err(e) => {
                    tracing::warn!(error = %e, "Ignoring stored scheduler settings");
                    Ok(config.scheduler)
                }
            },
            None => Ok(config.scheduler),
        }
    }

    /// Persist scheduler settings without touching this process's loop. A
    /// running daemon applies them on its next settings reload.
    pub async fn store_scheduler_settings(
        &self,
        enabled: bool,
        interval_minutes: u32,
    ) -> Result<SchedulerSettings> {
        let settings = SchedulerSettings::new(enabled, interval_minutes)?;
        self.repository.save_scheduler_settings(&settings).await?;
        Ok(settings)
    }

    /// Run the publishing loop until Ctrl-C, then let any in-flight pass finish.
    pub async fn run_until_shutdown(&self) -> Result<()> {
        self.scheduler.start().await;

        let status = self.scheduler.status().await;
        tracing::info!(
            enabled = status.enabled,
            interval_minutes = status.interval_minutes,
            running = self.scheduler.is_running().await,
            "newsdesk scheduler ready"
        );

        let mut reload = tokio::time::interval(SETTINGS_RELOAD_INTERVAL);
        reload.set_missed_tick_behavior(MissedTickBehavior::Delay);
        reload.tick().await;

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            tokio::select! {
                result = &mut ctrl_c => {
                    result?;
                    break;
                }
                _ = reload.tick() => self.reload_scheduler_settings().await,
            }
        }

        tracing::info!("Shutdown requested");
        self.scheduler.shutdown().await;
        Ok(())
    }

    /// Apply stored settings (e.g. from `--enable`) if they differ from the
    /// running scheduler's. Failures are logged and the current loop is kept.
    pub async fn reload_scheduler_settings(&self) {
        let stored = match self.repository.load_scheduler_settings().await {
            Ok(Some(stored)) => stored,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read stored scheduler settings");
                return;
            }
        };

        let status = self.scheduler.status().await;
        if stored.enabled == status.enabled && stored.interval_minutes == status.interval_minutes {
            return;
        }

        tracing::info!(
            enabled = stored.enabled,
            interval_minutes = stored.interval_minutes,
            "Applying stored scheduler settings"
        );
        if let Err(e) = self
            .scheduler
            .configure(stored.enabled, stored.interval_minutes)
            .await
        {
            tracing::warn!(error = %e, "Failed to apply stored scheduler settings");
        }
    }

    /// Insert articles from a JSON array of `NewArticle`. Invalid entries are
    /// logged and skipped; returns how many were imported.
    pub async fn import_articles(&self, path: &Path) -> Result<usize> {
        let content = std::fs::read_to_string(path)?;
        let articles: Vec<NewArticle> = serde_json::from_str(&content)?;

        let mut imported = 0;
        for article in articles {
            let title = article.title.clone();
            match self.repository.create_article(article).await {
                Ok(_) => imported += 1,
                Err(e) => {
                    tracing::warn!(title = %title, error = %e, "Failed to import article");
                }
            }
        }

        Ok(imported)
    }
}
