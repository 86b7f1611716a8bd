use std::collections::BTreeSet;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::{params, types::Type, OptionalExtension, Row};
use tokio_rusqlite::Connection;

use crate::config::SchedulerSettings;
use crate::error::{AppError, Result};
use crate::models::{Article, NewArticle, PublishMode, RegionCatalog, RegionCode, RegionScope};

use super::schema::SCHEMA;

const ARTICLE_COLUMNS: &str = "id, title, summary, body, category, regions, is_published, \
     is_scheduled, scheduled_publish_at, published_at, created_at, updated_at";

const SCHEDULER_SETTINGS_KEY: &str = "scheduler";

/// Result of a publish attempt on an existing article.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Published { at: DateTime<Utc> },
    AlreadyPublished,
}

pub struct Repository {
    conn: Connection,
    catalog: RegionCatalog,
}

impl Repository {
    pub async fn new(db_path: &str, catalog: RegionCatalog) -> Result<Self> {
        let conn = Connection::open(db_path).await?;

        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn, catalog })
    }

    // Editor operations

    pub async fn create_article(&self, article: NewArticle) -> Result<i64> {
        let regions = self.catalog.scope_for(&article.regions)?.to_column()?;
        let now = Utc::now();
        let (is_published, is_scheduled, scheduled_at, published_at) = match article.publish {
            PublishMode::Draft => (false, false, None, None),
            PublishMode::Scheduled(at) => (false, true, Some(encode_timestamp(&at)), None),
            PublishMode::Now => (true, false, None, Some(encode_timestamp(&now))),
        };
        let now = encode_timestamp(&now);

        let id = self
            .conn
            .call(move |conn| {
                conn.execute(
                    r#"INSERT INTO articles (title, summary, body, category, regions, is_published,
                                            is_scheduled, scheduled_publish_at, published_at,
                                            created_at, updated_at)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)"#,
                    params![
                        article.title,
                        article.summary,
                        article.body,
                        article.category.trim(),
                        regions,
                        is_published,
                        is_scheduled,
                        scheduled_at,
                        published_at,
                        now,
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;

        tracing::debug!(article_id = id, "Created article");
        Ok(id)
    }

    pub async fn get_article(&self, id: i64) -> Result<Option<Article>> {
        let article = self
            .conn
            .call(move |conn| {
                let sql = format!("SELECT {} FROM articles WHERE id = ?1", ARTICLE_COLUMNS);
                let article = conn
                    .query_row(&sql, params![id], article_from_row)
                    .optional()?;
                Ok(article)
            })
            .await?;
        Ok(article)
    }

    /// Move a draft (or an already scheduled article) to scheduled at `at`.
    pub async fn schedule_article(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        let at = encode_timestamp(&at);
        let now = encode_timestamp(&Utc::now());
        let changed = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    r#"UPDATE articles
                       SET is_scheduled = 1, scheduled_publish_at = ?1, updated_at = ?2
                       WHERE id = ?3 AND is_published = 0"#,
                    params![at, now, id],
                )?;
                Ok(changed)
            })
            .await?;

        if changed == 0 {
            return Err(match self.get_article(id).await? {
                None => AppError::ArticleNotFound(id),
                Some(_) => AppError::InvalidState(format!("article {} is already published", id)),
            });
        }
        Ok(())
    }

    /// Return a scheduled article to draft.
    pub async fn unschedule_article(&self, id: i64) -> Result<()> {
        let now = encode_timestamp(&Utc::now());
        let changed = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    r#"UPDATE articles
                       SET is_scheduled = 0, scheduled_publish_at = NULL, updated_at = ?1
                       WHERE id = ?2 AND is_scheduled = 1"#,
                    params![now, id],
                )?;
                Ok(changed)
            })
            .await?;

        if changed == 0 {
            return Err(match self.get_article(id).await? {
                None => AppError::ArticleNotFound(id),
                Some(_) => AppError::InvalidState(format!("article {} is not scheduled", id)),
            });
        }
        Ok(())
    }

    pub async fn delete_article(&self, id: i64) -> Result<()> {
        let deleted = self
            .conn
            .call(move |conn| {
                let deleted = conn.execute("DELETE FROM articles WHERE id = ?1", params![id])?;
                Ok(deleted)
            })
            .await?;

        if deleted == 0 {
            return Err(AppError::ArticleNotFound(id));
        }
        Ok(())
    }

    // Scheduled publishing

    pub async fn find_due(&self, as_of: DateTime<Utc>) -> Result<Vec<i64>> {
        let as_of = encode_timestamp(&as_of);
        let ids = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"SELECT id FROM articles
                       WHERE is_scheduled = 1 AND is_published = 0 AND scheduled_publish_at <= ?1
                       ORDER BY scheduled_publish_at, id"#,
                )?;
                let ids = stmt
                    .query_map(params![as_of], |row| row.get(0))?
                    .collect::<std::result::Result<Vec<i64>, _>>()?;
                Ok(ids)
            })
            .await?;
        Ok(ids)
    }

    pub async fn count_due(&self, as_of: DateTime<Utc>) -> Result<i64> {
        let as_of = encode_timestamp(&as_of);
        let count = self
            .conn
            .call(move |conn| {
                let count: i64 = conn.query_row(
                    r#"SELECT COUNT(*) FROM articles
                       WHERE is_scheduled = 1 AND is_published = 0 AND scheduled_publish_at <= ?1"#,
                    params![as_of],
                    |row| row.get(0),
                )?;
                Ok(count)
            })
            .await?;
        Ok(count)
    }

    /// Flip an article to published in a single UPDATE. Already published
    /// articles are left untouched, so `published_at` never moves.
    pub async fn publish(&self, id: i64, at: DateTime<Utc>) -> Result<PublishOutcome> {
        let at = at.trunc_subsecs(6);
        let stamp = encode_timestamp(&at);
        let found = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    r#"UPDATE articles
                       SET is_scheduled = 0, is_published = 1, published_at = ?1, updated_at = ?1
                       WHERE id = ?2 AND is_published = 0"#,
                    params![stamp, id],
                )?;
                if changed > 0 {
                    return Ok(Some(true));
                }
                let exists = conn
                    .query_row("SELECT id FROM articles WHERE id = ?1", params![id], |row| {
                        row.get::<_, i64>(0)
                    })
                    .optional()?;
                Ok(exists.map(|_| false))
            })
            .await?;

        match found {
            Some(true) => Ok(PublishOutcome::Published { at }),
            Some(false) => Ok(PublishOutcome::AlreadyPublished),
            None => Err(AppError::ArticleNotFound(id)),
        }
    }

    // Reader queries

    pub async fn published_in_category(&self, category: &str, limit: u32) -> Result<Vec<Article>> {
        let category = category.trim().to_string();
        let articles = self
            .conn
            .call(move |conn| {
                let sql = format!(
                    r#"SELECT {} FROM articles
                       WHERE category = ?1 AND is_published = 1
                       ORDER BY published_at DESC, id DESC
                       LIMIT ?2"#,
                    ARTICLE_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let articles = stmt
                    .query_map(params![category, limit], article_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(articles)
            })
            .await?;
        Ok(articles)
    }

    /// Published articles in `category` that are universal or tagged with at
    /// least one of `regions`.
    pub async fn published_in_category_for_regions(
        &self,
        category: &str,
        regions: &BTreeSet<RegionCode>,
        limit: u32,
    ) -> Result<Vec<Article>> {
        let category = category.trim().to_string();
        let regions = serde_json::to_string(regions)?;
        let articles = self
            .conn
            .call(move |conn| {
                let sql = format!(
                    r#"SELECT {} FROM articles
                       WHERE category = ?1 AND is_published = 1
                         AND (regions IS NULL OR EXISTS (
                               SELECT 1 FROM json_each(articles.regions) AS tagged
                               WHERE lower(tagged.value) IN (SELECT value FROM json_each(?2))))
                       ORDER BY published_at DESC, id DESC
                       LIMIT ?3"#,
                    ARTICLE_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let articles = stmt
                    .query_map(params![category, regions, limit], article_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(articles)
            })
            .await?;
        Ok(articles)
    }

    pub async fn categories(&self) -> Result<Vec<String>> {
        let categories = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT DISTINCT category FROM articles WHERE is_published = 1 ORDER BY category",
                )?;
                let categories = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<std::result::Result<Vec<String>, _>>()?;
                Ok(categories)
            })
            .await?;
        Ok(categories)
    }

    // Settings

    pub async fn load_scheduler_settings(&self) -> Result<Option<SchedulerSettings>> {
        let value = self
            .conn
            .call(|conn| {
                let value = conn
                    .query_row(
                        "SELECT value FROM settings WHERE key = ?1",
                        params![SCHEDULER_SETTINGS_KEY],
                        |row| row.get::<_, String>(0),
                    )
                    .optional()?;
                Ok(value)
            })
            .await?;

        match value {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub async fn save_scheduler_settings(&self, settings: &SchedulerSettings) -> Result<()> {
        let value = serde_json::to_string(settings)?;
        let now = encode_timestamp(&Utc::now());
        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)
                       ON CONFLICT(key) DO UPDATE SET
                           value = excluded.value,
                           updated_at = excluded.updated_at"#,
                    params![SCHEDULER_SETTINGS_KEY, value, now],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) async fn execute_batch(&self, sql: &'static str) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute_batch(sql)?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

fn encode_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_datetime(s: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}

fn timestamp_column(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    row.get::<_, Option<String>>(idx)?
        .map(|s| parse_datetime(&s))
        .transpose()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn required_timestamp(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    timestamp_column(row, idx)?.ok_or(rusqlite::Error::InvalidColumnType(
        idx,
        "timestamp".to_string(),
        Type::Null,
    ))
}

fn article_from_row(row: &Row) -> rusqlite::Result<Article> {
    let regions = row.get::<_, Option<String>>(5)?;
    let regions = RegionScope::from_column(regions.as_deref())
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?;

    Ok(Article {
        id: row.get(0)?,
        title: row.get(1)?,
        summary: row.get(2)?,
        body: row.get(3)?,
        category: row.get(4)?,
        regions,
        is_published: row.get(6)?,
        is_scheduled: row.get(7)?,
        scheduled_publish_at: timestamp_column(row, 8)?,
        published_at: timestamp_column(row, 9)?,
        created_at: required_timestamp(row, 10)?,
        updated_at: required_timestamp(row, 11)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::db::testing::{new_article, repository};
    use crate::models::ArticleState;

    #[tokio::test]
    async fn create_and_fetch_round_trip() {
        let (_dir, repo) = repository().await;
        let mut new = new_article("state-politics", &["AP", "ts"]);
        new.summary = Some("Assembly session".into());
        let id = repo.create_article(new).await.unwrap();

        let article = repo.get_article(id).await.unwrap().unwrap();
        assert_eq!(article.category, "state-politics");
        assert_eq!(article.summary.as_deref(), Some("Assembly session"));
        let codes: Vec<&str> = article
            .regions
            .codes()
            .unwrap()
            .iter()
            .map(RegionCode::as_str)
            .collect();
        assert_eq!(codes, vec!["ap", "ts"]);
        assert_eq!(article.state(), ArticleState::Draft);

        assert!(repo.get_article(id + 100).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_region_is_rejected_on_create() {
        let (_dir, repo) = repository().await;
        let err = repo
            .create_article(new_article("sports", &["zz"]))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidRegion(_)));
    }

    #[tokio::test]
    async fn find_due_respects_cutoff() {
        let (_dir, repo) = repository().await;
        let now = Utc::now();

        let mut past = new_article("news", &[]);
        past.publish = PublishMode::Scheduled(now - Duration::minutes(5));
        let past = repo.create_article(past).await.unwrap();

        let mut exact = new_article("news", &[]);
        exact.publish = PublishMode::Scheduled(now);
        let exact = repo.create_article(exact).await.unwrap();

        let mut future = new_article("news", &[]);
        future.publish = PublishMode::Scheduled(now + Duration::minutes(5));
        let future = repo.create_article(future).await.unwrap();

        let draft = repo.create_article(new_article("news", &[])).await.unwrap();

        let due = repo.find_due(now).await.unwrap();
        assert_eq!(due, vec![past, exact]);
        assert!(!due.contains(&future));
        assert!(!due.contains(&draft));
        assert_eq!(repo.count_due(now).await.unwrap(), 2);

        let later = repo.find_due(now + Duration::minutes(10)).await.unwrap();
        assert_eq!(later, vec![past, exact, future]);
    }

    #[tokio::test]
    async fn publish_is_idempotent() {
        let (_dir, repo) = repository().await;
        let mut new = new_article("news", &[]);
        new.publish = PublishMode::Scheduled(Utc::now() - Duration::minutes(1));
        let id = repo.create_article(new).await.unwrap();

        let first_at = Utc::now();
        let outcome = repo.publish(id, first_at).await.unwrap();
        let PublishOutcome::Published { at } = outcome else {
            panic!("expected first publish to succeed, got {:?}", outcome);
        };

        let second = repo
            .publish(id, first_at + Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(second, PublishOutcome::AlreadyPublished);

        let article = repo.get_article(id).await.unwrap().unwrap();
        assert!(article.is_published);
        assert!(!article.is_scheduled);
        assert_eq!(article.published_at, Some(at));
        assert!(repo.find_due(Utc::now()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn publish_missing_article() {
        let (_dir, repo) = repository().await;
        let err = repo.publish(42, Utc::now()).await.unwrap_err();
        assert!(matches!(err, AppError::ArticleNotFound(42)));
    }

    #[tokio::test]
    async fn schedule_and_unschedule() {
        let (_dir, repo) = repository().await;
        let id = repo.create_article(new_article("news", &[])).await.unwrap();
        let at = Utc::now() + Duration::hours(2);

        assert_ok!(repo.schedule_article(id, at).await);
        let article = repo.get_article(id).await.unwrap().unwrap();
        assert!(matches!(article.state(), ArticleState::Scheduled { .. }));

        assert_ok!(repo.unschedule_article(id).await);
        let article = repo.get_article(id).await.unwrap().unwrap();
        assert_eq!(article.state(), ArticleState::Draft);
        assert!(article.scheduled_publish_at.is_none());

        assert_err!(repo.unschedule_article(id).await);
    }

    #[tokio::test]
    async fn published_article_cannot_be_rescheduled() {
        let (_dir, repo) = repository().await;
        let mut new = new_article("news", &[]);
        new.publish = PublishMode::Now;
        let id = repo.create_article(new).await.unwrap();

        let err = repo
            .schedule_article(id, Utc::now() + Duration::hours(1))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));

        let err = repo.schedule_article(999, Utc::now()).await.unwrap_err();
        assert!(matches!(err, AppError::ArticleNotFound(999)));
    }

    #[tokio::test]
    async fn schema_rejects_scheduled_without_time() {
        let (_dir, repo) = repository().await;
        let result = repo
            .execute_batch(
                "INSERT INTO articles (title, category, is_scheduled, created_at, updated_at)
                 VALUES ('broken', 'news', 1, '2026-01-01T00:00:00.000000Z', '2026-01-01T00:00:00.000000Z');",
            )
            .await;
        assert!(result.unwrap_err().is_storage());
    }

    #[tokio::test]
    async fn delete_removes_row() {
        let (_dir, repo) = repository().await;
        let id = repo.create_article(new_article("news", &[])).await.unwrap();
        assert_ok!(repo.delete_article(id).await);
        assert!(repo.get_article(id).await.unwrap().is_none());
        assert!(matches!(
            repo.delete_article(id).await,
            Err(AppError::ArticleNotFound(_))
        ));
    }

    #[tokio::test]
    async fn categories_list_published_only() {
        let (_dir, repo) = repository().await;
        let mut cinema = new_article("cinema", &[]);
        cinema.publish = PublishMode::Now;
        repo.create_article(cinema).await.unwrap();
        repo.create_article(new_article("drafts-only", &[]))
            .await
            .unwrap();

        assert_eq!(repo.categories().await.unwrap(), vec!["cinema".to_string()]);
    }

    #[tokio::test]
    async fn scheduler_settings_persist() {
        let (_dir, repo) = repository().await;
        assert!(repo.load_scheduler_settings().await.unwrap().is_none());

        let settings = SchedulerSettings::new(false, 15).unwrap();
        repo.save_scheduler_settings(&settings).await.unwrap();
        repo.save_scheduler_settings(&settings).await.unwrap();

        assert_eq!(
            repo.load_scheduler_settings().await.unwrap(),
            Some(settings)
        );
    }

    #[test]
    fn timestamps_sort_lexically() {
        let early = Utc::now();
        let late = early + Duration::milliseconds(1500);
        assert!(encode_timestamp(&early) < encode_timestamp(&late));
        assert_eq!(encode_timestamp(&early).len(), encode_timestamp(&late).len());
        assert_eq!(
            parse_datetime(&encode_timestamp(&early)).ok(),
            Some(early.trunc_subsecs(6))
        );
        assert!(parse_datetime("2026-01-11 12:34:56").is_err());
    }

    #[tokio::test]
    async fn unreadable_timestamp_is_a_storage_error() {
        let (_dir, repo) = repository().await;
        let mut new = new_article("news", &[]);
        new.publish = PublishMode::Now;
        let id = repo.create_article(new).await.unwrap();
        repo.execute_batch("UPDATE articles SET published_at = 'yesterday-ish';")
            .await
            .unwrap();

        let err = repo.get_article(id).await.unwrap_err();
        assert!(err.is_storage());
    }
}
