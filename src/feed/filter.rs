use std::collections::BTreeSet;
use std::sync::Arc;

use crate::db::Repository;
use crate::error::Result;
use crate::models::{parse_region_codes, Article, RegionCode};

/// Reader-facing article lists scoped by category and reader region.
pub struct ContentFilter {
    repository: Arc<Repository>,
    default_page_size: u32,
    max_page_size: u32,
}

impl ContentFilter {
    pub fn new(repository: Arc<Repository>, default_page_size: u32, max_page_size: u32) -> Self {
        Self {
            repository,
            default_page_size,
            max_page_size,
        }
    }

    /// Published articles in `category`, newest first.
    ///
    /// With no reader regions every article in the category is returned.
    /// Otherwise an article matches when it is universal or shares at least
    /// one region with the reader. Unknown regions and categories simply match
    /// nothing.
    pub async fn filter(
        &self,
        category: &str,
        regions: &BTreeSet<RegionCode>,
        limit: u32,
    ) -> Result<Vec<Article>> {
        let limit = limit.min(self.max_page_size);
        if limit == 0 {
            return Ok(Vec::new());
        }

        let articles = if regions.is_empty() {
            self.repository.published_in_category(category, limit).await?
        } else {
            self.repository
                .published_in_category_for_regions(category, regions, limit)
                .await?
        };

        tracing::debug!(
            category,
            regions = regions.len(),
            limit,
            returned = articles.len(),
            "Filtered articles"
        );
        Ok(articles)
    }

    /// Entry point for query-string input: `regions` is the raw
    /// comma-separated list, `limit` falls back to the default page size.
    pub async fn filter_query(
        &self,
        category: &str,
        regions: Option<&str>,
        limit: Option<u32>,
    ) -> Result<Vec<Article>> {
        let regions = regions.map(parse_region_codes).unwrap_or_default();
        let limit = limit.unwrap_or(self.default_page_size);
        self.filter(category, &regions, limit).await
    }

    pub async fn categories(&self) -> Result<Vec<String>> {
        self.repository.categories().await
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, Utc};

    use super::*;
    use crate::db::testing::{new_article, repository};
    use crate::models::PublishMode;

    async fn published(
        repo: &Repository,
        category: &str,
        regions: &[&str],
        at: DateTime<Utc>,
    ) -> i64 {
        let id = repo
            .create_article(new_article(category, regions))
            .await
            .unwrap();
        repo.publish(id, at).await.unwrap();
        id
    }

    fn ids(articles: &[Article]) -> Vec<i64> {
        articles.iter().map(|a| a.id).collect()
    }

    fn codes(raw: &str) -> BTreeSet<RegionCode> {
        parse_region_codes(raw)
    }

    struct StatePolitics {
        _dir: tempfile::TempDir,
        filter: ContentFilter,
        a: i64,
        b: i64,
        c: i64,
    }

    // A(universal) newest, then B(ap), then C(mh)
    async fn state_politics() -> StatePolitics {
        let (dir, repo) = repository().await;
        let now = Utc::now();
        let c = published(&repo, "state-politics", &["mh"], now - Duration::hours(3)).await;
        let b = published(&repo, "state-politics", &["ap"], now - Duration::hours(2)).await;
        let a = published(&repo, "state-politics", &[], now - Duration::hours(1)).await;
        let filter = ContentFilter::new(Arc::new(repo), 20, 100);
        StatePolitics {
            _dir: dir,
            filter,
            a,
            b,
            c,
        }
    }

    #[tokio::test]
    async fn region_scenario() {
        let s = state_politics().await;

        let ap = s.filter.filter("state-politics", &codes("ap"), 10).await.unwrap();
        assert_eq!(ids(&ap), vec![s.a, s.b]);

        let all = s.filter.filter("state-politics", &codes(""), 10).await.unwrap();
        assert_eq!(ids(&all), vec![s.a, s.b, s.c]);
    }

    #[tokio::test]
    async fn universal_articles_are_always_visible() {
        let s = state_politics().await;
        for reader in ["ap", "ts", ""] {
            let articles = s
                .filter
                .filter("state-politics", &codes(reader), 10)
                .await
                .unwrap();
            assert!(ids(&articles).contains(&s.a), "missing for {:?}", reader);
        }
    }

    #[tokio::test]
    async fn scoped_articles_need_a_shared_region() {
        let s = state_politics().await;

        let other = s
            .filter
            .filter("state-politics", &codes("ap,ts"), 10)
            .await
            .unwrap();
        assert!(!ids(&other).contains(&s.c));

        let mh = s
            .filter
            .filter("state-politics", &codes("MH"), 10)
            .await
            .unwrap();
        assert_eq!(ids(&mh), vec![s.a, s.c]);
    }

    #[tokio::test]
    async fn empty_regions_bypass_filtering() {
        let s = state_politics().await;
        let bypass = s
            .filter
            .filter("state-politics", &BTreeSet::new(), 10)
            .await
            .unwrap();
        let unfiltered = s
            .filter
            .repository
            .published_in_category("state-politics", 10)
            .await
            .unwrap();
        assert_eq!(ids(&bypass), ids(&unfiltered));
    }

    #[tokio::test]
    async fn unknown_inputs_match_nothing() {
        let s = state_politics().await;

        let unknown_region = s
            .filter
            .filter("state-politics", &codes("zz"), 10)
            .await
            .unwrap();
        assert_eq!(ids(&unknown_region), vec![s.a]);

        let unknown_category = s.filter.filter("cricket", &codes("ap"), 10).await.unwrap();
        assert!(unknown_category.is_empty());
    }

    #[tokio::test]
    async fn limit_is_applied_and_clamped() {
        let (_dir, repo) = repository().await;
        let now = Utc::now();
        let mut newest = Vec::new();
        for minutes in 0..5 {
            newest.push(published(&repo, "cinema", &[], now - Duration::minutes(minutes)).await);
        }
        let filter = ContentFilter::new(Arc::new(repo), 2, 3);

        let two = filter.filter("cinema", &BTreeSet::new(), 2).await.unwrap();
        assert_eq!(ids(&two), newest[..2].to_vec());

        let clamped = filter.filter("cinema", &BTreeSet::new(), 50).await.unwrap();
        assert_eq!(clamped.len(), 3);

        assert!(filter.filter("cinema", &BTreeSet::new(), 0).await.unwrap().is_empty());

        let defaulted = filter.filter_query("cinema", None, None).await.unwrap();
        assert_eq!(defaulted.len(), 2);
    }

    #[tokio::test]
    async fn unpublished_articles_are_hidden() {
        let (_dir, repo) = repository().await;
        repo.create_article(new_article("cinema", &[])).await.unwrap();
        let mut scheduled = new_article("cinema", &["ap"]);
        scheduled.publish = PublishMode::Scheduled(Utc::now() + Duration::hours(1));
        repo.create_article(scheduled).await.unwrap();
        let live = published(&repo, "cinema", &["ap"], Utc::now()).await;

        let filter = ContentFilter::new(Arc::new(repo), 20, 100);
        let articles = filter.filter_query("cinema", Some("ap"), None).await.unwrap();
        assert_eq!(ids(&articles), vec![live]);
        assert_eq!(filter.categories().await.unwrap(), vec!["cinema".to_string()]);
    }
}
