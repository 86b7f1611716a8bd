use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::RegionScope;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: i64,
    pub title: String,
    pub summary: Option<String>,
    pub body: String,
    pub category: String,
    pub regions: RegionScope,
    pub is_published: bool,
    pub is_scheduled: bool,
    pub scheduled_publish_at: Option<DateTime<Utc>>,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Lifecycle state derived from the visibility flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArticleState {
    Draft,
    Scheduled { at: DateTime<Utc> },
    Published { at: DateTime<Utc> },
}

impl Article {
    pub fn state(&self) -> ArticleState {
        match (self.is_published, self.is_scheduled, self.scheduled_publish_at) {
            (true, _, _) => ArticleState::Published {
                at: self.published_at.unwrap_or(self.updated_at),
            },
            (false, true, Some(at)) => ArticleState::Scheduled { at },
            _ => ArticleState::Draft,
        }
    }
}

/// How a newly created article enters the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishMode {
    #[default]
    Draft,
    Scheduled(DateTime<Utc>),
    Now,
}

/// Editor input for a new article. Region codes are validated against the
/// configured catalog on insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewArticle {
    pub title: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub body: String,
    pub category: String,
    #[serde(default)]
    pub regions: Vec<String>,
    #[serde(default)]
    pub publish: PublishMode,
}
