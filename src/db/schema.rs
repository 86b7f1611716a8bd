pub const SCHEMA: &str = r#"
-- articles table
-- Timestamps are fixed-width RFC 3339 UTC text so string order is time order.
CREATE TABLE IF NOT EXISTS articles (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    summary TEXT,
    body TEXT NOT NULL DEFAULT '',
    category TEXT NOT NULL,
    regions TEXT,
    is_published INTEGER NOT NULL DEFAULT 0,
    is_scheduled INTEGER NOT NULL DEFAULT 0,
    scheduled_publish_at TEXT,
    published_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    CHECK (NOT (is_scheduled = 1 AND (is_published = 1 OR scheduled_publish_at IS NULL))),
    CHECK (is_published = 0 OR published_at IS NOT NULL)
);

CREATE INDEX IF NOT EXISTS idx_articles_category_published
    ON articles(category, is_published, published_at DESC);
CREATE INDEX IF NOT EXISTS idx_articles_due
    ON articles(scheduled_publish_at) WHERE is_scheduled = 1;

-- settings table (admin-controlled values that outlive the process)
CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;
