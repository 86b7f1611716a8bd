use std::path::PathBuf;

use chrono::{DateTime, Utc};

mod app;
mod config;
mod db;
mod error;
mod feed;
mod models;
mod scheduler;

use app::App;
use config::Config;
use db::PublishOutcome;
use error::{AppError, Result};
use models::{Article, ArticleState, RegionCode};

#[tokio::main]
async fn main() -> Result<()> {
    // Info for our own spans unless RUST_LOG says otherwise
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("newsdesk=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let config = Config::load()?;
    let app = App::new(&config).await?;

    match args.get(1).map(String::as_str) {
        // Editor operations
        Some("--import") => {
            let path = PathBuf::from(arg(&args, 2, "--import needs a file path")?);
            let imported = app.import_articles(&path).await?;
            println!("Imported {} articles from {:?}", imported, path);
        }

        Some("--show") => {
            let id = article_id(&args)?;
            let article = app
                .repository
                .get_article(id)
                .await?
                .ok_or(AppError::ArticleNotFound(id))?;
            println!("{}", describe(&article));
        }

        Some("--schedule") => {
            let id = article_id(&args)?;
            let at = arg(&args, 3, "--schedule needs an RFC 3339 time")?;
            let at = DateTime::parse_from_rfc3339(at)
                .map_err(|e| AppError::Config(format!("invalid time {:?}: {}", at, e)))?
                .with_timezone(&Utc);
            app.repository.schedule_article(id, at).await?;
            println!("Article {} scheduled for {}", id, at);
        }

        Some("--unschedule") => {
            let id = article_id(&args)?;
            app.repository.unschedule_article(id).await?;
            println!("Article {} returned to draft", id);
        }

        Some("--delete") => {
            let id = article_id(&args)?;
            app.repository.delete_article(id).await?;
            println!("Article {} deleted", id);
        }

        // Publishing
        Some("--publish") => {
            let id = article_id(&args)?;
            match app.scheduler.publish(id).await? {
                PublishOutcome::Published { at } => {
                    println!("Article {} published at {}", id, at)
                }
                PublishOutcome::AlreadyPublished => {
                    println!("Article {} was already published", id)
                }
            }
        }

        Some("--due") => {
            let due = app.scheduler.find_due(Utc::now()).await?;
            for id in due {
                println!("{}", id);
            }
        }

        Some("--publish-due") => {
            let published = app.scheduler.run_due_now().await;
            println!("Published {} articles", published);
        }

        Some("--publish-report") => {
            let report = app.scheduler.run_due_report().await?;
            println!(
                "Pass at {}: published {} articles, {} failed",
                report.ran_at,
                report.published(),
                report.failed()
            );
            for (id, e) in report.failures() {
                eprintln!("Article {}: {}", id, e);
            }
        }

        // Scheduler settings
        Some("--status") => {
            let status = app.scheduler.status().await;
            let due = app.repository.count_due(Utc::now()).await?;
            println!(
                "Scheduler: {} (every {} min), {} articles due",
                if status.enabled { "enabled" } else { "disabled" },
                status.interval_minutes,
                due
            );
        }

        Some("--enable") => {
            let minutes = arg(&args, 2, "--enable needs an interval in minutes")?
                .parse::<u32>()
                .map_err(|e| AppError::Config(format!("invalid interval: {}", e)))?;
            app.store_scheduler_settings(true, minutes).await?;
            println!(
                "Scheduled publishing enabled, every {} min \
                 (a running daemon applies it within a minute)",
                minutes
            );
        }

        Some("--disable") => {
            let interval = app.scheduler.status().await.interval_minutes;
            app.store_scheduler_settings(false, interval).await?;
            println!("Scheduled publishing disabled (a running daemon applies it within a minute)");
        }

        // Reader queries
        Some("--feed") => {
            let category = arg(&args, 2, "--feed needs a category")?;
            let regions = args.get(3).map(String::as_str);
            let articles = app.feed.filter_query(category, regions, None).await?;
            println!("{}", serde_json::to_string_pretty(&articles)?);
        }

        Some("--categories") => {
            for category in app.feed.categories().await? {
                println!("{}", category);
            }
        }

        Some(other) => {
            return Err(AppError::Config(format!("unknown argument {:?}", other)));
        }

        None => app.run_until_shutdown().await?,
    }

    Ok(())
}

fn arg<'a>(args: &'a [String], index: usize, missing: &str) -> Result<&'a str> {
    args.get(index)
        .map(String::as_str)
        .ok_or_else(|| AppError::Config(missing.to_string()))
}

fn article_id(args: &[String]) -> Result<i64> {
    let raw = arg(args, 2, "expected an article id")?;
    raw.parse()
        .map_err(|_| AppError::Config(format!("invalid article id {:?}", raw)))
}

fn describe(article: &Article) -> String {
    let state = match article.state() {
        ArticleState::Draft => "draft".to_string(),
        ArticleState::Scheduled { at } => format!("scheduled for {}", at),
        ArticleState::Published { at } => format!("published {}", at),
    };
    let regions = match article.regions.codes() {
        None => "all regions".to_string(),
        Some(codes) => codes
            .iter()
            .map(RegionCode::as_str)
            .collect::<Vec<_>>()
            .join(", "),
    };
    format!(
        "#{} {} [{}] ({}; {})",
        article.id, article.title, article.category, state, regions
    )
}
