//! Line-oriented operator commands against the crawl backend.

use anyhow::Context as _;

use crate::api::{Backend, HttpBackend, NewCrawler};
use crate::app::wizard;
use crate::cli::{CrawlerIdArgs, CreateCrawlerArgs, SourceFieldsArgs, WatchArgs};
use crate::config::ConsoleConfig;
use crate::events::{ConnectionState, LiveStatus, StatusWatcher, WatchPolicy, WatchUpdate};
use crate::model::StreamEvent;

fn backend(config: &ConsoleConfig) -> anyhow::Result<HttpBackend> {
    HttpBackend::new(&config.backend).context("build backend client")
}

pub async fn list_crawlers(config: &ConsoleConfig) -> anyhow::Result<()> {
    let crawlers = backend(config)?
        .list_crawlers()
        .await
        .context("list crawlers")?;

    for crawler in crawlers {
        let crawled = crawler
            .latest_crawl_job()
            .map(|job| job.crawled_url_count)
            .unwrap_or(0);
        println!(
            "{}\t{}\t{}\t{}\t{} urls",
            crawler.id,
            crawler.simple_state.as_str(),
            crawler.name,
            crawler.start_url,
            crawled
        );
    }
    Ok(())
}

pub async fn create_crawler(args: CreateCrawlerArgs, config: &ConsoleConfig) -> anyhow::Result<()> {
    let backend = backend(config)?;

    let start_url = match args.start_url.filter(|url| !url.trim().is_empty()) {
        Some(url) => url,
        None => {
            let source = backend
                .get_source_item(&args.source)
                .await
                .context("fetch source item")?;
            source.default_start_url().ok_or_else(|| {
                anyhow::anyhow!(
                    "source item {} has no default start url; pass --start-url",
                    args.source
                )
            })?
        }
    };

    let crawler = backend
        .create_crawler(&NewCrawler {
            name: args.name,
            source_item: args.source,
            start_url,
        })
        .await
        .context("create crawler")?;

    println!("created crawler {} ({})", crawler.id, crawler.name);
    println!("next: {}", wizard::next_route_after_create(crawler.id));
    Ok(())
}

pub async fn delete_crawler(args: CrawlerIdArgs, config: &ConsoleConfig) -> anyhow::Result<()> {
    backend(config)?
        .delete_crawler(args.id)
        .await
        .context("delete crawler")?;
    println!("deleted crawler {}", args.id);
    Ok(())
}

pub async fn start_crawl(args: CrawlerIdArgs, config: &ConsoleConfig) -> anyhow::Result<()> {
    let job = backend(config)?
        .start_crawl(args.id)
        .await
        .context("start crawl")?;
    println!("started crawl job {} for crawler {}", job.id, args.id);
    Ok(())
}

pub async fn start_content_crawl(
    args: CrawlerIdArgs,
    config: &ConsoleConfig,
) -> anyhow::Result<()> {
    let job = backend(config)?
        .start_content_crawl(args.id)
        .await
        .context("start content crawl")?;
    println!("started content crawl job {} for crawler {}", job.id, args.id);
    Ok(())
}

pub async fn list_sources(config: &ConsoleConfig) -> anyhow::Result<()> {
    let items = backend(config)?
        .list_source_items()
        .await
        .context("list source items")?;

    for item in items {
        let url = item.default_start_url().unwrap_or_default();
        println!("{}\t{}\t{}\t{url}", item.id, item.guid, item.title);
    }
    Ok(())
}

pub async fn show_fields(args: SourceFieldsArgs, config: &ConsoleConfig) -> anyhow::Result<()> {
    let catalog = backend(config)?
        .inheritable_fields(&args.guid)
        .await
        .context("fetch inheritable fields")?;

    for group in &catalog.groups {
        let width = if group.spans_full_width() { "full" } else { "half" };
        println!("{} ({width} width)", group.display);

        for field_id in &group.fields {
            let Some(field) = catalog.fields.iter().find(|f| &f.id == field_id) else {
                continue;
            };
            let marker = if field.recommended { "*" } else { " " };
            let missing = if field.is_missing() { " (missing)" } else { "" };
            println!("  [{marker}] {} — {}{missing}", field.id, field.caption);
        }
    }
    Ok(())
}

/// Print stream updates until the watcher gives up, the stream closes, or
/// the user interrupts.
pub async fn watch(args: WatchArgs, config: &ConsoleConfig) -> anyhow::Result<()> {
    let (watcher, mut rx) =
        StatusWatcher::spawn(&config.backend, args.id, WatchPolicy::default())
            .context("spawn status watcher")?;

    let mut status = LiveStatus::default();
    loop {
        let update = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            update = rx.recv() => match update {
                Some(update) => update,
                None => break,
            },
        };
        status.apply(&update);

        match &update {
            WatchUpdate::State { state } => {
                println!("connection: {}", state.as_str());
                if *state == ConnectionState::GaveUp {
                    break;
                }
            }
            WatchUpdate::Event {
                event:
                    StreamEvent::CrawlJobUpdate {
                        crawl_job,
                        current_url,
                        ..
                    },
            } => {
                let current = current_url.as_deref().unwrap_or("-");
                println!(
                    "job {} [{}] crawled {} urls, at {current}",
                    crawl_job.id, crawl_job.state, crawl_job.crawled_url_count
                );
            }
            WatchUpdate::Event {
                event: StreamEvent::Error { message, .. },
            } => {
                println!("stream error: {message}");
            }
        }
    }

    watcher.close().await;
    Ok(())
}
