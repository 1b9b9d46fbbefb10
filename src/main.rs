use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

use crawlboard::cli::{Command, CrawlersCommand, SourcesCommand};
use crawlboard::config::ConsoleConfig;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    crawlboard::logging::init().context("init logging")?;

    let cli = crawlboard::cli::Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    let config = ConsoleConfig::load(cli.config.as_deref()).context("load config")?;

    match cli.command {
        Command::Serve(args) => {
            crawlboard::app::server::run(args, config)
                .await
                .context("serve")?;
        }
        Command::Crawlers {
            command: CrawlersCommand::List,
        } => {
            crawlboard::console::list_crawlers(&config)
                .await
                .context("crawlers list")?;
        }
        Command::Crawlers {
            command: CrawlersCommand::Create(args),
        } => {
            crawlboard::console::create_crawler(args, &config)
                .await
                .context("crawlers create")?;
        }
        Command::Crawlers {
            command: CrawlersCommand::Delete(args),
        } => {
            crawlboard::console::delete_crawler(args, &config)
                .await
                .context("crawlers delete")?;
        }
        Command::Crawlers {
            command: CrawlersCommand::Start(args),
        } => {
            crawlboard::console::start_crawl(args, &config)
                .await
                .context("crawlers start")?;
        }
        Command::Crawlers {
            command: CrawlersCommand::StartContent(args),
        } => {
            crawlboard::console::start_content_crawl(args, &config)
                .await
                .context("crawlers start-content")?;
        }
        Command::Sources {
            command: SourcesCommand::List,
        } => {
            crawlboard::console::list_sources(&config)
                .await
                .context("sources list")?;
        }
        Command::Sources {
            command: SourcesCommand::Fields(args),
        } => {
            crawlboard::console::show_fields(args, &config)
                .await
                .context("sources fields")?;
        }
        Command::Watch(args) => {
            crawlboard::console::watch(args, &config).await.context("watch")?;
        }
    }

    Ok(())
}
