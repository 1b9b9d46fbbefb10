use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to the console config file (YAML).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Serve the browser console.
    Serve(ServeArgs),
    /// Manage crawlers on the backend.
    Crawlers {
        #[command(subcommand)]
        command: CrawlersCommand,
    },
    /// Inspect source items and their inheritable fields.
    Sources {
        #[command(subcommand)]
        command: SourcesCommand,
    },
    /// Follow a crawler's live status stream.
    Watch(WatchArgs),
}

#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Listen address (overrides the config file).
    #[arg(long)]
    pub addr: Option<SocketAddr>,
}

#[derive(Debug, Subcommand)]
pub enum CrawlersCommand {
    List,
    Create(CreateCrawlerArgs),
    Delete(CrawlerIdArgs),
    Start(CrawlerIdArgs),
    StartContent(CrawlerIdArgs),
}

#[derive(Debug, Args)]
pub struct CreateCrawlerArgs {
    /// Crawler name.
    #[arg(long)]
    pub name: String,

    /// Guid of the source item the crawler is bound to.
    #[arg(long)]
    pub source: String,

    /// Start URL; defaults to the source item's own URL.
    #[arg(long)]
    pub start_url: Option<String>,
}

#[derive(Debug, Args)]
pub struct CrawlerIdArgs {
    /// Crawler id.
    pub id: i64,
}

#[derive(Debug, Subcommand)]
pub enum SourcesCommand {
    List,
    Fields(SourceFieldsArgs),
}

#[derive(Debug, Args)]
pub struct SourceFieldsArgs {
    /// Source item guid.
    pub guid: String,
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Crawler id.
    pub id: i64,
}
