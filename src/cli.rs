use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::CONFIG_FILE_NAME;

/// Command line surface of the search engine.
/// Exit codes: 0=success, 2=invalid arguments, 1=runtime error
#[derive(Parser, Debug)]
#[command(name = "search_engine")]
#[command(about = "Crawls configured sites into a lemma index and searches it")]
#[command(version)]
pub struct Cli {
    #[arg(
        short,
        long,
        global = true,
        default_value = CONFIG_FILE_NAME,
        help = "Path to the TOML config file"
    )]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Crawl and index every configured site. Ctrl+C stops the run.
    Index,

    /// Fetch one page of a configured site and replace its index entries.
    IndexPage {
        #[arg(short, long, help = "Absolute URL of the page")]
        url: String,
    },

    /// Search the index and print results as JSON.
    Search {
        #[arg(short, long, help = "Words to look for")]
        query: String,

        #[arg(short, long, help = "Restrict results to this site root")]
        site: Option<String>,

        #[arg(long, default_value_t = 0, help = "Results to skip")]
        offset: usize,

        #[arg(short, long, help = "Results to return (default from config)")]
        limit: Option<usize>,
    },

    /// Print site, page and lemma counts as JSON.
    Stats,

    /// Write a commented default config file.
    InitConfig,
}

impl Cli {
    /// Parse CLI arguments; on error clap prints help and exits with code 2.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
