use search_engine::cli::{Cli, Commands};
use search_engine::config::{AppConfig, ConfigError};
use search_engine::logging::init_logging;
use search_engine::orchestration::{build_engine, setup_shutdown_handler, BuildError};
use search_engine::run_controller::IndexingError;
use search_engine::search::SearchError;
use search_engine::store::StoreError;
use search_engine::url_utils::normalize_url_for_cli;
use std::path::Path;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum MainError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Build(#[from] BuildError),

    #[error("Indexing error: {0}")]
    Indexing(#[from] IndexingError),

    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Output error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Logging setup failed: {0}")]
    Logging(String),

    #[error("Indexing run was aborted: {0}")]
    Join(#[from] tokio::task::JoinError),
}

fn load_config(path: &Path) -> Result<AppConfig, MainError> {
    let config = AppConfig::from_file(path)?;
    init_logging(config.storage.log_dir()).map_err(|e| MainError::Logging(e.to_string()))?;
    Ok(config)
}

async fn run_index_command(config: AppConfig) -> Result<(), MainError> {
    let controller = build_engine(&config).await?;
    let handle = controller.start_run()?;
    let _signal_handler = setup_shutdown_handler(controller.clone());

    let report = handle.await?;
    for site in &report.sites {
        match &site.error {
            Some(error) => println!("{} {} ({})", site.status, site.url, error),
            None => println!("{} {} ({} pages)", site.status, site.url, site.pages_indexed),
        }
    }
    if report.stopped {
        println!("Indexing stopped by user");
    }
    Ok(())
}

async fn run_index_page_command(config: AppConfig, url: String) -> Result<(), MainError> {
    let url = normalize_url_for_cli(&url);
    let controller = build_engine(&config).await?;
    let outcome = controller.index_single_page(&url).await?;
    println!(
        "Indexed {} ({} lemmas, {} new)",
        url, outcome.merge.indexed, outcome.merge.created
    );
    Ok(())
}

async fn run_search_command(
    config: AppConfig,
    query: String,
    site: Option<String>,
    offset: usize,
    limit: Option<usize>,
) -> Result<(), MainError> {
    let controller = build_engine(&config).await?;
    let site = site.map(|s| normalize_url_for_cli(&s));
    let results = controller.search(&query, site.as_deref(), offset, limit)?;
    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}

async fn run_stats_command(config: AppConfig) -> Result<(), MainError> {
    let controller = build_engine(&config).await?;
    let stats = controller.statistics()?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

fn run_init_config_command(path: &Path) -> Result<(), MainError> {
    if AppConfig::write_default(path)? {
        println!("Wrote default config to {}", path.display());
    } else {
        println!("{} already exists, leaving it untouched", path.display());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), MainError> {
    let cli = Cli::parse_args();

    if let Commands::InitConfig = cli.command {
        return run_init_config_command(&cli.config);
    }

    let config = load_config(&cli.config)?;
    info!("Loaded config from {}", cli.config.display());

    match cli.command {
        Commands::Index => run_index_command(config).await?,
        Commands::IndexPage { url } => run_index_page_command(config, url).await?,
        Commands::Search {
            query,
            site,
            offset,
            limit,
        } => run_search_command(config, query, site, offset, limit).await?,
        Commands::Stats => run_stats_command(config).await?,
        Commands::InitConfig => {}
    }

    Ok(())
}
