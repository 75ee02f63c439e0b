use anyhow::Result;
use clap::{Parser, Subcommand};
use kbguard::db::{migrate, Db};
use kbguard::http::HttpServer;
use kbguard::{Config, KnowledgeBase};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "kbguard")]
#[command(about = "Knowledge retrieval service for the support chatbot", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the chatbot and knowledge administration endpoints over HTTP
    Serve {
        /// Overrides http_server.port
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Apply migrations and check the database (default)
    Verify,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("RUST_LOG", "info")).init();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Command::Verify) {
        Command::Serve { port } => run_http_server(port).await?,
        Command::Verify => run_verification().await?,
    }

    Ok(())
}

async fn run_http_server(port: Option<u16>) -> Result<()> {
    log::info!("Starting kbguard HTTP server v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load()?;
    if !config.http_server.enabled && port.is_none() {
        log::warn!("http_server.enabled is false; starting anyway because serve was requested");
    }
    let port = port.unwrap_or(config.http_server.port);

    let knowledge = Arc::new(KnowledgeBase::open(config).await?);
    log::info!("Knowledge base ready ({} vector records)", knowledge.stats().await?.total_records);

    HttpServer::from_config(knowledge).run(port).await?;
    Ok(())
}

async fn run_verification() -> Result<()> {
    log::info!("Starting kbguard v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load()?;
    log::info!("Configuration loaded successfully");
    log::info!("Database path: {}", config.db_path().display());
    log::info!("Embedding model: {}", config.embeddings.model);
    log::info!("Generation model: {}", config.generation.model);

    let db = Db::open(config.db_path()).await?;
    let (applied, integrity) = db
        .with_connection(|conn| {
            let applied = migrate::get_applied_migrations(conn)?;
            let integrity: String = conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
            Ok((applied, integrity))
        })
        .await?;

    log::info!("{} migrations applied", applied.len());
    if integrity != "ok" {
        anyhow::bail!("Database integrity check failed: {}", integrity);
    }
    log::info!("✓ Database integrity: OK");
    Ok(())
}
