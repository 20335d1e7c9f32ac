use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use verity::checks::judge::JudgeAdvisor;
use verity::checks::llm::LlmEvaluator;
use verity::content::HttpContentSource;
use verity::pipeline::orchestrator::Orchestrator;
use verity::pipeline::router::default_rules;
use verity::pipeline::steps::StepRegistry;
use verity::server::{start_server, ServerConfig};
use verity::settings::Settings;
use verity::store::RunStore;

#[derive(Parser)]
#[command(name = "verity", about = "Content validation pipeline server", version)]
struct Cli {
    /// Verbose logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the validation API server
    Serve {
        /// Port to listen on (default from VERITY_PORT)
        #[arg(long)]
        port: Option<u16>,

        /// SQLite database path (default from VERITY_DB_PATH)
        #[arg(long)]
        db: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("verity={}", default_level))),
        )
        .init();

    match cli.command {
        Command::Serve { port, db } => {
            let mut settings = Settings::from_env()?;
            if let Some(port) = port {
                settings.port = port;
            }
            if let Some(db) = db {
                settings.db_path = db;
            }
            serve(settings).await
        }
    }
}

async fn serve(settings: Settings) -> Result<()> {
    let evaluator = Arc::new(LlmEvaluator::new(
        settings.openai_base_url.clone(),
        settings.openai_api_key.clone(),
        settings.openai_model.clone(),
        settings.evaluator_timeout,
    )?);

    let judge = settings
        .judge_enabled
        .then(|| JudgeAdvisor::new(evaluator.clone()));

    let orchestrator = Arc::new(Orchestrator::new(
        StepRegistry::standard(evaluator),
        default_rules(&settings.lifestyle_patterns),
        Arc::new(HttpContentSource::new(settings.fetch_timeout)?),
        judge,
        RunStore::open(Path::new(&settings.db_path))?,
    ));

    start_server(
        ServerConfig {
            host: settings.host.clone(),
            port: settings.port,
        },
        orchestrator,
    )
    .await
}
