use nl2sql_repair::batch::{BatchReport, BatchRunner};
use nl2sql_repair::CancellationToken;
use nl2sql_repair::config::{ContextPolicy, EngineConfig, LlmConfig, RetryPacing};
use nl2sql_repair::execution_loop::RepairLoop;
use nl2sql_repair::llm::LlmTranslator;
use nl2sql_repair::seed;
use nl2sql_repair::store::SqliteStore;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nl2sql-repair")]
#[command(about = "Answer natural-language questions with SQL, repairing failed queries")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the sample e-commerce database
    Seed {
        /// SQLite database file
        #[arg(long, default_value = "ecommerce.db")]
        db: PathBuf,
    },
    /// Translate and run questions against a database
    Ask {
        /// Questions to answer (defaults to the demo questions)
        questions: Vec<String>,

        /// SQLite database file
        #[arg(long, default_value = "ecommerce.db")]
        db: PathBuf,

        /// JSON engine configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Attempt budget per question
        #[arg(long)]
        max_attempts: Option<u32>,

        /// Delay before each retry in milliseconds
        #[arg(long)]
        retry_delay_ms: Option<u64>,

        /// Per-attempt timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Questions processed at once
        #[arg(long)]
        concurrency: Option<usize>,

        /// Give the translator every earlier failure, not just the last one
        #[arg(long)]
        full_history: bool,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Seed { db } => seed_database(db),
        Commands::Ask {
            questions,
            db,
            config,
            max_attempts,
            retry_delay_ms,
            timeout_ms,
            concurrency,
            full_history,
            json,
        } => {
            let mut engine_config = match config {
                Some(path) => EngineConfig::load(&path)
                    .with_context(|| format!("Failed to load config from {}", path.display()))?,
                None => EngineConfig::default(),
            };
            if let Some(n) = max_attempts {
                engine_config.max_attempts = n;
            }
            if let Some(ms) = retry_delay_ms {
                engine_config.pacing = RetryPacing::fixed(Duration::from_millis(ms));
            }
            if let Some(ms) = timeout_ms {
                engine_config.attempt_timeout = Some(Duration::from_millis(ms));
            }
            if let Some(n) = concurrency {
                engine_config.max_concurrency = n;
                engine_config.max_in_flight_translations = n;
            }
            if full_history {
                engine_config.context_policy = ContextPolicy::FullHistory;
            }

            ask(questions, db, engine_config, json).await
        }
    }
}

fn seed_database(db: PathBuf) -> Result<()> {
    let store = SqliteStore::open(&db)
        .with_context(|| format!("Failed to open database {}", db.display()))?;
    seed::bootstrap(&store)?;
    println!("SQLite database {} created and populated successfully.", db.display());
    Ok(())
}

async fn ask(
    questions: Vec<String>,
    db: PathBuf,
    engine_config: EngineConfig,
    json: bool,
) -> Result<()> {
    let questions = if questions.is_empty() {
        seed::DEMO_QUESTIONS.iter().map(|q| q.to_string()).collect()
    } else {
        questions
    };

    let store = SqliteStore::open(&db)
        .with_context(|| format!("Failed to open database {}", db.display()))?;
    let schema_ddl = store.schema_ddl()?;
    if schema_ddl.is_empty() {
        warn!("Database {} has no tables; run `seed` first", db.display());
    }

    let llm_config = LlmConfig::from_env()?;
    info!("Using model {} at {}", llm_config.model, llm_config.base_url);
    let translator = LlmTranslator::new(llm_config, schema_ddl);

    let max_attempts = engine_config.max_attempts;
    let repair = RepairLoop::new(Arc::new(translator), Arc::new(store), engine_config)?;
    let runner = BatchRunner::new(repair);

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling in-flight questions");
            on_ctrl_c.cancel();
        }
    });

    let outcomes = runner
        .run_all_concurrent(&questions, max_attempts, &cancel)
        .await;
    let report = BatchReport::from_outcomes(&outcomes);

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report);
    }

    Ok(())
}
