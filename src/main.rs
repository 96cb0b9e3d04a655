use ads_copilot::{
    dataset::load_csv, CampaignDataset, ColumnMapping, CopilotConfig, LlmClient, QueryExecutor, QueryRouter,
    SqliteStore,
};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ads-copilot")]
#[command(about = "Ask natural-language questions about advertising performance data")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// SQLite database file (or set COPILOT_DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// JSON config file; environment variables take precedence
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Column mapping override, e.g. --map cost="Amount Spent" (repeatable)
    #[arg(long = "map", global = true, value_name = "FIELD=COLUMN")]
    mappings: Vec<String>,

    /// Skip persisting the dataset; every query runs in memory
    #[arg(long, global = true)]
    no_store: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask one question about a CSV file
    Ask {
        csv_file: PathBuf,
        question: String,

        /// Print the full answer record as JSON
        #[arg(long)]
        json: bool,
    },
    /// Ask questions interactively
    Chat { csv_file: PathBuf },
    /// Print the context summary used to ground analysis
    Summary { csv_file: PathBuf },
    /// Run a read-only SQL query against the uploaded table
    Sql {
        csv_file: PathBuf,
        query: String,

        #[arg(long, value_enum, default_value_t = OutputFormat::Markdown)]
        format: OutputFormat,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Markdown,
    Csv,
    Json,
}

struct Session {
    dataset: CampaignDataset,
    router: QueryRouter,
    store: Option<Arc<SqliteStore>>,
}

impl Session {
    fn close(self) {
        let Session { router, store, .. } = self;
        drop(router);
        if let Some(store) = store {
            match Arc::try_unwrap(store) {
                Ok(store) => store.close(),
                Err(_) => warn!("Store still in use at shutdown"),
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match &args.command {
        Commands::Ask { csv_file, question, json } => {
            let session = open_session(&args, csv_file)?;
            let answer = session.router.answer(question, &session.dataset).await;
            if *json {
                println!("{}", serde_json::to_string_pretty(&answer)?);
            } else {
                println!("{}", answer.display_text());
            }
            let failed = !answer.is_success();
            session.close();
            if failed {
                bail!("question could not be answered");
            }
            Ok(())
        }
        Commands::Chat { csv_file } => {
            let session = open_session(&args, csv_file)?;
            run_chat(&session).await?;
            session.close();
            Ok(())
        }
        Commands::Summary { csv_file } => {
            let session = open_session(&args, csv_file)?;
            let summary = session
                .router
                .assembler()
                .assemble(&session.dataset, session.router.executor());
            println!("{}", summary.to_json()?);
            session.close();
            Ok(())
        }
        Commands::Sql { csv_file, query, format } => {
            let session = open_session(&args, csv_file)?;
            let result = session
                .router
                .executor()
                .execute(query, Some(session.dataset.frame()))?;
            for warning in &result.warnings {
                warn!("{}", warning);
            }
            match format {
                OutputFormat::Markdown => println!("{}", result.to_markdown()),
                OutputFormat::Csv => print!("{}", result.to_csv()?),
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result.to_json())?),
            }
            session.close();
            Ok(())
        }
    }
}

fn open_session(args: &Args, csv_file: &Path) -> Result<Session> {
    let mut config = CopilotConfig::load(args.config.as_deref())?;
    if let Some(db) = &args.db {
        config.db_path = db.clone();
    }

    let frame = load_csv(csv_file).with_context(|| format!("Failed to load {:?}", csv_file))?;
    let mut mapping = ColumnMapping::detect(&frame.get_column_names());
    for entry in &args.mappings {
        mapping = mapping.apply_override(entry)?;
    }
    for (field, column) in mapping.describe() {
        info!("Column mapping: {} -> {}", field, column);
    }
    let dataset = CampaignDataset::new(frame, mapping)?;

    let (executor, store) = if args.no_store {
        info!("Persisted store disabled; using in-memory evaluation");
        (QueryExecutor::in_memory(), None)
    } else {
        let store = Arc::new(SqliteStore::open(&config.db_path)?);
        let executor = QueryExecutor::for_upload(store.clone(), dataset.frame());
        (executor, Some(store))
    };

    let generator = LlmClient::new(config.api_key.clone(), config.model.clone(), config.base_url.clone())
        .with_temperature(config.temperature)
        .with_timeout(config.request_timeout());
    let router = QueryRouter::new(executor, Arc::new(generator), config.router_settings());

    Ok(Session { dataset, router, store })
}

async fn run_chat(session: &Session) -> Result<()> {
    println!(
        "Loaded {} rows. Ask a question, or type 'exit' to quit.",
        session.dataset.row_count()
    );
    let stdin = std::io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next() else { break };
        let question = line?;
        let question = question.trim();
        if question.is_empty() {
            continue;
        }
        if matches!(question, "exit" | "quit") {
            break;
        }
        let answer = session.router.answer(question, &session.dataset).await;
        println!("\n{}\n", answer.display_text());
    }
    Ok(())
}
