use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use numis_ai::{OpenAiClient, Pipeline, Submission};
use numis_core::{Condition, PipelineConfig, SpotPriceTable};
use numis_store::{CoinStore, DuckStore, MemoryStore};
use numis_sync::{RestStore, SpotPriceClient};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod display;

#[derive(Parser, Debug)]
#[command(name = "numis", version, about = "Identify and value coins from two photographs")]
struct Cli {
    #[command(flatten)]
    store: StoreArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Identify a coin from photos of its two faces.
    Scan(ScanArgs),
    /// List stored coins, newest first.
    List {
        /// Print a full card per coin instead of one line each.
        #[arg(long)]
        cards: bool,
    },
    /// Delete a stored coin by id.
    Delete { id: i64 },
    /// Show the spot-price table used for material values.
    Prices {
        #[command(flatten)]
        feed: PriceArgs,
    },
}

#[derive(Args, Debug)]
struct StoreArgs {
    /// DuckDB file holding the collection.
    #[arg(long, env = "NUMIS_DB", default_value = "numis.duckdb", global = true)]
    db: PathBuf,
    /// Keep the collection in memory for this invocation only.
    #[arg(long, global = true, conflicts_with = "rest_url")]
    in_memory: bool,
    /// PostgREST base URL; takes precedence over `--db`.
    #[arg(long, env = "NUMIS_REST_URL", global = true)]
    rest_url: Option<String>,
    #[arg(long, env = "NUMIS_REST_KEY", hide_env_values = true, global = true)]
    rest_key: Option<String>,
}

#[derive(Args, Debug)]
struct PriceArgs {
    /// Spot-price feed base URL. Without it the static table is used.
    #[arg(long, env = "NUMIS_PRICE_URL")]
    price_url: Option<String>,
}

#[derive(Args, Debug)]
struct ScanArgs {
    /// Photo of the obverse.
    #[arg(long)]
    front: PathBuf,
    /// Photo of the reverse.
    #[arg(long)]
    back: PathBuf,
    /// Preservation grade: worn, fine, very-fine, mint (German grades accepted).
    #[arg(long, default_value = "fine")]
    condition: Condition,
    /// Store the result if it passes the store gate.
    #[arg(long)]
    save: bool,
    /// Store even when the gate would refuse (implies --save).
    #[arg(long)]
    force: bool,
    /// Vision model for extraction.
    #[arg(long, env = "NUMIS_MODEL")]
    model: Option<String>,
    /// Model for the reviewer pass; defaults to the extraction model.
    #[arg(long)]
    verification_model: Option<String>,
    /// OpenAI-compatible API base URL.
    #[arg(long, env = "NUMIS_API_URL", default_value = OpenAiClient::DEFAULT_BASE_URL)]
    api_url: String,
    /// API key; falls back to OPENAI_API_KEY.
    #[arg(long, env = "NUMIS_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
    #[command(flatten)]
    feed: PriceArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    info!("numis v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Scan(args) => scan(args, &cli.store).await,
        Command::List { cards } => {
            let store = open_store(&cli.store)?;
            let records = store.list_recent().await.context("listing coins")?;
            if cards {
                for record in &records {
                    display::print_coin_card(record);
                }
            } else {
                display::print_coin_list(&records);
            }
            Ok(())
        }
        Command::Delete { id } => {
            let store = open_store(&cli.store)?;
            if store.delete(id).await.with_context(|| format!("deleting coin {id}"))? {
                println!("Deleted coin #{id}.");
                Ok(())
            } else {
                bail!("no coin with id {id}")
            }
        }
        Command::Prices { feed } => {
            let timeout = PipelineConfig::default().request_timeout();
            display::print_price_table(&load_prices(&feed, timeout).await?);
            Ok(())
        }
    }
}

async fn scan(args: ScanArgs, store_args: &StoreArgs) -> anyhow::Result<()> {
    let front = std::fs::read(&args.front)
        .with_context(|| format!("reading {}", args.front.display()))?;
    let back = std::fs::read(&args.back)
        .with_context(|| format!("reading {}", args.back.display()))?;

    let mut config = PipelineConfig::default();
    if let Some(model) = args.model {
        config.verification_model = model.clone();
        config.model = model;
    }
    if let Some(model) = args.verification_model {
        config.verification_model = model;
    }

    let api_key = match args.api_key {
        Some(key) => key,
        None => std::env::var("OPENAI_API_KEY")
            .context("no API key: set NUMIS_API_KEY or OPENAI_API_KEY")?,
    };
    let timeout = config.request_timeout();
    let client = OpenAiClient::new(&args.api_url, api_key, timeout)?;
    let pipeline = Pipeline::new(client, config);

    let outcome = pipeline
        .run(Submission {
            front: &front,
            back: &back,
            condition: args.condition,
        })
        .await
        .context("identifying coin")?;

    let prices = load_prices(&args.feed, timeout).await?;
    let record = outcome.to_record(&prices);
    display::print_scan_card(&outcome, &record);

    if !(args.save || args.force) {
        return Ok(());
    }
    if !outcome.may_persist(args.force) {
        warn!(
            confidence = outcome.observation.confidence,
            auto_approved = outcome.auto_approved,
            "not saved: below the store gate"
        );
        println!("Not saved: confidence too low or flagged by the reviewer. Use --force to save anyway.");
        return Ok(());
    }

    let store = open_store(store_args)?;
    let id = store.insert(&record).await.context("saving coin")?;
    println!("Saved as #{id}.");
    Ok(())
}

fn open_store(args: &StoreArgs) -> anyhow::Result<Box<dyn CoinStore>> {
    if let Some(url) = &args.rest_url {
        let key = args
            .rest_key
            .clone()
            .context("NUMIS_REST_KEY is required with a REST store")?;
        let timeout = PipelineConfig::default().request_timeout();
        info!(url = %url, "using REST coin store");
        return Ok(Box::new(RestStore::new(url, key, timeout)?));
    }
    if args.in_memory {
        return Ok(Box::new(MemoryStore::new()));
    }
    let store = DuckStore::open_persistent(&args.db)
        .with_context(|| format!("opening {}", args.db.display()))?;
    Ok(Box::new(store))
}

async fn load_prices(args: &PriceArgs, timeout: Duration) -> anyhow::Result<SpotPriceTable> {
    match &args.price_url {
        Some(url) => Ok(SpotPriceClient::new(url, timeout)?.refresh().await),
        None => Ok(SpotPriceTable::fallback()),
    }
}
