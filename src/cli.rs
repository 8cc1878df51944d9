use clap::{Parser, Subcommand};
use serde_json::Value;
use std::io::{self, Read};
use std::path::Path;

use sku_grouper::catalog::Catalog;
use sku_grouper::config::EngineContext;
use sku_grouper::model::ProductId;
use sku_grouper::ops;

#[derive(Parser)]
#[command(
    name = "sku-grouper",
    version,
    about = "Product-catalog deduplication and SKU grouping engine"
)]
struct Cli {
    /// Engine configuration JSON (overrides $SKU_GROUPER_CONFIG and the XDG file)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Catalog state file; read before and written after every mutating command
    #[arg(long, global = true)]
    state: Option<String>,

    /// SQLite representation cache (requires the `cache` feature)
    #[arg(long, global = true)]
    cache: Option<String>,

    /// Log level when RUST_LOG is unset: error, warn, info, debug, trace
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Group products read from stdin (records or a {headers, rows} table)
    Aggregate {
        /// 0 = loose, 1 = strict (default from config)
        #[arg(short, long)]
        strictness: Option<f64>,
    },
    /// Dissolve groups rated below 3 and regroup their members
    Reaggregate {
        #[arg(short, long)]
        strictness: Option<f64>,
    },
    /// Regroup only the given products
    Slice {
        /// Comma-separated product ids
        #[arg(long, value_delimiter = ',', required = true)]
        ids: Vec<ProductId>,
        #[arg(short, long)]
        strictness: Option<f64>,
    },
    /// Move a product into another group
    Move {
        product_id: ProductId,
        group_id: String,
    },
    /// Put a product into its own manual group
    Detach { product_id: ProductId },
    /// Record a 1-5 moderator score for a group
    Rate { group_id: String, score: i64 },
    /// Place one product read from stdin into the catalog
    Insert {
        #[arg(short, long)]
        strictness: Option<f64>,
    },
    /// Print the group mapping of the state file
    Groups,
    /// Annotate stdin products with fingerprint, signature, model and brand
    Fingerprint,
    /// Significant characteristic keys per category for stdin products
    Features,
    /// Parse a raw characteristics string
    #[command(name = "parse-characteristics")]
    ParseCharacteristics { raw: String },
    /// Canonical spelling of a manufacturer name
    #[command(name = "normalize-brand")]
    NormalizeBrand { raw: String },
    /// Compute string similarity between two strings
    Similarity {
        a: String,
        b: String,
        /// Metric: levenshtein, jaro-winkler, cosine, signature
        #[arg(short, long, default_value = "signature")]
        metric: String,
        /// Compute all metrics at once
        #[arg(short, long)]
        all: bool,
    },
    /// Inspect or clear the representation cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// List cached batches
    Info,
    /// Delete every cached batch
    Clear,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let ctx = EngineContext::resolve(cli.config.as_deref()).unwrap_or_else(|e| fail(&e.to_string()));
    let strictness_or = |s: Option<f64>| s.unwrap_or(ctx.config.strictness);

    let result = match cli.command {
        Commands::Aggregate { strictness } => {
            let input = read_stdin_json();
            let mut catalog = open_catalog(&cli, false);
            let out = ops::op_aggregate(&mut catalog, &input, strictness_or(strictness), &ctx);
            save_on_success(&cli, &catalog, out)
        }
        Commands::Reaggregate { strictness } => {
            let mut catalog = open_catalog(&cli, true);
            let out = ops::op_reaggregate(&mut catalog, strictness_or(strictness), &ctx);
            save_on_success(&cli, &catalog, out)
        }
        Commands::Slice { ref ids, strictness } => {
            let mut catalog = open_catalog(&cli, true);
            let out = ops::op_slice(&mut catalog, ids, strictness_or(strictness), &ctx);
            save_on_success(&cli, &catalog, out)
        }
        Commands::Move {
            product_id,
            ref group_id,
        } => {
            let mut catalog = open_catalog(&cli, true);
            let out = ops::op_move(&mut catalog, product_id, group_id);
            save_on_success(&cli, &catalog, out)
        }
        Commands::Detach { product_id } => {
            let mut catalog = open_catalog(&cli, true);
            let out = ops::op_detach(&mut catalog, product_id);
            save_on_success(&cli, &catalog, out)
        }
        Commands::Rate { ref group_id, score } => {
            let mut catalog = open_catalog(&cli, true);
            let out = ops::op_rate(&mut catalog, group_id, score);
            save_on_success(&cli, &catalog, out)
        }
        Commands::Insert { strictness } => {
            let record = read_stdin_json();
            let mut catalog = open_catalog(&cli, true);
            let out = ops::op_insert(&mut catalog, &record, strictness_or(strictness), &ctx);
            save_on_success(&cli, &catalog, out)
        }
        Commands::Groups => Ok(ops::op_groups(&open_catalog(&cli, true))),
        Commands::Fingerprint => ops::op_fingerprint(&read_stdin_json(), &ctx),
        Commands::Features => ops::op_features(&read_stdin_json(), &ctx),
        Commands::ParseCharacteristics { ref raw } => Ok(ops::op_parse_characteristics(raw)),
        Commands::NormalizeBrand { ref raw } => Ok(ops::op_normalize_brand(raw, &ctx)),
        Commands::Similarity {
            ref a,
            ref b,
            ref metric,
            all,
        } => ops::op_similarity(a, b, metric, all),
        Commands::Cache { ref action } => {
            let path = cli
                .cache
                .as_deref()
                .unwrap_or_else(|| fail("cache commands require --cache <path>"));
            match action {
                CacheAction::Info => ops::op_cache_info(path),
                CacheAction::Clear => ops::op_cache_clear(path),
            }
        }
    };

    match result {
        Ok(value) => print_json(&value),
        Err(e) => fail(&e),
    }
}

/// Log to stderr so stdout stays pure JSON. RUST_LOG wins over --log-level.
fn init_tracing(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn fail(message: &str) -> ! {
    eprintln!("Error: {message}");
    std::process::exit(1);
}

fn read_stdin_json() -> Value {
    let mut buf = String::new();
    if let Err(e) = io::stdin().read_to_string(&mut buf) {
        fail(&format!("failed to read stdin: {e}"));
    }
    serde_json::from_str(&buf).unwrap_or_else(|e| fail(&format!("invalid JSON on stdin: {e}")))
}

fn print_json(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{s}"),
        Err(e) => fail(&e.to_string()),
    }
}

/// Catalog from `--state` (fresh when the file does not exist yet), with
/// the SQLite store attached when `--cache` is given.
fn open_catalog(cli: &Cli, require_state: bool) -> Catalog {
    let catalog = match cli.state.as_deref() {
        Some(path) if Path::new(path).exists() => {
            let json = std::fs::read_to_string(path)
                .unwrap_or_else(|e| fail(&format!("failed to read state '{path}': {e}")));
            serde_json::from_str::<Catalog>(&json)
                .unwrap_or_else(|e| fail(&format!("failed to load state '{path}': {e}")))
        }
        Some(_) => Catalog::new(),
        None if require_state => fail("this command requires --state <path>"),
        None => Catalog::new(),
    };
    attach_cache(catalog, cli.cache.as_deref())
}

#[cfg(feature = "cache")]
fn attach_cache(catalog: Catalog, cache: Option<&str>) -> Catalog {
    match cache {
        Some(path) => {
            let db = sku_grouper::algo::storage::CacheDb::open_or_create(path)
                .unwrap_or_else(|e| fail(&e.to_string()));
            catalog.with_store(Box::new(db))
        }
        None => catalog,
    }
}

#[cfg(not(feature = "cache"))]
fn attach_cache(catalog: Catalog, cache: Option<&str>) -> Catalog {
    if cache.is_some() {
        tracing::warn!("--cache ignored: built without the `cache` feature");
    }
    catalog
}

fn save_on_success(cli: &Cli, catalog: &Catalog, out: Result<Value, String>) -> Result<Value, String> {
    let value = out?;
    if let Some(path) = cli.state.as_deref() {
        let json = serde_json::to_string_pretty(catalog).map_err(|e| e.to_string())?;
        std::fs::write(path, json).map_err(|e| format!("failed to write state '{path}': {e}"))?;
        tracing::debug!(path, "catalog state saved");
    }
    Ok(value)
}
