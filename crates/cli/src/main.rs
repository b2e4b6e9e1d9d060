#![forbid(unsafe_code)]

use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use metrics::counter;
use shelf_api::{ListUpdate, Session, SessionDeps};
use shelf_catalog::HttpCatalogClient;
use shelf_core::{GenreId, ItemDetail, ItemId, ListFilter, RenderedList, Settings, UserId, GENRES};
use shelf_persist::{SqliteDocumentStore, SqliteListCache};
use shelf_prefs::ToggleNotice;
use tokio::signal;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "shelfctl", version, about = "Browse the game catalog and manage liked items")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Signed-in user; like/unlike/favorites need one
    #[arg(long = "user", env = "SHELF_USER", global = true)]
    user: Option<String>,

    /// Catalog API base URL
    #[arg(long = "base-url", env = "SHELF_BASE_URL", global = true)]
    base_url: Option<String>,

    /// Catalog API key
    #[arg(long = "api-key", env = "SHELF_API_KEY", global = true, hide_env_values = true)]
    api_key: Option<String>,

    /// SQLite file for the list cache and local likes
    #[arg(long = "db", env = "SHELF_DB_PATH", global = true)]
    db_path: Option<String>,

    /// Max detail requests in flight
    #[arg(long = "concurrency", env = "SHELF_FETCH_CONCURRENCY", global = true)]
    concurrency: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show a catalog list (featured unless filtered)
    List {
        /// Genre name or numeric id, e.g. "RPG" or "5"
        #[arg(long = "genre")]
        genre: Option<String>,
        /// Recent releases only
        #[arg(long = "new", action = ArgAction::SetTrue)]
        new: bool,
    },
    /// Search the catalog by name
    Search {
        query: String,
        #[arg(long = "genre")]
        genre: Option<String>,
    },
    /// Fetch full records for one or more item ids
    Details {
        #[arg(required = true)]
        ids: Vec<ItemId>,
    },
    /// Show liked items with their details
    Favorites {
        /// Keep printing as the liked set changes (Ctrl-C to stop)
        #[arg(long = "watch", action = ArgAction::SetTrue)]
        watch: bool,
    },
    /// Add an item to the liked set
    Like { id: ItemId },
    /// Remove an item from the liked set
    Unlike { id: ItemId },
    /// List the browsable genres
    Genres,
}

fn init_tracing() {
    let env = std::env::var("SHELF_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    // stdout carries command output
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("SHELF_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid SHELF_METRICS_ADDR; expected host:port");
        }
    }
}

fn settings(cli: &Cli) -> Settings {
    let mut s = Settings::from_env();
    if let Some(url) = &cli.base_url { s.base_url = url.trim_end_matches('/').to_string(); }
    if let Some(key) = &cli.api_key { s.api_key = Some(key.clone()); }
    if let Some(path) = &cli.db_path { s.db_path = path.clone(); }
    if let Some(n) = cli.concurrency { s.fetch_concurrency = n.max(1); }
    s
}

fn genre(raw: &str) -> Result<GenreId> {
    GenreId::lookup(raw).with_context(|| format!("unknown genre '{}'; see `shelfctl genres`", raw))
}

fn print_list(list: &RenderedList, cached: bool, output: Output) -> Result<()> {
    match output {
        Output::Json => println!("{}", serde_json::to_string_pretty(list)?),
        Output::Human => {
            if cached {
                eprintln!("(showing cached results; refresh failed)");
            }
            for it in &list.items {
                let mark = if it.liked { "♥" } else { " " };
                println!("{:>8} {} {}", it.summary.id, mark, it.summary.name);
            }
        }
    }
    Ok(())
}

fn print_details(items: &[ItemDetail], output: Output) -> Result<()> {
    match output {
        Output::Json => println!("{}", serde_json::to_string_pretty(items)?),
        Output::Human => {
            for d in items {
                println!("{} • {}", d.id, d.name);
                if !d.description.is_empty() {
                    println!("    {}", d.description);
                }
            }
        }
    }
    Ok(())
}

async fn show_list(session: &Session, filter: ListFilter, output: Output) -> Result<()> {
    let t0 = Instant::now();
    let mut updates = session.refresh(filter.clone());
    let mut last: Option<ListUpdate> = None;
    while let Some(u) = updates.recv().await {
        last = Some(u);
    }
    info!(filter = %filter, took_ms = %t0.elapsed().as_millis(), "cli: list done");
    match last {
        Some(ListUpdate::Fresh(list)) => print_list(&list, false, output),
        Some(ListUpdate::Cached(list)) => print_list(&list, true, output),
        None => bail!("no results for {} (refresh failed; see logs)", filter),
    }
}

fn report_toggle(outcome: Option<ToggleNotice>, id: ItemId, liked: bool) -> Result<()> {
    match outcome {
        Some(ToggleNotice::Added(_)) => println!("liked {}", id),
        Some(ToggleNotice::Removed(_)) => println!("unliked {}", id),
        Some(ToggleNotice::Failed { error, .. }) => bail!("could not update {}: {}", id, error),
        None if liked => println!("{} already liked", id),
        None => println!("{} was not liked", id),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let settings = settings(&cli);

    let catalog = Arc::new(HttpCatalogClient::from_settings(&settings)?);
    let cache = Arc::new(SqliteListCache::open(&settings.db_path)?);
    let docs = Arc::new(SqliteDocumentStore::open(&settings.db_path)?);
    let user = cli.user.as_deref().and_then(UserId::new);
    let session = Session::new(SessionDeps { catalog, cache, docs }, user, &settings);
    session.bootstrap().await;

    match cli.command {
        Commands::List { genre: g, new } => {
            counter!("cli_command_total", 1u64, "cmd" => "list");
            let filter = match (g, new) {
                (Some(g), _) => ListFilter::Genre(genre(&g)?),
                (None, true) => ListFilter::NewReleases,
                (None, false) => ListFilter::Featured,
            };
            show_list(&session, filter, cli.output).await?;
        }
        Commands::Search { query, genre: g } => {
            counter!("cli_command_total", 1u64, "cmd" => "search");
            let g = g.as_deref().map(genre).transpose()?;
            show_list(&session, ListFilter::search(query, g), cli.output).await?;
        }
        Commands::Details { ids } => {
            counter!("cli_command_total", 1u64, "cmd" => "details");
            let res = session.details(ids).await;
            let items: Vec<ItemDetail> = res.ok().values().cloned().collect();
            print_details(&items, cli.output)?;
            if !res.failed().is_empty() {
                let failed: Vec<String> = res.failed().iter().map(|id| id.to_string()).collect();
                eprintln!("failed to load: {}", failed.join(", "));
            }
        }
        Commands::Favorites { watch } => {
            counter!("cli_command_total", 1u64, "cmd" => "favorites");
            let mut feed = session.favorites().await?;
            loop {
                tokio::select! {
                    next = feed.recv() => {
                        let Some(items) = next else { break; };
                        print_details(&items, cli.output)?;
                        if !watch { break; }
                    }
                    _ = signal::ctrl_c() => {
                        info!("cli: interrupted");
                        break;
                    }
                }
            }
            feed.cancel.cancel();
        }
        Commands::Like { id } => {
            counter!("cli_command_total", 1u64, "cmd" => "like");
            report_toggle(session.set_liked(id, true).await?, id, true)?;
        }
        Commands::Unlike { id } => {
            counter!("cli_command_total", 1u64, "cmd" => "unlike");
            report_toggle(session.set_liked(id, false).await?, id, false)?;
        }
        Commands::Genres => match cli.output {
            Output::Json => {
                let rows: Vec<serde_json::Value> =
                    GENRES.iter().map(|(name, id)| serde_json::json!({"name": name, "id": id})).collect();
                println!("{}", serde_json::to_string_pretty(&rows)?);
            }
            Output::Human => {
                for (name, id) in GENRES {
                    println!("{:>4}  {}", id, name);
                }
            }
        },
    }
    Ok(())
}
