//! compass-server: CLI + ingest server for the POI compass.

use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use comfy_table::{Cell, Table};
use tracing_subscriber::EnvFilter;

use compass_core::config::{self, Config};
use compass_core::geo;
use compass_core::{Coordinate, NavigationEngine, OrientationReading, PositionFix};

mod cache;
mod locator;
mod runtime;
mod web;

use cache::PoiCache;
use locator::{Locator, OverpassClient};
use runtime::{now_ms, Navigator};

#[derive(Parser)]
#[command(name = "compass", version, about = "Needle to the nearest POI")]
struct Cli {
    /// Log at debug level (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// POI name to search for (overrides config)
    #[arg(long, global = true, env = "COMPASS_POI_NAME")]
    name: Option<String>,

    /// Overpass interpreter URL (overrides config)
    #[arg(long, global = true, env = "COMPASS_ENDPOINT")]
    endpoint: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the ingest API and navigator
    Serve {
        /// Bind address (overrides config)
        #[arg(long, env = "COMPASS_HOST")]
        host: Option<String>,

        /// Port (overrides config)
        #[arg(long, env = "COMPASS_PORT")]
        port: Option<u16>,

        /// SQLite cache path (overrides config)
        #[arg(long, env = "COMPASS_DB")]
        db_path: Option<String>,
    },

    /// Replay recorded fixes through the engine and print the needle track
    Replay {
        /// File with one fix per line: `lat,lon[,heading][;timestamp_ms]`
        file: PathBuf,

        /// SQLite cache path
        #[arg(long, default_value = ":memory:")]
        db_path: String,
    },

    /// One-shot lookup of the nearest POI
    Locate {
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,

        #[arg(long, allow_hyphen_values = true)]
        lon: f64,

        /// Skip the cache and always query the search service
        #[arg(long)]
        no_cache: bool,

        /// SQLite cache path (overrides config)
        #[arg(long)]
        db_path: Option<String>,
    },

    /// Inspect or clear the POI cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,

        /// SQLite cache path (overrides config)
        #[arg(long, global = true)]
        db_path: Option<String>,
    },

    /// Show or write the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Print the cached POI and its age
    Show,
    /// Delete the cached POI
    Clear,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Write the default configuration to ~/.poi-compass/config.yaml
    Init,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = config::load_config();
    if let Some(name) = cli.name {
        config.search.name = name;
    }
    if let Some(endpoint) = cli.endpoint {
        config.search.endpoint = endpoint;
    }

    match cli.command {
        Commands::Serve {
            host,
            port,
            db_path,
        } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(path) = db_path {
                config.cache.path = path;
            }
            cmd_serve(config).await
        }
        Commands::Replay { file, db_path } => {
            config.cache.path = db_path;
            cmd_replay(file, config).await
        }
        Commands::Locate {
            lat,
            lon,
            no_cache,
            db_path,
        } => {
            if let Some(path) = db_path {
                config.cache.path = path;
            }
            cmd_locate(Coordinate::new(lat, lon), no_cache, config).await
        }
        Commands::Cache { action, db_path } => {
            if let Some(path) = db_path {
                config.cache.path = path;
            }
            cmd_cache(action, &config)
        }
        Commands::Config { action } => cmd_config(action, &config),
    }
}

fn open_cache(config: &Config) -> PoiCache {
    PoiCache::open(&config.cache.path, config.cache.ttl_ms).unwrap_or_else(|e| {
        eprintln!("Error opening cache {}: {e}", config.cache.path);
        std::process::exit(1);
    })
}

fn build_locator(config: &Config) -> Locator {
    let client = OverpassClient::new(&config.search).unwrap_or_else(|e| {
        eprintln!("Error creating HTTP client: {e}");
        std::process::exit(1);
    });
    Locator::new(Box::new(client), open_cache(config))
}

async fn cmd_serve(config: Config) {
    let locator = Arc::new(build_locator(&config));
    let navigator = Navigator::spawn(config.navigation.clone(), locator);

    tracing::info!(
        poi = %config.search.name,
        radius_m = config.search.radius_m,
        cache = %config.cache.path,
        "starting compass server"
    );

    let state = web::AppState {
        navigator,
        position: config.position.clone(),
    };
    if let Err(e) = web::serve(state, &config.server.host, config.server.port).await {
        eprintln!(
            "Error serving on {}:{}: {e}",
            config.server.host, config.server.port
        );
        std::process::exit(1);
    }
}

/// One parsed line of a replay file.
#[derive(Debug, PartialEq)]
struct ReplayLine {
    coord: Coordinate,
    heading: Option<f64>,
    timestamp_ms: Option<u64>,
}

/// Parse `lat,lon[,heading][;timestamp_ms]`. Blank and `#` lines yield `None`,
/// as does any field that is present but unparseable.
fn parse_replay_line(line: &str) -> Option<ReplayLine> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let (fields, ts) = match line.split_once(';') {
        Some((f, t)) => (f, Some(t.trim().parse::<u64>().ok()?)),
        None => (line, None),
    };

    let mut parts = fields.split(',').map(str::trim);
    let lat = parts.next()?.parse::<f64>().ok()?;
    let lon = parts.next()?.parse::<f64>().ok()?;
    let heading = match parts.next() {
        Some(h) => Some(h.parse::<f64>().ok().filter(|h| h.is_finite())?),
        None => None,
    };
    if parts.next().is_some() {
        return None;
    }

    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return None;
    }

    Some(ReplayLine {
        coord: Coordinate::new(lat, lon),
        heading,
        timestamp_ms: ts,
    })
}

async fn cmd_replay(file: PathBuf, config: Config) {
    let reader: Box<dyn BufRead> = if file.to_str() == Some("-") {
        Box::new(io::stdin().lock())
    } else {
        let f = std::fs::File::open(&file).unwrap_or_else(|e| {
            eprintln!("Error opening {}: {e}", file.display());
            std::process::exit(1);
        });
        Box::new(io::BufReader::new(f))
    };

    let locator = build_locator(&config);
    let mut engine = NavigationEngine::new(config.navigation.clone());

    let mut table = Table::new();
    table.set_header(vec![
        "Time (ms)", "Lat", "Lon", "Hdg", "Src", "Target", "Dist (m)", "Needle", "Status",
    ]);

    // Auto-increment for files without timestamps
    let mut timestamp = now_ms();
    let mut skipped = 0u64;

    for line in reader.lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => continue,
        };
        let Some(entry) = parse_replay_line(&line) else {
            if !line.trim().is_empty() && !line.trim_start().starts_with('#') {
                skipped += 1;
            }
            continue;
        };

        let ts = entry.timestamp_ms.unwrap_or(timestamp);
        timestamp = ts + 1_000;

        if let Some(heading) = entry.heading {
            engine.on_orientation(OrientationReading::Compass { heading });
        }

        let fix = PositionFix::new(entry.coord.lat, entry.coord.lon, ts);
        if let Some(request) = engine.on_position_fix(fix, ts) {
            tracing::info!(reason = %request.reason, observer = %request.observer, "locating");
            let result = locator.locate(request.observer, ts).await;
            engine.on_locate_completed(result, ts);
        }

        let snap = engine.snapshot();
        table.add_row(vec![
            Cell::new(ts),
            Cell::new(format!("{:.5}", entry.coord.lat)),
            Cell::new(format!("{:.5}", entry.coord.lon)),
            Cell::new(
                snap.heading
                    .map(|h| format!("{h:.1}"))
                    .unwrap_or("-".into()),
            ),
            Cell::new(snap.heading_source),
            Cell::new(
                snap.target
                    .as_ref()
                    .map(|p| p.name.clone())
                    .unwrap_or("-".into()),
            ),
            Cell::new(
                snap.distance_m
                    .map(|d| d.to_string())
                    .unwrap_or("-".into()),
            ),
            Cell::new(
                snap.needle
                    .map(|n| format!("{:.1}", n.angle))
                    .unwrap_or("-".into()),
            ),
            Cell::new(&snap.status),
        ]);
    }

    println!("{table}");
    println!();
    println!("Replay complete: {}", file.display());
    println!(
        "  Fixes: {} applied, {} skipped",
        engine.fixes, skipped
    );
    println!(
        "  Locates: {} requested, {} failed",
        engine.locates_requested, engine.locates_failed
    );
}

async fn cmd_locate(observer: Coordinate, no_cache: bool, config: Config) {
    let result = if no_cache {
        let client = OverpassClient::new(&config.search).unwrap_or_else(|e| {
            eprintln!("Error creating HTTP client: {e}");
            std::process::exit(1);
        });
        locator::PoiSearch::nearest(&client, observer).await
    } else {
        build_locator(&config).locate(observer, now_ms()).await
    };

    let poi = match result {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Locate failed: {e}");
            std::process::exit(1);
        }
    };

    let mut table = Table::new();
    table.set_header(vec!["ID", "Name", "Locality", "Lat", "Lon", "Dist (m)", "Bearing"]);
    table.add_row(vec![
        Cell::new(&poi.id),
        Cell::new(&poi.name),
        Cell::new(if poi.locality.is_empty() { "-" } else { poi.locality.as_str() }),
        Cell::new(format!("{:.5}", poi.location.lat)),
        Cell::new(format!("{:.5}", poi.location.lon)),
        Cell::new(geo::distance(observer, poi.location).round() as u64),
        Cell::new(format!("{:.1}", geo::bearing(observer, poi.location))),
    ]);
    println!("{table}");
}

fn cmd_cache(action: CacheAction, config: &Config) {
    let mut cache = open_cache(config);

    match action {
        CacheAction::Show => {
            println!();
            println!("Cache: {}", config.cache.path);
            println!();
            match cache.entry() {
                Some(entry) => {
                    let now = now_ms();
                    let fresh = entry.is_fresh(now, cache.ttl_ms());
                    println!("  POI:       {} ({})", entry.poi.name, entry.poi.id);
                    println!("  Locality:  {}", entry.poi.locality);
                    println!("  Location:  {}", entry.poi.location);
                    println!("  Age:       {:.1}s", entry.age_ms(now) as f64 / 1000.0);
                    println!("  Fresh:     {}", if fresh { "yes" } else { "no" });
                }
                None => println!("  (empty)"),
            }
            println!();
        }
        CacheAction::Clear => match cache.clear() {
            Ok(true) => println!("Cache cleared"),
            Ok(false) => println!("Cache already empty"),
            Err(e) => {
                eprintln!("Error clearing cache: {e}");
                std::process::exit(1);
            }
        },
    }
}

fn cmd_config(action: ConfigAction, config: &Config) {
    match action {
        ConfigAction::Show => match config::serialize_config(config) {
            Ok(text) => print!("{text}"),
            Err(e) => {
                eprintln!("Error: {e}");
                std::process::exit(1);
            }
        },
        ConfigAction::Init => match config::save_config(&Config::default()) {
            Ok(path) => println!("Wrote {}", path.display()),
            Err(e) => {
                eprintln!("Error: {e}");
                std::process::exit(1);
            }
        },
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
