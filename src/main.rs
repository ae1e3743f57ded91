//! Casket CLI
//!
//! ```text
//! casket hash   <text>                 identifier of a string or file
//! casket seal   <payload>              wrap a payload in a message container
//! casket open   <base64>               parse and verify a container
//! casket bench                         mixed-load cache benchmark
//! casket ring   --nodes a,b,c          placement distribution over a ring
//! casket serve  --config casket.yaml   managed cache tiers + metrics server
//! ```

use anyhow::{bail, Context};
use bytes::Bytes;
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use casket::bench::{run_benchmark, BenchmarkOptions};
use casket::cache::ManagementTask;
use casket::config::{parse_duration, CasketConfig};
use casket::digest::{DigestId, DigestProvider, HashableString};
use casket::message::MessageContainer;
use casket::ring::ConsistentHashRing;
use casket::router::CacheRouter;
use casket::telemetry::CacheTelemetry;

// =============================================================================
// CLI Arguments
// =============================================================================

/// Casket - content-addressed tiered object cache
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON", global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the identifier of a string or file
    Hash(HashArgs),
    /// Wrap a payload in a message container and print its transport base64
    Seal(SealArgs),
    /// Parse a base64 container and print its fields
    Open(OpenArgs),
    /// Run the mixed-load cache benchmark
    Bench(BenchArgs),
    /// Show how keys spread over a set of ring nodes
    Ring(RingArgs),
    /// Run managed cache tiers with a metrics endpoint
    Serve(ServeArgs),
}

#[derive(ClapArgs, Debug)]
struct HashArgs {
    /// Text to hash
    #[arg(required_unless_present = "file")]
    text: Option<String>,

    /// Hash the contents of a file instead
    #[arg(long, conflicts_with = "text")]
    file: Option<PathBuf>,

    /// Digest provider (md5, sha1, sha256, sha384, sha512)
    #[arg(long, default_value = "sha256")]
    provider: DigestProvider,

    /// Print every provider
    #[arg(long)]
    all: bool,
}

#[derive(ClapArgs, Debug)]
struct SealArgs {
    /// Payload text
    payload: String,

    #[arg(long, default_value = "sender")]
    sender: String,

    #[arg(long, default_value = "receiver")]
    receiver: String,

    /// Integrity provider; also keys the sender and receiver
    #[arg(long, default_value = "sha256")]
    provider: DigestProvider,

    /// Mark the payload as encrypted
    #[arg(long)]
    encrypted: bool,
}

#[derive(ClapArgs, Debug)]
struct OpenArgs {
    /// Container in standard or transport base64
    container: String,

    /// Skip the integrity check
    #[arg(long)]
    no_verify: bool,
}

#[derive(ClapArgs, Debug)]
struct BenchArgs {
    /// Build the cache from this configuration file instead of defaults
    #[arg(long, env = "CASKET_CONFIG")]
    config: Option<PathBuf>,

    /// Run length, e.g. "30s"
    #[arg(long, default_value = "30s")]
    length: String,

    /// TTL for inserted items
    #[arg(long, default_value = "30s")]
    item_life: String,

    #[arg(long, default_value = "50")]
    delete_skip: u64,

    #[arg(long, default_value = "50")]
    lookup_skip: u64,

    #[arg(long, default_value = "50")]
    update_skip: u64,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

#[derive(ClapArgs, Debug)]
struct RingArgs {
    /// Comma-separated node names
    #[arg(long, value_delimiter = ',', required = true)]
    nodes: Vec<String>,

    /// Virtual nodes per node
    #[arg(long, default_value = "64")]
    virtual_nodes: u32,

    /// Number of sample keys to place
    #[arg(long, default_value = "10000")]
    keys: u64,

    #[arg(long, default_value = "sha256")]
    provider: DigestProvider,
}

#[derive(ClapArgs, Debug)]
struct ServeArgs {
    /// Configuration file (YAML, or JSON by extension)
    #[arg(long, env = "CASKET_CONFIG", default_value = "casket.yaml")]
    config: PathBuf,

    /// Write a default configuration when the file is missing
    #[arg(long, env = "CASKET_CREATE_CONFIG")]
    create_config: bool,

    /// Override the metrics bind address from the configuration
    #[arg(long, env = "METRICS_ADDR")]
    metrics_addr: Option<String>,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    match args.command {
        Command::Hash(cmd) => hash(cmd),
        Command::Seal(cmd) => seal(cmd),
        Command::Open(cmd) => open(cmd),
        Command::Bench(cmd) => bench(cmd).await,
        Command::Ring(cmd) => ring(cmd),
        Command::Serve(cmd) => serve(cmd).await,
    }
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "hyper_util=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

// =============================================================================
// Commands
// =============================================================================

fn hash(cmd: HashArgs) -> anyhow::Result<()> {
    let content = match (&cmd.file, &cmd.text) {
        (Some(path), _) => {
            std::fs::read(path).with_context(|| format!("reading {}", path.display()))?
        }
        (None, Some(text)) => text.clone().into_bytes(),
        (None, None) => bail!("nothing to hash"),
    };

    let providers: Vec<DigestProvider> = if cmd.all {
        DigestProvider::ALL.to_vec()
    } else {
        vec![cmd.provider]
    };

    for provider in providers {
        let id = DigestId::compute(&content, provider);
        println!(
            "{:<7} {:<24} {}  {}",
            provider.name(),
            provider.oid(),
            id,
            id.to_transport_base64()
        );
    }
    Ok(())
}

fn seal(cmd: SealArgs) -> anyhow::Result<()> {
    let mut container = MessageContainer::new(
        DigestId::compute(cmd.sender.as_bytes(), cmd.provider),
        DigestId::compute(cmd.receiver.as_bytes(), cmd.provider),
        cmd.provider,
    )
    .with_payload(Bytes::from(cmd.payload.into_bytes()))
    .with_encrypted(cmd.encrypted);

    container.seal()?;
    info!(
        bytes = container.byte_length(false),
        integrity = %container.integrity_digest()?,
        "Sealed container"
    );
    println!("{}", container.to_base64()?);
    Ok(())
}

fn open(cmd: OpenArgs) -> anyhow::Result<()> {
    let container = MessageContainer::from_base64(&cmd.container, !cmd.no_verify)
        .context("container rejected")?;

    let payload_id = DigestId::compute(container.payload(), container.provider());
    println!("state:      {:?}", container.state());
    println!("provider:   {}", container.provider());
    println!("encrypted:  {}", container.encrypted());
    println!("sender:     {}", container.sender());
    println!("receiver:   {}", container.receiver());
    println!("payload:    {} bytes, {}", container.payload().len(), payload_id);
    match std::str::from_utf8(container.payload()) {
        Ok(text) if !container.encrypted() => println!("text:       {}", text),
        _ => {}
    }
    Ok(())
}

async fn bench(cmd: BenchArgs) -> anyhow::Result<()> {
    let (cache, provider) = match &cmd.config {
        Some(path) => {
            let config = CasketConfig::load(path, false)?;
            (config.build_cache()?, config.provider)
        }
        None => {
            let config = CasketConfig::default();
            let mut primary = config.primary.clone();
            primary.name = "bench".to_string();
            primary.max_collection_count = 10_000_000;
            primary.manage_every = "0".to_string();
            primary.manage_every_io_count = 0;
            (primary.build(None)?, config.provider)
        }
    };

    let options = BenchmarkOptions {
        duration: parse_duration(&cmd.length)?,
        item_life: parse_duration(&cmd.item_life)?,
        provider,
        delete_skip: cmd.delete_skip,
        lookup_skip: cmd.lookup_skip,
        update_skip: cmd.update_skip,
    };

    info!(cache = %cache.name(), backend = cache.backend(), ?options, "Starting benchmark");

    let report = tokio::task::spawn_blocking(move || {
        cache.initialize()?;
        let report = run_benchmark(cache.as_ref(), &options);
        cache.dispose()?;
        report
    })
    .await??;

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "Added {}, ended with: {}, IOPS: {:.1}, took: {}ms",
            report.adds, report.final_count, report.average_iops, report.elapsed_ms
        );
    }
    Ok(())
}

fn ring(cmd: RingArgs) -> anyhow::Result<()> {
    let mut ring = ConsistentHashRing::new(cmd.provider);
    for node in &cmd.nodes {
        ring.add_virtual(HashableString::new(node.clone(), cmd.provider), cmd.virtual_nodes.max(1))?;
    }
    ring.rebuild();

    let mut placed: BTreeMap<String, u64> = cmd.nodes.iter().map(|n| (n.clone(), 0)).collect();
    for i in 0..cmd.keys {
        let key = DigestId::compute(&i.to_le_bytes(), cmd.provider);
        *placed.entry(ring.locate(&key)?.value().to_string()).or_default() += 1;
    }

    println!("{} ring entries, {} sample keys", ring.active_count(), cmd.keys);
    for (node, count) in placed {
        let share = if cmd.keys == 0 {
            0.0
        } else {
            count as f64 * 100.0 / cmd.keys as f64
        };
        println!("{:<24} {:>10} {:>6.2}%", node, count, share);
    }
    Ok(())
}

async fn serve(cmd: ServeArgs) -> anyhow::Result<()> {
    let config = CasketConfig::load(&cmd.config, cmd.create_config)
        .with_context(|| format!("loading {}", cmd.config.display()))?;
    let metrics_addr = cmd.metrics_addr.unwrap_or_else(|| config.metrics_addr.clone());

    info!("Starting Casket");
    info!("  Config: {}", cmd.config.display());
    info!("  Provider: {}", config.provider);
    info!("  Primary: {} ({:?})", config.primary.name, config.primary.backend);
    if let Some(overflow) = &config.overflow {
        info!("  Overflow: {} ({:?})", overflow.name, overflow.backend);
    }

    let router = Arc::new(config.build_router()?);
    let interval = config.primary.manage_interval()?;

    // Background management, one loop per tier
    let mut tasks = Vec::new();
    if interval.is_zero() {
        warn!("manage_every is 0; tiers are managed only by their I/O cadence");
    } else {
        for name in router.tier_names() {
            if let Some(tier) = router.tier(&name) {
                tasks.push(ManagementTask::spawn(tier, interval)?);
            }
        }
    }

    let telemetry = Arc::new(CacheTelemetry::new()?);
    let server = {
        let router = Arc::clone(&router);
        let telemetry = Arc::clone(&telemetry);
        tokio::spawn(async move {
            if let Err(e) = run_metrics_server(&metrics_addr, router, telemetry).await {
                error!("Metrics server error: {}", e);
            }
        })
    };

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("Shutdown requested");

    server.abort();
    for task in tasks {
        task.shutdown().await?;
    }
    router.dispose_all()?;

    info!("Casket shutdown complete");
    Ok(())
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(
    addr: &str,
    router: Arc<CacheRouter>,
    telemetry: Arc<CacheTelemetry>,
) -> anyhow::Result<()> {
    use http_body_util::Full;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response, StatusCode};
    use hyper_util::rt::TokioIo;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    fn respond(
        router: &CacheRouter,
        telemetry: &CacheTelemetry,
        path: &str,
    ) -> anyhow::Result<Response<Full<Bytes>>> {
        let response = match path {
            "/metrics" => {
                for stats in router.stats() {
                    telemetry.observe(&stats);
                }
                let (content_type, body) = telemetry.encode()?;
                Response::builder()
                    .status(StatusCode::OK)
                    .header("Content-Type", content_type)
                    .body(Full::new(Bytes::from(body)))?
            }
            "/stats" => Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "application/json")
                .body(Full::new(Bytes::from(serde_json::to_vec(&router.stats())?)))?,
            "/healthz" | "/livez" | "/readyz" => Response::builder()
                .status(StatusCode::OK)
                .body(Full::new(Bytes::from("ok")))?,
            _ => Response::builder()
                .status(StatusCode::NOT_FOUND)
                .body(Full::new(Bytes::from("not found")))?,
        };
        Ok(response)
    }

    let addr: SocketAddr = addr
        .parse()
        .with_context(|| format!("invalid metrics server address: {}", addr))?;

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind metrics server on {}", addr))?;

    info!("Metrics server listening on {}", addr);

    loop {
        let (stream, _) = listener.accept().await.context("metrics server accept")?;
        let io = TokioIo::new(stream);
        let router = Arc::clone(&router);
        let telemetry = Arc::clone(&telemetry);

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                let result = respond(&router, &telemetry, req.uri().path());
                async move {
                    let response = result.unwrap_or_else(|e| {
                        error!("Metrics request failed: {}", e);
                        let mut response = Response::new(Full::new(Bytes::from("internal error")));
                        *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                        response
                    });
                    Ok::<_, std::convert::Infallible>(response)
                }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!("Metrics server connection error: {}", e);
            }
        });
    }
}
