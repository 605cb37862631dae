//! Aqua miner: standalone Argon2id mining binary using RPC.
//!
//! Polls an AquaChain node (or pool) for work with `aqua_getWork`, hashes it
//! on blocking worker threads, and submits solutions with `aqua_submitWork`.
//! With `--bench` it hashes a fixed work package offline and only reports
//! the hash rate.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use aqua_consensus::AquahashConfig;
use aqua_core::crypto::{pow_seed, version_hash};
use aqua_core::fork::HeaderVersion;
use clap::{Parser, ValueEnum};
use jsonrpsee::core::client::ClientT;
use jsonrpsee::core::params::ArrayParams;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use primitive_types::{H256, U256};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Work hash of the offline benchmark, taken from a testnet work load.
const BENCH_WORK: &str = "d3b5f1b47f52fdc72b1dab0b02ab352442487a1d3a43211bc4f0eb5f092403fc";
/// Target of the offline benchmark.
const BENCH_TARGET: &str = "000008637bd05af6c69b5a63f9a49c2c1b10fd7e45803cd141a6937d1fe64f54";

/// Hashes between checks for new work and shutdown.
const BATCH: u64 = 256;
const STATS_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// CLI arguments for the miner.
#[derive(Debug, Parser)]
#[command(name = "aqua-miner")]
#[command(about = "AquaChain standalone Argon2id miner", long_about = None)]
struct Args {
    /// RPC server endpoint.
    #[arg(long, default_value = "http://127.0.0.1:8543")]
    rpc_endpoint: String,

    /// Engine config file (TOML or JSON). `AQUAHASH_*` variables override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of mining threads (0 = all cores). Overrides the config file.
    #[arg(long)]
    threads: Option<usize>,

    /// Seconds between work refreshes.
    #[arg(long, default_value = "3")]
    refresh: u64,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log output format.
    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormat,

    /// Hash the built-in work package offline and report the hash rate.
    #[arg(long)]
    bench: bool,

    /// Header version hashed in benchmark mode.
    #[arg(long, default_value = "2")]
    version_override: u64,
}

/// A unit of work shared with the hashing threads.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Workload {
    hash: H256,
    target: U256,
    version: HeaderVersion,
}

/// A nonce meeting the target of `hash`.
#[derive(Debug, Clone, Copy)]
struct Solution {
    hash: H256,
    nonce: u64,
}

/// Statistics tracker for mining.
struct MiningStats {
    solutions: AtomicU64,
    accepted: AtomicU64,
    hashes: AtomicU64,
    start_time: Instant,
}

impl MiningStats {
    fn new() -> Self {
        Self {
            solutions: AtomicU64::new(0),
            accepted: AtomicU64::new(0),
            hashes: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    fn add_hashes(&self, count: u64) {
        self.hashes.fetch_add(count, Ordering::Relaxed);
    }

    fn hashrate(&self) -> f64 {
        let hashes = self.hashes.load(Ordering::Relaxed) as f64;
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 { hashes / elapsed } else { 0.0 }
    }
}

/// Worker count from the command line, falling back to the engine config.
fn resolve_threads(cli: Option<usize>, config: &AquahashConfig) -> Result<usize> {
    let all_cores = || thread::available_parallelism().map_or(1, |n| n.get());
    match cli {
        Some(0) => Ok(all_cores()),
        Some(n) => Ok(n),
        None if config.threads < 0 => bail!("local mining is disabled by config (threads = {})", config.threads),
        None if config.threads == 0 => Ok(all_cores()),
        None => Ok(config.threads as usize),
    }
}

/// Decode a `0x`-prefixed 32-byte hex word.
fn parse_word(field: &str) -> Result<[u8; 32]> {
    let digits = field.strip_prefix("0x").unwrap_or(field);
    let padded = format!("{digits:0>64}");
    let bytes = hex::decode(&padded).with_context(|| format!("invalid hex word {field}"))?;
    bytes
        .try_into()
        .map_err(|_| anyhow!("word {field} longer than 32 bytes"))
}

/// Version named by a work indicator or override.
///
/// Anything outside 1..=4, including an epoch seed hash, selects version 2.
fn select_version(value: U256) -> HeaderVersion {
    if value > U256::from(u8::MAX) {
        return HeaderVersion::Argon2idA;
    }
    HeaderVersion::try_from(value.low_u64() as u8).unwrap_or(HeaderVersion::Argon2idA)
}

/// Parse an `aqua_getWork` reply.
fn parse_work(work: &[String]) -> Result<Workload> {
    let [hash, indicator, target] = work else {
        return Err(anyhow!("expected 3 work fields, got {}", work.len()));
    };
    Ok(Workload {
        hash: H256(parse_word(hash)?),
        target: U256::from_big_endian(&parse_word(target)?),
        version: select_version(U256::from_big_endian(&parse_word(indicator)?)),
    })
}

fn bench_work(version: u64) -> Result<Workload> {
    Ok(Workload {
        hash: H256(parse_word(BENCH_WORK)?),
        target: U256::from_big_endian(&parse_word(BENCH_TARGET)?),
        version: select_version(U256::from(version)),
    })
}

/// Human-readable difficulty of a target: `2^256 / (target + 1)`.
fn target_difficulty(target: U256) -> U256 {
    let Some(denominator) = target.checked_add(U256::one()) else {
        return U256::one();
    };
    let quotient = U256::MAX / denominator;
    if U256::MAX % denominator == denominator - 1 {
        quotient + 1
    } else {
        quotient
    }
}

/// Whether `nonce` solves `work`.
fn solves(work: &Workload, nonce: u64) -> bool {
    let result = version_hash(work.version, &pow_seed(&work.hash, nonce));
    U256::from_big_endian(&result) <= work.target
}

async fn fetch_work(client: &HttpClient) -> Result<Workload> {
    let work: Vec<String> = client
        .request("aqua_getWork", ArrayParams::new())
        .await
        .context("failed to fetch work")?;
    parse_work(&work)
}

async fn submit_work(client: &HttpClient, solution: Solution) -> Result<bool> {
    let mut params = ArrayParams::new();
    params.insert(format!("0x{:016x}", solution.nonce))?;
    params.insert(format!("0x{}", hex::encode(solution.hash.as_bytes())))?;
    params.insert(format!("0x{}", hex::encode(H256::zero().as_bytes())))?;
    client
        .request("aqua_submitWork", params)
        .await
        .context("failed to submit work")
}

/// Blocking hash loop of one thread.
///
/// Scans nonces upward from a random start, restarting from a fresh random
/// nonce whenever new work arrives.
fn hash_worker(
    id: usize,
    mut work_rx: watch::Receiver<Option<Workload>>,
    found: mpsc::UnboundedSender<Solution>,
    stats: Arc<MiningStats>,
    running: Arc<AtomicBool>,
    offline: bool,
) {
    let mut work = work_rx.borrow_and_update().clone();
    let mut nonce = rand::random::<u64>();

    while running.load(Ordering::Relaxed) {
        if work_rx.has_changed().unwrap_or(false) {
            work = work_rx.borrow_and_update().clone();
            nonce = rand::random::<u64>();
        }
        let Some(current) = &work else {
            thread::sleep(Duration::from_millis(200));
            continue;
        };
        for _ in 0..BATCH {
            nonce = nonce.wrapping_add(1);
            if solves(current, nonce) {
                debug!(worker = id, nonce, "Solution found");
                if !offline && found.send(Solution { hash: current.hash, nonce }).is_err() {
                    return;
                }
            }
        }
        stats.add_hashes(BATCH);
    }
    debug!(worker = id, "Hash worker exiting");
}

/// Log mining statistics periodically.
async fn stats_logger(stats: Arc<MiningStats>, running: Arc<AtomicBool>) {
    let mut ticker = tokio::time::interval(STATS_INTERVAL);
    ticker.tick().await;
    while running.load(Ordering::Relaxed) {
        ticker.tick().await;
        info!(
            hashrate = %format!("{:.2} H/s", stats.hashrate()),
            solutions = stats.solutions.load(Ordering::Relaxed),
            accepted = stats.accepted.load(Ordering::Relaxed),
            "Mining statistics"
        );
    }
}

fn init_tracing(args: &Args) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match args.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args);

    let config = AquahashConfig::load(args.config.as_deref()).context("failed to load config")?;
    let threads = resolve_threads(args.threads, &config)?;
    info!("aqua-miner v{}", env!("CARGO_PKG_VERSION"));
    if let Some(path) = &args.config {
        info!(path = %path.display(), "Loaded config");
    }
    info!(threads, bench = args.bench, "Starting miner");

    let client = if args.bench {
        None
    } else {
        info!(endpoint = %args.rpc_endpoint, "Using RPC endpoint");
        Some(
            HttpClientBuilder::default()
                .build(&args.rpc_endpoint)
                .context("failed to create RPC client")?,
        )
    };

    let stats = Arc::new(MiningStats::new());
    let running = Arc::new(AtomicBool::new(true));
    let (work_tx, work_rx) = watch::channel(None::<Workload>);
    let (found_tx, mut found_rx) = mpsc::unbounded_channel();

    let mut handles = Vec::with_capacity(threads);
    for id in 0..threads {
        let work_rx = work_rx.clone();
        let found_tx = found_tx.clone();
        let stats = Arc::clone(&stats);
        let running = Arc::clone(&running);
        let offline = args.bench;
        handles.push(
            thread::Builder::new()
                .name(format!("hash-{id}"))
                .spawn(move || hash_worker(id, work_rx, found_tx, stats, running, offline))
                .context("failed to spawn hash worker")?,
        );
    }
    drop(found_tx);
    tokio::spawn(stats_logger(Arc::clone(&stats), Arc::clone(&running)));

    let mut refresh = tokio::time::interval(Duration::from_secs(args.refresh.max(1)));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                warn!("Received SIGINT, shutting down");
                break;
            }
            _ = refresh.tick() => {
                let work = match &client {
                    Some(client) => fetch_work(client).await,
                    None => bench_work(args.version_override),
                };
                match work {
                    Ok(work) if work_tx.borrow().as_ref() != Some(&work) => {
                        info!(
                            hash = ?work.hash,
                            difficulty = %target_difficulty(work.target),
                            version = %work.version,
                            "Begin new work"
                        );
                        work_tx.send_replace(Some(work));
                    }
                    Ok(_) => {}
                    Err(e) => error!("{e:#}"),
                }
            }
            Some(solution) = found_rx.recv() => {
                stats.solutions.fetch_add(1, Ordering::Relaxed);
                let Some(client) = &client else { continue };
                info!(nonce = solution.nonce, hash = ?solution.hash, "Submitting nonce");
                match submit_work(client, solution).await {
                    Ok(true) => {
                        stats.accepted.fetch_add(1, Ordering::Relaxed);
                        info!(nonce = solution.nonce, "Nonce accepted");
                    }
                    Ok(false) => {
                        warn!(nonce = solution.nonce, "Nonce not accepted, refreshing work");
                        refresh.reset_immediately();
                    }
                    Err(e) => error!("{e:#}"),
                }
            }
        }
    }

    running.store(false, Ordering::Relaxed);
    for handle in handles {
        handle.join().ok();
    }
    info!(hashrate = %format!("{:.2} H/s", stats.hashrate()), "Miner shutdown complete");
    Ok(())
}
