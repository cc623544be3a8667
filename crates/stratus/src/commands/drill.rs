//! Drill command - concurrent read-modify-save rounds on one session.
//!
//! Every worker repeatedly reads a shared session, increments a counter and
//! saves it back. Workers are spread over repository instances, each with its
//! own accessor table, which stand in for separate processes sharing one
//! cluster. With locking on, instances serialize on the entry lock and no
//! increment is lost; workers on the same instance share its lock and can
//! still overwrite each other.

use std::time::Instant;

use anyhow::{Result, bail};
use clap::Args;
use console::{Style, style};
use serde::Serialize;
use stratus_session::{
    MemoryCluster, RemoteStore, RepositoryConfig, SessionRepository, StoreKey,
};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::Context;

/// Session attribute the workers increment.
const COUNTER: &str = "counter";

/// Arguments for the drill command.
#[derive(Args, Debug)]
pub struct DrillArgs {
    /// Number of concurrent workers
    #[arg(short, long, default_value_t = 8)]
    pub workers: usize,

    /// Read-modify-save rounds per worker
    #[arg(short, long, default_value_t = 50)]
    pub rounds: u32,

    /// Repository instances to spread workers over (default: one per worker)
    #[arg(short, long)]
    pub instances: Option<usize>,

    /// Disable entry locking (last write wins)
    #[arg(long)]
    pub no_locking: bool,
}

/// Outcome of a drill run.
#[derive(Debug, Clone, Serialize)]
pub struct DrillReport {
    pub workers: usize,
    pub rounds: u32,
    pub instances: usize,
    pub locking: bool,
    /// Saves the workers performed.
    pub increments: u64,
    /// Rounds whose read came back empty.
    pub misses: u64,
    /// Counter value left in the store.
    pub observed: u64,
    /// Increments overwritten by a concurrent save.
    pub lost_updates: u64,
    pub elapsed_ms: u128,
}

#[derive(Debug, Default)]
struct WorkerTally {
    increments: u64,
    misses: u64,
}

/// Run the drill command.
pub async fn run(args: DrillArgs, ctx: &Context) -> Result<()> {
    let mut config = ctx.loaded.config.repository_config()?;
    if args.no_locking {
        config = config.with_locking(false);
    }

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping drill");
            signal_token.cancel();
        }
    });

    let report = drill(
        config,
        args.workers,
        args.rounds,
        args.instances.unwrap_or(args.workers),
        shutdown,
    )
    .await?;

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

/// Run `workers` tasks of `rounds` increments each against one session.
pub async fn drill(
    config: RepositoryConfig,
    workers: usize,
    rounds: u32,
    instances: usize,
    shutdown: CancellationToken,
) -> Result<DrillReport> {
    if workers == 0 || rounds == 0 {
        bail!("workers and rounds must both be at least 1");
    }
    let instances = instances.clamp(1, workers);
    let locking = config.use_locking;

    let cluster = MemoryCluster::new();
    let store = cluster.namespace(&config.cache_name);

    let mut repos = Vec::with_capacity(instances);
    for _ in 0..instances {
        let repo = SessionRepository::open(store.clone(), config.clone())
            .await?
            .with_shutdown(shutdown.clone());
        repos.push(repo);
    }

    let mut session = repos[0].create_session();
    session.set_attribute(COUNTER, 0);
    repos[0].save(&mut session).await?;
    let id = session.id().to_string();

    info!(
        session_id = %id,
        workers,
        rounds,
        instances,
        locking,
        "Starting drill"
    );

    let started = Instant::now();
    let mut tasks = JoinSet::new();
    for worker in 0..workers {
        let repo = repos[worker % instances].clone();
        let id = id.clone();
        tasks.spawn(async move { run_worker(worker, repo, id, rounds).await });
    }

    let mut totals = WorkerTally::default();
    while let Some(joined) = tasks.join_next().await {
        let tally = joined??;
        totals.increments += tally.increments;
        totals.misses += tally.misses;
    }
    let elapsed_ms = started.elapsed().as_millis();

    let observed = store
        .get(&StoreKey::for_session(&id))
        .await?
        .and_then(|s| s.attribute_as::<u64>(COUNTER))
        .unwrap_or(0);

    Ok(DrillReport {
        workers,
        rounds,
        instances,
        locking,
        increments: totals.increments,
        misses: totals.misses,
        observed,
        lost_updates: totals.increments.saturating_sub(observed),
        elapsed_ms,
    })
}

async fn run_worker(
    worker: usize,
    repo: SessionRepository,
    id: String,
    rounds: u32,
) -> stratus_session::Result<WorkerTally> {
    let mut tally = WorkerTally::default();

    for round in 0..rounds {
        let Some(mut session) = repo.find_by_id(&id).await? else {
            tally.misses += 1;
            continue;
        };

        let count = session.attribute_as::<u64>(COUNTER).unwrap_or(0) + 1;
        // Give other workers a chance to interleave between read and save.
        tokio::task::yield_now().await;
        session.set_attribute(COUNTER, count);
        repo.save(&mut session).await?;

        tally.increments += 1;
        debug!(worker, round, count, "Round complete");
    }

    Ok(tally)
}

fn print_report(report: &DrillReport) {
    let dim = Style::new().dim();
    let verdict = if report.lost_updates == 0 {
        Style::new().green().apply_to("● no lost updates".to_string())
    } else {
        Style::new()
            .yellow()
            .apply_to(format!("● {} lost update(s)", report.lost_updates))
    };

    println!();
    println!("{}", style("Stratus Drill").bold());
    println!("{}", dim.apply_to("─".repeat(40)));
    println!();
    println!(
        "  {} {} x {} rounds on {} instance(s)",
        dim.apply_to("Workers:"),
        report.workers,
        report.rounds,
        report.instances
    );
    println!(
        "  {} {}",
        dim.apply_to("Locking:"),
        if report.locking { "on" } else { "off" }
    );
    println!("  {} {}", dim.apply_to("Saves:"), report.increments);
    println!("  {} {}", dim.apply_to("Misses:"), report.misses);
    println!("  {} {}", dim.apply_to("Counter:"), report.observed);
    println!("  {} {}ms", dim.apply_to("Elapsed:"), report.elapsed_ms);
    println!();
    println!("  {}", verdict);
    println!();
}
