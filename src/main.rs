use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pg_stmt_cache::workload::{self, WorkloadReport};
use pg_stmt_cache::{connect, CacheConfig, PgConfig};

#[derive(Parser)]
#[command(name = "pg-stmt-cache-demo")]
#[command(about = "Run a short transactional workload with and without a statement cache", long_about = None)]
struct Cli {
    /// Connection string (overrides PGSTMT_DSN)
    #[arg(long)]
    dsn: Option<String>,

    /// Statement cache capacity (overrides PGSTMT_CACHE_CAPACITY)
    #[arg(long)]
    capacity: Option<usize>,

    /// Which runs to perform
    #[arg(long, value_enum, default_value_t = Mode::Both)]
    mode: Mode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    Both,
    Cached,
    Uncached,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut config = PgConfig::from_env();
    if let Some(dsn) = cli.dsn {
        config.dsn = dsn;
    }
    if let Some(capacity) = cli.capacity {
        config.cache.capacity = capacity;
    }

    setup(&config).await.context("setup")?;

    if cli.mode != Mode::Uncached {
        info!("=== With statement cache ===");
        let cached = config.clone().with_cache(CacheConfig {
            enabled: true,
            ..config.cache.clone()
        });
        run(&cached).await?;
    }

    if cli.mode != Mode::Cached {
        info!("=== Without statement cache ===");
        let uncached = config.clone().with_cache(CacheConfig::disabled());
        run(&uncached).await?;
    }

    Ok(())
}

async fn setup(config: &PgConfig) -> Result<()> {
    let mut conn = connect(config)
        .await
        .context("failed to connect to database")?;
    workload::setup(&mut conn).await?;
    conn.close().await?;
    Ok(())
}

async fn run(config: &PgConfig) -> Result<()> {
    let mut conn = connect(config)
        .await
        .context("failed to connect to database")?;

    let report = workload::run(&mut conn).await?;
    summarize(&report);

    if let Some(stats) = conn.cache_stats() {
        info!("cache stats: {}", serde_json::to_string(&stats)?);
    }

    conn.close().await?;
    Ok(())
}

fn summarize(report: &WorkloadReport) {
    if report.is_expected() {
        info!("workload behaved as expected");
    } else {
        error!(
            "unexpected workload outcome: {} rows before drop, second select {}",
            report.first_select.len(),
            if report.second_select.is_ok() { "succeeded" } else { "failed" }
        );
    }
}
