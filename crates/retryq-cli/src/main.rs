use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::json;
use tokio::time::{Duration, Instant, sleep};
use tracing::info;

use retryq_core::app::{Producer, WorkerGroup, WorkerSettings, run_parallel, run_sequential};
use retryq_core::impls::{InMemoryBroker, SimulatedExecutor};
use retryq_core::{Config, observability};

#[derive(Debug, Parser)]
#[command(name = "retryq", about = "Task queue with bounded retries and a dead-letter queue")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Produce tasks into an in-process broker and run workers until every task settles.
    Run {
        #[arg(long, default_value_t = 10_000)]
        num_tasks: u64,

        #[arg(long, default_value_t = 4)]
        workers: usize,

        /// Overrides RETRYQ_RETRY_LIMIT.
        #[arg(long)]
        retry_limit: Option<u32>,

        #[arg(long, default_value_t = SimulatedExecutor::DEFAULT_FAILURE_RATE)]
        failure_rate: f64,
    },

    /// Process the same workload without a broker, for comparison.
    Baseline {
        #[arg(long, default_value_t = 10_000)]
        num_tasks: u64,

        /// Run sequentially when omitted.
        #[arg(long)]
        workers: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    observability::init("info");

    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            num_tasks,
            workers,
            retry_limit,
            failure_rate,
        } => run(num_tasks, workers, retry_limit, failure_rate).await,
        Command::Baseline { num_tasks, workers } => baseline(num_tasks, workers).await,
    }
}

async fn run(num_tasks: u64, workers: usize, retry_limit: Option<u32>, failure_rate: f64) -> Result<()> {
    if workers == 0 {
        bail!("--workers must be at least 1");
    }

    let mut config = Config::from_env().context("loading configuration")?;
    if let Some(retry_limit) = retry_limit {
        config.retry_limit = retry_limit;
    }
    info!(
        broker_host = %config.broker_host,
        task_queue = %config.task_queue,
        retry_limit = config.retry_limit,
        ack_mode = %config.ack_mode,
        "starting run"
    );

    let broker = InMemoryBroker::without_publish_log();
    let executor = Arc::new(SimulatedExecutor::new(
        failure_rate,
        SimulatedExecutor::DEFAULT_LATENCY,
    ));
    let settings = WorkerSettings::from(&config);

    let started = Instant::now();
    let group = WorkerGroup::start(workers, Arc::new(broker.clone()), executor, settings)
        .await
        .context("starting workers")?;

    let mut producer = Producer::connect(&broker, config.task_queue.as_str())
        .await
        .context("connecting producer")?;
    let published = producer.publish(num_tasks).await.context("publishing tasks")?;
    producer.close().await;

    // 全タスクが成功か dead-letter に落ちるまで待つ
    while group.snapshot().settled() < num_tasks && !group.any_finished() {
        sleep(Duration::from_millis(50)).await;
    }
    let stats = group.shutdown_and_join().await.context("worker failed")?;
    let elapsed = started.elapsed();

    let summary = json!({
        "published": published.published,
        "workers": workers,
        "retry_limit": config.retry_limit,
        "ack_mode": config.ack_mode,
        "stats": stats,
        "dead_letter_queue_len": broker.queue_len(&config.dead_letter_queue).await,
        "elapsed_s": elapsed.as_secs_f64(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn baseline(num_tasks: u64, workers: Option<usize>) -> Result<()> {
    let executor = Arc::new(SimulatedExecutor::default());
    let report = match workers {
        None => run_sequential(num_tasks, executor.as_ref()).await,
        Some(workers) => run_parallel(num_tasks, workers, executor)
            .await
            .context("baseline worker failed")?,
    };

    let summary = json!({
        "report": report,
        "throughput": report.throughput(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
