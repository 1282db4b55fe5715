// Crawlify entry point
//
// `crawlify worker` runs a stateless worker against the configured bus and
// stores; `crawlify run <workflow.json>` executes a workflow end to end in
// one process with the in-memory bus, which is the development and
// smoke-test path.

use anyhow::{Context, Result, bail};
use std::sync::Arc;

use crawlify::bus::MemoryTaskBus;
use crawlify::config::{OrchestratorSettingsBuilder, WorkerSettingsBuilder};
use crawlify::model::Workflow;
use crawlify::orchestrator::{MemoryProfileStore, Orchestrator, OrchestratorConfig};
use crawlify::worker::Worker;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    match args.get(1).map(String::as_str) {
        Some("worker") => run_worker().await,
        Some("run") => {
            let path = args
                .get(2)
                .context("usage: crawlify run <workflow.json>")?;
            run_local(path).await
        }
        _ => {
            eprintln!("usage: crawlify <worker|run <workflow.json>>");
            std::process::exit(2);
        }
    }
}

async fn run_worker() -> Result<()> {
    let settings = WorkerSettingsBuilder::from_env()
        .build()
        .context("invalid worker settings")?;

    let bus = Arc::new(MemoryTaskBus::new(settings.bus_capacity()));
    let worker = Worker::build(settings, Arc::clone(&bus) as _, bus as _)
        .await
        .context("worker setup failed")?;
    worker.run().await
}

/// Single-process mode: orchestrator and worker share an in-memory bus
async fn run_local(workflow_path: &str) -> Result<()> {
    let raw = std::fs::read_to_string(workflow_path)
        .with_context(|| format!("reading {workflow_path}"))?;
    let workflow: Workflow =
        serde_json::from_str(&raw).with_context(|| format!("parsing {workflow_path}"))?;
    if workflow.seed_urls.is_empty() {
        bail!("workflow {} declares no seed urls", workflow.id);
    }

    let worker_settings = WorkerSettingsBuilder::from_env()
        .build()
        .context("invalid worker settings")?;
    let orchestrator_settings = OrchestratorSettingsBuilder::from_env()
        .build()
        .context("invalid orchestrator settings")?;

    let bus = Arc::new(MemoryTaskBus::new(worker_settings.bus_capacity()));
    let kv = worker_kv_from_env().await?;
    let worker = Worker::build_with_kv(
        worker_settings,
        Arc::clone(&bus) as _,
        Arc::clone(&bus) as _,
        Arc::clone(&kv),
    )
    .await
    .context("worker setup failed")?;
    let orchestrator = Orchestrator::new(
        Arc::clone(&bus) as _,
        kv,
        Arc::new(MemoryProfileStore::new()),
        OrchestratorConfig {
            poll_interval: orchestrator_settings.poll_interval(),
            quiescence_ticks: orchestrator_settings.quiescence_ticks(),
        },
    );

    let execution = orchestrator
        .start_execution(&workflow)
        .await
        .context("starting execution")?;
    println!("execution {} started", execution.execution_id);

    let worker_task = tokio::spawn(worker.run());
    let finished = orchestrator
        .monitor_to_completion(&execution.execution_id)
        .await
        .context("monitoring execution")?;

    println!(
        "execution {} {:?}: {} tasks, {} items, {} urls, {} errors",
        finished.execution_id,
        finished.status,
        finished.stats.tasks_processed,
        finished.stats.items_extracted,
        finished.stats.urls_discovered,
        finished.stats.errors,
    );

    worker_task.abort();
    Ok(())
}

async fn worker_kv_from_env() -> Result<Arc<dyn crawlify::store::KvStore>> {
    match std::env::var("CRAWLIFY_REDIS_URL").ok().filter(|v| !v.is_empty()) {
        Some(url) => Ok(Arc::new(
            crawlify::store::RedisKvStore::connect(&url)
                .await
                .context("kv-store connect failed")?,
        )),
        None => Ok(Arc::new(crawlify::store::MemoryKvStore::new())),
    }
}
