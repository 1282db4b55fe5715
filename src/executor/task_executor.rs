//! The per-task lifecycle
//!
//! filter → dedup → driver resolution → phase nodes with retry → item
//! persistence → discovered-URL requeue → stats → recovery on failure.
//! The executor is the bus subscription's handler: returning `Ok` acks the
//! message, returning `Err` nacks it for bus-level redelivery.

use async_trait::async_trait;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::bus::{TaskBus, TaskHandler};
use crate::driver::{
    DriverHandle, DriverManager, DynPage, PageContext,
};
use crate::items::ItemWriter;
use crate::model::{BrowserFamily, DriverKind, ExecutedItem, StatsDelta, Task};
use crate::nodes::{
    DriverSwitcher, ExecutionContext, NodeRegistry, SwitchTarget, run_phase_nodes,
};
use crate::recovery::RecoveryManager;
use crate::stats::{ExecutionCounters, StatsReporter};
use crate::store::{Deduplicator, KvStore};

use super::errors::ExecError;
use super::requeue::requeue_discovered;
use super::retry::{RetryPolicy, retry_with_policy};

/// Executor tuning
#[derive(Debug, Clone)]
pub struct TaskExecutorConfig {
    pub retry_policy: RetryPolicy,
    /// Hard ceiling on a task's node phase, below the bus ack deadline
    pub task_timeout: Duration,
    /// How much page content the recovery classifier gets to sniff
    pub classifier_content_limit: usize,
}

impl Default for TaskExecutorConfig {
    fn default() -> Self {
        Self {
            retry_policy: RetryPolicy::default(),
            task_timeout: Duration::from_secs(300),
            classifier_content_limit: 4_096,
        }
    }
}

/// Everything a worker needs to run one task end to end
pub struct TaskExecutor {
    registry: Arc<NodeRegistry>,
    drivers: Arc<DriverManager>,
    bus: Arc<dyn TaskBus>,
    dedup: Arc<Deduplicator>,
    items: Arc<ItemWriter>,
    stats: Arc<StatsReporter>,
    recovery: Arc<RecoveryManager>,
    counters: Arc<ExecutionCounters>,
    kv: Arc<dyn KvStore>,
    config: TaskExecutorConfig,
}

impl TaskExecutor {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        registry: Arc<NodeRegistry>,
        drivers: Arc<DriverManager>,
        bus: Arc<dyn TaskBus>,
        dedup: Arc<Deduplicator>,
        items: Arc<ItemWriter>,
        stats: Arc<StatsReporter>,
        recovery: Arc<RecoveryManager>,
        counters: Arc<ExecutionCounters>,
        kv: Arc<dyn KvStore>,
        config: TaskExecutorConfig,
    ) -> Self {
        Self {
            registry,
            drivers,
            bus,
            dedup,
            items,
            stats,
            recovery,
            counters,
            kv,
            config,
        }
    }

    async fn process(&self, task: Task) -> Result<(), ExecError> {
        if let Err(message) = validate(&task) {
            warn!("dropping invalid task {}: {message}", task.task_id);
            return Ok(());
        }

        if self.is_execution_cancelled(&task.execution_id).await {
            debug!("execution {} cancelled, dropping task {}", task.execution_id, task.task_id);
            return Ok(());
        }

        // phase filter: a task whose marker/depth the phase rejects is acked
        // with no work
        if !task.phase_config.accepts(&task.marker, task.depth) {
            debug!(
                "task {} rejected by url filter of phase {}",
                task.task_id, task.phase_id
            );
            return Ok(());
        }

        // cross-worker dedup: exactly one claimer executes this URL for
        // this (execution, phase)
        if !self
            .dedup
            .claim(&task.execution_id, &task.phase_id, &task.url)
            .await?
        {
            debug!("task {} lost dedup claim for {}", task.task_id, task.url);
            return Ok(());
        }

        let switcher = Arc::new(TaskSwitcher::new(Arc::clone(&self.drivers)));
        let outcome = self.run_task(&task, Arc::clone(&switcher)).await;
        switcher.teardown().await;

        match outcome {
            Ok(output) => self.complete(&task, output).await,
            Err(failure) => self.fail(&task, failure).await,
        }
    }

    async fn run_task(
        &self,
        task: &Task,
        switcher: Arc<TaskSwitcher>,
    ) -> Result<TaskOutput, TaskFailure> {
        let (handle, page_ctx) = self.resolve_driver(task).await.map_err(|e| TaskFailure {
            error: e,
            status: None,
            content: None,
        })?;

        let page = retry_with_policy(self.config.retry_policy, "page acquisition", || {
            let driver = handle.driver();
            let page_ctx = page_ctx.clone();
            async move { driver.new_page(&page_ctx).await }
        })
        .await
        .map_err(|e| TaskFailure {
            error: ExecError::from(e),
            status: None,
            content: None,
        })?;

        if handle.is_owned() {
            switcher.track(handle).await;
        }

        let cancellations = CancelProbe {
            kv: Arc::clone(&self.kv),
            execution_id: task.execution_id.clone(),
        };
        let mut ctx = ExecutionContext::new(page, task.clone())
            .with_switcher(switcher as Arc<dyn DriverSwitcher>)
            .with_cancel_check(cancellations.into_check());

        let nodes = task.phase_config.nodes.clone();
        let phase_run = run_phase_nodes(
            &self.registry,
            &mut ctx,
            &nodes,
            self.config.retry_policy,
        );
        if tokio::time::timeout(self.config.task_timeout, phase_run)
            .await
            .is_err()
        {
            ctx.errors.push(ExecError::TransientIo(format!(
                "task timed out after {:?}",
                self.config.task_timeout
            )));
        }

        let produced_output = !ctx.extracted_items.is_empty() || !ctx.discovered_urls.is_empty();
        let status = ctx.page.last_status();

        // whole-phase failure only when nothing useful came out and an
        // error survived the per-node retries
        if !produced_output && !ctx.errors.is_empty() {
            let content = ctx
                .page
                .content()
                .await
                .ok()
                .map(|c| truncate(c, self.config.classifier_content_limit));
            let error = ctx
                .errors
                .drain(..)
                .reduce(ExecError::max_severity)
                .unwrap_or_else(|| ExecError::TransientIo("unknown failure".to_string()));
            close_page(&ctx.page).await;
            return Err(TaskFailure { error, status, content });
        }

        close_page(&ctx.page).await;
        Ok(TaskOutput {
            items: ctx.extracted_items,
            discovered: ctx.discovered_urls,
            error_count: ctx.errors.len() as u64,
        })
    }

    /// Successful task: persist, requeue, report, clear failure state
    async fn complete(&self, task: &Task, output: TaskOutput) -> Result<(), ExecError> {
        for data in &output.items {
            self.items
                .write(ExecutedItem::new(
                    &task.execution_id,
                    &task.workflow_id,
                    &task.task_id,
                    &task.url,
                    data.clone(),
                ))
                .await;
        }

        let mut published = 0;
        if !self.is_execution_cancelled(&task.execution_id).await {
            published = match requeue_discovered(
                task,
                &output.discovered,
                &self.dedup,
                self.bus.as_ref(),
                &self.counters,
            )
            .await
            {
                Ok(published) => published,
                Err(e) => {
                    // give the claim back so the bus's redelivery can rerun
                    // the task instead of short-circuiting on it
                    let _ = self.release_claim(task).await;
                    return Err(e);
                }
            };
        }

        self.stats.record(
            &task.execution_id,
            StatsDelta {
                tasks_processed: 1,
                items_extracted: output.items.len() as u64,
                urls_discovered: published,
                errors: output.error_count,
            },
        );

        if let Err(e) = self.recovery.record_task_success(task).await {
            warn!("recovery success bookkeeping failed for {}: {e}", task.task_id);
        }

        info!(
            "task {} completed: {} items, {} children",
            task.task_id,
            output.items.len(),
            published
        );
        Ok(())
    }

    /// Failed task: consult recovery and act on the plan
    ///
    /// The dedup claim is released only on paths that lead to another
    /// attempt; terminal outcomes keep it, so a duplicate delivery of a
    /// dead-lettered task short-circuits instead of dead-lettering twice.
    async fn fail(&self, task: &Task, failure: TaskFailure) -> Result<(), ExecError> {
        warn!("task {} failed: {}", task.task_id, failure.error);
        self.stats.record(
            &task.execution_id,
            StatsDelta { errors: 1, ..StatsDelta::default() },
        );

        let plan = match self
            .recovery
            .try_recover(
                task,
                &failure.error.to_string(),
                failure.status,
                failure.content.as_deref(),
            )
            .await
        {
            Ok(plan) => plan,
            Err(e) => {
                let _ = self.release_claim(task).await;
                return Err(e.into());
            }
        };

        let Some(plan) = plan else {
            // recorded but below the recovery threshold; the bus retries
            self.release_claim(task).await?;
            return Err(failure.error);
        };

        if plan.should_retry {
            self.release_claim(task).await?;
            let mut retry = task.clone();
            retry.retry_count += 1;
            if let Some((proxy_id, proxy_url)) = plan.proxy_assignment() {
                retry.proxy_id = Some(proxy_id);
                retry.proxy_url = Some(proxy_url);
            }
            if let Some(delay) = plan.retry_delay {
                tokio::time::sleep(delay).await;
            }
            self.bus
                .publish_task(&retry)
                .await
                .map_err(|e| ExecError::Fatal(format!("retry publish failed: {e}")))?;
            self.counters.incr_published(&task.execution_id, 1).await?;
            self.record_processed(&task.execution_id);
            info!(
                "task {} republished (retry {} via {})",
                task.task_id, retry.retry_count, plan.action
            );
            return Ok(());
        }

        if plan.is_dlq() {
            // the terminal marker keeps concurrent duplicates from
            // dead-lettering the same task twice
            let fresh = self
                .kv
                .set_nx(
                    &format!("dlq:{}", task.task_id),
                    "1",
                    Some(Duration::from_secs(24 * 60 * 60)),
                )
                .await?;
            if fresh {
                self.bus
                    .publish_to_dlq(task, &plan.reason)
                    .await
                    .map_err(|e| ExecError::Fatal(format!("dlq publish failed: {e}")))?;
                warn!("task {} dead-lettered: {}", task.task_id, plan.reason);
            }
            self.record_processed(&task.execution_id);
            return Ok(());
        }

        if plan.action == "skip_domain" {
            // the domain is benched; dropping the task is the plan
            self.record_processed(&task.execution_id);
            debug!("task {} dropped: {}", task.task_id, plan.reason);
            return Ok(());
        }

        // a plan with no disposition surfaces the error for bus retry
        self.release_claim(task).await?;
        Err(failure.error)
    }

    async fn release_claim(&self, task: &Task) -> Result<(), ExecError> {
        self.dedup
            .release(&task.execution_id, &task.phase_id, &task.url)
            .await?;
        Ok(())
    }

    fn record_processed(&self, execution_id: &str) {
        self.stats.record(
            execution_id,
            StatsDelta { tasks_processed: 1, ..StatsDelta::default() },
        );
    }

    async fn is_execution_cancelled(&self, execution_id: &str) -> bool {
        matches!(
            self.kv.get(&cancellation_key(execution_id)).await,
            Ok(Some(_))
        )
    }

    /// Driver precedence: first-node override, then task/workflow profile,
    /// then the worker default
    async fn resolve_driver(
        &self,
        task: &Task,
    ) -> Result<(DriverHandle, PageContext), ExecError> {
        let first_node = task.phase_config.nodes.first();
        let node_driver = first_node
            .and_then(|n| n.param_str("driver"))
            .and_then(DriverKind::parse);

        let profile_id = task
            .browser_profile_id
            .clone()
            .or_else(|| task.workflow_config.default_profile_id.clone());

        if node_driver.is_none()
            && let Some(profile_id) = profile_id
        {
            if let Some(profile) = task.metadata.node_profiles.get(&profile_id) {
                let handle = self
                    .drivers
                    .create_for_profile(profile)
                    .await
                    .map_err(ExecError::from)?;
                let mut page_ctx = DriverManager::profile_context(profile);
                if page_ctx.proxy.is_none() {
                    page_ctx.proxy = task_proxy(task);
                }
                return Ok((handle, page_ctx));
            }
            warn!(
                "task {} references unknown profile {profile_id}, using default driver",
                task.task_id
            );
        }

        let kind = node_driver.unwrap_or_else(|| self.drivers.default_driver());
        let handle = self
            .drivers
            .acquire(kind, task.proxy_url.as_deref())
            .await
            .map_err(ExecError::from)?;

        let mut page_ctx = PageContext::new();
        if let Some(proxy) = task_proxy(task) {
            page_ctx = page_ctx.with_proxy(proxy);
        }
        if kind == DriverKind::Http {
            // ClientHello/UA name: node params beat the workflow default,
            // chrome closes the gap
            let family = first_node
                .and_then(|n| n.param_str("browser"))
                .map(BrowserFamily::parse)
                .or_else(|| {
                    task.workflow_config
                        .default_browser_name
                        .as_deref()
                        .map(BrowserFamily::parse)
                })
                .unwrap_or_default();
            page_ctx = page_ctx.with_fingerprint(family);
        }
        Ok((handle, page_ctx))
    }
}

#[async_trait]
impl TaskHandler for TaskExecutor {
    async fn handle(&self, task: Task) -> Result<(), ExecError> {
        self.process(task).await
    }
}

struct TaskOutput {
    items: Vec<serde_json::Value>,
    discovered: Vec<crate::nodes::DiscoveredUrl>,
    error_count: u64,
}

struct TaskFailure {
    error: ExecError,
    status: Option<u16>,
    content: Option<String>,
}

fn validate(task: &Task) -> Result<(), String> {
    if task.url.is_empty() {
        return Err("empty url".to_string());
    }
    if task.execution_id.is_empty() || task.workflow_id.is_empty() {
        return Err("missing execution or workflow id".to_string());
    }
    if task.phase_config.id != task.phase_id {
        return Err(format!(
            "phase snapshot {} does not match phase_id {}",
            task.phase_config.id, task.phase_id
        ));
    }
    Ok(())
}

fn task_proxy(task: &Task) -> Option<crate::model::ProxyConfig> {
    task.proxy_url.as_ref().map(|url| crate::model::ProxyConfig {
        url: url.clone(),
        username: None,
        password: None,
    })
}

#[must_use]
pub fn cancellation_key(execution_id: &str) -> String {
    format!("execution:cancelled:{execution_id}")
}

fn truncate(mut content: String, limit: usize) -> String {
    if content.len() > limit {
        let mut cut = limit;
        while cut > 0 && !content.is_char_boundary(cut) {
            cut -= 1;
        }
        content.truncate(cut);
    }
    content
}

async fn close_page(page: &DynPage) {
    if let Err(e) = page.close().await {
        debug!("page close failed: {e}");
    }
}

/// Cancellation probe backed by the shared kv-store
///
/// The kv read happens on a background refresher so the between-node check
/// stays synchronous.
struct CancelProbe {
    kv: Arc<dyn KvStore>,
    execution_id: String,
}

impl CancelProbe {
    fn into_check(self) -> Arc<dyn Fn() -> bool + Send + Sync> {
        let flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
        // the poller holds only a weak reference, so it dies with the task
        // context instead of outliving it
        let weak_flag = Arc::downgrade(&flag);
        let kv = self.kv;
        let execution_id = self.execution_id;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(2));
            loop {
                interval.tick().await;
                let Some(flag) = weak_flag.upgrade() else { break };
                if let Ok(Some(_)) = kv.get(&cancellation_key(&execution_id)).await {
                    flag.store(true, std::sync::atomic::Ordering::SeqCst);
                    break;
                }
            }
        });

        Arc::new(move || flag.load(std::sync::atomic::Ordering::SeqCst))
    }
}

/// Tracks drivers created for this task (profiles and switches) so they
/// are all closed when the task returns, success or not
pub struct TaskSwitcher {
    drivers: Arc<DriverManager>,
    scoped: Mutex<Vec<DriverHandle>>,
}

impl TaskSwitcher {
    #[must_use]
    pub fn new(drivers: Arc<DriverManager>) -> Self {
        Self { drivers, scoped: Mutex::new(Vec::new()) }
    }

    pub async fn track(&self, handle: DriverHandle) {
        self.scoped.lock().await.push(handle);
    }

    /// Close every task-scoped driver
    pub async fn teardown(&self) {
        let handles = {
            let mut scoped = self.scoped.lock().await;
            std::mem::take(&mut *scoped)
        };
        for handle in handles {
            handle.release().await;
        }
    }
}

impl Drop for TaskSwitcher {
    fn drop(&mut self) {
        // teardown normally drains this; after an unwind the drop is the
        // last chance to close task-scoped browsers
        let handles = std::mem::take(self.scoped.get_mut());
        if handles.is_empty() {
            return;
        }
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            for handle in handles {
                runtime.spawn(async move { handle.release().await });
            }
        }
    }
}

#[async_trait]
impl DriverSwitcher for TaskSwitcher {
    async fn open_page(&self, task: &Task, target: &SwitchTarget) -> Result<DynPage, ExecError> {
        match target {
            SwitchTarget::Profile(profile_id) => {
                let profile = task.metadata.node_profiles.get(profile_id).ok_or_else(|| {
                    ExecError::Validation(format!("unknown profile in switch: {profile_id}"))
                })?;
                let handle = self
                    .drivers
                    .create_for_profile(profile)
                    .await
                    .map_err(ExecError::from)?;
                let page_ctx = DriverManager::profile_context(profile);
                let page = handle
                    .driver()
                    .new_page(&page_ctx)
                    .await
                    .map_err(ExecError::from)?;
                self.track(handle).await;
                Ok(page)
            }
            SwitchTarget::Fingerprint { driver, family } => {
                self.open_named(task, driver, Some(BrowserFamily::parse(family)))
                    .await
            }
            SwitchTarget::Name(driver) => self.open_named(task, driver, None).await,
        }
    }
}

impl TaskSwitcher {
    async fn open_named(
        &self,
        task: &Task,
        driver: &str,
        family: Option<BrowserFamily>,
    ) -> Result<DynPage, ExecError> {
        let kind = DriverKind::parse(driver).ok_or_else(|| {
            ExecError::Validation(format!("unknown driver in switch: {driver}"))
        })?;
        let handle = self
            .drivers
            .acquire(kind, task.proxy_url.as_deref())
            .await
            .map_err(ExecError::from)?;

        let mut page_ctx = PageContext::new();
        if let Some(proxy) = task_proxy(task) {
            page_ctx = page_ctx.with_proxy(proxy);
        }
        if let Some(family) = family {
            page_ctx = page_ctx.with_fingerprint(family);
        } else if kind == DriverKind::Http
            && let Some(default_family) = task.workflow_config.default_browser_name.as_deref()
        {
            page_ctx = page_ctx.with_fingerprint(BrowserFamily::parse(default_family));
        }

        let page = handle
            .driver()
            .new_page(&page_ctx)
            .await
            .map_err(ExecError::from)?;
        if handle.is_owned() {
            self.track(handle).await;
        }
        Ok(page)
    }
}
