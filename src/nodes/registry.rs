//! Node registry and phase runner
//!
//! The registry maps node type tags to executors. Phase execution is
//! sequential; after each top-level node the branch queue is drained
//! through the same registry, bounded so cyclic node definitions cannot
//! run away. Node failures are recorded and the sequence continues.

use async_trait::async_trait;
use dashmap::DashMap;
use log::{debug, warn};
use std::sync::Arc;

use super::context::ExecutionContext;
use crate::executor::{ExecError, RetryPolicy};
use crate::model::Node;
use crate::recovery::classifier::is_transient_message;

/// Branch nodes drained per top-level node before giving up
const MAX_BRANCH_NODES: usize = 256;

/// One pluggable node operation
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// The registry key this executor answers to
    fn node_type(&self) -> &'static str;

    async fn execute(&self, node: &Node, ctx: &mut ExecutionContext) -> Result<(), ExecError>;
}

/// Thread-safe tag → executor map
pub struct NodeRegistry {
    executors: DashMap<String, Arc<dyn NodeExecutor>>,
}

impl NodeRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self { executors: DashMap::new() }
    }

    /// Registry with every built-in executor installed
    #[must_use]
    pub fn with_builtins() -> Arc<Self> {
        let registry = Arc::new(Self::new());

        registry.register(Arc::new(super::navigate::NavigateExecutor));
        registry.register(Arc::new(super::interact::ClickExecutor));
        registry.register(Arc::new(super::interact::TypeExecutor));
        registry.register(Arc::new(super::interact::InputExecutor));
        registry.register(Arc::new(super::interact::HoverExecutor));
        registry.register(Arc::new(super::interact::ScrollExecutor));
        registry.register(Arc::new(super::interact::ScreenshotExecutor));
        registry.register(Arc::new(super::wait::WaitExecutor));
        registry.register(Arc::new(super::wait::WaitForExecutor));
        registry.register(Arc::new(super::extract::ExtractExecutor::new(
            Arc::downgrade(&registry),
        )));
        registry.register(Arc::new(super::links::LinksExecutor::extract_links()));
        registry.register(Arc::new(super::links::LinksExecutor::discover_links()));
        registry.register(Arc::new(super::paginate::PaginateExecutor));
        registry.register(Arc::new(super::paginate::InfiniteScrollExecutor));
        registry.register(Arc::new(super::script::ScriptExecutor));
        registry.register(Arc::new(super::control::ConditionalExecutor));
        registry.register(Arc::new(super::control::LoopExecutor::new(
            Arc::downgrade(&registry),
        )));

        registry
    }

    pub fn register(&self, executor: Arc<dyn NodeExecutor>) {
        self.executors
            .insert(executor.node_type().to_string(), executor);
    }

    #[must_use]
    pub fn get(&self, node_type: &str) -> Option<Arc<dyn NodeExecutor>> {
        self.executors.get(node_type).map(|e| Arc::clone(e.value()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.executors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Run one node, retrying transient failures per the policy
pub async fn run_node(
    registry: &NodeRegistry,
    ctx: &mut ExecutionContext,
    node: &Node,
    policy: RetryPolicy,
) -> Result<(), ExecError> {
    let executor = registry.get(&node.node_type).ok_or_else(|| {
        ExecError::Validation(format!("unknown node type: {}", node.node_type))
    })?;

    let mut attempt = 1;
    loop {
        match executor.execute(node, ctx).await {
            Ok(()) => return Ok(()),
            Err(ExecError::TransientIo(message))
                if attempt < policy.max_attempts && is_transient_message(&message) =>
            {
                let delay = policy.delay(attempt);
                debug!(
                    "node {} ({}) attempt {attempt}/{} failed transiently ({message}), retrying in {delay:?}",
                    node.id, node.node_type, policy.max_attempts
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Run a phase's node list sequentially
///
/// Failures are recorded into the context and execution continues; the
/// caller inspects `ctx.errors` and the produced output to decide whether
/// the phase failed as a whole.
pub async fn run_phase_nodes(
    registry: &NodeRegistry,
    ctx: &mut ExecutionContext,
    nodes: &[Node],
    policy: RetryPolicy,
) {
    for node in nodes {
        // cancellation takes effect after the node that was running when it
        // arrived, never mid-node
        if ctx.is_cancelled() {
            debug!("execution cancelled, dropping remaining nodes");
            break;
        }
        if let Err(e) = run_node(registry, ctx, node, policy).await {
            warn!("node {} ({}) failed: {e}", node.id, node.node_type);
            ctx.errors.push(e);
        }

        // drain branch nodes queued by this node before moving on
        let mut drained = 0;
        while let Some(branch) = ctx.branch_queue.pop_front() {
            if drained >= MAX_BRANCH_NODES {
                warn!(
                    "branch queue exceeded {MAX_BRANCH_NODES} nodes after {}; dropping the rest",
                    node.id
                );
                ctx.branch_queue.clear();
                ctx.errors.push(ExecError::Validation(
                    "branch node limit exceeded".to_string(),
                ));
                break;
            }
            drained += 1;
            if let Err(e) = run_node(registry, ctx, &branch, policy).await {
                warn!("branch node {} ({}) failed: {e}", branch.id, branch.node_type);
                ctx.errors.push(e);
            }
        }
    }
}
