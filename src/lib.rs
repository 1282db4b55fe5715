pub mod bus;
pub mod config;
pub mod driver;
pub mod executor;
pub mod items;
pub mod model;
pub mod nodes;
pub mod orchestrator;
pub mod recovery;
pub mod stats;
pub mod store;
pub mod worker;

pub use bus::{BusError, MemoryTaskBus, SubscriberConfig, TaskBus, TaskHandler, TaskSubscriber};
pub use config::{
    OrchestratorSettings, OrchestratorSettingsBuilder, WorkerSettings, WorkerSettingsBuilder,
};
pub use driver::{
    BrowserDriver, CdpDriver, Driver, DriverError, DriverManager, DriverManagerConfig, DynPage,
    Element, Page, PageContext, StaticHttpDriver,
};
pub use executor::{ExecError, RetryPolicy, TaskExecutor, TaskExecutorConfig};
pub use items::{ItemSink, ItemWriter, ItemWriterConfig, MemoryItemSink, PostgresItemSink};
pub use model::{
    BrowserFamily, BrowserProfile, DriverKind, ExecutedItem, Execution, ExecutionStatus,
    IncidentReport, Node, Phase, PhaseType, Proxy, StatsDelta, Task, UrlFilter, Workflow,
    WorkflowConfig,
};
pub use nodes::{ExecutionContext, NodeExecutor, NodeRegistry};
pub use orchestrator::{MemoryProfileStore, Orchestrator, OrchestratorConfig, ProfileStore};
pub use recovery::{ErrorPattern, RecoveryAction, RecoveryManager, RecoveryPlan, RuleEngine};
pub use stats::{ExecutionCounters, StatsReporter, StatsSink};
pub use store::{Deduplicator, KvStore, MemoryKvStore, RedisKvStore, StoreError};
pub use worker::Worker;
