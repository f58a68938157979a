//! HTTP surface and composition root.
//!
//! The whole pipeline is wired here once at startup: the verifier
//! and replay cache guard ingestion, the parser runs inline on the request
//! path, and execution is decoupled through a priority work queue drained by
//! a worker pool. Handlers live in `http`; this module owns state
//! construction and the workers.

mod http;

pub use http::router;

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify, RwLock};
use tokio_util::sync::CancellationToken;

use courier_agents::{AgentRegistry, LlmClient, MailClient};
use courier_orchestrator::{AgentOrchestrator, WorkflowEngine};
use courier_parser::EmailParser;
use courier_runtime::{BreakerBoard, ExecutionMode, MultiAgentExecutor};
use courier_security::{MemoryReplayBackend, ReplayCache, SignatureVerifier};
use courier_store::{
    AgentResponseCache, Cache, DeadLetterQueue, MemoryCache, MemoryTaskStore, TaskSnapshotCache,
    TaskStore,
};
use courier_types::{CourierConfig, Task, TaskPriority, TaskStatus};

/// One unit of queued work: a parsed task plus its selected workflow.
#[derive(Debug, Clone)]
pub struct QueuedWork {
    pub task: Task,
    pub workflow_type: String,
}

/// FIFO queue per priority class; high drains ahead of medium ahead of low.
pub struct WorkQueue {
    classes: Mutex<[VecDeque<QueuedWork>; 3]>,
    notify: Notify,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self {
            classes: Mutex::new([VecDeque::new(), VecDeque::new(), VecDeque::new()]),
            notify: Notify::new(),
        }
    }

    fn class(priority: TaskPriority) -> usize {
        match priority {
            TaskPriority::Urgent | TaskPriority::High => 0,
            TaskPriority::Medium => 1,
            TaskPriority::Low => 2,
        }
    }

    pub async fn push(&self, work: QueuedWork) {
        let class = Self::class(work.task.priority);
        self.classes.lock().await[class].push_back(work);
        self.notify.notify_one();
    }

    async fn try_pop(&self) -> Option<QueuedWork> {
        let mut classes = self.classes.lock().await;
        classes.iter_mut().find_map(|q| q.pop_front())
    }

    pub async fn pop(&self) -> QueuedWork {
        loop {
            let notified = self.notify.notified();
            if let Some(work) = self.try_pop().await {
                return work;
            }
            notified.await;
        }
    }

    pub async fn depth(&self) -> usize {
        self.classes.lock().await.iter().map(VecDeque::len).sum()
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Cooperative cancellation handles for queued and running tasks.
#[derive(Default)]
pub struct CancellationRegistry {
    tokens: RwLock<HashMap<String, CancellationToken>>,
}

impl CancellationRegistry {
    pub async fn register(&self, task_id: &str) -> CancellationToken {
        let token = CancellationToken::new();
        self.tokens
            .write()
            .await
            .insert(task_id.to_string(), token.clone());
        token
    }

    pub async fn cancel(&self, task_id: &str) -> bool {
        match self.tokens.read().await.get(task_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn remove(&self, task_id: &str) {
        self.tokens.write().await.remove(task_id);
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<CourierConfig>,
    pub verifier: Arc<SignatureVerifier>,
    pub replay: Arc<ReplayCache>,
    pub parser: Arc<EmailParser>,
    pub orchestrator: Arc<AgentOrchestrator>,
    pub engine: Arc<WorkflowEngine>,
    pub executor: Arc<MultiAgentExecutor>,
    pub store: Arc<dyn TaskStore>,
    pub dlq: Arc<DeadLetterQueue>,
    pub cache: Arc<MemoryCache>,
    pub snapshots: TaskSnapshotCache,
    pub queue: Arc<WorkQueue>,
    pub cancellations: Arc<CancellationRegistry>,
}

/// Build the full dependency graph from one immutable config snapshot.
pub async fn build_state(
    config: CourierConfig,
    client: Arc<dyn LlmClient>,
    mail: Arc<dyn MailClient>,
    dlq_path: impl AsRef<Path>,
) -> anyhow::Result<AppState> {
    let config = Arc::new(config);

    let verifier = Arc::new(SignatureVerifier::new(
        config.webhook.signing_key.as_bytes().to_vec(),
        config.webhook.max_timestamp_age_secs,
    ));
    let replay = Arc::new(ReplayCache::new(
        Arc::new(MemoryReplayBackend::new()),
        Duration::from_secs(config.replay.ttl_secs),
        config.replay.revoke_multiplier,
    ));

    let parser = Arc::new(EmailParser::new(config.clone()));
    let orchestrator = Arc::new(AgentOrchestrator::new(config.clone()));
    let engine = Arc::new(WorkflowEngine::new(config.workflows.clone()));

    let store: Arc<dyn TaskStore> = Arc::new(MemoryTaskStore::new());
    let cache = Arc::new(MemoryCache::new());
    let cache_dyn: Arc<dyn Cache> = cache.clone();
    let responses = AgentResponseCache::new(
        cache_dyn.clone(),
        Duration::from_secs(config.cache.agent_responses_secs),
    );
    let snapshots = TaskSnapshotCache::new(
        cache_dyn,
        Duration::from_secs(config.cache.tasks_secs),
    );

    let dlq = Arc::new(DeadLetterQueue::new(dlq_path, config.dlq.max_attempts).await?);

    let registry = AgentRegistry::new(config.clone(), client);
    let executor = Arc::new(MultiAgentExecutor::new(
        config.clone(),
        registry,
        store.clone(),
        engine.clone(),
        BreakerBoard::new(config.breaker.clone()),
        responses,
        snapshots.clone(),
        dlq.clone(),
        mail,
    ));

    Ok(AppState {
        config,
        verifier,
        replay,
        parser,
        orchestrator,
        engine,
        executor,
        store,
        dlq,
        cache,
        snapshots,
        queue: Arc::new(WorkQueue::new()),
        cancellations: Arc::new(CancellationRegistry::default()),
    })
}

/// Spawn the worker pool that drains the queue and executes tasks.
pub fn spawn_workers(state: &AppState, count: usize) {
    for worker in 0..count.max(1) {
        let state = state.clone();
        tokio::spawn(async move {
            tracing::info!(worker, "execution worker started");
            loop {
                let work = state.queue.pop().await;
                process_work(&state, work).await;
            }
        });
    }
}

async fn process_work(state: &AppState, work: QueuedWork) {
    let task = work.task;
    let cancel = state.cancellations.register(&task.task_id).await;

    let execution = match state.engine.create_execution(&work.workflow_type).await {
        Ok(execution) => execution,
        Err(err) => {
            tracing::error!(task_id = %task.task_id, error = %err, "failed to materialize workflow");
            let _ = state
                .store
                .append_note(&task.task_id, &format!("workflow setup failed: {err}"))
                .await;
            let _ = state.store.update_status(&task.task_id, TaskStatus::Failed).await;
            state.cancellations.remove(&task.task_id).await;
            return;
        }
    };

    let outcome = state
        .executor
        .execute(&task, &execution.execution_id, ExecutionMode::Staged, cancel)
        .await;
    match outcome {
        Ok(outcome) if outcome.completed => {
            tracing::info!(task_id = %task.task_id, "task completed");
        }
        Ok(outcome) if outcome.cancelled => {
            tracing::info!(task_id = %task.task_id, "task cancelled");
        }
        Ok(_) => {
            tracing::warn!(task_id = %task.task_id, "task failed");
        }
        Err(err) => {
            tracing::error!(task_id = %task.task_id, error = %err, "execution error");
            let _ = state.store.append_note(&task.task_id, &format!("execution error: {err}")).await;
        }
    }
    state.cancellations.remove(&task.task_id).await;
}

/// Parse, persist, route, and enqueue an email in one step. Returns the
/// stored task. Used by both the webhook path and the dispatch actions.
pub async fn ingest_email(
    state: &AppState,
    envelope: &courier_types::EmailEnvelope,
) -> anyhow::Result<Task> {
    let task = state.parser.parse(envelope);
    state.store.create_task(task.clone()).await?;

    let plan = state
        .orchestrator
        .analyze_and_route(&task, &courier_orchestrator::RouteContext::default());
    let task = state
        .store
        .update_status(&task.task_id, TaskStatus::Queued)
        .await?;
    state
        .queue
        .push(QueuedWork {
            task: task.clone(),
            workflow_type: plan.routing_decision.workflow_type.clone(),
        })
        .await;
    tracing::info!(
        task_id = %task.task_id,
        workflow = %plan.routing_decision.workflow_type,
        priority = %plan.priority,
        "task queued for execution"
    );
    Ok(task)
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    spawn_workers(&state, 4);
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "courier server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task_with_priority(priority: TaskPriority) -> QueuedWork {
        let mut task = Task::new(format!("{priority} task"), "d");
        task.priority = priority;
        QueuedWork {
            task,
            workflow_type: "feature_development".to_string(),
        }
    }

    #[tokio::test]
    async fn queue_drains_high_before_medium_before_low() {
        let queue = WorkQueue::new();
        queue.push(task_with_priority(TaskPriority::Low)).await;
        queue.push(task_with_priority(TaskPriority::Medium)).await;
        queue.push(task_with_priority(TaskPriority::Urgent)).await;

        assert_eq!(queue.pop().await.task.priority, TaskPriority::Urgent);
        assert_eq!(queue.pop().await.task.priority, TaskPriority::Medium);
        assert_eq!(queue.pop().await.task.priority, TaskPriority::Low);
    }

    #[tokio::test]
    async fn queue_is_fifo_within_a_class() {
        let queue = WorkQueue::new();
        let mut first = Task::new("first", "d");
        first.priority = TaskPriority::Medium;
        let first_id = first.task_id.clone();
        let mut second = Task::new("second", "d");
        second.priority = TaskPriority::Medium;

        queue
            .push(QueuedWork {
                task: first,
                workflow_type: "feature_development".into(),
            })
            .await;
        queue
            .push(QueuedWork {
                task: second,
                workflow_type: "feature_development".into(),
            })
            .await;
        assert_eq!(queue.pop().await.task.task_id, first_id);
    }

    #[tokio::test]
    async fn pop_waits_for_a_push() {
        let queue = Arc::new(WorkQueue::new());
        let popper = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await.task.title })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push(task_with_priority(TaskPriority::Medium)).await;
        let title = popper.await.unwrap();
        assert!(title.contains("task"));
    }

    #[tokio::test]
    async fn cancellation_registry_cancels_registered_tokens() {
        let registry = CancellationRegistry::default();
        let token = registry.register("t-1").await;
        assert!(!token.is_cancelled());
        assert!(registry.cancel("t-1").await);
        assert!(token.is_cancelled());
        assert!(!registry.cancel("t-unknown").await);
    }
}
