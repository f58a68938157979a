use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use courier_agents::{AgentRegistry, MailClient};
use courier_orchestrator::{StepStatus, WorkflowEngine, WorkflowStep};
use courier_store::{AgentResponseCache, DeadLetterQueue, TaskSnapshotCache, TaskStore};
use courier_types::{CourierConfig, CourierError, CourierResult, Task, TaskStatus};

use crate::breaker::BreakerBoard;
use crate::retry::{retry, RetryPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Parallel,
    Sequential,
    Staged,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepOutput {
    pub agent: String,
    pub response: String,
    pub cache_hit: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub via_fallback: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionOutcome {
    pub task_id: String,
    pub execution_id: String,
    pub completed: bool,
    pub cancelled: bool,
    pub outputs: Vec<StepOutput>,
}

/// Runs workflow executions across agents with circuit breakers, retries,
/// fallback chains, response caching, and dead-lettering of terminal
/// failures. Progress and conversations flow through the task store; the
/// executor never holds task state of its own.
pub struct MultiAgentExecutor {
    config: Arc<CourierConfig>,
    registry: AgentRegistry,
    store: Arc<dyn TaskStore>,
    engine: Arc<WorkflowEngine>,
    breakers: BreakerBoard,
    response_cache: AgentResponseCache,
    snapshot_cache: TaskSnapshotCache,
    dlq: Arc<DeadLetterQueue>,
    mail: Arc<dyn MailClient>,
    retry_policy: RetryPolicy,
}

impl MultiAgentExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<CourierConfig>,
        registry: AgentRegistry,
        store: Arc<dyn TaskStore>,
        engine: Arc<WorkflowEngine>,
        breakers: BreakerBoard,
        response_cache: AgentResponseCache,
        snapshot_cache: TaskSnapshotCache,
        dlq: Arc<DeadLetterQueue>,
        mail: Arc<dyn MailClient>,
    ) -> Self {
        let retry_policy = RetryPolicy::from_config(&config.retry.agent);
        Self {
            config,
            registry,
            store,
            engine,
            breakers,
            response_cache,
            snapshot_cache,
            dlq,
            mail,
            retry_policy,
        }
    }

    pub fn breakers(&self) -> &BreakerBoard {
        &self.breakers
    }

    /// Invoke one agent with the full resilience stack: response cache,
    /// retry-wrapped breaker call, then the configured fallback chain.
    /// Fallback responses are annotated so consumers can see degradation.
    pub async fn invoke_with_resilience(
        &self,
        agent_id: &str,
        prompt: &str,
    ) -> CourierResult<StepOutput> {
        if let Some(cached) = self.response_cache.get(agent_id, prompt).await {
            tracing::debug!(agent_id, "agent response cache hit");
            return Ok(StepOutput {
                agent: agent_id.to_string(),
                response: cached,
                cache_hit: true,
                via_fallback: None,
            });
        }

        let primary = self.guarded_invoke(agent_id, prompt).await;
        let failure = match primary {
            Ok(response) => {
                self.response_cache.put(agent_id, prompt, &response).await;
                return Ok(StepOutput {
                    agent: agent_id.to_string(),
                    response,
                    cache_hit: false,
                    via_fallback: None,
                });
            }
            Err(err) => err,
        };

        tracing::warn!(agent_id, error = %failure, "primary agent failed, consulting fallbacks");
        for fallback_id in self.config.fallback_chain(agent_id) {
            match self.guarded_invoke(&fallback_id, prompt).await {
                Ok(response) => {
                    let annotated = format!("[via fallback agent {fallback_id}]\n{response}");
                    self.response_cache.put(agent_id, prompt, &annotated).await;
                    return Ok(StepOutput {
                        agent: agent_id.to_string(),
                        response: annotated,
                        cache_hit: false,
                        via_fallback: Some(fallback_id),
                    });
                }
                Err(err) => {
                    tracing::warn!(agent_id, fallback = %fallback_id, error = %err, "fallback agent failed");
                }
            }
        }

        Err(failure)
    }

    /// Retry policy wrapped around the per-agent breaker. The breaker gates
    /// every attempt, including retries.
    async fn guarded_invoke(&self, agent_id: &str, prompt: &str) -> CourierResult<String> {
        let breaker = self.breakers.get_or_create(agent_id).await;
        let registry = self.registry.clone();
        retry(&self.retry_policy, agent_id, || {
            let breaker = breaker.clone();
            let registry = registry.clone();
            let agent = agent_id.to_string();
            let prompt = prompt.to_string();
            async move { breaker.call(|| registry.invoke(&agent, &prompt)).await }
        })
        .await
    }

    /// Execute a materialized workflow for a task.
    pub async fn execute(
        &self,
        task: &Task,
        execution_id: &str,
        mode: ExecutionMode,
        cancel: CancellationToken,
    ) -> CourierResult<ExecutionOutcome> {
        self.transition(&task.task_id, TaskStatus::Running).await?;

        let result = match mode {
            ExecutionMode::Staged => self.run_staged(task, execution_id, &cancel).await,
            ExecutionMode::Parallel => self.run_parallel(task, execution_id, &cancel).await,
            ExecutionMode::Sequential => self.run_sequential(task, execution_id, &cancel).await,
        };

        match result {
            StageRun::Cancelled => {
                self.store
                    .append_note(&task.task_id, "task cancelled, discarding in-flight outputs")
                    .await?;
                self.transition(&task.task_id, TaskStatus::Failed).await?;
                Ok(ExecutionOutcome {
                    task_id: task.task_id.clone(),
                    execution_id: execution_id.to_string(),
                    completed: false,
                    cancelled: true,
                    outputs: Vec::new(),
                })
            }
            StageRun::Failed { agent, error } => {
                self.dead_letter(task, &agent, &error).await;
                self.transition(&task.task_id, TaskStatus::Failed).await?;
                Ok(ExecutionOutcome {
                    task_id: task.task_id.clone(),
                    execution_id: execution_id.to_string(),
                    completed: false,
                    cancelled: false,
                    outputs: Vec::new(),
                })
            }
            StageRun::Completed(outputs) => {
                self.store.set_progress(&task.task_id, 100).await?;
                self.transition(&task.task_id, TaskStatus::Completed).await?;
                self.deliver(task, &outputs).await;
                Ok(ExecutionOutcome {
                    task_id: task.task_id.clone(),
                    execution_id: execution_id.to_string(),
                    completed: true,
                    cancelled: false,
                    outputs,
                })
            }
        }
    }

    async fn run_staged(
        &self,
        task: &Task,
        execution_id: &str,
        cancel: &CancellationToken,
    ) -> StageRun {
        let stages = match self.engine.stage_view(execution_id).await {
            Ok(stages) => stages,
            Err(err) => {
                return StageRun::Failed {
                    agent: task.assignment.primary_agent.clone(),
                    error: err.to_string(),
                }
            }
        };

        let mut outputs = Vec::new();
        for stage in stages {
            if cancel.is_cancelled() {
                return StageRun::Cancelled;
            }
            match self.run_stage(task, execution_id, &stage, None).await {
                Ok(stage_outputs) => {
                    if cancel.is_cancelled() {
                        return StageRun::Cancelled;
                    }
                    outputs.extend(stage_outputs);
                }
                Err((agent, error)) => return StageRun::Failed { agent, error },
            }
        }
        StageRun::Completed(outputs)
    }

    async fn run_parallel(
        &self,
        task: &Task,
        execution_id: &str,
        cancel: &CancellationToken,
    ) -> StageRun {
        if cancel.is_cancelled() {
            return StageRun::Cancelled;
        }
        let steps = match self.engine.get_execution(execution_id).await {
            Some(execution) => execution.steps,
            None => {
                return StageRun::Failed {
                    agent: task.assignment.primary_agent.clone(),
                    error: format!("unknown execution `{execution_id}`"),
                }
            }
        };
        match self.run_stage(task, execution_id, &steps, None).await {
            Ok(outputs) => {
                if cancel.is_cancelled() {
                    StageRun::Cancelled
                } else {
                    StageRun::Completed(outputs)
                }
            }
            Err((agent, error)) => StageRun::Failed { agent, error },
        }
    }

    async fn run_sequential(
        &self,
        task: &Task,
        execution_id: &str,
        cancel: &CancellationToken,
    ) -> StageRun {
        let steps = match self.engine.get_execution(execution_id).await {
            Some(execution) => execution.steps,
            None => {
                return StageRun::Failed {
                    agent: task.assignment.primary_agent.clone(),
                    error: format!("unknown execution `{execution_id}`"),
                }
            }
        };

        let mut outputs: Vec<StepOutput> = Vec::new();
        for step in &steps {
            if cancel.is_cancelled() {
                return StageRun::Cancelled;
            }
            // Each agent sees what the previous agents produced.
            let context = if outputs.is_empty() {
                None
            } else {
                Some(
                    outputs
                        .iter()
                        .map(|o| format!("## Output from {}\n{}", o.agent, o.response))
                        .collect::<Vec<_>>()
                        .join("\n\n"),
                )
            };
            match self
                .run_stage(task, execution_id, std::slice::from_ref(step), context.as_deref())
                .await
            {
                Ok(step_outputs) => outputs.extend(step_outputs),
                Err((agent, error)) => return StageRun::Failed { agent, error },
            }
        }
        StageRun::Completed(outputs)
    }

    /// Run the steps of one stage concurrently and record their results.
    async fn run_stage(
        &self,
        task: &Task,
        execution_id: &str,
        steps: &[WorkflowStep],
        extra_context: Option<&str>,
    ) -> Result<Vec<StepOutput>, (String, String)> {
        let runs = steps
            .iter()
            .map(|step| self.run_step(task, execution_id, step, extra_context));
        let results = join_all(runs).await;

        let mut outputs = Vec::new();
        let mut first_failure: Option<(String, String)> = None;
        for result in results {
            match result {
                Ok(output) => outputs.push(output),
                Err(failure) => {
                    if first_failure.is_none() {
                        first_failure = Some(failure);
                    }
                }
            }
        }
        match first_failure {
            Some(failure) => Err(failure),
            None => Ok(outputs),
        }
    }

    async fn run_step(
        &self,
        task: &Task,
        execution_id: &str,
        step: &WorkflowStep,
        extra_context: Option<&str>,
    ) -> Result<StepOutput, (String, String)> {
        let agent = step.agent.clone();
        let fail = |error: String| (agent.clone(), error);

        self.engine
            .update_step_status(execution_id, &agent, StepStatus::Running, None)
            .await
            .map_err(|e| fail(e.to_string()))?;

        let mut prompt = format!("{}\n\n{}", step.task, task.agent_prompt());
        if let Some(context) = extra_context {
            prompt.push_str("\n\n# Prior context\n");
            prompt.push_str(context);
        }

        let invoked = tokio::time::timeout(
            Duration::from_secs(step.timeout_seconds),
            self.invoke_with_resilience(&agent, &prompt),
        )
        .await;

        let result = match invoked {
            Ok(result) => result,
            Err(_) => Err(CourierError::TransientRemote(format!(
                "step for agent `{agent}` timed out after {}s",
                step.timeout_seconds
            ))),
        };

        match result {
            Ok(output) => {
                self.engine
                    .update_step_status(
                        execution_id,
                        &agent,
                        StepStatus::Completed,
                        Some(output.response.clone()),
                    )
                    .await
                    .map_err(|e| fail(e.to_string()))?;
                self.record_success(task, execution_id, &agent, &output).await;
                Ok(output)
            }
            Err(err) => {
                let _ = self
                    .engine
                    .update_step_status(execution_id, &agent, StepStatus::Failed, None)
                    .await;
                let _ = self
                    .store
                    .append_note(
                        &task.task_id,
                        &format!("step for agent {agent} failed: {err}"),
                    )
                    .await;
                Err(fail(err.to_string()))
            }
        }
    }

    async fn record_success(
        &self,
        task: &Task,
        execution_id: &str,
        agent: &str,
        output: &StepOutput,
    ) {
        if let Err(err) = self
            .store
            .append_conversation(
                &task.task_id,
                agent,
                "assistant",
                &output.response,
                Some(serde_json::json!({
                    "cache_hit": output.cache_hit,
                    "via_fallback": output.via_fallback,
                })),
            )
            .await
        {
            tracing::warn!(error = %err, "failed to record conversation");
        }

        let note = if output.cache_hit {
            format!("agent {agent} served from response cache")
        } else if let Some(fallback) = &output.via_fallback {
            format!("agent {agent} degraded to fallback {fallback}")
        } else {
            format!("agent {agent} completed its step")
        };
        let _ = self.store.append_note(&task.task_id, &note).await;

        self.update_progress(&task.task_id, execution_id).await;
    }

    async fn update_progress(&self, task_id: &str, execution_id: &str) {
        if let Some(execution) = self.engine.get_execution(execution_id).await {
            let total = execution.steps.len().max(1);
            let completed = execution
                .steps
                .iter()
                .filter(|s| s.status == StepStatus::Completed)
                .count();
            let progress = ((completed * 100) / total) as u8;
            if let Err(err) = self.store.set_progress(task_id, progress).await {
                tracing::warn!(error = %err, "failed to update progress");
            }
            self.snapshot_cache.invalidate(task_id).await;
        }
    }

    async fn dead_letter(&self, task: &Task, agent: &str, error: &str) {
        let payload = serde_json::to_value(task).unwrap_or(serde_json::Value::Null);
        if let Err(err) = self
            .dlq
            .add(
                &task.task_id,
                agent,
                payload,
                error,
                self.retry_policy.max_attempts,
                task.priority,
            )
            .await
        {
            tracing::error!(error = %err, "failed to enqueue dead letter");
        }
        let _ = self
            .store
            .append_note(&task.task_id, &format!("moved to dead-letter queue: {error}"))
            .await;
    }

    async fn deliver(&self, task: &Task, outputs: &[StepOutput]) {
        let Some(meta) = &task.email_metadata else {
            return;
        };
        let body = outputs
            .iter()
            .map(|o| format!("## {}\n{}", o.agent, o.response))
            .collect::<Vec<_>>()
            .join("\n\n");
        let subject = format!("Re: {}", meta.subject);
        if let Err(err) = self.mail.send(&meta.sender, &subject, &body).await {
            tracing::warn!(error = %err, "result delivery failed");
            let _ = self
                .store
                .append_note(&task.task_id, "result delivery failed")
                .await;
        }
    }

    async fn transition(&self, task_id: &str, status: TaskStatus) -> CourierResult<()> {
        self.store.update_status(task_id, status).await?;
        self.snapshot_cache.invalidate(task_id).await;
        Ok(())
    }
}

enum StageRun {
    Completed(Vec<StepOutput>),
    Failed { agent: String, error: String },
    Cancelled,
}
