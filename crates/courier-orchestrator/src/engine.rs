use std::collections::HashMap;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::RwLock;

use courier_types::WorkflowTemplate;

use crate::model::{ExecutionStatus, StepStatus, WorkflowExecution, WorkflowStep};
use crate::WorkflowError;

/// Topologically partition steps into execution stages.
///
/// Each round emits every pending step whose dependencies are already
/// emitted. A round that emits nothing while steps remain means the
/// dependency graph has a cycle.
pub fn execution_stages(steps: &[WorkflowStep]) -> Result<Vec<Vec<WorkflowStep>>, WorkflowError> {
    let mut stages: Vec<Vec<WorkflowStep>> = Vec::new();
    let mut remaining: Vec<&WorkflowStep> = steps.iter().collect();
    let mut satisfied: Vec<String> = Vec::new();

    while !remaining.is_empty() {
        let (stage, rest): (Vec<&WorkflowStep>, Vec<&WorkflowStep>) =
            remaining.into_iter().partition(|step| {
                step.dependencies
                    .iter()
                    .all(|dep| satisfied.contains(dep))
            });

        if stage.is_empty() {
            let stuck: Vec<String> = rest.iter().map(|s| s.agent.clone()).collect();
            return Err(WorkflowError::CyclicDependency { agents: stuck });
        }

        satisfied.extend(stage.iter().map(|s| s.agent.clone()));
        stages.push(stage.into_iter().cloned().collect());
        remaining = rest;
    }

    Ok(stages)
}

#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub agent: String,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<chrono::DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<chrono::DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub execution_id: String,
    pub workflow_id: String,
    pub workflow_name: String,
    pub status: ExecutionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<chrono::DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<chrono::DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<i64>,
    pub steps: Vec<StepReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// Owns workflow executions and drives their status transitions.
pub struct WorkflowEngine {
    templates: HashMap<String, WorkflowTemplate>,
    executions: RwLock<HashMap<String, WorkflowExecution>>,
}

impl WorkflowEngine {
    pub fn new(templates: Vec<WorkflowTemplate>) -> Self {
        Self {
            templates: templates.into_iter().map(|t| (t.id.clone(), t)).collect(),
            executions: RwLock::new(HashMap::new()),
        }
    }

    pub fn templates(&self) -> Vec<&WorkflowTemplate> {
        let mut list: Vec<&WorkflowTemplate> = self.templates.values().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    pub fn template(&self, id: &str) -> Option<&WorkflowTemplate> {
        self.templates.get(id)
    }

    /// Materialize a new execution from a template. The dependency graph is
    /// validated up front; a cycle is a fatal validation error.
    pub async fn create_execution(
        &self,
        template_id: &str,
    ) -> Result<WorkflowExecution, WorkflowError> {
        let template = self
            .templates
            .get(template_id)
            .ok_or_else(|| WorkflowError::UnknownTemplate(template_id.to_string()))?;

        let execution = WorkflowExecution::from_template(template);
        execution_stages(&execution.steps)?;

        let mut executions = self.executions.write().await;
        executions.insert(execution.execution_id.clone(), execution.clone());
        Ok(execution)
    }

    pub async fn get_execution(&self, execution_id: &str) -> Option<WorkflowExecution> {
        self.executions.read().await.get(execution_id).cloned()
    }

    pub async fn stage_view(
        &self,
        execution_id: &str,
    ) -> Result<Vec<Vec<WorkflowStep>>, WorkflowError> {
        let executions = self.executions.read().await;
        let execution = executions
            .get(execution_id)
            .ok_or_else(|| WorkflowError::UnknownExecution(execution_id.to_string()))?;
        execution_stages(&execution.steps)
    }

    pub async fn ready_steps(&self, execution_id: &str) -> Result<Vec<WorkflowStep>, WorkflowError> {
        let executions = self.executions.read().await;
        let execution = executions
            .get(execution_id)
            .ok_or_else(|| WorkflowError::UnknownExecution(execution_id.to_string()))?;
        Ok(execution.ready_steps().into_iter().cloned().collect())
    }

    /// Transition one step and recompute the derived execution status.
    pub async fn update_step_status(
        &self,
        execution_id: &str,
        agent: &str,
        status: StepStatus,
        result: Option<String>,
    ) -> Result<WorkflowExecution, WorkflowError> {
        let mut executions = self.executions.write().await;
        let execution = executions
            .get_mut(execution_id)
            .ok_or_else(|| WorkflowError::UnknownExecution(execution_id.to_string()))?;

        let step = execution
            .steps
            .iter_mut()
            .find(|s| s.agent == agent)
            .ok_or_else(|| WorkflowError::UnknownStep {
                execution_id: execution_id.to_string(),
                agent: agent.to_string(),
            })?;

        step.status = status;
        match status {
            StepStatus::Running => step.started_at = Some(Utc::now()),
            StepStatus::Completed | StepStatus::Failed => step.completed_at = Some(Utc::now()),
            StepStatus::Pending => {}
        }
        if let Some(result) = result {
            step.result = Some(result);
        }

        execution.status = execution.derive_status();
        match execution.status {
            ExecutionStatus::Running if execution.started_at.is_none() => {
                execution.started_at = Some(Utc::now());
            }
            ExecutionStatus::Completed | ExecutionStatus::Failed => {
                if execution.completed_at.is_none() {
                    execution.completed_at = Some(Utc::now());
                }
            }
            _ => {}
        }

        Ok(execution.clone())
    }

    /// Reorder steps. Permitted only when the template opted in with
    /// `allow_reordering: true` and every dependency still precedes its
    /// dependent; an unset flag refuses, same as `false`.
    pub async fn reorder_steps(
        &self,
        execution_id: &str,
        new_order: &[String],
    ) -> Result<(), WorkflowError> {
        let mut executions = self.executions.write().await;
        let execution = executions
            .get_mut(execution_id)
            .ok_or_else(|| WorkflowError::UnknownExecution(execution_id.to_string()))?;

        let allowed = self
            .templates
            .get(&execution.workflow_id)
            .map(|t| t.allow_reordering)
            .unwrap_or(false);
        if !allowed {
            return Err(WorkflowError::ReorderingNotAllowed(
                execution.workflow_id.clone(),
            ));
        }

        let position: HashMap<&str, usize> = new_order
            .iter()
            .enumerate()
            .map(|(i, agent)| (agent.as_str(), i))
            .collect();

        for step in &execution.steps {
            let Some(&step_pos) = position.get(step.agent.as_str()) else {
                return Err(WorkflowError::InvalidOrder(format!(
                    "agent `{}` missing from new order",
                    step.agent
                )));
            };
            for dep in &step.dependencies {
                match position.get(dep.as_str()) {
                    Some(&dep_pos) if dep_pos < step_pos => {}
                    _ => {
                        return Err(WorkflowError::InvalidOrder(format!(
                            "`{}` must run before `{}`",
                            dep, step.agent
                        )));
                    }
                }
            }
        }

        execution.steps.sort_by_key(|step| position[step.agent.as_str()]);
        Ok(())
    }

    /// Snapshot including per-step timings and durations.
    pub async fn export_report(&self, execution_id: &str) -> Result<ExecutionReport, WorkflowError> {
        let executions = self.executions.read().await;
        let execution = executions
            .get(execution_id)
            .ok_or_else(|| WorkflowError::UnknownExecution(execution_id.to_string()))?;

        let workflow_name = self
            .templates
            .get(&execution.workflow_id)
            .map(|t| t.name.clone())
            .unwrap_or_else(|| "Unknown".to_string());

        let duration_seconds = match (execution.started_at, execution.completed_at) {
            (Some(start), Some(end)) => Some((end - start).num_seconds()),
            _ => None,
        };

        Ok(ExecutionReport {
            execution_id: execution.execution_id.clone(),
            workflow_id: execution.workflow_id.clone(),
            workflow_name,
            status: execution.status,
            started_at: execution.started_at,
            completed_at: execution.completed_at,
            duration_seconds,
            steps: execution
                .steps
                .iter()
                .map(|s| StepReport {
                    agent: s.agent.clone(),
                    status: s.status,
                    started_at: s.started_at,
                    completed_at: s.completed_at,
                    duration_seconds: s.duration_seconds(),
                    result: s.result.clone(),
                })
                .collect(),
            summary: execution.summary.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_types::TemplateStep;

    fn template(id: &str, steps: Vec<(&str, &[&str])>, allow_reordering: bool) -> WorkflowTemplate {
        WorkflowTemplate {
            id: id.to_string(),
            name: id.to_string(),
            description: String::new(),
            steps: steps
                .into_iter()
                .map(|(agent, deps)| TemplateStep {
                    agent: agent.to_string(),
                    task: format!("{agent} task"),
                    output_format: "markdown".to_string(),
                    dependencies: deps.iter().map(|d| d.to_string()).collect(),
                    timeout_seconds: 600,
                    priority: "normal".to_string(),
                })
                .collect(),
            allow_reordering,
        }
    }

    fn diamond_engine() -> WorkflowEngine {
        WorkflowEngine::new(vec![template(
            "diamond",
            vec![("x", &[]), ("y", &["x"]), ("z", &["x"]), ("w", &["y", "z"])],
            true,
        )])
    }

    #[tokio::test]
    async fn stages_partition_the_diamond() {
        let engine = diamond_engine();
        let exec = engine.create_execution("diamond").await.unwrap();
        let stages = engine.stage_view(&exec.execution_id).await.unwrap();
        let layout: Vec<Vec<&str>> = stages
            .iter()
            .map(|stage| stage.iter().map(|s| s.agent.as_str()).collect())
            .collect();
        assert_eq!(layout, vec![vec!["x"], vec!["y", "z"], vec!["w"]]);
    }

    #[tokio::test]
    async fn every_step_appears_exactly_once_in_stages() {
        let engine = diamond_engine();
        let exec = engine.create_execution("diamond").await.unwrap();
        let stages = engine.stage_view(&exec.execution_id).await.unwrap();
        let mut agents: Vec<String> = stages
            .into_iter()
            .flatten()
            .map(|s| s.agent)
            .collect();
        agents.sort();
        assert_eq!(agents, vec!["w", "x", "y", "z"]);
    }

    #[tokio::test]
    async fn cyclic_template_is_rejected_at_creation() {
        let engine = WorkflowEngine::new(vec![template(
            "cycle",
            vec![("a", &["b"]), ("b", &["a"])],
            false,
        )]);
        let err = engine.create_execution("cycle").await.unwrap_err();
        assert!(matches!(err, WorkflowError::CyclicDependency { .. }));
    }

    #[tokio::test]
    async fn unknown_template_is_an_error() {
        let engine = diamond_engine();
        assert!(matches!(
            engine.create_execution("nope").await,
            Err(WorkflowError::UnknownTemplate(_))
        ));
    }

    #[tokio::test]
    async fn step_completion_unlocks_dependents() {
        let engine = diamond_engine();
        let exec = engine.create_execution("diamond").await.unwrap();
        let id = exec.execution_id.clone();

        let ready: Vec<String> = engine
            .ready_steps(&id)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.agent)
            .collect();
        assert_eq!(ready, vec!["x"]);

        engine
            .update_step_status(&id, "x", StepStatus::Completed, Some("done".into()))
            .await
            .unwrap();
        let ready: Vec<String> = engine
            .ready_steps(&id)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.agent)
            .collect();
        assert_eq!(ready, vec!["y", "z"]);
    }

    #[tokio::test]
    async fn execution_status_follows_steps() {
        let engine = diamond_engine();
        let exec = engine.create_execution("diamond").await.unwrap();
        let id = exec.execution_id.clone();

        let exec = engine
            .update_step_status(&id, "x", StepStatus::Running, None)
            .await
            .unwrap();
        assert_eq!(exec.status, ExecutionStatus::Running);
        assert!(exec.started_at.is_some());

        for agent in ["x", "y", "z", "w"] {
            engine
                .update_step_status(&id, agent, StepStatus::Completed, None)
                .await
                .unwrap();
        }
        let exec = engine.get_execution(&id).await.unwrap();
        assert_eq!(exec.status, ExecutionStatus::Completed);
        assert!(exec.completed_at.is_some());
    }

    #[tokio::test]
    async fn one_failed_step_fails_the_execution() {
        let engine = diamond_engine();
        let exec = engine.create_execution("diamond").await.unwrap();
        let exec = engine
            .update_step_status(&exec.execution_id, "x", StepStatus::Failed, None)
            .await
            .unwrap();
        assert_eq!(exec.status, ExecutionStatus::Failed);
    }

    #[tokio::test]
    async fn reordering_respects_dependencies() {
        let engine = diamond_engine();
        let exec = engine.create_execution("diamond").await.unwrap();
        let id = exec.execution_id.clone();

        let valid = ["x", "z", "y", "w"].map(String::from);
        engine.reorder_steps(&id, &valid).await.unwrap();
        let reordered = engine.get_execution(&id).await.unwrap();
        let agents: Vec<&str> = reordered.steps.iter().map(|s| s.agent.as_str()).collect();
        assert_eq!(agents, vec!["x", "z", "y", "w"]);

        let invalid = ["w", "x", "y", "z"].map(String::from);
        assert!(matches!(
            engine.reorder_steps(&id, &invalid).await,
            Err(WorkflowError::InvalidOrder(_))
        ));
    }

    #[tokio::test]
    async fn reordering_refused_without_opt_in() {
        let engine = WorkflowEngine::new(vec![template(
            "locked",
            vec![("a", &[]), ("b", &["a"])],
            false,
        )]);
        let exec = engine.create_execution("locked").await.unwrap();
        let order = ["a", "b"].map(String::from);
        assert!(matches!(
            engine.reorder_steps(&exec.execution_id, &order).await,
            Err(WorkflowError::ReorderingNotAllowed(_))
        ));
    }

    #[tokio::test]
    async fn report_includes_step_durations() {
        let engine = diamond_engine();
        let exec = engine.create_execution("diamond").await.unwrap();
        let id = exec.execution_id.clone();
        engine
            .update_step_status(&id, "x", StepStatus::Running, None)
            .await
            .unwrap();
        engine
            .update_step_status(&id, "x", StepStatus::Completed, Some("out".into()))
            .await
            .unwrap();

        let report = engine.export_report(&id).await.unwrap();
        let x = report.steps.iter().find(|s| s.agent == "x").unwrap();
        assert_eq!(x.status, StepStatus::Completed);
        assert!(x.duration_seconds.is_some());
        assert_eq!(x.result.as_deref(), Some("out"));
    }
}
