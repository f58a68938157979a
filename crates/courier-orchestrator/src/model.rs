use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use courier_types::{TemplateStep, WorkflowTemplate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// A single agent invocation within a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub agent: String,
    pub task: String,
    pub output_format: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    pub timeout_seconds: u64,
    pub priority: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowStep {
    pub fn from_template(step: &TemplateStep) -> Self {
        Self {
            agent: step.agent.clone(),
            task: step.task.clone(),
            output_format: step.output_format.clone(),
            dependencies: step.dependencies.clone(),
            timeout_seconds: step.timeout_seconds,
            priority: step.priority.clone(),
            status: StepStatus::Pending,
            result: None,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn duration_seconds(&self) -> Option<i64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some((end - start).num_seconds()),
            _ => None,
        }
    }
}

/// A materialized run of a workflow template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub execution_id: String,
    pub workflow_id: String,
    pub steps: Vec<WorkflowStep>,
    pub current_stage: usize,
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl WorkflowExecution {
    pub fn from_template(template: &WorkflowTemplate) -> Self {
        Self {
            execution_id: format!("exec_{}", uuid::Uuid::new_v4().simple()),
            workflow_id: template.id.clone(),
            steps: template.steps.iter().map(WorkflowStep::from_template).collect(),
            current_stage: 0,
            status: ExecutionStatus::Pending,
            started_at: None,
            completed_at: None,
            summary: None,
        }
    }

    /// Steps eligible to run now: pending, with every dependency completed.
    pub fn ready_steps(&self) -> Vec<&WorkflowStep> {
        let completed: Vec<&str> = self
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .map(|s| s.agent.as_str())
            .collect();
        self.steps
            .iter()
            .filter(|s| {
                s.status == StepStatus::Pending
                    && s.dependencies.iter().all(|d| completed.contains(&d.as_str()))
            })
            .collect()
    }

    /// Execution status derived from step statuses: completed iff all steps
    /// completed, failed iff any failed, running iff any running and none
    /// failed, pending otherwise.
    pub fn derive_status(&self) -> ExecutionStatus {
        if self.steps.iter().any(|s| s.status == StepStatus::Failed) {
            ExecutionStatus::Failed
        } else if !self.steps.is_empty()
            && self.steps.iter().all(|s| s.status == StepStatus::Completed)
        {
            ExecutionStatus::Completed
        } else if self.steps.iter().any(|s| s.status == StepStatus::Running) {
            ExecutionStatus::Running
        } else {
            ExecutionStatus::Pending
        }
    }
}
