//! Routing and workflow execution.
//!
//! The router maps an analyzed task to an agent set and a workflow template;
//! the engine materializes executions, partitions their steps into stages,
//! and derives execution status from step status. Neither component invokes
//! agents. Execution belongs to the runtime crate, which depends on this
//! one and never the other way around.

mod engine;
mod model;
mod router;

pub use engine::{execution_stages, ExecutionReport, StepReport, WorkflowEngine};
pub use model::{ExecutionStatus, StepStatus, WorkflowExecution, WorkflowStep};
pub use router::{
    analyze_task, AgentOrchestrator, Complexity, Intent, PlanStep, PlanStepContext, RouteContext,
    RoutingDecision, TaskAnalysis, TaskExecutionPlan,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("cyclic dependency among steps: {agents:?}")]
    CyclicDependency { agents: Vec<String> },

    #[error("unknown workflow template `{0}`")]
    UnknownTemplate(String),

    #[error("unknown execution `{0}`")]
    UnknownExecution(String),

    #[error("no step for agent `{agent}` in execution `{execution_id}`")]
    UnknownStep { execution_id: String, agent: String },

    #[error("reordering is not allowed for workflow `{0}`")]
    ReorderingNotAllowed(String),

    #[error("invalid step order: {0}")]
    InvalidOrder(String),
}

impl From<WorkflowError> for courier_types::CourierError {
    fn from(err: WorkflowError) -> Self {
        match err {
            WorkflowError::UnknownTemplate(_)
            | WorkflowError::UnknownExecution(_)
            | WorkflowError::UnknownStep { .. } => {
                courier_types::CourierError::NotFound(err.to_string())
            }
            other => courier_types::CourierError::Validation(other.to_string()),
        }
    }
}
