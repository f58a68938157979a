use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use courier_types::{CourierConfig, Task, TaskPriority, TaskType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    BugFixing,
    CodeDevelopment,
    CodeReview,
    Documentation,
    Deployment,
    Investigation,
    Calendar,
    GeneralAssistance,
}

impl Intent {
    fn from_task_type(task_type: TaskType) -> Self {
        match task_type {
            TaskType::BugReport => Intent::BugFixing,
            TaskType::FeatureRequest => Intent::CodeDevelopment,
            TaskType::CodeReview => Intent::CodeReview,
            TaskType::Documentation => Intent::Documentation,
            TaskType::Deployment => Intent::Deployment,
            TaskType::Investigation => Intent::Investigation,
            TaskType::CalendarEvent => Intent::Calendar,
            TaskType::General => Intent::GeneralAssistance,
        }
    }

    fn capability(self) -> &'static str {
        match self {
            Intent::BugFixing => "bug_fixing",
            Intent::CodeDevelopment => "code_development",
            Intent::CodeReview => "code_review",
            Intent::Documentation => "documentation",
            Intent::Deployment => "deployment",
            Intent::Investigation => "analysis",
            Intent::Calendar => "general_assistance",
            Intent::GeneralAssistance => "general_assistance",
        }
    }

    fn default_priority(self) -> TaskPriority {
        match self {
            Intent::BugFixing | Intent::Deployment => TaskPriority::High,
            Intent::CodeReview | Intent::Investigation => TaskPriority::Medium,
            Intent::Documentation | Intent::Calendar => TaskPriority::Low,
            _ => TaskPriority::Medium,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Intent::BugFixing => "bug_fixing",
            Intent::CodeDevelopment => "code_development",
            Intent::CodeReview => "code_review",
            Intent::Documentation => "documentation",
            Intent::Deployment => "deployment",
            Intent::Investigation => "investigation",
            Intent::Calendar => "calendar",
            Intent::GeneralAssistance => "general_assistance",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

/// Lightweight structural analysis of a task, standing in for the original
/// NLU pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskAnalysis {
    pub intent: Intent,
    pub complexity: Complexity,
    pub technologies: Vec<String>,
    pub is_urgent: bool,
    pub confidence: f64,
}

pub fn analyze_task(task: &Task) -> TaskAnalysis {
    let intent = Intent::from_task_type(task.task_type);

    let word_count = task.description.split_whitespace().count();
    let requirement_count = task.requirements.deliverables.len()
        + task.requirements.success_criteria.len()
        + task.requirements.dependencies.len();
    let technologies: Vec<String> = task
        .tags
        .iter()
        .filter(|t| !t.starts_with("mention:") && !t.starts_with("project:"))
        .cloned()
        .collect();

    let mut score = 0;
    if word_count > 100 {
        score += 1;
    }
    if technologies.len() >= 3 {
        score += 1;
    }
    if requirement_count >= 3 {
        score += 1;
    }
    let complexity = match score {
        0 => Complexity::Low,
        1 => Complexity::Medium,
        _ => Complexity::High,
    };

    TaskAnalysis {
        intent,
        complexity,
        technologies,
        is_urgent: task.priority == TaskPriority::Urgent,
        confidence: if intent == Intent::GeneralAssistance {
            0.5
        } else {
            0.9
        },
    }
}

/// Caller-supplied routing context.
#[derive(Debug, Clone, Default)]
pub struct RouteContext {
    pub working_directory: Option<String>,
    pub priority: Option<TaskPriority>,
    pub emergency: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub primary_agents: Vec<String>,
    pub secondary_agents: Vec<String>,
    pub workflow_type: String,
    pub reasoning: String,
    pub confidence: f64,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStepContext {
    pub working_directory: String,
    pub technologies: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub name: String,
    pub agent: String,
    pub action: String,
    pub context: PlanStepContext,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskExecutionPlan {
    pub task_id: String,
    pub routing_decision: RoutingDecision,
    pub analysis: TaskAnalysis,
    pub execution_steps: Vec<PlanStep>,
    pub estimated_duration_secs: u64,
    pub priority: TaskPriority,
    pub created_at: DateTime<Utc>,
}

/// Maps analyzed tasks to agent sets and workflow templates.
pub struct AgentOrchestrator {
    config: Arc<CourierConfig>,
}

impl AgentOrchestrator {
    pub fn new(config: Arc<CourierConfig>) -> Self {
        Self { config }
    }

    pub fn analyze_and_route(&self, task: &Task, context: &RouteContext) -> TaskExecutionPlan {
        let analysis = analyze_task(task);

        let workflow_type = self.select_workflow_type(analysis.intent, context);
        let primary_agents = self.select_primary_agents(task, &analysis);
        let secondary_agents = self.select_secondary_agents(&primary_agents, analysis.intent);
        let reasoning = self.reasoning(&analysis, &primary_agents);

        let decision = RoutingDecision {
            primary_agents,
            secondary_agents,
            workflow_type: workflow_type.clone(),
            reasoning,
            confidence: analysis.confidence,
            metadata: json!({
                "intent": analysis.intent.as_str(),
                "complexity": analysis.complexity,
                "technologies": analysis.technologies,
            }),
        };

        let execution_steps = self.execution_steps(&decision, &analysis, context);
        let estimated_duration_secs =
            estimate_duration(execution_steps.len(), analysis.complexity);
        let priority = self.determine_priority(&analysis, context);

        TaskExecutionPlan {
            task_id: task.task_id.clone(),
            routing_decision: decision,
            analysis,
            execution_steps,
            estimated_duration_secs,
            priority,
            created_at: Utc::now(),
        }
    }

    fn select_workflow_type(&self, intent: Intent, context: &RouteContext) -> String {
        if context.emergency {
            return "emergency_fix".to_string();
        }
        match intent {
            Intent::BugFixing => "bug_fix_workflow",
            Intent::CodeDevelopment => "feature_development",
            Intent::CodeReview => "code_review",
            _ => "feature_development",
        }
        .to_string()
    }

    /// Recommended agents in relevance order: the configured assignment
    /// first, then any other agent whose capabilities cover the intent.
    fn recommended_agents(&self, task: &Task, intent: Intent) -> Vec<String> {
        let mut recommended = vec![task.assignment.primary_agent.clone()];
        for agent in &task.assignment.supporting_agents {
            if !recommended.contains(agent) {
                recommended.push(agent.clone());
            }
        }
        let capability = intent.capability();
        for profile in &self.config.agents {
            if profile.capabilities.iter().any(|c| c == capability)
                && !recommended.contains(&profile.id)
            {
                recommended.push(profile.id.clone());
            }
        }
        recommended
    }

    fn select_primary_agents(&self, task: &Task, analysis: &TaskAnalysis) -> Vec<String> {
        let recommended = self.recommended_agents(task, analysis.intent);
        let mut agents: Vec<String> = match analysis.complexity {
            Complexity::Low => recommended.into_iter().take(1).collect(),
            Complexity::Medium => recommended.into_iter().take(3).collect(),
            Complexity::High => recommended.into_iter().take(4).collect(),
        };

        // High-complexity work must include the intent specialist.
        if analysis.complexity == Complexity::High {
            let specialist = match analysis.intent {
                Intent::BugFixing => Some("bug"),
                Intent::Documentation => Some("product"),
                _ => None,
            };
            if let Some(specialist) = specialist {
                if !agents.iter().any(|a| a == specialist) {
                    agents.push(specialist.to_string());
                }
            }
        }

        agents.truncate(4);
        agents
    }

    fn select_secondary_agents(&self, primary: &[String], intent: Intent) -> Vec<String> {
        let mut secondary: Vec<String> = self
            .config
            .agents
            .iter()
            .map(|a| a.id.clone())
            .filter(|id| !primary.contains(id))
            .collect();

        let favored = match intent {
            Intent::BugFixing => Some("coder"),
            Intent::CodeDevelopment => Some("bug"),
            _ => None,
        };
        if let Some(favored) = favored {
            secondary.sort_by_key(|id| if id == favored { 0 } else { 1 });
        }

        secondary.truncate(2);
        secondary
    }

    fn reasoning(&self, analysis: &TaskAnalysis, agents: &[String]) -> String {
        let names: Vec<String> = agents
            .iter()
            .map(|id| {
                self.config
                    .agent(id)
                    .map(|p| p.name.clone())
                    .unwrap_or_else(|| id.clone())
            })
            .collect();
        let mut reasoning = format!(
            "Based on the {} intent with {:?} complexity, selected {} for this task.",
            analysis.intent.as_str().replace('_', " "),
            analysis.complexity,
            names.join(", "),
        );
        if !analysis.technologies.is_empty() {
            reasoning.push_str(&format!(
                " Technologies detected: {}.",
                analysis.technologies[..analysis.technologies.len().min(3)].join(", ")
            ));
        }
        reasoning
    }

    fn execution_steps(
        &self,
        decision: &RoutingDecision,
        analysis: &TaskAnalysis,
        context: &RouteContext,
    ) -> Vec<PlanStep> {
        let step_context = PlanStepContext {
            working_directory: context
                .working_directory
                .clone()
                .unwrap_or_else(|| "./".to_string()),
            technologies: analysis.technologies.clone(),
        };

        if let Some(template) = self.config.template(&decision.workflow_type) {
            return template
                .steps
                .iter()
                .enumerate()
                .map(|(i, step)| PlanStep {
                    name: format!("step_{}", i + 1),
                    agent: step.agent.clone(),
                    action: step.task.clone(),
                    context: step_context.clone(),
                })
                .collect();
        }

        // No template matched: analyze → execute → verify.
        let lead = decision
            .primary_agents
            .first()
            .cloned()
            .unwrap_or_else(|| "general".to_string());
        let mut steps = vec![
            PlanStep {
                name: "analyze".to_string(),
                agent: lead.clone(),
                action: "analyze_requirements".to_string(),
                context: step_context.clone(),
            },
            PlanStep {
                name: "execute".to_string(),
                agent: lead,
                action: "implement_solution".to_string(),
                context: step_context.clone(),
            },
        ];
        if let Some(second) = decision.primary_agents.get(1) {
            steps.push(PlanStep {
                name: "verify".to_string(),
                agent: second.clone(),
                action: "verify_implementation".to_string(),
                context: step_context,
            });
        }
        steps
    }

    /// Explicit context priority wins unconditionally; urgency hints come
    /// next; the intent default is last.
    fn determine_priority(&self, analysis: &TaskAnalysis, context: &RouteContext) -> TaskPriority {
        if let Some(priority) = context.priority {
            return priority;
        }
        if analysis.is_urgent {
            return TaskPriority::High;
        }
        analysis.intent.default_priority()
    }
}

fn estimate_duration(step_count: usize, complexity: Complexity) -> u64 {
    let base = 60 + 30 * step_count as u64;
    let multiplier = match complexity {
        Complexity::Low => 1,
        Complexity::Medium => 2,
        Complexity::High => 3,
    };
    base * multiplier
}
