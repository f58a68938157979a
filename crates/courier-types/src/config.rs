use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::TaskType;

/// A single addressable agent capability backed by an LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProfile {
    pub id: String,
    pub name: String,
    pub role: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    pub preferred_model: String,
    pub system_prompt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentRule {
    pub primary: String,
    #[serde(default)]
    pub supporting: Vec<String>,
    #[serde(default)]
    pub reason: String,
}

/// Keyword family for one task type. Order in the parent list is the
/// detection precedence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskTypeKeywords {
    pub task_type: TaskType,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsingConfig {
    pub urgent_keywords: Vec<String>,
    pub high_keywords: Vec<String>,
    pub low_keywords: Vec<String>,
    pub task_type_keywords: Vec<TaskTypeKeywords>,
    pub technologies: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateStep {
    pub agent: String,
    pub task: String,
    #[serde(default = "default_output_format")]
    pub output_format: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default = "default_step_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_step_priority")]
    pub priority: String,
}

fn default_output_format() -> String {
    "markdown".to_string()
}

fn default_step_timeout() -> u64 {
    600
}

fn default_step_priority() -> String {
    "normal".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub steps: Vec<TemplateStep>,
    /// Reordering is refused unless this is explicitly `true`.
    #[serde(default)]
    pub allow_reordering: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicyConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub exp_base: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    pub agent: RetryPolicyConfig,
    pub api: RetryPolicyConfig,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            agent: RetryPolicyConfig {
                max_attempts: 3,
                base_delay_ms: 2_000,
                max_delay_ms: 30_000,
                exp_base: 2.0,
            },
            api: RetryPolicyConfig {
                max_attempts: 5,
                base_delay_ms: 1_000,
                max_delay_ms: 60_000,
                exp_base: 2.0,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheTtls {
    pub agent_responses_secs: u64,
    pub tasks_secs: u64,
    pub templates_secs: u64,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            agent_responses_secs: 1_800,
            tasks_secs: 300,
            templates_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayConfig {
    pub ttl_secs: u64,
    pub revoke_multiplier: u32,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 3_600,
            revoke_multiplier: 24,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub max_timestamp_age_secs: u64,
    #[serde(default)]
    pub signing_key: String,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            max_timestamp_age_secs: 120,
            signing_key: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqConfig {
    pub max_attempts: u32,
    pub db_path: String,
}

impl Default for DlqConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            db_path: "courier_dlq.db".to_string(),
        }
    }
}

/// Immutable configuration snapshot built once at startup. Reload swaps the
/// whole `Arc<CourierConfig>`; nothing mutates a live snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourierConfig {
    #[serde(default = "default_agents")]
    pub agents: Vec<AgentProfile>,
    #[serde(default = "default_assignment")]
    pub assignment: HashMap<String, AssignmentRule>,
    #[serde(default = "default_parsing")]
    pub parsing: ParsingConfig,
    #[serde(default = "default_workflows")]
    pub workflows: Vec<WorkflowTemplate>,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default = "default_fallbacks")]
    pub fallbacks: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub cache: CacheTtls,
    #[serde(default)]
    pub replay: ReplayConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub dlq: DlqConfig,
    #[serde(default)]
    pub auto_dispatch: bool,
}

impl Default for CourierConfig {
    fn default() -> Self {
        Self {
            agents: default_agents(),
            assignment: default_assignment(),
            parsing: default_parsing(),
            workflows: default_workflows(),
            breaker: BreakerConfig::default(),
            retry: RetrySettings::default(),
            fallbacks: default_fallbacks(),
            cache: CacheTtls::default(),
            replay: ReplayConfig::default(),
            webhook: WebhookConfig::default(),
            dlq: DlqConfig::default(),
            auto_dispatch: false,
        }
    }
}

impl CourierConfig {
    /// Load a snapshot from a YAML file, then apply environment overrides.
    /// Missing file falls back to the built-in defaults.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let mut config = match std::fs::read_to_string(path.as_ref()) {
            Ok(raw) => serde_yaml::from_str(&raw)?,
            Err(_) => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("COURIER_SIGNING_KEY") {
            if !key.is_empty() {
                self.webhook.signing_key = key;
            }
        }
        if let Ok(raw) = std::env::var("COURIER_MAX_TIMESTAMP_AGE") {
            match raw.parse::<u64>() {
                Ok(age) => self.webhook.max_timestamp_age_secs = age,
                Err(_) => tracing::warn!("ignoring invalid COURIER_MAX_TIMESTAMP_AGE"),
            }
        }
        if let Ok(raw) = std::env::var("COURIER_AUTO_DISPATCH") {
            self.auto_dispatch = raw.eq_ignore_ascii_case("true");
        }
    }

    pub fn agent(&self, id: &str) -> Option<&AgentProfile> {
        self.agents.iter().find(|a| a.id == id)
    }

    /// Assignment rule for a task type, falling back to `general`.
    pub fn assignment_for(&self, task_type: TaskType) -> AssignmentRule {
        self.assignment
            .get(task_type.as_str())
            .or_else(|| self.assignment.get("general"))
            .cloned()
            .unwrap_or_else(|| AssignmentRule {
                primary: "general".to_string(),
                supporting: Vec::new(),
                reason: "Default assignment - no specific configuration found".to_string(),
            })
    }

    pub fn template(&self, id: &str) -> Option<&WorkflowTemplate> {
        self.workflows.iter().find(|t| t.id == id)
    }

    pub fn fallback_chain(&self, agent_id: &str) -> Vec<String> {
        self.fallbacks
            .get(agent_id)
            .cloned()
            .unwrap_or_else(|| vec!["general".to_string()])
    }
}

fn default_agents() -> Vec<AgentProfile> {
    let profile = |id: &str, name: &str, role: &str, capabilities: &[&str], prompt: &str| {
        AgentProfile {
            id: id.to_string(),
            name: name.to_string(),
            role: role.to_string(),
            capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
            preferred_model: "openai/gpt-4o-mini".to_string(),
            system_prompt: prompt.to_string(),
        }
    };
    vec![
        profile(
            "coder",
            "Coding Agent",
            "software engineer",
            &["code_development", "refactoring", "optimization", "deployment"],
            "You are a senior software engineer. Produce working, reviewed code changes.",
        ),
        profile(
            "bug",
            "Bug Agent",
            "debugger",
            &["bug_fixing", "analysis", "testing", "code_review"],
            "You are a debugging specialist. Diagnose failures and propose minimal fixes.",
        ),
        profile(
            "product",
            "Product Agent",
            "product manager",
            &["planning", "design", "documentation"],
            "You are a product manager. Turn requests into specifications and plans.",
        ),
        profile(
            "tester",
            "Test Agent",
            "qa engineer",
            &["testing", "verification", "regression"],
            "You are a QA engineer. Verify changes and write regression tests.",
        ),
        profile(
            "general",
            "General Assistant",
            "generalist",
            &["general_assistance", "analysis", "documentation"],
            "You are a capable general assistant for engineering teams.",
        ),
    ]
}

fn default_assignment() -> HashMap<String, AssignmentRule> {
    let rule = |primary: &str, supporting: &[&str], reason: &str| AssignmentRule {
        primary: primary.to_string(),
        supporting: supporting.iter().map(|s| s.to_string()).collect(),
        reason: reason.to_string(),
    };
    HashMap::from([
        (
            "code_review".to_string(),
            rule("coder", &["general"], "Code review requires engineering context"),
        ),
        (
            "bug_report".to_string(),
            rule("bug", &["tester"], "Bug reports route to the debugging specialist"),
        ),
        (
            "feature_request".to_string(),
            rule("coder", &["product"], "Features need implementation plus product framing"),
        ),
        (
            "documentation".to_string(),
            rule("product", &[], "Documentation is owned by the product agent"),
        ),
        (
            "deployment".to_string(),
            rule("coder", &["tester"], "Deployments need an engineer with test support"),
        ),
        (
            "investigation".to_string(),
            rule("bug", &["general"], "Investigations start with diagnosis"),
        ),
        (
            "general".to_string(),
            rule("general", &[], "General requests go to the general assistant"),
        ),
    ])
}

fn default_parsing() -> ParsingConfig {
    let list = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    ParsingConfig {
        urgent_keywords: list(&[
            "urgent",
            "asap",
            "critical",
            "emergency",
            "immediately",
            "right away",
            "top priority",
            "blocker",
            "showstopper",
            "!!!",
        ]),
        high_keywords: list(&[
            "high priority",
            "important",
            "needed soon",
            "priority",
            "by end of day",
            "eod",
            "today",
        ]),
        low_keywords: list(&[
            "low priority",
            "no rush",
            "not urgent",
            "whenever",
            "nice to have",
            "optional",
            "if possible",
            "backlog",
            "eventually",
            "someday",
        ]),
        task_type_keywords: vec![
            TaskTypeKeywords {
                task_type: TaskType::CodeReview,
                keywords: list(&["code review", "review the", "pull request", "merge request", "pr #"]),
            },
            TaskTypeKeywords {
                task_type: TaskType::BugReport,
                keywords: list(&[
                    "bug",
                    "broken",
                    "crash",
                    "not working",
                    "can't log",
                    "cannot log",
                    "fails",
                    "failure",
                    "error",
                    "defect",
                    "regression",
                ]),
            },
            TaskTypeKeywords {
                task_type: TaskType::FeatureRequest,
                keywords: list(&[
                    "feature",
                    "enhancement",
                    "add support",
                    "implement",
                    "new functionality",
                    "would be great",
                ]),
            },
            TaskTypeKeywords {
                task_type: TaskType::Documentation,
                keywords: list(&["document", "documentation", "readme", "write up", "docs"]),
            },
            TaskTypeKeywords {
                task_type: TaskType::Deployment,
                keywords: list(&["deploy", "release", "rollout", "ship to", "production push"]),
            },
            TaskTypeKeywords {
                task_type: TaskType::Investigation,
                keywords: list(&[
                    "investigate",
                    "analyze",
                    "research",
                    "look into",
                    "root cause",
                    "explore",
                ]),
            },
        ],
        technologies: list(&[
            "python",
            "javascript",
            "rust",
            "react",
            "docker",
            "kubernetes",
            "aws",
            "azure",
            "gcp",
            "api",
            "database",
            "frontend",
            "backend",
            "ci/cd",
            "testing",
            "security",
            "authentication",
            "payment",
            "login",
            "deployment",
            "production",
            "staging",
        ]),
    }
}

fn default_workflows() -> Vec<WorkflowTemplate> {
    let step = |agent: &str, task: &str, deps: &[&str]| TemplateStep {
        agent: agent.to_string(),
        task: task.to_string(),
        output_format: "markdown".to_string(),
        dependencies: deps.iter().map(|d| d.to_string()).collect(),
        timeout_seconds: 600,
        priority: "normal".to_string(),
    };
    vec![
        WorkflowTemplate {
            id: "bug_fix_workflow".to_string(),
            name: "Bug fix".to_string(),
            description: "Diagnose, patch, verify, validate".to_string(),
            steps: vec![
                step("bug", "Diagnose the reported issue and identify the root cause", &[]),
                step("coder", "Implement a fix for the diagnosed issue", &["bug"]),
                step("tester", "Verify the fix and check for regressions", &["coder"]),
                step("product", "Validate the solution against the original report", &["tester"]),
            ],
            allow_reordering: false,
        },
        WorkflowTemplate {
            id: "feature_development".to_string(),
            name: "Feature development".to_string(),
            description: "Specify, build, test, document".to_string(),
            steps: vec![
                step("product", "Write a short specification for the request", &[]),
                step("coder", "Develop the feature per the specification", &["product"]),
                step("tester", "Test the feature against the specification", &["coder"]),
                step("general", "Update user-facing documentation", &["tester"]),
            ],
            allow_reordering: true,
        },
        WorkflowTemplate {
            id: "code_review".to_string(),
            name: "Code review".to_string(),
            description: "Parallel engineering and security review with synthesis".to_string(),
            steps: vec![
                step("coder", "Review the change for correctness and style", &[]),
                step("bug", "Review the change for security and failure modes", &[]),
                step("product", "Synthesize review feedback for the requester", &["coder", "bug"]),
            ],
            allow_reordering: false,
        },
        WorkflowTemplate {
            id: "emergency_fix".to_string(),
            name: "Emergency fix".to_string(),
            description: "Triage, patch, smoke-test".to_string(),
            steps: vec![
                step("bug", "Triage severity and blast radius", &[]),
                step("coder", "Apply an emergency patch", &["bug"]),
                step("tester", "Smoke-test the patched build", &["coder"]),
            ],
            allow_reordering: false,
        },
    ]
}

fn default_fallbacks() -> HashMap<String, Vec<String>> {
    let chain = |agents: &[&str]| agents.iter().map(|a| a.to_string()).collect::<Vec<_>>();
    HashMap::from([
        ("coder".to_string(), chain(&["general"])),
        ("bug".to_string(), chain(&["tester", "general"])),
        ("product".to_string(), chain(&["general"])),
        ("tester".to_string(), chain(&["bug", "general"])),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_every_non_calendar_task_type() {
        let config = CourierConfig::default();
        for task_type in [
            TaskType::CodeReview,
            TaskType::BugReport,
            TaskType::FeatureRequest,
            TaskType::Documentation,
            TaskType::Deployment,
            TaskType::Investigation,
            TaskType::General,
        ] {
            let rule = config.assignment_for(task_type);
            assert!(config.agent(&rule.primary).is_some(), "{task_type} has no agent");
        }
    }

    #[test]
    fn calendar_event_falls_back_to_general_assignment() {
        let config = CourierConfig::default();
        let rule = config.assignment_for(TaskType::CalendarEvent);
        assert_eq!(rule.primary, "general");
    }

    #[test]
    fn templates_reference_known_agents() {
        let config = CourierConfig::default();
        for template in &config.workflows {
            for step in &template.steps {
                assert!(config.agent(&step.agent).is_some());
                for dep in &step.dependencies {
                    assert!(template.steps.iter().any(|s| &s.agent == dep));
                }
            }
        }
    }

    #[test]
    fn yaml_roundtrip_preserves_snapshot() {
        let config = CourierConfig::default();
        let raw = serde_yaml::to_string(&config).unwrap();
        let parsed: CourierConfig = serde_yaml::from_str(&raw).unwrap();
        assert_eq!(parsed.agents.len(), config.agents.len());
        assert_eq!(parsed.breaker.failure_threshold, 3);
    }

    #[test]
    fn unknown_agent_fallback_chain_is_general() {
        let config = CourierConfig::default();
        assert_eq!(config.fallback_chain("nonexistent"), vec!["general".to_string()]);
        assert_eq!(
            config.fallback_chain("bug"),
            vec!["tester".to_string(), "general".to_string()]
        );
    }
}
