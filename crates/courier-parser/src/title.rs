use once_cell::sync::Lazy;
use regex::Regex;

static REPLY_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^(re|fwd?|fw):\s*").unwrap());

const GENERIC_SUBJECTS: &[&str] = &["task", "request", "help", "question"];

const ACTION_KEYWORDS: &[&str] = &[
    "review",
    "fix",
    "implement",
    "create",
    "update",
    "deploy",
    "investigate",
    "analyze",
    "document",
    "test",
    "debug",
    "refactor",
    "optimize",
    "integrate",
    "configure",
    "setup",
    "build",
    "design",
    "develop",
    "resolve",
    "troubleshoot",
];

const MAX_TITLE_LEN: usize = 100;

/// Derive a concise task title.
///
/// Reply/forward prefixes are stripped from the subject. A subject that is
/// too short or generic is replaced by the first of the body's opening five
/// lines containing an action keyword, truncated to 100 characters.
/// "Email Task" is the placeholder of last resort.
pub fn extract_title(subject: &str, body: &str) -> String {
    let mut title = subject.trim().to_string();
    while let Some(stripped) = strip_prefix_once(&title) {
        title = stripped;
    }

    let generic = title.len() < 10 || GENERIC_SUBJECTS.contains(&title.to_lowercase().as_str());
    if generic {
        for line in body.lines().take(5) {
            let lowered = line.to_lowercase();
            if ACTION_KEYWORDS.iter().any(|kw| lowered.contains(kw)) {
                title = truncate(line.trim(), MAX_TITLE_LEN);
                break;
            }
        }
    }

    if title.trim().is_empty() {
        "Email Task".to_string()
    } else {
        title
    }
}

fn strip_prefix_once(subject: &str) -> Option<String> {
    REPLY_PREFIX
        .find(subject)
        .map(|m| subject[m.end()..].trim_start().to_string())
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        text.chars().take(max).collect()
    }
}
