use once_cell::sync::Lazy;
use regex::Regex;

use courier_types::ParsingConfig;

static HASHTAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"#(\w+)").unwrap());
static MENTION: Lazy<Regex> = Lazy::new(|| Regex::new(r"@(\w+)").unwrap());
static PROJECT_REF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:project|feature|module|component|pull\s+request|pr)[:;\s]+#?(\w+)").unwrap()
});

/// Collect tags from hashtags, `@mentions` (prefixed `mention:`), the
/// technology lexicon, and project references (`PR #123` → `project:123`).
/// Deduplicated case-insensitively, first occurrence preserved.
pub fn extract_tags(subject: &str, body: &str, config: &ParsingConfig) -> Vec<String> {
    let content = format!("{} {}", subject, body).to_lowercase();
    let mut tags: Vec<String> = Vec::new();
    let mut push = |tag: String| {
        let lowered = tag.to_lowercase();
        if !tag.is_empty() && !tags.iter().any(|t: &String| t.to_lowercase() == lowered) {
            tags.push(tag);
        }
    };

    for caps in HASHTAG.captures_iter(&content) {
        push(caps[1].to_string());
    }
    for caps in MENTION.captures_iter(&content) {
        push(format!("mention:{}", &caps[1]));
    }
    for tech in &config.technologies {
        if content.contains(tech.as_str()) {
            push(tech.clone());
        }
    }
    for caps in PROJECT_REF.captures_iter(&content) {
        push(format!("project:{}", &caps[1]));
    }

    tags
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_types::CourierConfig;

    fn config() -> ParsingConfig {
        CourierConfig::default().parsing
    }

    #[test]
    fn hashtags_and_mentions_are_collected() {
        let tags = extract_tags("", "ping @alice about #infra", &config());
        assert!(tags.contains(&"infra".to_string()));
        assert!(tags.contains(&"mention:alice".to_string()));
    }

    #[test]
    fn technology_lexicon_matches_body() {
        let tags = extract_tags("", "the docker build for the api is failing", &config());
        assert!(tags.contains(&"docker".to_string()));
        assert!(tags.contains(&"api".to_string()));
    }

    #[test]
    fn pr_references_become_project_tags() {
        let tags = extract_tags("", "see PR #123 for details", &config());
        assert!(tags.contains(&"project:123".to_string()));
    }

    #[test]
    fn duplicates_collapse_to_first_occurrence() {
        let tags = extract_tags("#API", "more about #api and the api", &config());
        let api_tags: Vec<_> = tags.iter().filter(|t| t.to_lowercase() == "api").collect();
        assert_eq!(api_tags.len(), 1);
    }
}
