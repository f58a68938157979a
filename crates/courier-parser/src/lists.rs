use once_cell::sync::Lazy;
use regex::Regex;

/// Minimum item length kept by every extractor.
const MIN_ITEM_LEN: usize = 4;
const MAX_INLINE_ITEM_LEN: usize = 100;

/// Structured list-item patterns in precedence order: task checkboxes,
/// numbered, lettered, Roman numerals, bullets, emoji bullets, then
/// indented continuations.
static ITEM_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"^\s*(?:[-*]\s*)?\[\s*[xX ]?\s*\]\s*(.+)$",
        r"^\s*\d{1,2}[.)\]]\s*(.+)$",
        r"^\s*\(\d{1,2}\)\s*(.+)$",
        r"^\s*[a-zA-Z][.)\]]\s*(.+)$",
        r"^\s*\([a-zA-Z]\)\s*(.+)$",
        r"^\s*[ivxIVX]+[.)\]]\s*(.+)$",
        r"^\s*[-•*→▪▸◦‣⁃]\s*(.+)$",
        r"^\s*[🔸🔹🔶🔷📌📍⚡💡]\s*(.+)$",
        r"^\s{2,}(\S.+)$",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static INLINE_INDICATOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:including|includes?|such\s+as|like|following|these)\s*:?\s*(.+)$").unwrap()
});

static INLINE_SPLIT: Lazy<Regex> = Lazy::new(|| Regex::new(r",\s*(?:and\s+)?|;\s*|\s+and\s+").unwrap());

static SECTION_HEADERS: Lazy<Vec<(Regex, SectionSlot)>> = Lazy::new(|| {
    vec![
        (
            Regex::new(r"(?im)^\s*(?:deliverables?|outputs?|results?)\s*:\s*$").unwrap(),
            SectionSlot::Deliverables,
        ),
        (
            Regex::new(
                r"(?im)^\s*(?:success\s+criteria|acceptance\s+criteria|done\s+when|definition\s+of\s+done)\s*:\s*$",
            )
            .unwrap(),
            SectionSlot::SuccessCriteria,
        ),
        (
            Regex::new(r"(?im)^\s*(?:requirements?|constraints?|prerequisites?)\s*:\s*$").unwrap(),
            SectionSlot::Constraints,
        ),
        (
            Regex::new(r"(?im)^\s*(?:dependencies|depends\s+on|blocked\s+by|waiting\s+for)\s*:\s*$")
                .unwrap(),
            SectionSlot::Dependencies,
        ),
    ]
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SectionSlot {
    Deliverables,
    SuccessCriteria,
    Constraints,
    Dependencies,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequirementSections {
    pub deliverables: Vec<String>,
    pub success_criteria: Vec<String>,
    pub constraints: Vec<String>,
    pub dependencies: Vec<String>,
}

/// Bind section-headed list blocks to their requirement slots.
///
/// A section runs from its header line until a blank line followed by a
/// non-list line, or the next recognized header.
pub fn extract_requirement_sections(body: &str) -> RequirementSections {
    let mut sections = RequirementSections::default();
    let lines: Vec<&str> = body.lines().collect();

    let mut current: Option<SectionSlot> = None;
    for line in &lines {
        let header = SECTION_HEADERS
            .iter()
            .find(|(re, _)| re.is_match(line))
            .map(|(_, slot)| *slot);
        if let Some(slot) = header {
            current = Some(slot);
            continue;
        }

        let Some(slot) = current else { continue };
        if line.trim().is_empty() {
            current = None;
            continue;
        }
        let Some(item) = match_list_item(line) else {
            current = None;
            continue;
        };
        if item.len() >= MIN_ITEM_LEN {
            let bucket = match slot {
                SectionSlot::Deliverables => &mut sections.deliverables,
                SectionSlot::SuccessCriteria => &mut sections.success_criteria,
                SectionSlot::Constraints => &mut sections.constraints,
                SectionSlot::Dependencies => &mut sections.dependencies,
            };
            bucket.push(item);
        }
    }

    sections
}

fn match_list_item(line: &str) -> Option<String> {
    for pattern in ITEM_PATTERNS.iter() {
        if let Some(caps) = pattern.captures(line) {
            return Some(caps[1].trim().to_string());
        }
    }
    None
}

/// Extract structured list items from an arbitrary block of text.
pub fn extract_list_items(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(match_list_item)
        .filter(|item| item.len() >= MIN_ITEM_LEN)
        .collect()
}

/// Extract an inline list from a sentence.
///
/// With an introducing indicator ("including", "such as", "following", …)
/// two items suffice; without one, three are required to avoid splitting
/// ordinary prose.
pub fn extract_inline_list(sentence: &str) -> Vec<String> {
    let (candidate, minimum) = match INLINE_INDICATOR.captures(sentence) {
        Some(caps) => (caps[1].to_string(), 2),
        None => (sentence.to_string(), 3),
    };

    let items: Vec<String> = INLINE_SPLIT
        .split(&candidate)
        .map(|item| item.trim().trim_end_matches(['.', '!', '?']).to_string())
        .filter(|item| item.len() >= MIN_ITEM_LEN && item.len() < MAX_INLINE_ITEM_LEN)
        .collect();

    if items.len() >= minimum {
        items
    } else {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deliverables_section_binds_items() {
        let body = "Hi team,\n\nDeliverables:\n- API spec\n- Tests\n\nThanks";
        let sections = extract_requirement_sections(body);
        assert_eq!(sections.deliverables, vec!["API spec", "Tests"]);
        assert!(sections.dependencies.is_empty());
    }

    #[test]
    fn multiple_sections_bind_independently() {
        let body = concat!(
            "Deliverables:\n1. Design doc\n2. Prototype\n\n",
            "Success Criteria:\n- [ ] All tests green\n- [x] Deployed to staging\n\n",
            "Dependencies:\n* Auth service migration\n"
        );
        let sections = extract_requirement_sections(body);
        assert_eq!(sections.deliverables, vec!["Design doc", "Prototype"]);
        assert_eq!(
            sections.success_criteria,
            vec!["All tests green", "Deployed to staging"]
        );
        assert_eq!(sections.dependencies, vec!["Auth service migration"]);
    }

    #[test]
    fn requirements_header_fills_constraints() {
        let body = "Requirements:\n- Must run on Linux\n- No new dependencies\n";
        let sections = extract_requirement_sections(body);
        assert_eq!(
            sections.constraints,
            vec!["Must run on Linux", "No new dependencies"]
        );
    }

    #[test]
    fn checkbox_and_numbered_and_lettered_styles_all_parse() {
        let text = "[ ] first item\n2) second item\nc. third item\niv) fourth item\n• fifth item";
        let items = extract_list_items(text);
        assert_eq!(items.len(), 5);
        assert_eq!(items[0], "first item");
        assert_eq!(items[3], "fourth item");
    }

    #[test]
    fn short_items_are_dropped() {
        let items = extract_list_items("- ok\n- a real item");
        assert_eq!(items, vec!["a real item"]);
    }

    #[test]
    fn inline_list_with_indicator_needs_two_items() {
        let items = extract_inline_list("We need the following: login page, signup flow");
        assert_eq!(items, vec!["login page", "signup flow"]);
    }

    #[test]
    fn inline_list_without_indicator_needs_three_items() {
        assert!(extract_inline_list("fix login, update docs").is_empty());
        let items = extract_inline_list("fix login, update docs, ship release");
        assert_eq!(items.len(), 3);
    }

    #[test]
    fn inline_list_strips_trailing_punctuation() {
        let items = extract_inline_list("including metrics, dashboards, and alerts.");
        assert_eq!(items, vec!["metrics", "dashboards", "alerts"]);
    }

    #[test]
    fn blank_line_then_prose_ends_a_section() {
        let body = "Deliverables:\n- API spec\n\nUnrelated paragraph text here.";
        let sections = extract_requirement_sections(body);
        assert_eq!(sections.deliverables, vec!["API spec"]);
    }
}
