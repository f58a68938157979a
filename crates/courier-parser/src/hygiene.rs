use once_cell::sync::Lazy;
use regex::Regex;

static FENCED_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)```.*?```").unwrap());
static QUOTED_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^>.*$").unwrap());
static SIGNATURE_DELIMITER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\n-- ?\n.*").unwrap());
static CLOSING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)\n(?:best regards|kind regards|sincerely|thanks|regards|cheers),?\s*\n.*")
        .unwrap()
});
static SENT_FROM: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?im)^sent from my.*$").unwrap());
static BOILERPLATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)(?:this email and any attachments|confidential(?:ity)? notice).*").unwrap()
});

const CODE_SENTINEL: &str = "\u{1}COURIER_CODE_BLOCK\u{1}";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrubbedBody {
    pub text: String,
    pub code_block_count: usize,
}

/// Strip signatures, quoted replies, and confidentiality boilerplate from an
/// email body. Fenced code blocks are lifted out before scrubbing and
/// restored afterwards so their content is never touched.
pub fn scrub_body(body: &str) -> ScrubbedBody {
    let mut code_blocks: Vec<String> = Vec::new();
    let mut text = FENCED_CODE
        .replace_all(body, |caps: &regex::Captures<'_>| {
            code_blocks.push(caps[0].to_string());
            CODE_SENTINEL.to_string()
        })
        .into_owned();

    text = QUOTED_LINE.replace_all(&text, "").into_owned();
    text = SIGNATURE_DELIMITER.replace(&text, "").into_owned();
    text = CLOSING.replace(&text, "").into_owned();
    text = SENT_FROM.replace_all(&text, "").into_owned();
    text = BOILERPLATE.replace(&text, "").into_owned();

    for block in &code_blocks {
        text = text.replacen(CODE_SENTINEL, block, 1);
    }

    ScrubbedBody {
        text: text.trim().to_string(),
        code_block_count: code_blocks.len(),
    }
}
