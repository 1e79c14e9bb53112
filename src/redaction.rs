use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Patterns applied in order; the replacement token names what was removed.
static PERSONAL_DATA_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    vec![
        (
            Regex::new(r#"(?i)\b(api[_-]?key|token|secret|password|senha)\s*[:=]\s*["']?[A-Za-z0-9_\-\.]{6,}["']?"#)
                .expect("valid regex"),
            "[SECRET]",
        ),
        (Regex::new(r"\b(sk-[A-Za-z0-9]{20,})\b").expect("valid regex"), "[SECRET]"),
        (
            Regex::new(r"\b[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}\b").expect("valid regex"),
            "[EMAIL]",
        ),
        (
            Regex::new(r"\b\d{2}\.?\d{3}\.?\d{3}/?\d{4}-?\d{2}\b").expect("valid regex"),
            "[CNPJ]",
        ),
        (Regex::new(r"\b\d{3}\.?\d{3}\.?\d{3}-?\d{2}\b").expect("valid regex"), "[CPF]"),
        (
            Regex::new(r"(?:\+55\s?)?\(?\b\d{2}\)?\s?9?\d{4}[-\s]?\d{4}\b").expect("valid regex"),
            "[PHONE]",
        ),
    ]
});

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedactionResult {
    pub content: String,
    pub redaction_count: usize,
}

/// Strips personal data from text before it leaves the process.
#[derive(Debug, Default, Clone)]
pub struct Redactor {
    keep_contacts: bool,
}

impl Redactor {
    /// With `keep_contacts`, emails and phone numbers pass through and only
    /// secrets and tax ids are removed.
    pub fn new(keep_contacts: bool) -> Self {
        Self { keep_contacts }
    }

    pub fn redact(&self, input: &str) -> RedactionResult {
        if input.is_empty() {
            return RedactionResult {
                content: String::new(),
                redaction_count: 0,
            };
        }

        let mut result = input.to_string();
        let mut redaction_count = 0usize;

        for (pattern, token) in PERSONAL_DATA_PATTERNS.iter() {
            if self.keep_contacts && matches!(*token, "[EMAIL]" | "[PHONE]") {
                continue;
            }
            let matches = pattern.find_iter(&result).count();
            if matches == 0 {
                continue;
            }

            redaction_count += matches;
            result = pattern.replace_all(&result, *token).to_string();
        }

        RedactionResult {
            content: result,
            redaction_count,
        }
    }
}
