//! Prompt Safety Gate
//!
//! Turns raw user text into a [`SanitizedPrompt`] before anything leaves the process:
//! Unicode normalization, whitespace collapse, redaction of sensitive fragments, a block
//! verdict for disallowed requests, and truncation. The gate is a pure function of its input.

use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

mod detect;

pub use detect::RedactionCategory;

/// Characters of sanitized text shown by [`SanitizedPrompt::masked_preview`].
const PREVIEW_CHARS: usize = 16;

/// Output of the safety gate. Never logged verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SanitizedPrompt {
    text: String,
    hash: String,
    redactions: Vec<RedactionCategory>,
    truncated: bool,
    blocked: bool,
}

impl SanitizedPrompt {
    /// Sanitized text, safe to send to a provider when not blocked.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Hex BLAKE3 digest of the sanitized text.
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Distinct categories redacted or blocked, sorted.
    pub fn redactions(&self) -> &[RedactionCategory] {
        &self.redactions
    }

    pub fn truncated(&self) -> bool {
        self.truncated
    }

    pub fn blocked(&self) -> bool {
        self.blocked
    }

    /// Short log-safe preview: a prefix of the sanitized text plus its length.
    pub fn masked_preview(&self) -> String {
        let total = self.text.chars().count();
        if total <= PREVIEW_CHARS {
            return format!("{} ({} chars)", "*".repeat(total), total);
        }
        let prefix: String = self.text.chars().take(PREVIEW_CHARS).collect();
        format!("{}... ({} chars)", prefix, total)
    }

    /// Append a style suffix and re-run the gate over the result.
    ///
    /// Enhancement can reintroduce disallowed content, so the enhanced text goes through
    /// [`sanitize`] again; redactions of both passes are unioned and a block from either
    /// pass stands.
    pub fn enhance(&self, style: &str, max_length: usize) -> SanitizedPrompt {
        let style = style.trim();
        if style.is_empty() || self.blocked {
            return self.clone();
        }
        // The user text gives way so the suffix fits inside `max_length`.
        let suffix = format!("{} style, high quality seamless texture", style);
        let separator = ", ";
        let budget = max_length.saturating_sub(suffix.chars().count() + separator.len());
        let user_cut = self.text.chars().count() > budget;
        let user_text: String = self.text.chars().take(budget).collect();
        let user_text = user_text.trim_end();
        let enhanced = if user_text.is_empty() {
            suffix
        } else {
            format!("{}{}{}", user_text, separator, suffix)
        };
        let second = sanitize(&enhanced, max_length);
        let mut redactions = self.redactions.clone();
        redactions.extend_from_slice(&second.redactions);
        redactions.sort();
        redactions.dedup();

        SanitizedPrompt {
            hash: second.hash,
            text: second.text,
            redactions,
            truncated: self.truncated || user_cut || second.truncated,
            blocked: second.blocked,
        }
    }
}

/// Sanitize `raw` to at most `max_length` characters.
///
/// Never fails: empty or whitespace-only input yields an empty, unblocked prompt. The block
/// verdict is taken over the whole normalized text, before truncation, so a disallowed
/// request cannot hide past the cut.
pub fn sanitize(raw: &str, max_length: usize) -> SanitizedPrompt {
    let normalized = normalize(raw);

    let mut found = detect::blocked_categories(&normalized);
    let blocked = !found.is_empty();

    let redacted = detect::redact_words(&normalized, &mut found);
    let redacted = detect::redact_numbers(&redacted, &mut found);

    let truncated = redacted.chars().count() > max_length;
    let text = if truncated {
        let cut: String = redacted.chars().take(max_length).collect();
        cut.trim_end().to_string()
    } else {
        redacted
    };

    found.sort();
    found.dedup();

    SanitizedPrompt {
        hash: prompt_hash(&text),
        text,
        redactions: found,
        truncated,
        blocked,
    }
}

/// Hex BLAKE3 digest of prompt text.
pub fn prompt_hash(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}

/// NFKC-normalize, drop control characters and collapse whitespace runs to one space.
fn normalize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_space = false;
    for c in raw.nfkc() {
        if c.is_whitespace() {
            pending_space = !out.is_empty();
        } else if c.is_control() || is_invisible(c) {
            continue;
        } else {
            if pending_space {
                out.push(' ');
                pending_space = false;
            }
            out.push(c);
        }
    }
    out
}

/// Zero-width and bidi formatting characters used to split words past filters.
fn is_invisible(c: char) -> bool {
    matches!(
        c,
        '\u{200B}'..='\u{200F}' | '\u{202A}'..='\u{202E}' | '\u{2060}'..='\u{2064}' | '\u{FEFF}'
    )
}
