//! Detectors for sensitive fragments and disallowed requests.
//!
//! Redaction works on whitespace-delimited words (emails, API keys, IPv4 addresses) and
//! on numeric runs that may span spaces (card numbers, phone numbers). Blocking works on
//! lowercase alphabetic words so punctuation and casing cannot split a phrase.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Category of a redaction or block. The matched text itself is never kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedactionCategory {
    Email,
    Phone,
    CreditCard,
    ApiKey,
    IpAddress,
    PromptInjection,
    CredentialRequest,
}

impl RedactionCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            RedactionCategory::Email => "email",
            RedactionCategory::Phone => "phone",
            RedactionCategory::CreditCard => "credit_card",
            RedactionCategory::ApiKey => "api_key",
            RedactionCategory::IpAddress => "ip_address",
            RedactionCategory::PromptInjection => "prompt_injection",
            RedactionCategory::CredentialRequest => "credential_request",
        }
    }

    /// Categories that make the whole prompt disallowed rather than redactable.
    pub fn blocks(self) -> bool {
        matches!(
            self,
            RedactionCategory::PromptInjection | RedactionCategory::CredentialRequest
        )
    }

    fn placeholder(self) -> &'static str {
        match self {
            RedactionCategory::Email => "[REDACTED_EMAIL]",
            RedactionCategory::Phone => "[REDACTED_PHONE]",
            RedactionCategory::CreditCard => "[REDACTED_CARD]",
            RedactionCategory::ApiKey => "[REDACTED_KEY]",
            RedactionCategory::IpAddress => "[REDACTED_IP]",
            RedactionCategory::PromptInjection | RedactionCategory::CredentialRequest => {
                "[REDACTED]"
            }
        }
    }
}

impl fmt::Display for RedactionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const EDGE_PUNCTUATION: &[char] = &[
    ',', '.', ';', ':', '!', '?', '"', '\'', '(', ')', '[', ']', '{', '}', '<', '>',
];

const KEY_PREFIXES: &[&str] = &["sk-", "sk_", "pk_", "rk_", "ghp_", "gho_", "xoxb-", "xoxp-", "AKIA"];

/// Replace sensitive words with category placeholders.
pub(crate) fn redact_words(text: &str, found: &mut Vec<RedactionCategory>) -> String {
    let mut out = String::with_capacity(text.len());
    for (i, word) in text.split(' ').enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let core = word.trim_matches(EDGE_PUNCTUATION);
        match classify_word(core) {
            Some(category) if !core.is_empty() => {
                found.push(category);
                // core is a substring of word, so the split is on char boundaries
                let start = word.len() - word.trim_start_matches(EDGE_PUNCTUATION).len();
                out.push_str(&word[..start]);
                out.push_str(category.placeholder());
                out.push_str(&word[start + core.len()..]);
            }
            _ => out.push_str(word),
        }
    }
    out
}

fn classify_word(word: &str) -> Option<RedactionCategory> {
    if is_email(word) {
        Some(RedactionCategory::Email)
    } else if is_api_key(word) {
        Some(RedactionCategory::ApiKey)
    } else if is_ipv4(word) {
        Some(RedactionCategory::IpAddress)
    } else {
        None
    }
}

fn is_email(word: &str) -> bool {
    let Some((local, domain)) = word.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && local
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "._%+-".contains(c))
        && domain
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
}

fn is_api_key(word: &str) -> bool {
    if KEY_PREFIXES
        .iter()
        .any(|prefix| word.starts_with(prefix) && word.len() >= prefix.len() + 12)
    {
        return word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    }
    // Long opaque tokens mixing letters and digits read as secrets, not prose.
    word.len() >= 32
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        && word.chars().any(|c| c.is_ascii_digit())
        && word.chars().any(|c| c.is_ascii_alphabetic())
}

fn is_ipv4(word: &str) -> bool {
    let octets: Vec<&str> = word.split('.').collect();
    octets.len() == 4
        && octets.iter().all(|octet| {
            !octet.is_empty()
                && octet.len() <= 3
                && octet.chars().all(|c| c.is_ascii_digit())
                && octet.parse::<u16>().map(|v| v <= 255).unwrap_or(false)
        })
}

/// Replace card and phone numbers. A numeric run is a maximal span of digits joined by
/// single spaces, dashes, dots or parentheses, with at most five groups.
pub(crate) fn redact_numbers(text: &str, found: &mut Vec<RedactionCategory>) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;

    while i < chars.len() {
        let starts_run = chars[i].is_ascii_digit()
            || ((chars[i] == '+' || chars[i] == '(')
                && chars.get(i + 1).map(|c| c.is_ascii_digit()).unwrap_or(false));
        let preceded_by_word = i > 0 && chars[i - 1].is_alphanumeric();
        if !starts_run || preceded_by_word {
            out.push(chars[i]);
            i += 1;
            continue;
        }

        let end = numeric_run_end(&chars, i);
        let run: String = chars[i..end].iter().collect();
        let followed_by_word = chars.get(end).map(|c| c.is_alphanumeric()).unwrap_or(false);

        match classify_number(&run) {
            Some(category) if !followed_by_word => {
                found.push(category);
                out.push_str(category.placeholder());
            }
            _ => out.push_str(&run),
        }
        i = end;
    }
    out
}

fn numeric_run_end(chars: &[char], start: usize) -> usize {
    let mut end = start;
    let mut last_digit = start;
    let mut groups = 1;
    let mut j = start;
    while j < chars.len() {
        let c = chars[j];
        if c.is_ascii_digit() {
            last_digit = j;
        } else if c == ' ' {
            let next_digit = chars
                .get(j + 1)
                .map(|n| n.is_ascii_digit() || *n == '(')
                .unwrap_or(false);
            if !next_digit || groups >= 5 {
                break;
            }
            groups += 1;
        } else if !"+-().".contains(c) {
            break;
        }
        j += 1;
        end = last_digit + 1;
    }
    // Trailing parenthesis belongs to the number when it closes an area code.
    if chars.get(end) == Some(&')') && chars[start..end].contains(&'(') {
        end += 1;
    }
    end.max(start + 1)
}

fn classify_number(run: &str) -> Option<RedactionCategory> {
    let digits: Vec<u32> = run.chars().filter_map(|c| c.to_digit(10)).collect();
    if is_ipv4(run) {
        return Some(RedactionCategory::IpAddress);
    }
    if (13..=19).contains(&digits.len()) && luhn_valid(&digits) && !run.contains('.') {
        return Some(RedactionCategory::CreditCard);
    }
    if (10..=15).contains(&digits.len()) && !run.contains('.') {
        return Some(RedactionCategory::Phone);
    }
    None
}

fn luhn_valid(digits: &[u32]) -> bool {
    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}

const OVERRIDE_VERBS: &[&str] = &["ignore", "disregard", "forget", "bypass", "override"];
const OVERRIDE_TARGETS: &[&str] = &[
    "rule", "rules", "instruction", "instructions", "guideline", "guidelines", "policy",
    "policies", "restriction", "restrictions", "filter", "filters", "safety", "prompt",
];
const INJECTION_PHRASES: &[&[&str]] = &[
    &["system", "prompt"],
    &["developer", "mode"],
    &["jailbreak"],
    &["jailbroken"],
];
const EXFIL_VERBS: &[&str] = &[
    "leak", "reveal", "dump", "exfiltrate", "steal", "expose", "print", "show", "tell", "give",
    "send", "share", "output", "disclose",
];
const CREDENTIAL_NOUNS: &[&str] = &[
    "password", "passwords", "passwd", "credential", "credentials", "secret", "secrets",
    "token", "tokens", "apikey", "passphrase",
];
const CREDENTIAL_PHRASES: &[&[&str]] = &[&["api", "key"], &["private", "key"], &["ssh", "key"]];

/// Words within this distance after a verb count as its object.
const WINDOW: usize = 4;

/// Find categories that make the whole text disallowed.
pub(crate) fn blocked_categories(text: &str) -> Vec<RedactionCategory> {
    let words: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect();
    let words: Vec<&str> = words.iter().map(String::as_str).collect();

    let mut found = Vec::new();
    if has_verb_object(&words, OVERRIDE_VERBS, OVERRIDE_TARGETS, &[])
        || INJECTION_PHRASES.iter().any(|p| contains_phrase(&words, p))
    {
        found.push(RedactionCategory::PromptInjection);
    }
    if has_verb_object(&words, EXFIL_VERBS, CREDENTIAL_NOUNS, CREDENTIAL_PHRASES) {
        found.push(RedactionCategory::CredentialRequest);
    }
    found
}

fn has_verb_object(words: &[&str], verbs: &[&str], nouns: &[&str], phrases: &[&[&str]]) -> bool {
    words.iter().enumerate().any(|(i, word)| {
        if !verbs.contains(word) {
            return false;
        }
        let window_end = (i + 1 + WINDOW).min(words.len());
        let window = &words[i + 1..window_end];
        window.iter().any(|w| nouns.contains(w))
            || phrases
                .iter()
                .any(|p| contains_phrase(&words[i + 1..(window_end + 1).min(words.len())], p))
    })
}

fn contains_phrase(words: &[&str], phrase: &[&str]) -> bool {
    !phrase.is_empty() && words.windows(phrase.len()).any(|w| w == phrase)
}
