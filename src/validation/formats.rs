//! Built-in format validators: email, URL, UUID, ISO-8601 date, JSON.

use regex::Regex;
use std::sync::OnceLock;

/// The formats a string constraint can demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatKind {
    Email,
    Url,
    Uuid,
    Iso8601,
    Json,
}

impl FormatKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Url => "URL",
            Self::Uuid => "UUID",
            Self::Iso8601 => "ISO-8601 date",
            Self::Json => "JSON",
        }
    }
}

/// Does the string satisfy the format?
pub fn matches(kind: FormatKind, value: &str) -> bool {
    match kind {
        FormatKind::Email => email_regex().is_match(value),
        FormatKind::Url => is_url(value),
        FormatKind::Uuid => uuid_regex().is_match(value),
        FormatKind::Iso8601 => chrono::DateTime::parse_from_rfc3339(value).is_ok(),
        FormatKind::Json => serde_json::from_str::<serde_json::Value>(value).is_ok(),
    }
}

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$").expect("valid regex")
    })
}

fn uuid_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
            .expect("valid regex")
    })
}

fn is_url(value: &str) -> bool {
    let Some((scheme, rest)) = value.split_once("://") else {
        return false;
    };
    !scheme.is_empty()
        && scheme.chars().all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-')
        && !rest.is_empty()
}
