//! Schema registry and validation surface.
//!
//! The registry holds named [`Schema`]s behind an LRU bound (default 100);
//! eviction happens inside the same critical section as insertion. Validation
//! produces path-accurate [`FieldError`]s with sanitized actual values:
//! secret-bearing field names are redacted and long values truncated before
//! they can reach a log line or an HTTP response.

mod formats;
mod schema;

pub use formats::FormatKind;
pub use schema::{Constraint, Expected, FieldRule, Schema};

use lru::LruCache;
use serde::Serialize;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, OnceLock};

/// Default LRU capacity of the registry.
const DEFAULT_CAPACITY: usize = 100;

/// Field names that never echo their value back.
const SENSITIVE_MARKERS: [&str; 5] = ["password", "token", "secret", "auth", "credential"];

/// Values longer than this are truncated before echoing.
const MAX_ECHOED_CHARS: usize = 100;

/// Machine-readable validation failure codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldErrorCode {
    FieldRequired,
    StringTooShort,
    StringTooLong,
    NumberTooSmall,
    NumberTooLarge,
    PatternMismatch,
    TypeMismatch,
    InvalidEnumValue,
    InvalidFormat,
    ArrayItemInvalid,
    CustomValidationFailed,
}

/// One field-level validation failure. Serializes with the wire contract's
/// camelCase field names.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldError {
    pub code: FieldErrorCode,
    pub message: String,
    /// Dot/bracket path into the validated document, e.g. `memories[2].id`.
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constraint: Option<String>,
    /// The offending value, redacted and truncated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_value: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<Expected>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl FieldError {
    /// A bare error with no constraint payload.
    pub fn simple(
        code: FieldErrorCode,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            path: path.into(),
            constraint: None,
            actual_value: None,
            expected: None,
            suggestion: None,
        }
    }

    /// Attach the offending value, sanitized against the path.
    pub fn with_actual(mut self, path_aware_value: &serde_json::Value) -> Self {
        self.actual_value = Some(sanitize_value(&self.path, path_aware_value));
        self
    }

    pub fn with_expected(mut self, expected: Expected) -> Self {
        self.expected = Some(expected);
        self
    }

    pub fn with_constraint(mut self, constraint: impl Into<String>) -> Self {
        self.constraint = Some(constraint.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

/// Redact secret-bearing fields and truncate long strings.
pub fn sanitize_value(path: &str, value: &serde_json::Value) -> serde_json::Value {
    let segment = path
        .rsplit(['.', '['])
        .next()
        .unwrap_or(path)
        .trim_end_matches(']')
        .to_lowercase();
    let words: Vec<&str> = segment
        .split(|c: char| !c.is_ascii_alphanumeric())
        .collect();
    let sensitive = SENSITIVE_MARKERS.iter().any(|m| segment.contains(m))
        || words.contains(&"key");
    if sensitive {
        return serde_json::Value::String("[REDACTED]".to_string());
    }

    match value {
        serde_json::Value::String(s) if s.chars().count() > MAX_ECHOED_CHARS => {
            let prefix: String = s.chars().take(MAX_ECHOED_CHARS).collect();
            serde_json::Value::String(format!("{prefix}[truncated]"))
        }
        other => other.clone(),
    }
}

/// A registered schema plus caller-supplied metadata.
#[derive(Debug)]
pub struct RegisteredSchema {
    pub schema: Schema,
    pub metadata: Option<serde_json::Value>,
}

/// Process-wide schema registry with an LRU bound.
pub struct SchemaRegistry {
    inner: Mutex<LruCache<String, Arc<RegisteredSchema>>>,
}

impl SchemaRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity.max(1)).expect("capacity >= 1"),
            )),
        }
    }

    /// Insert (or replace) a schema. Eviction of the least-recently-used
    /// entry happens inside the same lock.
    pub fn register(
        &self,
        name: impl Into<String>,
        schema: Schema,
        metadata: Option<serde_json::Value>,
    ) {
        let mut cache = self.inner.lock().expect("registry lock poisoned");
        cache.put(name.into(), Arc::new(RegisteredSchema { schema, metadata }));
    }

    pub fn get(&self, name: &str) -> Option<Arc<RegisteredSchema>> {
        let mut cache = self.inner.lock().expect("registry lock poisoned");
        cache.get(name).cloned()
    }

    pub fn unregister(&self, name: &str) -> bool {
        let mut cache = self.inner.lock().expect("registry lock poisoned");
        cache.pop(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The process-wide registry, initialized with the built-in schemas.
pub fn registry() -> &'static SchemaRegistry {
    static REGISTRY: OnceLock<SchemaRegistry> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let registry = SchemaRegistry::new(DEFAULT_CAPACITY);
        for (name, schema) in schema::builtin_schemas() {
            registry.register(name, schema, None);
        }
        registry
    })
}

/// Validate a value against a registered schema.
///
/// An unregistered name passes with a warning — operations must not start
/// failing because a schema was evicted or unregistered at runtime.
pub fn check(name: &str, value: &serde_json::Value) -> Result<(), Vec<FieldError>> {
    let Some(registered) = registry().get(name) else {
        tracing::warn!(schema = name, "no schema registered, skipping validation");
        return Ok(());
    };
    let errors = registered.schema.validate(value);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_schema(name: &str) -> Schema {
        Schema {
            name: name.to_string(),
            rules: vec![FieldRule {
                path: "value".into(),
                required: true,
                constraint: Constraint::Number {
                    min: Some(0.0),
                    max: Some(1.0),
                },
            }],
        }
    }

    #[test]
    fn register_get_unregister() {
        let registry = SchemaRegistry::new(10);
        registry.register("a", tiny_schema("a"), None);
        assert!(registry.get("a").is_some());
        assert!(registry.unregister("a"));
        assert!(registry.get("a").is_none());
        assert!(!registry.unregister("a"));
    }

    #[test]
    fn lru_bound_evicts_oldest() {
        let registry = SchemaRegistry::new(2);
        registry.register("first", tiny_schema("first"), None);
        registry.register("second", tiny_schema("second"), None);
        // Touch "first" so "second" becomes the eviction candidate.
        registry.get("first");
        registry.register("third", tiny_schema("third"), None);

        assert!(registry.get("first").is_some());
        assert!(registry.get("second").is_none());
        assert!(registry.get("third").is_some());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn metadata_rides_along() {
        let registry = SchemaRegistry::new(4);
        registry.register(
            "with-meta",
            tiny_schema("with-meta"),
            Some(serde_json::json!({"owner": "memory-core"})),
        );
        let fetched = registry.get("with-meta").unwrap();
        assert_eq!(fetched.metadata.as_ref().unwrap()["owner"], "memory-core");
    }

    #[test]
    fn builtins_are_registered() {
        for name in [
            "memory.create",
            "memory.update",
            "search.request",
            "consolidate.request",
            "import.request",
        ] {
            assert!(registry().get(name).is_some(), "missing builtin {name}");
        }
    }

    #[test]
    fn sensitive_paths_are_redacted() {
        let v = serde_json::json!("hunter2");
        assert_eq!(sanitize_value("password", &v), serde_json::json!("[REDACTED]"));
        assert_eq!(sanitize_value("user.api_key", &v), serde_json::json!("[REDACTED]"));
        assert_eq!(sanitize_value("authToken", &v), serde_json::json!("[REDACTED]"));
        assert_eq!(
            sanitize_value("credentials[0]", &v),
            serde_json::json!("[REDACTED]")
        );
        // "keywords" contains "key" as a substring but not as a word.
        assert_eq!(sanitize_value("keywords", &v), v);
    }

    #[test]
    fn long_values_are_truncated() {
        let long = "x".repeat(500);
        let sanitized = sanitize_value("content", &serde_json::json!(long));
        let s = sanitized.as_str().unwrap();
        assert!(s.ends_with("[truncated]"));
        assert!(s.len() < 200);
    }

    #[test]
    fn field_error_codes_serialize_screaming() {
        let json = serde_json::to_string(&FieldErrorCode::NumberTooLarge).unwrap();
        assert_eq!(json, "\"NUMBER_TOO_LARGE\"");
    }

    #[test]
    fn field_errors_serialize_camel_case() {
        let error = FieldError::simple(FieldErrorCode::TypeMismatch, "limit", "not a number")
            .with_actual(&serde_json::json!("ten"));
        let json = serde_json::to_value(&error).unwrap();
        assert_eq!(json["actualValue"], "ten");
        assert!(json.get("actual_value").is_none());
    }
}
