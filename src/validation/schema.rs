//! Schema definitions and the validation walk.
//!
//! A [`Schema`] is a list of path-addressed rules over a JSON document. The
//! constraint set mirrors what the memory core's public operations need:
//! string bounds with optional regex, numeric ranges, enums, arrays, and the
//! built-in formats.

use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use super::formats::{self, FormatKind};
use super::{sanitize_value, FieldError, FieldErrorCode};

/// What a failing rule expected, shaped for API consumers.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged, rename_all_fields = "camelCase")]
pub enum Expected {
    MinLength { min_length: usize },
    MaxLength { max_length: usize },
    MinValue { min_value: f64 },
    MaxValue { max_value: f64 },
    Pattern { pattern: String },
    OneOf { values: Vec<String> },
    Type { type_name: String },
    Format { format: String },
}

/// Constraint applied to a single field.
#[derive(Debug, Clone)]
pub enum Constraint {
    String {
        min_length: Option<usize>,
        max_length: Option<usize>,
        pattern: Option<String>,
    },
    Number {
        min: Option<f64>,
        max: Option<f64>,
    },
    Boolean,
    Enum {
        values: Vec<String>,
    },
    Array {
        min_items: Option<usize>,
        items: Option<Box<Constraint>>,
    },
    Format(FormatKind),
    /// Presence-only rule.
    Any,
}

/// One path-addressed rule.
#[derive(Debug, Clone)]
pub struct FieldRule {
    pub path: String,
    pub required: bool,
    pub constraint: Constraint,
}

/// A named set of rules.
#[derive(Debug, Clone)]
pub struct Schema {
    pub name: String,
    pub rules: Vec<FieldRule>,
}

impl Schema {
    /// Validate a document, returning every field error found.
    pub fn validate(&self, value: &Value) -> Vec<FieldError> {
        let mut errors = Vec::new();
        for rule in &self.rules {
            match resolve_path(value, &rule.path) {
                None | Some(Value::Null) => {
                    if rule.required {
                        errors.push(required_error(&rule.path));
                    }
                }
                Some(found) => {
                    // An empty required string is treated as absent.
                    if rule.required && found.as_str().is_some_and(str::is_empty) {
                        errors.push(required_error(&rule.path));
                        continue;
                    }
                    check_constraint(found, &rule.constraint, &rule.path, &mut errors);
                }
            }
        }
        errors
    }
}

fn required_error(path: &str) -> FieldError {
    FieldError::simple(
        FieldErrorCode::FieldRequired,
        path,
        format!("{path} is required"),
    )
    .with_constraint("required")
    .with_suggestion(format!("provide a non-empty value for {path}"))
}

fn check_constraint(value: &Value, constraint: &Constraint, path: &str, errors: &mut Vec<FieldError>) {
    match constraint {
        Constraint::String {
            min_length,
            max_length,
            pattern,
        } => {
            let Some(s) = value.as_str() else {
                errors.push(type_error(path, "string", value));
                return;
            };
            let chars = s.chars().count();
            if let Some(min) = min_length {
                if chars < *min {
                    errors.push(
                        FieldError::simple(
                            FieldErrorCode::StringTooShort,
                            path,
                            format!("{path} must be at least {min} characters"),
                        )
                        .with_constraint("min_length")
                        .with_expected(Expected::MinLength { min_length: *min })
                        .with_actual(value),
                    );
                }
            }
            if let Some(max) = max_length {
                if chars > *max {
                    errors.push(
                        FieldError::simple(
                            FieldErrorCode::StringTooLong,
                            path,
                            format!("{path} must be at most {max} characters"),
                        )
                        .with_constraint("max_length")
                        .with_expected(Expected::MaxLength { max_length: *max })
                        .with_actual(value),
                    );
                }
            }
            if let Some(pattern) = pattern {
                match Regex::new(pattern) {
                    Ok(re) if !re.is_match(s) => {
                        errors.push(
                            FieldError::simple(
                                FieldErrorCode::PatternMismatch,
                                path,
                                format!("{path} does not match the expected pattern"),
                            )
                            .with_constraint("pattern")
                            .with_expected(Expected::Pattern {
                                pattern: pattern.clone(),
                            })
                            .with_actual(value),
                        );
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::error!(pattern, error = %e, "invalid schema pattern");
                        errors.push(FieldError::simple(
                            FieldErrorCode::CustomValidationFailed,
                            path,
                            "schema pattern is invalid",
                        ));
                    }
                }
            }
        }
        Constraint::Number { min, max } => {
            let Some(n) = value.as_f64() else {
                errors.push(type_error(path, "number", value));
                return;
            };
            if let Some(min) = min {
                if n < *min {
                    errors.push(
                        FieldError::simple(
                            FieldErrorCode::NumberTooSmall,
                            path,
                            format!("{path} must be >= {min}"),
                        )
                        .with_constraint("min")
                        .with_expected(Expected::MinValue { min_value: *min })
                        .with_actual(value),
                    );
                }
            }
            if let Some(max) = max {
                if n > *max {
                    errors.push(
                        FieldError::simple(
                            FieldErrorCode::NumberTooLarge,
                            path,
                            format!("{path} must be <= {max}"),
                        )
                        .with_constraint("max")
                        .with_expected(Expected::MaxValue { max_value: *max })
                        .with_actual(value),
                    );
                }
            }
        }
        Constraint::Boolean => {
            if !value.is_boolean() {
                errors.push(type_error(path, "boolean", value));
            }
        }
        Constraint::Enum { values } => {
            let matches = value
                .as_str()
                .map(|s| values.iter().any(|v| v == s))
                .unwrap_or(false);
            if !matches {
                errors.push(
                    FieldError::simple(
                        FieldErrorCode::InvalidEnumValue,
                        path,
                        format!("{path} must be one of: {}", values.join(", ")),
                    )
                    .with_constraint("enum")
                    .with_expected(Expected::OneOf {
                        values: values.clone(),
                    })
                    .with_actual(value),
                );
            }
        }
        Constraint::Array { min_items, items } => {
            let Some(array) = value.as_array() else {
                errors.push(type_error(path, "array", value));
                return;
            };
            if let Some(min) = min_items {
                if array.len() < *min {
                    errors.push(
                        FieldError::simple(
                            FieldErrorCode::ArrayItemInvalid,
                            path,
                            format!("{path} must have at least {min} item(s)"),
                        )
                        .with_constraint("min_items"),
                    );
                }
            }
            if let Some(item_constraint) = items {
                for (index, item) in array.iter().enumerate() {
                    let item_path = format!("{path}[{index}]");
                    let mut item_errors = Vec::new();
                    check_constraint(item, item_constraint, &item_path, &mut item_errors);
                    for mut e in item_errors {
                        e.code = FieldErrorCode::ArrayItemInvalid;
                        errors.push(e);
                    }
                }
            }
        }
        Constraint::Format(kind) => {
            let Some(s) = value.as_str() else {
                errors.push(type_error(path, "string", value));
                return;
            };
            if !formats::matches(*kind, s) {
                errors.push(
                    FieldError::simple(
                        FieldErrorCode::InvalidFormat,
                        path,
                        format!("{path} is not a valid {}", kind.as_str()),
                    )
                    .with_constraint("format")
                    .with_expected(Expected::Format {
                        format: kind.as_str().to_string(),
                    })
                    .with_actual(value),
                );
            }
        }
        Constraint::Any => {}
    }
}

fn type_error(path: &str, type_name: &str, value: &Value) -> FieldError {
    FieldError {
        code: FieldErrorCode::TypeMismatch,
        message: format!("{path} must be a {type_name}"),
        path: path.to_string(),
        constraint: Some("type".to_string()),
        actual_value: Some(sanitize_value(path, value)),
        expected: Some(Expected::Type {
            type_name: type_name.to_string(),
        }),
        suggestion: None,
    }
}

/// Resolve a dot/bracket path like `memories[2].id` into a document.
fn resolve_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        let (field, indexes) = split_indexes(segment);
        if !field.is_empty() {
            current = current.as_object()?.get(field)?;
        }
        for index in indexes {
            current = current.as_array()?.get(index)?;
        }
    }
    Some(current)
}

/// Split `"memories[2][0]"` into `("memories", [2, 0])`.
fn split_indexes(segment: &str) -> (&str, Vec<usize>) {
    match segment.find('[') {
        None => (segment, Vec::new()),
        Some(start) => {
            let field = &segment[..start];
            let indexes = segment[start..]
                .split('[')
                .filter(|s| !s.is_empty())
                .filter_map(|s| s.trim_end_matches(']').parse().ok())
                .collect();
            (field, indexes)
        }
    }
}

/// The schemas the memory core registers at startup.
///
/// Rule paths use the wire-contract camelCase names.
pub fn builtin_schemas() -> Vec<(&'static str, Schema)> {
    let sector_values: Vec<String> = crate::memory::types::Sector::ALL
        .iter()
        .map(|s| s.as_str().to_string())
        .collect();

    let string_field = |path: &str, required: bool, max: usize| FieldRule {
        path: path.to_string(),
        required,
        constraint: Constraint::String {
            min_length: Some(1),
            max_length: Some(max),
            pattern: None,
        },
    };
    let unit_interval = |path: &str| FieldRule {
        path: path.to_string(),
        required: false,
        constraint: Constraint::Number {
            min: Some(0.0),
            max: Some(1.0),
        },
    };

    vec![
        (
            "memory.create",
            Schema {
                name: "memory.create".into(),
                rules: vec![
                    string_field("content", true, 100_000),
                    string_field("userId", true, 256),
                    string_field("sessionId", true, 256),
                    FieldRule {
                        path: "primarySector".into(),
                        required: true,
                        constraint: Constraint::Enum {
                            values: sector_values.clone(),
                        },
                    },
                    unit_interval("salience"),
                ],
            },
        ),
        (
            "memory.update",
            Schema {
                name: "memory.update".into(),
                rules: vec![
                    string_field("content", false, 100_000),
                    unit_interval("strength"),
                    unit_interval("salience"),
                ],
            },
        ),
        (
            "search.request",
            Schema {
                name: "search.request".into(),
                rules: vec![
                    string_field("userId", true, 256),
                    FieldRule {
                        path: "limit".into(),
                        required: true,
                        constraint: Constraint::Number {
                            min: Some(1.0),
                            max: Some(1000.0),
                        },
                    },
                    unit_interval("minStrength"),
                    unit_interval("minSalience"),
                ],
            },
        ),
        (
            "consolidate.request",
            Schema {
                name: "consolidate.request".into(),
                rules: vec![
                    string_field("userId", true, 256),
                    unit_interval("similarityThreshold"),
                    FieldRule {
                        path: "minClusterSize".into(),
                        required: false,
                        constraint: Constraint::Number {
                            min: Some(2.0),
                            max: None,
                        },
                    },
                    FieldRule {
                        path: "batchSize".into(),
                        required: false,
                        constraint: Constraint::Number {
                            min: Some(1.0),
                            max: None,
                        },
                    },
                    unit_interval("strengthReductionFactor"),
                ],
            },
        ),
        (
            "import.request",
            Schema {
                name: "import.request".into(),
                rules: vec![
                    string_field("userId", true, 256),
                    FieldRule {
                        path: "mode".into(),
                        required: true,
                        constraint: Constraint::Enum {
                            values: vec!["merge".into(), "replace".into()],
                        },
                    },
                ],
            },
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema(rules: Vec<FieldRule>) -> Schema {
        Schema {
            name: "test".into(),
            rules,
        }
    }

    #[test]
    fn required_catches_absent_null_and_empty() {
        let s = schema(vec![FieldRule {
            path: "userId".into(),
            required: true,
            constraint: Constraint::String {
                min_length: Some(1),
                max_length: None,
                pattern: None,
            },
        }]);

        for doc in [
            serde_json::json!({}),
            serde_json::json!({"userId": null}),
            serde_json::json!({"userId": ""}),
        ] {
            let errors = s.validate(&doc);
            assert_eq!(errors.len(), 1, "{doc}");
            assert_eq!(errors[0].code, FieldErrorCode::FieldRequired);
            assert_eq!(errors[0].path, "userId");
        }
    }

    #[test]
    fn number_range_produces_expected_bounds() {
        let s = schema(vec![FieldRule {
            path: "similarityThreshold".into(),
            required: false,
            constraint: Constraint::Number {
                min: Some(0.0),
                max: Some(1.0),
            },
        }]);

        let errors = s.validate(&serde_json::json!({"similarityThreshold": 1.5}));
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code, FieldErrorCode::NumberTooLarge);
        match errors[0].expected.as_ref().unwrap() {
            Expected::MaxValue { max_value } => assert!((max_value - 1.0).abs() < 1e-12),
            other => panic!("unexpected expected: {other:?}"),
        }

        // The bound serializes under its wire name.
        let expected_json =
            serde_json::to_value(errors[0].expected.as_ref().unwrap()).unwrap();
        assert_eq!(expected_json["maxValue"], 1.0);

        let errors = s.validate(&serde_json::json!({"similarityThreshold": -0.2}));
        assert_eq!(errors[0].code, FieldErrorCode::NumberTooSmall);
    }

    #[test]
    fn string_bounds_and_pattern() {
        let s = schema(vec![FieldRule {
            path: "name".into(),
            required: false,
            constraint: Constraint::String {
                min_length: Some(3),
                max_length: Some(8),
                pattern: Some("^[a-z-]+$".into()),
            },
        }]);

        assert_eq!(
            s.validate(&serde_json::json!({"name": "ab"}))[0].code,
            FieldErrorCode::StringTooShort
        );
        assert_eq!(
            s.validate(&serde_json::json!({"name": "much-too-long"}))[0].code,
            FieldErrorCode::StringTooLong
        );
        assert_eq!(
            s.validate(&serde_json::json!({"name": "UPPER"}))[0].code,
            FieldErrorCode::PatternMismatch
        );
        assert!(s.validate(&serde_json::json!({"name": "fine"})).is_empty());
    }

    #[test]
    fn type_mismatch_is_reported() {
        let s = schema(vec![FieldRule {
            path: "limit".into(),
            required: false,
            constraint: Constraint::Number {
                min: None,
                max: None,
            },
        }]);
        let errors = s.validate(&serde_json::json!({"limit": "ten"}));
        assert_eq!(errors[0].code, FieldErrorCode::TypeMismatch);
    }

    #[test]
    fn enum_constraint() {
        let s = schema(vec![FieldRule {
            path: "mode".into(),
            required: true,
            constraint: Constraint::Enum {
                values: vec!["merge".into(), "replace".into()],
            },
        }]);
        let errors = s.validate(&serde_json::json!({"mode": "upsert"}));
        assert_eq!(errors[0].code, FieldErrorCode::InvalidEnumValue);
        assert!(s.validate(&serde_json::json!({"mode": "merge"})).is_empty());
    }

    #[test]
    fn array_items_are_checked() {
        let s = schema(vec![FieldRule {
            path: "weights".into(),
            required: false,
            constraint: Constraint::Array {
                min_items: Some(1),
                items: Some(Box::new(Constraint::Number {
                    min: Some(0.0),
                    max: Some(1.0),
                })),
            },
        }]);

        let errors = s.validate(&serde_json::json!({"weights": [0.5, 2.0]}));
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code, FieldErrorCode::ArrayItemInvalid);
        assert_eq!(errors[0].path, "weights[1]");
    }

    #[test]
    fn nested_paths_resolve() {
        let s = schema(vec![FieldRule {
            path: "memories[0].id".into(),
            required: true,
            constraint: Constraint::String {
                min_length: Some(1),
                max_length: None,
                pattern: None,
            },
        }]);
        let doc = serde_json::json!({"memories": [{"id": "m1"}]});
        assert!(s.validate(&doc).is_empty());

        let doc = serde_json::json!({"memories": [{}]});
        assert_eq!(s.validate(&doc)[0].code, FieldErrorCode::FieldRequired);
    }

    #[test]
    fn builtin_consolidate_schema_matches_reference_case() {
        // The wire-literal request {userId: "", similarityThreshold: 1.5}
        // must produce exactly FIELD_REQUIRED + NUMBER_TOO_LARGE.
        let (_, s) = builtin_schemas()
            .into_iter()
            .find(|(name, _)| *name == "consolidate.request")
            .unwrap();
        let errors = s.validate(&serde_json::json!({
            "userId": "",
            "similarityThreshold": 1.5,
        }));

        assert_eq!(errors.len(), 2);
        assert!(errors
            .iter()
            .any(|e| e.path == "userId" && e.code == FieldErrorCode::FieldRequired));
        assert!(errors
            .iter()
            .any(|e| e.path == "similarityThreshold"
                && e.code == FieldErrorCode::NumberTooLarge));
    }
}
