//! Field validation for request bodies
//!
//! Rules are checked field by field in declaration order; the first failing
//! field/rule pair is reported. Rules other than `required` skip absent or
//! null fields, so optional fields only need to be well-formed when present.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::http::RequestError;

/// A single validation rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "rule", content = "value")]
pub enum Rule {
    /// Present, not null, and not a blank string
    Required,
    String,
    Number,
    Email,
    /// Minimum length in characters (strings) or elements (arrays)
    MinLength(usize),
    MaxLength(usize),
    /// A rule registered on the [`Validator`] under this name
    Custom(std::string::String),
}

impl Rule {
    pub fn name(&self) -> &str {
        match self {
            Rule::Required => "required",
            Rule::String => "string",
            Rule::Number => "number",
            Rule::Email => "email",
            Rule::MinLength(_) => "min_length",
            Rule::MaxLength(_) => "max_length",
            Rule::Custom(name) => name,
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rule::MinLength(n) | Rule::MaxLength(n) => write!(f, "{}({})", self.name(), n),
            _ => f.write_str(self.name()),
        }
    }
}

/// Ordered field → rules mapping
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationRules {
    fields: Vec<(String, Vec<Rule>)>,
}

impl ValidationRules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add rules for `name`; fields are checked in the order they are added
    pub fn field(mut self, name: impl Into<String>, rules: impl IntoIterator<Item = Rule>) -> Self {
        self.fields.push((name.into(), rules.into_iter().collect()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Rule])> {
        self.fields.iter().map(|(name, rules)| (name.as_str(), rules.as_slice()))
    }
}

/// The first field/rule pair that failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("field '{field}' violates rule '{rule}'")]
pub struct ValidationFailure {
    pub field: String,
    pub rule: String,
}

impl From<ValidationFailure> for RequestError {
    fn from(failure: ValidationFailure) -> Self {
        RequestError::validation(failure.field, failure.rule)
    }
}

/// Predicate behind a custom rule; receives the field value, if any
pub type CustomRule = Arc<dyn Fn(Option<&Value>) -> bool + Send + Sync>;

/// Checks JSON objects against [`ValidationRules`]
#[derive(Clone, Default)]
pub struct Validator {
    custom: HashMap<String, CustomRule>,
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Validator")
            .field("custom", &self.custom.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a custom rule, replacing any rule with the same name
    pub fn register<F>(&mut self, name: impl Into<String>, check: F)
    where
        F: Fn(Option<&Value>) -> bool + Send + Sync + 'static,
    {
        self.custom.insert(name.into(), Arc::new(check));
    }

    /// Builder form of [`register`](Self::register)
    pub fn with_rule<F>(mut self, name: impl Into<String>, check: F) -> Self
    where
        F: Fn(Option<&Value>) -> bool + Send + Sync + 'static,
    {
        self.register(name, check);
        self
    }

    /// Validate `data` against `rules`
    pub fn validate(&self, data: &Value, rules: &ValidationRules) -> Result<(), ValidationFailure> {
        for (field, field_rules) in rules.iter() {
            let value = data.get(field);
            for rule in field_rules {
                if !self.check(rule, value) {
                    tracing::debug!(field, rule = %rule, "Validation failed");
                    return Err(ValidationFailure {
                        field: field.to_string(),
                        rule: rule.name().to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    fn check(&self, rule: &Rule, value: Option<&Value>) -> bool {
        if let Rule::Custom(name) = rule {
            return match self.custom.get(name) {
                Some(check) => check(value),
                None => {
                    tracing::warn!(rule = %name, "Unknown validation rule");
                    false
                }
            };
        }

        let value = match value {
            None | Some(Value::Null) => return *rule != Rule::Required,
            Some(value) => value,
        };

        match rule {
            Rule::Required => value.as_str().map_or(true, |s| !s.trim().is_empty()),
            Rule::String => value.is_string(),
            Rule::Number => value.is_number(),
            Rule::Email => value.as_str().is_some_and(|s| email_regex().is_match(s)),
            Rule::MinLength(min) => length_of(value).is_some_and(|len| len >= *min),
            Rule::MaxLength(max) => length_of(value).is_some_and(|len| len <= *max),
            Rule::Custom(_) => unreachable!("custom rules are handled above"),
        }
    }
}

fn length_of(value: &Value) -> Option<usize> {
    match value {
        Value::String(s) => Some(s.chars().count()),
        Value::Array(items) => Some(items.len()),
        _ => None,
    }
}

fn email_regex() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap())
}
