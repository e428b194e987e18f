//! Run-scoped shared scratchpad.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Pre-compiled pattern for `{{blackboard.key}}` placeholders.
static PLACEHOLDER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{blackboard\.([A-Za-z0-9_.\-]+)\}\}")
        .expect("PLACEHOLDER_REGEX is a compile-time constant")
});

/// Key/value scratchpad owned by a single workflow run.
///
/// Completed steps write their output here; later steps read it through
/// `{{blackboard.key}}` placeholders in their input templates. The
/// orchestrator's step-completion path is the only writer, so even steps
/// of a parallel group never race on it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Blackboard {
    entries: HashMap<String, Value>,
}

impl Blackboard {
    /// Create an empty blackboard.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a blackboard from an initial context.
    #[must_use]
    pub fn seeded(context: HashMap<String, Value>) -> Self {
        Self { entries: context }
    }

    /// Store a value.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.entries.insert(key.into(), value);
    }

    /// Read a value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Read a value as text (only for string values).
    #[must_use]
    pub fn get_text(&self, key: &str) -> Option<&str> {
        self.entries.get(key).and_then(Value::as_str)
    }

    /// Whether a key is present.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the blackboard is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Replace every `{{blackboard.key}}` placeholder with the current
    /// stringified value. Placeholders for absent keys are left untouched.
    #[must_use]
    pub fn resolve(&self, template: &str) -> String {
        PLACEHOLDER_REGEX
            .replace_all(template, |caps: &regex::Captures<'_>| {
                match self.entries.get(&caps[1]) {
                    Some(value) => stringify(value),
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }
}

/// Render a value the way a prompt wants to see it: strings bare, the
/// rest as compact JSON.
fn stringify(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
