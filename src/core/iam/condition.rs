//! Condition evaluation for IAM policies
//!
//! Conditions restrict a statement based on request context attributes such as
//! `s3:prefix`. The grammar is intentionally narrow:
//! - String operations (Equals, NotEquals, EqualsIgnoreCase, Like, NotLike)
//! - `Bool`
//! - An `IfExists` suffix on any operator
//!
//! `*` is the only wildcard understood by the `Like` operators.

use super::policy::OneOrMany;
use crate::error::{GateError, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Request context attributes consulted by conditions
pub type Context = HashMap<String, String>;

/// Condition operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConditionOperator {
    /// String equals (case-sensitive)
    StringEquals,
    /// String not equals
    StringNotEquals,
    /// String equals ignoring ASCII case
    StringEqualsIgnoreCase,
    /// String matches pattern (supports * wildcard)
    StringLike,
    /// String does not match any pattern
    StringNotLike,
    /// Boolean flag (`"true"` / `"false"`)
    Bool,
}

impl ConditionOperator {
    fn name(self) -> &'static str {
        match self {
            ConditionOperator::StringEquals => "StringEquals",
            ConditionOperator::StringNotEquals => "StringNotEquals",
            ConditionOperator::StringEqualsIgnoreCase => "StringEqualsIgnoreCase",
            ConditionOperator::StringLike => "StringLike",
            ConditionOperator::StringNotLike => "StringNotLike",
            ConditionOperator::Bool => "Bool",
        }
    }

    /// Negated operators hold when no value matches
    pub fn is_negated(self) -> bool {
        matches!(
            self,
            ConditionOperator::StringNotEquals | ConditionOperator::StringNotLike
        )
    }

    fn test(self, values: &OneOrMany, actual: &str) -> bool {
        match self {
            ConditionOperator::StringEquals => values.iter().any(|v| v == actual),
            ConditionOperator::StringNotEquals => values.iter().all(|v| v != actual),
            ConditionOperator::StringEqualsIgnoreCase => {
                values.iter().any(|v| v.eq_ignore_ascii_case(actual))
            }
            ConditionOperator::StringLike => values.iter().any(|v| string_like(v, actual)),
            ConditionOperator::StringNotLike => values.iter().all(|v| !string_like(v, actual)),
            ConditionOperator::Bool => values.iter().any(|v| v.eq_ignore_ascii_case(actual)),
        }
    }
}

/// Operator together with its `IfExists` flag, as written in a policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OperatorSpec {
    pub operator: ConditionOperator,
    pub if_exists: bool,
}

impl FromStr for OperatorSpec {
    type Err = GateError;

    fn from_str(name: &str) -> Result<Self> {
        let (base, if_exists) = match name.strip_suffix("IfExists") {
            Some(base) => (base, true),
            None => (name, false),
        };
        let operator = match base {
            "StringEquals" => ConditionOperator::StringEquals,
            "StringNotEquals" => ConditionOperator::StringNotEquals,
            "StringEqualsIgnoreCase" => ConditionOperator::StringEqualsIgnoreCase,
            "StringLike" => ConditionOperator::StringLike,
            "StringNotLike" => ConditionOperator::StringNotLike,
            "Bool" => ConditionOperator::Bool,
            _ => {
                return Err(GateError::malformed(format!(
                    "unsupported condition operator '{}'",
                    name
                )))
            }
        };
        Ok(OperatorSpec {
            operator,
            if_exists,
        })
    }
}

impl fmt::Display for OperatorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.operator.name())?;
        if self.if_exists {
            f.write_str("IfExists")?;
        }
        Ok(())
    }
}

/// A single condition: operator applied to one context key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub spec: OperatorSpec,
    pub key: String,
    pub values: OneOrMany,
}

impl Condition {
    /// Evaluate this condition against a context
    ///
    /// Keys are looked up ignoring ASCII case. A missing key satisfies
    /// `IfExists` and negated operators only.
    pub fn evaluate(&self, context: &Context) -> bool {
        match lookup(context, &self.key) {
            Some(actual) => self.spec.operator.test(&self.values, actual),
            None => self.spec.if_exists || self.spec.operator.is_negated(),
        }
    }
}

fn lookup<'a>(context: &'a Context, key: &str) -> Option<&'a str> {
    if let Some(value) = context.get(key) {
        return Some(value.as_str());
    }
    context
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v.as_str())
}

/// String pattern matching with `*` wildcard (zero or more characters)
pub fn string_like(pattern: &str, text: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == text;
    }

    let parts: Vec<&str> = pattern.split('*').collect();
    let first = parts[0];
    let last = parts[parts.len() - 1];

    if text.len() < first.len() + last.len() || !text.starts_with(first) || !text.ends_with(last)
    {
        return false;
    }

    // Middle parts must appear in order between the anchored ends
    let mut middle = &text[first.len()..text.len() - last.len()];
    for part in &parts[1..parts.len() - 1] {
        if part.is_empty() {
            continue;
        }
        match middle.find(part) {
            Some(found) => middle = &middle[found + part.len()..],
            None => return false,
        }
    }

    true
}

/// The `Condition` block of a statement
///
/// Kept as an ordered list so serialization reproduces the document's
/// operator and key order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "RawConditionBlock", into = "RawConditionBlock")]
pub struct ConditionBlock {
    conditions: Vec<Condition>,
}

type RawConditionBlock = IndexMap<String, IndexMap<String, OneOrMany>>;

impl ConditionBlock {
    /// Add a condition; fails on unsupported operators or empty value lists
    pub fn insert(&mut self, operator: &str, key: &str, values: OneOrMany) -> Result<()> {
        let spec: OperatorSpec = operator.parse()?;
        if values.is_empty() {
            return Err(GateError::malformed(format!(
                "condition {} on '{}' has no values",
                operator, key
            )));
        }
        self.conditions.push(Condition {
            spec,
            key: key.to_string(),
            values,
        });
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Condition> {
        self.conditions.iter()
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// All conditions hold (vacuously true when empty)
    pub fn evaluate(&self, context: &Context) -> bool {
        self.conditions.iter().all(|c| c.evaluate(context))
    }

    /// True when a non-negated condition restricts `key`
    pub fn constrains(&self, key: &str) -> bool {
        self.conditions
            .iter()
            .any(|c| !c.spec.operator.is_negated() && c.key.eq_ignore_ascii_case(key))
    }
}

impl TryFrom<RawConditionBlock> for ConditionBlock {
    type Error = GateError;

    fn try_from(raw: RawConditionBlock) -> Result<Self> {
        let mut block = ConditionBlock::default();
        for (operator, entries) in raw {
            for (key, values) in entries {
                block.insert(&operator, &key, values)?;
            }
        }
        Ok(block)
    }
}

impl From<ConditionBlock> for RawConditionBlock {
    fn from(block: ConditionBlock) -> Self {
        let mut raw = RawConditionBlock::new();
        for condition in block.conditions {
            raw.entry(condition.spec.to_string())
                .or_default()
                .insert(condition.key, condition.values);
        }
        raw
    }
}
