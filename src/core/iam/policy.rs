//! IAM policy document structure
//!
//! A policy is the JSON document an account attaches to an identity, a bucket
//! or a key. The typed model keeps the shape of the document (single string vs
//! array, operator order inside `Condition`) so a parsed policy serializes back
//! to the same document.

use super::condition::ConditionBlock;
use super::pattern::PatternMatcher;
use crate::error::{GateError, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Policy language versions accepted by [`Policy::parse`]
pub const SUPPORTED_VERSIONS: &[&str] = &["2012-10-17", "2008-10-17"];

/// Actions that must never be granted on every resource without review
pub const SENSITIVE_ACTIONS: &[&str] = &[
    "*",
    "s3:*",
    "kms:*",
    "s3:DeleteObject",
    "s3:DeleteBucket",
    "s3:PutBucketPolicy",
    "s3:DeleteBucketPolicy",
    "kms:Decrypt",
    "kms:ScheduleKeyDeletion",
    "kms:PutKeyPolicy",
];

/// Effect of a policy statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Effect {
    /// Allow the action
    Allow,
    /// Deny the action (takes precedence over Allow)
    Deny,
}

/// A field that may be written as a single string or as an array of strings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        let items: &[String] = match self {
            OneOrMany::One(value) => std::slice::from_ref(value),
            OneOrMany::Many(values) => values,
        };
        items.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        match self {
            OneOrMany::One(_) => 1,
            OneOrMany::Many(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append a value, switching to the array form once there is more than one
    pub fn push(&mut self, value: impl Into<String>) {
        let value = value.into();
        match self {
            OneOrMany::One(existing) => {
                *self = OneOrMany::Many(vec![std::mem::take(existing), value]);
            }
            OneOrMany::Many(values) => values.push(value),
        }
    }
}

impl From<&str> for OneOrMany {
    fn from(value: &str) -> Self {
        OneOrMany::One(value.to_string())
    }
}

impl From<String> for OneOrMany {
    fn from(value: String) -> Self {
        OneOrMany::One(value)
    }
}

impl From<Vec<String>> for OneOrMany {
    fn from(values: Vec<String>) -> Self {
        OneOrMany::Many(values)
    }
}

impl From<Vec<&str>> for OneOrMany {
    fn from(values: Vec<&str>) -> Self {
        OneOrMany::Many(values.into_iter().map(str::to_string).collect())
    }
}

/// Who a statement applies to
///
/// `"*"` is everyone; otherwise a map keyed by principal type (`AWS`,
/// `Service`, `Federated`, ...) whose values are principal patterns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawPrincipal", into = "RawPrincipal")]
pub enum Principal {
    Any,
    Mapped(IndexMap<String, OneOrMany>),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawPrincipal {
    Wildcard(String),
    Mapped(IndexMap<String, OneOrMany>),
}

impl TryFrom<RawPrincipal> for Principal {
    type Error = String;

    fn try_from(raw: RawPrincipal) -> std::result::Result<Self, Self::Error> {
        match raw {
            RawPrincipal::Wildcard(value) if value == "*" => Ok(Principal::Any),
            RawPrincipal::Wildcard(value) => Err(format!(
                "invalid principal string: expected \"*\", got \"{}\"",
                value
            )),
            RawPrincipal::Mapped(map) if map.is_empty() => {
                Err("principal map must name at least one principal type".to_string())
            }
            RawPrincipal::Mapped(map) => Ok(Principal::Mapped(map)),
        }
    }
}

impl From<Principal> for RawPrincipal {
    fn from(principal: Principal) -> Self {
        match principal {
            Principal::Any => RawPrincipal::Wildcard("*".to_string()),
            Principal::Mapped(map) => RawPrincipal::Mapped(map),
        }
    }
}

impl Principal {
    /// Principal map with a single `AWS` entry
    pub fn aws(patterns: impl Into<OneOrMany>) -> Self {
        let mut map = IndexMap::new();
        map.insert("AWS".to_string(), patterns.into());
        Principal::Mapped(map)
    }

    /// All principal patterns regardless of type
    pub fn patterns(&self) -> Box<dyn Iterator<Item = &str> + '_> {
        match self {
            Principal::Any => Box::new(std::iter::once("*")),
            Principal::Mapped(map) => Box::new(map.values().flat_map(OneOrMany::iter)),
        }
    }

    /// True when the statement applies to anyone at all
    pub fn is_public(&self) -> bool {
        self.patterns().any(|pattern| pattern == "*")
    }
}

/// A single policy statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct Statement {
    /// Statement ID, reported in decisions and audit records
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,

    /// Effect of this statement
    pub effect: Effect,

    /// Principals this statement applies to; identity-side policies omit it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<Principal>,

    /// Actions this statement applies to (trailing `*` allowed)
    pub action: OneOrMany,

    /// Resources this statement applies to (trailing `*` allowed)
    pub resource: OneOrMany,

    /// Conditions that must all hold for the statement to match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<ConditionBlock>,
}

impl Statement {
    /// Start building an Allow statement
    pub fn allow() -> StatementBuilder {
        StatementBuilder::new(Effect::Allow)
    }

    /// Start building a Deny statement
    pub fn deny() -> StatementBuilder {
        StatementBuilder::new(Effect::Deny)
    }

    /// Identifier used in decisions: the `Sid`, or `#<index>` when absent
    pub fn id(&self, index: usize) -> String {
        match &self.sid {
            Some(sid) => sid.clone(),
            None => format!("#{}", index),
        }
    }

    fn check(&self, index: usize) -> Result<()> {
        let id = self.id(index);
        if self.action.is_empty() {
            return Err(GateError::malformed(format!(
                "statement {} has no actions",
                id
            )));
        }
        if self.resource.is_empty() {
            return Err(GateError::malformed(format!(
                "statement {} has no resources",
                id
            )));
        }
        for pattern in self.action.iter().chain(self.resource.iter()) {
            if !PatternMatcher::is_well_formed(pattern) {
                return Err(GateError::malformed(format!(
                    "statement {} uses unsupported pattern '{}' (only a single trailing '*' is allowed)",
                    id, pattern
                )));
            }
        }
        if let Some(principal) = &self.principal {
            if let Some(pattern) = principal
                .patterns()
                .find(|p| !PatternMatcher::is_well_formed(p))
            {
                return Err(GateError::malformed(format!(
                    "statement {} uses unsupported principal pattern '{}'",
                    id, pattern
                )));
            }
        }
        Ok(())
    }
}

/// Builder for policy statements
pub struct StatementBuilder {
    statement: Statement,
    error: Option<GateError>,
}

impl StatementBuilder {
    fn new(effect: Effect) -> Self {
        StatementBuilder {
            statement: Statement {
                sid: None,
                effect,
                principal: None,
                action: OneOrMany::Many(Vec::new()),
                resource: OneOrMany::Many(Vec::new()),
                condition: None,
            },
            error: None,
        }
    }

    pub fn sid(mut self, sid: impl Into<String>) -> Self {
        self.statement.sid = Some(sid.into());
        self
    }

    pub fn principal_any(mut self) -> Self {
        self.statement.principal = Some(Principal::Any);
        self
    }

    pub fn principal_aws(mut self, pattern: impl Into<String>) -> Self {
        let pattern = pattern.into();
        match &mut self.statement.principal {
            Some(Principal::Mapped(map)) => match map.get_mut("AWS") {
                Some(values) => values.push(pattern),
                None => {
                    map.insert("AWS".to_string(), OneOrMany::One(pattern));
                }
            },
            _ => self.statement.principal = Some(Principal::aws(pattern)),
        }
        self
    }

    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.statement.action = collapse(&self.statement.action, action.into());
        self
    }

    pub fn resource(mut self, resource: impl Into<String>) -> Self {
        self.statement.resource = collapse(&self.statement.resource, resource.into());
        self
    }

    /// Add one condition, e.g. `("StringLike", "s3:prefix", vec!["client-data/*"])`
    pub fn condition(mut self, operator: &str, key: &str, values: Vec<&str>) -> Self {
        let block = self
            .statement
            .condition
            .get_or_insert_with(ConditionBlock::default);
        if let Err(e) = block.insert(operator, key, values.into()) {
            self.error.get_or_insert(e);
        }
        self
    }

    /// Finish the statement, rejecting the same defects [`Policy::parse`] rejects
    pub fn build(self) -> Result<Statement> {
        if let Some(error) = self.error {
            return Err(error);
        }
        self.statement.check(0)?;
        Ok(self.statement)
    }
}

/// Keep single values in string form, as a hand-written document would
fn collapse(current: &OneOrMany, value: String) -> OneOrMany {
    let mut next = current.clone();
    if next.is_empty() {
        OneOrMany::One(value)
    } else {
        next.push(value);
        next
    }
}

/// Advisory finding from [`Policy::validate`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    /// Allow of a sensitive action on resource `*`
    BroadSensitiveGrant { statement_id: String, action: String },
    /// Allow granted to every principal
    PublicPrincipal { statement_id: String },
    /// Two statements share a `Sid`, making audit trails ambiguous
    DuplicateSid { statement_id: String },
    /// Policy has no statements and therefore denies everything
    EmptyPolicy,
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::BroadSensitiveGrant {
                statement_id,
                action,
            } => write!(
                f,
                "statement {} allows sensitive action {} on every resource",
                statement_id, action
            ),
            Warning::PublicPrincipal { statement_id } => {
                write!(f, "statement {} allows any principal", statement_id)
            }
            Warning::DuplicateSid { statement_id } => {
                write!(f, "statement id {} is used more than once", statement_id)
            }
            Warning::EmptyPolicy => write!(f, "policy has no statements"),
        }
    }
}

/// Complete IAM policy document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct Policy {
    /// Policy language version
    pub version: String,

    /// Optional policy identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Ordered policy statements
    pub statement: Vec<Statement>,
}

impl Policy {
    /// Create a new empty policy
    pub fn new() -> Self {
        Policy {
            version: SUPPORTED_VERSIONS[0].to_string(),
            id: None,
            statement: Vec::new(),
        }
    }

    /// Add a statement to this policy
    pub fn add_statement(&mut self, statement: Statement) {
        self.statement.push(statement);
    }

    /// Builder-style [`Policy::add_statement`]
    pub fn with_statement(mut self, statement: Statement) -> Self {
        self.add_statement(statement);
        self
    }

    /// Parse and check a policy document
    ///
    /// # Errors
    ///
    /// Returns `MalformedPolicy` when the JSON does not describe a policy, a
    /// statement lacks `Effect`, `Action` or `Resource`, the effect is not
    /// `Allow`/`Deny`, a condition operator is unsupported, or a pattern uses
    /// a wildcard anywhere but at the end.
    pub fn parse(raw: &str) -> Result<Self> {
        let policy: Policy =
            serde_json::from_str(raw).map_err(|e| GateError::malformed(e.to_string()))?;
        policy.check()?;
        Ok(policy)
    }

    /// Serialize to compact JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Serialize to indented JSON
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Structural checks shared by parsing and programmatic construction
    pub fn check(&self) -> Result<()> {
        if !SUPPORTED_VERSIONS.contains(&self.version.as_str()) {
            return Err(GateError::malformed(format!(
                "unsupported policy version '{}'",
                self.version
            )));
        }
        for (index, statement) in self.statement.iter().enumerate() {
            statement.check(index)?;
        }
        Ok(())
    }

    /// Advisory over-grant checks; never blocks loading
    pub fn validate(&self) -> Vec<Warning> {
        let mut warnings = Vec::new();
        if self.statement.is_empty() {
            warnings.push(Warning::EmptyPolicy);
        }

        let mut seen = HashSet::new();
        for (index, statement) in self.statement.iter().enumerate() {
            let statement_id = statement.id(index);
            if let Some(sid) = &statement.sid {
                if !seen.insert(sid.as_str()) {
                    warnings.push(Warning::DuplicateSid {
                        statement_id: statement_id.clone(),
                    });
                }
            }

            if statement.effect != Effect::Allow {
                continue;
            }

            if statement.principal.as_ref().is_some_and(Principal::is_public) {
                warnings.push(Warning::PublicPrincipal {
                    statement_id: statement_id.clone(),
                });
            }

            if statement.resource.iter().any(|r| r == "*") {
                for action in statement.action.iter() {
                    if SENSITIVE_ACTIONS
                        .iter()
                        .any(|sensitive| sensitive.eq_ignore_ascii_case(action))
                    {
                        warnings.push(Warning::BroadSensitiveGrant {
                            statement_id: statement_id.clone(),
                            action: action.to_string(),
                        });
                    }
                }
            }
        }
        warnings
    }
}

impl Default for Policy {
    fn default() -> Self {
        Self::new()
    }
}
