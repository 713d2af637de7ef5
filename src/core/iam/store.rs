//! Policy store with atomic snapshot replacement
//!
//! Holds every policy relevant to an access relationship, keyed by the subject
//! it is attached to. Writers build a new immutable snapshot and swap it in
//! under a single pointer update; readers clone the current `Arc` and keep a
//! consistent view for the rest of their evaluation, however many
//! replacements happen meanwhile.

use super::pattern::PatternMatcher;
use super::policy::{Policy, Warning};
use crate::error::{GateError, Result};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

/// Kind of subject a policy is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectKind {
    /// A requesting principal (user or role)
    Identity,
    /// A storage bucket
    Resource,
    /// An encryption key
    Key,
}

impl SubjectKind {
    fn as_str(self) -> &'static str {
        match self {
            SubjectKind::Identity => "identity",
            SubjectKind::Resource => "resource",
            SubjectKind::Key => "key",
        }
    }
}

/// Subject a policy is attached to, e.g. `resource:shared-bucket`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct SubjectId {
    kind: SubjectKind,
    name: String,
}

impl SubjectId {
    pub fn new(kind: SubjectKind, name: impl Into<String>) -> Self {
        SubjectId {
            kind,
            name: name.into(),
        }
    }

    /// Identity-side subject (principal ARN)
    pub fn identity(principal: impl Into<String>) -> Self {
        Self::new(SubjectKind::Identity, principal)
    }

    /// Resource-side subject (bucket name)
    pub fn resource(bucket: impl Into<String>) -> Self {
        Self::new(SubjectKind::Resource, bucket)
    }

    /// Key-usage subject (key reference)
    pub fn key(key_ref: impl Into<String>) -> Self {
        Self::new(SubjectKind::Key, key_ref)
    }

    pub fn kind(&self) -> SubjectKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.name)
    }
}

impl FromStr for SubjectId {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (kind, name) = s
            .split_once(':')
            .ok_or_else(|| format!("subject '{}' has no kind prefix", s))?;
        let kind = match kind {
            "identity" => SubjectKind::Identity,
            "resource" => SubjectKind::Resource,
            "key" => SubjectKind::Key,
            other => return Err(format!("unknown subject kind '{}'", other)),
        };
        if name.is_empty() {
            return Err(format!("subject '{}' has an empty name", s));
        }
        Ok(SubjectId::new(kind, name))
    }
}

impl From<SubjectId> for String {
    fn from(subject: SubjectId) -> Self {
        subject.to_string()
    }
}

impl TryFrom<String> for SubjectId {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

/// Immutable view of the store at one generation
#[derive(Debug, Default)]
pub struct StoreSnapshot {
    generation: u64,
    policies: BTreeMap<SubjectId, Arc<Policy>>,
}

impl StoreSnapshot {
    /// Monotonic counter bumped by every `put`/`remove`
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn get(&self, subject: &SubjectId) -> Option<&Arc<Policy>> {
        self.policies.get(subject)
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    pub fn subjects(&self) -> impl Iterator<Item = &SubjectId> {
        self.policies.keys()
    }

    /// Identity-side policy for a requesting principal
    ///
    /// Falls back to the policy of the role an STS session was assumed from.
    /// The returned subject is the one reported when no policy exists.
    pub fn identity_policy_for(&self, principal: &str) -> (SubjectId, Option<Arc<Policy>>) {
        let direct = SubjectId::identity(principal);
        if let Some(policy) = self.policies.get(&direct) {
            return (direct, Some(Arc::clone(policy)));
        }

        let role = self.policies.iter().find(|(subject, _)| {
            subject.kind == SubjectKind::Identity
                && subject.name.contains(":role/")
                && !subject.name.ends_with('*')
                && PatternMatcher::matches_principal(&subject.name, principal)
        });
        match role {
            Some((subject, policy)) => (subject.clone(), Some(Arc::clone(policy))),
            None => (direct, None),
        }
    }

    /// Resource-side policy for the bucket a resource identifier lives in
    pub fn resource_policy_for(&self, resource: &str) -> (SubjectId, Option<Arc<Policy>>) {
        let subject = SubjectId::resource(PatternMatcher::bucket_of(resource));
        let policy = self.policies.get(&subject).cloned();
        (subject, policy)
    }

    /// Key-usage policy for a key reference
    pub fn key_policy_for(&self, key_ref: &str) -> (SubjectId, Option<Arc<Policy>>) {
        let subject = SubjectId::key(key_ref);
        let policy = self.policies.get(&subject).cloned();
        (subject, policy)
    }
}

/// Policy store shared by the gateway and administrative loaders
#[derive(Debug, Default)]
pub struct PolicyStore {
    current: RwLock<Arc<StoreSnapshot>>,
    /// Serializes writers so no replacement is lost
    writer: Mutex<()>,
}

impl PolicyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consistent view for one evaluation
    pub fn snapshot(&self) -> Arc<StoreSnapshot> {
        Arc::clone(&self.current.read())
    }

    /// Current policy attached to `subject`, if any
    pub fn get(&self, subject: &SubjectId) -> Option<Arc<Policy>> {
        self.snapshot().get(subject).cloned()
    }

    /// Install or replace the policy attached to `subject`
    ///
    /// # Errors
    ///
    /// Returns `MalformedPolicy` if the policy fails structural checks, or if a
    /// resource/key policy has a statement without `Principal`.
    pub fn put(&self, subject: SubjectId, policy: Policy) -> Result<()> {
        policy.check()?;
        if subject.kind != SubjectKind::Identity {
            if let Some((index, statement)) = policy
                .statement
                .iter()
                .enumerate()
                .find(|(_, s)| s.principal.is_none())
            {
                return Err(GateError::malformed(format!(
                    "statement {} of {} policy has no Principal",
                    statement.id(index),
                    subject.kind.as_str()
                )));
            }
        }

        let statements = policy.statement.len();
        let generation = self.replace(|policies| {
            policies.insert(subject.clone(), Arc::new(policy));
        });
        info!(
            subject = %subject,
            statements,
            generation,
            "Installed policy"
        );
        Ok(())
    }

    /// Detach the policy from `subject`, returning it
    pub fn remove(&self, subject: &SubjectId) -> Option<Arc<Policy>> {
        if self.snapshot().get(subject).is_none() {
            return None;
        }
        let mut removed = None;
        let generation = self.replace(|policies| removed = policies.remove(subject));
        if removed.is_some() {
            info!(subject = %subject, generation, "Removed policy");
        }
        removed
    }

    /// Parse a raw document and install it, returning advisory warnings
    pub fn load_document(&self, subject: SubjectId, raw: &str) -> Result<Vec<Warning>> {
        let policy = Policy::parse(raw)?;
        let warnings = policy.validate();
        for warning in &warnings {
            warn!(subject = %subject, "Policy warning: {}", warning);
        }
        self.put(subject, policy)?;
        Ok(warnings)
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Copy-on-write update; returns the new generation
    fn replace<F>(&self, update: F) -> u64
    where
        F: FnOnce(&mut BTreeMap<SubjectId, Arc<Policy>>),
    {
        let _guard = self.writer.lock();
        let current = self.snapshot();
        let mut policies = current.policies.clone();
        update(&mut policies);
        let generation = current.generation + 1;
        *self.current.write() = Arc::new(StoreSnapshot {
            generation,
            policies,
        });
        generation
    }
}
