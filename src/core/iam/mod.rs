//! Identity and Access Management (IAM) for tenant-gate
//!
//! Evaluates identity-side, resource-side and key-usage policies together:
//! - JSON policy documents in the AWS shape (`Version`, `Statement[]`)
//! - Allow/Deny statements with explicit deny precedence across policies
//! - Minimal trailing-wildcard grammar for principals, actions and resources
//! - Condition evaluation (`StringLike` and friends) against request context
//! - Copy-on-write policy store with hot replacement

mod condition;
mod engine;
mod pattern;
mod policy;
mod request;
mod store;

pub use condition::{
    string_like, Condition, ConditionBlock, ConditionOperator, Context, OperatorSpec,
};
pub use engine::{DecisionEngine, EngineConfig};
pub use pattern::{PatternMatcher, S3_ARN_PREFIX};
pub use policy::{
    Effect, OneOrMany, Policy, Principal, Statement, StatementBuilder, Warning,
    SENSITIVE_ACTIONS, SUPPORTED_VERSIONS,
};
pub use request::{Decision, DecisionResult, PolicyVerdict, Request, Verdict};
pub use store::{PolicyStore, StoreSnapshot, SubjectId, SubjectKind};

#[cfg(test)]
mod tests;
