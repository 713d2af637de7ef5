//! Policy evaluation engine with deny precedence
//!
//! Combines the identity-side, resource-side and key-usage policies that apply
//! to a request into one decision:
//! - Explicit deny in any policy wins and stops evaluation
//! - Every applicable policy must allow (logical AND across policies)
//! - No matching statement, or no policy at all, is an implicit deny
//! - List actions only match Allow statements that constrain the listed prefix
//!
//! The engine holds configuration only; it evaluates against a
//! [`StoreSnapshot`] and is safe to share across threads.

use super::condition::Context;
use super::pattern::PatternMatcher;
use super::policy::{Effect, Policy, Statement};
use super::request::{Decision, PolicyVerdict, Request, Verdict};
use super::store::{StoreSnapshot, SubjectId};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::sync::Arc;

/// Storage actions that use the object's encryption key, and the key action
/// they require
const KEY_USAGE: &[(&str, &str)] = &[
    ("s3:GetObject", "kms:Decrypt"),
    ("s3:GetObjectVersion", "kms:Decrypt"),
    ("s3:PutObject", "kms:GenerateDataKey"),
    ("s3:CreateMultipartUpload", "kms:GenerateDataKey"),
    ("s3:UploadPart", "kms:GenerateDataKey"),
];

/// Decision engine settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Actions that list bucket contents
    pub list_actions: Vec<String>,
    /// Context key carrying the requested listing prefix
    pub prefix_key: String,
    /// Require list grants to constrain `prefix_key`
    pub require_list_prefix: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            list_actions: vec![
                "s3:ListBucket".to_string(),
                "s3:ListBucketVersions".to_string(),
            ],
            prefix_key: "s3:prefix".to_string(),
            require_list_prefix: true,
        }
    }
}

/// One policy to evaluate and what to evaluate it against
struct Step<'a> {
    subject: SubjectId,
    policy: Option<Arc<Policy>>,
    action: &'a str,
    resource: &'a str,
    /// Statements without `Principal` apply (identity-side policies)
    implicit_principal: bool,
}

/// Per-statement view of the request
struct Target<'a> {
    principal: &'a str,
    action: &'a str,
    resource: &'a str,
    context: &'a Context,
    implicit_principal: bool,
    list: bool,
}

/// Policy evaluation engine
#[derive(Debug, Clone, Default)]
pub struct DecisionEngine {
    config: EngineConfig,
}

impl DecisionEngine {
    pub fn new(config: EngineConfig) -> Self {
        DecisionEngine { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Key action a storage action requires, if it touches encrypted data
    pub fn key_action_for(action: &str) -> Option<&'static str> {
        KEY_USAGE
            .iter()
            .find(|(storage, _)| storage.eq_ignore_ascii_case(action))
            .map(|(_, key)| *key)
    }

    pub fn is_list_action(&self, action: &str) -> bool {
        self.config
            .list_actions
            .iter()
            .any(|list| list.eq_ignore_ascii_case(action))
    }

    /// Evaluate a request against a snapshot of the policy store
    ///
    /// # Examples
    ///
    /// ```
    /// use tenant_gate::iam::{DecisionEngine, PolicyStore, Request};
    ///
    /// let store = PolicyStore::new();
    /// let engine = DecisionEngine::default();
    /// let request = Request::new(
    ///     "arn:aws:iam::111122223333:role/Reader",
    ///     "s3:GetObject",
    ///     "bucket/client-data/file1.pdf",
    /// );
    ///
    /// // No policies at all: implicit deny
    /// assert!(engine.decide(&store.snapshot(), &request).is_denied());
    /// ```
    pub fn decide(&self, snapshot: &StoreSnapshot, request: &Request) -> Decision {
        let generation = snapshot.generation();
        let context = self.effective_context(request);

        let mut trace = Vec::with_capacity(3);
        let mut first_implicit: Option<SubjectId> = None;
        let mut decisive_allow: Option<(SubjectId, Option<String>)> = None;

        for step in self.plan(snapshot, request) {
            let target = Target {
                principal: &request.principal,
                action: step.action,
                resource: step.resource,
                context: &context,
                implicit_principal: step.implicit_principal,
                list: self.is_list_action(step.action),
            };
            let (verdict, statement_id) = self.evaluate_policy(step.policy.as_deref(), &target);
            trace.push(PolicyVerdict {
                subject: step.subject.clone(),
                action: step.action.to_string(),
                verdict,
                statement_id: statement_id.clone(),
            });

            match verdict {
                Verdict::Deny => {
                    return Decision::deny(statement_id, Some(step.subject), trace, generation);
                }
                Verdict::ImplicitDeny => {
                    first_implicit.get_or_insert(step.subject);
                }
                Verdict::Allow => {
                    decisive_allow.get_or_insert((step.subject, statement_id));
                }
            }
        }

        match (first_implicit, decisive_allow) {
            (Some(subject), _) => Decision::deny(None, Some(subject), trace, generation),
            (None, Some((subject, statement_id))) => {
                Decision::allow(statement_id, Some(subject), trace, generation)
            }
            (None, None) => Decision::deny(None, None, trace, generation),
        }
    }

    /// Applicable policies in evaluation order: identity, resource, key
    fn plan<'a>(&self, snapshot: &StoreSnapshot, request: &'a Request) -> Vec<Step<'a>> {
        let mut steps = Vec::with_capacity(3);
        let (identity, identity_policy) = snapshot.identity_policy_for(&request.principal);

        if PatternMatcher::matches_action("kms:*", &request.action) {
            // Direct key operation: the key itself is the resource
            let key_ref = request.key_ref.as_deref().unwrap_or(&request.resource);
            steps.push(Step {
                subject: identity,
                policy: identity_policy,
                action: &request.action,
                resource: key_ref,
                implicit_principal: true,
            });
            let (subject, policy) = snapshot.key_policy_for(key_ref);
            steps.push(Step {
                subject,
                policy,
                action: &request.action,
                resource: key_ref,
                implicit_principal: false,
            });
            return steps;
        }

        steps.push(Step {
            subject: identity,
            policy: identity_policy,
            action: &request.action,
            resource: &request.resource,
            implicit_principal: true,
        });
        let (subject, policy) = snapshot.resource_policy_for(&request.resource);
        steps.push(Step {
            subject,
            policy,
            action: &request.action,
            resource: &request.resource,
            implicit_principal: false,
        });

        if let (Some(key_ref), Some(key_action)) = (
            request.key_ref.as_deref(),
            Self::key_action_for(&request.action),
        ) {
            let (subject, policy) = snapshot.key_policy_for(key_ref);
            steps.push(Step {
                subject,
                policy,
                action: key_action,
                resource: key_ref,
                implicit_principal: false,
            });
        }
        steps
    }

    /// Verdict of a single policy; a missing policy contributes nothing
    fn evaluate_policy(&self, policy: Option<&Policy>, target: &Target<'_>) -> (Verdict, Option<String>) {
        let Some(policy) = policy else {
            return (Verdict::ImplicitDeny, None);
        };

        let mut allow = None;
        for (index, statement) in policy.statement.iter().enumerate() {
            if !self.statement_matches(statement, target) {
                continue;
            }
            match statement.effect {
                Effect::Deny => return (Verdict::Deny, Some(statement.id(index))),
                Effect::Allow => {
                    if allow.is_none() {
                        allow = Some(statement.id(index));
                    }
                }
            }
        }

        match allow {
            Some(statement_id) => (Verdict::Allow, Some(statement_id)),
            None => (Verdict::ImplicitDeny, None),
        }
    }

    fn statement_matches(&self, statement: &Statement, target: &Target<'_>) -> bool {
        let principal_matches = match &statement.principal {
            None => target.implicit_principal,
            Some(principal) => principal
                .patterns()
                .any(|pattern| PatternMatcher::matches_principal(pattern, target.principal)),
        };
        if !principal_matches {
            return false;
        }

        if !statement
            .action
            .iter()
            .any(|pattern| PatternMatcher::matches_action(pattern, target.action))
        {
            return false;
        }

        if !statement
            .resource
            .iter()
            .any(|pattern| PatternMatcher::matches_resource(pattern, target.resource))
        {
            return false;
        }

        // A list grant without a prefix restriction would expose every folder
        if target.list && statement.effect == Effect::Allow && self.config.require_list_prefix {
            let constrained = statement
                .condition
                .as_ref()
                .is_some_and(|block| block.constrains(&self.config.prefix_key));
            if !constrained {
                return false;
            }
        }

        statement
            .condition
            .as_ref()
            .map_or(true, |block| block.evaluate(target.context))
    }

    /// Listing without a prefix lists the bucket root
    fn effective_context<'a>(&self, request: &'a Request) -> Cow<'a, Context> {
        let has_prefix = request
            .context
            .keys()
            .any(|key| key.eq_ignore_ascii_case(&self.config.prefix_key));
        if has_prefix || !self.is_list_action(&request.action) {
            return Cow::Borrowed(&request.context);
        }
        let mut context = request.context.clone();
        context.insert(self.config.prefix_key.clone(), String::new());
        Cow::Owned(context)
    }
}
