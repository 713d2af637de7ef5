//! Authorization requests and decisions
//!
//! A [`Decision`] is always a value: denial is an expected outcome, not an
//! error. Only at the requester boundary is a denial turned into the generic
//! [`GateError::AccessDenied`].

use super::condition::Context;
use super::store::SubjectId;
use crate::error::{GateError, Result};
use serde::{Deserialize, Serialize};

/// Request evaluated by the decision engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    /// Principal ARN of the caller (role, user or STS session)
    pub principal: String,
    /// Action name, e.g. `s3:GetObject`
    pub action: String,
    /// Resource identifier: `bucket/key`, `bucket`, or the S3 ARN forms
    pub resource: String,
    /// Encryption key the operation uses, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_ref: Option<String>,
    /// Condition-relevant attributes such as `s3:prefix`
    #[serde(default)]
    pub context: Context,
}

impl Request {
    pub fn new(
        principal: impl Into<String>,
        action: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Request {
            principal: principal.into(),
            action: action.into(),
            resource: resource.into(),
            key_ref: None,
            context: Context::new(),
        }
    }

    /// Set the key reference the operation uses
    pub fn with_key(mut self, key_ref: impl Into<String>) -> Self {
        self.key_ref = Some(key_ref.into());
        self
    }

    /// Add a context attribute
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Overall outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DecisionResult {
    Allow,
    Deny,
}

/// Outcome of evaluating one policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verdict {
    /// A matching Allow and no matching Deny
    Allow,
    /// A matching Deny statement
    Deny,
    /// No statement matched (or no policy exists)
    ImplicitDeny,
}

/// One entry of the evaluation trace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyVerdict {
    /// Subject the evaluated policy is attached to
    pub subject: SubjectId,
    /// Action evaluated against this policy (key policies see the key action)
    pub action: String,
    pub verdict: Verdict,
    /// Statement that produced the verdict; absent for implicit deny
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statement_id: Option<String>,
}

/// Result of an authorization request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub result: DecisionResult,
    /// Decisive statement
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statement_id: Option<String>,
    /// Subject of the policy holding the decisive statement
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_subject: Option<SubjectId>,
    /// Every policy evaluated, in evaluation order
    #[serde(skip)]
    pub trace: Vec<PolicyVerdict>,
    /// Store generation the decision was computed against
    #[serde(skip)]
    pub generation: u64,
}

impl Decision {
    pub(crate) fn allow(
        statement_id: Option<String>,
        policy_subject: Option<SubjectId>,
        trace: Vec<PolicyVerdict>,
        generation: u64,
    ) -> Self {
        Decision {
            result: DecisionResult::Allow,
            statement_id,
            policy_subject,
            trace,
            generation,
        }
    }

    pub(crate) fn deny(
        statement_id: Option<String>,
        policy_subject: Option<SubjectId>,
        trace: Vec<PolicyVerdict>,
        generation: u64,
    ) -> Self {
        Decision {
            result: DecisionResult::Deny,
            statement_id,
            policy_subject,
            trace,
            generation,
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.result == DecisionResult::Allow
    }

    pub fn is_denied(&self) -> bool {
        self.result == DecisionResult::Deny
    }

    /// Statement ids that contributed a verdict, for audit
    pub fn contributing(&self) -> Vec<String> {
        self.trace
            .iter()
            .filter_map(|entry| {
                entry
                    .statement_id
                    .as_ref()
                    .map(|sid| format!("{}#{}", entry.subject, sid.trim_start_matches('#')))
            })
            .collect()
    }

    /// Convert to the requester-facing result
    ///
    /// # Errors
    ///
    /// Returns the generic [`GateError::AccessDenied`] on denial; no statement
    /// or policy detail leaves the gateway this way.
    pub fn into_result(self) -> Result<Decision> {
        if self.is_allowed() {
            Ok(self)
        } else {
            Err(GateError::AccessDenied)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_json_shape() {
        let request: Request = serde_json::from_value(json!({
            "principal": "arn:aws:iam::111122223333:role/Reader",
            "action": "s3:GetObject",
            "resource": "bucket/client-data/file1.pdf",
            "keyRef": "arn:aws:kms:us-east-1:444455556666:key/k1",
            "context": {"aws:SecureTransport": "true"}
        }))
        .unwrap();

        assert_eq!(request.action, "s3:GetObject");
        assert_eq!(
            request.key_ref.as_deref(),
            Some("arn:aws:kms:us-east-1:444455556666:key/k1")
        );
        assert_eq!(request.context.len(), 1);

        let minimal: Request = serde_json::from_value(json!({
            "principal": "p",
            "action": "s3:ListBucket",
            "resource": "bucket"
        }))
        .unwrap();
        assert!(minimal.key_ref.is_none());
        assert!(minimal.context.is_empty());
    }

    #[test]
    fn test_decision_json_shape() {
        let decision = Decision::deny(
            Some("DenyInternal".to_string()),
            Some(SubjectId::resource("bucket")),
            Vec::new(),
            7,
        );
        assert_eq!(
            serde_json::to_value(&decision).unwrap(),
            json!({
                "result": "Deny",
                "statementId": "DenyInternal",
                "policySubject": "resource:bucket"
            })
        );

        let implicit = Decision::deny(None, None, Vec::new(), 0);
        assert_eq!(
            serde_json::to_value(&implicit).unwrap(),
            json!({"result": "Deny"})
        );
    }

    #[test]
    fn test_into_result_hides_detail() {
        let decision = Decision::deny(
            Some("DenyInternal".to_string()),
            Some(SubjectId::resource("bucket")),
            Vec::new(),
            1,
        );
        let error = decision.into_result().unwrap_err();
        assert_eq!(error.to_string(), "Access Denied");

        let allowed = Decision::allow(None, None, Vec::new(), 1);
        assert!(allowed.into_result().is_ok());
    }

    #[test]
    fn test_contributing_statements() {
        let decision = Decision::allow(
            Some("Read".to_string()),
            Some(SubjectId::identity("role")),
            vec![
                PolicyVerdict {
                    subject: SubjectId::identity("role"),
                    action: "s3:GetObject".to_string(),
                    verdict: Verdict::Allow,
                    statement_id: Some("Read".to_string()),
                },
                PolicyVerdict {
                    subject: SubjectId::resource("bucket"),
                    action: "s3:GetObject".to_string(),
                    verdict: Verdict::Allow,
                    statement_id: Some("#0".to_string()),
                },
            ],
            3,
        );
        assert_eq!(
            decision.contributing(),
            vec!["identity:role#Read".to_string(), "resource:bucket#0".to_string()]
        );
    }
}
