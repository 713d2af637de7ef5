//! Access gateway: the single entry point for authorization
//!
//! Takes one store snapshot per request, evaluates it, and hands the decision
//! to the audit emitter. No storage or crypto I/O happens here.

use crate::audit::AuditEmitter;
use crate::error::Result;
use crate::external::SessionAssertion;
use crate::iam::{Decision, DecisionEngine, PolicyStore, Request, SubjectId, Warning};
use chrono::Utc;
use std::sync::Arc;
use tracing::debug;

pub struct AccessGateway {
    store: Arc<PolicyStore>,
    engine: DecisionEngine,
    audit: Option<AuditEmitter>,
}

impl AccessGateway {
    pub fn new(store: Arc<PolicyStore>, engine: DecisionEngine) -> Self {
        AccessGateway {
            store,
            engine,
            audit: None,
        }
    }

    /// Record every decision through `audit`
    pub fn with_audit(mut self, audit: AuditEmitter) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Decide a request
    pub fn authorize(&self, request: &Request) -> Decision {
        let snapshot = self.store.snapshot();
        let decision = self.engine.decide(&snapshot, request);

        if decision.is_denied() {
            debug!(
                principal = %request.principal,
                action = %request.action,
                resource = %request.resource,
                statement = decision.statement_id.as_deref().unwrap_or("-"),
                subject = %decision
                    .policy_subject
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "-".to_string()),
                generation = decision.generation,
                "Access denied"
            );
        }

        if let Some(audit) = &self.audit {
            audit.record(request, &decision, Utc::now());
        }
        decision
    }

    /// Decide a request made under an asserted session
    ///
    /// Expired sessions and requests for a principal other than the asserted
    /// one are denied without consulting any policy.
    pub fn authorize_session(&self, session: &SessionAssertion, request: &Request) -> Decision {
        let now = Utc::now();
        let rejection = if session.is_expired_at(now) {
            Some("session expired")
        } else if session.principal != request.principal {
            Some("principal does not match session")
        } else {
            None
        };

        let Some(reason) = rejection else {
            return self.authorize(request);
        };

        let decision = Decision::deny(None, None, Vec::new(), self.store.snapshot().generation());
        debug!(
            principal = %request.principal,
            session_principal = %session.principal,
            reason,
            "Access denied"
        );
        if let Some(audit) = &self.audit {
            audit.record(request, &decision, now);
        }
        decision
    }

    /// Replace the policy attached to `subject` from a raw document
    ///
    /// Evaluations already in flight finish against the previous policy.
    pub fn reload(&self, subject: SubjectId, raw: &str) -> Result<Vec<Warning>> {
        self.store.load_document(subject, raw)
    }

    pub fn store(&self) -> &Arc<PolicyStore> {
        &self.store
    }

    pub fn engine(&self) -> &DecisionEngine {
        &self.engine
    }

    pub fn audit(&self) -> Option<&AuditEmitter> {
        self.audit.as_ref()
    }

    /// Drain and stop the audit emitter
    pub fn shutdown(&mut self) {
        if let Some(audit) = self.audit.as_mut() {
            audit.shutdown();
        }
    }
}
