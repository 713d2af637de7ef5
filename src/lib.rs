//! # tenant-gate - Multi-Policy Authorization for Shared Buckets
//!
//! `tenant-gate` decides whether a principal from one account may act on a
//! folder of a bucket owned by another, where the data may be encrypted under
//! a key owned by a third. Every request is checked against:
//!
//! - the **identity-side** policy attached to the requesting principal
//! - the **resource-side** policy attached to the bucket
//! - the **key-usage** policy, when the operation decrypts or encrypts data
//!
//! An explicit Deny anywhere wins, and every applicable policy must Allow.
//!
//! ## Quick Start
//!
//! ```rust
//! use tenant_gate::{GatewayBuilder, Request, Result, SubjectId};
//!
//! # fn main() -> Result<()> {
//! let gateway = GatewayBuilder::new().build()?;
//!
//! gateway.reload(
//!     SubjectId::identity("arn:aws:iam::111122223333:role/ClientReader"),
//!     r#"{"Version": "2012-10-17", "Statement": [
//!         {"Effect": "Allow", "Action": "s3:GetObject", "Resource": "bucket/client-data/*"}
//!     ]}"#,
//! )?;
//! gateway.reload(
//!     SubjectId::resource("bucket"),
//!     r#"{"Version": "2012-10-17", "Statement": [
//!         {"Effect": "Allow", "Principal": {"AWS": "111122223333"},
//!          "Action": "s3:GetObject", "Resource": "bucket/client-data/*"}
//!     ]}"#,
//! )?;
//!
//! let request = Request::new(
//!     "arn:aws:iam::111122223333:role/ClientReader",
//!     "s3:GetObject",
//!     "bucket/client-data/file1.pdf",
//! );
//! assert!(gateway.authorize(&request).is_allowed());
//! # Ok(())
//! # }
//! ```
//!
//! ## From Configuration
//!
//! ```rust,no_run
//! use tenant_gate::{GatewayBuilder, Result};
//!
//! # fn main() -> Result<()> {
//! let mut gateway = GatewayBuilder::from_config_file("/etc/tenant-gate/gate.toml")?
//!     .policy_dir("/etc/tenant-gate")
//!     .with_audit_log("/var/log/tenant-gate/audit.jsonl")
//!     .build()?;
//!
//! // Drains queued audit records
//! gateway.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod core;

pub use crate::core::{audit, client, config, encryption, error, external, gateway, iam};

// Re-export core types that users need
pub use crate::core::{
    audit::{AuditConfig, AuditEmitter, AuditRecord, AuditSink, AuditStats, JsonLinesSink, MemorySink},
    client::SecureObjectClient,
    config::{GateConfig, PolicyBinding},
    encryption::LocalKeyring,
    error::{GateError, Result},
    external::{
        IdentityProvider, KeyService, MemoryStorage, ObjectStorage, SessionAssertion,
        StaticIdentityProvider,
    },
    gateway::AccessGateway,
    iam::{
        Decision, DecisionEngine, DecisionResult, Effect, EngineConfig, Policy, PolicyStore,
        Request, Statement, SubjectId, SubjectKind, Verdict, Warning,
    },
};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

type AuditStarter = Box<dyn FnOnce(&AuditConfig) -> Result<AuditEmitter>>;

/// Builder for an [`AccessGateway`]
///
/// # Examples
///
/// ```rust
/// use tenant_gate::{GatewayBuilder, MemorySink};
///
/// # fn main() -> tenant_gate::Result<()> {
/// let sink = MemorySink::new();
/// let gateway = GatewayBuilder::new()
///     .with_audit_sink(sink.clone())
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct GatewayBuilder {
    config: GateConfig,
    policy_dir: Option<PathBuf>,
    store: Option<Arc<PolicyStore>>,
    audit: Option<AuditStarter>,
    strict: bool,
}

impl GatewayBuilder {
    /// Create a new GatewayBuilder with default settings
    pub fn new() -> Self {
        GatewayBuilder {
            config: GateConfig::default(),
            policy_dir: None,
            store: None,
            audit: None,
            strict: false,
        }
    }

    /// Start from a TOML configuration file
    ///
    /// Policy paths resolve against the file's directory unless
    /// [`GatewayBuilder::policy_dir`] overrides it.
    pub fn from_config_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config = GateConfig::from_file(path)?;
        let mut builder = Self::new().config(config);
        builder.policy_dir = path.parent().map(Path::to_path_buf);
        Ok(builder)
    }

    pub fn config(mut self, config: GateConfig) -> Self {
        self.config = config;
        self
    }

    /// Directory policy document paths are relative to
    pub fn policy_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.policy_dir = Some(dir.into());
        self
    }

    /// Share an existing store instead of creating one
    pub fn store(mut self, store: Arc<PolicyStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Fail `build` on the first policy document that does not load
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Record every decision to `sink`
    pub fn with_audit_sink<S: AuditSink>(mut self, sink: S) -> Self {
        self.audit = Some(Box::new(move |config: &AuditConfig| {
            AuditEmitter::start(config, sink)
        }));
        self
    }

    /// Append every decision as a JSON line to the file at `path`
    pub fn with_audit_log(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        self.audit = Some(Box::new(move |config: &AuditConfig| {
            AuditEmitter::start(config, JsonLinesSink::open(&path)?)
        }));
        self
    }

    /// Build the gateway, loading every configured policy document
    ///
    /// Documents that fail to load are logged and skipped, unless the builder
    /// is [`strict`](GatewayBuilder::strict), in which case the first failure
    /// is returned.
    pub fn build(self) -> Result<AccessGateway> {
        self.config.validate()?;

        let store = self.store.unwrap_or_default();
        if !self.config.policy.is_empty() {
            let dir = self.policy_dir.unwrap_or_else(|| PathBuf::from("."));
            let mut failures = self.config.load_policies(&store, &dir);
            if self.strict && !failures.is_empty() {
                let (subject, error) = failures.swap_remove(0);
                warn!(subject = %subject, error = %error, "Refusing to build with unloaded policy");
                return Err(error);
            }
            if !failures.is_empty() {
                warn!(
                    failed = failures.len(),
                    total = self.config.policy.len(),
                    "Some policy documents were not loaded"
                );
            }
        }
        info!(policies = store.len(), "Building access gateway");

        let mut gateway = AccessGateway::new(store, DecisionEngine::new(self.config.engine));
        if let Some(start) = self.audit {
            gateway = gateway.with_audit(start(&self.config.audit)?);
            debug!("Audit logging enabled");
        }
        Ok(gateway)
    }
}

impl Default for GatewayBuilder {
    fn default() -> Self {
        Self::new()
    }
}
