//! Gateway configuration
//!
//! Loaded from TOML:
//!
//! ```toml
//! [engine]
//! list_actions = ["s3:ListBucket", "s3:ListBucketVersions"]
//! prefix_key = "s3:prefix"
//!
//! [audit]
//! queue_capacity = 4096
//!
//! [[policy]]
//! kind = "identity"
//! subject = "arn:aws:iam::111122223333:role/ClientReader"
//! path = "policies/client-reader.json"
//! ```

use crate::audit::AuditConfig;
use crate::error::{GateError, Result};
use crate::iam::{EngineConfig, PolicyStore, SubjectId, SubjectKind};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// A policy document attached to a subject
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyBinding {
    pub kind: SubjectKind,
    /// Principal ARN, bucket name or key reference
    pub subject: String,
    /// Document path, relative to the configuration's base directory
    pub path: PathBuf,
}

impl PolicyBinding {
    pub fn subject_id(&self) -> SubjectId {
        SubjectId::new(self.kind, self.subject.clone())
    }
}

/// Complete gateway configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GateConfig {
    pub engine: EngineConfig,
    pub audit: AuditConfig,
    pub policy: Vec<PolicyBinding>,
}

impl GateConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: GateConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&raw)
    }

    /// Fail fast on settings the gateway cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.engine.prefix_key.trim().is_empty() {
            return Err(GateError::Config(
                "engine.prefix_key cannot be empty".to_string(),
            ));
        }
        if let Some(action) = self
            .engine
            .list_actions
            .iter()
            .find(|action| action.is_empty() || action.contains('*'))
        {
            return Err(GateError::Config(format!(
                "engine.list_actions entry '{}' must be a concrete action",
                action
            )));
        }
        self.audit.validate()?;

        let mut seen = HashSet::new();
        for binding in &self.policy {
            if binding.subject.is_empty() {
                return Err(GateError::Config(format!(
                    "policy binding for {} has an empty subject",
                    binding.path.display()
                )));
            }
            if binding.path.as_os_str().is_empty() {
                return Err(GateError::Config(format!(
                    "policy binding {} has an empty path",
                    binding.subject_id()
                )));
            }
            if !seen.insert(binding.subject_id()) {
                return Err(GateError::Config(format!(
                    "subject {} is bound more than once",
                    binding.subject_id()
                )));
            }
        }
        Ok(())
    }

    /// Load every bound document into `store`
    ///
    /// Documents load independently; the failures are returned so one bad
    /// document never keeps the others out.
    pub fn load_policies(
        &self,
        store: &PolicyStore,
        base_dir: impl AsRef<Path>,
    ) -> Vec<(SubjectId, GateError)> {
        let base_dir = base_dir.as_ref();
        let mut failures = Vec::new();

        for binding in &self.policy {
            let subject = binding.subject_id();
            let result = fs::read_to_string(base_dir.join(&binding.path))
                .map_err(GateError::from)
                .and_then(|raw| store.load_document(subject.clone(), &raw));

            match result {
                Ok(warnings) => {
                    info!(subject = %subject, warnings = warnings.len(), "Loaded policy document");
                }
                Err(e) => {
                    warn!(subject = %subject, error = %e, "Skipping policy document");
                    failures.push((subject, e));
                }
            }
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const CONFIG: &str = r#"
        [engine]
        prefix_key = "s3:prefix"

        [audit]
        queue_capacity = 128
        batch_size = 16

        [[policy]]
        kind = "identity"
        subject = "arn:aws:iam::111122223333:role/ClientReader"
        path = "client-reader.json"

        [[policy]]
        kind = "resource"
        subject = "bucket"
        path = "bucket.json"
    "#;

    #[test]
    fn test_parse_config() -> Result<()> {
        let config = GateConfig::from_toml_str(CONFIG)?;

        assert_eq!(config.engine, EngineConfig::default());
        assert_eq!(config.audit.queue_capacity, 128);
        assert_eq!(config.audit.flush_interval_ms, 100);
        assert_eq!(config.policy.len(), 2);
        assert_eq!(config.policy[1].subject_id(), SubjectId::resource("bucket"));
        Ok(())
    }

    #[test]
    fn test_empty_config_uses_defaults() -> Result<()> {
        let config = GateConfig::from_toml_str("")?;
        assert_eq!(config, GateConfig::default());
        Ok(())
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(
            GateConfig::from_toml_str("[audit]\nqueue_capacity = 0\n"),
            Err(GateError::Config(_))
        ));
        assert!(matches!(
            GateConfig::from_toml_str("[engine]\nprefix_key = \"\"\n"),
            Err(GateError::Config(_))
        ));
        assert!(matches!(
            GateConfig::from_toml_str("[engine]\nlist_actions = [\"s3:List*\"]\n"),
            Err(GateError::Config(_))
        ));
        assert!(matches!(
            GateConfig::from_toml_str("[engine]\nunknown = 1\n"),
            Err(GateError::ConfigParse(_))
        ));

        let duplicate = r#"
            [[policy]]
            kind = "resource"
            subject = "bucket"
            path = "a.json"

            [[policy]]
            kind = "resource"
            subject = "bucket"
            path = "b.json"
        "#;
        assert!(matches!(
            GateConfig::from_toml_str(duplicate),
            Err(GateError::Config(_))
        ));
    }

    #[test]
    fn test_load_policies_isolates_failures() -> Result<()> {
        let dir = TempDir::new()?;
        fs::write(
            dir.path().join("client-reader.json"),
            r#"{"Version": "2012-10-17", "Statement": [
                {"Effect": "Allow", "Action": "s3:GetObject", "Resource": "bucket/client-data/*"}
            ]}"#,
        )?;
        // Missing Principal on a bucket policy
        fs::write(
            dir.path().join("bucket.json"),
            r#"{"Version": "2012-10-17", "Statement": [
                {"Effect": "Allow", "Action": "s3:GetObject", "Resource": "bucket/*"}
            ]}"#,
        )?;

        let config = GateConfig::from_toml_str(CONFIG)?;
        let store = PolicyStore::new();
        let failures = config.load_policies(&store, dir.path());

        assert_eq!(store.len(), 1);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, SubjectId::resource("bucket"));
        assert!(matches!(failures[0].1, GateError::MalformedPolicy { .. }));
        Ok(())
    }

    #[test]
    fn test_from_file_missing() {
        assert!(matches!(
            GateConfig::from_file("/nonexistent/tenant-gate.toml"),
            Err(GateError::Io(_))
        ));
    }
}
