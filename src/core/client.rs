//! Object client that authorizes before touching storage or keys
//!
//! Each operation builds a request, asks the gateway, and only on Allow calls
//! the storage and key collaborators. Denials surface as the generic
//! [`GateError::AccessDenied`].

use crate::error::{GateError, Result};
use crate::external::{KeyService, ObjectStorage, SessionAssertion};
use crate::gateway::AccessGateway;
use crate::iam::{Context, PatternMatcher, Request};
use std::sync::Arc;

pub struct SecureObjectClient {
    gateway: Arc<AccessGateway>,
    storage: Arc<dyn ObjectStorage>,
    keys: Arc<dyn KeyService>,
    session: SessionAssertion,
    /// Bucket default encryption key, if objects are encrypted
    key_ref: Option<String>,
    context: Context,
}

impl SecureObjectClient {
    pub fn new(
        gateway: Arc<AccessGateway>,
        storage: Arc<dyn ObjectStorage>,
        keys: Arc<dyn KeyService>,
        session: SessionAssertion,
    ) -> Self {
        SecureObjectClient {
            gateway,
            storage,
            keys,
            session,
            key_ref: None,
            context: Context::new(),
        }
    }

    /// Encrypt writes and decrypt reads with `key_ref`
    pub fn with_key(mut self, key_ref: impl Into<String>) -> Self {
        self.key_ref = Some(key_ref.into());
        self
    }

    /// Attach a context attribute to every request, e.g. `aws:SecureTransport`
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn session(&self) -> &SessionAssertion {
        &self.session
    }

    /// Read and, when a key is configured, decrypt the object at `path`
    pub fn get_object(&self, path: &str) -> Result<Vec<u8>> {
        let path = PatternMatcher::normalize_resource(path);
        self.authorize(self.request("s3:GetObject", &path, true))?;

        let stored = self.storage.read(&path)?;
        match &self.key_ref {
            Some(key_ref) => self.keys.decrypt(&stored, key_ref),
            None => Ok(stored),
        }
    }

    /// Encrypt, when a key is configured, and write the object at `path`
    pub fn put_object(&self, path: &str, data: &[u8]) -> Result<()> {
        let path = PatternMatcher::normalize_resource(path);
        self.authorize(self.request("s3:PutObject", &path, true))?;

        match &self.key_ref {
            Some(key_ref) => {
                let ciphertext = self.keys.encrypt(data, key_ref)?;
                self.storage.write(&path, &ciphertext)
            }
            None => self.storage.write(&path, data),
        }
    }

    /// Object keys in `bucket` under `prefix`
    ///
    /// A granted listing only reveals keys the same grant covers: each key is
    /// kept only if listing with that key as prefix would also be allowed, so a
    /// root listing allowed through `""` does not expose other folders.
    pub fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        let prefix_key = self.gateway.engine().config().prefix_key.clone();
        let mut request = self.request("s3:ListBucket", bucket, false);
        request.context.insert(prefix_key.clone(), prefix.to_string());
        self.authorize(request.clone())?;

        let root = format!("{}/", bucket);
        let paths = self.storage.list(&format!("{}{}", root, prefix))?;

        let snapshot = self.gateway.store().snapshot();
        let engine = self.gateway.engine();
        Ok(paths
            .into_iter()
            .filter_map(|path| path.strip_prefix(&root).map(str::to_string))
            .filter(|key| {
                request.context.insert(prefix_key.clone(), key.clone());
                engine.decide(&snapshot, &request).is_allowed()
            })
            .collect())
    }

    fn request(&self, action: &str, resource: &str, uses_key: bool) -> Request {
        let mut request = Request::new(self.session.principal.clone(), action, resource);
        request.context = self.context.clone();
        if uses_key {
            request.key_ref = self.key_ref.clone();
        }
        request
    }

    fn authorize(&self, request: Request) -> Result<()> {
        self.gateway
            .authorize_session(&self.session, &request)
            .into_result()
            .map(|_| ())
    }
}
