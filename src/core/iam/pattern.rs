//! Pattern matching for principals, actions and resources
//!
//! The grammar is deliberately minimal so every matcher stays total:
//! - exact comparison
//! - `*` alone, matching any value
//! - a single trailing `*`, matching one or more further characters
//!
//! A trailing `*` after a slash (`client-data/*`) therefore matches only
//! identifiers strictly inside that folder; the bare folder (`client-data`) is
//! a distinct pattern.

use std::borrow::Cow;

/// Prefix of S3 resource ARNs
pub const S3_ARN_PREFIX: &str = "arn:aws:s3:::";

/// Pattern matcher for IAM identifiers
pub struct PatternMatcher;

impl PatternMatcher {
    /// True when `*` appears nowhere except as the final character
    pub fn is_well_formed(pattern: &str) -> bool {
        match pattern.find('*') {
            None => true,
            Some(pos) => pos == pattern.len() - 1,
        }
    }

    /// Check if a resource identifier matches a resource pattern
    ///
    /// # Examples
    /// ```
    /// use tenant_gate::iam::PatternMatcher;
    ///
    /// assert!(PatternMatcher::matches_resource("bucket/client-data/*", "bucket/client-data/a.pdf"));
    /// assert!(!PatternMatcher::matches_resource("bucket/client-data/*", "bucket/client-data"));
    /// assert!(!PatternMatcher::matches_resource("bucket/client-data/*", "bucket/internal-files/a.pdf"));
    /// assert!(PatternMatcher::matches_resource("arn:aws:s3:::bucket/client-data/*", "bucket/client-data/a.pdf"));
    /// ```
    ///
    /// S3 ARNs and bare `bucket/key` paths are the same identifier on both
    /// sides of the comparison.
    pub fn matches_resource(pattern: &str, resource: &str) -> bool {
        let resource = Self::normalize_resource(Self::strip_s3_arn(resource));
        Self::matches_literal(Self::strip_s3_arn(pattern), &resource)
    }

    /// `bucket/key` form of an S3 resource ARN; other identifiers unchanged
    pub fn strip_s3_arn(resource: &str) -> &str {
        resource.strip_prefix(S3_ARN_PREFIX).unwrap_or(resource)
    }

    /// Check if an action name matches an action pattern
    ///
    /// Action names are compared ignoring ASCII case, as `s3:GetObject` and
    /// `s3:getobject` name the same operation.
    pub fn matches_action(pattern: &str, action: &str) -> bool {
        if pattern == "*" {
            return true;
        }
        match pattern.strip_suffix('*') {
            Some(prefix) => {
                action.len() > prefix.len()
                    && action.is_char_boundary(prefix.len())
                    && action[..prefix.len()].eq_ignore_ascii_case(prefix)
            }
            None => pattern.eq_ignore_ascii_case(action),
        }
    }

    /// Check if a principal identifier matches a principal pattern
    ///
    /// Supported patterns:
    /// - `*`: everyone
    /// - `arn:aws:iam::<account>:root` or a bare 12-digit account id: every
    ///   principal of that account
    /// - an exact ARN, optionally ending in `*`
    ///
    /// A role pattern also matches STS sessions of that role
    /// (`arn:aws:sts::<account>:assumed-role/<name>/<session>`).
    pub fn matches_principal(pattern: &str, principal: &str) -> bool {
        if pattern == "*" || pattern == principal {
            return true;
        }

        if let Some(account) = Self::root_account(pattern) {
            return Self::account_of(principal) == Some(account);
        }

        if Self::matches_literal(pattern, principal) {
            return true;
        }

        Self::matches_role_session(pattern, principal)
    }

    /// Account id named by an account-root pattern
    fn root_account(pattern: &str) -> Option<&str> {
        if pattern.len() == 12 && pattern.bytes().all(|b| b.is_ascii_digit()) {
            return Some(pattern);
        }
        let account = pattern.strip_suffix(":root")?;
        let account = account.strip_prefix("arn:")?;
        let fields: Vec<&str> = account.split(':').collect();
        // partition:service:region:account
        match fields.as_slice() {
            [_, "iam", "", account] if !account.is_empty() => Some(*account),
            _ => None,
        }
    }

    /// Account id embedded in an ARN (fifth colon-separated field)
    pub fn account_of(arn: &str) -> Option<&str> {
        if !arn.starts_with("arn:") {
            return None;
        }
        arn.split(':').nth(4).filter(|account| !account.is_empty())
    }

    /// Role name and account of an assumed-role session ARN
    fn session_role(principal: &str) -> Option<(&str, &str)> {
        let account = Self::account_of(principal)?;
        let resource = principal.splitn(6, ':').nth(5)?;
        let rest = resource.strip_prefix("assumed-role/")?;
        let (name, session) = rest.split_once('/')?;
        if name.is_empty() || session.is_empty() {
            return None;
        }
        Some((account, name))
    }

    /// Role ARN pattern (`arn:aws:iam::<account>:role/<path>/<name>`) against a
    /// session of that role
    fn matches_role_session(pattern: &str, principal: &str) -> bool {
        let Some((account, session_name)) = Self::session_role(principal) else {
            return false;
        };
        if Self::account_of(pattern) != Some(account) {
            return false;
        }
        let Some(role_path) = pattern
            .splitn(6, ':')
            .nth(5)
            .and_then(|resource| resource.strip_prefix("role/"))
        else {
            return false;
        };
        let name_pattern = role_path.rsplit('/').next().unwrap_or(role_path);
        Self::matches_literal(name_pattern, session_name)
    }

    /// Exact, `*`, or trailing-wildcard comparison, case-sensitive
    fn matches_literal(pattern: &str, value: &str) -> bool {
        if pattern == "*" {
            return true;
        }
        match pattern.strip_suffix('*') {
            Some(prefix) => value.len() > prefix.len() && value.starts_with(prefix),
            None => pattern == value,
        }
    }

    /// Normalize a request resource identifier
    ///
    /// `.` segments are dropped and `..` removes the previous key segment. The
    /// first segment (bucket, or bucket ARN) is never removed, so traversal
    /// cannot leave the bucket or climb out of a granted folder.
    pub fn normalize_resource(resource: &str) -> Cow<'_, str> {
        let needs_work = resource
            .split('/')
            .skip(1)
            .any(|segment| segment == "." || segment == "..");
        if !needs_work {
            return Cow::Borrowed(resource);
        }

        let mut segments = resource.split('/');
        let mut resolved: Vec<&str> = segments.next().into_iter().collect();
        for segment in segments {
            match segment {
                "." => continue,
                ".." => {
                    if resolved.len() > 1 {
                        resolved.pop();
                    }
                }
                _ => resolved.push(segment),
            }
        }
        Cow::Owned(resolved.join("/"))
    }

    /// Bucket name of a resource identifier (`bucket/key` or an S3 ARN)
    pub fn bucket_of(resource: &str) -> &str {
        let path = Self::strip_s3_arn(resource);
        path.split('/').next().unwrap_or(path)
    }
}
