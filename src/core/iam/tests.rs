//! Integration tests for the IAM decision engine

use super::*;
use serde_json::json;

const ACCOUNT: &str = "111122223333";
const READER_ROLE: &str =
    "arn:aws:iam::111122223333:role/aws-reserved/sso.amazonaws.com/AWSReservedSSO_ClientReader_0a1b2c";
const READER_SESSION: &str =
    "arn:aws:sts::111122223333:assumed-role/AWSReservedSSO_ClientReader_0a1b2c/alice@client.example";
const KEY: &str = "arn:aws:kms:us-east-1:444455556666:key/0f1e2d3c";

fn load(store: &PolicyStore, subject: SubjectId, doc: serde_json::Value) {
    store.load_document(subject, &doc.to_string()).unwrap();
}

fn identity_read_client_data() -> serde_json::Value {
    json!({
        "Version": "2012-10-17",
        "Statement": [
            {
                "Sid": "ReadClientData",
                "Effect": "Allow",
                "Action": "s3:GetObject",
                "Resource": "bucket/client-data/*"
            },
            {
                "Sid": "ListClientData",
                "Effect": "Allow",
                "Action": "s3:ListBucket",
                "Resource": "bucket",
                "Condition": {"StringLike": {"s3:prefix": ["", "client-data/*"]}}
            },
            {
                "Sid": "UseBucketKey",
                "Effect": "Allow",
                "Action": ["kms:Decrypt", "kms:GenerateDataKey"],
                "Resource": KEY
            }
        ]
    })
}

fn bucket_policy_for_client() -> serde_json::Value {
    json!({
        "Version": "2012-10-17",
        "Id": "SharedBucketPolicy",
        "Statement": [
            {
                "Sid": "ClientReadsOwnFolder",
                "Effect": "Allow",
                "Principal": {"AWS": format!("arn:aws:iam::{}:root", ACCOUNT)},
                "Action": "s3:GetObject",
                "Resource": "bucket/client-data/*"
            },
            {
                "Sid": "ClientListsOwnFolder",
                "Effect": "Allow",
                "Principal": {"AWS": ACCOUNT},
                "Action": "s3:ListBucket",
                "Resource": "bucket",
                "Condition": {"StringLike": {"s3:prefix": ["", "client-data/*"]}}
            }
        ]
    })
}

fn client_store() -> PolicyStore {
    let store = PolicyStore::new();
    load(&store, SubjectId::identity(READER_ROLE), identity_read_client_data());
    load(&store, SubjectId::resource("bucket"), bucket_policy_for_client());
    store
}

fn decide(store: &PolicyStore, request: &Request) -> Decision {
    DecisionEngine::default().decide(&store.snapshot(), request)
}

#[test]
fn test_both_sides_allow() {
    let store = client_store();
    let request = Request::new(READER_SESSION, "s3:GetObject", "bucket/client-data/file1.pdf");

    let decision = decide(&store, &request);
    assert!(decision.is_allowed());
    assert_eq!(decision.statement_id.as_deref(), Some("ReadClientData"));
    assert_eq!(decision.policy_subject, Some(SubjectId::identity(READER_ROLE)));
    assert_eq!(
        decision.contributing(),
        vec![
            format!("identity:{}#ReadClientData", READER_ROLE),
            "resource:bucket#ClientReadsOwnFolder".to_string(),
        ]
    );
}

#[test]
fn test_resource_side_implicit_deny_fails_and() {
    let store = PolicyStore::new();
    load(&store, SubjectId::identity(READER_ROLE), identity_read_client_data());
    load(
        &store,
        SubjectId::resource("bucket"),
        json!({
            "Version": "2012-10-17",
            "Statement": [{
                "Sid": "OtherTenant",
                "Effect": "Allow",
                "Principal": {"AWS": "arn:aws:iam::999988887777:root"},
                "Action": "s3:GetObject",
                "Resource": "bucket/client-data/*"
            }]
        }),
    );

    let request = Request::new(READER_SESSION, "s3:GetObject", "bucket/client-data/file1.pdf");
    let decision = decide(&store, &request);
    assert!(decision.is_denied());
    assert_eq!(decision.statement_id, None);
    assert_eq!(decision.policy_subject, Some(SubjectId::resource("bucket")));
    assert_eq!(decision.trace[0].verdict, Verdict::Allow);
    assert_eq!(decision.trace[1].verdict, Verdict::ImplicitDeny);
}

#[test]
fn test_out_of_scope_folder_denied_without_statement() {
    let store = client_store();
    let request = Request::new(
        READER_SESSION,
        "s3:GetObject",
        "bucket/internal-files/secret.pdf",
    );

    let decision = decide(&store, &request);
    assert!(decision.is_denied());
    assert_eq!(decision.statement_id, None);
    assert_eq!(decision.policy_subject, Some(SubjectId::identity(READER_ROLE)));
}

#[test]
fn test_list_outside_prefix_denied() {
    let store = client_store();
    let base = Request::new(READER_SESSION, "s3:ListBucket", "bucket");

    let decision = decide(&store, &base.clone().with_context("s3:prefix", "internal-files/"));
    assert!(decision.is_denied());
    assert_eq!(decision.statement_id, None);

    let decision = decide(&store, &base.clone().with_context("s3:prefix", "client-data/2024/"));
    assert!(decision.is_allowed());
    assert_eq!(decision.statement_id.as_deref(), Some("ListClientData"));

    // Bucket root listing shows only top-level folder names
    assert!(decide(&store, &base).is_allowed());
}

#[test]
fn test_key_policy_veto() {
    let store = client_store();
    load(
        &store,
        SubjectId::key(KEY),
        json!({
            "Version": "2012-10-17",
            "Statement": [
                {
                    "Sid": "ClientUsesKey",
                    "Effect": "Allow",
                    "Principal": {"AWS": format!("arn:aws:iam::{}:root", ACCOUNT)},
                    "Action": ["kms:Decrypt", "kms:GenerateDataKey"],
                    "Resource": "*"
                },
                {
                    "Sid": "NoDecryptForReaders",
                    "Effect": "Deny",
                    "Principal": {"AWS": READER_ROLE},
                    "Action": "kms:Decrypt",
                    "Resource": "*"
                }
            ]
        }),
    );

    let request = Request::new(READER_SESSION, "s3:GetObject", "bucket/client-data/file1.pdf")
        .with_key(KEY);
    let decision = decide(&store, &request);
    assert!(decision.is_denied());
    assert_eq!(decision.statement_id.as_deref(), Some("NoDecryptForReaders"));
    assert_eq!(decision.policy_subject, Some(SubjectId::key(KEY)));
    assert_eq!(decision.trace[0].verdict, Verdict::Allow);
    assert_eq!(decision.trace[1].verdict, Verdict::Allow);
    assert_eq!(decision.trace[2].action, "kms:Decrypt");
}

#[test]
fn test_key_policy_allows_encrypted_read() {
    let store = client_store();
    load(
        &store,
        SubjectId::key(KEY),
        json!({
            "Version": "2012-10-17",
            "Statement": [{
                "Effect": "Allow",
                "Principal": {"AWS": format!("arn:aws:iam::{}:root", ACCOUNT)},
                "Action": "kms:Decrypt",
                "Resource": "*"
            }]
        }),
    );

    let request = Request::new(READER_SESSION, "s3:GetObject", "bucket/client-data/file1.pdf")
        .with_key(KEY);
    let decision = decide(&store, &request);
    assert!(decision.is_allowed());
    assert_eq!(decision.trace.len(), 3);
    assert_eq!(decision.trace[2].statement_id.as_deref(), Some("#0"));
}

#[test]
fn test_folder_boundary() {
    let store = client_store();
    for resource in [
        "bucket/client-data",
        "bucket/client-data-archive/file.pdf",
        "bucket/client-datafile.pdf",
        "bucket",
    ] {
        let request = Request::new(READER_SESSION, "s3:GetObject", resource);
        assert!(decide(&store, &request).is_denied(), "{} should be denied", resource);
    }

    let request = Request::new(READER_SESSION, "s3:GetObject", "bucket/client-data/a/b/c.pdf");
    assert!(decide(&store, &request).is_allowed());
}

#[test]
fn test_traversal_cannot_escape_grant() {
    let store = client_store();
    let request = Request::new(
        READER_SESSION,
        "s3:GetObject",
        "bucket/client-data/../internal-files/secret.pdf",
    );
    assert!(decide(&store, &request).is_denied());

    let request = Request::new(
        READER_SESSION,
        "s3:GetObject",
        "bucket/client-data/./2024/report.pdf",
    );
    assert!(decide(&store, &request).is_allowed());
}

#[test]
fn test_deny_overrides_across_policies() {
    let store = client_store();
    load(
        &store,
        SubjectId::resource("bucket"),
        json!({
            "Version": "2012-10-17",
            "Statement": [
                {
                    "Sid": "ClientReadsOwnFolder",
                    "Effect": "Allow",
                    "Principal": {"AWS": ACCOUNT},
                    "Action": "s3:GetObject",
                    "Resource": "bucket/client-data/*"
                },
                {
                    "Sid": "QuarantineFolder",
                    "Effect": "Deny",
                    "Principal": "*",
                    "Action": "s3:*",
                    "Resource": "bucket/client-data/quarantine/*"
                }
            ]
        }),
    );

    let request = Request::new(
        READER_SESSION,
        "s3:GetObject",
        "bucket/client-data/quarantine/x.pdf",
    );
    let decision = decide(&store, &request);
    assert!(decision.is_denied());
    assert_eq!(decision.statement_id.as_deref(), Some("QuarantineFolder"));
}

#[test]
fn test_decision_idempotent() {
    let store = client_store();
    let engine = DecisionEngine::default();
    let snapshot = store.snapshot();
    let request = Request::new(READER_SESSION, "s3:GetObject", "bucket/client-data/file1.pdf");

    let first = engine.decide(&snapshot, &request);
    for _ in 0..10 {
        assert_eq!(engine.decide(&snapshot, &request), first);
    }
}

#[test]
fn test_hot_reload_changes_outcome() {
    let store = client_store();
    let request = Request::new(READER_SESSION, "s3:GetObject", "bucket/client-data/file1.pdf");
    let before = store.snapshot();

    load(
        &store,
        SubjectId::identity(READER_ROLE),
        json!({"Version": "2012-10-17", "Statement": []}),
    );

    let engine = DecisionEngine::default();
    assert!(engine.decide(&before, &request).is_allowed());
    let after = engine.decide(&store.snapshot(), &request);
    assert!(after.is_denied());
    assert!(after.generation > before.generation());
}

#[test]
fn test_policy_json_roundtrip_with_evaluation() {
    let doc = bucket_policy_for_client();
    let policy = Policy::parse(&doc.to_string()).unwrap();
    let reparsed = Policy::parse(&policy.to_json().unwrap()).unwrap();
    assert_eq!(policy, reparsed);

    let round: serde_json::Value = serde_json::from_str(&policy.to_json().unwrap()).unwrap();
    assert_eq!(round, doc);

    let store = PolicyStore::new();
    load(&store, SubjectId::identity(READER_ROLE), identity_read_client_data());
    store.put(SubjectId::resource("bucket"), reparsed).unwrap();
    let request = Request::new(READER_SESSION, "s3:GetObject", "bucket/client-data/file1.pdf");
    assert!(decide(&store, &request).is_allowed());
}

#[test]
fn test_arn_resource_forms() {
    let store = PolicyStore::new();
    load(
        &store,
        SubjectId::identity(READER_ROLE),
        json!({
            "Version": "2012-10-17",
            "Statement": [{
                "Effect": "Allow",
                "Action": "s3:GetObject",
                "Resource": "arn:aws:s3:::bucket/client-data/*"
            }]
        }),
    );
    load(
        &store,
        SubjectId::resource("bucket"),
        json!({
            "Version": "2012-10-17",
            "Statement": [{
                "Effect": "Allow",
                "Principal": {"AWS": ACCOUNT},
                "Action": "s3:GetObject",
                "Resource": "arn:aws:s3:::bucket/client-data/*"
            }]
        }),
    );

    let request = Request::new(
        READER_SESSION,
        "s3:GetObject",
        "arn:aws:s3:::bucket/client-data/file1.pdf",
    );
    assert!(decide(&store, &request).is_allowed());
}

#[test]
fn test_case_sensitivity() {
    let store = client_store();
    // Resource identifiers are case-sensitive, actions are not
    let upper = Request::new(READER_SESSION, "s3:GetObject", "bucket/Client-Data/file1.pdf");
    assert!(decide(&store, &upper).is_denied());

    let lower_action = Request::new(READER_SESSION, "s3:getobject", "bucket/client-data/file1.pdf");
    assert!(decide(&store, &lower_action).is_allowed());
}

#[test]
fn test_condition_on_secure_transport() {
    let store = client_store();
    load(
        &store,
        SubjectId::resource("bucket"),
        json!({
            "Version": "2012-10-17",
            "Statement": [
                {
                    "Effect": "Allow",
                    "Principal": {"AWS": ACCOUNT},
                    "Action": "s3:GetObject",
                    "Resource": "bucket/client-data/*"
                },
                {
                    "Sid": "RequireTls",
                    "Effect": "Deny",
                    "Principal": "*",
                    "Action": "s3:*",
                    "Resource": "bucket/*",
                    "Condition": {"Bool": {"aws:SecureTransport": "false"}}
                }
            ]
        }),
    );

    let request = Request::new(READER_SESSION, "s3:GetObject", "bucket/client-data/file1.pdf");
    let plain = request.clone().with_context("aws:SecureTransport", "false");
    let tls = request.with_context("aws:SecureTransport", "true");

    assert_eq!(
        decide(&store, &plain).statement_id.as_deref(),
        Some("RequireTls")
    );
    assert!(decide(&store, &tls).is_allowed());
}
