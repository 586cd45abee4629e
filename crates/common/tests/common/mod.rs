//! Shared helpers for the fact store integration tests
#![allow(dead_code)]

use std::collections::BTreeSet;

use ::common::prelude::*;

/// Route library logs to the test harness, filtered by RUST_LOG
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn path(parts: &[&str]) -> Address {
    parts.iter().map(|s| s.to_string()).collect()
}

pub fn set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

pub fn roles(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// File `signer`'s signature for the exact text of `text`
pub fn sign(repo: &mut DistributedRepo, text: &str, signer: &str, at: Timestamp) {
    let signed = Message::signature(content_hash(text), signer, format!("sig-{}", signer));
    repo.process_at(&signed.to_wire(), "bootstrap", at).unwrap();
}

/// A repo with the usual role buckets, `alice` as admin
pub fn bootstrapped_repo() -> DistributedRepo {
    let mut repo = DistributedRepo::new();
    repo.init_bucket(&path(&["admin"]), &[]);
    repo.init_bucket(&path(&["trusted"]), &roles(&["admin"]));
    repo.init_bucket(&path(&["peer"]), &roles(&["admin", "trusted"]));
    repo.init_bucket(&path(&["uploads"]), &roles(&["trusted"]));
    repo.process_at(r#"propose(["admin"], "alice", [0, null])"#, "c1", 0)
        .unwrap();
    repo
}
