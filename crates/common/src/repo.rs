use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::bucket::{
    address_to_string, indent, Address, Bucket, BucketError, Endorsement, Hook, HookFn,
    UNKNOWN_ROLE,
};
use crate::clock::{now, Timestamp};
use crate::envelope::Envelope;
use crate::item::Evidence;
use crate::message::{content_hash, CouldNotInterpret, Message};
use crate::stats::Stats;
use crate::store::{Snapshot, STORAGE_VERSION};

/// Buckets whose members hold the role of the same name
pub const ROLE_BUCKETS: [&str; 3] = ["admin", "trusted", "peer"];

/// message hash -> signer -> signature
pub type SignatureIndex = BTreeMap<String, BTreeMap<String, String>>;

/// A wire message that could not be applied. Carries the offending text.
#[derive(Debug, thiserror::Error)]
pub enum ProcessFailure {
    #[error("could not process message: {source}\n\n{}", indent(.text, "  "))]
    Interpret {
        text: String,
        #[source]
        source: CouldNotInterpret,
    },
    #[error("could not apply message: {source}\n\n{}", indent(.text, "  "))]
    Rejected {
        text: String,
        #[source]
        source: BucketError,
    },
}

impl ProcessFailure {
    pub fn text(&self) -> &str {
        match self {
            ProcessFailure::Interpret { text, .. } | ProcessFailure::Rejected { text, .. } => text,
        }
    }
}

/// Throttling knobs for [`DistributedRepo::rebroadcast`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebroadcastPolicy {
    /// Seconds before the same datum may go out again on a channel
    #[serde(default = "default_min_delta")]
    pub min_delta: i64,
    /// Seconds a channel must have been quiet
    #[serde(default = "default_min_silence")]
    pub min_silence: i64,
    /// Messages emitted per call
    #[serde(default = "default_max_n")]
    pub max_n: usize,
}

fn default_min_delta() -> i64 {
    30
}

fn default_min_silence() -> i64 {
    5
}

fn default_max_n() -> usize {
    1
}

impl Default for RebroadcastPolicy {
    fn default() -> Self {
        Self {
            min_delta: default_min_delta(),
            min_silence: default_min_silence(),
            max_n: default_max_n(),
        }
    }
}

/// The fact store: a bucket tree, the signatures on file, and
///  per-channel traffic counters.
///
/// Each message is applied on its own and idempotently; duplicates only
///  grow evidence sets. Write authorization is resolved by reading the
///  role buckets of this same tree.
#[derive(Debug, Default)]
pub struct DistributedRepo {
    root: Bucket,
    signatures: SignatureIndex,
    channels: BTreeMap<String, Stats>,
}

impl DistributedRepo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from a persisted snapshot. Hooks are not persisted and
    ///  must be registered again.
    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        Self {
            root: snapshot.root,
            signatures: snapshot.signatures,
            channels: BTreeMap::new(),
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            version: STORAGE_VERSION,
            root: self.root.clone(),
            signatures: self.signatures.clone(),
        }
    }

    /* Getters */

    pub fn root(&self) -> &Bucket {
        &self.root
    }

    pub fn signatures(&self) -> &SignatureIndex {
        &self.signatures
    }

    pub fn channel_stats(&self, channel: &str) -> Stats {
        self.channels.get(channel).copied().unwrap_or_default()
    }

    /// Create (or re-restrict) the bucket at `path`
    pub fn init_bucket(&mut self, path: &[String], allowed: &[String]) {
        let Some((name, parent)) = path.split_last() else {
            tracing::warn!("refusing to restrict the root bucket");
            return;
        };
        // creating intermediates cannot fail
        if let Ok(parent) = self.root.get_bucket_mut(parent, true) {
            parent.add_child_bucket(name, allowed);
        }
        tracing::debug!(bucket = %address_to_string(path), ?allowed, "initialized bucket");
    }

    pub fn process(&mut self, text: &str, from_channel: &str) -> Result<(), ProcessFailure> {
        self.process_at(text, from_channel, now())
    }

    /// Apply one wire message, evaluating roles at `at`
    pub fn process_at(
        &mut self,
        text: &str,
        from_channel: &str,
        at: Timestamp,
    ) -> Result<(), ProcessFailure> {
        self.channels
            .entry(from_channel.to_string())
            .or_default()
            .just_received(at);

        let message = Message::interpret(text).map_err(|source| ProcessFailure::Interpret {
            text: text.to_string(),
            source,
        })?;
        let rejected = |source: BucketError| ProcessFailure::Rejected {
            text: text.to_string(),
            source,
        };

        let canonical = message.to_wire();
        match message {
            Message::Propose {
                bucket,
                data,
                validity,
            } => {
                let endorsement = self.endorsement(text, at);
                self.root
                    .get_bucket_mut(&bucket, true)
                    .and_then(|b| b.propose(&data, validity, &endorsement, from_channel, at))
                    .map_err(rejected)?;
                self.file_canonical(text, &canonical);
            }
            Message::Dismiss {
                bucket,
                data,
                validity,
            } => {
                let endorsement = self.endorsement(text, at);
                self.root
                    .get_bucket_mut(&bucket, true)
                    .and_then(|b| b.dismiss(&data, validity, &endorsement, from_channel, at))
                    .map_err(rejected)?;
                self.file_canonical(text, &canonical);
            }
            Message::Signature {
                what,
                signer,
                signature,
            } => self.add_signature(&signer, &what, &signature),
            Message::Ping => tracing::info!(channel = %from_channel, "ping"),
            Message::Pong => tracing::info!(channel = %from_channel, "pong"),
        }
        Ok(())
    }

    /// Copy the signatures of an accepted claim onto its canonical text,
    ///  which is the form `summary_messages` exports
    fn file_canonical(&mut self, text: &str, canonical: &str) {
        if text == canonical {
            return;
        }
        let Some(by_signer) = self.signatures.get(&content_hash(text)).cloned() else {
            return;
        };
        self.signatures
            .entry(content_hash(canonical))
            .or_default()
            .extend(by_signer);
    }

    // TODO: verify `signature` against the signer's key once peers publish them
    pub fn add_signature(&mut self, signer: &str, what: &str, signature: &str) {
        self.signatures
            .entry(what.to_string())
            .or_default()
            .insert(signer.to_string(), signature.to_string());
    }

    /// Signers on file for the exact text of a message
    pub fn signers_of(&self, text: &str) -> Evidence {
        self.signatures
            .get(&content_hash(text))
            .map(|by_signer| by_signer.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Roles `signer` holds at `at`, `unknown` when it holds none.
    ///  Role buckets are only read here, never access-checked.
    pub fn roles_of(&self, signer: &str, at: Timestamp) -> Evidence {
        let mut roles: Evidence = ROLE_BUCKETS
            .iter()
            .filter(|role| {
                self.root
                    .children()
                    .get(**role)
                    .and_then(|bucket| bucket.item(signer))
                    .map_or(false, |item| item.valid(at))
            })
            .map(|role| role.to_string())
            .collect();
        if roles.is_empty() {
            roles.insert(UNKNOWN_ROLE.to_string());
        }
        roles
    }

    /// Signers and roles backing a message
    pub fn endorsement(&self, text: &str, at: Timestamp) -> Endorsement {
        let signers = self.signers_of(text);
        if signers.is_empty() {
            return Endorsement::unknown();
        }
        let mut roles: Evidence = signers
            .iter()
            .flat_map(|signer| self.roles_of(signer, at))
            .collect();
        if roles.len() > 1 {
            roles.remove(UNKNOWN_ROLE);
        }
        Endorsement { signers, roles }
    }

    pub fn add_hook_proposed(&mut self, path: &[String], f: HookFn) -> Result<(), BucketError> {
        self.root
            .get_bucket_mut(path, false)?
            .add_hook_proposed(Hook::new(f));
        Ok(())
    }

    pub fn add_hook_dismissed(&mut self, path: &[String], f: HookFn) -> Result<(), BucketError> {
        self.root
            .get_bucket_mut(path, false)?
            .add_hook_dismissed(Hook::new(f));
        Ok(())
    }

    /// Register `f` on every bucket that exists now; events carry the bucket name
    pub fn add_hook_proposed_all(&mut self, f: HookFn) {
        self.root.visit_mut(&mut |path: &[String], bucket: &mut Bucket| {
            bucket.add_hook_proposed(Hook::named(path.to_vec(), f.clone()));
        });
    }

    pub fn query(&self, path: &[String]) -> Result<BTreeSet<String>, BucketError> {
        self.query_at(path, now())
    }

    pub fn query_at(&self, path: &[String], at: Timestamp) -> Result<BTreeSet<String>, BucketError> {
        Ok(self.root.get_bucket(path)?.query(at))
    }

    pub fn cleanup(&mut self) {
        self.cleanup_at(now())
    }

    pub fn cleanup_at(&mut self, now: Timestamp) {
        self.root.cleanup(now);
    }

    pub fn rebroadcast(
        &mut self,
        path: &[String],
        channels: &[String],
        policy: &RebroadcastPolicy,
    ) -> Result<Vec<Envelope>, BucketError> {
        self.rebroadcast_at(path, channels, policy, now())
    }

    /// Pick the least recently broadcast valid data of `path` and re-propose
    ///  them on quiet channels. Returns at most `policy.max_n` envelopes.
    pub fn rebroadcast_at(
        &mut self,
        path: &[String],
        channels: &[String],
        policy: &RebroadcastPolicy,
        now: Timestamp,
    ) -> Result<Vec<Envelope>, BucketError> {
        let bucket = self.root.get_bucket(path)?;

        let mut options = Vec::new();
        for data in bucket.query(now) {
            let Some(item) = bucket.item(&data) else {
                continue;
            };
            for channel in channels {
                let last_activity = self.channel_stats(channel).last_activity();
                if now - last_activity <= policy.min_silence {
                    continue;
                }
                let last = item.last_broadcast(channel);
                if now - last <= policy.min_delta {
                    continue;
                }
                if let Some(validity) = item.active_proposal(now) {
                    options.push((last, data.clone(), channel.clone(), validity));
                }
            }
        }
        options.sort_by_key(|(last, ..)| *last);
        options.truncate(policy.max_n);

        let bucket = self.root.get_bucket_mut(path, false)?;
        let mut envelopes = Vec::with_capacity(options.len());
        for (_, data, channel, validity) in options {
            if let Some(item) = bucket.item_mut(&data) {
                item.mark_broadcast(&channel, now);
            }
            self.channels
                .entry(channel.clone())
                .or_default()
                .just_sent(now);
            let message = Message::propose(path, data, validity);
            envelopes.push(Envelope::new("", channel, message.to_wire()));
        }
        Ok(envelopes)
    }

    pub fn summary(&self) -> String {
        self.summary_at(now())
    }

    /// Operator view of the tree and of channel activity
    pub fn summary_at(&self, now: Timestamp) -> String {
        let mut channels: Vec<_> = self.channels.iter().collect();
        channels.sort_by_key(|(_, stats)| std::cmp::Reverse(stats.last_received));
        let activity = channels
            .iter()
            .map(|(channel, stats)| format!("{}: {}", stats.describe(now), channel))
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            "buckets:\n{}\nactivity:\n{}",
            indent(&self.root.summary(now), "  "),
            indent(&activity, "  ")
        )
    }

    pub fn summary_messages(&self) -> Vec<String> {
        self.summary_messages_at(now())
    }

    /// Wire messages that rebuild the current state on a fresh peer.
    ///
    /// Ordered by window start; signatures come right before the claim
    ///  they back so replaying the list authorizes as it goes.
    pub fn summary_messages_at(&self, now: Timestamp) -> Vec<String> {
        let mut out: Vec<(Option<Timestamp>, u8, String)> = Vec::new();

        let buckets = std::iter::once((Address::new(), &self.root)).chain(self.root.items());
        for (path, bucket) in buckets {
            for data in bucket.query(now) {
                let Some(item) = bucket.item(&data) else {
                    continue;
                };
                if item.is_tombstoned(now) {
                    continue;
                }
                for validity in item.dismissed().keys().filter(|v| !v.is_expired(now)) {
                    let message = Message::dismiss(&path, data.clone(), *validity);
                    self.export(&mut out, validity.t0, &message);
                }
                for validity in item.proposed().keys().filter(|v| !v.is_expired(now)) {
                    let message = Message::propose(&path, data.clone(), *validity);
                    self.export(&mut out, validity.t0, &message);
                }
            }
        }

        out.sort();
        let mut seen = HashSet::new();
        out.into_iter()
            .map(|(_, _, text)| text)
            .filter(|text| seen.insert(text.clone()))
            .collect()
    }

    fn export(
        &self,
        out: &mut Vec<(Option<Timestamp>, u8, String)>,
        t0: Option<Timestamp>,
        message: &Message,
    ) {
        let text = message.to_wire();
        let hash = content_hash(&text);
        if let Some(by_signer) = self.signatures.get(&hash) {
            for (signer, signature) in by_signer {
                let signed = Message::signature(hash.clone(), signer.clone(), signature.clone());
                out.push((t0, 0, signed.to_wire()));
            }
        }
        out.push((t0, 1, text));
    }

    pub fn summary_dict(&self) -> Value {
        self.summary_dict_at(now())
    }

    /// Nested `bucket -> child -> [data]` view of what is valid now
    pub fn summary_dict_at(&self, now: Timestamp) -> Value {
        let mut tree = Map::new();
        for (path, bucket) in self.root.items() {
            let data: Vec<Value> = bucket
                .query(now)
                .into_iter()
                .filter(|d| bucket.item(d).map_or(false, |item| !item.is_tombstoned(now)))
                .map(Value::String)
                .collect();
            if data.is_empty() {
                continue;
            }
            if !set_path(&mut tree, &path, Value::Array(data)) {
                tracing::warn!(bucket = %address_to_string(&path), "bucket has both data and children, skipping");
            }
        }
        Value::Object(tree)
    }
}

/// Place `value` at `path`, failing if an ancestor already holds data
fn set_path(tree: &mut Map<String, Value>, path: &[String], value: Value) -> bool {
    let Some((first, rest)) = path.split_first() else {
        return false;
    };
    if rest.is_empty() {
        tree.insert(first.clone(), value);
        return true;
    }
    match tree
        .entry(first.clone())
        .or_insert_with(|| Value::Object(Map::new()))
    {
        Value::Object(child) => set_path(child, rest, value),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::bucket::HookEvent;

    fn path(parts: &[&str]) -> Address {
        parts.iter().map(|s| s.to_string()).collect()
    }

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn sign(repo: &mut DistributedRepo, text: &str, signer: &str) {
        let signed = Message::signature(content_hash(text), signer, "sig");
        repo.process_at(&signed.to_wire(), "c1", 0).unwrap();
    }

    #[test]
    fn test_unsigned_claims_are_unknown() {
        let mut repo = DistributedRepo::new();
        let text = r#"propose(["files"], "h1", [0, null])"#;
        assert_eq!(repo.endorsement(text, 0), Endorsement::unknown());
        repo.process_at(text, "c1", 0).unwrap();
        let item = repo.root().get_bucket(&path(&["files"])).unwrap().item("h1").unwrap();
        assert_eq!(item.proposed()[&crate::Validity::since(0)], set(&["unknown"]));
    }

    #[test]
    fn test_roles_resolve_through_role_buckets() {
        let mut repo = DistributedRepo::new();
        repo.init_bucket(&path(&["admin"]), &[]);
        repo.init_bucket(&path(&["peer"]), &[]);
        repo.process_at(r#"propose(["admin"], "alice", [0, null])"#, "c1", 0)
            .unwrap();
        repo.process_at(r#"propose(["peer"], "alice", [0, 100])"#, "c1", 0)
            .unwrap();

        assert_eq!(repo.roles_of("alice", 50), set(&["admin", "peer"]));
        assert_eq!(repo.roles_of("alice", 150), set(&["admin"]));
        assert_eq!(repo.roles_of("bob", 50), set(&["unknown"]));
    }

    #[test]
    fn test_acl_enforced_on_signed_roles() {
        let mut repo = DistributedRepo::new();
        repo.init_bucket(&path(&["admin"]), &[]);
        repo.init_bucket(&path(&["trusted"]), &["admin".to_string()]);
        repo.process_at(r#"propose(["admin"], "alice", [0, null])"#, "c1", 0)
            .unwrap();

        let unsigned = r#"propose(["trusted"], "bob", [0, null])"#;
        let result = repo.process_at(unsigned, "c1", 0);
        assert!(matches!(
            result,
            Err(ProcessFailure::Rejected {
                source: BucketError::NotPermitted { .. },
                ..
            })
        ));
        assert_eq!(result.unwrap_err().text(), unsigned);

        sign(&mut repo, unsigned, "alice");
        repo.process_at(unsigned, "c1", 0).unwrap();
        assert_eq!(repo.query_at(&path(&["trusted"]), 0).unwrap(), set(&["bob"]));
    }

    #[test]
    fn test_malformed_text_is_a_process_failure() {
        let mut repo = DistributedRepo::new();
        let result = repo.process_at("propose(", "c1", 0);
        assert!(matches!(result, Err(ProcessFailure::Interpret { .. })));
        assert_eq!(repo.channel_stats("c1").num_received, 1);
    }

    #[test]
    fn test_query_unknown_bucket() {
        let repo = DistributedRepo::new();
        assert!(matches!(
            repo.query_at(&path(&["nope"]), 0),
            Err(BucketError::NoSuchBucket { .. })
        ));
    }

    #[test]
    fn test_duplicate_delivery_is_idempotent() {
        let events = Arc::new(Mutex::new(0));
        let counter = events.clone();
        let mut repo = DistributedRepo::new();
        repo.init_bucket(&path(&["files"]), &[]);
        repo.add_hook_proposed(
            &path(&["files"]),
            Arc::new(move |_: &HookEvent| *counter.lock().unwrap() += 1),
        )
        .unwrap();

        let text = r#"propose(["files"], "h1", [0, null])"#;
        sign(&mut repo, text, "alice");
        repo.process_at(text, "c1", 0).unwrap();
        repo.process_at(text, "c2", 0).unwrap();

        let item = repo.root().get_bucket(&path(&["files"])).unwrap().item("h1").unwrap();
        assert_eq!(item.proposed().len(), 1);
        assert_eq!(item.proposed()[&crate::Validity::since(0)], set(&["alice"]));
        assert_eq!(*events.lock().unwrap(), 1);
    }

    #[test]
    fn test_hook_on_missing_bucket() {
        let mut repo = DistributedRepo::new();
        let result = repo.add_hook_dismissed(&path(&["files"]), Arc::new(|_: &HookEvent| {}));
        assert!(result.is_err());
    }

    #[test]
    fn test_hook_proposed_all_names_buckets() {
        let names = Arc::new(Mutex::new(Vec::new()));
        let sink = names.clone();
        let mut repo = DistributedRepo::new();
        repo.init_bucket(&path(&["files"]), &[]);
        repo.init_bucket(&path(&["uploads"]), &[]);
        repo.add_hook_proposed_all(Arc::new(move |event: &HookEvent| {
            sink.lock().unwrap().push(event.bucket_name.clone());
        }));

        repo.process_at(r#"propose(["uploads"], "u", [0, null])"#, "c1", 0)
            .unwrap();
        repo.process_at(r#"propose(["files"], "f", [0, null])"#, "c1", 0)
            .unwrap();

        assert_eq!(
            *names.lock().unwrap(),
            vec![Some(path(&["uploads"])), Some(path(&["files"]))]
        );
    }

    #[test]
    fn test_summary_messages_order_signatures_first() {
        let mut repo = DistributedRepo::new();
        let late = r#"propose(["files"], "late", [50, null])"#;
        let early = r#"propose(["files"], "early", [10, null])"#;
        sign(&mut repo, late, "alice");
        repo.process_at(late, "c1", 0).unwrap();
        repo.process_at(early, "c1", 0).unwrap();

        let messages = repo.summary_messages_at(100);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0], early);
        assert!(messages[1].starts_with("signed("));
        assert!(messages[1].contains(&content_hash(late)));
        assert_eq!(messages[2], late);
    }

    #[test]
    fn test_summary_messages_skip_expired_and_invalid() {
        let mut repo = DistributedRepo::new();
        repo.process_at(r#"propose(["files"], "old", [0, 10])"#, "c1", 0)
            .unwrap();
        repo.process_at(r#"propose(["files"], "dead", [0, null])"#, "c1", 0)
            .unwrap();
        repo.process_at(r#"dismiss(["files"], "dead", [0, null])"#, "c1", 0)
            .unwrap();
        assert!(repo.summary_messages_at(20).is_empty());
    }

    #[test]
    fn test_summary_dict() {
        let mut repo = DistributedRepo::new();
        repo.process_at(r#"propose(["net", "irc"], "a", [0, null])"#, "c1", 0)
            .unwrap();
        repo.process_at(r#"propose(["files"], "h1", [0, null])"#, "c1", 0)
            .unwrap();
        repo.process_at(r#"propose(["files", "sub"], "h2", [0, null])"#, "c1", 0)
            .unwrap();

        let dict = repo.summary_dict_at(10);
        assert_eq!(dict["net"]["irc"], serde_json::json!(["a"]));
        assert_eq!(dict["files"], serde_json::json!(["h1"]));
    }

    #[test]
    fn test_summary_lists_activity() {
        let mut repo = DistributedRepo::new();
        repo.process_at(r#"propose(["files"], "h1", [0, null])"#, "irc", 0)
            .unwrap();
        let summary = repo.summary_at(10);
        assert!(summary.starts_with("buckets:"));
        assert!(summary.contains("activity:"));
        assert!(summary.contains("recv   1  10s ago"));
        assert!(summary.contains(": irc"));
    }

    #[test]
    fn test_extreme_windows_do_not_break_summary() {
        let mut repo = DistributedRepo::new();
        let result = repo.process_at(r#"propose(["files"], "x", [-1e300, null])"#, "c1", 100);
        assert!(matches!(result, Err(ProcessFailure::Interpret { .. })));

        let widest = format!(r#"propose(["files"], "y", [{}, {}])"#, i64::MIN, i64::MAX);
        repo.process_at(&widest, "c1", 100).unwrap();
        let summary = repo.summary_at(100);
        assert!(summary.contains("\"y\""));
        assert_eq!(repo.query_at(&path(&["files"]), 100).unwrap(), set(&["y"]));
    }

    #[test]
    fn test_init_bucket_ignores_root() {
        let mut repo = DistributedRepo::new();
        repo.init_bucket(&[], &["admin".to_string()]);
        assert!(repo.root().allowed().is_empty());
    }
}
