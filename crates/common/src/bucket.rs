use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::clock::Timestamp;
use crate::item::{BucketDataItem, Evidence};
use crate::validity::Validity;

/// Path of a bucket from the root, e.g. `["files"]`. The root is empty.
pub type Address = Vec<String>;

/// Role assigned to signers that no role bucket lists
pub const UNKNOWN_ROLE: &str = "unknown";

pub fn address_to_string(path: &[String]) -> String {
    path.join("/")
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BucketError {
    /// A path segment is missing and creation was not requested
    #[error("could not resolve bucket \"{path}\": invalid key {missing:?}")]
    NoSuchBucket { path: String, missing: String },
    /// None of the claim's roles is on the bucket's list
    #[error("not permitted: allowed = {allowed:?}; roles = {roles:?}")]
    NotPermitted {
        allowed: Vec<String>,
        roles: Vec<String>,
    },
}

/// Who backs a claim: the signers on file for it and the roles they hold
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Endorsement {
    pub signers: Evidence,
    pub roles: Evidence,
}

impl Endorsement {
    pub fn new<S, R>(signers: S, roles: R) -> Self
    where
        S: IntoIterator,
        S::Item: Into<String>,
        R: IntoIterator,
        R::Item: Into<String>,
    {
        Self {
            signers: signers.into_iter().map(Into::into).collect(),
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }

    /// Nobody vouches for the claim
    pub fn unknown() -> Self {
        Self::new([UNKNOWN_ROLE], [UNKNOWN_ROLE])
    }
}

/// Passed to hooks when a datum is proposed or dismissed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookEvent {
    /// Set when the hook was registered for a named bucket
    pub bucket_name: Option<Address>,
    pub data: String,
    pub validity: Validity,
    pub signers: Evidence,
    pub roles: Evidence,
    pub from_channel: String,
}

pub type HookFn = Arc<dyn Fn(&HookEvent) + Send + Sync>;

/// A callback registered on a bucket. Hooks live in memory only.
#[derive(Clone)]
pub struct Hook {
    bucket_name: Option<Address>,
    callback: HookFn,
}

impl Hook {
    pub fn new(callback: HookFn) -> Self {
        Self {
            bucket_name: None,
            callback,
        }
    }

    /// A hook whose events carry `bucket_name`
    pub fn named(bucket_name: Address, callback: HookFn) -> Self {
        Self {
            bucket_name: Some(bucket_name),
            callback,
        }
    }

    fn fire(&self, data: &str, validity: Validity, endorsement: &Endorsement, from_channel: &str) {
        let event = HookEvent {
            bucket_name: self.bucket_name.clone(),
            data: data.to_string(),
            validity,
            signers: endorsement.signers.clone(),
            roles: endorsement.roles.clone(),
            from_channel: from_channel.to_string(),
        };
        (self.callback)(&event);
    }
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hook")
            .field("bucket_name", &self.bucket_name)
            .finish_non_exhaustive()
    }
}

/// A node of the namespace tree.
///
/// Buckets are created lazily on first write (unrestricted) or explicitly
///  with an access list of roles. An empty access list admits any claim.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Bucket {
    children: BTreeMap<String, Bucket>,
    allowed: Vec<String>,
    data: BTreeMap<String, BucketDataItem>,
    #[serde(skip)]
    hook_proposed: Vec<Hook>,
    #[serde(skip)]
    hook_dismissed: Vec<Hook>,
}

impl Bucket {
    pub fn new<I>(allowed: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self {
            allowed: allowed.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /* Getters */

    pub fn allowed(&self) -> &[String] {
        &self.allowed
    }

    pub fn children(&self) -> &BTreeMap<String, Bucket> {
        &self.children
    }

    pub fn data(&self) -> &BTreeMap<String, BucketDataItem> {
        &self.data
    }

    pub fn item(&self, data: &str) -> Option<&BucketDataItem> {
        self.data.get(data)
    }

    pub(crate) fn item_mut(&mut self, data: &str) -> Option<&mut BucketDataItem> {
        self.data.get_mut(data)
    }

    /// `unknown` never satisfies a non-empty access list
    pub fn is_allowed(&self, roles: &Evidence) -> bool {
        self.allowed.is_empty()
            || self
                .allowed
                .iter()
                .any(|role| role != UNKNOWN_ROLE && roles.contains(role))
    }

    fn check_allowed(&self, endorsement: &Endorsement) -> Result<(), BucketError> {
        if self.is_allowed(&endorsement.roles) {
            return Ok(());
        }
        Err(BucketError::NotPermitted {
            allowed: self.allowed.clone(),
            roles: endorsement.roles.iter().cloned().collect(),
        })
    }

    /// Assert `data` for `validity`. Proposal hooks fire only the first
    ///  time the datum shows up in this bucket.
    pub fn propose(
        &mut self,
        data: &str,
        validity: Validity,
        endorsement: &Endorsement,
        from_channel: &str,
        now: Timestamp,
    ) -> Result<(), BucketError> {
        self.check_allowed(endorsement)?;
        let found = self.data.contains_key(data);
        self.data.entry(data.to_string()).or_default().propose(
            validity,
            endorsement.signers.iter().cloned(),
            from_channel,
            now,
        );

        if !found {
            for hook in &self.hook_proposed {
                hook.fire(data, validity, endorsement, from_channel);
            }
        }
        Ok(())
    }

    /// Retract `data` for `validity`. Dismissal hooks fire every time.
    pub fn dismiss(
        &mut self,
        data: &str,
        validity: Validity,
        endorsement: &Endorsement,
        from_channel: &str,
        now: Timestamp,
    ) -> Result<(), BucketError> {
        self.check_allowed(endorsement)?;
        self.data.entry(data.to_string()).or_default().dismiss(
            validity,
            endorsement.signers.iter().cloned(),
            from_channel,
            now,
        );

        for hook in &self.hook_dismissed {
            hook.fire(data, validity, endorsement, from_channel);
        }
        Ok(())
    }

    /// Data valid at `at`
    pub fn query(&self, at: Timestamp) -> BTreeSet<String> {
        self.data
            .iter()
            .filter(|(_, item)| item.valid(at))
            .map(|(data, _)| data.clone())
            .collect()
    }

    /// Install a child with an access list. An existing child keeps its
    ///  data and children and only has its access list replaced.
    pub fn add_child_bucket(&mut self, name: &str, allowed: &[String]) {
        let child = self.children.entry(name.to_string()).or_default();
        child.allowed = allowed.to_vec();
    }

    pub fn add_hook_proposed(&mut self, hook: Hook) {
        self.hook_proposed.push(hook);
    }

    pub fn add_hook_dismissed(&mut self, hook: Hook) {
        self.hook_dismissed.push(hook);
    }

    pub fn get_bucket(&self, path: &[String]) -> Result<&Bucket, BucketError> {
        let mut bucket = self;
        for name in path {
            bucket = bucket
                .children
                .get(name)
                .ok_or_else(|| no_such_bucket(path, name))?;
        }
        Ok(bucket)
    }

    pub fn get_bucket_mut(
        &mut self,
        path: &[String],
        create_if_not_exists: bool,
    ) -> Result<&mut Bucket, BucketError> {
        let mut bucket = self;
        for name in path {
            bucket = if create_if_not_exists {
                bucket.children.entry(name.clone()).or_default()
            } else {
                bucket
                    .children
                    .get_mut(name)
                    .ok_or_else(|| no_such_bucket(path, name))?
            };
        }
        Ok(bucket)
    }

    /// Prune expired windows in this subtree and drop data left with none
    pub fn cleanup(&mut self, now: Timestamp) {
        for child in self.children.values_mut() {
            child.cleanup(now);
        }
        self.data.retain(|_, item| {
            item.cleanup(now);
            !item.is_empty()
        });
    }

    /// Depth-first walk of every descendant with its full path
    pub fn items(&self) -> Items<'_> {
        let mut items = Items { stack: Vec::new() };
        items.push_children(&[], self);
        items
    }

    /// Depth-first walk of every descendant, mutably
    pub fn visit_mut<F>(&mut self, f: &mut F)
    where
        F: FnMut(&[String], &mut Bucket),
    {
        let mut path = Vec::new();
        self.visit_mut_inner(&mut path, f);
    }

    fn visit_mut_inner<F>(&mut self, path: &mut Address, f: &mut F)
    where
        F: FnMut(&[String], &mut Bucket),
    {
        for (name, child) in self.children.iter_mut() {
            path.push(name.clone());
            f(path, child);
            child.visit_mut_inner(path, f);
            path.pop();
        }
    }

    pub fn summary(&self, now: Timestamp) -> String {
        let mut sections = Vec::new();

        if !self.children.is_empty() {
            let children = self
                .children
                .iter()
                .map(|(name, child)| format!("{}:\n{}", name, indent(&child.summary(now), "  ")))
                .collect::<Vec<_>>()
                .join("\n");
            sections.push(format!("children:\n{}", indent(&children, "  ")));
        }

        if !self.data.is_empty() {
            let mut tombstoned = 0;
            let mut data = Vec::new();
            for (datum, item) in &self.data {
                if item.is_tombstoned(now) {
                    tombstoned += 1;
                } else {
                    data.push(format!("{:?}:\n{}", datum, indent(&item.summary(now), "  ")));
                }
            }
            sections.push(format!("data:\n{}", indent(&data.join("\n"), "  ")));
            sections.push(format!("num tombstoned: {}", tombstoned));
        }

        sections.join("\n")
    }
}

/// Iterator returned by [`Bucket::items`]
pub struct Items<'a> {
    stack: Vec<(Address, &'a Bucket)>,
}

impl<'a> Items<'a> {
    fn push_children(&mut self, path: &[String], bucket: &'a Bucket) {
        for (name, child) in bucket.children.iter().rev() {
            let mut child_path = path.to_vec();
            child_path.push(name.clone());
            self.stack.push((child_path, child));
        }
    }
}

impl<'a> Iterator for Items<'a> {
    type Item = (Address, &'a Bucket);

    fn next(&mut self) -> Option<Self::Item> {
        let (path, bucket) = self.stack.pop()?;
        self.push_children(&path, bucket);
        Some((path, bucket))
    }
}

fn no_such_bucket(path: &[String], missing: &str) -> BucketError {
    BucketError::NoSuchBucket {
        path: address_to_string(path),
        missing: missing.to_string(),
    }
}

pub(crate) fn indent(text: &str, prefix: &str) -> String {
    text.lines()
        .map(|line| format!("{}{}", prefix, line))
        .collect::<Vec<_>>()
        .join("\n")
}
