//! Change detection against the per-domain fingerprint cache.

use crate::cluster::Cluster;
use crate::types::PageHashCacheEntry;
use std::collections::HashMap;

/// Previous run's fingerprints for one domain, keyed by exact URL.
#[derive(Debug, Clone, Default)]
pub struct FingerprintCache {
    entries: HashMap<String, PageHashCacheEntry>,
}

impl FingerprintCache {
    pub fn new(entries: impl IntoIterator<Item = PageHashCacheEntry>) -> Self {
        Self {
            entries: entries.into_iter().map(|e| (e.url.clone(), e)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, url: &str) -> Option<&PageHashCacheEntry> {
        self.entries.get(url)
    }

    /// A page is unchanged iff the cache holds the same fingerprint for the exact URL.
    pub fn is_unchanged(&self, url: &str, fingerprint: Option<&str>) -> bool {
        match (self.entries.get(url), fingerprint) {
            (Some(entry), Some(fp)) => entry.fingerprint == fp,
            _ => false,
        }
    }
}

/// Per-page change state for the current run.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    changed: HashMap<String, bool>,
    fingerprinted: HashMap<String, bool>,
}

impl ChangeSet {
    /// Compare `(url, fingerprint)` pairs from this run against the cache.
    pub fn compute<'a>(
        pages: impl IntoIterator<Item = (&'a str, Option<&'a str>)>,
        cache: &FingerprintCache,
    ) -> Self {
        let mut set = Self::default();
        for (url, fingerprint) in pages {
            set.changed
                .insert(url.to_string(), !cache.is_unchanged(url, fingerprint));
            set.fingerprinted
                .insert(url.to_string(), fingerprint.is_some());
        }
        set
    }

    pub fn is_changed(&self, url: &str) -> bool {
        self.changed.get(url).copied().unwrap_or(true)
    }

    pub fn changed_count(&self) -> usize {
        self.changed.values().filter(|c| **c).count()
    }

    /// A cluster needs auditing when it holds at least one changed,
    /// fingerprint-bearing page.
    pub fn needs_audit(&self, cluster: &Cluster) -> bool {
        cluster.member_urls.iter().any(|url| {
            self.is_changed(url) && self.fingerprinted.get(url).copied().unwrap_or(false)
        })
    }
}
