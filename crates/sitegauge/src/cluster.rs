//! Template clustering: exact fingerprint grouping, then near-duplicate merging.

use crate::similarity::jaccard;
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// Cluster key for pages whose structure could not be fetched.
pub const UNRESOLVED_FINGERPRINT: &str = "unresolved";

/// Default path-set similarity at or above which two clusters merge.
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.85;

/// Default cluster count above which the merge pass is skipped.
pub const DEFAULT_MERGE_CEILING: usize = 200;

/// Default number of member paths kept for display.
pub const DEFAULT_SAMPLE_SIZE: usize = 5;

/// Clustering input for one page.
#[derive(Debug, Clone)]
pub struct PageSignature {
    pub url: String,
    /// `None` when the page could not be fetched.
    pub fingerprint: Option<String>,
    /// Tag path set; absent during lightweight listing.
    pub paths: Option<BTreeSet<String>>,
}

/// One final cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    pub fingerprint: String,
    pub representative_url: String,
    pub member_urls: Vec<String>,
    pub sample_paths: Vec<String>,
    paths: Option<BTreeSet<String>>,
}

impl Cluster {
    pub fn page_count(&self) -> usize {
        self.member_urls.len()
    }

    /// Whether this cluster holds pages that were never fingerprinted.
    pub fn is_unresolved(&self) -> bool {
        self.fingerprint == UNRESOLVED_FINGERPRINT
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ClusterOptions {
    pub similarity_threshold: f64,
    pub merge_ceiling: usize,
    pub sample_size: usize,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            merge_ceiling: DEFAULT_MERGE_CEILING,
            sample_size: DEFAULT_SAMPLE_SIZE,
        }
    }
}

/// Group pages into templates.
///
/// Deterministic for a fixed input order: the first-seen URL of each
/// fingerprint is its representative, and merges run index-ascending.
pub fn cluster_pages(pages: &[PageSignature], options: &ClusterOptions) -> Vec<Cluster> {
    let mut clusters = exact_groups(pages);

    if clusters.len() > options.merge_ceiling {
        debug!(
            "skipping similarity merge: {} clusters exceed ceiling {}",
            clusters.len(),
            options.merge_ceiling
        );
    } else {
        clusters = merge_similar(clusters, options.similarity_threshold);
    }

    for cluster in &mut clusters {
        cluster.sample_paths = sample_paths(&cluster.member_urls, options.sample_size);
    }
    clusters
}

fn exact_groups(pages: &[PageSignature]) -> Vec<Cluster> {
    let mut by_fingerprint: HashMap<&str, usize> = HashMap::new();
    let mut clusters: Vec<Cluster> = Vec::new();

    for page in pages {
        let key = page.fingerprint.as_deref().unwrap_or(UNRESOLVED_FINGERPRINT);
        match by_fingerprint.get(key) {
            Some(&idx) => {
                let cluster = &mut clusters[idx];
                cluster.member_urls.push(page.url.clone());
                if cluster.paths.is_none() {
                    cluster.paths = page.paths.clone();
                }
            }
            None => {
                by_fingerprint.insert(key, clusters.len());
                clusters.push(Cluster {
                    fingerprint: key.to_string(),
                    representative_url: page.url.clone(),
                    member_urls: vec![page.url.clone()],
                    sample_paths: Vec::new(),
                    paths: page.paths.clone(),
                });
            }
        }
    }

    clusters
}

fn merge_similar(clusters: Vec<Cluster>, threshold: f64) -> Vec<Cluster> {
    let n = clusters.len();
    let mut absorbed = vec![false; n];
    let mut absorbed_into: Vec<Vec<usize>> = vec![Vec::new(); n];

    for i in 0..n {
        if absorbed[i] || clusters[i].is_unresolved() {
            continue;
        }
        let Some(paths_a) = clusters[i].paths.as_ref() else {
            continue;
        };
        for j in (i + 1)..n {
            if absorbed[j] || clusters[j].is_unresolved() {
                continue;
            }
            let Some(paths_b) = clusters[j].paths.as_ref() else {
                continue;
            };
            if jaccard(paths_a, paths_b) >= threshold {
                absorbed[j] = true;
                absorbed_into[i].push(j);
            }
        }
    }

    let mut slots: Vec<Option<Cluster>> = clusters.into_iter().map(Some).collect();
    let mut merged = Vec::with_capacity(n);
    for i in 0..n {
        if absorbed[i] {
            continue;
        }
        let Some(mut target) = slots[i].take() else {
            continue;
        };
        for &j in &absorbed_into[i] {
            if let Some(source) = slots[j].take() {
                target.member_urls.extend(source.member_urls);
            }
        }
        merged.push(target);
    }
    merged
}

fn sample_paths(urls: &[String], limit: usize) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for url in urls {
        if out.len() >= limit {
            break;
        }
        let path = url_path(url);
        if seen.insert(path.clone()) {
            out.push(path);
        }
    }
    out
}

fn url_path(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn page(url: &str, fp: &str, p: Option<BTreeSet<String>>) -> PageSignature {
        PageSignature {
            url: url.to_string(),
            fingerprint: Some(fp.to_string()),
            paths: p,
        }
    }

    #[test]
    fn test_exact_grouping_keeps_first_seen_representative() {
        let pages = vec![
            page("https://a.com/p/1", "f1", None),
            page("https://a.com/", "f0", None),
            page("https://a.com/p/2", "f1", None),
        ];
        let clusters = cluster_pages(&pages, &ClusterOptions::default());
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].representative_url, "https://a.com/p/1");
        assert_eq!(clusters[0].page_count(), 2);
        assert_eq!(clusters[0].sample_paths, vec!["/p/1", "/p/2"]);
    }

    #[test]
    fn test_similar_clusters_merge() {
        let base: Vec<String> = (0..20).map(|i| format!("html>body>div{i}")).collect();
        let a: BTreeSet<String> = base.iter().cloned().collect();
        let mut b = a.clone();
        b.insert("html>body>aside".to_string());
        let c = paths(&["html", "html>body", "html>body>form"]);

        let pages = vec![
            page("https://a.com/x", "fa", Some(a)),
            page("https://a.com/y", "fb", Some(b)),
            page("https://a.com/z", "fc", Some(c)),
        ];
        let clusters = cluster_pages(&pages, &ClusterOptions::default());
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].fingerprint, "fa");
        assert_eq!(clusters[0].member_urls, vec!["https://a.com/x", "https://a.com/y"]);
        assert_eq!(clusters[1].fingerprint, "fc");
    }

    #[test]
    fn test_absorbed_cluster_is_not_a_merge_target() {
        // A~B and B~C but A!~C: C must stay separate because B was absorbed.
        let range = |lo: u32, hi: u32| -> BTreeSet<String> { (lo..=hi).map(|i| i.to_string()).collect() };
        let a = range(1, 40);
        let b = range(1, 43);
        let c = range(4, 46);
        assert!(jaccard(&a, &b) >= 0.85);
        assert!(jaccard(&b, &c) >= 0.85);
        assert!(jaccard(&a, &c) < 0.85);

        let pages = vec![
            page("https://a.com/a", "fa", Some(a)),
            page("https://a.com/b", "fb", Some(b)),
            page("https://a.com/c", "fc", Some(c)),
        ];
        let clusters = cluster_pages(&pages, &ClusterOptions::default());
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[1].member_urls, vec!["https://a.com/c"]);
    }

    #[test]
    fn test_merge_skipped_above_ceiling() {
        let p = paths(&["html", "html>body"]);
        let pages = vec![
            page("https://a.com/1", "f1", Some(p.clone())),
            page("https://a.com/2", "f2", Some(p)),
        ];
        let options = ClusterOptions {
            merge_ceiling: 1,
            ..Default::default()
        };
        assert_eq!(cluster_pages(&pages, &options).len(), 2);
        assert_eq!(cluster_pages(&pages, &ClusterOptions::default()).len(), 1);
    }

    #[test]
    fn test_clustering_is_idempotent() {
        let pages: Vec<PageSignature> = (0..30)
            .map(|i| {
                let p: BTreeSet<String> = (0..(i % 4 + 5)).map(|k| format!("p{k}")).collect();
                page(&format!("https://a.com/{i}"), &format!("f{}", i % 6), Some(p))
            })
            .collect();
        let first = cluster_pages(&pages, &ClusterOptions::default());
        let second = cluster_pages(&pages, &ClusterOptions::default());
        assert_eq!(first, second);
    }

    #[test]
    fn test_unresolved_pages_group_together_and_never_merge() {
        let p = paths(&["html", "html>body"]);
        let pages = vec![
            page("https://a.com/1", "f1", Some(p.clone())),
            PageSignature {
                url: "https://a.com/broken".to_string(),
                fingerprint: None,
                paths: Some(p),
            },
            PageSignature {
                url: "https://a.com/broken2".to_string(),
                fingerprint: None,
                paths: None,
            },
        ];
        let clusters = cluster_pages(&pages, &ClusterOptions::default());
        assert_eq!(clusters.len(), 2);
        assert!(clusters[1].is_unresolved());
        assert_eq!(clusters[1].page_count(), 2);
    }
}
