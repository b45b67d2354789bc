//! Discovery engine: robots.txt, sitemap expansion, crawl fallback.

use crate::cartography::crawler::{CrawlLimits, Crawler};
use crate::cartography::robots::{self, RobotsRules};
use crate::cartography::sitemap;
use crate::cartography::urls;
use crate::config::{AGENT_TOKEN, ROBOTS_TIMEOUT, SITEMAP_TIMEOUT};
use crate::renderer::PageLoader;
use anyhow::{Context, Result};
use sitegauge::DiscoveryMethod;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};
use url::Url;

/// Well-known sitemap paths probed at the origin.
const WELL_KNOWN_SITEMAPS: &[&str] = &["/sitemap.xml", "/sitemap_index.xml"];

/// Sitemap documents fetched in parallel per worklist round.
const SITEMAP_FETCH_CONCURRENCY: usize = 4;

/// Receives the number of pages admitted so far while discovery runs.
pub type DiscoveryProgress<'a> = &'a (dyn Fn(u32) + Send + Sync);

#[derive(Debug, Clone)]
pub struct DiscoveryRequest {
    pub base_url: String,
    pub max_depth: u32,
    pub max_urls: u32,
    /// Honour robots.txt rules and space crawl navigations.
    pub polite: bool,
}

#[derive(Debug, Clone)]
pub struct DiscoveryResult {
    /// In-scope page URLs, de-duplicated, in discovery order.
    pub urls: Vec<String>,
    pub method: DiscoveryMethod,
    /// Desktop HTML of pages already rendered during a crawl, by URL.
    pub prefetched: HashMap<String, String>,
}

pub struct DiscoveryEngine {
    loader: PageLoader,
}

impl DiscoveryEngine {
    pub fn new(loader: PageLoader) -> Self {
        Self { loader }
    }

    pub async fn discover(&self, request: &DiscoveryRequest) -> Result<DiscoveryResult> {
        self.discover_with_progress(request, &|_| {}).await
    }

    pub async fn discover_with_progress(
        &self,
        request: &DiscoveryRequest,
        on_found: DiscoveryProgress<'_>,
    ) -> Result<DiscoveryResult> {
        let base = urls::parse_absolute(&request.base_url)
            .with_context(|| format!("invalid base URL '{}'", request.base_url))?;
        let max_urls = request.max_urls as usize;

        let fetched = self.fetch_robots(&base).await;
        let rules = if request.polite {
            fetched.clone()
        } else {
            RobotsRules::allow_all()
        };
        let scope = Scope {
            base: &base,
            rules: &rules,
        };

        let mut visited: HashSet<String> = HashSet::new();
        let origin = urls::origin_string(&base);
        let well_known: Vec<String> = WELL_KNOWN_SITEMAPS
            .iter()
            .map(|p| format!("{origin}{p}"))
            .collect();
        let capped = |n: usize| on_found(n.min(max_urls) as u32);
        let from_well_known = self
            .expand_sitemaps(well_known, &scope, &mut visited, &capped)
            .await;
        let offset = from_well_known.len();
        let from_robots = self
            .expand_sitemaps(
                fetched.sitemaps.clone(),
                &scope,
                &mut visited,
                &|n| capped(offset + n),
            )
            .await;

        let method = if !from_well_known.is_empty() {
            Some(DiscoveryMethod::Sitemap)
        } else if !from_robots.is_empty() {
            Some(DiscoveryMethod::Robots)
        } else {
            None
        };

        if let Some(method) = method {
            let mut seen = HashSet::new();
            let mut found: Vec<String> = from_well_known
                .into_iter()
                .chain(from_robots)
                .filter(|u| seen.insert(u.clone()))
                .collect();
            found.truncate(max_urls);
            info!(
                "discovered {} URLs for {} via {}",
                found.len(),
                origin,
                method.as_str()
            );
            return Ok(DiscoveryResult {
                urls: found,
                method,
                prefetched: HashMap::new(),
            });
        }

        info!("no sitemap URLs for {origin}; crawling");
        let crawler = Crawler::new(self.loader.clone());
        let pages = crawler
            .crawl(
                &base,
                &rules,
                &CrawlLimits {
                    max_depth: request.max_depth,
                    max_urls,
                    polite: request.polite,
                },
                on_found,
            )
            .await;
        info!("crawl discovered {} URLs for {origin}", pages.len());

        let urls = pages.iter().map(|p| p.url.clone()).collect();
        Ok(DiscoveryResult {
            urls,
            method: DiscoveryMethod::Crawl,
            prefetched: pages.into_iter().map(|p| (p.url, p.html)).collect(),
        })
    }

    async fn fetch_robots(&self, base: &Url) -> RobotsRules {
        let url = format!("{}/robots.txt", urls::origin_string(base));
        match self.loader.http().get(&url, ROBOTS_TIMEOUT).await {
            Ok(resp) if resp.is_success() => robots::parse_robots(&resp.body, AGENT_TOKEN),
            Ok(resp) => {
                debug!("robots.txt at {url} returned {}", resp.status);
                RobotsRules::allow_all()
            }
            Err(e) => {
                warn!("robots.txt fetch failed for {url}: {e:#}");
                RobotsRules::allow_all()
            }
        }
    }

    /// Expand sitemap documents breadth-first. Child sitemaps are queued
    /// once each; page URLs are filtered to the scope. `on_found` gets the
    /// running count after each document.
    async fn expand_sitemaps(
        &self,
        seeds: Vec<String>,
        scope: &Scope<'_>,
        visited: &mut HashSet<String>,
        on_found: &(dyn Fn(usize) + Send + Sync),
    ) -> Vec<String> {
        let mut worklist: Vec<String> = seeds
            .into_iter()
            .filter(|u| visited.insert(u.clone()))
            .collect();
        let mut found = Vec::new();
        let mut found_set = HashSet::new();

        while !worklist.is_empty() {
            let batch = std::mem::take(&mut worklist);
            let responses = self
                .loader
                .http()
                .get_many(&batch, SITEMAP_FETCH_CONCURRENCY, SITEMAP_TIMEOUT)
                .await;

            for (doc_url, resp) in batch.iter().zip(responses) {
                let body = match resp {
                    Ok(r) if r.is_success() => r.body,
                    Ok(r) => {
                        debug!("sitemap {doc_url} returned {}", r.status);
                        continue;
                    }
                    Err(e) => {
                        warn!("sitemap fetch failed for {doc_url}: {e:#}");
                        continue;
                    }
                };
                let parsed = match sitemap::parse_sitemap(&body) {
                    Ok(p) => p,
                    Err(e) => {
                        warn!("sitemap {doc_url} is malformed: {e:#}");
                        continue;
                    }
                };
                for child in parsed.sitemaps {
                    if visited.insert(child.clone()) {
                        worklist.push(child);
                    }
                }
                for entry in parsed.pages {
                    if let Some(url) = scope.admit(&entry.url) {
                        if found_set.insert(url.clone()) {
                            found.push(url);
                        }
                    }
                }
                on_found(found.len());
            }
        }

        found
    }
}

struct Scope<'a> {
    base: &'a Url,
    rules: &'a RobotsRules,
}

impl Scope<'_> {
    fn admit(&self, raw: &str) -> Option<String> {
        let url = urls::parse_absolute(raw)?;
        if !urls::same_origin(&url, self.base) || urls::is_asset(&url) {
            return None;
        }
        if !self.rules.is_url_allowed(url.as_str()) {
            return None;
        }
        Some(url.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_admits_only_in_scope_pages() {
        let base = Url::parse("https://example.com/").unwrap();
        let rules = robots::parse_robots("User-agent: *\nDisallow: /admin", AGENT_TOKEN);
        let scope = Scope {
            base: &base,
            rules: &rules,
        };
        assert_eq!(
            scope.admit("https://example.com/a#x").as_deref(),
            Some("https://example.com/a")
        );
        assert!(scope.admit("https://example.com/admin/users").is_none());
        assert!(scope.admit("https://cdn.example.com/a").is_none());
        assert!(scope.admit("https://example.com/a.jpg").is_none());
        assert!(scope.admit("not a url").is_none());
    }
}
