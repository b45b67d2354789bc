//! Breadth-first crawl fallback for sites without a usable sitemap.

use crate::cartography::discovery::DiscoveryProgress;
use crate::cartography::robots::RobotsRules;
use crate::cartography::urls;
use crate::config::{CRAWL_DELAY, NAVIGATION_TIMEOUT};
use crate::renderer::PageLoader;
use scraper::{Html, Selector};
use sitegauge::ViewportKind;
use std::collections::{HashSet, VecDeque};
use tracing::{debug, warn};
use url::Url;

/// A page reached during the crawl.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawledPage {
    pub url: String,
    pub status: u16,
    pub depth: u32,
    /// Document as rendered at the desktop viewport.
    pub html: String,
}

/// Crawl bounds.
#[derive(Debug, Clone)]
pub struct CrawlLimits {
    pub max_depth: u32,
    pub max_urls: usize,
    /// Space navigations by [`CRAWL_DELAY`].
    pub polite: bool,
}

/// Breadth-first crawler over same-origin anchors.
pub struct Crawler {
    loader: PageLoader,
}

impl Crawler {
    pub fn new(loader: PageLoader) -> Self {
        Self { loader }
    }

    /// Crawl from `root`. Pages that fail to load or answer with a non-2xx
    /// status are skipped; the result never exceeds `limits.max_urls`.
    /// `on_found` receives the running page count after each admitted page.
    pub async fn crawl(
        &self,
        root: &Url,
        rules: &RobotsRules,
        limits: &CrawlLimits,
        on_found: DiscoveryProgress<'_>,
    ) -> Vec<CrawledPage> {
        let desktop = ViewportKind::Desktop.viewport();
        let mut queue: VecDeque<(Url, u32)> = VecDeque::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut pages = Vec::new();

        let mut start = root.clone();
        start.set_fragment(None);
        seen.insert(start.to_string());
        if rules.is_url_allowed(start.as_str()) {
            queue.push_back((start, 0));
        }

        let mut first = true;
        while let Some((url, depth)) = queue.pop_front() {
            if pages.len() >= limits.max_urls {
                break;
            }
            if limits.polite && !first {
                tokio::time::sleep(CRAWL_DELAY).await;
            }
            first = false;

            let loaded = self
                .loader
                .load(url.as_str(), Some(&desktop), NAVIGATION_TIMEOUT)
                .await;
            let page = match loaded {
                Ok(page) => page,
                Err(e) => {
                    warn!("crawl: skipping {url}: {e:#}");
                    continue;
                }
            };
            let status = page.status;
            let html = page.html.clone();
            page.close().await;

            if !(200..300).contains(&status) {
                warn!("crawl: skipping {url}: HTTP {status}");
                continue;
            }

            let links = if depth < limits.max_depth {
                let (doc, base) = (html.clone(), url.clone());
                tokio::task::spawn_blocking(move || extract_links(&doc, &base))
                    .await
                    .unwrap_or_default()
            } else {
                Vec::new()
            };

            pages.push(CrawledPage {
                url: url.to_string(),
                status,
                depth,
                html,
            });
            on_found(pages.len() as u32);

            for link in links {
                let key = link.to_string();
                if seen.contains(&key) {
                    continue;
                }
                seen.insert(key);
                if !rules.is_url_allowed(link.as_str()) {
                    debug!("crawl: {link} disallowed by robots.txt");
                    continue;
                }
                queue.push_back((link, depth + 1));
            }
        }

        pages
    }
}

/// Same-origin, non-asset anchor targets of `html`, in document order.
pub fn extract_links(html: &str, base: &Url) -> Vec<Url> {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };
    let mut seen = HashSet::new();
    document
        .select(&selector)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| urls::normalize(base, href))
        .filter(|u| urls::same_origin(u, base) && !urls::is_asset(u))
        .filter(|u| seen.insert(u.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_links_filters_and_normalizes() {
        let html = r##"<html><body>
            <a href="/a">A</a>
            <a href="b#frag">B</a>
            <a href="/a#again">A again</a>
            <a href="https://other.com/x">External</a>
            <a href="/files/doc.pdf">PDF</a>
            <a href="mailto:x@y.z">Mail</a>
            <a href="#top">Top</a>
        </body></html>"##;
        let base = Url::parse("https://example.com/dir/").unwrap();
        let links: Vec<String> = extract_links(html, &base)
            .into_iter()
            .map(|u| u.to_string())
            .collect();
        assert_eq!(
            links,
            vec!["https://example.com/a", "https://example.com/dir/b"]
        );
    }

    #[test]
    fn test_extract_links_malformed_html() {
        let base = Url::parse("https://example.com/").unwrap();
        assert!(extract_links("<a href=", &base).is_empty());
        assert_eq!(extract_links("<a href='/x'>x", &base).len(), 1);
    }
}
