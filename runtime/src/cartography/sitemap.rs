//! Parse sitemap.xml and sitemap index files.

use anyhow::Result;
use chrono::{DateTime, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;

/// A page entry from a `<urlset>`.
#[derive(Debug, Clone)]
pub struct SitemapEntry {
    pub url: String,
    pub lastmod: Option<DateTime<Utc>>,
}

/// Contents of one sitemap document.
#[derive(Debug, Clone, Default)]
pub struct ParsedSitemap {
    /// `<url><loc>` entries.
    pub pages: Vec<SitemapEntry>,
    /// `<sitemap><loc>` entries of a sitemap index.
    pub sitemaps: Vec<String>,
}

/// Parse a sitemap XML string, keeping page entries and child sitemaps apart.
pub fn parse_sitemap(xml: &str) -> Result<ParsedSitemap> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut parsed = ParsedSitemap::default();

    let mut in_url = false;
    let mut in_sitemap = false;
    let mut current_tag = String::new();
    let mut current_loc = String::new();
    let mut current_lastmod = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                match name.as_str() {
                    "url" => {
                        in_url = true;
                        current_loc.clear();
                        current_lastmod.clear();
                    }
                    "sitemap" => {
                        in_sitemap = true;
                        current_loc.clear();
                    }
                    _ => current_tag = name,
                }
            }
            Ok(Event::End(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                match name.as_str() {
                    "url" if in_url => {
                        if !current_loc.is_empty() {
                            parsed.pages.push(SitemapEntry {
                                url: current_loc.clone(),
                                lastmod: parse_date(&current_lastmod),
                            });
                        }
                        in_url = false;
                    }
                    "sitemap" if in_sitemap => {
                        if !current_loc.is_empty() {
                            parsed.sitemaps.push(current_loc.clone());
                        }
                        in_sitemap = false;
                    }
                    _ => {}
                }
                current_tag.clear();
            }
            Ok(Event::Text(e)) => {
                let text = e.unescape().unwrap_or_default();
                let text = text.trim();
                if (in_url || in_sitemap) && current_tag == "loc" {
                    current_loc = text.to_string();
                } else if in_url && current_tag == "lastmod" {
                    current_lastmod = text.to_string();
                }
            }
            Ok(Event::CData(e)) => {
                if (in_url || in_sitemap) && current_tag == "loc" {
                    current_loc = String::from_utf8_lossy(&e).trim().to_string();
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => anyhow::bail!("XML parse error: {e}"),
            _ => {}
        }
    }

    Ok(parsed)
}

fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    let date = chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()?;
    Some(date.and_hms_opt(0, 0, 0)?.and_utc())
}
