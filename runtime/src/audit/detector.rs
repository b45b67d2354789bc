//! Violation detection on a rendered page.
//!
//! The built-in rule set works on HTML alone, so it also runs in HTTP-only
//! mode. When a detector script (an axe-core bundle) is configured and the
//! page is open in a browser, the script's findings are merged in and take
//! precedence for the rules it reports.

use crate::renderer::LoadedPage;
use anyhow::{Context, Result};
use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use sitegauge::Violation;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

/// Runs the injected detector script and returns its violations.
const RUN_SCRIPT_JS: &str = r#"(async () => {
  if (typeof axe === 'undefined') { return null; }
  const r = await axe.run(document, {
    runOnly: { type: 'tag', values: ['wcag2a', 'wcag2aa', 'wcag21a', 'wcag21aa'] }
  });
  return r.violations.map(v => ({
    rule_id: v.id,
    description: v.help,
    impact: v.impact || 'moderate',
    nodes: v.nodes.map(n => n.html)
  }));
})()"#;

/// Longest element snippet kept per affected node.
const SNIPPET_LIMIT: usize = 240;

/// Black-box rule engine run against one rendered page.
#[async_trait]
pub trait ViolationDetector: Send + Sync {
    async fn detect(&self, page: &LoadedPage) -> Result<Vec<Violation>>;
}

/// Structural checks plus an optional injected script.
#[derive(Clone, Default)]
pub struct BuiltinDetector {
    script: Option<Arc<String>>,
}

impl BuiltinDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(script: String) -> Self {
        Self {
            script: Some(Arc::new(script)),
        }
    }

    pub fn from_script_path(path: &Path) -> Result<Self> {
        let script = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read detector script {}", path.display()))?;
        Ok(Self::with_script(script))
    }

    async fn run_script(&self, page: &LoadedPage) -> Option<Vec<Violation>> {
        let script = self.script.as_ref()?;
        let ctx = page.context.as_ref()?;
        if let Err(e) = ctx.execute_js(script).await {
            warn!("detector script injection failed on {}: {e:#}", page.url);
            return None;
        }
        match ctx.execute_js(RUN_SCRIPT_JS).await {
            Ok(value) => parse_script_violations(value),
            Err(e) => {
                warn!("detector script failed on {}: {e:#}", page.url);
                None
            }
        }
    }
}

#[async_trait]
impl ViolationDetector for BuiltinDetector {
    async fn detect(&self, page: &LoadedPage) -> Result<Vec<Violation>> {
        let html = page.html.clone();
        let builtin = tokio::task::spawn_blocking(move || structural_violations(&html))
            .await
            .context("structural checks panicked")?;

        let Some(scripted) = self.run_script(page).await else {
            return Ok(builtin);
        };

        let reported: HashSet<String> = scripted.iter().map(|v| v.rule_id.clone()).collect();
        let mut merged = scripted;
        merged.extend(
            builtin
                .into_iter()
                .filter(|v| !reported.contains(&v.rule_id)),
        );
        Ok(merged)
    }
}

/// Decode the script's result array. `null` means the script did not load.
pub fn parse_script_violations(value: serde_json::Value) -> Option<Vec<Violation>> {
    if value.is_null() {
        return None;
    }
    match serde_json::from_value(value) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!("unexpected detector script output: {e}");
            None
        }
    }
}

fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

fn snippet(el: ElementRef<'_>) -> String {
    let html = el.html();
    if html.chars().count() <= SNIPPET_LIMIT {
        return html;
    }
    let mut cut: String = html.chars().take(SNIPPET_LIMIT).collect();
    cut.push('…');
    cut
}

fn has_text(el: ElementRef<'_>) -> bool {
    el.text().any(|t| !t.trim().is_empty())
}

fn attr_present(el: ElementRef<'_>, name: &str) -> bool {
    el.value()
        .attr(name)
        .map(|v| !v.trim().is_empty())
        .unwrap_or(false)
}

fn accessible_name_attr(el: ElementRef<'_>) -> bool {
    attr_present(el, "aria-label") || attr_present(el, "aria-labelledby") || attr_present(el, "title")
}

fn is_hidden(el: ElementRef<'_>) -> bool {
    el.value().attr("aria-hidden") == Some("true") || el.value().attr("hidden").is_some()
}

fn violation(rule_id: &str, description: &str, impact: &str, nodes: Vec<String>) -> Option<Violation> {
    if nodes.is_empty() {
        return None;
    }
    Some(Violation {
        rule_id: rule_id.to_string(),
        description: description.to_string(),
        impact: impact.to_string(),
        nodes,
    })
}

/// Structural accessibility checks that need no script execution.
pub fn structural_violations(html: &str) -> Vec<Violation> {
    let document = Html::parse_document(html);
    let mut out = Vec::new();

    // html-has-lang
    if let Some(sel) = selector("html") {
        let nodes: Vec<String> = document
            .select(&sel)
            .filter(|el| !attr_present(*el, "lang"))
            .map(|el| {
                let mut tag = String::from("<html");
                for (k, v) in el.value().attrs() {
                    tag.push_str(&format!(" {k}=\"{v}\""));
                }
                tag.push('>');
                tag
            })
            .collect();
        out.extend(violation(
            "html-has-lang",
            "<html> element must have a lang attribute",
            "serious",
            nodes,
        ));
    }

    // document-title
    if let Some(sel) = selector("title") {
        let titled = document.select(&sel).any(has_text);
        if !titled {
            out.extend(violation(
                "document-title",
                "Documents must have <title> element to aid in navigation",
                "serious",
                vec!["<title>".to_string()],
            ));
        }
    }

    // image-alt
    if let Some(sel) = selector("img") {
        let nodes = document
            .select(&sel)
            .filter(|el| {
                let role = el.value().attr("role").unwrap_or("");
                el.value().attr("alt").is_none()
                    && !accessible_name_attr(*el)
                    && role != "presentation"
                    && role != "none"
                    && !is_hidden(*el)
            })
            .map(snippet)
            .collect();
        out.extend(violation(
            "image-alt",
            "Images must have alternate text",
            "critical",
            nodes,
        ));
    }

    // label
    if let (Some(controls), Some(labels)) = (
        selector("input, select, textarea"),
        selector("label[for]"),
    ) {
        let labelled_ids: HashSet<&str> = document
            .select(&labels)
            .filter_map(|l| l.value().attr("for"))
            .collect();
        let nodes = document
            .select(&controls)
            .filter(|el| {
                let ty = el
                    .value()
                    .attr("type")
                    .unwrap_or("text")
                    .to_ascii_lowercase();
                if el.value().name() == "input"
                    && matches!(ty.as_str(), "hidden" | "submit" | "button" | "reset" | "image")
                {
                    return false;
                }
                let by_for = el
                    .value()
                    .attr("id")
                    .map(|id| labelled_ids.contains(id))
                    .unwrap_or(false);
                let wrapped = el
                    .ancestors()
                    .filter_map(ElementRef::wrap)
                    .any(|a| a.value().name() == "label");
                !(by_for || wrapped || accessible_name_attr(*el) || is_hidden(*el))
            })
            .map(snippet)
            .collect();
        out.extend(violation(
            "label",
            "Form elements must have labels",
            "critical",
            nodes,
        ));
    }

    // link-name
    if let (Some(links), Some(imgs)) = (selector("a[href]"), selector("img[alt]")) {
        let nodes = document
            .select(&links)
            .filter(|a| {
                let img_named = a
                    .select(&imgs)
                    .any(|img| attr_present(img, "alt"));
                !(has_text(*a) || accessible_name_attr(*a) || img_named || is_hidden(*a))
            })
            .map(snippet)
            .collect();
        out.extend(violation(
            "link-name",
            "Links must have discernible text",
            "serious",
            nodes,
        ));
    }

    // button-name
    if let Some(sel) = selector("button, [role=button]") {
        let nodes = document
            .select(&sel)
            .filter(|b| !(has_text(*b) || accessible_name_attr(*b) || is_hidden(*b)))
            .map(snippet)
            .collect();
        out.extend(violation(
            "button-name",
            "Buttons must have discernible text",
            "critical",
            nodes,
        ));
    }

    // heading-order and empty-heading
    if let Some(sel) = selector("h1, h2, h3, h4, h5, h6") {
        let mut previous: Option<u32> = None;
        let mut skipped = Vec::new();
        let mut empty = Vec::new();
        for h in document.select(&sel) {
            let level = h.value().name()[1..].parse::<u32>().unwrap_or(1);
            if let Some(prev) = previous {
                if level > prev + 1 {
                    skipped.push(snippet(h));
                }
            }
            previous = Some(level);
            if !has_text(h) && !accessible_name_attr(h) {
                empty.push(snippet(h));
            }
        }
        out.extend(violation(
            "heading-order",
            "Heading levels should only increase by one",
            "moderate",
            skipped,
        ));
        out.extend(violation(
            "empty-heading",
            "Headings should not be empty",
            "minor",
            empty,
        ));
    }

    out
}
