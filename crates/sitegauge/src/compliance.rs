//! WCAG criterion catalog, automated resolution, and compliance arithmetic.

use crate::types::{
    CriterionResult, CriterionStatus, RiskLevel, RiskRollup, TestMethod, Violation,
};
use scraper::{Html, Selector};
use std::collections::{BTreeSet, HashMap};

/// WCAG conformance level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    A,
    AA,
}

/// One checkable success criterion.
#[derive(Debug, Clone, Copy)]
pub struct Criterion {
    pub id: &'static str,
    pub level: Level,
    pub title: &'static str,
    pub description: &'static str,
    /// Detector rule ids that count as evidence of failure.
    pub rules: &'static [&'static str],
    /// CSS selectors for the elements the criterion applies to.
    /// Empty means the criterion applies to every page.
    pub applies_to: &'static [&'static str],
    /// The rules fully decide the criterion: applicable with no rule
    /// firing is compliant.
    pub decisive: bool,
}

pub const CATALOG: &[Criterion] = &[
    Criterion {
        id: "1.1.1",
        level: Level::A,
        title: "Non-text Content",
        description: "All non-text content presented to the user has a text alternative that serves the equivalent purpose.",
        rules: &["image-alt", "input-image-alt", "area-alt", "svg-img-alt", "role-img-alt"],
        applies_to: &["img", "input[type=image]", "area", "svg", "[role=img]"],
        decisive: true,
    },
    Criterion {
        id: "1.2.2",
        level: Level::A,
        title: "Captions (Prerecorded)",
        description: "Captions are provided for all prerecorded audio content in synchronized media.",
        rules: &["video-caption"],
        applies_to: &["video"],
        decisive: false,
    },
    Criterion {
        id: "1.3.1",
        level: Level::A,
        title: "Info and Relationships",
        description: "Information, structure, and relationships conveyed through presentation can be programmatically determined.",
        rules: &["heading-order", "list", "listitem", "th-has-data-cells", "label"],
        applies_to: &[],
        decisive: false,
    },
    Criterion {
        id: "1.4.3",
        level: Level::AA,
        title: "Contrast (Minimum)",
        description: "Text and images of text have a contrast ratio of at least 4.5:1.",
        rules: &["color-contrast"],
        applies_to: &[],
        decisive: false,
    },
    Criterion {
        id: "2.1.1",
        level: Level::A,
        title: "Keyboard",
        description: "All functionality of the content is operable through a keyboard interface.",
        rules: &["scrollable-region-focusable"],
        applies_to: &["a[href]", "button", "input", "select", "textarea", "[tabindex]"],
        decisive: false,
    },
    Criterion {
        id: "2.4.1",
        level: Level::A,
        title: "Bypass Blocks",
        description: "A mechanism is available to bypass blocks of content that are repeated on multiple pages.",
        rules: &["bypass", "skip-link"],
        applies_to: &[],
        decisive: false,
    },
    Criterion {
        id: "2.4.2",
        level: Level::A,
        title: "Page Titled",
        description: "Web pages have titles that describe topic or purpose.",
        rules: &["document-title"],
        applies_to: &[],
        decisive: true,
    },
    Criterion {
        id: "2.4.4",
        level: Level::A,
        title: "Link Purpose (In Context)",
        description: "The purpose of each link can be determined from the link text alone or together with its context.",
        rules: &["link-name"],
        applies_to: &["a[href]"],
        decisive: true,
    },
    Criterion {
        id: "2.4.6",
        level: Level::AA,
        title: "Headings and Labels",
        description: "Headings and labels describe topic or purpose.",
        rules: &["empty-heading"],
        applies_to: &["h1", "h2", "h3", "h4", "h5", "h6", "label"],
        decisive: false,
    },
    Criterion {
        id: "3.1.1",
        level: Level::A,
        title: "Language of Page",
        description: "The default human language of each web page can be programmatically determined.",
        rules: &["html-has-lang", "html-lang-valid"],
        applies_to: &[],
        decisive: true,
    },
    Criterion {
        id: "3.3.2",
        level: Level::A,
        title: "Labels or Instructions",
        description: "Labels or instructions are provided when content requires user input.",
        rules: &["label", "select-name"],
        applies_to: &["input", "select", "textarea"],
        decisive: true,
    },
    Criterion {
        id: "4.1.2",
        level: Level::A,
        title: "Name, Role, Value",
        description: "For all user interface components, the name and role can be programmatically determined.",
        rules: &["button-name", "aria-required-attr", "aria-valid-attr-value", "frame-title"],
        applies_to: &["button", "input", "select", "textarea", "iframe", "[role]"],
        decisive: false,
    },
];

pub fn catalog() -> &'static [Criterion] {
    CATALOG
}

pub fn find(id: &str) -> Option<&'static Criterion> {
    CATALOG.iter().find(|c| c.id == id)
}

/// Ids of catalog criteria whose target elements are absent from `html`.
pub fn not_applicable(html: &str) -> BTreeSet<&'static str> {
    let document = Html::parse_document(html);
    CATALOG
        .iter()
        .filter(|c| !c.applies_to.is_empty())
        .filter(|c| {
            !c.applies_to.iter().any(|sel| match Selector::parse(sel) {
                Ok(selector) => document.select(&selector).next().is_some(),
                Err(_) => true,
            })
        })
        .map(|c| c.id)
        .collect()
}

/// Resolve `criterion` from detector evidence alone.
///
/// Returns `None` when no mapped rule fired on an applicable criterion
/// that the rules do not fully decide; such criteria need a judgment call.
pub fn resolve_automated(
    criterion: &Criterion,
    violations: &[Violation],
    not_applicable: &BTreeSet<&str>,
) -> Option<CriterionResult> {
    let hits: Vec<&Violation> = violations
        .iter()
        .filter(|v| criterion.rules.contains(&v.rule_id.as_str()))
        .collect();

    if !hits.is_empty() {
        let nodes: usize = hits.iter().map(|v| v.nodes.len().max(1)).sum();
        return Some(CriterionResult {
            criterion_id: criterion.id.to_string(),
            status: CriterionStatus::NonCompliant,
            confidence: 95,
            reasoning: format!(
                "{} detector rule(s) failed on {} element(s)",
                hits.len(),
                nodes
            ),
            issues: hits
                .iter()
                .map(|v| format!("{}: {}", v.rule_id, v.description))
                .collect(),
            recommendations: vec![format!(
                "Fix the reported elements so the page meets {} {}",
                criterion.id, criterion.title
            )],
            method: TestMethod::Automated,
        });
    }

    if not_applicable.contains(criterion.id) {
        return Some(CriterionResult {
            criterion_id: criterion.id.to_string(),
            status: CriterionStatus::NotApplicable,
            confidence: 100,
            reasoning: "The page contains no elements this criterion applies to".to_string(),
            issues: Vec::new(),
            recommendations: Vec::new(),
            method: TestMethod::Automated,
        });
    }

    if criterion.decisive {
        return Some(CriterionResult {
            criterion_id: criterion.id.to_string(),
            status: CriterionStatus::Compliant,
            confidence: 90,
            reasoning: format!(
                "Detector rule(s) {} passed on every applicable element",
                criterion.rules.join(", ")
            ),
            issues: Vec::new(),
            recommendations: Vec::new(),
            method: TestMethod::Automated,
        });
    }

    None
}

/// Outcome recorded when the classifier could not judge a criterion.
pub fn needs_review(criterion: &Criterion, reason: &str) -> CriterionResult {
    CriterionResult {
        criterion_id: criterion.id.to_string(),
        status: CriterionStatus::NeedsReview,
        confidence: 0,
        reasoning: reason.to_string(),
        issues: Vec::new(),
        recommendations: vec![format!("Review {} {} manually", criterion.id, criterion.title)],
        method: TestMethod::Fallback,
    }
}

/// Percentage of applicable criteria that are compliant.
///
/// `needs_review` counts as applicable and not compliant. A page with no
/// applicable criteria scores 100.
pub fn compliance_rate(results: &[CriterionResult]) -> f64 {
    let applicable = results
        .iter()
        .filter(|r| r.status != CriterionStatus::NotApplicable)
        .count();
    if applicable == 0 {
        return 100.0;
    }
    let compliant = results
        .iter()
        .filter(|r| r.status == CriterionStatus::Compliant)
        .count();
    compliant as f64 / applicable as f64 * 100.0
}

/// Arithmetic mean, `None` for an empty slice.
pub fn average(rates: &[f64]) -> Option<f64> {
    if rates.is_empty() {
        return None;
    }
    Some(rates.iter().sum::<f64>() / rates.len() as f64)
}

/// Page-count-weighted mean over templates that have a rate.
pub fn weighted_rate(templates: impl IntoIterator<Item = (u32, Option<f64>)>) -> Option<f64> {
    let mut weight = 0u64;
    let mut total = 0.0;
    for (pages, rate) in templates {
        if let Some(rate) = rate {
            weight += u64::from(pages);
            total += rate * f64::from(pages);
        }
    }
    if weight == 0 {
        return None;
    }
    Some(total / weight as f64)
}

/// Running set of distinct non-compliant criteria across a site.
#[derive(Debug, Clone, Default)]
pub struct RiskAccumulator {
    failing: BTreeSet<String>,
}

impl RiskAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, results: &[CriterionResult]) {
        for r in results {
            if r.status == CriterionStatus::NonCompliant {
                self.failing.insert(r.criterion_id.clone());
            }
        }
    }

    pub fn record_ids<I, S>(&mut self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.failing.extend(ids.into_iter().map(Into::into));
    }

    pub fn rollup(&self) -> RiskRollup {
        let mut by_level: HashMap<Level, u32> = HashMap::new();
        for id in &self.failing {
            if let Some(c) = find(id) {
                *by_level.entry(c.level).or_default() += 1;
            }
        }
        let level_a_failures = by_level.get(&Level::A).copied().unwrap_or(0);
        let level_aa_failures = by_level.get(&Level::AA).copied().unwrap_or(0);

        let risk_level = if level_a_failures >= 3 || self.failing.len() >= 6 {
            RiskLevel::High
        } else if self.failing.is_empty() {
            RiskLevel::Low
        } else {
            RiskLevel::Medium
        };

        RiskRollup {
            non_compliant_criteria: self.failing.iter().cloned().collect(),
            level_a_failures,
            level_aa_failures,
            risk_level,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(id: &str, status: CriterionStatus) -> CriterionResult {
        CriterionResult {
            criterion_id: id.to_string(),
            status,
            confidence: 80,
            reasoning: String::new(),
            issues: Vec::new(),
            recommendations: Vec::new(),
            method: TestMethod::Classifier,
        }
    }

    #[test]
    fn test_catalog_selectors_parse() {
        for c in CATALOG {
            for sel in c.applies_to {
                assert!(Selector::parse(sel).is_ok(), "{} selector {sel}", c.id);
            }
        }
    }

    #[test]
    fn test_rate_excludes_not_applicable() {
        let results = vec![
            result("1.1.1", CriterionStatus::Compliant),
            result("1.2.2", CriterionStatus::NotApplicable),
            result("2.4.2", CriterionStatus::NonCompliant),
            result("3.1.1", CriterionStatus::Compliant),
            result("4.1.2", CriterionStatus::NeedsReview),
        ];
        assert!((compliance_rate(&results) - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_rate_all_not_applicable() {
        let results = vec![result("1.2.2", CriterionStatus::NotApplicable)];
        assert_eq!(compliance_rate(&results), 100.0);
    }

    #[test]
    fn test_weighted_rate_skips_missing() {
        let rate = weighted_rate(vec![(3, Some(100.0)), (1, Some(60.0)), (10, None)]);
        assert!((rate.unwrap() - 90.0).abs() < 1e-9);
        assert_eq!(weighted_rate(vec![(5, None)]), None);
    }

    #[test]
    fn test_not_applicable_by_elements() {
        let na = not_applicable("<html><body><p>Hello</p></body></html>");
        assert!(na.contains("1.1.1"));
        assert!(na.contains("1.2.2"));
        assert!(!na.contains("2.4.2"));

        let na = not_applicable(r#"<html><body><img src="x.png"></body></html>"#);
        assert!(!na.contains("1.1.1"));
    }

    #[test]
    fn test_resolve_automated() {
        let c = find("1.1.1").unwrap();
        let v = Violation {
            rule_id: "image-alt".to_string(),
            description: "Images must have alternate text".to_string(),
            impact: "critical".to_string(),
            nodes: vec!["<img src=\"a.png\">".to_string()],
        };
        let r = resolve_automated(c, &[v], &BTreeSet::new()).unwrap();
        assert_eq!(r.status, CriterionStatus::NonCompliant);
        assert_eq!(r.method, TestMethod::Automated);

        let na: BTreeSet<&str> = ["1.1.1"].into_iter().collect();
        let r = resolve_automated(c, &[], &na).unwrap();
        assert_eq!(r.status, CriterionStatus::NotApplicable);

        // applicable and clean
        let r = resolve_automated(c, &[], &BTreeSet::new()).unwrap();
        assert_eq!(r.status, CriterionStatus::Compliant);
        assert_eq!(r.method, TestMethod::Automated);

        // contrast cannot be settled by the absence of a violation
        let contrast = find("1.4.3").unwrap();
        assert!(!contrast.decisive);
        assert!(resolve_automated(contrast, &[], &BTreeSet::new()).is_none());
    }

    #[test]
    fn test_clean_page_scores_on_decisive_criteria() {
        let html = r#"<html lang="en"><head><title>Home</title></head><body>
            <img src="a.png" alt="Logo"><a href="/about">About</a></body></html>"#;
        let na = not_applicable(html);
        let results: Vec<CriterionResult> = catalog()
            .iter()
            .map(|c| {
                resolve_automated(c, &[], &na).unwrap_or_else(|| needs_review(c, "no classifier"))
            })
            .collect();

        let compliant: Vec<&str> = results
            .iter()
            .filter(|r| r.status == CriterionStatus::Compliant)
            .map(|r| r.criterion_id.as_str())
            .collect();
        assert_eq!(compliant, vec!["1.1.1", "2.4.2", "2.4.4", "3.1.1"]);
        assert!(compliance_rate(&results) > 0.0);
    }

    #[test]
    fn test_risk_rollup_levels() {
        let mut acc = RiskAccumulator::new();
        assert_eq!(acc.rollup().risk_level, RiskLevel::Low);

        acc.record(&[
            result("1.4.3", CriterionStatus::NonCompliant),
            result("2.4.2", CriterionStatus::Compliant),
        ]);
        let r = acc.rollup();
        assert_eq!(r.risk_level, RiskLevel::Medium);
        assert_eq!(r.level_aa_failures, 1);

        acc.record_ids(["1.1.1", "2.4.2", "3.1.1", "1.1.1"]);
        let r = acc.rollup();
        assert_eq!(r.level_a_failures, 3);
        assert_eq!(r.non_compliant_criteria.len(), 4);
        assert_eq!(r.risk_level, RiskLevel::High);
    }
}
