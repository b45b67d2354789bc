//! Structural fingerprinting of rendered pages.
//!
//! A page is reduced to a content-independent skeleton: tag names, a small
//! allow-list of semantic attributes, and the first segment of the first
//! class token. Text, comments, and non-structural tags are dropped. The
//! skeleton is hashed with SHA-256, so pages that differ only in copy share
//! a fingerprint.

use scraper::node::Element;
use scraper::{ElementRef, Html};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

/// Tags dropped together with their whole subtree.
const EXCLUDED_TAGS: &[&str] = &[
    "script", "style", "meta", "link", "noscript", "template", "base",
];

/// Attributes kept in the skeleton when present, in emission order.
const RETAINED_ATTRS: &[&str] = &["role", "type", "scope", "aria-level"];

/// Characters that start a class modifier (`card--wide`, `nav__item`, `md:flex`).
const CLASS_MODIFIER_DELIMITERS: &[char] = &['-', '_', ':'];

/// Structural summary of a single page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageStructure {
    /// Hex-encoded SHA-256 of the skeleton.
    pub fingerprint: String,
    /// Unique root-to-node tag paths, e.g. `html>body>main>ul>li`.
    pub paths: BTreeSet<String>,
}

enum Visit<'a> {
    Open(ElementRef<'a>, String),
    Close(&'a str),
}

/// Parse `html` best-effort and compute its fingerprint and path set.
pub fn analyze(html: &str) -> PageStructure {
    let (skeleton, paths) = skeleton_and_paths(html);
    PageStructure {
        fingerprint: sha256_hex(&skeleton),
        paths,
    }
}

/// Fingerprint only.
pub fn fingerprint(html: &str) -> String {
    sha256_hex(&skeleton(html))
}

/// Skeleton string for `html`.
pub fn skeleton(html: &str) -> String {
    skeleton_and_paths(html).0
}

pub fn sha256_hex(s: &str) -> String {
    let mut h = Sha256::new();
    h.update(s.as_bytes());
    hex::encode(h.finalize())
}

fn skeleton_and_paths(html: &str) -> (String, BTreeSet<String>) {
    let document = Html::parse_document(html);
    let mut skeleton = String::with_capacity(html.len() / 4);
    let mut paths = BTreeSet::new();

    // Explicit stack instead of recursion: deep DOMs must not blow the stack.
    let mut stack = vec![Visit::Open(document.root_element(), String::new())];

    while let Some(visit) = stack.pop() {
        match visit {
            Visit::Close(name) => {
                skeleton.push_str("</");
                skeleton.push_str(name);
                skeleton.push('>');
            }
            Visit::Open(element, parent_path) => {
                let value = element.value();
                let name = value.name();
                if EXCLUDED_TAGS.contains(&name) {
                    continue;
                }

                write_open_tag(&mut skeleton, value);
                stack.push(Visit::Close(name));

                let path = if parent_path.is_empty() {
                    name.to_string()
                } else {
                    format!("{parent_path}>{name}")
                };

                let children: Vec<ElementRef<'_>> =
                    element.children().filter_map(ElementRef::wrap).collect();
                for child in children.into_iter().rev() {
                    stack.push(Visit::Open(child, path.clone()));
                }

                paths.insert(path);
            }
        }
    }

    (skeleton, paths)
}

fn write_open_tag(out: &mut String, element: &Element) {
    out.push('<');
    out.push_str(element.name());

    for attr in RETAINED_ATTRS {
        if let Some(value) = element.attr(attr) {
            out.push(' ');
            out.push_str(attr);
            out.push_str("=\"");
            out.push_str(&value.trim().to_ascii_lowercase());
            out.push('"');
        }
    }

    if let Some(class) = element.attr("class").and_then(structural_class) {
        out.push_str(" class=\"");
        out.push_str(class);
        out.push('"');
    }

    out.push('>');
}

/// First class token, cut at its first modifier delimiter.
pub fn structural_class(class_attr: &str) -> Option<&str> {
    let first = class_attr.split_whitespace().next()?;
    let segment = first
        .split(CLASS_MODIFIER_DELIMITERS)
        .next()
        .unwrap_or_default();
    if segment.is_empty() {
        None
    } else {
        Some(segment)
    }
}
