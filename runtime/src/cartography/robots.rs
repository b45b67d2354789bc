//! Parse robots.txt into allow/disallow rules and declared sitemaps.

use regex::Regex;
use url::Url;

/// One `Allow` or `Disallow` line from the applicable group.
#[derive(Debug, Clone)]
struct Rule {
    allow: bool,
    pattern: String,
    matcher: Regex,
}

/// Rules that apply to one user agent.
#[derive(Debug, Clone, Default)]
pub struct RobotsRules {
    rules: Vec<Rule>,
    /// `Sitemap:` declarations, regardless of group.
    pub sitemaps: Vec<String>,
}

#[derive(Default)]
struct Group {
    agents: Vec<String>,
    rules: Vec<(bool, String)>,
}

/// Parse a robots.txt body for `agent`.
///
/// Groups naming `agent` (case-insensitive) win over `*` groups; when
/// several groups match, their rules are combined.
pub fn parse_robots(body: &str, agent: &str) -> RobotsRules {
    let agent = agent.to_ascii_lowercase();
    let mut groups: Vec<Group> = Vec::new();
    let mut sitemaps = Vec::new();
    let mut current = Group::default();
    let mut in_agent_lines = false;

    for raw in body.lines() {
        let line = raw.split('#').next().unwrap_or("").trim();
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();

        match key.as_str() {
            "user-agent" => {
                if !in_agent_lines && !current.agents.is_empty() {
                    groups.push(std::mem::take(&mut current));
                }
                current.agents.push(value.to_ascii_lowercase());
                in_agent_lines = true;
            }
            "allow" | "disallow" => {
                in_agent_lines = false;
                if current.agents.is_empty() || value.is_empty() {
                    continue;
                }
                current.rules.push((key == "allow", value.to_string()));
            }
            "sitemap" => {
                if !value.is_empty() {
                    sitemaps.push(value.to_string());
                }
            }
            _ => {
                in_agent_lines = false;
            }
        }
    }
    if !current.agents.is_empty() {
        groups.push(current);
    }

    let specific: Vec<&Group> = groups
        .iter()
        .filter(|g| {
            g.agents
                .iter()
                .any(|a| a.split('/').next().map(str::trim) == Some(agent.as_str()))
        })
        .collect();
    let chosen: Vec<&Group> = if specific.is_empty() {
        groups
            .iter()
            .filter(|g| g.agents.iter().any(|a| a == "*"))
            .collect()
    } else {
        specific
    };

    let rules = chosen
        .into_iter()
        .flat_map(|g| g.rules.iter())
        .filter_map(|(allow, pattern)| {
            compile_pattern(pattern).map(|matcher| Rule {
                allow: *allow,
                pattern: pattern.clone(),
                matcher,
            })
        })
        .collect();

    RobotsRules { rules, sitemaps }
}

fn compile_pattern(pattern: &str) -> Option<Regex> {
    let (body, anchored) = match pattern.strip_suffix('$') {
        Some(stripped) => (stripped, true),
        None => (pattern, false),
    };
    let mut re = String::from("^");
    for (i, part) in body.split('*').enumerate() {
        if i > 0 {
            re.push_str(".*");
        }
        re.push_str(&regex::escape(part));
    }
    if anchored {
        re.push('$');
    }
    Regex::new(&re).ok()
}

impl RobotsRules {
    /// Rules that allow everything.
    pub fn allow_all() -> Self {
        Self::default()
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Longest matching pattern decides; `Allow` wins ties.
    pub fn is_allowed(&self, path: &str) -> bool {
        let mut best: Option<(usize, bool)> = None;
        for rule in &self.rules {
            if !rule.matcher.is_match(path) {
                continue;
            }
            let len = rule.pattern.len();
            best = match best {
                Some((best_len, best_allow))
                    if best_len > len || (best_len == len && best_allow) =>
                {
                    Some((best_len, best_allow))
                }
                _ => Some((len, rule.allow)),
            };
        }
        best.map(|(_, allow)| allow).unwrap_or(true)
    }

    /// Check the path and query of an absolute URL.
    pub fn is_url_allowed(&self, url: &str) -> bool {
        match Url::parse(url) {
            Ok(u) => {
                let mut target = u.path().to_string();
                if let Some(q) = u.query() {
                    target.push('?');
                    target.push_str(q);
                }
                self.is_allowed(&target)
            }
            Err(_) => true,
        }
    }
}
