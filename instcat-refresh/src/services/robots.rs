//! robots.txt rules
//!
//! Supports `User-agent` groups, `Allow`/`Disallow` with `*` and `$`
//! wildcards, and `Crawl-delay`. The most specific (longest) matching rule
//! decides; on a tie `Allow` wins. A missing or empty rule set allows
//! everything.

use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
struct Rule {
    allow: bool,
    pattern: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Group {
    agents: Vec<String>,
    rules: Vec<Rule>,
    crawl_delay: Option<Duration>,
}

/// Parsed robots.txt for one origin
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RobotsRules {
    groups: Vec<Group>,
}

impl RobotsRules {
    /// Rules that permit every path
    pub fn allow_all() -> Self {
        Self::default()
    }

    pub fn parse(text: &str) -> Self {
        let mut groups: Vec<Group> = Vec::new();
        let mut current: Option<Group> = None;

        for raw_line in text.lines() {
            let line = match raw_line.find('#') {
                Some(idx) => &raw_line[..idx],
                None => raw_line,
            }
            .trim();
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim();

            match key.as_str() {
                "user-agent" => {
                    // Consecutive User-agent lines share one group
                    let starts_new = current
                        .as_ref()
                        .map(|g| !g.rules.is_empty() || g.crawl_delay.is_some())
                        .unwrap_or(true);
                    if starts_new {
                        if let Some(group) = current.take() {
                            groups.push(group);
                        }
                        current = Some(Group::default());
                    }
                    if let Some(group) = current.as_mut() {
                        group.agents.push(value.to_ascii_lowercase());
                    }
                }
                "allow" | "disallow" => {
                    let Some(group) = current.as_mut() else {
                        continue;
                    };
                    // An empty Disallow permits everything
                    if value.is_empty() {
                        continue;
                    }
                    group.rules.push(Rule {
                        allow: key == "allow",
                        pattern: value.to_string(),
                    });
                }
                "crawl-delay" => {
                    if let (Some(group), Ok(secs)) = (current.as_mut(), value.parse::<f64>()) {
                        // NaN fails the comparison; values past Duration's range saturate
                        if secs >= 0.0 {
                            group.crawl_delay =
                                Some(Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX));
                        }
                    }
                }
                _ => {}
            }
        }

        if let Some(group) = current {
            groups.push(group);
        }

        Self { groups }
    }

    /// Group that applies to `user_agent`: the longest matching agent token,
    /// else the `*` group
    fn group_for(&self, user_agent: &str) -> Option<&Group> {
        let product = user_agent
            .split('/')
            .next()
            .unwrap_or(user_agent)
            .trim()
            .to_ascii_lowercase();

        let mut best: Option<(&Group, usize)> = None;
        for group in &self.groups {
            for agent in &group.agents {
                if agent != "*" && !agent.is_empty() && product.contains(agent.as_str()) {
                    if best.map(|(_, len)| agent.len() > len).unwrap_or(true) {
                        best = Some((group, agent.len()));
                    }
                }
            }
        }

        best.map(|(g, _)| g).or_else(|| {
            self.groups
                .iter()
                .find(|g| g.agents.iter().any(|a| a == "*"))
        })
    }

    /// Whether `user_agent` may fetch `path` (path plus optional query)
    pub fn is_allowed(&self, user_agent: &str, path: &str) -> bool {
        let Some(group) = self.group_for(user_agent) else {
            return true;
        };

        let mut decision: Option<(usize, bool)> = None;
        for rule in &group.rules {
            if !pattern_matches(&rule.pattern, path) {
                continue;
            }
            let specificity = rule.pattern.len();
            decision = match decision {
                Some((len, allow)) if specificity < len => Some((len, allow)),
                Some((len, allow)) if specificity == len => Some((len, allow || rule.allow)),
                _ => Some((specificity, rule.allow)),
            };
        }

        decision.map(|(_, allow)| allow).unwrap_or(true)
    }

    pub fn crawl_delay(&self, user_agent: &str) -> Option<Duration> {
        self.group_for(user_agent).and_then(|g| g.crawl_delay)
    }
}

/// Match a robots path pattern (`*` any run, trailing `$` anchors the end)
fn pattern_matches(pattern: &str, path: &str) -> bool {
    let (pattern, anchored) = match pattern.strip_suffix('$') {
        Some(p) => (p, true),
        None => (pattern, false),
    };

    let parts: Vec<&str> = pattern.split('*').collect();
    let first = parts[0];
    if !path.starts_with(first) {
        return false;
    }
    if parts.len() == 1 {
        return !anchored || path.len() == first.len();
    }

    let mut pos = first.len();
    let last_index = parts.len() - 1;
    for (i, part) in parts.iter().enumerate().skip(1) {
        if i == last_index && anchored {
            return path.len() >= pos + part.len() && path.ends_with(part);
        }
        match path[pos..].find(part) {
            Some(idx) => pos += idx + part.len(),
            None => return false,
        }
    }
    true
}
