//! Robots.txt parsing.
//!
//! Allow/disallow checks are delegated to the `robotstxt` crate. Crawl
//! delays are parsed by hand, the crate does not expose them.

use robotstxt::DefaultMatcher;

/// A parsed robots.txt record for one host.
#[derive(Debug, Clone, Default)]
pub struct RobotsRecord {
    /// Raw robots.txt content; empty means allow everything.
    content: String,

    /// Crawl delays in seconds, keyed by lowercased user agent. The
    /// wildcard group is stored under `*`.
    delays: Vec<(String, f64)>,
}

impl RobotsRecord {
    /// Parses raw robots.txt content.
    pub fn parse(content: &str) -> Self {
        Self {
            delays: parse_delays(content),
            content: content.to_string(),
        }
    }

    /// Returns a permissive record that allows everything.
    ///
    /// Used when robots.txt cannot be fetched, an absent robots.txt means
    /// no restrictions.
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Checks whether `url` may be fetched by `user_agent`.
    pub fn is_allowed(&self, url: &str, user_agent: &str) -> bool {
        if self.content.is_empty() {
            return true;
        }

        let mut matcher = DefaultMatcher::default();
        matcher.one_agent_allowed_by_robots(&self.content, user_agent, url)
    }

    /// Returns the crawl delay for `user_agent` in seconds.
    ///
    /// The most specific agent group wins; the wildcard group is the
    /// fallback.
    pub fn crawl_delay(&self, user_agent: &str) -> Option<f64> {
        let agent = user_agent.to_lowercase();
        let mut wildcard = None;

        for (group, delay) in &self.delays {
            if group == "*" {
                wildcard = Some(*delay);
            } else if agent.contains(group.as_str()) || group.contains(agent.as_str()) {
                return Some(*delay);
            }
        }

        wildcard
    }
}

/// Extracts per-agent crawl delays.
///
/// A `Crawl-delay` line applies to every user agent named by the directly
/// preceding run of `User-agent` lines.
fn parse_delays(content: &str) -> Vec<(String, f64)> {
    let mut delays = Vec::new();
    let mut agents: Vec<String> = Vec::new();
    let mut in_group_body = false;

    for line in content.lines() {
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }

        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_lowercase();
        let value = value.trim();

        match key.as_str() {
            "user-agent" => {
                if in_group_body {
                    agents.clear();
                    in_group_body = false;
                }
                agents.push(value.to_lowercase());
            }
            "crawl-delay" => {
                in_group_body = true;
                if let Ok(delay) = value.parse::<f64>() {
                    if delay >= 0.0 {
                        for agent in &agents {
                            delays.push((agent.clone(), delay));
                        }
                    }
                }
            }
            _ => {
                in_group_body = true;
            }
        }
    }

    delays
}
