//! Operator scope
//!
//! Decides which targets are in bounds for testing. Supports URL
//! prefixes, domain matching, regexes and IP ranges.

use std::net::IpAddr;
use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Scope definition: include patterns minus exclude patterns
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Scope {
    /// Include patterns (targets that ARE in scope)
    pub include: Vec<ScopePattern>,
    /// Exclude patterns (targets that are NOT in scope)
    pub exclude: Vec<ScopePattern>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_include(&mut self, pattern: ScopePattern) {
        self.include.push(pattern);
    }

    pub fn add_exclude(&mut self, pattern: ScopePattern) {
        self.exclude.push(pattern);
    }

    /// Add a target URL; everything under its origin becomes in scope
    pub fn add_target_url(&mut self, url: &str) -> Result<(), ScopeError> {
        self.include.push(ScopePattern::from_url(url)?);
        Ok(())
    }

    pub fn add_target_domain(&mut self, domain: &str, include_subdomains: bool) {
        self.include.push(ScopePattern::domain(domain, include_subdomains));
    }

    /// Check if a target is in scope
    ///
    /// Excludes win over includes; an empty include list means nothing is
    /// in scope.
    pub fn is_in_scope(&self, target: &str) -> bool {
        let target = Target::parse(target);

        if self.exclude.iter().any(|p| p.matches_target(&target)) {
            return false;
        }

        self.include.iter().any(|p| p.matches_target(&target))
    }

    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    /// Validate every pattern (used after loading from configuration)
    pub fn validate(&self) -> Result<(), ScopeError> {
        for pattern in self.include.iter().chain(self.exclude.iter()) {
            pattern.validate()?;
        }
        Ok(())
    }

    pub fn summary(&self) -> String {
        format!(
            "{} include, {} exclude patterns",
            self.include.len(),
            self.exclude.len()
        )
    }
}

/// A parsed match target
struct Target<'a> {
    raw: &'a str,
    host: Option<String>,
}

impl<'a> Target<'a> {
    fn parse(raw: &'a str) -> Self {
        let host = Url::parse(raw)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.trim_matches(['[', ']']).to_lowercase()));
        Self { raw, host }
    }
}

/// A pattern for matching URLs/domains
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ScopePattern {
    /// Match exact URL
    ExactUrl { url: String },
    /// Match URL prefix
    UrlPrefix { prefix: String },
    /// Match domain (with optional subdomain matching)
    Domain {
        domain: String,
        include_subdomains: bool,
    },
    /// Match using regex pattern
    Regex { pattern: String },
    /// Match IP address or CIDR range
    IpRange { cidr: String },
    /// Match any path under a base URL (case-insensitive)
    BaseUrl { base: String },
}

impl ScopePattern {
    /// Base-URL pattern covering the scheme, host and port of `url`
    pub fn from_url(url: &str) -> Result<Self, ScopeError> {
        let parsed = Url::parse(url).map_err(|e| ScopeError::InvalidUrl(e.to_string()))?;

        let base = match parsed.port() {
            Some(port) => format!("{}://{}:{}", parsed.scheme(), parsed.host_str().unwrap_or(""), port),
            None => format!("{}://{}", parsed.scheme(), parsed.host_str().unwrap_or("")),
        };

        Ok(ScopePattern::BaseUrl { base })
    }

    pub fn domain(domain: &str, include_subdomains: bool) -> Self {
        ScopePattern::Domain {
            domain: domain.to_lowercase(),
            include_subdomains,
        }
    }

    pub fn regex(pattern: &str) -> Result<Self, ScopeError> {
        Regex::new(pattern).map_err(|e| ScopeError::InvalidRegex(e.to_string()))?;
        Ok(ScopePattern::Regex {
            pattern: pattern.to_string(),
        })
    }

    pub fn ip_range(cidr: &str) -> Result<Self, ScopeError> {
        parse_cidr(cidr).ok_or_else(|| ScopeError::InvalidCidr(cidr.to_string()))?;
        Ok(ScopePattern::IpRange {
            cidr: cidr.to_string(),
        })
    }

    fn validate(&self) -> Result<(), ScopeError> {
        match self {
            ScopePattern::Regex { pattern } => Self::regex(pattern).map(|_| ()),
            ScopePattern::IpRange { cidr } => Self::ip_range(cidr).map(|_| ()),
            _ => Ok(()),
        }
    }

    /// Check if this pattern matches a URL
    pub fn matches(&self, url: &str) -> bool {
        self.matches_target(&Target::parse(url))
    }

    fn matches_target(&self, target: &Target<'_>) -> bool {
        match self {
            ScopePattern::ExactUrl { url } => target.raw == url,

            ScopePattern::UrlPrefix { prefix } => target.raw.starts_with(prefix.as_str()),

            ScopePattern::Domain {
                domain,
                include_subdomains,
            } => match &target.host {
                Some(host) if *include_subdomains => {
                    host == domain || host.ends_with(&format!(".{}", domain))
                }
                Some(host) => host == domain,
                None => false,
            },

            ScopePattern::Regex { pattern } => Regex::new(pattern)
                .map(|re| re.is_match(target.raw))
                .unwrap_or(false),

            ScopePattern::IpRange { cidr } => target
                .host
                .as_deref()
                .map(|host| match_ip_range(host, cidr))
                .unwrap_or(false),

            ScopePattern::BaseUrl { base } => target
                .raw
                .to_lowercase()
                .starts_with(&base.to_lowercase()),
        }
    }
}

/// Parse `ip` or `ip/prefix` into the network address and prefix length
fn parse_cidr(cidr: &str) -> Option<(IpAddr, u8)> {
    match cidr.split_once('/') {
        Some((ip, prefix)) => {
            let ip = IpAddr::from_str(ip).ok()?;
            let prefix: u8 = prefix.parse().ok()?;
            let max = if ip.is_ipv4() { 32 } else { 128 };
            (prefix <= max).then_some((ip, prefix))
        }
        None => {
            let ip = IpAddr::from_str(cidr).ok()?;
            let prefix = if ip.is_ipv4() { 32 } else { 128 };
            Some((ip, prefix))
        }
    }
}

/// Check if a host (which must be a literal IP) is inside a CIDR range
fn match_ip_range(host: &str, cidr: &str) -> bool {
    let Ok(host_ip) = IpAddr::from_str(host) else {
        return false;
    };
    let Some((network_ip, prefix_len)) = parse_cidr(cidr) else {
        return false;
    };

    match (host_ip, network_ip) {
        (IpAddr::V4(host_v4), IpAddr::V4(network_v4)) => {
            let mask = if prefix_len == 0 { 0 } else { !0u32 << (32 - prefix_len) };
            (u32::from(host_v4) & mask) == (u32::from(network_v4) & mask)
        }
        (IpAddr::V6(host_v6), IpAddr::V6(network_v6)) => {
            let mask = if prefix_len == 0 { 0 } else { !0u128 << (128 - prefix_len) };
            (u128::from(host_v6) & mask) == (u128::from(network_v6) & mask)
        }
        _ => false,
    }
}

/// Scope definition errors
#[derive(Error, Debug, Clone)]
pub enum ScopeError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Invalid regex: {0}")]
    InvalidRegex(String),
    #[error("Invalid CIDR: {0}")]
    InvalidCidr(String),
}
