//! Proxy data models

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Shape of a plain `IPv4:port` endpoint
static ENDPOINT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{1,3}(?:\.\d{1,3}){3}:\d{2,5}$").expect("Invalid endpoint regex")
});

/// Proxy protocol family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolKind {
    Http,
    Https,
    Socks4,
    Socks5,
}

impl ProtocolKind {
    /// Every protocol, in the order single-shot checks try them
    pub const ALL: [ProtocolKind; 4] = [
        ProtocolKind::Http,
        ProtocolKind::Https,
        ProtocolKind::Socks4,
        ProtocolKind::Socks5,
    ];

    pub fn scheme(&self) -> &'static str {
        match self {
            ProtocolKind::Http => "http",
            ProtocolKind::Https => "https",
            ProtocolKind::Socks4 => "socks4",
            ProtocolKind::Socks5 => "socks5",
        }
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme())
    }
}

/// Protocol selection from the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ProtocolFilter {
    Http,
    Https,
    Socks4,
    Socks5,
    #[default]
    All,
}

impl ProtocolFilter {
    /// The ordered protocol list probed for this filter
    pub fn protocols(&self) -> Vec<ProtocolKind> {
        match self {
            ProtocolFilter::Http | ProtocolFilter::Https => {
                vec![ProtocolKind::Http, ProtocolKind::Https]
            }
            ProtocolFilter::Socks4 => vec![ProtocolKind::Socks4],
            ProtocolFilter::Socks5 => vec![ProtocolKind::Socks5],
            ProtocolFilter::All => ProtocolKind::ALL.to_vec(),
        }
    }
}

/// An endpoint string (`address:port`) to be validated as a proxy.
///
/// Candidates are opaque: malformed ones are not rejected up front, they just
/// never validate.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Candidate(String);

impl Candidate {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self(endpoint.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Proxy URL for routing through this candidate with `protocol`
    pub fn url(&self, protocol: ProtocolKind) -> String {
        format!("{}://{}", protocol, self.0)
    }

    /// Whether this looks like `IPv4:port` (2 to 5 port digits)
    pub fn has_endpoint_shape(&self) -> bool {
        ENDPOINT_REGEX.is_match(&self.0)
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Candidate {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Candidate {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Definitive result of probing one candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeOutcome {
    #[serde(rename = "proxy")]
    pub candidate: Candidate,
    pub valid: bool,
    #[serde(rename = "type")]
    pub protocol: Option<ProtocolKind>,
}

impl ProbeOutcome {
    pub fn valid(candidate: Candidate, protocol: ProtocolKind) -> Self {
        Self {
            candidate,
            valid: true,
            protocol: Some(protocol),
        }
    }

    pub fn invalid(candidate: Candidate) -> Self {
        Self {
            candidate,
            valid: false,
            protocol: None,
        }
    }

    /// The `protocol://address:port` entry recorded for a valid outcome
    pub fn entry(&self) -> Option<String> {
        match self.protocol {
            Some(protocol) if self.valid => Some(self.candidate.url(protocol)),
            _ => None,
        }
    }
}
