//! # Via Header
//!
//! `Via: SIP/2.0/UDP 10.0.0.1:5062;branch=z9hG4bK776asdhds;rport`
//!
//! The top Via carries the branch that identifies a transaction and the
//! transport the request was sent over. TCP fallback rewrites its transport
//! in place; [`Via::set_transport`] is therefore idempotent.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::param::Params;

/// RFC 3261 branch magic cookie
pub const BRANCH_MAGIC_COOKIE: &str = "z9hG4bK";

/// A single Via value
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Via {
    pub version: String,
    pub transport: String,
    pub host: String,
    pub port: Option<u16>,
    pub params: Params,
}

impl Via {
    /// Creates a `SIP/2.0/<transport>` Via with the given branch
    pub fn new(transport: &str, host: impl Into<String>, port: Option<u16>, branch: &str) -> Self {
        let mut params = Params::new();
        params.set("branch", branch);
        Via {
            version: "2.0".to_string(),
            transport: transport.to_ascii_uppercase(),
            host: host.into(),
            port,
            params,
        }
    }

    pub fn branch(&self) -> Option<&str> {
        self.params.get("branch")
    }

    pub fn set_branch(&mut self, branch: &str) {
        self.params.set("branch", branch);
    }

    /// Rewrites the transport token (stored upper-case)
    pub fn set_transport(&mut self, transport: &str) {
        self.transport = transport.to_ascii_uppercase();
    }

    /// Adds the `rport` flag (RFC 3581)
    pub fn set_rport(&mut self) {
        self.params.set_flag("rport");
    }

    pub fn received(&self) -> Option<&str> {
        self.params.get("received")
    }

    pub fn rport(&self) -> Option<u16> {
        self.params.get("rport").and_then(|p| p.parse().ok())
    }

    /// RFC 6223 `keep` parameter value, if present and numeric
    pub fn keep(&self) -> Option<&str> {
        self.params.get("keep")
    }

    /// True when the branch starts with the RFC 3261 magic cookie
    pub fn is_rfc3261_branch(&self) -> bool {
        self.branch()
            .map(|b| b.starts_with(BRANCH_MAGIC_COOKIE))
            .unwrap_or(false)
    }
}

impl fmt::Display for Via {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SIP/{}/{} {}", self.version, self.transport, self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        write!(f, "{}", self.params)
    }
}

impl FromStr for Via {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        crate::parser::via::parse_via(s)
    }
}

/// Generates a fresh RFC 3261 branch identifier
pub fn generate_branch() -> String {
    format!("{}{}", BRANCH_MAGIC_COOKIE, uuid::Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let via: Via = "SIP/2.0/udp 10.0.0.1:5062;branch=z9hG4bKabc;rport;keep=30"
            .parse()
            .unwrap();
        assert_eq!(via.transport, "UDP");
        assert_eq!(via.branch(), Some("z9hG4bKabc"));
        assert_eq!(via.keep(), Some("30"));
        assert!(via.is_rfc3261_branch());
        assert_eq!(
            via.to_string(),
            "SIP/2.0/UDP 10.0.0.1:5062;branch=z9hG4bKabc;rport;keep=30"
        );
    }

    #[test]
    fn test_ipv6_sent_by() {
        let via: Via = "SIP/2.0/TCP [2001:db8::5]:5062;branch=z9hG4bK1".parse().unwrap();
        assert_eq!(via.host, "[2001:db8::5]");
        assert_eq!(via.port, Some(5062));
    }

    #[test]
    fn test_generated_branch_has_cookie() {
        let b = generate_branch();
        assert!(b.starts_with(BRANCH_MAGIC_COOKIE));
        assert_ne!(b, generate_branch());
    }
}
