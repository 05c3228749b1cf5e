//! # SIP URIs
//!
//! `sip:` and `sips:` URIs per RFC 3261 section 19.1 and `tel:` URIs per
//! RFC 3966. Other schemes (`urn:`, `http:` ...) are kept as opaque text so
//! that they survive a round trip through a Contact or P-Asserted-Identity
//! header.
//!
//! IPv6 hosts are stored with their brackets, exactly as they appear on the
//! wire.
//!
//! ```rust
//! use rcs_sip_core::Uri;
//!
//! let mut uri: Uri = "sip:alice@10.0.0.1:5062;transport=udp".parse().unwrap();
//! uri.set_transport("tcp");
//! assert_eq!(uri.to_string(), "sip:alice@10.0.0.1:5062;transport=tcp");
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::param::{Param, Params};

/// URI scheme
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scheme {
    Sip,
    Sips,
    Tel,
    Other(String),
}

impl Scheme {
    pub fn as_str(&self) -> &str {
        match self {
            Scheme::Sip => "sip",
            Scheme::Sips => "sips",
            Scheme::Tel => "tel",
            Scheme::Other(s) => s.as_str(),
        }
    }

    pub(crate) fn from_str_lossy(s: &str) -> Scheme {
        match s.to_ascii_lowercase().as_str() {
            "sip" => Scheme::Sip,
            "sips" => Scheme::Sips,
            "tel" => Scheme::Tel,
            _ => Scheme::Other(s.to_string()),
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed URI
///
/// For `tel:` URIs `host` holds the number; for opaque schemes it holds
/// everything after the colon.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Uri {
    pub scheme: Scheme,
    pub user: Option<String>,
    pub host: String,
    pub port: Option<u16>,
    pub params: Params,
    pub headers: Option<String>,
}

impl Uri {
    /// `sip:host`
    pub fn sip(host: impl Into<String>) -> Self {
        Uri {
            scheme: Scheme::Sip,
            user: None,
            host: host.into(),
            port: None,
            params: Params::new(),
            headers: None,
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_param(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }

    pub fn is_sip(&self) -> bool {
        matches!(self.scheme, Scheme::Sip | Scheme::Sips)
    }

    /// Value of the `transport` parameter
    pub fn transport(&self) -> Option<&str> {
        self.params.get("transport")
    }

    /// Sets (or replaces) the `transport` parameter
    pub fn set_transport(&mut self, transport: &str) {
        self.params.set("transport", transport);
    }

    /// True when the host is a bracketed IPv6 literal
    pub fn is_ipv6_host(&self) -> bool {
        self.host.starts_with('[')
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.scheme)?;
        if let Some(user) = &self.user {
            write!(f, "{}@", user)?;
        }
        f.write_str(&self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        write!(f, "{}", self.params)?;
        if let Some(headers) = &self.headers {
            write!(f, "?{}", headers)?;
        }
        Ok(())
    }
}

impl FromStr for Uri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        crate::parser::uri::parse_uri(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_display() {
        let uri = Uri::sip("[::1]")
            .with_user("bob")
            .with_port(5062)
            .with_param(Param::flag("lr"));
        assert_eq!(uri.to_string(), "sip:bob@[::1]:5062;lr");
        assert!(uri.is_ipv6_host());
    }

    #[test]
    fn test_set_transport_is_idempotent() {
        let mut uri: Uri = "sip:proxy.example.com;lr;transport=udp".parse().unwrap();
        uri.set_transport("tcp");
        uri.set_transport("tcp");
        assert_eq!(uri.to_string(), "sip:proxy.example.com;lr;transport=tcp");
    }
}
