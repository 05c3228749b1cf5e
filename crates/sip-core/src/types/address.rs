//! Name-addr values used by From, To, Contact, Route and Record-Route.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::param::Params;
use crate::types::uri::Uri;

/// `["Display Name"] <uri>;param=value`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NameAddr {
    pub display_name: Option<String>,
    pub uri: Uri,
    pub params: Params,
}

impl NameAddr {
    pub fn new(uri: Uri) -> Self {
        NameAddr {
            display_name: None,
            uri,
            params: Params::new(),
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Value of the `tag` header parameter
    pub fn tag(&self) -> Option<&str> {
        self.params.get("tag")
    }

    pub fn set_tag(&mut self, tag: impl Into<String>) {
        self.params.set("tag", tag);
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.set_tag(tag);
        self
    }
}

impl fmt::Display for NameAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = &self.display_name {
            let name = name.trim_matches('"');
            write!(f, "\"{}\" ", name)?;
        }
        write!(f, "<{}>{}", self.uri, self.params)
    }
}

impl FromStr for NameAddr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        crate::parser::address::parse_name_addr(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_forms() {
        let a: NameAddr = r#""Alice" <sip:alice@example.com>;tag=1928"#.parse().unwrap();
        assert_eq!(a.display_name.as_deref(), Some("Alice"));
        assert_eq!(a.tag(), Some("1928"));

        let b: NameAddr = "Bob <sip:bob@example.com;transport=tcp>;expires=60".parse().unwrap();
        assert_eq!(b.display_name.as_deref(), Some("Bob"));
        assert_eq!(b.uri.transport(), Some("tcp"));
        assert_eq!(b.params.get("expires"), Some("60"));

        let c: NameAddr = "sip:carol@example.com;tag=abc".parse().unwrap();
        assert_eq!(c.tag(), Some("abc"));
        assert!(c.uri.params.is_empty());
    }

    #[test]
    fn test_display_always_brackets() {
        let c: NameAddr = "sip:carol@example.com;tag=abc".parse().unwrap();
        assert_eq!(c.to_string(), "<sip:carol@example.com>;tag=abc");
    }
}
