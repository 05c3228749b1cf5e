//! # Session-Expires Header
//!
//! [RFC 4028](https://datatracker.ietf.org/doc/html/rfc4028) session timer.
//!
//! ```text
//! Session-Expires: 3600;refresher=uac
//! ```
//!
//! When no `refresher` parameter is present the UAC is assumed to refresh.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::param::Params;

/// Refresher entity for Session-Expires header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Refresher {
    /// User Agent Client refreshes the session
    Uac,
    /// User Agent Server refreshes the session
    Uas,
}

impl Refresher {
    pub fn as_str(&self) -> &'static str {
        match self {
            Refresher::Uac => "uac",
            Refresher::Uas => "uas",
        }
    }
}

impl fmt::Display for Refresher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed Session-Expires value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionExpires {
    pub delta_seconds: u32,
    pub refresher: Option<Refresher>,
    pub params: Params,
}

impl SessionExpires {
    pub fn new(delta_seconds: u32, refresher: Option<Refresher>) -> Self {
        SessionExpires {
            delta_seconds,
            refresher,
            params: Params::new(),
        }
    }

    /// Refresher role with the UAC default applied
    pub fn refresher_or_default(&self) -> Refresher {
        self.refresher.unwrap_or(Refresher::Uac)
    }
}

impl fmt::Display for SessionExpires {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.delta_seconds)?;
        if let Some(r) = self.refresher {
            write!(f, ";refresher={}", r)?;
        }
        write!(f, "{}", self.params)
    }
}

impl FromStr for SessionExpires {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (delta, rest) = match s.find(';') {
            Some(i) => (&s[..i], &s[i..]),
            None => (s, ""),
        };
        let delta_seconds = delta
            .trim()
            .parse::<u32>()
            .map_err(|_| Error::InvalidHeader(format!("Session-Expires: bad delta '{}'", s)))?;
        let mut params = crate::parser::params::parse_params(rest)?;
        let refresher = match params.remove("refresher").and_then(|p| p.value().map(str::to_string)) {
            Some(r) if r.eq_ignore_ascii_case("uac") => Some(Refresher::Uac),
            Some(r) if r.eq_ignore_ascii_case("uas") => Some(Refresher::Uas),
            Some(r) => {
                return Err(Error::InvalidHeader(format!(
                    "Session-Expires: unknown refresher '{}'",
                    r
                )))
            }
            None => None,
        };
        Ok(SessionExpires {
            delta_seconds,
            refresher,
            params,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_and_without_refresher() {
        let se: SessionExpires = "1800;refresher=uas".parse().unwrap();
        assert_eq!(se.delta_seconds, 1800);
        assert_eq!(se.refresher_or_default(), Refresher::Uas);

        let se: SessionExpires = "90".parse().unwrap();
        assert_eq!(se.refresher, None);
        assert_eq!(se.refresher_or_default(), Refresher::Uac);
        assert_eq!(se.to_string(), "90");
    }

    #[test]
    fn test_reject_bad_values() {
        assert!("abc".parse::<SessionExpires>().is_err());
        assert!("90;refresher=proxy".parse::<SessionExpires>().is_err());
    }
}
