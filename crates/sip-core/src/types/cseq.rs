use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::method::Method;

/// `CSeq: 4711 INVITE`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CSeq {
    pub seq: u64,
    pub method: Method,
}

impl CSeq {
    pub fn new(seq: u64, method: Method) -> Self {
        CSeq { seq, method }
    }
}

impl fmt::Display for CSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.seq, self.method)
    }
}

impl FromStr for CSeq {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split_whitespace();
        let seq = parts
            .next()
            .and_then(|n| n.parse::<u64>().ok())
            .ok_or_else(|| Error::InvalidHeader(format!("CSeq: bad sequence number in '{}'", s)))?;
        let method = parts
            .next()
            .ok_or_else(|| Error::InvalidHeader(format!("CSeq: missing method in '{}'", s)))?
            .parse()?;
        if parts.next().is_some() {
            return Err(Error::InvalidHeader(format!("CSeq: trailing data in '{}'", s)));
        }
        Ok(CSeq { seq, method })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cseq_parse() {
        let c: CSeq = " 314159 INVITE ".parse().unwrap();
        assert_eq!(c, CSeq::new(314159, Method::Invite));
        assert!("INVITE".parse::<CSeq>().is_err());
        assert!("1 INVITE x".parse::<CSeq>().is_err());
    }
}
