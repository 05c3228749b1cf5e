//! Content-Type values: `type/subtype;param=value`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::param::Params;

/// A media type with parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaType {
    pub mtype: String,
    pub subtype: String,
    pub params: Params,
}

impl MediaType {
    pub fn new(mtype: impl Into<String>, subtype: impl Into<String>) -> Self {
        MediaType {
            mtype: mtype.into(),
            subtype: subtype.into(),
            params: Params::new(),
        }
    }

    /// `type/subtype` without parameters
    pub fn essence(&self) -> String {
        format!("{}/{}", self.mtype, self.subtype)
    }

    pub fn is_multipart(&self) -> bool {
        self.mtype.eq_ignore_ascii_case("multipart")
    }

    /// Case-insensitive `type/subtype` comparison
    pub fn is(&self, essence: &str) -> bool {
        self.essence().eq_ignore_ascii_case(essence)
    }

    /// `boundary` parameter with quotes already removed
    pub fn boundary(&self) -> Option<&str> {
        self.params.get("boundary")
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}{}", self.mtype, self.subtype, self.params)
    }
}

impl FromStr for MediaType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (essence, rest) = match s.find(';') {
            Some(i) => (&s[..i], &s[i..]),
            None => (s, ""),
        };
        let (mtype, subtype) = essence
            .split_once('/')
            .map(|(t, st)| (t.trim(), st.trim()))
            .filter(|(t, st)| !t.is_empty() && !st.is_empty())
            .ok_or_else(|| Error::InvalidHeader(format!("Content-Type: bad media type '{}'", s)))?;
        Ok(MediaType {
            mtype: mtype.to_string(),
            subtype: subtype.to_string(),
            params: crate::parser::params::parse_params(rest)?,
        })
    }
}
