//! # SIP Parameters
//!
//! Parameters attach additional information to URIs and header values:
//!
//! - URI parameters (e.g., `sip:user@example.com;transport=tcp`)
//! - Header field parameters (e.g., `Contact: <sip:bob@192.0.2.4>;expires=60`)
//!
//! A parameter remembers whether its value was quoted on the wire so that
//! feature tags such as `+g.3gpp.icsi-ref="urn%3A..."` serialize back unchanged.
//! [`Param::value`] always returns the unquoted value.
//!
//! ## Examples
//!
//! ```rust
//! use rcs_sip_core::{Param, Params};
//!
//! let mut params = Params::new();
//! params.push(Param::flag("lr"));
//! params.set("transport", "tcp");
//! params.push(Param::quoted("+sip.instance", "<urn:uuid:1234>"));
//! assert_eq!(params.to_string(), ";lr;transport=tcp;+sip.instance=\"<urn:uuid:1234>\"");
//! assert_eq!(params.get("transport"), Some("tcp"));
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// A single `name[=value]` parameter
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    value: Option<String>,
    quoted: bool,
}

impl Param {
    /// A parameter without value, like `lr`
    pub fn flag(name: impl Into<String>) -> Self {
        Param {
            name: name.into(),
            value: None,
            quoted: false,
        }
    }

    /// A token-valued parameter, like `transport=udp`
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Param {
            name: name.into(),
            value: Some(value.into()),
            quoted: false,
        }
    }

    /// A quoted-string parameter, like `text="Busy Here"`
    pub fn quoted(name: impl Into<String>, value: impl Into<String>) -> Self {
        Param {
            name: name.into(),
            value: Some(value.into()),
            quoted: true,
        }
    }

    /// Unquoted value, if any
    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    pub fn is_quoted(&self) -> bool {
        self.quoted
    }

    /// Case-insensitive name comparison
    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.value, self.quoted) {
            (None, _) => f.write_str(&self.name),
            (Some(v), true) => {
                write!(f, "{}=\"", self.name)?;
                for c in v.chars() {
                    if c == '"' || c == '\\' {
                        f.write_str("\\")?;
                    }
                    write!(f, "{}", c)?;
                }
                f.write_str("\"")
            }
            (Some(v), false) => write!(f, "{}={}", self.name, v),
        }
    }
}

/// An ordered parameter list, serialized as `;a;b=c`
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Params(Vec<Param>);

impl Params {
    pub fn new() -> Self {
        Params(Vec::new())
    }

    pub fn push(&mut self, param: Param) {
        self.0.push(param);
    }

    /// Finds a parameter by name (case-insensitive)
    pub fn find(&self, name: &str) -> Option<&Param> {
        self.0.iter().find(|p| p.is(name))
    }

    /// Unquoted value of a parameter; `None` for absent parameters and flags
    pub fn get(&self, name: &str) -> Option<&str> {
        self.find(name).and_then(|p| p.value())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    /// Replaces the value of an existing parameter in place or appends a new one
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.0.iter_mut().find(|p| p.is(name)) {
            Some(existing) => {
                existing.value = Some(value);
                existing.quoted = false;
            }
            None => self.0.push(Param::new(name, value)),
        }
    }

    /// Adds a flag parameter unless one with that name already exists
    pub fn set_flag(&mut self, name: &str) {
        if !self.contains(name) {
            self.0.push(Param::flag(name));
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Param> {
        let pos = self.0.iter().position(|p| p.is(name))?;
        Some(self.0.remove(pos))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Param> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<Param>> for Params {
    fn from(params: Vec<Param>) -> Self {
        Params(params)
    }
}

impl<'a> IntoIterator for &'a Params {
    type Item = &'a Param;
    type IntoIter = std::slice::Iter<'a, Param>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for p in &self.0 {
            write!(f, ";{}", p)?;
        }
        Ok(())
    }
}
