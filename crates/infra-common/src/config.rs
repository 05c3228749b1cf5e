//! TOML loading for configuration structs.

use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;

use crate::errors::context::ErrorExt;
use crate::errors::types::Result;

/// Parses a configuration struct from TOML text
pub fn from_toml_str<T: DeserializeOwned>(text: &str) -> Result<T> {
    Ok(toml::from_str(text)?)
}

/// Reads and parses a TOML configuration file
pub fn load_toml_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).with_context("config", format!("read {}", path.display()))?;
    from_toml_str(&text).with_context("config", format!("parse {}", path.display()))
}
