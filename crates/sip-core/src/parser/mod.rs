//! nom-based parsers for the SIP wire format.
//!
//! Header values are kept as unfolded strings on the message and parsed
//! lazily by the typed accessors, so a malformed optional header never
//! prevents the rest of a message from being processed.

pub mod address;
pub mod message;
pub mod params;
pub mod uri;
pub mod utils;
pub mod via;

pub use message::parse_message;

/// RFC 3261 `token` character
pub fn is_token_char(b: u8) -> bool {
    b.is_ascii_alphanumeric()
        || matches!(
            b,
            b'-' | b'.' | b'!' | b'%' | b'*' | b'_' | b'+' | b'`' | b'\'' | b'~'
        )
}

/// Runs a nom parser to completion and converts failures to crate errors
pub(crate) fn finish<'a, O>(
    input: &'a str,
    result: nom::IResult<&'a str, O>,
    what: &str,
) -> crate::error::Result<O> {
    match result {
        Ok((rest, out)) if rest.trim().is_empty() => Ok(out),
        Ok((rest, _)) => Err(crate::error::Error::Parser(format!(
            "{}: unexpected trailing input '{}' in '{}'",
            what, rest, input
        ))),
        Err(e) => Err(crate::error::Error::Parser(format!(
            "{}: cannot parse '{}': {:?}",
            what, input, e
        ))),
    }
}
