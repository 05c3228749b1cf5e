use nom::{
    bytes::complete::take_till,
    character::complete::{char, space0},
    sequence::{delimited, preceded},
    IResult,
};

use super::params::{params, quoted_string};
use crate::error::{Error, Result};
use crate::types::address::NameAddr;

fn angle_uri(input: &str) -> IResult<&str, &str> {
    delimited(char('<'), take_till(|c| c == '>'), char('>'))(input)
}

/// Parses `name-addr` or `addr-spec` followed by header parameters.
///
/// In the `addr-spec` form (no angle brackets) every `;param` after the URI
/// belongs to the header, per RFC 3261 section 20.10.
pub fn parse_name_addr(input: &str) -> Result<NameAddr> {
    let text = input.trim();

    let (display_name, uri_text, rest) = if let Ok((rest, name)) = quoted_string(text) {
        let (rest, _) = space0::<&str, nom::error::Error<&str>>(rest)
            .map_err(|_| Error::InvalidHeader(format!("bad address '{}'", input)))?;
        let (rest, uri) = angle_uri(rest)
            .map_err(|_| Error::InvalidHeader(format!("missing <uri> in '{}'", input)))?;
        (Some(name), uri, rest)
    } else if let Some(lt) = text.find('<') {
        let display = text[..lt].trim();
        let (rest, uri) = angle_uri(&text[lt..])
            .map_err(|_| Error::InvalidHeader(format!("unterminated <uri> in '{}'", input)))?;
        let display = if display.is_empty() {
            None
        } else {
            Some(display.to_string())
        };
        (display, uri, rest)
    } else {
        match text.find(';') {
            Some(semi) => (None, &text[..semi], &text[semi..]),
            None => (None, text, ""),
        }
    };

    let uri = uri_text.parse()?;
    let params = super::finish(rest, preceded(space0, params)(rest), "address parameters")
        .map_err(|e| Error::InvalidHeader(e.to_string()))?;

    Ok(NameAddr {
        display_name,
        uri,
        params,
    })
}
