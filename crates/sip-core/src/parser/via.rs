use nom::{
    bytes::complete::{tag_no_case, take_while1},
    character::complete::{char, space0, space1},
    sequence::{delimited, tuple},
    IResult,
};

use super::is_token_char;
use super::params::params;
use super::uri::hostport;
use crate::error::{Error, Result};
use crate::types::via::Via;

fn token(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii() && is_token_char(c as u8))(input)
}

fn slash(input: &str) -> IResult<&str, char> {
    delimited(space0, char('/'), space0)(input)
}

/// `SIP / 2.0 / UDP host:port;params`
pub fn parse_via(input: &str) -> Result<Via> {
    let text = input.trim();
    let parsed = tuple((
        tag_no_case("SIP"),
        slash,
        token,
        slash,
        token,
        space1,
        hostport,
        params,
    ))(text);
    let (_, _, version, _, transport, _, (host, port), params) =
        super::finish(text, parsed, "via").map_err(|e| Error::InvalidHeader(e.to_string()))?;

    Ok(Via {
        version: version.to_string(),
        transport: transport.to_ascii_uppercase(),
        host: host.to_string(),
        port,
        params,
    })
}
