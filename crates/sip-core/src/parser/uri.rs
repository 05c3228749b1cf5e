use nom::{
    branch::alt,
    bytes::complete::{take_till1, take_while1},
    character::complete::{char, digit1},
    combinator::{map, map_res, opt, recognize},
    sequence::{delimited, preceded, tuple},
    IResult,
};

use super::params::params;
use crate::error::{Error, Result};
use crate::types::param::Params;
use crate::types::uri::{Scheme, Uri};

fn is_host_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_')
}

/// `hostname`, `IPv4` or `[IPv6]` (brackets kept)
pub fn host(input: &str) -> IResult<&str, &str> {
    alt((
        recognize(delimited(char('['), take_till1(|c| c == ']'), char(']'))),
        take_while1(is_host_char),
    ))(input)
}

pub fn port(input: &str) -> IResult<&str, u16> {
    preceded(char(':'), map_res(digit1, |d: &str| d.parse::<u16>()))(input)
}

/// `host[:port]`
pub fn hostport(input: &str) -> IResult<&str, (&str, Option<u16>)> {
    tuple((host, opt(port)))(input)
}

fn host_params(input: &str) -> IResult<&str, ((&str, Option<u16>), Params)> {
    tuple((hostport, params))(input)
}

/// Parses a SIP, SIPS or tel URI; other schemes are kept opaque
pub fn parse_uri(input: &str) -> Result<Uri> {
    let text = input.trim();
    let colon = text
        .find(':')
        .ok_or_else(|| Error::InvalidUri(format!("missing scheme in '{}'", input)))?;
    let scheme_str = &text[..colon];
    if scheme_str.is_empty()
        || !scheme_str
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
    {
        return Err(Error::InvalidUri(format!("invalid scheme in '{}'", input)));
    }
    let rest = &text[colon + 1..];
    let scheme = Scheme::from_str_lossy(scheme_str);

    match scheme {
        Scheme::Sip | Scheme::Sips => {
            let (body, headers) = match rest.find('?') {
                Some(q) => (&rest[..q], Some(rest[q + 1..].to_string())),
                None => (rest, None),
            };
            let (user, hostpart) = match body.find('@') {
                Some(at) => (Some(body[..at].to_string()), &body[at + 1..]),
                None => (None, body),
            };
            if user.as_deref() == Some("") {
                return Err(Error::InvalidUri(format!("empty user part in '{}'", input)));
            }
            let ((host, port), params) = super::finish(hostpart, host_params(hostpart), "uri")
                .map_err(|e| Error::InvalidUri(e.to_string()))?;
            Ok(Uri {
                scheme,
                user,
                host: host.to_string(),
                port,
                params,
                headers,
            })
        }
        Scheme::Tel => {
            let parsed: IResult<&str, (&str, Params)> =
                tuple((take_till1(|c| c == ';'), params))(rest);
            let (number, params) = super::finish(rest, parsed, "tel uri")
                .map_err(|e| Error::InvalidUri(e.to_string()))?;
            Ok(Uri {
                scheme,
                user: None,
                host: number.to_string(),
                port: None,
                params,
                headers: None,
            })
        }
        Scheme::Other(_) => {
            if rest.is_empty() {
                return Err(Error::InvalidUri(format!("empty URI body in '{}'", input)));
            }
            Ok(Uri {
                scheme,
                user: None,
                host: rest.to_string(),
                port: None,
                params: Params::new(),
                headers: None,
            })
        }
    }
}
