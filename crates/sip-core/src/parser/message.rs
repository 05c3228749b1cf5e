use nom::{
    bytes::complete::{tag, take_till1, take_while1},
    character::complete::{digit1, space0, space1},
    combinator::{map_res, opt, recognize, rest},
    sequence::{preceded, tuple},
    IResult,
};

use bytes::Bytes;

use super::is_token_char;
use super::utils::{find_body_position, unfold_lines};
use crate::error::{Error, Result};
use crate::message::{Message, Request, Response};
use crate::types::header::{Header, HeaderName};
use crate::types::method::Method;
use crate::types::status::StatusCode;

fn version(input: &str) -> IResult<&str, &str> {
    preceded(tag("SIP/"), recognize(tuple((digit1, tag("."), digit1))))(input)
}

/// `METHOD SP Request-URI SP SIP-Version`
fn request_line(input: &str) -> IResult<&str, (&str, &str, &str)> {
    let (input, (method, _, uri, _, version)) = tuple((
        take_while1(|c: char| c.is_ascii() && is_token_char(c as u8)),
        space1,
        take_till1(|c: char| c == ' ' || c == '\t'),
        space1,
        version,
    ))(input)?;
    let (input, _) = space0(input)?;
    Ok((input, (method, uri, version)))
}

/// `SIP-Version SP Status-Code SP Reason-Phrase`
fn status_line(input: &str) -> IResult<&str, (&str, u16, Option<&str>)> {
    let (input, (version, _, code, reason)) = tuple((
        version,
        space1,
        map_res(digit1, |d: &str| d.parse::<u16>()),
        opt(preceded(space1, rest)),
    ))(input)?;
    Ok((input, (version, code, reason)))
}

fn header_line(line: &str) -> Result<Header> {
    let (name, value) = line
        .split_once(':')
        .ok_or_else(|| Error::InvalidHeader(format!("missing ':' in '{}'", line)))?;
    let name: HeaderName = name.parse()?;
    Header::new(name, value.trim())
}

/// Parses a complete SIP message from a datagram or a framed stream chunk.
///
/// Leading CRLFs (RFC 5626 keep-alives glued to the front of a message) are
/// skipped. When Content-Length is present the body is cut to that length;
/// a body shorter than announced is rejected.
pub fn parse_message(data: &[u8]) -> Result<Message> {
    let start = data
        .iter()
        .position(|b| *b != b'\r' && *b != b'\n')
        .ok_or_else(|| Error::InvalidFormat("empty message".to_string()))?;
    let data = &data[start..];

    let (head_len, sep_len) = find_body_position(data)
        .ok_or_else(|| Error::InvalidFormat("missing header terminator".to_string()))?;
    let head = std::str::from_utf8(&data[..head_len])
        .map_err(|_| Error::InvalidFormat("header section is not UTF-8".to_string()))?;
    let body_bytes = &data[head_len + sep_len..];

    let lines = unfold_lines(head);
    let mut iter = lines.iter();
    let start_line = iter
        .next()
        .ok_or_else(|| Error::InvalidFormat("missing start line".to_string()))?;

    let mut headers = Vec::new();
    for line in iter {
        if line.trim().is_empty() {
            continue;
        }
        headers.push(header_line(line)?);
    }

    let body = match headers.iter().find(|h| h.name == HeaderName::ContentLength) {
        Some(h) => {
            let len: usize = h
                .value
                .trim()
                .parse()
                .map_err(|_| Error::InvalidHeader(format!("Content-Length: '{}'", h.value)))?;
            if body_bytes.len() < len {
                return Err(Error::InvalidFormat(format!(
                    "body shorter than Content-Length ({} < {})",
                    body_bytes.len(),
                    len
                )));
            }
            Bytes::copy_from_slice(&body_bytes[..len])
        }
        None => Bytes::copy_from_slice(body_bytes),
    };
    headers.retain(|h| h.name != HeaderName::ContentLength);

    if start_line.starts_with("SIP/") {
        let (_, (version, code, reason)) = status_line(start_line)
            .map_err(|_| Error::InvalidFormat(format!("bad status line '{}'", start_line)))?;
        Ok(Message::Response(Response {
            version: format!("SIP/{}", version),
            status: StatusCode::from_u16(code)?,
            reason: reason.map(|r| r.trim().to_string()).filter(|r| !r.is_empty()),
            headers,
            body,
        }))
    } else {
        let (rest, (method, uri, version)) = request_line(start_line)
            .map_err(|_| Error::InvalidFormat(format!("bad request line '{}'", start_line)))?;
        if !rest.is_empty() {
            return Err(Error::InvalidFormat(format!("bad request line '{}'", start_line)));
        }
        if version != "2.0" {
            return Err(Error::InvalidVersion(version.to_string()));
        }
        let method: Method = method.parse()?;
        Ok(Message::Request(Request {
            method,
            uri: uri.parse()?,
            version: format!("SIP/{}", version),
            headers,
            body,
        }))
    }
}
