use nom::{
    branch::alt,
    bytes::complete::take_while1,
    character::complete::{char, space0},
    combinator::{map, opt},
    error::{Error as NomError, ErrorKind},
    multi::many0,
    sequence::{preceded, tuple},
    IResult,
};

use super::is_token_char;
use crate::types::param::{Param, Params};

fn is_param_name_char(c: char) -> bool {
    c.is_ascii() && is_token_char(c as u8)
}

fn is_param_value_char(c: char) -> bool {
    !matches!(
        c,
        ';' | ',' | '?' | '<' | '>' | '"' | ' ' | '\t' | '\r' | '\n'
    )
}

/// `"..."` with backslash escapes; returns the unescaped content
pub fn quoted_string(input: &str) -> IResult<&str, String> {
    let (rest, _) = char('"')(input)?;
    let mut out = String::new();
    let mut chars = rest.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '"' => return Ok((&rest[i + 1..], out)),
            '\\' => match chars.next() {
                Some((_, escaped)) => out.push(escaped),
                None => break,
            },
            other => out.push(other),
        }
    }
    Err(nom::Err::Error(NomError::new(input, ErrorKind::Char)))
}

/// `name[=value]` where value is a token-like run or a quoted string
pub fn param(input: &str) -> IResult<&str, Param> {
    let (input, name) = take_while1(is_param_name_char)(input)?;
    let (input, value) = opt(preceded(
        tuple((space0, char('='), space0)),
        alt((
            map(quoted_string, |v| (v, true)),
            map(take_while1(is_param_value_char), |v: &str| {
                (v.to_string(), false)
            }),
        )),
    ))(input)?;

    let param = match value {
        Some((v, true)) => Param::quoted(name, v),
        Some((v, false)) => Param::new(name, v),
        None => Param::flag(name),
    };
    Ok((input, param))
}

/// Zero or more `;param` entries
pub fn params(input: &str) -> IResult<&str, Params> {
    map(
        many0(preceded(tuple((space0, char(';'), space0)), param)),
        Params::from,
    )(input)
}

/// Parses a standalone `;a=b;c` string (leading `;` optional)
pub fn parse_params(input: &str) -> crate::error::Result<Params> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Ok(Params::new());
    }
    let owned;
    let text = if trimmed.starts_with(';') {
        trimmed
    } else {
        owned = format!(";{}", trimmed);
        owned.as_str()
    };
    super::finish(text, params(text), "parameters")
}
