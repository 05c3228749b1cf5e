//! `multipart/*` bodies (RFC 2046 section 5.1).
//!
//! RCS INVITEs commonly carry `multipart/mixed` with an SDP part next to a
//! CPIM or resource-list part. Only framing is handled here; part contents
//! stay opaque.

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::parser::utils::{find_body_position, unfold_lines};
use crate::types::header::{Header, HeaderName};
use crate::types::media_type::MediaType;

/// A single body part
#[derive(Debug, Clone, PartialEq)]
pub struct MimePart {
    pub headers: Vec<Header>,
    pub content: Bytes,
}

impl MimePart {
    pub fn new(content_type: &str, content: impl Into<Bytes>) -> Self {
        MimePart {
            headers: vec![Header::raw(HeaderName::ContentType, content_type)],
            content: content.into(),
        }
    }

    pub fn content_type(&self) -> Option<MediaType> {
        self.headers
            .iter()
            .find(|h| h.name == HeaderName::ContentType)
            .and_then(|h| h.value.parse().ok())
    }
}

/// A parsed multipart body
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MultipartBody {
    pub boundary: String,
    pub parts: Vec<MimePart>,
}

impl MultipartBody {
    pub fn new(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
            parts: Vec::new(),
        }
    }

    pub fn add_part(&mut self, part: MimePart) {
        self.parts.push(part);
    }

    /// First part whose Content-Type matches `essence`
    pub fn part(&self, essence: &str) -> Option<&MimePart> {
        self.parts
            .iter()
            .find(|p| p.content_type().map(|ct| ct.is(essence)).unwrap_or(false))
    }

    /// Splits `body` on `--boundary` delimiters
    pub fn parse(boundary: &str, body: &[u8]) -> Result<Self> {
        if boundary.is_empty() {
            return Err(Error::InvalidBody("empty multipart boundary".to_string()));
        }
        let delimiter = format!("--{}", boundary).into_bytes();
        let mut result = MultipartBody::new(boundary);

        let mut pos = find(body, &delimiter, 0)
            .ok_or_else(|| Error::InvalidBody(format!("boundary '{}' not found", boundary)))?;

        loop {
            let after = pos + delimiter.len();
            if body[after..].starts_with(b"--") {
                break;
            }
            let line_end = find(body, b"\n", after)
                .ok_or_else(|| Error::InvalidBody("truncated multipart delimiter".to_string()))?;
            let part_start = line_end + 1;

            let mut close_delim = b"\r\n".to_vec();
            close_delim.extend_from_slice(&delimiter);
            let (part_end, next) = match find(body, &close_delim, part_start) {
                Some(i) => (i, i + 2),
                None => {
                    let mut lf_delim = b"\n".to_vec();
                    lf_delim.extend_from_slice(&delimiter);
                    let i = find(body, &lf_delim, part_start).ok_or_else(|| {
                        Error::InvalidBody(format!("unterminated part for boundary '{}'", boundary))
                    })?;
                    (i, i + 1)
                }
            };

            result.add_part(parse_part(&body[part_start..part_end])?);
            pos = next;
        }

        Ok(result)
    }

    /// Serializes the parts with CRLF framing
    pub fn to_bytes(&self) -> Bytes {
        let mut out = Vec::new();
        for part in &self.parts {
            out.extend_from_slice(format!("--{}\r\n", self.boundary).as_bytes());
            for h in &part.headers {
                out.extend_from_slice(format!("{}\r\n", h).as_bytes());
            }
            out.extend_from_slice(b"\r\n");
            out.extend_from_slice(&part.content);
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        Bytes::from(out)
    }
}

fn parse_part(raw: &[u8]) -> Result<MimePart> {
    if raw.starts_with(b"\r\n") || raw.starts_with(b"\n") {
        let skip = if raw.starts_with(b"\r\n") { 2 } else { 1 };
        return Ok(MimePart {
            headers: Vec::new(),
            content: Bytes::copy_from_slice(&raw[skip..]),
        });
    }
    let (head_len, sep_len) = find_body_position(raw).unwrap_or((raw.len(), 0));
    let head = std::str::from_utf8(&raw[..head_len])
        .map_err(|_| Error::InvalidBody("non UTF-8 part headers".to_string()))?;
    let mut headers = Vec::new();
    for line in unfold_lines(head) {
        if line.trim().is_empty() {
            continue;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| Error::InvalidBody(format!("bad part header '{}'", line)))?;
        headers.push(Header::new(name.parse()?, value.trim())?);
    }
    Ok(MimePart {
        headers,
        content: Bytes::copy_from_slice(&raw[(head_len + sep_len).min(raw.len())..]),
    })
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > haystack.len() || needle.is_empty() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|i| i + from)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SDP: &str = "v=0\r\no=- 1 1 IN IP4 10.0.0.1\r\ns=-\r\nc=IN IP4 10.0.0.1\r\nt=0 0\r\nm=message 20000 TCP/MSRP *";

    #[test]
    fn test_parse_two_parts() {
        let body = format!(
            "--b1\r\nContent-Type: application/sdp\r\nContent-Length: {}\r\n\r\n{}\r\n--b1\r\nContent-Type: message/cpim\r\n\r\nhello\r\n--b1--\r\n",
            SDP.len(),
            SDP
        );
        let mp = MultipartBody::parse("b1", body.as_bytes()).unwrap();
        assert_eq!(mp.parts.len(), 2);
        let sdp = mp.part("application/sdp").unwrap();
        assert_eq!(&sdp.content[..], SDP.as_bytes());
        assert_eq!(&mp.part("message/cpim").unwrap().content[..], b"hello");
    }

    #[test]
    fn test_to_bytes_parses_back() {
        let mut mp = MultipartBody::new("xyz");
        mp.add_part(MimePart::new("application/sdp", SDP));
        let reparsed = MultipartBody::parse("xyz", &mp.to_bytes()).unwrap();
        assert_eq!(reparsed.parts, mp.parts);
    }

    #[test]
    fn test_missing_boundary() {
        assert!(MultipartBody::parse("nope", b"--other\r\n\r\nx\r\n--other--").is_err());
    }
}
