//! SIP requests, responses and the [`Message`] sum type.
//!
//! Headers are stored in wire order as name/value pairs. The typed view of a
//! header is produced on demand by the accessors in [`crate::accessors`].
//! Content-Length is never stored: serialization always writes the real
//! body length.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::header::{Header, HeaderName};
use crate::types::method::Method;
use crate::types::status::StatusCode;
use crate::types::uri::Uri;

pub const SIP_VERSION: &str = "SIP/2.0";

/// A SIP request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub method: Method,
    pub uri: Uri,
    pub version: String,
    pub headers: Vec<Header>,
    pub body: Bytes,
}

impl Request {
    pub fn new(method: Method, uri: Uri) -> Self {
        Request {
            method,
            uri,
            version: SIP_VERSION.to_string(),
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    /// Appends a header
    pub fn with_header(mut self, header: Header) -> Self {
        push_header(&mut self.headers, header);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = format!("{} {} {}\r\n", self.method, self.uri, self.version).into_bytes();
        write_headers_and_body(&mut out, &self.headers, &self.body);
        out
    }
}

/// A SIP response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub version: String,
    pub status: StatusCode,
    pub reason: Option<String>,
    pub headers: Vec<Header>,
    pub body: Bytes,
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Response {
            version: SIP_VERSION.to_string(),
            status,
            reason: None,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_header(mut self, header: Header) -> Self {
        push_header(&mut self.headers, header);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Explicit reason phrase, or the default one for the status code
    pub fn reason_phrase(&self) -> &str {
        self.reason
            .as_deref()
            .unwrap_or_else(|| self.status.reason_phrase())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = format!(
            "{} {} {}\r\n",
            self.version,
            self.status.as_u16(),
            self.reason_phrase()
        )
        .into_bytes();
        write_headers_and_body(&mut out, &self.headers, &self.body);
        out
    }
}

/// Either a request or a response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    Request(Request),
    Response(Response),
}

impl Message {
    pub fn is_request(&self) -> bool {
        matches!(self, Message::Request(_))
    }

    pub fn is_response(&self) -> bool {
        matches!(self, Message::Response(_))
    }

    pub fn as_request(&self) -> Option<&Request> {
        match self {
            Message::Request(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_response(&self) -> Option<&Response> {
        match self {
            Message::Response(r) => Some(r),
            _ => None,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Message::Request(r) => r.to_bytes(),
            Message::Response(r) => r.to_bytes(),
        }
    }

    /// Parses a message from raw bytes
    pub fn parse(data: &[u8]) -> Result<Self> {
        crate::parser::parse_message(data)
    }
}

impl From<Request> for Message {
    fn from(r: Request) -> Self {
        Message::Request(r)
    }
}

impl From<Response> for Message {
    fn from(r: Response) -> Self {
        Message::Response(r)
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.to_bytes()))
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.to_bytes()))
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Request(r) => r.fmt(f),
            Message::Response(r) => r.fmt(f),
        }
    }
}

pub(crate) fn push_header(headers: &mut Vec<Header>, header: Header) {
    if header.name != HeaderName::ContentLength {
        headers.push(header);
    }
}

fn write_headers_and_body(out: &mut Vec<u8>, headers: &[Header], body: &Bytes) {
    for h in headers {
        if h.name == HeaderName::ContentLength {
            continue;
        }
        out.extend_from_slice(h.name.as_str().as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(h.value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(format!("Content-Length: {}\r\n\r\n", body.len()).as_bytes());
    out.extend_from_slice(body);
}
