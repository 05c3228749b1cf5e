//! Typed read/write access shared by every message type.
//!
//! [`SipMessageExt`] only needs access to the header list and the body; all
//! other methods are provided. Typed getters parse on demand and return
//! `None` when the header is missing or malformed.

use std::collections::HashSet;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::message::{Message, Request, Response};
use crate::parser::utils::split_top_level;
use crate::types::address::NameAddr;
use crate::types::cseq::CSeq;
use crate::types::header::{Header, HeaderName};
use crate::types::media_type::MediaType;
use crate::types::method::Method;
use crate::types::multipart::MultipartBody;
use crate::types::session_expires::{Refresher, SessionExpires};
use crate::types::via::Via;

/// Header and body accessors for SIP messages
pub trait SipMessageExt {
    fn headers(&self) -> &[Header];
    fn headers_mut(&mut self) -> &mut Vec<Header>;
    fn body(&self) -> &Bytes;
    fn set_body(&mut self, body: Bytes);

    /// Value of the first header with this name
    fn header(&self, name: &HeaderName) -> Option<&str> {
        self.headers()
            .iter()
            .find(|h| &h.name == name)
            .map(|h| h.value.as_str())
    }

    /// Values of every header line with this name, in wire order
    fn header_values(&self, name: &HeaderName) -> Vec<&str> {
        self.headers()
            .iter()
            .filter(|h| &h.name == name)
            .map(|h| h.value.as_str())
            .collect()
    }

    /// Every comma separated element across all lines with this name
    fn header_list(&self, name: &HeaderName) -> Vec<&str> {
        self.header_values(name)
            .into_iter()
            .flat_map(|v| split_top_level(v, ','))
            .collect()
    }

    /// Replaces all headers with this name by a single one
    fn set_header(&mut self, name: HeaderName, value: impl Into<String>) -> Result<()>
    where
        Self: Sized,
    {
        let header = Header::new(name, value)?;
        let name = header.name.clone();
        let headers = self.headers_mut();
        match headers.iter().position(|h| h.name == name) {
            Some(pos) => {
                headers[pos] = header;
                let mut idx = 0usize;
                headers.retain(|h| {
                    let keep = idx <= pos || h.name != name;
                    idx += 1;
                    keep
                });
            }
            None => headers.push(header),
        }
        Ok(())
    }

    /// Appends a header line after any existing ones
    fn push_header(&mut self, name: HeaderName, value: impl Into<String>) -> Result<()>
    where
        Self: Sized,
    {
        let header = Header::new(name, value)?;
        crate::message::push_header(self.headers_mut(), header);
        Ok(())
    }

    /// Inserts a header line in front of existing ones with the same name
    fn prepend_header(&mut self, name: HeaderName, value: impl Into<String>) -> Result<()>
    where
        Self: Sized,
    {
        let header = Header::new(name, value)?;
        let headers = self.headers_mut();
        let pos = headers
            .iter()
            .position(|h| h.name == header.name)
            .unwrap_or(headers.len());
        headers.insert(pos, header);
        Ok(())
    }

    fn remove_header(&mut self, name: &HeaderName) -> usize {
        let headers = self.headers_mut();
        let before = headers.len();
        headers.retain(|h| &h.name != name);
        before - headers.len()
    }

    /// Sets a header from raw name and value.
    ///
    /// A name or value that does not parse is logged and ignored; the
    /// message is left untouched.
    fn add_header(&mut self, name: &str, value: &str)
    where
        Self: Sized,
    {
        let parsed = name
            .parse::<HeaderName>()
            .and_then(|n| self.set_header(n, value.trim()));
        if let Err(e) = parsed {
            warn!("Can't add SIP header {}: {}", name, e);
        }
    }

    fn call_id(&self) -> Option<&str> {
        self.header(&HeaderName::CallId).map(str::trim)
    }

    fn cseq(&self) -> Option<CSeq> {
        self.header(&HeaderName::CSeq)?.parse().ok()
    }

    fn cseq_number(&self) -> Option<u64> {
        self.cseq().map(|c| c.seq)
    }

    fn cseq_method(&self) -> Option<Method> {
        self.cseq().map(|c| c.method)
    }

    fn from_header(&self) -> Option<NameAddr> {
        self.header(&HeaderName::From)?.parse().ok()
    }

    fn from_uri(&self) -> Option<String> {
        self.from_header().map(|a| a.uri.to_string())
    }

    fn from_tag(&self) -> Option<String> {
        self.from_header().and_then(|a| a.tag().map(str::to_string))
    }

    fn to_header(&self) -> Option<NameAddr> {
        self.header(&HeaderName::To)?.parse().ok()
    }

    fn to_uri(&self) -> Option<String> {
        self.to_header().map(|a| a.uri.to_string())
    }

    fn to_tag(&self) -> Option<String> {
        self.to_header().and_then(|a| a.tag().map(str::to_string))
    }

    /// First Contact address
    fn contact(&self) -> Option<NameAddr> {
        self.header_list(&HeaderName::Contact)
            .into_iter()
            .next()?
            .parse()
            .ok()
    }

    fn contact_uri(&self) -> Option<String> {
        self.contact().map(|c| c.uri.to_string())
    }

    /// All Via values, top first
    fn vias(&self) -> Vec<Via> {
        self.header_list(&HeaderName::Via)
            .into_iter()
            .filter_map(|v| v.parse().ok())
            .collect()
    }

    fn top_via(&self) -> Option<Via> {
        self.header_list(&HeaderName::Via)
            .into_iter()
            .next()?
            .parse()
            .ok()
    }

    /// Replaces the top Via value, keeping any further values intact
    fn set_top_via(&mut self, via: &Via) -> Result<()>
    where
        Self: Sized,
    {
        let headers = self.headers_mut();
        let idx = headers
            .iter()
            .position(|h| h.name == HeaderName::Via)
            .ok_or_else(|| Error::MissingHeader("Via".to_string()))?;
        let rest: Vec<String> = split_top_level(&headers[idx].value, ',')
            .into_iter()
            .skip(1)
            .map(str::to_string)
            .collect();
        let mut value = via.to_string();
        for r in rest {
            value.push_str(", ");
            value.push_str(&r);
        }
        headers[idx] = Header::new(HeaderName::Via, value)?;
        Ok(())
    }

    fn routes(&self) -> Vec<NameAddr> {
        self.header_list(&HeaderName::Route)
            .into_iter()
            .filter_map(|v| v.parse().ok())
            .collect()
    }

    fn record_routes(&self) -> Vec<NameAddr> {
        self.header_list(&HeaderName::RecordRoute)
            .into_iter()
            .filter_map(|v| v.parse().ok())
            .collect()
    }

    fn expires(&self) -> Option<u32> {
        self.header(&HeaderName::Expires)?.trim().parse().ok()
    }

    fn min_expires(&self) -> Option<u32> {
        self.header(&HeaderName::MinExpires)?.trim().parse().ok()
    }

    /// Min-SE value in seconds
    fn min_session_expire(&self) -> Option<u32> {
        let value = self.header(&HeaderName::MinSE)?;
        let delta = value.split(';').next().unwrap_or(value);
        delta.trim().parse().ok()
    }

    fn session_expires(&self) -> Option<SessionExpires> {
        self.header(&HeaderName::SessionExpires)?.parse().ok()
    }

    /// Session-Expires delta in seconds
    fn session_timer_expire(&self) -> Option<u32> {
        self.session_expires().map(|s| s.delta_seconds)
    }

    /// Refresher role; UAC when unspecified or when the header is absent
    fn session_timer_refresher(&self) -> Refresher {
        self.session_expires()
            .map(|s| s.refresher_or_default())
            .unwrap_or(Refresher::Uac)
    }

    fn content_type(&self) -> Option<MediaType> {
        self.header(&HeaderName::ContentType)?.parse().ok()
    }

    fn content_length(&self) -> usize {
        self.body().len()
    }

    /// Body as text, `None` when empty
    fn content(&self) -> Option<String> {
        let body = self.body();
        if body.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(body).into_owned())
        }
    }

    /// Body bytes, `None` when empty
    fn raw_content(&self) -> Option<&[u8]> {
        let body = self.body();
        if body.is_empty() {
            None
        } else {
            Some(&body[..])
        }
    }

    /// The SDP offer/answer carried by the message.
    ///
    /// For `multipart/*` bodies the `application/sdp` part is returned as-is;
    /// for an `application/sdp` body the whole body is returned.
    fn sdp_content(&self) -> Option<String> {
        let content_type = self.content_type()?;
        if content_type.is_multipart() {
            let boundary = content_type.boundary()?;
            match MultipartBody::parse(boundary, self.body()) {
                Ok(multipart) => multipart
                    .part("application/sdp")
                    .map(|p| String::from_utf8_lossy(&p.content).into_owned()),
                Err(e) => {
                    debug!("Can't parse multipart body: {}", e);
                    None
                }
            }
        } else if content_type.is("application/sdp") {
            self.content()
        } else {
            None
        }
    }

    fn feature_tags(&self) -> HashSet<String> {
        crate::feature_tags::extract_feature_tags(self)
    }

    fn subject(&self) -> Option<&str> {
        self.header(&HeaderName::Subject)
    }
}

impl SipMessageExt for Request {
    fn headers(&self) -> &[Header] {
        &self.headers
    }
    fn headers_mut(&mut self) -> &mut Vec<Header> {
        &mut self.headers
    }
    fn body(&self) -> &Bytes {
        &self.body
    }
    fn set_body(&mut self, body: Bytes) {
        self.body = body;
    }
}

impl SipMessageExt for Response {
    fn headers(&self) -> &[Header] {
        &self.headers
    }
    fn headers_mut(&mut self) -> &mut Vec<Header> {
        &mut self.headers
    }
    fn body(&self) -> &Bytes {
        &self.body
    }
    fn set_body(&mut self, body: Bytes) {
        self.body = body;
    }
}

impl SipMessageExt for Message {
    fn headers(&self) -> &[Header] {
        match self {
            Message::Request(r) => &r.headers,
            Message::Response(r) => &r.headers,
        }
    }
    fn headers_mut(&mut self) -> &mut Vec<Header> {
        match self {
            Message::Request(r) => &mut r.headers,
            Message::Response(r) => &mut r.headers,
        }
    }
    fn body(&self) -> &Bytes {
        match self {
            Message::Request(r) => &r.body,
            Message::Response(r) => &r.body,
        }
    }
    fn set_body(&mut self, body: Bytes) {
        match self {
            Message::Request(r) => r.body = body,
            Message::Response(r) => r.body = body,
        }
    }
}
