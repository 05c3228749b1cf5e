use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Common SIP header names
///
/// Header names are case-insensitive in SIP. Parsing normalizes both the long
/// and compact forms (RFC 3261 section 7.3.3 and the compact forms registered
/// by later RFCs) to a single variant, so `a` and `Accept-Contact` compare equal.
///
/// # Examples
///
/// ```rust
/// use rcs_sip_core::HeaderName;
/// use std::str::FromStr;
///
/// assert_eq!(HeaderName::from_str("f").unwrap(), HeaderName::From);
/// assert_eq!(HeaderName::from_str("a").unwrap(), HeaderName::AcceptContact);
/// assert_eq!(HeaderName::from_str("x").unwrap(), HeaderName::SessionExpires);
/// assert_eq!(
///     HeaderName::from_str("X-Custom").unwrap(),
///     HeaderName::Other("X-Custom".to_string())
/// );
/// ```
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
pub enum HeaderName {
    CallId,
    Contact,
    ContentLength,
    ContentType,
    CSeq,
    From,
    MaxForwards,
    To,
    Via,
    Allow,
    Authorization,
    Expires,
    MinExpires,
    RecordRoute,
    Route,
    Supported,
    Require,
    UserAgent,
    Server,
    Event,
    Subject,
    Accept,
    AcceptContact,
    RejectContact,
    RequestDisposition,
    ReferTo,
    ReferredBy,
    ProxyAuthenticate,
    ProxyAuthorization,
    WwwAuthenticate,
    Reason,
    Warning,
    SessionExpires,
    MinSE,
    ServiceRoute,
    Path,
    PAssertedIdentity,
    PPreferredIdentity,
    PAccessNetworkInfo,
    ContentEncoding,
    /// Any other header, original spelling preserved
    Other(String),
}

impl HeaderName {
    /// Canonical wire spelling
    pub fn as_str(&self) -> &str {
        match self {
            HeaderName::CallId => "Call-ID",
            HeaderName::Contact => "Contact",
            HeaderName::ContentLength => "Content-Length",
            HeaderName::ContentType => "Content-Type",
            HeaderName::CSeq => "CSeq",
            HeaderName::From => "From",
            HeaderName::MaxForwards => "Max-Forwards",
            HeaderName::To => "To",
            HeaderName::Via => "Via",
            HeaderName::Allow => "Allow",
            HeaderName::Authorization => "Authorization",
            HeaderName::Expires => "Expires",
            HeaderName::MinExpires => "Min-Expires",
            HeaderName::RecordRoute => "Record-Route",
            HeaderName::Route => "Route",
            HeaderName::Supported => "Supported",
            HeaderName::Require => "Require",
            HeaderName::UserAgent => "User-Agent",
            HeaderName::Server => "Server",
            HeaderName::Event => "Event",
            HeaderName::Subject => "Subject",
            HeaderName::Accept => "Accept",
            HeaderName::AcceptContact => "Accept-Contact",
            HeaderName::RejectContact => "Reject-Contact",
            HeaderName::RequestDisposition => "Request-Disposition",
            HeaderName::ReferTo => "Refer-To",
            HeaderName::ReferredBy => "Referred-By",
            HeaderName::ProxyAuthenticate => "Proxy-Authenticate",
            HeaderName::ProxyAuthorization => "Proxy-Authorization",
            HeaderName::WwwAuthenticate => "WWW-Authenticate",
            HeaderName::Reason => "Reason",
            HeaderName::Warning => "Warning",
            HeaderName::SessionExpires => "Session-Expires",
            HeaderName::MinSE => "Min-SE",
            HeaderName::ServiceRoute => "Service-Route",
            HeaderName::Path => "Path",
            HeaderName::PAssertedIdentity => "P-Asserted-Identity",
            HeaderName::PPreferredIdentity => "P-Preferred-Identity",
            HeaderName::PAccessNetworkInfo => "P-Access-Network-Info",
            HeaderName::ContentEncoding => "Content-Encoding",
            HeaderName::Other(name) => name.as_str(),
        }
    }
}

impl PartialEq for HeaderName {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (HeaderName::Other(a), HeaderName::Other(b)) => a.eq_ignore_ascii_case(b),
            (a, b) => std::mem::discriminant(a) == std::mem::discriminant(b),
        }
    }
}

impl std::hash::Hash for HeaderName {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        match self {
            HeaderName::Other(name) => name.to_ascii_lowercase().hash(state),
            known => std::mem::discriminant(known).hash(state),
        }
    }
}

impl fmt::Display for HeaderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HeaderName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let name = s.trim();
        if name.is_empty() || !name.bytes().all(crate::parser::is_token_char) {
            return Err(Error::InvalidHeader(format!("Invalid header name: '{}'", s)));
        }
        let parsed = match name.to_ascii_lowercase().as_str() {
            "call-id" | "i" => HeaderName::CallId,
            "contact" | "m" => HeaderName::Contact,
            "content-length" | "l" => HeaderName::ContentLength,
            "content-type" | "c" => HeaderName::ContentType,
            "content-encoding" | "e" => HeaderName::ContentEncoding,
            "cseq" => HeaderName::CSeq,
            "from" | "f" => HeaderName::From,
            "max-forwards" => HeaderName::MaxForwards,
            "to" | "t" => HeaderName::To,
            "via" | "v" => HeaderName::Via,
            "allow" => HeaderName::Allow,
            "authorization" => HeaderName::Authorization,
            "expires" => HeaderName::Expires,
            "min-expires" => HeaderName::MinExpires,
            "record-route" => HeaderName::RecordRoute,
            "route" => HeaderName::Route,
            "supported" | "k" => HeaderName::Supported,
            "require" => HeaderName::Require,
            "user-agent" => HeaderName::UserAgent,
            "server" => HeaderName::Server,
            "event" | "o" => HeaderName::Event,
            "subject" | "s" => HeaderName::Subject,
            "accept" => HeaderName::Accept,
            "accept-contact" | "a" => HeaderName::AcceptContact,
            "reject-contact" | "j" => HeaderName::RejectContact,
            "request-disposition" | "d" => HeaderName::RequestDisposition,
            "refer-to" | "r" => HeaderName::ReferTo,
            "referred-by" | "b" => HeaderName::ReferredBy,
            "proxy-authenticate" => HeaderName::ProxyAuthenticate,
            "proxy-authorization" => HeaderName::ProxyAuthorization,
            "www-authenticate" => HeaderName::WwwAuthenticate,
            "reason" => HeaderName::Reason,
            "warning" => HeaderName::Warning,
            "session-expires" | "x" => HeaderName::SessionExpires,
            "min-se" => HeaderName::MinSE,
            "service-route" => HeaderName::ServiceRoute,
            "path" => HeaderName::Path,
            "p-asserted-identity" => HeaderName::PAssertedIdentity,
            "p-preferred-identity" => HeaderName::PPreferredIdentity,
            "p-access-network-info" => HeaderName::PAccessNetworkInfo,
            _ => HeaderName::Other(name.to_string()),
        };
        Ok(parsed)
    }
}

/// A single header line: name plus raw (unfolded) value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub name: HeaderName,
    pub value: String,
}

impl Header {
    /// Creates a header, rejecting values that would break message framing
    pub fn new(name: HeaderName, value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if value.contains('\r') || value.contains('\n') {
            return Err(Error::InvalidHeader(format!(
                "{}: value contains a line break",
                name
            )));
        }
        Ok(Header { name, value })
    }

    /// Builds a header from trusted parts without validation
    pub(crate) fn raw(name: HeaderName, value: impl Into<String>) -> Self {
        Header {
            name,
            value: value.into(),
        }
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compact_forms_normalize() {
        assert_eq!("i".parse::<HeaderName>().unwrap(), HeaderName::CallId);
        assert_eq!("A".parse::<HeaderName>().unwrap(), HeaderName::AcceptContact);
        assert_eq!("CALL-ID".parse::<HeaderName>().unwrap(), HeaderName::CallId);
        assert_eq!("Min-SE".parse::<HeaderName>().unwrap(), HeaderName::MinSE);
    }

    #[test]
    fn test_other_names_compare_case_insensitively() {
        let a = HeaderName::Other("X-Foo".to_string());
        let b: HeaderName = "x-foo".parse().unwrap();
        assert_eq!(a, b);
        assert_eq!(b.as_str(), "x-foo");
    }

    #[test]
    fn test_header_value_rejects_line_breaks() {
        assert!(Header::new(HeaderName::Subject, "hello\r\nVia: evil").is_err());
        assert!(Header::new(HeaderName::Subject, "hello").is_ok());
    }
}
