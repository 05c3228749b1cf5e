//! # SIP Status Codes
//!
//! Status codes as defined in
//! [RFC 3261 Section 21](https://datatracker.ietf.org/doc/html/rfc3261#section-21).
//!
//! - `1xx`: Provisional
//! - `2xx`: Success
//! - `3xx`: Redirection
//! - `4xx`: Client Error
//! - `5xx`: Server Error
//! - `6xx`: Global Failure
//!
//! ## Examples
//!
//! ```rust
//! use rcs_sip_core::StatusCode;
//!
//! let status = StatusCode::OK;
//! assert_eq!(status.as_u16(), 200);
//! assert_eq!(status.reason_phrase(), "OK");
//! assert!(status.is_success());
//! assert!(StatusCode::RINGING.is_provisional());
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A SIP response status code in the range 100..=699
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StatusCode(u16);

impl StatusCode {
    pub const TRYING: StatusCode = StatusCode(100);
    pub const RINGING: StatusCode = StatusCode(180);
    pub const SESSION_PROGRESS: StatusCode = StatusCode(183);
    pub const OK: StatusCode = StatusCode(200);
    pub const ACCEPTED: StatusCode = StatusCode(202);
    pub const BAD_REQUEST: StatusCode = StatusCode(400);
    pub const UNAUTHORIZED: StatusCode = StatusCode(401);
    pub const FORBIDDEN: StatusCode = StatusCode(403);
    pub const NOT_FOUND: StatusCode = StatusCode(404);
    pub const PROXY_AUTHENTICATION_REQUIRED: StatusCode = StatusCode(407);
    pub const REQUEST_TIMEOUT: StatusCode = StatusCode(408);
    pub const INTERVAL_TOO_BRIEF: StatusCode = StatusCode(423);
    pub const TEMPORARILY_UNAVAILABLE: StatusCode = StatusCode(480);
    pub const CALL_OR_TRANSACTION_DOES_NOT_EXIST: StatusCode = StatusCode(481);
    pub const BUSY_HERE: StatusCode = StatusCode(486);
    pub const REQUEST_TERMINATED: StatusCode = StatusCode(487);
    pub const NOT_ACCEPTABLE_HERE: StatusCode = StatusCode(488);
    pub const SESSION_INTERVAL_TOO_SMALL: StatusCode = StatusCode(422);
    pub const SERVER_INTERNAL_ERROR: StatusCode = StatusCode(500);
    pub const SERVICE_UNAVAILABLE: StatusCode = StatusCode(503);
    pub const DECLINE: StatusCode = StatusCode(603);

    /// Creates a status code, rejecting values outside 100..=699
    pub fn from_u16(code: u16) -> Result<Self> {
        if (100..=699).contains(&code) {
            Ok(StatusCode(code))
        } else {
            Err(Error::InvalidStatusCode(code))
        }
    }

    pub fn as_u16(&self) -> u16 {
        self.0
    }

    /// Default reason phrase for the code
    pub fn reason_phrase(&self) -> &'static str {
        match self.0 {
            100 => "Trying",
            180 => "Ringing",
            181 => "Call Is Being Forwarded",
            182 => "Queued",
            183 => "Session Progress",
            200 => "OK",
            202 => "Accepted",
            300 => "Multiple Choices",
            301 => "Moved Permanently",
            302 => "Moved Temporarily",
            400 => "Bad Request",
            401 => "Unauthorized",
            403 => "Forbidden",
            404 => "Not Found",
            405 => "Method Not Allowed",
            406 => "Not Acceptable",
            407 => "Proxy Authentication Required",
            408 => "Request Timeout",
            415 => "Unsupported Media Type",
            420 => "Bad Extension",
            422 => "Session Interval Too Small",
            423 => "Interval Too Brief",
            480 => "Temporarily Unavailable",
            481 => "Call/Transaction Does Not Exist",
            486 => "Busy Here",
            487 => "Request Terminated",
            488 => "Not Acceptable Here",
            491 => "Request Pending",
            500 => "Server Internal Error",
            501 => "Not Implemented",
            503 => "Service Unavailable",
            504 => "Server Time-out",
            600 => "Busy Everywhere",
            603 => "Decline",
            604 => "Does Not Exist Anywhere",
            606 => "Not Acceptable",
            _ => match self.0 / 100 {
                1 => "Provisional",
                2 => "Success",
                3 => "Redirection",
                4 => "Client Error",
                5 => "Server Error",
                _ => "Global Failure",
            },
        }
    }

    /// 1xx
    pub fn is_provisional(&self) -> bool {
        (100..200).contains(&self.0)
    }

    /// 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.0)
    }

    /// Any code >= 200
    pub fn is_final(&self) -> bool {
        self.0 >= 200
    }

    /// 4xx, 5xx or 6xx
    pub fn is_error(&self) -> bool {
        self.0 >= 400
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for StatusCode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let code = s
            .trim()
            .parse::<u16>()
            .map_err(|_| Error::InvalidFormat(format!("Invalid status code: {}", s)))?;
        StatusCode::from_u16(code)
    }
}

impl TryFrom<u16> for StatusCode {
    type Error = Error;

    fn try_from(code: u16) -> Result<Self> {
        StatusCode::from_u16(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(StatusCode::TRYING.is_provisional());
        assert!(!StatusCode::TRYING.is_final());
        assert!(StatusCode::OK.is_final());
        assert!(StatusCode::from_u16(299).unwrap().is_success());
        assert!(!StatusCode::from_u16(300).unwrap().is_success());
        assert!(StatusCode::BUSY_HERE.is_error());
    }

    #[test]
    fn test_range_checked() {
        assert!(StatusCode::from_u16(99).is_err());
        assert!(StatusCode::from_u16(700).is_err());
        assert_eq!("486".parse::<StatusCode>().unwrap(), StatusCode::BUSY_HERE);
        assert_eq!(StatusCode::from_u16(499).unwrap().reason_phrase(), "Client Error");
    }
}
