//! # rcs-sip-core
//!
//! SIP wire model used by the RCS protocol engine.
//!
//! - [`Message`], [`Request`] and [`Response`] with a nom based parser and a
//!   serializer that always writes a correct Content-Length
//! - typed values for the headers the engine reads or rewrites
//!   ([`Via`], [`NameAddr`], [`CSeq`], [`SessionExpires`], [`MediaType`])
//! - [`SipMessageExt`], the accessor trait exposing From/To/Call-ID/CSeq,
//!   bodies, SDP extraction and feature tags
//!
//! ```rust
//! use rcs_sip_core::prelude::*;
//!
//! let raw = b"OPTIONS sip:bob@example.com SIP/2.0\r\n\
//! Via: SIP/2.0/UDP 10.0.0.1:5062;branch=z9hG4bK74bf9\r\n\
//! From: <sip:alice@example.com>;tag=9fxced76sl\r\n\
//! To: <sip:bob@example.com>\r\n\
//! Call-ID: 3848276298220188511@10.0.0.1\r\n\
//! CSeq: 1 OPTIONS\r\n\
//! Content-Length: 0\r\n\r\n";
//!
//! let message = Message::parse(raw).unwrap();
//! assert_eq!(message.call_id(), Some("3848276298220188511@10.0.0.1"));
//! assert_eq!(message.from_tag().as_deref(), Some("9fxced76sl"));
//! assert_eq!(message.cseq_method(), Some(Method::Options));
//! ```

pub mod accessors;
pub mod error;
pub mod feature_tags;
pub mod ids;
pub mod message;
pub mod parser;
pub mod types;

pub use accessors::SipMessageExt;
pub use error::{Error, Result};
pub use feature_tags::{FEATURE_RCSE_IP_VIDEO_CALL, FEATURE_SIP_AUTOMATA, SIP_INSTANCE_PARAM};
pub use message::{Message, Request, Response, SIP_VERSION};
pub use parser::parse_message;
pub use types::*;

/// Commonly used types
pub mod prelude {
    pub use crate::accessors::SipMessageExt;
    pub use crate::error::{Error, Result};
    pub use crate::message::{Message, Request, Response};
    pub use crate::types::{
        CSeq, Header, HeaderName, MediaType, Method, MimePart, MultipartBody, NameAddr, Param,
        Params, Refresher, SessionExpires, StatusCode, Uri, Via,
    };
}
