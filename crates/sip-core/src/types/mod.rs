//! Typed SIP values.

pub mod address;
pub mod cseq;
pub mod header;
pub mod media_type;
pub mod method;
pub mod multipart;
pub mod param;
pub mod session_expires;
pub mod status;
pub mod uri;
pub mod via;

pub use address::NameAddr;
pub use cseq::CSeq;
pub use header::{Header, HeaderName};
pub use media_type::MediaType;
pub use method::Method;
pub use multipart::{MimePart, MultipartBody};
pub use param::{Param, Params};
pub use session_expires::{Refresher, SessionExpires};
pub use status::StatusCode;
pub use uri::{Scheme, Uri};
pub use via::{generate_branch, Via, BRANCH_MAGIC_COOKIE};
