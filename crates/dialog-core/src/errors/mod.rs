//! Error types for dialog-core
//!
//! Failures of the engine fall into three categories that callers must be
//! able to tell apart:
//!
//! - **Initialization**: the stack could not be started (listening points,
//!   TLS material, proxy resolution). Fatal to startup.
//! - **Payload**: a message could not be built or parsed. Not retried by
//!   this layer.
//! - **Network**: the message was built but transport did not succeed, or
//!   there was no transaction to answer on. Retryable at a higher layer.
//!
//! A transaction timeout is not an error; it is reported through
//! [`SipTransactionContext::is_timeout`](crate::SipTransactionContext::is_timeout).

use thiserror::Error;

/// Boxed source error carried by every [`SipError`] variant
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type used throughout dialog-core
pub type Result<T> = std::result::Result<T, SipError>;

/// Errors raised by the SIP engine
#[derive(Error, Debug)]
pub enum SipError {
    /// The stack could not be initialized
    #[error("SIP stack initialization failed: {message}")]
    Initialization {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// A message could not be constructed or parsed
    #[error("SIP payload error: {message}")]
    Payload {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Transport failure or missing transaction
    #[error("SIP network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<BoxError>,
    },
}

impl SipError {
    pub fn initialization(message: impl Into<String>) -> Self {
        SipError::Initialization {
            message: message.into(),
            source: None,
        }
    }

    pub fn initialization_with(
        message: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        SipError::Initialization {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn payload(message: impl Into<String>) -> Self {
        SipError::Payload {
            message: message.into(),
            source: None,
        }
    }

    pub fn payload_with(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        SipError::Payload {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        SipError::Network {
            message: message.into(),
            source: None,
        }
    }

    pub fn network_with(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        SipError::Network {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Whether a higher layer may retry the operation (e.g. by re-registering)
    pub fn is_retryable(&self) -> bool {
        matches!(self, SipError::Network { .. })
    }

    /// The contextual message, without the category prefix
    pub fn message(&self) -> &str {
        match self {
            SipError::Initialization { message, .. }
            | SipError::Payload { message, .. }
            | SipError::Network { message, .. } => message,
        }
    }

    /// Returns a copy of this error's category with a prefixed message.
    ///
    /// Used at the interface boundary to say which call or dialog failed.
    pub fn context(self, context: impl std::fmt::Display) -> Self {
        match self {
            SipError::Initialization { message, source } => SipError::Initialization {
                message: format!("{}: {}", context, message),
                source,
            },
            SipError::Payload { message, source } => SipError::Payload {
                message: format!("{}: {}", context, message),
                source,
            },
            SipError::Network { message, source } => SipError::Network {
                message: format!("{}: {}", context, message),
                source,
            },
        }
    }
}

impl From<rcs_sip_core::Error> for SipError {
    fn from(err: rcs_sip_core::Error) -> Self {
        SipError::payload_with(err.to_string(), err)
    }
}

impl From<rcs_sip_transport::Error> for SipError {
    fn from(err: rcs_sip_transport::Error) -> Self {
        match err {
            // Bytes that never made it into a message are a payload problem
            rcs_sip_transport::Error::Parse(e) => SipError::from(e),
            other => SipError::network_with(other.to_string(), other),
        }
    }
}

impl From<rcs_infra_common::Error> for SipError {
    fn from(err: rcs_infra_common::Error) -> Self {
        SipError::initialization_with(err.to_string(), err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_categories_are_distinct() {
        let payload: SipError = rcs_sip_core::Error::InvalidUri("sip:".into()).into();
        assert!(matches!(payload, SipError::Payload { .. }));
        assert!(!payload.is_retryable());

        let network: SipError = rcs_sip_transport::Error::TransportClosed.into();
        assert!(matches!(network, SipError::Network { .. }));
        assert!(network.is_retryable());
        assert!(network.source().is_some());

        let parse: SipError = rcs_sip_transport::Error::Parse(
            rcs_sip_core::Error::InvalidFormat("bad".into()),
        )
        .into();
        assert!(matches!(parse, SipError::Payload { .. }));
    }

    #[test]
    fn test_context_keeps_category() {
        let err = SipError::network("No transaction found").context("call-id abc");
        assert!(matches!(err, SipError::Network { .. }));
        assert_eq!(err.message(), "call-id abc: No transaction found");
        assert_eq!(
            err.to_string(),
            "SIP network error: call-id abc: No transaction found"
        );
    }
}
