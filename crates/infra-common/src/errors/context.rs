use std::fmt;

use crate::errors::types::Error;

/// Context information for an error
#[derive(Debug, Clone)]
pub struct ErrorContext {
    /// Component where the error occurred
    pub component: String,
    /// Operation that was being performed
    pub operation: String,
    /// Additional context information
    pub details: Option<String>,
}

impl ErrorContext {
    pub fn new<S: Into<String>, T: Into<String>>(component: S, operation: T) -> Self {
        ErrorContext {
            component: component.into(),
            operation: operation.into(),
            details: None,
        }
    }

    /// Add details to the context
    pub fn with_details<S: Into<String>>(mut self, details: S) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.component, self.operation)?;
        if let Some(details) = &self.details {
            write!(f, " ({})", details)?;
        }
        Ok(())
    }
}

/// Attaches an [`ErrorContext`] to errors on their way up
pub trait ErrorExt<T> {
    fn context(self, ctx: ErrorContext) -> Result<T, Error>;

    fn with_context<S: Into<String>, U: Into<String>>(
        self,
        component: S,
        operation: U,
    ) -> Result<T, Error>;
}

impl<T, E> ErrorExt<T> for Result<T, E>
where
    E: Into<Error>,
{
    fn context(self, ctx: ErrorContext) -> Result<T, Error> {
        self.map_err(|e| match e.into() {
            Error::Custom(msg) => Error::Custom(format!("{}: {}", ctx, msg)),
            other => Error::Custom(format!("{}: {}", ctx, other)),
        })
    }

    fn with_context<S: Into<String>, U: Into<String>>(
        self,
        component: S,
        operation: U,
    ) -> Result<T, Error> {
        self.context(ErrorContext::new(component, operation))
    }
}
