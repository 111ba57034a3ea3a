//! Result alias and logging combinators.
//!
//! Most code propagates with `?`. The combinators here are for the few places
//! where a failure is observed and deliberately not propagated, such as
//! best-effort persistence of an already-settled delivery.

use crate::error::Error;

/// The standard Result type for Courier operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Extension trait providing logging combinators for Results.
pub trait ResultExt<T> {
    /// Convert a Result to an Option, logging the error at `error` level.
    fn into_option_logged(self) -> Option<T>;

    /// Log the error at `warn` level under the given context and discard it.
    fn warn_on_error(self, context: &str);

    /// Inspect the error without consuming the Result.
    fn inspect_error<F: FnOnce(&Error)>(self, f: F) -> Self;
}

impl<T> ResultExt<T> for Result<T> {
    fn into_option_logged(self) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!(error = %e, "operation failed");
                None
            }
        }
    }

    fn warn_on_error(self, context: &str) {
        if let Err(e) = self {
            tracing::warn!(error = %e, context, "ignoring failure");
        }
    }

    fn inspect_error<F: FnOnce(&Error)>(self, f: F) -> Self {
        if let Err(ref e) = self {
            f(e);
        }
        self
    }
}
