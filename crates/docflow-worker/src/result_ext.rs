//! Result extension for logging errors against a document.

use std::fmt::Display;
use tracing::error;

/// Adds error logging keyed by document identifier.
pub trait ResultExt<T, E> {
    /// Log the error with the document identifier and call site if this is an
    /// `Err`, returning the result unchanged.
    fn log_for(self, document_id: &str) -> Result<T, E>;
}

impl<T, E: Display> ResultExt<T, E> for Result<T, E> {
    #[track_caller]
    fn log_for(self, document_id: &str) -> Result<T, E> {
        if let Err(ref e) = self {
            let caller_location = std::panic::Location::caller();
            error!(
                target: "docflow_worker",
                document_id = %document_id,
                error = %e,
                file = %format!("{}:{}", caller_location.file(), caller_location.line()),
                "Operation failed"
            );
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_for_ok() {
        let result: Result<i32, &str> = Ok(42);
        assert_eq!(result.log_for("17").unwrap(), 42);
    }

    #[test]
    fn test_log_for_err() {
        let result: Result<i32, &str> = Err("connection reset");
        assert_eq!(result.log_for("17").unwrap_err(), "connection reset");
    }
}
