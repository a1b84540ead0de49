//! Standardized error construction for HTTP responses, transport failures and input validation

use crate::error::{PusherError, Result};
use reqwest::StatusCode;
use std::path::Path;

/// Status codes the datastore file endpoint uses to acknowledge a chunk
pub const ACCEPTED_STATUSES: [u16; 4] = [200, 201, 204, 206];

/// Standard error handler for HTTP responses
pub struct HttpErrorHandler;

impl HttpErrorHandler {
    pub fn is_accepted(status: StatusCode) -> bool {
        ACCEPTED_STATUSES.contains(&status.as_u16())
    }

    /// Builds the error for a rejected chunk.
    ///
    /// The numeric status always appears in the message so that pattern-based
    /// retry classification ("502", "503", "504") can see it.
    pub fn handle_upload_error(status: StatusCode, error_text: &str, context: &str) -> PusherError {
        let hint = match status.as_u16() {
            401 => "authentication failed",
            403 => "permission denied",
            404 => "datastore path not found",
            413 => "payload too large",
            500 => "host internal error",
            502 | 503 => "host temporarily unavailable",
            504 => "gateway timeout",
            507 => "datastore out of space",
            _ => "unexpected response",
        };

        PusherError::Upload(format!(
            "{} failed with status {} ({}): {}",
            context,
            status.as_u16(),
            hint,
            error_text.trim()
        ))
    }

    /// Error for a failed probe against the control endpoint
    pub fn handle_endpoint_error(status: StatusCode, error_text: &str, operation: &str) -> PusherError {
        let error_msg = match status.as_u16() {
            401 => format!("Invalid credentials for {}: {}", operation, error_text),
            403 => format!("Access denied for {}: {}", operation, error_text),
            404 => format!("Resource not found for {}: {}", operation, error_text),
            _ => format!("{} failed (status {}): {}", operation, status.as_u16(), error_text),
        };

        PusherError::Config(error_msg)
    }
}

/// Network error categorization and handling
pub struct NetworkErrorHandler;

impl NetworkErrorHandler {
    /// Categorize and format network errors so their text matches the retryable pattern set
    pub fn handle_network_error(error: &reqwest::Error, context: &str) -> PusherError {
        if error.is_timeout() {
            PusherError::Timeout(format!("{} timeout: {}", context, error))
        } else if error.is_connect() {
            PusherError::Network(format!(
                "connection refused or unreachable during {}: {}",
                context, error
            ))
        } else if error.to_string().contains("certificate") {
            PusherError::Network(format!("TLS certificate error during {}: {}", context, error))
        } else {
            PusherError::Network(format!("{} network error: {}", context, error))
        }
    }
}

/// Validation error utilities
pub struct ValidationErrorHandler;

impl ValidationErrorHandler {
    pub fn validate_archive_path(path: &Path) -> Result<()> {
        if !path.exists() {
            return Err(PusherError::Validation(format!(
                "OVA file does not exist: {}",
                path.display()
            )));
        }

        if !path.is_file() {
            return Err(PusherError::Validation(format!(
                "Input path is not a file: {}",
                path.display()
            )));
        }

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("")
            .to_lowercase();

        if !matches!(extension.as_str(), "ova" | "tar") {
            return Err(PusherError::Validation(format!(
                "Input file must be an OVA archive (.ova or .tar): {}",
                path.display()
            )));
        }

        Ok(())
    }

    pub fn validate_workers(workers: usize, max: usize) -> Result<()> {
        if workers < 1 || workers > max {
            return Err(PusherError::Validation(format!(
                "workers must be between 1 and {}, got {}",
                max, workers
            )));
        }
        Ok(())
    }

    pub fn validate_chunk_size(chunk_size: u64) -> Result<()> {
        if chunk_size == 0 {
            return Err(PusherError::Validation(
                "Chunk size must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn validate_credentials(username: &str, password: &Option<String>) -> Result<()> {
        if username.is_empty() {
            return Err(PusherError::Validation(
                "Username cannot be empty".to_string(),
            ));
        }
        if let Some(password) = password {
            if password.is_empty() {
                return Err(PusherError::Validation(
                    "Password cannot be empty when provided".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepted_statuses() {
        assert!(HttpErrorHandler::is_accepted(StatusCode::OK));
        assert!(HttpErrorHandler::is_accepted(StatusCode::CREATED));
        assert!(HttpErrorHandler::is_accepted(StatusCode::NO_CONTENT));
        assert!(HttpErrorHandler::is_accepted(StatusCode::PARTIAL_CONTENT));
        assert!(!HttpErrorHandler::is_accepted(StatusCode::ACCEPTED));
        assert!(!HttpErrorHandler::is_accepted(StatusCode::SERVICE_UNAVAILABLE));
    }

    #[test]
    fn test_upload_error_mentions_status_code() {
        let err = HttpErrorHandler::handle_upload_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "busy",
            "chunk upload",
        );
        let text = err.to_string();
        assert!(text.contains("503"));
        assert!(text.contains("busy"));
    }

    #[test]
    fn test_validate_workers() {
        assert!(ValidationErrorHandler::validate_workers(1, 10).is_ok());
        assert!(ValidationErrorHandler::validate_workers(10, 10).is_ok());
        assert!(ValidationErrorHandler::validate_workers(0, 10).is_err());
        assert!(ValidationErrorHandler::validate_workers(11, 10).is_err());
    }

    #[test]
    fn test_validate_archive_path_extension() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("appliance.ova");
        let bad = dir.path().join("appliance.zip");
        std::fs::write(&good, b"x").unwrap();
        std::fs::write(&bad, b"x").unwrap();

        assert!(ValidationErrorHandler::validate_archive_path(&good).is_ok());
        assert!(ValidationErrorHandler::validate_archive_path(&bad).is_err());
        assert!(ValidationErrorHandler::validate_archive_path(&dir.path().join("missing.ova")).is_err());
    }
}
