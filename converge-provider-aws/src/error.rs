//! AWS API errors
//!
//! SDK errors are generic over the operation; they are flattened here into an
//! `AwsApiError` that keeps the service code and message (for retry
//! classification) and the full error chain (for the user).

use aws_sdk_cloudcontrol::error::{DisplayErrorContext, ProvideErrorMetadata};
use converge_core::classify::{ErrorCode, RetryPolicy};
use thiserror::Error;

/// Service codes that mean "the thing you asked about does not exist"
const NOT_FOUND_CODES: &[&str] = &[
    "ResourceNotFoundException",
    "RequestTokenNotFoundException",
    "NotFound",
    "NoSuchEntity",
];

/// A failed AWS API call
#[derive(Debug, Clone, Error)]
#[error("{operation} failed: {detail}")]
pub struct AwsApiError {
    /// API operation name (e.g., "CreateResource")
    pub operation: &'static str,
    pub code: Option<String>,
    pub message: Option<String>,
    /// Rendered error chain
    pub detail: String,
}

impl AwsApiError {
    pub fn new(
        operation: &'static str,
        code: Option<&str>,
        message: Option<&str>,
    ) -> Self {
        let detail = match (code, message) {
            (Some(c), Some(m)) => format!("{}: {}", c, m),
            (Some(c), None) => c.to_string(),
            (None, Some(m)) => m.to_string(),
            (None, None) => "unknown error".to_string(),
        };
        Self {
            operation,
            code: code.map(str::to_string),
            message: message.map(str::to_string),
            detail,
        }
    }

    /// Flatten any SDK error
    pub fn from_sdk<E>(operation: &'static str, err: &E) -> Self
    where
        E: ProvideErrorMetadata + std::error::Error,
    {
        Self {
            operation,
            code: err.code().map(str::to_string),
            message: err.message().map(str::to_string),
            detail: DisplayErrorContext(err).to_string(),
        }
    }

    pub fn has_code(&self, code: &str) -> bool {
        self.code.as_deref() == Some(code)
    }

    /// Returns true if the error reports a missing resource
    pub fn is_not_found(&self) -> bool {
        match self.code.as_deref() {
            Some(code) => NOT_FOUND_CODES.contains(&code) || code.ends_with(".NotFound"),
            None => false,
        }
    }
}

impl ErrorCode for AwsApiError {
    fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

/// Errors worth retrying right after creating or changing AWS resources.
///
/// Throttling, plus the eventual-consistency windows that show up across
/// services: IAM roles that cannot be assumed yet, security groups that are
/// not visible yet, concurrent modification and transient service faults.
pub fn eventual_consistency() -> RetryPolicy {
    RetryPolicy::throttling()
        .code_with_message("InvalidParameterValueException", "role")
        .code_with_message("InvalidParameterValueException", "cannot be assumed")
        .code("ConcurrentModificationException")
        .code("InvalidGroup.NotFound")
        .code("ServiceInternalErrorException")
        .code("NetworkFailureException")
        .code("InternalFailure")
        .code("ServiceUnavailable")
}
