//! Provider - Errors surfaced by resource lifecycle operations
//!
//! Provider code calls cloud APIs through the retrier and poller. Whatever
//! goes wrong ends up as a `ProviderError` that names the operation and the
//! resource, keeps the original error as its source, and tells timeouts and
//! cancellations apart from everything else.

use crate::resource::ResourceId;
use crate::retry::RetryError;
use crate::wait::WaitError;

/// Broad category of a provider failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A wait or retry ran past its deadline
    Timeout,
    /// The operation was cancelled from outside
    Cancelled,
    /// The remote resource ended up in a state nobody asked for
    UnexpectedState,
    /// Anything else (API errors, validation, ...)
    Other,
}

/// Error type for Provider operations
#[derive(Debug)]
pub struct ProviderError {
    pub message: String,
    pub kind: ErrorKind,
    pub resource_id: Option<ResourceId>,
    pub cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(ref id) = self.resource_id {
            write!(f, "[{}] {}", id, self.message)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for ProviderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_ref()
            .map(|e| e.as_ref() as &dyn std::error::Error)
    }
}

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: ErrorKind::Other,
            resource_id: None,
            cause: None,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(message).with_kind(ErrorKind::Timeout)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(message).with_kind(ErrorKind::Cancelled)
    }

    pub fn with_kind(mut self, kind: ErrorKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn for_resource(mut self, id: ResourceId) -> Self {
        self.resource_id = Some(id);
        self
    }

    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn is_timeout(&self) -> bool {
        self.kind == ErrorKind::Timeout
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }

    /// Wrap a poller error, naming what was being waited for
    pub fn from_wait<E>(operation: &str, err: WaitError<E>) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        let message = format!("{}: {}", operation, err);
        let error = match &err {
            WaitError::Timeout { .. } => Self::timeout(message),
            WaitError::Cancelled { .. } => Self::cancelled(message),
            WaitError::UnexpectedState { .. } => {
                Self::new(message).with_kind(ErrorKind::UnexpectedState)
            }
            WaitError::NotFound { .. } | WaitError::Probe(_) => Self::new(message),
        };
        error.with_cause(err)
    }

    /// Wrap a retrier error, naming the operation that was retried
    pub fn from_retry<E>(operation: &str, err: RetryError<E>) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        let message = format!("{}: {}", operation, err);
        let error = match &err {
            RetryError::Timeout { .. } => Self::timeout(message),
            RetryError::Cancelled { .. } => Self::cancelled(message),
            RetryError::Fatal(_) => Self::new(message),
        };
        match err.into_inner() {
            Some(cause) => error.with_cause(cause),
            None => error,
        }
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;
    use std::time::Duration;

    fn io_error(msg: &str) -> std::io::Error {
        std::io::Error::other(msg.to_string())
    }

    #[test]
    fn test_display_with_resource() {
        let err = ProviderError::new("Failed to delete resource")
            .for_resource(ResourceId::new("AWS::EC2::VPC", "vpc-123"));
        assert_eq!(
            err.to_string(),
            "[AWS::EC2::VPC vpc-123] Failed to delete resource"
        );
    }

    #[test]
    fn test_from_wait_timeout_is_distinguishable() {
        let wait: WaitError<std::io::Error> = WaitError::Timeout {
            last_state: Some("IN_PROGRESS".to_string()),
            target: vec!["SUCCESS".to_string()],
            timeout: Duration::from_secs(60),
        };
        let err = ProviderError::from_wait("waiting for request abc", wait);
        assert!(err.is_timeout());
        assert!(err.to_string().starts_with("waiting for request abc: timeout"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_from_wait_unexpected_state() {
        let wait: WaitError<std::io::Error> = WaitError::UnexpectedState {
            state: "FAILED".to_string(),
            target: vec!["SUCCESS".to_string()],
        };
        let err = ProviderError::from_wait("creating AWS::EC2::VPC", wait);
        assert_eq!(err.kind, ErrorKind::UnexpectedState);
        assert!(err.to_string().contains("FAILED"));
    }

    #[test]
    fn test_from_retry_keeps_original_cause() {
        let retry = RetryError::Fatal(io_error("AccessDenied"));
        let err = ProviderError::from_retry("CreateResource", retry);
        assert_eq!(err.kind, ErrorKind::Other);
        assert_eq!(err.to_string(), "CreateResource: AccessDenied");
        assert_eq!(err.source().unwrap().to_string(), "AccessDenied");
    }

    #[test]
    fn test_from_retry_cancelled() {
        let retry: RetryError<std::io::Error> = RetryError::Cancelled {
            last: None,
            attempts: 0,
        };
        let err = ProviderError::from_retry("CreateResource", retry);
        assert!(err.is_cancelled());
        assert!(err.source().is_none());
    }

    #[test]
    fn test_from_wait_cancelled_keeps_source() {
        let wait: WaitError<std::io::Error> = WaitError::Cancelled { last_state: None };
        let err = ProviderError::from_wait("waiting for request abc", wait);
        assert!(err.is_cancelled());
        assert!(!err.is_timeout());
        assert_eq!(
            err.to_string(),
            "waiting for request abc: wait cancelled (last state: none)"
        );
        assert!(err.source().is_some());
    }

    #[test]
    fn test_from_retry_timeout_keeps_last_error() {
        let retry = RetryError::Timeout {
            source: io_error("Throttling"),
            attempts: 4,
            timeout: Duration::from_secs(120),
        };
        let err = ProviderError::from_retry("DescribeSecurityGroupRules", retry);
        assert!(err.is_timeout());
        assert_eq!(err.source().unwrap().to_string(), "Throttling");
    }
}
