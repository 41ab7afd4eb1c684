//! Classify - Deciding whether an API error is worth retrying
//!
//! Cloud APIs report failures as a service code plus a free-form message.
//! A `RetryPolicy` is a list of code (and optional message) rules; anything
//! that matches a rule is transient, everything else is fatal.

/// An error that carries a service error code and message
pub trait ErrorCode {
    /// Service error code (e.g., "ThrottlingException")
    fn code(&self) -> Option<&str>;

    /// Human readable error message
    fn message(&self) -> Option<&str> {
        None
    }
}

/// Error codes that AWS services use for throttling
pub const THROTTLING_CODES: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "ThrottledException",
    "RequestThrottledException",
    "TooManyRequestsException",
    "ProvisionedThroughputExceededException",
    "TransactionInProgressException",
    "RequestLimitExceeded",
    "BandwidthLimitExceeded",
    "LimitExceededException",
    "RequestThrottled",
    "SlowDown",
    "PriorRequestNotComplete",
    "EC2ThrottledException",
];

/// A single retryable condition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryRule {
    pub code: String,
    /// If set, the error message must contain this text as well
    pub message_contains: Option<String>,
}

impl RetryRule {
    pub fn matches<E: ErrorCode + ?Sized>(&self, err: &E) -> bool {
        if err.code() != Some(self.code.as_str()) {
            return false;
        }
        match &self.message_contains {
            Some(needle) => err.message().is_some_and(|m| m.contains(needle.as_str())),
            None => true,
        }
    }
}

/// Immutable set of retryable conditions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryPolicy {
    rules: Vec<RetryRule>,
}

impl RetryPolicy {
    /// An empty policy: nothing is retryable
    pub fn new() -> Self {
        Self::default()
    }

    /// Policy covering the common AWS throttling codes
    pub fn throttling() -> Self {
        THROTTLING_CODES
            .iter()
            .fold(Self::new(), |policy, code| policy.code(*code))
    }

    /// Treat every error with this code as retryable
    pub fn code(mut self, code: impl Into<String>) -> Self {
        self.rules.push(RetryRule {
            code: code.into(),
            message_contains: None,
        });
        self
    }

    /// Treat errors with this code as retryable only if the message contains `needle`
    pub fn code_with_message(mut self, code: impl Into<String>, needle: impl Into<String>) -> Self {
        self.rules.push(RetryRule {
            code: code.into(),
            message_contains: Some(needle.into()),
        });
        self
    }

    /// Combine two policies
    pub fn merge(mut self, other: RetryPolicy) -> Self {
        for rule in other.rules {
            if !self.rules.contains(&rule) {
                self.rules.push(rule);
            }
        }
        self
    }

    pub fn rules(&self) -> &[RetryRule] {
        &self.rules
    }

    /// Returns true if any rule matches the error
    pub fn is_retryable<E: ErrorCode + ?Sized>(&self, err: &E) -> bool {
        self.rules.iter().any(|rule| rule.matches(err))
    }

    /// Borrow this policy as a predicate for [`crate::retry::retry`]
    pub fn predicate<E: ErrorCode>(&self) -> impl Fn(&E) -> bool + '_ {
        move |err: &E| self.is_retryable(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ApiError {
        code: &'static str,
        message: &'static str,
    }

    impl ErrorCode for ApiError {
        fn code(&self) -> Option<&str> {
            Some(self.code)
        }

        fn message(&self) -> Option<&str> {
            Some(self.message)
        }
    }

    fn api_error(code: &'static str, message: &'static str) -> ApiError {
        ApiError { code, message }
    }

    #[test]
    fn test_empty_policy_retries_nothing() {
        let policy = RetryPolicy::new();
        assert!(!policy.is_retryable(&api_error("Throttling", "Rate exceeded")));
    }

    #[test]
    fn test_throttling_policy() {
        let policy = RetryPolicy::throttling();
        assert!(policy.is_retryable(&api_error("Throttling", "Rate exceeded")));
        assert!(policy.is_retryable(&api_error("RequestLimitExceeded", "")));
        assert!(!policy.is_retryable(&api_error("AccessDenied", "")));
    }

    #[test]
    fn test_code_with_message() {
        let policy = RetryPolicy::new().code_with_message(
            "InvalidParameterValueException",
            "cannot be assumed",
        );

        assert!(policy.is_retryable(&api_error(
            "InvalidParameterValueException",
            "The role defined for the function cannot be assumed by Lambda."
        )));
        assert!(!policy.is_retryable(&api_error(
            "InvalidParameterValueException",
            "Runtime is not supported"
        )));
    }

    #[test]
    fn test_merge_deduplicates() {
        let policy = RetryPolicy::new()
            .code("A")
            .merge(RetryPolicy::new().code("A").code("B"));
        assert_eq!(policy.rules().len(), 2);
    }

    #[test]
    fn test_predicate() {
        let policy = RetryPolicy::new().code("InvalidGroup.NotFound");
        let is_retryable = policy.predicate::<ApiError>();
        assert!(is_retryable(&api_error("InvalidGroup.NotFound", "")));
        assert!(!is_retryable(&api_error("InvalidGroup.Duplicate", "")));
    }

    #[test]
    fn test_missing_code_never_matches() {
        struct Opaque;
        impl ErrorCode for Opaque {
            fn code(&self) -> Option<&str> {
                None
            }
        }
        assert!(!RetryPolicy::throttling().is_retryable(&Opaque));
    }
}
