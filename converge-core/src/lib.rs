//! Converge Core
//!
//! Building blocks for cloud resource lifecycles: wait for a remote resource
//! to settle into a target state, retry calls that fail transiently, and the
//! small helpers (tags, ARNs, hosted zones, rule kinds, keyed locks) that
//! provider code layers on top.

pub mod arn;
pub mod classify;
pub mod hosted_zone;
pub mod keyed_lock;
pub mod provider;
pub mod resource;
pub mod retry;
pub mod rule;
pub mod tags;
pub mod wait;

// Re-export main types for convenience
pub use classify::{ErrorCode, RetryPolicy};
pub use keyed_lock::KeyedMutex;
pub use provider::{ErrorKind, ProviderError, ProviderResult};
pub use resource::ResourceId;
pub use retry::{RetryError, RetrySpec, retry};
pub use rule::RuleKind;
pub use wait::{Observed, WaitError, WaitSpec, wait_for_state};

pub use tokio_util::sync::CancellationToken;
