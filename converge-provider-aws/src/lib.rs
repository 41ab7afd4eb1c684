//! Converge AWS Provider
//!
//! AWS glue on top of `converge-core`: Cloud Control resource requests and
//! EC2 security group rules, with waits, retries and cancellation wired in.
//!
//! ## Module Structure
//!
//! - `cloudcontrol` - Cloud Control API client (create/read/update/delete)
//! - `ec2` - Security group rule authorize/revoke
//! - `error` - SDK error flattening and retry classification
//! - `config` - Provider configuration
//! - `utils` - Helper functions for value normalization

pub mod cloudcontrol;
pub mod config;
pub mod ec2;
pub mod error;
pub mod utils;

// Re-export main types
pub use cloudcontrol::{CloudControl, RequestProgress};
pub use config::{ConfigError, ProviderConfig, Timeouts};
pub use ec2::{SecurityGroupRule, SecurityGroupRules};
pub use error::{AwsApiError, eventual_consistency};
pub use utils::{normalize_protocol, normalize_region};
