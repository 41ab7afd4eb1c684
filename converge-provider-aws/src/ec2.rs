//! Security group rules through the EC2 API
//!
//! Rule mutations on the same group are serialized; EC2 rejects or loses
//! concurrent permission changes to one group.

use std::fmt;
use std::future::Future;

use aws_sdk_ec2::Client as Ec2Client;
use aws_sdk_ec2::types::{Filter, IpPermission, IpRange, Ipv6Range};
use converge_core::classify::RetryPolicy;
use converge_core::keyed_lock::KeyedMutex;
use converge_core::provider::{ProviderError, ProviderResult};
use converge_core::resource::ResourceId;
use converge_core::retry::RetryError;
use converge_core::rule::RuleKind;
use converge_core::wait::{Observed, WaitSpec};
use converge_core::CancellationToken;
use log::{debug, info};

use crate::config::ProviderConfig;
use crate::error::{AwsApiError, eventual_consistency};
use crate::utils::normalize_protocol;

/// Synthetic labels for rule visibility polling
const RULE_ABSENT: &str = "absent";
const RULE_PRESENT: &str = "present";

const DUPLICATE_RULE: &str = "InvalidPermission.Duplicate";

/// One security group rule, identified by its contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityGroupRule {
    pub group_id: String,
    pub kind: RuleKind,
    /// IP protocol ("tcp", "udp", "icmp", or "-1" for all)
    pub protocol: String,
    pub from_port: Option<i32>,
    pub to_port: Option<i32>,
    /// IPv4 or IPv6 CIDR block
    pub cidr: String,
    pub description: Option<String>,
}

impl SecurityGroupRule {
    pub fn resource_id(&self) -> ResourceId {
        ResourceId::new(format!("security_group_{}_rule", self.kind), self.group_id.clone())
    }

    fn is_ipv6(&self) -> bool {
        self.cidr.contains(':')
    }

    fn all_protocols(&self) -> bool {
        normalize_protocol(&self.protocol) == "-1"
    }

    /// Permission block for authorize calls
    pub fn ip_permission(&self) -> IpPermission {
        let mut permission = IpPermission::builder().ip_protocol(normalize_protocol(&self.protocol));
        if !self.all_protocols() {
            permission = permission
                .set_from_port(self.from_port)
                .set_to_port(self.to_port);
        }
        if self.is_ipv6() {
            permission.ipv6_ranges(
                Ipv6Range::builder()
                    .cidr_ipv6(&self.cidr)
                    .set_description(self.description.clone())
                    .build(),
            )
        } else {
            permission.ip_ranges(
                IpRange::builder()
                    .cidr_ip(&self.cidr)
                    .set_description(self.description.clone())
                    .build(),
            )
        }
        .build()
    }

    /// Returns true if an existing rule has the same group, direction,
    /// protocol, ports and CIDR (the description is not part of identity)
    pub fn matches(&self, existing: &aws_sdk_ec2::types::SecurityGroupRule) -> bool {
        if existing.group_id() != Some(self.group_id.as_str())
            || existing.is_egress() != Some(self.kind.is_egress())
        {
            return false;
        }

        let protocol = normalize_protocol(existing.ip_protocol().unwrap_or_default());
        if protocol != normalize_protocol(&self.protocol) {
            return false;
        }
        if !self.all_protocols()
            && (existing.from_port() != self.from_port || existing.to_port() != self.to_port)
        {
            return false;
        }

        let cidr = if self.is_ipv6() {
            existing.cidr_ipv6()
        } else {
            existing.cidr_ipv4()
        };
        cidr == Some(self.cidr.as_str())
    }
}

impl fmt::Display for SecurityGroupRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ports = match (self.from_port, self.to_port) {
            _ if self.all_protocols() => "all".to_string(),
            (Some(from), Some(to)) if from == to => from.to_string(),
            (Some(from), Some(to)) => format!("{}-{}", from, to),
            (Some(port), None) | (None, Some(port)) => port.to_string(),
            (None, None) => "all".to_string(),
        };
        let peer = match self.kind {
            RuleKind::Ingress => "from",
            RuleKind::Egress => "to",
        };
        write!(
            f,
            "{} {}/{} {} {} on {}",
            self.kind, self.protocol, ports, peer, self.cidr, self.group_id
        )
    }
}

/// Map an authorize attempt to the rule ID the API returned, if any
fn authorized_rule(
    rule: &SecurityGroupRule,
    result: Result<Option<String>, RetryError<AwsApiError>>,
) -> ProviderResult<Option<String>> {
    match result {
        Ok(rule_id) => Ok(rule_id),
        Err(RetryError::Fatal(err)) if err.has_code(DUPLICATE_RULE) => Err(ProviderError::new(
            format!("Rule {} already exists; import it or remove the duplicate", rule),
        )
        .with_cause(err)),
        Err(err) => Err(ProviderError::from_retry("authorize rule", err)),
    }
}

/// The ID seen by a describe call wins over the one from the authorize response
fn visible_rule_id(found: Option<String>, authorized: Option<String>) -> ProviderResult<String> {
    found
        .or(authorized)
        .ok_or_else(|| ProviderError::new("Rule is visible but has no ID"))
}

/// A rule that vanished between lookup and revoke needs no revoke
fn ignore_missing(rule_id: &str, result: Result<(), AwsApiError>) -> Result<(), AwsApiError> {
    match result {
        Err(e) if e.is_not_found() => {
            debug!("Rule {} disappeared before revoke", rule_id);
            Ok(())
        }
        result => result,
    }
}

/// Poll `lookup` until the rule shows up; returns its ID
async fn wait_until_visible<E, F, Fut>(
    spec: &WaitSpec,
    cancel: &CancellationToken,
    mut lookup: F,
) -> ProviderResult<Option<String>>
where
    E: std::error::Error + Send + Sync + 'static,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<String>, E>>,
{
    spec.wait_with_cancel(cancel, || {
        let lookup = lookup();
        async move {
            let state = match lookup.await? {
                Some(rule_id) => Observed::new(Some(rule_id), RULE_PRESENT),
                None => Observed::new(None, RULE_ABSENT),
            };
            Ok::<_, E>(Some(state))
        }
    })
    .await
    .map(Option::flatten)
    .map_err(|e| ProviderError::from_wait("wait for rule", e))
}

/// Poll `lookup` until the rule is gone
async fn wait_until_revoked<E, F, Fut>(
    spec: &WaitSpec,
    cancel: &CancellationToken,
    mut lookup: F,
) -> ProviderResult<()>
where
    E: std::error::Error + Send + Sync + 'static,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<String>, E>>,
{
    spec.wait_with_cancel(cancel, || {
        let lookup = lookup();
        async move {
            let observed = lookup.await?.map(|_| Observed::new((), RULE_PRESENT));
            Ok::<_, E>(observed)
        }
    })
    .await
    .map(|_| ())
    .map_err(|e| ProviderError::from_wait("wait for rule removal", e))
}

/// Security group rule client with per-group locking
pub struct SecurityGroupRules {
    client: Ec2Client,
    config: ProviderConfig,
    locks: KeyedMutex<String>,
    retry_policy: RetryPolicy,
    cancel: CancellationToken,
}

impl SecurityGroupRules {
    pub async fn new(config: ProviderConfig) -> Self {
        let sdk_config = config.sdk_config().await;
        Self::with_client(Ec2Client::new(&sdk_config), config)
    }

    pub fn with_client(client: Ec2Client, config: ProviderConfig) -> Self {
        Self {
            client,
            config,
            locks: KeyedMutex::new(),
            retry_policy: eventual_consistency(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Look up the ID of an existing rule with the same contents
    pub async fn find(&self, rule: &SecurityGroupRule) -> ProviderResult<Option<String>> {
        self.lookup(rule)
            .await
            .map_err(|e| ProviderError::from_retry("find rule", e).for_resource(rule.resource_id()))
    }

    /// Add a rule and wait until it is visible; returns the rule ID
    pub async fn authorize(&self, rule: &SecurityGroupRule) -> ProviderResult<String> {
        let id = rule.resource_id();
        let _guard = self.locks.lock(rule.group_id.clone()).await;

        info!("Authorizing {}", rule);
        let authorized = self
            .config
            .propagation_retry()
            .retry_with_cancel(
                &self.cancel,
                self.retry_policy.predicate::<AwsApiError>(),
                || self.authorize_once(rule),
            )
            .await;

        let rule_id = authorized_rule(rule, authorized).map_err(|e| e.for_resource(id.clone()))?;

        let spec = self
            .config
            .wait_spec([RULE_ABSENT], [RULE_PRESENT], self.config.create_timeout());
        let found = wait_until_visible(&spec, &self.cancel, || self.lookup(rule))
            .await
            .map_err(|e| e.for_resource(id.clone()))?;

        visible_rule_id(found, rule_id).map_err(|e| e.for_resource(id))
    }

    /// Remove a rule and wait until it is gone; a missing rule is not an error
    pub async fn revoke(&self, rule: &SecurityGroupRule) -> ProviderResult<()> {
        let id = rule.resource_id();
        let _guard = self.locks.lock(rule.group_id.clone()).await;

        let Some(rule_id) = self
            .lookup(rule)
            .await
            .map_err(|e| ProviderError::from_retry("find rule", e).for_resource(id.clone()))?
        else {
            info!("{} is already absent", rule);
            return Ok(());
        };

        info!("Revoking {} ({})", rule, rule_id);
        let rule_id = rule_id.as_str();
        self.config
            .propagation_retry()
            .retry_with_cancel(
                &self.cancel,
                self.retry_policy.predicate::<AwsApiError>(),
                || async move {
                    ignore_missing(rule_id, self.revoke_once(rule.kind, &rule.group_id, rule_id).await)
                },
            )
            .await
            .map_err(|e| ProviderError::from_retry("revoke rule", e).for_resource(id.clone()))?;

        let spec = self
            .config
            .wait_spec([RULE_PRESENT], std::iter::empty(), self.config.delete_timeout());
        wait_until_revoked(&spec, &self.cancel, || self.lookup(rule))
            .await
            .map_err(|e| e.for_resource(id))
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn authorize_once(&self, rule: &SecurityGroupRule) -> Result<Option<String>, AwsApiError> {
        let permission = rule.ip_permission();
        let created = match rule.kind {
            RuleKind::Ingress => self
                .client
                .authorize_security_group_ingress()
                .group_id(&rule.group_id)
                .ip_permissions(permission)
                .send()
                .await
                .map_err(|e| AwsApiError::from_sdk("AuthorizeSecurityGroupIngress", &e))?
                .security_group_rules()
                .first()
                .and_then(|r| r.security_group_rule_id())
                .map(str::to_string),
            RuleKind::Egress => self
                .client
                .authorize_security_group_egress()
                .group_id(&rule.group_id)
                .ip_permissions(permission)
                .send()
                .await
                .map_err(|e| AwsApiError::from_sdk("AuthorizeSecurityGroupEgress", &e))?
                .security_group_rules()
                .first()
                .and_then(|r| r.security_group_rule_id())
                .map(str::to_string),
        };
        Ok(created)
    }

    async fn revoke_once(
        &self,
        kind: RuleKind,
        group_id: &str,
        rule_id: &str,
    ) -> Result<(), AwsApiError> {
        match kind {
            RuleKind::Ingress => self
                .client
                .revoke_security_group_ingress()
                .group_id(group_id)
                .security_group_rule_ids(rule_id)
                .send()
                .await
                .map(|_| ())
                .map_err(|e| AwsApiError::from_sdk("RevokeSecurityGroupIngress", &e)),
            RuleKind::Egress => self
                .client
                .revoke_security_group_egress()
                .group_id(group_id)
                .security_group_rule_ids(rule_id)
                .send()
                .await
                .map(|_| ())
                .map_err(|e| AwsApiError::from_sdk("RevokeSecurityGroupEgress", &e)),
        }
    }

    async fn lookup(&self, rule: &SecurityGroupRule) -> Result<Option<String>, RetryError<AwsApiError>> {
        self.config
            .propagation_retry()
            .retry_with_cancel(
                &self.cancel,
                self.retry_policy.predicate::<AwsApiError>(),
                || self.describe_matching(rule),
            )
            .await
    }

    async fn describe_matching(&self, rule: &SecurityGroupRule) -> Result<Option<String>, AwsApiError> {
        let filter = Filter::builder()
            .name("group-id")
            .values(&rule.group_id)
            .build();
        let mut next_token: Option<String> = None;

        loop {
            let output = self
                .client
                .describe_security_group_rules()
                .filters(filter.clone())
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| AwsApiError::from_sdk("DescribeSecurityGroupRules", &e))?;

            if let Some(found) = output
                .security_group_rules()
                .iter()
                .find(|existing| rule.matches(existing))
            {
                return Ok(found.security_group_rule_id().map(str::to_string));
            }

            match output.next_token() {
                Some(token) if !token.is_empty() => next_token = Some(token.to_string()),
                _ => return Ok(None),
            }
        }
    }
}
