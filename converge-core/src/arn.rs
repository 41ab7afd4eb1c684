//! ARN - Building and parsing Amazon Resource Names
//!
//! Format: `arn:partition:service:region:account-id:resource`. The resource
//! part may itself contain colons and slashes and is kept verbatim.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Errors from parsing an ARN string
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArnError {
    #[error("ARN must start with 'arn:': {0}")]
    MissingPrefix(String),

    #[error("ARN must have 6 colon-separated sections: {0}")]
    TooFewSections(String),

    #[error("ARN has an empty {section}: {arn}")]
    EmptySection { section: &'static str, arn: String },
}

/// A parsed Amazon Resource Name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Arn {
    pub partition: String,
    pub service: String,
    /// Empty for global services (IAM, S3 buckets, ...)
    pub region: String,
    /// Empty for some services (S3 buckets)
    pub account_id: String,
    pub resource: String,
}

impl Arn {
    /// Build an ARN, picking the partition that owns `region`
    pub fn build(
        service: impl Into<String>,
        region: impl Into<String>,
        account_id: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        let region = region.into();
        Self {
            partition: partition_for_region(&region).to_string(),
            service: service.into(),
            region,
            account_id: account_id.into(),
            resource: resource.into(),
        }
    }

    /// Resource type and ID for `type/id` or `type:id` style resources
    pub fn resource_parts(&self) -> (Option<&str>, &str) {
        match self.resource.find(['/', ':']) {
            Some(i) => (Some(&self.resource[..i]), &self.resource[i + 1..]),
            None => (None, &self.resource),
        }
    }
}

impl fmt::Display for Arn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "arn:{}:{}:{}:{}:{}",
            self.partition, self.service, self.region, self.account_id, self.resource
        )
    }
}

impl FromStr for Arn {
    type Err = ArnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(6, ':');
        if parts.next() != Some("arn") {
            return Err(ArnError::MissingPrefix(s.to_string()));
        }

        let (partition, service, region, account_id, resource) = match (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) {
            (Some(p), Some(s), Some(r), Some(a), Some(res)) => (p, s, r, a, res),
            _ => return Err(ArnError::TooFewSections(s.to_string())),
        };

        for (section, value) in [
            ("partition", partition),
            ("service", service),
            ("resource", resource),
        ] {
            if value.is_empty() {
                return Err(ArnError::EmptySection {
                    section,
                    arn: s.to_string(),
                });
            }
        }

        Ok(Self {
            partition: partition.to_string(),
            service: service.to_string(),
            region: region.to_string(),
            account_id: account_id.to_string(),
            resource: resource.to_string(),
        })
    }
}

/// Partition that owns a region (e.g., "cn-north-1" -> "aws-cn")
pub fn partition_for_region(region: &str) -> &'static str {
    if region.starts_with("cn-") {
        "aws-cn"
    } else if region.starts_with("us-gov-") {
        "aws-us-gov"
    } else if region.starts_with("us-isob-") {
        "aws-iso-b"
    } else if region.starts_with("us-iso-") {
        "aws-iso"
    } else {
        "aws"
    }
}

/// DNS suffix for service endpoints in a partition
pub fn dns_suffix(partition: &str) -> &'static str {
    match partition {
        "aws-cn" => "amazonaws.com.cn",
        "aws-iso" => "c2s.ic.gov",
        "aws-iso-b" => "sc2s.sgov.gov",
        _ => "amazonaws.com",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let s = "arn:aws:ec2:ap-northeast-1:123456789012:security-group/sg-0abc";
        let arn: Arn = s.parse().unwrap();
        assert_eq!(arn.partition, "aws");
        assert_eq!(arn.service, "ec2");
        assert_eq!(arn.region, "ap-northeast-1");
        assert_eq!(arn.account_id, "123456789012");
        assert_eq!(arn.resource, "security-group/sg-0abc");
        assert_eq!(arn.to_string(), s);
    }

    #[test]
    fn test_resource_keeps_colons() {
        let arn: Arn = "arn:aws:lambda:us-east-1:123456789012:function:my-fn:PROD"
            .parse()
            .unwrap();
        assert_eq!(arn.resource, "function:my-fn:PROD");
        assert_eq!(arn.resource_parts(), (Some("function"), "my-fn:PROD"));
    }

    #[test]
    fn test_global_service_without_region() {
        let arn: Arn = "arn:aws:s3:::my-bucket".parse().unwrap();
        assert_eq!(arn.region, "");
        assert_eq!(arn.account_id, "");
        assert_eq!(arn.resource_parts(), (None, "my-bucket"));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            "aws:ec2:us-east-1:1:vpc/x".parse::<Arn>(),
            Err(ArnError::MissingPrefix(_))
        ));
        assert!(matches!(
            "arn:aws:ec2:us-east-1".parse::<Arn>(),
            Err(ArnError::TooFewSections(_))
        ));
        assert!(matches!(
            "arn:aws:iam::123456789012:".parse::<Arn>(),
            Err(ArnError::EmptySection {
                section: "resource",
                ..
            })
        ));
    }

    #[test]
    fn test_build_picks_partition() {
        let arn = Arn::build("ec2", "cn-north-1", "123456789012", "vpc/vpc-1");
        assert_eq!(arn.to_string(), "arn:aws-cn:ec2:cn-north-1:123456789012:vpc/vpc-1");

        assert_eq!(partition_for_region("us-gov-west-1"), "aws-us-gov");
        assert_eq!(partition_for_region("us-iso-east-1"), "aws-iso");
        assert_eq!(partition_for_region("us-isob-east-1"), "aws-iso-b");
        assert_eq!(partition_for_region("eu-west-1"), "aws");
    }

    #[test]
    fn test_dns_suffix() {
        assert_eq!(dns_suffix("aws"), "amazonaws.com");
        assert_eq!(dns_suffix("aws-cn"), "amazonaws.com.cn");
    }
}
