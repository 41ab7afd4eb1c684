//! Hosted zone - Region to Route 53 hosted zone ID lookup tables
//!
//! Alias records that point at AWS-managed endpoints (load balancers, S3
//! website endpoints) need the hosted zone ID that AWS uses for that service
//! in that region. The tables are plain values: build one and pass it to
//! whoever needs it.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Hosted zone IDs of Elastic Load Balancing endpoints
pub const ELB_HOSTED_ZONE_IDS: &[(&str, &str)] = &[
    ("af-south-1", "Z268VQBMOI5EKX"),
    ("ap-east-1", "Z3DQVH9N71FHZ0"),
    ("ap-northeast-1", "Z14GRHDCWA56QT"),
    ("ap-northeast-2", "ZWKZPGTI48KDX"),
    ("ap-northeast-3", "Z5LXEXXYW11ES"),
    ("ap-south-1", "ZP97RAFLXTNZK"),
    ("ap-southeast-1", "Z1LMS91P8CMLE5"),
    ("ap-southeast-2", "Z1GM3OXH4ZPM65"),
    ("ca-central-1", "ZQSVJUPU6J1EY"),
    ("cn-north-1", "Z1GDH35T77C1KE"),
    ("cn-northwest-1", "ZM7IZAIOVVDZF"),
    ("eu-central-1", "Z215JYRZR1TBD5"),
    ("eu-south-1", "Z3ULH7SSC9OV64"),
    ("eu-west-1", "Z32O12XQLNTSW2"),
    ("eu-west-2", "ZHURV8PSTC4K8"),
    ("eu-west-3", "Z3Q77PNBQS71R4"),
    ("me-south-1", "ZS929ML54UICD"),
    ("sa-east-1", "Z2P70J7HTTTPLU"),
    ("us-east-1", "Z35SXDOTRQ7X7K"),
    ("us-east-2", "Z3AADJGX6KTTL2"),
    ("us-gov-east-1", "Z166TLBEWOO7G0"),
    ("us-gov-west-1", "Z33AYJ8TM3BH4J"),
    ("us-west-1", "Z368ELLRRE2KJ0"),
    ("us-west-2", "Z1H1FL5HABSF5"),
];

/// Hosted zone IDs of S3 website endpoints
pub const S3_WEBSITE_HOSTED_ZONE_IDS: &[(&str, &str)] = &[
    ("ap-northeast-1", "Z2M4EHUR26P7ZW"),
    ("ap-northeast-2", "Z3W03O7B5YMIYP"),
    ("ap-south-1", "Z11RGJOFQNVJUP"),
    ("ap-southeast-1", "Z3O0J2DXBE1FTB"),
    ("ap-southeast-2", "Z1WCIGYICN2BYD"),
    ("ca-central-1", "Z1QDHH18159H29"),
    ("eu-central-1", "Z21DNDUVLTQW6Q"),
    ("eu-north-1", "Z3BAZG2TWCNX0D"),
    ("eu-west-1", "Z1BKCTXD74EZPE"),
    ("eu-west-2", "Z3GKZC51ZF0DB4"),
    ("eu-west-3", "Z3R1K369G5AVDG"),
    ("sa-east-1", "Z7KQH4QJS55SO"),
    ("us-east-1", "Z3AQBSTGFYJSTF"),
    ("us-east-2", "Z2O1EMRO9K5GLX"),
    ("us-gov-west-1", "Z31GFT0UA1I2HV"),
    ("us-west-1", "Z2F56UZL2M1ACD"),
    ("us-west-2", "Z3BJ6K6RIION7M"),
];

/// Which built-in table to use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostedZoneKind {
    Elb,
    S3Website,
}

impl HostedZoneKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HostedZoneKind::Elb => "elb",
            HostedZoneKind::S3Website => "s3-website",
        }
    }
}

impl fmt::Display for HostedZoneKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HostedZoneKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "elb" => Ok(HostedZoneKind::Elb),
            "s3-website" | "s3_website" => Ok(HostedZoneKind::S3Website),
            other => Err(format!(
                "Unknown hosted zone kind '{}', expected 'elb' or 's3-website'",
                other
            )),
        }
    }
}

/// Immutable region -> hosted zone ID table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostedZoneTable {
    zones: BTreeMap<String, String>,
}

impl HostedZoneTable {
    /// Build a table from (region, zone ID) pairs
    pub fn from_entries<I, R, Z>(entries: I) -> Self
    where
        I: IntoIterator<Item = (R, Z)>,
        R: Into<String>,
        Z: Into<String>,
    {
        Self {
            zones: entries
                .into_iter()
                .map(|(r, z)| (r.into(), z.into()))
                .collect(),
        }
    }

    /// Elastic Load Balancing hosted zones
    pub fn elb() -> Self {
        Self::from_entries(ELB_HOSTED_ZONE_IDS.iter().copied())
    }

    /// S3 website endpoint hosted zones
    pub fn s3_website() -> Self {
        Self::from_entries(S3_WEBSITE_HOSTED_ZONE_IDS.iter().copied())
    }

    pub fn for_kind(kind: HostedZoneKind) -> Self {
        match kind {
            HostedZoneKind::Elb => Self::elb(),
            HostedZoneKind::S3Website => Self::s3_website(),
        }
    }

    /// Look up the hosted zone ID for a region
    pub fn lookup(&self, region: &str) -> Option<&str> {
        self.zones.get(region).map(String::as_str)
    }

    /// Regions covered by this table, sorted
    pub fn regions(&self) -> impl Iterator<Item = &str> {
        self.zones.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_lookups() {
        let elb = HostedZoneTable::elb();
        assert_eq!(elb.lookup("us-east-1"), Some("Z35SXDOTRQ7X7K"));
        assert_eq!(elb.lookup("ap-northeast-1"), Some("Z14GRHDCWA56QT"));
        assert_eq!(elb.lookup("mars-north-1"), None);

        let s3 = HostedZoneTable::for_kind(HostedZoneKind::S3Website);
        assert_eq!(s3.lookup("us-west-2"), Some("Z3BJ6K6RIION7M"));
    }

    #[test]
    fn test_custom_table_is_independent() {
        let custom = HostedZoneTable::from_entries([("us-east-1", "ZTEST")]);
        assert_eq!(custom.lookup("us-east-1"), Some("ZTEST"));
        assert_eq!(custom.len(), 1);
        assert_eq!(
            HostedZoneTable::elb().lookup("us-east-1"),
            Some("Z35SXDOTRQ7X7K")
        );
    }

    #[test]
    fn test_builtin_tables_have_no_duplicate_regions() {
        assert_eq!(HostedZoneTable::elb().len(), ELB_HOSTED_ZONE_IDS.len());
        assert_eq!(
            HostedZoneTable::s3_website().len(),
            S3_WEBSITE_HOSTED_ZONE_IDS.len()
        );
    }

    #[test]
    fn test_kind_from_str() {
        assert_eq!("elb".parse::<HostedZoneKind>(), Ok(HostedZoneKind::Elb));
        assert_eq!(
            "s3-website".parse::<HostedZoneKind>(),
            Ok(HostedZoneKind::S3Website)
        );
        assert!("alb".parse::<HostedZoneKind>().is_err());
        assert_eq!(HostedZoneKind::S3Website.to_string(), "s3-website");
    }
}
