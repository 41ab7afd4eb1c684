//! Rule - Direction of a security group rule

use std::fmt;
use std::str::FromStr;

/// Whether a security group rule applies to inbound or outbound traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleKind {
    Ingress,
    Egress,
}

impl RuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleKind::Ingress => "ingress",
            RuleKind::Egress => "egress",
        }
    }

    /// Matches the `IsEgress` flag of EC2 security group rules
    pub fn is_egress(&self) -> bool {
        match self {
            RuleKind::Ingress => false,
            RuleKind::Egress => true,
        }
    }

    pub fn from_is_egress(is_egress: bool) -> Self {
        if is_egress {
            RuleKind::Egress
        } else {
            RuleKind::Ingress
        }
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ingress" => Ok(RuleKind::Ingress),
            "egress" => Ok(RuleKind::Egress),
            other => Err(format!(
                "Unknown rule type '{}', expected 'ingress' or 'egress'",
                other
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_through_str() {
        for kind in [RuleKind::Ingress, RuleKind::Egress] {
            assert_eq!(kind.to_string().parse::<RuleKind>(), Ok(kind));
        }
    }

    #[test]
    fn test_is_egress() {
        assert!(!RuleKind::Ingress.is_egress());
        assert!(RuleKind::Egress.is_egress());
        assert_eq!(RuleKind::from_is_egress(true), RuleKind::Egress);
    }

    #[test]
    fn test_unknown_rule_type() {
        let err = "sideways".parse::<RuleKind>().unwrap_err();
        assert!(err.contains("sideways"));
    }
}
