use crate::core::Version;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

/// What an upgrade should end at.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UpgradeTarget {
    /// The single tip reachable from the current version.
    #[default]
    Latest,
    /// The single tip among versions starting with the prefix.
    Prefix(String),
    Exact(Version),
}

impl UpgradeTarget {
    pub fn exact(version: impl Into<Version>) -> Self {
        Self::Exact(version.into())
    }
}

impl FromStr for UpgradeTarget {
    type Err = Infallible;

    /// `latest` (or an empty string) selects the tip, `2.*` a tip by prefix,
    /// anything else is taken literally.
    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let text = text.trim();
        if text.is_empty() || text.eq_ignore_ascii_case("latest") {
            return Ok(Self::Latest);
        }
        Ok(match text.strip_suffix('*') {
            Some(prefix) => Self::Prefix(prefix.to_string()),
            None => Self::Exact(text.to_string()),
        })
    }
}

impl fmt::Display for UpgradeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Latest => f.write_str("latest"),
            Self::Prefix(prefix) => write!(f, "{}*", prefix),
            Self::Exact(version) => f.write_str(version),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_targets() {
        assert_eq!("latest".parse::<UpgradeTarget>().unwrap(), UpgradeTarget::Latest);
        assert_eq!("".parse::<UpgradeTarget>().unwrap(), UpgradeTarget::Latest);
        assert_eq!(
            "2.*".parse::<UpgradeTarget>().unwrap(),
            UpgradeTarget::Prefix("2.".into())
        );
        assert_eq!(
            "1.0.3".parse::<UpgradeTarget>().unwrap(),
            UpgradeTarget::exact("1.0.3")
        );
        assert_eq!(UpgradeTarget::Prefix("2.".into()).to_string(), "2.*");
    }
}
