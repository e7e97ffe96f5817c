//! Test levels and the policy mapping them onto check categories.

use crate::error::LevelError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Cumulative scope selector.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TestLevel {
    /// Formatting and lints only.
    Style = 0,

    /// Style plus unit and doc tests.
    Functionality = 1,

    /// Everything that runs on the current host.
    Host = 2,

    /// Host checks plus every configured cross target.
    Cross = 3,
}

impl TestLevel {
    /// All levels, lowest first.
    pub const ALL: [TestLevel; 4] = [
        TestLevel::Style,
        TestLevel::Functionality,
        TestLevel::Host,
        TestLevel::Cross,
    ];

    /// Numeric value of this level.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Level for a numeric value.
    pub fn from_u8(value: u8) -> Result<Self, LevelError> {
        Self::ALL
            .into_iter()
            .find(|level| level.as_u8() == value)
            .ok_or_else(|| LevelError::Unknown(value.to_string()))
    }

    /// Selector name of this level.
    pub fn name(self) -> &'static str {
        match self {
            TestLevel::Style => "style",
            TestLevel::Functionality => "functionality",
            TestLevel::Host => "host",
            TestLevel::Cross => "cross",
        }
    }
}

impl std::fmt::Display for TestLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.as_u8(), self.name())
    }
}

impl FromStr for TestLevel {
    type Err = LevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let selector = s.trim().to_lowercase();
        if let Ok(value) = selector.parse::<u8>() {
            return Self::from_u8(value);
        }
        match selector.as_str() {
            "style" => Ok(TestLevel::Style),
            "functionality" | "func" => Ok(TestLevel::Functionality),
            "host" => Ok(TestLevel::Host),
            "cross" | "full" => Ok(TestLevel::Cross),
            _ => Err(LevelError::Unknown(s.to_string())),
        }
    }
}

/// Comparison used to decide whether a level reaches a category.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LevelGate {
    /// A category of rank `r` runs when `level >= r`.
    #[default]
    Inclusive,

    /// A category of rank `r` runs when `level > r`; style always runs.
    Exclusive,
}

impl LevelGate {
    /// Whether `level` reaches a category of `rank`.
    pub fn admits(self, level: TestLevel, rank: u8) -> bool {
        if rank == 0 {
            return true;
        }
        match self {
            LevelGate::Inclusive => level.as_u8() >= rank,
            LevelGate::Exclusive => level.as_u8() > rank,
        }
    }
}

impl FromStr for LevelGate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "inclusive" | ">=" => Ok(LevelGate::Inclusive),
            "exclusive" | ">" => Ok(LevelGate::Exclusive),
            other => Err(format!(
                "expected 'inclusive' or 'exclusive', got '{}'",
                other
            )),
        }
    }
}

/// How requested levels are interpreted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct LevelPolicy {
    /// Comparison between the requested level and a category's rank.
    pub gate: LevelGate,

    /// Highest level a run may request.
    pub ceiling: TestLevel,
}

impl Default for LevelPolicy {
    fn default() -> Self {
        Self {
            gate: LevelGate::Inclusive,
            ceiling: TestLevel::Cross,
        }
    }
}

impl LevelPolicy {
    /// Reject levels above the ceiling.
    pub fn check(&self, level: TestLevel) -> Result<(), LevelError> {
        if level > self.ceiling {
            return Err(LevelError::AboveCeiling {
                requested: level.as_u8(),
                ceiling: self.ceiling.as_u8(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_numeric_levels() {
        assert_eq!("0".parse::<TestLevel>().unwrap(), TestLevel::Style);
        assert_eq!("1".parse::<TestLevel>().unwrap(), TestLevel::Functionality);
        assert_eq!("2".parse::<TestLevel>().unwrap(), TestLevel::Host);
        assert_eq!("3".parse::<TestLevel>().unwrap(), TestLevel::Cross);
        assert!("4".parse::<TestLevel>().is_err());
    }

    #[test]
    fn test_parse_named_levels() {
        assert_eq!("style".parse::<TestLevel>().unwrap(), TestLevel::Style);
        assert_eq!("FUNC".parse::<TestLevel>().unwrap(), TestLevel::Functionality);
        assert_eq!("host".parse::<TestLevel>().unwrap(), TestLevel::Host);
        assert_eq!("full".parse::<TestLevel>().unwrap(), TestLevel::Cross);
        assert_eq!("cross".parse::<TestLevel>().unwrap(), TestLevel::Cross);

        let err = "everything".parse::<TestLevel>().unwrap_err();
        assert_eq!(err, LevelError::Unknown("everything".to_string()));
    }

    #[test]
    fn test_inclusive_gate() {
        let gate = LevelGate::Inclusive;
        assert!(gate.admits(TestLevel::Style, 0));
        assert!(!gate.admits(TestLevel::Style, 1));
        assert!(gate.admits(TestLevel::Functionality, 1));
        assert!(gate.admits(TestLevel::Cross, 3));
    }

    #[test]
    fn test_exclusive_gate_is_off_by_one() {
        let gate = LevelGate::Exclusive;
        assert!(gate.admits(TestLevel::Style, 0));
        assert!(!gate.admits(TestLevel::Functionality, 1));
        assert!(gate.admits(TestLevel::Host, 1));
        assert!(!gate.admits(TestLevel::Cross, 3));
    }

    #[test]
    fn test_parse_gate() {
        assert_eq!(">=".parse::<LevelGate>().unwrap(), LevelGate::Inclusive);
        assert_eq!("Exclusive".parse::<LevelGate>().unwrap(), LevelGate::Exclusive);
        assert!("sometimes".parse::<LevelGate>().is_err());
    }

    #[test]
    fn test_ceiling() {
        let policy = LevelPolicy {
            gate: LevelGate::Inclusive,
            ceiling: TestLevel::Host,
        };
        assert!(policy.check(TestLevel::Host).is_ok());
        assert_eq!(
            policy.check(TestLevel::Cross),
            Err(LevelError::AboveCeiling {
                requested: 3,
                ceiling: 2
            })
        );
    }
}
