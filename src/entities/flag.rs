use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlagType {
    /// Breaking and placing blocks.
    Modify,
    /// Using blocks and interacting with entities.
    Access,
    Enter,
    Pvp,
    Explosions,
    Mobs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MobsMode {
    All,
    Hostiles,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FlagValue {
    Bool(bool),
    Mobs(MobsMode),
}

impl FlagType {
    pub const ALL: [FlagType; 6] = [
        FlagType::Modify,
        FlagType::Access,
        FlagType::Enter,
        FlagType::Pvp,
        FlagType::Explosions,
        FlagType::Mobs,
    ];

    pub fn name(self) -> &'static str {
        match self {
            FlagType::Modify => "modify",
            FlagType::Access => "access",
            FlagType::Enter => "enter",
            FlagType::Pvp => "pvp",
            FlagType::Explosions => "explosions",
            FlagType::Mobs => "mobs",
        }
    }

    pub fn default_value(self) -> FlagValue {
        match self {
            FlagType::Modify | FlagType::Access | FlagType::Pvp | FlagType::Explosions => {
                FlagValue::Bool(false)
            }
            FlagType::Enter => FlagValue::Bool(true),
            FlagType::Mobs => FlagValue::Mobs(MobsMode::Hostiles),
        }
    }

    /// Rank node letting town members ignore this flag. World-behaviour flags
    /// have none and apply to everyone.
    pub fn bypass_node(self) -> Option<&'static str> {
        match self {
            FlagType::Modify => Some("towns.perm.modify"),
            FlagType::Access => Some("towns.perm.access"),
            FlagType::Enter => Some("towns.perm.enter"),
            FlagType::Pvp | FlagType::Explosions | FlagType::Mobs => None,
        }
    }

    pub fn accepts(self, value: FlagValue) -> bool {
        matches!(
            (self, value),
            (FlagType::Mobs, FlagValue::Mobs(_)) | (
                FlagType::Modify
                    | FlagType::Access
                    | FlagType::Enter
                    | FlagType::Pvp
                    | FlagType::Explosions,
                FlagValue::Bool(_)
            )
        )
    }

    /// Parses a user-supplied value for this flag.
    pub fn parse_value(self, raw: &str) -> Option<FlagValue> {
        let raw = raw.trim().to_ascii_lowercase();
        match self {
            FlagType::Mobs => match raw.as_str() {
                "all" => Some(FlagValue::Mobs(MobsMode::All)),
                "hostiles" => Some(FlagValue::Mobs(MobsMode::Hostiles)),
                "none" => Some(FlagValue::Mobs(MobsMode::None)),
                _ => None,
            },
            _ => match raw.as_str() {
                "true" | "on" | "allow" => Some(FlagValue::Bool(true)),
                "false" | "off" | "deny" => Some(FlagValue::Bool(false)),
                _ => None,
            },
        }
    }
}

impl FromStr for FlagType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let lowered = value.trim().to_ascii_lowercase();
        FlagType::ALL
            .into_iter()
            .find(|flag| flag.name() == lowered)
            .ok_or_else(|| format!("unknown flag '{value}'"))
    }
}

impl fmt::Display for FlagType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FlagValue {
    /// Whether this value lets an action through. `hostile` only matters for
    /// the mobs flag.
    pub fn permits(self, hostile: bool) -> bool {
        match self {
            FlagValue::Bool(value) => value,
            FlagValue::Mobs(MobsMode::All) => true,
            FlagValue::Mobs(MobsMode::Hostiles) => !hostile,
            FlagValue::Mobs(MobsMode::None) => false,
        }
    }
}

impl fmt::Display for FlagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlagValue::Bool(value) => write!(f, "{value}"),
            FlagValue::Mobs(MobsMode::All) => f.write_str("all"),
            FlagValue::Mobs(MobsMode::Hostiles) => f.write_str("hostiles"),
            FlagValue::Mobs(MobsMode::None) => f.write_str("none"),
        }
    }
}

/// Flag overrides held by a town or a plot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagSet {
    values: BTreeMap<FlagType, FlagValue>,
}

impl FlagSet {
    pub fn get(&self, flag: FlagType) -> Option<FlagValue> {
        self.values.get(&flag).copied()
    }

    pub fn value_or_default(&self, flag: FlagType) -> FlagValue {
        self.get(flag).unwrap_or_else(|| flag.default_value())
    }

    /// Returns the previous override.
    pub fn set(&mut self, flag: FlagType, value: FlagValue) -> Option<FlagValue> {
        self.values.insert(flag, value)
    }

    pub fn clear(&mut self, flag: FlagType) -> Option<FlagValue> {
        self.values.remove(&flag)
    }

    pub fn iter(&self) -> impl Iterator<Item = (FlagType, FlagValue)> + '_ {
        self.values.iter().map(|(flag, value)| (*flag, *value))
    }
}
