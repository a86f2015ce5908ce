use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

pub const NODE_PLOT_BYPASS: &str = "towns.plot.bypass";

/// Rank of a resident inside one town. Declaration order is the rank order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TownRank {
    Resident,
    Assistant,
    #[serde(rename = "coowner")]
    CoOwner,
    Mayor,
}

/// Rank of a town inside a nation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NationRank {
    Town,
    Capital,
}

pub trait Rank: Copy + Ord + fmt::Debug + 'static {
    const ALL: &'static [Self];
}

impl Rank for TownRank {
    const ALL: &'static [Self] = &[
        TownRank::Resident,
        TownRank::Assistant,
        TownRank::CoOwner,
        TownRank::Mayor,
    ];
}

impl Rank for NationRank {
    const ALL: &'static [Self] = &[NationRank::Town, NationRank::Capital];
}

impl TownRank {
    pub fn name(self) -> &'static str {
        match self {
            TownRank::Resident => "resident",
            TownRank::Assistant => "assistant",
            TownRank::CoOwner => "coowner",
            TownRank::Mayor => "mayor",
        }
    }

    pub fn code(self) -> char {
        match self {
            TownRank::Resident => 'R',
            TownRank::Assistant => 'A',
            TownRank::CoOwner => 'C',
            TownRank::Mayor => 'M',
        }
    }
}

impl FromStr for TownRank {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "resident" | "r" => Ok(TownRank::Resident),
            "assistant" | "a" => Ok(TownRank::Assistant),
            "coowner" | "co-owner" | "c" => Ok(TownRank::CoOwner),
            "mayor" | "m" => Ok(TownRank::Mayor),
            other => Err(format!("unknown town rank '{other}'")),
        }
    }
}

impl fmt::Display for TownRank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl NationRank {
    pub fn name(self) -> &'static str {
        match self {
            NationRank::Town => "town",
            NationRank::Capital => "capital",
        }
    }
}

impl FromStr for NationRank {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "town" | "t" => Ok(NationRank::Town),
            "capital" | "c" => Ok(NationRank::Capital),
            other => Err(format!("unknown nation rank '{other}'")),
        }
    }
}

impl fmt::Display for NationRank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Permission nodes granted per rank of one scope.
///
/// Grants are cumulative: a rank holds its own nodes plus every node granted
/// to a lower rank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankTable<R: Rank> {
    grants: BTreeMap<R, BTreeSet<String>>,
}

impl<R: Rank> RankTable<R> {
    pub fn empty() -> Self {
        Self {
            grants: BTreeMap::new(),
        }
    }

    pub fn grant(&mut self, rank: R, node: impl Into<String>) {
        self.grants.entry(rank).or_default().insert(node.into());
    }

    /// Nodes granted directly to `rank`, without inheritance.
    pub fn own_nodes(&self, rank: R) -> impl Iterator<Item = &str> {
        self.grants
            .get(&rank)
            .into_iter()
            .flat_map(|nodes| nodes.iter().map(String::as_str))
    }

    pub fn has_permission(&self, rank: R, node: &str) -> bool {
        self.grants
            .range(..=rank)
            .any(|(_, nodes)| nodes.contains(node))
    }

    pub fn effective_nodes(&self, rank: R) -> BTreeSet<&str> {
        self.grants
            .range(..=rank)
            .flat_map(|(_, nodes)| nodes.iter().map(String::as_str))
            .collect()
    }
}

impl RankTable<TownRank> {
    pub fn town_defaults() -> Self {
        let mut table = Self::empty();
        for node in [
            "towns.perm.modify",
            "towns.perm.access",
            "towns.perm.enter",
            "towns.cmd.resident.info",
            "towns.cmd.resident.select",
            "towns.cmd.resident.leave",
        ] {
            table.grant(TownRank::Resident, node);
        }
        for node in [
            "towns.cmd.assistant.claim",
            "towns.cmd.assistant.unclaim",
            "towns.cmd.assistant.add",
            "towns.cmd.assistant.remove",
            "towns.cmd.assistant.perm.set",
            "towns.cmd.assistant.plot.new",
            "towns.cmd.assistant.plot.delete",
        ] {
            table.grant(TownRank::Assistant, node);
        }
        table.grant(TownRank::CoOwner, "towns.cmd.coowner.rank.set");
        table.grant(TownRank::CoOwner, NODE_PLOT_BYPASS);
        table.grant(TownRank::Mayor, "towns.cmd.mayor.disband");
        table.grant(TownRank::Mayor, "towns.cmd.mayor.nation");
        table
    }
}

impl RankTable<NationRank> {
    pub fn nation_defaults() -> Self {
        let mut table = Self::empty();
        table.grant(NationRank::Town, "towns.nation.member");
        table.grant(NationRank::Capital, "towns.nation.manage");
        table
    }
}
