use crate::entities::rank::NationRank;
use crate::entities::{NationId, TownId};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nation {
    pub id: NationId,
    pub name: String,
    pub extra_blocks_per_town: u32,
    towns: BTreeMap<TownId, NationRank>,
}

impl Nation {
    pub fn new(id: NationId, name: impl Into<String>, extra_blocks_per_town: u32) -> Self {
        Self {
            id,
            name: name.into(),
            extra_blocks_per_town,
            towns: BTreeMap::new(),
        }
    }

    pub fn towns(&self) -> impl Iterator<Item = (TownId, NationRank)> + '_ {
        self.towns.iter().map(|(town, rank)| (*town, *rank))
    }

    pub fn rank_of(&self, town: TownId) -> Option<NationRank> {
        self.towns.get(&town).copied()
    }

    pub fn capital(&self) -> Option<TownId> {
        self.towns
            .iter()
            .find(|(_, rank)| **rank == NationRank::Capital)
            .map(|(town, _)| *town)
    }

    pub(crate) fn link_town(&mut self, town: TownId, rank: NationRank) {
        self.towns.insert(town, rank);
    }

    pub(crate) fn unlink_town(&mut self, town: TownId) -> Option<NationRank> {
        self.towns.remove(&town)
    }
}
