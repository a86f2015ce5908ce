use crate::entities::error::DomainError;
use crate::entities::flag::{FlagSet, FlagType, FlagValue};
use crate::entities::plot::Plot;
use crate::entities::rank::{NationRank, TownRank};
use crate::entities::{NationId, PlotId, TownId};
use crate::world::position::{ChunkPos, Volume};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Town {
    pub id: TownId,
    pub name: String,
    pub extra_blocks: u32,
    pub flags: FlagSet,
    residents: BTreeMap<Uuid, TownRank>,
    blocks: BTreeSet<ChunkPos>,
    plots: BTreeMap<PlotId, Plot>,
    nation: Option<(NationId, NationRank)>,
}

impl Town {
    pub fn new(id: TownId, name: impl Into<String>, extra_blocks: u32) -> Self {
        Self {
            id,
            name: name.into(),
            extra_blocks,
            flags: FlagSet::default(),
            residents: BTreeMap::new(),
            blocks: BTreeSet::new(),
            plots: BTreeMap::new(),
            nation: None,
        }
    }

    pub fn residents(&self) -> impl Iterator<Item = (Uuid, TownRank)> + '_ {
        self.residents.iter().map(|(uuid, rank)| (*uuid, *rank))
    }

    pub fn resident_count(&self) -> usize {
        self.residents.len()
    }

    pub fn rank_of(&self, resident: Uuid) -> Option<TownRank> {
        self.residents.get(&resident).copied()
    }

    pub fn mayors(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.residents
            .iter()
            .filter(|(_, rank)| **rank == TownRank::Mayor)
            .map(|(uuid, _)| *uuid)
    }

    pub fn blocks(&self) -> impl Iterator<Item = ChunkPos> + '_ {
        self.blocks.iter().copied()
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn owns_block(&self, chunk: ChunkPos) -> bool {
        self.blocks.contains(&chunk)
    }

    pub fn plots(&self) -> impl Iterator<Item = &Plot> {
        self.plots.values()
    }

    pub fn plot(&self, id: PlotId) -> Option<&Plot> {
        self.plots.get(&id)
    }

    pub fn plot_by_name(&self, name: &str) -> Option<&Plot> {
        self.plots
            .values()
            .find(|plot| plot.name.eq_ignore_ascii_case(name))
    }

    pub fn plots_owned_by(&self, resident: Uuid) -> usize {
        self.plots
            .values()
            .filter(|plot| plot.is_owner(resident))
            .count()
    }

    pub fn nation(&self) -> Option<(NationId, NationRank)> {
        self.nation
    }

    /// Effective value of `flag` at town level.
    pub fn flag_value(&self, flag: FlagType) -> FlagValue {
        self.flags.value_or_default(flag)
    }

    /// Whether every chunk touched by `volume` is claimed by this town.
    pub fn covers(&self, volume: &Volume) -> bool {
        if volume.chunk_count() > self.blocks.len() as u64 {
            return false;
        }
        volume.chunks().all(|chunk| self.blocks.contains(&chunk))
    }

    /// Rejects rank changes that would leave the town without a mayor.
    pub fn check_rank_change(&self, resident: Uuid, new_rank: Option<TownRank>) -> Result<(), DomainError> {
        let current = self.rank_of(resident).ok_or(DomainError::NotAMember {
            resident,
            town: self.id,
        })?;
        if current == TownRank::Mayor
            && new_rank != Some(TownRank::Mayor)
            && self.mayors().count() <= 1
        {
            return Err(DomainError::LastMayor(self.id));
        }
        Ok(())
    }

    pub(crate) fn set_resident(&mut self, resident: Uuid, rank: TownRank) -> Option<TownRank> {
        self.residents.insert(resident, rank)
    }

    pub(crate) fn remove_resident(&mut self, resident: Uuid) -> Option<TownRank> {
        self.residents.remove(&resident)
    }

    pub(crate) fn insert_block(&mut self, chunk: ChunkPos) -> bool {
        self.blocks.insert(chunk)
    }

    pub(crate) fn remove_block(&mut self, chunk: ChunkPos) -> bool {
        self.blocks.remove(&chunk)
    }

    pub(crate) fn insert_plot(&mut self, plot: Plot) {
        self.plots.insert(plot.id, plot);
    }

    pub(crate) fn remove_plot(&mut self, id: PlotId) -> Option<Plot> {
        self.plots.remove(&id)
    }

    pub(crate) fn plot_mut(&mut self, id: PlotId) -> Option<&mut Plot> {
        self.plots.get_mut(&id)
    }

    pub(crate) fn set_nation(&mut self, nation: Option<(NationId, NationRank)>) {
        self.nation = nation;
    }
}
