use crate::config::TownsConfig;
use crate::entities::error::DomainError;
use crate::entities::flag::{FlagType, FlagValue};
use crate::entities::nation::Nation;
use crate::entities::plot::Plot;
use crate::entities::rank::{NationRank, RankTable, TownRank};
use crate::entities::resident::{AvatarId, Resident};
use crate::entities::town::Town;
use crate::entities::{NationId, PlotId, TownId};
use crate::persistence::datasource::{
    lock, BlockRecord, MembershipRecord, Mutation, NationLinkRecord, NationRecord,
    PersistenceError, PlotRecord, ResidentRecord, SharedDatasource, TownRecord,
};
use crate::world::position::{BlockPos, ChunkPos, Dimension, Volume};
use crate::world::registry::{SpatialRegistry, TownBlock};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum UniverseError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl UniverseError {
    pub fn domain(&self) -> Option<&DomainError> {
        match self {
            UniverseError::Domain(err) => Some(err),
            UniverseError::Persistence(_) => None,
        }
    }
}

/// All towns, residents and nations of one server session, plus the
/// coordinate index over their claims.
///
/// Every mutator validates first, then writes the change through the
/// datasource and only touches the in-memory model once the write succeeded,
/// so a failed write leaves both sides as they were.
pub struct Universe {
    config: TownsConfig,
    town_ranks: RankTable<TownRank>,
    nation_ranks: RankTable<NationRank>,
    towns: BTreeMap<TownId, Town>,
    residents: HashMap<Uuid, Resident>,
    nations: BTreeMap<NationId, Nation>,
    plot_index: HashMap<PlotId, TownId>,
    registry: SpatialRegistry,
    datasource: SharedDatasource,
    next_town: u32,
    next_plot: u32,
    next_nation: u32,
}

impl Universe {
    pub fn new(config: TownsConfig, datasource: SharedDatasource) -> Self {
        Self {
            town_ranks: config.town_rank_table(),
            nation_ranks: config.nation_rank_table(),
            config,
            towns: BTreeMap::new(),
            residents: HashMap::new(),
            nations: BTreeMap::new(),
            plot_index: HashMap::new(),
            registry: SpatialRegistry::new(),
            datasource,
            next_town: 1,
            next_plot: 1,
            next_nation: 1,
        }
    }

    /// Builds the model from everything the datasource holds.
    pub fn load(config: TownsConfig, datasource: SharedDatasource) -> Result<Self, UniverseError> {
        let mut universe = Self::new(config, datasource.clone());
        let mut source = lock(&datasource)?;

        for record in source.load_residents()? {
            let mut resident = Resident::new(record.uuid, record.name, record.joined);
            resident.last_login = record.last_login;
            resident.set_selected_town(record.selected_town);
            universe.residents.insert(record.uuid, resident);
        }

        for record in source.load_towns()? {
            let mut town = Town::new(record.id, record.name, record.extra_blocks);
            town.flags = record.flags;
            for block in source.load_town_blocks(record.id)? {
                if universe.registry.insert_block(block.chunk, record.id) {
                    town.insert_block(block.chunk);
                } else {
                    warn!(
                        target: "datasource",
                        "block {} of town {:?} is already claimed, skipping",
                        block.chunk,
                        record.id
                    );
                }
            }
            universe.next_town = universe.next_town.max(record.id.0 + 1);
            universe.towns.insert(record.id, town);
        }

        let town_ids: Vec<TownId> = universe.towns.keys().copied().collect();
        for town_id in town_ids {
            for record in source.load_town_plots(town_id)? {
                let mut plot = Plot::new(record.id, town_id, record.name, record.volume, record.owners);
                plot.flags = record.flags;
                universe.registry.insert_plot(plot.id, &plot.volume);
                universe.plot_index.insert(plot.id, town_id);
                universe.next_plot = universe.next_plot.max(plot.id.0 + 1);
                if let Some(town) = universe.towns.get_mut(&town_id) {
                    town.insert_plot(plot);
                }
            }
        }

        for link in source.load_memberships()? {
            let (Some(town), Some(resident)) = (
                universe.towns.get_mut(&link.town),
                universe.residents.get_mut(&link.resident),
            ) else {
                warn!(
                    target: "datasource",
                    "dangling membership {} -> {:?}, skipping",
                    link.resident,
                    link.town
                );
                continue;
            };
            town.set_resident(link.resident, link.rank);
            let selected = resident.raw_selected_town();
            resident.link_town(link.town);
            resident.set_selected_town(selected);
        }

        for record in source.load_nations()? {
            universe.next_nation = universe.next_nation.max(record.id.0 + 1);
            universe.nations.insert(
                record.id,
                Nation::new(record.id, record.name, record.extra_blocks_per_town),
            );
        }

        for link in source.load_nation_links()? {
            let (Some(nation), Some(town)) = (
                universe.nations.get_mut(&link.nation),
                universe.towns.get_mut(&link.town),
            ) else {
                warn!(target: "datasource", "dangling nation link for {:?}, skipping", link.town);
                continue;
            };
            nation.link_town(link.town, link.rank);
            town.set_nation(Some((link.nation, link.rank)));
        }

        drop(source);
        info!(
            target: "towns",
            "loaded {} towns, {} residents, {} nations, {} blocks",
            universe.towns.len(),
            universe.residents.len(),
            universe.nations.len(),
            universe.registry.len()
        );
        Ok(universe)
    }

    pub fn config(&self) -> &TownsConfig {
        &self.config
    }

    pub fn town_ranks(&self) -> &RankTable<TownRank> {
        &self.town_ranks
    }

    pub fn nation_ranks(&self) -> &RankTable<NationRank> {
        &self.nation_ranks
    }

    pub fn registry(&self) -> &SpatialRegistry {
        &self.registry
    }

    pub fn towns(&self) -> impl Iterator<Item = &Town> {
        self.towns.values()
    }

    pub fn town(&self, id: TownId) -> Option<&Town> {
        self.towns.get(&id)
    }

    pub fn town_by_name(&self, name: &str) -> Option<&Town> {
        self.towns
            .values()
            .find(|town| town.name.eq_ignore_ascii_case(name))
    }

    pub fn residents(&self) -> impl Iterator<Item = &Resident> {
        self.residents.values()
    }

    pub fn resident(&self, uuid: Uuid) -> Option<&Resident> {
        self.residents.get(&uuid)
    }

    pub fn resident_by_name(&self, name: &str) -> Option<&Resident> {
        self.residents
            .values()
            .find(|resident| resident.name.eq_ignore_ascii_case(name))
    }

    pub fn nations(&self) -> impl Iterator<Item = &Nation> {
        self.nations.values()
    }

    pub fn nation(&self, id: NationId) -> Option<&Nation> {
        self.nations.get(&id)
    }

    pub fn plot(&self, id: PlotId) -> Option<&Plot> {
        let town = self.plot_index.get(&id)?;
        self.towns.get(town)?.plot(id)
    }

    pub fn block_at(&self, dim: Dimension, chunk_x: i32, chunk_z: i32) -> Option<&TownBlock> {
        self.registry.block(ChunkPos::new(dim, chunk_x, chunk_z))
    }

    pub fn town_at(&self, pos: BlockPos) -> Option<&Town> {
        let owner = self.registry.owner_of(pos.chunk())?;
        self.towns.get(&owner)
    }

    /// The plot covering `pos`. Plots of one block are not expected to
    /// overlap; the first match wins.
    pub fn plot_at(&self, pos: BlockPos) -> Option<&Plot> {
        let chunk = pos.chunk();
        let town = self.towns.get(&self.registry.owner_of(chunk)?)?;
        self.registry
            .plots_in(chunk)
            .iter()
            .filter_map(|id| town.plot(*id))
            .find(|plot| plot.contains(pos))
    }

    /// Every plot whose volume intersects `volume`.
    pub fn plots_intersecting(&self, volume: &Volume) -> Vec<&Plot> {
        let mut plots: Vec<&Plot> = Vec::new();
        for block in self.registry.claimed_in(volume) {
            let Some(town) = self.towns.get(&block.town) else {
                continue;
            };
            for id in block.plots() {
                if let Some(plot) = town.plot(*id) {
                    if plot.volume.intersects(volume) && !plots.iter().any(|seen| seen.id == plot.id) {
                        plots.push(plot);
                    }
                }
            }
        }
        plots
    }

    /// Whether `resident` holds `node` in `town` through their rank.
    pub fn has_town_node(&self, town: TownId, resident: Uuid, node: &str) -> bool {
        self.towns
            .get(&town)
            .and_then(|town| town.rank_of(resident))
            .is_some_and(|rank| self.town_ranks.has_permission(rank, node))
    }

    pub fn block_quota(&self, town: &Town) -> usize {
        let nation_extra = town
            .nation()
            .and_then(|(nation, _)| self.nations.get(&nation))
            .map_or(0, |nation| nation.extra_blocks_per_town);
        let total = u64::from(self.config.default_blocks)
            + u64::from(self.config.blocks_per_resident) * town.resident_count() as u64
            + u64::from(town.extra_blocks)
            + u64::from(nation_extra);
        usize::try_from(total).unwrap_or(usize::MAX)
    }

    pub fn set_avatar(&mut self, resident: Uuid, avatar: Option<AvatarId>) -> Result<(), DomainError> {
        let resident = self
            .residents
            .get_mut(&resident)
            .ok_or(DomainError::UnknownResident(resident))?;
        resident.set_avatar(avatar);
        Ok(())
    }

    /// Creates the resident on first join, refreshes name and login time
    /// afterwards.
    pub fn register_resident(&mut self, uuid: Uuid, name: &str, now: u64) -> Result<&Resident, UniverseError> {
        let mutation = match self.residents.get(&uuid) {
            Some(existing) => {
                let mut record = resident_record(existing);
                record.name = name.to_string();
                record.last_login = now;
                Mutation::UpdateResident(record)
            }
            None => Mutation::InsertResident(ResidentRecord {
                uuid,
                name: name.to_string(),
                joined: now,
                last_login: now,
                selected_town: None,
            }),
        };
        self.persist(&[mutation])?;
        let resident = self
            .residents
            .entry(uuid)
            .or_insert_with(|| Resident::new(uuid, name, now));
        resident.name = name.to_string();
        resident.last_login = now;
        Ok(&*resident)
    }

    pub fn new_town(&mut self, name: &str, mayor: Uuid, chunk: ChunkPos) -> Result<TownId, UniverseError> {
        let resident = self.require_resident(mayor)?;
        if self.town_by_name(name).is_some() {
            return Err(DomainError::NameTaken(name.to_string()).into());
        }
        if let Some(owner) = self.registry.owner_of(chunk) {
            return Err(DomainError::AlreadyClaimed { chunk, owner }.into());
        }

        let id = TownId(self.next_town);
        let mut town = Town::new(id, name, 0);
        town.flags = self.config.default_town_flags();
        let mut resident_row = resident_record(resident);
        if resident.raw_selected_town().is_none() {
            resident_row.selected_town = Some(id);
        }
        self.persist(&[
            Mutation::InsertTown(town_record(&town)),
            Mutation::LinkResident(MembershipRecord {
                town: id,
                resident: mayor,
                rank: TownRank::Mayor,
            }),
            Mutation::InsertBlock(BlockRecord { town: id, chunk }),
            Mutation::UpdateResident(resident_row),
        ])?;

        town.set_resident(mayor, TownRank::Mayor);
        town.insert_block(chunk);
        self.registry.insert_block(chunk, id);
        self.towns.insert(id, town);
        if let Some(resident) = self.residents.get_mut(&mayor) {
            resident.link_town(id);
        }
        self.next_town += 1;
        info!(target: "towns", "town '{}' ({:?}) founded by {} at {}", name, id, mayor, chunk);
        Ok(id)
    }

    /// Removes the town with its blocks and plots and unlinks its residents.
    pub fn disband_town(&mut self, id: TownId) -> Result<(), UniverseError> {
        let town = self.require_town(id)?;
        let mut batch = vec![Mutation::DeleteTown(id)];
        for (uuid, _) in town.residents() {
            if let Some(resident) = self.residents.get(&uuid) {
                if resident.raw_selected_town() == Some(id) {
                    let mut row = resident_record(resident);
                    row.selected_town = None;
                    batch.push(Mutation::UpdateResident(row));
                }
            }
        }
        let emptied_nation = town.nation().and_then(|(nation, _)| {
            self.nations
                .get(&nation)
                .filter(|nation| nation.towns().count() == 1)
                .map(|nation| nation.id)
        });
        if let Some(nation) = emptied_nation {
            batch.push(Mutation::DeleteNation(nation));
        }
        self.persist(&batch)?;

        let Some(town) = self.towns.remove(&id) else {
            return Ok(());
        };
        for chunk in town.blocks() {
            self.registry.remove_block(chunk);
        }
        for plot in town.plots() {
            self.plot_index.remove(&plot.id);
        }
        for (uuid, _) in town.residents() {
            if let Some(resident) = self.residents.get_mut(&uuid) {
                resident.unlink_town(id);
            }
        }
        if let Some((nation, _)) = town.nation() {
            if let Some(entry) = self.nations.get_mut(&nation) {
                entry.unlink_town(id);
            }
        }
        if let Some(nation) = emptied_nation {
            self.nations.remove(&nation);
        }
        info!(target: "towns", "town '{}' ({:?}) disbanded", town.name, id);
        Ok(())
    }

    pub fn add_resident(&mut self, town_id: TownId, uuid: Uuid, rank: TownRank) -> Result<(), UniverseError> {
        let town = self.require_town(town_id)?;
        let resident = self.require_resident(uuid)?;
        if town.rank_of(uuid).is_some() {
            return Err(DomainError::AlreadyMember {
                resident: uuid,
                town: town_id,
            }
            .into());
        }
        let mut batch = vec![Mutation::LinkResident(MembershipRecord {
            town: town_id,
            resident: uuid,
            rank,
        })];
        if resident.raw_selected_town().is_none() {
            let mut row = resident_record(resident);
            row.selected_town = Some(town_id);
            batch.push(Mutation::UpdateResident(row));
        }
        self.persist(&batch)?;

        if let Some(town) = self.towns.get_mut(&town_id) {
            town.set_resident(uuid, rank);
        }
        if let Some(resident) = self.residents.get_mut(&uuid) {
            resident.link_town(town_id);
        }
        info!(target: "towns", "{} joined {:?} as {}", uuid, town_id, rank);
        Ok(())
    }

    /// Unlinks a resident and drops them from the town's plot owners. The
    /// last mayor cannot be removed; designate another mayor first.
    pub fn remove_resident(&mut self, town_id: TownId, uuid: Uuid) -> Result<(), UniverseError> {
        let town = self.require_town(town_id)?;
        town.check_rank_change(uuid, None)?;
        let mut batch = vec![Mutation::UnlinkResident {
            town: town_id,
            resident: uuid,
        }];
        let owned: Vec<PlotId> = town
            .plots()
            .filter(|plot| plot.is_owner(uuid))
            .map(|plot| plot.id)
            .collect();
        for plot in town.plots().filter(|plot| plot.is_owner(uuid)) {
            let mut row = plot_record(plot);
            row.owners.retain(|owner| *owner != uuid);
            batch.push(Mutation::UpdatePlot(row));
        }
        if let Some(resident) = self.residents.get(&uuid) {
            if resident.raw_selected_town() == Some(town_id) {
                let mut row = resident_record(resident);
                row.selected_town = None;
                batch.push(Mutation::UpdateResident(row));
            }
        }
        self.persist(&batch)?;

        if let Some(town) = self.towns.get_mut(&town_id) {
            town.remove_resident(uuid);
            for plot in owned {
                if let Some(plot) = town.plot_mut(plot) {
                    plot.remove_owner(uuid);
                }
            }
        }
        if let Some(resident) = self.residents.get_mut(&uuid) {
            resident.unlink_town(town_id);
        }
        info!(target: "towns", "{} left {:?}", uuid, town_id);
        Ok(())
    }

    pub fn set_rank(&mut self, town_id: TownId, uuid: Uuid, rank: TownRank) -> Result<(), UniverseError> {
        let town = self.require_town(town_id)?;
        town.check_rank_change(uuid, Some(rank))?;
        self.persist(&[Mutation::LinkResident(MembershipRecord {
            town: town_id,
            resident: uuid,
            rank,
        })])?;
        if let Some(town) = self.towns.get_mut(&town_id) {
            town.set_resident(uuid, rank);
        }
        info!(target: "towns", "{} is now {} of {:?}", uuid, rank, town_id);
        Ok(())
    }

    pub fn select_town(&mut self, uuid: Uuid, town: TownId) -> Result<(), UniverseError> {
        let resident = self.require_resident(uuid)?;
        if !resident.is_member_of(town) {
            return Err(DomainError::NotAMember { resident: uuid, town }.into());
        }
        let mut row = resident_record(resident);
        row.selected_town = Some(town);
        self.persist(&[Mutation::UpdateResident(row)])?;
        if let Some(resident) = self.residents.get_mut(&uuid) {
            resident.set_selected_town(Some(town));
        }
        Ok(())
    }

    /// Claims a chunk. Returns `Ok(false)` when the town already owns it.
    pub fn claim_block(&mut self, town_id: TownId, chunk: ChunkPos) -> Result<bool, UniverseError> {
        let town = self.require_town(town_id)?;
        match self.registry.owner_of(chunk) {
            Some(owner) if owner == town_id => return Ok(false),
            Some(owner) => return Err(DomainError::AlreadyClaimed { chunk, owner }.into()),
            None => {}
        }
        let max = self.block_quota(town);
        if town.block_count() >= max {
            return Err(DomainError::BlockQuotaExceeded { town: town_id, max }.into());
        }
        self.persist(&[Mutation::InsertBlock(BlockRecord {
            town: town_id,
            chunk,
        })])?;
        if let Some(town) = self.towns.get_mut(&town_id) {
            town.insert_block(chunk);
        }
        self.registry.insert_block(chunk, town_id);
        info!(target: "towns", "{:?} claimed {}", town_id, chunk);
        Ok(true)
    }

    pub fn unclaim_block(&mut self, town_id: TownId, chunk: ChunkPos) -> Result<(), UniverseError> {
        let town = self.require_town(town_id)?;
        if self.registry.owner_of(chunk) != Some(town_id) {
            return Err(DomainError::NotClaimed { chunk, town: town_id }.into());
        }
        if !self.registry.plots_in(chunk).is_empty() {
            return Err(DomainError::BlockHasPlots { chunk }.into());
        }
        if town.block_count() <= 1 {
            return Err(DomainError::LastBlock(town_id).into());
        }
        self.persist(&[Mutation::DeleteBlock(chunk)])?;
        if let Some(town) = self.towns.get_mut(&town_id) {
            town.remove_block(chunk);
        }
        self.registry.remove_block(chunk);
        info!(target: "towns", "{:?} unclaimed {}", town_id, chunk);
        Ok(())
    }

    pub fn set_extra_blocks(&mut self, town_id: TownId, extra_blocks: u32) -> Result<(), UniverseError> {
        let town = self.require_town(town_id)?;
        let mut row = town_record(town);
        row.extra_blocks = extra_blocks;
        self.persist(&[Mutation::UpdateTown(row)])?;
        if let Some(town) = self.towns.get_mut(&town_id) {
            town.extra_blocks = extra_blocks;
        }
        Ok(())
    }

    pub fn create_plot(
        &mut self,
        town_id: TownId,
        name: &str,
        volume: Volume,
        owners: &[Uuid],
    ) -> Result<PlotId, UniverseError> {
        let town = self.require_town(town_id)?;
        if !town.covers(&volume) {
            return Err(DomainError::OutOfBounds {
                town: town_id,
                volume,
            }
            .into());
        }
        if town.plot_by_name(name).is_some() {
            return Err(DomainError::NameTaken(name.to_string()).into());
        }
        for owner in owners {
            self.check_can_own_plot(town, *owner)?;
        }

        let id = PlotId(self.next_plot);
        let plot = Plot::new(id, town_id, name, volume, owners.iter().copied());
        self.persist(&[Mutation::InsertPlot(plot_record(&plot))])?;

        self.registry.insert_plot(id, &volume);
        self.plot_index.insert(id, town_id);
        if let Some(town) = self.towns.get_mut(&town_id) {
            town.insert_plot(plot);
        }
        self.next_plot += 1;
        info!(target: "towns", "plot '{}' ({:?}) created in {:?} at {}", name, id, town_id, volume);
        Ok(id)
    }

    pub fn delete_plot(&mut self, plot_id: PlotId) -> Result<(), UniverseError> {
        let volume = self.require_plot(plot_id)?.volume;
        self.persist(&[Mutation::DeletePlot(plot_id)])?;
        self.registry.remove_plot(plot_id, &volume);
        if let Some(town) = self
            .plot_index
            .remove(&plot_id)
            .and_then(|town| self.towns.get_mut(&town))
        {
            town.remove_plot(plot_id);
        }
        info!(target: "towns", "plot {:?} deleted", plot_id);
        Ok(())
    }

    pub fn add_plot_owner(&mut self, plot_id: PlotId, uuid: Uuid) -> Result<(), UniverseError> {
        let plot = self.require_plot(plot_id)?;
        if plot.is_owner(uuid) {
            return Err(DomainError::AlreadyOwner {
                resident: uuid,
                plot: plot_id,
            }
            .into());
        }
        let town = self.require_town(plot.town)?;
        self.check_can_own_plot(town, uuid)?;
        let mut row = plot_record(plot);
        row.owners.push(uuid);
        self.persist(&[Mutation::UpdatePlot(row)])?;
        if let Some(plot) = self.plot_mut(plot_id) {
            plot.add_owner(uuid);
        }
        Ok(())
    }

    pub fn remove_plot_owner(&mut self, plot_id: PlotId, uuid: Uuid) -> Result<(), UniverseError> {
        let plot = self.require_plot(plot_id)?;
        if !plot.is_owner(uuid) {
            return Err(DomainError::NotAnOwner {
                resident: uuid,
                plot: plot_id,
            }
            .into());
        }
        let mut row = plot_record(plot);
        row.owners.retain(|owner| *owner != uuid);
        self.persist(&[Mutation::UpdatePlot(row)])?;
        if let Some(plot) = self.plot_mut(plot_id) {
            plot.remove_owner(uuid);
        }
        Ok(())
    }

    pub fn set_town_flag(&mut self, town_id: TownId, flag: FlagType, value: FlagValue) -> Result<(), UniverseError> {
        if !flag.accepts(value) {
            return Err(DomainError::InvalidFlagValue { flag, value }.into());
        }
        let town = self.require_town(town_id)?;
        let mut row = town_record(town);
        row.flags.set(flag, value);
        self.persist(&[Mutation::UpdateTown(row)])?;
        if let Some(town) = self.towns.get_mut(&town_id) {
            town.flags.set(flag, value);
        }
        info!(target: "towns", "{:?} flag {} set to {}", town_id, flag, value);
        Ok(())
    }

    pub fn set_plot_flag(&mut self, plot_id: PlotId, flag: FlagType, value: FlagValue) -> Result<(), UniverseError> {
        if !flag.accepts(value) {
            return Err(DomainError::InvalidFlagValue { flag, value }.into());
        }
        let mut row = plot_record(self.require_plot(plot_id)?);
        row.flags.set(flag, value);
        self.persist(&[Mutation::UpdatePlot(row)])?;
        if let Some(plot) = self.plot_mut(plot_id) {
            plot.flags.set(flag, value);
        }
        info!(target: "towns", "plot {:?} flag {} set to {}", plot_id, flag, value);
        Ok(())
    }

    pub fn clear_plot_flag(&mut self, plot_id: PlotId, flag: FlagType) -> Result<(), UniverseError> {
        let mut row = plot_record(self.require_plot(plot_id)?);
        row.flags.clear(flag);
        self.persist(&[Mutation::UpdatePlot(row)])?;
        if let Some(plot) = self.plot_mut(plot_id) {
            plot.flags.clear(flag);
        }
        Ok(())
    }

    pub fn new_nation(&mut self, name: &str, capital: TownId) -> Result<NationId, UniverseError> {
        let town = self.require_town(capital)?;
        if town.nation().is_some() {
            return Err(DomainError::AlreadyInNation(capital).into());
        }
        if self
            .nations
            .values()
            .any(|nation| nation.name.eq_ignore_ascii_case(name))
        {
            return Err(DomainError::NameTaken(name.to_string()).into());
        }
        let id = NationId(self.next_nation);
        let nation = Nation::new(id, name, 0);
        self.persist(&[
            Mutation::InsertNation(NationRecord {
                id,
                name: nation.name.clone(),
                extra_blocks_per_town: nation.extra_blocks_per_town,
            }),
            Mutation::LinkTownToNation(NationLinkRecord {
                town: capital,
                nation: id,
                rank: NationRank::Capital,
            }),
        ])?;
        self.nations.insert(id, nation);
        self.link_nation_in_memory(capital, id, NationRank::Capital);
        self.next_nation += 1;
        info!(target: "towns", "nation '{}' ({:?}) founded with capital {:?}", name, id, capital);
        Ok(id)
    }

    pub fn link_town_to_nation(&mut self, town_id: TownId, nation_id: NationId, rank: NationRank) -> Result<(), UniverseError> {
        let town = self.require_town(town_id)?;
        if town.nation().is_some() {
            return Err(DomainError::AlreadyInNation(town_id).into());
        }
        if !self.nations.contains_key(&nation_id) {
            return Err(DomainError::UnknownNation(nation_id).into());
        }
        self.persist(&[Mutation::LinkTownToNation(NationLinkRecord {
            town: town_id,
            nation: nation_id,
            rank,
        })])?;
        self.link_nation_in_memory(town_id, nation_id, rank);
        Ok(())
    }

    /// Removes the town from its nation; a nation left empty is deleted.
    pub fn unlink_town_from_nation(&mut self, town_id: TownId) -> Result<(), UniverseError> {
        let town = self.require_town(town_id)?;
        let (nation_id, _) = town.nation().ok_or(DomainError::NotInNation(town_id))?;
        let emptied = self
            .nations
            .get(&nation_id)
            .is_some_and(|nation| nation.towns().count() <= 1);
        let mut batch = vec![Mutation::UnlinkTownFromNation(town_id)];
        if emptied {
            batch.push(Mutation::DeleteNation(nation_id));
        }
        self.persist(&batch)?;
        if let Some(town) = self.towns.get_mut(&town_id) {
            town.set_nation(None);
        }
        if emptied {
            self.nations.remove(&nation_id);
        } else if let Some(nation) = self.nations.get_mut(&nation_id) {
            nation.unlink_town(town_id);
        }
        Ok(())
    }

    fn link_nation_in_memory(&mut self, town: TownId, nation: NationId, rank: NationRank) {
        if let Some(entry) = self.nations.get_mut(&nation) {
            entry.link_town(town, rank);
        }
        if let Some(entry) = self.towns.get_mut(&town) {
            entry.set_nation(Some((nation, rank)));
        }
    }

    fn check_can_own_plot(&self, town: &Town, uuid: Uuid) -> Result<(), DomainError> {
        self.require_resident(uuid)?;
        if town.rank_of(uuid).is_none() {
            return Err(DomainError::NotAMember {
                resident: uuid,
                town: town.id,
            });
        }
        if let Some(max) = self.config.plot_limit() {
            if town.plots_owned_by(uuid) >= max as usize {
                return Err(DomainError::QuotaExceeded {
                    resident: uuid,
                    town: town.id,
                    max,
                });
            }
        }
        Ok(())
    }

    fn plot_mut(&mut self, id: PlotId) -> Option<&mut Plot> {
        let town = self.plot_index.get(&id)?;
        self.towns.get_mut(town)?.plot_mut(id)
    }

    fn require_town(&self, id: TownId) -> Result<&Town, DomainError> {
        self.towns.get(&id).ok_or(DomainError::UnknownTown(id))
    }

    fn require_resident(&self, uuid: Uuid) -> Result<&Resident, DomainError> {
        self.residents
            .get(&uuid)
            .ok_or(DomainError::UnknownResident(uuid))
    }

    fn require_plot(&self, id: PlotId) -> Result<&Plot, DomainError> {
        self.plot(id).ok_or(DomainError::UnknownPlot(id))
    }

    fn persist(&self, batch: &[Mutation]) -> Result<(), PersistenceError> {
        let mut datasource = lock(&self.datasource)?;
        datasource.apply(batch).map_err(|err| {
            error!(target: "datasource", "write of {} mutations failed: {}", batch.len(), err);
            err
        })
    }
}

fn town_record(town: &Town) -> TownRecord {
    TownRecord {
        id: town.id,
        name: town.name.clone(),
        extra_blocks: town.extra_blocks,
        flags: town.flags.clone(),
    }
}

fn resident_record(resident: &Resident) -> ResidentRecord {
    ResidentRecord {
        uuid: resident.uuid,
        name: resident.name.clone(),
        joined: resident.joined,
        last_login: resident.last_login,
        selected_town: resident.raw_selected_town(),
    }
}

fn plot_record(plot: &Plot) -> PlotRecord {
    PlotRecord {
        id: plot.id,
        town: plot.town,
        name: plot.name.clone(),
        volume: plot.volume,
        owners: plot.owners().collect(),
        flags: plot.flags.clone(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::persistence::datasource::MemoryDatasource;
    use std::sync::{Arc, Mutex};

    pub(crate) fn uuid(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    pub(crate) fn memory_universe(config: TownsConfig) -> (Universe, Arc<Mutex<MemoryDatasource>>) {
        let memory = Arc::new(Mutex::new(MemoryDatasource::new()));
        let shared: SharedDatasource = memory.clone();
        (Universe::new(config, shared), memory)
    }

    /// A town "Ashford" on chunks (0,0) and (1,0) of dimension 0 with mayor 1.
    pub(crate) fn ashford() -> (Universe, Arc<Mutex<MemoryDatasource>>, TownId) {
        let (mut universe, memory) = memory_universe(TownsConfig::default());
        universe.register_resident(uuid(1), "Mayor", 0).expect("mayor");
        let town = universe
            .new_town("Ashford", uuid(1), ChunkPos::new(0, 0, 0))
            .expect("town");
        universe
            .claim_block(town, ChunkPos::new(0, 1, 0))
            .expect("second block");
        (universe, memory, town)
    }

    fn fail_writes(memory: &Arc<Mutex<MemoryDatasource>>, fail: bool) {
        memory.lock().expect("lock").set_fail_writes(fail);
    }

    #[test]
    fn plots_intersecting_lists_each_plot_once() {
        let (mut universe, _, town) = ashford();
        let wide = universe
            .create_plot(town, "Wide", Volume::new(0, 4, 0, 0, 27, 255, 15), &[uuid(1)])
            .expect("wide");
        universe
            .create_plot(town, "Corner", Volume::new(0, 0, 0, 0, 2, 255, 2), &[uuid(1)])
            .expect("corner");

        let ids = |volume: Volume| -> Vec<PlotId> {
            universe.plots_intersecting(&volume).iter().map(|plot| plot.id).collect()
        };
        assert_eq!(ids(Volume::new(0, 10, 64, 5, 20, 64, 5)), vec![wide]);
        assert_eq!(ids(Volume::new(0, 0, 64, 0, 3, 64, 3)).len(), 2);
        assert!(ids(Volume::new(0, 40, 64, 0, 50, 64, 5)).is_empty());
        let world = Volume::new(0, -30_000_000, 0, -30_000_000, 30_000_000, 255, 30_000_000);
        assert_eq!(ids(world).len(), 2);
    }

    #[test]
    fn claim_by_other_town_is_rejected() {
        let (mut universe, _, ashford) = ashford();
        universe.register_resident(uuid(2), "Rival", 0).expect("rival");
        let rival = universe
            .new_town("Brookvale", uuid(2), ChunkPos::new(0, 5, 5))
            .expect("rival town");

        let err = universe
            .claim_block(rival, ChunkPos::new(0, 0, 0))
            .expect_err("claimed twice");
        assert_eq!(
            err.domain(),
            Some(&DomainError::AlreadyClaimed {
                chunk: ChunkPos::new(0, 0, 0),
                owner: ashford
            })
        );
    }

    #[test]
    fn claiming_own_block_is_idempotent() {
        let (mut universe, memory, town) = ashford();
        assert!(!universe
            .claim_block(town, ChunkPos::new(0, 0, 0))
            .expect("reclaim"));
        assert_eq!(universe.town(town).expect("town").block_count(), 2);
        assert_eq!(memory.lock().expect("lock").tables().blocks.len(), 2);
    }

    #[test]
    fn block_quota_is_enforced() {
        let (mut universe, _) = memory_universe(TownsConfig {
            default_blocks: 1,
            blocks_per_resident: 0,
            ..TownsConfig::default()
        });
        universe.register_resident(uuid(1), "Mayor", 0).expect("mayor");
        let town = universe
            .new_town("Tiny", uuid(1), ChunkPos::new(0, 0, 0))
            .expect("town");
        let err = universe
            .claim_block(town, ChunkPos::new(0, 1, 0))
            .expect_err("quota");
        assert!(matches!(err.domain(), Some(DomainError::BlockQuotaExceeded { max: 1, .. })));

        universe.set_extra_blocks(town, 1).expect("extra");
        assert!(universe.claim_block(town, ChunkPos::new(0, 1, 0)).expect("claim"));
    }

    #[test]
    fn plot_outside_claims_is_out_of_bounds() {
        let (mut universe, _, town) = ashford();
        let volume = Volume::new(0, 0, 60, 0, 40, 70, 4);
        let err = universe
            .create_plot(town, "Farm", volume, &[uuid(1)])
            .expect_err("out of bounds");
        assert!(matches!(err.domain(), Some(DomainError::OutOfBounds { .. })));

        let inside = Volume::new(0, 0, 60, 0, 31, 70, 4);
        let plot = universe
            .create_plot(town, "Farm", inside, &[uuid(1)])
            .expect("inside");
        assert_eq!(universe.plot_at(BlockPos::new(0, 20, 65, 2)).map(|p| p.id), Some(plot));
        assert_eq!(universe.plot_at(BlockPos::new(0, 20, 65, 5)).map(|p| p.id), None);
    }

    #[test]
    fn plot_quota_counts_per_resident() {
        let (mut universe, _) = memory_universe(TownsConfig {
            max_plots_per_resident: 1,
            ..TownsConfig::default()
        });
        universe.register_resident(uuid(1), "Mayor", 0).expect("mayor");
        universe.register_resident(uuid(2), "Other", 0).expect("other");
        let town = universe
            .new_town("Ashford", uuid(1), ChunkPos::new(0, 0, 0))
            .expect("town");
        universe
            .add_resident(town, uuid(2), TownRank::Resident)
            .expect("add");
        universe
            .create_plot(town, "A", Volume::new(0, 0, 0, 0, 3, 3, 3), &[uuid(1)])
            .expect("first");
        let err = universe
            .create_plot(town, "B", Volume::new(0, 5, 0, 5, 8, 3, 8), &[uuid(2), uuid(1)])
            .expect_err("quota");
        assert_eq!(
            err.domain(),
            Some(&DomainError::QuotaExceeded {
                resident: uuid(1),
                town,
                max: 1
            })
        );
        let plot = universe
            .create_plot(town, "B", Volume::new(0, 5, 0, 5, 8, 3, 8), &[uuid(2)])
            .expect("second resident");
        let err = universe.add_plot_owner(plot, uuid(1)).expect_err("quota");
        assert!(matches!(err.domain(), Some(DomainError::QuotaExceeded { .. })));
    }

    #[test]
    fn last_mayor_cannot_leave() {
        let (mut universe, _, town) = ashford();
        let err = universe.remove_resident(town, uuid(1)).expect_err("last mayor");
        assert_eq!(err.domain(), Some(&DomainError::LastMayor(town)));
        let err = universe
            .set_rank(town, uuid(1), TownRank::Resident)
            .expect_err("demote");
        assert_eq!(err.domain(), Some(&DomainError::LastMayor(town)));

        universe.register_resident(uuid(2), "Heir", 0).expect("heir");
        universe.add_resident(town, uuid(2), TownRank::Mayor).expect("add");
        universe.remove_resident(town, uuid(1)).expect("leave");
        assert!(!universe.resident(uuid(1)).expect("resident").is_member_of(town));
    }

    #[test]
    fn removing_resident_drops_plot_ownership() {
        let (mut universe, _, town) = ashford();
        universe.register_resident(uuid(2), "Farmer", 0).expect("farmer");
        universe.add_resident(town, uuid(2), TownRank::Resident).expect("add");
        let plot = universe
            .create_plot(town, "Farm", Volume::new(0, 0, 0, 0, 3, 3, 3), &[uuid(2)])
            .expect("plot");
        universe.remove_resident(town, uuid(2)).expect("remove");
        assert!(!universe.plot(plot).expect("plot").is_owner(uuid(2)));
    }

    #[test]
    fn failed_write_keeps_memory_unchanged() {
        let (mut universe, memory, town) = ashford();
        fail_writes(&memory, true);

        let err = universe
            .claim_block(town, ChunkPos::new(0, 2, 0))
            .expect_err("write fails");
        assert!(matches!(err, UniverseError::Persistence(_)));
        assert_eq!(universe.registry().owner_of(ChunkPos::new(0, 2, 0)), None);
        assert!(!universe.town(town).expect("town").owns_block(ChunkPos::new(0, 2, 0)));

        assert!(universe
            .set_town_flag(town, FlagType::Pvp, FlagValue::Bool(true))
            .is_err());
        assert_eq!(universe.town(town).expect("town").flags.get(FlagType::Pvp), None);

        assert!(universe
            .create_plot(town, "Farm", Volume::new(0, 0, 0, 0, 3, 3, 3), &[uuid(1)])
            .is_err());
        assert!(universe.plot_at(BlockPos::new(0, 1, 1, 1)).is_none());

        fail_writes(&memory, false);
        assert!(universe.claim_block(town, ChunkPos::new(0, 2, 0)).expect("claim"));
    }

    #[test]
    fn unclaim_rules() {
        let (mut universe, _, town) = ashford();
        universe
            .create_plot(town, "Farm", Volume::new(0, 16, 0, 0, 20, 3, 3), &[uuid(1)])
            .expect("plot");
        let err = universe
            .unclaim_block(town, ChunkPos::new(0, 1, 0))
            .expect_err("has plots");
        assert!(matches!(err.domain(), Some(DomainError::BlockHasPlots { .. })));
        let err = universe
            .unclaim_block(town, ChunkPos::new(0, 9, 9))
            .expect_err("not claimed");
        assert!(matches!(err.domain(), Some(DomainError::NotClaimed { .. })));

        let plot = universe.plot_at(BlockPos::new(0, 17, 1, 1)).expect("plot").id;
        universe.delete_plot(plot).expect("delete");
        universe.unclaim_block(town, ChunkPos::new(0, 1, 0)).expect("unclaim");
        let err = universe
            .unclaim_block(town, ChunkPos::new(0, 0, 0))
            .expect_err("last block");
        assert_eq!(err.domain(), Some(&DomainError::LastBlock(town)));
    }

    #[test]
    fn disband_cascades() {
        let (mut universe, memory, town) = ashford();
        universe
            .create_plot(town, "Farm", Volume::new(0, 0, 0, 0, 3, 3, 3), &[uuid(1)])
            .expect("plot");
        let nation = universe.new_nation("Realm", town).expect("nation");

        universe.disband_town(town).expect("disband");
        assert!(universe.town(town).is_none());
        assert!(universe.registry().is_empty());
        assert!(universe.plot_at(BlockPos::new(0, 1, 1, 1)).is_none());
        assert!(universe.nation(nation).is_none());
        let resident = universe.resident(uuid(1)).expect("resident kept");
        assert_eq!(resident.selected_town(), None);

        let memory = memory.lock().expect("lock");
        assert!(memory.tables().towns.is_empty());
        assert!(memory.tables().plots.is_empty());
        assert!(memory.tables().residents.contains_key(&uuid(1)));
    }

    #[test]
    fn nation_extra_blocks_raise_quota() {
        let (mut universe, _, town) = ashford();
        let before = universe.block_quota(universe.town(town).expect("town"));
        let nation = universe.new_nation("Realm", town).expect("nation");
        assert_eq!(universe.nation(nation).and_then(|n| n.capital()), Some(town));
        assert_eq!(
            universe.block_quota(universe.town(town).expect("town")),
            before
        );
        universe.unlink_town_from_nation(town).expect("unlink");
        assert!(universe.nation(nation).is_none());
    }

    #[test]
    fn load_restores_model_and_index() {
        let (mut universe, memory, town) = ashford();
        universe.register_resident(uuid(2), "Farmer", 0).expect("farmer");
        universe.add_resident(town, uuid(2), TownRank::Assistant).expect("add");
        let plot = universe
            .create_plot(town, "Farm", Volume::new(0, 0, 0, 0, 3, 3, 3), &[uuid(2)])
            .expect("plot");
        universe
            .set_plot_flag(plot, FlagType::Access, FlagValue::Bool(true))
            .expect("flag");

        let shared: SharedDatasource = memory.clone();
        let loaded = Universe::load(TownsConfig::default(), shared).expect("load");
        let town_ref = loaded.town(town).expect("town");
        assert_eq!(town_ref.rank_of(uuid(2)), Some(TownRank::Assistant));
        assert_eq!(town_ref.block_count(), 2);
        let plot_ref = loaded.plot_at(BlockPos::new(0, 2, 2, 2)).expect("plot");
        assert!(plot_ref.is_owner(uuid(2)));
        assert_eq!(plot_ref.flags.get(FlagType::Access), Some(FlagValue::Bool(true)));
        assert!(loaded.resident(uuid(2)).expect("resident").is_member_of(town));
        assert_eq!(loaded.resident(uuid(1)).and_then(|r| r.selected_town()), Some(town));
    }

    #[test]
    fn new_town_name_is_unique() {
        let (mut universe, _, _) = ashford();
        universe.register_resident(uuid(2), "Other", 0).expect("other");
        let err = universe
            .new_town("ashford", uuid(2), ChunkPos::new(0, 7, 7))
            .expect_err("taken");
        assert!(matches!(err.domain(), Some(DomainError::NameTaken(_))));
    }
}
