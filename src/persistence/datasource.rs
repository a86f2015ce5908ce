use crate::entities::flag::FlagSet;
use crate::entities::rank::{NationRank, TownRank};
use crate::entities::{NationId, PlotId, TownId};
use crate::world::position::{ChunkPos, Volume};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("datasource i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("datasource encoding failed: {0}")]
    Encoding(#[from] serde_yaml::Error),
    #[error("constraint violated: {0}")]
    Constraint(String),
    #[error("datasource unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TownRecord {
    pub id: TownId,
    pub name: String,
    pub extra_blocks: u32,
    #[serde(default)]
    pub flags: FlagSet,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResidentRecord {
    pub uuid: Uuid,
    pub name: String,
    pub joined: u64,
    pub last_login: u64,
    #[serde(default)]
    pub selected_town: Option<TownId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NationRecord {
    pub id: NationId,
    pub name: String,
    pub extra_blocks_per_town: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub town: TownId,
    pub chunk: ChunkPos,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlotRecord {
    pub id: PlotId,
    pub town: TownId,
    pub name: String,
    pub volume: Volume,
    #[serde(default)]
    pub owners: Vec<Uuid>,
    #[serde(default)]
    pub flags: FlagSet,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipRecord {
    pub town: TownId,
    pub resident: Uuid,
    pub rank: TownRank,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NationLinkRecord {
    pub town: TownId,
    pub nation: NationId,
    pub rank: NationRank,
}

/// One persisted change. Batches of mutations are applied atomically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    InsertTown(TownRecord),
    UpdateTown(TownRecord),
    /// Cascades to the town's blocks, plots, memberships and nation link.
    DeleteTown(TownId),
    InsertResident(ResidentRecord),
    UpdateResident(ResidentRecord),
    InsertNation(NationRecord),
    UpdateNation(NationRecord),
    DeleteNation(NationId),
    InsertBlock(BlockRecord),
    DeleteBlock(ChunkPos),
    InsertPlot(PlotRecord),
    UpdatePlot(PlotRecord),
    DeletePlot(PlotId),
    /// Inserts or re-ranks a membership.
    LinkResident(MembershipRecord),
    UnlinkResident { town: TownId, resident: Uuid },
    LinkTownToNation(NationLinkRecord),
    UnlinkTownFromNation(TownId),
}

/// Storage behind the in-memory model.
pub trait Datasource: Send {
    fn load_towns(&mut self) -> Result<Vec<TownRecord>, PersistenceError>;
    fn load_residents(&mut self) -> Result<Vec<ResidentRecord>, PersistenceError>;
    fn load_nations(&mut self) -> Result<Vec<NationRecord>, PersistenceError>;
    fn load_town_blocks(&mut self, town: TownId) -> Result<Vec<BlockRecord>, PersistenceError>;
    fn load_town_plots(&mut self, town: TownId) -> Result<Vec<PlotRecord>, PersistenceError>;
    fn load_memberships(&mut self) -> Result<Vec<MembershipRecord>, PersistenceError>;
    fn load_nation_links(&mut self) -> Result<Vec<NationLinkRecord>, PersistenceError>;

    /// Applies every mutation or none of them.
    fn apply(&mut self, batch: &[Mutation]) -> Result<(), PersistenceError>;
}

/// The datasource shared by the session. The mutex is the single global
/// write lock.
pub type SharedDatasource = Arc<Mutex<dyn Datasource + Send>>;

pub fn shared<D: Datasource + 'static>(datasource: D) -> SharedDatasource {
    Arc::new(Mutex::new(datasource))
}

pub fn lock(datasource: &SharedDatasource) -> Result<MutexGuard<'_, dyn Datasource + Send + 'static>, PersistenceError> {
    datasource
        .lock()
        .map_err(|_| PersistenceError::Unavailable("datasource lock poisoned".to_string()))
}

/// Relational-style tables kept by the bundled backends.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tables {
    #[serde(default)]
    pub towns: BTreeMap<TownId, TownRecord>,
    #[serde(default)]
    pub residents: BTreeMap<Uuid, ResidentRecord>,
    #[serde(default)]
    pub nations: BTreeMap<NationId, NationRecord>,
    #[serde(default)]
    pub blocks: Vec<BlockRecord>,
    #[serde(default)]
    pub plots: BTreeMap<PlotId, PlotRecord>,
    #[serde(default)]
    pub memberships: Vec<MembershipRecord>,
    #[serde(default)]
    pub nation_links: Vec<NationLinkRecord>,
}

impl Tables {
    /// Applies a batch, leaving the tables untouched on failure.
    pub fn apply_batch(&mut self, batch: &[Mutation]) -> Result<(), PersistenceError> {
        let mut staged = self.clone();
        for mutation in batch {
            staged.apply(mutation)?;
        }
        *self = staged;
        Ok(())
    }

    fn apply(&mut self, mutation: &Mutation) -> Result<(), PersistenceError> {
        match mutation {
            Mutation::InsertTown(record) => {
                if self.towns.contains_key(&record.id) {
                    return Err(constraint(format!("town {:?} already exists", record.id)));
                }
                self.towns.insert(record.id, record.clone());
            }
            Mutation::UpdateTown(record) => {
                let row = self
                    .towns
                    .get_mut(&record.id)
                    .ok_or_else(|| constraint(format!("town {:?} missing", record.id)))?;
                *row = record.clone();
            }
            Mutation::DeleteTown(id) => {
                if self.towns.remove(id).is_none() {
                    return Err(constraint(format!("town {id:?} missing")));
                }
                self.blocks.retain(|block| block.town != *id);
                self.plots.retain(|_, plot| plot.town != *id);
                self.memberships.retain(|link| link.town != *id);
                self.nation_links.retain(|link| link.town != *id);
            }
            Mutation::InsertResident(record) => {
                if self.residents.contains_key(&record.uuid) {
                    return Err(constraint(format!("resident {} already exists", record.uuid)));
                }
                self.residents.insert(record.uuid, record.clone());
            }
            Mutation::UpdateResident(record) => {
                let row = self
                    .residents
                    .get_mut(&record.uuid)
                    .ok_or_else(|| constraint(format!("resident {} missing", record.uuid)))?;
                *row = record.clone();
            }
            Mutation::InsertNation(record) => {
                if self.nations.contains_key(&record.id) {
                    return Err(constraint(format!("nation {:?} already exists", record.id)));
                }
                self.nations.insert(record.id, record.clone());
            }
            Mutation::UpdateNation(record) => {
                let row = self
                    .nations
                    .get_mut(&record.id)
                    .ok_or_else(|| constraint(format!("nation {:?} missing", record.id)))?;
                *row = record.clone();
            }
            Mutation::DeleteNation(id) => {
                if self.nations.remove(id).is_none() {
                    return Err(constraint(format!("nation {id:?} missing")));
                }
                self.nation_links.retain(|link| link.nation != *id);
            }
            Mutation::InsertBlock(record) => {
                self.require_town(record.town)?;
                if self.blocks.iter().any(|block| block.chunk == record.chunk) {
                    return Err(constraint(format!("block {} already stored", record.chunk)));
                }
                self.blocks.push(record.clone());
            }
            Mutation::DeleteBlock(chunk) => {
                let before = self.blocks.len();
                self.blocks.retain(|block| block.chunk != *chunk);
                if self.blocks.len() == before {
                    return Err(constraint(format!("block {chunk} missing")));
                }
            }
            Mutation::InsertPlot(record) => {
                self.require_town(record.town)?;
                if self.plots.contains_key(&record.id) {
                    return Err(constraint(format!("plot {:?} already exists", record.id)));
                }
                self.plots.insert(record.id, record.clone());
            }
            Mutation::UpdatePlot(record) => {
                let row = self
                    .plots
                    .get_mut(&record.id)
                    .ok_or_else(|| constraint(format!("plot {:?} missing", record.id)))?;
                *row = record.clone();
            }
            Mutation::DeletePlot(id) => {
                if self.plots.remove(id).is_none() {
                    return Err(constraint(format!("plot {id:?} missing")));
                }
            }
            Mutation::LinkResident(record) => {
                self.require_town(record.town)?;
                if !self.residents.contains_key(&record.resident) {
                    return Err(constraint(format!("resident {} missing", record.resident)));
                }
                match self
                    .memberships
                    .iter_mut()
                    .find(|link| link.town == record.town && link.resident == record.resident)
                {
                    Some(link) => link.rank = record.rank,
                    None => self.memberships.push(record.clone()),
                }
            }
            Mutation::UnlinkResident { town, resident } => {
                self.memberships
                    .retain(|link| !(link.town == *town && link.resident == *resident));
            }
            Mutation::LinkTownToNation(record) => {
                self.require_town(record.town)?;
                if !self.nations.contains_key(&record.nation) {
                    return Err(constraint(format!("nation {:?} missing", record.nation)));
                }
                self.nation_links.retain(|link| link.town != record.town);
                self.nation_links.push(record.clone());
            }
            Mutation::UnlinkTownFromNation(town) => {
                self.nation_links.retain(|link| link.town != *town);
            }
        }
        Ok(())
    }

    fn require_town(&self, town: TownId) -> Result<(), PersistenceError> {
        if self.towns.contains_key(&town) {
            Ok(())
        } else {
            Err(constraint(format!("town {town:?} missing")))
        }
    }

    pub fn town_blocks(&self, town: TownId) -> Vec<BlockRecord> {
        self.blocks
            .iter()
            .filter(|block| block.town == town)
            .cloned()
            .collect()
    }

    pub fn town_plots(&self, town: TownId) -> Vec<PlotRecord> {
        self.plots
            .values()
            .filter(|plot| plot.town == town)
            .cloned()
            .collect()
    }
}

fn constraint(message: String) -> PersistenceError {
    PersistenceError::Constraint(message)
}

/// Keeps everything in memory. Used for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryDatasource {
    tables: Tables,
    fail_writes: bool,
}

impl MemoryDatasource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tables(tables: Tables) -> Self {
        Self {
            tables,
            fail_writes: false,
        }
    }

    pub fn tables(&self) -> &Tables {
        &self.tables
    }

    /// Makes every following write fail, for exercising rollback paths.
    pub fn set_fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }
}

impl Datasource for MemoryDatasource {
    fn load_towns(&mut self) -> Result<Vec<TownRecord>, PersistenceError> {
        Ok(self.tables.towns.values().cloned().collect())
    }

    fn load_residents(&mut self) -> Result<Vec<ResidentRecord>, PersistenceError> {
        Ok(self.tables.residents.values().cloned().collect())
    }

    fn load_nations(&mut self) -> Result<Vec<NationRecord>, PersistenceError> {
        Ok(self.tables.nations.values().cloned().collect())
    }

    fn load_town_blocks(&mut self, town: TownId) -> Result<Vec<BlockRecord>, PersistenceError> {
        Ok(self.tables.town_blocks(town))
    }

    fn load_town_plots(&mut self, town: TownId) -> Result<Vec<PlotRecord>, PersistenceError> {
        Ok(self.tables.town_plots(town))
    }

    fn load_memberships(&mut self) -> Result<Vec<MembershipRecord>, PersistenceError> {
        Ok(self.tables.memberships.clone())
    }

    fn load_nation_links(&mut self) -> Result<Vec<NationLinkRecord>, PersistenceError> {
        Ok(self.tables.nation_links.clone())
    }

    fn apply(&mut self, batch: &[Mutation]) -> Result<(), PersistenceError> {
        if self.fail_writes {
            return Err(PersistenceError::Unavailable(
                "memory datasource is failing writes".to_string(),
            ));
        }
        self.tables.apply_batch(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn shared_datasource_crosses_threads() {
        assert_send_sync::<SharedDatasource>();
        let datasource = shared(MemoryDatasource::new());
        let worker = datasource.clone();
        std::thread::spawn(move || {
            lock(&worker).expect("lock").apply(&[]).expect("empty batch");
        })
        .join()
        .expect("worker");
        assert!(lock(&datasource).expect("lock").load_towns().expect("towns").is_empty());
    }

    fn town(id: u32, name: &str) -> TownRecord {
        TownRecord {
            id: TownId(id),
            name: name.to_string(),
            extra_blocks: 0,
            flags: FlagSet::default(),
        }
    }

    #[test]
    fn failed_batch_leaves_tables_untouched() {
        let mut tables = Tables::default();
        tables
            .apply_batch(&[Mutation::InsertTown(town(1, "Ashford"))])
            .expect("insert town");

        let result = tables.apply_batch(&[
            Mutation::InsertBlock(BlockRecord {
                town: TownId(1),
                chunk: ChunkPos::new(0, 0, 0),
            }),
            Mutation::InsertBlock(BlockRecord {
                town: TownId(9),
                chunk: ChunkPos::new(0, 1, 0),
            }),
        ]);
        assert!(matches!(result, Err(PersistenceError::Constraint(_))));
        assert!(tables.blocks.is_empty());
    }

    #[test]
    fn delete_town_cascades() {
        let mut tables = Tables::default();
        let resident = Uuid::from_u128(1);
        tables
            .apply_batch(&[
                Mutation::InsertTown(town(1, "Ashford")),
                Mutation::InsertResident(ResidentRecord {
                    uuid: resident,
                    name: "Alice".to_string(),
                    joined: 0,
                    last_login: 0,
                    selected_town: None,
                }),
                Mutation::LinkResident(MembershipRecord {
                    town: TownId(1),
                    resident,
                    rank: TownRank::Mayor,
                }),
                Mutation::InsertBlock(BlockRecord {
                    town: TownId(1),
                    chunk: ChunkPos::new(0, 0, 0),
                }),
            ])
            .expect("seed");

        tables
            .apply_batch(&[Mutation::DeleteTown(TownId(1))])
            .expect("delete");
        assert!(tables.blocks.is_empty());
        assert!(tables.memberships.is_empty());
        assert!(tables.residents.contains_key(&resident));
    }

    #[test]
    fn link_resident_updates_rank_in_place() {
        let mut datasource = MemoryDatasource::new();
        let resident = Uuid::from_u128(2);
        datasource
            .apply(&[
                Mutation::InsertTown(town(1, "Ashford")),
                Mutation::InsertResident(ResidentRecord {
                    uuid: resident,
                    name: "Bob".to_string(),
                    joined: 0,
                    last_login: 0,
                    selected_town: None,
                }),
                Mutation::LinkResident(MembershipRecord {
                    town: TownId(1),
                    resident,
                    rank: TownRank::Resident,
                }),
                Mutation::LinkResident(MembershipRecord {
                    town: TownId(1),
                    resident,
                    rank: TownRank::Assistant,
                }),
            ])
            .expect("apply");
        let links = datasource.load_memberships().expect("load");
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].rank, TownRank::Assistant);
    }

    #[test]
    fn failing_writes_report_unavailable() {
        let mut datasource = MemoryDatasource::new();
        datasource.set_fail_writes(true);
        let result = datasource.apply(&[Mutation::InsertTown(town(1, "Ashford"))]);
        assert!(matches!(result, Err(PersistenceError::Unavailable(_))));
        assert!(datasource.tables().towns.is_empty());
    }
}
