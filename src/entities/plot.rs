use crate::entities::flag::FlagSet;
use crate::entities::{PlotId, TownId};
use crate::world::position::{BlockPos, Volume};
use std::collections::BTreeSet;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plot {
    pub id: PlotId,
    pub town: TownId,
    pub name: String,
    pub volume: Volume,
    pub flags: FlagSet,
    owners: BTreeSet<Uuid>,
}

impl Plot {
    pub fn new(
        id: PlotId,
        town: TownId,
        name: impl Into<String>,
        volume: Volume,
        owners: impl IntoIterator<Item = Uuid>,
    ) -> Self {
        Self {
            id,
            town,
            name: name.into(),
            volume,
            flags: FlagSet::default(),
            owners: owners.into_iter().collect(),
        }
    }

    pub fn contains(&self, pos: BlockPos) -> bool {
        self.volume.contains(pos)
    }

    pub fn is_owner(&self, resident: Uuid) -> bool {
        self.owners.contains(&resident)
    }

    pub fn owners(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.owners.iter().copied()
    }

    pub(crate) fn add_owner(&mut self, resident: Uuid) -> bool {
        self.owners.insert(resident)
    }

    pub(crate) fn remove_owner(&mut self, resident: Uuid) -> bool {
        self.owners.remove(&resident)
    }
}
