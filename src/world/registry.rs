use crate::entities::{PlotId, TownId};
use crate::world::position::{ChunkPos, Volume};
use std::collections::HashMap;

/// Registry entry for one claimed chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TownBlock {
    pub chunk: ChunkPos,
    pub town: TownId,
    plots: Vec<PlotId>,
}

impl TownBlock {
    pub fn plots(&self) -> &[PlotId] {
        &self.plots
    }
}

/// Coordinate index over claims. Holds ids only; the towns stay the source
/// of truth and keep the index in sync in the same operation that mutates
/// them.
#[derive(Debug, Default)]
pub struct SpatialRegistry {
    blocks: HashMap<ChunkPos, TownBlock>,
}

impl SpatialRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block(&self, chunk: ChunkPos) -> Option<&TownBlock> {
        self.blocks.get(&chunk)
    }

    pub fn owner_of(&self, chunk: ChunkPos) -> Option<TownId> {
        self.blocks.get(&chunk).map(|block| block.town)
    }

    pub fn plots_in(&self, chunk: ChunkPos) -> &[PlotId] {
        self.blocks
            .get(&chunk)
            .map(|block| block.plots.as_slice())
            .unwrap_or(&[])
    }

    /// Claimed chunks touched by `volume`. Walks the volume's chunks or the
    /// claims, whichever is fewer.
    pub fn claimed_in(&self, volume: &Volume) -> Vec<&TownBlock> {
        if volume.chunk_count() > self.blocks.len() as u64 {
            self.blocks
                .values()
                .filter(|block| block.chunk.volume().intersects(volume))
                .collect()
        } else {
            volume.chunks().filter_map(|chunk| self.blocks.get(&chunk)).collect()
        }
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Returns false when the chunk already has an owner.
    pub(crate) fn insert_block(&mut self, chunk: ChunkPos, town: TownId) -> bool {
        if self.blocks.contains_key(&chunk) {
            return false;
        }
        self.blocks.insert(
            chunk,
            TownBlock {
                chunk,
                town,
                plots: Vec::new(),
            },
        );
        true
    }

    pub(crate) fn remove_block(&mut self, chunk: ChunkPos) -> Option<TownBlock> {
        self.blocks.remove(&chunk)
    }

    /// Links a plot into every claimed chunk its volume touches.
    pub(crate) fn insert_plot(&mut self, plot: PlotId, volume: &Volume) {
        for chunk in volume.chunks() {
            if let Some(block) = self.blocks.get_mut(&chunk) {
                if !block.plots.contains(&plot) {
                    block.plots.push(plot);
                }
            }
        }
    }

    pub(crate) fn remove_plot(&mut self, plot: PlotId, volume: &Volume) {
        for chunk in volume.chunks() {
            if let Some(block) = self.blocks.get_mut(&chunk) {
                block.plots.retain(|id| *id != plot);
            }
        }
    }
}
