use serde::{Deserialize, Serialize};
use std::fmt;

pub type Dimension = i32;

/// Side length of a claimable chunk, in blocks.
pub const CHUNK_SIZE: i32 = 16;
const CHUNK_SHIFT: i32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockPos {
    pub dim: Dimension,
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkPos {
    pub dim: Dimension,
    pub x: i32,
    pub z: i32,
}

/// An entity's exact location as reported by the world.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Location {
    pub dim: Dimension,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl BlockPos {
    pub fn new(dim: Dimension, x: i32, y: i32, z: i32) -> Self {
        Self { dim, x, y, z }
    }

    pub fn chunk(self) -> ChunkPos {
        ChunkPos {
            dim: self.dim,
            x: self.x >> CHUNK_SHIFT,
            z: self.z >> CHUNK_SHIFT,
        }
    }

    /// Chebyshev distance, `None` across dimensions.
    pub fn distance(self, other: BlockPos) -> Option<i64> {
        if self.dim != other.dim {
            return None;
        }
        let dx = (i64::from(self.x) - i64::from(other.x)).abs();
        let dy = (i64::from(self.y) - i64::from(other.y)).abs();
        let dz = (i64::from(self.z) - i64::from(other.z)).abs();
        Some(dx.max(dy).max(dz))
    }
}

impl fmt::Display for BlockPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[DIM:{}; {}, {}, {}]", self.dim, self.x, self.y, self.z)
    }
}

impl ChunkPos {
    pub fn new(dim: Dimension, x: i32, z: i32) -> Self {
        Self { dim, x, z }
    }

    /// The full-height column covered by this chunk.
    pub fn volume(self) -> Volume {
        let x1 = self.x * CHUNK_SIZE;
        let z1 = self.z * CHUNK_SIZE;
        Volume::new(
            self.dim,
            x1,
            i32::MIN,
            z1,
            x1 + CHUNK_SIZE - 1,
            i32::MAX,
            z1 + CHUNK_SIZE - 1,
        )
    }
}

impl fmt::Display for ChunkPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[DIM:{}; chunk {}, {}]", self.dim, self.x, self.z)
    }
}

impl Location {
    pub fn new(dim: Dimension, x: f64, y: f64, z: f64) -> Self {
        Self { dim, x, y, z }
    }

    pub fn floored(self) -> BlockPos {
        BlockPos {
            dim: self.dim,
            x: self.x.floor() as i32,
            y: self.y.floor() as i32,
            z: self.z.floor() as i32,
        }
    }
}

/// An axis-aligned inclusive box in one dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Volume {
    pub dim: Dimension,
    pub min_x: i32,
    pub min_y: i32,
    pub min_z: i32,
    pub max_x: i32,
    pub max_y: i32,
    pub max_z: i32,
}

impl Volume {
    /// Builds a volume from two arbitrary corners.
    pub fn new(dim: Dimension, x1: i32, y1: i32, z1: i32, x2: i32, y2: i32, z2: i32) -> Self {
        Self {
            dim,
            min_x: x1.min(x2),
            min_y: y1.min(y2),
            min_z: z1.min(z2),
            max_x: x1.max(x2),
            max_y: y1.max(y2),
            max_z: z1.max(z2),
        }
    }

    pub fn from_corners(a: BlockPos, b: BlockPos) -> Option<Self> {
        if a.dim != b.dim {
            return None;
        }
        Some(Self::new(a.dim, a.x, a.y, a.z, b.x, b.y, b.z))
    }

    pub fn point(pos: BlockPos) -> Self {
        Self::new(pos.dim, pos.x, pos.y, pos.z, pos.x, pos.y, pos.z)
    }

    /// Cube of side `2 * range + 1` centered on `center`.
    pub fn around(center: BlockPos, range: u32) -> Self {
        let r = i32::try_from(range).unwrap_or(i32::MAX);
        Self::new(
            center.dim,
            center.x.saturating_sub(r),
            center.y.saturating_sub(r),
            center.z.saturating_sub(r),
            center.x.saturating_add(r),
            center.y.saturating_add(r),
            center.z.saturating_add(r),
        )
    }

    pub fn contains(&self, pos: BlockPos) -> bool {
        pos.dim == self.dim
            && pos.x >= self.min_x
            && pos.x <= self.max_x
            && pos.y >= self.min_y
            && pos.y <= self.max_y
            && pos.z >= self.min_z
            && pos.z <= self.max_z
    }

    pub fn intersects(&self, other: &Volume) -> bool {
        self.dim == other.dim
            && self.min_x <= other.max_x
            && self.max_x >= other.min_x
            && self.min_y <= other.max_y
            && self.max_y >= other.min_y
            && self.min_z <= other.max_z
            && self.max_z >= other.min_z
    }

    /// Every chunk column the volume touches, produced lazily.
    pub fn chunks(&self) -> impl Iterator<Item = ChunkPos> {
        let dim = self.dim;
        let (min, max) = self.chunk_corners();
        (min.x..=max.x).flat_map(move |x| (min.z..=max.z).map(move |z| ChunkPos::new(dim, x, z)))
    }

    pub fn chunk_count(&self) -> u64 {
        let (min, max) = self.chunk_corners();
        let width = (i64::from(max.x) - i64::from(min.x) + 1) as u64;
        let depth = (i64::from(max.z) - i64::from(min.z) + 1) as u64;
        width * depth
    }

    fn chunk_corners(&self) -> (ChunkPos, ChunkPos) {
        (
            BlockPos::new(self.dim, self.min_x, 0, self.min_z).chunk(),
            BlockPos::new(self.dim, self.max_x, 0, self.max_z).chunk(),
        )
    }

    /// Number of blocks inside the box.
    pub fn block_count(&self) -> u128 {
        let side = |min: i32, max: i32| (i64::from(max) - i64::from(min) + 1) as u128;
        side(self.min_x, self.max_x) * side(self.min_y, self.max_y) * side(self.min_z, self.max_z)
    }

    /// The shared part of two volumes, `None` when they do not touch.
    pub fn intersect(&self, other: &Volume) -> Option<Volume> {
        if !self.intersects(other) {
            return None;
        }
        Some(Volume {
            dim: self.dim,
            min_x: self.min_x.max(other.min_x),
            min_y: self.min_y.max(other.min_y),
            min_z: self.min_z.max(other.min_z),
            max_x: self.max_x.min(other.max_x),
            max_y: self.max_y.min(other.max_y),
            max_z: self.max_z.min(other.max_z),
        })
    }

    /// Whether every block of `self` lies inside at least one of `pieces`.
    /// Pieces may overlap.
    pub fn is_covered_by(&self, pieces: &[Volume]) -> bool {
        let clipped: Vec<Volume> = pieces.iter().filter_map(|piece| piece.intersect(self)).collect();
        let total: u128 = clipped.iter().map(Volume::block_count).sum();
        if total < self.block_count() {
            return false;
        }
        let xs = cell_starts(self.min_x, self.max_x, clipped.iter().map(|v| (v.min_x, v.max_x)));
        let ys = cell_starts(self.min_y, self.max_y, clipped.iter().map(|v| (v.min_y, v.max_y)));
        let zs = cell_starts(self.min_z, self.max_z, clipped.iter().map(|v| (v.min_z, v.max_z)));
        for &x in &xs {
            for &y in &ys {
                for &z in &zs {
                    let pos = BlockPos::new(self.dim, x, y, z);
                    if !clipped.iter().any(|piece| piece.contains(pos)) {
                        return false;
                    }
                }
            }
        }
        true
    }

    pub fn center(&self) -> BlockPos {
        BlockPos {
            dim: self.dim,
            x: midpoint(self.min_x, self.max_x),
            y: midpoint(self.min_y, self.max_y),
            z: midpoint(self.min_z, self.max_z),
        }
    }
}

fn midpoint(a: i32, b: i32) -> i32 {
    ((i64::from(a) + i64::from(b)).div_euclid(2)) as i32
}

// Splits `[min, max]` at every span edge; each returned start opens a cell
// that no span edge crosses.
fn cell_starts(min: i32, max: i32, spans: impl Iterator<Item = (i32, i32)>) -> Vec<i32> {
    let mut starts = vec![min];
    for (lo, hi) in spans {
        starts.push(lo);
        if hi < max {
            starts.push(hi + 1);
        }
    }
    starts.sort_unstable();
    starts.dedup();
    starts
}

impl fmt::Display for Volume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[DIM:{}; {}, {}, {} -> {}, {}, {}]",
            self.dim, self.min_x, self.min_y, self.min_z, self.max_x, self.max_y, self.max_z
        )
    }
}
