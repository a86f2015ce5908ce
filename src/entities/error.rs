use crate::entities::flag::{FlagType, FlagValue};
use crate::entities::{NationId, PlotId, TownId};
use crate::world::position::{ChunkPos, Volume};
use thiserror::Error;
use uuid::Uuid;

/// Rule violations reported back to whoever asked for the mutation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    #[error("chunk {chunk} is already claimed by town {owner:?}")]
    AlreadyClaimed { chunk: ChunkPos, owner: TownId },
    #[error("chunk {chunk} is not claimed by town {town:?}")]
    NotClaimed { chunk: ChunkPos, town: TownId },
    #[error("town {town:?} cannot claim more than {max} blocks")]
    BlockQuotaExceeded { town: TownId, max: usize },
    #[error("chunk {chunk} still contains plots")]
    BlockHasPlots { chunk: ChunkPos },
    #[error("town {0:?} must keep at least one block")]
    LastBlock(TownId),
    #[error("volume {volume} is not fully inside the claims of town {town:?}")]
    OutOfBounds { town: TownId, volume: Volume },
    #[error("resident {resident} already owns {max} plots in town {town:?}")]
    QuotaExceeded {
        resident: Uuid,
        town: TownId,
        max: u32,
    },
    #[error("town {0:?} would be left without a mayor")]
    LastMayor(TownId),
    #[error("name '{0}' is already taken")]
    NameTaken(String),
    #[error("resident {resident} is not a member of town {town:?}")]
    NotAMember { resident: Uuid, town: TownId },
    #[error("resident {resident} is already a member of town {town:?}")]
    AlreadyMember { resident: Uuid, town: TownId },
    #[error("resident {resident} already owns plot {plot:?}")]
    AlreadyOwner { resident: Uuid, plot: PlotId },
    #[error("resident {resident} does not own plot {plot:?}")]
    NotAnOwner { resident: Uuid, plot: PlotId },
    #[error("town {0:?} is already part of a nation")]
    AlreadyInNation(TownId),
    #[error("town {0:?} is not part of a nation")]
    NotInNation(TownId),
    #[error("value {value} is not valid for flag {flag}")]
    InvalidFlagValue { flag: FlagType, value: FlagValue },
    #[error("unknown town {0:?}")]
    UnknownTown(TownId),
    #[error("unknown plot {0:?}")]
    UnknownPlot(PlotId),
    #[error("unknown nation {0:?}")]
    UnknownNation(NationId),
    #[error("unknown resident {0}")]
    UnknownResident(Uuid),
}
