use crate::entities::flag::{FlagSet, FlagType, FlagValue};
use crate::entities::rank::{NationRank, RankTable, TownRank};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct AppConfig {
    pub root: PathBuf,
    pub config_path: PathBuf,
    pub protection_path: PathBuf,
}

impl AppConfig {
    pub fn from_args(args: &[String]) -> Result<Self, String> {
        if args.len() < 2 {
            return Err("usage: towns <root> [config.yml] [protection.yml]".to_string());
        }

        let root = Path::new(&args[1]).to_path_buf();
        let config_path = if args.len() > 2 {
            PathBuf::from(&args[2])
        } else {
            env_path("TOWNS_CONFIG").unwrap_or_else(|| root.join("config.yml"))
        };
        let protection_path = if args.len() > 3 {
            PathBuf::from(&args[3])
        } else {
            env_path("TOWNS_PROTECTION").unwrap_or_else(|| root.join("protection.yml"))
        };
        Ok(Self {
            root,
            config_path,
            protection_path,
        })
    }
}

fn env_path(name: &str) -> Option<PathBuf> {
    std::env::var(name).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(PathBuf::from(trimmed))
        }
    })
}

/// Gameplay settings read from `config.yml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TownsConfig {
    /// Verdict for unclaimed land.
    pub wilderness_default: bool,
    /// Plots one resident may own per town, -1 for unlimited.
    pub max_plots_per_resident: i32,
    pub default_blocks: u32,
    pub blocks_per_resident: u32,
    pub town_flags: BTreeMap<FlagType, FlagValue>,
    pub town_ranks: BTreeMap<TownRank, Vec<String>>,
    pub nation_ranks: BTreeMap<NationRank, Vec<String>>,
}

impl Default for TownsConfig {
    fn default() -> Self {
        Self {
            wilderness_default: true,
            max_plots_per_resident: -1,
            default_blocks: 16,
            blocks_per_resident: 8,
            town_flags: BTreeMap::new(),
            town_ranks: BTreeMap::new(),
            nation_ranks: BTreeMap::new(),
        }
    }
}

impl TownsConfig {
    pub fn load(path: &Path) -> Result<Self, String> {
        let data = match std::fs::read_to_string(path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(err) => {
                return Err(format!("failed to read config {}: {}", path.display(), err));
            }
        };
        Self::parse(&data).map_err(|err| format!("config {}: {}", path.display(), err))
    }

    pub fn parse(data: &str) -> Result<Self, String> {
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(data).map_err(|err| err.to_string())?;
        for (flag, value) in &config.town_flags {
            if !flag.accepts(*value) {
                return Err(format!("value {value} is not valid for flag {flag}"));
            }
        }
        Ok(config)
    }

    /// `None` when unlimited.
    pub fn plot_limit(&self) -> Option<u32> {
        u32::try_from(self.max_plots_per_resident).ok()
    }

    /// Flag overrides every new town starts with.
    pub fn default_town_flags(&self) -> FlagSet {
        let mut flags = FlagSet::default();
        for (flag, value) in &self.town_flags {
            flags.set(*flag, *value);
        }
        flags
    }

    pub fn town_rank_table(&self) -> RankTable<TownRank> {
        let mut table = RankTable::town_defaults();
        for (rank, nodes) in &self.town_ranks {
            for node in nodes {
                table.grant(*rank, node.clone());
            }
        }
        table
    }

    pub fn nation_rank_table(&self) -> RankTable<NationRank> {
        let mut table = RankTable::nation_defaults();
        for (rank, nodes) in &self.nation_ranks {
            for node in nodes {
                table.grant(*rank, node.clone());
            }
        }
        table
    }
}
