use crate::entities::TownId;
use crate::persistence::datasource::{
    BlockRecord, Datasource, MembershipRecord, Mutation, NationLinkRecord, NationRecord,
    PersistenceError, PlotRecord, ResidentRecord, Tables, TownRecord,
};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Keeps the tables as a YAML document under `<root>/save/towns.yml`. The
/// whole document is rewritten after every batch; a previous copy is kept
/// as `towns.yml.bak`.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    tables: Tables,
}

impl FileStore {
    pub fn from_root(root: &Path) -> Result<Self, PersistenceError> {
        Self::open(root.join("save").join("towns.yml"))
    }

    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let path = path.into();
        let tables = match fs::read_to_string(&path) {
            Ok(data) => match serde_yaml::from_str::<Tables>(&data) {
                Ok(tables) => tables,
                Err(err) => {
                    let backup = backup_path(&path);
                    warn!(
                        target: "datasource",
                        "save parse failed for {}, trying backup: {}",
                        path.display(),
                        err
                    );
                    let data = fs::read_to_string(&backup)?;
                    serde_yaml::from_str::<Tables>(&data)?
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(target: "datasource", "no save at {}, starting empty", path.display());
                Tables::default()
            }
            Err(err) => return Err(err.into()),
        };
        Ok(Self { path, tables })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn tables(&self) -> &Tables {
        &self.tables
    }

    fn flush(&self, tables: &Tables) -> Result<(), PersistenceError> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let data = serde_yaml::to_string(tables)?;
        if self.path.exists() {
            fs::copy(&self.path, backup_path(&self.path))?;
        }
        fs::write(&self.path, data)?;
        Ok(())
    }
}

fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".bak");
    PathBuf::from(name)
}

impl Datasource for FileStore {
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
        let mut staged = self.tables.clone();
        staged.apply_batch(batch)?;
        self.flush(&staged)?;
        self.tables = staged;
        Ok(())
    }
}
