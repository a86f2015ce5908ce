use crate::persistence::datasource::PersistenceError;
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::info;

/// One schema step for SQL-backed datasources. `{prefix}` in the statement is
/// replaced with the configured table prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Migration {
    pub id: u32,
    pub code: &'static str,
    pub sql: &'static str,
}

#[derive(Debug, Error)]
pub enum MigrationReadError {
    /// The bookkeeping table does not exist yet: nothing was ever applied.
    #[error("updates table is missing")]
    TableMissing,
    #[error(transparent)]
    Failed(#[from] PersistenceError),
}

/// A backend able to run schema steps and remember which ran.
pub trait MigrationTarget {
    fn applied_ids(&mut self) -> Result<Vec<u32>, MigrationReadError>;
    fn execute(&mut self, sql: &str) -> Result<(), PersistenceError>;
    fn record(&mut self, step: &Migration) -> Result<(), PersistenceError>;
}

pub const SCHEMA: &[Migration] = &[
    Migration {
        id: 1,
        code: "Add Updates Table",
        sql: "CREATE TABLE IF NOT EXISTS {prefix}Updates (Id int NOT NULL, Code varchar(50) NOT NULL, PRIMARY KEY(Id));",
    },
    Migration {
        id: 2,
        code: "Add Towns Table",
        sql: "CREATE TABLE IF NOT EXISTS {prefix}Towns (Id int NOT NULL, Name varchar(50) NOT NULL, ExtraBlocks int NOT NULL, PRIMARY KEY (Id));",
    },
    Migration {
        id: 3,
        code: "Add Residents Table",
        sql: "CREATE TABLE IF NOT EXISTS {prefix}Residents (UUID varchar(36) NOT NULL, Name varchar(50) NOT NULL, Joined bigint NOT NULL, LastLogin bigint NOT NULL, SelectedTown int DEFAULT NULL, PRIMARY KEY (UUID));",
    },
    Migration {
        id: 4,
        code: "Add Nations Table",
        sql: "CREATE TABLE IF NOT EXISTS {prefix}Nations (Id int NOT NULL, Name varchar(50) NOT NULL, ExtraBlocks int NOT NULL DEFAULT 0, PRIMARY KEY(Id));",
    },
    Migration {
        id: 5,
        code: "Add TownBlocks Table",
        sql: "CREATE TABLE IF NOT EXISTS {prefix}TownBlocks (Dim int NOT NULL, X int NOT NULL, Z int NOT NULL, TownId int NOT NULL, PRIMARY KEY(Dim, X, Z), FOREIGN KEY (TownId) REFERENCES {prefix}Towns(Id) ON DELETE CASCADE);",
    },
    Migration {
        id: 6,
        code: "Add TownPlots Table",
        sql: "CREATE TABLE IF NOT EXISTS {prefix}TownPlots (Id int NOT NULL, Name varchar(50) NOT NULL, Dim int NOT NULL, X1 int NOT NULL, Y1 int NOT NULL, Z1 int NOT NULL, X2 int NOT NULL, Y2 int NOT NULL, Z2 int NOT NULL, TownId int NOT NULL, PRIMARY KEY(Id), FOREIGN KEY (TownId) REFERENCES {prefix}Towns(Id) ON DELETE CASCADE);",
    },
    Migration {
        id: 7,
        code: "Add PlotOwners Table",
        sql: "CREATE TABLE IF NOT EXISTS {prefix}PlotOwners (PlotId int NOT NULL, Owner varchar(36) NOT NULL, PRIMARY KEY(PlotId, Owner), FOREIGN KEY (PlotId) REFERENCES {prefix}TownPlots(Id) ON DELETE CASCADE, FOREIGN KEY (Owner) REFERENCES {prefix}Residents(UUID) ON DELETE CASCADE);",
    },
    Migration {
        id: 8,
        code: "Add ResidentsToTowns Table",
        sql: "CREATE TABLE IF NOT EXISTS {prefix}ResidentsToTowns (TownId int NOT NULL, Owner varchar(36) NOT NULL, Rank varchar(1) NOT NULL DEFAULT 'R', PRIMARY KEY (TownId, Owner), FOREIGN KEY (TownId) REFERENCES {prefix}Towns(Id) ON DELETE CASCADE, FOREIGN KEY (Owner) REFERENCES {prefix}Residents(UUID) ON DELETE CASCADE);",
    },
    Migration {
        id: 9,
        code: "Add TownsToNations Table",
        sql: "CREATE TABLE IF NOT EXISTS {prefix}TownsToNations (TownId int NOT NULL, NationId int NOT NULL, Rank varchar(1) NOT NULL DEFAULT 'T', PRIMARY KEY (TownId), FOREIGN KEY (TownId) REFERENCES {prefix}Towns(Id) ON DELETE CASCADE, FOREIGN KEY (NationId) REFERENCES {prefix}Nations(Id) ON DELETE CASCADE);",
    },
    Migration {
        id: 10,
        code: "Add Flags Table",
        sql: "CREATE TABLE IF NOT EXISTS {prefix}Flags (Scope varchar(1) NOT NULL, OwnerId int NOT NULL, Name varchar(50) NOT NULL, Value varchar(50) NOT NULL, PRIMARY KEY (Scope, OwnerId, Name));",
    },
];

/// Runs every step not yet recorded, in id order. Returns the ids applied by
/// this call.
pub fn run_migrations(
    target: &mut dyn MigrationTarget,
    steps: &[Migration],
    prefix: &str,
) -> Result<Vec<u32>, PersistenceError> {
    validate_order(steps)?;
    let applied: BTreeSet<u32> = match target.applied_ids() {
        Ok(ids) => ids.into_iter().collect(),
        Err(MigrationReadError::TableMissing) => {
            info!(target: "datasource", "updates table missing, treating as first run");
            BTreeSet::new()
        }
        Err(MigrationReadError::Failed(err)) => return Err(err),
    };

    let mut ran = Vec::new();
    for step in steps {
        if applied.contains(&step.id) {
            continue;
        }
        info!(target: "datasource", "running update {} - {}", step.id, step.code);
        target.execute(&step.sql.replace("{prefix}", prefix))?;
        target.record(step)?;
        ran.push(step.id);
    }
    Ok(ran)
}

fn validate_order(steps: &[Migration]) -> Result<(), PersistenceError> {
    for pair in steps.windows(2) {
        if pair[1].id <= pair[0].id {
            return Err(PersistenceError::Constraint(format!(
                "migration ids must increase: {} follows {}",
                pair[1].id, pair[0].id
            )));
        }
    }
    Ok(())
}
