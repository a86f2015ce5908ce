pub mod admin;
mod config;
pub mod entities;
pub mod persistence;
pub mod protection;
pub mod telemetry;
pub mod world;

pub use config::{AppConfig, TownsConfig};

use persistence::datasource::shared;
use persistence::store::FileStore;
use protection::engine::ProtectionEngine;
use telemetry::logging;
use world::universe::Universe;

pub fn run(args: &[String]) -> Result<(), String> {
    let config = AppConfig::from_args(args)?;
    logging::init(&config.root)?;
    let towns_config = TownsConfig::load(&config.config_path)?;

    let store = FileStore::from_root(&config.root)
        .map_err(|err| format!("datasource open failed: {}", err))?;
    logging::log_datasource(&format!("using save {}", store.path().display()));
    let universe = Universe::load(towns_config, shared(store)).map_err(|err| {
        logging::log_error(&format!("universe load failed: {}", err));
        format!("universe load failed: {}", err)
    })?;
    let engine = ProtectionEngine::load(&config.protection_path).map_err(|err| {
        logging::log_error(&format!("protection load failed: {}", err));
        format!("protection {}: {}", config.protection_path.display(), err)
    })?;

    let towns = universe.towns().count();
    let blocks = universe.registry().len();
    let plots: usize = universe.towns().map(|town| town.plots().count()).sum();
    let residents = universe.residents().count();
    let nations = universe.nations().count();
    logging::log_towns(&format!(
        "loaded towns={towns}, blocks={blocks}, plots={plots}, residents={residents}, nations={nations}"
    ));
    logging::log_protection(&format!(
        "segments={}, getters={}",
        engine.segments().len(),
        engine.getters().names().count()
    ));

    println!("towns: startup");
    println!("- root: {}", config.root.display());
    println!("- config: {}", config.config_path.display());
    println!("- towns: {}", towns);
    println!("- claimed blocks: {}", blocks);
    println!("- plots: {}", plots);
    println!("- residents: {}", residents);
    println!("- nations: {}", nations);
    println!(
        "- protection: {} segments from {}",
        engine.segments().len(),
        config.protection_path.display()
    );
    for segment in engine.segments() {
        println!("  - {} ({})", segment.name(), segment.flag());
    }
    Ok(())
}
