use crate::protection::getters::{Getters, Subject};
use crate::protection::loader::{load_protection, parse_protection, LoadedProtection};
use crate::protection::segment::{Action, ActionKind, Segment, Verdict};
use crate::protection::ConfigurationError;
use crate::world::position::Location;
use crate::world::universe::Universe;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Every active segment. An action is denied when any segment that applies
/// to it denies.
#[derive(Debug)]
pub struct ProtectionEngine {
    getters: Arc<Getters>,
    segments: Vec<Segment>,
}

impl ProtectionEngine {
    pub fn new(getters: Arc<Getters>, segments: Vec<Segment>) -> Self {
        Self { getters, segments }
    }

    pub fn load(path: &Path) -> Result<Self, ConfigurationError> {
        load_protection(path).map(Self::from)
    }

    pub fn from_yaml(data: &str) -> Result<Self, ConfigurationError> {
        parse_protection(data).map(Self::from)
    }

    /// Rebuilds every segment from `path`, re-enabling any that faulted.
    /// On error the current segments stay active.
    pub fn reload(&mut self, path: &Path) -> Result<(), ConfigurationError> {
        *self = Self::load(path)?;
        info!(target: "protection", "protection reloaded from {}", path.display());
        Ok(())
    }

    pub fn getters(&self) -> &Getters {
        &self.getters
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn disabled_segments(&self) -> impl Iterator<Item = &Segment> {
        self.segments.iter().filter(|segment| !segment.is_enabled())
    }

    pub fn check(&mut self, universe: &Universe, action: &Action<'_>) -> Verdict {
        let mut verdict = Verdict::Allow;
        for segment in &mut self.segments {
            if segment.check(universe, action) == Verdict::Deny {
                debug!(
                    target: "protection",
                    "segment '{}' denied {} of {}",
                    segment.name(),
                    action.kind,
                    action.subject.kind()
                );
                verdict = Verdict::Deny;
            }
        }
        verdict
    }

    pub fn should_exist(&mut self, universe: &Universe, subject: &dyn Subject) -> bool {
        self.check(universe, &Action::track(subject)).is_allowed()
    }

    pub fn should_interact(&mut self, universe: &Universe, subject: &dyn Subject, actor: Uuid) -> bool {
        self.check(universe, &Action::interact(subject, actor)).is_allowed()
    }

    pub fn should_attack(&mut self, universe: &Universe, attacker: &dyn Subject, victim: Location) -> bool {
        self.check(universe, &Action::attack(attacker, victim)).is_allowed()
    }

    pub fn should_break(&mut self, universe: &Universe, block: &dyn Subject, actor: Uuid) -> bool {
        self.check(universe, &Action::modify(ActionKind::Break, block, actor))
            .is_allowed()
    }

    pub fn should_place(&mut self, universe: &Universe, block: &dyn Subject, actor: Uuid) -> bool {
        self.check(universe, &Action::modify(ActionKind::Place, block, actor))
            .is_allowed()
    }
}

impl From<LoadedProtection> for ProtectionEngine {
    fn from(loaded: LoadedProtection) -> Self {
        Self::new(loaded.getters, loaded.segments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::flag::{FlagType, FlagValue};
    use crate::entities::rank::TownRank;
    use crate::protection::getters::tests::TestSubject;
    use crate::world::position::Volume;
    use crate::world::universe::tests::{ashford, uuid};

    const RULES: &str = r#"
segments:
  - name: blocks
    actions: [break, place]
    flag: modify
  - name: pvp
    actions: [attack]
    flag: pvp
  - name: owned-pets
    actions: [track]
    condition: ownerDistance > 8
    flag: mobs
"#;

    fn at(x: f64, z: f64) -> Location {
        Location::new(0, x, 64.0, z)
    }

    #[test]
    fn block_break_needs_plot_ownership() {
        let (mut universe, _, town) = ashford();
        universe.register_resident(uuid(2), "S", 0).expect("s");
        universe.register_resident(uuid(3), "R", 0).expect("r");
        universe.add_resident(town, uuid(2), TownRank::Resident).expect("s joins");
        universe.add_resident(town, uuid(3), TownRank::Resident).expect("r joins");
        let plot = universe
            .create_plot(town, "Workshop", Volume::new(0, 16, 0, 0, 31, 255, 15), &[uuid(2)])
            .expect("plot");

        let mut engine = ProtectionEngine::from_yaml(RULES).expect("rules");
        let block = TestSubject::new("log", at(20.0, 9.0));
        assert!(!engine.should_break(&universe, &block, uuid(3)));
        assert!(engine.should_break(&universe, &block, uuid(2)));

        universe.add_plot_owner(plot, uuid(3)).expect("co-owner");
        assert!(engine.should_break(&universe, &block, uuid(3)));
        assert!(engine.should_place(&universe, &block, uuid(3)));
    }

    #[test]
    fn attack_inside_town_follows_pvp_flag() {
        let (mut universe, _, town) = ashford();
        universe.register_resident(uuid(2), "Target", 0).expect("target");
        universe.add_resident(town, uuid(2), TownRank::Resident).expect("join");
        let mut engine = ProtectionEngine::from_yaml(RULES).expect("rules");
        let attacker = TestSubject::new("player", at(2.0, 2.0)).owned_by(uuid(1));

        assert!(!engine.should_attack(&universe, &attacker, at(3.0, 3.0)));
        assert!(engine.should_attack(&universe, &attacker, at(300.0, 3.0)));

        universe
            .set_town_flag(town, FlagType::Pvp, FlagValue::Bool(true))
            .expect("pvp on");
        assert!(engine.should_attack(&universe, &attacker, at(3.0, 3.0)));
    }

    #[test]
    fn faulted_segment_allows_until_reload() {
        let (universe, _, _) = ashford();
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("protection.yml");
        std::fs::write(&path, RULES).expect("write rules");
        let mut engine = ProtectionEngine::load(&path).expect("load");

        let mut far_pet = TestSubject::new("wolf", at(4.0, 4.0)).owned_by(uuid(1));
        far_pet.hostile = true;
        far_pet.owner_location = Some(at(100.0, 100.0));
        assert!(!engine.should_exist(&universe, &far_pet));

        let stray = TestSubject::new("wolf", at(4.0, 4.0));
        assert!(engine.should_exist(&universe, &stray));
        assert_eq!(engine.disabled_segments().count(), 1);
        assert!(engine.should_exist(&universe, &far_pet));

        engine.reload(&path).expect("reload");
        assert_eq!(engine.disabled_segments().count(), 0);
        assert!(!engine.should_exist(&universe, &far_pet));

        std::fs::write(&path, "segments: [").expect("write broken rules");
        assert!(engine.reload(&path).is_err());
        assert_eq!(engine.segments().len(), 3);
    }

    #[test]
    fn bad_segment_does_not_disable_the_file() {
        let (universe, _, _) = ashford();
        let rules = format!("{RULES}  - name: broken\n    actions: [track]\n    condition: \"isHostile ==\"\n    flag: mobs\n");
        let mut engine = ProtectionEngine::from_yaml(&rules).expect("rules");
        assert_eq!(engine.segments().len(), 3);

        let attacker = TestSubject::new("player", at(2.0, 2.0)).owned_by(uuid(1));
        assert!(!engine.should_attack(&universe, &attacker, at(3.0, 3.0)));
    }

    #[test]
    fn unrelated_actions_are_allowed() {
        let (universe, _, _) = ashford();
        let mut engine = ProtectionEngine::from_yaml(RULES).expect("rules");
        let chest = TestSubject::new("chest", at(1.0, 1.0));
        assert!(engine.should_interact(&universe, &chest, uuid(42)));
        assert!(engine.getters().contains("ownerDistance"));
    }
}
