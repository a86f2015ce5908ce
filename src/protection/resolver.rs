use crate::entities::flag::FlagType;
use crate::entities::plot::Plot;
use crate::entities::rank::NODE_PLOT_BYPASS;
use crate::entities::town::Town;
use crate::world::position::{BlockPos, Volume};
use crate::world::universe::Universe;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Point(BlockPos),
    Volume(Volume),
}

/// Who is asking for which flag. `hostile` is read by the mobs flag only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Query {
    pub principal: Option<Uuid>,
    pub flag: FlagType,
    pub hostile: bool,
}

impl Query {
    pub fn new(principal: Option<Uuid>, flag: FlagType) -> Self {
        Self {
            principal,
            flag,
            hostile: false,
        }
    }

    pub fn hostile(mut self, hostile: bool) -> Self {
        self.hostile = hostile;
        self
    }
}

/// Walks plot, town and wilderness rules over the live universe. Nothing is
/// cached between calls.
pub struct PermissionResolver<'a> {
    universe: &'a Universe,
}

impl<'a> PermissionResolver<'a> {
    pub fn new(universe: &'a Universe) -> Self {
        Self { universe }
    }

    pub fn has_permission(&self, query: &Query, target: &Target) -> bool {
        match target {
            Target::Point(pos) => self.at_point(query, *pos),
            Target::Volume(volume) => self.in_volume(query, volume),
        }
    }

    fn at_point(&self, query: &Query, pos: BlockPos) -> bool {
        if let Some(plot) = self.universe.plot_at(pos) {
            return self.plot_rule(query, plot);
        }
        if let Some(town) = self.universe.town_at(pos) {
            return self.town_rule(query, town);
        }
        self.universe.config().wilderness_default
    }

    /// Denies if any block of the volume denies. Within each claimed chunk
    /// the plots overlapping the volume answer for their blocks and the town
    /// answers for whatever no plot covers. Unclaimed chunks take the
    /// wilderness default.
    fn in_volume(&self, query: &Query, volume: &Volume) -> bool {
        let claimed = self.universe.registry().claimed_in(volume);
        if !self.universe.config().wilderness_default
            && (claimed.len() as u64) < volume.chunk_count()
        {
            return false;
        }
        for block in claimed {
            let Some(town) = self.universe.town(block.town) else {
                continue;
            };
            let Some(part) = volume.intersect(&block.chunk.volume()) else {
                continue;
            };
            let mut pieces = Vec::new();
            for plot in block.plots().iter().filter_map(|id| town.plot(*id)) {
                if !plot.volume.intersects(&part) {
                    continue;
                }
                if !self.plot_rule(query, plot) {
                    return false;
                }
                pieces.push(plot.volume);
            }
            if !part.is_covered_by(&pieces) && !self.town_rule(query, town) {
                return false;
            }
        }
        true
    }

    fn plot_rule(&self, query: &Query, plot: &Plot) -> bool {
        if query.flag.bypass_node().is_some() {
            if let Some(principal) = query.principal {
                if plot.is_owner(principal)
                    || self
                        .universe
                        .has_town_node(plot.town, principal, NODE_PLOT_BYPASS)
                {
                    return true;
                }
            }
        }
        let value = match plot.flags.get(query.flag) {
            Some(value) => value,
            None => match self.universe.town(plot.town) {
                Some(town) => town.flag_value(query.flag),
                None => query.flag.default_value(),
            },
        };
        value.permits(query.hostile)
    }

    fn town_rule(&self, query: &Query, town: &Town) -> bool {
        if let (Some(node), Some(principal)) = (query.flag.bypass_node(), query.principal) {
            if self.universe.has_town_node(town.id, principal, node) {
                return true;
            }
        }
        town.flag_value(query.flag).permits(query.hostile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TownsConfig;
    use crate::entities::flag::{FlagValue, MobsMode};
    use crate::entities::rank::TownRank;
    use crate::world::position::ChunkPos;
    use crate::world::universe::tests::{ashford, memory_universe, uuid};

    fn point(x: i32, y: i32, z: i32) -> Target {
        Target::Point(BlockPos::new(0, x, y, z))
    }

    #[test]
    fn town_members_bypass_and_outsiders_read_flags() {
        let (mut universe, _, town) = ashford();
        universe.register_resident(uuid(2), "Visitor", 0).expect("visitor");

        let resolver = PermissionResolver::new(&universe);
        let mayor = Query::new(Some(uuid(1)), FlagType::Modify);
        let visitor = Query::new(Some(uuid(2)), FlagType::Modify);
        assert!(resolver.has_permission(&mayor, &point(3, 64, 3)));
        assert!(!resolver.has_permission(&visitor, &point(3, 64, 3)));
        assert!(resolver.has_permission(&visitor, &point(100, 64, 100)));

        universe
            .set_town_flag(town, FlagType::Modify, FlagValue::Bool(true))
            .expect("flag");
        let resolver = PermissionResolver::new(&universe);
        assert!(resolver.has_permission(&visitor, &point(3, 64, 3)));
    }

    #[test]
    fn plot_override_beats_town_value() {
        let (mut universe, _, town) = ashford();
        universe.register_resident(uuid(2), "Visitor", 0).expect("visitor");
        let plot = universe
            .create_plot(town, "Market", Volume::new(0, 0, 0, 0, 7, 255, 7), &[uuid(1)])
            .expect("plot");
        universe
            .set_town_flag(town, FlagType::Access, FlagValue::Bool(false))
            .expect("town flag");

        let visitor = Query::new(Some(uuid(2)), FlagType::Access);
        assert!(!PermissionResolver::new(&universe).has_permission(&visitor, &point(2, 64, 2)));

        universe
            .set_plot_flag(plot, FlagType::Access, FlagValue::Bool(true))
            .expect("plot flag");
        let resolver = PermissionResolver::new(&universe);
        assert!(resolver.has_permission(&visitor, &point(2, 64, 2)));
        assert!(!resolver.has_permission(&visitor, &point(12, 64, 12)));
    }

    #[test]
    fn inside_plots_only_owners_and_plot_bypass_ranks_bypass() {
        let (mut universe, _, town) = ashford();
        universe.register_resident(uuid(2), "Owner", 0).expect("owner");
        universe.register_resident(uuid(3), "Neighbour", 0).expect("neighbour");
        universe.register_resident(uuid(4), "Deputy", 0).expect("deputy");
        universe.add_resident(town, uuid(2), TownRank::Resident).expect("add");
        universe.add_resident(town, uuid(3), TownRank::Assistant).expect("add");
        universe.add_resident(town, uuid(4), TownRank::CoOwner).expect("add");
        universe
            .create_plot(town, "Home", Volume::new(0, 0, 0, 0, 7, 255, 7), &[uuid(2)])
            .expect("plot");

        let resolver = PermissionResolver::new(&universe);
        let inside = point(1, 64, 1);
        let modify = |who: u128| Query::new(Some(uuid(who)), FlagType::Modify);
        assert!(resolver.has_permission(&modify(2), &inside));
        assert!(!resolver.has_permission(&modify(3), &inside));
        assert!(resolver.has_permission(&modify(4), &inside));
        assert!(resolver.has_permission(&modify(3), &point(9, 64, 9)));
    }

    #[test]
    fn pvp_is_never_bypassed() {
        let (mut universe, _, town) = ashford();
        let resolver = PermissionResolver::new(&universe);
        let mayor = Query::new(Some(uuid(1)), FlagType::Pvp);
        assert!(!resolver.has_permission(&mayor, &point(1, 64, 1)));

        universe
            .set_town_flag(town, FlagType::Pvp, FlagValue::Bool(true))
            .expect("flag");
        assert!(PermissionResolver::new(&universe).has_permission(&mayor, &point(1, 64, 1)));
    }

    #[test]
    fn mobs_flag_reads_hostility() {
        let (mut universe, _, town) = ashford();
        let passive = Query::new(None, FlagType::Mobs);
        let hostile = passive.hostile(true);

        let resolver = PermissionResolver::new(&universe);
        assert!(resolver.has_permission(&passive, &point(1, 64, 1)));
        assert!(!resolver.has_permission(&hostile, &point(1, 64, 1)));

        universe
            .set_town_flag(town, FlagType::Mobs, FlagValue::Mobs(MobsMode::None))
            .expect("flag");
        let resolver = PermissionResolver::new(&universe);
        assert!(!resolver.has_permission(&passive, &point(1, 64, 1)));

        universe
            .set_town_flag(town, FlagType::Mobs, FlagValue::Mobs(MobsMode::All))
            .expect("flag");
        let resolver = PermissionResolver::new(&universe);
        assert!(resolver.has_permission(&hostile, &point(1, 64, 1)));
    }

    #[test]
    fn wilderness_uses_configured_default() {
        let (universe, _) = memory_universe(TownsConfig {
            wilderness_default: false,
            ..TownsConfig::default()
        });
        let query = Query::new(None, FlagType::Enter);
        assert!(!PermissionResolver::new(&universe).has_permission(&query, &point(0, 64, 0)));
    }

    #[test]
    fn volume_denies_when_center_denies() {
        let (mut universe, _, town) = ashford();
        universe.register_resident(uuid(2), "Visitor", 0).expect("visitor");
        let visitor = Query::new(Some(uuid(2)), FlagType::Modify);
        let resolver = PermissionResolver::new(&universe);

        for center in [
            BlockPos::new(0, 4, 64, 4),
            BlockPos::new(0, 31, 64, 15),
            BlockPos::new(0, 200, 64, 200),
        ] {
            let at_center = resolver.has_permission(&visitor, &Target::Point(center));
            let around = resolver.has_permission(&visitor, &Target::Volume(Volume::around(center, 3)));
            let single = resolver.has_permission(&visitor, &Target::Volume(Volume::around(center, 0)));
            assert_eq!(at_center, single, "at {center}");
            if !at_center {
                assert!(!around, "at {center}");
            }
        }

        // A box reaching from wilderness into the town is denied.
        let edge = Volume::around(BlockPos::new(0, 34, 64, 4), 3);
        assert!(!resolver.has_permission(&visitor, &Target::Volume(edge)));

        universe
            .set_town_flag(town, FlagType::Modify, FlagValue::Bool(true))
            .expect("flag");
        assert!(PermissionResolver::new(&universe).has_permission(&visitor, &Target::Volume(edge)));
        assert_eq!(universe.registry().owner_of(ChunkPos::new(0, 2, 0)), None);
    }

    #[test]
    fn volume_inside_permissive_plot_ignores_town_value() {
        let (mut universe, _, town) = ashford();
        universe.register_resident(uuid(2), "Visitor", 0).expect("visitor");
        let plot = universe
            .create_plot(town, "Square", Volume::new(0, 0, 0, 0, 15, 255, 15), &[uuid(1)])
            .expect("plot");
        universe
            .set_town_flag(town, FlagType::Access, FlagValue::Bool(false))
            .expect("town flag");
        universe
            .set_plot_flag(plot, FlagType::Access, FlagValue::Bool(true))
            .expect("plot flag");

        let resolver = PermissionResolver::new(&universe);
        let visitor = Query::new(Some(uuid(2)), FlagType::Access);
        let center = BlockPos::new(0, 8, 64, 8);
        assert!(resolver.has_permission(&visitor, &Target::Point(center)));
        assert!(resolver.has_permission(&visitor, &Target::Volume(Volume::around(center, 1))));

        // Spilling into the plot-free chunk brings the town value back.
        let spill = Volume::around(BlockPos::new(0, 15, 64, 8), 2);
        assert!(!resolver.has_permission(&visitor, &Target::Volume(spill)));
    }

    #[test]
    fn volume_checks_every_overlapping_plot() {
        let (mut universe, _, town) = ashford();
        universe.register_resident(uuid(2), "Visitor", 0).expect("visitor");
        let open = universe
            .create_plot(town, "Open", Volume::new(0, 0, 0, 0, 7, 255, 15), &[uuid(1)])
            .expect("plot");
        universe
            .create_plot(town, "Closed", Volume::new(0, 8, 0, 0, 15, 255, 15), &[uuid(1)])
            .expect("plot");
        universe
            .set_plot_flag(open, FlagType::Modify, FlagValue::Bool(true))
            .expect("plot flag");

        let resolver = PermissionResolver::new(&universe);
        let visitor = Query::new(Some(uuid(2)), FlagType::Modify);
        let inside_open = Volume::around(BlockPos::new(0, 3, 64, 8), 2);
        let across = Volume::around(BlockPos::new(0, 7, 64, 8), 2);
        assert!(resolver.has_permission(&visitor, &Target::Volume(inside_open)));
        assert!(!resolver.has_permission(&visitor, &Target::Volume(across)));
    }

    #[test]
    fn world_sized_volume_is_answered_from_claims() {
        let (universe, _, _) = ashford();
        let world = Volume::new(0, -30_000_000, 0, -30_000_000, 30_000_000, 255, 30_000_000);
        let resolver = PermissionResolver::new(&universe);
        assert!(!resolver.has_permission(&Query::new(None, FlagType::Modify), &Target::Volume(world)));
        assert!(resolver.has_permission(&Query::new(Some(uuid(1)), FlagType::Modify), &Target::Volume(world)));
    }
}
