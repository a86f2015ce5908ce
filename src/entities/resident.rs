use crate::entities::TownId;
use std::collections::BTreeSet;
use uuid::Uuid;

/// Handle to a resident's live avatar, supplied by the game engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AvatarId(pub u64);

/// A player known to the server. Residents are never deleted; disbanding a
/// town only unlinks them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resident {
    pub uuid: Uuid,
    pub name: String,
    pub joined: u64,
    pub last_login: u64,
    towns: BTreeSet<TownId>,
    selected_town: Option<TownId>,
    avatar: Option<AvatarId>,
}

impl Resident {
    pub fn new(uuid: Uuid, name: impl Into<String>, joined: u64) -> Self {
        Self {
            uuid,
            name: name.into(),
            joined,
            last_login: joined,
            towns: BTreeSet::new(),
            selected_town: None,
            avatar: None,
        }
    }

    pub fn towns(&self) -> impl Iterator<Item = TownId> + '_ {
        self.towns.iter().copied()
    }

    pub fn is_member_of(&self, town: TownId) -> bool {
        self.towns.contains(&town)
    }

    /// The town used when a command leaves it implicit. Falls back to the
    /// only town when the resident belongs to exactly one.
    pub fn selected_town(&self) -> Option<TownId> {
        self.selected_town.or_else(|| {
            if self.towns.len() == 1 {
                self.towns.iter().next().copied()
            } else {
                None
            }
        })
    }

    pub fn avatar(&self) -> Option<AvatarId> {
        self.avatar
    }

    pub fn set_avatar(&mut self, avatar: Option<AvatarId>) {
        self.avatar = avatar;
    }

    pub(crate) fn link_town(&mut self, town: TownId) {
        self.towns.insert(town);
        if self.selected_town.is_none() {
            self.selected_town = Some(town);
        }
    }

    pub(crate) fn unlink_town(&mut self, town: TownId) {
        self.towns.remove(&town);
        if self.selected_town == Some(town) {
            self.selected_town = None;
        }
    }

    pub(crate) fn set_selected_town(&mut self, town: Option<TownId>) {
        self.selected_town = town;
    }

    pub(crate) fn raw_selected_town(&self) -> Option<TownId> {
        self.selected_town
    }
}
