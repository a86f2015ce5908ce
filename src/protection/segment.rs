use crate::entities::flag::FlagType;
use crate::protection::condition::{Condition, ConditionError, EvalError};
use crate::protection::getters::{Getters, Subject, Value};
use crate::protection::resolver::{PermissionResolver, Query, Target};
use crate::world::position::{Location, Volume};
use crate::world::universe::Universe;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    /// An entity existing somewhere.
    Track,
    Interact,
    /// One player's entity hurting another player.
    Attack,
    Break,
    Place,
}

impl ActionKind {
    pub const ALL: [ActionKind; 5] = [
        ActionKind::Track,
        ActionKind::Interact,
        ActionKind::Attack,
        ActionKind::Break,
        ActionKind::Place,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ActionKind::Track => "track",
            ActionKind::Interact => "interact",
            ActionKind::Attack => "attack",
            ActionKind::Break => "break",
            ActionKind::Place => "place",
        }
    }
}

impl FromStr for ActionKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        ActionKind::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(value))
            .ok_or_else(|| format!("unknown action '{value}'"))
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Largest range a segment may check around its target.
pub const MAX_RANGE: u32 = 128;

/// How far around the target a segment looks. `0` checks the target block
/// alone.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RangeSpec {
    Fixed(u32),
    Getter(String),
}

impl Default for RangeSpec {
    fn default() -> Self {
        RangeSpec::Fixed(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Deny,
}

impl Verdict {
    pub fn is_allowed(self) -> bool {
        self == Verdict::Allow
    }
}

/// One thing the game wants to do, as seen by the protection layer.
#[derive(Clone, Copy)]
pub struct Action<'a> {
    pub kind: ActionKind,
    pub subject: &'a dyn Subject,
    /// The resident performing an interact, break or place.
    pub actor: Option<Uuid>,
    /// Where the attacked player stands.
    pub victim: Option<Location>,
}

impl<'a> Action<'a> {
    pub fn track(subject: &'a dyn Subject) -> Self {
        Self {
            kind: ActionKind::Track,
            subject,
            actor: None,
            victim: None,
        }
    }

    pub fn interact(subject: &'a dyn Subject, actor: Uuid) -> Self {
        Self {
            kind: ActionKind::Interact,
            subject,
            actor: Some(actor),
            victim: None,
        }
    }

    pub fn attack(attacker: &'a dyn Subject, victim: Location) -> Self {
        Self {
            kind: ActionKind::Attack,
            subject: attacker,
            actor: None,
            victim: Some(victim),
        }
    }

    /// Break or place of the block described by `subject`.
    pub fn modify(kind: ActionKind, subject: &'a dyn Subject, actor: Uuid) -> Self {
        Self {
            kind,
            subject,
            actor: Some(actor),
            victim: None,
        }
    }

    fn principal(&self) -> Option<Uuid> {
        match self.kind {
            ActionKind::Track | ActionKind::Attack => self.subject.owner(),
            ActionKind::Interact | ActionKind::Break | ActionKind::Place => self.actor,
        }
    }

    fn target(&self) -> Location {
        match (self.kind, self.victim) {
            (ActionKind::Attack, Some(victim)) => victim,
            _ => self.subject.location(),
        }
    }
}

/// A protection rule: for the listed actions, subjects matching the filter
/// and the condition must hold `flag` at the target.
///
/// A segment that faults while evaluating disables itself and allows from
/// then on, until the protection settings are reloaded.
#[derive(Debug)]
pub struct Segment {
    name: String,
    actions: Vec<ActionKind>,
    kinds: Vec<String>,
    condition: Option<Condition>,
    flag: FlagType,
    range: RangeSpec,
    getters: Arc<Getters>,
    enabled: bool,
}

impl Segment {
    pub fn new(name: &str, actions: Vec<ActionKind>, flag: FlagType, getters: Arc<Getters>) -> Self {
        Self {
            name: name.to_string(),
            actions,
            kinds: Vec::new(),
            condition: None,
            flag,
            range: RangeSpec::default(),
            getters,
            enabled: true,
        }
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    /// Restricts the segment to subjects of these kinds.
    pub fn with_kinds(mut self, kinds: Vec<String>) -> Self {
        self.kinds = kinds;
        self
    }

    pub fn with_range(mut self, range: RangeSpec) -> Self {
        self.range = range;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn flag(&self) -> FlagType {
        self.flag
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn applies_to(&self, action: ActionKind, subject_kind: &str) -> bool {
        self.actions.contains(&action)
            && (self.kinds.is_empty()
                || self
                    .kinds
                    .iter()
                    .any(|kind| kind.eq_ignore_ascii_case(subject_kind)))
    }

    pub fn check(&mut self, universe: &Universe, action: &Action<'_>) -> Verdict {
        if !self.applies_to(action.kind, action.subject.kind()) || !self.enabled {
            return Verdict::Allow;
        }
        match self.decide(universe, action) {
            Ok(verdict) => verdict,
            Err(err) => {
                self.disable(action, &err);
                Verdict::Allow
            }
        }
    }

    fn decide(&self, universe: &Universe, action: &Action<'_>) -> Result<Verdict, EvalError> {
        if let Some(condition) = &self.condition {
            if !condition.evaluate(action.subject, &self.getters)? {
                return Ok(Verdict::Allow);
            }
        }

        let range = self.range(action.subject)?;
        let center = action.target().floored();
        let target = if range == 0 {
            Target::Point(center)
        } else {
            Target::Volume(Volume::around(center, range))
        };
        let query = Query::new(action.principal(), self.flag).hostile(action.subject.is_hostile());
        if PermissionResolver::new(universe).has_permission(&query, &target) {
            Ok(Verdict::Allow)
        } else {
            Ok(Verdict::Deny)
        }
    }

    fn range(&self, subject: &dyn Subject) -> Result<u32, EvalError> {
        let range = match &self.range {
            RangeSpec::Fixed(range) => i64::from(*range),
            RangeSpec::Getter(getter) => match self.getters.get(getter, subject)? {
                Value::Int(range) => range,
                other => return Err(ConditionError::NotInteger(other.value_type()).into()),
            },
        };
        if range < 0 {
            return Err(ConditionError::NegativeRange(range).into());
        }
        match u32::try_from(range) {
            Ok(range) if range <= MAX_RANGE => Ok(range),
            _ => Err(ConditionError::RangeTooLarge(range).into()),
        }
    }

    fn disable(&mut self, action: &Action<'_>, err: &EvalError) {
        let at = action.subject.location();
        error!(
            target: "protection",
            "segment '{}' disabled after fault on {} of {} at [DIM:{}; {:.2}, {:.2}, {:.2}]: {}",
            self.name,
            action.kind,
            action.subject.kind(),
            at.dim,
            at.x,
            at.y,
            at.z,
            err
        );
        self.enabled = false;
    }
}
