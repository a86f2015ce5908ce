use crate::world::position::{BlockPos, Location};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Anything the protection layer is asked about: a mob, a player, an item
/// frame, a block being broken. Supplied by the game engine.
pub trait Subject {
    fn kind(&self) -> &str;
    fn location(&self) -> Location;
    fn owner(&self) -> Option<Uuid>;
    /// Where the owner's avatar currently stands, if online.
    fn owner_location(&self) -> Option<Location>;
    fn is_hostile(&self) -> bool;
    /// Named engine-specific attribute, e.g. `tamed` or `age`.
    fn attribute(&self, name: &str) -> Option<Value>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(i64),
    Bool(bool),
    Str(String),
    Coord(BlockPos),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Int(_) => ValueType::Int,
            Value::Bool(_) => ValueType::Bool,
            Value::Str(_) => ValueType::Str,
            Value::Coord(_) => ValueType::Coord,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(value) => write!(f, "{value}"),
            Value::Bool(value) => write!(f, "{value}"),
            Value::Str(value) => write!(f, "\"{value}\""),
            Value::Coord(pos) => write!(f, "{pos}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Int,
    Bool,
    Str,
    Coord,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ValueType::Int => "int",
            ValueType::Bool => "bool",
            ValueType::Str => "str",
            ValueType::Coord => "coord",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GetterError {
    #[error("getter '{0}' is not defined")]
    Undefined(String),
    #[error("getter '{getter}' is unavailable: {reason}")]
    Unavailable { getter: String, reason: &'static str },
    #[error("getter '{getter}' produced {found}, declared {expected}")]
    Mistyped {
        getter: String,
        expected: ValueType,
        found: ValueType,
    },
}

type GetterFn = Box<dyn Fn(&dyn Subject) -> Result<Value, GetterError> + Send + Sync>;

struct Getter {
    output: ValueType,
    func: GetterFn,
}

/// Named pure functions over a subject, each with a declared output type so
/// conditions can be type checked when they are loaded.
#[derive(Default)]
pub struct Getters {
    entries: BTreeMap<String, Getter>,
}

impl fmt::Debug for Getters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(name, getter)| (name, getter.output)))
            .finish()
    }
}

impl Getters {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        let mut getters = Self::empty();
        getters.register("entityType", ValueType::Str, |subject| {
            Ok(Value::Str(subject.kind().to_string()))
        });
        getters.register("isHostile", ValueType::Bool, |subject| {
            Ok(Value::Bool(subject.is_hostile()))
        });
        getters.register("hasOwner", ValueType::Bool, |subject| {
            Ok(Value::Bool(subject.owner().is_some()))
        });
        getters.register("position", ValueType::Coord, |subject| {
            Ok(Value::Coord(subject.location().floored()))
        });
        getters.register("dimension", ValueType::Int, |subject| {
            Ok(Value::Int(i64::from(subject.location().dim)))
        });
        getters.register("ownerDistance", ValueType::Int, |subject| {
            let owner = subject.owner_location().ok_or(GetterError::Unavailable {
                getter: "ownerDistance".to_string(),
                reason: "subject has no owner position",
            })?;
            subject
                .location()
                .floored()
                .distance(owner.floored())
                .map(Value::Int)
                .ok_or(GetterError::Unavailable {
                    getter: "ownerDistance".to_string(),
                    reason: "owner is in another dimension",
                })
        });
        getters
    }

    /// Replaces any getter of the same name.
    pub fn register<F>(&mut self, name: &str, output: ValueType, func: F)
    where
        F: Fn(&dyn Subject) -> Result<Value, GetterError> + Send + Sync + 'static,
    {
        self.entries.insert(
            name.to_string(),
            Getter {
                output,
                func: Box::new(func),
            },
        );
    }

    /// Exposes `Subject::attribute(name)` as a getter of the given type.
    pub fn register_attribute(&mut self, name: &str, output: ValueType) {
        let getter = name.to_string();
        self.register(name, output, move |subject| {
            subject.attribute(&getter).ok_or(GetterError::Unavailable {
                getter: getter.clone(),
                reason: "subject has no such attribute",
            })
        });
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn output_type(&self, name: &str) -> Option<ValueType> {
        self.entries.get(name).map(|getter| getter.output)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn get(&self, name: &str, subject: &dyn Subject) -> Result<Value, GetterError> {
        let getter = self
            .entries
            .get(name)
            .ok_or_else(|| GetterError::Undefined(name.to_string()))?;
        let value = (getter.func)(subject)?;
        if value.value_type() != getter.output {
            return Err(GetterError::Mistyped {
                getter: name.to_string(),
                expected: getter.output,
                found: value.value_type(),
            });
        }
        Ok(value)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Plain subject used across the protection tests.
    #[derive(Debug, Clone)]
    pub(crate) struct TestSubject {
        pub kind: String,
        pub location: Location,
        pub owner: Option<Uuid>,
        pub owner_location: Option<Location>,
        pub hostile: bool,
        pub attributes: HashMap<String, Value>,
    }

    impl TestSubject {
        pub(crate) fn new(kind: &str, location: Location) -> Self {
            Self {
                kind: kind.to_string(),
                location,
                owner: None,
                owner_location: None,
                hostile: false,
                attributes: HashMap::new(),
            }
        }

        pub(crate) fn owned_by(mut self, owner: Uuid) -> Self {
            self.owner = Some(owner);
            self
        }
    }

    impl Subject for TestSubject {
        fn kind(&self) -> &str {
            &self.kind
        }

        fn location(&self) -> Location {
            self.location
        }

        fn owner(&self) -> Option<Uuid> {
            self.owner
        }

        fn owner_location(&self) -> Option<Location> {
            self.owner_location
        }

        fn is_hostile(&self) -> bool {
            self.hostile
        }

        fn attribute(&self, name: &str) -> Option<Value> {
            self.attributes.get(name).cloned()
        }
    }

    #[test]
    fn builtins_read_the_subject() {
        let getters = Getters::builtin();
        let mut subject = TestSubject::new("zombie", Location::new(0, 10.5, 64.0, -3.2));
        subject.hostile = true;

        assert_eq!(
            getters.get("entityType", &subject),
            Ok(Value::Str("zombie".to_string()))
        );
        assert_eq!(getters.get("isHostile", &subject), Ok(Value::Bool(true)));
        assert_eq!(getters.get("hasOwner", &subject), Ok(Value::Bool(false)));
        assert_eq!(
            getters.get("position", &subject),
            Ok(Value::Coord(BlockPos::new(0, 10, 64, -4)))
        );
        assert!(matches!(
            getters.get("ownerDistance", &subject),
            Err(GetterError::Unavailable { .. })
        ));

        subject.owner_location = Some(Location::new(0, 14.0, 64.0, -4.0));
        assert_eq!(getters.get("ownerDistance", &subject), Ok(Value::Int(4)));
    }

    #[test]
    fn attribute_getters_check_their_type() {
        let mut getters = Getters::builtin();
        getters.register_attribute("tamed", ValueType::Bool);
        let mut subject = TestSubject::new("wolf", Location::new(0, 0.0, 0.0, 0.0));

        assert!(matches!(
            getters.get("tamed", &subject),
            Err(GetterError::Unavailable { .. })
        ));
        subject
            .attributes
            .insert("tamed".to_string(), Value::Int(1));
        assert!(matches!(
            getters.get("tamed", &subject),
            Err(GetterError::Mistyped {
                expected: ValueType::Bool,
                found: ValueType::Int,
                ..
            })
        ));
        subject
            .attributes
            .insert("tamed".to_string(), Value::Bool(true));
        assert_eq!(getters.get("tamed", &subject), Ok(Value::Bool(true)));
        assert_eq!(
            getters.get("missing", &subject),
            Err(GetterError::Undefined("missing".to_string()))
        );
    }
}
