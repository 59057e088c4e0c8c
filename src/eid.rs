use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::str::FromStr;
use std::{fmt::Display, ops::Deref};

/// Identifier of a goal, action, value or term, as issued by the owning
/// repository. Opaque to this crate.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Hash)]
pub struct EntityId(String);

impl Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntityId {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(EntityId(s.to_string()))
    }
}

impl Deref for EntityId {
    type Target = String;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<&str> for EntityId {
    fn from(fr: &str) -> Self {
        EntityId(fr.to_string())
    }
}

impl From<String> for EntityId {
    fn from(fr: String) -> Self {
        EntityId(fr)
    }
}

impl From<EntityId> for String {
    fn from(fr: EntityId) -> Self {
        fr.0
    }
}

/// Kind of planning entity an embedding belongs to.
///
/// Duplicate checks are always scoped to a single type: a goal is never
/// compared against an action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Goal,
    Action,
    Value,
    Term,
}

impl EntityType {
    pub const ALL: [EntityType; 4] = [
        EntityType::Goal,
        EntityType::Action,
        EntityType::Value,
        EntityType::Term,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Goal => "goal",
            EntityType::Action => "action",
            EntityType::Value => "value",
            EntityType::Term => "term",
        }
    }
}

impl Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown entity type: {0}")]
pub struct UnknownEntityType(pub String);

impl FromStr for EntityType {
    type Err = UnknownEntityType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "goal" | "goals" => Ok(EntityType::Goal),
            "action" | "actions" => Ok(EntityType::Action),
            "value" | "values" | "personalvalue" | "personalvalues" => Ok(EntityType::Value),
            "term" | "terms" | "goalterm" | "goalterms" => Ok(EntityType::Term),
            _ => Err(UnknownEntityType(s.to_string())),
        }
    }
}
