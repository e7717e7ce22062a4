use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{FamilyId, TeamId, UserId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    /// Inactive users are never picked as reviewers
    pub active: bool,
    pub unread_count: i64,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    pub id: TeamId,
    pub uuid: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Family {
    pub id: FamilyId,
    pub uuid: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Only parents act for a family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FamilyRole {
    Parent,
    #[default]
    Child,
}

impl std::fmt::Display for FamilyRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FamilyRole::Parent => write!(f, "parent"),
            FamilyRole::Child => write!(f, "child"),
        }
    }
}

impl std::str::FromStr for FamilyRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "parent" => Ok(FamilyRole::Parent),
            "child" => Ok(FamilyRole::Child),
            _ => Err(format!("Invalid family role: {}", s)),
        }
    }
}

/// Catalog an investigation step may select from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceCategory {
    Hazard,
    Risk,
    Remedy,
}

impl std::fmt::Display for ReferenceCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReferenceCategory::Hazard => write!(f, "hazard"),
            ReferenceCategory::Risk => write!(f, "risk"),
            ReferenceCategory::Remedy => write!(f, "remedy"),
        }
    }
}

impl std::str::FromStr for ReferenceCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hazard" => Ok(ReferenceCategory::Hazard),
            "risk" => Ok(ReferenceCategory::Risk),
            "remedy" => Ok(ReferenceCategory::Remedy),
            _ => Err(format!("Invalid reference category: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceItem {
    pub id: i64,
    pub category: ReferenceCategory,
    pub name: String,
    pub description: Option<String>,
}
