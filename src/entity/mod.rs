mod directory;
mod investigation;
mod node;
mod ticket;

pub use directory::{Family, FamilyRole, ReferenceCategory, ReferenceItem, Team, User};
pub use investigation::{
    InvestigationKind, InvestigationRecord, Observation, Sense, StepKind, StepPlan, StepStatus,
};
pub use node::{ContentNode, LifecycleEvent, NodeState, StateClass};
pub use ticket::{Notification, NotificationKind, ReviewOutcome, ReviewTicket, TicketStatus};

use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim()
                    .parse::<i64>()
                    .map($name)
                    .map_err(|_| format!("Invalid {}: {}", stringify!($name), s))
            }
        }
    };
}

id_newtype!(
    /// Internal user id
    UserId
);
id_newtype!(
    /// Internal team id
    TeamId
);
id_newtype!(
    /// Internal family id
    FamilyId
);

/// Who holds authority over a piece of content
///
/// `Family` is the private axis; `Team` the public one. `Freelancer` and
/// `Unowned` exist as explicit variants and never confer authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "lowercase")]
pub enum Owner {
    Team(TeamId),
    Family(FamilyId),
    Freelancer,
    Unowned,
}

impl Owner {
    /// Column pair used by the store: (kind, id)
    pub fn to_columns(&self) -> (&'static str, Option<i64>) {
        match self {
            Owner::Team(id) => ("team", Some(id.0)),
            Owner::Family(id) => ("family", Some(id.0)),
            Owner::Freelancer => ("freelancer", None),
            Owner::Unowned => ("unowned", None),
        }
    }

    /// Inverse of [`Owner::to_columns`]; `None` means the pair is corrupt
    pub fn from_columns(kind: &str, id: Option<i64>) -> Option<Self> {
        match (kind, id) {
            ("team", Some(id)) if id > 0 => Some(Owner::Team(TeamId(id))),
            ("family", Some(id)) if id > 0 => Some(Owner::Family(FamilyId(id))),
            ("freelancer", None) => Some(Owner::Freelancer),
            ("unowned", None) => Some(Owner::Unowned),
            _ => None,
        }
    }
}

impl std::fmt::Display for Owner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Owner::Team(id) => write!(f, "team:{}", id),
            Owner::Family(id) => write!(f, "family:{}", id),
            Owner::Freelancer => write!(f, "freelancer"),
            Owner::Unowned => write!(f, "unowned"),
        }
    }
}

impl std::str::FromStr for Owner {
    type Err = String;

    /// Accepts `team:<id>`, `family:<id>`, `freelancer`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        match lower.split_once(':') {
            Some(("team", id)) => id.parse().map(Owner::Team),
            Some(("family", id)) => id.parse().map(Owner::Family),
            None if lower == "freelancer" => Ok(Owner::Freelancer),
            None if lower == "unowned" => Ok(Owner::Unowned),
            _ => Err(format!("Invalid owner: {}", s)),
        }
    }
}

/// Orthogonal to moderation: who may see and extend a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Open,
    Closed,
}

impl std::fmt::Display for Visibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Visibility::Open => write!(f, "open"),
            Visibility::Closed => write!(f, "closed"),
        }
    }
}

impl std::str::FromStr for Visibility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "open" => Ok(Visibility::Open),
            "closed" => Ok(Visibility::Closed),
            _ => Err(format!("Invalid visibility: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Initiative,
    Workstream,
    Discussion,
    Response,
}

impl ContentKind {
    pub const ALL: [ContentKind; 4] = [
        ContentKind::Initiative,
        ContentKind::Workstream,
        ContentKind::Discussion,
        ContentKind::Response,
    ];

    pub fn parent_kind(&self) -> Option<ContentKind> {
        match self {
            ContentKind::Initiative => None,
            ContentKind::Workstream => Some(ContentKind::Initiative),
            ContentKind::Discussion => Some(ContentKind::Workstream),
            ContentKind::Response => Some(ContentKind::Discussion),
        }
    }

    pub fn has_title(&self) -> bool {
        !matches!(self, ContentKind::Response)
    }

    /// Object-type tag carried by review tickets
    pub fn type_tag(&self) -> u8 {
        match self {
            ContentKind::Initiative => 1,
            ContentKind::Workstream => 2,
            ContentKind::Discussion => 3,
            ContentKind::Response => 4,
        }
    }

    pub fn from_type_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(ContentKind::Initiative),
            2 => Some(ContentKind::Workstream),
            3 => Some(ContentKind::Discussion),
            4 => Some(ContentKind::Response),
            _ => None,
        }
    }
}

impl std::fmt::Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContentKind::Initiative => write!(f, "initiative"),
            ContentKind::Workstream => write!(f, "workstream"),
            ContentKind::Discussion => write!(f, "discussion"),
            ContentKind::Response => write!(f, "response"),
        }
    }
}

impl std::str::FromStr for ContentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "initiative" => Ok(ContentKind::Initiative),
            "workstream" => Ok(ContentKind::Workstream),
            "discussion" => Ok(ContentKind::Discussion),
            "response" => Ok(ContentKind::Response),
            _ => Err(format!("Invalid content kind: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_columns_roundtrip_and_corruption() {
        for owner in [
            Owner::Team(TeamId(4)),
            Owner::Family(FamilyId(9)),
            Owner::Freelancer,
            Owner::Unowned,
        ] {
            let (kind, id) = owner.to_columns();
            assert_eq!(Owner::from_columns(kind, id), Some(owner));
        }

        assert_eq!(Owner::from_columns("family", None), None);
        assert_eq!(Owner::from_columns("family", Some(0)), None);
        assert_eq!(Owner::from_columns("team", Some(-2)), None);
        assert_eq!(Owner::from_columns("freelancer", Some(2)), None);
    }

    #[test]
    fn test_owner_parse() {
        assert_eq!("team:3".parse::<Owner>(), Ok(Owner::Team(TeamId(3))));
        assert_eq!("Family:7".parse::<Owner>(), Ok(Owner::Family(FamilyId(7))));
        assert_eq!("freelancer".parse::<Owner>(), Ok(Owner::Freelancer));
        assert!("team:".parse::<Owner>().is_err());
        assert!("guild:1".parse::<Owner>().is_err());
    }

    #[test]
    fn test_kind_tree_shape() {
        assert_eq!(ContentKind::Initiative.parent_kind(), None);
        assert_eq!(
            ContentKind::Response.parent_kind(),
            Some(ContentKind::Discussion)
        );
        for kind in ContentKind::ALL {
            assert_eq!(ContentKind::from_type_tag(kind.type_tag()), Some(kind));
        }
        assert!(!ContentKind::Response.has_title());
    }
}
