use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ContentKind, Owner, TeamId, UserId, Visibility};
use crate::error::Conflict;

/// Moderation stage of a node, forward only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    #[default]
    Draft,
    PendingReview,
    Published,
    Rejected,
}

/// Inputs to [`NodeState::apply`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Hand the draft to reviewers
    Enqueue,
    /// A reviewer accepted
    Accept,
    /// A reviewer declined
    Decline,
    /// Moderation is off; publish straight from draft
    AutoAccept,
}

impl std::fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleEvent::Enqueue => write!(f, "enqueue"),
            LifecycleEvent::Accept => write!(f, "accept"),
            LifecycleEvent::Decline => write!(f, "decline"),
            LifecycleEvent::AutoAccept => write!(f, "auto_accept"),
        }
    }
}

impl NodeState {
    /// The full transition table: every (state, event) pair is answered
    pub fn apply(self, event: LifecycleEvent) -> Result<NodeState, Conflict> {
        use LifecycleEvent::*;
        use NodeState::*;

        match (self, event) {
            (Draft, Enqueue) => Ok(PendingReview),
            (Draft, AutoAccept) => Ok(Published),
            (PendingReview, Accept) => Ok(Published),
            (PendingReview, Decline) => Ok(Rejected),
            (PendingReview, Enqueue) => Err(Conflict::DuplicateSubmission),
            (from, event) => Err(Conflict::InvalidTransition {
                from: from.to_string(),
                event: event.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeState::Draft => write!(f, "draft"),
            NodeState::PendingReview => write!(f, "pending_review"),
            NodeState::Published => write!(f, "published"),
            NodeState::Rejected => write!(f, "rejected"),
        }
    }
}

impl std::str::FromStr for NodeState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "draft" => Ok(NodeState::Draft),
            "pending_review" | "pending" => Ok(NodeState::PendingReview),
            "published" => Ok(NodeState::Published),
            "rejected" => Ok(NodeState::Rejected),
            _ => Err(format!("Invalid node state: {}", s)),
        }
    }
}

/// Lifecycle class exposed to collaborators (state x visibility)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateClass {
    DraftOpen,
    DraftClosed,
    PublishedOpen,
    PublishedClosed,
    Rejected,
}

impl StateClass {
    pub fn of(state: NodeState, visibility: Visibility) -> Self {
        match (state, visibility) {
            (NodeState::Draft | NodeState::PendingReview, Visibility::Open) => {
                StateClass::DraftOpen
            }
            (NodeState::Draft | NodeState::PendingReview, Visibility::Closed) => {
                StateClass::DraftClosed
            }
            (NodeState::Published, Visibility::Open) => StateClass::PublishedOpen,
            (NodeState::Published, Visibility::Closed) => StateClass::PublishedClosed,
            (NodeState::Rejected, _) => StateClass::Rejected,
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            StateClass::DraftOpen => 10,
            StateClass::DraftClosed => 20,
            StateClass::PublishedOpen => 1,
            StateClass::PublishedClosed => 2,
            StateClass::Rejected => -1,
        }
    }
}

impl std::fmt::Display for StateClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateClass::DraftOpen => write!(f, "draft-open"),
            StateClass::DraftClosed => write!(f, "draft-closed"),
            StateClass::PublishedOpen => write!(f, "published-open"),
            StateClass::PublishedClosed => write!(f, "published-closed"),
            StateClass::Rejected => write!(f, "rejected"),
        }
    }
}

/// An initiative, workstream, discussion or response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentNode {
    #[serde(skip)]
    pub id: i64,
    pub uuid: Uuid,
    pub kind: ContentKind,
    #[serde(skip)]
    pub parent_id: Option<i64>,
    pub title: Option<String>,
    pub body: String,
    pub author: UserId,
    pub owner: Owner,
    pub visibility: Visibility,
    pub state: NodeState,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub invited_teams: Vec<TeamId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ContentNode {
    pub fn class(&self) -> StateClass {
        StateClass::of(self.state, self.visibility)
    }

    pub fn is_published(&self) -> bool {
        self.state == NodeState::Published
    }

    pub fn is_closed(&self) -> bool {
        self.visibility == Visibility::Closed
    }

    /// Display label: title when present, otherwise the head of the body
    pub fn label(&self) -> String {
        match &self.title {
            Some(title) => title.clone(),
            None => self.body.chars().take(24).collect(),
        }
    }
}
