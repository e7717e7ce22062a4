use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ContentKind, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    #[default]
    Pending,
    Accepted,
    Declined,
}

impl std::fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TicketStatus::Pending => write!(f, "pending"),
            TicketStatus::Accepted => write!(f, "accepted"),
            TicketStatus::Declined => write!(f, "declined"),
        }
    }
}

impl std::str::FromStr for TicketStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(TicketStatus::Pending),
            "accepted" => Ok(TicketStatus::Accepted),
            "declined" => Ok(TicketStatus::Declined),
            _ => Err(format!("Invalid ticket status: {}", s)),
        }
    }
}

/// A reviewer's verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewOutcome {
    Accepted,
    Declined,
}

impl ReviewOutcome {
    pub fn ticket_status(&self) -> TicketStatus {
        match self {
            ReviewOutcome::Accepted => TicketStatus::Accepted,
            ReviewOutcome::Declined => TicketStatus::Declined,
        }
    }
}

impl std::fmt::Display for ReviewOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.ticket_status(), f)
    }
}

impl std::str::FromStr for ReviewOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "accept" | "accepted" => Ok(ReviewOutcome::Accepted),
            "decline" | "declined" | "reject" => Ok(ReviewOutcome::Declined),
            _ => Err(format!("Invalid review outcome: {}", s)),
        }
    }
}

/// Unit of moderation work for one draft
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewTicket {
    #[serde(skip)]
    pub id: i64,
    pub uuid: Uuid,
    #[serde(skip)]
    pub node_id: i64,
    pub node_kind: ContentKind,
    pub author: UserId,
    pub status: TicketStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<UserId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// Sent to each assigned reviewer
    ReviewRequest,
    /// Sent back to the author once a reviewer decides
    ReviewResult,
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationKind::ReviewRequest => write!(f, "review_request"),
            NotificationKind::ReviewResult => write!(f, "review_result"),
        }
    }
}

impl std::str::FromStr for NotificationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "review_request" => Ok(NotificationKind::ReviewRequest),
            "review_result" => Ok(NotificationKind::ReviewResult),
            _ => Err(format!("Invalid notification kind: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    #[serde(skip)]
    pub id: i64,
    pub uuid: Uuid,
    pub recipient: UserId,
    pub ticket: Uuid,
    pub kind: NotificationKind,
    pub message: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}
