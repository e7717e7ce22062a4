//! Review tickets and the notifications they fan out to.

use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use super::sqlite_store::{is_unique_violation, now, parse_column, parse_opt_ts, parse_ts, parse_uuid, Repo};
use crate::entity::{
    ContentKind, ContentNode, Notification, NotificationKind, ReviewTicket, TicketStatus, UserId,
};
use crate::error::{AgoraError, Conflict, Result};

const TICKET_COLUMNS: &str =
    "id, uuid, node_id, node_kind, author_id, status, created_at, resolved_at, resolved_by";

struct TicketRow {
    id: i64,
    uuid: String,
    node_id: i64,
    node_kind: u8,
    author_id: i64,
    status: String,
    created_at: String,
    resolved_at: Option<String>,
    resolved_by: Option<i64>,
}

fn ticket_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TicketRow> {
    Ok(TicketRow {
        id: row.get(0)?,
        uuid: row.get(1)?,
        node_id: row.get(2)?,
        node_kind: row.get(3)?,
        author_id: row.get(4)?,
        status: row.get(5)?,
        created_at: row.get(6)?,
        resolved_at: row.get(7)?,
        resolved_by: row.get(8)?,
    })
}

impl TicketRow {
    fn into_ticket(self) -> Result<ReviewTicket> {
        let node_kind = ContentKind::from_type_tag(self.node_kind).ok_or_else(|| {
            AgoraError::Integrity(format!(
                "ticket {} has unknown type tag {}",
                self.uuid, self.node_kind
            ))
        })?;
        Ok(ReviewTicket {
            id: self.id,
            uuid: parse_uuid(&self.uuid)?,
            node_id: self.node_id,
            node_kind,
            author: UserId(self.author_id),
            status: parse_column("review_tickets.status", &self.status)?,
            created_at: parse_ts(&self.created_at)?,
            resolved_at: parse_opt_ts(self.resolved_at)?,
            resolved_by: self.resolved_by.map(UserId),
        })
    }
}

const NOTIFICATION_SELECT: &str = "SELECT n.id, n.uuid, n.recipient_id, t.uuid, n.kind, n.message, n.is_read, n.created_at
     FROM notifications n JOIN review_tickets t ON t.id = n.ticket_id";

type NotificationRow = (i64, String, i64, String, String, String, bool, String);

fn notification_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<NotificationRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
    ))
}

fn into_notification(row: NotificationRow) -> Result<Notification> {
    let (id, uuid, recipient, ticket, kind, message, is_read, created_at) = row;
    Ok(Notification {
        id,
        uuid: parse_uuid(&uuid)?,
        recipient: UserId(recipient),
        ticket: parse_uuid(&ticket)?,
        kind: parse_column("notifications.kind", &kind)?,
        message,
        is_read,
        created_at: parse_ts(&created_at)?,
    })
}

impl Repo<'_> {
    /// Insert a pending ticket. A second pending ticket for the same node
    /// trips the partial unique index and surfaces as a duplicate submission
    pub fn insert_ticket(&self, node: &ContentNode) -> Result<ReviewTicket> {
        let ticket = ReviewTicket {
            id: 0,
            uuid: Uuid::new_v4(),
            node_id: node.id,
            node_kind: node.kind,
            author: node.author,
            status: TicketStatus::Pending,
            created_at: now(),
            resolved_at: None,
            resolved_by: None,
        };

        let inserted = self.conn.execute(
            "INSERT INTO review_tickets (uuid, node_id, node_kind, author_id, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                ticket.uuid.to_string(),
                ticket.node_id,
                ticket.node_kind.type_tag(),
                ticket.author.0,
                ticket.status.to_string(),
                ticket.created_at.to_rfc3339(),
            ],
        );
        match inserted {
            Ok(_) => Ok(ReviewTicket {
                id: self.conn.last_insert_rowid(),
                ..ticket
            }),
            Err(e) if is_unique_violation(&e) => Err(Conflict::DuplicateSubmission.into()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn pending_ticket_for(&self, node_id: i64) -> Result<Option<ReviewTicket>> {
        let row = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM review_tickets WHERE node_id = ?1 AND status = 'pending'",
                    TICKET_COLUMNS
                ),
                [node_id],
                ticket_row,
            )
            .optional()?;
        row.map(TicketRow::into_ticket).transpose()
    }

    pub fn tickets_for_node(&self, node_id: i64) -> Result<Vec<ReviewTicket>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM review_tickets WHERE node_id = ?1 ORDER BY id",
            TICKET_COLUMNS
        ))?;
        let rows = stmt
            .query_map([node_id], ticket_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter().map(TicketRow::into_ticket).collect()
    }

    pub fn require_ticket(&self, uuid: &Uuid) -> Result<ReviewTicket> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {} FROM review_tickets WHERE uuid = ?1", TICKET_COLUMNS),
                [uuid.to_string()],
                ticket_row,
            )
            .optional()?;
        row.map(TicketRow::into_ticket)
            .transpose()?
            .ok_or_else(|| AgoraError::NotFound(format!("review ticket {}", uuid)))
    }

    /// Close a pending ticket; zero rows updated means someone else got there first
    pub fn close_ticket(&self, ticket_id: i64, status: TicketStatus, by: UserId) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE review_tickets SET status = ?1, resolved_at = ?2, resolved_by = ?3
             WHERE id = ?4 AND status = 'pending'",
            params![status.to_string(), now().to_rfc3339(), by.0, ticket_id],
        )?;
        if changed == 0 {
            return Err(Conflict::TicketAlreadyResolved(status.to_string()).into());
        }
        Ok(())
    }

    pub fn insert_notification(
        &self,
        recipient: UserId,
        ticket: &ReviewTicket,
        kind: NotificationKind,
        message: &str,
    ) -> Result<Notification> {
        let notification = Notification {
            id: 0,
            uuid: Uuid::new_v4(),
            recipient,
            ticket: ticket.uuid,
            kind,
            message: message.to_string(),
            is_read: false,
            created_at: now(),
        };
        self.conn.execute(
            "INSERT INTO notifications (uuid, recipient_id, ticket_id, kind, message, is_read, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
            params![
                notification.uuid.to_string(),
                recipient.0,
                ticket.id,
                kind.to_string(),
                notification.message,
                notification.created_at.to_rfc3339(),
            ],
        )?;
        Ok(Notification {
            id: self.conn.last_insert_rowid(),
            ..notification
        })
    }

    /// Users a ticket was routed to for review
    pub fn ticket_reviewers(&self, ticket_id: i64) -> Result<Vec<UserId>> {
        let mut stmt = self.conn.prepare(
            "SELECT recipient_id FROM notifications
             WHERE ticket_id = ?1 AND kind = ?2 ORDER BY id",
        )?;
        let ids = stmt
            .query_map(
                params![ticket_id, NotificationKind::ReviewRequest.to_string()],
                |row| row.get::<_, i64>(0),
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids.into_iter().map(UserId).collect())
    }

    pub fn notifications_for(&self, recipient: UserId) -> Result<Vec<Notification>> {
        let mut stmt = self.conn.prepare(&format!(
            "{} WHERE n.recipient_id = ?1 ORDER BY n.id",
            NOTIFICATION_SELECT
        ))?;
        let rows = stmt
            .query_map([recipient.0], notification_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter().map(into_notification).collect()
    }

    pub fn require_notification(&self, uuid: &Uuid) -> Result<Notification> {
        let row = self
            .conn
            .query_row(
                &format!("{} WHERE n.uuid = ?1", NOTIFICATION_SELECT),
                [uuid.to_string()],
                notification_row,
            )
            .optional()?;
        row.map(into_notification)
            .transpose()?
            .ok_or_else(|| AgoraError::NotFound(format!("notification {}", uuid)))
    }

    /// Returns false when the flag was already set
    pub fn mark_notification_read(&self, id: i64) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE notifications SET is_read = 1 WHERE id = ?1 AND is_read = 0",
            [id],
        )?;
        Ok(changed > 0)
    }
}
