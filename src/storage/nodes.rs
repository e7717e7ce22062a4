//! Content nodes, their invited-team rows and workstream approvals.

use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use super::sqlite_store::{is_unique_violation, now, parse_column, parse_ts, parse_uuid, Repo};
use crate::entity::{
    ContentKind, ContentNode, NodeState, Owner, TeamId, UserId, Visibility,
};
use crate::error::{AgoraError, Result, ValidationError};

/// Everything needed to persist a fresh draft
#[derive(Debug, Clone)]
pub struct NewNode {
    pub kind: ContentKind,
    pub parent_id: Option<i64>,
    pub title: Option<String>,
    pub body: String,
    pub author: UserId,
    pub owner: Owner,
    pub visibility: Visibility,
    pub invited_teams: Vec<TeamId>,
}

const NODE_COLUMNS: &str = "id, uuid, kind, parent_id, title, body, author_id, owner_kind, owner_id, \
                            visibility, state, created_at, updated_at";

struct NodeRow {
    id: i64,
    uuid: String,
    kind: String,
    parent_id: Option<i64>,
    title: Option<String>,
    body: String,
    author_id: i64,
    owner_kind: String,
    owner_id: Option<i64>,
    visibility: String,
    state: String,
    created_at: String,
    updated_at: String,
}

fn node_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<NodeRow> {
    Ok(NodeRow {
        id: row.get(0)?,
        uuid: row.get(1)?,
        kind: row.get(2)?,
        parent_id: row.get(3)?,
        title: row.get(4)?,
        body: row.get(5)?,
        author_id: row.get(6)?,
        owner_kind: row.get(7)?,
        owner_id: row.get(8)?,
        visibility: row.get(9)?,
        state: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

impl Repo<'_> {
    fn decode_node(&self, row: NodeRow) -> Result<ContentNode> {
        let owner = Owner::from_columns(&row.owner_kind, row.owner_id).ok_or_else(|| {
            AgoraError::Integrity(format!(
                "node {} has corrupt owner ({}, {:?})",
                row.uuid, row.owner_kind, row.owner_id
            ))
        })?;
        let visibility: Visibility = parse_column("nodes.visibility", &row.visibility)?;
        let invited_teams = if visibility == Visibility::Closed {
            self.invited_teams(row.id)?
        } else {
            Vec::new()
        };

        Ok(ContentNode {
            id: row.id,
            uuid: parse_uuid(&row.uuid)?,
            kind: parse_column("nodes.kind", &row.kind)?,
            parent_id: row.parent_id,
            title: row.title,
            body: row.body,
            author: UserId(row.author_id),
            owner,
            visibility,
            state: parse_column("nodes.state", &row.state)?,
            invited_teams,
            created_at: parse_ts(&row.created_at)?,
            updated_at: parse_ts(&row.updated_at)?,
        })
    }

    /// Insert a draft and its invited-team rows inside the caller's transaction
    pub fn insert_node(&self, node: &NewNode) -> Result<ContentNode> {
        let uuid = Uuid::new_v4();
        let created_at = now();
        let (owner_kind, owner_id) = node.owner.to_columns();

        let inserted = self.conn.execute(
            "INSERT INTO nodes
             (uuid, kind, parent_id, title, body, author_id, owner_kind, owner_id,
              visibility, state, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
            params![
                uuid.to_string(),
                node.kind.to_string(),
                node.parent_id,
                node.title,
                node.body,
                node.author.0,
                owner_kind,
                owner_id,
                node.visibility.to_string(),
                NodeState::Draft.to_string(),
                created_at.to_rfc3339(),
            ],
        );
        match inserted {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) && node.title.is_some() => {
                return Err(ValidationError::DuplicateTitle {
                    title: node.title.clone().unwrap_or_default(),
                }
                .into());
            }
            Err(e) => return Err(e.into()),
        }
        let id = self.conn.last_insert_rowid();

        for team in &node.invited_teams {
            self.conn.execute(
                "INSERT INTO node_invited_teams (node_id, team_id) VALUES (?1, ?2)",
                params![id, team.0],
            )?;
        }

        Ok(ContentNode {
            id,
            uuid,
            kind: node.kind,
            parent_id: node.parent_id,
            title: node.title.clone(),
            body: node.body.clone(),
            author: node.author,
            owner: node.owner,
            visibility: node.visibility,
            state: NodeState::Draft,
            invited_teams: node.invited_teams.clone(),
            created_at,
            updated_at: created_at,
        })
    }

    pub fn get_node(&self, id: i64) -> Result<Option<ContentNode>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {} FROM nodes WHERE id = ?1", NODE_COLUMNS),
                [id],
                node_row,
            )
            .optional()?;
        row.map(|r| self.decode_node(r)).transpose()
    }

    pub fn get_node_by_uuid(&self, uuid: &Uuid) -> Result<Option<ContentNode>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {} FROM nodes WHERE uuid = ?1", NODE_COLUMNS),
                [uuid.to_string()],
                node_row,
            )
            .optional()?;
        row.map(|r| self.decode_node(r)).transpose()
    }

    pub fn require_node(&self, uuid: &Uuid) -> Result<ContentNode> {
        self.get_node_by_uuid(uuid)?
            .ok_or_else(|| AgoraError::NotFound(format!("content {}", uuid)))
    }

    /// Parent lookup where a missing row means a broken tree
    pub fn parent_of(&self, node: &ContentNode) -> Result<Option<ContentNode>> {
        match node.parent_id {
            None => Ok(None),
            Some(parent_id) => self.get_node(parent_id)?.map(Some).ok_or_else(|| {
                AgoraError::Integrity(format!(
                    "{} {} points at missing parent",
                    node.kind, node.uuid
                ))
            }),
        }
    }

    pub fn list_nodes(
        &self,
        kind: Option<ContentKind>,
        parent_id: Option<i64>,
    ) -> Result<Vec<ContentNode>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM nodes
             WHERE (?1 IS NULL OR kind = ?1) AND (?2 IS NULL OR parent_id = ?2)
             ORDER BY id",
            NODE_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![kind.map(|k| k.to_string()), parent_id], node_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter().map(|r| self.decode_node(r)).collect()
    }

    pub fn set_node_state(&self, id: i64, state: NodeState) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE nodes SET state = ?1, updated_at = ?2 WHERE id = ?3",
            params![state.to_string(), now().to_rfc3339(), id],
        )?;
        if changed == 0 {
            return Err(AgoraError::NotFound(format!("content #{}", id)));
        }
        Ok(())
    }

    /// Append `block` to the stored body; existing text is never rewritten
    pub fn append_body(&self, id: i64, block: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE nodes SET body = body || ?1, updated_at = ?2 WHERE id = ?3",
            params![block, now().to_rfc3339(), id],
        )?;
        Ok(())
    }

    /// Title clash check within the uniqueness scope of `kind`
    pub fn title_taken(&self, kind: ContentKind, parent_id: Option<i64>, title: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM nodes
                 WHERE kind = ?1 AND COALESCE(parent_id, 0) = COALESCE(?2, 0) AND title = ?3",
                params![kind.to_string(), parent_id, title],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn invited_teams(&self, node_id: i64) -> Result<Vec<TeamId>> {
        let mut stmt = self.conn.prepare(
            "SELECT team_id FROM node_invited_teams WHERE node_id = ?1 ORDER BY team_id",
        )?;
        let teams = stmt
            .query_map([node_id], |row| row.get::<_, i64>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(teams.into_iter().map(TeamId).collect())
    }

    pub fn insert_approval(&self, initiative_id: i64, workstream_id: i64, by: UserId) -> Result<()> {
        let inserted = self.conn.execute(
            "INSERT INTO workstream_approvals (initiative_id, workstream_id, approved_by, approved_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![initiative_id, workstream_id, by.0, now().to_rfc3339()],
        );
        match inserted {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => {
                Err(crate::error::Conflict::AlreadyApproved.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn approved_workstream(&self, initiative_id: i64) -> Result<Option<i64>> {
        Ok(self
            .conn
            .query_row(
                "SELECT workstream_id FROM workstream_approvals WHERE initiative_id = ?1",
                [initiative_id],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn is_approved(&self, workstream_id: i64) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM workstream_approvals WHERE workstream_id = ?1",
                [workstream_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::storage::SqliteStore;

    fn draft(author: UserId, title: &str) -> NewNode {
        NewNode {
            kind: ContentKind::Initiative,
            parent_id: None,
            title: Some(title.to_string()),
            body: "A gathering to taste spring harvest teas together.".to_string(),
            author,
            owner: Owner::Freelancer,
            visibility: Visibility::Open,
            invited_teams: Vec::new(),
        }
    }

    #[test]
    fn test_insert_and_fetch_node() {
        let store = SqliteStore::open_in_memory().unwrap();
        let repo = store.repo();
        let author = repo.insert_user("author").unwrap();

        let node = repo.insert_node(&draft(author.id, "Spring Tea")).unwrap();
        let fetched = repo.require_node(&node.uuid).unwrap();
        assert_eq!(fetched.id, node.id);
        assert_eq!(fetched.state, NodeState::Draft);
        assert_eq!(fetched.owner, Owner::Freelancer);
        assert_eq!(fetched.title.as_deref(), Some("Spring Tea"));
    }

    #[test]
    fn test_closed_node_keeps_invited_teams() {
        let store = SqliteStore::open_in_memory().unwrap();
        let repo = store.repo();
        let author = repo.insert_user("author").unwrap();
        let t1 = repo.insert_team("one").unwrap();
        let t2 = repo.insert_team("two").unwrap();

        let mut new = draft(author.id, "Closed Tea");
        new.visibility = Visibility::Closed;
        new.invited_teams = vec![t2.id, t1.id];
        let node = repo.insert_node(&new).unwrap();

        repo.set_node_state(node.id, NodeState::Published).unwrap();
        let fetched = repo.require_node(&node.uuid).unwrap();
        assert_eq!(fetched.state, NodeState::Published);
        assert_eq!(fetched.invited_teams, vec![t1.id, t2.id]);
    }

    #[test]
    fn test_duplicate_initiative_title_hits_unique_index() {
        let store = SqliteStore::open_in_memory().unwrap();
        let repo = store.repo();
        let author = repo.insert_user("author").unwrap();

        repo.insert_node(&draft(author.id, "Same")).unwrap();
        assert!(repo.title_taken(ContentKind::Initiative, None, "Same").unwrap());

        let err = repo.insert_node(&draft(author.id, "Same")).unwrap_err();
        assert!(matches!(
            err,
            AgoraError::Validation(ValidationError::DuplicateTitle { .. })
        ));
    }

    #[test]
    fn test_corrupt_owner_is_integrity_error() {
        let store = SqliteStore::open_in_memory().unwrap();
        let repo = store.repo();
        let author = repo.insert_user("author").unwrap();
        let node = repo.insert_node(&draft(author.id, "Broken")).unwrap();

        repo.conn
            .execute(
                "UPDATE nodes SET owner_kind = 'family', owner_id = NULL WHERE id = ?1",
                [node.id],
            )
            .unwrap();

        let err = repo.require_node(&node.uuid).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Integrity);
    }

    #[test]
    fn test_append_body_keeps_prefix() {
        let store = SqliteStore::open_in_memory().unwrap();
        let repo = store.repo();
        let author = repo.insert_user("author").unwrap();
        let node = repo.insert_node(&draft(author.id, "Append")).unwrap();

        repo.append_body(node.id, "\n\nmore").unwrap();
        let fetched = repo.require_node(&node.uuid).unwrap();
        assert!(fetched.body.starts_with(&node.body));
        assert!(fetched.body.ends_with("more"));
    }

    #[test]
    fn test_single_approval_per_initiative() {
        let store = SqliteStore::open_in_memory().unwrap();
        let repo = store.repo();
        let author = repo.insert_user("author").unwrap();
        let initiative = repo.insert_node(&draft(author.id, "Parent")).unwrap();

        let mut ws = draft(author.id, "Stream A");
        ws.kind = ContentKind::Workstream;
        ws.parent_id = Some(initiative.id);
        let a = repo.insert_node(&ws).unwrap();
        ws.title = Some("Stream B".to_string());
        let b = repo.insert_node(&ws).unwrap();

        repo.insert_approval(initiative.id, a.id, author.id).unwrap();
        assert!(repo.is_approved(a.id).unwrap());
        assert_eq!(repo.approved_workstream(initiative.id).unwrap(), Some(a.id));

        let err = repo.insert_approval(initiative.id, b.id, author.id).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StateConflict);
    }
}
