//! Users, teams, families and the reference catalog.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use super::sqlite_store::{is_unique_violation, now, parse_column, parse_opt_ts, parse_ts, parse_uuid, Repo};
use crate::entity::{
    Family, FamilyId, FamilyRole, ReferenceCategory, ReferenceItem, Team, TeamId, User, UserId,
};
use crate::error::{AgoraError, Result, ValidationError};

struct UserRow {
    id: i64,
    name: String,
    active: bool,
    unread_count: i64,
    last_seen_at: Option<String>,
    created_at: String,
}

impl UserRow {
    fn into_user(self) -> Result<User> {
        Ok(User {
            id: UserId(self.id),
            name: self.name,
            active: self.active,
            unread_count: self.unread_count,
            last_seen_at: parse_opt_ts(self.last_seen_at)?,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

const USER_COLUMNS: &str = "id, name, active, unread_count, last_seen_at, created_at";

fn user_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        name: row.get(1)?,
        active: row.get(2)?,
        unread_count: row.get(3)?,
        last_seen_at: row.get(4)?,
        created_at: row.get(5)?,
    })
}

impl Repo<'_> {
    pub fn insert_user(&self, name: &str) -> Result<User> {
        let created_at = now();
        self.conn.execute(
            "INSERT INTO users (name, active, unread_count, created_at) VALUES (?1, 1, 0, ?2)",
            params![name, created_at.to_rfc3339()],
        )?;
        Ok(User {
            id: UserId(self.conn.last_insert_rowid()),
            name: name.to_string(),
            active: true,
            unread_count: 0,
            last_seen_at: None,
            created_at,
        })
    }

    pub fn get_user(&self, id: UserId) -> Result<Option<User>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
                [id.0],
                user_row,
            )
            .optional()?;
        row.map(UserRow::into_user).transpose()
    }

    pub fn require_user(&self, id: UserId) -> Result<User> {
        self.get_user(id)?
            .ok_or_else(|| AgoraError::NotFound(format!("user {}", id)))
    }

    /// Reviewer pool: every active user
    pub fn active_users(&self) -> Result<Vec<User>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM users WHERE active = 1 ORDER BY id",
            USER_COLUMNS
        ))?;
        let rows = stmt
            .query_map([], user_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter().map(UserRow::into_user).collect()
    }

    pub fn set_user_active(&self, id: UserId, active: bool) -> Result<()> {
        let changed = self
            .conn
            .execute("UPDATE users SET active = ?1 WHERE id = ?2", params![active, id.0])?;
        if changed == 0 {
            return Err(AgoraError::NotFound(format!("user {}", id)));
        }
        Ok(())
    }

    pub fn touch_user(&self, id: UserId, at: DateTime<Utc>) -> Result<()> {
        self.conn.execute(
            "UPDATE users SET last_seen_at = ?1 WHERE id = ?2",
            params![at.to_rfc3339(), id.0],
        )?;
        Ok(())
    }

    /// Fails when the recipient row is missing so dispatch can abort
    pub fn increment_unread(&self, id: UserId) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE users SET unread_count = unread_count + 1 WHERE id = ?1",
            [id.0],
        )?;
        if changed == 0 {
            return Err(AgoraError::Storage(format!(
                "unread counter update matched no row for user {}",
                id
            )));
        }
        Ok(())
    }

    pub fn decrement_unread(&self, id: UserId) -> Result<()> {
        self.conn.execute(
            "UPDATE users SET unread_count = MAX(unread_count - 1, 0) WHERE id = ?1",
            [id.0],
        )?;
        Ok(())
    }

    pub fn insert_team(&self, name: &str) -> Result<Team> {
        let team = Team {
            id: TeamId(0),
            uuid: Uuid::new_v4(),
            name: name.to_string(),
            created_at: now(),
        };
        let inserted = self.conn.execute(
            "INSERT INTO teams (uuid, name, created_at) VALUES (?1, ?2, ?3)",
            params![team.uuid.to_string(), team.name, team.created_at.to_rfc3339()],
        );
        match inserted {
            Ok(_) => Ok(Team {
                id: TeamId(self.conn.last_insert_rowid()),
                ..team
            }),
            Err(e) if is_unique_violation(&e) => Err(ValidationError::InvalidValue {
                field: "team name".to_string(),
                value: name.to_string(),
            }
            .into()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn team_exists(&self, id: TeamId) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row("SELECT 1 FROM teams WHERE id = ?1", [id.0], |row| row.get(0))
            .optional()?;
        Ok(found.is_some())
    }

    pub fn add_team_member(&self, team: TeamId, user: UserId) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO team_members (team_id, user_id) VALUES (?1, ?2)",
            params![team.0, user.0],
        )?;
        Ok(())
    }

    pub fn is_team_member(&self, team: TeamId, user: UserId) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM team_members WHERE team_id = ?1 AND user_id = ?2",
                params![team.0, user.0],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn team_member_count(&self, team: TeamId) -> Result<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM team_members WHERE team_id = ?1",
            [team.0],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// True if `user` belongs to any of `teams`
    pub fn is_member_of_any(&self, teams: &[TeamId], user: UserId) -> Result<bool> {
        for team in teams {
            if self.is_team_member(*team, user)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn insert_family(&self, name: &str) -> Result<Family> {
        let family = Family {
            id: FamilyId(0),
            uuid: Uuid::new_v4(),
            name: name.to_string(),
            created_at: now(),
        };
        self.conn.execute(
            "INSERT INTO families (uuid, name, created_at) VALUES (?1, ?2, ?3)",
            params![
                family.uuid.to_string(),
                family.name,
                family.created_at.to_rfc3339()
            ],
        )?;
        Ok(Family {
            id: FamilyId(self.conn.last_insert_rowid()),
            ..family
        })
    }

    pub fn family_exists(&self, id: FamilyId) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row("SELECT 1 FROM families WHERE id = ?1", [id.0], |row| row.get(0))
            .optional()?;
        Ok(found.is_some())
    }

    pub fn add_family_member(&self, family: FamilyId, user: UserId, role: FamilyRole) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO family_members (family_id, user_id, role) VALUES (?1, ?2, ?3)",
            params![family.0, user.0, role.to_string()],
        )?;
        Ok(())
    }

    pub fn family_role(&self, family: FamilyId, user: UserId) -> Result<Option<FamilyRole>> {
        let role: Option<String> = self
            .conn
            .query_row(
                "SELECT role FROM family_members WHERE family_id = ?1 AND user_id = ?2",
                params![family.0, user.0],
                |row| row.get(0),
            )
            .optional()?;
        role.map(|r| parse_column("family_members.role", &r)).transpose()
    }

    pub fn insert_reference(
        &self,
        category: ReferenceCategory,
        name: &str,
        description: Option<&str>,
    ) -> Result<ReferenceItem> {
        self.conn.execute(
            "INSERT INTO reference_items (category, name, description) VALUES (?1, ?2, ?3)",
            params![category.to_string(), name, description],
        )?;
        Ok(ReferenceItem {
            id: self.conn.last_insert_rowid(),
            category,
            name: name.to_string(),
            description: description.map(str::to_string),
        })
    }

    pub fn get_reference(&self, id: i64) -> Result<Option<ReferenceItem>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, category, name, description FROM reference_items WHERE id = ?1",
                [id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(id, category, name, description)| {
            Ok(ReferenceItem {
                id,
                category: parse_column("reference_items.category", &category)?,
                name,
                description,
            })
        })
        .transpose()
    }

    pub fn list_references(&self, category: Option<ReferenceCategory>) -> Result<Vec<ReferenceItem>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, category, name, description FROM reference_items
             WHERE ?1 IS NULL OR category = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map([category.map(|c| c.to_string())], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, category, name, description)| {
                Ok(ReferenceItem {
                    id,
                    category: parse_column("reference_items.category", &category)?,
                    name,
                    description,
                })
            })
            .collect()
    }
}
