//! Investigation records and their per-step detail rows.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use super::sqlite_store::{is_unique_violation, now, parse_column, parse_opt_ts, parse_ts, parse_uuid, Repo};
use crate::entity::{InvestigationKind, InvestigationRecord, Sense, StepStatus, UserId};
use crate::error::{AgoraError, Conflict, Result};

const RECORD_COLUMNS: &str =
    "id, uuid, workstream_id, kind, step, status, created_by, created_at, updated_at, completed_at";

struct RecordRow {
    id: i64,
    uuid: String,
    workstream_id: i64,
    kind: String,
    step: u8,
    status: String,
    created_by: i64,
    created_at: String,
    updated_at: String,
    completed_at: Option<String>,
}

fn record_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RecordRow> {
    Ok(RecordRow {
        id: row.get(0)?,
        uuid: row.get(1)?,
        workstream_id: row.get(2)?,
        kind: row.get(3)?,
        step: row.get(4)?,
        status: row.get(5)?,
        created_by: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
        completed_at: row.get(9)?,
    })
}

impl RecordRow {
    fn into_record(self) -> Result<InvestigationRecord> {
        let kind: InvestigationKind = parse_column("investigations.kind", &self.kind)?;
        if self.step > kind.plan().total() {
            return Err(AgoraError::Integrity(format!(
                "investigation {} is at step {} of a {}-step {}",
                self.uuid,
                self.step,
                kind.plan().total(),
                kind
            )));
        }
        Ok(InvestigationRecord {
            id: self.id,
            uuid: parse_uuid(&self.uuid)?,
            workstream_id: self.workstream_id,
            kind,
            step: self.step,
            status: parse_column("investigations.status", &self.status)?,
            created_by: UserId(self.created_by),
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
            completed_at: parse_opt_ts(self.completed_at)?,
        })
    }
}

impl Repo<'_> {
    pub fn insert_record(
        &self,
        workstream_id: i64,
        kind: InvestigationKind,
        created_by: UserId,
    ) -> Result<InvestigationRecord> {
        let at = now();
        let record = InvestigationRecord {
            id: 0,
            uuid: Uuid::new_v4(),
            workstream_id,
            kind,
            step: 0,
            status: StepStatus::NotStarted,
            created_by,
            created_at: at,
            updated_at: at,
            completed_at: None,
        };

        let inserted = self.conn.execute(
            "INSERT INTO investigations (uuid, workstream_id, kind, step, status, created_by, created_at, updated_at)
             VALUES (?1, ?2, ?3, 0, ?4, ?5, ?6, ?6)",
            params![
                record.uuid.to_string(),
                workstream_id,
                kind.to_string(),
                record.status.to_string(),
                created_by.0,
                at.to_rfc3339(),
            ],
        );
        match inserted {
            Ok(_) => Ok(InvestigationRecord {
                id: self.conn.last_insert_rowid(),
                ..record
            }),
            Err(e) if is_unique_violation(&e) => Err(Conflict::DuplicateRecord.into()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn require_record(&self, uuid: &Uuid) -> Result<InvestigationRecord> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {} FROM investigations WHERE uuid = ?1", RECORD_COLUMNS),
                [uuid.to_string()],
                record_row,
            )
            .optional()?;
        row.map(RecordRow::into_record)
            .transpose()?
            .ok_or_else(|| AgoraError::NotFound(format!("investigation {}", uuid)))
    }

    pub fn update_record_progress(
        &self,
        id: i64,
        step: u8,
        status: StepStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE investigations SET step = ?1, status = ?2, completed_at = ?3, updated_at = ?4
             WHERE id = ?5",
            params![
                step,
                status.to_string(),
                completed_at.map(|t| t.to_rfc3339()),
                now().to_rfc3339(),
                id
            ],
        )?;
        Ok(())
    }

    pub fn selection_ids(&self, record_id: i64, step: u8) -> Result<BTreeSet<i64>> {
        let mut stmt = self.conn.prepare(
            "SELECT reference_id FROM investigation_selections WHERE record_id = ?1 AND step = ?2",
        )?;
        let ids = stmt
            .query_map(params![record_id, step], |row| row.get::<_, i64>(0))?
            .collect::<std::result::Result<BTreeSet<_>, _>>()?;
        Ok(ids)
    }

    /// Delete-all then insert-all for one step's selection set
    pub fn replace_selections(&self, record_id: i64, step: u8, ids: &BTreeSet<i64>) -> Result<()> {
        self.conn.execute(
            "DELETE FROM investigation_selections WHERE record_id = ?1 AND step = ?2",
            params![record_id, step],
        )?;
        let mut stmt = self.conn.prepare(
            "INSERT INTO investigation_selections (record_id, step, reference_id) VALUES (?1, ?2, ?3)",
        )?;
        for id in ids {
            stmt.execute(params![record_id, step, id])?;
        }
        Ok(())
    }

    pub fn observations(&self, record_id: i64, step: u8) -> Result<BTreeMap<Sense, String>> {
        let mut stmt = self.conn.prepare(
            "SELECT sense, detail FROM investigation_observations WHERE record_id = ?1 AND step = ?2",
        )?;
        let rows = stmt
            .query_map(params![record_id, step], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut out = BTreeMap::new();
        for (sense, detail) in rows {
            out.insert(parse_column("investigation_observations.sense", &sense)?, detail);
        }
        Ok(out)
    }

    pub fn replace_observation(&self, record_id: i64, step: u8, sense: Sense, detail: &str) -> Result<()> {
        self.conn.execute(
            "DELETE FROM investigation_observations WHERE record_id = ?1 AND step = ?2 AND sense = ?3",
            params![record_id, step, sense.to_string()],
        )?;
        self.conn.execute(
            "INSERT INTO investigation_observations (record_id, step, sense, detail) VALUES (?1, ?2, ?3, ?4)",
            params![record_id, step, sense.to_string(), detail],
        )?;
        Ok(())
    }

    pub fn note(&self, record_id: i64, step: u8) -> Result<Option<String>> {
        let text = self
            .conn
            .query_row(
                "SELECT text FROM investigation_notes WHERE record_id = ?1 AND step = ?2",
                params![record_id, step],
                |row| row.get(0),
            )
            .optional()?;
        Ok(text)
    }

    pub fn replace_note(&self, record_id: i64, step: u8, text: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO investigation_notes (record_id, step, text) VALUES (?1, ?2, ?3)
             ON CONFLICT (record_id, step) DO UPDATE SET text = excluded.text",
            params![record_id, step, text],
        )?;
        Ok(())
    }
}

#[cfg(test)]
impl Repo<'_> {
    /// Row ids of the stored selection set, used to tell a rewrite from a no-op
    pub(crate) fn selection_row_ids(&self, record_id: i64, step: u8) -> Result<Vec<i64>> {
        let mut stmt = self.conn.prepare(
            "SELECT id FROM investigation_selections WHERE record_id = ?1 AND step = ?2 ORDER BY id",
        )?;
        let ids = stmt
            .query_map(params![record_id, step], |row| row.get::<_, i64>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use crate::entity::{
        ContentKind, InvestigationKind, Owner, ReferenceCategory, Sense, StepStatus, Visibility,
    };
    use crate::error::{AgoraError, Conflict};
    use crate::storage::{NewNode, SqliteStore};

    fn workstream(store: &SqliteStore) -> (crate::entity::UserId, i64) {
        let repo = store.repo();
        let user = repo.insert_user("verifier").unwrap();
        let initiative = repo
            .insert_node(&NewNode {
                kind: ContentKind::Initiative,
                parent_id: None,
                title: Some("Parent".to_string()),
                body: "A body of reasonable length.".to_string(),
                author: user.id,
                owner: Owner::Freelancer,
                visibility: Visibility::Open,
                invited_teams: Vec::new(),
            })
            .unwrap();
        let ws = repo
            .insert_node(&NewNode {
                kind: ContentKind::Workstream,
                parent_id: Some(initiative.id),
                title: Some("Child".to_string()),
                body: "A body of reasonable length.".to_string(),
                author: user.id,
                owner: Owner::Freelancer,
                visibility: Visibility::Open,
                invited_teams: Vec::new(),
            })
            .unwrap();
        (user.id, ws.id)
    }

    #[test]
    fn test_one_record_per_workstream_and_kind() {
        let store = SqliteStore::open_in_memory().unwrap();
        let (user, ws) = workstream(&store);
        let repo = store.repo();

        let record = repo.insert_record(ws, InvestigationKind::Inspection, user).unwrap();
        assert_eq!(record.status, StepStatus::NotStarted);
        assert_eq!(record.step, 0);

        let err = repo
            .insert_record(ws, InvestigationKind::Inspection, user)
            .unwrap_err();
        assert!(matches!(err, AgoraError::StateConflict(Conflict::DuplicateRecord)));

        let diagnosis = repo.insert_record(ws, InvestigationKind::Diagnosis, user).unwrap();
        assert_ne!(diagnosis.uuid, record.uuid);
        assert_eq!(repo.require_record(&diagnosis.uuid).unwrap().kind, InvestigationKind::Diagnosis);
    }

    #[test]
    fn test_replace_selections_swaps_the_set() {
        let store = SqliteStore::open_in_memory().unwrap();
        let (user, ws) = workstream(&store);
        let repo = store.repo();
        let record = repo.insert_record(ws, InvestigationKind::Inspection, user).unwrap();
        let a = repo.insert_reference(ReferenceCategory::Hazard, "Scald", None).unwrap();
        let b = repo.insert_reference(ReferenceCategory::Hazard, "Spill", None).unwrap();

        repo.replace_selections(record.id, 2, &BTreeSet::from([a.id])).unwrap();
        let first = repo.selection_row_ids(record.id, 2).unwrap();
        repo.replace_selections(record.id, 2, &BTreeSet::from([a.id, b.id])).unwrap();

        assert_eq!(
            repo.selection_ids(record.id, 2).unwrap(),
            BTreeSet::from([a.id, b.id])
        );
        let second = repo.selection_row_ids(record.id, 2).unwrap();
        assert!(second.iter().all(|id| !first.contains(id)));
    }

    #[test]
    fn test_observations_and_notes() {
        let store = SqliteStore::open_in_memory().unwrap();
        let (user, ws) = workstream(&store);
        let repo = store.repo();
        let record = repo.insert_record(ws, InvestigationKind::CraftProcess, user).unwrap();

        repo.replace_observation(record.id, 1, Sense::Visual, "dark leaves").unwrap();
        repo.replace_observation(record.id, 1, Sense::Visual, "rolled leaves").unwrap();
        repo.replace_observation(record.id, 1, Sense::Olfactory, "smoky").unwrap();
        let obs = repo.observations(record.id, 1).unwrap();
        assert_eq!(obs.len(), 2);
        assert_eq!(obs[&Sense::Visual], "rolled leaves");

        assert_eq!(repo.note(record.id, 2).unwrap(), None);
        repo.replace_note(record.id, 2, "first").unwrap();
        repo.replace_note(record.id, 2, "second").unwrap();
        assert_eq!(repo.note(record.id, 2).unwrap().as_deref(), Some("second"));
    }
}
