//! Step-by-step investigation records attached to approved workstreams.
//!
//! Each [`InvestigationKind`] has a fixed [`StepPlan`]. Verifiers may write
//! the next step or go back and amend any earlier one until the record is
//! completed. Detail rows are only rewritten when the submitted data differs
//! from what is stored.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::entity::{
    ContentKind, InvestigationKind, InvestigationRecord, Observation, ReferenceCategory, Sense,
    StepKind, StepStatus, UserId,
};
use crate::error::{AgoraError, Conflict, ErrorKind, Result, ValidationError};
use crate::permission::PermissionResolver;
use crate::storage::{Repo, SqliteStore};

/// Data submitted for one step, matching the plan's [`StepKind`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepPayload {
    Observations(Vec<Observation>),
    Selection(BTreeSet<i64>),
    Note(String),
    Complete {
        completed_at: Option<DateTime<Utc>>,
        summary: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StepOutcome {
    pub record: Uuid,
    /// Step that was written
    pub step: u8,
    /// Highest step saved so far
    pub saved_step: u8,
    pub status: StepStatus,
    /// Detail sets replaced (zero when the payload matched stored data)
    pub detail_writes: usize,
}

/// Stored data for one step, for display
#[derive(Debug, Clone, Serialize)]
pub struct StepDetails {
    pub step: u8,
    pub kind: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub selections: Vec<i64>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub observations: BTreeMap<Sense, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordDetails {
    #[serde(flatten)]
    pub record: InvestigationRecord,
    pub total_steps: u8,
    pub steps: Vec<StepDetails>,
}

pub struct StepWorkflowEngine {
    resolver: PermissionResolver,
}

impl StepWorkflowEngine {
    pub fn new(resolver: PermissionResolver) -> Self {
        Self { resolver }
    }

    /// Start an investigation of `kind` on an approved workstream
    pub fn open_record(
        &self,
        store: &SqliteStore,
        actor: UserId,
        workstream_uuid: &Uuid,
        kind: InvestigationKind,
    ) -> Result<InvestigationRecord> {
        let result = store.write("open_record", |repo| {
            self.resolver.require_verifier(repo, actor)?;
            let workstream = repo.require_node(workstream_uuid)?;
            if workstream.kind != ContentKind::Workstream {
                return Err(ValidationError::InvalidValue {
                    field: "workstream".to_string(),
                    value: workstream.kind.to_string(),
                }
                .into());
            }
            if !repo.is_approved(workstream.id)? {
                return Err(Conflict::NotApproved.into());
            }
            repo.insert_record(workstream.id, kind, actor)
        });
        match &result {
            Ok(record) => info!(
                record = %record.uuid,
                workstream = %workstream_uuid,
                %kind,
                "investigation opened"
            ),
            Err(e) => log_refusal("open_record", e),
        }
        result
    }

    /// Write one step
    ///
    /// `claimed_step` may be any step up to one past the highest saved step.
    /// The whole step fails before any write if the payload does not fit the
    /// plan or references an unknown catalog entry.
    pub fn advance(
        &self,
        store: &SqliteStore,
        actor: UserId,
        record_uuid: &Uuid,
        claimed_step: u8,
        payload: StepPayload,
    ) -> Result<StepOutcome> {
        let result = store.write("advance_step", |repo| {
            self.resolver.require_verifier(repo, actor)?;
            let record = repo.require_record(record_uuid)?;
            if record.status == StepStatus::Completed {
                return Err(Conflict::RecordCompleted.into());
            }

            let plan = record.plan();
            let expected = plan.next_allowed(record.step);
            if claimed_step == 0 || claimed_step > expected {
                return Err(Conflict::StepOutOfOrder {
                    expected,
                    claimed: claimed_step,
                }
                .into());
            }
            let step_kind = plan.step(claimed_step).ok_or_else(|| {
                AgoraError::Integrity(format!("{} has no step {}", record.kind, claimed_step))
            })?;

            let mut completed_at = None;
            let detail_writes = match (step_kind, payload) {
                (StepKind::Observe, StepPayload::Observations(observations)) => {
                    write_observations(repo, &record, claimed_step, &observations)?
                }
                (StepKind::Select(category), StepPayload::Selection(ids)) => {
                    write_selection(repo, &record, claimed_step, category, &ids)?
                }
                (StepKind::Note, StepPayload::Note(text)) => {
                    write_note(repo, &record, claimed_step, &text)?
                }
                (
                    StepKind::Complete,
                    StepPayload::Complete {
                        completed_at: at,
                        summary,
                    },
                ) => {
                    completed_at = Some(at.ok_or(ValidationError::MissingCompletionTime)?);
                    match summary {
                        Some(text) => write_note(repo, &record, claimed_step, &text)?,
                        None => 0,
                    }
                }
                (expected, _) => {
                    return Err(ValidationError::PayloadMismatch {
                        step: claimed_step,
                        expected: expected.to_string(),
                    }
                    .into());
                }
            };

            let saved_step = record.step.max(claimed_step);
            let status = if completed_at.is_some() {
                StepStatus::Completed
            } else {
                StepStatus::InProgress
            };
            if saved_step != record.step || status != record.status || detail_writes > 0 {
                repo.update_record_progress(record.id, saved_step, status, completed_at)?;
            }

            Ok(StepOutcome {
                record: record.uuid,
                step: claimed_step,
                saved_step,
                status,
                detail_writes,
            })
        });

        match &result {
            Ok(outcome) => info!(
                record = %outcome.record,
                step = outcome.step,
                status = %outcome.status,
                writes = outcome.detail_writes,
                "step saved"
            ),
            Err(e) => log_refusal("advance_step", e),
        }
        result
    }

    /// Record with every step's stored data (verifier only)
    pub fn details(&self, repo: &Repo<'_>, actor: UserId, record_uuid: &Uuid) -> Result<RecordDetails> {
        self.resolver.require_verifier(repo, actor)?;
        let record = repo.require_record(record_uuid)?;
        let plan = record.plan();

        let mut steps = Vec::with_capacity(plan.total() as usize);
        for number in 1..=plan.total() {
            let kind = plan.step(number).ok_or_else(|| {
                AgoraError::Integrity(format!("{} has no step {}", record.kind, number))
            })?;
            steps.push(StepDetails {
                step: number,
                kind: kind.to_string(),
                selections: repo.selection_ids(record.id, number)?.into_iter().collect(),
                observations: repo.observations(record.id, number)?,
                note: repo.note(record.id, number)?,
            });
        }

        Ok(RecordDetails {
            total_steps: plan.total(),
            record,
            steps,
        })
    }
}

fn write_selection(
    repo: &Repo<'_>,
    record: &InvestigationRecord,
    step: u8,
    category: ReferenceCategory,
    ids: &BTreeSet<i64>,
) -> Result<usize> {
    for id in ids {
        match repo.get_reference(*id)? {
            Some(item) if item.category == category => {}
            _ => {
                return Err(ValidationError::UnknownReference {
                    category: category.to_string(),
                    id: *id,
                }
                .into())
            }
        }
    }

    let stored = repo.selection_ids(record.id, step)?;
    if stored == *ids {
        debug!(record = %record.uuid, step, "selection unchanged");
        return Ok(0);
    }
    repo.replace_selections(record.id, step, ids)?;
    Ok(1)
}

fn write_observations(
    repo: &Repo<'_>,
    record: &InvestigationRecord,
    step: u8,
    observations: &[Observation],
) -> Result<usize> {
    if observations.is_empty() {
        return Err(ValidationError::NoObservations.into());
    }
    let mut senses = HashSet::new();
    for observation in observations {
        if !senses.insert(observation.sense) {
            return Err(ValidationError::InvalidValue {
                field: "sense".to_string(),
                value: format!("{} given twice", observation.sense),
            }
            .into());
        }
        if observation.detail.trim().is_empty() {
            return Err(ValidationError::InvalidValue {
                field: observation.sense.to_string(),
                value: String::new(),
            }
            .into());
        }
    }

    let stored = repo.observations(record.id, step)?;
    let mut writes = 0;
    for observation in observations {
        if stored.get(&observation.sense) == Some(&observation.detail) {
            debug!(record = %record.uuid, step, sense = %observation.sense, "observation unchanged");
            continue;
        }
        repo.replace_observation(record.id, step, observation.sense, &observation.detail)?;
        writes += 1;
    }
    Ok(writes)
}

fn write_note(repo: &Repo<'_>, record: &InvestigationRecord, step: u8, text: &str) -> Result<usize> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ValidationError::InvalidValue {
            field: "note".to_string(),
            value: String::new(),
        }
        .into());
    }
    if repo.note(record.id, step)?.as_deref() == Some(text) {
        debug!(record = %record.uuid, step, "note unchanged");
        return Ok(0);
    }
    repo.replace_note(record.id, step, text)?;
    Ok(1)
}

fn log_refusal(operation: &str, error: &AgoraError) {
    if matches!(
        error.kind(),
        ErrorKind::PermissionDenied | ErrorKind::StateConflict | ErrorKind::Validation
    ) {
        warn!(operation, error = %error, "step refused");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{NodeState, Owner, TeamId, Visibility};
    use crate::storage::NewNode;

    struct Bench {
        store: SqliteStore,
        engine: StepWorkflowEngine,
        verifier: UserId,
        outsider: UserId,
        workstream: Uuid,
    }

    impl Bench {
        fn new(approved: bool) -> Self {
            let store = SqliteStore::open_in_memory().unwrap();
            let repo = store.repo();
            let team: TeamId = repo.insert_team("verifiers").unwrap().id;
            let verifier = repo.insert_user("verifier").unwrap().id;
            let outsider = repo.insert_user("outsider").unwrap().id;
            repo.add_team_member(team, verifier).unwrap();

            let node = |kind, parent_id, title: &str| {
                let node = repo
                    .insert_node(&NewNode {
                        kind,
                        parent_id,
                        title: Some(title.to_string()),
                        body: "Body text long enough for the bounds.".to_string(),
                        author: outsider,
                        owner: Owner::Freelancer,
                        visibility: Visibility::Open,
                        invited_teams: Vec::new(),
                    })
                    .unwrap();
                repo.set_node_state(node.id, NodeState::Published).unwrap();
                node
            };
            let initiative = node(ContentKind::Initiative, None, "Tea house");
            let workstream = node(ContentKind::Workstream, Some(initiative.id), "Kitchen");
            if approved {
                repo.insert_approval(initiative.id, workstream.id, outsider).unwrap();
            }

            Self {
                engine: StepWorkflowEngine::new(PermissionResolver::new(team)),
                store,
                verifier,
                outsider,
                workstream: workstream.uuid,
            }
        }

        fn open(&self, kind: InvestigationKind) -> InvestigationRecord {
            self.engine
                .open_record(&self.store, self.verifier, &self.workstream, kind)
                .unwrap()
        }

        fn reference(&self, category: ReferenceCategory, name: &str) -> i64 {
            self.store
                .repo()
                .insert_reference(category, name, None)
                .unwrap()
                .id
        }

        fn advance(&self, record: &Uuid, step: u8, payload: StepPayload) -> Result<StepOutcome> {
            self.engine
                .advance(&self.store, self.verifier, record, step, payload)
        }
    }

    fn look(detail: &str) -> StepPayload {
        StepPayload::Observations(vec![Observation {
            sense: Sense::Visual,
            detail: detail.to_string(),
        }])
    }

    #[test]
    fn test_open_requires_verifier_and_approval() {
        let bench = Bench::new(false);
        let err = bench
            .engine
            .open_record(&bench.store, bench.verifier, &bench.workstream, InvestigationKind::Inspection)
            .unwrap_err();
        assert!(matches!(err, AgoraError::StateConflict(Conflict::NotApproved)));

        let bench = Bench::new(true);
        let err = bench
            .engine
            .open_record(&bench.store, bench.outsider, &bench.workstream, InvestigationKind::Inspection)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);

        bench.open(InvestigationKind::Inspection);
        let err = bench
            .engine
            .open_record(&bench.store, bench.verifier, &bench.workstream, InvestigationKind::Inspection)
            .unwrap_err();
        assert!(matches!(err, AgoraError::StateConflict(Conflict::DuplicateRecord)));
    }

    #[test]
    fn test_first_write_moves_to_in_progress() {
        let bench = Bench::new(true);
        let record = bench.open(InvestigationKind::Inspection);

        let outcome = bench.advance(&record.uuid, 1, look("steam on the glass")).unwrap();
        assert_eq!(outcome.status, StepStatus::InProgress);
        assert_eq!(outcome.saved_step, 1);
        assert_eq!(outcome.detail_writes, 1);
    }

    #[test]
    fn test_empty_observations_do_not_advance() {
        let bench = Bench::new(true);
        let record = bench.open(InvestigationKind::Inspection);

        let err = bench
            .advance(&record.uuid, 1, StepPayload::Observations(Vec::new()))
            .unwrap_err();
        assert!(matches!(
            err,
            AgoraError::Validation(ValidationError::NoObservations)
        ));

        let stored = bench.store.repo().require_record(&record.uuid).unwrap();
        assert_eq!(stored.step, 0);
        assert_eq!(stored.status, StepStatus::NotStarted);
    }

    #[test]
    fn test_cannot_skip_ahead() {
        let bench = Bench::new(true);
        let record = bench.open(InvestigationKind::Inspection);

        let err = bench
            .advance(&record.uuid, 2, StepPayload::Selection(BTreeSet::new()))
            .unwrap_err();
        assert!(matches!(
            err,
            AgoraError::StateConflict(Conflict::StepOutOfOrder {
                expected: 1,
                claimed: 2
            })
        ));
        let err = bench.advance(&record.uuid, 0, look("x")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StateConflict);
    }

    #[test]
    fn test_unchanged_selection_is_not_rewritten() {
        let bench = Bench::new(true);
        let record = bench.open(InvestigationKind::Inspection);
        let scald = bench.reference(ReferenceCategory::Hazard, "Scald");
        let spill = bench.reference(ReferenceCategory::Hazard, "Spill");
        bench.advance(&record.uuid, 1, look("kettle on high")).unwrap();

        let hazards = BTreeSet::from([scald, spill]);
        let first = bench
            .advance(&record.uuid, 2, StepPayload::Selection(hazards.clone()))
            .unwrap();
        assert_eq!(first.detail_writes, 1);
        let rows = bench.store.repo().selection_row_ids(record.id, 2).unwrap();

        let again = bench
            .advance(&record.uuid, 2, StepPayload::Selection(hazards))
            .unwrap();
        assert_eq!(again.detail_writes, 0);
        assert_eq!(again.saved_step, 2);
        assert_eq!(again.status, StepStatus::InProgress);
        assert_eq!(bench.store.repo().selection_row_ids(record.id, 2).unwrap(), rows);

        let changed = bench
            .advance(&record.uuid, 2, StepPayload::Selection(BTreeSet::from([scald])))
            .unwrap();
        assert_eq!(changed.detail_writes, 1);
        assert_eq!(
            bench.store.repo().selection_ids(record.id, 2).unwrap(),
            BTreeSet::from([scald])
        );
    }

    #[test]
    fn test_unknown_or_wrong_category_reference_fails_whole_step() {
        let bench = Bench::new(true);
        let record = bench.open(InvestigationKind::Inspection);
        let scald = bench.reference(ReferenceCategory::Hazard, "Scald");
        let burn = bench.reference(ReferenceCategory::Risk, "Burn");
        bench.advance(&record.uuid, 1, look("kettle on high")).unwrap();

        for bad in [BTreeSet::from([scald, 999]), BTreeSet::from([scald, burn])] {
            let err = bench
                .advance(&record.uuid, 2, StepPayload::Selection(bad))
                .unwrap_err();
            assert!(matches!(
                err,
                AgoraError::Validation(ValidationError::UnknownReference { .. })
            ));
        }
        let repo = bench.store.repo();
        assert!(repo.selection_ids(record.id, 2).unwrap().is_empty());
        assert_eq!(repo.require_record(&record.uuid).unwrap().step, 1);
    }

    #[test]
    fn test_observations_diff_per_sense() {
        let bench = Bench::new(true);
        let record = bench.open(InvestigationKind::Diagnosis);
        let obs = |sense, detail: &str| Observation {
            sense,
            detail: detail.to_string(),
        };

        let first = bench
            .advance(
                &record.uuid,
                1,
                StepPayload::Observations(vec![
                    obs(Sense::Visual, "cloudy liquor"),
                    obs(Sense::Olfactory, "sour note"),
                ]),
            )
            .unwrap();
        assert_eq!(first.detail_writes, 2);

        let second = bench
            .advance(
                &record.uuid,
                1,
                StepPayload::Observations(vec![
                    obs(Sense::Visual, "cloudy liquor"),
                    obs(Sense::Olfactory, "musty"),
                    obs(Sense::Tactile, "gritty"),
                ]),
            )
            .unwrap();
        assert_eq!(second.detail_writes, 2);

        let stored = bench.store.repo().observations(record.id, 1).unwrap();
        assert_eq!(stored.len(), 3);
        assert_eq!(stored[&Sense::Olfactory], "musty");

        let err = bench
            .advance(
                &record.uuid,
                1,
                StepPayload::Observations(vec![obs(Sense::Visual, "a"), obs(Sense::Visual, "b")]),
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_payload_must_match_step() {
        let bench = Bench::new(true);
        let record = bench.open(InvestigationKind::Remediation);

        let err = bench
            .advance(&record.uuid, 1, StepPayload::Note("wrong shape".to_string()))
            .unwrap_err();
        assert!(matches!(
            err,
            AgoraError::Validation(ValidationError::PayloadMismatch { step: 1, .. })
        ));
    }

    #[test]
    fn test_revisit_then_complete() {
        let bench = Bench::new(true);
        let record = bench.open(InvestigationKind::Remediation);
        let cool = bench.reference(ReferenceCategory::Remedy, "Cool water");

        bench
            .advance(&record.uuid, 1, StepPayload::Selection(BTreeSet::from([cool])))
            .unwrap();
        bench
            .advance(&record.uuid, 2, StepPayload::Note("Keep burn kit by the stove".to_string()))
            .unwrap();

        // Going back does not lower the saved step.
        let back = bench
            .advance(&record.uuid, 1, StepPayload::Selection(BTreeSet::new()))
            .unwrap();
        assert_eq!(back.saved_step, 2);
        assert_eq!(back.detail_writes, 1);

        let err = bench
            .advance(
                &record.uuid,
                3,
                StepPayload::Complete {
                    completed_at: None,
                    summary: None,
                },
            )
            .unwrap_err();
        assert!(matches!(
            err,
            AgoraError::Validation(ValidationError::MissingCompletionTime)
        ));

        let done = bench
            .advance(
                &record.uuid,
                3,
                StepPayload::Complete {
                    completed_at: Some(Utc::now()),
                    summary: Some("Kit installed".to_string()),
                },
            )
            .unwrap();
        assert_eq!(done.status, StepStatus::Completed);
        assert_eq!(done.saved_step, 3);
        assert!(bench
            .store
            .repo()
            .require_record(&record.uuid)
            .unwrap()
            .completed_at
            .is_some());

        let err = bench
            .advance(&record.uuid, 2, StepPayload::Note("late edit".to_string()))
            .unwrap_err();
        assert!(matches!(err, AgoraError::StateConflict(Conflict::RecordCompleted)));
    }

    #[test]
    fn test_details_lists_every_step() {
        let bench = Bench::new(true);
        let record = bench.open(InvestigationKind::CraftProcess);
        bench.advance(&record.uuid, 1, look("twisted leaves")).unwrap();
        bench
            .advance(&record.uuid, 2, StepPayload::Note("withered for six hours".to_string()))
            .unwrap();

        let details = bench
            .engine
            .details(&bench.store.repo(), bench.verifier, &record.uuid)
            .unwrap();
        assert_eq!(details.total_steps, 4);
        assert_eq!(details.steps.len(), 4);
        assert_eq!(details.steps[0].observations[&Sense::Visual], "twisted leaves");
        assert_eq!(details.steps[1].note.as_deref(), Some("withered for six hours"));
        assert!(details.steps[2].observations.is_empty());
    }
}
