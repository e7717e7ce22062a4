//! Draft submission and the publication lifecycle.
//!
//! Every kind of content shares one transition table (see
//! [`crate::entity::NodeState::apply`]). Whether a submitted draft goes to review or
//! straight to publication is decided by the [`LifecyclePolicy`] the machine
//! was built with.

mod validate;

pub use validate::{char_len, parse_invited_teams};

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{Config, ContentLimits, LifecyclePolicy};
use crate::entity::{
    ContentKind, ContentNode, LifecycleEvent, Owner, TeamId, UserId, Visibility,
};
use crate::error::{AgoraError, Capability, Conflict, ErrorKind, Result, ValidationError};
use crate::moderation::ModerationQueue;
use crate::permission::PermissionResolver;
use crate::storage::{NewNode, Repo, SqliteStore};

/// What an author hands in
#[derive(Debug, Clone)]
pub struct DraftCandidate {
    pub kind: ContentKind,
    pub parent: Option<Uuid>,
    pub title: Option<String>,
    pub body: String,
    pub owner: Owner,
    pub visibility: Visibility,
    /// Invited-team list in wire format (`1,4,9`), closed content only
    pub invited_teams: Option<String>,
}

/// Result of a submission, by uuid only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SubmitOutcome {
    /// Queued for review; confirm to the caller, do not redirect
    PendingReview { node: Uuid, ticket: Uuid },
    /// Live; the caller may jump straight to the node
    Published { node: Uuid },
}

impl SubmitOutcome {
    pub fn node(&self) -> Uuid {
        match self {
            SubmitOutcome::PendingReview { node, .. } | SubmitOutcome::Published { node } => *node,
        }
    }
}

pub struct LifecycleStateMachine {
    policy: LifecyclePolicy,
    limits: ContentLimits,
    resolver: PermissionResolver,
    queue: ModerationQueue,
}

impl LifecycleStateMachine {
    pub fn new(
        policy: LifecyclePolicy,
        limits: ContentLimits,
        resolver: PermissionResolver,
        queue: ModerationQueue,
    ) -> Self {
        Self {
            policy,
            limits,
            resolver,
            queue,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.policy,
            config.limits.clone(),
            PermissionResolver::new(config.verifier_team),
            ModerationQueue::from_config(&config.moderation),
        )
    }

    /// Same machine under a different moderation switch
    pub fn with_policy(mut self, policy: LifecyclePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> LifecyclePolicy {
        self.policy
    }

    pub fn resolver(&self) -> &PermissionResolver {
        &self.resolver
    }

    pub fn queue(&self) -> &ModerationQueue {
        &self.queue
    }

    /// Validate, persist and move a draft forward in one transaction
    pub fn submit_draft(
        &self,
        store: &SqliteStore,
        author: UserId,
        candidate: &DraftCandidate,
    ) -> Result<SubmitOutcome> {
        let result = store.write("submit_draft", |repo| {
            let node = self.create_draft(repo, author, candidate)?;
            self.advance_draft(repo, &node)
        });
        match &result {
            Ok(outcome) => info!(
                node = %outcome.node(),
                kind = %candidate.kind,
                polite = self.policy.polite_mode,
                "draft submitted"
            ),
            Err(e) => log_refusal("submit_draft", e),
        }
        result
    }

    /// Persist a draft without submitting it
    pub fn save_draft(&self, store: &SqliteStore, author: UserId, candidate: &DraftCandidate) -> Result<Uuid> {
        let result = store.write("save_draft", |repo| {
            self.create_draft(repo, author, candidate).map(|node| node.uuid)
        });
        match &result {
            Ok(uuid) => info!(node = %uuid, kind = %candidate.kind, "draft saved"),
            Err(e) => log_refusal("save_draft", e),
        }
        result
    }

    /// Submit a previously saved draft
    pub fn request_review(&self, store: &SqliteStore, actor: UserId, node_uuid: &Uuid) -> Result<SubmitOutcome> {
        let result = store.write("request_review", |repo| {
            let node = repo.require_node(node_uuid)?;
            if node.author != actor {
                return Err(AgoraError::denied(
                    Capability::Author,
                    "only the author can submit a draft",
                ));
            }
            self.advance_draft(repo, &node)
        });
        if let Err(e) = &result {
            log_refusal("request_review", e);
        }
        result
    }

    /// Append a timestamped, attributed block to published content
    pub fn supplement(
        &self,
        store: &SqliteStore,
        actor: UserId,
        node_uuid: &Uuid,
        fragment: &str,
    ) -> Result<ContentNode> {
        let result = store.write("supplement", |repo| {
            let node = repo.require_node(node_uuid)?;
            if node.author != actor {
                return Err(AgoraError::denied(
                    Capability::Author,
                    "only the author can supplement content",
                ));
            }
            if !node.is_published() {
                return Err(Conflict::NotPublished.into());
            }

            let appended = char_len(fragment);
            if appended < self.limits.supplement_min {
                return Err(ValidationError::SupplementTooShort {
                    min: self.limits.supplement_min,
                    actual: appended,
                }
                .into());
            }
            let block = format!(
                "\n\n[Supplement by {} at {}]\n{}",
                actor,
                chrono::Utc::now().to_rfc3339(),
                fragment
            );
            // The stored body includes the attribution header.
            let total = char_len(&node.body) + char_len(&block);
            if total > self.limits.supplement_max_total {
                return Err(ValidationError::SupplementTooLong {
                    max: self.limits.supplement_max_total,
                    total,
                }
                .into());
            }

            repo.append_body(node.id, &block)?;
            info!(node = %node.uuid, added = appended, "content supplemented");
            repo.require_node(node_uuid)
        });
        if let Err(e) = &result {
            log_refusal("supplement", e);
        }
        result
    }

    /// Mark a published workstream as the winner of its initiative
    pub fn approve_workstream(&self, store: &SqliteStore, actor: UserId, workstream_uuid: &Uuid) -> Result<()> {
        let result = store.write("approve_workstream", |repo| {
            let workstream = repo.require_node(workstream_uuid)?;
            if workstream.kind != ContentKind::Workstream {
                return Err(ValidationError::InvalidValue {
                    field: "workstream".to_string(),
                    value: workstream.kind.to_string(),
                }
                .into());
            }
            if !workstream.is_published() {
                return Err(Conflict::NotPublished.into());
            }
            self.resolver
                .resolve(repo, actor, &workstream)?
                .require(Capability::Master, "approval belongs to the initiative's owners")?;

            let initiative_id = workstream.parent_id.ok_or_else(|| {
                AgoraError::Integrity(format!("workstream {} has no initiative", workstream.uuid))
            })?;
            if repo.approved_workstream(initiative_id)?.is_some() {
                return Err(Conflict::AlreadyApproved.into());
            }
            repo.insert_approval(initiative_id, workstream.id, actor)?;
            info!(workstream = %workstream.uuid, approver = %actor, "workstream approved");
            Ok(())
        });
        if let Err(e) = &result {
            log_refusal("approve_workstream", e);
        }
        result
    }

    /// Read access check
    ///
    /// Published open content is public. Published closed content needs an
    /// invitation, admin rights or authorship. Anything unpublished is visible
    /// to its author and admins only.
    pub fn fetch(&self, repo: &Repo<'_>, actor: UserId, node_uuid: &Uuid) -> Result<ContentNode> {
        let node = repo.require_node(node_uuid)?;
        if node.is_published() && !node.is_closed() {
            return Ok(node);
        }
        if node.author == actor {
            return Ok(node);
        }

        let caps = self.resolver.resolve(repo, actor, &node)?;
        let allowed = if node.is_published() {
            caps.is_invited || caps.is_admin
        } else {
            caps.is_admin
        };
        if allowed {
            Ok(node)
        } else if node.is_published() {
            Err(AgoraError::denied(Capability::Invited, "content is restricted to invited teams"))
        } else {
            Err(AgoraError::denied(Capability::Admin, "content is not published"))
        }
    }

    fn create_draft(&self, repo: &Repo<'_>, author: UserId, candidate: &DraftCandidate) -> Result<ContentNode> {
        repo.require_user(author)?;

        let parent = candidate
            .parent
            .as_ref()
            .map(|uuid| repo.require_node(uuid))
            .transpose()?;
        validate::check_shape(candidate.kind, parent.as_ref())?;

        let title = candidate.title.as_deref().map(str::trim);
        validate::check_lengths(
            candidate.kind,
            self.limits.for_kind(candidate.kind),
            title,
            &candidate.body,
        )?;

        self.check_owner(repo, author, &candidate.owner)?;

        if let Some(parent) = &parent {
            if !parent.is_published() {
                return Err(Conflict::ParentNotPublished.into());
            }
            if parent.is_closed() {
                let caps = self.resolver.resolve(repo, author, parent)?;
                if !(caps.is_invited || caps.is_admin) {
                    return Err(AgoraError::denied(
                        Capability::Invited,
                        format!("{} {} is restricted to invited teams", parent.kind, parent.uuid),
                    ));
                }
            }
        }

        let parent_id = parent.as_ref().map(|p| p.id);
        if let Some(title) = title {
            let scoped = matches!(candidate.kind, ContentKind::Initiative | ContentKind::Workstream);
            if scoped && repo.title_taken(candidate.kind, parent_id, title)? {
                return Err(ValidationError::DuplicateTitle {
                    title: title.to_string(),
                }
                .into());
            }
        }

        let invited_teams = self.check_invited_teams(repo, candidate)?;

        repo.insert_node(&NewNode {
            kind: candidate.kind,
            parent_id,
            title: title.map(str::to_string),
            body: candidate.body.clone(),
            author,
            owner: candidate.owner,
            visibility: candidate.visibility,
            invited_teams,
        })
    }

    /// Proposed owner must exist and the author must hold authority over it
    fn check_owner(&self, repo: &Repo<'_>, author: UserId, owner: &Owner) -> Result<()> {
        match owner {
            Owner::Unowned => return Err(ValidationError::OwnerRequired.into()),
            Owner::Freelancer => return Ok(()),
            Owner::Team(team) if !repo.team_exists(*team)? => {
                return Err(ValidationError::UnknownTeam(team.0).into());
            }
            Owner::Family(family) if !repo.family_exists(*family)? => {
                return Err(ValidationError::InvalidValue {
                    field: "owner".to_string(),
                    value: owner.to_string(),
                }
                .into());
            }
            _ => {}
        }
        if self.resolver.owner_authority(repo, author, owner)? {
            Ok(())
        } else {
            Err(AgoraError::denied(
                Capability::OwnerMember,
                format!("not a member of {}", owner),
            ))
        }
    }

    fn check_invited_teams(&self, repo: &Repo<'_>, candidate: &DraftCandidate) -> Result<Vec<TeamId>> {
        let raw = candidate.invited_teams.as_deref().filter(|s| !s.is_empty());
        match (candidate.visibility, raw) {
            (Visibility::Open, None) => Ok(Vec::new()),
            (Visibility::Open, Some(_)) => Err(ValidationError::InvitedTeamsOnOpenContent.into()),
            (Visibility::Closed, None) => Err(ValidationError::InvitedTeamsRequired.into()),
            (Visibility::Closed, Some(raw)) => {
                let teams = parse_invited_teams(raw, self.limits.max_invited_teams)?;
                for team in &teams {
                    if !repo.team_exists(*team)? {
                        return Err(ValidationError::UnknownTeam(team.0).into());
                    }
                }
                Ok(teams)
            }
        }
    }

    /// Enqueue under polite mode, publish otherwise. Drafts only: a node
    /// already under review waits for its reviewers
    fn advance_draft(&self, repo: &Repo<'_>, node: &ContentNode) -> Result<SubmitOutcome> {
        if self.policy.polite_mode {
            let ticket = self.queue.submit_for_review(repo, node)?;
            Ok(SubmitOutcome::PendingReview {
                node: node.uuid,
                ticket: ticket.uuid,
            })
        } else {
            let node = publish(repo, node.id)?;
            Ok(SubmitOutcome::Published { node: node.uuid })
        }
    }
}

/// Publish a draft without review
///
/// Re-reads the node so the transition is checked against stored state.
/// Invited-team rows are keyed by the node id and stay as they are.
pub fn publish(repo: &Repo<'_>, node_id: i64) -> Result<ContentNode> {
    let node = stored(repo, node_id)?;
    transition(repo, node, LifecycleEvent::AutoAccept)
}

/// Publish a node under review after a reviewer accepted it
pub fn accept(repo: &Repo<'_>, node_id: i64) -> Result<ContentNode> {
    let node = stored(repo, node_id)?;
    transition(repo, node, LifecycleEvent::Accept)
}

/// Close a node under review as rejected
pub fn reject(repo: &Repo<'_>, node_id: i64) -> Result<ContentNode> {
    let node = stored(repo, node_id)?;
    transition(repo, node, LifecycleEvent::Decline)
}

fn stored(repo: &Repo<'_>, node_id: i64) -> Result<ContentNode> {
    repo.get_node(node_id)?
        .ok_or_else(|| AgoraError::NotFound(format!("content #{}", node_id)))
}

fn transition(repo: &Repo<'_>, node: ContentNode, event: LifecycleEvent) -> Result<ContentNode> {
    let next = node.state.apply(event)?;
    repo.set_node_state(node.id, next)?;
    let node = ContentNode { state: next, ..node };
    info!(node = %node.uuid, %event, class = node.class().code(), "state changed");
    Ok(node)
}

fn log_refusal(operation: &str, error: &AgoraError) {
    if matches!(
        error.kind(),
        ErrorKind::PermissionDenied | ErrorKind::StateConflict | ErrorKind::Validation
    ) {
        warn!(operation, error = %error, "request refused");
    }
}
