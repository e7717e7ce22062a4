//! Review tickets: creation, reviewer dispatch and resolution.

mod selector;

pub use selector::{from_config, PresenceWeightedSelector, ReviewerSelector, UniformSelector};

use std::collections::HashSet;

use tracing::{info, warn};
use uuid::Uuid;

use crate::config::ModerationConfig;
use crate::entity::{
    ContentNode, LifecycleEvent, Notification, NotificationKind, ReviewOutcome, ReviewTicket,
    TicketStatus, User, UserId,
};
use crate::error::{AgoraError, Capability, Conflict, Result};
use crate::lifecycle;
use crate::storage::{Repo, SqliteStore};

/// Every ticket goes to exactly this many reviewers
pub const REVIEWERS_PER_TICKET: usize = 2;

pub struct ModerationQueue {
    selector: Box<dyn ReviewerSelector>,
}

impl ModerationQueue {
    pub fn new(selector: Box<dyn ReviewerSelector>) -> Self {
        Self { selector }
    }

    pub fn from_config(config: &ModerationConfig) -> Self {
        Self::new(from_config(config))
    }

    /// Open a ticket for a draft and notify its reviewers
    ///
    /// Runs against the caller's transaction: a failure at any point (including
    /// the second notification) leaves nothing behind once that transaction
    /// rolls back.
    pub fn submit_for_review(&self, repo: &Repo<'_>, node: &ContentNode) -> Result<ReviewTicket> {
        let next = node.state.apply(LifecycleEvent::Enqueue)?;
        if repo.pending_ticket_for(node.id)?.is_some() {
            return Err(Conflict::DuplicateSubmission.into());
        }

        let reviewers = self.pick_reviewers(repo, node.author)?;
        let ticket = repo.insert_ticket(node)?;
        repo.set_node_state(node.id, next)?;

        let message = format!("Please review {} '{}'", node.kind, node.label());
        for reviewer in &reviewers {
            repo.insert_notification(*reviewer, &ticket, NotificationKind::ReviewRequest, &message)?;
            repo.increment_unread(*reviewer)?;
        }

        info!(
            ticket = %ticket.uuid,
            node = %node.uuid,
            kind = %node.kind,
            selector = self.selector.name(),
            "review requested"
        );
        Ok(ticket)
    }

    fn pick_reviewers(&self, repo: &Repo<'_>, author: UserId) -> Result<Vec<UserId>> {
        let candidates: Vec<User> = repo
            .active_users()?
            .into_iter()
            .filter(|user| user.id != author)
            .collect();
        if candidates.len() < REVIEWERS_PER_TICKET {
            return Err(AgoraError::InsufficientReviewers {
                needed: REVIEWERS_PER_TICKET,
                available: candidates.len(),
            });
        }

        let picked = self.selector.select(&candidates, REVIEWERS_PER_TICKET);
        let distinct: HashSet<UserId> = picked.iter().copied().collect();
        if picked.len() != REVIEWERS_PER_TICKET
            || distinct.len() != REVIEWERS_PER_TICKET
            || distinct.contains(&author)
        {
            return Err(AgoraError::Integrity(format!(
                "{} selector returned an invalid reviewer set {:?}",
                self.selector.name(),
                picked
            )));
        }
        Ok(picked)
    }

    /// Record a reviewer's decision and move the node accordingly
    pub fn resolve_ticket(
        &self,
        store: &SqliteStore,
        reviewer: UserId,
        ticket_uuid: &Uuid,
        outcome: ReviewOutcome,
    ) -> Result<ReviewTicket> {
        let result = store.write("resolve_ticket", |repo| {
            let ticket = repo.require_ticket(ticket_uuid)?;
            if ticket.status != TicketStatus::Pending {
                return Err(Conflict::TicketAlreadyResolved(ticket.status.to_string()).into());
            }
            if !repo.ticket_reviewers(ticket.id)?.contains(&reviewer) {
                return Err(AgoraError::denied(
                    Capability::Reviewer,
                    "only the assigned reviewers may decide this ticket",
                ));
            }

            repo.close_ticket(ticket.id, outcome.ticket_status(), reviewer)?;
            let node = match outcome {
                ReviewOutcome::Accepted => lifecycle::accept(repo, ticket.node_id)?,
                ReviewOutcome::Declined => lifecycle::reject(repo, ticket.node_id)?,
            };
            self.reply_to_author(repo, &ticket, &node, outcome)?;

            info!(
                ticket = %ticket.uuid,
                node = %node.uuid,
                %outcome,
                reviewer = %reviewer,
                "review resolved"
            );
            repo.require_ticket(ticket_uuid)
        });
        if let Err(e) = &result {
            warn!(ticket = %ticket_uuid, reviewer = %reviewer, error = %e, "review not resolved");
        }
        result
    }

    /// Single-recipient notice telling the author how the review went
    fn reply_to_author(
        &self,
        repo: &Repo<'_>,
        ticket: &ReviewTicket,
        node: &ContentNode,
        outcome: ReviewOutcome,
    ) -> Result<Notification> {
        let message = format!("Your {} '{}' was {}", node.kind, node.label(), outcome);
        let notification =
            repo.insert_notification(ticket.author, ticket, NotificationKind::ReviewResult, &message)?;
        repo.increment_unread(ticket.author)?;
        Ok(notification)
    }

    pub fn notifications(&self, repo: &Repo<'_>, user: UserId) -> Result<Vec<Notification>> {
        repo.notifications_for(user)
    }

    /// Flip the read flag (recipient only)
    pub fn mark_read(&self, store: &SqliteStore, user: UserId, uuid: &Uuid) -> Result<Notification> {
        store.write("mark_read", |repo| {
            let notification = repo.require_notification(uuid)?;
            if notification.recipient != user {
                return Err(AgoraError::denied(
                    Capability::Recipient,
                    "notifications can only be marked read by their recipient",
                ));
            }
            if repo.mark_notification_read(notification.id)? {
                repo.decrement_unread(user)?;
            }
            Ok(Notification {
                is_read: true,
                ..notification
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{ContentKind, NodeState, Owner, Visibility};
    use crate::error::ErrorKind;
    use crate::storage::NewNode;

    /// Always returns the same ids, valid or not
    struct FixedSelector(Vec<UserId>);

    impl ReviewerSelector for FixedSelector {
        fn select(&self, _candidates: &[User], _count: usize) -> Vec<UserId> {
            self.0.clone()
        }

        fn name(&self) -> &'static str {
            "fixed"
        }
    }

    fn draft(store: &SqliteStore, author: UserId) -> ContentNode {
        store
            .repo()
            .insert_node(&NewNode {
                kind: ContentKind::Initiative,
                parent_id: None,
                title: Some("Spring Tea Gathering".to_string()),
                body: "An afternoon of oolong tastings under the cherry trees.".to_string(),
                author,
                owner: Owner::Freelancer,
                visibility: Visibility::Open,
                invited_teams: Vec::new(),
            })
            .unwrap()
    }

    fn users(store: &SqliteStore, n: usize) -> Vec<UserId> {
        (0..n)
            .map(|i| store.repo().insert_user(&format!("user{}", i)).unwrap().id)
            .collect()
    }

    #[test]
    fn test_submit_notifies_two_distinct_non_authors() {
        let store = SqliteStore::open_in_memory().unwrap();
        let ids = users(&store, 5);
        let node = draft(&store, ids[0]);
        let queue = ModerationQueue::new(Box::new(UniformSelector::seeded(11)));

        let ticket = store
            .write("test", |repo| queue.submit_for_review(repo, &node))
            .unwrap();

        let repo = store.repo();
        let reviewers = repo.ticket_reviewers(ticket.id).unwrap();
        assert_eq!(reviewers.len(), 2);
        assert_ne!(reviewers[0], reviewers[1]);
        assert!(!reviewers.contains(&ids[0]));
        for reviewer in &reviewers {
            assert_eq!(repo.require_user(*reviewer).unwrap().unread_count, 1);
        }
        assert_eq!(
            repo.get_node(node.id).unwrap().unwrap().state,
            NodeState::PendingReview
        );
    }

    #[test]
    fn test_second_submission_is_a_conflict() {
        let store = SqliteStore::open_in_memory().unwrap();
        let ids = users(&store, 3);
        let node = draft(&store, ids[0]);
        let queue = ModerationQueue::new(Box::new(UniformSelector::seeded(1)));

        store
            .write("test", |repo| queue.submit_for_review(repo, &node))
            .unwrap();
        let err = store
            .write("test", |repo| queue.submit_for_review(repo, &node))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StateConflict);
        assert_eq!(store.repo().tickets_for_node(node.id).unwrap().len(), 1);
    }

    #[test]
    fn test_too_few_reviewers_fails_whole_submission() {
        let store = SqliteStore::open_in_memory().unwrap();
        let ids = users(&store, 2);
        let node = draft(&store, ids[0]);
        let queue = ModerationQueue::new(Box::new(UniformSelector::seeded(1)));

        let err = store
            .write("test", |repo| queue.submit_for_review(repo, &node))
            .unwrap_err();
        assert!(matches!(
            err,
            AgoraError::InsufficientReviewers {
                needed: 2,
                available: 1
            }
        ));
        assert!(store.repo().tickets_for_node(node.id).unwrap().is_empty());
    }

    #[test]
    fn test_inactive_users_are_not_reviewers() {
        let store = SqliteStore::open_in_memory().unwrap();
        let ids = users(&store, 3);
        store.repo().set_user_active(ids[2], false).unwrap();
        let node = draft(&store, ids[0]);
        let queue = ModerationQueue::new(Box::new(UniformSelector::seeded(1)));

        let err = store
            .write("test", |repo| queue.submit_for_review(repo, &node))
            .unwrap_err();
        assert!(matches!(err, AgoraError::InsufficientReviewers { .. }));
    }

    #[test]
    fn test_selector_returning_author_is_rejected() {
        let store = SqliteStore::open_in_memory().unwrap();
        let ids = users(&store, 3);
        let node = draft(&store, ids[0]);
        let queue = ModerationQueue::new(Box::new(FixedSelector(vec![ids[0], ids[1]])));

        let err = store
            .write("test", |repo| queue.submit_for_review(repo, &node))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Integrity);
    }

    #[test]
    fn test_partial_dispatch_rolls_back_ticket() {
        let store = SqliteStore::open_in_memory().unwrap();
        let ids = users(&store, 3);
        let node = draft(&store, ids[0]);
        // Second recipient does not exist, so its notification write fails.
        let queue = ModerationQueue::new(Box::new(FixedSelector(vec![ids[1], UserId(9999)])));

        let err = store
            .write("test", |repo| queue.submit_for_review(repo, &node))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Dependency);

        let repo = store.repo();
        assert!(repo.tickets_for_node(node.id).unwrap().is_empty());
        assert!(repo.notifications_for(ids[1]).unwrap().is_empty());
        assert_eq!(repo.require_user(ids[1]).unwrap().unread_count, 0);
        assert_eq!(repo.get_node(node.id).unwrap().unwrap().state, NodeState::Draft);
    }

    #[test]
    fn test_resolve_accept_publishes_and_replies_to_author() {
        let store = SqliteStore::open_in_memory().unwrap();
        let ids = users(&store, 3);
        let node = draft(&store, ids[0]);
        let queue = ModerationQueue::new(Box::new(FixedSelector(vec![ids[1], ids[2]])));
        let ticket = store
            .write("test", |repo| queue.submit_for_review(repo, &node))
            .unwrap();

        let resolved = queue
            .resolve_ticket(&store, ids[1], &ticket.uuid, ReviewOutcome::Accepted)
            .unwrap();
        assert_eq!(resolved.status, TicketStatus::Accepted);
        assert_eq!(resolved.resolved_by, Some(ids[1]));

        let repo = store.repo();
        assert_eq!(
            repo.get_node(node.id).unwrap().unwrap().state,
            NodeState::Published
        );
        let inbox = queue.notifications(&repo, ids[0]).unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].kind, NotificationKind::ReviewResult);
        assert_eq!(inbox[0].ticket, ticket.uuid);

        let err = queue
            .resolve_ticket(&store, ids[2], &ticket.uuid, ReviewOutcome::Declined)
            .unwrap_err();
        assert!(matches!(
            err,
            AgoraError::StateConflict(Conflict::TicketAlreadyResolved(_))
        ));
    }

    #[test]
    fn test_resolve_decline_rejects() {
        let store = SqliteStore::open_in_memory().unwrap();
        let ids = users(&store, 3);
        let node = draft(&store, ids[0]);
        let queue = ModerationQueue::new(Box::new(FixedSelector(vec![ids[1], ids[2]])));
        let ticket = store
            .write("test", |repo| queue.submit_for_review(repo, &node))
            .unwrap();

        queue
            .resolve_ticket(&store, ids[2], &ticket.uuid, ReviewOutcome::Declined)
            .unwrap();
        assert_eq!(
            store.repo().get_node(node.id).unwrap().unwrap().state,
            NodeState::Rejected
        );
    }

    #[test]
    fn test_only_assigned_reviewers_resolve() {
        let store = SqliteStore::open_in_memory().unwrap();
        let ids = users(&store, 4);
        let node = draft(&store, ids[0]);
        let queue = ModerationQueue::new(Box::new(FixedSelector(vec![ids[1], ids[2]])));
        let ticket = store
            .write("test", |repo| queue.submit_for_review(repo, &node))
            .unwrap();

        for outsider in [ids[0], ids[3]] {
            let err = queue
                .resolve_ticket(&store, outsider, &ticket.uuid, ReviewOutcome::Accepted)
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::PermissionDenied);
        }
        assert_eq!(
            store.repo().require_ticket(&ticket.uuid).unwrap().status,
            TicketStatus::Pending
        );
    }

    #[test]
    fn test_mark_read_is_recipient_only() {
        let store = SqliteStore::open_in_memory().unwrap();
        let ids = users(&store, 3);
        let node = draft(&store, ids[0]);
        let queue = ModerationQueue::new(Box::new(FixedSelector(vec![ids[1], ids[2]])));
        let ticket = store
            .write("test", |repo| queue.submit_for_review(repo, &node))
            .unwrap();
        let recipient = ids[1];
        let note = store.repo().notifications_for(recipient).unwrap()[0].clone();
        assert_eq!(note.ticket, ticket.uuid);

        let err = queue.mark_read(&store, ids[0], &note.uuid).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);

        assert!(queue.mark_read(&store, recipient, &note.uuid).unwrap().is_read);
        assert!(queue.mark_read(&store, recipient, &note.uuid).unwrap().is_read);
        assert_eq!(store.repo().require_user(recipient).unwrap().unread_count, 0);
    }
}
