//! Ownership-based capability resolution.
//!
//! Admin is judged against a node's own owner, master against its parent's
//! owner. The two are independent: a user can hold either, both or neither.

use serde::Serialize;

use crate::entity::{ContentNode, FamilyId, FamilyRole, Owner, TeamId, UserId, Visibility};
use crate::error::{AgoraError, Capability, Result};
use crate::storage::Repo;

/// Capabilities a user holds over one node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Capabilities {
    pub is_admin: bool,
    pub is_master: bool,
    pub is_verifier: bool,
    pub is_invited: bool,
}

impl Capabilities {
    pub fn has(&self, capability: Capability) -> bool {
        match capability {
            Capability::Admin => self.is_admin,
            Capability::Master => self.is_master,
            Capability::Verifier => self.is_verifier,
            Capability::Invited => self.is_invited,
            _ => false,
        }
    }

    /// `Ok` when the capability is held, `PermissionDenied` otherwise
    pub fn require(&self, capability: Capability, reason: &str) -> Result<()> {
        if self.has(capability) {
            Ok(())
        } else {
            Err(AgoraError::denied(capability, reason))
        }
    }
}

/// Read-only resolver. Never writes; lookup failures propagate as errors
/// rather than collapsing into "no access"
#[derive(Debug, Clone, Copy)]
pub struct PermissionResolver {
    verifier_team: TeamId,
}

impl PermissionResolver {
    pub fn new(verifier_team: TeamId) -> Self {
        Self { verifier_team }
    }

    pub fn verifier_team(&self) -> TeamId {
        self.verifier_team
    }

    pub fn resolve(&self, repo: &Repo<'_>, user: UserId, node: &ContentNode) -> Result<Capabilities> {
        let is_admin = self.owner_authority(repo, user, &node.owner)?;
        let is_master = match repo.parent_of(node)? {
            Some(parent) => self.owner_authority(repo, user, &parent.owner)?,
            None => is_admin,
        };

        Ok(Capabilities {
            is_admin,
            is_master,
            is_verifier: self.is_verifier(repo, user)?,
            is_invited: self.is_invited(repo, user, node)?,
        })
    }

    /// Whether `user` holds authority over `owner`. Works on proposed owners
    /// that are not yet attached to any stored node
    pub fn owner_authority(&self, repo: &Repo<'_>, user: UserId, owner: &Owner) -> Result<bool> {
        match owner {
            Owner::Team(team) => {
                if !repo.team_exists(*team)? {
                    return Err(AgoraError::Integrity(format!(
                        "owning team {} does not exist",
                        team
                    )));
                }
                repo.is_team_member(*team, user)
            }
            Owner::Family(family) => {
                if !repo.family_exists(*family)? {
                    return Err(AgoraError::Integrity(format!(
                        "owning family {} does not exist",
                        family
                    )));
                }
                Ok(repo.family_role(*family, user)? == Some(FamilyRole::Parent))
            }
            Owner::Freelancer | Owner::Unowned => Ok(false),
        }
    }

    pub fn is_verifier(&self, repo: &Repo<'_>, user: UserId) -> Result<bool> {
        if !repo.team_exists(self.verifier_team)? {
            return Err(AgoraError::Integrity(format!(
                "verifier team {} does not exist",
                self.verifier_team
            )));
        }
        repo.is_team_member(self.verifier_team, user)
    }

    /// Open nodes invite everyone
    pub fn is_invited(&self, repo: &Repo<'_>, user: UserId, node: &ContentNode) -> Result<bool> {
        match node.visibility {
            Visibility::Open => Ok(true),
            Visibility::Closed => repo.is_member_of_any(&node.invited_teams, user),
        }
    }

    /// Members add members. A team nobody has joined yet takes its first one
    pub fn require_team_manager(&self, repo: &Repo<'_>, actor: UserId, team: TeamId) -> Result<()> {
        if !repo.team_exists(team)? {
            return Err(AgoraError::NotFound(format!("team {}", team)));
        }
        if repo.team_member_count(team)? == 0 || repo.is_team_member(team, actor)? {
            Ok(())
        } else {
            Err(AgoraError::denied(
                Capability::OwnerMember,
                format!("only members of team {} can add members", team),
            ))
        }
    }

    /// Only parents add family members
    pub fn require_family_parent(&self, repo: &Repo<'_>, actor: UserId, family: FamilyId) -> Result<()> {
        if !repo.family_exists(family)? {
            return Err(AgoraError::NotFound(format!("family {}", family)));
        }
        if repo.family_role(family, actor)? == Some(FamilyRole::Parent) {
            Ok(())
        } else {
            Err(AgoraError::denied(
                Capability::OwnerMember,
                format!("only parents of family {} can add members", family),
            ))
        }
    }

    pub fn require_verifier(&self, repo: &Repo<'_>, user: UserId) -> Result<()> {
        if self.is_verifier(repo, user)? {
            Ok(())
        } else {
            Err(AgoraError::denied(
                Capability::Verifier,
                "investigations are limited to the verifier team",
            ))
        }
    }
}
