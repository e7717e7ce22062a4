//! Pure input checks for draft submission.

use std::collections::HashSet;

use crate::config::{KindLimits, LengthBounds};
use crate::entity::{ContentKind, ContentNode, TeamId};
use crate::error::ValidationError;

/// Length in user-perceived characters
pub fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Parent presence and kind for `kind`
pub fn check_shape(kind: ContentKind, parent: Option<&ContentNode>) -> Result<(), ValidationError> {
    match (kind.parent_kind(), parent) {
        (None, None) => Ok(()),
        (None, Some(_)) => Err(ValidationError::UnexpectedParent {
            kind: kind.to_string(),
        }),
        (Some(expected), None) => Err(ValidationError::MissingParent {
            kind: kind.to_string(),
            parent_kind: expected.to_string(),
        }),
        (Some(expected), Some(parent)) if parent.kind != expected => {
            Err(ValidationError::WrongParentKind {
                expected: expected.to_string(),
                actual: parent.kind.to_string(),
            })
        }
        (Some(_), Some(_)) => Ok(()),
    }
}

pub fn check_lengths(
    kind: ContentKind,
    limits: &KindLimits,
    title: Option<&str>,
    body: &str,
) -> Result<(), ValidationError> {
    match (limits.title, title) {
        (Some(bounds), Some(title)) => {
            let actual = char_len(title.trim());
            if actual < bounds.min {
                return Err(ValidationError::TitleTooShort { min: bounds.min, actual });
            }
            if actual > bounds.max {
                return Err(ValidationError::TitleTooLong { max: bounds.max, actual });
            }
        }
        (Some(bounds), None) => {
            return Err(ValidationError::TitleTooShort { min: bounds.min, actual: 0 });
        }
        (None, Some(_)) => {
            return Err(ValidationError::TitleNotAllowed {
                kind: kind.to_string(),
            });
        }
        (None, None) => {}
    }

    let LengthBounds { min, max } = limits.body;
    let actual = char_len(body);
    if actual < min {
        return Err(ValidationError::BodyTooShort { min, actual });
    }
    if actual > max {
        return Err(ValidationError::BodyTooLong { max, actual });
    }
    Ok(())
}

/// Parse the invited-team wire format: `3,7,12`
///
/// Strict: ASCII digits only, no whitespace, no empty items, no repeats,
/// at most `max` entries. Existence of the teams is checked by the caller.
pub fn parse_invited_teams(input: &str, max: usize) -> Result<Vec<TeamId>, ValidationError> {
    let malformed = |reason: &str| ValidationError::MalformedTeamList {
        input: input.to_string(),
        reason: reason.to_string(),
    };

    if input.is_empty() {
        return Err(malformed("list is empty"));
    }
    let items: Vec<&str> = input.split(',').collect();
    if items.len() > max {
        return Err(ValidationError::TooManyTeams {
            max,
            actual: items.len(),
        });
    }

    let mut seen = HashSet::new();
    let mut teams = Vec::with_capacity(items.len());
    for item in items {
        if item.is_empty() {
            return Err(malformed("empty entry"));
        }
        if !item.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed(&format!("'{}' is not a team id", item)));
        }
        let id: i64 = item
            .parse()
            .map_err(|_| malformed(&format!("'{}' is out of range", item)))?;
        if !seen.insert(id) {
            return Err(ValidationError::DuplicateTeam(id));
        }
        teams.push(TeamId(id));
    }
    Ok(teams)
}
