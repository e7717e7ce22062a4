use thiserror::Error;

/// Capability a caller was missing when an operation was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Admin,
    Master,
    Verifier,
    Invited,
    Author,
    Reviewer,
    Recipient,
    OwnerMember,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Capability::Admin => write!(f, "admin"),
            Capability::Master => write!(f, "master"),
            Capability::Verifier => write!(f, "verifier"),
            Capability::Invited => write!(f, "invited member"),
            Capability::Author => write!(f, "author"),
            Capability::Reviewer => write!(f, "assigned reviewer"),
            Capability::Recipient => write!(f, "recipient"),
            Capability::OwnerMember => write!(f, "owner member"),
        }
    }
}

/// Input was rejected; every variant carries a user-facing reason
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Title too short: {actual} characters (min {min})")]
    TitleTooShort { min: usize, actual: usize },

    #[error("Title too long: {actual} characters (max {max})")]
    TitleTooLong { max: usize, actual: usize },

    #[error("Title is not allowed for {kind}")]
    TitleNotAllowed { kind: String },

    #[error("Body too short: {actual} characters (min {min})")]
    BodyTooShort { min: usize, actual: usize },

    #[error("Body too long: {actual} characters (max {max})")]
    BodyTooLong { max: usize, actual: usize },

    #[error("Title '{title}' is already taken")]
    DuplicateTitle { title: String },

    #[error("A {kind} requires a parent {parent_kind}")]
    MissingParent { kind: String, parent_kind: String },

    #[error("A {kind} cannot have a parent")]
    UnexpectedParent { kind: String },

    #[error("Parent must be a {expected}, found {actual}")]
    WrongParentKind { expected: String, actual: String },

    #[error("Content must be owned by a team, a family or the freelancer pool")]
    OwnerRequired,

    #[error("Malformed invited team list '{input}': {reason}")]
    MalformedTeamList { input: String, reason: String },

    #[error("Too many invited teams: {actual} (max {max})")]
    TooManyTeams { max: usize, actual: usize },

    #[error("Team {0} appears more than once in the invited team list")]
    DuplicateTeam(i64),

    #[error("Team {0} does not exist")]
    UnknownTeam(i64),

    #[error("Closed content needs at least one invited team")]
    InvitedTeamsRequired,

    #[error("Invited teams only apply to closed content")]
    InvitedTeamsOnOpenContent,

    #[error("Supplement too short: {actual} characters (min {min})")]
    SupplementTooShort { min: usize, actual: usize },

    #[error("Supplement would make the body {total} characters (max {max})")]
    SupplementTooLong { max: usize, total: usize },

    #[error("Unknown {category} reference: {id}")]
    UnknownReference { category: String, id: i64 },

    #[error("Step {step} expects a {expected} payload")]
    PayloadMismatch { step: u8, expected: String },

    #[error("The final step requires a completion time")]
    MissingCompletionTime,

    #[error("An observation step needs at least one observation")]
    NoObservations,

    #[error("Invalid value '{value}' for field '{field}'")]
    InvalidValue { field: String, value: String },
}

/// The request was well formed but clashes with current state
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Conflict {
    #[error("A review is already pending for this content")]
    DuplicateSubmission,

    #[error("Review ticket was already resolved as {0}")]
    TicketAlreadyResolved(String),

    #[error("Cannot apply '{event}' to content in state '{from}'")]
    InvalidTransition { from: String, event: String },

    #[error("Parent content is not published")]
    ParentNotPublished,

    #[error("Content is not published")]
    NotPublished,

    #[error("The initiative already has an approved workstream")]
    AlreadyApproved,

    #[error("Workstream has not been approved")]
    NotApproved,

    #[error("An investigation of this kind already exists for the workstream")]
    DuplicateRecord,

    #[error("Step {claimed} is not available (next step is {expected})")]
    StepOutOfOrder { expected: u8, claimed: u8 },

    #[error("Investigation is already completed")]
    RecordCompleted,
}

/// Coarse classification used by callers to pick a response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    PermissionDenied,
    StateConflict,
    Dependency,
    Integrity,
    NotFound,
    Usage,
}

#[derive(Error, Debug)]
pub enum AgoraError {
    #[error("Not in an agora workspace. Run 'agora init' first.")]
    NotInitialized,

    #[error("Already initialized. Remove .agora/ to reinitialize.")]
    AlreadyInitialized,

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Permission denied: {required} required ({reason})")]
    PermissionDenied { required: Capability, reason: String },

    #[error("Conflict: {0}")]
    StateConflict(#[from] Conflict),

    #[error("Integrity error: {0}")]
    Integrity(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Insufficient reviewers: need {needed}, only {available} eligible")]
    InsufficientReviewers { needed: usize, available: usize },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("This command needs --as <user id>")]
    MissingActor,

    #[error("Usage: {0}")]
    Usage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl AgoraError {
    pub fn denied(required: Capability, reason: impl Into<String>) -> Self {
        AgoraError::PermissionDenied {
            required,
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AgoraError::Validation(_) => ErrorKind::Validation,
            AgoraError::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            AgoraError::StateConflict(_) => ErrorKind::StateConflict,
            AgoraError::Integrity(_) => ErrorKind::Integrity,
            AgoraError::NotFound(_) => ErrorKind::NotFound,
            AgoraError::InsufficientReviewers { .. }
            | AgoraError::Storage(_)
            | AgoraError::Io(_) => ErrorKind::Dependency,
            AgoraError::NotInitialized
            | AgoraError::AlreadyInitialized
            | AgoraError::Config(_)
            | AgoraError::MissingActor
            | AgoraError::Usage(_)
            | AgoraError::Json(_)
            | AgoraError::Yaml(_) => ErrorKind::Usage,
        }
    }

    /// Only collaborator failures are worth retrying, and only by the caller
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Dependency
    }
}

impl From<rusqlite::Error> for AgoraError {
    fn from(e: rusqlite::Error) -> Self {
        AgoraError::Storage(format!("SQLite error: {}", e))
    }
}

pub type Result<T> = std::result::Result<T, AgoraError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        let err: AgoraError = Conflict::DuplicateSubmission.into();
        assert_eq!(err.kind(), ErrorKind::StateConflict);
        assert!(!err.is_retryable());

        let err: AgoraError = ValidationError::InvitedTeamsRequired.into();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = AgoraError::InsufficientReviewers {
            needed: 2,
            available: 1,
        };
        assert_eq!(err.kind(), ErrorKind::Dependency);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_messages_name_the_reason() {
        let err = AgoraError::denied(Capability::Verifier, "not in the verifier team");
        assert_eq!(
            err.to_string(),
            "Permission denied: verifier required (not in the verifier team)"
        );

        let err: AgoraError = ValidationError::TitleTooShort { min: 2, actual: 1 }.into();
        assert!(err.to_string().contains("min 2"));
    }
}
