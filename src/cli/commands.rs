use clap::{Args, Parser, Subcommand};
use uuid::Uuid;

use crate::entity::{FamilyId, TeamId, UserId};

#[derive(Parser, Debug)]
#[command(name = "agora")]
#[command(version, about = "Moderated, team-owned content with review tickets and investigations")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Act as this user id
    #[arg(long = "as", global = true, value_name = "USER")]
    pub actor: Option<UserId>,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new agora workspace in the current directory
    Init,

    /// Manage users
    User(UserCommand),

    /// Manage teams and team membership
    Team(TeamCommand),

    /// Manage families and family membership
    Family(FamilyCommand),

    /// Manage the hazard/risk/remedy catalog
    Catalog(CatalogCommand),

    /// Create content and submit it right away
    Submit(DraftArgs),

    /// Create content as a draft without submitting it
    Draft(DraftArgs),

    /// Submit a saved draft
    RequestReview {
        /// Node uuid
        node: Uuid,

        /// Publish without review for this invocation
        #[arg(long, conflicts_with = "polite")]
        auto_accept: bool,

        /// Force peer review for this invocation
        #[arg(long)]
        polite: bool,
    },

    /// Accept or decline a review ticket
    Review {
        /// Ticket uuid
        ticket: Uuid,

        /// accept or decline
        outcome: String,
    },

    /// List your notifications
    Inbox,

    /// Mark a notification as read
    Read {
        /// Notification uuid
        notification: Uuid,
    },

    /// Show your capabilities on a node
    Caps {
        /// Node uuid
        node: Uuid,
    },

    /// Show a node
    Show {
        /// Node uuid
        node: Uuid,
    },

    /// Append an addendum to published content
    Supplement {
        /// Node uuid
        node: Uuid,

        /// Addendum text
        #[arg(required_unless_present = "stdin")]
        text: Option<String>,

        /// Read the addendum from stdin
        #[arg(long)]
        stdin: bool,
    },

    /// Approve a workstream as its initiative's winner
    Approve {
        /// Workstream uuid
        workstream: Uuid,
    },

    /// Run an investigation on an approved workstream
    Investigate(InvestigateCommand),
}

#[derive(Args, Debug)]
pub struct UserCommand {
    #[command(subcommand)]
    pub action: UserAction,
}

#[derive(Subcommand, Debug)]
pub enum UserAction {
    /// Register a user
    Add {
        /// Display name
        name: String,
    },

    /// Remove a user from the reviewer pool
    Deactivate {
        /// User id
        id: UserId,
    },
}

#[derive(Args, Debug)]
pub struct TeamCommand {
    #[command(subcommand)]
    pub action: TeamAction,
}

#[derive(Subcommand, Debug)]
pub enum TeamAction {
    /// Create a team and join it
    Create {
        /// Team name
        name: String,
    },

    /// Add a user to a team you belong to (an empty team takes its first member)
    Join {
        /// Team id
        team: TeamId,

        /// User to add (defaults to --as)
        #[arg(long)]
        user: Option<UserId>,
    },
}

#[derive(Args, Debug)]
pub struct FamilyCommand {
    #[command(subcommand)]
    pub action: FamilyAction,
}

#[derive(Subcommand, Debug)]
pub enum FamilyAction {
    /// Create a family with yourself as a parent
    Create {
        /// Family name
        name: String,
    },

    /// Add a user to a family you are a parent of
    Join {
        /// Family id
        family: FamilyId,

        /// parent or child
        #[arg(long, default_value = "child")]
        role: String,

        /// User to add (defaults to --as)
        #[arg(long)]
        user: Option<UserId>,
    },
}

#[derive(Args, Debug)]
pub struct CatalogCommand {
    #[command(subcommand)]
    pub action: CatalogAction,
}

#[derive(Subcommand, Debug)]
pub enum CatalogAction {
    /// Add a catalog entry
    Add {
        /// hazard, risk or remedy
        category: String,

        /// Entry name
        name: String,

        /// Longer description
        #[arg(long)]
        description: Option<String>,
    },

    /// List catalog entries
    List {
        /// Only this category
        category: Option<String>,
    },
}

#[derive(Args, Debug)]
pub struct DraftArgs {
    /// initiative, workstream, discussion or response
    pub kind: String,

    /// Parent node uuid
    #[arg(long)]
    pub parent: Option<Uuid>,

    /// Title (not used by responses)
    #[arg(long, short = 't')]
    pub title: Option<String>,

    /// Body text
    #[arg(long, short = 'b', required_unless_present = "stdin")]
    pub body: Option<String>,

    /// Read the body from stdin
    #[arg(long)]
    pub stdin: bool,

    /// Owner: team:<id>, family:<id> or freelancer
    #[arg(long, default_value = "freelancer")]
    pub owner: String,

    /// Restrict to invited teams
    #[arg(long)]
    pub closed: bool,

    /// Invited team ids, comma separated (e.g. "3,7")
    #[arg(long)]
    pub invite: Option<String>,

    /// Publish without review for this invocation
    #[arg(long, conflicts_with = "polite")]
    pub auto_accept: bool,

    /// Force peer review for this invocation
    #[arg(long)]
    pub polite: bool,
}

#[derive(Args, Debug)]
pub struct InvestigateCommand {
    #[command(subcommand)]
    pub action: InvestigateAction,
}

#[derive(Subcommand, Debug)]
pub enum InvestigateAction {
    /// Open an investigation record
    Open {
        /// Workstream uuid
        workstream: Uuid,

        /// inspection, diagnosis, remediation or craft-process
        kind: String,
    },

    /// Save one step of a record
    Step {
        /// Record uuid
        record: Uuid,

        /// Step number (1-based)
        step: u8,

        /// Observation as sense=detail (can be specified multiple times)
        #[arg(long = "observe", short = 'o')]
        observations: Vec<String>,

        /// Selected catalog ids, comma separated ("" clears the selection)
        #[arg(long)]
        select: Option<String>,

        /// Note text
        #[arg(long)]
        note: Option<String>,

        /// Complete the record (final step)
        #[arg(long)]
        complete: bool,

        /// Completion time, RFC 3339
        #[arg(long, requires = "complete")]
        at: Option<String>,

        /// Completion summary
        #[arg(long, requires = "complete")]
        summary: Option<String>,
    },

    /// Show a record with all saved steps
    Show {
        /// Record uuid
        record: Uuid,
    },
}
