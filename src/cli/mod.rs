mod commands;
mod handlers;

pub use commands::{
    CatalogAction, CatalogCommand, Cli, Commands, DraftArgs, FamilyAction, FamilyCommand,
    InvestigateAction, InvestigateCommand, TeamAction, TeamCommand, UserAction, UserCommand,
};
pub use handlers::{
    handle_approve, handle_caps, handle_catalog_add, handle_catalog_list, handle_draft,
    handle_family_create, handle_family_join, handle_inbox, handle_init, handle_investigate_open,
    handle_investigate_show, handle_investigate_step, handle_read, handle_request_review,
    handle_review, handle_show, handle_submit, handle_supplement, handle_team_create,
    handle_team_join, handle_user_add, handle_user_deactivate,
};
