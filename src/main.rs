use agora::cli::{
    handle_approve, handle_caps, handle_catalog_add, handle_catalog_list, handle_draft,
    handle_family_create, handle_family_join, handle_inbox, handle_init, handle_investigate_open,
    handle_investigate_show, handle_investigate_step, handle_read, handle_request_review,
    handle_review, handle_show, handle_submit, handle_supplement, handle_team_create,
    handle_team_join, handle_user_add, handle_user_deactivate, CatalogAction, Cli, Commands,
    FamilyAction, InvestigateAction, TeamAction, UserAction,
};
use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Logs go to stderr so `--json` output on stdout stays parseable
fn init_tracing() {
    let filter = EnvFilter::try_from_env("AGORA_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("agora=warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    init_tracing();
    let Cli {
        actor,
        json,
        command,
    } = Cli::parse();

    let result = match command {
        Commands::Init => handle_init(),
        Commands::User(user) => match user.action {
            UserAction::Add { name } => handle_user_add(name, json),
            UserAction::Deactivate { id } => handle_user_deactivate(id),
        },
        Commands::Team(team) => match team.action {
            TeamAction::Create { name } => handle_team_create(name, actor, json),
            TeamAction::Join { team, user } => handle_team_join(team, user, actor),
        },
        Commands::Family(family) => match family.action {
            FamilyAction::Create { name } => handle_family_create(name, actor, json),
            FamilyAction::Join { family, role, user } => {
                handle_family_join(family, role, user, actor)
            }
        },
        Commands::Catalog(catalog) => match catalog.action {
            CatalogAction::Add {
                category,
                name,
                description,
            } => handle_catalog_add(category, name, description, json),
            CatalogAction::List { category } => handle_catalog_list(category, json),
        },
        Commands::Submit(args) => handle_submit(args, actor, json),
        Commands::Draft(args) => handle_draft(args, actor, json),
        Commands::RequestReview {
            node,
            auto_accept,
            polite,
        } => handle_request_review(node, auto_accept, polite, actor, json),
        Commands::Review { ticket, outcome } => handle_review(ticket, outcome, actor, json),
        Commands::Inbox => handle_inbox(actor, json),
        Commands::Read { notification } => handle_read(notification, actor),
        Commands::Caps { node } => handle_caps(node, actor, json),
        Commands::Show { node } => handle_show(node, actor, json),
        Commands::Supplement { node, text, stdin } => {
            handle_supplement(node, text, stdin, actor, json)
        }
        Commands::Approve { workstream } => handle_approve(workstream, actor),
        Commands::Investigate(investigate) => match investigate.action {
            InvestigateAction::Open { workstream, kind } => {
                handle_investigate_open(workstream, kind, actor, json)
            }
            InvestigateAction::Step {
                record,
                step,
                observations,
                select,
                note,
                complete,
                at,
                summary,
            } => handle_investigate_step(
                record,
                step,
                observations,
                select,
                note,
                complete,
                at,
                summary,
                actor,
                json,
            ),
            InvestigateAction::Show { record } => handle_investigate_show(record, actor, json),
        },
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        if e.is_retryable() {
            eprintln!("The store may be busy; the command can be retried.");
        }
        std::process::exit(1);
    }
}
