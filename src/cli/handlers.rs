use std::collections::BTreeSet;
use std::env;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::commands::DraftArgs;
use crate::config::{Config, LifecyclePolicy};
use crate::entity::{
    ContentNode, FamilyId, FamilyRole, InvestigationKind, Observation, ReferenceCategory,
    ReviewOutcome, ReviewTicket, Sense, StateClass, TeamId, UserId, Visibility,
};
use crate::error::{AgoraError, ErrorKind, Result, ValidationError};
use crate::lifecycle::{DraftCandidate, LifecycleStateMachine, SubmitOutcome};
use crate::permission::PermissionResolver;
use crate::storage::{SqliteStore, AGORA_DIR};
use crate::workflow::{StepPayload, StepWorkflowEngine};

const CONFIG_FILE: &str = "config.yaml";

/// Find the workspace root by looking for .agora/
fn find_project_root() -> PathBuf {
    let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

    let mut current = cwd.as_path();
    loop {
        if current.join(AGORA_DIR).exists() {
            return current.to_path_buf();
        }
        match current.parent() {
            Some(parent) => current = parent,
            None => return cwd,
        }
    }
}

fn config_path(root: &Path) -> PathBuf {
    root.join(AGORA_DIR).join(CONFIG_FILE)
}

struct Workspace {
    store: SqliteStore,
    config: Config,
}

impl Workspace {
    fn open() -> Result<Self> {
        let root = find_project_root();
        let store = SqliteStore::open(&root)?;
        let config = Config::load_or_default(&config_path(&root))?;
        Ok(Self { store, config })
    }

    /// Resolve `--as`, confirm the user exists and record the visit
    fn actor(&self, actor: Option<UserId>) -> Result<UserId> {
        let id = actor.ok_or(AgoraError::MissingActor)?;
        let repo = self.store.repo();
        repo.require_user(id)?;
        repo.touch_user(id, Utc::now())?;
        Ok(id)
    }

    fn machine(&self, policy: Option<LifecyclePolicy>) -> LifecycleStateMachine {
        let machine = LifecycleStateMachine::from_config(&self.config);
        match policy {
            Some(policy) => machine.with_policy(policy),
            None => machine,
        }
    }

    fn resolver(&self) -> PermissionResolver {
        PermissionResolver::new(self.config.verifier_team)
    }

    fn engine(&self) -> StepWorkflowEngine {
        StepWorkflowEngine::new(self.resolver())
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn policy_override(auto_accept: bool, polite: bool) -> Option<LifecyclePolicy> {
    if auto_accept {
        Some(LifecyclePolicy::auto_accept())
    } else if polite {
        Some(LifecyclePolicy::polite())
    } else {
        None
    }
}

fn parse_arg<T>(field: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    value.parse().map_err(|_| {
        ValidationError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
        }
        .into()
    })
}

fn read_stdin() -> Result<String> {
    let mut content = String::new();
    io::stdin().read_to_string(&mut content)?;
    Ok(content.trim_end_matches('\n').to_string())
}

pub fn handle_init() -> Result<()> {
    let root = env::current_dir()?;
    let store = SqliteStore::init(&root)?;

    let verifiers = store.repo().insert_team("verifiers")?;
    let config = Config {
        verifier_team: verifiers.id,
        ..Config::default()
    };
    config.save(&config_path(&root))?;

    println!("Initialized agora workspace in {}", root.display());
    println!("  verifier team: {}", verifiers.id);
    Ok(())
}

pub fn handle_user_add(name: String, json: bool) -> Result<()> {
    let ws = Workspace::open()?;
    let user = ws.store.write("user_add", |repo| repo.insert_user(name.trim()))?;

    if json {
        print_json(&user)
    } else {
        println!("Created user {} ({})", user.id, user.name);
        Ok(())
    }
}

pub fn handle_user_deactivate(id: UserId) -> Result<()> {
    let ws = Workspace::open()?;
    ws.store
        .write("user_deactivate", |repo| repo.set_user_active(id, false))?;
    println!("Deactivated user {}", id);
    Ok(())
}

pub fn handle_team_create(name: String, actor: Option<UserId>, json: bool) -> Result<()> {
    let ws = Workspace::open()?;
    let actor = ws.actor(actor)?;
    let team = ws.store.write("team_create", |repo| {
        let team = repo.insert_team(name.trim())?;
        repo.add_team_member(team.id, actor)?;
        Ok(team)
    })?;

    if json {
        print_json(&team)
    } else {
        println!("Created team {} ({})", team.id, team.name);
        Ok(())
    }
}

pub fn handle_team_join(team: TeamId, user: Option<UserId>, actor: Option<UserId>) -> Result<()> {
    let ws = Workspace::open()?;
    let actor = ws.actor(actor)?;
    let member = user.unwrap_or(actor);
    let resolver = ws.resolver();
    ws.store.write("team_join", |repo| {
        resolver.require_team_manager(repo, actor, team)?;
        repo.require_user(member)?;
        repo.add_team_member(team, member)
    })?;
    println!("User {} joined team {}", member, team);
    Ok(())
}

pub fn handle_family_create(name: String, actor: Option<UserId>, json: bool) -> Result<()> {
    let ws = Workspace::open()?;
    let actor = ws.actor(actor)?;
    let family = ws.store.write("family_create", |repo| {
        let family = repo.insert_family(name.trim())?;
        repo.add_family_member(family.id, actor, FamilyRole::Parent)?;
        Ok(family)
    })?;

    if json {
        print_json(&family)
    } else {
        println!("Created family {} ({})", family.id, family.name);
        Ok(())
    }
}

pub fn handle_family_join(
    family: FamilyId,
    role: String,
    user: Option<UserId>,
    actor: Option<UserId>,
) -> Result<()> {
    let ws = Workspace::open()?;
    let role: FamilyRole = parse_arg("role", &role)?;
    let actor = ws.actor(actor)?;
    let member = user.unwrap_or(actor);
    let resolver = ws.resolver();
    ws.store.write("family_join", |repo| {
        resolver.require_family_parent(repo, actor, family)?;
        repo.require_user(member)?;
        repo.add_family_member(family, member, role)
    })?;
    println!("User {} joined family {} as {}", member, family, role);
    Ok(())
}

pub fn handle_catalog_add(
    category: String,
    name: String,
    description: Option<String>,
    json: bool,
) -> Result<()> {
    let ws = Workspace::open()?;
    let category: ReferenceCategory = parse_arg("category", &category)?;
    let item = ws.store.write("catalog_add", |repo| {
        repo.insert_reference(category, name.trim(), description.as_deref())
    })?;

    if json {
        print_json(&item)
    } else {
        println!("Added {} {} ({})", item.category, item.id, item.name);
        Ok(())
    }
}

pub fn handle_catalog_list(category: Option<String>, json: bool) -> Result<()> {
    let ws = Workspace::open()?;
    let category = category
        .map(|c| parse_arg::<ReferenceCategory>("category", &c))
        .transpose()?;
    let items = ws.store.repo().list_references(category)?;

    if json {
        return print_json(&items);
    }
    if items.is_empty() {
        println!("No catalog entries");
    }
    for item in items {
        match item.description {
            Some(description) => {
                println!("{:>4}  {:<7} {} - {}", item.id, item.category, item.name, description)
            }
            None => println!("{:>4}  {:<7} {}", item.id, item.category, item.name),
        }
    }
    Ok(())
}

fn candidate_from(args: &DraftArgs) -> Result<DraftCandidate> {
    let body = match (&args.body, args.stdin) {
        (_, true) => read_stdin()?,
        (Some(body), false) => body.clone(),
        (None, false) => String::new(),
    };
    Ok(DraftCandidate {
        kind: parse_arg("kind", &args.kind)?,
        parent: args.parent,
        title: args.title.clone(),
        body,
        owner: parse_arg("owner", &args.owner)?,
        visibility: if args.closed {
            Visibility::Closed
        } else {
            Visibility::Open
        },
        invited_teams: args.invite.clone(),
    })
}

fn print_outcome(outcome: &SubmitOutcome, json: bool) -> Result<()> {
    if json {
        return print_json(outcome);
    }
    match outcome {
        SubmitOutcome::PendingReview { node, ticket } => {
            println!("Submitted {} for review (ticket {})", node, ticket);
            println!("  It will appear once a reviewer accepts it.");
        }
        SubmitOutcome::Published { node } => println!("Published {}", node),
    }
    Ok(())
}

pub fn handle_submit(args: DraftArgs, actor: Option<UserId>, json: bool) -> Result<()> {
    let ws = Workspace::open()?;
    let actor = ws.actor(actor)?;
    let candidate = candidate_from(&args)?;
    let machine = ws.machine(policy_override(args.auto_accept, args.polite));

    let outcome = machine.submit_draft(&ws.store, actor, &candidate)?;
    print_outcome(&outcome, json)
}

pub fn handle_draft(args: DraftArgs, actor: Option<UserId>, json: bool) -> Result<()> {
    let ws = Workspace::open()?;
    let actor = ws.actor(actor)?;
    let candidate = candidate_from(&args)?;

    let node = ws.machine(None).save_draft(&ws.store, actor, &candidate)?;
    if json {
        print_json(&serde_json::json!({ "node": node }))
    } else {
        println!("Saved draft {}", node);
        Ok(())
    }
}

pub fn handle_request_review(
    node: Uuid,
    auto_accept: bool,
    polite: bool,
    actor: Option<UserId>,
    json: bool,
) -> Result<()> {
    let ws = Workspace::open()?;
    let actor = ws.actor(actor)?;
    let machine = ws.machine(policy_override(auto_accept, polite));

    let outcome = machine.request_review(&ws.store, actor, &node)?;
    print_outcome(&outcome, json)
}

pub fn handle_review(ticket: Uuid, outcome: String, actor: Option<UserId>, json: bool) -> Result<()> {
    let ws = Workspace::open()?;
    let actor = ws.actor(actor)?;
    let outcome: ReviewOutcome = parse_arg("outcome", &outcome)?;

    let machine = ws.machine(None);
    let ticket = machine
        .queue()
        .resolve_ticket(&ws.store, actor, &ticket, outcome)?;
    if json {
        print_json(&ticket)
    } else {
        println!("Ticket {} {}", ticket.uuid, ticket.status);
        Ok(())
    }
}

pub fn handle_inbox(actor: Option<UserId>, json: bool) -> Result<()> {
    let ws = Workspace::open()?;
    let actor = ws.actor(actor)?;
    let machine = ws.machine(None);
    let notifications = machine.queue().notifications(&ws.store.repo(), actor)?;

    if json {
        return print_json(&notifications);
    }
    let unread = ws.store.repo().require_user(actor)?.unread_count;
    println!("{} unread", unread);
    for n in notifications {
        let marker = if n.is_read { " " } else { "*" };
        println!("{} {}  [{}] {} (ticket {})", marker, n.uuid, n.kind, n.message, n.ticket);
    }
    Ok(())
}

pub fn handle_read(notification: Uuid, actor: Option<UserId>) -> Result<()> {
    let ws = Workspace::open()?;
    let actor = ws.actor(actor)?;
    let machine = ws.machine(None);
    machine.queue().mark_read(&ws.store, actor, &notification)?;
    println!("Marked {} as read", notification);
    Ok(())
}

pub fn handle_caps(node: Uuid, actor: Option<UserId>, json: bool) -> Result<()> {
    let ws = Workspace::open()?;
    let actor = ws.actor(actor)?;
    let machine = ws.machine(None);
    let repo = ws.store.repo();
    let node = repo.require_node(&node)?;
    let caps = machine.resolver().resolve(&repo, actor, &node)?;

    if json {
        print_json(&caps)
    } else {
        println!("admin:    {}", caps.is_admin);
        println!("master:   {}", caps.is_master);
        println!("verifier: {}", caps.is_verifier);
        println!("invited:  {}", caps.is_invited);
        Ok(())
    }
}

#[derive(Serialize)]
struct NodeView<'a> {
    #[serde(flatten)]
    node: &'a ContentNode,
    class: StateClass,
    class_code: i32,
    children: Vec<Uuid>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    reviews: Vec<ReviewTicket>,
}

pub fn handle_show(node: Uuid, actor: Option<UserId>, json: bool) -> Result<()> {
    let ws = Workspace::open()?;
    let actor = ws.actor(actor)?;
    let machine = ws.machine(None);
    let repo = ws.store.repo();
    let node = machine.fetch(&repo, actor, &node)?;
    let class = node.class();

    // Children the actor cannot see are left out rather than failing the show.
    let mut children = Vec::new();
    for child in repo.list_nodes(None, Some(node.id))? {
        match machine.fetch(&repo, actor, &child.uuid) {
            Ok(child) => children.push(child),
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {}
            Err(e) => return Err(e),
        }
    }
    let reviews = if node.author == actor {
        repo.tickets_for_node(node.id)?
    } else {
        Vec::new()
    };

    if json {
        return print_json(&NodeView {
            node: &node,
            class,
            class_code: class.code(),
            children: children.iter().map(|c| c.uuid).collect(),
            reviews,
        });
    }
    println!("{} {}", node.kind, node.uuid);
    if let Some(title) = &node.title {
        println!("Title:  {}", title);
    }
    println!("State:  {} ({})", class, class.code());
    println!("Owner:  {}", node.owner);
    println!("Author: {}", node.author);
    if !node.invited_teams.is_empty() {
        let teams: Vec<String> = node.invited_teams.iter().map(|t| t.to_string()).collect();
        println!("Invited teams: {}", teams.join(","));
    }
    for ticket in &reviews {
        println!("Review: {} {}", ticket.uuid, ticket.status);
    }
    println!();
    println!("{}", node.body);
    if !children.is_empty() {
        println!();
        for child in &children {
            println!(
                "  {} {} {}",
                child.kind,
                child.uuid,
                child.title.as_deref().unwrap_or("")
            );
        }
    }
    Ok(())
}

pub fn handle_supplement(
    node: Uuid,
    text: Option<String>,
    stdin: bool,
    actor: Option<UserId>,
    json: bool,
) -> Result<()> {
    let ws = Workspace::open()?;
    let actor = ws.actor(actor)?;
    let fragment = if stdin {
        read_stdin()?
    } else {
        text.unwrap_or_default()
    };

    let node = ws
        .machine(None)
        .supplement(&ws.store, actor, &node, &fragment)?;
    if json {
        print_json(&node)
    } else {
        println!("Supplemented {}", node.uuid);
        Ok(())
    }
}

pub fn handle_approve(workstream: Uuid, actor: Option<UserId>) -> Result<()> {
    let ws = Workspace::open()?;
    let actor = ws.actor(actor)?;
    ws.machine(None)
        .approve_workstream(&ws.store, actor, &workstream)?;
    println!("Approved workstream {}", workstream);
    Ok(())
}

pub fn handle_investigate_open(
    workstream: Uuid,
    kind: String,
    actor: Option<UserId>,
    json: bool,
) -> Result<()> {
    let ws = Workspace::open()?;
    let actor = ws.actor(actor)?;
    let kind: InvestigationKind = parse_arg("kind", &kind)?;

    let record = ws.engine().open_record(&ws.store, actor, &workstream, kind)?;
    if json {
        print_json(&record)
    } else {
        println!(
            "Opened {} {} ({} steps)",
            record.kind,
            record.uuid,
            record.plan().total()
        );
        Ok(())
    }
}

fn parse_observation(raw: &str) -> Result<Observation> {
    let (sense, detail) = raw.split_once('=').ok_or_else(|| ValidationError::InvalidValue {
        field: "observe".to_string(),
        value: raw.to_string(),
    })?;
    Ok(Observation {
        sense: parse_arg::<Sense>("sense", sense)?,
        detail: detail.to_string(),
    })
}

fn parse_selection(raw: &str) -> Result<BTreeSet<i64>> {
    if raw.trim().is_empty() {
        return Ok(BTreeSet::new());
    }
    raw.split(',')
        .map(|item| {
            item.trim().parse::<i64>().map_err(|_| {
                AgoraError::from(ValidationError::InvalidValue {
                    field: "select".to_string(),
                    value: item.to_string(),
                })
            })
        })
        .collect()
}

/// Exactly one payload flag per step
fn payload_from(
    observations: Vec<String>,
    select: Option<String>,
    note: Option<String>,
    complete: bool,
    at: Option<String>,
    summary: Option<String>,
) -> Result<StepPayload> {
    let given = [!observations.is_empty(), select.is_some(), note.is_some(), complete]
        .iter()
        .filter(|g| **g)
        .count();
    if given != 1 {
        return Err(AgoraError::Usage(
            "give exactly one of --observe, --select, --note or --complete".to_string(),
        ));
    }

    if complete {
        let completed_at = at
            .map(|raw| {
                DateTime::parse_from_rfc3339(&raw)
                    .map(|t| t.with_timezone(&Utc))
                    .map_err(|_| ValidationError::InvalidValue {
                        field: "at".to_string(),
                        value: raw.clone(),
                    })
            })
            .transpose()?;
        return Ok(StepPayload::Complete {
            completed_at,
            summary,
        });
    }
    if let Some(raw) = select {
        return Ok(StepPayload::Selection(parse_selection(&raw)?));
    }
    if let Some(text) = note {
        return Ok(StepPayload::Note(text));
    }
    let observations = observations
        .iter()
        .map(|raw| parse_observation(raw))
        .collect::<Result<Vec<_>>>()?;
    Ok(StepPayload::Observations(observations))
}

#[allow(clippy::too_many_arguments)]
pub fn handle_investigate_step(
    record: Uuid,
    step: u8,
    observations: Vec<String>,
    select: Option<String>,
    note: Option<String>,
    complete: bool,
    at: Option<String>,
    summary: Option<String>,
    actor: Option<UserId>,
    json: bool,
) -> Result<()> {
    let ws = Workspace::open()?;
    let actor = ws.actor(actor)?;
    let payload = payload_from(observations, select, note, complete, at, summary)?;

    let outcome = ws.engine().advance(&ws.store, actor, &record, step, payload)?;
    if json {
        print_json(&outcome)
    } else {
        println!(
            "Saved step {} of {} ({}, {} change{})",
            outcome.step,
            outcome.record,
            outcome.status,
            outcome.detail_writes,
            if outcome.detail_writes == 1 { "" } else { "s" }
        );
        Ok(())
    }
}

pub fn handle_investigate_show(record: Uuid, actor: Option<UserId>, json: bool) -> Result<()> {
    let ws = Workspace::open()?;
    let actor = ws.actor(actor)?;
    let details = ws.engine().details(&ws.store.repo(), actor, &record)?;

    if json {
        return print_json(&details);
    }
    println!(
        "{} {}  step {}/{}  {}",
        details.record.kind,
        details.record.uuid,
        details.record.step,
        details.total_steps,
        details.record.status
    );
    for step in &details.steps {
        println!("  {}. {}", step.step, step.kind);
        if !step.selections.is_empty() {
            let ids: Vec<String> = step.selections.iter().map(|id| id.to_string()).collect();
            println!("       selected: {}", ids.join(","));
        }
        for (sense, detail) in &step.observations {
            println!("       {}: {}", sense, detail);
        }
        if let Some(note) = &step.note {
            println!("       note: {}", note);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_needs_exactly_one_flag() {
        let err = payload_from(Vec::new(), None, None, false, None, None).unwrap_err();
        assert!(matches!(err, AgoraError::Usage(_)));

        let err = payload_from(
            Vec::new(),
            Some("1".to_string()),
            Some("n".to_string()),
            false,
            None,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, AgoraError::Usage(_)));
    }

    #[test]
    fn test_payload_parsing() {
        let payload = payload_from(
            vec!["visual=dark leaves".to_string(), "tactile=dry".to_string()],
            None,
            None,
            false,
            None,
            None,
        )
        .unwrap();
        let StepPayload::Observations(obs) = payload else {
            panic!("expected observations");
        };
        assert_eq!(obs[0].sense, Sense::Visual);
        assert_eq!(obs[0].detail, "dark leaves");

        assert_eq!(
            payload_from(Vec::new(), Some("3,1".to_string()), None, false, None, None).unwrap(),
            StepPayload::Selection(BTreeSet::from([1, 3]))
        );
        assert_eq!(
            payload_from(Vec::new(), Some(String::new()), None, false, None, None).unwrap(),
            StepPayload::Selection(BTreeSet::new())
        );

        let payload = payload_from(
            Vec::new(),
            None,
            None,
            true,
            Some("2026-03-01T10:00:00Z".to_string()),
            None,
        )
        .unwrap();
        assert!(matches!(
            payload,
            StepPayload::Complete {
                completed_at: Some(_),
                ..
            }
        ));

        assert!(payload_from(vec!["smell".to_string()], None, None, false, None, None).is_err());
    }
}
