//! packflow CLI: operator interface to packs, actions, and the datastore.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use packflow::config::Config;
use packflow::config::secrets::ExposeSecret;
use packflow::datastore::Datastore;
use packflow::db::Db;
use packflow::dispatch::Dispatcher;
use packflow::model::action::{Action, ActionId, Claim, NewAction, Outcome, State};
use packflow::model::datastore::{ItemKey, NewDataItem, PutOutcome};
use packflow::model::pack::NewPack;
use packflow::reaper::{ClaimReaper, ReaperConfig};
use packflow::store::ActionFilter;
use packflow::telemetry::{TelemetryConfig, init_telemetry};

#[derive(Parser)]
#[command(name = "packflow", about = "Exactly-once action dispatch for packs")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Pack registry operations
    Pack {
        #[command(subcommand)]
        action: PackCommand,
    },
    /// Action operations
    Action {
        #[command(subcommand)]
        action: ActionCommand,
    },
    /// Datastore operations
    Datastore {
        #[command(subcommand)]
        action: DatastoreCommand,
    },
    /// Run the claim reaper until interrupted
    Reap {
        /// Requeue expired actions instead of leaving them timed out
        #[arg(long)]
        requeue: bool,
    },
}

#[derive(Subcommand)]
enum PackCommand {
    /// Register a pack
    Register {
        name: String,
        /// Pack id (defaults to the name)
        #[arg(long)]
        id: Option<String>,
    },
    /// List registered packs
    List,
}

#[derive(Subcommand)]
enum ActionCommand {
    /// Offer a new action to a pack
    Create {
        /// Pack id
        pack: String,
        /// Action name
        name: String,
        /// JSON payload
        #[arg(long)]
        payload: Option<String>,
    },
    /// Take the oldest pending action
    Take {
        /// Pack name
        pack: String,
        /// Action name
        name: String,
        /// Claimant identity (defaults to the pack id)
        #[arg(long)]
        worker: Option<String>,
    },
    /// Report the outcome of a taken action
    Report {
        id: String,
        /// completed | fatal
        outcome: String,
        /// JSON result
        #[arg(long)]
        result: Option<String>,
        /// Claim number printed by `take`; rejects the report if the
        /// action has since been requeued
        #[arg(long)]
        claim: Option<u32>,
    },
    /// Return a taken or timed-out action to the queue
    Requeue { id: String },
    /// Show an action
    Show { id: String },
    /// List actions
    List {
        /// Filter by pack id
        #[arg(long)]
        pack: Option<String>,
        /// Filter by action name
        #[arg(long)]
        name: Option<String>,
        /// Filter by state
        #[arg(long)]
        state: Option<String>,
        /// Maximum actions to show
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Delete an action record
    Delete { id: String },
    /// Expire claims older than the timeout
    Expire {
        /// Claim timeout in seconds (defaults to CLAIM_TIMEOUT_SECS)
        #[arg(long)]
        older_than_secs: Option<u64>,
    },
}

#[derive(Subcommand)]
enum DatastoreCommand {
    /// Create or replace an item from a JSON file
    Put {
        namespace: String,
        key: String,
        file: PathBuf,
        #[arg(long)]
        description: Option<String>,
        /// Defaults to application/json
        #[arg(long)]
        content_type: Option<String>,
    },
    /// Print an item's content
    Get { namespace: String, key: String },
    /// Delete an item
    Delete { namespace: String, key: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = Config::from_env()?;
    let db = Arc::new(
        Db::connect(
            config.database_url.expose_secret(),
            config.database_max_connections,
        )
        .await?,
    );
    db.migrate().await?;
    let dispatcher = Dispatcher::from_store(db.clone());

    match cli.command {
        Command::Pack { action } => cmd_pack(&dispatcher, action).await,
        Command::Action { action } => cmd_action(&dispatcher, &config, action).await,
        Command::Datastore { action } => cmd_datastore(&Datastore::new(db), action).await,
        Command::Reap { requeue } => cmd_reap(dispatcher, &config, requeue).await,
    }
}

async fn cmd_pack(dispatcher: &Dispatcher, action: PackCommand) -> anyhow::Result<()> {
    match action {
        PackCommand::Register { name, id } => {
            let mut new = NewPack::new(name);
            if let Some(id) = id {
                new = new.id(id);
            }
            let pack = dispatcher.registry().register(new).await?;
            println!("Registered: {} (id: {})", pack.name, pack.id);
        }
        PackCommand::List => {
            let packs = dispatcher.registry().list().await?;
            if packs.is_empty() {
                println!("No packs registered.");
                return Ok(());
            }
            println!("{:<24}  {:<24}  CREATED", "ID", "NAME");
            println!("{}", "-".repeat(70));
            for pack in &packs {
                println!(
                    "{:<24}  {:<24}  {}",
                    pack.id,
                    pack.name,
                    pack.created_at.format("%Y-%m-%d %H:%M")
                );
            }
        }
    }
    Ok(())
}

async fn cmd_action(
    dispatcher: &Dispatcher,
    config: &Config,
    action: ActionCommand,
) -> anyhow::Result<()> {
    match action {
        ActionCommand::Create {
            pack,
            name,
            payload,
        } => {
            let new = NewAction::new(pack, name).payload(parse_json(payload)?);
            let created = dispatcher.create_action(new).await?;
            println!("Created: {} (state: {})", created.id, created.state);
        }
        ActionCommand::Take { pack, name, worker } => {
            let taken = match worker {
                Some(w) => dispatcher.take_action_as(&pack, &name, &w).await?,
                None => dispatcher.take_action(&pack, &name).await?,
            };
            match taken {
                Some(action) => print_action(&action)?,
                None => println!("No pending '{name}' action for pack {pack}."),
            }
        }
        ActionCommand::Report {
            id,
            outcome,
            result,
            claim,
        } => {
            let id: ActionId = id.parse()?;
            let outcome: Outcome = outcome.parse()?;
            let result = result.map(|r| serde_json::from_str(&r)).transpose()?;
            let action = match claim {
                Some(requeue_count) => {
                    let claim = Claim { id, requeue_count };
                    dispatcher.report_outcome_for(claim, outcome, result).await?
                }
                None => dispatcher.report_outcome(id, outcome, result).await?,
            };
            println!("Reported: {} (state: {})", action.id, action.state);
        }
        ActionCommand::Requeue { id } => {
            let action = dispatcher.requeue(id.parse()?).await?;
            println!(
                "Requeued: {} (requeue count: {})",
                action.id, action.requeue_count
            );
        }
        ActionCommand::Show { id } => {
            let action = dispatcher.get_action(id.parse()?).await?;
            print_action(&action)?;
        }
        ActionCommand::List {
            pack,
            name,
            state,
            limit,
        } => {
            let mut filter = ActionFilter::default().limit(limit);
            if let Some(pack) = pack {
                filter = filter.pack(pack.into());
            }
            if let Some(name) = name {
                filter = filter.name(name);
            }
            if let Some(state) = state {
                filter = filter.state(state.parse::<State>()?);
            }
            print_action_table(&dispatcher.list_actions(&filter).await?);
        }
        ActionCommand::Delete { id } => {
            let id: ActionId = id.parse()?;
            dispatcher.delete_action(id).await?;
            println!("Deleted: {id}");
        }
        ActionCommand::Expire { older_than_secs } => {
            let timeout = older_than_secs
                .map(Duration::from_secs)
                .or(config.claim_timeout)
                .ok_or_else(|| {
                    anyhow::anyhow!("pass --older-than-secs or set CLAIM_TIMEOUT_SECS")
                })?;
            let expired = dispatcher.expire_stale(timeout).await?;
            println!("Expired {} claim(s).", expired.len());
            print_action_table(&expired);
        }
    }
    Ok(())
}

async fn cmd_datastore(datastore: &Datastore, action: DatastoreCommand) -> anyhow::Result<()> {
    match action {
        DatastoreCommand::Put {
            namespace,
            key,
            file,
            description,
            content_type,
        } => {
            let content = tokio::fs::read_to_string(&file).await?;
            let mut item = NewDataItem::new(ItemKey::new(namespace, key)?, content);
            if let Some(description) = description {
                item = item.description(description);
            }
            if let Some(content_type) = content_type {
                item = item.content_type(content_type);
            }
            match datastore.put(item).await? {
                PutOutcome::Created => println!("Created."),
                PutOutcome::Replaced => println!("Replaced."),
            }
        }
        DatastoreCommand::Get { namespace, key } => {
            let item = datastore.get(&ItemKey::new(namespace, key)?).await?;
            print!("{}", item.content);
        }
        DatastoreCommand::Delete { namespace, key } => {
            let key = ItemKey::new(namespace, key)?;
            datastore.delete(&key).await?;
            println!("Deleted: {key}");
        }
    }
    Ok(())
}

async fn cmd_reap(dispatcher: Dispatcher, config: &Config, requeue: bool) -> anyhow::Result<()> {
    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "packflow".to_string(),
        default_level: config.log_level.clone(),
    })?;

    let claim_timeout = config
        .claim_timeout
        .ok_or_else(|| anyhow::anyhow!("CLAIM_TIMEOUT_SECS must be set to run the reaper"))?;
    let reaper = ClaimReaper::new(
        dispatcher,
        ReaperConfig {
            claim_timeout,
            interval: config.reaper_interval,
            requeue_expired: requeue,
        },
    )?;

    let handle = reaper.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        handle.shutdown();
    });

    reaper.run().await?;
    Ok(())
}

fn parse_json(raw: Option<String>) -> anyhow::Result<serde_json::Value> {
    Ok(match raw {
        Some(json) => serde_json::from_str(&json)?,
        None => serde_json::Value::Null,
    })
}

fn print_action(action: &Action) -> anyhow::Result<()> {
    println!("ID:         {}", action.id);
    println!("Pack:       {}", action.pack_id);
    println!("Name:       {}", action.name);
    println!("State:      {}", action.state);
    println!(
        "Payload:    {}",
        serde_json::to_string_pretty(&action.payload)?
    );
    println!("Taken By:   {}", action.taken_by.as_deref().unwrap_or("-"));
    if action.state == State::Taken {
        println!("Claim:      {}", action.claim().requeue_count);
    }
    if let Some(taken_at) = action.taken_at {
        println!("Taken At:   {taken_at}");
    }
    if let Some(finished_at) = action.finished_at {
        println!("Finished:   {finished_at}");
    }
    if let Some(ref result) = action.result {
        println!("Result:     {}", serde_json::to_string_pretty(result)?);
    }
    if action.requeue_count > 0 {
        println!("Requeued:   {} time(s)", action.requeue_count);
    }
    println!("Created:    {}", action.created_at);
    println!("Updated:    {}", action.updated_at);
    Ok(())
}

fn print_action_table(actions: &[Action]) {
    if actions.is_empty() {
        println!("No actions found.");
        return;
    }

    println!(
        "{:<36}  {:<16}  {:<20}  {:<9}  {:<16}  CREATED",
        "ID", "PACK", "NAME", "STATE", "TAKEN_BY"
    );
    println!("{}", "-".repeat(120));
    for action in actions {
        println!(
            "{:<36}  {:<16}  {:<20}  {:<9}  {:<16}  {}",
            action.id,
            action.pack_id,
            action.name,
            action.state,
            action.taken_by.as_deref().unwrap_or("-"),
            action.created_at.format("%Y-%m-%d %H:%M")
        );
    }
    println!("\n{} action(s)", actions.len());
}
