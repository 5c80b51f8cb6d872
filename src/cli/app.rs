use super::{Cli, Command, EditArgs, OptionArgs, PayloadArgs};
use anyhow::{Context, Result};
use modflow::{
    ActorId, CommandOptions, EngineConfig, InMemoryRepository, LocalizedText, ModuleId,
    ModulePayload, NewModule, WorkflowEngine,
};
use serde::Serialize;
use serde_json::json;

type Engine = WorkflowEngine<InMemoryRepository>;

pub async fn run(cli: Cli) -> Result<()> {
    let config = config_from(&cli)?;
    let engine = modflow::open(&config).context("Failed to open module repository")?;

    match cli.command {
        Command::Create {
            actor,
            number,
            payload,
            owner,
        } => {
            let mut request = NewModule::new(number, new_payload(payload));
            if let Some(owner) = owner {
                request = request.owned_by(ActorId::new(owner));
            }
            let version = engine
                .create_module(&actor.actor()?, actor.role, request)
                .await?;
            print(&version)
        }
        Command::Edit {
            module,
            actor,
            changes,
            options,
        } => {
            let module_id = resolve(&engine, &module).await?;
            let current = engine.latest_version(module_id).await?;
            let mut options = command_options(options);
            options.expected_version.get_or_insert(current.number);
            let payload = apply_changes(current.payload, changes);
            let version = engine
                .propose_edit_with(module_id, &actor.actor()?, actor.role, payload, options)
                .await?;
            print(&version)
        }
        Command::Translate {
            module,
            actor,
            lang,
            title,
            content,
            options,
        } => {
            let module_id = resolve(&engine, &module).await?;
            let text = LocalizedText::new(&lang, title, content);
            let options = command_options(options);
            let version = engine
                .add_translation_with(module_id, &actor.actor()?, actor.role, text, options)
                .await?;
            print(&version)
        }
        Command::Transition {
            module,
            target,
            actor,
            options,
        } => {
            let module_id = resolve(&engine, &module).await?;
            let options = command_options(options);
            let version = engine
                .request_transition_with(module_id, &actor.actor()?, actor.role, target, options)
                .await?;
            print(&version)
        }
        Command::State { module } => {
            let module_id = resolve(&engine, &module).await?;
            let state = engine.current_state(module_id).await?;
            print(&json!({ "module_id": module_id, "state": state }))
        }
        Command::Show {
            module,
            version,
            released,
        } => {
            let module_id = resolve(&engine, &module).await?;
            if released {
                return print(&engine.latest_released(module_id).await?);
            }
            let version = match version {
                Some(number) => engine.get_version(module_id, number).await?,
                None => engine.latest_version(module_id).await?,
            };
            print(&version)
        }
        Command::Versions { module } => {
            let module_id = resolve(&engine, &module).await?;
            print(&engine.versions(module_id).await?)
        }
        Command::History { module } => {
            let module_id = resolve(&engine, &module).await?;
            let entries: Vec<_> = engine.history(module_id).await?.into_iter().collect();
            print(&entries)
        }
        Command::Verify { module } => {
            let module_id = resolve(&engine, &module).await?;
            let verified = engine.verify_audit(module_id).await?;
            print(&json!({ "module_id": module_id, "verified_entries": verified }))
        }
        Command::List { state } => print(&engine.modules_in_state(state).await?),
        Command::Checkpoint => {
            let modules = engine.repository().checkpoint().await?;
            print(&json!({ "persistent": engine.repository().is_persistent(), "modules": modules }))
        }
    }
}

/// Environment first, then command-line flags on top.
fn config_from(cli: &Cli) -> Result<EngineConfig> {
    let mut config = EngineConfig::from_env().context("Invalid MODFLOW_* environment")?;
    if let Some(dir) = &cli.data_dir {
        config = config.data_dir(dir);
    }
    if let Some(mode) = cli.durability {
        config = config.durability(mode);
    }
    if let Some(path) = &cli.policy {
        config = config.policy_path(path);
    }
    if let Some(frames) = cli.checkpoint_every {
        config = config.checkpoint_every(frames);
    }
    config.validate()?;
    Ok(config)
}

/// Accepts a module id or a module number.
async fn resolve(engine: &Engine, reference: &str) -> Result<ModuleId> {
    if let Ok(module_id) = reference.parse::<ModuleId>() {
        return Ok(module_id);
    }
    engine
        .find_module(reference)
        .await
        .with_context(|| format!("No module matches '{}'", reference))
}

fn new_payload(args: PayloadArgs) -> ModulePayload {
    let mut payload = ModulePayload::new(args.title, args.credits, args.semester);
    payload.description = args.description;
    payload.program = args.program;
    payload
}

fn apply_changes(mut payload: ModulePayload, changes: EditArgs) -> ModulePayload {
    if let Some(title) = changes.title {
        payload.title = title;
    }
    if let Some(credits) = changes.credits {
        payload.credits = credits;
    }
    if let Some(semester) = changes.semester {
        payload.valid_from_semester = semester;
    }
    if let Some(description) = changes.description {
        payload.description = Some(description);
    }
    if let Some(program) = changes.program {
        payload.program = Some(program);
    }
    payload
}

fn command_options(args: OptionArgs) -> CommandOptions {
    CommandOptions {
        expected_version: args.expected_version,
        comment: args.comment,
    }
}

fn print<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("Failed to render output")?;
    println!("{}", rendered);
    Ok(())
}
