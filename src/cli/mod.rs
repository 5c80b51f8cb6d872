pub mod app;

use clap::{Args, Parser, Subcommand};
use modflow::{Actor, DurabilityMode, Role, VersionNumber, WorkflowState};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "modflow")]
#[command(version, about = "Module workflow and versioning engine")]
pub struct Cli {
    /// Data directory (overrides MODFLOW_DATA_DIR)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// sync, async or none (overrides MODFLOW_DURABILITY)
    #[arg(long, global = true)]
    pub durability: Option<DurabilityMode>,

    /// Policy JSON file (overrides MODFLOW_POLICY)
    #[arg(long, global = true)]
    pub policy: Option<PathBuf>,

    /// WAL frames between snapshots (overrides MODFLOW_CHECKPOINT_EVERY)
    #[arg(long, global = true)]
    pub checkpoint_every: Option<usize>,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Register a new module in Draft
    Create {
        #[command(flatten)]
        actor: ActorArgs,
        #[arg(long)]
        number: String,
        #[command(flatten)]
        payload: PayloadArgs,
        /// Owner to assign (Admin only)
        #[arg(long)]
        owner: Option<String>,
    },
    /// Propose a new payload; omitted fields keep their current value
    Edit {
        /// Module id or module number
        module: String,
        #[command(flatten)]
        actor: ActorArgs,
        #[command(flatten)]
        changes: EditArgs,
        #[command(flatten)]
        options: OptionArgs,
    },
    /// Add or replace a translation
    Translate {
        module: String,
        #[command(flatten)]
        actor: ActorArgs,
        #[arg(long)]
        lang: String,
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "")]
        content: String,
        #[command(flatten)]
        options: OptionArgs,
    },
    /// Move a module to the next workflow state
    Transition {
        module: String,
        target: WorkflowState,
        #[command(flatten)]
        actor: ActorArgs,
        #[command(flatten)]
        options: OptionArgs,
    },
    /// Current workflow state
    State { module: String },
    /// Latest version, or a specific one
    Show {
        module: String,
        /// Version number to show
        #[arg(long = "at")]
        version: Option<VersionNumber>,
        /// Newest released version instead of the latest
        #[arg(long, conflicts_with = "version")]
        released: bool,
    },
    /// Full version chain
    Versions { module: String },
    /// Audit trail
    History { module: String },
    /// Recompute the audit hash chain
    Verify { module: String },
    /// Modules currently in a state
    List { state: WorkflowState },
    /// Write a snapshot and truncate the WAL
    Checkpoint,
}

#[derive(Args, Debug, Clone)]
pub struct ActorArgs {
    /// Id of the acting user
    #[arg(long = "actor")]
    pub id: String,

    /// Display name, defaults to the id
    #[arg(long = "actor-name")]
    pub name: Option<String>,

    /// Role to act in
    #[arg(long = "as")]
    pub role: Role,

    /// Roles the actor holds, defaults to the acting role
    #[arg(long, value_delimiter = ',')]
    pub roles: Vec<Role>,
}

impl ActorArgs {
    pub fn actor(&self) -> modflow::Result<Actor> {
        let roles = if self.roles.is_empty() {
            vec![self.role]
        } else {
            self.roles.clone()
        };
        let name = self.name.clone().unwrap_or_else(|| self.id.clone());
        Actor::new(self.id.clone(), name, roles)
    }
}

#[derive(Args, Debug, Clone)]
pub struct PayloadArgs {
    #[arg(long)]
    pub title: String,
    /// ECTS credits
    #[arg(long)]
    pub credits: u32,
    /// First semester the module is valid in
    #[arg(long)]
    pub semester: String,
    #[arg(long)]
    pub description: Option<String>,
    #[arg(long)]
    pub program: Option<String>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct EditArgs {
    #[arg(long)]
    pub title: Option<String>,
    #[arg(long)]
    pub credits: Option<u32>,
    #[arg(long)]
    pub semester: Option<String>,
    #[arg(long)]
    pub description: Option<String>,
    #[arg(long)]
    pub program: Option<String>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct OptionArgs {
    /// Fail unless this is still the latest version
    #[arg(long = "expect")]
    pub expected_version: Option<VersionNumber>,
    #[arg(long)]
    pub comment: Option<String>,
}
