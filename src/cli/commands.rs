//! `orc` command surface: a thin operator harness over the service layer.

use clap::{Parser, Subcommand};
use std::sync::Arc;

use crate::domain::models::{ApprovalId, ApprovalStatus, Task};
use crate::domain::ports::TaskRepository;
use crate::infrastructure::config::Config;
use crate::infrastructure::database::SqliteStore;
use crate::services::{ApprovalManager, EventBus, MetricsCollector, TaskManager};

#[derive(Parser)]
#[command(name = "orc", about = "Operator CLI for the orchestra-core runtime", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Task graph operations.
    Task {
        #[command(subcommand)]
        action: TaskAction,
    },
    /// Pending human-in-the-loop approvals.
    Approval {
        #[command(subcommand)]
        action: ApprovalAction,
    },
    /// Ring-buffered agent/swarm metrics.
    Metrics,
    /// Run the daemon loop: periodic approval/subagent recovery sweeps.
    Serve,
}

#[derive(Subcommand)]
pub enum TaskAction {
    /// Submit a new task.
    Submit {
        subject: String,
        #[arg(long)]
        description: Option<String>,
    },
    /// List every task.
    List,
}

#[derive(Subcommand)]
pub enum ApprovalAction {
    /// List pending approvals.
    List,
    /// Decide a pending request.
    Decide {
        id: String,
        #[arg(long, value_enum)]
        decision: CliDecision,
        #[arg(long, default_value = "operator")]
        decided_by: String,
    },
}

/// Operator-facing decision options, narrower than [`ApprovalStatus`] since
/// `Pending`/`Timeout` are never valid decisions a human makes.
#[derive(Clone, Copy, clap::ValueEnum)]
pub enum CliDecision {
    AllowOnce,
    AllowSession,
    Deny,
}

impl From<CliDecision> for ApprovalStatus {
    fn from(decision: CliDecision) -> Self {
        match decision {
            CliDecision::AllowOnce => ApprovalStatus::AllowOnce,
            CliDecision::AllowSession => ApprovalStatus::AllowSession,
            CliDecision::Deny => ApprovalStatus::Denied,
        }
    }
}

pub struct AppContext {
    pub store: SqliteStore,
    pub events: Arc<EventBus>,
    pub task_manager: Arc<TaskManager>,
    pub approval_manager: Arc<ApprovalManager>,
    pub metrics: Arc<MetricsCollector>,
}

impl AppContext {
    pub async fn bootstrap(config: &Config) -> anyhow::Result<Self> {
        let store = SqliteStore::open(&config.database.path).await?;
        let events = Arc::new(EventBus::new());
        let task_manager = Arc::new(TaskManager::new(Arc::new(store.tasks.clone()), events.clone()));
        let approval_manager =
            Arc::new(ApprovalManager::new(Arc::new(store.approvals.clone()), events.clone(), config.approval.clone()));
        let metrics = Arc::new(MetricsCollector::new(100, events.clone()));
        Ok(Self { store, events, task_manager, approval_manager, metrics })
    }
}

pub async fn run(cli: Cli, config: &Config) -> anyhow::Result<()> {
    let ctx = AppContext::bootstrap(config).await?;

    match cli.command {
        Command::Task { action } => run_task_action(&ctx, action).await,
        Command::Approval { action } => run_approval_action(&ctx, action).await,
        Command::Metrics => {
            let summary = ctx.metrics.get_summary().await;
            println!(
                "tokens={} tool_uses={} agents={}",
                summary.total_tokens, summary.total_tool_uses, summary.agent_count
            );
            Ok(())
        }
        Command::Serve => run_daemon(ctx).await,
    }
}

async fn run_task_action(ctx: &AppContext, action: TaskAction) -> anyhow::Result<()> {
    match action {
        TaskAction::Submit { subject, description } => {
            let task = Task::new(subject, description.unwrap_or_default());
            let id = ctx.task_manager.submit(task).await?;
            println!("submitted task {id}");
        }
        TaskAction::List => {
            let tasks = ctx.store.tasks.list_all().await?;
            print!("{}", super::output::format_tasks(&tasks));
        }
    }
    Ok(())
}

async fn run_approval_action(ctx: &AppContext, action: ApprovalAction) -> anyhow::Result<()> {
    match action {
        ApprovalAction::List => {
            let pending = ctx.approval_manager.list_pending().await?;
            print!("{}", super::output::format_approvals(&pending));
        }
        ApprovalAction::Decide { id, decision, decided_by } => {
            let id = ApprovalId::parse(&id)?;
            let decision: ApprovalStatus = decision.into();
            ctx.approval_manager.decide(id, decision, decided_by).await?;
            println!("decided {id}: {}", decision.as_str());
        }
    }
    Ok(())
}

/// Run the process as a long-lived daemon: periodic crash-recovery sweeps
/// for approvals and orphaned subagents, until `Ctrl-C`.
async fn run_daemon(ctx: AppContext) -> anyhow::Result<()> {
    let recovered = ctx.approval_manager.recover_pending().await?;
    tracing::info!(count = recovered.len(), "recovered orphaned approvals at startup");

    let approval_manager = ctx.approval_manager.clone();
    let sweep_handle = tokio::spawn(async move {
        loop {
            tokio::time::sleep(std::time::Duration::from_secs(30)).await;
            if let Err(err) = approval_manager.sweep_expired().await {
                tracing::warn!(error = %err, "approval sweep failed");
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    sweep_handle.abort();
    tracing::info!("shutting down");
    Ok(())
}

