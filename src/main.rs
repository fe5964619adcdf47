use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use studyplan::application::bootstrap::{bootstrap_workspace, load_session_settings, open_log_file};
use studyplan::application::session::{PlanSeed, PlanSession};
use studyplan::domain::models::{
    DayType, OptionalTaskDraft, RebalanceOptions, ResourceType, ScheduledTask, StudyResource,
};
use studyplan::infrastructure::config::read_timezone;
use studyplan::infrastructure::error::InfraError;
use studyplan::infrastructure::plan_repository::SqlitePlanRepository;
use studyplan::infrastructure::solver_client::ReqwestPlanSolver;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

type Session = PlanSession<ReqwestPlanSolver, SqlitePlanRepository>;

/// Study plan orchestration: edit a plan locally and rebalance it through the solver.
#[derive(Parser)]
#[command(name = "studyplan", version, about)]
struct Cli {
    /// Workspace holding config/, state/ and logs/.
    #[arg(long, global = true, default_value = ".")]
    workspace: PathBuf,

    /// Session whose plan is loaded.
    #[arg(long, global = true, default_value = "default")]
    session: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum Switch {
    On,
    Off,
}

impl Switch {
    fn enabled(self) -> bool {
        matches!(self, Switch::On)
    }
}

#[derive(Subcommand)]
enum Command {
    /// Create a new session with an empty schedule.
    Init {
        #[arg(long)]
        start: NaiveDate,
        #[arg(long)]
        end: NaiveDate,
        /// Topic in study order; repeat for each topic.
        #[arg(long = "topic")]
        topics: Vec<String>,
        /// JSON array of resources to seed the pool with.
        #[arg(long)]
        resources: Option<PathBuf>,
    },
    /// Print the plan, or a single day.
    Show {
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Flip a task between pending and completed.
    Toggle { date: NaiveDate, task_id: String },
    /// Append an optional task to a day.
    AddTask {
        date: NaiveDate,
        #[arg(long)]
        title: String,
        #[arg(long)]
        topic: String,
        #[arg(long)]
        minutes: u32,
        #[arg(long = "type", default_value = "other", value_parser = parse_wire::<ResourceType>)]
        task_type: ResourceType,
        #[arg(long)]
        resource_id: Option<String>,
    },
    /// Replace a day's tasks with a JSON array read from a file.
    ReplaceDay {
        date: NaiveDate,
        #[arg(long)]
        file: PathBuf,
    },
    /// Move a task within a day.
    ReorderTasks {
        date: NaiveDate,
        from: usize,
        to: usize,
    },
    /// Mark every task pending again.
    Reset,
    /// Add minutes to a task's logged study time.
    LogTime { task_id: String, minutes: u32 },
    /// Set the exception rule for a date.
    AddRule {
        date: NaiveDate,
        #[arg(long = "type", value_parser = parse_wire::<DayType>)]
        day_type: DayType,
        #[arg(long)]
        minutes: Option<u32>,
    },
    RemoveRule { date: NaiveDate },
    /// Move a topic within the topic order.
    ReorderTopic {
        from: usize,
        to: usize,
        #[arg(long)]
        cram: bool,
    },
    /// Set a topic deadline; omit --date to clear it.
    Deadline {
        topic: String,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    Cram { state: Switch },
    Interleave { state: Switch },
    /// Re-resolve day capacities from planner.json.
    RefreshCapacity,
    /// Ask the solver to regenerate the schedule.
    Rebalance {
        #[arg(long)]
        reset: bool,
    },
    Undo,
    /// Summarize the resource pool.
    Pool,
    #[command(subcommand)]
    Resource(ResourceCommand),
    /// Export a date-bounded slice of the plan.
    Report {
        #[arg(long)]
        start: Option<NaiveDate>,
        #[arg(long)]
        end: Option<NaiveDate>,
    },
    /// The date to open the plan on, in the configured timezone.
    Focus,
    /// Recent rebalance requests and their outcomes.
    History {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum ResourceCommand {
    /// Add a resource from a JSON file.
    Add { file: PathBuf },
    /// Replace a resource from a JSON file.
    Update { file: PathBuf },
    Archive { id: String },
    Restore { id: String },
    /// Delete a resource and prune its pending tasks.
    Delete { id: String },
}

fn parse_wire<T: DeserializeOwned>(raw: &str) -> Result<T, String> {
    serde_json::from_value(serde_json::Value::String(raw.trim().to_string()))
        .map_err(|error| format!("unknown value '{raw}': {error}"))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, InfraError> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

/// Logs to stderr and to `logs/studyplan.log` under the workspace.
fn init_tracing(workspace: &Path) {
    let (log_file, open_error) = match open_log_file(workspace) {
        Ok(file) => (Some(file), None),
        Err(error) => (None, Some(error)),
    };
    let file_layer = log_file.map(|file| {
        fmt::layer()
            .with_ansi(false)
            .with_writer(Mutex::new(file))
    });

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    if let Some(error) = open_error {
        tracing::warn!(error = %error, "log file unavailable, logging to stderr only");
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli.workspace);

    match run(cli).await {
        Ok(output) => match serde_json::to_string_pretty(&output) {
            Ok(formatted) => {
                println!("{formatted}");
                ExitCode::SUCCESS
            }
            Err(error) => {
                tracing::error!(error = %error, "failed to format output");
                ExitCode::FAILURE
            }
        },
        Err(error) => {
            tracing::error!(error = %error, "command failed");
            eprintln!("error: {error}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<serde_json::Value, InfraError> {
    let workspace = bootstrap_workspace(&cli.workspace)?;
    let (settings, solver_settings) = load_session_settings(&workspace.config_dir)?;
    let solver = Arc::new(ReqwestPlanSolver::new(
        &solver_settings.endpoint,
        solver_settings.timeout,
    )?);
    let repository = Arc::new(SqlitePlanRepository::new(&workspace.database_path));

    let command = match cli.command {
        Command::Init {
            start,
            end,
            topics,
            resources,
        } => {
            let resources: Vec<StudyResource> = match resources {
                Some(path) => read_json(&path)?,
                None => Vec::new(),
            };
            let seed = PlanSeed {
                start_date: start,
                end_date: end,
                topic_order: topics,
                resources,
            };
            let session = Session::create(&cli.session, seed, solver, repository, settings)?;
            return Ok(json!({
                "session": session.session_id(),
                "databasePath": workspace.database_path.display().to_string(),
                "plan": session.plan()?,
            }));
        }
        command => command,
    };

    let session = Session::open(&cli.session, solver, repository, settings)?;
    let output = match command {
        Command::Init { .. } => {
            return Err(InfraError::Validation("session already initialized".to_string()));
        }
        Command::Show { date } => match date {
            Some(date) => json!({ "day": session.plan()?.day(date).cloned() }),
            None => json!({ "plan": session.plan()?, "sync": session.sync_status()? }),
        },
        Command::Toggle { date, task_id } => {
            changed(&session, session.toggle_task_status(date, &task_id)?).await?
        }
        Command::AddTask {
            date,
            title,
            topic,
            minutes,
            task_type,
            resource_id,
        } => {
            let draft = OptionalTaskDraft {
                title,
                resource_id,
                task_type,
                topic,
                duration_minutes: minutes,
                pages: None,
                case_count: None,
                question_count: None,
                chapter_number: None,
            };
            let task_id = session.add_optional_task(date, &draft)?;
            let mut output = changed(&session, true).await?;
            output["taskId"] = json!(task_id);
            output
        }
        Command::ReplaceDay { date, file } => {
            let tasks: Vec<ScheduledTask> = read_json(&file)?;
            session.replace_day_tasks(date, tasks)?;
            changed(&session, true).await?
        }
        Command::ReorderTasks { date, from, to } => {
            changed(&session, session.reorder_day_tasks(date, from, to)?).await?
        }
        Command::Reset => changed(&session, session.master_reset()?).await?,
        Command::LogTime { task_id, minutes } => {
            changed(&session, session.log_study_time(&task_id, minutes)?).await?
        }
        Command::AddRule {
            date,
            day_type,
            minutes,
        } => {
            session.add_exception_rule(date, day_type, minutes)?;
            changed(&session, true).await?
        }
        Command::RemoveRule { date } => {
            changed(&session, session.remove_exception_rule(date)?).await?
        }
        Command::ReorderTopic { from, to, cram } => {
            changed(&session, session.reorder_topics(from, to, cram)?).await?
        }
        Command::Deadline { topic, date } => {
            changed(&session, session.set_topic_deadline(&topic, date)?).await?
        }
        Command::Cram { state } => {
            changed(&session, session.set_cram_mode(state.enabled())?).await?
        }
        Command::Interleave { state } => {
            changed(&session, session.set_special_topics_interleaved(state.enabled())?).await?
        }
        Command::RefreshCapacity => changed(&session, session.refresh_day_policies()?).await?,
        Command::Rebalance { reset } => {
            let options = if reset {
                RebalanceOptions::Reset
            } else {
                RebalanceOptions::Standard
            };
            let outcome = session.rebalance(options).await?;
            json!({ "rebalance": outcome, "sync": session.sync_status()? })
        }
        Command::Undo => changed(&session, session.undo()?).await?,
        Command::Pool => json!({ "pool": session.pool_summary()? }),
        Command::Resource(command) => {
            let changed_pool = match command {
                ResourceCommand::Add { file } => {
                    session.add_resource(read_json(&file)?)?;
                    true
                }
                ResourceCommand::Update { file } => session.update_resource(read_json(&file)?)?,
                ResourceCommand::Archive { id } => session.archive_resource(&id)?,
                ResourceCommand::Restore { id } => session.restore_resource(&id)?,
                ResourceCommand::Delete { id } => session.delete_resource(&id)?,
            };
            let mut output = changed(&session, changed_pool).await?;
            output["pool"] = json!(session.pool_summary()?);
            output
        }
        Command::Report { start, end } => json!({ "report": session.report(start, end)? }),
        Command::Focus => {
            let timezone = read_timezone(&workspace.config_dir)?;
            let today = Utc::now().with_timezone(&timezone).date_naive();
            json!({ "today": today, "focusDate": session.focus_date(today)? })
        }
        Command::History { limit } => json!({ "history": session.rebalance_history(limit)? }),
    };
    Ok(output)
}

/// Issues any rebalance the edit scheduled and reports the result.
async fn changed(session: &Session, changed: bool) -> Result<serde_json::Value, InfraError> {
    let rebalance = session.flush_follow_up().await?;
    Ok(json!({
        "changed": changed,
        "rebalance": rebalance,
        "canUndo": session.can_undo()?,
        "sync": session.sync_status()?,
    }))
}
