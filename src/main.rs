//! namesake - a turn orchestrator that remembers a user's name across threads
//!
//! Runs three scripted turns against the Gemini oracle: a user introduces
//! themselves on one thread, is recognized on a second, and a different user
//! on a third is not. `--strategy` picks the phase graph, the session-scoped
//! runner, or both.

mod config;
mod db;
mod directive;
mod llm;
mod managed;
mod runtime;
mod state_machine;
mod tools;

use clap::Parser;
use config::Cli;
use db::{
    CheckpointDatabase, SessionDatabase, UserDatabase, CHECKPOINT_DB_FILE, SESSION_DB_FILE,
    USER_DB_FILE,
};
use llm::{LlmConfig, LlmService};
use managed::ManagedRunner;
use runtime::{production_orchestrator, LlmOracle, ProductionOrchestrator, TurnError};
use std::path::Path;
use std::sync::Arc;
use tools::ToolRegistry;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// (label, `user_id`, `thread_id`, message)
const DEMO_RUNS: [(&str, &str, &str, &str); 3] = [
    ("Run 1: John introduces himself", "user_John", "session_789", "Hi, my name is John."),
    ("Run 2: John returns on a new thread", "user_John", "session_101", "What is my name?"),
    ("Run 3: Jane has never been seen", "user_Jane", "session_202", "Do you know my name?"),
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(&cli);

    std::fs::create_dir_all(&cli.data_dir)?;

    // Built once, shared by every turn
    let llm = LlmConfig::from_env().build_service(&cli.model)?;
    tracing::info!(model = %cli.model, strategy = ?cli.strategy, "Oracle initialized");

    if cli.strategy.runs_graph() {
        println!("\n=== Graph strategy ===");
        run_graph(&cli, llm.clone()).await?;
    }
    if cli.strategy.runs_managed() {
        println!("\n=== Session-scoped strategy ===");
        run_managed(&cli, llm).await?;
    }
    Ok(())
}

async fn run_graph(
    cli: &Cli,
    llm: Arc<dyn LlmService>,
) -> Result<(), Box<dyn std::error::Error>> {
    let user_db_path = cli.data_dir.join(USER_DB_FILE);
    let checkpoint_db_path = cli.data_dir.join(CHECKPOINT_DB_FILE);

    tracing::info!(path = %user_db_path.display(), "Opening user database");
    let users = UserDatabase::open(&user_db_path)?;
    tracing::info!(path = %checkpoint_db_path.display(), "Opening checkpoint database");
    let checkpoints = CheckpointDatabase::open(&checkpoint_db_path)?;

    let orchestrator =
        production_orchestrator(users.clone(), checkpoints, llm, cli.orchestrator_config());
    let outcome = run_demo(&orchestrator, &users).await;

    drop(orchestrator);
    drop(users);
    cleanup(cli, &[&user_db_path, &checkpoint_db_path])?;
    outcome
}

async fn run_managed(
    cli: &Cli,
    llm: Arc<dyn LlmService>,
) -> Result<(), Box<dyn std::error::Error>> {
    let session_db_path = cli.data_dir.join(SESSION_DB_FILE);
    // Every demo run starts from an empty session store
    db::remove_database_files(&[&session_db_path])?;

    tracing::info!(path = %session_db_path.display(), "Opening session database");
    let sessions = SessionDatabase::open(&session_db_path)?;
    let oracle = LlmOracle::new(llm, ToolRegistry::session_scoped().definitions());
    let runner = ManagedRunner::new(sessions, oracle, cli.max_tool_rounds);
    let outcome = run_managed_demo(&runner).await;

    drop(runner);
    cleanup(cli, &[&session_db_path])?;
    outcome
}

fn cleanup<P: AsRef<Path>>(cli: &Cli, paths: &[P]) -> Result<(), Box<dyn std::error::Error>> {
    if cli.keep_data {
        tracing::info!(dir = %cli.data_dir.display(), "Keeping database files");
    } else {
        db::remove_database_files(paths)?;
        tracing::info!("Removed database files");
    }
    Ok(())
}

fn init_tracing(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| cli.default_log_filter().into());
    let json = cli.json_logs.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(false)
            .with_span_list(false)
    });
    let plain = (!cli.json_logs).then(tracing_subscriber::fmt::layer);

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(plain)
        .init();
}

async fn run_demo(
    orchestrator: &ProductionOrchestrator,
    users: &UserDatabase,
) -> Result<(), Box<dyn std::error::Error>> {
    for (i, (label, user_id, thread_id, message)) in DEMO_RUNS.iter().enumerate() {
        println!("\n--- {label} ---");
        println!("User ({user_id}): {message}");

        let text = match orchestrator.handle_turn(user_id, thread_id, message).await {
            Ok(reply) => reply.text,
            Err(TurnError::Checkpoint {
                reply: Some(text),
                message,
            }) => {
                tracing::warn!(
                    thread_id = %thread_id,
                    error = %message,
                    "Reply delivered but not checkpointed"
                );
                text
            }
            Err(e) => return Err(e.into()),
        };
        println!("AI: {text}");

        if i == 0 {
            let stored = users.get_user_name(user_id)?;
            tracing::info!(
                user_id = %user_id,
                user_name = ?stored,
                "Durable store after first run"
            );
        }
    }
    Ok(())
}

async fn run_managed_demo(
    runner: &ManagedRunner<SessionDatabase, LlmOracle>,
) -> Result<(), Box<dyn std::error::Error>> {
    for (label, user_id, session_id, message) in DEMO_RUNS {
        println!("\n--- {label} ---");
        let session = runner.create_session(user_id, session_id).await?;
        tracing::debug!(
            app = %session.app_name,
            user_id = %session.user_id,
            session_id = %session.session_id,
            state = ?session.state,
            "Initial state"
        );

        println!("User ({user_id}): {message}");
        let text = runner.run_turn(user_id, session_id, message).await?;
        println!("AI: {text}");
    }
    Ok(())
}
