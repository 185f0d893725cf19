mod application;
mod console;
mod domain;
mod infrastructure;

use application::commands::{AppState, restore_session_impl};
use clap::Parser;
use console::run_console;
use infrastructure::error::InfraError;
use infrastructure::logging::init_logging;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "discipline-timer", version, about = "Synchronized focus timer")]
struct Args {
    /// Directory holding config/, state/ and logs/. Defaults to the current directory.
    #[arg(long)]
    workspace: Option<PathBuf>,
    /// Keep timer documents in memory instead of syncing with Firebase.
    #[arg(long)]
    offline: bool,
}

pub fn run() {
    if let Err(error) = try_run(Args::parse()) {
        eprintln!("discipline-timer: {error}");
        std::process::exit(1);
    }
}

fn try_run(args: Args) -> Result<(), InfraError> {
    let workspace_root = match args.workspace {
        Some(path) => path,
        None => std::env::current_dir()?,
    };
    let log_path = init_logging(&workspace_root.join("logs"))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async move {
        let state = AppState::new(workspace_root, args.offline)?;
        state.log_info(
            "startup",
            &format!(
                "config {} | database {} | log {}",
                state.config_dir().display(),
                state.database_path().display(),
                log_path.display()
            ),
        );

        match restore_session_impl(&state).await {
            Ok(Some(outcome)) => println!("Signed in. Next: {:?}", outcome.route),
            Ok(None) => println!("Not signed in. Use login or signup."),
            Err(error) => println!("{}", state.command_error("restore_session", &error)),
        }

        run_console(&state).await?;
        state.shutdown().await
    })
}
