use crate::application::commands::{
    AppState, check_username_impl, claim_username_impl, focus_summary_impl, login_impl,
    logout_impl, signup_impl, timer_intent_impl, timer_state_impl,
};
use crate::application::timer_sync::TimerIntent;
use crate::domain::standby::StandbyKey;
use crate::domain::view::TimerView;
use crate::infrastructure::error::InfraError;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

const HELP: &str = "\
commands:
  toggle | start | pause | reset | finish
  duration <minutes>        set the session length (idle only)
  task <name>               rename the current task (idle only)
  standby | wake            enter or leave standby
  key <Space|Escape>        standby keyboard input
  signup <name> <email> <password> <confirm>
  login <email> <password>
  logout
  username check <name>
  username claim <name>
  summary [days] [YYYY-MM-DD]
  status | help | quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Timer(TimerIntent),
    Signup {
        name: String,
        email: String,
        password: String,
        confirm_password: String,
    },
    Login {
        email: String,
        password: String,
    },
    Logout,
    CheckUsername(String),
    ClaimUsername(String),
    Summary {
        days: Option<u32>,
        end_date: Option<String>,
    },
    Status,
    Help,
    Quit,
}

/// Parses one input line. Blank lines yield `Ok(None)`.
pub fn parse_command(line: &str) -> Result<Option<ConsoleCommand>, String> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Ok(None);
    };
    let rest: Vec<&str> = words.collect();

    let command = match (head.to_ascii_lowercase().as_str(), rest.as_slice()) {
        ("toggle" | "t", []) => ConsoleCommand::Timer(TimerIntent::Toggle),
        ("start", []) => ConsoleCommand::Timer(TimerIntent::Start),
        ("pause", []) => ConsoleCommand::Timer(TimerIntent::Pause),
        ("reset", []) => ConsoleCommand::Timer(TimerIntent::Reset),
        ("finish", []) => ConsoleCommand::Timer(TimerIntent::Finish),
        ("duration", [minutes]) => {
            let minutes = minutes
                .parse::<i64>()
                .map_err(|_| format!("'{minutes}' is not a whole number of minutes"))?;
            ConsoleCommand::Timer(TimerIntent::SetDurationMinutes(minutes))
        }
        ("task", name) if !name.is_empty() => {
            ConsoleCommand::Timer(TimerIntent::RenameTask(name.join(" ")))
        }
        ("standby", []) => ConsoleCommand::Timer(TimerIntent::EnterStandby),
        ("wake", []) => ConsoleCommand::Timer(TimerIntent::ExitStandby),
        ("key", [code]) => {
            ConsoleCommand::Timer(TimerIntent::StandbyKey(StandbyKey::from_code(code)))
        }
        ("signup", [name, email, password, confirm]) => ConsoleCommand::Signup {
            name: (*name).to_string(),
            email: (*email).to_string(),
            password: (*password).to_string(),
            confirm_password: (*confirm).to_string(),
        },
        ("login", [email, password]) => ConsoleCommand::Login {
            email: (*email).to_string(),
            password: (*password).to_string(),
        },
        ("logout", []) => ConsoleCommand::Logout,
        ("username", ["check", name @ ..]) if !name.is_empty() => {
            ConsoleCommand::CheckUsername(name.join(" "))
        }
        ("username", ["claim", name @ ..]) if !name.is_empty() => {
            ConsoleCommand::ClaimUsername(name.join(" "))
        }
        ("summary", args) if args.len() <= 2 => {
            let days = match args.first() {
                Some(raw) => Some(
                    raw.parse::<u32>()
                        .map_err(|_| format!("'{raw}' is not a number of days"))?,
                ),
                None => None,
            };
            ConsoleCommand::Summary {
                days,
                end_date: args.get(1).map(|raw| (*raw).to_string()),
            }
        }
        ("status", []) => ConsoleCommand::Status,
        ("help" | "?", []) => ConsoleCommand::Help,
        ("quit" | "exit" | "q", []) => ConsoleCommand::Quit,
        _ => return Err(format!("unrecognized command '{}'; type help", line.trim())),
    };
    Ok(Some(command))
}

pub fn render_view(view: &TimerView) -> String {
    if view.standby {
        let digits = view.flip_digits();
        let clock = match digits.hours {
            Some(hours) => format!("{hours:02}:{:02}:{:02}", digits.minutes, digits.seconds),
            None => format!("{:02}:{:02}", digits.minutes, digits.seconds),
        };
        let controls = if view.controls_visible { "  [Space] toggle  [Esc] exit" } else { "" };
        return format!("{clock}  {}{controls}", view.standby_status_text());
    }
    format!(
        "{}  {}  {} ({:.0}% left)  {}",
        view.window_title(),
        view.status_text(),
        view.task_name,
        view.progress_fraction() * 100.0,
        view.sync_label()
    )
}

/// Interactive loop over stdin. Returns when the user quits or input ends.
pub async fn run_console(state: &AppState) -> Result<(), InfraError> {
    let mut views = state.timer().watch_view();
    let mut notices = state.timer().subscribe_notices();
    let renderer = tokio::spawn(async move {
        let mut last_line = String::new();
        loop {
            tokio::select! {
                changed = views.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let line = render_view(&views.borrow_and_update());
                    if line != last_line {
                        println!("{line}");
                        last_line = line;
                    }
                }
                notice = notices.recv() => match notice {
                    Ok(summary) => println!("{}", summary.message()),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "console missed session notices");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
    });

    println!("{} focus timer. Type help for commands.", state.app_name());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let command = match parse_command(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(message) => {
                println!("{message}");
                continue;
            }
        };
        if command == ConsoleCommand::Quit {
            break;
        }
        let in_standby = state.timer().watch_view().borrow().standby;
        if in_standby {
            if let Err(error) = state.timer().dispatch(TimerIntent::Activity).await {
                tracing::warn!(%error, "standby activity not recorded");
            }
        }
        if let Some(reply) = execute(state, command).await {
            println!("{reply}");
        }
    }

    renderer.abort();
    Ok(())
}

async fn execute(state: &AppState, command: ConsoleCommand) -> Option<String> {
    let (name, result) = match command {
        ConsoleCommand::Timer(intent) => (
            "timer",
            timer_intent_impl(state, intent).await.map(|view| render_view(&view)),
        ),
        ConsoleCommand::Signup {
            name,
            email,
            password,
            confirm_password,
        } => (
            "signup",
            signup_impl(state, name, email, password, confirm_password)
                .await
                .map(|outcome| format!("Account created. Next: {:?}", outcome.route)),
        ),
        ConsoleCommand::Login { email, password } => (
            "login",
            login_impl(state, email, password)
                .await
                .map(|outcome| format!("Signed in. Next: {:?}", outcome.route)),
        ),
        ConsoleCommand::Logout => (
            "logout",
            logout_impl(state).await.map(|()| "Signed out.".to_string()),
        ),
        ConsoleCommand::CheckUsername(raw) => (
            "check_username",
            check_username_impl(state, raw).await.map(|check| check.message),
        ),
        ConsoleCommand::ClaimUsername(raw) => (
            "claim_username",
            claim_username_impl(state, raw)
                .await
                .map(|name| format!("You are @{name}.")),
        ),
        ConsoleCommand::Summary { days, end_date } => (
            "focus_summary",
            focus_summary_impl(state, end_date, days).await.map(|summary| {
                let mut lines = summary
                    .days
                    .iter()
                    .map(|day| format!("{}  {:>4} min", day.date, day.focus_ms / 60_000))
                    .collect::<Vec<_>>();
                lines.push(format!("total {} min", summary.total_ms / 60_000));
                for (task, ms) in &summary.by_task {
                    lines.push(format!("  {task}: {} min", ms / 60_000));
                }
                lines.join("\n")
            }),
        ),
        ConsoleCommand::Status => (
            "timer_state",
            timer_state_impl(state).await.map(|view| render_view(&view)),
        ),
        ConsoleCommand::Help => return Some(HELP.to_string()),
        ConsoleCommand::Quit => return None,
    };
    Some(result.unwrap_or_else(|error| state.command_error(name, &error)))
}
