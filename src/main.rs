//! Hypeloop admin: command-line front end over the dashboard views.

use std::process::ExitCode;

use chrono::Utc;
use clap::{Parser, Subcommand};

use hypeloop_lib::backend::{Session, SignUpOutcome};
use hypeloop_lib::board::BoardColumn;
use hypeloop_lib::error::DashboardError;
use hypeloop_lib::instagram;
use hypeloop_lib::state::AppState;
use hypeloop_lib::views::clients::ClientsView;
use hypeloop_lib::views::dashboard::DashboardView;
use hypeloop_lib::views::internal_ops::{author_name, TaskBoardView, UpdateLogView};
use hypeloop_lib::views::leads::{LeadFilter, LeadsView};
use hypeloop_lib::views::login::LoginView;
use hypeloop_lib::views::prospects::ProspectsView;

#[derive(Parser, Debug)]
#[command(name = "hypeloop", version, about = "Hypeloop admin dashboard")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
    /// Show configuration and session state
    Status,
    /// Sign in
    Login { email: String, password: String },
    /// Create an account
    Signup { email: String, password: String },
    /// Sign out
    Logout,
    /// Lead KPIs and the latest leads
    Dashboard,
    /// List leads, optionally filtered by status
    Leads { status: Option<String> },
    /// Possible-clients board
    Pipeline,
    /// Add a possible client
    Prospect {
        #[arg(value_name = "INSTAGRAM_URL")]
        url: String,
    },
    /// Client gallery
    Clients { search: Option<String> },
    /// Internal task board
    Tasks,
    /// Add a task to "Por Hacer"
    Task {
        #[arg(required = true, num_args = 1..)]
        content: Vec<String>,
    },
    /// Post to the team update log
    Log {
        #[arg(required = true, num_args = 1..)]
        content: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let state = AppState::load();
    match run(&state, cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(DashboardError::Unauthenticated) => {
            eprintln!("Not signed in. Run `hypeloop login <EMAIL> <PASSWORD>` first.");
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("{e}");
            if !matches!(e, DashboardError::Validation(_)) {
                eprintln!("{}", e.recovery_suggestion());
            }
            ExitCode::FAILURE
        }
    }
}

/// Resolve the session gate for a protected command.
async fn require_session(state: &AppState) -> Result<Session, DashboardError> {
    state.backend()?;
    let gate = state.session_gate();
    let resolved = gate.resolved().await;
    resolved.session().cloned().ok_or(DashboardError::Unauthenticated)
}

async fn run(state: &AppState, command: Command) -> Result<(), DashboardError> {
    match command {
        Command::Status => {
            match state.status.message() {
                Some(message) => println!("{message}"),
                None => println!("Backend: configured"),
            }
            if state.is_configured() {
                match state.session_gate().resolved().await.session() {
                    Some(session) => println!(
                        "Signed in as {}",
                        session.user.email.as_deref().unwrap_or(&session.user.id)
                    ),
                    None => println!("Signed out"),
                }
            }
            Ok(())
        }
        Command::Login { email, password } => {
            let session = LoginView::new(state).sign_in(&email, &password).await?;
            println!("Signed in as {}", session.user.email.as_deref().unwrap_or(&email));
            Ok(())
        }
        Command::Signup { email, password } => {
            match LoginView::new(state).sign_up(&email, &password).await? {
                SignUpOutcome::SignedIn(_) => println!("Account created, signed in as {email}"),
                SignUpOutcome::ConfirmationPending(_) => {
                    println!("Check {email} for a confirmation link, then log in.")
                }
            }
            Ok(())
        }
        Command::Logout => {
            LoginView::new(state).sign_out().await?;
            println!("Signed out");
            Ok(())
        }
        Command::Dashboard => {
            require_session(state).await?;
            let view = DashboardView::new(state.backend()?.tables.clone());
            let stats = view.refresh().await?;
            println!("Total leads:    {}", stats.total);
            println!("Leads today:    {}", stats.today);
            println!("Top service:    {}", stats.top_service);
            println!("\nLatest leads:");
            for lead in stats.recent {
                println!(
                    "  {}  {:<24} {}",
                    lead.created_at.format("%Y-%m-%d"),
                    lead.company_name.as_deref().unwrap_or("-"),
                    lead.status.as_str()
                );
            }
            Ok(())
        }
        Command::Leads { status } => {
            require_session(state).await?;
            let view = LeadsView::new(state.backend()?.tables.clone());
            view.refresh().await?;
            if let Some(status) = status {
                view.set_filter(LeadFilter::parse(&status));
            }
            for lead in view.visible() {
                println!(
                    "{:<8} {:<24} {:<16} {:<20} {}",
                    lead.id,
                    lead.company_name.as_deref().unwrap_or("-"),
                    lead.whatsapp.as_deref().unwrap_or("-"),
                    lead.service_interest.as_deref().unwrap_or("-"),
                    lead.status.as_str()
                );
            }
            Ok(())
        }
        Command::Pipeline => {
            require_session(state).await?;
            let view = ProspectsView::new(state.backend()?, state.stagnant_after());
            view.refresh().await?;
            for (status, cards) in view.columns(Utc::now()) {
                println!("{} ({})", status.title(), cards.len());
                for card in cards {
                    let flag = if card.stagnant { "  [stagnant]" } else { "" };
                    println!("  @{} {}{}", card.handle, card.prospect.instagram_url, flag);
                }
            }
            Ok(())
        }
        Command::Prospect { url } => {
            require_session(state).await?;
            let view = ProspectsView::new(state.backend()?, state.stagnant_after());
            let added = view.add(&url).await?;
            println!(
                "Added {} to \"Nuevo\"",
                instagram::display_handle(added.username.as_deref(), &added.instagram_url)
            );
            Ok(())
        }
        Command::Clients { search } => {
            require_session(state).await?;
            let view = ClientsView::new(state.backend()?);
            view.refresh().await?;
            if let Some(term) = search {
                view.set_search(&term);
            }
            for client in view.visible() {
                println!(
                    "{:<8} {:<24} {:<28} {:>10.2}",
                    client.id,
                    client.name,
                    client.email.as_deref().unwrap_or("-"),
                    client.amount_charged
                );
            }
            Ok(())
        }
        Command::Tasks => {
            require_session(state).await?;
            let view = TaskBoardView::new(state.backend()?.tables.clone());
            view.refresh().await?;
            for (column, tasks) in view.columns() {
                println!("{} ({})", column.title(), tasks.len());
                for task in tasks {
                    println!("  - {}", task.content);
                }
            }
            Ok(())
        }
        Command::Task { content } => {
            require_session(state).await?;
            let content = content.join(" ");
            let view = TaskBoardView::new(state.backend()?.tables.clone());
            let task = view.add(&content).await?;
            println!("Added task {}", task.id);
            Ok(())
        }
        Command::Log { content } => {
            require_session(state).await?;
            let backend = state.backend()?;
            let view = UpdateLogView::new(backend.tables.clone(), backend.auth.clone());
            let entry = view.add(&content.join(" ")).await?;
            println!("Posted as {}", author_name(entry.user_email.as_deref()));
            Ok(())
        }
    }
}
