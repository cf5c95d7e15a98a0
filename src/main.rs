use chatdash::config::Settings;
use chatdash::protocol::{ChatMessage, Period, Role};
use chatdash::{ApiClient, dashboard, logging, ui, write_reply};
use clap::{Parser, Subcommand};
use std::process::ExitCode;

type CliResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

#[derive(Parser)]
#[command(name = "chatdash", version)]
#[command(about = "Dashboard and streaming chat for the analytics API")]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print dashboard stats for a period
    Stats {
        #[arg(short, long, value_enum, default_value_t = Period::Week)]
        period: Period,
        /// Print the raw JSON snapshot
        #[arg(long)]
        json: bool,
    },
    /// Full-screen dashboard with metric cards and chart
    Dashboard {
        #[arg(short, long, value_enum, default_value_t = Period::Week)]
        period: Period,
    },
    /// Print this session's chat history
    History {
        #[arg(long)]
        json: bool,
    },
    /// Send one message and stream the reply to stdout
    Send {
        #[arg(required = true, num_args = 1..)]
        message: Vec<String>,
    },
    /// Interactive chat (default)
    Chat,
    /// Show the chat session id
    Session {
        /// Forget the current id; the next chat starts a new history
        #[arg(long)]
        reset: bool,
    },
}

impl Command {
    fn is_interactive(&self) -> bool {
        matches!(self, Command::Dashboard { .. } | Command::Chat)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Command::Chat);

    let log_file = cli.settings.log_file_for(command.is_interactive());
    if let Err(err) = logging::init(&cli.settings.log_level, log_file.as_deref()) {
        eprintln!("warning: logging disabled: {err}");
    }

    match run(&cli.settings, command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "command failed");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(settings: &Settings, command: Command) -> CliResult<()> {
    let client = ApiClient::new(settings.client_config())?;
    let sessions = settings.session_store();

    match command {
        Command::Stats { period, json } => {
            let stats = client.fetch_stats(period).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print!("{}", dashboard::render_report(&stats, period));
            }
        }
        Command::Dashboard { period } => {
            tokio::task::block_in_place(|| dashboard::run_dashboard(client, period))?;
        }
        Command::History { json } => {
            let session_id = sessions.load_or_create()?;
            let history = client.chat_history(&session_id).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&history)?);
            } else {
                print_history(&history);
            }
        }
        Command::Send { message } => {
            let session_id = sessions.load_or_create()?;
            let reply = client.send_message(&session_id, &message.join(" ")).await;
            write_reply(reply, &mut std::io::stdout()).await?;
        }
        Command::Chat => {
            let session_id = sessions.load_or_create()?;
            tokio::task::block_in_place(|| ui::run_chat(client, session_id))?;
        }
        Command::Session { reset } => {
            if reset {
                sessions.reset()?;
                println!("session reset ({})", sessions.path().display());
            } else {
                println!("{}", sessions.load_or_create()?);
            }
        }
    }

    Ok(())
}

fn print_history(history: &[ChatMessage]) {
    if history.is_empty() {
        println!("No messages yet.");
        return;
    }

    for message in history {
        let who = match message.role {
            Role::User => "you",
            Role::Assistant => "assistant",
        };
        match message.timestamp() {
            Some(ts) => println!("[{}] {who}:", ts.format("%Y-%m-%d %H:%M")),
            None => println!("{who}:"),
        }
        for line in message.content.lines() {
            println!("  {line}");
        }
    }
}
