//! CLI command definitions, routing, and tracing setup.

use std::net::SocketAddr;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use deepresearch_shared::{
    AppConfig, HistoryStore, OutcomeStatus, ProgressStatus, ResearchId, ResearchOutcome,
    init_config, load_config,
};
use deepresearch_storage::LibsqlHistory;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use crate::engine::Engine;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// DeepResearch: researched, fact-checked answers to questions.
#[derive(Parser)]
#[command(
    name = "deepresearch",
    version,
    about = "Answer questions through web research, drafting and fact checking.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Research a question and print the answer.
    Ask {
        /// The question to research.
        question: String,

        /// Run in the background and follow live progress events.
        #[arg(long)]
        stream: bool,

        /// Print the outcome as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Start the HTTP server.
    Serve {
        /// Address to bind (defaults to `[server].host`).
        #[arg(long)]
        host: Option<String>,

        /// Port to bind (defaults to `[server].port`).
        #[arg(long)]
        port: Option<u16>,
    },

    /// Inspect or clear past research.
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// History subcommands.
#[derive(Subcommand)]
pub(crate) enum HistoryAction {
    /// List saved research, newest first.
    List,
    /// Show one saved answer.
    Show {
        /// Research id.
        id: String,
    },
    /// Delete all saved research.
    Clear,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "deepresearch=info",
        1 => "deepresearch=debug",
        _ => "deepresearch=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Ask {
            question,
            stream,
            json,
        } => cmd_ask(&question, stream, json).await,
        Command::Serve { host, port } => cmd_serve(host, port).await,
        Command::History { action } => match action {
            HistoryAction::List => cmd_history_list().await,
            HistoryAction::Show { id } => cmd_history_show(&id).await,
            HistoryAction::Clear => cmd_history_clear().await,
        },
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// Research
// ---------------------------------------------------------------------------

async fn cmd_ask(question: &str, stream: bool, json: bool) -> Result<()> {
    let question = question.trim();
    if question.is_empty() {
        return Err(eyre!("no question provided"));
    }

    let engine = Engine::build(load_config()?).await?;
    info!(question, stream, "starting research");

    let spinner = spinner();
    let outcome = if stream {
        follow_progress(&engine, question, &spinner).await?
    } else {
        spinner.set_message("Researching...");
        engine.sync_runner().run(question).await
    };
    spinner.finish_and_clear();

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print_outcome(&outcome);
    }

    match outcome.status {
        OutcomeStatus::Success | OutcomeStatus::Partial => Ok(()),
        _ => Err(eyre!("research failed: {}", outcome.answer)),
    }
}

/// Submit to the async runner and mirror its progress events on the spinner.
async fn follow_progress(
    engine: &Engine,
    question: &str,
    spinner: &ProgressBar,
) -> Result<ResearchOutcome> {
    let (runner, streamer) = engine.async_runner();
    let task_id = runner.submit(question)?;
    let mut updates = streamer.stream(&task_id)?;

    while let Some(update) = updates.next().await {
        if update.status != ProgressStatus::Heartbeat {
            spinner.set_message(format!("[{:>3}%] {}", update.progress, update.message));
        }
        if update.is_terminal() {
            return update
                .result
                .ok_or_else(|| eyre!("task {task_id} ended without a result"));
        }
    }
    Err(eyre!("progress stream for {task_id} closed early"))
}

fn spinner() -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
        spinner.set_style(
            style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
    }
    spinner.enable_steady_tick(Duration::from_millis(80));
    spinner
}

fn print_outcome(outcome: &ResearchOutcome) {
    println!();
    println!("{}", outcome.answer);
    println!();
    if !outcome.sources.is_empty() {
        println!("  Sources:");
        for (i, source) in outcome.sources.iter().enumerate() {
            println!("  {}. {} - {}", i + 1, source.title, source.url);
        }
        println!();
    }
    println!("  Status: {}", outcome.status.as_str());
    if let Some(id) = outcome.id {
        println!("  Saved:  {id}");
    }
    for error in &outcome.errors {
        println!("  Error:  {error}");
    }
    println!();
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

async fn cmd_serve(host: Option<String>, port: Option<u16>) -> Result<()> {
    let engine = Engine::build(load_config()?).await?;
    let host = host.unwrap_or_else(|| engine.config.server.host.clone());
    let port = port.unwrap_or(engine.config.server.port);
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .map_err(|e| eyre!("invalid listen address '{host}:{port}': {e}"))?;

    println!("Serving DeepResearch on http://{addr}");
    deepresearch_server::serve(addr, engine.app_state()).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

/// Open the history database read-only, or `None` if nothing was saved yet.
async fn open_history_readonly(config: &AppConfig) -> Result<Option<LibsqlHistory>> {
    let path = config.defaults.history_db_path()?;
    if !path.exists() {
        return Ok(None);
    }
    Ok(Some(LibsqlHistory::open_readonly(&path).await?))
}

async fn cmd_history_list() -> Result<()> {
    let config = load_config()?;
    let entries = match open_history_readonly(&config).await? {
        Some(store) => store.list().await?,
        None => Vec::new(),
    };

    if entries.is_empty() {
        println!("No research history yet.");
        return Ok(());
    }
    for entry in entries {
        println!(
            "{}  {}  {}",
            entry.id,
            entry.timestamp.format("%Y-%m-%d %H:%M"),
            entry.question
        );
    }
    Ok(())
}

async fn cmd_history_show(id: &str) -> Result<()> {
    let id: ResearchId = id
        .parse()
        .map_err(|e| eyre!("invalid research id '{id}': {e}"))?;
    let config = load_config()?;
    let record = match open_history_readonly(&config).await? {
        Some(store) => store.load(&id).await?,
        None => None,
    };
    let record = record.ok_or_else(|| eyre!("research {id} not found"))?;

    println!("Question: {}", record.question);
    println!("Asked:    {}", record.timestamp.to_rfc3339());
    println!();
    println!("{}", record.answer);
    if !record.sources.is_empty() {
        println!();
        for (i, source) in record.sources.iter().enumerate() {
            println!("{}. {} - {}", i + 1, source.title, source.url);
        }
    }
    Ok(())
}

async fn cmd_history_clear() -> Result<()> {
    let config = load_config()?;
    let path = config.defaults.history_db_path()?;
    let store = LibsqlHistory::open(&path).await?;
    store.clear().await?;
    println!("Research history cleared.");
    Ok(())
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
