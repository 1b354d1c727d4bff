//! twm-watch CLI
//!
//! Watch the twm event stream and query window manager state.

mod output;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use twm_ipc::{
    names, CommandClient, CommandError, Dispatcher, Event, Session, SessionConfig, SessionEnd,
    SpawnError,
};
use twm_ipc_config::{Config, LogLevel};

/// Events shown by `listen` when neither the command line nor the config
/// file picks any
const MONITOR_EVENTS: &[&str] = &[
    names::WINDOW_CREATED,
    names::WINDOW_CLOSED,
    names::WINDOW_FOCUSED,
];

#[derive(Parser, Debug)]
#[command(name = "twm-watch")]
#[command(about = "Watch and query the twm window manager")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "~/.config/twm-ipc/config.kdl")]
    config: String,

    /// twm executable to run (overrides the config file)
    #[arg(long)]
    tool: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print window events as they happen
    Listen {
        /// Events to subscribe to (comma separated)
        #[arg(short, long, value_delimiter = ',')]
        events: Vec<String>,
    },

    /// Log new windows and apply placement rules to them
    Tile {
        /// Move windows whose title contains PATTERN to WORKSPACE
        #[arg(long = "rule", value_name = "PATTERN=WORKSPACE")]
        rules: Vec<TileRule>,

        /// Float windows whose title contains PATTERN
        #[arg(long = "float", value_name = "PATTERN")]
        floating: Vec<String>,
    },

    /// Show the focused window
    ActiveWindow,

    /// Show workspace status
    Workspaces,

    /// List managed windows
    Windows {
        /// Only windows on this workspace
        #[arg(short, long)]
        workspace: Option<u64>,
    },

    /// List monitors
    Monitors,

    /// Validate the configuration file
    Validate,
}

/// `PATTERN=WORKSPACE`, matched case-insensitively against window titles
#[derive(Debug, Clone, PartialEq, Eq)]
struct TileRule {
    pattern: String,
    workspace: u64,
}

impl FromStr for TileRule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (pattern, workspace) = s
            .rsplit_once('=')
            .ok_or_else(|| format!("expected PATTERN=WORKSPACE, got `{}`", s))?;
        let pattern = pattern.trim();
        if pattern.is_empty() {
            return Err("rule pattern must not be empty".to_string());
        }
        let workspace = workspace
            .trim()
            .parse()
            .map_err(|_| format!("invalid workspace id `{}`", workspace))?;

        Ok(Self {
            pattern: pattern.to_lowercase(),
            workspace,
        })
    }
}

/// Workspace of the first rule matching `title`
fn rule_target(rules: &[TileRule], title: &str) -> Option<u64> {
    let title = title.to_lowercase();
    rules
        .iter()
        .find(|rule| title.contains(&rule.pattern))
        .map(|rule| rule.workspace)
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    // Expand tilde in config path
    let config_path: PathBuf = shellexpand::tilde(&cli.config).into_owned().into();

    if let Commands::Validate = cli.command {
        init_tracing(LogLevel::Warn);
        return cmd_validate(&config_path);
    }

    let mut config = twm_ipc_config::load_config(&config_path)?;
    if let Some(tool) = cli.tool {
        config.tool.program = tool;
    }
    init_tracing(config.global.log_level);

    let result = match cli.command {
        Commands::Listen { events } => cmd_listen(&config, events).await,
        Commands::Tile { rules, floating } => cmd_tile(&config, rules, floating).await,
        Commands::ActiveWindow => cmd_active_window(&config).await,
        Commands::Workspaces => cmd_workspaces(&config).await,
        Commands::Windows { workspace } => cmd_windows(&config, workspace).await,
        Commands::Monitors => cmd_monitors(&config).await,
        Commands::Validate => Ok(()),
    };

    result.map_err(|e| miette::miette!("{:#}", e))
}

fn init_tracing(level: LogLevel) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str())),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn cmd_validate(config_path: &Path) -> miette::Result<()> {
    println!("Validating configuration: {}", config_path.display());

    let config = twm_ipc_config::parse_config(config_path)?;

    println!("Configuration is valid!");
    println!("  Tool: {}", config.tool.program);
    match config.tool.timeout_ms {
        Some(ms) => println!("  Query timeout: {}ms", ms),
        None => println!("  Query timeout: none"),
    }
    if config.listen.events.is_empty() {
        println!("  Events: all");
    } else {
        println!("  Events: {}", config.listen.events.join(", "));
    }
    println!("  Grace period: {}ms", config.listen.grace_period_ms);
    Ok(())
}

async fn cmd_listen(config: &Config, events: Vec<String>) -> anyhow::Result<()> {
    let mut session = SessionConfig::from(config);
    if !events.is_empty() {
        session.events = events;
    } else if session.events.is_empty() {
        session.events = MONITOR_EVENTS.iter().map(|e| e.to_string()).collect();
    }

    let mut dispatcher = Dispatcher::new();
    dispatcher
        .on(names::WINDOW_CREATED, |event| {
            println!("{}", output::window_created(&output::timestamp(), &event.data));
            Ok(())
        })
        .on(names::WINDOW_CLOSED, |event| {
            println!("{}", output::window_closed(&output::timestamp(), &event.data));
            Ok(())
        })
        .on(names::WINDOW_FOCUSED, |event| {
            println!("{}", output::window_focused(&output::timestamp(), &event.data));
            Ok(())
        })
        .on_default(|event: &Event| {
            println!("{}", output::other_event(&output::timestamp(), event));
            Ok(())
        });

    eprintln!("Monitoring window events (Ctrl+C to stop)...");
    run_session(session, dispatcher, "monitor").await
}

async fn cmd_tile(config: &Config, rules: Vec<TileRule>, floating: Vec<String>) -> anyhow::Result<()> {
    let mut session = SessionConfig::from(config);
    session.events = vec![names::WINDOW_CREATED.to_string()];

    let client = CommandClient::from(&config.tool);
    let floating: Vec<String> = floating.iter().map(|p| p.to_lowercase()).collect();
    let placements = Placements::default();
    let requests = placements.clone();

    let mut dispatcher = Dispatcher::new();
    dispatcher.on(names::WINDOW_CREATED, move |event| {
        let data = &event.data;
        println!("{}", output::new_window(&output::timestamp(), data));

        let Some(hwnd) = data.handle("hwnd") else {
            return Ok(());
        };
        let title = data.str_or("title", "");

        if let Some(workspace) = rule_target(&rules, title) {
            let client = client.clone();
            let hwnd = hwnd.clone();
            requests.spawn(async move {
                match client.move_window(&hwnd, workspace).await {
                    Ok(()) => info!("Moved window {} to workspace {}", hwnd, workspace),
                    Err(e) => warn!("Failed to move window {} to workspace {}: {}", hwnd, workspace, e),
                }
            });
        }

        let lowered = title.to_lowercase();
        if floating.iter().any(|pattern| lowered.contains(pattern)) {
            let client = client.clone();
            requests.spawn(async move {
                match client.toggle_floating(Some(&hwnd)).await {
                    Ok(()) => info!("Floated window {}", hwnd),
                    Err(e) => warn!("Failed to float window {}: {}", hwnd, e),
                }
            });
        }
        Ok(())
    });

    eprintln!("Auto-tiling new windows (Ctrl+C to stop)...");
    let result = run_session(session, dispatcher, "auto-tiler").await;

    let finished = placements.finish().await;
    debug!(finished, "Placement requests settled");
    result
}

/// Window placement requests issued by `tile`
///
/// Requests run concurrently with the event stream and are awaited once
/// the session ends, so Ctrl+C never cuts one off halfway.
#[derive(Clone, Default)]
struct Placements {
    tasks: Arc<Mutex<JoinSet<()>>>,
}

impl Placements {
    fn spawn<F>(&self, request: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .spawn(request);
    }

    /// Wait for every outstanding request; returns how many completed
    async fn finish(&self) -> usize {
        let mut tasks = {
            let mut guard = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *guard)
        };

        let mut finished = 0;
        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(()) => finished += 1,
                Err(e) => warn!("Placement request failed: {}", e),
            }
        }
        finished
    }
}

/// Run a session until it ends or Ctrl+C cancels it
async fn run_session(config: SessionConfig, dispatcher: Dispatcher, what: &str) -> anyhow::Result<()> {
    let handle = Session::new(config, dispatcher)
        .start()
        .map_err(spawn_error)?;

    let canceller = handle.canceller();
    let stopping = what.to_string();
    let interrupt = tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                eprintln!("\nStopping {}...", stopping);
                canceller.cancel();
            }
            Err(e) => warn!("Failed to listen for Ctrl+C: {}", e),
        }
    });

    let outcome = handle.join().await;
    interrupt.abort();
    let outcome = outcome.context("Event stream failed")?;

    match outcome.end {
        SessionEnd::Cancelled => Ok(()),
        SessionEnd::Completed => {
            info!("twm closed the event stream");
            Ok(())
        }
        SessionEnd::ToolFailed => match outcome.summary.exit_status {
            Some(status) => bail!("twm listen exited with {}", status),
            None => bail!("twm listen failed"),
        },
    }
}

async fn cmd_active_window(config: &Config) -> anyhow::Result<()> {
    let client = CommandClient::from(&config.tool);
    match client
        .active_window()
        .await
        .map_err(command_error)
        .context("Failed to get active window information")?
    {
        Some(window) => println!("{}", output::active_window(&window)),
        None => println!("No active window"),
    }
    Ok(())
}

async fn cmd_workspaces(config: &Config) -> anyhow::Result<()> {
    let client = CommandClient::from(&config.tool);
    let workspaces = client
        .workspaces()
        .await
        .map_err(command_error)
        .context("Failed to get workspace information")?;

    println!("Workspace Status:");
    println!();
    for ws in &workspaces {
        println!("{}", output::workspace(ws));
    }
    Ok(())
}

async fn cmd_windows(config: &Config, workspace: Option<u64>) -> anyhow::Result<()> {
    let client = CommandClient::from(&config.tool);
    let windows = client
        .windows(workspace)
        .await
        .map_err(command_error)
        .context("Failed to list windows")?;

    if windows.is_empty() {
        println!("No windows");
    }
    for window in &windows {
        println!("{}", output::window_row(window));
    }
    Ok(())
}

async fn cmd_monitors(config: &Config) -> anyhow::Result<()> {
    let client = CommandClient::from(&config.tool);
    let monitors = client
        .monitors()
        .await
        .map_err(command_error)
        .context("Failed to list monitors")?;

    for monitor in &monitors {
        println!(
            "Monitor {}: {} {}x{} at {},{} (scale {}){}",
            monitor.id.map_or_else(|| "?".to_string(), |id| id.to_string()),
            monitor.name.as_deref().unwrap_or("Unknown"),
            monitor.width,
            monitor.height,
            monitor.x,
            monitor.y,
            monitor.scale,
            if monitor.primary == Some(true) { " primary" } else { "" }
        );
    }
    Ok(())
}

fn spawn_error(err: SpawnError) -> anyhow::Error {
    match err {
        SpawnError::NotFound { program } => not_installed(&program),
        other => anyhow::Error::new(other),
    }
}

fn command_error(err: CommandError) -> anyhow::Error {
    match err {
        CommandError::ToolNotFound { program } => not_installed(&program),
        other => anyhow::Error::new(other),
    }
}

fn not_installed(program: &str) -> anyhow::Error {
    anyhow!("'{}' command not found. Is the CLI tool installed?", program)
}
