use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cemai_console::{run_operator_console, ConsoleConfig, ControlTower, DemoBackend};
use cemai_gateway::{ApiClient, Fetched, SessionStore};
use cemai_protocol::HEALTH_SYSTEMS;

#[derive(Parser, Debug)]
#[command(name = "control-tower", version, about = "CemAI Control Tower operator console")]
struct Cli {
    /// Config file (default: <config_dir>/cemai-control-tower/config.toml).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the backend base URL.
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Never substitute demo data for failed reads.
    #[arg(long, global = true)]
    no_demo: bool,

    /// Enable debug logging.
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    cmd: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Open the operator console (default).
    Run,
    /// Log in and persist the session tokens.
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Log out and clear the stored session.
    Logout,
    /// Print backend reachability, version and agent state.
    Status,
    /// Serve the in-memory demo backend.
    ServeDemo {
        #[arg(long, default_value = "127.0.0.1:9380")]
        bind: String,
        /// Seconds between scripted decisions; 0 disables them.
        #[arg(long, default_value_t = 20)]
        decision_every: u64,
    },
}

fn log_file_path() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("cemai-control-tower").join("control-tower.log"))
}

/// Logs go to stderr, or to `log_file` while the TUI owns the terminal.
fn init_tracing(debug: bool, log_file: Option<&Path>) -> Result<()> {
    let default = if debug {
        "debug,reqwest=info,hyper=info"
    } else {
        "info,reqwest=warn,hyper=warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);

    match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening {}", path.display()))?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}

fn open_session() -> Result<Arc<SessionStore>> {
    let store = match SessionStore::default_path() {
        Some(path) => SessionStore::open(path.clone())
            .with_context(|| format!("opening session store {}", path.display()))?,
        None => {
            tracing::warn!("no data directory; session will not be persisted");
            SessionStore::in_memory()
        }
    };
    Ok(Arc::new(store))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cmd = cli.cmd.unwrap_or(Command::Run);

    let log_file = matches!(cmd, Command::Run).then(log_file_path).flatten();
    init_tracing(cli.debug, log_file.as_deref())?;

    let mut config = ConsoleConfig::load(cli.config.as_deref())?;
    if let Some(url) = cli.api_url {
        config.api.base_url = url;
    }
    if cli.no_demo {
        config.api.demo_fallback = false;
    }

    match cmd {
        Command::Run => run_console(config).await,
        Command::Login { email, password } => login(config, &email, &password).await,
        Command::Logout => logout(config).await,
        Command::Status => status(config).await,
        Command::ServeDemo { bind, decision_every } => {
            let mut backend = DemoBackend::new(bind);
            if decision_every > 0 {
                backend = backend.with_decision_scenario(Duration::from_secs(decision_every));
            }
            backend.run().await
        }
    }
}

async fn run_console(config: ConsoleConfig) -> Result<()> {
    let mut tower = ControlTower::new(config, open_session()?)?;
    tower.start().await;
    let result = run_operator_console(&tower).await;
    tower.shutdown().await;
    result
}

async fn login(config: ConsoleConfig, email: &str, password: &str) -> Result<()> {
    let api = ApiClient::new(config.client_config(), open_session()?)?;
    match api.login(email, password).await? {
        Fetched::Live(user) => println!("Logged in as {} <{}> ({})", user.name, user.email, user.role),
        Fetched::Demo { value, reason } => println!(
            "Backend unreachable ({reason}); using demo session for {} ({})",
            value.name, value.role
        ),
    }
    Ok(())
}

async fn logout(config: ConsoleConfig) -> Result<()> {
    let api = ApiClient::new(config.client_config(), open_session()?)?;
    api.logout().await?;
    println!("Logged out.");
    Ok(())
}

async fn status(config: ConsoleConfig) -> Result<()> {
    let api = ApiClient::new(config.client_config(), open_session()?)?;
    println!("Backend: {}", api.base_url());

    match api.ping().await {
        Ok((pong, latency)) => println!("Ping:    {} in {} ms", pong.status, latency.as_millis()),
        Err(e) => println!("Ping:    unreachable ({e})"),
    }
    match api.version().await {
        Ok(fetched) => {
            let demo = if fetched.is_demo() { " [demo]" } else { "" };
            println!("Version: {}{demo}", fetched.into_value().version);
        }
        Err(e) => println!("Version: unavailable ({e})"),
    }
    println!(
        "Session: {}",
        if api.session().is_logged_in() { "logged in" } else { "not logged in" }
    );
    match api.agent_state().await {
        Ok(fetched) => {
            let demo = if fetched.is_demo() { " [demo]" } else { "" };
            let state = fetched.into_value();
            println!(
                "Agent:   autonomy {}{demo}{}",
                state.autonomy,
                state.reason.map(|r| format!(" ({r})")).unwrap_or_default()
            );
        }
        Err(e) => println!("Agent:   unavailable ({e})"),
    }
    match api.health_predictions(&HEALTH_SYSTEMS).await {
        Ok(fetched) => {
            for prediction in fetched.into_value().iter() {
                println!("Health:  {:<8} {:?}", prediction.system.label(), prediction.status);
            }
        }
        Err(e) => println!("Health:  unavailable ({e})"),
    }
    Ok(())
}
