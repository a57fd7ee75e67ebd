use std::path::Path;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use praxis::client::chat_view::SIGN_IN_REQUIRED_TEXT;
use praxis::client::{ApiClient, ChatView, ClientError, SessionGate, TokenStore};
use praxis::config::Config;
use praxis::jwt::JwtKeys;
use praxis::logging::Service;
use praxis::{db, logging, retrieval, runtime};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tracing::info;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const LONG_ABOUT: &str = concat!(
    "\x1b[1mPraxis Assistant v",
    env!("CARGO_PKG_VERSION"),
    "\x1b[22m\n",
    "Documentation-grounded chat assistant for the Praxis ERP.\n",
    "\n",
    "\x1b[1mQuick Start:\x1b[22m\n",
    "  1) praxis doctor\n",
    "  2) praxis serve\n",
    "  3) praxis chat",
);

#[derive(Debug, Parser)]
#[command(name = "praxis", version = VERSION, about = LONG_ABOUT)]
struct Cli {
    #[command(subcommand)]
    command: Option<MainCommand>,
}

#[derive(Debug, Subcommand)]
enum MainCommand {
    /// Start the chat service and the auth service
    Serve,
    /// Start only the auth service
    Auth,
    /// Interactive chat in the terminal
    Chat {
        /// Use this token for the session (stored for next time)
        #[arg(long)]
        token: Option<String>,
        /// Open a specific chat instead of the most recent one
        #[arg(long)]
        chat: Option<String>,
        /// Sign-in link (or its query string) carrying a `token` parameter
        #[arg(long)]
        link: Option<String>,
    },
    /// Exchange a username for a session token and store it
    Login { username: String },
    /// Mint a token locally with the configured secret (development)
    Token {
        #[arg(long, default_value = "dev")]
        sub: String,
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        minutes: Option<i64>,
    },
    /// Verify a token and print its claims
    Decode {
        #[arg(long)]
        token: String,
    },
    /// Preflight diagnostics
    Doctor,
    /// Show version
    Version,
}

fn print_version() {
    println!("praxis {VERSION}");
}

fn client_parts(config: &Config) -> (SessionGate, ApiClient) {
    let store = TokenStore::new(&config.client.token_path);
    let gate = SessionGate::new(store, &config.client.auth_url);
    let client = ApiClient::new(&config.client.base_url);
    (gate, client)
}

type InputLines = Lines<BufReader<Stdin>>;

async fn prompt(lines: &mut InputLines, label: &str) -> anyhow::Result<Option<String>> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(label.as_bytes()).await?;
    stdout.flush().await?;
    Ok(lines.next_line().await?)
}

/// Ask for a username until the auth service hands out a token. `None` on
/// end of input.
async fn interactive_sign_in(
    gate: &SessionGate,
    lines: &mut InputLines,
) -> anyhow::Result<Option<String>> {
    loop {
        let Some(name) = prompt(lines, "Username: ").await? else {
            return Ok(None);
        };
        match gate.sign_in_with_username(&name).await {
            Ok(token) => return Ok(Some(token)),
            Err(e) => println!("Sign-in failed: {e}"),
        }
    }
}

fn print_view(view: &ChatView, shown: &mut usize) {
    let lines = view.render();
    if lines.len() < *shown {
        *shown = 0;
    }
    for line in &lines[*shown..] {
        println!("{line}");
    }
    *shown = lines.len();
}

/// Sign in again after the server rejected the session, then reload the
/// view. Returns `false` when the user gave up (end of input).
async fn reauthenticate(
    view: &mut ChatView,
    client: &mut ApiClient,
    gate: &SessionGate,
    lines: &mut InputLines,
) -> anyhow::Result<bool> {
    println!("{SIGN_IN_REQUIRED_TEXT}");
    let Some(token) = interactive_sign_in(gate, lines).await? else {
        return Ok(false);
    };
    client.set_token(Some(token));
    if let Err(e) = view.load(client, gate).await {
        info!("Reload after sign-in failed: {e}");
    }
    Ok(true)
}

async fn run_chat(
    config: &Config,
    token: Option<String>,
    chat: Option<String>,
    link: Option<String>,
) -> anyhow::Result<()> {
    let (gate, mut client) = client_parts(config);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    let from_link = match link {
        Some(link) => gate.store().absorb_link(&link)?,
        None => None,
    };
    let token = match gate.store().resolve(token.as_deref().or(from_link.as_deref()))? {
        Some(t) => t,
        None => match interactive_sign_in(&gate, &mut lines).await? {
            Some(t) => t,
            None => return Ok(()),
        },
    };
    client.set_token(Some(token));

    let mut view = ChatView::new(config.client.page_size);
    if let Some(chat_id) = chat {
        view.select_chat(chat_id);
    }
    let mut shown = 0;
    match view.load(&client, &gate).await {
        Err(ClientError::Unauthorized) => {
            if !reauthenticate(&mut view, &mut client, &gate, &mut lines).await? {
                return Ok(());
            }
        }
        Err(e) => info!("Initial load failed: {e}"),
        Ok(()) => {}
    }
    print_view(&view, &mut shown);
    println!("Commands: /older /new /logout /quit");

    while let Some(line) = prompt(&mut lines, "> ").await? {
        let outcome = match line.trim() {
            "" => continue,
            "/quit" | "/exit" => break,
            "/logout" => {
                gate.sign_out()?;
                println!("Signed out.");
                break;
            }
            "/older" => view.load_older(&client, &gate).await.map(|n| {
                if n == 0 {
                    println!("(no older messages)");
                }
                shown = 0;
            }),
            "/new" => match client.create_chat(None).await {
                Ok(id) => {
                    view.select_chat(id);
                    shown = 0;
                    view.load(&client, &gate).await
                }
                Err(e) => Err(e),
            },
            text => view.send(&client, &gate, text).await,
        };

        match outcome {
            Err(ClientError::Unauthorized) => {
                // Reloading replaces the transcript, so take the unsent text first.
                let drafts = view.failed_drafts();
                if !reauthenticate(&mut view, &mut client, &gate, &mut lines).await? {
                    break;
                }
                shown = 0;
                for draft in drafts {
                    println!("Resending: {draft}");
                    if let Err(e) = view.send(&client, &gate, &draft).await {
                        info!("Resend failed: {e}");
                        break;
                    }
                }
            }
            Err(e) => info!("Request failed: {e}"),
            Ok(()) => {}
        }
        print_view(&view, &mut shown);
    }
    Ok(())
}

async fn run_doctor(config: &Config) -> anyhow::Result<()> {
    match Config::resolve_config_path()? {
        Some(path) => println!("config:    {}", path.display()),
        None => println!("config:    (none, using defaults)"),
    }
    match config.validate_server() {
        Ok(()) => println!("secrets:   ok"),
        Err(e) => println!("secrets:   {e}"),
    }

    let runtime_dir = config.runtime_data_dir();
    match db::Database::new(&runtime_dir) {
        Ok(database) => println!(
            "database:  {} ({})",
            if database.ping() { "ok" } else { "unreachable" },
            Path::new(&runtime_dir).join(db::DB_FILE_NAME).display()
        ),
        Err(e) => println!("database:  {e}"),
    }

    match retrieval::create_retriever(config) {
        Ok(_) if config.docs_dir.is_none() => println!("docs:      disabled"),
        Ok(_) => println!("docs:      ok"),
        Err(e) => println!("docs:      {e}"),
    }

    let (_, client) = client_parts(config);
    match client.health().await {
        Ok(h) => println!(
            "service:   {} (version {}, db {})",
            client.base_url(),
            h.version,
            if h.db { "ok" } else { "down" }
        ),
        Err(e) => println!("service:   {} unreachable: {e}", client.base_url()),
    }

    let log_dir = logging::log_dir_for(&runtime_dir);
    for service in Service::ALL {
        let tail = logging::tail_logs(&log_dir, Some(service), 5).unwrap_or_default();
        if tail.is_empty() {
            continue;
        }
        println!("\nrecent {} log lines ({}):", service.label(), log_dir.display());
        for line in tail {
            println!("  {line}");
        }
    }
    Ok(())
}

/// File logging plus the database, shared by both long-running services.
fn open_service_db(config: &Config, service: Service) -> anyhow::Result<db::Database> {
    let runtime_data_dir = config.runtime_data_dir();
    logging::init_logging(&runtime_data_dir, service)?;
    let database = db::Database::new(&runtime_data_dir)
        .with_context(|| format!("Failed to open database in {runtime_data_dir}"))?;
    info!("Database initialized");
    Ok(database)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let Some(command) = cli.command else {
        let mut cmd = Cli::command();
        cmd.print_help()?;
        println!();
        return Ok(());
    };
    if let MainCommand::Version = command {
        print_version();
        return Ok(());
    }

    let config = Config::load()?;
    match command {
        MainCommand::Serve => {
            let database = open_service_db(&config, Service::Chat)?;
            runtime::run(config, database).await?;
        }
        MainCommand::Auth => {
            let database = open_service_db(&config, Service::Auth)?;
            runtime::run_auth(config, database).await?;
        }
        MainCommand::Chat { token, chat, link } => {
            logging::init_console_logging();
            run_chat(&config, token, chat, link).await?;
        }
        MainCommand::Login { username } => {
            logging::init_console_logging();
            let (gate, _) = client_parts(&config);
            gate.sign_in_with_username(&username).await?;
            println!("Token saved to {}", gate.store().path().display());
        }
        MainCommand::Token {
            sub,
            username,
            minutes,
        } => {
            config.validate_auth()?;
            let keys = JwtKeys::from_config(&config)?;
            let ttl = minutes.unwrap_or(config.jwt_exp_minutes);
            println!("{}", keys.create_jwt_with_ttl(&sub, username.as_deref(), ttl)?);
        }
        MainCommand::Decode { token } => {
            config.validate_auth()?;
            let keys = JwtKeys::from_config(&config)?;
            let claims = keys
                .verify_jwt(token.trim())
                .map_err(|e| anyhow::anyhow!("{e}"))?;
            println!("{}", serde_json::to_string_pretty(&claims)?);
        }
        MainCommand::Doctor => {
            logging::init_console_logging();
            run_doctor(&config).await?;
        }
        MainCommand::Version => print_version(),
    }
    Ok(())
}
