//! Push Router CLI - push registration and notification routing.
//!
//! This is the main binary entry point. See the `push_router` library
//! for the core functionality.

use std::io::Read;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use push_router::background::NoopBackgroundExecution;
use push_router::categories::{
    self, NotificationCategory, NotificationCenter, NotificationDelegate, PresentationOptions,
    DEFAULT_ACTION, REPLY_ACTION,
};
use push_router::config::ServerConfig;
use push_router::connection::{ConnectionSender, SocketConnection};
use push_router::credentials::{Credentials, Session, StoredSession};
use push_router::rest::RestMessageSender;
use push_router::store::{self, ConfigNavigator, ConfigServerRegistry, ConversationCache};
use push_router::ws::socket_url;
use push_router::{Config, FileStore, IdentityStore, NotificationRouter, RegistrationClient};

/// Global allocator configured per M-MIMALLOC-APPS guideline.
/// mimalloc provides better multi-threaded performance than the system allocator.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser)]
#[command(name = "push-router")]
#[command(version)]
#[command(about = "Push notification routing and registration for a multi-server chat client")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the registration id and the last device token
    Identity,
    /// Record a device token delivered by the push service, then announce it
    SetToken {
        /// Device push token
        token: String,
    },
    /// Announce push registration to the selected server
    Announce,
    /// Bind a user to this device's registration on the selected server
    Associate {
        /// Backend user id
        user_id: String,
    },
    /// Store a session for the selected server, then associate and announce
    Login {
        /// Backend user id
        user_id: String,
        /// Resume token
        auth_token: String,
    },
    /// Forget the session for the selected server
    Logout,
    /// Add a backend server
    AddServer {
        /// Server address (https://chat.example.com)
        url: String,
        /// Display name
        #[arg(long)]
        name: Option<String>,
    },
    /// Select a configured server by index
    SelectServer {
        /// Server index as listed by `servers`
        index: usize,
    },
    /// List configured servers
    Servers,
    /// Route a notification payload
    Route {
        /// Payload file, or `-` for stdin
        #[arg(long, default_value = "-")]
        payload: String,
        /// Inline reply text
        #[arg(long)]
        reply: Option<String>,
        /// Action the user picked (defaults to REPLY with --reply, DEFAULT otherwise)
        #[arg(long)]
        action: Option<String>,
    },
    /// Register notification categories and print them
    Categories,
}

/// Notification center for a process without a platform notification UI.
///
/// Prints what would be registered.
struct StdoutNotificationCenter;

impl NotificationCenter for StdoutNotificationCenter {
    fn request_authorization(&self, options: PresentationOptions) {
        log::info!(
            "[Notification] Authorization requested (alert={}, sound={}, badge={})",
            options.alert,
            options.sound,
            options.badge
        );
    }

    fn set_categories(&self, categories: Vec<NotificationCategory>) {
        for category in &categories {
            log::debug!(
                "[Notification] Category {} (reply: {})",
                category.identifier,
                category.allows_reply()
            );
        }
        match serde_json::to_string_pretty(&categories) {
            Ok(json) => println!("{json}"),
            Err(e) => log::error!("[Notification] Failed to serialize categories: {e}"),
        }
    }
}

fn identity_store() -> Result<Arc<IdentityStore<FileStore>>> {
    Ok(Arc::new(IdentityStore::new(FileStore::in_config_dir()?)))
}

/// Canonical socket URL of the selected server.
fn selected_socket_url(config: &Config) -> Result<String> {
    let server = config.selected().with_context(|| {
        format!(
            "No server at index {} (configure one with `add-server`)",
            config.selected_server
        )
    })?;
    server
        .socket_url()
        .with_context(|| format!("Invalid server address: {}", server.url))
}

/// Connect to the selected server and run `f` with a registration client.
///
/// Waits until every frame queued by `f` has been written.
fn with_registration<F>(runtime: &tokio::runtime::Runtime, f: F) -> Result<()>
where
    F: FnOnce(&RegistrationClient<FileStore>) -> Result<()>,
{
    let config = Config::load()?;
    let url = selected_socket_url(&config)?;
    let credentials = Credentials::load()?;
    let session = StoredSession::for_server(&credentials, &url);
    let identity = identity_store()?;

    runtime.block_on(async {
        let connection = Arc::new(SocketConnection::connect(
            &url,
            session.auth_token().map(str::to_string),
        ));
        let client = RegistrationClient::new(
            identity,
            Arc::new(session),
            Arc::clone(&connection) as Arc<dyn ConnectionSender>,
            config.app_name.clone(),
        );
        let result = f(&client);
        drop(client);

        match Arc::try_unwrap(connection) {
            Ok(connection) => connection.close().await,
            Err(_) => log::warn!("[Socket] Connection still shared, not waiting for flush"),
        }
        result
    })
}

fn announce(runtime: &tokio::runtime::Runtime) -> Result<()> {
    with_registration(runtime, |client| {
        if !client.announce_registration()? {
            println!("skipped (no device token or no session)");
        }
        Ok(())
    })
}

fn read_payload(source: &str) -> Result<String> {
    if source == "-" {
        let mut raw = String::new();
        std::io::stdin()
            .read_to_string(&mut raw)
            .context("Failed to read payload from stdin")?;
        Ok(raw)
    } else {
        std::fs::read_to_string(source).with_context(|| format!("Failed to read {source}"))
    }
}

fn route(
    runtime: &tokio::runtime::Runtime,
    payload: &str,
    action: &str,
    reply: Option<&str>,
) -> Result<()> {
    let raw = read_payload(payload)?;
    let config = Config::load()?;
    let credentials = Credentials::load()?;

    let conversations = ConversationCache::load(&config)?;
    let sender = RestMessageSender::from_config(&config, &credentials)?;
    let shared = store::shared(config);

    let router = NotificationRouter::new(
        Arc::new(ConfigServerRegistry::new(Arc::clone(&shared))),
        Arc::new(conversations),
        Arc::new(ConfigNavigator::new(shared, Config::config_path()?)),
        Arc::new(sender),
        Arc::new(NoopBackgroundExecution),
        runtime.handle().clone(),
    );
    let delegate = NotificationDelegate::new(Arc::new(router));

    match delegate.respond_raw(&raw, action, reply) {
        Ok(routed) => {
            println!("handled");
            if let Some(dispatch) = routed.reply {
                runtime
                    .block_on(dispatch.outcome())
                    .context("Reply was not delivered")?;
                println!("reply sent");
            }
        }
        Err(e) => {
            log::debug!("[Notification] Dropped: {e}");
            println!("rejected");
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let environment = push_router::env::Environment::current();
    if environment.is_production() {
        log::debug!("Starting push-router");
    } else {
        log::info!("Starting push-router in {environment} environment");
    }

    let cli = Cli::parse();
    let runtime = tokio::runtime::Runtime::new()?;

    match cli.command {
        Commands::Identity => {
            let store = FileStore::in_config_dir()?;
            println!("store:           {}", store.path().display());
            let identity = IdentityStore::new(store);
            println!("registration id: {}", identity.get_or_create_registration_id()?);
            match identity.device_token()? {
                Some(token) => println!("device token:    {token}"),
                None => println!("device token:    (none)"),
            }
        }
        Commands::SetToken { token } => {
            if Config::load()?.selected().is_some() {
                with_registration(&runtime, |client| {
                    if !client.record_device_token(&token)? {
                        println!("Device token recorded, not announced (no session).");
                    }
                    Ok(())
                })?;
            } else {
                identity_store()?.set_device_token(&token)?;
                println!("Device token recorded.");
            }
        }
        Commands::Announce => announce(&runtime)?,
        Commands::Associate { user_id } => {
            with_registration(&runtime, |client| client.associate_user(&user_id))?;
        }
        Commands::Login {
            user_id,
            auth_token,
        } => {
            let url = selected_socket_url(&Config::load()?)?;
            let mut credentials = Credentials::load()?;
            credentials.set_session(
                url,
                Session {
                    user_id: user_id.clone(),
                    auth_token,
                },
            );
            credentials.save()?;
            with_registration(&runtime, |client| {
                client.associate_user(&user_id)?;
                client.announce_registration()?;
                Ok(())
            })?;
        }
        Commands::Logout => {
            let url = selected_socket_url(&Config::load()?)?;
            let mut credentials = Credentials::load()?;
            credentials.remove_session(&url);
            credentials.save()?;
            println!("Logged out of {url}");
        }
        Commands::AddServer { url, name } => {
            let Some(normalized) = socket_url(&url) else {
                bail!("Invalid server address: {url}");
            };
            let mut config = Config::load_without_overrides()?;
            if let Some(index) = config.index_for_socket_url(&normalized) {
                println!("Already configured as server {index}");
                return Ok(());
            }
            config.servers.push(ServerConfig { url, name });
            config.save()?;
            println!("Added server {}", config.servers.len() - 1);
        }
        Commands::SelectServer { index } => {
            if index >= Config::load()?.servers.len() {
                bail!("No server at index {index}");
            }
            Config::persist_selected_server(&Config::config_path()?, index)?;
        }
        Commands::Servers => {
            let config = Config::load()?;
            for (index, server) in config.servers.iter().enumerate() {
                let marker = if index == config.selected_server { '*' } else { ' ' };
                let name = server.name.as_deref().unwrap_or("");
                println!("{marker} {index}  {}  {name}", server.url);
            }
        }
        Commands::Route {
            payload,
            reply,
            action,
        } => {
            let default_action = if reply.is_some() {
                REPLY_ACTION
            } else {
                DEFAULT_ACTION
            };
            let action = action.as_deref().unwrap_or(default_action);
            route(&runtime, &payload, action, reply.as_deref())?;
        }
        Commands::Categories => {
            categories::setup_notification_center(&StdoutNotificationCenter);
        }
    }

    Ok(())
}
