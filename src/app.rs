//! Application wiring and command handlers.
//!
//! `App` assembles the session manager, the API client, and the persisted
//! stores, then executes one command per invocation. Access control flows
//! through the route guard: a protected command while signed out drops into
//! the interactive login and then resumes the originally requested view.

use std::fmt::Write as _;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::api::ApiClient;
use crate::auth::{
    AuthError, CredentialStore, FileStore, SessionEvent, SessionManager, SharedToken,
};
use crate::config::Config;
use crate::models::{InstancePool, Node, NodeSummary};
use crate::routes::{guard, GuardOutcome, Route};
use crate::utils::{format_date, format_optional, truncate_string};

pub struct App {
    config: Config,
    session: SessionManager<FileStore, ApiClient>,
    api: ApiClient,
    events: mpsc::UnboundedReceiver<SessionEvent>,
}

impl App {
    /// Build the full stack and settle the session phase. After this returns
    /// the session is either anonymous or authenticated, never pending.
    pub async fn new() -> Result<Self> {
        let config = match Config::load() {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "Failed to load config, using defaults");
                Config::default()
            }
        };

        let state_dir = Config::state_dir().unwrap_or_else(|e| {
            warn!(error = %e, "No cache directory, keeping session state in cwd");
            PathBuf::from(".")
        });
        let store = FileStore::open(state_dir);

        let token = SharedToken::default();
        let api = ApiClient::new(&config.base_url(), Arc::clone(&token))?;
        let (session, events) = SessionManager::new(store, api.clone(), Arc::clone(&token));

        // The client reports 401s back into the session manager. The hook
        // slot is shared across client clones, so wiring it here also wires
        // the clone the session manager verifies credentials with.
        let hook_session = session.clone();
        api.set_unauthorized_hook(Arc::new(move || hook_session.on_unauthorized()));

        session.initialize(config.init_mode()).await;
        debug!(phase = ?session.phase(), "Session initialized");

        Ok(Self {
            config,
            session,
            api,
            events,
        })
    }

    /// Execute one routed command, honoring the session guard.
    pub async fn run(&mut self, route: Route) -> Result<()> {
        let result = match guard(&route, self.session.phase()) {
            GuardOutcome::Allow => self.render(route).await,
            GuardOutcome::Pending => {
                // initialize() always settles before run(), so this only
                // shows up if a caller skips App::new
                eprintln!("Session state is still settling, try again.");
                Ok(())
            }
            GuardOutcome::RedirectToLogin { return_to } => {
                eprintln!("Not signed in.");
                // No `?` here: every exit from run() must still reach the
                // event drain below, or a forced-logout notice is swallowed
                match self.login_interactive().await {
                    Ok(()) => self.render(return_to).await,
                    Err(e) => Err(e),
                }
            }
            GuardOutcome::RedirectHome => {
                if let Some(session) = self.session.current_session() {
                    println!("Already signed in as {}.", session.username);
                }
                self.render(Route::Dashboard).await
            }
        };
        self.drain_session_events();
        result
    }

    async fn render(&mut self, route: Route) -> Result<()> {
        match route {
            Route::Login => self.login_interactive().await,
            Route::Dashboard => self.show_overview().await,
            Route::Nodes => self.show_nodes().await,
            Route::NodeDetail(node_id) => self.show_node(&node_id).await,
            Route::InstancePools => self.show_pools().await,
        }
    }

    /// Surface forced-logout notifications that arrived during this command.
    fn drain_session_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            match event {
                SessionEvent::ForcedLogout => {
                    eprintln!(
                        "Your session was rejected by the server and has been cleared. \
                         Run `poolwatch login` to sign in again."
                    );
                }
            }
        }
    }

    /// Prompt for credentials and sign in. The last successful username is
    /// offered as the default, and the OS keychain can supply the password.
    pub async fn login_interactive(&mut self) -> Result<()> {
        let username = prompt_username(self.config.last_username.as_deref())?;
        let password = self.obtain_password(&username)?;

        println!("Authenticating...");
        match self.session.login(&username, &password).await {
            Ok(session) => {
                println!("Signed in as {}.", session.username);
                self.config.last_username = Some(username.clone());
                if let Err(e) = self.config.save() {
                    warn!(error = %e, "Failed to save config");
                }
                self.offer_keychain_save(&username, &password);
                Ok(())
            }
            Err(AuthError::InvalidCredentials) => {
                eprintln!("Invalid username or password.");
                Err(AuthError::InvalidCredentials.into())
            }
            Err(AuthError::Network(e)) => {
                eprintln!(
                    "Could not reach the management API at {}: {}",
                    self.config.base_url(),
                    e
                );
                Err(AuthError::Network(e).into())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn obtain_password(&self, username: &str) -> Result<String> {
        if CredentialStore::has_credentials(username)
            && prompt_yes_no("Use the password saved in your keychain?", true)?
        {
            match CredentialStore::get_password(username) {
                Ok(password) => return Ok(password),
                Err(e) => warn!(error = %e, "Keychain lookup failed, prompting instead"),
            }
        }
        Ok(rpassword::prompt_password("Password: ")?)
    }

    fn offer_keychain_save(&self, username: &str, password: &str) {
        if CredentialStore::has_credentials(username) {
            return;
        }
        match prompt_yes_no("Save this password to your keychain?", false) {
            Ok(true) => {
                if let Err(e) = CredentialStore::store(username, password) {
                    warn!(error = %e, "Failed to save password to keychain");
                }
            }
            Ok(false) => {}
            Err(e) => warn!(error = %e, "Keychain prompt failed"),
        }
    }

    /// Clear the session. Safe to run while already signed out.
    pub fn logout(&mut self) {
        self.session.logout();
        println!("Signed out.");
        self.drain_session_events();
    }

    /// Report the session phase and target API without any network traffic.
    pub fn show_status(&self) {
        println!("API:      {}", self.config.base_url());
        match self.session.current_session() {
            Some(session) => {
                println!("Status:   signed in as {}", session.username);
                if let Some(expires_at) = session.expires_at {
                    println!("Expires:  {}", expires_at.format("%Y-%m-%d %H:%M UTC"));
                }
            }
            None => println!("Status:   not signed in"),
        }
    }

    async fn show_nodes(&self) -> Result<()> {
        let nodes = self.api.fetch_nodes().await?;
        if nodes.is_empty() {
            println!("No nodes registered.");
            return Ok(());
        }
        println!(
            "{:<22} {:<32} {:<10} {:<17} {}",
            "NODE ID", "HOSTNAME", "STATUS", "CREATED", "LAST SEEN"
        );
        for node in &nodes {
            println!(
                "{:<22} {:<32} {:<10} {:<17} {}",
                truncate_string(&node.node_id, 22),
                truncate_string(&node.hostname, 32),
                node.status,
                format_date_cell(node.created_at.as_deref()),
                format_date_cell(node.last_seen.as_deref())
            );
        }
        Ok(())
    }

    async fn show_node(&self, node_id: &str) -> Result<()> {
        let node = self.api.fetch_node(node_id).await?;
        print!("{}", render_node_detail(&node));
        Ok(())
    }

    async fn show_pools(&self) -> Result<()> {
        let pools = self.api.fetch_instance_pools().await?;
        if pools.is_empty() {
            println!("No instance pools registered.");
            return Ok(());
        }
        print!("{}", render_pool_table(&pools));
        Ok(())
    }

    /// Dashboard: fetch nodes and pools concurrently and summarize.
    async fn show_overview(&self) -> Result<()> {
        let (nodes, pools) =
            futures::future::try_join(self.api.fetch_nodes(), self.api.fetch_instance_pools())
                .await?;

        let active = nodes.iter().filter(|n| n.is_active()).count();
        let running: i64 = pools.iter().filter_map(|p| p.current_instances).sum();

        println!("Nodes:     {} ({} active)", nodes.len(), active);
        println!("Pools:     {}", pools.len());
        println!("Instances: {} running", running);

        if !nodes.is_empty() {
            println!();
            print_node_summary_line(&nodes);
        }
        Ok(())
    }
}

fn print_node_summary_line(nodes: &[NodeSummary]) {
    for node in nodes {
        println!(
            "  {:<22} {:<10} {}",
            truncate_string(&node.node_id, 22),
            node.status,
            truncate_string(&node.hostname, 40)
        );
    }
}

fn format_date_cell(raw: Option<&str>) -> String {
    raw.map(format_date).unwrap_or_else(|| "-".to_string())
}

fn render_node_detail(node: &Node) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Node:      {}", node.node_id);
    let _ = writeln!(out, "Hostname:  {}", node.hostname);
    let _ = writeln!(out, "Status:    {}", node.status);
    let _ = writeln!(out, "Created:   {}", format_date_cell(node.created_at.as_deref()));
    let _ = writeln!(out, "Last seen: {}", format_date_cell(node.last_seen.as_deref()));
    if node.instance_pools.is_empty() {
        let _ = writeln!(out, "No instance pools on this node.");
    } else {
        out.push('\n');
        out.push_str(&render_pool_table(&node.instance_pools));
    }
    if let Some(config) = node.config.as_deref() {
        let _ = writeln!(out, "\nConfig:");
        let _ = writeln!(out, "{}", config);
    }
    out
}

fn render_pool_table(pools: &[InstancePool]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<28} {:<16} {:<26} {:>9} {:>7} {}",
        "POOL", "REGION", "NODE", "INSTANCES", "BOUNDS", "LAST SCALED"
    );
    for pool in pools {
        let _ = writeln!(
            out,
            "{:<28} {:<16} {:<26} {:>9} {:>7} {}",
            truncate_string(pool.name(), 28),
            format_optional(pool.region.as_deref()),
            truncate_string(&format_optional(pool.node_hostname.as_deref()), 26),
            pool.current_instances
                .map_or_else(|| "-".to_string(), |n| n.to_string()),
            pool.bounds(),
            format_date_cell(pool.last_scaled_at.as_deref())
        );
    }
    out
}

fn prompt_username(default: Option<&str>) -> Result<String> {
    match default {
        Some(d) => print!("Username [{}]: ", d),
        None => print!("Username: "),
    }
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let input = input.trim();
    if input.is_empty() {
        Ok(default.unwrap_or_default().to_string())
    } else {
        Ok(input.to_string())
    }
}

fn prompt_yes_no(question: &str, default_yes: bool) -> Result<bool> {
    let hint = if default_yes { "[Y/n]" } else { "[y/N]" };
    print!("{} {} ", question, hint);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(match input.trim().to_lowercase().as_str() {
        "" => default_yes,
        "y" | "yes" => true,
        _ => false,
    })
}
