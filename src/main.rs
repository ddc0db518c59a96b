//! poolwatch - terminal console for the AutoScaler central-management API.

mod api;
mod app;
mod auth;
mod config;
mod models;
mod routes;
mod utils;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use app::App;
use routes::Route;

/// Logs go to stderr so table output on stdout stays pipeable.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_usage() {
    eprintln!("Usage: poolwatch <command>");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  login          Sign in to the management API");
    eprintln!("  logout         Clear the local session");
    eprintln!("  status         Show session state without network traffic");
    eprintln!("  overview       Summarize nodes and pools (default)");
    eprintln!("  nodes          List autoscaler nodes");
    eprintln!("  node <id>      Show one node and its pools");
    eprintln!("  pools          List instance pools");
    eprintln!();
    eprintln!("Set {} to override the API root.", config::ENV_BASE_URL);
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(String::as_str).unwrap_or("overview");

    if matches!(command, "help" | "--help" | "-h") {
        print_usage();
        return Ok(());
    }

    info!(command, "poolwatch starting");
    let mut app = App::new().await?;

    match command {
        "login" => app.run(Route::Login).await?,
        "logout" => app.logout(),
        "status" => app.show_status(),
        "overview" => app.run(Route::Dashboard).await?,
        "nodes" => app.run(Route::Nodes).await?,
        "node" => match args.get(2) {
            Some(id) => app.run(Route::NodeDetail(id.clone())).await?,
            None => {
                eprintln!("Usage: poolwatch node <node-id>");
                std::process::exit(2);
            }
        },
        "pools" => app.run(Route::InstancePools).await?,
        other => {
            eprintln!("Unknown command: {}", other);
            print_usage();
            std::process::exit(2);
        }
    }

    Ok(())
}
