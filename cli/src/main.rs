use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use trove_core::config::CredentialStore;
use tracing_subscriber::EnvFilter;

mod auth;
mod pull;
mod push;
mod registry;
mod ui;

#[derive(Parser)]
#[command(name = "trove")]
#[command(about = "Push and pull AI workflow assets: prompts, skills, bundles", long_about = None)]
#[command(version)]
struct Cli {
    /// Increase log verbosity (--verbose for info, twice for debug)
    #[arg(long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in to the registry via your browser
    Login,
    /// Remove stored credentials
    Logout,
    /// Show the currently authenticated user
    Whoami,
    /// Push a file or package directory to the registry
    Push(push::PushArgs),
    /// Pull an asset from the registry
    Pull(pull::PullArgs),
    /// List your assets
    List,
    /// List all versions of an asset
    Versions {
        /// Asset as <owner/name>, or <name> for your own
        name: String,
    },
    /// Delete an asset and all its versions
    Delete {
        /// Slug of the asset to delete
        slug: String,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;
    let store = default_store()?;

    match cli.command {
        Commands::Login => auth::login(&store).await,
        Commands::Logout => auth::logout(&store),
        Commands::Whoami => auth::whoami(&store).await,
        Commands::Push(args) => push::run(&store, args).await,
        Commands::Pull(args) => pull::run(&store, args).await,
        Commands::List => registry::list(&store).await,
        Commands::Versions { name } => registry::versions(&store, &name).await,
        Commands::Delete { slug, force } => registry::delete(&store, &slug, force).await,
    }
}

fn default_store() -> Result<CredentialStore> {
    let base = dirs::config_dir().context("could not determine the user config directory")?;
    Ok(CredentialStore::new(base.join("trove").join("config.json")))
}

fn init_logging(verbosity: u8) -> Result<()> {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(filter)?)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}
