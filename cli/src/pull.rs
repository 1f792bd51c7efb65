use anyhow::{Context, Result, bail};
use console::style;
use std::path::PathBuf;
use trove_core::api::{ApiClient, Pulled};
use trove_core::archive;
use trove_core::asset::AssetRef;
use trove_core::auth::ensure_valid_token;
use trove_core::config::CredentialStore;

use crate::ui;

#[derive(clap::Args, Debug)]
pub struct PullArgs {
    /// Asset as <owner/name>, or <name> for your own
    pub asset: String,
    /// Output file (simple asset) or directory (package)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    /// Version to pull
    #[arg(short = 'v', long, default_value = "latest")]
    pub version: String,
    /// Approve pulling a public asset you do not own
    #[arg(long)]
    pub approve: bool,
}

pub async fn run(store: &CredentialStore, args: PullArgs) -> Result<()> {
    let client = ApiClient::new(store.api_url())?;
    let token = ensure_valid_token(store, &client).await?;

    let asset_ref = AssetRef::parse(&args.asset)?;
    let owner = match asset_ref.owner {
        Some(owner) => owner,
        None => client
            .me(&token)
            .await?
            .username
            .context("could not resolve your username; use the <owner/name> form")?,
    };
    let name = asset_ref.name;

    let spinner = ui::spinner(format!("Fetching {owner}/{name}@{}...", args.version));
    let response = client
        .fetch_version(Some(&token), &owner, &name, &args.version, args.approve)
        .await;
    spinner.finish_and_clear();

    match response?.classify()? {
        Pulled::Preview { review_url, .. } => {
            bail!(
                "this is a public asset you do not own; review it first, then re-run with --approve:\n\n  \
                 review:  {review_url}\n  \
                 pull:    trove pull {owner}/{name} --approve"
            );
        }
        Pulled::Inline { version, content } => {
            let output = args
                .output
                .unwrap_or_else(|| PathBuf::from(format!("{name}.md")));
            if let Some(parent) = output.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            std::fs::write(&output, &content)
                .with_context(|| format!("failed to write {}", output.display()))?;
            println!(
                "{} Pulled {owner}/{name}@{version} → {}",
                style("✓").green().bold(),
                output.display()
            );
        }
        Pulled::Package {
            version,
            download_url,
            ..
        } => {
            let output = args.output.unwrap_or_else(|| PathBuf::from(&name));
            let spinner = ui::spinner("Downloading package...");
            let bytes = client.download(&download_url).await;
            spinner.set_message("Extracting...");
            let result = bytes.map_err(anyhow::Error::from).and_then(|bytes| {
                archive::extract(&bytes, &output)
            });
            spinner.finish_and_clear();
            result?;
            println!(
                "{} Pulled {owner}/{name}@{version} → {}/",
                style("✓").green().bold(),
                output.display()
            );
        }
    }
    Ok(())
}
