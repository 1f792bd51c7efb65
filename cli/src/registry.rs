use anyhow::{Context, Result};
use console::style;
use trove_core::api::ApiClient;
use trove_core::asset::AssetRef;
use trove_core::auth::ensure_valid_token;
use trove_core::config::CredentialStore;

use crate::ui;

pub async fn list(store: &CredentialStore) -> Result<()> {
    let client = ApiClient::new(store.api_url())?;
    let token = ensure_valid_token(store, &client).await?;

    let spinner = ui::spinner("Fetching your assets...");
    let assets = client.list_mine(&token).await;
    spinner.finish_and_clear();
    let assets = assets?;

    if assets.is_empty() {
        println!("No assets found. Use `trove push` to add one.");
        return Ok(());
    }

    let rows: Vec<(String, String, String, usize)> = assets
        .iter()
        .map(|a| {
            let latest = a
                .asset_versions
                .first()
                .map(|v| v.version.clone())
                .unwrap_or_else(|| "—".to_string());
            (
                a.slug.clone(),
                a.asset_format.clone(),
                latest,
                a.asset_versions.len(),
            )
        })
        .collect();

    let name_width = rows.iter().map(|r| r.0.len()).max().unwrap_or(0).max(4);
    let header = format!(
        "{:<name_width$}  {:<6}  {:<8}  VERSIONS",
        "NAME", "FMT", "LATEST"
    );
    println!("{header}");
    println!("{}", "─".repeat(header.len()));
    for (name, format, latest, count) in rows {
        println!("{name:<name_width$}  {format:<6}  {latest:<8}  {count}");
    }
    Ok(())
}

pub async fn versions(store: &CredentialStore, asset: &str) -> Result<()> {
    let client = ApiClient::new(store.api_url())?;
    let token = ensure_valid_token(store, &client).await?;

    let asset_ref = AssetRef::parse(asset)?;
    let owner = match asset_ref.owner {
        Some(owner) => owner,
        None => client
            .me(&token)
            .await?
            .username
            .context("could not resolve your username; use the <owner/name> form")?,
    };
    let name = asset_ref.name;

    let spinner = ui::spinner(format!("Fetching versions for {owner}/{name}..."));
    let versions = client.list_versions(&token, &owner, &name).await;
    spinner.finish_and_clear();
    let versions = versions?;

    if versions.is_empty() {
        println!("No versions found.");
        return Ok(());
    }

    let version_width = versions
        .iter()
        .map(|v| v.version.len())
        .max()
        .unwrap_or(0)
        .max(7);
    let header = format!("{:<version_width$}  {:<10}  MESSAGE", "VERSION", "DATE");
    println!("{header}");
    println!("{}", "─".repeat(header.len()));
    for v in &versions {
        let date = short_date(&v.created_at);
        let message = v.message.as_deref().unwrap_or("—");
        println!("{:<version_width$}  {date:<10}  {message}", v.version);
    }
    Ok(())
}

pub async fn delete(store: &CredentialStore, slug: &str, force: bool) -> Result<()> {
    if !force {
        let confirmed = dialoguer::Confirm::new()
            .with_prompt(format!(
                "Delete \"{slug}\" and all its versions? This cannot be undone."
            ))
            .default(false)
            .interact()?;
        if !confirmed {
            println!("Aborted.");
            return Ok(());
        }
    }

    let client = ApiClient::new(store.api_url())?;
    let token = ensure_valid_token(store, &client).await?;

    let spinner = ui::spinner("Deleting...");
    let result = async {
        let me = client.me(&token).await?;
        let owner = me
            .username
            .context("could not determine your username")?;
        client.delete_asset(&token, &owner, slug).await?;
        Ok::<_, anyhow::Error>(())
    }
    .await;
    spinner.finish_and_clear();
    result?;

    println!("{} Deleted {slug}", style("✓").green().bold());
    Ok(())
}

/// `2026-01-31T12:00:00Z` → `2026-01-31`; unparseable dates pass through.
fn short_date(created_at: &str) -> String {
    match created_at.get(..10) {
        Some(date) if date.as_bytes().get(4) == Some(&b'-') => date.to_string(),
        _ => created_at.to_string(),
    }
}
