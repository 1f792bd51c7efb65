use anyhow::Result;
use console::style;
use trove_core::api::ApiClient;
use trove_core::auth::{self, CALLBACK_TIMEOUT, Handshake};
use trove_core::config::CredentialStore;

use crate::ui;

pub async fn login(store: &CredentialStore) -> Result<()> {
    let api_url = store.api_url();
    let handshake = Handshake::bind().await?;
    let login_url = handshake.login_url(&api_url)?;

    println!("Opening your browser to sign in...");
    if auth::open_browser(&login_url).is_err() {
        println!("Could not open a browser automatically. Please visit:\n  {login_url}");
    }

    let spinner = ui::spinner("Waiting for sign-in in the browser...");
    let result = tokio::select! {
        result = handshake.wait_for_callback(CALLBACK_TIMEOUT) => result,
        _ = tokio::signal::ctrl_c() => {
            spinner.finish_and_clear();
            println!("Login cancelled.");
            return Ok(());
        }
    };
    spinner.finish_and_clear();
    let mut creds = result?;

    // Keep a previously configured registry URL across re-logins.
    creds.api_url = store.read().and_then(|c| c.api_url);
    store.write(&creds)?;

    println!("{} Logged in successfully.", style("✓").green().bold());
    Ok(())
}

pub fn logout(store: &CredentialStore) -> Result<()> {
    match store.read() {
        Some(creds) if !creds.token.is_empty() => {
            store.clear()?;
            println!("Logged out.");
        }
        _ => println!("Not logged in."),
    }
    Ok(())
}

pub async fn whoami(store: &CredentialStore) -> Result<()> {
    let client = ApiClient::new(store.api_url())?;
    let token = auth::ensure_valid_token(store, &client).await?;
    let me = client.me(&token).await?;
    println!("Logged in as: {}", me.username.unwrap_or(me.id));
    Ok(())
}
