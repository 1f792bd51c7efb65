use anyhow::{Context, Result};
use console::style;
use std::path::{Path, PathBuf};
use trove_core::api::{ApiClient, ApiError, PackageMetadata, PushReceipt, SimplePushRequest};
use trove_core::archive::{self, MAX_PACKAGE_SIZE};
use trove_core::asset::{self, AssetKind};
use trove_core::auth::ensure_valid_token;
use trove_core::config::CredentialStore;

use crate::ui;

#[derive(clap::Args, Debug)]
pub struct PushArgs {
    /// File or package directory to push
    pub path: PathBuf,
    /// Asset display name (defaults to the file or directory name)
    #[arg(short, long)]
    pub name: Option<String>,
    /// Make the asset publicly visible
    #[arg(short, long)]
    pub public: bool,
    /// Version to publish (semver)
    #[arg(short = 'v', long, default_value = "1.0.0")]
    pub version: String,
    /// Version message
    #[arg(short, long)]
    pub message: Option<String>,
    /// Comma-separated tags
    #[arg(short, long)]
    pub tags: Option<String>,
    /// Short description
    #[arg(short, long)]
    pub description: Option<String>,
}

pub async fn run(store: &CredentialStore, args: PushArgs) -> Result<()> {
    let client = ApiClient::new(store.api_url())?;
    let token = ensure_valid_token(store, &client).await?;

    let path = &args.path;
    let kind = AssetKind::detect(path)
        .with_context(|| format!("path does not exist: {}", path.display()))?;

    let name = match &args.name {
        Some(name) => name.clone(),
        None => default_name(path, kind)?,
    };
    asset::validate_name(&name)?;
    let slug = asset::slugify(&name);
    asset::validate_slug(&slug)?;
    asset::validate_version(&args.version)?;

    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .context("path has no usable file name")?
        .to_string();
    let tags = split_tags(args.tags.as_deref());

    let spinner = ui::spinner("Pushing asset...");
    let result = match kind {
        AssetKind::File => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            spinner.set_message("Uploading asset...");
            client
                .push_simple(
                    &token,
                    &SimplePushRequest {
                        name,
                        slug,
                        description: args.description,
                        tags,
                        version: args.version,
                        message: args.message,
                        content,
                        filename,
                        is_public: args.public,
                    },
                )
                .await
        }
        AssetKind::Skill | AssetKind::Bundle => {
            spinner.set_message("Building file manifest...");
            let manifest = archive::build_manifest(path)?;
            spinner.set_message("Creating archive...");
            let package = archive::archive_dir(path)?;
            if package.len() as u64 > MAX_PACKAGE_SIZE {
                spinner.finish_and_clear();
                return Err(ApiError::PayloadTooLarge.into());
            }
            spinner.set_message("Uploading package...");
            client
                .push_package(
                    &token,
                    &PackageMetadata {
                        name,
                        slug,
                        description: args.description,
                        asset_format: kind.format_str().to_string(),
                        tags,
                        version: args.version,
                        message: args.message,
                        filename,
                        is_public: args.public,
                    },
                    &manifest,
                    package,
                )
                .await
        }
    };
    spinner.finish_and_clear();
    let receipt: PushReceipt = result?;

    let visibility = if args.public { "public" } else { "private" };
    println!(
        "{} Pushed {visibility} {}: {} @ {}",
        style("✓").green().bold(),
        kind.describe(),
        receipt.asset.slug,
        receipt.version.version
    );
    Ok(())
}

fn default_name(path: &Path, kind: AssetKind) -> Result<String> {
    let stem = if kind.is_package() {
        path.file_name()
    } else {
        path.file_stem()
    };
    stem.and_then(|s| s.to_str())
        .map(str::to_string)
        .context("could not derive a name from the path; pass --name")
}

fn split_tags(raw: Option<&str>) -> Vec<String> {
    raw.map(|tags| {
        tags.split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use tempfile::TempDir;
    use trove_core::config::Credentials;

    fn logged_in_store(tmp: &TempDir, api_url: &str) -> CredentialStore {
        let store = CredentialStore::new(tmp.path().join("config.json"));
        store
            .write(&Credentials {
                token: "tok".to_string(),
                refresh_token: None,
                expires_at: Some(Utc::now().timestamp_millis() + 3_600_000),
                api_url: Some(api_url.to_string()),
            })
            .unwrap();
        store
    }

    fn receipt(slug: &str, version: &str) -> serde_json::Value {
        json!({
            "asset": {
                "id": "a1",
                "name": "n",
                "slug": slug,
                "asset_format": "file",
                "created_at": "2026-01-01T00:00:00Z"
            },
            "version": {
                "id": "v1",
                "version": version,
                "created_at": "2026-01-01T00:00:00Z"
            }
        })
    }

    #[tokio::test]
    async fn pushes_single_file_with_slugified_name() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/assets")
            .match_body(mockito::Matcher::PartialJson(json!({
                "name": "My Notes",
                "slug": "my-notes",
                "version": "1.0.0",
                "content": "hello\n",
                "filename": "notes.md"
            })))
            .with_status(201)
            .with_body(receipt("my-notes", "1.0.0").to_string())
            .create_async()
            .await;

        let tmp = TempDir::new().unwrap();
        let store = logged_in_store(&tmp, &server.url());
        let file = tmp.path().join("notes.md");
        std::fs::write(&file, "hello\n").unwrap();

        run(
            &store,
            PushArgs {
                path: file,
                name: Some("My Notes".to_string()),
                public: false,
                version: "1.0.0".to_string(),
                message: None,
                tags: None,
                description: None,
            },
        )
        .await
        .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn pushes_skill_directory_as_multipart() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/assets")
            .match_header(
                "content-type",
                mockito::Matcher::Regex("multipart/form-data.*".to_string()),
            )
            .with_status(201)
            .with_body(receipt("my-skill", "2.0.0").to_string())
            .create_async()
            .await;

        let tmp = TempDir::new().unwrap();
        let store = logged_in_store(&tmp, &server.url());
        let dir = tmp.path().join("my-skill");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("SKILL.md"), "# skill\n").unwrap();

        run(
            &store,
            PushArgs {
                path: dir,
                name: None,
                public: true,
                version: "2.0.0".to_string(),
                message: Some("initial".to_string()),
                tags: Some("claude, prompt".to_string()),
                description: None,
            },
        )
        .await
        .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn rejects_latest_as_push_version() {
        let tmp = TempDir::new().unwrap();
        let store = logged_in_store(&tmp, "http://127.0.0.1:1");
        let file = tmp.path().join("notes.md");
        std::fs::write(&file, "x").unwrap();

        let err = run(
            &store,
            PushArgs {
                path: file,
                name: Some("Notes".to_string()),
                public: false,
                version: "latest".to_string(),
                message: None,
                tags: None,
                description: None,
            },
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("reserved"));
    }

    #[test]
    fn tag_splitting() {
        assert_eq!(
            split_tags(Some("claude, prompt ,,x")),
            vec!["claude", "prompt", "x"]
        );
        assert!(split_tags(None).is_empty());
    }
}
