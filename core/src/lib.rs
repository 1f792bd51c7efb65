pub mod api;
pub mod archive;
pub mod asset;
pub mod auth;
pub mod config;

pub use api::{ApiClient, ApiError};
pub use archive::{MAX_PACKAGE_SIZE, ManifestEntry, archive_dir, build_manifest, extract};
pub use asset::{AssetKind, AssetRef, slugify};
pub use auth::{Handshake, ensure_valid_token, open_browser};
pub use config::{CredentialStore, Credentials};
