use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::archive::ManifestEntry;

pub const APPROVE_HEADER: &str = "x-trove-approve";

/// Classified transfer failures. Variants are produced where the failure is
/// observed (status code or transport error), never by matching message text
/// upstream, and each renders an actionable message.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("not authenticated; run `trove login` and try again")]
    Unauthenticated,
    #[error("asset or version not found")]
    NotFound,
    #[error("{0}; bump the version and push again")]
    Conflict(String),
    #[error("package exceeds the 4 MiB limit")]
    PayloadTooLarge,
    #[error("rate limit exceeded; wait a minute and retry")]
    RateLimited,
    #[error("server error ({0}); try again later")]
    Server(String),
    #[error("network error ({0}); check your connection")]
    Network(String),
    #[error("{0}")]
    Unexpected(String),
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            ApiError::Network(err.to_string())
        } else {
            ApiError::Unexpected(err.to_string())
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Asset {
    pub id: String,
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub description: Option<String>,
    pub asset_format: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub is_public: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VersionInfo {
    pub id: String,
    pub version: String,
    #[serde(default)]
    pub message: Option<String>,
    pub created_at: String,
}

/// `{asset, version}` body of a successful push.
#[derive(Debug, Deserialize)]
pub struct PushReceipt {
    pub asset: Asset,
    pub version: VersionInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OwnedAsset {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub asset_format: String,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default)]
    pub asset_versions: Vec<VersionInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Me {
    pub id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RefreshedTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
}

#[derive(Debug, Serialize)]
pub struct SimplePushRequest {
    pub name: String,
    pub slug: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub content: String,
    pub filename: String,
    pub is_public: bool,
}

#[derive(Debug, Serialize)]
pub struct PackageMetadata {
    pub name: String,
    pub slug: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub asset_format: String,
    pub tags: Vec<String>,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub filename: String,
    pub is_public: bool,
}

/// Raw body of `GET /api/assets/{owner}/{name}/{version}`. Exactly one of
/// the three shapes is populated; [`PullResponse::classify`] resolves which.
#[derive(Debug, Deserialize)]
pub struct PullResponse {
    pub version: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub download_url: Option<String>,
    #[serde(default)]
    pub file_manifest: Option<Vec<ManifestEntry>>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub review_url: Option<String>,
}

#[derive(Debug)]
pub enum Pulled {
    Inline {
        version: String,
        content: String,
    },
    Package {
        version: String,
        download_url: String,
        file_manifest: Vec<ManifestEntry>,
    },
    /// Metadata-only preview of a public asset pulled without approval.
    Preview {
        version: String,
        review_url: String,
        message: Option<String>,
        created_at: Option<String>,
    },
}

impl PullResponse {
    pub fn classify(self) -> Result<Pulled, ApiError> {
        if let Some(content) = self.content {
            return Ok(Pulled::Inline {
                version: self.version,
                content,
            });
        }
        if let Some(download_url) = self.download_url {
            return Ok(Pulled::Package {
                version: self.version,
                download_url,
                file_manifest: self.file_manifest.unwrap_or_default(),
            });
        }
        if let Some(review_url) = self.review_url {
            return Ok(Pulled::Preview {
                version: self.version,
                review_url,
                message: self.message,
                created_at: self.created_at,
            });
        }
        Err(ApiError::Unexpected(
            "unrecognized response shape from server".to_string(),
        ))
    }
}

pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .connect_timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn push_simple(
        &self,
        token: &str,
        request: &SimplePushRequest,
    ) -> Result<PushReceipt, ApiError> {
        let response = self
            .http
            .post(self.url("/api/assets"))
            .bearer_auth(token)
            .json(request)
            .send()
            .await?;
        Self::parse(response).await
    }

    pub async fn push_package(
        &self,
        token: &str,
        metadata: &PackageMetadata,
        manifest: &[ManifestEntry],
        package: Vec<u8>,
    ) -> Result<PushReceipt, ApiError> {
        let metadata_json = serde_json::to_string(metadata)
            .map_err(|err| ApiError::Unexpected(err.to_string()))?;
        let manifest_json = serde_json::to_string(manifest)
            .map_err(|err| ApiError::Unexpected(err.to_string()))?;
        let part = reqwest::multipart::Part::bytes(package)
            .file_name(format!("{}-{}.zip", metadata.slug, metadata.version))
            .mime_str("application/zip")
            .map_err(|err| ApiError::Unexpected(err.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .text("metadata", metadata_json)
            .text("file_manifest", manifest_json)
            .part("package", part);

        let response = self
            .http
            .post(self.url("/api/assets"))
            .bearer_auth(token)
            .multipart(form)
            .send()
            .await?;
        Self::parse(response).await
    }

    pub async fn fetch_version(
        &self,
        token: Option<&str>,
        owner: &str,
        name: &str,
        version: &str,
        approve: bool,
    ) -> Result<PullResponse, ApiError> {
        let mut request = self
            .http
            .get(self.url(&format!("/api/assets/{owner}/{name}/{version}")));
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        if approve {
            request = request.header(APPROVE_HEADER, "true");
        }
        Self::parse(request.send().await?).await
    }

    /// Fetches a signed download URL; the signature is the auth, so no
    /// bearer header is attached.
    pub async fn download(&self, url: &str) -> Result<Vec<u8>, ApiError> {
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Self::classify_status(
                status,
                format!("download failed: HTTP {status}"),
            ));
        }
        Ok(response.bytes().await?.to_vec())
    }

    pub async fn list_versions(
        &self,
        token: &str,
        owner: &str,
        name: &str,
    ) -> Result<Vec<VersionInfo>, ApiError> {
        #[derive(Deserialize)]
        struct Body {
            versions: Vec<VersionInfo>,
        }
        let response = self
            .http
            .get(self.url(&format!("/api/assets/{owner}/{name}/versions")))
            .bearer_auth(token)
            .send()
            .await?;
        Ok(Self::parse::<Body>(response).await?.versions)
    }

    pub async fn list_mine(&self, token: &str) -> Result<Vec<OwnedAsset>, ApiError> {
        #[derive(Deserialize)]
        struct Body {
            assets: Vec<OwnedAsset>,
        }
        let response = self
            .http
            .get(self.url("/api/me/assets"))
            .bearer_auth(token)
            .send()
            .await?;
        Ok(Self::parse::<Body>(response).await?.assets)
    }

    pub async fn me(&self, token: &str) -> Result<Me, ApiError> {
        let response = self
            .http
            .get(self.url("/api/auth/me"))
            .bearer_auth(token)
            .send()
            .await?;
        Self::parse(response).await
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<RefreshedTokens, ApiError> {
        let response = self
            .http
            .post(self.url("/api/auth/refresh"))
            .json(&serde_json::json!({ "refresh_token": refresh_token }))
            .send()
            .await?;
        Self::parse(response).await
    }

    pub async fn delete_asset(&self, token: &str, owner: &str, slug: &str) -> Result<(), ApiError> {
        let response = self
            .http
            .delete(self.url(&format!("/api/assets/{owner}/{slug}")))
            .bearer_auth(token)
            .send()
            .await?;
        if response.status().is_success() {
            return Ok(());
        }
        Err(Self::error_from(response).await)
    }

    async fn parse<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }
        response
            .json::<T>()
            .await
            .map_err(|err| ApiError::Unexpected(format!("malformed server response: {err}")))
    }

    async fn error_from(response: reqwest::Response) -> ApiError {
        let status = response.status();
        let message = response
            .json::<ErrorBody>()
            .await
            .ok()
            .and_then(|b| b.error)
            .unwrap_or_else(|| format!("HTTP {status}"));
        Self::classify_status(status, message)
    }

    fn classify_status(status: StatusCode, message: String) -> ApiError {
        match status.as_u16() {
            400 => ApiError::Validation(message),
            401 => ApiError::Unauthenticated,
            404 => ApiError::NotFound,
            409 => ApiError::Conflict(message),
            413 => ApiError::PayloadTooLarge,
            429 => ApiError::RateLimited,
            500..=599 => ApiError::Server(message),
            _ => ApiError::Unexpected(message),
        }
    }
}
