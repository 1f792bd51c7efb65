use anyhow::{Context, Result, anyhow, bail};
use chrono::Utc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::api::ApiClient;
use crate::config::{CredentialStore, Credentials};

/// How long the login command waits for the browser redirect.
pub const CALLBACK_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Refresh the access token when it expires within this window.
pub const REFRESH_SKEW_MS: i64 = 60_000;

/// One-shot loopback listener for the browser login redirect. The web login
/// page redirects back to `http://localhost:{port}/` carrying `token`,
/// `refresh_token` and `expires_in` query parameters.
pub struct Handshake {
    listener: TcpListener,
    port: u16,
}

impl Handshake {
    /// Binds an OS-assigned ephemeral loopback port.
    pub async fn bind() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("failed to bind a loopback port for the login callback")?;
        let port = listener.local_addr()?.port();
        Ok(Self { listener, port })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Browser URL for the web login page, embedding this listener's port
    /// as the callback target.
    pub fn login_url(&self, api_url: &str) -> Result<String> {
        let mut url = reqwest::Url::parse(api_url)
            .with_context(|| format!("invalid registry URL: {api_url}"))?;
        url.set_path("/cli-auth");
        url.query_pairs_mut()
            .append_pair("callback", &format!("http://localhost:{}/", self.port));
        Ok(url.to_string())
    }

    /// Serves requests until the callback arrives or `timeout` elapses.
    /// Consumes the listener, so the port is released on every exit path.
    pub async fn wait_for_callback(self, timeout: Duration) -> Result<Credentials> {
        match tokio::time::timeout(timeout, self.serve()).await {
            Ok(result) => result,
            Err(_) => bail!("login timed out after {} minutes", timeout.as_secs() / 60),
        }
    }

    async fn serve(self) -> Result<Credentials> {
        loop {
            let (mut stream, _) = self
                .listener
                .accept()
                .await
                .context("callback listener failed")?;
            match handle_request(&mut stream, self.port).await {
                Ok(Some(creds)) => return Ok(creds),
                // Stray request (favicon and the like); keep listening.
                Ok(None) => continue,
                Err(err) => return Err(err),
            }
        }
    }
}

/// Replies to one request. `Ok(Some)` is the successful callback, `Ok(None)`
/// an unrelated request, `Err` a callback that carried an error.
async fn handle_request(stream: &mut TcpStream, port: u16) -> Result<Option<Credentials>> {
    let mut buffer = [0u8; 8192];
    let size = stream.read(&mut buffer).await?;
    if size == 0 {
        return Ok(None);
    }
    let request = String::from_utf8_lossy(&buffer[..size]);
    let request_line = request.lines().next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default();
    let path = parts.next().unwrap_or_default();

    if method != "GET" || !path.starts_with('/') {
        respond_plain(stream, 404, "Not found").await?;
        return Ok(None);
    }
    let url = reqwest::Url::parse(&format!("http://localhost:{port}{path}"))
        .context("malformed callback request")?;
    if url.path() != "/" {
        respond_plain(stream, 404, "Not found").await?;
        return Ok(None);
    }

    let mut token = None;
    let mut refresh_token = None;
    let mut expires_in = None;
    let mut error = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "token" => token = Some(value.to_string()),
            "refresh_token" => refresh_token = Some(value.to_string()),
            "expires_in" => expires_in = value.parse::<i64>().ok(),
            "error" => error = Some(value.to_string()),
            _ => {}
        }
    }

    if let Some(error) = error {
        respond_html(stream, 400, "Login failed", &error).await?;
        bail!("login failed: {error}");
    }
    let Some(token) = token.filter(|t| !t.is_empty()) else {
        respond_html(stream, 400, "Login failed", "No token received.").await?;
        bail!("login failed: the callback carried no token");
    };

    respond_html(
        stream,
        200,
        "Login successful",
        "You can close this tab and return to the terminal.",
    )
    .await?;

    Ok(Some(Credentials {
        token,
        refresh_token: refresh_token.filter(|t| !t.is_empty()),
        expires_at: expires_in.map(|secs| Utc::now().timestamp_millis() + secs * 1000),
        api_url: None,
    }))
}

async fn respond_html(
    stream: &mut TcpStream,
    status: u16,
    title: &str,
    message: &str,
) -> Result<()> {
    let body = format!(
        "<!doctype html><html><head><meta charset=\"utf-8\"><title>{title}</title></head>\
         <body style=\"font-family: sans-serif; padding: 24px;\"><h2>{title}</h2><p>{message}</p></body></html>"
    );
    respond(stream, status, "text/html; charset=utf-8", &body).await
}

async fn respond_plain(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    respond(stream, status, "text/plain", body).await
}

async fn respond(stream: &mut TcpStream, status: u16, content_type: &str, body: &str) -> Result<()> {
    let reason = match status {
        200 => "OK",
        400 => "Bad Request",
        _ => "Not Found",
    };
    let response = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await.ok();
    Ok(())
}

/// Opens `url` in the system browser. Failure is for the caller to handle
/// softly by printing the URL for manual use.
pub fn open_browser(url: &str) -> Result<()> {
    let mut command = if cfg!(target_os = "macos") {
        let mut c = std::process::Command::new("open");
        c.arg(url);
        c
    } else if cfg!(target_os = "windows") {
        let mut c = std::process::Command::new("cmd");
        c.args(["/C", "start", "", url]);
        c
    } else {
        let mut c = std::process::Command::new("xdg-open");
        c.arg(url);
        c
    };
    command
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .map(|_| ())
        .map_err(|err| anyhow!("could not open a browser: {err}"))
}

/// Returns a usable access token, refreshing it first when it expires within
/// [`REFRESH_SKEW_MS`]. A failed refresh is intentionally soft: the stored
/// token is returned and the next API call surfaces the 401.
pub async fn ensure_valid_token(store: &CredentialStore, client: &ApiClient) -> Result<String> {
    let Some(mut creds) = store.read() else {
        bail!("not logged in; run `trove login` first");
    };
    if creds.token.is_empty() {
        bail!("not logged in; run `trove login` first");
    }

    let expires_at = creds.expires_at.unwrap_or(0);
    let needs_refresh = Utc::now().timestamp_millis() >= expires_at - REFRESH_SKEW_MS;

    if needs_refresh && let Some(refresh_token) = creds.refresh_token.clone() {
        match client.refresh(&refresh_token).await {
            Ok(tokens) => {
                creds.token = tokens.access_token;
                creds.refresh_token = Some(tokens.refresh_token);
                creds.expires_at =
                    Some(Utc::now().timestamp_millis() + tokens.expires_in * 1000);
                store.write(&creds)?;
            }
            Err(err) => {
                tracing::debug!("token refresh failed, continuing with stored token: {err}");
            }
        }
    }

    Ok(creds.token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    async fn fire_callback(port: u16, query: &str) -> String {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let request = format!("GET /{query} HTTP/1.1\r\nHost: localhost:{port}\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn callback_with_tokens_resolves_credentials() {
        let handshake = Handshake::bind().await.unwrap();
        let port = handshake.port();

        let browser = tokio::spawn(async move {
            fire_callback(port, "?token=abc&refresh_token=r1&expires_in=3600").await
        });

        let creds = handshake
            .wait_for_callback(Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(creds.token, "abc");
        assert_eq!(creds.refresh_token.as_deref(), Some("r1"));
        assert!(creds.expires_at.unwrap() > Utc::now().timestamp_millis());

        let response = browser.await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains("Login successful"));
    }

    #[tokio::test]
    async fn error_parameter_fails_the_handshake() {
        let handshake = Handshake::bind().await.unwrap();
        let port = handshake.port();

        let browser =
            tokio::spawn(async move { fire_callback(port, "?error=access_denied").await });

        let err = handshake
            .wait_for_callback(Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("access_denied"));
        assert!(browser.await.unwrap().starts_with("HTTP/1.1 400"));
    }

    #[tokio::test]
    async fn missing_token_fails_the_handshake() {
        let handshake = Handshake::bind().await.unwrap();
        let port = handshake.port();
        tokio::spawn(async move { fire_callback(port, "?refresh_token=r").await });

        let err = handshake
            .wait_for_callback(Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no token"));
    }

    #[tokio::test]
    async fn stray_requests_keep_the_listener_alive() {
        let handshake = Handshake::bind().await.unwrap();
        let port = handshake.port();

        let browser = tokio::spawn(async move {
            let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
            stream
                .write_all(b"GET /favicon.ico HTTP/1.1\r\n\r\n")
                .await
                .unwrap();
            let mut response = String::new();
            stream.read_to_string(&mut response).await.unwrap();
            assert!(response.starts_with("HTTP/1.1 404"));
            fire_callback(port, "?token=tok&expires_in=60").await
        });

        let creds = handshake
            .wait_for_callback(Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(creds.token, "tok");
        browser.await.unwrap();
    }

    #[tokio::test]
    async fn timeout_releases_the_port() {
        let handshake = Handshake::bind().await.unwrap();
        let port = handshake.port();

        let err = handshake
            .wait_for_callback(Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));

        // The bound port must be free again immediately.
        TcpListener::bind(("127.0.0.1", port)).await.unwrap();
    }

    #[tokio::test]
    async fn login_url_embeds_callback_port() {
        let handshake = Handshake::bind().await.unwrap();
        let url = handshake.login_url("https://trove.dev").unwrap();
        assert!(url.starts_with("https://trove.dev/cli-auth?callback="));
        assert!(url.contains(&handshake.port().to_string()));
        // The callback URL itself must be percent-encoded.
        assert!(url.contains("http%3A%2F%2Flocalhost"));
    }

    fn store_with(tmp: &TempDir, expires_at: i64) -> CredentialStore {
        let store = CredentialStore::new(tmp.path().join("config.json"));
        store
            .write(&Credentials {
                token: "old-token".to_string(),
                refresh_token: Some("refresh-1".to_string()),
                expires_at: Some(expires_at),
                api_url: None,
            })
            .unwrap();
        store
    }

    #[tokio::test]
    async fn expiring_token_triggers_exactly_one_refresh() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/auth/refresh")
            .match_body(mockito::Matcher::PartialJson(
                json!({"refresh_token": "refresh-1"}),
            ))
            .with_body(
                json!({
                    "access_token": "new-token",
                    "refresh_token": "refresh-2",
                    "expires_in": 3600
                })
                .to_string(),
            )
            .expect(1)
            .create_async()
            .await;

        let tmp = TempDir::new().unwrap();
        // Expires in 10 seconds, inside the 60 second skew.
        let store = store_with(&tmp, Utc::now().timestamp_millis() + 10_000);
        let client = ApiClient::new(server.url()).unwrap();

        let token = ensure_valid_token(&store, &client).await.unwrap();
        assert_eq!(token, "new-token");
        mock.assert_async().await;

        let persisted = store.read().unwrap();
        assert_eq!(persisted.token, "new-token");
        assert_eq!(persisted.refresh_token.as_deref(), Some("refresh-2"));
    }

    #[tokio::test]
    async fn fresh_token_skips_refresh() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/auth/refresh")
            .expect(0)
            .create_async()
            .await;

        let tmp = TempDir::new().unwrap();
        let store = store_with(&tmp, Utc::now().timestamp_millis() + 3_600_000);
        let client = ApiClient::new(server.url()).unwrap();

        let token = ensure_valid_token(&store, &client).await.unwrap();
        assert_eq!(token, "old-token");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn failed_refresh_falls_through_to_stored_token() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/auth/refresh")
            .with_status(500)
            .create_async()
            .await;

        let tmp = TempDir::new().unwrap();
        let store = store_with(&tmp, 0);
        let client = ApiClient::new(server.url()).unwrap();

        let token = ensure_valid_token(&store, &client).await.unwrap();
        assert_eq!(token, "old-token");
    }

    #[tokio::test]
    async fn missing_credentials_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let store = CredentialStore::new(tmp.path().join("config.json"));
        let client = ApiClient::new("http://127.0.0.1:1").unwrap();
        let err = ensure_valid_token(&store, &client).await.unwrap_err();
        assert!(err.to_string().contains("trove login"));
    }
}
