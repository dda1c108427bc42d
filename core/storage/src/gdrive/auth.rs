//! OAuth2 credentials for Google APIs.
//!
//! Reads the application's `client_secret.json`, keeps user tokens in a
//! JSON token file, refreshes them when they expire, and falls back to the
//! installed-app flow (browser consent + loopback redirect) when no usable
//! token exists.

use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use oauth2::{
    basic::{BasicClient, BasicTokenResponse},
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, EndpointNotSet, EndpointSet,
    PkceCodeChallenge, PkceCodeVerifier, RedirectUrl, RefreshToken, Scope, TokenResponse,
    TokenUrl,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use drivemigrate_common::{Error, Result};

use super::client::{DriveClient, DRIVE_API_BASE};
use crate::store::Connector;

/// OAuth2 authorization endpoint.
const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/auth";
/// OAuth2 token endpoint.
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// How long the loopback listener waits for the browser redirect.
const CALLBACK_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(300);

/// Full Drive access; needed to read permissions and move items.
pub const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";

/// OAuth2 client whose auth and token endpoints are configured.
type ConfiguredClient =
    BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// Application credentials as downloaded from the Google developer console.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSecrets {
    /// OAuth client ID.
    pub client_id: String,
    /// OAuth client secret.
    pub client_secret: String,
    /// Authorization endpoint.
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    /// Token endpoint.
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_auth_uri() -> String {
    GOOGLE_AUTH_URL.to_string()
}

fn default_token_uri() -> String {
    GOOGLE_TOKEN_URL.to_string()
}

#[derive(Debug, Deserialize)]
struct ClientSecretsFile {
    #[serde(default)]
    installed: Option<ClientSecrets>,
    #[serde(default)]
    web: Option<ClientSecrets>,
}

impl ClientSecrets {
    /// Parse the contents of a `client_secret.json` file.
    pub fn from_json(json: &str) -> Result<Self> {
        let file: ClientSecretsFile = serde_json::from_str(json)?;
        file.installed.or(file.web).ok_or_else(|| {
            Error::Credential(
                "client secrets file has neither an 'installed' nor a 'web' section".to_string(),
            )
        })
    }

    /// Load application credentials from disk.
    ///
    /// # Errors
    /// - `Credential` when the file is missing or malformed
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            Error::Credential(format!(
                "Cannot read client secrets {}: {}. Create a Desktop App OAuth client \
                 in the Google developer console and download its JSON.",
                path.display(),
                e
            ))
        })?;
        Self::from_json(&json)
    }
}

/// OAuth2 tokens with expiration tracking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tokens {
    /// Access token for API requests.
    pub access_token: String,
    /// Refresh token for obtaining new access tokens.
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// When the access token expires.
    pub expires_at: DateTime<Utc>,
    /// Scopes the tokens were granted for.
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl Tokens {
    /// Check if the access token is expired or about to expire.
    pub fn is_expired(&self) -> bool {
        // Consider expired if less than 5 minutes remaining
        self.expires_at < Utc::now() + Duration::minutes(5)
    }

    /// Whether these tokens were granted every scope in `scopes`.
    pub fn covers(&self, scopes: &[String]) -> bool {
        scopes.iter().all(|s| self.scopes.contains(s))
    }

    fn from_response(
        response: &BasicTokenResponse,
        previous_refresh: Option<&str>,
        scopes: &[String],
    ) -> Self {
        let expires_in = response
            .expires_in()
            .unwrap_or_else(|| std::time::Duration::from_secs(3600));
        let expires_at =
            Utc::now() + Duration::from_std(expires_in).unwrap_or_else(|_| Duration::hours(1));

        Self {
            access_token: response.access_token().secret().clone(),
            // Refresh responses usually omit the refresh token
            refresh_token: response
                .refresh_token()
                .map(|t| t.secret().clone())
                .or_else(|| previous_refresh.map(str::to_string)),
            expires_at,
            scopes: scopes.to_vec(),
        }
    }
}

/// On-disk token cache.
#[derive(Debug, Clone)]
pub struct TokenFile {
    path: PathBuf,
}

impl TokenFile {
    /// Token cache at `path`; the file may not exist yet.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the cache.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read cached tokens. A missing or empty file yields `None`.
    pub fn load(&self) -> Result<Option<Tokens>> {
        match std::fs::read_to_string(&self.path) {
            Ok(json) if json.trim().is_empty() => Ok(None),
            Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Persist tokens, replacing the previous contents.
    pub fn save(&self, tokens: &Tokens) -> Result<()> {
        let json = serde_json::to_string_pretty(tokens)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}

/// Installed-app OAuth flow.
pub struct InstalledAppFlow {
    secrets: ClientSecrets,
    scopes: Vec<String>,
    open_browser: bool,
}

impl InstalledAppFlow {
    /// Flow for `secrets` requesting `scopes`.
    pub fn new(secrets: ClientSecrets, scopes: Vec<String>) -> Self {
        Self {
            secrets,
            scopes,
            open_browser: true,
        }
    }

    /// Print the consent URL only, without launching a browser.
    pub fn without_browser(mut self) -> Self {
        self.open_browser = false;
        self
    }

    fn client(&self, redirect_url: &str) -> Result<ConfiguredClient> {
        Ok(BasicClient::new(ClientId::new(self.secrets.client_id.clone()))
            .set_client_secret(ClientSecret::new(self.secrets.client_secret.clone()))
            .set_auth_uri(
                AuthUrl::new(self.secrets.auth_uri.clone())
                    .map_err(|e| Error::InvalidInput(format!("Invalid auth URL: {}", e)))?,
            )
            .set_token_uri(
                TokenUrl::new(self.secrets.token_uri.clone())
                    .map_err(|e| Error::InvalidInput(format!("Invalid token URL: {}", e)))?,
            )
            .set_redirect_uri(
                RedirectUrl::new(redirect_url.to_string())
                    .map_err(|e| Error::InvalidInput(format!("Invalid redirect URL: {}", e)))?,
            ))
    }

    fn http_client() -> Result<oauth2::reqwest::Client> {
        oauth2::reqwest::ClientBuilder::new()
            .redirect(oauth2::reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Error::Credential(format!("Failed to create HTTP client: {}", e)))
    }

    /// Build the consent URL for `redirect_url`.
    ///
    /// Returns the URL, the CSRF state and the PKCE verifier secret.
    pub fn authorization_url(&self, redirect_url: &str) -> Result<(String, CsrfToken, String)> {
        let client = self.client(redirect_url)?;
        let (challenge, verifier) = PkceCodeChallenge::new_random_sha256();

        let mut request = client
            .authorize_url(CsrfToken::new_random)
            .add_extra_param("access_type", "offline")
            .add_extra_param("prompt", "consent")
            .set_pkce_challenge(challenge);
        for scope in &self.scopes {
            request = request.add_scope(Scope::new(scope.clone()));
        }
        let (url, csrf) = request.url();

        Ok((url.to_string(), csrf, verifier.secret().clone()))
    }

    /// Run the interactive consent flow and exchange the code for tokens.
    pub async fn run(&self) -> Result<Tokens> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        let redirect_url = format!("http://127.0.0.1:{}/", port);

        let (url, csrf, verifier) = self.authorization_url(&redirect_url)?;

        info!("Open this URL to authorize drivemigrate:\n\n    {}\n", url);
        if self.open_browser {
            if let Err(e) = open::that(&url) {
                warn!("Could not open a browser: {}", e);
            }
        }

        let (code, state) = wait_for_callback(listener, CALLBACK_TIMEOUT).await?;
        if state.as_deref() != Some(csrf.secret().as_str()) {
            return Err(Error::Credential(
                "OAuth callback state does not match the request".to_string(),
            ));
        }

        let http = Self::http_client()?;
        let response = self
            .client(&redirect_url)?
            .exchange_code(AuthorizationCode::new(code))
            .set_pkce_verifier(PkceCodeVerifier::new(verifier))
            .request_async(&http)
            .await
            .map_err(|e| Error::Credential(format!("Token exchange failed: {}", e)))?;

        let tokens = Tokens::from_response(&response, None, &self.scopes);
        if tokens.refresh_token.is_none() {
            warn!("No refresh token received; the next run will ask for consent again");
        }
        Ok(tokens)
    }

    /// Exchange a refresh token for a new access token.
    pub async fn refresh(&self, refresh_token: &str) -> Result<Tokens> {
        let http = Self::http_client()?;
        let response = self
            .client("http://127.0.0.1/")?
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .request_async(&http)
            .await
            .map_err(|e| Error::Credential(format!("Token refresh failed: {}", e)))?;

        Ok(Tokens::from_response(
            &response,
            Some(refresh_token),
            &self.scopes,
        ))
    }
}

/// Authorization code and state from the redirect.
type CallbackParams = (String, Option<String>);
type CallbackSender = Arc<Mutex<Option<oneshot::Sender<CallbackParams>>>>;

/// Serve the loopback redirect until a request carries a `code`.
///
/// # Errors
/// - `Error::Credential` if no code arrives within `limit`
async fn wait_for_callback(
    listener: TcpListener,
    limit: std::time::Duration,
) -> Result<CallbackParams> {
    let (tx, rx) = oneshot::channel();
    let server = tokio::spawn(serve_callback(listener, Arc::new(Mutex::new(Some(tx)))));

    let received = tokio::time::timeout(limit, rx).await;
    server.abort();

    match received {
        Ok(Ok(params)) => {
            info!("Received OAuth callback with authorization code");
            Ok(params)
        }
        Ok(Err(_)) => Err(Error::Credential(
            "OAuth callback server stopped before receiving a code".to_string(),
        )),
        Err(_) => Err(Error::Credential(format!(
            "No OAuth callback received within {}s",
            limit.as_secs()
        ))),
    }
}

/// Accept loopback connections and answer each request.
async fn serve_callback(listener: TcpListener, sender: CallbackSender) {
    loop {
        let stream = match listener.accept().await {
            Ok((stream, _)) => stream,
            Err(e) => {
                warn!("Callback server failed to accept: {}", e);
                return;
            }
        };

        let sender = sender.clone();
        let service = service_fn(move |req: Request<Incoming>| {
            let response = callback_response(&req.uri().to_string(), &sender);
            async move { Ok::<_, Infallible>(response) }
        });

        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                debug!("Callback connection error: {}", e);
            }
        });
    }
}

/// Hand a code to the waiting flow and build the browser-facing reply.
fn callback_response(target: &str, sender: &CallbackSender) -> Response<Full<Bytes>> {
    debug!("OAuth callback request: {}", target);

    let (status, body) = match parse_callback(target) {
        Some(params) => {
            if let Some(tx) = sender.lock().ok().and_then(|mut slot| slot.take()) {
                let _ = tx.send(params);
            }
            (
                StatusCode::OK,
                "Authorization complete. You can close this window.",
            )
        }
        None => (StatusCode::BAD_REQUEST, "Missing authorization code."),
    };

    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

/// Extract `code` and `state` from a callback request target.
fn parse_callback(target: &str) -> Option<CallbackParams> {
    let url = url::Url::parse(&format!("http://127.0.0.1{}", target)).ok()?;
    let mut code = None;
    let mut state = None;

    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            _ => {}
        }
    }

    code.map(|c| (c, state))
}

/// Supplies access tokens: cached, refreshed, or freshly granted.
pub struct Authenticator {
    flow: InstalledAppFlow,
    token_file: TokenFile,
}

impl Authenticator {
    /// Authenticator requesting `scopes`, caching tokens in `token_file`.
    pub fn new(secrets: ClientSecrets, scopes: Vec<String>, token_file: TokenFile) -> Self {
        Self {
            flow: InstalledAppFlow::new(secrets, scopes),
            token_file,
        }
    }

    /// Load secrets from `credentials` and cache tokens at `token`.
    pub fn from_files(credentials: &Path, token: &Path, scopes: &[&str]) -> Result<Self> {
        let secrets = ClientSecrets::load(credentials)?;
        Ok(Self::new(
            secrets,
            scopes.iter().map(|s| s.to_string()).collect(),
            TokenFile::new(token),
        ))
    }

    /// Print the consent URL instead of launching a browser.
    pub fn without_browser(mut self) -> Self {
        self.flow = self.flow.without_browser();
        self
    }

    /// A usable access token.
    ///
    /// With `force_refresh`, a cached token is refreshed even if it has
    /// not reached its expiry yet.
    ///
    /// # Errors
    /// - `Credential` when refresh and the interactive flow both fail
    pub async fn access_token(&self, force_refresh: bool) -> Result<String> {
        let cached = self
            .token_file
            .load()?
            .filter(|t| t.covers(&self.flow.scopes));

        if let Some(tokens) = &cached {
            if !force_refresh && !tokens.is_expired() {
                return Ok(tokens.access_token.clone());
            }
        }

        let refreshed = match cached.as_ref().and_then(|t| t.refresh_token.as_deref()) {
            Some(refresh_token) => match self.flow.refresh(refresh_token).await {
                Ok(tokens) => Some(tokens),
                Err(e) => {
                    warn!("{}; falling back to interactive authorization", e);
                    None
                }
            },
            None => None,
        };

        let tokens = match refreshed {
            Some(tokens) => tokens,
            None => self.flow.run().await?,
        };

        self.token_file.save(&tokens)?;
        info!("Saved credentials to {}", self.token_file.path().display());
        Ok(tokens.access_token)
    }
}

/// Connects [`DriveClient`]s with tokens from an [`Authenticator`].
///
/// The first connection reuses a valid cached token; every later one is a
/// re-authentication after an expired session and refreshes the token.
pub struct DriveConnector {
    auth: Authenticator,
    base_url: String,
    connected: AtomicBool,
}

impl DriveConnector {
    /// Connector for the public Drive API.
    pub fn new(auth: Authenticator) -> Self {
        Self {
            auth,
            base_url: DRIVE_API_BASE.to_string(),
            connected: AtomicBool::new(false),
        }
    }

    /// Point connections at another endpoint.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl Connector for DriveConnector {
    type Store = DriveClient;

    async fn connect(&self) -> Result<DriveClient> {
        let reconnect = self.connected.swap(true, Ordering::SeqCst);
        let token = self.auth.access_token(reconnect).await?;
        DriveClient::with_base_url(token, self.base_url.clone())
    }
}
