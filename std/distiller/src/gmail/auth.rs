//! OAuth2 credentials for the Gmail API.
//!
//! Tokens are kept in Google's "authorized user" JSON format so an existing
//! `token.json` from other Google tooling can be reused. Expired access
//! tokens are refreshed and written back to disk.

use crate::error::Error;
use chrono::{DateTime, Duration, Utc};
use oauth2::{
    AuthType, AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, EndpointNotSet,
    EndpointSet, PkceCodeChallenge, PkceCodeVerifier, RedirectUrl, RefreshToken, Scope,
    TokenResponse, TokenUrl,
    basic::{BasicClient, BasicTokenResponse},
};
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    path::{Path, PathBuf},
};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpListener,
    sync::Mutex,
};
use url::Url;

/// Read-only Gmail scope.
pub const GMAIL_READONLY_SCOPE: &str = "https://www.googleapis.com/auth/gmail.readonly";
pub const GOOGLE_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
pub const GOOGLE_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Tokens this close to expiry are treated as expired.
const EXPIRY_SKEW_SECS: i64 = 60;

fn default_token_uri() -> String {
    GOOGLE_TOKEN_URI.into()
}

/// Contents of `token.json`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AuthorizedUser {
    pub token: Option<String>,
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    pub expiry: Option<DateTime<Utc>>,
}

impl fmt::Debug for AuthorizedUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizedUser")
            .field("client_id", &self.client_id)
            .field("has_token", &self.token.is_some())
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expiry", &self.expiry)
            .finish()
    }
}

impl AuthorizedUser {
    /// Whether the access token can be used at `now`.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.token.is_some()
            && self
                .expiry
                .is_none_or(|exp| exp > now + Duration::seconds(EXPIRY_SKEW_SECS))
    }

    fn apply(&mut self, response: &BasicTokenResponse, now: DateTime<Utc>) {
        self.token = Some(response.access_token().secret().clone());
        self.expiry = response
            .expires_in()
            .and_then(|d| Duration::from_std(d).ok())
            .map(|d| now + d);
        if let Some(refresh) = response.refresh_token() {
            self.refresh_token = Some(refresh.secret().clone());
        }
        if let Some(scopes) = response.scopes() {
            self.scopes = scopes.iter().map(|s| s.to_string()).collect();
        }
    }
}

/// OAuth client registration from `credentials.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecrets {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_auth_uri() -> String {
    GOOGLE_AUTH_URI.into()
}

#[derive(Deserialize)]
struct CredentialsFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

impl ClientSecrets {
    /// Load an "installed" or "web" client from a credentials file.
    pub async fn load(path: &Path) -> Result<Self, Error> {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NoCredentials(path.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };
        let file: CredentialsFile = serde_json::from_str(&raw)?;
        file.installed.or(file.web).ok_or_else(|| {
            Error::InvalidCredentials(format!(
                "{} has neither an `installed` nor a `web` client",
                path.display()
            ))
        })
    }
}

/// Client with authorization and token endpoints configured.
type GoogleClient =
    BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

fn oauth_client(
    client_id: &str,
    client_secret: &str,
    auth_uri: &str,
    token_uri: &str,
) -> Result<GoogleClient, Error> {
    let auth_url = AuthUrl::new(auth_uri.to_string())
        .map_err(|e| Error::InvalidCredentials(format!("auth_uri: {e}")))?;
    let token_url = TokenUrl::new(token_uri.to_string())
        .map_err(|e| Error::InvalidCredentials(format!("token_uri: {e}")))?;
    Ok(BasicClient::new(ClientId::new(client_id.to_string()))
        .set_client_secret(ClientSecret::new(client_secret.to_string()))
        .set_auth_type(AuthType::RequestBody)
        .set_auth_uri(auth_url)
        .set_token_uri(token_url))
}

/// HTTP client for token requests; redirects are never followed.
pub fn token_http() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap_or_default()
}

/// Lazily loaded, self-refreshing Gmail credentials.
pub struct TokenStore {
    path: PathBuf,
    http: reqwest::Client,
    user: Mutex<Option<AuthorizedUser>>,
}

impl fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenStore").field("path", &self.path).finish()
    }
}

impl TokenStore {
    /// Credentials stored at `path`; nothing is read until first use.
    pub fn new(path: impl Into<PathBuf>, http: reqwest::Client) -> Self {
        Self {
            path: path.into(),
            http,
            user: Mutex::new(None),
        }
    }

    /// A usable access token, refreshing and persisting it if expired.
    pub async fn access_token(&self) -> Result<String, Error> {
        let mut guard = self.user.lock().await;
        let user = match guard.take() {
            Some(user) => user,
            None => self.load().await?,
        };
        let user = if user.is_valid(Utc::now()) {
            user
        } else {
            self.refresh(user).await?
        };
        let token = user
            .token
            .clone()
            .ok_or_else(|| Error::Authorization("no access token after refresh".into()))?;
        *guard = Some(user);
        Ok(token)
    }

    async fn load(&self) -> Result<AuthorizedUser, Error> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => {
                tracing::info!("loading token from {}", self.path.display());
                Ok(serde_json::from_str(&raw)?)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NoToken(self.path.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn refresh(&self, mut user: AuthorizedUser) -> Result<AuthorizedUser, Error> {
        let refresh_token = user.refresh_token.clone().ok_or_else(|| {
            Error::Authorization(format!(
                "token in {} expired and has no refresh token",
                self.path.display()
            ))
        })?;
        tracing::info!("refreshing Gmail access token");
        let client = oauth_client(
            &user.client_id,
            &user.client_secret,
            GOOGLE_AUTH_URI,
            &user.token_uri,
        )?;
        let response = client
            .exchange_refresh_token(&RefreshToken::new(refresh_token))
            .request_async(&self.http)
            .await
            .map_err(|e| Error::Authorization(format!("token refresh failed: {e}")))?;
        user.apply(&response, Utc::now());
        save(&self.path, &user).await?;
        Ok(user)
    }
}

async fn save(path: &Path, user: &AuthorizedUser) -> Result<(), Error> {
    tracing::info!("saving token to {}", path.display());
    tokio::fs::write(path, serde_json::to_string_pretty(user)?).await?;
    Ok(())
}

/// A pending consent request: where to send the user and what to check on
/// the way back.
pub struct Consent {
    pub url: Url,
    pub state: CsrfToken,
    pub verifier: PkceCodeVerifier,
}

/// Consent request for the installed-app loopback flow, with a random CSRF
/// state and a PKCE challenge.
pub fn consent(secrets: &ClientSecrets, redirect_uri: &str) -> Result<Consent, Error> {
    let redirect = RedirectUrl::new(redirect_uri.to_string())
        .map_err(|e| Error::Authorization(format!("redirect uri: {e}")))?;
    let client = oauth_client(
        &secrets.client_id,
        &secrets.client_secret,
        &secrets.auth_uri,
        &secrets.token_uri,
    )?
    .set_redirect_uri(redirect);
    let (challenge, verifier) = PkceCodeChallenge::new_random_sha256();
    let (url, state) = client
        .authorize_url(CsrfToken::new_random)
        .add_scope(Scope::new(GMAIL_READONLY_SCOPE.to_string()))
        .add_extra_param("access_type", "offline")
        .add_extra_param("prompt", "consent")
        .set_pkce_challenge(challenge)
        .url();
    Ok(Consent {
        url,
        state,
        verifier,
    })
}

/// Extract the authorization code from the redirect's request line,
/// e.g. `GET /?state=s&code=c HTTP/1.1`.
pub fn parse_callback(request_line: &str, expected_state: &CsrfToken) -> Result<String, Error> {
    let target = request_line
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| Error::Authorization("malformed redirect request".into()))?;
    let url = Url::parse("http://127.0.0.1")
        .and_then(|base| base.join(target))
        .map_err(|e| Error::Authorization(format!("malformed redirect target: {e}")))?;

    let mut code = None;
    let mut state = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => return Err(Error::Authorization(format!("consent denied: {value}"))),
            _ => {}
        }
    }
    if state.as_deref() != Some(expected_state.secret().as_str()) {
        return Err(Error::Authorization("state mismatch in redirect".into()));
    }
    code.ok_or_else(|| Error::Authorization("redirect carried no code".into()))
}

/// Exchange an authorization code for tokens, proving possession of the
/// PKCE verifier.
pub async fn exchange_code(
    http: &reqwest::Client,
    secrets: &ClientSecrets,
    code: &str,
    redirect_uri: &str,
    verifier: PkceCodeVerifier,
) -> Result<AuthorizedUser, Error> {
    let redirect = RedirectUrl::new(redirect_uri.to_string())
        .map_err(|e| Error::Authorization(format!("redirect uri: {e}")))?;
    let client = oauth_client(
        &secrets.client_id,
        &secrets.client_secret,
        &secrets.auth_uri,
        &secrets.token_uri,
    )?
    .set_redirect_uri(redirect);
    let response = client
        .exchange_code(AuthorizationCode::new(code.to_string()))
        .set_pkce_verifier(verifier)
        .request_async(http)
        .await
        .map_err(|e| Error::Authorization(format!("token exchange failed: {e}")))?;
    let mut user = AuthorizedUser {
        token: None,
        refresh_token: None,
        token_uri: secrets.token_uri.clone(),
        client_id: secrets.client_id.clone(),
        client_secret: secrets.client_secret.clone(),
        scopes: vec![GMAIL_READONLY_SCOPE.to_string()],
        expiry: None,
    };
    user.apply(&response, Utc::now());
    Ok(user)
}

/// Run the loopback consent flow and store the resulting token.
///
/// Prints the consent URL to stderr, waits for the browser redirect on a
/// local port, then exchanges the code.
pub async fn authorize(credentials: &Path, token_path: &Path) -> Result<(), Error> {
    let secrets = ClientSecrets::load(credentials).await?;
    let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
    let redirect_uri = format!("http://127.0.0.1:{}/", listener.local_addr()?.port());
    let Consent {
        url,
        state,
        verifier,
    } = consent(&secrets, &redirect_uri)?;
    eprintln!("Open this URL in a browser to authorize Gmail access:\n\n{url}\n");

    let (stream, peer) = listener.accept().await?;
    tracing::debug!(%peer, "received OAuth redirect");
    let (read, mut write) = stream.into_split();
    let mut request_line = String::new();
    BufReader::new(read).read_line(&mut request_line).await?;
    let outcome = parse_callback(&request_line, &state);
    let page = if outcome.is_ok() {
        "Authorization complete. You can close this window."
    } else {
        "Authorization failed. Check the terminal for details."
    };
    let reply = format!(
        "HTTP/1.1 200 OK\r\ncontent-type: text/plain\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{page}",
        page.len()
    );
    write.write_all(reply.as_bytes()).await?;
    write.shutdown().await.ok();

    let code = outcome?;
    let user = exchange_code(&token_http(), &secrets, &code, &redirect_uri, verifier).await?;
    save(token_path, &user).await?;
    tracing::info!("authenticated with Gmail API");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_string_contains, method, path},
    };

    fn user(token_uri: &str, expiry: Option<DateTime<Utc>>) -> AuthorizedUser {
        AuthorizedUser {
            token: Some("old".into()),
            refresh_token: Some("refresh-1".into()),
            token_uri: token_uri.into(),
            client_id: "client".into(),
            client_secret: "secret".into(),
            scopes: vec![GMAIL_READONLY_SCOPE.into()],
            expiry,
        }
    }

    #[test]
    fn validity_respects_skew() {
        let now = Utc::now();
        assert!(user("x", None).is_valid(now));
        assert!(user("x", Some(now + Duration::minutes(10))).is_valid(now));
        assert!(!user("x", Some(now + Duration::seconds(30))).is_valid(now));
        let mut no_token = user("x", None);
        no_token.token = None;
        assert!(!no_token.is_valid(now));
    }

    #[test]
    fn reads_google_token_format() {
        let raw = r#"{
            "token": "ya29.abc",
            "refresh_token": "1//r",
            "token_uri": "https://oauth2.googleapis.com/token",
            "client_id": "id.apps.googleusercontent.com",
            "client_secret": "s",
            "scopes": ["https://www.googleapis.com/auth/gmail.readonly"],
            "universe_domain": "googleapis.com",
            "expiry": "2024-01-15T10:30:00.123456Z"
        }"#;
        let u: AuthorizedUser = serde_json::from_str(raw).unwrap();
        assert_eq!(u.token.as_deref(), Some("ya29.abc"));
        assert!(u.expiry.is_some());
        assert!(!format!("{u:?}").contains("ya29"));
    }

    #[tokio::test]
    async fn missing_token_file() {
        let tmp = tempfile::tempdir().unwrap();
        let store = TokenStore::new(tmp.path().join("token.json"), reqwest::Client::new());
        assert!(matches!(store.access_token().await, Err(Error::NoToken(_))));
    }

    #[tokio::test]
    async fn valid_token_is_used_as_is() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("token.json");
        let u = user("http://unused.invalid/token", Some(Utc::now() + Duration::hours(1)));
        std::fs::write(&path, serde_json::to_string(&u).unwrap()).unwrap();

        let store = TokenStore::new(&path, reqwest::Client::new());
        assert_eq!(store.access_token().await.unwrap(), "old");
    }

    #[tokio::test]
    async fn expired_token_is_refreshed_and_saved() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=refresh-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "new",
                "expires_in": 3599,
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("token.json");
        let u = user(&format!("{}/token", server.uri()), Some(Utc::now() - Duration::hours(1)));
        std::fs::write(&path, serde_json::to_string(&u).unwrap()).unwrap();

        let store = TokenStore::new(&path, token_http());
        assert_eq!(store.access_token().await.unwrap(), "new");
        assert_eq!(store.access_token().await.unwrap(), "new");

        let saved: AuthorizedUser =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved.token.as_deref(), Some("new"));
        assert_eq!(saved.refresh_token.as_deref(), Some("refresh-1"));
    }

    #[tokio::test]
    async fn refresh_failure_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "Token has been expired or revoked."
            })))
            .mount(&server)
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("token.json");
        let u = user(&format!("{}/token", server.uri()), Some(Utc::now() - Duration::hours(1)));
        std::fs::write(&path, serde_json::to_string(&u).unwrap()).unwrap();

        let store = TokenStore::new(&path, token_http());
        let err = store.access_token().await.unwrap_err();
        assert!(matches!(err, Error::Authorization(_)));
        let saved: AuthorizedUser =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved.token.as_deref(), Some("old"));
    }

    fn secrets(token_uri: &str) -> ClientSecrets {
        ClientSecrets {
            client_id: "id".into(),
            client_secret: "s".into(),
            auth_uri: GOOGLE_AUTH_URI.into(),
            token_uri: token_uri.into(),
        }
    }

    #[test]
    fn callback_parsing() {
        let state = CsrfToken::new("abc".into());
        assert_eq!(
            parse_callback("GET /?state=abc&code=4%2F0Ab&scope=x HTTP/1.1\r\n", &state).unwrap(),
            "4/0Ab"
        );
        assert!(parse_callback("GET /?state=zzz&code=c HTTP/1.1", &state).is_err());
        assert!(parse_callback("GET /?code=c HTTP/1.1", &state).is_err());
        assert!(parse_callback("GET /?state=abc&error=access_denied HTTP/1.1", &state).is_err());
        assert!(parse_callback("garbage", &state).is_err());
    }

    #[test]
    fn consent_carries_scope_random_state_and_pkce() {
        let secrets = secrets(GOOGLE_TOKEN_URI);
        let first = consent(&secrets, "http://127.0.0.1:5000/").unwrap();
        let pairs: std::collections::HashMap<_, _> =
            first.url.query_pairs().into_owned().collect();
        assert_eq!(pairs["scope"], GMAIL_READONLY_SCOPE);
        assert_eq!(&pairs["state"], first.state.secret());
        assert_eq!(pairs["access_type"], "offline");
        assert_eq!(pairs["code_challenge_method"], "S256");
        assert!(!pairs["code_challenge"].is_empty());
        assert_eq!(pairs["redirect_uri"], "http://127.0.0.1:5000/");

        let second = consent(&secrets, "http://127.0.0.1:5000/").unwrap();
        assert_ne!(first.state.secret(), second.state.secret());
        assert_ne!(first.verifier.secret(), second.verifier.secret());
    }

    #[tokio::test]
    async fn exchanges_code_with_verifier() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code_verifier=my-verifier"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "a",
                "refresh_token": "r",
                "expires_in": 60,
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;
        let secrets = secrets(&format!("{}/token", server.uri()));
        let user = exchange_code(
            &token_http(),
            &secrets,
            "code",
            "http://127.0.0.1:1/",
            PkceCodeVerifier::new("my-verifier".into()),
        )
        .await
        .unwrap();
        assert_eq!(user.token.as_deref(), Some("a"));
        assert_eq!(user.refresh_token.as_deref(), Some("r"));
        assert!(user.expiry.is_some());
    }

    #[tokio::test]
    async fn credentials_file_shapes() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("credentials.json");
        assert!(matches!(ClientSecrets::load(&path).await, Err(Error::NoCredentials(_))));

        std::fs::write(&path, r#"{"installed":{"client_id":"i","client_secret":"s"}}"#).unwrap();
        let secrets = ClientSecrets::load(&path).await.unwrap();
        assert_eq!(secrets.token_uri, GOOGLE_TOKEN_URI);

        std::fs::write(&path, r#"{"other":{}}"#).unwrap();
        assert!(matches!(
            ClientSecrets::load(&path).await,
            Err(Error::InvalidCredentials(_))
        ));
    }
}
