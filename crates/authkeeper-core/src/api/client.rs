//! HTTP client for the authentication authority.
//!
//! `AuthClient` maps each operation to one request. It never retries and
//! never looks at a response body beyond parsing it. In cookie mode the
//! client owns a cookie jar, so the authority's session cookie is stored on
//! the way in and attached on the way out.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::cookie::Jar;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};
use url::Url;

use super::transport::{AuthTransport, Carrier, LoginRedirect, SessionGrant};
use super::TransportError;
use crate::auth::{CredentialMode, TokenBundle};
use crate::config::Config;
use crate::models::User;

// ============================================================================
// Endpoints
// ============================================================================

const LOGIN_PATH: &str = "/auth/google/login";
const ID_TOKEN_PATH: &str = "/auth/google";
const REFRESH_PATH: &str = "/auth/refresh";
const USER_PATH: &str = "/auth/user";
const LOGOUT_PATH: &str = "/auth/logout";

const USER_AGENT: &str = concat!("authkeeper/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Deserialize)]
struct UserResponse {
    user: User,
}

/// Auth transport client.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct AuthClient {
    client: Client,
    base_url: String,
    jar: Option<Arc<Jar>>,
}

impl AuthClient {
    /// Create a client from configuration. Cookie mode gets a fresh jar.
    pub fn new(config: &Config) -> Result<Self> {
        let jar = match config.credential_mode {
            CredentialMode::Cookie => Some(Arc::new(Jar::default())),
            CredentialMode::Token => None,
        };
        Self::build(config, jar)
    }

    fn build(config: &Config, jar: Option<Arc<Jar>>) -> Result<Self> {
        config.validate()?;

        let mut builder = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.request_timeout());
        if let Some(ref jar) = jar {
            builder = builder.cookie_provider(Arc::clone(jar));
        }
        let client = builder.build().context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            jar,
        })
    }

    /// The cookie jar, present only in cookie mode
    pub fn cookie_jar(&self) -> Option<Arc<Jar>> {
        self.jar.clone()
    }

    /// Seed the jar with a `Set-Cookie` style string for the authority's origin
    pub fn add_cookie(&self, cookie: &str) -> Result<()> {
        let jar = self
            .jar
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("Client has no cookie jar (token mode)"))?;
        let url = Url::parse(&self.base_url)?;
        jar.add_cookie_str(cookie, &url);
        Ok(())
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: Response) -> Result<Response, TransportError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(TransportError::from_status(status, &body))
        }
    }

    async fn parse_json<T: DeserializeOwned>(
        response: Response,
        what: &str,
    ) -> Result<T, TransportError> {
        let text = response
            .text()
            .await
            .map_err(|e| TransportError::unreachable(&e))?;
        serde_json::from_str(&text)
            .map_err(|e| TransportError::malformed(format!("Failed to parse {}: {}", what, e)))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Response, TransportError> {
        let response = request
            .send()
            .await
            .map_err(|e| TransportError::unreachable(&e))?;
        Self::check_response(response).await
    }
}

#[async_trait]
impl AuthTransport for AuthClient {
    async fn begin_external_login(&self) -> Result<LoginRedirect, TransportError> {
        let url = self.endpoint(LOGIN_PATH);
        debug!(url = %url, "Requesting external login URL");

        let response = self.send(self.client.get(&url)).await?;
        Self::parse_json(response, "login redirect").await
    }

    async fn exchange_id_token(&self, id_token: &str) -> Result<SessionGrant, TransportError> {
        let url = self.endpoint(ID_TOKEN_PATH);
        debug!(url = %url, "Exchanging ID token");

        let response = self
            .send(self.client.post(&url).json(&json!({ "id_token": id_token })))
            .await?;
        let grant: SessionGrant = Self::parse_json(response, "session grant").await?;

        info!(user_id = %grant.user.id, "ID token exchanged");
        Ok(grant)
    }

    async fn renew_credential(
        &self,
        carrier: Carrier<'_>,
    ) -> Result<Option<TokenBundle>, TransportError> {
        let url = self.endpoint(REFRESH_PATH);
        debug!(url = %url, "Renewing credential");

        match carrier {
            Carrier::Token(refresh_token) => {
                let response = self
                    .send(
                        self.client
                            .post(&url)
                            .json(&json!({ "refresh_token": refresh_token })),
                    )
                    .await?;
                let bundle: TokenBundle = Self::parse_json(response, "renewed credential").await?;
                info!(expires_at = bundle.expires_at, "Credential renewed");
                Ok(Some(bundle))
            }
            Carrier::Cookie => {
                self.send(self.client.post(&url)).await?;
                info!("Cookie credential renewed");
                Ok(None)
            }
        }
    }

    async fn get_current_user(&self, carrier: Carrier<'_>) -> Result<User, TransportError> {
        let url = self.endpoint(USER_PATH);
        debug!(url = %url, "Fetching current user");

        let request = match carrier {
            Carrier::Token(access_token) => {
                self.client.get(&url).query(&[("access_token", access_token)])
            }
            Carrier::Cookie => self.client.get(&url),
        };
        let response = self.send(request).await?;
        let parsed: UserResponse = Self::parse_json(response, "user response").await?;
        Ok(parsed.user)
    }

    async fn end_session(&self, carrier: Carrier<'_>) -> Result<(), TransportError> {
        let url = self.endpoint(LOGOUT_PATH);
        debug!(url = %url, "Ending session");

        let request = match carrier {
            Carrier::Token(access_token) => self
                .client
                .post(&url)
                .json(&json!({ "access_token": access_token })),
            Carrier::Cookie => self.client.post(&url),
        };
        let response = self.send(request).await?;

        // The ack body carries nothing we act on
        if let Err(e) = response.bytes().await {
            warn!(error = %e, "Failed to read logout acknowledgement");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::TransportErrorKind;
    use serde_json::json;
    use std::net::TcpListener;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn can_bind_localhost() -> bool {
        TcpListener::bind("127.0.0.1:0").is_ok()
    }

    fn config_for(server: &MockServer, mode: CredentialMode) -> Config {
        Config {
            api_base_url: server.uri(),
            credential_mode: mode,
            ..Config::default()
        }
    }

    fn user_json() -> serde_json::Value {
        json!({
            "id": "1",
            "email": "x@y.com",
            "user_metadata": {"full_name": "X Y"},
            "app_metadata": {"provider": "google"},
            "created_at": "2024-01-01T00:00:00Z"
        })
    }

    #[tokio::test]
    async fn test_begin_external_login_returns_authorization_url() {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return;
        }
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/google/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "authorization_url": "https://accounts.example.com/o/oauth2?x=1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = AuthClient::new(&config_for(&server, CredentialMode::Token)).unwrap();
        let redirect = client.begin_external_login().await.unwrap();
        assert_eq!(
            redirect.authorization_url,
            "https://accounts.example.com/o/oauth2?x=1"
        );
    }

    #[tokio::test]
    async fn test_begin_external_login_non_success_is_rejected() {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return;
        }
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/google/login"))
            .respond_with(ResponseTemplate::new(400).set_body_string("Failed to generate auth URL"))
            .mount(&server)
            .await;

        let client = AuthClient::new(&config_for(&server, CredentialMode::Token)).unwrap();
        let err = client.begin_external_login().await.unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::Rejected);
        assert_eq!(err.status, Some(400));
        assert!(err.message.contains("Failed to generate auth URL"));
    }

    #[tokio::test]
    async fn test_renew_with_token_posts_refresh_token() {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return;
        }
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .and(body_json(json!({ "refresh_token": "r-old" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "a-new",
                "refresh_token": "r-new",
                "expires_in": 3600,
                "expires_at": 4102444800i64,
                "token_type": "bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = AuthClient::new(&config_for(&server, CredentialMode::Token)).unwrap();
        let bundle = client
            .renew_credential(Carrier::Token("r-old"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(bundle.access_token, "a-new");
        assert_eq!(bundle.refresh_token, "r-new");
        assert_eq!(bundle.expires_at, 4_102_444_800);
    }

    #[tokio::test]
    async fn test_renew_denied_is_rejected() {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return;
        }
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "detail": "Failed to refresh session"
            })))
            .mount(&server)
            .await;

        let client = AuthClient::new(&config_for(&server, CredentialMode::Token)).unwrap();
        let err = client
            .renew_credential(Carrier::Token("revoked"))
            .await
            .unwrap_err();
        assert!(err.is_unauthorized());
    }

    #[tokio::test]
    async fn test_renew_with_malformed_body_is_malformed() {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return;
        }
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
            .mount(&server)
            .await;

        let client = AuthClient::new(&config_for(&server, CredentialMode::Token)).unwrap();
        let err = client
            .renew_credential(Carrier::Token("r"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::Malformed);
        assert!(err.status.is_none());
    }

    #[tokio::test]
    async fn test_get_current_user_sends_access_token_query() {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return;
        }
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/user"))
            .and(query_param("access_token", "a"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "user": user_json() })))
            .expect(1)
            .mount(&server)
            .await;

        let client = AuthClient::new(&config_for(&server, CredentialMode::Token)).unwrap();
        let user = client.get_current_user(Carrier::Token("a")).await.unwrap();
        assert_eq!(user.id, "1");
        assert_eq!(user.email, "x@y.com");
    }

    #[tokio::test]
    async fn test_end_session_posts_access_token() {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return;
        }
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/logout"))
            .and(body_json(json!({ "access_token": "a" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "message": "Successfully logged out"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = AuthClient::new(&config_for(&server, CredentialMode::Token)).unwrap();
        client.end_session(Carrier::Token("a")).await.unwrap();
    }

    #[tokio::test]
    async fn test_exchange_id_token_returns_grant() {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return;
        }
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/google"))
            .and(body_json(json!({ "id_token": "google-id-token" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "a",
                "refresh_token": "r",
                "expires_in": 3600,
                "expires_at": 4102444800i64,
                "token_type": "bearer",
                "user": user_json()
            })))
            .mount(&server)
            .await;

        let client = AuthClient::new(&config_for(&server, CredentialMode::Token)).unwrap();
        let grant = client.exchange_id_token("google-id-token").await.unwrap();
        assert_eq!(grant.bundle().access_token, "a");
        assert_eq!(grant.user.id, "1");
    }

    #[tokio::test]
    async fn test_cookie_mode_attaches_jar_cookie() {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return;
        }
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/user"))
            .and(header("cookie", "sb-session=opaque-handle"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "user": user_json() })))
            .expect(1)
            .mount(&server)
            .await;

        let client = AuthClient::new(&config_for(&server, CredentialMode::Cookie)).unwrap();
        client.add_cookie("sb-session=opaque-handle").unwrap();

        let user = client.get_current_user(Carrier::Cookie).await.unwrap();
        assert_eq!(user.id, "1");
    }

    #[tokio::test]
    async fn test_cookie_mode_renew_ignores_body() {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return;
        }
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let client = AuthClient::new(&config_for(&server, CredentialMode::Cookie)).unwrap();
        let renewed = client.renew_credential(Carrier::Cookie).await.unwrap();
        assert!(renewed.is_none());
    }

    #[test]
    fn test_token_mode_has_no_jar() {
        let client = AuthClient::new(&Config::default()).unwrap();
        assert!(client.cookie_jar().is_none());
        assert!(client.add_cookie("a=b").is_err());
    }

    #[tokio::test]
    async fn test_unreachable_authority_is_unreachable() {
        // Bind then drop to get a port with nothing listening
        let port = match TcpListener::bind("127.0.0.1:0") {
            Ok(listener) => listener.local_addr().unwrap().port(),
            Err(_) => {
                eprintln!("Skipping test: cannot bind localhost");
                return;
            }
        };
        let config = Config {
            api_base_url: format!("http://127.0.0.1:{}", port),
            ..Config::default()
        };

        let client = AuthClient::new(&config).unwrap();
        let err = client.begin_external_login().await.unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::Unreachable);
        assert!(err.is_transient());
    }

    #[test]
    fn test_trailing_slash_in_base_url_is_ignored() {
        let config = Config {
            api_base_url: "http://localhost:8000/".to_string(),
            ..Config::default()
        };
        let client = AuthClient::new(&config).unwrap();
        assert_eq!(client.endpoint("/auth/user"), "http://localhost:8000/auth/user");
    }
}
