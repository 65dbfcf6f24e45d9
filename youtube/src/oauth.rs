//! OAuth 2.0 management for YouTube Analytics authentication.
//!
//! This module covers the web-server flavour of Google's authorization flow: building the consent
//! URL, exchanging the returned authorization code, refreshing access tokens, and revoking them.
//! Holding on to the CSRF state and PKCE verifier between the redirect and the callback is left
//! to the caller, since that is shared state of the HTTP server.

use crate::token_store::StoredCredentials;
use eyre::Context;
use jiff::{SignedDuration, Timestamp};
use oauth2::basic::{BasicClient, BasicErrorResponseType, BasicTokenResponse};
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, PkceCodeChallenge,
    PkceCodeVerifier, RedirectUrl, RefreshToken, Scope, TokenResponse, TokenUrl, reqwest,
};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::instrument;

/// Google's OAuth 2.0 consent endpoint, used when the client secrets file does not name one.
pub const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/auth";

/// Google OAuth2 token endpoint URL used for both code exchange and token refresh.
pub const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Google's token revocation endpoint.
pub const REVOKE_URL: &str = "https://oauth2.googleapis.com/revoke";

/// How long before the reported expiry an access token is already treated as expired.
const EXPIRY_BUFFER: Duration = Duration::from_secs(300);

/// Assumed lifetime of an access token whose response carries no `expires_in`.
const DEFAULT_LIFETIME: Duration = Duration::from_secs(3600);

/// The OAuth client registration, as downloaded from the Google Cloud console.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClientSecrets {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_auth_uri() -> String {
    AUTH_URL.to_string()
}

fn default_token_uri() -> String {
    TOKEN_URL.to_string()
}

#[derive(Debug, Deserialize)]
struct ClientSecretsFile {
    web: Option<ClientSecrets>,
    installed: Option<ClientSecrets>,
}

impl ClientSecrets {
    /// Parses a client secrets document. Both `web` and `installed` registrations are accepted.
    pub fn from_json(json: &str) -> eyre::Result<Self> {
        let file: ClientSecretsFile =
            serde_json::from_str(json).context("parse client secrets JSON")?;
        file.web
            .or(file.installed)
            .ok_or_else(|| eyre::eyre!("client secrets have neither a `web` nor an `installed` section"))
    }

    pub fn load(path: &Path) -> eyre::Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("read client secrets file {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("load client secrets from {}", path.display()))
    }
}

/// A freshly started authorization: where to send the user, and what to remember until they
/// come back.
#[derive(Debug)]
pub struct PendingAuthorization {
    pub url: oauth2::url::Url,
    pub state: CsrfToken,
    pub pkce_verifier: PkceCodeVerifier,
}

/// Manages OAuth 2.0 flows against Google's authorization server.
///
/// Code exchange uses the registration from the client secrets file. Refresh uses the client
/// details recorded in the stored credentials themselves, so a token file keeps working on its
/// own.
#[derive(Debug, Clone)]
pub struct OAuthManager {
    client_id: ClientId,
    client_secret: ClientSecret,
    auth_url: AuthUrl,
    token_url: TokenUrl,
    redirect_url: RedirectUrl,
    scopes: Vec<String>,
    http: reqwest::Client,
}

impl OAuthManager {
    pub fn new(
        secrets: ClientSecrets,
        scopes: Vec<String>,
        redirect_url: impl Into<String>,
    ) -> eyre::Result<Self> {
        let auth_url = AuthUrl::new(secrets.auth_uri).context("parse authorization endpoint URL")?;
        let token_url = TokenUrl::new(secrets.token_uri).context("parse token endpoint URL")?;
        let redirect_url =
            RedirectUrl::new(redirect_url.into()).context("parse OAuth redirect URL")?;
        let http = reqwest::ClientBuilder::new()
            // SSRF no thank you.
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("build OAuth HTTP client")?;

        Ok(Self {
            client_id: ClientId::new(secrets.client_id),
            client_secret: ClientSecret::new(secrets.client_secret),
            auth_url,
            token_url,
            redirect_url,
            scopes,
            http,
        })
    }

    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    /// Builds the consent URL the user should be redirected to.
    ///
    /// Requests offline access so that a refresh token is issued, and incremental authorization
    /// so that previously granted scopes are kept.
    pub fn authorization_url(&self) -> PendingAuthorization {
        let client = BasicClient::new(self.client_id.clone())
            .set_client_secret(self.client_secret.clone())
            .set_auth_uri(self.auth_url.clone())
            .set_redirect_uri(self.redirect_url.clone());

        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();
        let (url, state) = client
            .authorize_url(CsrfToken::new_random)
            .add_scopes(self.scopes.iter().cloned().map(Scope::new))
            .add_extra_param("access_type", "offline")
            .add_extra_param("include_granted_scopes", "true")
            .set_pkce_challenge(pkce_challenge)
            .url();

        PendingAuthorization {
            url,
            state,
            pkce_verifier,
        }
    }

    /// Exchanges the authorization code from the consent redirect for credentials.
    #[instrument(skip_all)]
    pub async fn exchange_code(
        &self,
        code: String,
        pkce_verifier: PkceCodeVerifier,
    ) -> eyre::Result<StoredCredentials> {
        let client = BasicClient::new(self.client_id.clone())
            .set_client_secret(self.client_secret.clone())
            .set_token_uri(self.token_url.clone())
            .set_redirect_uri(self.redirect_url.clone());

        let token = client
            .exchange_code(AuthorizationCode::new(code))
            .set_pkce_verifier(pkce_verifier)
            .request_async(&self.http)
            .await
            .context("exchange authorization code with access token")?;

        tracing::debug!(
            has_refresh_token = token.refresh_token().is_some(),
            "obtained OAuth credentials"
        );

        Ok(StoredCredentials {
            token: token.access_token().secret().clone(),
            refresh_token: token.refresh_token().map(|t| t.secret().clone()),
            token_uri: self.token_url.as_str().to_string(),
            client_id: self.client_id.as_str().to_string(),
            client_secret: self.client_secret.secret().clone(),
            scopes: granted_scopes(&token, &self.scopes),
            expiry: token_expiry(&token),
        })
    }

    /// Attempts to refresh the access token of `credentials`.
    ///
    /// # Returns
    ///
    /// * `Ok(Some(new_credentials))` - Refresh succeeded; the old refresh token is kept if the
    ///   provider did not issue a new one
    /// * `Ok(None)` - There is no refresh token, or the provider rejected it, so the user has to
    ///   authorize again
    /// * `Err(_)` - Network or other error occurred during the refresh attempt
    #[instrument(skip_all)]
    pub async fn refresh(
        &self,
        credentials: &StoredCredentials,
    ) -> eyre::Result<Option<StoredCredentials>> {
        let Some(refresh_token) = credentials.refresh_token.clone() else {
            tracing::warn!("no refresh token available, cannot refresh");
            return Ok(None);
        };

        tracing::debug!("attempting to refresh OAuth token");

        let token_url = TokenUrl::new(credentials.token_uri.clone())
            .context("parse token endpoint URL of stored credentials")?;
        let client = BasicClient::new(ClientId::new(credentials.client_id.clone()))
            .set_client_secret(ClientSecret::new(credentials.client_secret.clone()))
            .set_token_uri(token_url);

        match client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.clone()))
            .request_async(&self.http)
            .await
        {
            Ok(token) => {
                tracing::debug!("successfully refreshed OAuth token");
                Ok(Some(StoredCredentials {
                    token: token.access_token().secret().clone(),
                    refresh_token: Some(
                        token
                            .refresh_token()
                            .map(|t| t.secret().clone())
                            .unwrap_or(refresh_token),
                    ),
                    scopes: granted_scopes(&token, &credentials.scopes),
                    expiry: token_expiry(&token),
                    ..credentials.clone()
                }))
            }
            Err(ref e @ oauth2::RequestTokenError::ServerResponse(ref sr))
                if matches!(sr.error(), BasicErrorResponseType::InvalidGrant) =>
            {
                tracing::warn!("OAuth refresh token considered invalid grant: {}", e);
                Ok(None)
            }
            Err(e) => Err(e).context("exchange refresh token"),
        }
    }

    /// Revokes the access token of `credentials`, returning whether Google confirmed it.
    #[instrument(skip_all)]
    pub async fn revoke(&self, credentials: &StoredCredentials) -> eyre::Result<bool> {
        let response = self
            .http
            .post(REVOKE_URL)
            .query(&[("token", credentials.token.as_str())])
            .header(
                http::header::CONTENT_TYPE,
                "application/x-www-form-urlencoded",
            )
            .send()
            .await
            .context("send token revocation request")?;

        let status = response.status();
        if status != http::StatusCode::OK {
            tracing::warn!(%status, "token revocation was not accepted");
        }
        Ok(status == http::StatusCode::OK)
    }
}

fn granted_scopes(token: &BasicTokenResponse, requested: &[String]) -> Vec<String> {
    match token.scopes() {
        Some(scopes) => scopes.iter().map(|s| s.to_string()).collect(),
        None => requested.to_vec(),
    }
}

/// When a token obtained just now should be considered expired.
fn token_expiry(token: &BasicTokenResponse) -> Option<Timestamp> {
    let lifetime = token.expires_in().unwrap_or(DEFAULT_LIFETIME);
    let usable = lifetime.saturating_sub(EXPIRY_BUFFER);
    let usable = SignedDuration::try_from(usable).ok()?;
    Timestamp::now().checked_add(usable).ok()
}
