//! The HTTP action server.
//!
//! Every route triggers one action and answers with either a small HTML page or a redirect back
//! to the landing page. Refreshes run to completion before the response is sent.

use crate::flows::{RetentionOutcome, Services};
use bytes::Bytes;
use eyre::Context;
use http::header::{CONTENT_TYPE, LOCATION};
use http::{HeaderValue, Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use indexmap::IndexMap;
use jiff::{SignedDuration, Timestamp};
use oauth2::PkceCodeVerifier;
use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Mutex;

const INDEX_HTML: &str = include_str!("../templates/index.html");
const LOGIN_HTML: &str = include_str!("../templates/login.html");

const NOT_AUTHORIZED_RETENTION: &str =
    "You need to <a href=\"/authorize\">authorize</a> before fetching retention data.";
const NOT_AUTHORIZED_REVOKE: &str = "You need to <a href=\"/authorize\">authorize</a> before testing the code to revoke credentials.";

/// Most authorizations kept in progress at once; starting another forgets the oldest.
const MAX_PENDING_AUTHORIZATIONS: usize = 16;

/// How long a user has to complete the consent screen.
const PENDING_AUTHORIZATION_TTL: SignedDuration = SignedDuration::from_mins(10);

#[derive(Debug)]
struct PendingVerifier {
    started: Timestamp,
    verifier: PkceCodeVerifier,
}

impl PendingVerifier {
    fn is_expired(&self, now: Timestamp) -> bool {
        now.duration_since(self.started) > PENDING_AUTHORIZATION_TTL
    }
}

/// PKCE verifiers of authorizations in progress, keyed by their CSRF state, oldest first.
#[derive(Debug, Default)]
struct PendingAuthorizations(IndexMap<String, PendingVerifier>);

impl PendingAuthorizations {
    fn insert(&mut self, state: String, verifier: PkceCodeVerifier, now: Timestamp) {
        self.0.retain(|_, pending| !pending.is_expired(now));
        while self.0.len() >= MAX_PENDING_AUTHORIZATIONS {
            self.0.shift_remove_index(0);
        }
        self.0.insert(
            state,
            PendingVerifier {
                started: now,
                verifier,
            },
        );
    }

    /// Removes the authorization for `state`, returning its verifier if it has not expired.
    fn take(&mut self, state: &str, now: Timestamp) -> Option<PkceCodeVerifier> {
        let pending = self.0.shift_remove(state)?;
        if pending.is_expired(now) {
            return None;
        }
        Some(pending.verifier)
    }

    fn len(&self) -> usize {
        self.0.len()
    }
}

/// State shared by all connections.
#[derive(Debug)]
pub struct AppState {
    pub services: Arc<Services>,
    pending: Mutex<PendingAuthorizations>,
}

impl AppState {
    pub fn new(services: Arc<Services>) -> Self {
        Self {
            services,
            pending: Mutex::new(PendingAuthorizations::default()),
        }
    }
}

type HttpResponse = Response<Full<Bytes>>;

fn respond(status: StatusCode, body: String) -> HttpResponse {
    let mut response = Response::new(Full::from(body));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    response
}

fn html(body: impl Into<String>) -> HttpResponse {
    respond(StatusCode::OK, body.into())
}

fn redirect(location: &str) -> eyre::Result<HttpResponse> {
    let mut response = Response::new(Full::default());
    *response.status_mut() = StatusCode::SEE_OTHER;
    response.headers_mut().insert(
        LOCATION,
        HeaderValue::from_str(location).context("build redirect location header")?,
    );
    Ok(response)
}

fn not_found() -> HttpResponse {
    respond(StatusCode::NOT_FOUND, "Not found.".to_string())
}

fn bad_request(message: &str) -> HttpResponse {
    respond(StatusCode::BAD_REQUEST, message.to_string())
}

fn login_page(error: Option<&str>) -> HttpResponse {
    let error = error
        .map(|e| format!("<p class=\"error\"><strong>Error:</strong> {e}</p>"))
        .unwrap_or_default();
    html(LOGIN_HTML.replace("<!--error-->", &error))
}

fn query_params(req: &Request<impl Body>) -> HashMap<String, String> {
    form_urlencoded::parse(req.uri().query().unwrap_or("").as_bytes())
        .into_owned()
        .collect()
}

/// Answers one request. Failures of the triggered action are logged and turned into a 500 page.
pub async fn handle<B>(state: &AppState, req: Request<B>) -> HttpResponse
where
    B: Body,
    B::Error: std::fmt::Display,
{
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    tracing::debug!(%method, %path, "handling request");

    match route(state, req).await {
        Ok(response) => response,
        Err(e) => {
            tracing::error!(%method, %path, "request failed: {e:?}");
            let message = format!("{e:#}");
            respond(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!(
                    "An error occurred: {}<br><br><a href=\"/\">Back</a>",
                    html_escape::encode_text(&message)
                ),
            )
        }
    }
}

async fn route<B>(state: &AppState, req: Request<B>) -> eyre::Result<HttpResponse>
where
    B: Body,
    B::Error: std::fmt::Display,
{
    let services = &state.services;
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/") => Ok(html(INDEX_HTML)),
        (&Method::GET, "/video-data") => {
            let summary = services.refresh_video_data().await?;
            tracing::info!(videos = summary.videos, "video data refreshed");
            redirect("/")
        }
        (&Method::GET, "/retention") => match services.refresh_retention().await? {
            RetentionOutcome::Updated { rows } => {
                tracing::info!(rows, "retention data refreshed");
                redirect("/")
            }
            RetentionOutcome::NotAuthorized => Ok(html(NOT_AUTHORIZED_RETENTION)),
        },
        (&Method::GET, "/authorize") => {
            let pending = services.oauth.authorization_url();
            state.pending.lock().await.insert(
                pending.state.secret().clone(),
                pending.pkce_verifier,
                Timestamp::now(),
            );
            tracing::info!("redirecting user to OAuth consent screen");
            redirect(pending.url.as_str())
        }
        (&Method::GET, "/oauth2callback") => oauth_callback(state, &query_params(&req)).await,
        (&Method::GET, "/revoke") => {
            let Some(credentials) = services.tokens.load().await? else {
                return Ok(html(NOT_AUTHORIZED_REVOKE));
            };
            let message = match services.oauth.revoke(&credentials).await {
                Ok(true) => "Credentials successfully revoked.",
                Ok(false) => "An error occurred.",
                Err(e) => {
                    tracing::warn!("token revocation failed: {e:?}");
                    "An error occurred."
                }
            };
            Ok(html(format!("{message}{INDEX_HTML}")))
        }
        (&Method::GET, "/clear") => {
            if services.tokens.clear().await? {
                tracing::info!("cleared stored OAuth credentials");
            }
            Ok(html(format!("Credentials have been cleared.<br><br>{INDEX_HTML}")))
        }
        (&Method::GET, "/login") => Ok(login_page(None)),
        (&Method::POST, "/login") => {
            let body = req
                .into_body()
                .collect()
                .await
                .map_err(|e| eyre::eyre!("read login form: {e}"))?
                .to_bytes();
            let form: HashMap<String, String> =
                form_urlencoded::parse(&body).into_owned().collect();

            let config = &services.config;
            let valid = form.get("username") == Some(&config.username)
                && form.get("password") == Some(&config.password);
            if valid {
                tracing::info!("user logged in");
                redirect("/")
            } else {
                tracing::warn!("rejected login attempt");
                Ok(login_page(Some("Invalid credentials")))
            }
        }
        _ => Ok(not_found()),
    }
}

async fn oauth_callback(
    state: &AppState,
    params: &HashMap<String, String>,
) -> eyre::Result<HttpResponse> {
    let Some(csrf_state) = params.get("state") else {
        return Ok(bad_request("Missing OAuth state."));
    };
    let Some(pkce_verifier) = state.pending.lock().await.take(csrf_state, Timestamp::now()) else {
        tracing::warn!("OAuth callback with unknown or expired state");
        return Ok(bad_request("Unknown, expired or already used OAuth state."));
    };
    if let Some(error) = params.get("error") {
        tracing::warn!(%error, "user did not grant access");
        return Ok(bad_request(&format!(
            "Authorization failed: {}",
            html_escape::encode_text(error)
        )));
    }
    let Some(code) = params.get("code") else {
        return Ok(bad_request("Missing authorization code."));
    };

    let services = &state.services;
    let credentials = services
        .oauth
        .exchange_code(code.clone(), pkce_verifier)
        .await?;
    services.tokens.save(&credentials).await?;
    tracing::info!("stored new OAuth credentials");
    redirect("/")
}

/// Accepts connections on `listener` until `shutdown` completes.
///
/// Each connection is served on its own task.
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()>,
) -> eyre::Result<()> {
    let mut shutdown = std::pin::pin!(shutdown);
    let local_addr = listener.local_addr().context("get local address")?;
    tracing::info!(%local_addr, "listening");

    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            () = &mut shutdown => {
                tracing::info!("shutting down");
                return Ok(());
            }
        };
        let (conn, remote_addr) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!("failed to accept connection: {e}");
                continue;
            }
        };

        let conn = TokioIo::new(conn);
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                let state = Arc::clone(&state);
                async move { Ok::<_, Infallible>(handle(&state, req).await) }
            });
            if let Err(e) = http1::Builder::new().serve_connection(conn, service).await {
                tracing::debug!(%remote_addr, "connection closed with error: {e}");
            }
        });
    }
}
