//! HTTP adapter for the hosted platform's auth and table REST APIs.
//!
//! Thin wrapper over `reqwest`. Request building and response parsing are
//! split into pure functions (`parse_*`) so they can be tested without a
//! network. The adapter keeps the current session in memory, attaches its
//! access token to table requests, and emits an [`AuthChange`] on every
//! transition it performs.
//!
//! TRADE-OFFS
//! ==========
//! Session persistence across process restarts is left to the host: it can
//! read [`RestBackend::current_session`] on shutdown and hand it back via
//! [`RestBackend::restore_session`].

use std::time::Duration;

use reqwest::header::{ACCEPT, AUTHORIZATION};
use serde::Deserialize;
use time::OffsetDateTime;
use tokio::sync::{RwLock, broadcast};
use tracing::{info, warn};

use super::{AuthBackend, ChangeFeed, ProfileTable, SignUpResponse};
use crate::config::BackendConfig;
use crate::error::{AuthResult, ErrorKind, ProfileResult, StoreError};
use crate::models::{
    AuthChange, AuthEvent, NewProfile, Profile, ProfileUpdate, Session, SignUpMetadata, User, UserAttributes,
};

const SINGLE_OBJECT: &str = "application/vnd.pgrst.object+json";
const RETURN_REPRESENTATION: &str = "return=representation";
const NO_ROWS_CODE: &str = "PGRST116";

// =============================================================================
// CLIENT
// =============================================================================

pub struct RestBackend {
    http: reqwest::Client,
    config: BackendConfig,
    session: RwLock<Option<Session>>,
    feed: ChangeFeed,
}

impl RestBackend {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: BackendConfig) -> Result<Self, StoreError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeouts.request_secs))
            .connect_timeout(Duration::from_secs(config.timeouts.connect_secs))
            .build()
            .map_err(|e| StoreError::network(format!("http client build failed: {e}")))?;
        Ok(Self { http, config, session: RwLock::new(None), feed: ChangeFeed::new() })
    }

    #[must_use]
    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub async fn current_session(&self) -> Option<Session> {
        self.session.read().await.clone()
    }

    /// Seed a session persisted by the host. Does not notify listeners.
    pub async fn restore_session(&self, session: Session) {
        *self.session.write().await = Some(session);
    }

    /// Exchange the refresh token for a new session.
    ///
    /// # Errors
    ///
    /// Returns `Unauthorized` without a session, or the platform's error.
    pub async fn refresh_session(&self) -> AuthResult<Session> {
        let refresh_token = self
            .session
            .read()
            .await
            .as_ref()
            .map(|s| s.refresh_token.clone())
            .ok_or_else(|| StoreError::unauthorized("no session to refresh"))?;

        let body = self
            .send(
                self.http
                    .post(self.config.auth_url("token"))
                    .query(&[("grant_type", "refresh_token")])
                    .header("apikey", &self.config.anon_key)
                    .json(&serde_json::json!({ "refresh_token": refresh_token })),
            )
            .await?;
        let session = parse_session(&body, now_unix())?;
        self.replace_session(AuthEvent::TokenRefreshed, Some(session.clone())).await;
        info!(user_id = %session.user.id, "session refreshed");
        Ok(session)
    }

    /// A rejected refresh token ends the session; other failures keep it for
    /// the next attempt.
    async fn refresh_failed(&self, err: StoreError) -> AuthResult<Option<Session>> {
        if err.kind != ErrorKind::Unauthorized {
            return Err(err);
        }
        warn!(message = %err.message, "refresh rejected; dropping session");
        self.replace_session(AuthEvent::SignedOut, None).await;
        Ok(None)
    }

    async fn replace_session(&self, event: AuthEvent, session: Option<Session>) {
        *self.session.write().await = session.clone();
        self.feed.emit(event, session);
    }

    async fn bearer(&self) -> String {
        let token = self
            .session
            .read()
            .await
            .as_ref()
            .map_or_else(|| self.config.anon_key.clone(), |s| s.access_token.clone());
        format!("Bearer {token}")
    }

    async fn require_bearer(&self) -> AuthResult<String> {
        match self.session.read().await.as_ref() {
            Some(s) => Ok(format!("Bearer {}", s.access_token)),
            None => Err(StoreError::unauthorized("not signed in")),
        }
    }

    async fn table_request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .header("apikey", &self.config.anon_key)
            .header(AUTHORIZATION, self.bearer().await)
            .header(ACCEPT, SINGLE_OBJECT)
    }

    /// Send a request and return the body text, mapping non-2xx to a store error.
    async fn send(&self, request: reqwest::RequestBuilder) -> Result<String, StoreError> {
        let response = request.send().await?;
        let status = response.status().as_u16();
        let text = response.text().await?;

        if !(200..300).contains(&status) {
            let err = parse_error(status, &text);
            warn!(status, kind = ?err.kind, message = %err.message, "platform request failed");
            return Err(err);
        }
        Ok(text)
    }
}

#[async_trait::async_trait]
impl AuthBackend for RestBackend {
    async fn get_session(&self) -> AuthResult<Option<Session>> {
        let expired = self
            .session
            .read()
            .await
            .as_ref()
            .map(|s| s.is_expired_at(now_unix()));
        match expired {
            Some(true) => match self.refresh_session().await {
                Ok(session) => Ok(Some(session)),
                Err(e) => self.refresh_failed(e).await,
            },
            Some(false) => Ok(self.current_session().await),
            None => Ok(None),
        }
    }

    async fn sign_up(&self, email: &str, password: &str, metadata: &SignUpMetadata) -> AuthResult<SignUpResponse> {
        let body = self
            .send(
                self.http
                    .post(self.config.auth_url("signup"))
                    .header("apikey", &self.config.anon_key)
                    .json(&serde_json::json!({ "email": email, "password": password, "data": metadata })),
            )
            .await?;
        let response = parse_sign_up(&body, now_unix())?;
        if let Some(session) = &response.session {
            self.replace_session(AuthEvent::SignedIn, Some(session.clone())).await;
        }
        Ok(response)
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> AuthResult<Session> {
        let body = self
            .send(
                self.http
                    .post(self.config.auth_url("token"))
                    .query(&[("grant_type", "password")])
                    .header("apikey", &self.config.anon_key)
                    .json(&serde_json::json!({ "email": email, "password": password })),
            )
            .await?;
        let session = parse_session(&body, now_unix())?;
        self.replace_session(AuthEvent::SignedIn, Some(session.clone())).await;
        Ok(session)
    }

    async fn sign_out(&self) -> AuthResult<()> {
        if let Ok(bearer) = self.require_bearer().await {
            let result = self
                .send(
                    self.http
                        .post(self.config.auth_url("logout"))
                        .header("apikey", &self.config.anon_key)
                        .header(AUTHORIZATION, bearer),
                )
                .await;
            // An already-revoked token still ends the local session.
            match result {
                Ok(_) => {}
                Err(e) if e.kind == ErrorKind::Unauthorized || e.kind == ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        self.replace_session(AuthEvent::SignedOut, None).await;
        Ok(())
    }

    async fn update_user(&self, attributes: &UserAttributes) -> AuthResult<User> {
        let bearer = self.require_bearer().await?;
        let body = self
            .send(
                self.http
                    .put(self.config.auth_url("user"))
                    .header("apikey", &self.config.anon_key)
                    .header(AUTHORIZATION, bearer)
                    .json(&serde_json::json!({ "data": attributes })),
            )
            .await?;
        let user = parse_json::<User>(&body)?;

        let updated = self.session.read().await.clone().map(|mut s| {
            s.user = user.clone();
            s
        });
        if updated.is_some() {
            self.replace_session(AuthEvent::UserUpdated, updated).await;
        }
        Ok(user)
    }

    async fn reset_password_for_email(&self, email: &str) -> AuthResult<()> {
        self.send(
            self.http
                .post(self.config.auth_url("recover"))
                .header("apikey", &self.config.anon_key)
                .json(&serde_json::json!({ "email": email })),
        )
        .await?;
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthChange> {
        self.feed.subscribe()
    }
}

#[async_trait::async_trait]
impl ProfileTable for RestBackend {
    async fn select_by_id(&self, id: &str) -> ProfileResult<Profile> {
        let request = self
            .table_request(reqwest::Method::GET, self.config.table_url())
            .await
            .query(&[("id", format!("eq.{id}")), ("select", "*".to_owned())]);
        let body = self.send(request).await?;
        parse_json(&body)
    }

    async fn update_by_id(&self, id: &str, update: &ProfileUpdate) -> ProfileResult<Profile> {
        let request = self
            .table_request(reqwest::Method::PATCH, self.config.table_url())
            .await
            .query(&[("id", format!("eq.{id}"))])
            .header("Prefer", RETURN_REPRESENTATION)
            .json(update);
        let body = self.send(request).await?;
        parse_json(&body)
    }

    async fn insert(&self, profile: &NewProfile) -> ProfileResult<Profile> {
        let request = self
            .table_request(reqwest::Method::POST, self.config.table_url())
            .await
            .header("Prefer", RETURN_REPRESENTATION)
            .json(&[profile]);
        let body = self.send(request).await?;
        parse_json(&body)
    }
}

// =============================================================================
// PARSING
// =============================================================================

/// Error body shapes used by the auth and table services.
#[derive(Deserialize, Default)]
struct ErrorBody {
    code: Option<serde_json::Value>,
    error_code: Option<String>,
    msg: Option<String>,
    message: Option<String>,
    error_description: Option<String>,
    error: Option<String>,
}

fn parse_error(status: u16, body: &str) -> StoreError {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    let code = parsed
        .code
        .as_ref()
        .and_then(|c| c.as_str().map(str::to_owned))
        .or(parsed.error_code);

    let kind = match code.as_deref() {
        Some(NO_ROWS_CODE) => ErrorKind::NotFound,
        Some("invalid_credentials" | "bad_jwt" | "session_not_found") => ErrorKind::Unauthorized,
        _ => ErrorKind::from_status(status),
    };

    let message = parsed
        .msg
        .or(parsed.message)
        .or(parsed.error_description)
        .or(parsed.error)
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| if body.trim().is_empty() { format!("http status {status}") } else { body.to_owned() });

    StoreError::new(kind, message)
}

fn parse_json<T: serde::de::DeserializeOwned>(body: &str) -> Result<T, StoreError> {
    serde_json::from_str(body).map_err(|e| StoreError::network(format!("unexpected response: {e}")))
}

fn parse_session(body: &str, now_unix: i64) -> Result<Session, StoreError> {
    let mut session: Session = parse_json(body)?;
    if session.expires_at.is_none() {
        session.expires_at = session.expires_in.map(|secs| now_unix + secs);
    }
    Ok(session)
}

/// Sign-up returns a full session when auto-confirm is on, or a bare user
/// awaiting email confirmation.
fn parse_sign_up(body: &str, now_unix: i64) -> Result<SignUpResponse, StoreError> {
    let value: serde_json::Value = parse_json(body)?;
    if value.get("access_token").is_some() {
        let session = parse_session(body, now_unix)?;
        return Ok(SignUpResponse { user: Some(session.user.clone()), session: Some(session) });
    }
    let user = serde_json::from_value::<User>(value).map_err(|e| StoreError::network(format!("unexpected response: {e}")))?;
    Ok(SignUpResponse { user: Some(user), session: None })
}

fn now_unix() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

#[cfg(test)]
#[path = "rest_test.rs"]
mod tests;
