//! Authorization code flow with PKCE.
//!
//! [`AuthorizationFlow::start_session`] persists the PKCE verifier under a
//! random `state`, [`build_authorization_url`] produces the redirect, and
//! [`AuthorizationFlow::complete_session`] consumes the pending session
//! exactly once and exchanges the code for credentials.

use std::{future::Future, time::Duration};

use {
    secrecy::{ExposeSecret, SecretString},
    synadmin_common::now_ms,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
    url::Url,
};

use crate::{
    error::{AuthError, Result},
    pkce,
    storage::SessionStore,
    types::{
        ADMIN_SCOPES, AuthorizationSession, Credentials, OAuthErrorResponse, PendingSession,
        ServerDiscovery, TokenResponse, WhoAmI,
    },
};

/// Race `fut` against `cancel`, never resolving with a value once
/// cancellation has been observed.
pub(crate) async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(AuthError::Cancelled),
        res = fut => res,
    }
}

/// Scope string for a login binding the given device id.
pub fn scope_for_device(device_id: &str) -> String {
    format!("{ADMIN_SCOPES} urn:matrix:org.matrix.msc2967.client:device:{device_id}")
}

/// Build the URL the user agent is sent to. Any query already present on the
/// endpoint is replaced.
pub fn build_authorization_url(
    authorization_endpoint: &str,
    session: &AuthorizationSession,
) -> Result<Url> {
    let mut url = Url::parse(authorization_endpoint)?;
    url.query_pairs_mut()
        .clear()
        .append_pair("response_type", "code")
        .append_pair("client_id", &session.client_id)
        .append_pair("redirect_uri", &session.redirect_uri)
        .append_pair("scope", &scope_for_device(&session.device_id))
        .append_pair("state", &session.state)
        .append_pair("code_challenge", &session.code_challenge)
        .append_pair("code_challenge_method", "S256");
    Ok(url)
}

pub struct AuthorizationFlow {
    http: reqwest::Client,
    store: SessionStore,
    session_max_age: Duration,
}

impl AuthorizationFlow {
    /// Create the flow and evict pending sessions abandoned by earlier runs.
    pub fn new(http: reqwest::Client, store: SessionStore, session_max_age: Duration) -> Self {
        match store.collect_garbage(session_max_age) {
            Ok(0) => {},
            Ok(evicted) => info!(evicted, "evicted abandoned authorization sessions"),
            Err(e) => warn!(%e, "failed to garbage-collect authorization sessions"),
        }
        Self {
            http,
            store,
            session_max_age,
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Generate `state` and PKCE secrets and persist the pending session.
    /// No network traffic.
    pub fn start_session(
        &self,
        discovery: &ServerDiscovery,
        client_id: &str,
        redirect_uri: &str,
        redirect_target: Option<String>,
    ) -> Result<AuthorizationSession> {
        let pkce = pkce::generate()?;
        let state = pkce::generate_state()?;
        let device_id = pkce::generate_device_id()?;

        self.store.insert(&state, PendingSession {
            code_verifier: pkce.verifier.clone(),
            server_name: discovery.server_name.clone(),
            client_id: client_id.to_string(),
            redirect_target,
            redirect_uri: redirect_uri.to_string(),
            issuer: discovery.auth.issuer.clone(),
            token_endpoint: discovery.auth.token_endpoint.clone(),
            homeserver_url: discovery.homeserver_url.clone(),
            device_id: device_id.clone(),
            created_at_ms: now_ms(),
        })?;
        info!(server_name = %discovery.server_name, %device_id, "authorization session started");

        Ok(AuthorizationSession {
            server_name: discovery.server_name.clone(),
            client_id: client_id.to_string(),
            state,
            code_verifier: pkce.verifier,
            code_challenge: pkce.challenge,
            redirect_uri: redirect_uri.to_string(),
            device_id,
        })
    }

    /// Consume the pending session for `state` and exchange `code` for
    /// credentials. The pending session is gone afterwards whatever the
    /// outcome.
    pub async fn complete_session(
        &self,
        state: &str,
        code: &str,
        cancel: &CancellationToken,
    ) -> Result<Credentials> {
        let pending = self
            .store
            .take(state, self.session_max_age)?
            .ok_or(AuthError::SessionNotFound)?;
        info!(server_name = %pending.server_name, "exchanging authorization code");

        let tokens = cancellable(
            cancel,
            self.post_token(&pending.token_endpoint, &[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("code_verifier", pending.code_verifier.as_str()),
                ("redirect_uri", pending.redirect_uri.as_str()),
                ("client_id", pending.client_id.as_str()),
            ]),
        )
        .await?;

        let whoami = cancellable(
            cancel,
            self.whoami(&pending.homeserver_url, &tokens.access_token),
        )
        .await?;

        let device_id = tokens
            .device_id
            .or(whoami.device_id)
            .unwrap_or(pending.device_id);
        info!(user_id = %whoami.user_id, %device_id, "login complete");

        Ok(Credentials {
            server_name: pending.server_name,
            homeserver_url: pending.homeserver_url,
            user_id: whoami.user_id,
            device_id,
            expires_at: expires_at(tokens.expires_in),
            access_token: SecretString::new(tokens.access_token),
            refresh_token: tokens.refresh_token.map(SecretString::new),
            client_id: pending.client_id,
            issuer: pending.issuer,
            token_endpoint: pending.token_endpoint,
        })
    }

    /// The redirect came back with an error instead of a code: drop the
    /// pending session and report the denial.
    pub fn fail_session(&self, state: &str, error: String, description: Option<String>) -> AuthError {
        match self.store.take(state, self.session_max_age) {
            Ok(Some(_)) => debug!("discarded denied authorization session"),
            Ok(None) => return AuthError::SessionNotFound,
            Err(e) => warn!(%e, "failed to discard denied authorization session"),
        }
        AuthError::AuthorizationDenied { error, description }
    }

    /// Trade the refresh token for a new access token.
    pub async fn refresh(
        &self,
        credentials: &Credentials,
        cancel: &CancellationToken,
    ) -> Result<Credentials> {
        let refresh_token = credentials
            .refresh_token
            .as_ref()
            .ok_or(AuthError::NotRefreshable)?;

        let tokens = cancellable(
            cancel,
            self.post_token(&credentials.token_endpoint, &[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.expose_secret().as_str()),
                ("client_id", credentials.client_id.as_str()),
            ]),
        )
        .await?;
        info!(user_id = %credentials.user_id, "access token refreshed");

        let mut refreshed = credentials.clone();
        refreshed.expires_at = expires_at(tokens.expires_in);
        refreshed.access_token = SecretString::new(tokens.access_token);
        if let Some(rotated) = tokens.refresh_token {
            refreshed.refresh_token = Some(SecretString::new(rotated));
        }
        Ok(refreshed)
    }

    async fn post_token(&self, token_endpoint: &str, form: &[(&str, &str)]) -> Result<TokenResponse> {
        let resp = self.http.post(token_endpoint).form(form).send().await?;
        let status = resp.status();
        let bytes = resp.bytes().await?;

        if status.is_success() {
            return Ok(serde_json::from_slice(&bytes)?);
        }

        match serde_json::from_slice::<OAuthErrorResponse>(&bytes) {
            Ok(err) => Err(AuthError::AuthorizationDenied {
                error: err.error,
                description: err.error_description,
            }),
            Err(_) => {
                let body = String::from_utf8_lossy(&bytes).trim().to_string();
                Err(AuthError::AuthorizationDenied {
                    error: format!("HTTP {status}"),
                    description: (!body.is_empty()).then_some(body),
                })
            },
        }
    }

    async fn whoami(&self, homeserver_url: &str, access_token: &str) -> Result<WhoAmI> {
        let url = format!(
            "{}/_matrix/client/v3/account/whoami",
            homeserver_url.trim_end_matches('/')
        );
        let resp = self
            .http
            .get(&url)
            .bearer_auth(access_token)
            .send()
            .await?
            .error_for_status()?;
        let bytes = resp.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

fn expires_at(expires_in: Option<u64>) -> Option<u64> {
    expires_in.map(|secs| now_ms() / 1000 + secs)
}
