use std::{future::Future, path::PathBuf, time::Duration};

use {
    anyhow::{Context as _, Result, bail},
    serde::Serialize,
    synadmin_common::{QueryCache, now_ms},
    synadmin_config::{RetryConfig, SynadminConfig},
    synadmin_oauth::{AuthorizationFlow, CredentialStore, Credentials, SessionStore},
    synadmin_synapse::{AdminClient, RetryPolicy},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info},
};

/// Everything a command needs: configuration, stores, HTTP client, cache and
/// the process-wide cancellation token.
pub struct Context {
    pub config: SynadminConfig,
    pub data_dir: PathBuf,
    pub http: reqwest::Client,
    pub cache: QueryCache,
    pub cancel: CancellationToken,
    pub json: bool,
}

/// A logged-in administrator and a client bound to their homeserver.
pub struct Session {
    pub credentials: Credentials,
    pub client: AdminClient,
}

impl Context {
    pub fn new(config: SynadminConfig, json: bool, cancel: CancellationToken) -> Result<Self> {
        let data_dir = synadmin_config::data_dir(&config)?;
        let http = reqwest::Client::builder()
            .user_agent(concat!("synadmin/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;
        let cache = QueryCache::new(config.cache.stale_time(), config.cache.gc_time());
        debug!(data_dir = %data_dir.display(), "context ready");
        Ok(Self {
            config,
            data_dir,
            http,
            cache,
            cancel,
            json,
        })
    }

    pub fn credential_store(&self) -> CredentialStore {
        CredentialStore::new(&self.data_dir)
    }

    pub fn session_store(&self) -> SessionStore {
        SessionStore::new(&self.data_dir)
    }

    pub fn authorization_flow(&self) -> AuthorizationFlow {
        AuthorizationFlow::new(
            self.http.clone(),
            self.session_store(),
            self.config.oauth.session_max_age(),
        )
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        retry_policy(&self.config.poll.retry)
    }

    /// Load stored credentials, refreshing them first when they expired.
    pub async fn session(&self) -> Result<Session> {
        let store = self.credential_store();
        let Some(mut credentials) = store.load().context("failed to read stored credentials")?
        else {
            bail!("not logged in, run `synadmin auth login` first");
        };

        if credentials.is_expired(now_ms() / 1000) {
            info!(user_id = %credentials.user_id, "access token expired, refreshing");
            credentials = self
                .authorization_flow()
                .refresh(&credentials, &self.cancel)
                .await
                .context("failed to refresh credentials, log in again")?;
            store.save(&credentials)?;
        }

        let client = AdminClient::with_http(
            self.http.clone(),
            &credentials.homeserver_url,
            credentials.access_token.clone(),
        )?;
        Ok(Session {
            credentials,
            client,
        })
    }

    /// Run `fut` unless Ctrl-C arrives first.
    pub async fn until_cancelled<T, E>(&self, fut: impl Future<Output = Result<T, E>>) -> Result<T>
    where
        E: Into<anyhow::Error>,
    {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => bail!("cancelled"),
            res = fut => res.map_err(Into::into),
        }
    }

    /// Print `value` as JSON when `--json` was given, otherwise run `human`.
    pub fn emit<T: Serialize>(&self, value: &T, human: impl FnOnce(&T)) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            human(value);
        }
        Ok(())
    }
}

pub fn retry_policy(config: &RetryConfig) -> RetryPolicy {
    match *config {
        RetryConfig::Fixed { delay_ms } => RetryPolicy::Fixed(Duration::from_millis(delay_ms)),
        RetryConfig::Exponential { base_ms, max_ms } => RetryPolicy::Exponential {
            base: Duration::from_millis(base_ms),
            max: Duration::from_millis(max_ms.max(base_ms)),
        },
    }
}

/// Human description of a token expiry.
pub fn describe_expiry(expires_at: Option<u64>, now_secs: u64) -> String {
    match expires_at {
        None => "no expiry".to_string(),
        Some(ts) if ts > now_secs => {
            let remaining = ts - now_secs;
            let hours = remaining / 3600;
            let mins = (remaining % 3600) / 60;
            format!("valid ({hours}h {mins}m remaining)")
        },
        Some(_) => "expired".to_string(),
    }
}
