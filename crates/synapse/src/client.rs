use std::future::Future;

use {
    reqwest::{Method, RequestBuilder, Response},
    secrecy::{ExposeSecret, SecretString},
    serde::de::DeserializeOwned,
    tokio_util::sync::CancellationToken,
    tracing::debug,
    url::Url,
};

use crate::error::{AdminError, Result, decode, ensure_not_error};

/// Race `fut` against `cancel`; once the token fires the result is always
/// [`AdminError::Cancelled`].
pub(crate) async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(AdminError::Cancelled),
        res = fut => res,
    }
}

/// Authenticated client for the Synapse admin API of one homeserver.
#[derive(Clone)]
pub struct AdminClient {
    http: reqwest::Client,
    root: Url,
    access_token: SecretString,
}

impl AdminClient {
    pub fn new(homeserver_url: &str, access_token: SecretString) -> Result<Self> {
        Self::with_http(reqwest::Client::new(), homeserver_url, access_token)
    }

    pub fn with_http(
        http: reqwest::Client,
        homeserver_url: &str,
        access_token: SecretString,
    ) -> Result<Self> {
        Ok(Self {
            http,
            root: Url::parse(homeserver_url)?,
            access_token,
        })
    }

    pub fn root(&self) -> &Url {
        &self.root
    }

    /// Homeserver root as used in cache keys, without a trailing slash.
    pub fn root_key(&self) -> String {
        self.root.as_str().trim_end_matches('/').to_string()
    }

    pub(crate) fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.root.join(path)?)
    }

    /// `{prefix}/{room_id}{suffix}` with the room id percent-encoded.
    pub(crate) fn room_endpoint(&self, prefix: &str, room_id: &str, suffix: &str) -> Result<Url> {
        self.endpoint(&format!("{prefix}/{}{suffix}", urlencoding::encode(room_id)))
    }

    pub(crate) fn request(&self, method: Method, url: Url) -> RequestBuilder {
        debug!(%method, %url, "admin API request");
        self.http
            .request(method, url)
            .bearer_auth(self.access_token.expose_secret())
    }

    /// Send `req`, abandoning it as soon as `cancel` fires.
    pub(crate) async fn send(&self, req: RequestBuilder, cancel: &CancellationToken) -> Result<Response> {
        cancellable(cancel, async { Ok(req.send().await?) }).await
    }

    /// GET `url`, check the status and decode the body.
    pub(crate) async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        handle_not_found: bool,
        cancel: &CancellationToken,
    ) -> Result<T> {
        let req = self.request(Method::GET, url);
        cancellable(cancel, async {
            let resp = req.send().await?;
            let resp = ensure_not_error(resp, handle_not_found).await?;
            decode(resp).await
        })
        .await
    }
}
