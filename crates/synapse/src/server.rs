use {
    reqwest::Method,
    serde::{Deserialize, Serialize},
    tokio_util::sync::CancellationToken,
    tracing::warn,
    url::Url,
};

use crate::{
    client::{AdminClient, cancellable},
    error::{AdminError, Result, decode, ensure_not_error},
};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ServerVersion {
    pub server_version: String,
}

#[derive(Debug, Deserialize)]
struct AuthServerVersion {
    version: String,
}

impl AdminClient {
    pub async fn server_version(&self, cancel: &CancellationToken) -> Result<ServerVersion> {
        let url = self.endpoint("/_synapse/admin/v1/server_version")?;
        self.get_json(url, false, cancel).await
    }

    /// Probe the authorization server's admin API for its version. Failures
    /// other than cancellation read as "unknown".
    pub async fn auth_server_version(
        &self,
        issuer: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<String>> {
        let mut base = Url::parse(issuer)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let url = base.join("api/admin/v1/version")?;
        let req = self.request(Method::GET, url);
        let res = cancellable(cancel, async {
            let resp = ensure_not_error(req.send().await?, false).await?;
            let body: AuthServerVersion = decode(resp).await?;
            Ok(body.version)
        })
        .await;
        match res {
            Ok(version) => Ok(Some(version)),
            Err(AdminError::Cancelled) => Err(AdminError::Cancelled),
            Err(e) => {
                warn!(issuer, %e, "failed to read authorization server version");
                Ok(None)
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;

    use super::*;

    #[tokio::test]
    async fn test_server_version() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/_synapse/admin/v1/server_version")
            .match_header("authorization", "Bearer tok")
            .with_body(r#"{"server_version":"1.120.0"}"#)
            .create_async()
            .await;
        let client = AdminClient::new(&server.url(), SecretString::new("tok".into())).unwrap();
        let v = client.server_version(&CancellationToken::new()).await.unwrap();
        assert_eq!(v.server_version, "1.120.0");
    }

    #[tokio::test]
    async fn test_auth_server_version_under_issuer_path() {
        let mut server = mockito::Server::new_async().await;
        let m = server
            .mock("GET", "/auth/api/admin/v1/version")
            .with_body(r#"{"version":"v1.5.0"}"#)
            .create_async()
            .await;
        let client = AdminClient::new(&server.url(), SecretString::new("tok".into())).unwrap();
        let issuer = format!("{}/auth", server.url());
        let v = client
            .auth_server_version(&issuer, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(v.as_deref(), Some("v1.5.0"));
        m.assert_async().await;
    }

    #[tokio::test]
    async fn test_auth_server_version_degrades() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/api/admin/v1/version")
            .with_status(403)
            .create_async()
            .await;
        let client = AdminClient::new(&server.url(), SecretString::new("tok".into())).unwrap();
        let v = client
            .auth_server_version(&server.url(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(v.is_none());
    }
}
