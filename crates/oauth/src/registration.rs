use tracing::info;

use crate::{
    error::{AuthError, Result},
    types::{ClientMetadata, ClientRegistration},
};

/// Register this console as a public client and return its `client_id`.
pub async fn register_client(
    http: &reqwest::Client,
    registration_endpoint: &str,
    metadata: &ClientMetadata,
) -> Result<ClientRegistration> {
    let resp = http.post(registration_endpoint).json(metadata).send().await?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(AuthError::Registration(format!("HTTP {status}: {body}")));
    }

    let bytes = resp.bytes().await?;
    let registration: ClientRegistration = serde_json::from_slice(&bytes)
        .map_err(|e| AuthError::Registration(format!("malformed registration response: {e}")))?;
    info!(client_id = %registration.client_id, "client registered");
    Ok(registration)
}
