//! Server discovery: well-known document, then authorization server metadata.

use tracing::{debug, warn};

use crate::{
    error::{AuthError, Result},
    types::{AuthMetadata, ServerDiscovery, WellKnown},
};

const AUTH_METADATA_PATHS: &[&str] = &[
    "/_matrix/client/v1/auth_metadata",
    "/_matrix/client/unstable/org.matrix.msc2965/auth_metadata",
];

/// Trim and lowercase a user-typed server name. When a deployment suffix is
/// configured, whatever the user typed is treated as a prefix of it.
pub fn normalize_server_name(input: &str, suffix: Option<&str>) -> String {
    let trimmed = input.trim().to_lowercase();
    let Some(suffix) = suffix.map(|s| s.trim().trim_start_matches('.').to_lowercase()) else {
        return trimmed;
    };
    if trimmed.is_empty() || suffix.is_empty() {
        return trimmed;
    }
    let dotted = format!(".{suffix}");
    let prefix = trimmed.strip_suffix(&dotted).unwrap_or(&trimmed);
    if prefix.is_empty() || prefix == suffix {
        return String::new();
    }
    format!("{prefix}{dotted}")
}

fn well_known_url(server_name: &str) -> String {
    let base = if server_name.starts_with("http://") || server_name.starts_with("https://") {
        server_name.trim_end_matches('/').to_string()
    } else {
        format!("https://{server_name}")
    };
    format!("{base}/.well-known/matrix/client")
}

/// Resolve the homeserver base URL from `/.well-known/matrix/client`.
pub async fn well_known(http: &reqwest::Client, server_name: &str) -> Result<String> {
    let url = well_known_url(server_name);
    debug!(%url, "fetching well-known document");
    let fail = |reason: String| AuthError::Discovery {
        target: server_name.to_string(),
        reason,
    };

    let resp = http.get(&url).send().await?;
    if !resp.status().is_success() {
        return Err(fail(format!("well-known returned HTTP {}", resp.status())));
    }
    let bytes = resp.bytes().await?;
    let doc: WellKnown = serde_json::from_slice(&bytes)
        .map_err(|e| fail(format!("malformed well-known document: {e}")))?;
    Ok(doc.homeserver.base_url.trim_end_matches('/').to_string())
}

/// Fetch the authorization server metadata advertised by the homeserver,
/// trying the stable endpoint before the unstable one.
pub async fn auth_metadata(http: &reqwest::Client, homeserver_url: &str) -> Result<AuthMetadata> {
    let mut last_reason = String::new();
    for path in AUTH_METADATA_PATHS {
        let url = format!("{}{path}", homeserver_url.trim_end_matches('/'));
        debug!(%url, "fetching auth metadata");
        let resp = match http.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                last_reason = e.to_string();
                continue;
            },
        };
        if !resp.status().is_success() {
            last_reason = format!("{path} returned HTTP {}", resp.status());
            continue;
        }
        let bytes = resp.bytes().await?;
        match serde_json::from_slice::<AuthMetadata>(&bytes) {
            Ok(meta) => return Ok(meta),
            Err(e) => {
                warn!(%url, %e, "auth metadata failed validation");
                last_reason = format!("malformed auth metadata: {e}");
            },
        }
    }
    Err(AuthError::Discovery {
        target: homeserver_url.to_string(),
        reason: last_reason,
    })
}

/// Run both discovery steps for a server name.
pub async fn discover(http: &reqwest::Client, server_name: &str) -> Result<ServerDiscovery> {
    let homeserver_url = well_known(http, server_name).await?;
    let auth = auth_metadata(http, &homeserver_url).await?;
    debug!(%homeserver_url, issuer = %auth.issuer, "server discovered");
    Ok(ServerDiscovery {
        server_name: server_name.to_string(),
        homeserver_url,
        auth,
    })
}
