use {
    secrecy::{ExposeSecret, SecretString},
    serde::{Deserialize, Serialize, Serializer},
};

/// Scopes requested on every login: full client API, the authorization
/// server's admin API and the homeserver's admin API.
pub const ADMIN_SCOPES: &str =
    "urn:matrix:org.matrix.msc2967.client:api:* urn:mas:admin urn:synapse:admin:*";

/// `/.well-known/matrix/client` document.
#[derive(Debug, Clone, Deserialize)]
pub struct WellKnown {
    #[serde(rename = "m.homeserver")]
    pub homeserver: WellKnownHomeserver,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WellKnownHomeserver {
    pub base_url: String,
}

/// Authorization server metadata, as advertised by the homeserver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub registration_endpoint: String,
    pub token_endpoint: String,
}

/// Everything learned about a server before a session can start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerDiscovery {
    pub server_name: String,
    pub homeserver_url: String,
    pub auth: AuthMetadata,
}

/// Metadata sent with dynamic client registration.
#[derive(Debug, Clone, Serialize)]
pub struct ClientMetadata {
    pub application_type: String,
    pub client_name: String,
    pub client_uri: String,
    pub redirect_uris: Vec<String>,
    pub grant_types: Vec<String>,
    pub response_types: Vec<String>,
    pub token_endpoint_auth_method: String,
}

impl ClientMetadata {
    /// A public native client redirecting to a loopback address.
    pub fn native(client_name: &str, client_uri: &str, redirect_uri: &str) -> Self {
        Self {
            application_type: "native".into(),
            client_name: client_name.into(),
            client_uri: client_uri.into(),
            redirect_uris: vec![redirect_uri.into()],
            grant_types: vec!["authorization_code".into(), "refresh_token".into()],
            response_types: vec!["code".into()],
            token_endpoint_auth_method: "none".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientRegistration {
    pub client_id: String,
    #[serde(default)]
    pub client_id_issued_at: Option<u64>,
}

/// PKCE challenge pair.
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    pub verifier: String,
    pub challenge: String,
}

/// A login in flight, as handed to the caller building the redirect.
#[derive(Debug, Clone)]
pub struct AuthorizationSession {
    pub server_name: String,
    pub client_id: String,
    pub state: String,
    pub code_verifier: String,
    pub code_challenge: String,
    pub redirect_uri: String,
    pub device_id: String,
}

/// Persisted half of an [`AuthorizationSession`], keyed by `state`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSession {
    pub code_verifier: String,
    pub server_name: String,
    pub client_id: String,
    #[serde(default)]
    pub redirect_target: Option<String>,
    pub redirect_uri: String,
    pub issuer: String,
    pub token_endpoint: String,
    pub homeserver_url: String,
    pub device_id: String,
    pub created_at_ms: u64,
}

/// Access credentials produced by a completed login.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub server_name: String,
    pub homeserver_url: String,
    pub user_id: String,
    pub device_id: String,
    #[serde(serialize_with = "expose")]
    pub access_token: SecretString,
    #[serde(default, serialize_with = "expose_opt")]
    pub refresh_token: Option<SecretString>,
    /// Unix timestamp when the access token expires.
    #[serde(default)]
    pub expires_at: Option<u64>,
    pub client_id: String,
    pub issuer: String,
    pub token_endpoint: String,
}

impl Credentials {
    pub fn is_expired(&self, now_secs: u64) -> bool {
        self.expires_at.is_some_and(|at| at <= now_secs)
    }
}

fn expose<S: Serializer>(secret: &SecretString, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose_secret())
}

fn expose_opt<S: Serializer>(
    secret: &Option<SecretString>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(s) => serializer.serialize_some(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}

/// Successful token endpoint response.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
}

/// Standard OAuth error body.
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthErrorResponse {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WhoAmI {
    pub user_id: String,
    #[serde(default)]
    pub device_id: Option<String>,
}
