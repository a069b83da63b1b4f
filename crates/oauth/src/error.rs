/// Errors raised while logging in. All of them end the login attempt; the
/// user has to start a new session.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid or expired authorization session")]
    SessionNotFound,

    #[error("authorization denied: {}", describe_denial(.error, .description))]
    AuthorizationDenied {
        error: String,
        description: Option<String>,
    },

    #[error("credentials cannot be refreshed without a refresh token")]
    NotRefreshable,

    #[error("discovery failed for {target}: {reason}")]
    Discovery { target: String, reason: String },

    #[error("client registration failed: {0}")]
    Registration(String),

    #[error("failed to gather randomness: {0}")]
    Randomness(String),

    #[error("session storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("malformed JSON: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("callback listener failed: {0}")]
    Listener(std::io::Error),

    #[error("timed out waiting for the authorization redirect")]
    CallbackTimeout,

    #[error("operation cancelled")]
    Cancelled,
}

fn describe_denial(error: &str, description: &Option<String>) -> String {
    match description {
        Some(d) if !d.is_empty() => format!("{error} ({d})"),
        _ => error.to_string(),
    }
}

pub type Result<T, E = AuthError> = std::result::Result<T, E>;
