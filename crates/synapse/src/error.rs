use {
    reqwest::{Response, StatusCode},
    serde::Deserialize,
    tracing::warn,
};

/// Errors raised by admin API calls.
#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("{errcode}: {error} (HTTP {status})")]
    Matrix {
        status: u16,
        errcode: String,
        error: String,
    },

    #[error("not found: {error}")]
    NotFound { errcode: String, error: String },

    #[error("unexpected HTTP {status} from {url}")]
    UnexpectedStatus { status: u16, url: String },

    #[error("response did not match the expected shape: {0}")]
    Schema(#[from] serde_json::Error),

    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl AdminError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// The Matrix error code, when the server sent one.
    pub fn errcode(&self) -> Option<&str> {
        match self {
            Self::Matrix { errcode, .. } | Self::NotFound { errcode, .. } => Some(errcode),
            _ => None,
        }
    }
}

pub type Result<T, E = AdminError> = std::result::Result<T, E>;

#[derive(Debug, Deserialize)]
struct MatrixErrorBody {
    errcode: String,
    error: String,
}

/// Pass successful responses through; turn the rest into a typed error.
///
/// A body that is not `{errcode, error}` surfaces the bare status. With
/// `handle_not_found`, a 404 carrying `M_NOT_FOUND` becomes
/// [`AdminError::NotFound`].
pub(crate) async fn ensure_not_error(resp: Response, handle_not_found: bool) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let url = resp.url().to_string();
    let body = resp.bytes().await.unwrap_or_default();
    let Ok(matrix) = serde_json::from_slice::<MatrixErrorBody>(&body) else {
        return Err(AdminError::UnexpectedStatus {
            status: status.as_u16(),
            url,
        });
    };

    if handle_not_found && status == StatusCode::NOT_FOUND && matrix.errcode == "M_NOT_FOUND" {
        warn!(%url, error = %matrix.error, "resource not found");
        return Err(AdminError::NotFound {
            errcode: matrix.errcode,
            error: matrix.error,
        });
    }

    Err(AdminError::Matrix {
        status: status.as_u16(),
        errcode: matrix.errcode,
        error: matrix.error,
    })
}

/// Decode a JSON body, logging the contract violation when it does not fit.
pub(crate) async fn decode<T: serde::de::DeserializeOwned>(resp: Response) -> Result<T> {
    let url = resp.url().to_string();
    let body = resp.bytes().await?;
    serde_json::from_slice(&body).map_err(|e| {
        warn!(%url, %e, "response failed schema validation");
        AdminError::Schema(e)
    })
}
