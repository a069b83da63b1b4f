use std::{
    net::SocketAddr,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use {
    axum::{
        Router,
        extract::{Query, State},
        response::Html,
        routing::get,
    },
    serde::Deserialize,
    tokio::{net::TcpListener, sync::oneshot},
    tokio_util::sync::CancellationToken,
    tracing::{debug, warn},
};

use crate::error::{AuthError, Result};

/// Query parameters of the authorization redirect.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CallbackParams {
    pub state: Option<String>,
    pub code: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// What the authorization server sent back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    Code {
        state: String,
        code: String,
    },
    Denied {
        state: String,
        error: String,
        description: Option<String>,
    },
}

impl CallbackParams {
    /// A redirect without `state` cannot be matched to any session.
    pub fn into_outcome(self) -> Result<CallbackOutcome> {
        let state = self.state.ok_or(AuthError::SessionNotFound)?;
        match (self.code, self.error) {
            (_, Some(error)) => Ok(CallbackOutcome::Denied {
                state,
                error,
                description: self.error_description,
            }),
            (Some(code), None) => Ok(CallbackOutcome::Code { state, code }),
            (None, None) => Ok(CallbackOutcome::Denied {
                state,
                error: "invalid_request".into(),
                description: Some("redirect carried neither code nor error".into()),
            }),
        }
    }
}

type Slot = Arc<Mutex<Option<oneshot::Sender<CallbackParams>>>>;

async fn handle_callback(
    State(slot): State<Slot>,
    Query(params): Query<CallbackParams>,
) -> Html<&'static str> {
    let sender = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
    match sender {
        Some(tx) => {
            let denied = params.error.is_some();
            let _ = tx.send(params);
            if denied {
                Html("<h1>Authorization denied</h1><p>You can close this window.</p>")
            } else {
                Html("<h1>Logged in</h1><p>You can close this window and return to the terminal.</p>")
            }
        },
        None => {
            warn!("ignoring repeated authorization callback");
            Html("<h1>Already handled</h1>")
        },
    }
}

/// One-shot loopback listener that captures the authorization redirect.
pub struct CallbackServer {
    listener: TcpListener,
}

impl CallbackServer {
    /// Bind `127.0.0.1:port` (0 picks a free port). Bind before sending the
    /// user to the browser so the redirect cannot race the listener.
    pub async fn bind(port: u16) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .map_err(AuthError::Listener)?;
        debug!(addr = ?listener.local_addr().ok(), "callback server bound");
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().map_err(AuthError::Listener)
    }

    /// Serve until the first `/callback` request, `timeout`, or cancellation.
    pub async fn wait(self, timeout: Duration, cancel: &CancellationToken) -> Result<CallbackParams> {
        let (tx, rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let slot: Slot = Arc::new(Mutex::new(Some(tx)));

        let app = Router::new()
            .route("/callback", get(handle_callback))
            .with_state(slot);
        let server = tokio::spawn(async move {
            let shutdown = async {
                let _ = shutdown_rx.await;
            };
            if let Err(e) = axum::serve(self.listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                warn!(%e, "callback server stopped with error");
            }
        });

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(AuthError::Cancelled),
            () = tokio::time::sleep(timeout) => Err(AuthError::CallbackTimeout),
            params = rx => params.map_err(|_| AuthError::CallbackTimeout),
        };

        let _ = shutdown_tx.send(());
        let _ = server.await;
        result
    }
}
