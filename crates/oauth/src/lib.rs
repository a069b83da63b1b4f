pub mod callback_server;
pub mod discovery;
pub mod error;
pub mod flow;
pub mod pkce;
pub mod registration;
pub mod storage;
pub mod types;

pub use {
    callback_server::{CallbackOutcome, CallbackParams, CallbackServer},
    discovery::{discover, normalize_server_name},
    error::AuthError,
    flow::{AuthorizationFlow, build_authorization_url},
    registration::register_client,
    storage::{CredentialStore, SessionStore},
    types::{
        AuthMetadata, AuthorizationSession, ClientMetadata, Credentials, PkceChallenge,
        ServerDiscovery,
    },
};
