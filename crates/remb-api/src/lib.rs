use remb_core::{ErrorKind, RembError, RembResult};
use reqwest::blocking::Client;
use std::time::Duration;

mod auth;
mod pkce;
mod pull;
mod token;

pub use auth::{
    AuthApi, AuthorizeRequest, Challenge, DEFAULT_CLIENT_ID, DEFAULT_ISSUER_URL, RefreshOutcome,
    Tokens,
};
pub use pkce::{generate_challenge, generate_state, generate_verifier};
pub use pull::{DEFAULT_API_URL, PatchOp, PullResponse, SyncApi, VERSION_SCHEMA};
pub use token::{AccessClaims, decode_access_token};

pub(crate) fn build_client() -> RembResult<Client> {
    Client::builder()
        .timeout(Duration::from_secs(30))
        .user_agent(concat!("remb/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|err| RembError::io(format!("failed to construct HTTP client: {err}")))
}

pub(crate) fn network_error(kind: ErrorKind, err: reqwest::Error) -> RembError {
    RembError::new(kind, format!("network request failed: {err}"))
}
