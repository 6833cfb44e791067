use crate::token::decode_access_token;
use crate::{network_error, pkce};
use chrono::Utc;
use remb_core::{ErrorKind, RembError, RembResult};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

pub const DEFAULT_ISSUER_URL: &str = "https://auth.rember.com";
pub const DEFAULT_CLIENT_ID: &str = "remb-anki-sync";

// Tokens that expire within this window are refreshed anyway, so a request
// started just before expiry cannot race the server clock.
const REFRESH_SKEW_SECONDS: i64 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tokens {
    pub access: String,
    pub refresh: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub state: String,
    pub verifier: String,
}

#[derive(Debug, Clone)]
pub struct AuthorizeRequest {
    pub url: String,
    pub challenge: Challenge,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    /// The access token is still valid; no request was made.
    NoOp,
    Refreshed(Tokens),
}

#[derive(Debug, Deserialize)]
struct TokenGrant {
    access_token: String,
    refresh_token: String,
}

#[derive(Debug, Clone)]
pub struct AuthApi {
    issuer_url: String,
    client_id: String,
    client: Client,
}

impl AuthApi {
    pub fn new(issuer_url: &str, client_id: &str) -> RembResult<Self> {
        let trimmed = issuer_url.trim_end_matches('/').to_string();
        if trimmed.is_empty() {
            return Err(RembError::usage("issuer URL cannot be empty"));
        }
        if client_id.trim().is_empty() {
            return Err(RembError::usage("client id cannot be empty"));
        }

        Ok(Self {
            issuer_url: trimmed,
            client_id: client_id.to_string(),
            client: crate::build_client()?,
        })
    }

    /// Builds the provider authorize URL for one login attempt. The returned
    /// challenge must be held for the matching `exchange` call and the state
    /// compared against the redirect callback.
    pub fn authorize(&self, redirect_uri: &str) -> RembResult<AuthorizeRequest> {
        let verifier = pkce::generate_verifier();
        let code_challenge = pkce::generate_challenge(&verifier);
        let state = pkce::generate_state();

        let url = reqwest::Url::parse_with_params(
            &format!("{}/authorize", self.issuer_url),
            &[
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", redirect_uri),
                ("response_type", "code"),
                ("state", state.as_str()),
                ("code_challenge_method", "S256"),
                ("code_challenge", code_challenge.as_str()),
            ],
        )
        .map_err(|err| RembError::usage(format!("invalid issuer URL: {err}")))?;

        Ok(AuthorizeRequest {
            url: url.to_string(),
            challenge: Challenge { state, verifier },
        })
    }

    pub fn exchange(&self, code: &str, redirect_uri: &str, verifier: &str) -> RembResult<Tokens> {
        let params = [
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("grant_type", "authorization_code"),
            ("client_id", self.client_id.as_str()),
            ("code_verifier", verifier),
        ];

        let response = self
            .client
            .post(self.url("/token"))
            .form(&params)
            .send()
            .map_err(|err| network_error(ErrorKind::Auth, err))?;

        if !response.status().is_success() {
            return Err(RembError::auth("Invalid authorization code."));
        }

        parse_token_grant(response)
    }

    /// Refreshes the token pair. When an access token is supplied its payload
    /// decides whether a network request is needed at all: a token that stays
    /// valid past the skew window short-circuits to `NoOp`, while an
    /// undecodable one is reported as a token error before any request.
    pub fn refresh(
        &self,
        refresh_token: &str,
        access_token: Option<&str>,
    ) -> RembResult<RefreshOutcome> {
        if let Some(access) = access_token {
            let claims = decode_access_token(access)?;
            let fresh_until = (Utc::now().timestamp() + REFRESH_SKEW_SECONDS) as f64;
            if claims.exp > fresh_until {
                return Ok(RefreshOutcome::NoOp);
            }
        }

        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];

        let response = self
            .client
            .post(self.url("/token"))
            .form(&params)
            .send()
            .map_err(|err| network_error(ErrorKind::Auth, err))?;

        if !response.status().is_success() {
            return Err(RembError::auth("Invalid refresh token."));
        }

        parse_token_grant(response).map(RefreshOutcome::Refreshed)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.issuer_url, path)
    }
}

fn parse_token_grant(response: reqwest::blocking::Response) -> RembResult<Tokens> {
    let grant: TokenGrant = response
        .json()
        .map_err(|err| RembError::auth(format!("malformed token response: {err}")))?;

    Ok(Tokens {
        access: grant.access_token,
        refresh: grant.refresh_token,
    })
}
