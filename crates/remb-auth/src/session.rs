use crate::lock;
use crate::loopback::Loopback;
use remb_api::{AuthApi, Challenge, RefreshOutcome, Tokens};
use remb_core::{RembError, RembResult};
use remb_store::Store;
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Observable position of the auth lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPhase {
    Unknown,
    LoggedOut,
    SigningIn,
    SignedIn,
}

impl AuthPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthPhase::Unknown => "unknown",
            AuthPhase::LoggedOut => "logged-out",
            AuthPhase::SigningIn => "signing-in",
            AuthPhase::SignedIn => "signed-in",
        }
    }
}

#[derive(Debug)]
enum AuthState {
    Unknown,
    LoggedOut,
    SigningIn {
        listener: Arc<Loopback>,
        challenge: Challenge,
    },
    SignedIn {
        tokens: Tokens,
    },
}

impl AuthState {
    fn phase(&self) -> AuthPhase {
        match self {
            AuthState::Unknown => AuthPhase::Unknown,
            AuthState::LoggedOut => AuthPhase::LoggedOut,
            AuthState::SigningIn { .. } => AuthPhase::SigningIn,
            AuthState::SignedIn { .. } => AuthPhase::SignedIn,
        }
    }
}

/// Handle to an in-flight browser login. The URL is what the user must open;
/// `wait` blocks until the background attempt settles.
pub struct SignInFlow {
    url: String,
    outcome: Receiver<RembResult<()>>,
}

impl SignInFlow {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn wait(self) -> RembResult<()> {
        self.outcome
            .recv()
            .map_err(|_| RembError::auth("sign-in was abandoned before completion"))?
    }
}

#[derive(Debug)]
struct SessionInner {
    api: AuthApi,
    store: Store,
    listen_timeout: Duration,
    state: Mutex<AuthState>,
}

/// The auth state machine: `Unknown -> LoggedOut -> SigningIn -> SignedIn`,
/// with `close` returning to `Unknown` from anywhere.
///
/// Operations assert their starting state and panic on contract violations;
/// runtime failures (network, bad callbacks, rejected grants) come back as
/// errors and always land the machine in `LoggedOut` with tokens cleared.
#[derive(Clone, Debug)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    pub fn new(api: AuthApi, store: Store, listen_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                api,
                store,
                listen_timeout,
                state: Mutex::new(AuthState::Unknown),
            }),
        }
    }

    pub fn phase(&self) -> AuthPhase {
        lock(&self.inner.state).phase()
    }

    pub fn tokens(&self) -> Option<Tokens> {
        match &*lock(&self.inner.state) {
            AuthState::SignedIn { tokens } => Some(tokens.clone()),
            _ => None,
        }
    }

    /// Aligns the machine with the token store: stored tokens mean signed in,
    /// an empty store means logged out. States that already agree are left
    /// untouched.
    pub fn refresh_state_from_tokens(&self) -> RembResult<()> {
        let tokens = self.inner.store.load_tokens()?;
        let mut state = lock(&self.inner.state);
        match tokens {
            None => {
                if !matches!(*state, AuthState::LoggedOut) {
                    debug!("no stored tokens, session is logged out");
                    *state = AuthState::LoggedOut;
                }
            }
            Some(tokens) => {
                if !matches!(*state, AuthState::SignedIn { .. }) {
                    debug!("stored tokens found, session is signed in");
                    *state = AuthState::SignedIn { tokens };
                }
            }
        }
        Ok(())
    }

    /// Starts a browser login. Returns the authorize URL to open plus a
    /// handle for awaiting the outcome; the callback capture and token
    /// exchange run on a background thread.
    ///
    /// Panics unless the session is logged out.
    pub fn sign_in(&self) -> RembResult<SignInFlow> {
        {
            let state = lock(&self.inner.state);
            if !matches!(*state, AuthState::LoggedOut) {
                panic!(
                    "sign_in is only valid while logged out, session is {}",
                    state.phase().as_str()
                );
            }
        }

        let listener = Arc::new(Loopback::bind()?);
        let request = self.inner.api.authorize(listener.redirect_uri())?;

        {
            let mut state = lock(&self.inner.state);
            if !matches!(*state, AuthState::LoggedOut) {
                panic!(
                    "sign_in raced another operation, session is {}",
                    state.phase().as_str()
                );
            }
            *state = AuthState::SigningIn {
                listener: Arc::clone(&listener),
                challenge: request.challenge.clone(),
            };
        }

        let (tx, rx) = channel();
        if let Err(err) = self.spawn_sign_in_worker(listener, request.challenge, tx) {
            self.fail_sign_in();
            return Err(err);
        }

        info!("sign-in started, waiting for the browser callback");
        Ok(SignInFlow {
            url: request.url,
            outcome: rx,
        })
    }

    /// Aborts an in-flight login by closing its listener; the background
    /// worker then runs the regular failure path into `LoggedOut`.
    ///
    /// Panics unless the session is signing in.
    pub fn cancel_sign_in(&self) {
        let listener = {
            let state = lock(&self.inner.state);
            let AuthState::SigningIn { listener, .. } = &*state else {
                panic!(
                    "cancel_sign_in is only valid while signing in, session is {}",
                    state.phase().as_str()
                );
            };
            Arc::clone(listener)
        };

        info!("cancelling sign-in");
        listener.shutdown();
    }

    /// Clears persisted tokens and the pull cursor, then moves to
    /// `LoggedOut`.
    ///
    /// Panics unless the session is signed in.
    pub fn log_out(&self) -> RembResult<()> {
        let mut state = lock(&self.inner.state);
        if !matches!(*state, AuthState::SignedIn { .. }) {
            panic!(
                "log_out is only valid while signed in, session is {}",
                state.phase().as_str()
            );
        }

        self.inner.store.clear_tokens()?;
        self.inner.store.clear_cookie()?;
        *state = AuthState::LoggedOut;
        info!("logged out");
        Ok(())
    }

    /// Refreshes the current token pair, skipping the network while the
    /// access token is fresh. Any refresh failure clears the stored tokens
    /// and drops the session to `LoggedOut` so the user can re-login.
    ///
    /// Panics unless the session is signed in.
    pub fn refresh_tokens(&self) -> RembResult<()> {
        let current = {
            let state = lock(&self.inner.state);
            match &*state {
                AuthState::SignedIn { tokens } => tokens.clone(),
                _ => panic!(
                    "refresh_tokens is only valid while signed in, session is {}",
                    state.phase().as_str()
                ),
            }
        };

        match self
            .inner
            .api
            .refresh(&current.refresh, Some(&current.access))
        {
            Ok(RefreshOutcome::NoOp) => Ok(()),
            Ok(RefreshOutcome::Refreshed(tokens)) => {
                let mut state = lock(&self.inner.state);
                self.inner.store.save_tokens(&tokens)?;
                *state = AuthState::SignedIn { tokens };
                debug!("token pair refreshed");
                Ok(())
            }
            Err(error) => {
                warn!(error = %error, "token refresh failed, logging out");
                let mut state = lock(&self.inner.state);
                if let Err(clear_error) = self.inner.store.clear_tokens() {
                    warn!(error = %clear_error, "failed to clear stored tokens");
                }
                *state = AuthState::LoggedOut;
                Err(error)
            }
        }
    }

    /// Returns the machine to `Unknown`, closing any in-flight listener. A
    /// sign-in attempt completing after this point is discarded.
    pub fn close(&self) {
        let mut state = lock(&self.inner.state);
        if let AuthState::SigningIn { listener, .. } = &*state {
            listener.shutdown();
        }
        *state = AuthState::Unknown;
    }

    fn spawn_sign_in_worker(
        &self,
        listener: Arc<Loopback>,
        challenge: Challenge,
        tx: Sender<RembResult<()>>,
    ) -> RembResult<()> {
        let session = self.clone();
        thread::Builder::new()
            .name("remb-signin".to_string())
            .spawn(move || {
                let outcome = session.complete_sign_in(&listener, &challenge);
                let _ = tx.send(outcome);
            })
            .map_err(|err| RembError::listener(format!("failed to spawn sign-in worker: {err}")))?;
        Ok(())
    }

    fn complete_sign_in(&self, listener: &Loopback, challenge: &Challenge) -> RembResult<()> {
        let outcome = self
            .run_callback_exchange(listener, challenge)
            .and_then(|tokens| self.finish_sign_in(tokens));

        if let Err(error) = &outcome {
            warn!(error = %error, "sign-in attempt failed");
            self.fail_sign_in();
        }
        outcome
    }

    fn run_callback_exchange(
        &self,
        listener: &Loopback,
        challenge: &Challenge,
    ) -> RembResult<Tokens> {
        let callback = listener.listen(self.inner.listen_timeout)?;
        if callback.state != challenge.state {
            return Err(RembError::auth("Invalid 'state' parameter"));
        }

        self.inner
            .api
            .exchange(&callback.code, listener.redirect_uri(), &challenge.verifier)
    }

    fn finish_sign_in(&self, tokens: Tokens) -> RembResult<()> {
        let mut state = lock(&self.inner.state);
        if !matches!(*state, AuthState::SigningIn { .. }) {
            debug!(
                phase = state.phase().as_str(),
                "discarding sign-in completion, attempt no longer owns the session"
            );
            return Err(RembError::auth("sign-in was cancelled"));
        }

        self.inner.store.save_tokens(&tokens)?;
        *state = AuthState::SignedIn { tokens };
        info!("signed in");
        Ok(())
    }

    /// Failure path shared by every unsuccessful attempt: close the listener,
    /// clear persisted tokens, land in `LoggedOut`. Does nothing when the
    /// attempt no longer owns the session (a `close` raced it).
    fn fail_sign_in(&self) {
        let mut state = lock(&self.inner.state);
        let AuthState::SigningIn { listener, .. } = &*state else {
            return;
        };

        listener.shutdown();
        if let Err(error) = self.inner.store.clear_tokens() {
            warn!(error = %error, "failed to clear stored tokens after sign-in failure");
        }
        *state = AuthState::LoggedOut;
    }
}
