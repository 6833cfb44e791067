mod reconcile;

pub use reconcile::{ITEM_KEY_PREFIX, PatchSummary, Reconciler};

use remb_api::{SyncApi, decode_access_token};
use remb_auth::{AuthPhase, Session};
use remb_core::{RembError, RembResult};
use remb_fs::Config;
use remb_store::Store;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Cursor and counts reported by one successful pull.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullOutcome {
    pub cookie: Option<i64>,
    pub users_put: usize,
    pub users_deleted: usize,
    pub notes_created: usize,
    pub notes_updated: usize,
    pub notes_deleted: usize,
}

/// Runs the pull protocol end to end: refresh the token pair, fetch the
/// patch since the stored cursor, reconcile it into the store, then advance
/// the cursor. The cursor only moves after the whole patch has been applied,
/// so a failed pull is always retried from the previous position.
#[derive(Debug)]
pub struct Puller<'a> {
    api: &'a SyncApi,
    session: &'a Session,
    store: &'a Store,
    site_url: String,
    slot_limit: usize,
    gate: Mutex<()>,
}

impl<'a> Puller<'a> {
    pub fn new(api: &'a SyncApi, session: &'a Session, store: &'a Store, config: &Config) -> Self {
        Self {
            api,
            session,
            store,
            site_url: config.site_url.trim_end_matches('/').to_string(),
            slot_limit: config.slot_limit,
            gate: Mutex::new(()),
        }
    }

    /// Pulls and reconciles once. Calls are serialized internally; a
    /// `Puller` shared across threads never interleaves two reconciliations.
    pub fn pull(&self) -> RembResult<PullOutcome> {
        let _serialized = self
            .gate
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        match self.run_pull() {
            Ok(outcome) => {
                info!(cookie = outcome.cookie, "pull succeeded");
                Ok(outcome)
            }
            Err(error) => {
                warn!(kind = ?error.kind, error = %error.message, "pull failed");
                Err(error)
            }
        }
    }

    fn run_pull(&self) -> RembResult<PullOutcome> {
        if self.session.phase() != AuthPhase::SignedIn {
            return Err(RembError::auth(
                "not signed in; run `remb auth login` first",
            ));
        }

        let cursor = self.store.load_cookie()?;
        let user_id = self.log_user_id();
        info!(
            version = env!("CARGO_PKG_VERSION"),
            user_id = user_id.as_deref(),
            cookie = cursor,
            "pull started"
        );

        self.session.refresh_tokens()?;
        let Some(tokens) = self.session.tokens() else {
            return Err(RembError::auth(
                "not signed in; run `remb auth login` first",
            ));
        };

        let response = self.api.pull(cursor, &tokens.access)?;
        debug!(
            ops = response.patch.len(),
            cookie = response.cookie,
            "patch received"
        );

        let reconciler = Reconciler::new(self.store, &self.site_url, self.slot_limit);
        let summary = reconciler.apply(&response.patch)?;
        debug!(
            put = summary.users_put,
            deleted = summary.users_deleted,
            "user records reconciled"
        );
        debug!(
            created = summary.notes_created,
            updated = summary.notes_updated,
            deleted = summary.notes_deleted,
            "notes reconciled"
        );

        match response.cookie {
            Some(cookie) => self.store.save_cookie(cookie)?,
            None => self.store.clear_cookie()?,
        }

        Ok(PullOutcome {
            cookie: response.cookie,
            users_put: summary.users_put,
            users_deleted: summary.users_deleted,
            notes_created: summary.notes_created,
            notes_updated: summary.notes_updated,
            notes_deleted: summary.notes_deleted,
        })
    }

    /// Best effort; log context must never fail the operation it annotates.
    fn log_user_id(&self) -> Option<String> {
        let tokens = self.session.tokens()?;
        decode_access_token(&tokens.access)
            .ok()
            .map(|claims| claims.subject_id)
    }
}
