//! One-shot account deletion guarded by a persisted flag.

use std::sync::Arc;

use relaysync_core::SyncResult;
use relaysync_requests::{NewRequestsNotifier, Request, RequestGenerator};

use crate::config::SyncConfig;
use crate::context::{SyncContext, SyncEnvironment};
use crate::metadata::PersistentMetadataStore;

/// Metadata key of the "user asked to delete the account" flag.
pub const USER_DELETION_INITIATED_KEY: &str = "UserDeletionInitiatedKey";

/// Ends the local session once the backend has deleted the account.
pub trait SignOutHandler: Send + Sync {
    fn sign_out(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletionState {
    /// Flag unset, or already consumed.
    Idle,
    /// Flag set and waiting to be turned into a request.
    Requested,
}

/// Turns the persisted deletion flag into a single `DELETE /self`.
///
/// The flag is cleared the moment it is observed, before the request goes out,
/// so each flag-set event yields exactly one request no matter how often the
/// driver polls. A successful response signs the user out. Failures are not
/// retried, except that a rate-limited response re-sets the flag when
/// `rearm_account_deletion_on_transient_failure` is enabled.
pub struct AccountDeletionStrategy {
    context: SyncContext,
    notifier: NewRequestsNotifier,
    store: Arc<dyn PersistentMetadataStore>,
    sign_out: Arc<dyn SignOutHandler>,
    rearm_on_transient_failure: bool,
}

impl AccountDeletionStrategy {
    pub fn new(
        env: &SyncEnvironment,
        store: Arc<dyn PersistentMetadataStore>,
        sign_out: Arc<dyn SignOutHandler>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            context: env.context.clone(),
            notifier: env.notifier.clone(),
            store,
            sign_out,
            rearm_on_transient_failure: config.rearm_account_deletion_on_transient_failure,
        }
    }

    /// Set the persisted flag and wake the driver.
    pub fn initiate_account_deletion(&self) -> SyncResult<()> {
        self.context
            .perform(|| self.store.set_bool(USER_DELETION_INITIATED_KEY, true))?;
        tracing::info!("account deletion initiated");
        self.notifier.notify_new_requests_available();
        Ok(())
    }

    pub fn state(&self) -> DeletionState {
        self.context.perform(|| match self.store.get_bool(USER_DELETION_INITIATED_KEY) {
            Ok(true) => DeletionState::Requested,
            Ok(false) => DeletionState::Idle,
            Err(e) => {
                tracing::warn!(error = %e, "could not read account deletion flag");
                DeletionState::Idle
            }
        })
    }

    fn next_request_in_context(&self) -> Option<Request> {
        match self.store.get_bool(USER_DELETION_INITIATED_KEY) {
            Ok(true) => {}
            Ok(false) => return None,
            Err(e) => {
                tracing::warn!(error = %e, "could not read account deletion flag");
                return None;
            }
        }
        if let Err(e) = self.store.set_bool(USER_DELETION_INITIATED_KEY, false) {
            tracing::warn!(error = %e, "could not consume account deletion flag; not deleting");
            return None;
        }

        let mut request = Request::delete("/self").with_authentication(true);
        let context = self.context.clone();
        let store = self.store.clone();
        let sign_out = self.sign_out.clone();
        let rearm = self.rearm_on_transient_failure;

        request.add_completion_handler(move |response| {
            context.perform(|| {
                if response.is_success() {
                    tracing::info!("account deleted; signing out");
                    sign_out.sign_out();
                } else if response.is_try_again_later() && rearm {
                    tracing::warn!("account deletion rate limited; flag re-armed");
                    if let Err(e) = store.set_bool(USER_DELETION_INITIATED_KEY, true) {
                        tracing::warn!(error = %e, "could not re-arm account deletion flag");
                    }
                } else {
                    tracing::warn!(status = response.http_status(), "account deletion failed");
                }
            });
        });

        tracing::info!("account deletion flag consumed; requesting deletion");
        Some(request)
    }
}

impl RequestGenerator for AccountDeletionStrategy {
    fn next_request(&self) -> Option<Request> {
        self.context.perform(|| self.next_request_in_context())
    }
}
