//! Configuration for the request generators.

use std::str::FromStr;
use std::time::Duration;

use relaysync_core::{MAX_PREKEY_ID, SyncError, SyncResult};
use serde::{Deserialize, Serialize};

/// Kind of client announced when registering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientType {
    /// Long-lived device.
    Permanent,
    /// Session that is discarded on sign-out.
    Temporary,
}

impl ClientType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientType::Permanent => "permanent",
            ClientType::Temporary => "temporary",
        }
    }
}

impl FromStr for ClientType {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "permanent" => Ok(ClientType::Permanent),
            "temporary" => Ok(ClientType::Temporary),
            other => Err(SyncError::config(format!("unknown client type: {other}"))),
        }
    }
}

/// Sync layer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Minimum time between two low-priority (history backfill) gap requests.
    pub low_priority_cooldown: Duration,
    /// Feature flag: backfill the history of non-whitelisted conversations at all.
    pub download_entire_history: bool,
    /// Pre-keys generated per registration or rotation.
    pub prekey_batch_size: u16,
    /// Maximum number of users per missing-keys request.
    pub missing_clients_user_page_size: usize,
    pub client_type: ClientType,
    /// Length in bytes of each device-push signaling key.
    pub signaling_key_length: usize,
    /// Set the account deletion flag again when the deletion request is rate-limited.
    pub rearm_account_deletion_on_transient_failure: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            low_priority_cooldown: Duration::from_secs(5),
            download_entire_history: true,
            prekey_batch_size: 100,
            missing_clients_user_page_size: 128,
            client_type: ClientType::Permanent,
            signaling_key_length: 32,
            rearm_account_deletion_on_transient_failure: false,
        }
    }
}

impl SyncConfig {
    /// Defaults overridden by `RELAYSYNC_*` environment variables.
    pub fn from_env() -> SyncResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable name.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(ms) = parse_var::<u64>(&lookup, "RELAYSYNC_LOW_PRIORITY_COOLDOWN_MS")? {
            config.low_priority_cooldown = Duration::from_millis(ms);
        }
        if let Some(flag) = parse_var(&lookup, "RELAYSYNC_DOWNLOAD_ENTIRE_HISTORY")? {
            config.download_entire_history = flag;
        }
        if let Some(size) = parse_var(&lookup, "RELAYSYNC_PREKEY_BATCH_SIZE")? {
            config.prekey_batch_size = size;
        }
        if let Some(size) = parse_var(&lookup, "RELAYSYNC_MISSING_CLIENTS_PAGE_SIZE")? {
            config.missing_clients_user_page_size = size;
        }
        if let Some(kind) = lookup("RELAYSYNC_CLIENT_TYPE") {
            config.client_type = kind.parse()?;
        }
        if let Some(flag) = parse_var(&lookup, "RELAYSYNC_REARM_ACCOUNT_DELETION")? {
            config.rearm_account_deletion_on_transient_failure = flag;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_low_priority_cooldown(mut self, cooldown: Duration) -> Self {
        self.low_priority_cooldown = cooldown;
        self
    }

    pub fn with_prekey_batch_size(mut self, size: u16) -> Self {
        self.prekey_batch_size = size;
        self
    }

    pub fn with_missing_clients_user_page_size(mut self, size: usize) -> Self {
        self.missing_clients_user_page_size = size;
        self
    }

    pub fn with_download_entire_history(mut self, enabled: bool) -> Self {
        self.download_entire_history = enabled;
        self
    }

    pub fn with_rearm_account_deletion(mut self, enabled: bool) -> Self {
        self.rearm_account_deletion_on_transient_failure = enabled;
        self
    }

    pub fn validate(&self) -> SyncResult<()> {
        if self.prekey_batch_size == 0 {
            return Err(SyncError::config("prekey_batch_size must be at least 1"));
        }
        if u32::from(self.prekey_batch_size) > u32::from(MAX_PREKEY_ID) + 1 {
            return Err(SyncError::config(
                "prekey_batch_size exceeds the rotating pre-key id space",
            ));
        }
        if self.missing_clients_user_page_size == 0 {
            return Err(SyncError::config(
                "missing_clients_user_page_size must be at least 1",
            ));
        }
        if self.signaling_key_length == 0 {
            return Err(SyncError::config("signaling_key_length must be at least 1"));
        }
        Ok(())
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> SyncResult<Option<T>>
where
    T: FromStr,
    T::Err: core::fmt::Display,
{
    lookup(name)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| SyncError::config(format!("{name}={raw:?}: {e}")))
        })
        .transpose()
}
