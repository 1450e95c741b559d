use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use relaysync_core::{
    ClientId, LAST_RESORT_PREKEY_ID, PrekeyId, PrekeyIndexRange, RemoteClientId, SyncError,
    SyncResult,
};
use relaysync_requests::Request;
use serde_json::{Map, Value, json};

use super::provider::KeyProvider;
use super::signaling::SignalingKeyStore;
use crate::config::{ClientType, SyncConfig};
use crate::context::{SyncContext, lock};
use crate::metadata::PersistentMetadataStore;

/// Metadata key prefix of the persisted per-client pre-key range.
pub const PREKEY_RANGE_KEY_PREFIX: &str = "PrekeyRange/";

/// A client of the logged-in user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserClient {
    pub id: ClientId,
    /// Assigned by the backend once registration succeeded.
    pub remote_identifier: Option<RemoteClientId>,
}

impl UserClient {
    pub fn new(id: ClientId) -> Self {
        Self {
            id,
            remote_identifier: None,
        }
    }

    pub fn with_remote_identifier(mut self, remote: RemoteClientId) -> Self {
        self.remote_identifier = Some(remote);
        self
    }
}

/// Account credentials some client operations must carry.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub password: Option<String>,
}

impl Credentials {
    pub fn email(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: Some(email.into()),
            phone: None,
            password: Some(password.into()),
        }
    }

    pub fn phone(phone: impl Into<String>) -> Self {
        Self {
            phone: Some(phone.into()),
            ..Self::default()
        }
    }
}

impl core::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("phone", &self.phone)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Builds client registration, pre-key rotation and client deletion requests,
/// and tracks the pre-key range handed out to each client.
///
/// Ranges only move forward: a rotation continues right after the previous
/// batch (restarting at 0 once the rotating id space is exhausted). Allocation
/// happens inside the sync context, so two concurrent builders never hand out
/// the same ids. Every allocated range is written to the metadata store before
/// its request is returned, so rotation resumes where it left off after a
/// restart.
pub struct KeyLifecycleManager {
    context: SyncContext,
    provider: Arc<dyn KeyProvider>,
    signaling: SignalingKeyStore,
    metadata: Arc<dyn PersistentMetadataStore>,
    client_type: ClientType,
    batch_size: u16,
    ranges: Mutex<HashMap<ClientId, PrekeyIndexRange>>,
}

impl KeyLifecycleManager {
    pub fn new(
        context: SyncContext,
        provider: Arc<dyn KeyProvider>,
        metadata: Arc<dyn PersistentMetadataStore>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            context,
            provider,
            signaling: SignalingKeyStore::new(metadata.clone()),
            metadata,
            client_type: config.client_type,
            batch_size: config.prekey_batch_size,
            ranges: Mutex::new(HashMap::new()),
        }
    }

    /// The range most recently allocated to `client`, from memory or the store.
    pub fn prekey_range(&self, client: ClientId) -> SyncResult<Option<PrekeyIndexRange>> {
        self.context.perform(|| self.recorded_range(client))
    }

    /// Seed the allocation state of `client`, e.g. from a range kept on the
    /// client entity elsewhere.
    pub fn restore_prekey_range(&self, client: ClientId, range: PrekeyIndexRange) -> SyncResult<()> {
        self.context.perform(|| self.record_range(client, range))
    }

    pub fn signaling_keys(&self) -> &SignalingKeyStore {
        &self.signaling
    }

    /// `POST /clients` with a fresh first batch, the last-resort key and the
    /// signaling keys (created on first use).
    pub fn register_client_request(
        &self,
        client: &UserClient,
        credentials: Option<&Credentials>,
    ) -> SyncResult<Request> {
        self.context.perform(|| {
            let range = PrekeyIndexRange::first(self.batch_size)?;
            let prekeys = self.generate_batch(range)?;
            let last_resort = self.provider.last_resort_prekey()?;
            let signaling = self.signaling.load_or_create(self.provider.as_ref())?;

            let mut payload = Map::new();
            payload.insert("type".into(), json!(self.client_type.as_str()));
            if let Some(password) = credentials.and_then(|c| c.password.as_deref()) {
                payload.insert("password".into(), json!(password));
            }
            payload.insert(
                "lastkey".into(),
                serialize_prekey(LAST_RESORT_PREKEY_ID, &last_resort),
            );
            payload.insert("prekeys".into(), prekeys);
            payload.insert(
                "sigkeys".into(),
                json!({
                    "enckey": STANDARD.encode(&signaling.decryption_key),
                    "mackey": STANDARD.encode(&signaling.verification_key),
                }),
            );

            self.record_range(client.id, range)?;
            tracing::info!(client = %client.id, range_start = range.start(), count = range.count(), "client registration built");
            Ok(Request::post("/clients", Value::Object(payload)))
        })
    }

    /// `PUT /clients/{id}` with the batch following the client's current range.
    ///
    /// Fails with [`SyncError::PreconditionUnmet`] when the client was never
    /// registered.
    pub fn update_client_prekeys_request(&self, client: &UserClient) -> SyncResult<Request> {
        let Some(remote) = client.remote_identifier.as_ref() else {
            return Err(SyncError::precondition(format!(
                "client {} has no remote identifier; register it first",
                client.id
            )));
        };

        self.context.perform(|| {
            let range = match self.recorded_range(client.id)? {
                Some(current) => current.next(self.batch_size)?,
                None => {
                    tracing::warn!(client = %client.id, "no recorded pre-key range; starting at 0");
                    PrekeyIndexRange::first(self.batch_size)?
                }
            };
            let prekeys = self.generate_batch(range)?;

            self.record_range(client.id, range)?;
            tracing::info!(client = %client.id, range_start = range.start(), count = range.count(), "pre-key rotation built");
            Ok(Request::put(
                format!("/clients/{remote}"),
                json!({ "prekeys": prekeys }),
            ))
        })
    }

    /// `DELETE /clients/{id}`, carrying whichever credentials were supplied.
    pub fn delete_client_request(
        &self,
        remote: &RemoteClientId,
        credentials: Option<&Credentials>,
    ) -> Request {
        let request = Request::delete(format!("/clients/{remote}"));
        let Some(credentials) = credentials else {
            return request;
        };

        let mut payload = Map::new();
        for (field, value) in [
            ("email", &credentials.email),
            ("phone", &credentials.phone),
            ("password", &credentials.password),
        ] {
            if let Some(value) = value {
                payload.insert(field.into(), json!(value));
            }
        }
        request.with_payload(Value::Object(payload))
    }

    fn recorded_range(&self, client: ClientId) -> SyncResult<Option<PrekeyIndexRange>> {
        if let Some(range) = lock(&self.ranges).get(&client) {
            return Ok(Some(*range));
        }
        let Some(stored) = self.metadata.get(&prekey_range_key(client))? else {
            return Ok(None);
        };
        let range: PrekeyIndexRange = serde_json::from_value(stored)
            .map_err(|e| SyncError::storage(format!("stored pre-key range of {client}: {e}")))?;
        lock(&self.ranges).insert(client, range);
        Ok(Some(range))
    }

    /// Persist first: a range only counts as allocated once it survives a restart.
    fn record_range(&self, client: ClientId, range: PrekeyIndexRange) -> SyncResult<()> {
        let value = serde_json::to_value(range)
            .map_err(|e| SyncError::storage(format!("pre-key range of {client}: {e}")))?;
        self.metadata.set(&prekey_range_key(client), Some(value))?;
        lock(&self.ranges).insert(client, range);
        Ok(())
    }

    fn generate_batch(&self, range: PrekeyIndexRange) -> SyncResult<Value> {
        let keys = self.provider.generate_prekeys(range)?;
        if keys.len() != usize::from(range.count()) {
            return Err(SyncError::key_generation(format!(
                "provider returned {} pre-keys, expected {}",
                keys.len(),
                range.count()
            )));
        }
        Ok(Value::Array(
            range
                .ids()
                .zip(keys.iter())
                .map(|(id, key)| serialize_prekey(id, key))
                .collect(),
        ))
    }
}

fn prekey_range_key(client: ClientId) -> String {
    format!("{PREKEY_RANGE_KEY_PREFIX}{client}")
}

fn serialize_prekey(id: PrekeyId, key: &[u8]) -> Value {
    json!({ "key": STANDARD.encode(key), "id": id })
}
