//! Paged requests for the pre-keys of other users' clients we cannot yet
//! talk to.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, Weak};

use relaysync_core::{RemoteClientId, UserId};
use relaysync_requests::{NewRequestsNotifier, Request, RequestGenerator, Response};
use serde_json::{Map, Value};

use crate::config::SyncConfig;
use crate::context::{SyncContext, SyncEnvironment, lock};

pub const MISSING_CLIENTS_PATH: &str = "/users/prekeys";

/// A remote client whose pre-keys we are missing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MissingClient {
    pub user: UserId,
    pub client: RemoteClientId,
}

impl MissingClient {
    pub fn new(user: UserId, client: RemoteClientId) -> Self {
        Self { user, client }
    }
}

type ClientGroup = (UserId, Vec<RemoteClientId>);

/// Missing clients grouped by owning user, in first-reported order.
///
/// A user's group is the unit of paging: it always travels whole.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MissingClientsMap {
    groups: Vec<ClientGroup>,
}

impl MissingClientsMap {
    pub fn new(clients: impl IntoIterator<Item = MissingClient>) -> Self {
        let mut map = Self::default();
        for missing in clients {
            map.insert(missing);
        }
        map
    }

    /// Add a client. Reporting the same client twice has no effect.
    pub fn insert(&mut self, missing: MissingClient) {
        match self.groups.iter_mut().find(|(user, _)| *user == missing.user) {
            Some((_, clients)) => {
                if !clients.contains(&missing.client) {
                    clients.push(missing.client);
                }
            }
            None => self.groups.push((missing.user, vec![missing.client])),
        }
    }

    pub fn user_count(&self) -> usize {
        self.groups.len()
    }

    pub fn client_count(&self) -> usize {
        self.groups.iter().map(|(_, clients)| clients.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Remove and return up to `page_size` user groups.
    pub fn take_page(&mut self, page_size: usize) -> Option<MissingClientsPage> {
        self.take_page_excluding(page_size, &HashSet::new())
    }

    /// Like [`take_page`](Self::take_page), skipping the groups of `excluded` users.
    pub fn take_page_excluding(
        &mut self,
        page_size: usize,
        excluded: &HashSet<UserId>,
    ) -> Option<MissingClientsPage> {
        let mut taken = Vec::new();
        let mut kept = Vec::new();
        for group in std::mem::take(&mut self.groups) {
            if taken.len() < page_size && !excluded.contains(&group.0) {
                taken.push(group);
            } else {
                kept.push(group);
            }
        }
        self.groups = kept;

        if taken.is_empty() {
            None
        } else {
            Some(MissingClientsPage { groups: taken })
        }
    }

    /// Put a page back at the front, merging with clients reported meanwhile.
    pub fn restore(&mut self, page: MissingClientsPage) {
        let mut restored = Vec::with_capacity(page.groups.len() + self.groups.len());
        for (user, mut clients) in page.groups {
            if let Some(pos) = self.groups.iter().position(|(u, _)| *u == user) {
                let (_, newer) = self.groups.remove(pos);
                for client in newer {
                    if !clients.contains(&client) {
                        clients.push(client);
                    }
                }
            }
            restored.push((user, clients));
        }
        restored.append(&mut self.groups);
        self.groups = restored;
    }
}

impl FromIterator<MissingClient> for MissingClientsMap {
    fn from_iter<I: IntoIterator<Item = MissingClient>>(iter: I) -> Self {
        Self::new(iter)
    }
}

/// The user groups carried by one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingClientsPage {
    groups: Vec<ClientGroup>,
}

impl MissingClientsPage {
    pub fn users(&self) -> impl Iterator<Item = UserId> + '_ {
        self.groups.iter().map(|(user, _)| *user)
    }

    pub fn clients_of(&self, user: UserId) -> Option<&[RemoteClientId]> {
        self.groups
            .iter()
            .find(|(u, _)| *u == user)
            .map(|(_, clients)| clients.as_slice())
    }

    pub fn user_count(&self) -> usize {
        self.groups.len()
    }

    /// `{ "<user>": ["<client>", ...], ... }`
    pub fn payload(&self) -> Value {
        let mut payload = Map::new();
        for (user, clients) in &self.groups {
            payload.insert(
                user.to_string(),
                Value::Array(
                    clients
                        .iter()
                        .map(|c| Value::String(c.as_str().to_string()))
                        .collect(),
                ),
            );
        }
        Value::Object(payload)
    }
}

/// Stores the pre-keys returned for a page.
pub trait PrekeysResponseParser: Send + Sync {
    fn update_missing_clients(&self, page: &MissingClientsPage, response: &Response);
}

#[derive(Debug, Default)]
struct FetcherState {
    pending: MissingClientsMap,
    in_flight: HashSet<UserId>,
}

/// Requests missing pre-keys, one page of user groups per request.
///
/// Used two ways: as a page builder over a caller-owned map
/// ([`fetch_missing_client_keys_request`](Self::fetch_missing_client_keys_request)),
/// or as a generator draining the clients reported to it. As a generator it
/// never sends a user that already has a page in flight, and puts a
/// rate-limited page back at the front of the queue.
pub struct MissingKeyBatchFetcher {
    context: SyncContext,
    notifier: NewRequestsNotifier,
    parser: Weak<dyn PrekeysResponseParser>,
    page_size: usize,
    state: Arc<Mutex<FetcherState>>,
}

impl MissingKeyBatchFetcher {
    pub fn new(
        env: &SyncEnvironment,
        parser: &Arc<dyn PrekeysResponseParser>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            context: env.context.clone(),
            notifier: env.notifier.clone(),
            parser: Arc::downgrade(parser),
            page_size: config.missing_clients_user_page_size,
            state: Arc::new(Mutex::new(FetcherState::default())),
        }
    }

    /// `POST /users/prekeys` for the next page of `map`, removing that page
    /// from it. `None` once the map is empty.
    pub fn fetch_missing_client_keys_request(
        &self,
        map: &mut MissingClientsMap,
    ) -> Option<Request> {
        let page = map.take_page(self.page_size)?;
        Some(page_request(&page))
    }

    /// Queue clients for fetching and wake the driver.
    pub fn report_missing_clients(&self, clients: impl IntoIterator<Item = MissingClient>) {
        let added = self.context.perform(|| {
            let mut state = lock(&self.state);
            let before = state.pending.client_count();
            for missing in clients {
                state.pending.insert(missing);
            }
            state.pending.client_count() - before
        });
        if added > 0 {
            tracing::debug!(added, "missing clients reported");
            self.notifier.notify_new_requests_available();
        }
    }

    pub fn pending_user_count(&self) -> usize {
        self.context.perform(|| lock(&self.state).pending.user_count())
    }

    pub fn in_flight_user_count(&self) -> usize {
        self.context.perform(|| lock(&self.state).in_flight.len())
    }

    fn next_request_in_context(&self) -> Option<Request> {
        if self.parser.strong_count() == 0 {
            tracing::warn!("pre-keys response parser is gone; not fetching missing clients");
            return None;
        }

        let page = {
            let mut state = lock(&self.state);
            let FetcherState { pending, in_flight } = &mut *state;
            let page = pending.take_page_excluding(self.page_size, in_flight)?;
            in_flight.extend(page.users());
            page
        };

        let mut request = page_request(&page);
        let users = page.user_count();
        let context = self.context.clone();
        let state = Arc::downgrade(&self.state);
        let parser = self.parser.clone();

        request.add_completion_handler(move |response| {
            context.perform(|| {
                let Some(state) = state.upgrade() else {
                    return;
                };
                if response.is_try_again_later() {
                    tracing::warn!(users = page.user_count(), "missing clients fetch rate limited; requeued");
                    let mut state = lock(&state);
                    for user in page.users() {
                        state.in_flight.remove(&user);
                    }
                    state.pending.restore(page);
                    return;
                }

                {
                    let mut state = lock(&state);
                    for user in page.users() {
                        state.in_flight.remove(&user);
                    }
                }
                match parser.upgrade() {
                    Some(parser) => parser.update_missing_clients(&page, response),
                    None => tracing::warn!("pre-keys response parser is gone; dropping response"),
                }
            });
        });

        tracing::info!(users, "missing clients fetch requested");
        Some(request)
    }
}

impl RequestGenerator for MissingKeyBatchFetcher {
    fn next_request(&self) -> Option<Request> {
        self.context.perform(|| self.next_request_in_context())
    }
}

fn page_request(page: &MissingClientsPage) -> Request {
    Request::post(MISSING_CLIENTS_PATH, page.payload())
}
