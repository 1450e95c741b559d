//! All generators behind one operation loop, with a transport that answers
//! every request immediately.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use relaysync_core::{ClientId, ConversationId, EventId, EventRange, UserId, RemoteClientId};
use relaysync_requests::{
    NewRequestsNotifier, OperationLoop, Request, RequestGenerator, RequestGeneratorGroup,
    Response, Transport,
};
use relaysync_sync::{
    AccountDeletionStrategy, ConversationEventsRequestEncoder, DownloadedEventsParser,
    GapFillScheduler, InMemoryIncompleteConversationsCache, InMemoryMetadataStore,
    IncompleteConversationsCache, KeyLifecycleManager, ManualHistorySyncStatus, MissingClient,
    MissingClientsPage, MissingKeyBatchFetcher, PrekeysResponseParser, RandomKeyProvider,
    SignOutHandler, SyncConfig, SyncEnvironment, UserClient,
};

const COOLDOWN: Duration = Duration::from_secs(5);

#[derive(Default)]
struct AnsweringTransport {
    sent: Mutex<Vec<String>>,
}

impl AnsweringTransport {
    fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

impl Transport for AnsweringTransport {
    fn send(&self, request: Request) {
        self.sent
            .lock()
            .unwrap()
            .push(format!("{} {}", request.method(), request.path()));
        request.complete(&Response::new(200, None));
    }
}

struct PathEncoder;

impl ConversationEventsRequestEncoder for PathEncoder {
    fn request_for_fetching_range(&self, range: &EventRange, conversation: ConversationId) -> Request {
        Request::get(format!(
            "/conversations/{conversation}/events?start={}",
            range.oldest().0
        ))
    }
}

/// Marks a conversation complete once its events arrived.
struct ClearingParser {
    cache: Arc<InMemoryIncompleteConversationsCache>,
}

impl DownloadedEventsParser for ClearingParser {
    fn update_range(&self, _range: &EventRange, conversation: ConversationId, response: &Response) {
        if response.is_success() {
            self.cache.clear_gap(conversation);
        }
    }
}

#[derive(Default)]
struct CountingPrekeysParser {
    users: AtomicUsize,
}

impl PrekeysResponseParser for CountingPrekeysParser {
    fn update_missing_clients(&self, page: &MissingClientsPage, _response: &Response) {
        self.users.fetch_add(page.user_count(), Ordering::SeqCst);
    }
}

#[derive(Default)]
struct CountingSignOut {
    calls: AtomicUsize,
}

impl SignOutHandler for CountingSignOut {
    fn sign_out(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

fn gap(oldest: u64, newest: u64) -> EventRange {
    EventRange::new(EventId(oldest), EventId(newest)).unwrap()
}

fn gap_requests(sent: &[String]) -> usize {
    sent.iter().filter(|s| s.starts_with("GET /conversations/")).count()
}

async fn wait_for(condition: impl Fn() -> bool) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met within timeout");
}

#[tokio::test(start_paused = true)]
async fn generators_drain_through_the_operation_loop() {
    relaysync_observability::init();

    let notifier = NewRequestsNotifier::new();
    let env = SyncEnvironment::tokio(notifier.clone()).unwrap();
    let config = SyncConfig::default().with_low_priority_cooldown(COOLDOWN);

    let metadata = Arc::new(InMemoryMetadataStore::new());
    let sign_out = Arc::new(CountingSignOut::default());
    let deletion = Arc::new(AccountDeletionStrategy::new(
        &env,
        metadata.clone(),
        sign_out.clone(),
        &config,
    ));

    let prekeys_parser = Arc::new(CountingPrekeysParser::default());
    let prekeys_parser_dyn: Arc<dyn PrekeysResponseParser> = prekeys_parser.clone();
    let fetcher = Arc::new(MissingKeyBatchFetcher::new(&env, &prekeys_parser_dyn, &config));

    let cache = Arc::new(InMemoryIncompleteConversationsCache::new());
    let urgent = ConversationId::new();
    let backlog = [ConversationId::new(), ConversationId::new()];
    cache.set_gap(urgent, gap(1, 10), true);
    for conversation in backlog {
        cache.set_gap(conversation, gap(1, 10), false);
    }
    let encoder: Arc<dyn ConversationEventsRequestEncoder> = Arc::new(PathEncoder);
    let parser: Arc<dyn DownloadedEventsParser> = Arc::new(ClearingParser {
        cache: cache.clone(),
    });
    let gaps = Arc::new(GapFillScheduler::new(
        &env,
        &encoder,
        &parser,
        cache.clone(),
        Arc::new(ManualHistorySyncStatus::new(true)),
        &config,
    ));

    deletion.initiate_account_deletion().unwrap();
    fetcher.report_missing_clients([
        MissingClient::new(UserId::new(), RemoteClientId::new("c1").unwrap()),
        MissingClient::new(UserId::new(), RemoteClientId::new("c2").unwrap()),
    ]);

    let group = RequestGeneratorGroup::new()
        .with(deletion.clone())
        .with(fetcher.clone())
        .with(gaps.clone());
    let transport = Arc::new(AnsweringTransport::default());
    let handle = OperationLoop::new(Arc::new(group), transport.clone(), notifier).spawn();

    // Deletion, one page of missing clients, the whitelisted gap and the first
    // backlog gap. The second backlog gap waits for the cooldown.
    wait_for(|| gap_requests(&transport.sent()) == 2).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    let sent = transport.sent();
    assert_eq!(sent[0], "DELETE /self");
    assert!(sent.contains(&"POST /users/prekeys".to_string()));
    assert_eq!(gap_requests(&sent), 2);
    assert!(sent.iter().any(|s| s.contains(&urgent.to_string())));
    assert!(cache.gap_for_conversation(urgent).is_none());

    tokio::time::sleep(COOLDOWN).await;
    wait_for(|| gap_requests(&transport.sent()) == 3).await;

    assert!(cache.incomplete_non_whitelisted_conversations().is_empty());
    assert_eq!(gaps.in_flight_count(), 0);
    assert_eq!(sign_out.calls.load(Ordering::SeqCst), 1);
    assert_eq!(prekeys_parser.users.load(Ordering::SeqCst), 2);
    assert!(deletion.next_request().is_none());

    handle.shutdown().await;
}

#[tokio::test]
async fn registration_and_rotation_go_out_through_the_transport() {
    let env = SyncEnvironment::tokio(NewRequestsNotifier::new()).unwrap();
    let config = SyncConfig::default().with_prekey_batch_size(20);
    let keys = KeyLifecycleManager::new(
        env.context.clone(),
        Arc::new(RandomKeyProvider::for_config(&config)),
        Arc::new(InMemoryMetadataStore::new()),
        &config,
    );
    let transport = AnsweringTransport::default();
    let client = UserClient::new(ClientId::new());

    transport.send(keys.register_client_request(&client, None).unwrap());
    let registered = client.with_remote_identifier(RemoteClientId::new("a1b2").unwrap());
    transport.send(keys.update_client_prekeys_request(&registered).unwrap());

    assert_eq!(transport.sent(), vec!["POST /clients", "PUT /clients/a1b2"]);
    assert_eq!(keys.prekey_range(registered.id).unwrap().unwrap().start(), 20);
}
