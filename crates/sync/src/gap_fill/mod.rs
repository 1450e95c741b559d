//! Gap-fill scheduling: download missing conversation events in two tiers.

mod cache;

pub use cache::{
    HistorySyncStatus, InMemoryIncompleteConversationsCache, IncompleteConversationsCache,
    ManualHistorySyncStatus,
};

use std::collections::HashSet;
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use relaysync_core::{ConversationId, EventRange};
use relaysync_requests::{NewRequestsNotifier, Request, RequestGenerator, Response};

use crate::config::SyncConfig;
use crate::context::{SyncContext, SyncEnvironment, lock};
use crate::timer::{Clock, Timer, TimerHandle};

/// Builds the request that downloads a gap. May fetch a smaller slice of it.
pub trait ConversationEventsRequestEncoder: Send + Sync {
    fn request_for_fetching_range(&self, range: &EventRange, conversation: ConversationId)
    -> Request;
}

/// Applies a downloaded page of events to local state.
pub trait DownloadedEventsParser: Send + Sync {
    /// `range` is the gap the request was built for, not the slice the encoder
    /// actually asked for.
    fn update_range(&self, range: &EventRange, conversation: ConversationId, response: &Response);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tier {
    High,
    Low,
}

impl Tier {
    fn as_str(&self) -> &'static str {
        match self {
            Tier::High => "high",
            Tier::Low => "low",
        }
    }
}

#[derive(Debug, Default)]
struct SchedulerState {
    being_fetched: HashSet<ConversationId>,
    last_low_priority_fetch: Option<Instant>,
    cooldown_wakeup: Option<TimerHandle>,
}

/// Produces event download requests for conversations with gaps.
///
/// Whitelisted conversations are always served first. Non-whitelisted ones are
/// served only when full-history download is enabled and currently permitted,
/// and then at most once per cooldown interval. Every low-priority request arms
/// a wake-up that nudges the driver once the interval has passed, so the
/// backlog keeps draining without any other trigger.
///
/// The encoder and parser are not owned: if either has been dropped the
/// scheduler treats it as unavailable.
pub struct GapFillScheduler {
    context: SyncContext,
    clock: Arc<dyn Clock>,
    timer: Arc<dyn Timer>,
    notifier: NewRequestsNotifier,
    encoder: Weak<dyn ConversationEventsRequestEncoder>,
    parser: Weak<dyn DownloadedEventsParser>,
    cache: Arc<dyn IncompleteConversationsCache>,
    history: Arc<dyn HistorySyncStatus>,
    download_entire_history: bool,
    cooldown: Duration,
    state: Arc<Mutex<SchedulerState>>,
}

impl GapFillScheduler {
    pub fn new(
        env: &SyncEnvironment,
        encoder: &Arc<dyn ConversationEventsRequestEncoder>,
        parser: &Arc<dyn DownloadedEventsParser>,
        cache: Arc<dyn IncompleteConversationsCache>,
        history: Arc<dyn HistorySyncStatus>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            context: env.context.clone(),
            clock: env.clock.clone(),
            timer: env.timer.clone(),
            notifier: env.notifier.clone(),
            encoder: Arc::downgrade(encoder),
            parser: Arc::downgrade(parser),
            cache,
            history,
            download_entire_history: config.download_entire_history,
            cooldown: config.low_priority_cooldown,
            state: Arc::new(Mutex::new(SchedulerState::default())),
        }
    }

    pub fn is_being_fetched(&self, conversation: ConversationId) -> bool {
        self.context
            .perform(|| lock(&self.state).being_fetched.contains(&conversation))
    }

    pub fn in_flight_count(&self) -> usize {
        self.context.perform(|| lock(&self.state).being_fetched.len())
    }

    fn first_with_gap(
        &self,
        candidates: Vec<ConversationId>,
        state: &SchedulerState,
    ) -> Option<(ConversationId, EventRange)> {
        candidates
            .into_iter()
            .filter(|c| !state.being_fetched.contains(c))
            .find_map(|c| self.cache.gap_for_conversation(c).map(|gap| (c, gap)))
    }

    fn low_priority_allowed(&self, state: &SchedulerState, now: Instant) -> bool {
        if !self.download_entire_history || !self.history.should_download_full_history() {
            return false;
        }
        match state.last_low_priority_fetch {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.cooldown,
        }
    }

    fn select(&self, state: &SchedulerState, now: Instant) -> Option<(ConversationId, EventRange, Tier)> {
        let whitelisted = self.cache.incomplete_whitelisted_conversations();
        if let Some((conversation, gap)) = self.first_with_gap(whitelisted, state) {
            return Some((conversation, gap, Tier::High));
        }

        if !self.low_priority_allowed(state, now) {
            return None;
        }
        let others = self.cache.incomplete_non_whitelisted_conversations();
        self.first_with_gap(others, state)
            .map(|(conversation, gap)| (conversation, gap, Tier::Low))
    }

    fn arm_cooldown_wakeup(&self, state: &mut SchedulerState) {
        if let Some(previous) = state.cooldown_wakeup.take() {
            previous.cancel();
        }
        let context = self.context.clone();
        let notifier = self.notifier.clone();
        let handle = self.timer.schedule_once(
            self.cooldown,
            Box::new(move || {
                context.perform(|| notifier.notify_new_requests_available());
            }),
        );
        state.cooldown_wakeup = Some(handle);
        tracing::debug!(cooldown_ms = self.cooldown.as_millis() as u64, "cooldown wake-up armed");
    }

    fn attach_completion(&self, request: &mut Request, conversation: ConversationId, gap: EventRange) {
        let context = self.context.clone();
        let state = Arc::downgrade(&self.state);
        let parser = self.parser.clone();
        let cache = self.cache.clone();

        request.add_completion_handler(move |response| {
            context.perform(|| {
                let Some(state) = state.upgrade() else {
                    return;
                };
                lock(&state).being_fetched.remove(&conversation);

                if response.is_try_again_later() {
                    tracing::warn!(%conversation, "gap fill rate limited; conversation is eligible again");
                    return;
                }
                let Some(parser) = parser.upgrade() else {
                    tracing::warn!(%conversation, "events parser is gone; dropping response");
                    return;
                };
                if !cache.conversation_exists(conversation) {
                    tracing::debug!(%conversation, "conversation removed while fetching");
                    return;
                }
                parser.update_range(&gap, conversation, response);
            });
        });
    }

    fn next_request_in_context(&self) -> Option<Request> {
        let Some(encoder) = self.encoder.upgrade() else {
            tracing::warn!("events request encoder is gone; not scheduling gap fills");
            return None;
        };

        let mut state = lock(&self.state);
        let now = self.clock.now();
        let Some((conversation, gap, tier)) = self.select(&state, now) else {
            tracing::debug!("no gap to fill");
            return None;
        };

        let mut request = encoder.request_for_fetching_range(&gap, conversation);
        if tier == Tier::Low {
            state.last_low_priority_fetch = Some(now);
            self.arm_cooldown_wakeup(&mut state);
        }
        state.being_fetched.insert(conversation);
        drop(state);

        self.attach_completion(&mut request, conversation, gap);
        tracing::info!(%conversation, gap = %gap, tier = tier.as_str(), "gap fill requested");
        Some(request)
    }
}

impl RequestGenerator for GapFillScheduler {
    fn next_request(&self) -> Option<Request> {
        self.context.perform(|| self.next_request_in_context())
    }
}

impl Drop for GapFillScheduler {
    fn drop(&mut self) {
        if let Some(wakeup) = lock(&self.state).cooldown_wakeup.take() {
            wakeup.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::{ManualClock, ManualTimer};
    use relaysync_core::EventId;

    const COOLDOWN: Duration = Duration::from_secs(5);

    /// Asks for at most 10 events per request.
    struct SlicingEncoder;

    impl ConversationEventsRequestEncoder for SlicingEncoder {
        fn request_for_fetching_range(
            &self,
            range: &EventRange,
            conversation: ConversationId,
        ) -> Request {
            let slice = range.newest_slice(10);
            Request::get(format!(
                "/conversations/{conversation}/events?start={}&size={}",
                slice.oldest().0,
                slice.len()
            ))
        }
    }

    #[derive(Default)]
    struct RecordingParser {
        updates: Mutex<Vec<(ConversationId, EventRange, u16)>>,
    }

    impl DownloadedEventsParser for RecordingParser {
        fn update_range(&self, range: &EventRange, conversation: ConversationId, response: &Response) {
            lock(&self.updates).push((conversation, *range, response.http_status()));
        }
    }

    struct Fixture {
        clock: Arc<ManualClock>,
        timer: ManualTimer,
        notifier: NewRequestsNotifier,
        cache: Arc<InMemoryIncompleteConversationsCache>,
        history: Arc<ManualHistorySyncStatus>,
        encoder: Arc<dyn ConversationEventsRequestEncoder>,
        parser: Arc<RecordingParser>,
        scheduler: GapFillScheduler,
    }

    fn fixture(config: SyncConfig) -> Fixture {
        let clock = Arc::new(ManualClock::new());
        let timer = ManualTimer::new();
        let notifier = NewRequestsNotifier::new();
        let env = SyncEnvironment::new(clock.clone(), Arc::new(timer.clone()), notifier.clone());
        let cache = Arc::new(InMemoryIncompleteConversationsCache::new());
        let history = Arc::new(ManualHistorySyncStatus::new(true));
        let encoder: Arc<dyn ConversationEventsRequestEncoder> = Arc::new(SlicingEncoder);
        let parser = Arc::new(RecordingParser::default());
        let parser_dyn: Arc<dyn DownloadedEventsParser> = parser.clone();

        let scheduler = GapFillScheduler::new(
            &env,
            &encoder,
            &parser_dyn,
            cache.clone(),
            history.clone(),
            &config,
        );
        Fixture {
            clock,
            timer,
            notifier,
            cache,
            history,
            encoder,
            parser,
            scheduler,
        }
    }

    fn config() -> SyncConfig {
        SyncConfig::default().with_low_priority_cooldown(COOLDOWN)
    }

    fn gap(oldest: u64, newest: u64) -> EventRange {
        EventRange::new(EventId(oldest), EventId(newest)).unwrap()
    }

    fn conversation_of(request: &Request) -> String {
        request.path().split('/').nth(2).unwrap().to_string()
    }

    #[test]
    fn whitelisted_gap_wins_over_non_whitelisted() {
        let f = fixture(config());
        let background = ConversationId::new();
        let important = ConversationId::new();
        f.cache.set_gap(background, gap(1, 5), false);
        f.cache.set_gap(important, gap(1, 5), true);

        let request = f.scheduler.next_request().unwrap();

        assert_eq!(conversation_of(&request), important.to_string());
        assert!(f.scheduler.is_being_fetched(important));
        assert!(f.timer.pending_delays().is_empty());
    }

    #[test]
    fn nothing_to_fetch_leaves_state_untouched() {
        let f = fixture(config());

        assert!(f.scheduler.next_request().is_none());
        assert_eq!(f.scheduler.in_flight_count(), 0);
        assert!(f.timer.pending_delays().is_empty());
    }

    #[test]
    fn conversation_in_flight_is_not_requested_twice() {
        let f = fixture(config().with_download_entire_history(false));
        let conv = ConversationId::new();
        f.cache.set_gap(conv, gap(1, 5), true);

        let first = f.scheduler.next_request().unwrap();
        assert!(f.scheduler.next_request().is_none());

        first.complete(&Response::new(200, None));
        assert!(!f.scheduler.is_being_fetched(conv));
        assert!(f.scheduler.next_request().is_some());
    }

    #[test]
    fn parser_receives_the_requested_gap_even_when_the_request_is_narrowed() {
        let f = fixture(config());
        let conv = ConversationId::new();
        let full_gap = gap(1, 100);
        f.cache.set_gap(conv, full_gap, true);

        let request = f.scheduler.next_request().unwrap();
        assert!(request.path().ends_with("start=91&size=10"));
        request.complete(&Response::new(200, None));

        assert_eq!(lock(&f.parser.updates).as_slice(), &[(conv, full_gap, 200)]);
    }

    #[test]
    fn rate_limited_response_skips_parsing_and_frees_the_conversation() {
        let f = fixture(config());
        let conv = ConversationId::new();
        f.cache.set_gap(conv, gap(1, 5), true);

        f.scheduler
            .next_request()
            .unwrap()
            .complete(&Response::try_again_later());

        assert!(lock(&f.parser.updates).is_empty());
        let again = f.scheduler.next_request().unwrap();
        assert_eq!(conversation_of(&again), conv.to_string());
    }

    #[test]
    fn failed_response_is_still_handed_to_the_parser() {
        let f = fixture(config());
        let conv = ConversationId::new();
        f.cache.set_gap(conv, gap(1, 5), true);

        f.scheduler
            .next_request()
            .unwrap()
            .complete(&Response::new(404, None));

        assert_eq!(lock(&f.parser.updates).len(), 1);
        assert_eq!(f.scheduler.in_flight_count(), 0);
    }

    #[test]
    fn low_priority_tier_requires_both_flags() {
        let f = fixture(config().with_download_entire_history(false));
        f.cache.set_gap(ConversationId::new(), gap(1, 5), false);
        assert!(f.scheduler.next_request().is_none());

        let f = fixture(config());
        f.history.set(false);
        f.cache.set_gap(ConversationId::new(), gap(1, 5), false);
        assert!(f.scheduler.next_request().is_none());

        f.history.set(true);
        assert!(f.scheduler.next_request().is_some());
    }

    #[test]
    fn low_priority_requests_respect_the_cooldown() {
        let f = fixture(config());
        let first = ConversationId::new();
        let second = ConversationId::new();
        f.cache.set_gap(first, gap(1, 5), false);
        f.cache.set_gap(second, gap(1, 5), false);

        let request = f.scheduler.next_request().unwrap();
        assert_eq!(conversation_of(&request), first.to_string());
        assert_eq!(f.timer.pending_delays(), vec![COOLDOWN]);

        f.clock.advance(COOLDOWN - Duration::from_millis(1));
        assert!(f.scheduler.next_request().is_none());

        f.clock.advance(Duration::from_millis(1));
        let request = f.scheduler.next_request().unwrap();
        assert_eq!(conversation_of(&request), second.to_string());
        // Re-arming replaces the previous wake-up.
        assert_eq!(f.timer.pending_delays(), vec![COOLDOWN]);
    }

    #[test]
    fn whitelisted_gaps_ignore_the_cooldown() {
        let f = fixture(config());
        f.cache.set_gap(ConversationId::new(), gap(1, 5), false);
        assert!(f.scheduler.next_request().is_some());

        let urgent = ConversationId::new();
        f.cache.set_gap(urgent, gap(1, 5), true);
        let request = f.scheduler.next_request().unwrap();
        assert_eq!(conversation_of(&request), urgent.to_string());
    }

    #[tokio::test]
    async fn cooldown_wakeup_notifies_the_driver() {
        let f = fixture(config());
        f.cache.set_gap(ConversationId::new(), gap(1, 5), false);
        f.cache.set_gap(ConversationId::new(), gap(1, 5), false);
        assert!(f.scheduler.next_request().is_some());

        f.clock.advance(COOLDOWN);
        assert_eq!(f.timer.fire_all(), 1);
        tokio::time::timeout(Duration::from_millis(50), f.notifier.notified())
            .await
            .expect("wake-up should notify");

        assert!(f.scheduler.next_request().is_some());
    }

    #[test]
    fn dropped_encoder_makes_the_scheduler_idle() {
        let mut f = fixture(config());
        f.cache.set_gap(ConversationId::new(), gap(1, 5), true);

        drop(std::mem::replace(&mut f.encoder, Arc::new(SlicingEncoder)));
        assert!(f.scheduler.next_request().is_none());
        assert_eq!(f.scheduler.in_flight_count(), 0);
    }

    #[test]
    fn removed_conversation_is_not_parsed() {
        let f = fixture(config());
        let conv = ConversationId::new();
        f.cache.set_gap(conv, gap(1, 5), true);

        let request = f.scheduler.next_request().unwrap();
        f.cache.remove_conversation(conv);
        request.complete(&Response::new(200, None));

        assert!(lock(&f.parser.updates).is_empty());
        assert!(!f.scheduler.is_being_fetched(conv));
    }

    #[test]
    fn concurrent_polls_never_hand_out_a_conversation_twice() {
        let f = fixture(config().with_download_entire_history(false));
        let conversations: Vec<ConversationId> = (0..24).map(|_| ConversationId::new()).collect();
        for conversation in &conversations {
            f.cache.set_gap(*conversation, gap(1, 5), true);
        }

        let handed_out: Vec<Request> = std::thread::scope(|scope| {
            let pollers: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        let mut mine = Vec::new();
                        for _ in 0..10 {
                            if let Some(request) = f.scheduler.next_request() {
                                mine.push(request);
                            }
                        }
                        mine
                    })
                })
                .collect();
            pollers
                .into_iter()
                .flat_map(|poller| poller.join().unwrap())
                .collect()
        });

        let distinct: HashSet<String> = handed_out.iter().map(conversation_of).collect();
        assert_eq!(handed_out.len(), conversations.len());
        assert_eq!(distinct.len(), conversations.len());
        assert_eq!(f.scheduler.in_flight_count(), conversations.len());

        std::thread::scope(|scope| {
            for request in handed_out {
                scope.spawn(move || request.complete(&Response::try_again_later()));
            }
        });
        assert_eq!(f.scheduler.in_flight_count(), 0);
    }

    #[test]
    fn dropping_the_scheduler_cancels_the_wakeup() {
        let f = fixture(config());
        f.cache.set_gap(ConversationId::new(), gap(1, 5), false);
        assert!(f.scheduler.next_request().is_some());
        assert_eq!(f.timer.pending_delays().len(), 1);

        let timer = f.timer.clone();
        drop(f);
        assert!(timer.pending_delays().is_empty());
    }
}
