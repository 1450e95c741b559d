//! The driver: drains generators into a transport whenever new work may exist.

use std::sync::Arc;

use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::generator::RequestGenerator;
use crate::notifier::NewRequestsNotifier;
use crate::request::Request;

/// Sends requests over the network.
///
/// `send` must not block. The transport owns the request from then on and must
/// call [`Request::complete`] exactly once, on success, failure, timeout or
/// rate limiting alike; completion is what releases generator reservations.
pub trait Transport: Send + Sync {
    fn send(&self, request: Request);
}

impl<T> Transport for Arc<T>
where
    T: Transport + ?Sized,
{
    fn send(&self, request: Request) {
        (**self).send(request)
    }
}

/// Upper bound on requests sent in one drain before yielding back to the runtime.
const DEFAULT_MAX_REQUESTS_PER_DRAIN: usize = 64;

/// Polls a generator whenever it is notified and hands every request to a transport.
///
/// Polling triggers:
/// - start-up
/// - any [`NewRequestsNotifier`] notification (timer wake-ups, new domain data)
/// - completion of any request this loop sent
pub struct OperationLoop {
    generator: Arc<dyn RequestGenerator>,
    transport: Arc<dyn Transport>,
    notifier: NewRequestsNotifier,
    max_requests_per_drain: usize,
}

impl OperationLoop {
    pub fn new(
        generator: Arc<dyn RequestGenerator>,
        transport: Arc<dyn Transport>,
        notifier: NewRequestsNotifier,
    ) -> Self {
        Self {
            generator,
            transport,
            notifier,
            max_requests_per_drain: DEFAULT_MAX_REQUESTS_PER_DRAIN,
        }
    }

    pub fn with_max_requests_per_drain(mut self, max: usize) -> Self {
        self.max_requests_per_drain = max.max(1);
        self
    }

    pub fn notifier(&self) -> &NewRequestsNotifier {
        &self.notifier
    }

    /// Poll until the generator has nothing left (or the drain limit is hit).
    /// Returns how many requests were sent.
    pub fn drain_once(&self) -> usize {
        let mut sent = 0;
        while sent < self.max_requests_per_drain {
            let Some(mut request) = self.generator.next_request() else {
                return sent;
            };

            let notifier = self.notifier.clone();
            request.add_completion_handler(move |_| notifier.notify_new_requests_available());

            tracing::debug!(method = %request.method(), path = %request.path(), "sending request");
            self.transport.send(request);
            sent += 1;
        }

        // More work may be waiting; come back after yielding.
        self.notifier.notify_new_requests_available();
        sent
    }

    /// Run the loop on the current tokio runtime.
    pub fn spawn(self) -> OperationLoopHandle {
        let shutdown = Arc::new(Notify::new());
        let shutdown_signal = shutdown.clone();
        let notifier = self.notifier.clone();

        let join = tokio::spawn(async move {
            tracing::info!("operation loop started");

            loop {
                let sent = self.drain_once();
                if sent > 0 {
                    tracing::debug!(sent, "drained request generators");
                }

                tokio::select! {
                    biased;
                    _ = shutdown_signal.notified() => {
                        tracing::info!("operation loop received shutdown signal");
                        break;
                    }
                    _ = self.notifier.notified() => {}
                }
            }

            tracing::info!("operation loop stopped");
        });

        OperationLoopHandle {
            shutdown,
            notifier,
            join,
        }
    }
}

/// Handle to a running [`OperationLoop`].
#[derive(Debug)]
pub struct OperationLoopHandle {
    shutdown: Arc<Notify>,
    notifier: NewRequestsNotifier,
    join: JoinHandle<()>,
}

impl OperationLoopHandle {
    /// Nudge the loop to poll again (e.g. after new domain data arrived).
    pub fn notify_new_requests_available(&self) {
        self.notifier.notify_new_requests_available();
    }

    /// Request graceful shutdown and wait for the loop to stop.
    pub async fn shutdown(self) {
        self.shutdown.notify_one();
        if let Err(err) = self.join.await {
            tracing::error!("operation loop task failed: {err}");
        }
    }
}
