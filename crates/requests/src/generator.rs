//! The request generator contract.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::request::Request;

/// Something the driver can repeatedly ask "is there more to send?".
///
/// ## Contract
///
/// - Returns at most one request per call.
/// - Returning `None` has no side effects: a generator that has nothing to send
///   leaves its state exactly as it found it.
/// - A returned request carries the completion handler that releases whatever
///   the generator reserved for it (in-flight membership, consumed flags).
/// - Never returns a request for work that already has one outstanding.
///
/// Implementations are shared between the driver and completion handlers, so
/// they take `&self` and keep their state behind interior mutability.
pub trait RequestGenerator: Send + Sync {
    fn next_request(&self) -> Option<Request>;
}

impl<G> RequestGenerator for Arc<G>
where
    G: RequestGenerator + ?Sized,
{
    fn next_request(&self) -> Option<Request> {
        (**self).next_request()
    }
}

/// Polls a fixed list of generators, itself acting as one generator.
///
/// Polling starts right after the generator that produced the previous request,
/// so a generator that always has work cannot starve the others.
#[derive(Default)]
pub struct RequestGeneratorGroup {
    generators: Vec<Arc<dyn RequestGenerator>>,
    cursor: AtomicUsize,
}

impl RequestGeneratorGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, generator: Arc<dyn RequestGenerator>) -> Self {
        self.push(generator);
        self
    }

    pub fn push(&mut self, generator: Arc<dyn RequestGenerator>) {
        self.generators.push(generator);
    }

    pub fn len(&self) -> usize {
        self.generators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.generators.is_empty()
    }
}

impl RequestGenerator for RequestGeneratorGroup {
    fn next_request(&self) -> Option<Request> {
        let count = self.generators.len();
        if count == 0 {
            return None;
        }

        let start = self.cursor.load(Ordering::Relaxed) % count;
        for offset in 0..count {
            let index = (start + offset) % count;
            if let Some(request) = self.generators[index].next_request() {
                self.cursor.store((index + 1) % count, Ordering::Relaxed);
                return Some(request);
            }
        }
        None
    }
}
