//! Test doubles for the fetch boundary.

use crate::fetch::{FetchCompletion, FetchError, ImageFetcher};
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct Recorded {
    calls: Vec<String>,
    in_flight: Vec<FetchCompletion>,
}

/// Fetcher that records every call and holds completions until the test
/// settles them.
#[derive(Default)]
pub struct RecordingFetcher {
    recorded: Mutex<Recorded>,
    resolve_immediately: bool,
}

impl RecordingFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fetcher whose loads succeed inside `fetch`.
    pub fn resolving_immediately() -> Self {
        Self {
            recorded: Mutex::default(),
            resolve_immediately: true,
        }
    }

    fn recorded(&self) -> MutexGuard<'_, Recorded> {
        self.recorded.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn calls(&self) -> Vec<String> {
        self.recorded().calls.clone()
    }

    pub fn total_calls(&self) -> usize {
        self.recorded().calls.len()
    }

    pub fn call_count(&self, url: &str) -> usize {
        self.recorded().calls.iter().filter(|call| *call == url).count()
    }

    pub fn in_flight(&self) -> Vec<String> {
        self.recorded()
            .in_flight
            .iter()
            .map(|completion| completion.key().to_string())
            .collect()
    }

    pub fn is_cancelled(&self, url: &str) -> bool {
        self.recorded()
            .in_flight
            .iter()
            .any(|completion| completion.key() == url && completion.is_cancelled())
    }

    fn take(&self, url: &str) -> Option<FetchCompletion> {
        let mut recorded = self.recorded();
        let position = recorded.in_flight.iter().position(|c| c.key() == url)?;
        Some(recorded.in_flight.remove(position))
    }

    /// Fire the load event for `url`. Returns false if nothing was in flight.
    pub fn complete(&self, url: &str) -> bool {
        match self.take(url) {
            Some(completion) => {
                completion.succeed();
                true
            }
            None => false,
        }
    }

    /// Fire the error event for `url`.
    pub fn fail(&self, url: &str, reason: &str) -> bool {
        match self.take(url) {
            Some(completion) => {
                completion.fail(FetchError::Network(reason.to_string()));
                true
            }
            None => false,
        }
    }

    pub fn abort(&self, url: &str) -> bool {
        match self.take(url) {
            Some(completion) => {
                completion.abort();
                true
            }
            None => false,
        }
    }

    /// Complete every in-flight load, returning how many there were.
    pub fn complete_all(&self) -> usize {
        let drained: Vec<FetchCompletion> = self.recorded().in_flight.drain(..).collect();
        let count = drained.len();
        for completion in drained {
            completion.succeed();
        }
        count
    }
}

impl ImageFetcher for RecordingFetcher {
    fn fetch(&self, url: &str, completion: FetchCompletion) {
        self.recorded().calls.push(url.to_string());
        if self.resolve_immediately {
            completion.succeed();
        } else {
            self.recorded().in_flight.push(completion);
        }
    }
}
