//! Generation-based staleness for speculative work
//!
//! Every focus change advances a generation counter. Work stamped
//! with an older generation is stale: the scheduler skips it instead of
//! aborting it. When hard cancellation is wanted, the registry hands out
//! cancellation tokens per generation and cancels every token belonging to
//! a superseded generation.

use panofeed_cache::CancellationToken;
use std::collections::BTreeMap;

/// Monotonic focus-change counter value
pub type Generation = u64;

/// Monotonic generation counter
///
/// # Example
///
/// ```
/// use panofeed_scheduler::GenerationCounter;
///
/// let mut counter = GenerationCounter::new();
/// let stamped = counter.current();
///
/// counter.advance();
/// assert!(counter.is_stale(stamped));
/// ```
#[derive(Debug, Clone, Default)]
pub struct GenerationCounter {
    current: Generation,
}

impl GenerationCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bump the generation, returning the new value
    pub fn advance(&mut self) -> Generation {
        self.current += 1;
        self.current
    }

    pub fn current(&self) -> Generation {
        self.current
    }

    /// Whether work stamped with `generation` has been superseded
    pub fn is_stale(&self, generation: Generation) -> bool {
        generation != self.current
    }
}

/// Cancellation tokens grouped by the generation that issued them
///
/// Only used when superseded fetches should be aborted rather than left to
/// finish.
#[derive(Debug, Default)]
pub struct CancellationRegistry {
    tokens: BTreeMap<Generation, Vec<CancellationToken>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a token owned by `generation`
    pub fn register(&mut self, generation: Generation) -> CancellationToken {
        let token = CancellationToken::new();
        self.tokens.entry(generation).or_default().push(token.clone());
        token
    }

    /// Cancel and forget every token from generations older than `generation`
    ///
    /// Returns the number of tokens cancelled.
    pub fn cancel_before(&mut self, generation: Generation) -> usize {
        let retained = self.tokens.split_off(&generation);
        let superseded = std::mem::replace(&mut self.tokens, retained);
        cancel_tokens(superseded)
    }

    /// Cancel every registered token
    pub fn cancel_all(&mut self) -> usize {
        cancel_tokens(std::mem::take(&mut self.tokens))
    }

    /// Number of live tokens across all generations
    pub fn len(&self) -> usize {
        self.tokens.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn cancel_tokens(tokens: BTreeMap<Generation, Vec<CancellationToken>>) -> usize {
    let mut cancelled = 0;
    for token in tokens.into_values().flatten() {
        token.cancel();
        cancelled += 1;
    }
    cancelled
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_is_monotonic() {
        let mut counter = GenerationCounter::new();
        assert_eq!(counter.current(), 0);
        assert_eq!(counter.advance(), 1);
        assert_eq!(counter.advance(), 2);
        assert_eq!(counter.current(), 2);
    }

    #[test]
    fn test_older_generations_are_stale() {
        let mut counter = GenerationCounter::new();
        let stamped = counter.advance();
        assert!(!counter.is_stale(stamped));

        counter.advance();
        assert!(counter.is_stale(stamped));
        assert!(!counter.is_stale(counter.current()));
    }

    #[test]
    fn test_registry_cancels_superseded_generations() {
        let mut registry = CancellationRegistry::new();

        let old1 = registry.register(1);
        let old2 = registry.register(2);
        let current = registry.register(3);

        assert_eq!(registry.cancel_before(3), 2);
        assert!(old1.is_cancelled());
        assert!(old2.is_cancelled());
        assert!(!current.is_cancelled());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_registry_cancel_all() {
        let mut registry = CancellationRegistry::new();
        let a = registry.register(4);
        let b = registry.register(9);

        assert_eq!(registry.cancel_all(), 2);
        assert!(a.is_cancelled());
        assert!(b.is_cancelled());
        assert!(registry.is_empty());
    }
}
